fn main() {
    // Load .env file if present (RUST_LOG during development)
    let _ = dotenvy::dotenv();

    call_recorder::run();
}
