//! Scripted capture backend for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::source::{
    AudioBackend, AudioError, AudioSource, CaptureFormat, DeviceReadError, PlatformSource,
};

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Frame(Vec<u8>),
    Fail(DeviceReadError),
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) opened: AtomicUsize,
    pub(crate) released: AtomicUsize,
    pub(crate) live: AtomicUsize,
    pub(crate) max_live: AtomicUsize,
}

/// Hands out sources that replay `script`, then idle until closed.
pub(crate) struct FakeBackend {
    script: Vec<Step>,
    refuse: bool,
    pub(crate) counters: Arc<Counters>,
    pub(crate) last_source: Mutex<Option<PlatformSource>>,
}

impl FakeBackend {
    pub(crate) fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            refuse: false,
            counters: Arc::new(Counters::default()),
            last_source: Mutex::new(None),
        }
    }

    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn open(
        &self,
        format: CaptureFormat,
        source: PlatformSource,
    ) -> Result<Box<dyn AudioSource>, AudioError> {
        if self.refuse {
            return Err(AudioError::StreamCreationFailed("device busy".to_string()));
        }

        *self.last_source.lock().unwrap() = Some(source);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeSource {
            format,
            steps: self.script.iter().cloned().collect(),
            open: true,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeSource {
    format: CaptureFormat,
    steps: VecDeque<Step>,
    open: bool,
    counters: Arc<Counters>,
}

impl AudioSource for FakeSource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        4096
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, DeviceReadError> {
        if !self.open {
            return Err(DeviceReadError::InvalidOperation);
        }
        std::thread::sleep(Duration::from_millis(1));
        match self.steps.pop_front() {
            Some(Step::Frame(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Step::Fail(err)) => Err(err),
            None => Ok(0),
        }
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.close();
    }
}
