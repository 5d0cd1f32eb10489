//! Call-state machine for the recorder
//!
//! Telephony delivers raw ringing/off-hook/idle signals. All transitions go
//! through the `reduce()` function, which returns the next phase and the
//! actions the coordinator has to carry out.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Line state reported with an incoming-call broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneState {
    Ringing,
    OffHook,
    Idle,
    Other(String),
}

impl PhoneState {
    /// Map a platform state name (`RINGING`, `OFFHOOK`, `IDLE`).
    pub fn from_platform(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "RINGING" => PhoneState::Ringing,
            "OFFHOOK" => PhoneState::OffHook,
            "IDLE" => PhoneState::Idle,
            _ => PhoneState::Other(trimmed.to_string()),
        }
    }
}

/// Normalized call signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Incoming {
        state: PhoneState,
        number: Option<String>,
    },
    /// The user placed a call.
    Outgoing { number: Option<String> },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Ringing {
        number: Option<String>,
    },
    Connected {
        number: Option<String>,
        direction: CallDirection,
    },
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    BeginRecording {
        number: Option<String>,
        direction: CallDirection,
    },
    EndRecording,
    RecordMissed {
        number: Option<String>,
    },
}

/// Pure reducer function: (phase, event) -> (new_phase, actions)
pub fn reduce(phase: &CallPhase, event: CallEvent) -> (CallPhase, Vec<CallAction>) {
    match (phase, event) {
        (
            CallPhase::Idle | CallPhase::Ringing { .. },
            CallEvent::Incoming {
                state: PhoneState::Ringing,
                number,
            },
        ) => (CallPhase::Ringing { number }, vec![]),

        // Answered: the off-hook broadcast often omits the number.
        (
            CallPhase::Ringing { number: rang },
            CallEvent::Incoming {
                state: PhoneState::OffHook,
                number,
            },
        ) => {
            let number = number.or_else(|| rang.clone());
            connect(number, CallDirection::Incoming)
        }

        // Off-hook without a ring is a call placed from this phone.
        (
            CallPhase::Idle,
            CallEvent::Incoming {
                state: PhoneState::OffHook,
                number,
            },
        ) => connect(number, CallDirection::Outgoing),

        (CallPhase::Idle, CallEvent::Outgoing { number }) => {
            connect(number, CallDirection::Outgoing)
        }

        (
            CallPhase::Ringing { number },
            CallEvent::Incoming {
                state: PhoneState::Idle,
                ..
            },
        ) => (
            CallPhase::Idle,
            vec![CallAction::RecordMissed {
                number: number.clone(),
            }],
        ),

        (
            CallPhase::Connected { .. },
            CallEvent::Incoming {
                state: PhoneState::Idle,
                ..
            },
        ) => (CallPhase::Idle, vec![CallAction::EndRecording]),

        // Repeated off-hook, call waiting, Unknown and unmapped states.
        (phase, event) => {
            log::trace!("Ignoring {:?} in {:?}", event, phase);
            (phase.clone(), vec![])
        }
    }
}

fn connect(number: Option<String>, direction: CallDirection) -> (CallPhase, Vec<CallAction>) {
    (
        CallPhase::Connected {
            number: number.clone(),
            direction,
        },
        vec![CallAction::BeginRecording { number, direction }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(state: PhoneState, number: Option<&str>) -> CallEvent {
        CallEvent::Incoming {
            state,
            number: number.map(str::to_string),
        }
    }

    #[test]
    fn platform_states_are_case_insensitive() {
        assert_eq!(PhoneState::from_platform("RINGING"), PhoneState::Ringing);
        assert_eq!(PhoneState::from_platform("offhook"), PhoneState::OffHook);
        assert_eq!(PhoneState::from_platform(" Idle "), PhoneState::Idle);
        assert_eq!(
            PhoneState::from_platform("DIALING"),
            PhoneState::Other("DIALING".to_string())
        );
    }

    #[test]
    fn idle_ringing_transitions_to_ringing() {
        let (next, actions) = reduce(
            &CallPhase::Idle,
            incoming(PhoneState::Ringing, Some("555-0100")),
        );
        assert!(matches!(next, CallPhase::Ringing { number: Some(ref n) } if n == "555-0100"));
        assert!(actions.is_empty());
    }

    #[test]
    fn answered_call_begins_incoming_recording() {
        let ringing = CallPhase::Ringing {
            number: Some("555-0100".to_string()),
        };
        let (next, actions) = reduce(&ringing, incoming(PhoneState::OffHook, None));
        assert!(matches!(
            next,
            CallPhase::Connected {
                direction: CallDirection::Incoming,
                ..
            }
        ));
        assert_eq!(
            actions,
            vec![CallAction::BeginRecording {
                number: Some("555-0100".to_string()),
                direction: CallDirection::Incoming,
            }]
        );
    }

    #[test]
    fn offhook_without_ring_is_outgoing() {
        let (next, actions) = reduce(&CallPhase::Idle, incoming(PhoneState::OffHook, None));
        assert!(matches!(
            next,
            CallPhase::Connected {
                direction: CallDirection::Outgoing,
                ..
            }
        ));
        assert!(actions
            .iter()
            .any(|a| matches!(a, CallAction::BeginRecording { .. })));
    }

    #[test]
    fn placed_call_begins_outgoing_recording() {
        let (next, actions) = reduce(
            &CallPhase::Idle,
            CallEvent::Outgoing {
                number: Some("555-0199".to_string()),
            },
        );
        assert!(matches!(next, CallPhase::Connected { .. }));
        assert_eq!(
            actions,
            vec![CallAction::BeginRecording {
                number: Some("555-0199".to_string()),
                direction: CallDirection::Outgoing,
            }]
        );
    }

    #[test]
    fn ring_then_idle_is_a_missed_call() {
        let ringing = CallPhase::Ringing {
            number: Some("555-0100".to_string()),
        };
        let (next, actions) = reduce(&ringing, incoming(PhoneState::Idle, None));
        assert_eq!(next, CallPhase::Idle);
        assert_eq!(
            actions,
            vec![CallAction::RecordMissed {
                number: Some("555-0100".to_string()),
            }]
        );
    }

    #[test]
    fn hang_up_ends_recording() {
        let connected = CallPhase::Connected {
            number: None,
            direction: CallDirection::Outgoing,
        };
        let (next, actions) = reduce(&connected, incoming(PhoneState::Idle, None));
        assert_eq!(next, CallPhase::Idle);
        assert_eq!(actions, vec![CallAction::EndRecording]);
    }

    #[test]
    fn call_waiting_and_repeats_are_ignored() {
        let connected = CallPhase::Connected {
            number: Some("555-0100".to_string()),
            direction: CallDirection::Incoming,
        };
        for event in [
            incoming(PhoneState::Ringing, Some("555-0111")),
            incoming(PhoneState::OffHook, None),
            CallEvent::Outgoing { number: None },
        ] {
            let (next, actions) = reduce(&connected, event);
            assert_eq!(next, connected);
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn unknown_events_are_no_ops() {
        for phase in [
            CallPhase::Idle,
            CallPhase::Ringing { number: None },
        ] {
            let (next, actions) = reduce(&phase, CallEvent::Unknown);
            assert_eq!(next, phase);
            assert!(actions.is_empty());

            let (next, actions) = reduce(
                &phase,
                incoming(PhoneState::Other("DIALING".to_string()), None),
            );
            assert_eq!(next, phase);
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn idle_hang_up_does_nothing() {
        let (next, actions) = reduce(&CallPhase::Idle, incoming(PhoneState::Idle, None));
        assert_eq!(next, CallPhase::Idle);
        assert!(actions.is_empty());
    }
}
