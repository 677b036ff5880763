//! Publication state machine
//!
//! ```text
//! scheduled --deliver--> posting --published--> posted
//!                           |------transient--> scheduled (retry_count + 1)
//!                           |------exhausted--> failed
//!                           |------terminal---> failed
//! scheduled | posting --cancel--> cancelled
//! ```
//!
//! [`transition`] is pure: it decides the next status and the effects to
//! carry out. The dispatcher is the only interpreter of those effects.

use std::time::Duration;

use super::retry::{RetryDecision, RetryPolicy};
use crate::types::PublicationStatus;

/// The parts of a publication row the machine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub status: PublicationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The queue delivered the job
    Deliver,
    Published {
        post_id: String,
        post_url: String,
        unit_ids: Vec<String>,
    },
    /// Network trouble, 5xx, rate limit, or a token the platform rejected
    /// but a refresh could replace
    TransientFailure {
        error: String,
        published_ids: Vec<String>,
        auth_rejected: bool,
    },
    /// Content rejected; retrying cannot help
    TerminalFailure {
        error: String,
        published_ids: Vec<String>,
    },
    /// No usable credential; the user has to reconnect
    CredentialDead { reason: String },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Compare-and-set `scheduled -> posting`
    Claim,
    RecordPosted {
        post_id: String,
        post_url: String,
        unit_ids: Vec<String>,
    },
    EmitAnalytics,
    ScheduleRetry {
        retry_count: u32,
        delay: Duration,
        error: String,
        published_ids: Vec<String>,
    },
    RecordFailure {
        error: String,
        published_ids: Vec<String>,
    },
    DeactivateAccount { reason: String },
    RecordCancelled,
    /// Nothing to do; logged as an idempotent skip
    Skip { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: PublicationStatus,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: PublicationStatus, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }

    fn skip(current: PublicationStatus, reason: String) -> Self {
        Self {
            next: current,
            effects: vec![Effect::Skip { reason }],
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self.effects.as_slice(), [Effect::Skip { .. }])
    }
}

pub fn transition(snapshot: Snapshot, event: Event, policy: &RetryPolicy) -> Transition {
    use PublicationStatus::*;

    match (snapshot.status, event) {
        // A posting row is only reclaimable once its lease ran out; the
        // claim itself decides that.
        (Scheduled | Posting, Event::Deliver) => Transition::to(Posting, vec![Effect::Claim]),
        (status, Event::Deliver) => {
            Transition::skip(status, format!("publication is already {}", status))
        }

        (
            Posting,
            Event::Published {
                post_id,
                post_url,
                unit_ids,
            },
        ) => Transition::to(
            Posted,
            vec![
                Effect::RecordPosted {
                    post_id,
                    post_url,
                    unit_ids,
                },
                Effect::EmitAnalytics,
            ],
        ),

        (
            Posting,
            Event::TransientFailure {
                error,
                published_ids,
                auth_rejected,
            },
        ) => match policy.decide(snapshot.retry_count, snapshot.max_retries) {
            RetryDecision::Retry { retry_count, delay } => Transition::to(
                Scheduled,
                vec![Effect::ScheduleRetry {
                    retry_count,
                    delay,
                    error,
                    published_ids,
                }],
            ),
            RetryDecision::Exhausted => {
                let mut effects = vec![Effect::RecordFailure {
                    error: error.clone(),
                    published_ids,
                }];
                if auth_rejected {
                    effects.push(Effect::DeactivateAccount {
                        reason: format!("Platform kept rejecting the access token: {}", error),
                    });
                }
                Transition::to(Failed, effects)
            }
        },

        (
            Posting,
            Event::TerminalFailure {
                error,
                published_ids,
            },
        ) => Transition::to(
            Failed,
            vec![Effect::RecordFailure {
                error,
                published_ids,
            }],
        ),

        (Posting, Event::CredentialDead { reason }) => Transition::to(
            Failed,
            vec![Effect::RecordFailure {
                error: reason,
                published_ids: Vec::new(),
            }],
        ),

        (Scheduled | Posting, Event::Cancel) => {
            Transition::to(Cancelled, vec![Effect::RecordCancelled])
        }
        (status, Event::Cancel) => {
            Transition::skip(status, format!("cannot cancel a {} publication", status))
        }

        (status, event) => Transition::skip(
            status,
            format!("{} is not valid in state {}", event_name(&event), status),
        ),
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Deliver => "deliver",
        Event::Published { .. } => "published",
        Event::TransientFailure { .. } => "transient failure",
        Event::TerminalFailure { .. } => "terminal failure",
        Event::CredentialDead { .. } => "credential failure",
        Event::Cancel => "cancel",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PublicationStatus::*;

    fn snap(status: PublicationStatus, retry_count: u32) -> Snapshot {
        Snapshot {
            status,
            retry_count,
            max_retries: 3,
        }
    }

    fn transient(auth_rejected: bool) -> Event {
        Event::TransientFailure {
            error: "503".to_string(),
            published_ids: vec!["1".to_string()],
            auth_rejected,
        }
    }

    #[test]
    fn test_deliver_claims_only_live_rows() {
        let policy = RetryPolicy::default();
        assert_eq!(
            transition(snap(Scheduled, 0), Event::Deliver, &policy),
            Transition::to(Posting, vec![Effect::Claim])
        );
        assert_eq!(
            transition(snap(Posting, 0), Event::Deliver, &policy).effects,
            vec![Effect::Claim]
        );
        for status in [Posted, Failed, Cancelled] {
            let t = transition(snap(status, 0), Event::Deliver, &policy);
            assert!(t.is_skip());
            assert_eq!(t.next, status);
        }
    }

    #[test]
    fn test_success_records_and_emits() {
        let t = transition(
            snap(Posting, 1),
            Event::Published {
                post_id: "9".to_string(),
                post_url: "u".to_string(),
                unit_ids: vec!["9".to_string()],
            },
            &RetryPolicy::default(),
        );
        assert_eq!(t.next, Posted);
        assert_eq!(t.effects.last(), Some(&Effect::EmitAnalytics));
    }

    #[test]
    fn test_transient_failure_retries_with_backoff() {
        let t = transition(snap(Posting, 1), transient(false), &RetryPolicy::default());
        assert_eq!(t.next, Scheduled);
        assert_eq!(
            t.effects,
            vec![Effect::ScheduleRetry {
                retry_count: 2,
                delay: Duration::from_secs(240),
                error: "503".to_string(),
                published_ids: vec!["1".to_string()],
            }]
        );
    }

    #[test]
    fn test_transient_failure_at_ceiling_fails() {
        let t = transition(snap(Posting, 3), transient(false), &RetryPolicy::default());
        assert_eq!(t.next, Failed);
        assert_eq!(t.effects.len(), 1);

        let t = transition(snap(Posting, 3), transient(true), &RetryPolicy::default());
        assert!(matches!(t.effects[1], Effect::DeactivateAccount { .. }));
    }

    #[test]
    fn test_terminal_and_credential_failures_skip_retries() {
        let policy = RetryPolicy::default();
        let t = transition(
            snap(Posting, 0),
            Event::TerminalFailure {
                error: "too long".to_string(),
                published_ids: vec![],
            },
            &policy,
        );
        assert_eq!(t.next, Failed);

        let t = transition(
            snap(Posting, 0),
            Event::CredentialDead {
                reason: "reconnect".to_string(),
            },
            &policy,
        );
        assert_eq!(t.next, Failed);
    }

    #[test]
    fn test_cancel_from_live_states_only() {
        let policy = RetryPolicy::default();
        assert_eq!(transition(snap(Scheduled, 0), Event::Cancel, &policy).next, Cancelled);
        assert_eq!(transition(snap(Posting, 0), Event::Cancel, &policy).next, Cancelled);
        assert!(transition(snap(Posted, 0), Event::Cancel, &policy).is_skip());
        assert!(transition(snap(Cancelled, 0), Event::Cancel, &policy).is_skip());
    }

    #[test]
    fn test_outcomes_outside_posting_are_ignored() {
        let t = transition(snap(Cancelled, 0), transient(false), &RetryPolicy::default());
        assert!(t.is_skip());
        assert_eq!(t.next, Cancelled);
    }
}
