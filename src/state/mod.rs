//! Attack/ok state machine for the monitored trap.
//!
//! Both the event path (detection logs) and the poll path (getStatus
//! snapshots) write into one `AttackState`. The reconciliation loop owns it and
//! applies inputs one at a time, so whichever path raises the attack flag
//! first opens the incident and the other is folded into it:
//!
//! - at most one `IncidentStarted` and one `IncidentEnded` per incident
//! - every `EmergencyPause` is its own transition, never deduplicated
//! - recorded transactions and status snapshots pass through as records

use crate::onchain::types::{ChainEvent, StatusSnapshot};

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Which path raised (or corroborated) a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionSource {
    /// A DustAttackDetected log.
    DetectedEvent { message: String },
    /// A DustAttackAlert log.
    AlertEvent {
        alert_type: String,
        unique_senders: U256,
    },
    /// getStatus() reported wouldTrigger = true.
    Poll,
}

impl std::fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionSource::DetectedEvent { .. } => write!(f, "DustAttackDetected event"),
            DetectionSource::AlertEvent { alert_type, .. } => {
                write!(f, "DustAttackAlert event ({alert_type})")
            }
            DetectionSource::Poll => write!(f, "status poll"),
        }
    }
}

/// A state change worth alerting an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    IncidentStarted {
        sequence: u64,
        source: DetectionSource,
        block_number: u64,
        dust_count: Option<U256>,
        threshold: Option<U256>,
    },
    IncidentEnded {
        sequence: u64,
        /// Sequence of the IncidentStarted this closes.
        started_sequence: u64,
        block_number: u64,
        dust_count: U256,
        threshold: U256,
        /// Detections folded into the incident after it opened.
        suppressed: u32,
        duration: chrono::Duration,
    },
    Paused {
        sequence: u64,
        reason: String,
        block_number: u64,
        timestamp: u64,
    },
}

impl Transition {
    pub fn sequence(&self) -> u64 {
        match self {
            Transition::IncidentStarted { sequence, .. }
            | Transition::IncidentEnded { sequence, .. }
            | Transition::Paused { sequence, .. } => *sequence,
        }
    }
}

/// Pass-through information that changes no state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Transaction {
        from: Address,
        amount: U256,
        block_number: u64,
    },
    Status(StatusSnapshot),
    /// A detection that arrived while its incident was already open.
    Corroborated {
        incident: u64,
        source: DetectionSource,
        block_number: u64,
        detections: u32,
    },
}

/// Result of applying one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Transition(Transition),
    Record(Record),
    /// The snapshot was older than what we already hold and was dropped.
    Stale { observed_at_block: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenIncident {
    sequence: u64,
    start_block: u64,
    started_at: DateTime<Utc>,
    /// Detections seen for this incident, including the one that opened it.
    detections: u32,
}

/// The most recently ended incident. Detections for blocks the clearing
/// snapshot already covered are folded into it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClearedIncident {
    sequence: u64,
    cleared_at_block: u64,
    detections: u32,
}

/// Single-owner attack state. Fresh instances start at attack = false.
#[derive(Debug, Default)]
pub struct AttackState {
    snapshot: Option<StatusSnapshot>,
    incident: Option<OpenIncident>,
    cleared: Option<ClearedIncident>,
    sequence: u64,
    last_block: u64,
}

impl AttackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn under_attack(&self) -> bool {
        self.incident.is_some()
    }

    pub fn snapshot(&self) -> Option<&StatusSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    /// Detections counted for the open incident (0 when idle).
    pub fn detections_this_incident(&self) -> u32 {
        self.incident.as_ref().map_or(0, |i| i.detections)
    }

    /// Apply a decoded log. Detection events open an incident or fold into the
    /// open one; pauses always transition; transactions pass through.
    pub fn apply_event(&mut self, event: &ChainEvent, now: DateTime<Utc>) -> Applied {
        let block_number = event.block_number();
        self.observe_block(block_number);

        match event {
            ChainEvent::TransactionRecorded { from, amount, block_number, .. } => {
                Applied::Record(Record::Transaction {
                    from: *from,
                    amount: *amount,
                    block_number: *block_number,
                })
            }
            ChainEvent::DustAttackDetected { total_dust, message, .. } => self.detect(
                DetectionSource::DetectedEvent {
                    message: message.clone(),
                },
                block_number,
                Some(*total_dust),
                None,
                now,
            ),
            ChainEvent::DustAttackAlert { dust_count, unique_senders, alert_type, .. } => self.detect(
                DetectionSource::AlertEvent {
                    alert_type: alert_type.clone(),
                    unique_senders: *unique_senders,
                },
                block_number,
                Some(*dust_count),
                None,
                now,
            ),
            ChainEvent::EmergencyPause { reason, timestamp, .. } => {
                self.sequence += 1;
                warn!(
                    sequence = self.sequence,
                    reason = %reason,
                    block = block_number,
                    "emergency pause"
                );
                Applied::Transition(Transition::Paused {
                    sequence: self.sequence,
                    reason: reason.clone(),
                    block_number,
                    timestamp: *timestamp,
                })
            }
        }
    }

    /// Reconcile a polled snapshot. The snapshot always replaces the previous
    /// one unless it is older; the attack flag follows `would_trigger`.
    pub fn apply_poll(&mut self, snapshot: StatusSnapshot) -> Applied {
        if let Some(prev) = &self.snapshot {
            if snapshot.observed_at_block < prev.observed_at_block {
                debug!(
                    observed = snapshot.observed_at_block,
                    latest = prev.observed_at_block,
                    "dropping stale status snapshot"
                );
                return Applied::Stale {
                    observed_at_block: snapshot.observed_at_block,
                };
            }
        }

        self.observe_block(snapshot.observed_at_block);
        self.snapshot = Some(snapshot.clone());

        let incident_start = self.incident.as_ref().map(|i| i.start_block);
        match (incident_start, snapshot.would_trigger) {
            (_, true) => self.detect(
                DetectionSource::Poll,
                snapshot.observed_at_block,
                Some(snapshot.dust_count),
                Some(snapshot.threshold),
                snapshot.observed_at,
            ),
            (Some(start), false) if snapshot.observed_at_block >= start => {
                self.end_incident(snapshot)
            }
            (Some(start), false) => {
                debug!(
                    observed = snapshot.observed_at_block,
                    incident_start = start,
                    "snapshot predates incident, keeping it open"
                );
                Applied::Record(Record::Status(snapshot))
            }
            (None, false) => Applied::Record(Record::Status(snapshot)),
        }
    }

    fn end_incident(&mut self, snapshot: StatusSnapshot) -> Applied {
        let Some(open) = self.incident.take() else {
            return Applied::Record(Record::Status(snapshot));
        };
        self.sequence += 1;
        info!(
            sequence = self.sequence,
            incident = open.sequence,
            block = snapshot.observed_at_block,
            dust = %snapshot.dust_count,
            threshold = %snapshot.threshold,
            "dust attack cleared"
        );
        self.cleared = Some(ClearedIncident {
            sequence: open.sequence,
            cleared_at_block: snapshot.observed_at_block,
            detections: open.detections,
        });
        Applied::Transition(Transition::IncidentEnded {
            sequence: self.sequence,
            started_sequence: open.sequence,
            block_number: snapshot.observed_at_block,
            dust_count: snapshot.dust_count,
            threshold: snapshot.threshold,
            suppressed: open.detections.saturating_sub(1),
            duration: (snapshot.observed_at - open.started_at).max(chrono::Duration::zero()),
        })
    }

    fn detect(
        &mut self,
        source: DetectionSource,
        block_number: u64,
        dust_count: Option<U256>,
        threshold: Option<U256>,
        now: DateTime<Utc>,
    ) -> Applied {
        if let Some(open) = self.incident.as_mut() {
            open.detections = open.detections.saturating_add(1);
            debug!(
                incident = open.sequence,
                detections = open.detections,
                source = %source,
                "duplicate detection suppressed"
            );
            // A repeated poll detection is just the status line again.
            if source == DetectionSource::Poll {
                if let Some(snapshot) = &self.snapshot {
                    return Applied::Record(Record::Status(snapshot.clone()));
                }
            }
            return Applied::Record(Record::Corroborated {
                incident: open.sequence,
                source,
                block_number,
                detections: open.detections,
            });
        }

        if let Some(cleared) = self.cleared.as_mut() {
            if block_number <= cleared.cleared_at_block {
                cleared.detections = cleared.detections.saturating_add(1);
                debug!(
                    incident = cleared.sequence,
                    block = block_number,
                    cleared_at = cleared.cleared_at_block,
                    source = %source,
                    "late detection for a cleared incident"
                );
                return Applied::Record(Record::Corroborated {
                    incident: cleared.sequence,
                    source,
                    block_number,
                    detections: cleared.detections,
                });
            }
        }

        self.sequence += 1;
        self.incident = Some(OpenIncident {
            sequence: self.sequence,
            start_block: block_number,
            started_at: now,
            detections: 1,
        });
        warn!(
            sequence = self.sequence,
            source = %source,
            block = block_number,
            "DUST ATTACK DETECTED"
        );
        Applied::Transition(Transition::IncidentStarted {
            sequence: self.sequence,
            source,
            block_number,
            dust_count,
            threshold: threshold.or_else(|| self.snapshot.as_ref().map(|s| s.threshold)),
        })
    }

    fn observe_block(&mut self, block_number: u64) {
        self.last_block = self.last_block.max(block_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::types::LogMeta;
    use alloy::primitives::address;

    const TRAP: Address = address!("1111111111111111111111111111111111111111");

    fn meta(block: u64) -> LogMeta {
        LogMeta {
            contract: TRAP,
            block_number: Some(block),
            tx_hash: None,
        }
    }

    fn detected(block: u64) -> ChainEvent {
        ChainEvent::DustAttackDetected {
            meta: meta(block),
            total_dust: U256::from(20u64),
            block_number: block,
            message: "Dust attack detected!".to_string(),
        }
    }

    fn alert(block: u64) -> ChainEvent {
        ChainEvent::DustAttackAlert {
            meta: meta(block),
            dust_count: U256::from(20u64),
            unique_senders: U256::from(20u64),
            block_number: block,
            alert_type: "DUST_ATTACK".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn pause(block: u64) -> ChainEvent {
        ChainEvent::EmergencyPause {
            meta: meta(block),
            reason: "dust flood".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn snapshot(block: u64, dust: u64, would_trigger: bool) -> StatusSnapshot {
        StatusSnapshot {
            dust_count: U256::from(dust),
            threshold: U256::from(15u64),
            would_trigger,
            observed_at_block: block,
            observed_at: Utc::now(),
        }
    }

    fn started(applied: &[Applied]) -> usize {
        applied
            .iter()
            .filter(|a| matches!(a, Applied::Transition(Transition::IncidentStarted { .. })))
            .count()
    }

    fn ended(applied: &[Applied]) -> usize {
        applied
            .iter()
            .filter(|a| matches!(a, Applied::Transition(Transition::IncidentEnded { .. })))
            .count()
    }

    #[test]
    fn test_fresh_state_is_idle() {
        let state = AttackState::new();
        assert!(!state.under_attack());
        assert!(state.snapshot().is_none());
        assert_eq!(state.sequence(), 0);
        assert_eq!(state.detections_this_incident(), 0);
    }

    #[test]
    fn test_many_detections_start_one_incident() {
        let mut state = AttackState::new();
        let now = Utc::now();
        let mut out = Vec::new();
        for i in 0..20 {
            let ev = if i % 2 == 0 { detected(100) } else { alert(100) };
            out.push(state.apply_event(&ev, now));
        }
        assert_eq!(started(&out), 1);
        assert!(state.under_attack());
        assert_eq!(state.detections_this_incident(), 20);
        assert_eq!(state.sequence(), 1);
        assert!(matches!(
            out[1],
            Applied::Record(Record::Corroborated { incident: 1, detections: 2, .. })
        ));
    }

    #[test]
    fn test_event_then_poll_is_one_incident() {
        let mut state = AttackState::new();
        let a = state.apply_event(&detected(100), Utc::now());
        let b = state.apply_poll(snapshot(101, 20, true));
        assert_eq!(started(&[a, b.clone()]), 1);
        assert!(matches!(b, Applied::Record(Record::Status(_))));
        assert_eq!(state.detections_this_incident(), 2);
    }

    #[test]
    fn test_poll_then_event_is_one_incident() {
        let mut state = AttackState::new();
        let a = state.apply_poll(snapshot(100, 20, true));
        let b = state.apply_event(&alert(100), Utc::now());
        assert_eq!(started(&[a.clone(), b.clone()]), 1);
        match a {
            Applied::Transition(Transition::IncidentStarted { source, dust_count, threshold, .. }) => {
                assert_eq!(source, DetectionSource::Poll);
                assert_eq!(dust_count, Some(U256::from(20u64)));
                assert_eq!(threshold, Some(U256::from(15u64)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(b, Applied::Record(Record::Corroborated { .. })));
    }

    #[test]
    fn test_same_snapshot_twice_is_idempotent() {
        let mut state = AttackState::new();
        let snap = snapshot(100, 20, true);
        let first = state.apply_poll(snap.clone());
        let second = state.apply_poll(snap.clone());
        assert!(matches!(first, Applied::Transition(_)));
        assert!(matches!(second, Applied::Record(Record::Status(_))));

        let mut idle = AttackState::new();
        let quiet = snapshot(100, 3, false);
        assert!(matches!(idle.apply_poll(quiet.clone()), Applied::Record(_)));
        assert!(matches!(idle.apply_poll(quiet), Applied::Record(_)));
        assert_eq!(idle.sequence(), 0);
    }

    #[test]
    fn test_incident_ends_once_and_resets() {
        let mut state = AttackState::new();
        state.apply_event(&detected(100), Utc::now());
        state.apply_event(&alert(100), Utc::now());

        let end = state.apply_poll(snapshot(110, 4, false));
        match end {
            Applied::Transition(Transition::IncidentEnded {
                started_sequence,
                suppressed,
                sequence,
                ..
            }) => {
                assert_eq!(started_sequence, 1);
                assert_eq!(suppressed, 1);
                assert_eq!(sequence, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!state.under_attack());
        assert_eq!(state.detections_this_incident(), 0);

        let again = state.apply_poll(snapshot(111, 4, false));
        assert!(matches!(again, Applied::Record(Record::Status(_))));
    }

    #[test]
    fn test_snapshot_older_than_incident_cannot_end_it() {
        let mut state = AttackState::new();
        state.apply_event(&detected(200), Utc::now());
        let applied = state.apply_poll(snapshot(199, 3, false));
        assert!(matches!(applied, Applied::Record(Record::Status(_))));
        assert!(state.under_attack());
    }

    #[test]
    fn test_out_of_order_snapshot_is_stale() {
        let mut state = AttackState::new();
        state.apply_poll(snapshot(300, 1, false));
        let applied = state.apply_poll(snapshot(250, 20, true));
        assert_eq!(applied, Applied::Stale { observed_at_block: 250 });
        assert!(!state.under_attack());
        assert_eq!(state.snapshot().unwrap().observed_at_block, 300);
    }

    #[test]
    fn test_pauses_never_deduplicated() {
        let mut state = AttackState::new();
        state.apply_event(&detected(100), Utc::now());
        let out: Vec<Applied> = (0..3)
            .map(|_| state.apply_event(&pause(101), Utc::now()))
            .collect();
        let sequences: Vec<u64> = out
            .iter()
            .map(|a| match a {
                Applied::Transition(t @ Transition::Paused { .. }) => t.sequence(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sequences, vec![2, 3, 4]);
        // Pauses leave the incident untouched.
        assert!(state.under_attack());
        assert_eq!(state.detections_this_incident(), 1);
    }

    #[test]
    fn test_transactions_pass_through() {
        let mut state = AttackState::new();
        let ev = ChainEvent::TransactionRecorded {
            meta: meta(42),
            from: address!("00000000000000000000000000000000000000aa"),
            amount: U256::from(1u64),
            block_number: 42,
        };
        let applied = state.apply_event(&ev, Utc::now());
        assert!(matches!(applied, Applied::Record(Record::Transaction { block_number: 42, .. })));
        assert!(!state.under_attack());
        assert_eq!(state.sequence(), 0);
        assert_eq!(state.last_block(), 42);
    }

    #[test]
    fn test_threshold_scenario() {
        // 20 qualifying transactions in one block with a threshold of 15.
        let mut state = AttackState::new();
        let mut out = Vec::new();
        for _ in 0..20 {
            out.push(state.apply_event(
                &ChainEvent::TransactionRecorded {
                    meta: meta(500),
                    from: Address::ZERO,
                    amount: U256::from(1u64),
                    block_number: 500,
                },
                Utc::now(),
            ));
        }
        out.push(state.apply_event(&detected(500), Utc::now()));
        out.push(state.apply_event(&alert(500), Utc::now()));
        for block in 501..505 {
            out.push(state.apply_poll(snapshot(block, 20, true)));
        }
        out.push(state.apply_poll(snapshot(512, 14, false)));
        out.push(state.apply_poll(snapshot(513, 0, false)));

        assert_eq!(started(&out), 1);
        assert_eq!(ended(&out), 1);
        assert!(!state.under_attack());
    }

    #[test]
    fn test_late_detection_does_not_reopen_cleared_incident() {
        let mut state = AttackState::new();
        let mut out = vec![state.apply_event(&detected(500), Utc::now())];
        out.push(state.apply_poll(snapshot(512, 2, false)));
        out.push(state.apply_event(&detected(505), Utc::now()));
        out.push(state.apply_event(&alert(512), Utc::now()));
        out.push(state.apply_poll(snapshot(520, 1, false)));

        assert_eq!(started(&out), 1);
        assert_eq!(ended(&out), 1);
        assert!(!state.under_attack());
        assert!(matches!(
            out[2],
            Applied::Record(Record::Corroborated { incident: 1, block_number: 505, detections: 2, .. })
        ));
        assert!(matches!(
            out[3],
            Applied::Record(Record::Corroborated { incident: 1, detections: 3, .. })
        ));
    }

    #[test]
    fn test_incident_duration_never_negative() {
        let mut state = AttackState::new();
        let opened_at = Utc::now();
        state.apply_event(&detected(100), opened_at);
        let mut clear = snapshot(110, 0, false);
        clear.observed_at = opened_at - chrono::Duration::seconds(2);
        match state.apply_poll(clear) {
            Applied::Transition(Transition::IncidentEnded { duration, .. }) => {
                assert_eq!(duration, chrono::Duration::zero());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_second_incident_after_clear() {
        let mut state = AttackState::new();
        let mut out = vec![state.apply_event(&detected(100), Utc::now())];
        out.push(state.apply_poll(snapshot(120, 0, false)));
        out.push(state.apply_event(&detected(130), Utc::now()));
        assert_eq!(started(&out), 2);
        assert_eq!(ended(&out), 1);
        assert_eq!(state.sequence(), 3);
    }
}
