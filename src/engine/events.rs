//! State Change Events
//!
//! Outbound stream consumed by reward computation and payment modules.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::time::Timestamp;
use crate::ledger::commitment::{CommitmentId, CommitmentState};
use crate::ledger::outcome::Decision;
use crate::ledger::registry::AppliedTransition;

/// A commitment moved between states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentStateChanged {
    /// Commitment id.
    pub commitment_id: CommitmentId,
    /// Committed address.
    pub btc_address: String,
    /// State before.
    pub old_state: CommitmentState,
    /// State after.
    pub new_state: CommitmentState,
    /// Decision that caused the change.
    pub decision: Decision,
    /// When the change was applied.
    pub timestamp: Timestamp,
}

impl CommitmentStateChanged {
    /// Event for an applied transition, if it changed the state.
    pub fn from_applied(applied: &AppliedTransition) -> Option<Self> {
        applied.changed().then(|| Self {
            commitment_id: applied.id,
            btc_address: applied.btc_address.clone(),
            old_state: applied.old_state,
            new_state: applied.new_state,
            decision: applied.decision,
            timestamp: applied.at,
        })
    }
}

/// Broadcast fan-out of state changes.
///
/// Subscribers that fall more than `capacity` events behind observe
/// `RecvError::Lagged` and resume from the oldest retained event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CommitmentStateChanged>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: CommitmentStateChanged) -> usize {
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(delivered, "state change published");
        delivered
    }

    /// New subscriber seeing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitmentStateChanged> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::commitment::Revision;

    fn applied(old_state: CommitmentState, new_state: CommitmentState) -> AppliedTransition {
        AppliedTransition {
            id: CommitmentId([3u8; 16]),
            btc_address: "bc1q".into(),
            old_state,
            new_state,
            revision: Revision { state: new_state, version: 2 },
            decision: Decision::Confirmed,
            at: 42,
        }
    }

    #[test]
    fn test_refresh_is_not_an_event() {
        assert!(CommitmentStateChanged::from_applied(&applied(CommitmentState::Verified, CommitmentState::Verified)).is_none());

        let event =
            CommitmentStateChanged::from_applied(&applied(CommitmentState::Provisional, CommitmentState::Verified)).unwrap();
        assert_eq!(event.old_state, CommitmentState::Provisional);
        assert_eq!(event.timestamp, 42);
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(CommitmentStateChanged::from_applied(&applied(CommitmentState::Verified, CommitmentState::Degraded)).unwrap()),
            0
        );

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let event =
            CommitmentStateChanged::from_applied(&applied(CommitmentState::Degraded, CommitmentState::Revoked)).unwrap();
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
