//! Per-identity connection lifecycle as a pure state machine.
//!
//! Each transition is a function of (current state, event) to (new state,
//! side-effect list), so the sequencing rules are unit-testable without a
//! live transport. The supervisor realizes the effects against the registry
//! and the presence broadcaster.

use uuid::Uuid;

/// State of one identity's connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Active(Uuid),
}

/// Lifecycle event carrying the connection it concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Connect(Uuid),
    Disconnect(Uuid),
}

/// Side effects a transition requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Close the handle replaced by a newer connection
    CloseSuperseded(Uuid),
    /// Deliver the snapshot to the new connection and notify peers
    AnnounceJoin,
    /// Notify remaining connections that the identity left
    AnnounceLeave,
}

/// Apply one event to an identity's slot.
pub fn transition(state: SlotState, event: SlotEvent) -> (SlotState, Vec<Effect>) {
    match (state, event) {
        (SlotState::Absent, SlotEvent::Connect(handle)) => {
            (SlotState::Active(handle), vec![Effect::AnnounceJoin])
        }
        (SlotState::Active(old), SlotEvent::Connect(new)) => {
            // The identity stays online across the replacement; re-announcing
            // keeps presence a projection of every registry mutation.
            (
                SlotState::Active(new),
                vec![Effect::CloseSuperseded(old), Effect::AnnounceJoin],
            )
        }
        (SlotState::Active(current), SlotEvent::Disconnect(handle)) if current == handle => {
            (SlotState::Absent, vec![Effect::AnnounceLeave])
        }
        // Disconnect for a superseded or unknown handle never evicts the
        // current one.
        (state, SlotEvent::Disconnect(_)) => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_from_absent_announces_join() {
        let h = Uuid::new_v4();
        let (state, effects) = transition(SlotState::Absent, SlotEvent::Connect(h));

        assert_eq!(state, SlotState::Active(h));
        assert_eq!(effects, vec![Effect::AnnounceJoin]);
    }

    #[test]
    fn test_reconnect_supersedes_old_handle() {
        let h1 = Uuid::new_v4();
        let h2 = Uuid::new_v4();
        let (state, effects) = transition(SlotState::Active(h1), SlotEvent::Connect(h2));

        assert_eq!(state, SlotState::Active(h2));
        assert_eq!(
            effects,
            vec![Effect::CloseSuperseded(h1), Effect::AnnounceJoin]
        );
    }

    #[test]
    fn test_disconnect_current_handle_announces_leave() {
        let h = Uuid::new_v4();
        let (state, effects) = transition(SlotState::Active(h), SlotEvent::Disconnect(h));

        assert_eq!(state, SlotState::Absent);
        assert_eq!(effects, vec![Effect::AnnounceLeave]);
    }

    #[test]
    fn test_disconnect_superseded_handle_is_noop() {
        let h1 = Uuid::new_v4();
        let h2 = Uuid::new_v4();
        let (state, effects) = transition(SlotState::Active(h1), SlotEvent::Disconnect(h2));

        assert_eq!(state, SlotState::Active(h1));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_disconnect_from_absent_is_noop() {
        let h = Uuid::new_v4();
        let (state, effects) = transition(SlotState::Absent, SlotEvent::Disconnect(h));

        assert_eq!(state, SlotState::Absent);
        assert!(effects.is_empty());
    }
}
