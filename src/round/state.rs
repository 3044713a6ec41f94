//! Round lifecycle state
//!
//! A round moves through a closed three-phase cycle, and at most one
//! round is ever Active or Aggregating. The shared [`RoundStatus`] is
//! the only view other components get: the HTTP surface reads it for
//! `/round/current`, and the sweeper reads the participant list when
//! eviction protection is on.

use serde::{Deserialize, Serialize};

// ============================================================================
// Round Phase
// ============================================================================

/// Phase of the round lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    /// No round running; the driver is trying to start one
    Pending,

    /// Participants fixed, deadline timer armed
    Active,

    /// Deadline passed, external aggregation in flight
    Aggregating,
}

impl RoundPhase {
    /// Validated transition table: `Pending -> Active -> Aggregating -> Pending`
    pub fn can_transition(&self, next: RoundPhase) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Aggregating)
                | (Self::Aggregating, Self::Pending)
        )
    }
}

impl Default for RoundPhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Aggregating => "aggregating",
        };
        write!(f, "{label}")
    }
}

// ============================================================================
// Round Status
// ============================================================================

/// Shared view of the current round
///
/// `ordinal` is 0 until the first round activates, then carries the
/// ordinal of the running (or just-finished) round. It only ever
/// increases, by exactly 1 per activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundStatus {
    /// Current round ordinal (0 before the first activation)
    pub ordinal: u64,

    /// Current phase
    pub phase: RoundPhase,

    /// Participant ids fixed at activation; cleared when the round settles
    pub participants: Vec<String>,
}

impl RoundStatus {
    /// Check whether a round is currently accepting work
    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    /// Move to the next phase through the transition table
    pub fn advance(&mut self, next: RoundPhase) -> Result<(), InvalidPhaseTransition> {
        if !self.phase.can_transition(next) {
            return Err(InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Wire response for `GET /round/current`
    pub fn response(&self) -> RoundStatusResponse {
        RoundStatusResponse {
            round: self.ordinal,
            active: self.is_active(),
        }
    }
}

/// Wire shape of `GET /round/current`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundStatusResponse {
    pub round: u64,
    pub active: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// A phase change outside the transition table
#[derive(Debug, Clone, Copy)]
pub struct InvalidPhaseTransition {
    pub from: RoundPhase,
    pub to: RoundPhase,
}

impl std::fmt::Display for InvalidPhaseTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid round transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidPhaseTransition {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cycle() {
        use RoundPhase::*;

        assert!(Pending.can_transition(Active));
        assert!(Active.can_transition(Aggregating));
        assert!(Aggregating.can_transition(Pending));

        assert!(!Pending.can_transition(Aggregating));
        assert!(!Active.can_transition(Pending));
        assert!(!Aggregating.can_transition(Active));
        assert!(!Active.can_transition(Active));
    }

    #[test]
    fn test_advance_through_full_cycle() {
        let mut status = RoundStatus::default();
        assert_eq!(status.ordinal, 0);
        assert_eq!(status.phase, RoundPhase::Pending);

        status.ordinal = 1;
        status.advance(RoundPhase::Active).unwrap();
        assert!(status.is_active());

        status.advance(RoundPhase::Aggregating).unwrap();
        assert!(!status.is_active());

        status.advance(RoundPhase::Pending).unwrap();
        assert_eq!(status.phase, RoundPhase::Pending);
    }

    #[test]
    fn test_advance_rejects_shortcuts() {
        let mut status = RoundStatus::default();
        let err = status.advance(RoundPhase::Aggregating).unwrap_err();
        assert_eq!(err.from, RoundPhase::Pending);
        assert_eq!(err.to, RoundPhase::Aggregating);
        // state unchanged on rejection
        assert_eq!(status.phase, RoundPhase::Pending);
    }

    #[test]
    fn test_wire_response() {
        let mut status = RoundStatus {
            ordinal: 3,
            phase: RoundPhase::Active,
            participants: vec!["p1".to_string()],
        };

        let response = status.response();
        assert_eq!(response.round, 3);
        assert!(response.active);

        status.advance(RoundPhase::Aggregating).unwrap();
        let response = status.response();
        assert_eq!(response.round, 3);
        assert!(!response.active);

        let json = serde_json::to_string(&status.response()).unwrap();
        assert_eq!(json, r#"{"round":3,"active":false}"#);
    }
}
