//! Round lifecycle management
//!
//! The round driver owns the full cycle:
//!
//! ```text
//!   Pending ──select+claim──▶ Active ──deadline──▶ Aggregating ──settle──▶ Pending
//! ```
//!
//! State lives in [`RoundStatus`] behind a lock so the HTTP surface and
//! the offline sweeper can observe it; [`RoundManager`] is the only
//! writer.

pub mod manager;
pub mod state;

pub use manager::{RoundManager, RoundManagerHandle};
pub use state::{InvalidPhaseTransition, RoundPhase, RoundStatus, RoundStatusResponse};
