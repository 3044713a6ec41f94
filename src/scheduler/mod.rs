//! Provider selection for training rounds
//!
//! This module decides who participates in the next round. It is
//! deliberately pure: the round driver hands it a registry snapshot and
//! a clock reading, and gets back a reproducibly ordered candidate
//! list. All state changes happen elsewhere.
//!
//! # Overview
//!
//! Each eligible provider is ranked by a composite score:
//!
//! ```text
//! score = reliability * gpu_power(model) * min(availability / round_duration, 1.0)
//! ```
//!
//! - **reliability** comes from the provider's profile and is owned by
//!   the external profile store.
//! - **gpu_power** is a configured substring-lookup table
//!   ([`gpu::GpuPowerTable`]) with a default for unknown hardware.
//! - the **availability ratio** discounts providers that cannot cover a
//!   full round.
//!
//! Ties break by ascending provider id, so identical snapshots always
//! produce identical selections.
//!
//! # Modules
//!
//! - [`gpu`] - GPU model scoring table
//! - [`selection`] - The selection function itself

pub mod gpu;
pub mod selection;

// Re-export main types
pub use gpu::GpuPowerTable;
pub use selection::{composite_score, select_for_round, ScoredCandidate, SelectionParams};
