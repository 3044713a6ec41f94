//! Provider fleet management
//!
//! This module owns the authoritative view of the volunteer fleet:
//! who is registered, what state each provider is in, and who gets
//! evicted when heartbeats stop arriving.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           Provider Fleet            │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │      Provider Registry       │  │
//! │  │  - Registration              │  │
//! │  │  - Heartbeat tracking        │  │
//! │  │  - Round claims/settlement   │  │
//! │  └──────────────────────────────┘  │
//! │                                     │
//! │  ┌──────────────────────────────┐  │
//! │  │       Offline Sweeper        │  │
//! │  │  - Staleness eviction        │  │
//! │  │  - Participant protection    │  │
//! │  └──────────────────────────────┘  │
//! └─────────────────────────────────────┘
//! ```
//!
//! Every mutation funnels through [`registry::ProviderRegistry`]'s
//! single lock, so HTTP handlers, the round driver, and the sweeper can
//! run concurrently without producing inconsistent states.

pub mod provider;
pub mod registry;
pub mod sweep;

// Re-export main types
pub use provider::{HardwareProfile, ProviderInfo, ProviderStatus};
pub use registry::{ProviderRegistry, RegistryError, RegistryStats, RoundAccounting};
pub use sweep::{start_offline_sweeper, SweepConfig};
