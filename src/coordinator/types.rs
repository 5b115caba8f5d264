//! Service state types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Connecting
//!    │                              │
//!    │ shutdown()                   │ (consumer group ready)
//!    ↓                              ↓
//! Stopped ←──── ShuttingDown ←── Running
//!                               shutdown()
//!
//! Connecting ──(group creation fails)──→ Failed
//! ```
//!
//! - **Created**: Components wired, no background task yet.
//! - **Connecting**: Creating the consumer group.
//! - **Running**: Event consumer task spawned; read and write paths usable.
//! - **ShuttingDown**: Consumer signaled; in-flight batch draining.
//! - **Stopped**: Consumer task finished or drain timeout elapsed.
//! - **Failed**: Start-up failed. Check logs.
//!
//! The read and write paths do not depend on the state; only the event
//! consumer does.

use crate::circuit_breaker::CircuitState;

/// State of the stock service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Connecting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Created => write!(f, "Created"),
            ServiceState::Connecting => write!(f, "Connecting"),
            ServiceState::Running => write!(f, "Running"),
            ServiceState::ShuttingDown => write!(f, "ShuttingDown"),
            ServiceState::Stopped => write!(f, "Stopped"),
            ServiceState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time health snapshot. Collected without I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub state: ServiceState,
    /// Event consumer is enabled in configuration.
    pub consumer_enabled: bool,
    /// Event consumer task is currently looping.
    pub consumer_running: bool,
    /// Warehouse circuit state, when the authority exposes one.
    pub authority_circuit: Option<CircuitState>,
    /// Running, and the consumer is alive if it is enabled.
    pub ready: bool,
    /// Ready, and the warehouse circuit is not open.
    pub healthy: bool,
}
