// ============================================================================
// Lifecycle Module
// ============================================================================
//
// Process lifecycle coordination shared by every service role:
// - group  - ActorGroup: start long-running actors together, stop them together
// - signal - turns SIGINT/SIGTERM into an actor so operator shutdown follows
//            the same protocol as an actor failure
//
// ============================================================================

// Private module declarations
mod group;
mod signal;

// Re-export for public API
pub use group::{Actor, ActorError, ActorGroup};
pub use signal::signal_actor;

#[cfg(test)]
pub use signal::shutdown_actor;
