// ============================================================================
// Health Module
// ============================================================================
//
// Readiness and liveness state shared by the whole process:
// - probe    - two atomic flags plus their HTTP responses
// - liveness - optional actor that derives liveness from an external URL
//
// The probe is constructed once at startup and injected wherever it is
// needed. There is no global instance.
//
// ============================================================================

mod liveness;
mod probe;

pub use liveness::{liveness_actor, LivenessCheck};
pub use probe::Probe;
