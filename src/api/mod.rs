// =============================================================================
// Control API — the operator's read/confirm surface
// =============================================================================

pub mod rest;

pub use rest::router;
