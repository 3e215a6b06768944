// =============================================================================
// Upstream market provider — metadata listing and order-book REST
// =============================================================================

pub mod clob;
pub mod gamma;

pub use clob::{ClobClient, RestBook};
pub use gamma::GammaClient;
