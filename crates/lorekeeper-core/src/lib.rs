// Public fallible APIs in this crate share one concrete error contract (`LoreError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub(crate) mod carryover;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod registry;
pub mod remote;
pub mod retrieval;
pub mod state;
pub mod sync;
pub(crate) mod tokenize;
pub mod vault;

pub use engine::{Lorekeeper, QueryOptions, QueryOutcome, VaultStatus};
pub use error::{LoreError, Result};
pub use sync::CancelFlag;
