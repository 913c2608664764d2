//! Shared plumbing for the case-store workspace: logging setup, response
//! types and runtime directory helpers.

pub mod types;
pub mod utils;
pub mod env;
