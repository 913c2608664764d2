//! Service layer for the case store.
//! - `storage`: remote blob backends (Dropbox, local directory, in-memory).
//! - `collection`: named JSON collections layered on whole-file blobs.
//! - `router`: action dispatch for inbound database requests.

pub mod errors;
pub mod storage;
pub mod collection;
pub mod router;
