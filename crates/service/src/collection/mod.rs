//! Named JSON collections stored one-file-per-collection in a [`BlobStore`].
//!
//! [`BlobStore`]: crate::storage::BlobStore

pub mod item;
pub mod name;
pub mod store;

pub use item::{Item, RESERVED_FIELDS};
pub use name::CollectionName;
pub use store::CollectionStore;
