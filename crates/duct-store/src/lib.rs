//! Content-addressed artifact cache for duct.
//!
//! The cache stores artifact bytes keyed by their [`Checksum`] and restores
//! them into a working tree. It is the only component that reads or writes
//! tracked data; stages and the index only ever talk to it through the
//! [`Cache`] trait.
//!
//! # Backends
//!
//! - [`LocalCache`]: objects on disk under `<root>/<ab>/<cdef...>`
//! - [`InMemoryCache`]: in-memory working tree and object map for tests
//!
//! # Design Rules
//!
//! 1. Objects are immutable once published; the same checksum always names
//!    the same bytes.
//! 2. Write-then-publish: bytes land in a temporary file inside the cache and
//!    are renamed onto their checksum path only once complete.
//! 3. A checksum mismatch is a status, not an error. Only an object whose
//!    bytes disagree with its own key is an integrity fault.
//! 4. All I/O errors are propagated with the operation and path attached.
//!
//! [`Checksum`]: duct_types::Checksum

pub mod error;
pub mod fsutil;
pub mod local;
pub mod manifest;
pub mod memory;
pub mod status;
pub mod strategy;
pub mod traits;

pub use error::{CacheError, CacheResult, IoContext};
pub use local::LocalCache;
pub use manifest::DirectoryManifest;
pub use memory::{CacheOp, InMemoryCache};
pub use status::{ArtifactStatus, FileStatus, WorkspaceKind};
pub use strategy::CheckoutStrategy;
pub use traits::Cache;
