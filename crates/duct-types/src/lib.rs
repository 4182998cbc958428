//! Foundation types for duct.
//!
//! Every other duct crate depends on `duct-types`. It defines what a tracked
//! path looks like ([`Artifact`]) and how content is identified
//! ([`Checksum`], [`ContentHasher`]).
//!
//! # Key Types
//!
//! - [`Checksum`]: BLAKE3 content digest, hex encoded on disk
//! - [`ContentHasher`]: domain-separated streaming hasher for files and manifests
//! - [`Artifact`]: one tracked file or directory and its recorded checksum

pub mod artifact;
pub mod checksum;
pub mod error;
pub mod hasher;

pub use artifact::Artifact;
pub use checksum::Checksum;
pub use error::TypeError;
pub use hasher::ContentHasher;
