use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use duct_types::{Artifact, Checksum, ContentHasher};

use crate::error::{CacheError, CacheResult};

/// Listing of a committed directory, stored in the cache as an object.
///
/// Entries are keyed by their name within the directory; each child
/// artifact's `path` is that same name. Sub-directories appear only when the
/// parent artifact is recursive, and carry the checksum of their own
/// manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryManifest {
    pub contents: BTreeMap<String, Artifact>,
}

impl DirectoryManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a committed child artifact.
    pub fn insert(&mut self, child: Artifact) {
        self.contents.insert(child.path.clone(), child);
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.contents.get(name)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Canonical bytes; `BTreeMap` ordering keeps them deterministic.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("string-keyed map of plain structs always serializes")
    }

    /// Decode a manifest read from the object named `checksum`.
    pub fn from_bytes(checksum: &Checksum, data: &[u8]) -> CacheResult<Self> {
        serde_json::from_slice(data).map_err(|e| CacheError::CorruptManifest {
            checksum: *checksum,
            reason: e.to_string(),
        })
    }

    /// The checksum this manifest is stored under.
    pub fn checksum(&self) -> Checksum {
        ContentHasher::MANIFEST.hash(&self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_order_independent() {
        let a = Artifact::new("a").with_checksum(Checksum::from_hash([1; 32]));
        let b = Artifact::new("b").with_checksum(Checksum::from_hash([2; 32]));

        let mut first = DirectoryManifest::new();
        first.insert(a.clone());
        first.insert(b.clone());

        let mut second = DirectoryManifest::new();
        second.insert(b);
        second.insert(a);

        assert_eq!(first.checksum(), second.checksum());
    }

    #[test]
    fn decode_rejects_garbage() {
        let sum = Checksum::from_hash([9; 32]);
        let err = DirectoryManifest::from_bytes(&sum, b"not json").unwrap_err();
        assert!(matches!(err, CacheError::CorruptManifest { .. }));
    }

    #[test]
    fn bytes_decode_back() {
        let mut manifest = DirectoryManifest::new();
        manifest.insert(Artifact::directory("sub", true).with_checksum(Checksum::from_hash([4; 32])));
        let bytes = manifest.to_bytes();
        let decoded = DirectoryManifest::from_bytes(&manifest.checksum(), &bytes).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn empty_manifest_still_encodes_to_json() {
        let manifest = DirectoryManifest::new();
        let bytes = manifest.to_bytes();
        assert_eq!(bytes, br#"{"contents":{}}"#);
        assert_eq!(
            DirectoryManifest::from_bytes(&manifest.checksum(), &bytes).unwrap(),
            manifest
        );
    }
}
