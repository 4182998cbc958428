use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::checksum::Checksum;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is fed to BLAKE3 before the content.
/// File bytes and directory manifests use different tags, so a file whose
/// bytes happen to equal a serialized manifest never shares its checksum.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for regular file contents.
    pub const FILE: Self = Self {
        domain: "duct-file-v1",
    };
    /// Hasher for serialized directory manifests.
    pub const MANIFEST: Self = Self {
        domain: "duct-manifest-v1",
    };

    const BUFFER_SIZE: usize = 64 * 1024;

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Checksum {
        let mut hasher = self.start();
        hasher.update(data);
        Checksum::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash everything readable from `reader`.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<Checksum> {
        let mut hasher = self.start();
        let mut buffer = vec![0u8; Self::BUFFER_SIZE];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(Checksum::from_hash(*hasher.finalize().as_bytes()))
    }

    /// Hash the contents of the file at `path`, following symlinks.
    pub fn hash_file(&self, path: &Path) -> io::Result<Checksum> {
        self.hash_reader(File::open(path)?)
    }

    /// Verify that data produces the expected checksum.
    pub fn verify(&self, data: &[u8], expected: &Checksum) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }

    fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHasher::FILE.hash(b"hello world");
        let b = ContentHasher::FILE.hash(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn domains_do_not_collide() {
        let data = b"same bytes";
        assert_ne!(
            ContentHasher::FILE.hash(data),
            ContentHasher::MANIFEST.hash(data)
        );
    }

    #[test]
    fn reader_matches_slice() {
        let data = vec![42u8; 200_000];
        let from_slice = ContentHasher::FILE.hash(&data);
        let from_reader = ContentHasher::FILE.hash_reader(&data[..]).unwrap();
        assert_eq!(from_slice, from_reader);
    }

    #[test]
    fn hash_file_reads_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file body").unwrap();
        let sum = ContentHasher::FILE.hash_file(file.path()).unwrap();
        assert!(ContentHasher::FILE.verify(b"file body", &sum));
        assert!(!ContentHasher::FILE.verify(b"tampered", &sum));
    }
}
