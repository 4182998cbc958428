use std::path::Path;

use duct_types::Artifact;

use crate::error::CacheResult;
use crate::status::ArtifactStatus;
use crate::strategy::CheckoutStrategy;

/// Content-addressed artifact cache.
///
/// `working_dir` is the directory an artifact's `path` is relative to. All
/// implementations must satisfy these invariants:
/// - Committing unchanged content is a no-op for stored bytes.
/// - Identical bytes are stored once, whatever their paths.
/// - A published object is never visible in a partially written state.
/// - Status never mutates the working tree or the cache.
pub trait Cache: Send + Sync {
    /// Hash the artifact's working copy and store it (unless the artifact
    /// skips the cache). Updates `artifact.checksum` in place.
    fn commit(
        &self,
        working_dir: &Path,
        artifact: &mut Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()>;

    /// Restore the object named by `artifact.checksum` into the working tree.
    ///
    /// Fails with `EmptyChecksum` for uncommitted artifacts and with
    /// `MissingObject` when the cache lacks the object.
    fn checkout(
        &self,
        working_dir: &Path,
        artifact: &Artifact,
        strategy: CheckoutStrategy,
    ) -> CacheResult<()>;

    /// Compare the working copy with the recorded checksum.
    fn status(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<ArtifactStatus>;

    /// Replace every link into the cache at or under the artifact's path
    /// with a writable copy of the object it points to.
    ///
    /// Called before a command rewrites the artifact: writing through a
    /// link would change a stored object in place.
    fn detach(&self, working_dir: &Path, artifact: &Artifact) -> CacheResult<()>;
}
