
use crate::db::Storage;
use tempfile::TempDir;

/// Open a fresh store in a scratch directory.
///
/// The TempDir must be kept alive for the duration of the test.
pub(crate) async fn open_store() -> (Storage, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path()).await.unwrap();
    (storage, dir)
}
