// Perennial Infrastructure - Filesystem Adapter
// Implements: BlobStore (source content, sharded by fingerprint)

mod blob_store;

pub use blob_store::FileBlobStore;
