//! Cloud object storage access.

pub mod blob;

pub use blob::{sanitize_blob_name, sanitize_container_name, BlobCredential, BlobStore, SasPermissions};
