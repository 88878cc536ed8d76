//! Directory-backed object store.
//!
//! Implements [`ossync_transfer::ObjectStoreClient`] on top of a local
//! directory, including multipart upload staging. Used by the `ossync`
//! CLI and by end-to-end tests of the transfer engine.

mod layout;
mod store;

pub use store::DirStore;
