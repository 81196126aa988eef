//! Attachment store: uploaded files kept on disk under generated ids, with an
//! in-memory metadata index that can optionally be persisted next to them.

pub mod error;
pub mod mime;
pub mod store;

pub use {
    error::{Error, Result},
    store::{Attachment, AttachmentStore, StoreOptions},
};
