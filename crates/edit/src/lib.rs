//! Attribute-edit engine for the cadence DICOM relay
//!
//! Editors are ordered, side-effecting transformers applied to a private copy
//! of an inbound dataset before it is forwarded. Each editor receives the
//! mutable dataset together with a per-transfer [`EditContext`] and may stop
//! the chain for the current object, or abort the whole outbound connection,
//! by setting the context's abort reason.

pub mod chain;
pub mod context;
pub mod overwrite;
pub mod uid_remap;

use dicom_object::InMemDicomObject;
use thiserror::Error;

pub use chain::EditorChain;
pub use context::{Abort, EditContext};
pub use overwrite::OverwriteEditor;
pub use uid_remap::UidRemapEditor;

/// Result type alias for edit operations
pub type Result<T> = std::result::Result<T, EditError>;

/// Error types that can occur while editing a dataset
#[derive(Error, Debug)]
pub enum EditError {
    #[error("Attribute access failed: {0}")]
    Access(String),

    #[error("Invalid attribute value: {0}")]
    Value(String),
}

impl EditError {
    /// Create a new attribute access error
    pub fn access(msg: impl Into<String>) -> Self {
        Self::Access(msg.into())
    }

    /// Create a new value error
    pub fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }
}

/// Contract for a single dataset transformer.
///
/// Implementations mutate the dataset in place and return whether the chain
/// should continue with the next editor. Returning `false`, or setting an
/// abort reason on the context, short-circuits the remaining chain for the
/// current object. Editors must not retain references into the dataset
/// beyond their own invocation; the caller owns the dataset lifetime.
pub trait AttributeEditor: Send + Sync {
    /// Apply this editor to the dataset.
    fn apply(&self, dataset: &mut InMemDicomObject, ctx: &mut EditContext) -> Result<bool>;
}
