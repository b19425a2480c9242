//! Ordered chain of attribute editors

use std::sync::Arc;

use dicom_object::InMemDicomObject;
use tracing::debug;

use crate::context::{Abort, EditContext};
use crate::{AttributeEditor, Result};

/// An ordered chain of editors applied to a dataset before forwarding.
///
/// Cloning is cheap; the editors themselves are shared.
#[derive(Clone)]
pub struct EditorChain {
    editors: Arc<Vec<Box<dyn AttributeEditor>>>,
}

impl EditorChain {
    /// Create a new `EditorChain` from pre-built editor instances
    pub fn new(editors: impl IntoIterator<Item = Box<dyn AttributeEditor>>) -> Self {
        Self {
            editors: Arc::new(editors.into_iter().collect()),
        }
    }

    /// A chain with no editors; `apply` is a no-op that always continues
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Number of editors in the chain
    pub fn len(&self) -> usize {
        self.editors.len()
    }

    /// Whether the chain has no editors
    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }

    /// Run the chain against the dataset in configured order.
    ///
    /// Returns `true` if every editor ran and asked to continue. An editor
    /// returning `false` or setting an abort reason on the context stops the
    /// remaining chain for this object.
    pub fn apply(&self, dataset: &mut InMemDicomObject, ctx: &mut EditContext) -> Result<bool> {
        for (i, editor) in self.editors.iter().enumerate() {
            let proceed = editor.apply(dataset, ctx)?;
            if !proceed || ctx.abort() != Abort::None {
                debug!(
                    "Editor chain stopped at editor {} of {} (abort: {:?})",
                    i + 1,
                    self.editors.len(),
                    ctx.abort()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}
