//! Unconditional attribute-overwrite editor

use dicom_core::header::Tag;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_object::InMemDicomObject;
use tracing::debug;

use crate::context::EditContext;
use crate::{AttributeEditor, Result};

/// One attribute override: tag, VR, and replacement value
#[derive(Debug, Clone)]
pub struct Override {
    pub tag: Tag,
    pub vr: VR,
    pub value: String,
}

/// Applies a caller-supplied set of attribute overrides to every dataset.
///
/// Overrides are applied unconditionally, inserting the attribute when it is
/// absent and replacing it when present.
#[derive(Default)]
pub struct OverwriteEditor {
    overrides: Vec<Override>,
}

impl OverwriteEditor {
    /// Create an editor with no overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override for the given tag
    pub fn set(mut self, tag: Tag, vr: VR, value: impl Into<String>) -> Self {
        self.overrides.push(Override {
            tag,
            vr,
            value: value.into(),
        });
        self
    }

    /// Number of configured overrides
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Whether no overrides are configured
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl AttributeEditor for OverwriteEditor {
    fn apply(&self, dataset: &mut InMemDicomObject, _ctx: &mut EditContext) -> Result<bool> {
        for o in &self.overrides {
            debug!("Overwriting {} with '{}'", o.tag, o.value);
            dataset.put(DataElement::new(
                o.tag,
                o.vr,
                PrimitiveValue::from(o.value.clone()),
            ));
        }
        Ok(true)
    }
}
