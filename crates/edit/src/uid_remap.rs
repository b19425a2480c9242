//! UID remapping editor

use std::collections::HashMap;
use std::sync::Mutex;

use dicom_core::header::Tag;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use tracing::debug;
use uuid::Uuid;

use crate::context::EditContext;
use crate::{AttributeEditor, Result};

/// Generate a new UID in the UUID-derived `2.25.<decimal>` form
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Replaces Study, Series, and SOP Instance UIDs with newly generated ones.
///
/// Each original UID maps to exactly one generated UID for the lifetime of
/// the editor, so every instance of the same study or series remaps
/// consistently within one relay run.
#[derive(Default)]
pub struct UidRemapEditor {
    studies: Mutex<HashMap<String, String>>,
    series: Mutex<HashMap<String, String>>,
    instances: Mutex<HashMap<String, String>>,
}

impl UidRemapEditor {
    /// Create a new remapping editor with empty UID maps
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct studies seen so far
    pub fn study_count(&self) -> usize {
        self.studies.lock().expect("UID map poisoned").len()
    }

    fn remap(map: &Mutex<HashMap<String, String>>, original: &str) -> String {
        let mut guard = map.lock().expect("UID map poisoned");
        guard
            .entry(original.to_string())
            .or_insert_with(new_uid)
            .clone()
    }

    fn remap_element(
        &self,
        dataset: &mut InMemDicomObject,
        tag: Tag,
        map: &Mutex<HashMap<String, String>>,
    ) {
        let original = match dataset.element(tag) {
            Ok(el) => match el.to_str() {
                Ok(v) => v.trim_end_matches('\0').to_string(),
                Err(_) => return,
            },
            // Absent attribute: nothing to remap
            Err(_) => return,
        };

        if original.is_empty() {
            return;
        }

        let mapped = Self::remap(map, &original);
        debug!("Remapping {} {} -> {}", tag, original, mapped);
        dataset.put(DataElement::new(tag, VR::UI, PrimitiveValue::from(mapped)));
    }
}

impl AttributeEditor for UidRemapEditor {
    fn apply(&self, dataset: &mut InMemDicomObject, _ctx: &mut EditContext) -> Result<bool> {
        self.remap_element(dataset, tags::STUDY_INSTANCE_UID, &self.studies);
        self.remap_element(dataset, tags::SERIES_INSTANCE_UID, &self.series);
        self.remap_element(dataset, tags::SOP_INSTANCE_UID, &self.instances);
        Ok(true)
    }
}
