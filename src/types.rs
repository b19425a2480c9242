//! Common types for relay operations

use std::path::{Path, PathBuf};

use bytes::Bytes;
use dicom_dictionary_std::tags;
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::InMemDicomObject;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RelayError, Result};

/// Implicit VR Little Endian, the default transfer syntax
pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";

/// Explicit VR Little Endian
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// An inbound DICOM object as either in-memory bytes, a spooled file, or a
/// parsed dataset
#[derive(Debug)]
pub enum StorePayload {
    /// Raw part-10 bytes in memory
    Memory {
        /// Encoded DICOM stream
        data: Bytes,
        /// Associated metadata
        meta: ObjectMeta,
    },
    /// Object spooled to a temporary file
    Spooled {
        /// Path to the spool file
        path: PathBuf,
        /// Associated metadata
        meta: ObjectMeta,
        /// Whether to delete the file when dropped
        delete_on_drop: bool,
    },
    /// Object already parsed
    Parsed {
        /// Parsed dataset
        object: InMemDicomObject,
        /// Associated metadata
        meta: ObjectMeta,
    },
}

/// Metadata associated with one relayed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Unique identifier for this object
    pub id: Uuid,

    /// Transfer syntax UID
    pub transfer_syntax: Option<String>,

    /// SOP Class UID
    pub sop_class_uid: Option<String>,

    /// SOP Instance UID
    pub sop_instance_uid: Option<String>,

    /// Study Instance UID
    pub study_instance_uid: Option<String>,

    /// Series Instance UID
    pub series_instance_uid: Option<String>,

    /// Patient ID
    pub patient_id: Option<String>,

    /// Timestamp when the object was received
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Size of the encoded object in bytes
    pub size_bytes: Option<u64>,
}

impl ObjectMeta {
    /// Create new metadata with a unique ID and current timestamp
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_syntax: None,
            sop_class_uid: None,
            sop_instance_uid: None,
            study_instance_uid: None,
            series_instance_uid: None,
            patient_id: None,
            timestamp: chrono::Utc::now(),
            size_bytes: None,
        }
    }

    fn fill_from(&mut self, object: &InMemDicomObject) {
        let read = |tag| {
            object
                .element(tag)
                .ok()
                .and_then(|el| el.to_str().ok())
                .map(|v| v.trim_end_matches('\0').to_string())
        };
        if self.sop_class_uid.is_none() {
            self.sop_class_uid = read(tags::SOP_CLASS_UID);
        }
        if self.sop_instance_uid.is_none() {
            self.sop_instance_uid = read(tags::SOP_INSTANCE_UID);
        }
        if self.study_instance_uid.is_none() {
            self.study_instance_uid = read(tags::STUDY_INSTANCE_UID);
        }
        if self.series_instance_uid.is_none() {
            self.series_instance_uid = read(tags::SERIES_INSTANCE_UID);
        }
        if self.patient_id.is_none() {
            self.patient_id = read(tags::PATIENT_ID);
        }
    }
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl StorePayload {
    /// Create a new in-memory payload
    pub fn from_bytes(data: Bytes) -> Self {
        let mut meta = ObjectMeta::new();
        meta.size_bytes = Some(data.len() as u64);
        Self::Memory { data, meta }
    }

    /// Create a new spooled payload
    pub fn from_file(path: PathBuf, delete_on_drop: bool) -> Self {
        let mut meta = ObjectMeta::new();
        meta.size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
        Self::Spooled {
            path,
            meta,
            delete_on_drop,
        }
    }

    /// Create a new payload from a parsed dataset
    pub fn from_object(object: InMemDicomObject) -> Self {
        let mut meta = ObjectMeta::new();
        meta.fill_from(&object);
        Self::Parsed { object, meta }
    }

    /// Get the metadata for this payload
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Memory { meta, .. } => meta,
            Self::Spooled { meta, .. } => meta,
            Self::Parsed { meta, .. } => meta,
        }
    }

    /// Get mutable metadata for this payload
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Memory { meta, .. } => meta,
            Self::Spooled { meta, .. } => meta,
            Self::Parsed { meta, .. } => meta,
        }
    }

    /// Parse the payload into an owned dataset.
    ///
    /// `Parsed` payloads are cloned; the caller receives a private copy it
    /// may mutate freely.
    pub fn to_object(&self) -> Result<InMemDicomObject> {
        match self {
            Self::Parsed { object, .. } => Ok(object.clone()),
            Self::Spooled { path, .. } => {
                let obj = dicom_object::open_file(path)
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
                Ok((*obj).clone())
            }
            Self::Memory { data, .. } => {
                let body = strip_preamble(data.as_ref());
                let obj = dicom_object::from_reader(std::io::Cursor::new(body))
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
                Ok((*obj).clone())
            }
        }
    }

    /// Parse the payload once and fill in any missing routing metadata
    /// (SOP Class/Instance UID, study/series, transfer syntax).
    pub fn hydrate(&mut self) -> Result<()> {
        match self {
            Self::Parsed { .. } => {
                let object = self.to_object()?;
                self.meta_mut().fill_from(&object);
            }
            Self::Spooled { path, meta, .. } => {
                let obj = dicom_object::open_file(&*path)
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
                if meta.transfer_syntax.is_none() {
                    meta.transfer_syntax =
                        Some(obj.meta().transfer_syntax.trim_end_matches('\0').to_string());
                }
                meta.fill_from(&obj);
            }
            Self::Memory { data, meta } => {
                let body = strip_preamble(data.as_ref()).to_vec();
                let obj = dicom_object::from_reader(std::io::Cursor::new(body))
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
                if meta.transfer_syntax.is_none() {
                    meta.transfer_syntax =
                        Some(obj.meta().transfer_syntax.trim_end_matches('\0').to_string());
                }
                meta.fill_from(&obj);
            }
        }
        Ok(())
    }

    /// Write the payload to a part-10 file in the given directory and return
    /// its path. Spooled payloads are copied; parsed payloads are encoded
    /// with the given transfer syntax.
    pub async fn to_spool_file(&self, spool_dir: &Path, transfer_syntax: &str) -> Result<PathBuf> {
        let target = spool_dir.join(format!("{}.dcm", self.meta().id));

        match self {
            Self::Spooled { path, .. } => {
                tokio::fs::copy(path, &target).await?;
            }
            Self::Memory { data, .. } => {
                tokio::fs::write(&target, data).await?;
            }
            Self::Parsed { object, meta } => {
                let builder = FileMetaTableBuilder::new()
                    .transfer_syntax(transfer_syntax)
                    .media_storage_sop_class_uid(meta.sop_class_uid.as_deref().unwrap_or_default())
                    .media_storage_sop_instance_uid(
                        meta.sop_instance_uid.as_deref().unwrap_or_default(),
                    );
                let file_obj = object
                    .clone()
                    .with_meta(builder)
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
                file_obj
                    .write_to_file(&target)
                    .map_err(|e| RelayError::DicomParsing(e.to_string()))?;
            }
        }

        Ok(target)
    }
}

fn strip_preamble(data: &[u8]) -> &[u8] {
    if data.len() > 132 && &data[128..132] == b"DICM" {
        &data[128..]
    } else {
        data
    }
}

// Spool files are removed when the payload is dropped, on every exit path.
impl Drop for StorePayload {
    fn drop(&mut self) {
        if let StorePayload::Spooled {
            path,
            delete_on_drop,
            ..
        } = self
        {
            if *delete_on_drop {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to delete spool file {:?}: {}", path, e);
                }
            }
        }
    }
}

/// Priority attached to store and retrieve operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    /// Low priority
    Low,
    /// Medium priority (default)
    #[default]
    Medium,
    /// High priority
    High,
}

/// DICOM query/retrieve levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLevel {
    /// Patient level
    Patient,
    /// Study level
    Study,
    /// Series level
    Series,
    /// Image level
    Image,
}

/// Query parameters for C-FIND operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindQuery {
    /// Query level (PATIENT, STUDY, SERIES, IMAGE)
    pub query_level: QueryLevel,

    /// Query keys as DICOM tags or names and values
    pub parameters: std::collections::HashMap<String, String>,

    /// Maximum number of results to return (0 = unlimited)
    pub max_results: u32,
}

/// Query parameters for C-MOVE operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveQuery {
    /// Query level (PATIENT, STUDY, SERIES, IMAGE)
    pub query_level: QueryLevel,

    /// Query keys as DICOM tags or names and values
    pub parameters: std::collections::HashMap<String, String>,

    /// Destination AE title for the move
    pub destination_aet: String,

    /// Priority of the move operation
    pub priority: Priority,
}

impl FindQuery {
    /// Create a new study-level query
    pub fn study(study_instance_uid: Option<String>) -> Self {
        let mut parameters = std::collections::HashMap::new();
        if let Some(uid) = study_instance_uid {
            parameters.insert("StudyInstanceUID".to_string(), uid);
        }
        Self {
            query_level: QueryLevel::Study,
            parameters,
            max_results: 0,
        }
    }

    /// Create a new patient-level query
    pub fn patient(patient_id: Option<String>) -> Self {
        let mut parameters = std::collections::HashMap::new();
        if let Some(id) = patient_id {
            parameters.insert("PatientID".to_string(), id);
        }
        Self {
            query_level: QueryLevel::Patient,
            parameters,
            max_results: 0,
        }
    }

    /// Add a query key
    pub fn with_parameter(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(tag.into(), value.into());
        self
    }

    /// Set the maximum number of results
    pub fn with_max_results(mut self, max: u32) -> Self {
        self.max_results = max;
        self
    }
}

impl MoveQuery {
    /// Create a new move query
    pub fn new(query_level: QueryLevel, destination_aet: impl Into<String>) -> Self {
        Self {
            query_level,
            parameters: std::collections::HashMap::new(),
            destination_aet: destination_aet.into(),
            priority: Priority::default(),
        }
    }

    /// Add a query key
    pub fn with_parameter(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(tag.into(), value.into());
        self
    }
}

impl std::fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryLevel::Patient => write!(f, "PATIENT"),
            QueryLevel::Study => write!(f, "STUDY"),
            QueryLevel::Series => write!(f, "SERIES"),
            QueryLevel::Image => write!(f, "IMAGE"),
        }
    }
}

impl std::str::FromStr for QueryLevel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PATIENT" => Ok(QueryLevel::Patient),
            "STUDY" => Ok(QueryLevel::Study),
            "SERIES" => Ok(QueryLevel::Series),
            "IMAGE" => Ok(QueryLevel::Image),
            _ => Err(RelayError::config(format!("Invalid query level: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn test_object_meta_defaults() {
        let meta = ObjectMeta::new();
        assert!(meta.timestamp <= chrono::Utc::now());
        assert!(!meta.id.is_nil());
        assert!(meta.sop_class_uid.is_none());
    }

    #[test]
    fn test_from_object_extracts_metadata() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
        ));
        obj.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3.4"),
        ));
        obj.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("PID001"),
        ));

        let payload = StorePayload::from_object(obj);
        let meta = payload.meta();
        assert_eq!(
            meta.sop_class_uid.as_deref(),
            Some("1.2.840.10008.5.1.4.1.1.7")
        );
        assert_eq!(meta.sop_instance_uid.as_deref(), Some("1.2.3.4"));
        assert_eq!(meta.patient_id.as_deref(), Some("PID001"));
    }

    #[test]
    fn test_parsed_payload_clones_for_edit() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("PID001"),
        ));
        let payload = StorePayload::from_object(obj);

        let mut copy = payload.to_object().unwrap();
        copy.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("CHANGED"),
        ));

        // The payload's own dataset is untouched
        let original = payload.to_object().unwrap();
        let pid = original.element(tags::PATIENT_ID).unwrap().to_str().unwrap();
        assert_eq!(pid, "PID001");
    }

    #[test]
    fn test_spool_file_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.dcm");
        std::fs::write(&path, b"not really dicom").unwrap();

        {
            let _payload = StorePayload::from_file(path.clone(), true);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_spool_file_kept_without_delete_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.dcm");
        std::fs::write(&path, b"not really dicom").unwrap();

        {
            let _payload = StorePayload::from_file(path.clone(), false);
        }
        assert!(path.exists());
    }

    #[test]
    fn test_query_level_parsing() {
        assert_eq!("PATIENT".parse::<QueryLevel>().unwrap(), QueryLevel::Patient);
        assert_eq!("study".parse::<QueryLevel>().unwrap(), QueryLevel::Study);
        assert!("INVALID".parse::<QueryLevel>().is_err());
    }

    #[test]
    fn test_find_query_builder() {
        let query = FindQuery::patient(Some("12345".to_string()))
            .with_parameter("PatientName", "DOE^JOHN")
            .with_max_results(50);
        assert_eq!(query.query_level, QueryLevel::Patient);
        assert_eq!(query.parameters.get("PatientID"), Some(&"12345".to_string()));
        assert_eq!(query.max_results, 50);
    }
}
