//! Persisted checkpoint record schema

use std::fmt;

use chrono::{DateTime, Utc};
use courier_core::ErrorCode;
use serde::{Deserialize, Serialize};

/// What a record describes. Non-positive ids are bookkeeping entities;
/// positive ids are failed events tagged with their [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// One pipeline execution
    Run,
    /// A successfully read source range
    Blob,
    /// Raw destination response
    Report,
    /// Retry high-water mark
    Retry,
    /// One failed delivery
    Event(ErrorCode),
}

impl EntityType {
    pub const RUN_ID: i32 = -1;
    pub const BLOB_ID: i32 = -2;
    pub const REPORT_ID: i32 = -3;
    pub const RETRY_ID: i32 = -4;

    pub fn type_id(self) -> i32 {
        match self {
            Self::Run => Self::RUN_ID,
            Self::Blob => Self::BLOB_ID,
            Self::Report => Self::REPORT_ID,
            Self::Retry => Self::RETRY_ID,
            Self::Event(code) => code.code(),
        }
    }

    pub fn from_type_id(id: i32) -> Option<Self> {
        match id {
            Self::RUN_ID => Some(Self::Run),
            Self::BLOB_ID => Some(Self::Blob),
            Self::REPORT_ID => Some(Self::Report),
            Self::RETRY_ID => Some(Self::Retry),
            id if id > 0 => ErrorCode::from_code(id).map(Self::Event),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "RUN"),
            Self::Blob => write!(f, "BLOB"),
            Self::Report => write!(f, "REPORT"),
            Self::Retry => write!(f, "RETRY"),
            Self::Event(code) => write!(f, "EVENT[{}]", code.name()),
        }
    }
}

/// One append-only row: `(dag_name, timestamp, type_id, location, position, info)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub dag_name: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub type_id: i32,
    pub location: Option<String>,
    pub position: Option<String>,
    pub info: Option<String>,
}

impl CheckpointRecord {
    pub fn entity_type(&self) -> Option<EntityType> {
        EntityType::from_type_id(self.type_id)
    }

    pub fn is_event(&self) -> bool {
        self.type_id > 0
    }

    pub fn position_u64(&self) -> Option<u64> {
        self.position.as_deref().and_then(|p| p.parse().ok())
    }

    pub fn belongs_to(&self, dag_name: &str, location: &str) -> bool {
        self.dag_name == dag_name && self.location.as_deref() == Some(location)
    }
}

/// ISO-8601 UTC with microseconds and a trailing `Z`.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, FORMAT) {
            return Ok(naive.and_utc());
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
