#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset load request, response, and configuration types.
//!
//! This crate defines the vocabulary shared by every stage of the loader:
//! the inbound [`ExtractLoadRequest`], the outbound [`ExtractLoadResponse`],
//! the closed [`DataType`] and [`GeometryKind`] sets, the parsed
//! [`FeatureCollection`], and the [`LoadConfig`] knobs read from the
//! environment.

pub mod config;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{ConfigError, LoadConfig, parse_env};

/// Opaque identifier grouping all rows produced by one load.
///
/// Never empty; use [`DatasetId::new`] to construct one from untrusted
/// input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Wraps a dataset identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyDatasetIdError`] if the identifier is blank.
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyDatasetIdError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(EmptyDatasetIdError);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DatasetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a blank dataset identifier is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dataset id must not be empty")]
pub struct EmptyDatasetIdError;

/// Dataset family named by the inbound message's `data_type`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    /// `OpenSidewalks` pedestrian network datasets.
    Osw,
    /// GTFS-Flex transit datasets.
    Flex,
    /// GTFS-Pathways station datasets.
    Pathways,
}

/// Feature category of one archive entry. Each kind has its own table and
/// its own metadata column on the `dataset` row.
///
/// Declaration order is significant: classification checks kinds in this
/// order and the first match wins.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeometryKind {
    /// Graph vertices (`*.nodes.geojson`).
    Node,
    /// Graph edges (`*.edges.geojson`).
    Edge,
    /// Point extensions (`*.points.geojson`).
    ExtensionPoint,
    /// Line extensions (`*.lines.geojson`).
    ExtensionLine,
    /// Polygon extensions (`*.polygons.geojson`).
    ExtensionPolygon,
    /// Zones (`*.zones.geojson`).
    Zone,
}

impl GeometryKind {
    /// Every kind, in classification order.
    pub const ALL: [Self; 6] = [
        Self::Node,
        Self::Edge,
        Self::ExtensionPoint,
        Self::ExtensionLine,
        Self::ExtensionPolygon,
        Self::Zone,
    ];

    /// Substring that identifies this kind inside an archive entry path.
    #[must_use]
    pub const fn path_token(self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Edge => "edges",
            Self::ExtensionPoint => "points",
            Self::ExtensionLine => "lines",
            Self::ExtensionPolygon => "polygons",
            Self::Zone => "zones",
        }
    }

    /// Table that receives this kind's feature rows.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::ExtensionPoint => "extension_point",
            Self::ExtensionLine => "extension_line",
            Self::ExtensionPolygon => "extension_polygon",
            Self::Zone => "zone",
        }
    }

    /// Column on the `dataset` row that stores this kind's collection
    /// metadata.
    #[must_use]
    pub const fn metadata_column(self) -> &'static str {
        match self {
            Self::Node => "node_info",
            Self::Edge => "edge_info",
            Self::ExtensionPoint => "ext_point_info",
            Self::ExtensionLine => "ext_line_info",
            Self::ExtensionPolygon => "ext_polygon_info",
            Self::Zone => "zone_info",
        }
    }

    /// Position of this kind in [`Self::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A parsed `GeoJSON`-like feature collection.
///
/// Features are kept as raw JSON and stored verbatim; everything except
/// `type` and `features` lands in [`Self::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// The collection's `type` member (normally `"FeatureCollection"`).
    #[serde(rename = "type")]
    pub collection_type: String,
    /// Features in source order.
    pub features: Vec<serde_json::Value>,
    /// Remaining top-level members (`dataSource`, `region`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FeatureCollection {
    /// Parses a collection from UTF-8 JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the bytes are not valid JSON or
    /// lack the `type` / `features` members.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Metadata written to the dataset row: every non-feature top-level
    /// member, with `null` replaced by an empty string.
    #[must_use]
    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        self.extra
            .iter()
            .map(|(key, value)| {
                let value = if value.is_null() {
                    serde_json::Value::String(String::new())
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// Payload of an inbound extract-load message.
///
/// Fields default to empty strings so that incomplete messages still reach
/// validation and produce a failure report instead of vanishing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractLoadRequest {
    /// Dataset family: `osw`, `flex`, or `pathways`.
    pub data_type: String,
    /// Dataset whose rows are replaced by this load. When blank, the
    /// envelope's message id names the dataset.
    pub tdei_dataset_id: String,
    /// Project group that owns the dataset. Carried for the caller's
    /// benefit; the loader does not authorize against it.
    pub tdei_project_group_id: String,
    /// Storage location of the zip archive.
    pub file_upload_path: String,
    /// User who requested the load; recorded on every row.
    pub user_id: String,
}

/// Payload of an outbound extract-load result message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractLoadResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Whether the load committed.
    pub success: bool,
    /// Echo of the request's `data_type`.
    pub data_type: String,
    /// Echo of the request's `file_upload_path`.
    pub file_upload_path: String,
}

/// Stage of a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LoadPhase {
    /// Request received, nothing touched yet.
    Start,
    /// Removing rows from any previous load of the dataset.
    Deleting,
    /// Streaming the archive into the open transaction.
    Loading,
    /// Recomputing dataset statistics after commit.
    Aggregating,
    /// Load committed and reported.
    Done,
    /// Load aborted; any transaction has been rolled back.
    Failed,
}

/// Counters collected while loading one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Rows inserted per geometry kind.
    pub rows: BTreeMap<GeometryKind, u64>,
    /// Non-directory entries encountered in the archive.
    pub entries_seen: u64,
    /// Entries dropped because they were unclassified or unparseable.
    pub entries_skipped: u64,
    /// Wall-clock duration of the whole load.
    pub elapsed: Duration,
}

impl LoadSummary {
    /// Total rows inserted across every kind.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.rows.values().sum()
    }
}

impl std::fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rows", self.total_rows())?;
        for (kind, count) in &self.rows {
            write!(f, ", {kind}={count}")?;
        }
        write!(
            f,
            " ({} entries, {} skipped, {:.1}s)",
            self.entries_seen,
            self.entries_skipped,
            self.elapsed.as_secs_f64()
        )
    }
}
