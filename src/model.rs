//! Graph data model shared by the store, the RPC layer and the migration workers.
//!
//! A series is identified by its cache key `<checksum>_<ds_type>_<step>`, where the
//! checksum is derived from the endpoint and counter. The same triple names the series'
//! RRD file on disk.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One buffered sample of a metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphItem {
    pub endpoint: String,
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp: i64,
    #[serde(rename = "dstype")]
    pub ds_type: String,
    pub step: i32,
    #[serde(default)]
    pub heartbeat: i32,
    #[serde(default)]
    pub min: String,
    #[serde(default)]
    pub max: String,
}

impl GraphItem {
    /// Creates a sample with no tags and the heartbeat set to twice the step.
    pub fn new(
        endpoint: impl Into<String>,
        metric: impl Into<String>,
        ds_type: impl Into<String>,
        step: i32,
        timestamp: i64,
        value: f64,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            metric: metric.into(),
            tags: BTreeMap::new(),
            value,
            timestamp,
            ds_type: ds_type.into(),
            step,
            heartbeat: step.saturating_mul(2),
            min: "U".to_string(),
            max: "U".to_string(),
        }
    }

    /// Metric name plus sorted `k=v` tags, e.g. `cpu.busy/core=0,mode=user`.
    pub fn counter(&self) -> String {
        if self.tags.is_empty() {
            return self.metric.clone();
        }
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}/{}", self.metric, tags)
    }

    /// Content hash of the series this sample belongs to.
    pub fn checksum(&self) -> String {
        checksum(&self.endpoint, &self.counter())
    }

    /// Cache key of the series this sample belongs to.
    pub fn cache_key(&self) -> String {
        RrdKey {
            checksum: self.checksum(),
            ds_type: self.ds_type.clone(),
            step: self.step,
        }
        .to_string()
    }
}

/// Hex md5 of `endpoint/counter`, the series hash every graph node agrees on.
pub fn checksum(endpoint: &str, counter: &str) -> String {
    let digest = Md5::digest(format!("{endpoint}/{counter}").as_bytes());
    format!("{digest:x}")
}

/// Parsed form of a cache key `<checksum>_<ds_type>_<step>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrdKey {
    pub checksum: String,
    pub ds_type: String,
    pub step: i32,
}

impl RrdKey {
    /// Path of this series' RRD file under `storage`.
    pub fn file_name(&self, storage: &Path) -> PathBuf {
        rrd_file_name(storage, &self.checksum, &self.ds_type, self.step)
    }
}

impl FromStr for RrdKey {
    type Err = MigrateError;

    fn from_str(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('_').collect();
        let [checksum, ds_type, step] = parts.as_slice() else {
            return Err(MigrateError::InvalidKey(key.to_string()));
        };
        // Both parts end up in a file path under the RRD root.
        let hex = checksum.len() >= 2 && checksum.bytes().all(|b| b.is_ascii_hexdigit());
        let plain_ds = !ds_type.is_empty() && ds_type.bytes().all(|b| b.is_ascii_alphanumeric());
        if !hex || !plain_ds {
            return Err(MigrateError::InvalidKey(key.to_string()));
        }
        let step = step
            .parse::<i32>()
            .map_err(|_| MigrateError::InvalidKey(key.to_string()))?;
        Ok(Self {
            checksum: checksum.to_string(),
            ds_type: ds_type.to_string(),
            step,
        })
    }
}

impl fmt::Display for RrdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.checksum, self.ds_type, self.step)
    }
}

/// `storage/<checksum[0..2]>/<checksum>_<ds_type>_<step>.rrd`
pub fn rrd_file_name(storage: &Path, checksum: &str, ds_type: &str, step: i32) -> PathBuf {
    let shard = checksum.get(..2).unwrap_or(checksum);
    storage
        .join(shard)
        .join(format!("{checksum}_{ds_type}_{step}.rrd"))
}

/// Reply of `Graph.Send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleRpcResponse {
    pub code: i32,
}

/// Reply of `Graph.GetRrd`: the whole RRD file, base64 encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File64 {
    #[serde(rename = "Filename", default)]
    pub filename: String,
    #[serde(rename = "Body64")]
    pub body64: String,
}

/// Arguments of `Graph.Query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryArgs {
    pub start: i64,
    pub end: i64,
    #[serde(rename = "consolFuc", default)]
    pub consol_fun: String,
    pub endpoint: String,
    pub counter: String,
}

/// One point of a query result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrdData {
    pub timestamp: i64,
    pub value: f64,
}

/// Reply of `Graph.Query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub endpoint: String,
    pub counter: String,
    #[serde(rename = "dstype")]
    pub ds_type: String,
    pub step: i32,
    #[serde(rename = "Values")]
    pub values: Vec<RrdData>,
}
