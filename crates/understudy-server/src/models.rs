//! API request and response models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use understudy_core::Mode;

/// Generic confirmation body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response body for GET /api/count.
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Per-mode counters.
#[derive(Debug, Serialize)]
pub struct Stats {
    pub counters: BTreeMap<String, u64>,
}

/// Response body for GET /api/stats.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub stats: Stats,
    pub records_count: usize,
}

/// Response body for GET/POST /api/state.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub mode: Mode,
    pub destination: String,
}

/// Request body for POST /api/state.
///
/// Either field may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct StateRequest {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

/// Request body for PUT /api/metadata.
#[derive(Debug, Deserialize)]
pub struct SetMetadataRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Response body for GET /api/metadata.
#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub data: BTreeMap<String, String>,
}

/// Response body for GET /api/health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
