//! Request and response bodies of the HTTP API.
//!
//! ```json
//! POST /jobs
//! {
//!   "project_id": "wildlife",
//!   "keywords": ["red panda", "snow leopard"],
//!   "max_images": 250,
//!   "priority": 7
//! }
//! ```
//!
//! Status and chunk statistics are served as
//! [`JobStatusView`](crate::jobs::JobStatusView) and
//! [`ChunkStatistics`](crate::jobs::ChunkStatistics).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::jobs::JobStatus;
use crate::observability::MetricsSnapshot;

fn default_project_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default = "default_project_id")]
    pub project_id: String,
    pub keywords: Vec<String>,
    pub max_images: u32,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total_chunks: u32,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    /// Tasks queued in the broker and not yet picked up by a worker
    pub task_backlog: usize,
}
