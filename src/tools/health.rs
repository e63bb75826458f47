use std::time::Instant;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct HealthParams {
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub identity: &'static str,
    pub remote: Option<String>,
}

impl HealthReport {
    pub fn new(started: Instant, identity: &'static str, remote: Option<String>) -> Self {
        Self {
            status: "ok",
            version: crate::metadata::PKG_VERSION,
            uptime_seconds: started.elapsed().as_secs(),
            identity,
            remote,
        }
    }
}

pub fn health_summary(report: &HealthReport) -> String {
    format!(
        "{} (v{}, uptime {}s, identity: {}, remote: {})",
        report.status,
        report.version,
        report.uptime_seconds,
        report.identity,
        report.remote.as_deref().unwrap_or("none")
    )
}
