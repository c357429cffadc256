use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::route::Endpoint;

/// Mutable record of one proxied request, created by the handler pipeline
/// and stamped by the round tripper as the request progresses. Formatting
/// and emission belong to the embedding process.
#[derive(Debug, Clone, Default)]
pub struct AccessLogRecord {
    pub method: String,
    pub uri: String,
    pub remote_addr: String,
    pub started_at: Option<DateTime<Utc>>,
    pub status_code: u16,
    pub body_bytes_sent: u64,
    pub route_endpoint: Option<Arc<Endpoint>>,
}

impl AccessLogRecord {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}
