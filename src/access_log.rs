//! Structured access logging.
//!
//! Exactly one [`AccessLogRecord`] is emitted per request. The
//! [`AccessLogGuard`] returned by [`AccessLogger::begin`] emits on
//! [`AccessLogGuard::finish`], or from `Drop` with a `CLIENT_CLOSED` record if
//! the request future was cancelled first.

use crate::context::RequestContext;
use crate::error::ErrorType;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogRecord {
    pub request_id: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub response_ms: f64,
    /// Empty when no key was presented or accepted.
    pub api_key_id: String,
    pub source_ip: String,
    /// Empty on success.
    pub error_type: String,
    /// Empty on success.
    pub error_msg: String,
    /// Fine-grained outcome, e.g. `OK` or `THROTTLED_METHOD`.
    pub outcome: String,
}

/// Destination for access records. Emission is best effort.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &AccessLogRecord);
}

/// Writes each record as one JSON line on the `access_log` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &AccessLogRecord) {
        match serde_json::to_string(record) {
            Ok(line) => tracing::info!(target: "access_log", "{}", line),
            Err(e) => tracing::warn!(
                target: "access_log",
                request_id = %record.request_id,
                error = %e,
                "Failed to serialize access record"
            ),
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AccessLogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessLogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &AccessLogRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Final classification handed to the guard.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: u16,
    pub error_type: Option<ErrorType>,
    pub error_msg: String,
    pub outcome: &'static str,
}

#[derive(Clone)]
pub struct AccessLogger {
    sink: Arc<dyn LogSink>,
}

impl AccessLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn begin(&self, ctx: &RequestContext) -> AccessLogGuard {
        AccessLogGuard {
            sink: Arc::clone(&self.sink),
            request_id: ctx.request_id.clone(),
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
            source_ip: ctx.source_ip.clone(),
            received_at: ctx.received_at,
            api_key_id: String::new(),
            emitted: false,
        }
    }
}

impl std::fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogger").finish_non_exhaustive()
    }
}

/// Pending access record for one request.
pub struct AccessLogGuard {
    sink: Arc<dyn LogSink>,
    request_id: String,
    method: String,
    path: String,
    source_ip: String,
    received_at: Instant,
    api_key_id: String,
    emitted: bool,
}

impl AccessLogGuard {
    pub fn set_api_key_id(&mut self, api_key_id: &str) {
        self.api_key_id = api_key_id.to_string();
    }

    pub fn finish(mut self, completion: Completion) {
        self.emit(completion);
    }

    fn emit(&mut self, completion: Completion) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let record = AccessLogRecord {
            request_id: self.request_id.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            method: self.method.clone(),
            path: self.path.clone(),
            status: completion.status,
            response_ms: self.received_at.elapsed().as_secs_f64() * 1000.0,
            api_key_id: self.api_key_id.clone(),
            source_ip: self.source_ip.clone(),
            error_type: completion
                .error_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            error_msg: completion.error_msg,
            outcome: completion.outcome.to_string(),
        };
        self.sink.emit(&record);
    }
}

impl Drop for AccessLogGuard {
    fn drop(&mut self) {
        if !self.emitted {
            self.emit(Completion {
                status: ErrorType::ClientClosed.status(),
                error_type: Some(ErrorType::ClientClosed),
                error_msg: "Client closed the request".to_string(),
                outcome: "CLIENT_CLOSED",
            });
        }
    }
}
