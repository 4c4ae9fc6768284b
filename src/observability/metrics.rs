//! Metrics collection and exposition.
//!
//! # Metrics
//! - `docwire_client_requests_total` (counter): requests by opcode, command
//! - `docwire_client_responses_total` (counter): responses by opcode, command, argument, result
//! - `docwire_client_connections` (gauge): current connection count

use std::net::SocketAddr;

use dashmap::DashMap;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::wire::OpCode;

const REQUESTS_TOTAL: &str = "docwire_client_requests_total";
const RESPONSES_TOTAL: &str = "docwire_client_responses_total";
const CONNECTIONS: &str = "docwire_client_connections";

/// Installs the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!(REQUESTS_TOTAL, "Total number of requests.");
            describe_counter!(RESPONSES_TOTAL, "Total number of responses.");
            describe_gauge!(CONNECTIONS, "Number of open client connections.");
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    opcode: String,
    command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResponseKey {
    opcode: String,
    command: String,
    argument: String,
    result: String,
}

/// Client connection metrics shared by all sessions of a listener.
#[derive(Debug, Default)]
pub struct ConnMetrics {
    requests: DashMap<RequestKey, u64>,
    responses: DashMap<ResponseKey, u64>,
}

impl ConnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, opcode: OpCode, command: &str) {
        let key = RequestKey {
            opcode: opcode.to_string(),
            command: command.to_string(),
        };
        counter!(REQUESTS_TOTAL, "opcode" => key.opcode.clone(), "command" => key.command.clone()).increment(1);
        *self.requests.entry(key).or_insert(0) += 1;
    }

    pub fn record_response(&self, opcode: OpCode, command: &str, argument: &str, result: &str) {
        let key = ResponseKey {
            opcode: opcode.to_string(),
            command: command.to_string(),
            argument: argument.to_string(),
            result: result.to_string(),
        };
        counter!(
            RESPONSES_TOTAL,
            "opcode" => key.opcode.clone(),
            "command" => key.command.clone(),
            "argument" => key.argument.clone(),
            "result" => key.result.clone()
        )
        .increment(1);
        *self.responses.entry(key).or_insert(0) += 1;
    }

    pub fn connection_opened(&self) {
        gauge!(CONNECTIONS).increment(1.0);
    }

    pub fn connection_closed(&self) {
        gauge!(CONNECTIONS).decrement(1.0);
    }

    /// Requests recorded for (opcode, command).
    pub fn requests(&self, opcode: OpCode, command: &str) -> u64 {
        let key = RequestKey {
            opcode: opcode.to_string(),
            command: command.to_string(),
        };
        self.requests.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// Responses recorded for (opcode, command, argument, result).
    pub fn responses(&self, opcode: OpCode, command: &str, argument: &str, result: &str) -> u64 {
        let key = ResponseKey {
            opcode: opcode.to_string(),
            command: command.to_string(),
            argument: argument.to_string(),
            result: result.to_string(),
        };
        self.responses.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// Total responses with the given result label, across all other labels.
    pub fn responses_with_result(&self, result: &str) -> u64 {
        self.responses
            .iter()
            .filter(|e| e.key().result == result)
            .map(|e| *e.value())
            .sum()
    }
}
