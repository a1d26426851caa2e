//! IPC protocol types for the sign-off service.
//!
//! JSON-RPC-lite: one JSON object per line, `{"id", "method", "params"}`
//! in, `{"id", "result"}` or `{"id", "error"}` out. Every mutating method
//! carries the caller's identity in its params.

use milestone_core::{Caller, Role, ScheduleFigures, Signatory};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Sign-off error families. The specific reason travels in `error.data`.
pub const ERR_NOT_FOUND: i64 = 10;
pub const ERR_FORBIDDEN: i64 = 11;
pub const ERR_CONFLICT: i64 = 12;
pub const ERR_VALIDATION: i64 = 13;
pub const ERR_STORAGE: i64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub id: RequestId,
    pub error: RpcErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// `not_found`, `forbidden`, `conflict`, `validation` or `storage`.
    pub category: String,
    /// Finer reason, e.g. `already_signed` or `stale_version`.
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Milestone reads and setup
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneRefParams {
    pub milestone_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsParams {
    pub milestone_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastUpdateParams {
    pub milestone_id: String,
    pub forecast: ScheduleFigures,
}

// ─────────────────────────────────────────────────────────────────────────────
// Baseline
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineUpdateParams {
    pub milestone_id: String,
    pub caller: Caller,
    pub baseline: ScheduleFigures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSignParams {
    pub milestone_id: String,
    pub signatory: Signatory,
    pub caller: Caller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineResetParams {
    pub milestone_id: String,
    pub caller: Caller,
    /// Whether the operator confirmed the reset prompt.
    #[serde(default)]
    pub confirmed: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateGenerateParams {
    pub milestone_id: String,
    pub caller: Caller,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSignParams {
    pub certificate_id: String,
    pub signatory: Signatory,
    pub caller: Caller,
}

// ─────────────────────────────────────────────────────────────────────────────
// audit.list / service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditListResult {
    pub entries: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub protocol_version: String,
    pub admin_signs_for_parties: bool,
}
