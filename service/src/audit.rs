//! Audit trail for sign-off mutations.
//!
//! Every mutating service call appends one row to `audit_log` inside the same
//! transaction as the change it records. `baseline.reset` and
//! `certificate.generate` also carry whether the caller confirmed the action.

use chrono::{DateTime, Utc};
use milestone_core::Role;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::db::{DbError, Result};
use crate::store::{format_timestamp, parse_timestamp};

/// Kind of audited operation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditOperation {
    BaselineUpdate,
    BaselineSign,
    BaselineReset,
    CertificateGenerate,
    CertificateSign,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub milestone_id: String,
    pub operation: AuditOperation,
    pub actor_id: String,
    pub actor_role: Role,
    /// Caller-side confirmation, recorded for operations that ask for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

pub fn append(conn: &Connection, entry: &AuditEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_log
         (milestone_id, operation, actor_id, actor_role, confirmed, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.milestone_id,
            entry.operation.to_string(),
            entry.actor_id,
            entry.actor_role.to_string(),
            entry.confirmed,
            entry.detail,
            format_timestamp(entry.recorded_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Entries for one milestone, oldest first.
pub fn list(conn: &Connection, milestone_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT operation, actor_id, actor_role, confirmed, detail, recorded_at
         FROM audit_log WHERE milestone_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![milestone_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<bool>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (operation, actor_id, actor_role, confirmed, detail, recorded_at) = row?;
        let decode = |reason: String| DbError::Decode {
            table: "audit_log",
            id: milestone_id.to_string(),
            reason,
        };
        let operation = operation
            .parse::<AuditOperation>()
            .map_err(|e| decode(format!("unknown operation {operation:?}: {e}")))?;
        let actor_role = actor_role
            .parse::<Role>()
            .map_err(|e| decode(format!("unknown role {actor_role:?}: {e}")))?;
        entries.push(AuditEntry {
            milestone_id: milestone_id.to_string(),
            operation,
            actor_id,
            actor_role,
            confirmed,
            detail,
            recorded_at: parse_timestamp("audit_log", milestone_id, &recorded_at)?,
        });
    }
    Ok(entries)
}
