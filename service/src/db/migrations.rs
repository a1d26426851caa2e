//! Schema versioning and migrations
//!
//! Forward-only; the applied version is tracked in `PRAGMA user_version`.

use rusqlite::{Connection, TransactionBehavior};

use super::transactions::execute_in_transaction;
use super::{DbError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Apply all pending migrations.
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        execute_in_transaction(conn, TransactionBehavior::Exclusive, |tx| {
            tx.execute_batch(MIGRATION_V1)?;
            tx.pragma_update(None, "user_version", 1)?;
            Ok::<_, DbError>(())
        })?;
        tracing::info!("applied schema migration v1");
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// V1: milestones, deliverables, certificates, append-only signatures, audit log.
const MIGRATION_V1: &str = "
CREATE TABLE IF NOT EXISTS milestones (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    baseline_date    TEXT,
    baseline_amount  INTEGER,
    forecast_date    TEXT,
    forecast_amount  INTEGER,
    actual_date      TEXT,
    actual_amount    INTEGER,
    baseline_locked  INTEGER NOT NULL DEFAULT 0,
    version          INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deliverables (
    id            TEXT PRIMARY KEY,
    milestone_id  TEXT NOT NULL REFERENCES milestones(id),
    status        TEXT,
    progress      INTEGER CHECK (progress IS NULL OR progress BETWEEN 0 AND 100)
);

CREATE INDEX IF NOT EXISTS idx_deliverables_milestone ON deliverables(milestone_id);

CREATE TABLE IF NOT EXISTS certificates (
    id            TEXT PRIMARY KEY,
    milestone_id  TEXT NOT NULL UNIQUE REFERENCES milestones(id),
    value         INTEGER NOT NULL,
    status        TEXT NOT NULL,
    generated_at  TEXT NOT NULL,
    generated_by  TEXT NOT NULL,
    version       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS signatures (
    approval_kind  TEXT NOT NULL CHECK (approval_kind IN ('baseline', 'certificate')),
    entity_id      TEXT NOT NULL,
    role           TEXT NOT NULL CHECK (role IN ('supplier', 'customer')),
    signer_id      TEXT NOT NULL,
    signer_name    TEXT NOT NULL,
    signed_at      TEXT NOT NULL,
    PRIMARY KEY (approval_kind, entity_id, role)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    milestone_id  TEXT NOT NULL,
    operation     TEXT NOT NULL,
    actor_id      TEXT NOT NULL,
    actor_role    TEXT NOT NULL,
    confirmed     INTEGER,
    detail        TEXT,
    recorded_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_milestone ON audit_log(milestone_id);

CREATE TRIGGER IF NOT EXISTS signatures_append_only
BEFORE UPDATE ON signatures
BEGIN
    SELECT RAISE(ABORT, 'signatures are append-only');
END;

CREATE TRIGGER IF NOT EXISTS certificate_signatures_permanent
BEFORE DELETE ON signatures
WHEN OLD.approval_kind = 'certificate'
BEGIN
    SELECT RAISE(ABORT, 'certificate signatures cannot be removed');
END;

CREATE TRIGGER IF NOT EXISTS signed_certificates_archival
BEFORE DELETE ON certificates
WHEN OLD.status = 'signed'
BEGIN
    SELECT RAISE(ABORT, 'signed certificates cannot be deleted');
END;
";
