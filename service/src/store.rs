//! Row mapping and statements for the sign-off tables.
//!
//! Every function takes a `&Connection`; callers pass a `Transaction`
//! (which derefs to one) so reads and the conditional write that follows
//! them share a snapshot and the write lock.
//!
//! ## Tables
//!
//! - `milestones`: schedule triple, `baseline_locked`, `version`
//! - `deliverables`: status/progress per milestone
//! - `certificates`: at most one per milestone (`UNIQUE milestone_id`)
//! - `signatures`: append-only `{role, signer_id, signer_name, signed_at}`
//!   keyed by `(approval_kind, entity_id, role)`

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use milestone_core::{
    AcceptanceCertificate, Approval, ApprovalKind, Deliverable, DeliverableStatus, DualSignoff,
    Milestone, Money, ScheduleFigures, Signatory, Signature,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{DbError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(table: &'static str, id: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Decode {
            table,
            id: id.to_string(),
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date(table: &'static str, id: &str, raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| DbError::Decode {
            table,
            id: id.to_string(),
            reason: format!("bad date {s:?}: {e}"),
        })
    })
    .transpose()
}

fn figures(
    table: &'static str,
    id: &str,
    date: Option<String>,
    amount: Option<i64>,
) -> Result<ScheduleFigures> {
    Ok(ScheduleFigures {
        date: parse_date(table, id, date)?,
        amount: amount.map(Money::from_minor),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Signatures
// ─────────────────────────────────────────────────────────────────────────────

/// Load both signature slots of one approval.
pub fn load_signoff(conn: &Connection, kind: ApprovalKind, entity_id: &str) -> Result<DualSignoff> {
    let mut stmt = conn.prepare_cached(
        "SELECT role, signer_id, signer_name, signed_at
         FROM signatures WHERE approval_kind = ?1 AND entity_id = ?2",
    )?;
    let rows = stmt.query_map(params![kind.to_string(), entity_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut supplier = None;
    let mut customer = None;
    for row in rows {
        let (role, signer_id, signer_name, signed_at) = row?;
        let role = role.parse::<Signatory>().map_err(|e| DbError::Decode {
            table: "signatures",
            id: entity_id.to_string(),
            reason: format!("unknown role {role:?}: {e}"),
        })?;
        let signature = Signature {
            role,
            signer_id,
            signer_name,
            signed_at: parse_timestamp("signatures", entity_id, &signed_at)?,
        };
        match role {
            Signatory::Supplier => supplier = Some(signature),
            Signatory::Customer => customer = Some(signature),
        }
    }
    Ok(DualSignoff::from_parts(supplier, customer))
}

/// Persist the signature `who` holds in `signoff`. The primary key rejects a
/// second row for the same slot.
pub fn insert_signature(
    conn: &Connection,
    kind: ApprovalKind,
    entity_id: &str,
    signoff: &DualSignoff,
    who: Signatory,
) -> Result<()> {
    let Some(sig) = signoff.signature(who) else {
        return Err(DbError::Transaction(format!(
            "no {who} signature to persist for {kind} {entity_id}"
        )));
    };
    conn.execute(
        "INSERT INTO signatures (approval_kind, entity_id, role, signer_id, signer_name, signed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            kind.to_string(),
            entity_id,
            who.to_string(),
            sig.signer_id,
            sig.signer_name,
            format_timestamp(sig.signed_at),
        ],
    )?;
    Ok(())
}

/// Remove both baseline signatures of a milestone (admin reset only).
pub fn delete_baseline_signatures(conn: &Connection, milestone_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM signatures WHERE approval_kind = ?1 AND entity_id = ?2",
        params![ApprovalKind::Baseline.to_string(), milestone_id],
    )?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Milestones
// ─────────────────────────────────────────────────────────────────────────────

pub fn insert_milestone(conn: &Connection, milestone: &Milestone, now: DateTime<Utc>) -> Result<()> {
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO milestones
         (id, name, baseline_date, baseline_amount, forecast_date, forecast_amount,
          actual_date, actual_amount, baseline_locked, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?9)",
        params![
            milestone.id,
            milestone.name,
            format_date(milestone.baseline.date),
            milestone.baseline.amount.map(Money::minor_units),
            format_date(milestone.forecast.date),
            milestone.forecast.amount.map(Money::minor_units),
            format_date(milestone.actual.date),
            milestone.actual.amount.map(Money::minor_units),
            ts,
        ],
    )?;
    Ok(())
}

struct MilestoneRow {
    id: String,
    name: String,
    baseline: (Option<String>, Option<i64>),
    forecast: (Option<String>, Option<i64>),
    actual: (Option<String>, Option<i64>),
    baseline_locked: bool,
    version: i64,
}

fn milestone_row(row: &Row<'_>) -> rusqlite::Result<MilestoneRow> {
    Ok(MilestoneRow {
        id: row.get(0)?,
        name: row.get(1)?,
        baseline: (row.get(2)?, row.get(3)?),
        forecast: (row.get(4)?, row.get(5)?),
        actual: (row.get(6)?, row.get(7)?),
        baseline_locked: row.get(8)?,
        version: row.get(9)?,
    })
}

/// Load a milestone with its baseline signatures.
///
/// Fails with `Decode` if the stored `baseline_locked` flag disagrees with
/// the signatures present.
pub fn load_milestone(conn: &Connection, id: &str) -> Result<Option<Milestone>> {
    let row = conn
        .query_row(
            "SELECT id, name, baseline_date, baseline_amount, forecast_date, forecast_amount,
                    actual_date, actual_amount, baseline_locked, version
             FROM milestones WHERE id = ?1",
            params![id],
            milestone_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let signoff = load_signoff(conn, ApprovalKind::Baseline, &row.id)?;
    if signoff.is_complete() != row.baseline_locked {
        return Err(DbError::Decode {
            table: "milestones",
            id: row.id,
            reason: format!(
                "baseline_locked={} but signatures {:?}",
                row.baseline_locked,
                signoff.state()
            ),
        });
    }

    Ok(Some(Milestone {
        baseline: figures("milestones", &row.id, row.baseline.0, row.baseline.1)?,
        forecast: figures("milestones", &row.id, row.forecast.0, row.forecast.1)?,
        actual: figures("milestones", &row.id, row.actual.0, row.actual.1)?,
        id: row.id,
        name: row.name,
        baseline_signoff: signoff,
        version: row.version,
    }))
}

/// Write back milestone fields and lock flag, conditional on the version the
/// caller read. Returns the new version.
pub fn update_milestone(conn: &Connection, milestone: &Milestone, now: DateTime<Utc>) -> Result<i64> {
    let changed = conn.execute(
        "UPDATE milestones SET
            name = ?1,
            baseline_date = ?2, baseline_amount = ?3,
            forecast_date = ?4, forecast_amount = ?5,
            actual_date = ?6, actual_amount = ?7,
            baseline_locked = ?8,
            version = version + 1,
            updated_at = ?9
         WHERE id = ?10 AND version = ?11",
        params![
            milestone.name,
            format_date(milestone.baseline.date),
            milestone.baseline.amount.map(Money::minor_units),
            format_date(milestone.forecast.date),
            milestone.forecast.amount.map(Money::minor_units),
            format_date(milestone.actual.date),
            milestone.actual.amount.map(Money::minor_units),
            milestone.baseline_locked(),
            format_timestamp(now),
            milestone.id,
            milestone.version,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::StaleVersion {
            table: "milestones",
            id: milestone.id.clone(),
            expected: milestone.version,
        });
    }
    Ok(milestone.version + 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Deliverables
// ─────────────────────────────────────────────────────────────────────────────

/// Insert or replace a deliverable.
pub fn put_deliverable(conn: &Connection, deliverable: &Deliverable) -> Result<()> {
    conn.execute(
        "INSERT INTO deliverables (id, milestone_id, status, progress)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            milestone_id = excluded.milestone_id,
            status = excluded.status,
            progress = excluded.progress",
        params![
            deliverable.id,
            deliverable.milestone_id,
            deliverable.status.map(|s| s.to_string()),
            deliverable.progress,
        ],
    )?;
    Ok(())
}

/// One snapshot of a milestone's deliverables, ordered by id.
pub fn load_deliverables(conn: &Connection, milestone_id: &str) -> Result<Vec<Deliverable>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, status, progress FROM deliverables WHERE milestone_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![milestone_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<u8>>(2)?,
        ))
    })?;

    let mut deliverables = Vec::new();
    for row in rows {
        let (id, status, progress) = row?;
        let status = status
            .map(|s| {
                s.parse::<DeliverableStatus>().map_err(|e| DbError::Decode {
                    table: "deliverables",
                    id: id.clone(),
                    reason: format!("unknown status {s:?}: {e}"),
                })
            })
            .transpose()?;
        deliverables.push(Deliverable {
            id,
            milestone_id: milestone_id.to_string(),
            status,
            progress,
        });
    }
    Ok(deliverables)
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificates
// ─────────────────────────────────────────────────────────────────────────────

pub fn insert_certificate(conn: &Connection, cert: &AcceptanceCertificate) -> Result<()> {
    conn.execute(
        "INSERT INTO certificates (id, milestone_id, value, status, generated_at, generated_by, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            cert.id,
            cert.milestone_id,
            cert.value.minor_units(),
            cert.status().to_string(),
            format_timestamp(cert.generated_at),
            cert.generated_by,
        ],
    )?;
    Ok(())
}

const SELECT_CERTIFICATE_BY_ID: &str =
    "SELECT id, milestone_id, value, generated_at, generated_by, version
     FROM certificates WHERE id = ?1";

const SELECT_CERTIFICATE_BY_MILESTONE: &str =
    "SELECT id, milestone_id, value, generated_at, generated_by, version
     FROM certificates WHERE milestone_id = ?1";

fn query_certificate(
    conn: &Connection,
    sql: &'static str,
    key: &str,
) -> Result<Option<AcceptanceCertificate>> {
    let row = conn
        .prepare_cached(sql)?
        .query_row(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .optional()?;
    let Some((id, milestone_id, value, generated_at, generated_by, version)) = row else {
        return Ok(None);
    };

    let generated_at = parse_timestamp("certificates", &id, &generated_at)?;
    let signoff = load_signoff(conn, ApprovalKind::Certificate, &id)?;
    Ok(Some(AcceptanceCertificate {
        id,
        milestone_id,
        value: Money::from_minor(value),
        signoff,
        generated_at,
        generated_by,
        version,
    }))
}

pub fn load_certificate(conn: &Connection, id: &str) -> Result<Option<AcceptanceCertificate>> {
    query_certificate(conn, SELECT_CERTIFICATE_BY_ID, id)
}

pub fn load_certificate_for_milestone(
    conn: &Connection,
    milestone_id: &str,
) -> Result<Option<AcceptanceCertificate>> {
    query_certificate(conn, SELECT_CERTIFICATE_BY_MILESTONE, milestone_id)
}

/// Conditional status write for a certificate. Returns the new version.
pub fn update_certificate(conn: &Connection, cert: &AcceptanceCertificate) -> Result<i64> {
    let changed = conn.execute(
        "UPDATE certificates SET status = ?1, version = version + 1
         WHERE id = ?2 AND version = ?3",
        params![cert.status().to_string(), cert.id, cert.version],
    )?;
    if changed == 0 {
        return Err(DbError::StaleVersion {
            table: "certificates",
            id: cert.id.clone(),
            expected: cert.version,
        });
    }
    Ok(cert.version + 1)
}

/// Persist the signature `who` just added to `entity`.
pub fn persist_signature<A: Approval>(
    conn: &Connection,
    entity_id: &str,
    entity: &A,
    who: Signatory,
) -> Result<()> {
    insert_signature(conn, A::KIND, entity_id, entity.signoff(), who)
}
