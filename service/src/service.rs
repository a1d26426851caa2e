//! MilestoneService: orchestrates milestone reads and sign-off transitions.
//!
//! Every mutating call:
//! 1. checks the caller's role against the permission gate (`Forbidden`),
//! 2. opens an IMMEDIATE transaction and re-reads the target record,
//! 3. runs the state-machine transition on that fresh state (`Conflict`),
//! 4. writes the result with a version-conditional update plus an audit row,
//!    and commits.
//!
//! Step 2 holds SQLite's write lock, so two parties signing at the same
//! moment are serialized and the second one always observes the first
//! one's signature.

use std::time::Instant;

use chrono::Utc;
use milestone_core::{
    AcceptanceCertificate, Affordances, Approval, BaselineStatus, Caller, CertificateStatus,
    Deliverable, Milestone, MilestoneStatus, Money, PermissionGate, Role, Rollup,
    ScheduleFigures, Signatory, Signature, TransitionError,
};
use rusqlite::{Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditEntry, AuditOperation};
use crate::db::{DbError, DbPool, execute_in_transaction, with_connection};
use crate::store;

pub type Result<T> = std::result::Result<T, SignoffError>;

/// Error returned to callers of the service.
#[derive(Debug, thiserror::Error)]
pub enum SignoffError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("role {role} may not {operation}")]
    Forbidden {
        operation: &'static str,
        role: Role,
    },

    #[error("conflict: {0}")]
    Conflict(TransitionError),

    /// The record changed between read and conditional write.
    #[error("conflict: {0} was modified concurrently")]
    StaleWrite(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(DbError),
}

impl SignoffError {
    /// Error family: `not_found`, `forbidden`, `conflict`, `validation`,
    /// or `storage`.
    pub fn category(&self) -> &'static str {
        match self {
            SignoffError::NotFound { .. } => "not_found",
            SignoffError::Forbidden { .. } => "forbidden",
            SignoffError::Conflict(_) | SignoffError::StaleWrite(_) => "conflict",
            SignoffError::Validation(_) => "validation",
            SignoffError::Storage(_) => "storage",
        }
    }

    /// Specific reason code within the family.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SignoffError::Conflict(e) => e.reason_code(),
            SignoffError::StaleWrite(_) => "stale_version",
            other => other.category(),
        }
    }
}

impl From<DbError> for SignoffError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StaleVersion { table, id, .. } => {
                SignoffError::StaleWrite(format!("{table} {id}"))
            }
            other => SignoffError::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for SignoffError {
    fn from(err: rusqlite::Error) -> Self {
        SignoffError::Storage(DbError::Sqlite(err))
    }
}

/// Map a state-machine rejection onto the service taxonomy.
fn rejected(operation: &'static str, role: Role, err: TransitionError) -> SignoffError {
    if err.is_authorization() {
        SignoffError::Forbidden { operation, role }
    } else {
        SignoffError::Conflict(err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineView {
    #[serde(flatten)]
    pub figures: ScheduleFigures,
    pub locked: bool,
    pub status: BaselineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_signature: Option<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateView {
    pub id: String,
    pub status: CertificateStatus,
    pub value: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_signature: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_signature: Option<Signature>,
    pub generated_at: chrono::DateTime<Utc>,
    pub generated_by: String,
}

impl From<&AcceptanceCertificate> for CertificateView {
    fn from(cert: &AcceptanceCertificate) -> Self {
        Self {
            id: cert.id.clone(),
            status: cert.status(),
            value: cert.value,
            supplier_signature: cert.signoff.signature(Signatory::Supplier).cloned(),
            customer_signature: cert.signoff.signature(Signatory::Customer).cloned(),
            generated_at: cert.generated_at,
            generated_by: cert.generated_by.clone(),
        }
    }
}

/// Everything a presentation client needs to render one milestone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneView {
    pub id: String,
    pub name: String,
    pub status: MilestoneStatus,
    pub progress: u8,
    pub deliverable_count: usize,
    pub baseline: BaselineView,
    pub forecast: ScheduleFigures,
    pub actual: ScheduleFigures,
    pub certificate: Option<CertificateView>,
    pub version: i64,
}

impl MilestoneView {
    fn build(
        milestone: &Milestone,
        rollup: Rollup,
        certificate: Option<&AcceptanceCertificate>,
    ) -> Self {
        let signoff = &milestone.baseline_signoff;
        Self {
            id: milestone.id.clone(),
            name: milestone.name.clone(),
            status: rollup.status,
            progress: rollup.progress,
            deliverable_count: rollup.deliverable_count,
            baseline: BaselineView {
                figures: milestone.baseline.clone(),
                locked: milestone.baseline_locked(),
                status: milestone.baseline_status(),
                supplier_signature: signoff.signature(Signatory::Supplier).cloned(),
                customer_signature: signoff.signature(Signatory::Customer).cloned(),
            },
            forecast: milestone.forecast.clone(),
            actual: milestone.actual.clone(),
            certificate: certificate.map(CertificateView::from),
            version: milestone.version,
        }
    }
}

/// Project-setup input for a new milestone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMilestone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub baseline: ScheduleFigures,
    #[serde(default)]
    pub forecast: ScheduleFigures,
    #[serde(default)]
    pub actual: ScheduleFigures,
}

fn validate_figures(label: &str, figures: &ScheduleFigures) -> Result<()> {
    if figures.amount.is_some_and(Money::is_negative) {
        return Err(SignoffError::Validation(format!(
            "{label} amount must not be negative"
        )));
    }
    Ok(())
}

fn validate_id(label: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(SignoffError::Validation(format!("{label} must not be empty")));
    }
    Ok(())
}

fn require_milestone(tx: &Transaction<'_>, id: &str) -> Result<Milestone> {
    store::load_milestone(tx, id)?.ok_or_else(|| SignoffError::NotFound {
        entity: "milestone",
        id: id.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Milestone sign-off operations over a SQLite pool.
pub struct MilestoneService {
    pool: DbPool,
    gate: PermissionGate,
    started_at: Instant,
}

impl MilestoneService {
    pub fn new(pool: DbPool, gate: PermissionGate) -> Self {
        Self {
            pool,
            gate,
            started_at: Instant::now(),
        }
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Service uptime in seconds.
    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Run `f` in a write transaction that holds the database write lock.
    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        with_connection(&self.pool, move |conn| {
            execute_in_transaction(conn, TransactionBehavior::Immediate, f)
        })
        .await
    }

    /// Run `f` in a read transaction so all its queries see one snapshot.
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        with_connection(&self.pool, move |conn| {
            execute_in_transaction(conn, TransactionBehavior::Deferred, f)
        })
        .await
    }

    // ── Project setup ────────────────────────────────────────────────────

    pub async fn create_milestone(&self, input: NewMilestone) -> Result<Milestone> {
        validate_id("milestone id", &input.id)?;
        validate_figures("baseline", &input.baseline)?;
        validate_figures("forecast", &input.forecast)?;
        validate_figures("actual", &input.actual)?;

        let mut milestone = Milestone::new(input.id, input.name);
        milestone.baseline = input.baseline;
        milestone.forecast = input.forecast;
        milestone.actual = input.actual;

        let created = self
            .write(move |tx| {
                if store::load_milestone(tx, &milestone.id)?.is_some() {
                    return Err(SignoffError::Validation(format!(
                        "milestone {} already exists",
                        milestone.id
                    )));
                }
                store::insert_milestone(tx, &milestone, Utc::now())?;
                Ok(milestone)
            })
            .await?;
        tracing::info!(milestone = %created.id, "milestone created");
        Ok(created)
    }

    /// Insert or replace a deliverable of an existing milestone.
    pub async fn put_deliverable(&self, deliverable: Deliverable) -> Result<Deliverable> {
        validate_id("deliverable id", &deliverable.id)?;
        if deliverable.progress.is_some_and(|p| p > 100) {
            return Err(SignoffError::Validation(
                "deliverable progress must be within 0..=100".to_string(),
            ));
        }

        self.write(move |tx| {
            require_milestone(tx, &deliverable.milestone_id)?;
            store::put_deliverable(tx, &deliverable)?;
            Ok(deliverable)
        })
        .await
    }

    /// Replace the forecast figures. Forecasts stay editable in every state.
    pub async fn update_forecast(
        &self,
        milestone_id: &str,
        forecast: ScheduleFigures,
    ) -> Result<Milestone> {
        validate_figures("forecast", &forecast)?;
        let id = milestone_id.to_string();

        self.write(move |tx| {
            let mut milestone = require_milestone(tx, &id)?;
            milestone.forecast = forecast;
            milestone.version = store::update_milestone(tx, &milestone, Utc::now())?;
            Ok(milestone)
        })
        .await
    }

    /// Replace the baseline figures while the baseline is unlocked.
    ///
    /// Administrators and suppliers may edit; a locked baseline must be reset
    /// first, by anyone. The role check runs before the milestone is read, so
    /// an ineligible role gets `Forbidden` even for an unknown milestone id.
    pub async fn update_baseline(
        &self,
        milestone_id: &str,
        caller: &Caller,
        baseline: ScheduleFigures,
    ) -> Result<Milestone> {
        const OPERATION: &str = "edit baseline fields";
        if !matches!(caller.role, Role::Admin | Role::Supplier) {
            return Err(SignoffError::Forbidden {
                operation: OPERATION,
                role: caller.role,
            });
        }
        validate_figures("baseline", &baseline)?;

        let gate = self.gate;
        let id = milestone_id.to_string();
        let caller = caller.clone();
        self.write(move |tx| {
            let mut milestone = require_milestone(tx, &id)?;
            milestone
                .ensure_baseline_editable()
                .map_err(SignoffError::Conflict)?;
            if !gate.can_edit_baseline_fields(caller.role, &milestone) {
                return Err(SignoffError::Forbidden {
                    operation: OPERATION,
                    role: caller.role,
                });
            }

            let now = Utc::now();
            milestone.baseline = baseline;
            milestone.version = store::update_milestone(tx, &milestone, now)?;
            audit::append(
                tx,
                &AuditEntry {
                    milestone_id: milestone.id.clone(),
                    operation: AuditOperation::BaselineUpdate,
                    actor_id: caller.user_id.clone(),
                    actor_role: caller.role,
                    confirmed: None,
                    detail: None,
                    recorded_at: now,
                },
            )?;
            Ok(milestone)
        })
        .await
        .inspect_err(|e| tracing::warn!(milestone = milestone_id, "baseline edit rejected: {e}"))
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Milestone, deliverable rollup, and certificate from one snapshot.
    pub async fn get_milestone_view(&self, milestone_id: &str) -> Result<MilestoneView> {
        let id = milestone_id.to_string();
        self.read(move |tx| {
            let milestone = require_milestone(tx, &id)?;
            let deliverables = store::load_deliverables(tx, &id)?;
            let certificate = store::load_certificate_for_milestone(tx, &id)?;
            let rollup = Rollup::from_snapshot(&deliverables);
            tracing::debug!(
                milestone = %id,
                status = ?rollup.status,
                progress = rollup.progress,
                "milestone view"
            );
            Ok(MilestoneView::build(&milestone, rollup, certificate.as_ref()))
        })
        .await
    }

    /// Actions the caller may be offered for this milestone.
    pub async fn affordances(&self, milestone_id: &str, role: Role) -> Result<Affordances> {
        let gate = self.gate;
        let id = milestone_id.to_string();
        self.read(move |tx| {
            let milestone = require_milestone(tx, &id)?;
            let deliverables = store::load_deliverables(tx, &id)?;
            let certificate = store::load_certificate_for_milestone(tx, &id)?;
            let status = Rollup::from_snapshot(&deliverables).status;
            Ok(gate.affordances(role, &milestone, status, certificate.as_ref()))
        })
        .await
    }

    pub async fn audit_trail(&self, milestone_id: &str) -> Result<Vec<AuditEntry>> {
        let id = milestone_id.to_string();
        self.read(move |tx| {
            require_milestone(tx, &id)?;
            Ok(audit::list(tx, &id)?)
        })
        .await
    }

    // ── Baseline commitment ──────────────────────────────────────────────

    /// Add `signatory`'s signature to the milestone baseline.
    ///
    /// The counterpart's signature is read inside the write transaction; the
    /// second signature to commit locks the baseline.
    pub async fn sign_baseline(
        &self,
        milestone_id: &str,
        signatory: Signatory,
        caller: &Caller,
    ) -> Result<Milestone> {
        const OPERATION: &str = "sign baseline";
        if !self.gate.holds_signatory(caller.role, signatory) {
            tracing::warn!(
                milestone = milestone_id,
                role = %caller.role,
                %signatory,
                "baseline signature refused"
            );
            return Err(SignoffError::Forbidden {
                operation: OPERATION,
                role: caller.role,
            });
        }

        let gate = self.gate;
        let id = milestone_id.to_string();
        let caller = caller.clone();
        let milestone = self
            .write(move |tx| {
                let mut milestone = require_milestone(tx, &id)?;
                let now = Utc::now();
                let next = milestone
                    .sign(&gate, signatory, &caller, now)
                    .map_err(|e| rejected(OPERATION, caller.role, e))?;

                store::persist_signature(tx, &milestone.id, &milestone, signatory)?;
                milestone.version = store::update_milestone(tx, &milestone, now)?;
                audit::append(
                    tx,
                    &AuditEntry {
                        milestone_id: milestone.id.clone(),
                        operation: AuditOperation::BaselineSign,
                        actor_id: caller.user_id.clone(),
                        actor_role: caller.role,
                        confirmed: None,
                        detail: Some(format!("{signatory} signed; now {next:?}")),
                        recorded_at: now,
                    },
                )?;
                Ok(milestone)
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(milestone = milestone_id, %signatory, "baseline sign rejected: {e}")
            })?;

        tracing::info!(
            milestone = %milestone.id,
            %signatory,
            status = ?milestone.baseline_status(),
            "baseline signed"
        );
        Ok(milestone)
    }

    /// Administrative reset of a locked baseline.
    ///
    /// Clears both signatures and the lock in one transaction. Signers are
    /// not notified. `confirmed` is recorded in the audit trail; an
    /// unconfirmed reset is still carried out.
    pub async fn reset_baseline(
        &self,
        milestone_id: &str,
        caller: &Caller,
        confirmed: bool,
    ) -> Result<Milestone> {
        const OPERATION: &str = "reset baseline";
        if !caller.role.is_admin() {
            tracing::warn!(milestone = milestone_id, role = %caller.role, "baseline reset refused");
            return Err(SignoffError::Forbidden {
                operation: OPERATION,
                role: caller.role,
            });
        }

        let id = milestone_id.to_string();
        let actor = caller.clone();
        let milestone = self
            .write(move |tx| {
                let mut milestone = require_milestone(tx, &id)?;
                milestone
                    .reset_baseline(&actor)
                    .map_err(|e| rejected(OPERATION, actor.role, e))?;

                let now = Utc::now();
                store::delete_baseline_signatures(tx, &milestone.id)?;
                milestone.version = store::update_milestone(tx, &milestone, now)?;
                audit::append(
                    tx,
                    &AuditEntry {
                        milestone_id: milestone.id.clone(),
                        operation: AuditOperation::BaselineReset,
                        actor_id: actor.user_id.clone(),
                        actor_role: actor.role,
                        confirmed: Some(confirmed),
                        detail: None,
                        recorded_at: now,
                    },
                )?;
                Ok(milestone)
            })
            .await
            .inspect_err(|e| tracing::warn!(milestone = milestone_id, "baseline reset rejected: {e}"))?;

        tracing::info!(
            target: "milestone::audit",
            milestone = %milestone.id,
            actor = %caller.user_id,
            confirmed,
            "baseline reset; signatures cleared"
        );
        Ok(milestone)
    }

    // ── Acceptance certificate ───────────────────────────────────────────

    /// Issue the milestone's acceptance certificate in `Draft`.
    ///
    /// The milestone must be `Completed` per the deliverable rollup read in
    /// this transaction, and must not already have a certificate.
    pub async fn generate_certificate(
        &self,
        milestone_id: &str,
        caller: &Caller,
        confirmed: bool,
    ) -> Result<AcceptanceCertificate> {
        const OPERATION: &str = "generate certificate";
        if !self.gate.is_party_or_admin(caller.role) {
            return Err(SignoffError::Forbidden {
                operation: OPERATION,
                role: caller.role,
            });
        }

        let id = milestone_id.to_string();
        let actor = caller.clone();
        let certificate = self
            .write(move |tx| {
                let milestone = require_milestone(tx, &id)?;
                let deliverables = store::load_deliverables(tx, &id)?;
                let existing = store::load_certificate_for_milestone(tx, &id)?;
                let status = Rollup::from_snapshot(&deliverables).status;

                let now = Utc::now();
                let certificate = AcceptanceCertificate::generate(
                    uuid::Uuid::new_v4().to_string(),
                    &milestone,
                    status,
                    existing.as_ref(),
                    &actor,
                    now,
                )
                .map_err(|e| rejected(OPERATION, actor.role, e))?;

                store::insert_certificate(tx, &certificate)?;
                audit::append(
                    tx,
                    &AuditEntry {
                        milestone_id: milestone.id.clone(),
                        operation: AuditOperation::CertificateGenerate,
                        actor_id: actor.user_id.clone(),
                        actor_role: actor.role,
                        confirmed: Some(confirmed),
                        detail: Some(format!(
                            "certificate {} value {}",
                            certificate.id, certificate.value
                        )),
                        recorded_at: now,
                    },
                )?;
                Ok(certificate)
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(milestone = milestone_id, "certificate generation rejected: {e}")
            })?;

        tracing::info!(
            target: "milestone::audit",
            milestone = %certificate.milestone_id,
            certificate = %certificate.id,
            value = %certificate.value,
            actor = %caller.user_id,
            confirmed,
            "acceptance certificate generated"
        );
        Ok(certificate)
    }

    /// Add `signatory`'s signature to a certificate.
    pub async fn sign_certificate(
        &self,
        certificate_id: &str,
        signatory: Signatory,
        caller: &Caller,
    ) -> Result<AcceptanceCertificate> {
        const OPERATION: &str = "sign certificate";
        if !self.gate.holds_signatory(caller.role, signatory) {
            tracing::warn!(
                certificate = certificate_id,
                role = %caller.role,
                %signatory,
                "certificate signature refused"
            );
            return Err(SignoffError::Forbidden {
                operation: OPERATION,
                role: caller.role,
            });
        }

        let gate = self.gate;
        let id = certificate_id.to_string();
        let caller = caller.clone();
        let certificate = self
            .write(move |tx| {
                let mut certificate =
                    store::load_certificate(tx, &id)?.ok_or_else(|| SignoffError::NotFound {
                        entity: "certificate",
                        id: id.clone(),
                    })?;
                let now = Utc::now();
                certificate
                    .sign(&gate, signatory, &caller, now)
                    .map_err(|e| rejected(OPERATION, caller.role, e))?;

                store::persist_signature(tx, &certificate.id, &certificate, signatory)?;
                certificate.version = store::update_certificate(tx, &certificate)?;
                audit::append(
                    tx,
                    &AuditEntry {
                        milestone_id: certificate.milestone_id.clone(),
                        operation: AuditOperation::CertificateSign,
                        actor_id: caller.user_id.clone(),
                        actor_role: caller.role,
                        confirmed: None,
                        detail: Some(format!(
                            "{signatory} signed certificate {}; now {:?}",
                            certificate.id,
                            certificate.status()
                        )),
                        recorded_at: now,
                    },
                )?;
                Ok(certificate)
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(certificate = certificate_id, %signatory, "certificate sign rejected: {e}")
            })?;

        tracing::info!(
            certificate = %certificate.id,
            %signatory,
            status = ?certificate.status(),
            "certificate signed"
        );
        Ok(certificate)
    }
}
