//! Domain types for milestone sign-off.
//!
//! Status families are closed enums; comparisons against free-form strings
//! never happen outside the serde boundary.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::approval::{ApprovalState, DualSignoff};

// ─────────────────────────────────────────────────────────────────────────────
// Roles and identity
// ─────────────────────────────────────────────────────────────────────────────

/// Caller role as reported by the identity provider.
///
/// Only `Supplier` and `Customer` map to a signatory slot. `Admin` may reset a
/// locked baseline but does not hold a signatory role.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin,
    Supplier,
    Customer,
    Contributor,
    Viewer,
}

impl Role {
    /// Signatory slot this role signs in, if any.
    pub fn signatory(self) -> Option<Signatory> {
        match self {
            Role::Supplier => Some(Signatory::Supplier),
            Role::Customer => Some(Signatory::Customer),
            Role::Admin | Role::Contributor | Role::Viewer => None,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

/// One of the two parties whose signatures are collected.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Signatory {
    Supplier,
    Customer,
}

impl Signatory {
    pub const BOTH: [Signatory; 2] = [Signatory::Supplier, Signatory::Customer];

    /// The counterpart whose signature completes the approval.
    pub fn other(self) -> Signatory {
        match self {
            Signatory::Supplier => Signatory::Customer,
            Signatory::Customer => Signatory::Supplier,
        }
    }

    pub fn as_role(self) -> Role {
        match self {
            Signatory::Supplier => Role::Supplier,
            Signatory::Customer => Role::Customer,
        }
    }
}

/// Identity of the current caller, passed explicitly into every operation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
        }
    }
}

/// Persisted signature record. Append-only once written; only a baseline
/// reset removes it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Signature {
    pub role: Signatory,
    pub signer_id: String,
    pub signer_name: String,
    pub signed_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Money and schedule figures
// ─────────────────────────────────────────────────────────────────────────────

/// Monetary amount in minor units (cents).
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// One leg of the baseline / forecast / actual triple.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScheduleFigures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Deliverables
// ─────────────────────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliverableStatus {
    NotStarted,
    InProgress,
    InReview,
    Delivered,
}

/// Child work item of a milestone. Read-only input to the rollup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Deliverable {
    pub id: String,
    pub milestone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliverableStatus>,
    /// Percent complete, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Milestone
// ─────────────────────────────────────────────────────────────────────────────

/// Baseline commitment status, derived from the two signature slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    NotCommitted,
    AwaitingSupplier,
    AwaitingCustomer,
    Locked,
}

impl From<ApprovalState> for BaselineStatus {
    fn from(state: ApprovalState) -> Self {
        match state {
            ApprovalState::Unsigned => BaselineStatus::NotCommitted,
            ApprovalState::Awaiting(Signatory::Supplier) => BaselineStatus::AwaitingSupplier,
            ApprovalState::Awaiting(Signatory::Customer) => BaselineStatus::AwaitingCustomer,
            ApprovalState::Complete => BaselineStatus::Locked,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    /// Contractually committed figures. Frozen while the baseline is locked.
    pub baseline: ScheduleFigures,
    /// Current working estimate; always editable.
    pub forecast: ScheduleFigures,
    pub actual: ScheduleFigures,
    pub baseline_signoff: DualSignoff,
    /// Optimistic-concurrency token, bumped on every persisted write.
    pub version: i64,
}

impl Milestone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            baseline: ScheduleFigures::default(),
            forecast: ScheduleFigures::default(),
            actual: ScheduleFigures::default(),
            baseline_signoff: DualSignoff::default(),
            version: 0,
        }
    }

    /// True iff both parties have signed the baseline.
    pub fn baseline_locked(&self) -> bool {
        self.baseline_signoff.is_complete()
    }

    pub fn baseline_status(&self) -> BaselineStatus {
        self.baseline_signoff.state().into()
    }

    /// Amount snapshotted into an acceptance certificate: the forecast when
    /// one exists, otherwise the baseline.
    pub fn billable_amount(&self) -> Money {
        self.forecast
            .amount
            .or(self.baseline.amount)
            .unwrap_or(Money::ZERO)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Acceptance certificate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CertificateStatus {
    Draft,
    PendingSupplier,
    PendingCustomer,
    Signed,
}

impl From<ApprovalState> for CertificateStatus {
    fn from(state: ApprovalState) -> Self {
        match state {
            ApprovalState::Unsigned => CertificateStatus::Draft,
            ApprovalState::Awaiting(Signatory::Supplier) => CertificateStatus::PendingSupplier,
            ApprovalState::Awaiting(Signatory::Customer) => CertificateStatus::PendingCustomer,
            ApprovalState::Complete => CertificateStatus::Signed,
        }
    }
}

/// Billing-eligible record issued once a milestone is fully delivered.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AcceptanceCertificate {
    pub id: String,
    pub milestone_id: String,
    /// Snapshot of the milestone's billable amount at generation time.
    pub value: Money,
    pub signoff: DualSignoff,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    pub version: i64,
}

impl AcceptanceCertificate {
    pub fn status(&self) -> CertificateStatus {
        self.signoff.state().into()
    }
}
