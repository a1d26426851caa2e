//! Two-party sign-off state machine.
//!
//! The baseline commitment and the acceptance certificate share one shape:
//!
//! ```text
//! Unsigned ──sign(A)──▶ Awaiting(B) ──sign(B)──▶ Complete
//!    │                                              │
//!    └──sign(B)──▶ Awaiting(A) ──sign(A)────────────┘
//!
//! Complete ──reset (baseline only, admin)──▶ Unsigned
//! ```
//!
//! Transitions are evaluated against whatever state the caller hands in.
//! The service must hand in state read inside the same transaction that
//! persists the result; deciding from a stale read loses the final
//! transition when both parties sign at once.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{
    AcceptanceCertificate, Caller, Milestone, Role, Signatory, Signature,
};
use crate::permissions::PermissionGate;
use crate::rollup::MilestoneStatus;

/// Which of the two fixed approval workflows a transition belongs to.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalKind {
    Baseline,
    Certificate,
}

/// Position in the sign-off lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "role")]
pub enum ApprovalState {
    Unsigned,
    Awaiting(Signatory),
    Complete,
}

/// Rejected transition. Each variant carries a stable reason code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("role {role} cannot sign as {signatory}")]
    RoleMismatch { role: Role, signatory: Signatory },

    #[error("{kind} already signed by {signatory}")]
    AlreadySigned {
        kind: ApprovalKind,
        signatory: Signatory,
    },

    #[error("{kind} is already fully signed")]
    AlreadyComplete { kind: ApprovalKind },

    #[error("only an administrator may reset a baseline (caller role: {role})")]
    AdminRequired { role: Role },

    #[error("baseline is not locked")]
    NotLocked,

    #[error("baseline is locked; baseline fields are frozen")]
    BaselineLocked,

    #[error("milestone is {status:?}, certificate requires completed")]
    MilestoneNotCompleted { status: MilestoneStatus },

    #[error("certificate {certificate_id} already exists for this milestone")]
    CertificateExists { certificate_id: String },
}

impl TransitionError {
    /// Stable machine-readable reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TransitionError::RoleMismatch { .. } => "role_mismatch",
            TransitionError::AlreadySigned { .. } => "already_signed",
            TransitionError::AlreadyComplete { .. } => "already_complete",
            TransitionError::AdminRequired { .. } => "admin_required",
            TransitionError::NotLocked => "not_locked",
            TransitionError::BaselineLocked => "baseline_locked",
            TransitionError::MilestoneNotCompleted { .. } => "milestone_not_completed",
            TransitionError::CertificateExists { .. } => "certificate_exists",
        }
    }

    /// Whether the rejection is about who the caller is rather than the
    /// record's state.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            TransitionError::RoleMismatch { .. } | TransitionError::AdminRequired { .. }
        )
    }
}

/// The two signature slots of one approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DualSignoff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    supplier: Option<Signature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    customer: Option<Signature>,
}

impl DualSignoff {
    /// Rebuild from persisted slots.
    pub fn from_parts(supplier: Option<Signature>, customer: Option<Signature>) -> Self {
        Self { supplier, customer }
    }

    pub fn signature(&self, signatory: Signatory) -> Option<&Signature> {
        match signatory {
            Signatory::Supplier => self.supplier.as_ref(),
            Signatory::Customer => self.customer.as_ref(),
        }
    }

    pub fn has_signed(&self, signatory: Signatory) -> bool {
        self.signature(signatory).is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.supplier.is_some() && self.customer.is_some()
    }

    pub fn state(&self) -> ApprovalState {
        match (&self.supplier, &self.customer) {
            (None, None) => ApprovalState::Unsigned,
            (Some(_), None) => ApprovalState::Awaiting(Signatory::Customer),
            (None, Some(_)) => ApprovalState::Awaiting(Signatory::Supplier),
            (Some(_), Some(_)) => ApprovalState::Complete,
        }
    }

    fn slot_mut(&mut self, signatory: Signatory) -> &mut Option<Signature> {
        match signatory {
            Signatory::Supplier => &mut self.supplier,
            Signatory::Customer => &mut self.customer,
        }
    }

    /// Record `signatory`'s signature and return the resulting state.
    fn record(
        &mut self,
        kind: ApprovalKind,
        signatory: Signatory,
        signer: &Caller,
        at: DateTime<Utc>,
    ) -> Result<ApprovalState, TransitionError> {
        if self.is_complete() {
            return Err(TransitionError::AlreadyComplete { kind });
        }
        let slot = self.slot_mut(signatory);
        if slot.is_some() {
            return Err(TransitionError::AlreadySigned { kind, signatory });
        }
        *slot = Some(Signature {
            role: signatory,
            signer_id: signer.user_id.clone(),
            signer_name: signer.user_name.clone(),
            signed_at: at,
        });
        Ok(self.state())
    }

    fn clear(&mut self) {
        self.supplier = None;
        self.customer = None;
    }
}

/// An entity carrying a two-party sign-off.
pub trait Approval {
    const KIND: ApprovalKind;

    fn signoff(&self) -> &DualSignoff;

    fn signoff_mut(&mut self) -> &mut DualSignoff;

    fn approval_state(&self) -> ApprovalState {
        self.signoff().state()
    }

    /// Apply `sign(signatory)` for `caller`.
    ///
    /// The caller must hold the signatory role under `gate`. A second
    /// signature for the same slot is an error, never a silent no-op.
    fn sign(
        &mut self,
        gate: &PermissionGate,
        signatory: Signatory,
        caller: &Caller,
        at: DateTime<Utc>,
    ) -> Result<ApprovalState, TransitionError> {
        if !gate.holds_signatory(caller.role, signatory) {
            return Err(TransitionError::RoleMismatch {
                role: caller.role,
                signatory,
            });
        }
        self.signoff_mut().record(Self::KIND, signatory, caller, at)
    }
}

impl Approval for Milestone {
    const KIND: ApprovalKind = ApprovalKind::Baseline;

    fn signoff(&self) -> &DualSignoff {
        &self.baseline_signoff
    }

    fn signoff_mut(&mut self) -> &mut DualSignoff {
        &mut self.baseline_signoff
    }
}

impl Approval for AcceptanceCertificate {
    const KIND: ApprovalKind = ApprovalKind::Certificate;

    fn signoff(&self) -> &DualSignoff {
        &self.signoff
    }

    fn signoff_mut(&mut self) -> &mut DualSignoff {
        &mut self.signoff
    }
}

impl Milestone {
    /// Administrative reset of a locked baseline.
    ///
    /// Clears both signatures (and with them the lock) in one step. Prior
    /// signers are not notified.
    pub fn reset_baseline(&mut self, caller: &Caller) -> Result<(), TransitionError> {
        if !caller.role.is_admin() {
            return Err(TransitionError::AdminRequired { role: caller.role });
        }
        if !self.baseline_locked() {
            return Err(TransitionError::NotLocked);
        }
        self.baseline_signoff.clear();
        Ok(())
    }

    /// Guard for edits to the committed baseline figures.
    pub fn ensure_baseline_editable(&self) -> Result<(), TransitionError> {
        if self.baseline_locked() {
            return Err(TransitionError::BaselineLocked);
        }
        Ok(())
    }
}

impl AcceptanceCertificate {
    /// Issue a draft certificate for `milestone`.
    ///
    /// Requires the milestone's derived status to be `Completed` and no
    /// certificate to exist yet. The value is a snapshot of the milestone's
    /// billable amount; later forecast edits do not change it.
    pub fn generate(
        id: String,
        milestone: &Milestone,
        status: MilestoneStatus,
        existing: Option<&AcceptanceCertificate>,
        caller: &Caller,
        at: DateTime<Utc>,
    ) -> Result<AcceptanceCertificate, TransitionError> {
        if let Some(existing) = existing {
            return Err(TransitionError::CertificateExists {
                certificate_id: existing.id.clone(),
            });
        }
        if status != MilestoneStatus::Completed {
            return Err(TransitionError::MilestoneNotCompleted { status });
        }
        Ok(AcceptanceCertificate {
            id,
            milestone_id: milestone.id.clone(),
            value: milestone.billable_amount(),
            signoff: DualSignoff::default(),
            generated_at: at,
            generated_by: caller.user_id.clone(),
            version: 0,
        })
    }
}
