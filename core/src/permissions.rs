//! Permission gate: role × record state → allowed operation.
//!
//! The service consults this gate on every mutating call. Presentation
//! clients may use [`Affordances`] to decide which actions to show, but that
//! is advisory; the service re-checks.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{AcceptanceCertificate, Milestone, Role, Signatory};
use crate::rollup::MilestoneStatus;

/// Pure permission rules.
///
/// `admin_signs_for_parties` widens "holds the signatory role" to include
/// administrators. It is off by default: an administrator's override covers
/// the baseline reset, not signing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGate {
    admin_signs_for_parties: bool,
}

impl PermissionGate {
    pub fn new(admin_signs_for_parties: bool) -> Self {
        Self {
            admin_signs_for_parties,
        }
    }

    pub fn admin_signs_for_parties(&self) -> bool {
        self.admin_signs_for_parties
    }

    /// Whether `role` may put a signature in `signatory`'s slot at all.
    pub fn holds_signatory(&self, role: Role, signatory: Signatory) -> bool {
        role.signatory() == Some(signatory) || (self.admin_signs_for_parties && role.is_admin())
    }

    /// Roles that take part in certificate issuance.
    pub fn is_party_or_admin(&self, role: Role) -> bool {
        matches!(role, Role::Admin | Role::Supplier | Role::Customer)
    }

    pub fn can_edit_baseline_fields(&self, role: Role, milestone: &Milestone) -> bool {
        role.is_admin() || (role == Role::Supplier && !milestone.baseline_locked())
    }

    pub fn can_sign_baseline(&self, role: Role, signatory: Signatory, milestone: &Milestone) -> bool {
        self.holds_signatory(role, signatory)
            && !milestone.baseline_signoff.has_signed(signatory)
            && !milestone.baseline_locked()
    }

    pub fn can_reset_baseline(&self, role: Role, milestone: &Milestone) -> bool {
        role.is_admin() && milestone.baseline_locked()
    }

    pub fn can_generate_certificate(
        &self,
        role: Role,
        status: MilestoneStatus,
        existing: Option<&AcceptanceCertificate>,
    ) -> bool {
        self.is_party_or_admin(role) && status == MilestoneStatus::Completed && existing.is_none()
    }

    pub fn can_sign_certificate(
        &self,
        role: Role,
        signatory: Signatory,
        certificate: &AcceptanceCertificate,
    ) -> bool {
        self.holds_signatory(role, signatory) && !certificate.signoff.has_signed(signatory)
    }

    /// Evaluate every rule for one caller against one milestone snapshot.
    pub fn affordances(
        &self,
        role: Role,
        milestone: &Milestone,
        status: MilestoneStatus,
        certificate: Option<&AcceptanceCertificate>,
    ) -> Affordances {
        let sign_baseline = Signatory::BOTH
            .into_iter()
            .filter(|who| self.can_sign_baseline(role, *who, milestone))
            .collect();
        let sign_certificate = certificate
            .map(|cert| {
                Signatory::BOTH
                    .into_iter()
                    .filter(|who| self.can_sign_certificate(role, *who, cert))
                    .collect()
            })
            .unwrap_or_default();

        Affordances {
            edit_baseline_fields: self.can_edit_baseline_fields(role, milestone),
            sign_baseline,
            reset_baseline: self.can_reset_baseline(role, milestone),
            generate_certificate: self.can_generate_certificate(role, status, certificate),
            sign_certificate,
        }
    }
}

/// Actions a presentation client may offer to the current caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Affordances {
    pub edit_baseline_fields: bool,
    /// Slots the caller may sign on the baseline.
    pub sign_baseline: Vec<Signatory>,
    pub reset_baseline: bool,
    pub generate_certificate: bool,
    /// Slots the caller may sign on the certificate, empty when none exists.
    pub sign_certificate: Vec<Signatory>,
}
