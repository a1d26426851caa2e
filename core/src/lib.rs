//! `milestone-core` — milestone commitment and acceptance sign-off.
//!
//! Pure domain layer shared by the service and any presentation client:
//! - [`model`]: milestones, deliverables, certificates, roles, signatures
//! - [`rollup`]: derived milestone status/progress from deliverables
//! - [`approval`]: the two-party sign-off state machine (baseline + certificate)
//! - [`permissions`]: role × state → allowed operation
//!
//! Nothing here performs I/O. Callers load state, run the transition, and
//! persist the result atomically.

pub mod approval;
pub mod model;
pub mod permissions;
pub mod rollup;

pub use approval::{Approval, ApprovalKind, ApprovalState, DualSignoff, TransitionError};
pub use model::{
    AcceptanceCertificate, BaselineStatus, Caller, CertificateStatus, Deliverable,
    DeliverableStatus, Milestone, Money, Role, ScheduleFigures, Signatory, Signature,
};
pub use permissions::{Affordances, PermissionGate};
pub use rollup::{MilestoneStatus, Rollup, derive_milestone_progress, derive_milestone_status};
