//! Derived milestone status and progress.
//!
//! Both values are computed on read from one deliverable snapshot and are
//! never stored. Use [`Rollup::from_snapshot`] so status and progress can't
//! be computed from different reads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Deliverable, DeliverableStatus};

/// Aggregate status of a milestone's deliverables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Derive the aggregate status.
///
/// "All delivered" is checked before "all not started", and an empty
/// collection is `NotStarted`, so a milestone without deliverables is never
/// `Completed`.
pub fn derive_milestone_status(deliverables: &[Deliverable]) -> MilestoneStatus {
    if deliverables.is_empty() {
        return MilestoneStatus::NotStarted;
    }

    if deliverables
        .iter()
        .all(|d| d.status == Some(DeliverableStatus::Delivered))
    {
        return MilestoneStatus::Completed;
    }

    if deliverables
        .iter()
        .all(|d| matches!(d.status, None | Some(DeliverableStatus::NotStarted)))
    {
        return MilestoneStatus::NotStarted;
    }

    MilestoneStatus::InProgress
}

/// Mean deliverable progress, rounded half-up. Missing progress counts as 0.
pub fn derive_milestone_progress(deliverables: &[Deliverable]) -> u8 {
    if deliverables.is_empty() {
        return 0;
    }

    let count = deliverables.len() as u64;
    let sum: u64 = deliverables
        .iter()
        .map(|d| u64::from(d.progress.unwrap_or(0).min(100)))
        .sum();

    // round(sum / count) with halves rounding up, in integer arithmetic.
    let rounded = (2 * sum + count) / (2 * count);
    u8::try_from(rounded).unwrap_or(100)
}

/// Status and progress computed from the same snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Rollup {
    pub status: MilestoneStatus,
    pub progress: u8,
    pub deliverable_count: usize,
}

impl Rollup {
    pub fn from_snapshot(deliverables: &[Deliverable]) -> Self {
        Self {
            status: derive_milestone_status(deliverables),
            progress: derive_milestone_progress(deliverables),
            deliverable_count: deliverables.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn deliverable(status: Option<DeliverableStatus>, progress: Option<u8>) -> Deliverable {
        Deliverable {
            id: "d".to_string(),
            milestone_id: "m".to_string(),
            status,
            progress,
        }
    }

    #[test]
    fn empty_snapshot_is_not_started_at_zero() {
        let rollup = Rollup::from_snapshot(&[]);
        assert_eq!(rollup.status, MilestoneStatus::NotStarted);
        assert_eq!(rollup.progress, 0);
        assert_eq!(rollup.deliverable_count, 0);
    }

    #[test]
    fn unset_and_not_started_mix_is_not_started() {
        let ds = vec![
            deliverable(None, None),
            deliverable(Some(DeliverableStatus::NotStarted), Some(0)),
        ];
        assert_eq!(derive_milestone_status(&ds), MilestoneStatus::NotStarted);
    }

    #[test]
    fn partial_delivery_is_in_progress() {
        let ds = vec![
            deliverable(Some(DeliverableStatus::Delivered), Some(100)),
            deliverable(Some(DeliverableStatus::NotStarted), None),
        ];
        assert_eq!(derive_milestone_status(&ds), MilestoneStatus::InProgress);

        let ds = vec![deliverable(Some(DeliverableStatus::InReview), Some(90))];
        assert_eq!(derive_milestone_status(&ds), MilestoneStatus::InProgress);
    }

    #[test]
    fn progress_rounds_half_up() {
        let ds = vec![
            deliverable(None, Some(100)),
            deliverable(None, Some(50)),
            deliverable(None, Some(50)),
        ];
        assert_eq!(derive_milestone_progress(&ds), 67);

        let ds = vec![deliverable(None, Some(1)), deliverable(None, Some(0))];
        assert_eq!(derive_milestone_progress(&ds), 1);

        let ds = vec![deliverable(None, Some(33)), deliverable(None, None)];
        assert_eq!(derive_milestone_progress(&ds), 17);
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let ds = vec![deliverable(None, Some(250)), deliverable(None, Some(100))];
        assert_eq!(derive_milestone_progress(&ds), 100);
    }

    proptest! {
        #[test]
        fn all_delivered_is_completed(n in 1usize..40, progress in proptest::option::of(0u8..=100)) {
            let ds: Vec<_> = (0..n)
                .map(|_| deliverable(Some(DeliverableStatus::Delivered), progress))
                .collect();
            prop_assert_eq!(derive_milestone_status(&ds), MilestoneStatus::Completed);
        }

        #[test]
        fn progress_is_rounded_mean(values in proptest::collection::vec(0u8..=100, 1..50)) {
            let ds: Vec<_> = values.iter().map(|p| deliverable(None, Some(*p))).collect();
            let mean = values.iter().map(|p| f64::from(*p)).sum::<f64>() / values.len() as f64;
            let expected = (mean + 0.5).floor() as u8;
            prop_assert_eq!(derive_milestone_progress(&ds), expected);
        }

        #[test]
        fn rollup_is_deterministic(values in proptest::collection::vec(proptest::option::of(0u8..=100), 0..20)) {
            let ds: Vec<_> = values
                .iter()
                .map(|p| deliverable(Some(DeliverableStatus::InProgress), *p))
                .collect();
            prop_assert_eq!(Rollup::from_snapshot(&ds), Rollup::from_snapshot(&ds));
        }
    }
}
