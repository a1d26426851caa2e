#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Sign-off scenarios against a real SQLite file.

use std::sync::Arc;
use std::time::Duration;

use milestone_core::{
    BaselineStatus, Caller, CertificateStatus, Deliverable, DeliverableStatus, MilestoneStatus,
    Money, PermissionGate, Role, ScheduleFigures, Signatory,
};
use milestone_service::audit::AuditOperation;
use milestone_service::db::open_database;
use milestone_service::service::{MilestoneService, NewMilestone};
use pretty_assertions::assert_eq;

fn supplier() -> Caller {
    Caller::new("u-sup", "Sam Supplier", Role::Supplier)
}

fn customer() -> Caller {
    Caller::new("u-cus", "Cas Customer", Role::Customer)
}

fn admin() -> Caller {
    Caller::new("u-adm", "Ada Admin", Role::Admin)
}

fn open(dir: &tempfile::TempDir) -> Arc<MilestoneService> {
    let pool = open_database(&dir.path().join("signoff.db"), 8, Duration::from_secs(5))
        .expect("open database");
    Arc::new(MilestoneService::new(pool, PermissionGate::default()))
}

async fn seed_milestone(svc: &MilestoneService, id: &str) {
    svc.create_milestone(NewMilestone {
        id: id.to_string(),
        name: "Integration phase".to_string(),
        baseline: ScheduleFigures {
            date: chrono::NaiveDate::from_ymd_opt(2026, 6, 30),
            amount: Some(Money::from_minor(500_000)),
        },
        forecast: ScheduleFigures::default(),
        actual: ScheduleFigures::default(),
    })
    .await
    .expect("create milestone");
}

async fn put(svc: &MilestoneService, milestone: &str, id: &str, status: DeliverableStatus, progress: u8) {
    svc.put_deliverable(Deliverable {
        id: id.to_string(),
        milestone_id: milestone.to_string(),
        status: Some(status),
        progress: Some(progress),
    })
    .await
    .expect("put deliverable");
}

async fn lock_baseline(svc: &MilestoneService, id: &str) {
    svc.sign_baseline(id, Signatory::Supplier, &supplier()).await.unwrap();
    svc.sign_baseline(id, Signatory::Customer, &customer()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn certificate_lifecycle_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;
    put(&svc, "m1", "d1", DeliverableStatus::Delivered, 100).await;
    put(&svc, "m1", "d2", DeliverableStatus::Delivered, 100).await;

    let view = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(view.status, MilestoneStatus::Completed);
    assert_eq!(view.progress, 100);

    let cert = svc.generate_certificate("m1", &customer(), true).await.unwrap();
    assert_eq!(cert.status(), CertificateStatus::Draft);
    assert_eq!(cert.value, Money::from_minor(500_000));

    let cert = svc
        .sign_certificate(&cert.id, Signatory::Supplier, &supplier())
        .await
        .unwrap();
    assert_eq!(cert.status(), CertificateStatus::PendingCustomer);

    let cert = svc
        .sign_certificate(&cert.id, Signatory::Customer, &customer())
        .await
        .unwrap();
    assert_eq!(cert.status(), CertificateStatus::Signed);

    let view = svc.get_milestone_view("m1").await.unwrap();
    let shown = view.certificate.expect("certificate in view");
    assert_eq!(shown.status, CertificateStatus::Signed);
    assert_eq!(shown.supplier_signature.map(|s| s.signer_id), Some("u-sup".to_string()));
    assert_eq!(shown.customer_signature.map(|s| s.signer_id), Some("u-cus".to_string()));

    let ops: Vec<_> = svc
        .audit_trail("m1")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert_eq!(
        ops,
        vec![
            AuditOperation::CertificateGenerate,
            AuditOperation::CertificateSign,
            AuditOperation::CertificateSign,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_signatures_both_land_and_lock() {
    for round in 0..10 {
        let dir = tempfile::TempDir::new().unwrap();
        let svc = open(&dir);
        let id = format!("m-{round}");
        seed_milestone(&svc, &id).await;

        let (a, b) = (Arc::clone(&svc), Arc::clone(&svc));
        let (ida, idb) = (id.clone(), id.clone());
        let sup = tokio::spawn(async move {
            a.sign_baseline(&ida, Signatory::Supplier, &supplier()).await
        });
        let cus = tokio::spawn(async move {
            b.sign_baseline(&idb, Signatory::Customer, &customer()).await
        });
        sup.await.unwrap().expect("supplier sign");
        cus.await.unwrap().expect("customer sign");

        let view = svc.get_milestone_view(&id).await.unwrap();
        assert!(view.baseline.locked, "round {round}: baseline must lock");
        assert_eq!(view.baseline.status, BaselineStatus::Locked);
        assert!(view.baseline.supplier_signature.is_some());
        assert!(view.baseline.customer_signature.is_some());
    }
}

async fn completed_milestone(svc: &MilestoneService, id: &str) {
    seed_milestone(svc, id).await;
    put(svc, id, "d1", DeliverableStatus::Delivered, 100).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_certificate_signatures_both_land() {
    for round in 0..10 {
        let dir = tempfile::TempDir::new().unwrap();
        let svc = open(&dir);
        let id = format!("m-{round}");
        completed_milestone(&svc, &id).await;
        let cert = svc.generate_certificate(&id, &admin(), true).await.unwrap();

        let (a, b) = (Arc::clone(&svc), Arc::clone(&svc));
        let (ca, cb) = (cert.id.clone(), cert.id.clone());
        let sup = tokio::spawn(async move {
            a.sign_certificate(&ca, Signatory::Supplier, &supplier()).await
        });
        let cus = tokio::spawn(async move {
            b.sign_certificate(&cb, Signatory::Customer, &customer()).await
        });
        sup.await.unwrap().expect("supplier sign");
        cus.await.unwrap().expect("customer sign");

        let shown = svc
            .get_milestone_view(&id)
            .await
            .unwrap()
            .certificate
            .expect("certificate in view");
        assert_eq!(shown.status, CertificateStatus::Signed, "round {round}");
        assert!(shown.supplier_signature.is_some());
        assert!(shown.customer_signature.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generate_yields_one_certificate() {
    for round in 0..10 {
        let dir = tempfile::TempDir::new().unwrap();
        let svc = open(&dir);
        let id = format!("m-{round}");
        completed_milestone(&svc, &id).await;

        let (a, b) = (Arc::clone(&svc), Arc::clone(&svc));
        let (ida, idb) = (id.clone(), id.clone());
        let first = tokio::spawn(async move { a.generate_certificate(&ida, &supplier(), true).await });
        let second = tokio::spawn(async move { b.generate_certificate(&idb, &customer(), true).await });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let issued: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(issued.len(), 1, "round {round}: exactly one certificate");
        let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].reason_code(), "certificate_exists");

        let shown = svc.get_milestone_view(&id).await.unwrap().certificate;
        assert_eq!(shown.map(|c| c.id), Some(issued[0].id.clone()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn certificate_signing_rejects_unknown_ids_and_wrong_roles() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    completed_milestone(&svc, "m1").await;
    let cert = svc.generate_certificate("m1", &supplier(), true).await.unwrap();

    let err = svc
        .sign_certificate("c-missing", Signatory::Supplier, &supplier())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "not_found");

    let err = svc
        .sign_certificate(&cert.id, Signatory::Customer, &supplier())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "forbidden");

    for who in [Signatory::Supplier, Signatory::Customer] {
        let err = svc.sign_certificate(&cert.id, who, &admin()).await.unwrap_err();
        assert_eq!(err.category(), "forbidden");
    }

    let viewer = Caller::new("u-view", "Vic Viewer", Role::Viewer);
    let err = svc
        .sign_certificate(&cert.id, Signatory::Customer, &viewer)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "forbidden");

    let view = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(view.certificate.map(|c| c.status), Some(CertificateStatus::Draft));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_signature_for_same_slot_conflicts() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;

    svc.sign_baseline("m1", Signatory::Supplier, &supplier()).await.unwrap();
    let err = svc
        .sign_baseline("m1", Signatory::Supplier, &supplier())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "conflict");
    assert_eq!(err.reason_code(), "already_signed");

    let view = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(view.baseline.status, BaselineStatus::AwaitingCustomer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn certificate_requires_completed_milestone_and_is_unique() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;
    put(&svc, "m1", "d1", DeliverableStatus::Delivered, 100).await;
    put(&svc, "m1", "d2", DeliverableStatus::InProgress, 40).await;

    let err = svc.generate_certificate("m1", &supplier(), true).await.unwrap_err();
    assert_eq!(err.reason_code(), "milestone_not_completed");

    put(&svc, "m1", "d2", DeliverableStatus::Delivered, 100).await;
    svc.generate_certificate("m1", &supplier(), true).await.unwrap();

    let err = svc.generate_certificate("m1", &customer(), true).await.unwrap_err();
    assert_eq!(err.category(), "conflict");
    assert_eq!(err.reason_code(), "certificate_exists");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_rules() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;

    let err = svc.reset_baseline("m1", &admin(), true).await.unwrap_err();
    assert_eq!(err.reason_code(), "not_locked");

    lock_baseline(&svc, "m1").await;
    let locked = svc.affordances("m1", Role::Supplier).await.unwrap();
    assert!(!locked.edit_baseline_fields);

    let err = svc.reset_baseline("m1", &supplier(), true).await.unwrap_err();
    assert_eq!(err.category(), "forbidden");

    let reset = svc.reset_baseline("m1", &admin(), false).await.unwrap();
    assert_eq!(reset.baseline_status(), BaselineStatus::NotCommitted);

    let reopened = svc.affordances("m1", Role::Supplier).await.unwrap();
    assert!(reopened.edit_baseline_fields);
    assert_eq!(reopened.sign_baseline, vec![Signatory::Supplier]);

    let trail = svc.audit_trail("m1").await.unwrap();
    let last = trail.last().expect("reset audited");
    assert_eq!(last.operation, AuditOperation::BaselineReset);
    assert_eq!(last.confirmed, Some(false));
    assert_eq!(last.actor_id, "u-adm");

    // Fresh signatures may be collected after the reset.
    lock_baseline(&svc, "m1").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn locked_baseline_rejects_edits_until_reset() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;

    let figures = ScheduleFigures {
        date: None,
        amount: Some(Money::from_minor(750_000)),
    };
    svc.update_baseline("m1", &supplier(), figures.clone()).await.unwrap();

    let err = svc
        .update_baseline("m1", &customer(), figures.clone())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "forbidden");

    lock_baseline(&svc, "m1").await;
    for caller in [supplier(), admin()] {
        let err = svc
            .update_baseline("m1", &caller, figures.clone())
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "baseline_locked");
    }

    let view = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(view.baseline.figures, figures);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn view_is_stable_without_writes() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;
    put(&svc, "m1", "d1", DeliverableStatus::InReview, 50).await;
    put(&svc, "m1", "d2", DeliverableStatus::InProgress, 25).await;
    svc.sign_baseline("m1", Signatory::Customer, &customer()).await.unwrap();

    let first = svc.get_milestone_view("m1").await.unwrap();
    let second = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, MilestoneStatus::InProgress);
    // (50 + 25) / 2 = 37.5, rounded half up.
    assert_eq!(first.progress, 38);
    assert_eq!(first.baseline.status, BaselineStatus::AwaitingSupplier);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn certificate_value_is_a_snapshot() {
    let dir = tempfile::TempDir::new().unwrap();
    let svc = open(&dir);
    seed_milestone(&svc, "m1").await;
    put(&svc, "m1", "d1", DeliverableStatus::Delivered, 100).await;
    svc.update_forecast(
        "m1",
        ScheduleFigures {
            date: None,
            amount: Some(Money::from_minor(620_000)),
        },
    )
    .await
    .unwrap();

    let cert = svc.generate_certificate("m1", &admin(), true).await.unwrap();
    assert_eq!(cert.value, Money::from_minor(620_000));

    svc.update_forecast(
        "m1",
        ScheduleFigures {
            date: None,
            amount: Some(Money::from_minor(999_999)),
        },
    )
    .await
    .unwrap();

    let view = svc.get_milestone_view("m1").await.unwrap();
    assert_eq!(view.certificate.map(|c| c.value), Some(Money::from_minor(620_000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let svc = open(&dir);
        seed_milestone(&svc, "m1").await;
        lock_baseline(&svc, "m1").await;
    }

    let svc = open(&dir);
    let view = svc.get_milestone_view("m1").await.unwrap();
    assert!(view.baseline.locked);
    assert_eq!(
        view.baseline.supplier_signature.map(|s| s.signer_name),
        Some("Sam Supplier".to_string())
    );
}
