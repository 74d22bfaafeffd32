mod common;

use common::*;
use fin_checkout::domain::error::PipelineError;
use fin_checkout::domain::id::ProviderPaymentId;
use fin_checkout::domain::ports::{ContentStore, ContentUser, PaymentSettings};
use fin_checkout::domain::provider::ProviderStatus;
use fin_checkout::domain::transaction::{
    ApprovalStatus, Environment, PaymentStatus, ProvisioningState,
};
use fin_checkout::services::admin::{self, PendingQuery};
use fin_checkout::infra::memory::MemberRecord;
use fin_checkout::services::checkout::CheckoutRequest;
use fin_checkout::services::reconciler::reconcile;
use uuid::Uuid;

async fn paid_guest_membership(h: &Harness, claimed: Option<&str>) -> Uuid {
    let req = CheckoutRequest {
        environment: claimed.map(str::to_string),
        ..guest_contribution("20.00", "new@example.org")
    };
    let resp = h.checkout(req).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    let id = ProviderPaymentId::new(resp.payment_id).unwrap();
    reconcile(&h.pipeline, &id, "webhook").await.unwrap();
    resp.transaction_id
}

// ── Approval gate ──────────────────────────────────────────────────────────

#[tokio::test]
async fn production_without_manual_approval_provisions_immediately() {
    let h = Harness::production();

    let id = paid_guest_membership(&h, None).await;

    let t = h.transaction(id).await;
    assert_eq!(t.approval_status, ApprovalStatus::AutoApproved);
    assert_eq!(t.provisioning, ProvisioningState::Completed);
    assert_eq!(h.membership.accounts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn claiming_production_on_a_development_server_stays_pending() {
    let h = Harness::development();

    let id = paid_guest_membership(&h, Some("production")).await;

    let t = h.transaction(id).await;
    assert_eq!(t.approval_status, ApprovalStatus::Pending);
    assert_eq!(t.environment, Environment::Development);
    assert_eq!(t.payment_status, PaymentStatus::Paid);
    assert_eq!(t.provisioning, ProvisioningState::Awaiting);
    assert!(h.membership.accounts.lock().unwrap().is_empty());
    assert!(h.membership.provisioned.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_approval_setting_holds_back_production_provisioning() {
    let h = Harness::production();
    h.content
        .update_payment_settings(PaymentSettings {
            manual_approval: true,
        })
        .await
        .unwrap();

    let id = paid_guest_membership(&h, None).await;

    assert_eq!(h.transaction(id).await.approval_status, ApprovalStatus::Pending);
    assert!(h.membership.accounts.lock().unwrap().is_empty());
}

// ── Admin actions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_routes_need_a_linked_identity() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    h.content.add_user(MemberRecord {
        user: ContentUser {
            id: "2".into(),
            email: Some("plain@example.org".into()),
            identity_id: None,
        },
        bearer: Some("plain-token".into()),
        ..Default::default()
    });

    assert!(matches!(
        admin::authenticate(&h.pipeline, None).await.unwrap_err(),
        PipelineError::Unauthorized(_)
    ));
    assert!(matches!(
        admin::authenticate(&h.pipeline, Some("bogus")).await.unwrap_err(),
        PipelineError::Unauthorized(_)
    ));
    assert!(matches!(
        admin::authenticate(&h.pipeline, Some("plain-token")).await.unwrap_err(),
        PipelineError::Forbidden(_)
    ));
    assert_eq!(
        admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap().user_id,
        "1"
    );
}

#[tokio::test]
async fn approving_runs_the_full_new_member_provisioning() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let id = paid_guest_membership(&h, None).await;
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    let resp = admin::approve(&h.pipeline, &admin, id).await.unwrap();

    assert_eq!(resp.transaction_id, id);
    assert_eq!(resp.approval_status, ApprovalStatus::Approved);

    let t = h.transaction(id).await;
    assert_eq!(t.decided_by.as_deref(), Some("admin:1"));
    assert!(t.decided_at.is_some());
    assert_eq!(t.provisioning, ProvisioningState::Completed);
    assert_eq!(t.identity_id.as_deref(), Some("identity-1"));

    let record_id = t.account_record_id.clone().unwrap();
    assert_eq!(t.user_id.as_deref(), Some(record_id.as_str()));
    let member = h
        .content
        .users()
        .into_iter()
        .find(|u| u.user.id == record_id)
        .unwrap();
    assert_eq!(member.user.identity_id.as_deref(), Some("identity-1"));
    assert!(member.membership_expires_at.is_some());

    let stages: Vec<_> = h
        .store
        .audit_for(id)
        .into_iter()
        .filter(|a| a.action == "provisioning_advanced")
        .map(|a| a.detail["stage"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(stages, ["account_created", "identity_created", "completed"]);

    h.drain_outbox().await;
    assert_eq!(*h.directory.synced.lock().unwrap(), vec!["identity-1".to_string()]);
    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "new@example.org");
    assert!(sent[0].html.contains("Temp-1234"));
}

#[tokio::test]
async fn approval_is_one_shot() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let id = paid_guest_membership(&h, None).await;
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    admin::approve(&h.pipeline, &admin, id).await.unwrap();
    let again = admin::approve(&h.pipeline, &admin, id).await.unwrap_err();
    let reject = admin::reject(&h.pipeline, &admin, id).await.unwrap_err();

    assert!(matches!(again, PipelineError::InvalidState(_)));
    assert!(matches!(reject, PipelineError::InvalidState(_)));
    assert_eq!(h.membership.accounts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unpaid_transactions_cannot_be_approved() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let resp = h.checkout(guest_contribution("20.00", "new@example.org")).await.unwrap();
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    let err = admin::approve(&h.pipeline, &admin, resp.transaction_id).await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidState(_)));
    assert_eq!(
        h.transaction(resp.transaction_id).await.approval_status,
        ApprovalStatus::Pending
    );
}

#[tokio::test]
async fn rejecting_never_provisions() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let id = paid_guest_membership(&h, None).await;
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    let resp = admin::reject(&h.pipeline, &admin, id).await.unwrap();

    assert_eq!(resp.approval_status, ApprovalStatus::Rejected);
    assert!(h.membership.accounts.lock().unwrap().is_empty());
    assert_eq!(h.transaction(id).await.provisioning, ProvisioningState::Awaiting);
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    let err = admin::approve(&h.pipeline, &admin, Uuid::now_v7()).await.unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn pending_list_filters_by_status_and_type() {
    let h = Harness::development();
    let membership = paid_guest_membership(&h, None).await;
    let donation = h.checkout(request("5.00", "Donation")).await.unwrap().transaction_id;

    let pending = admin::list_pending(&h.pipeline, PendingQuery::default()).await.unwrap();
    assert_eq!(pending.len(), 2);

    let memberships = admin::list_pending(
        &h.pipeline,
        PendingQuery {
            product_type: Some("membership_new".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(memberships.iter().map(|t| t.id).collect::<Vec<_>>(), vec![membership]);

    let approved = admin::list_pending(
        &h.pipeline,
        PendingQuery {
            approval_status: Some("approved".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(approved.is_empty());
    assert!(pending.iter().any(|t| t.id == donation));

    let bad = admin::list_pending(
        &h.pipeline,
        PendingQuery {
            approval_status: Some("maybe".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(bad, PipelineError::Validation(_)));
}

#[tokio::test]
async fn settings_round_trip_through_the_content_store() {
    let h = Harness::development();
    h.add_admin("1", "admin-token");
    let admin = admin::authenticate(&h.pipeline, Some("admin-token")).await.unwrap();

    assert!(!admin::settings(&h.pipeline).await.unwrap().manual_approval);
    admin::update_settings(
        &h.pipeline,
        &admin,
        PaymentSettings {
            manual_approval: true,
        },
    )
    .await
    .unwrap();
    assert!(admin::settings(&h.pipeline).await.unwrap().manual_approval);
}
