mod common;

use common::*;
use fin_checkout::domain::id::ProviderPaymentId;
use fin_checkout::domain::outbox::{JobPayload, JobStatus};
use fin_checkout::domain::pricing::TripQuote;
use fin_checkout::domain::provider::ProviderStatus;
use fin_checkout::domain::ticket::Participant;
use fin_checkout::domain::transaction::{
    PaymentStatus, ProvisioningState, RegistrationKind, RegistrationRef, TransitionOutcome,
};
use fin_checkout::infra::memory::Registration;
use fin_checkout::services::checkout::CheckoutRequest;
use fin_checkout::services::reconciler::{ReconcileOutcome, handle_notification, reconcile};
use std::sync::atomic::Ordering;

fn pid(raw: &str) -> ProviderPaymentId {
    ProviderPaymentId::new(raw).unwrap()
}

fn seed_pub_crawl(h: &Harness, id: &str, names: &[&str]) -> RegistrationRef {
    let registration = RegistrationRef::new(RegistrationKind::PubCrawlSignup, id).unwrap();
    h.content.add_registration(
        registration.clone(),
        Registration {
            listed_price: Some(money("7.50")),
            participants: names
                .iter()
                .map(|n| Participant {
                    name: n.to_string(),
                    initial: n[..1].to_string(),
                })
                .collect(),
            ..Default::default()
        },
    );
    registration
}

#[tokio::test]
async fn same_notification_twice_transitions_once_and_issues_tickets_once() {
    let h = Harness::production();
    let registration = seed_pub_crawl(&h, "44", &["Anna", "Bram"]);
    let resp = h.checkout(signup("pub_crawl_signup", "44", "15.00")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    let first = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();
    let second = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(first, ReconcileOutcome::Applied(PaymentStatus::Paid));
    assert_eq!(second, ReconcileOutcome::AlreadyInState(PaymentStatus::Paid));

    let tickets = h.content.all_tickets();
    assert_eq!(tickets.len(), 2);
    assert_eq!(
        h.content.registration(&registration).unwrap().payment_status.as_deref(),
        Some("paid")
    );

    let t = h.transaction(resp.transaction_id).await;
    assert!(t.paid_at.is_some());
    let transitions = h
        .store
        .audit_for(t.id)
        .into_iter()
        .filter(|a| a.action == "status_changed")
        .count();
    assert_eq!(transitions, 1);

    let ticket_mail = format!("notify:{}:tickets", t.id);
    assert_eq!(h.job_keys().iter().filter(|k| **k == ticket_mail).count(), 1);

    h.drain_outbox().await;
    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains(&tickets[0].qr_token));
}

#[tokio::test]
async fn renewal_is_provisioned_exactly_once_across_redeliveries() {
    let h = Harness::production();
    h.add_member("12", "member@example.org", false);
    let resp = h.checkout(member_contribution("20.00", "12")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    for _ in 0..3 {
        reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();
    }

    assert_eq!(*h.membership.provisioned.lock().unwrap(), vec!["12".to_string()]);
    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.provisioning, ProvisioningState::Completed);
    let member = h.content.users().into_iter().find(|u| u.user.id == "12").unwrap();
    assert!(member.membership_expires_at.is_some());

    h.drain_outbox().await;
    assert_eq!(*h.directory.synced.lock().unwrap(), vec!["12".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_notifications_run_side_effects_once() {
    let h = Harness::production();
    seed_pub_crawl(&h, "45", &["Anna", "Bram", "Cor"]);
    let resp = h.checkout(signup("pub_crawl_signup", "45", "22.50")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = h.pipeline.clone();
        let id = pid(&resp.payment_id);
        handles.push(tokio::spawn(async move {
            reconcile(&pipeline, &id, "webhook").await.unwrap()
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if let ReconcileOutcome::Applied(_) = handle.await.unwrap() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(h.content.all_tickets().len(), 3);
}

#[tokio::test]
async fn late_contradicting_status_is_ignored() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    h.provider.settle(&resp.payment_id, ProviderStatus::Expired);
    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Rejected {
            current: PaymentStatus::Paid,
            attempted: PaymentStatus::Expired,
        }
    );
    assert_eq!(h.transaction(resp.transaction_id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unsettled_payment_changes_nothing() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();

    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::NotSettled);
    assert_eq!(h.transaction(resp.transaction_id).await.payment_status, PaymentStatus::Open);
}

#[tokio::test]
async fn failed_payment_runs_no_side_effects() {
    let h = Harness::production();
    seed_pub_crawl(&h, "46", &["Anna"]);
    let resp = h.checkout(signup("pub_crawl_signup", "46", "7.50")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Canceled);

    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Canceled));
    assert!(h.content.all_tickets().is_empty());
    assert!(h.store.jobs().is_empty());
}

#[tokio::test]
async fn transient_fetch_failures_are_retried_inline() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    h.provider.transient_failures.store(2, Ordering::SeqCst);

    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Paid));
    assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_inline_reconciliation_is_queued_and_replayed() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    h.provider.transient_failures.store(10, Ordering::SeqCst);

    let status = handle_notification(&h.pipeline, &pid(&resp.payment_id), "evt_1").await;
    assert_eq!(status, "queued");
    assert_eq!(h.transaction(resp.transaction_id).await.payment_status, PaymentStatus::Open);

    let jobs = h.store.jobs();
    assert_eq!(jobs.len(), 1);
    assert!(matches!(&jobs[0].job.payload, JobPayload::Reconcile { provider_id } if *provider_id == resp.payment_id));

    h.provider.transient_failures.store(0, Ordering::SeqCst);
    h.drain_outbox().await;
    assert_eq!(h.transaction(resp.transaction_id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unknown_payment_is_reported_not_invented() {
    let h = Harness::production();

    let status = handle_notification(&h.pipeline, &pid("cs_test_missing"), "evt_2").await;

    assert_eq!(status, "queued");
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn event_confirmation_carries_the_signup_code() {
    let h = Harness::production();
    let registration = RegistrationRef::new(RegistrationKind::EventSignup, "8").unwrap();
    h.content.add_registration(
        registration,
        Registration {
            contact: fin_checkout::domain::ports::RegistrationContact {
                email: Some("guest@example.org".into()),
                participant_name: Some("Guus".into()),
                qr_token: Some("r-8-abc".into()),
            },
            listed_price: Some(money("10.00")),
            ..Default::default()
        },
    );
    let resp = h.checkout(signup("event_signup", "8", "10.00")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    h.drain_outbox().await;

    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "guest@example.org");
    assert!(sent[0].html.contains("r-8-abc"));
    assert!(sent[0].html.contains("Guus"));
}

fn seed_trip(h: &Harness, id: &str) -> RegistrationRef {
    let registration = RegistrationRef::new(RegistrationKind::TripSignup, id).unwrap();
    h.content.add_registration(
        registration.clone(),
        Registration {
            trip: Some(TripQuote {
                base_price: money("250.00"),
                activities: Vec::new(),
                crew_discount: money("0.00"),
                is_crew: false,
                deposit: money("50.00"),
            }),
            ..Default::default()
        },
    );
    registration
}

async fn pay_trip(h: &Harness, id: &str, payment_type: &str, hint: &str) {
    let req = CheckoutRequest {
        payment_type: Some(payment_type.into()),
        ..signup("trip_signup", id, hint)
    };
    let resp = h.checkout(req).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentStatus::Paid));
}

#[tokio::test]
async fn trip_deposit_sets_only_the_deposit_flag() {
    let h = Harness::production();
    let registration = seed_trip(&h, "60");

    pay_trip(&h, "60", "deposit", "50.00").await;

    let stored = h.content.registration(&registration).unwrap();
    assert!(stored.deposit_paid_at.is_some());
    assert!(stored.full_payment_paid_at.is_none());
    assert!(stored.payment_status.is_none());
}

#[tokio::test]
async fn trip_final_payment_sets_the_full_payment_flag() {
    let h = Harness::production();
    let registration = seed_trip(&h, "61");

    pay_trip(&h, "61", "deposit", "50.00").await;
    pay_trip(&h, "61", "final", "200.00").await;

    let stored = h.content.registration(&registration).unwrap();
    let deposit_at = stored.deposit_paid_at.expect("deposit flag");
    let full_at = stored.full_payment_paid_at.expect("full payment flag");
    assert!(deposit_at <= full_at);
    assert!(stored.payment_status.is_none());
}

#[tokio::test]
async fn paid_side_effects_run_even_when_the_inline_run_never_happened() {
    let h = Harness::production();
    let registration = seed_pub_crawl(&h, "62", &["Anna", "Bram"]);
    let resp = h.checkout(signup("pub_crawl_signup", "62", "15.00")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    // The row moves to paid but the process dies before any side effect.
    let moved = h
        .pipeline
        .ports
        .ledger
        .transition(resp.transaction_id, PaymentStatus::Paid, "webhook")
        .await
        .unwrap();
    assert!(matches!(moved, TransitionOutcome::Applied(_)));
    let followup = format!("paid:{}", resp.transaction_id);
    assert!(h.job_keys().contains(&followup));

    // Redelivery finds the row already paid and does nothing itself.
    let status = handle_notification(&h.pipeline, &pid(&resp.payment_id), "evt_redelivered").await;
    assert_eq!(status, "already_processed");
    assert!(h.content.all_tickets().is_empty());

    h.drain_outbox().await;

    assert_eq!(h.content.all_tickets().len(), 2);
    assert_eq!(
        h.content.registration(&registration).unwrap().payment_status.as_deref(),
        Some("paid")
    );
    let job = h
        .store
        .jobs()
        .into_iter()
        .find(|r| r.job.dedupe_key == followup)
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn completed_inline_run_retires_its_followup() {
    let h = Harness::production();
    seed_pub_crawl(&h, "63", &["Anna"]);
    let resp = h.checkout(signup("pub_crawl_signup", "63", "7.50")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    let followup = format!("paid:{}", resp.transaction_id);
    let job = h
        .store
        .jobs()
        .into_iter()
        .find(|r| r.job.dedupe_key == followup)
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    h.drain_outbox().await;
    assert_eq!(h.content.all_tickets().len(), 1);
}

#[tokio::test]
async fn payment_for_an_expired_row_is_flagged_for_an_operator() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();
    h.pipeline
        .ports
        .ledger
        .transition(resp.transaction_id, PaymentStatus::Expired, "orphan_sweep")
        .await
        .unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);

    let outcome = reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Rejected {
            current: PaymentStatus::Expired,
            attempted: PaymentStatus::Paid,
        }
    );
    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.payment_status, PaymentStatus::Expired);
    assert!(t.last_error.as_deref().is_some_and(|e| e.contains("manual resolution")));
    assert!(!h.job_keys().contains(&format!("paid:{}", t.id)));
}

#[tokio::test]
async fn late_failure_for_a_closed_row_leaves_it_unflagged() {
    let h = Harness::production();
    let resp = h.checkout(request("5.00", "Donation")).await.unwrap();
    h.provider.settle(&resp.payment_id, ProviderStatus::Paid);
    reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    h.provider.settle(&resp.payment_id, ProviderStatus::Failed);
    reconcile(&h.pipeline, &pid(&resp.payment_id), "webhook").await.unwrap();

    assert!(h.transaction(resp.transaction_id).await.last_error.is_none());
}
