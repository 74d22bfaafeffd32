mod common;

use common::*;
use fin_checkout::domain::coupon::DiscountType;
use fin_checkout::domain::error::PipelineError;
use fin_checkout::domain::pricing::{SelectedActivity, TripQuote};
use fin_checkout::domain::transaction::{
    PaymentStatus, PaymentType, ProductType, RegistrationKind, RegistrationRef,
};
use fin_checkout::infra::memory::Registration;
use fin_checkout::services::worker;

fn trip() -> TripQuote {
    TripQuote {
        base_price: money("250.00"),
        activities: vec![SelectedActivity {
            price: money("20.00"),
            option_prices: vec![money("5.00")],
        }],
        crew_discount: money("15.00"),
        is_crew: true,
        deposit: money("25.00"),
    }
}

fn seed_trip(h: &Harness, id: &str) {
    h.content.add_registration(
        RegistrationRef::new(RegistrationKind::TripSignup, id).unwrap(),
        Registration {
            trip: Some(trip()),
            ..Default::default()
        },
    );
}

// ── Amount calculation ─────────────────────────────────────────────────────

#[tokio::test]
async fn committee_member_pays_committee_rate_whatever_the_client_sends() {
    let h = Harness::production();
    h.add_member("7", "board@example.org", true);

    let resp = h.checkout(member_contribution("20.00", "7")).await.unwrap();

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.amount, money("10.00"));
    assert_eq!(t.product_type, ProductType::MembershipRenewal);
    assert_eq!(h.provider.last_request().amount, money("10.00"));
}

#[tokio::test]
async fn guest_contribution_pays_standard_rate() {
    let h = Harness::production();

    let resp = h.checkout(guest_contribution("0.01", "eva@example.org")).await.unwrap();

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.amount, money("20.00"));
    assert_eq!(t.product_type, ProductType::MembershipNew);
}

#[tokio::test]
async fn trip_final_payment_is_computed_from_the_signup() {
    let h = Harness::production();
    seed_trip(&h, "31");

    let req = fin_checkout::services::checkout::CheckoutRequest {
        payment_type: Some("final".into()),
        ..signup("trip_signup", "31", "1.00")
    };
    let resp = h.checkout(req).await.unwrap();

    let t = h.transaction(resp.transaction_id).await;
    // 250 + 20 + 5 - 15 crew - 25 deposit
    assert_eq!(t.amount, money("235.00"));
    assert_eq!(t.payment_type, PaymentType::Final);
}

#[tokio::test]
async fn trip_deposit_charges_the_deposit() {
    let h = Harness::production();
    seed_trip(&h, "32");

    let req = fin_checkout::services::checkout::CheckoutRequest {
        payment_type: Some("deposit".into()),
        ..signup("trip_signup", "32", "500.00")
    };
    let resp = h.checkout(req).await.unwrap();

    assert_eq!(h.transaction(resp.transaction_id).await.amount, money("25.00"));
}

#[tokio::test]
async fn listed_event_price_beats_the_hint() {
    let h = Harness::production();
    h.content.add_registration(
        RegistrationRef::new(RegistrationKind::EventSignup, "5").unwrap(),
        Registration {
            listed_price: Some(money("12.50")),
            ..Default::default()
        },
    );

    let resp = h.checkout(signup("event_signup", "5", "1.00")).await.unwrap();

    assert_eq!(h.transaction(resp.transaction_id).await.amount, money("12.50"));
}

#[tokio::test]
async fn percentage_coupon_is_applied_and_counted_once_paid() {
    let h = Harness::production();
    let save10 = coupon("SAVE10", DiscountType::Percentage, 1000, Some(5));
    let coupon_id = save10.id;
    h.store.insert_coupon(save10);

    let req = fin_checkout::services::checkout::CheckoutRequest {
        coupon_code: Some("save10".into()),
        ..guest_contribution("20.00", "eva@example.org")
    };
    let resp = h.checkout(req).await.unwrap();

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.amount, money("18.00"));
    assert_eq!(t.coupon_code.as_deref(), Some("save10"));
    assert_eq!(h.store.coupon(coupon_id).unwrap().usage_count, 0, "counted only after payment");

    h.provider.settle(&resp.payment_id, fin_checkout::domain::provider::ProviderStatus::Paid);
    let id = fin_checkout::domain::id::ProviderPaymentId::new(resp.payment_id.clone()).unwrap();
    fin_checkout::services::reconciler::reconcile(&h.pipeline, &id, "test")
        .await
        .unwrap();
    fin_checkout::services::reconciler::reconcile(&h.pipeline, &id, "test")
        .await
        .unwrap();

    assert_eq!(h.store.coupon(coupon_id).unwrap().usage_count, 1);
}

#[tokio::test]
async fn exhausted_coupon_is_ignored_not_fatal() {
    let h = Harness::production();
    let mut used_up = coupon("GONE", DiscountType::Fixed, 500, Some(1));
    used_up.usage_count = 1;
    h.store.insert_coupon(used_up);

    let req = fin_checkout::services::checkout::CheckoutRequest {
        coupon_code: Some("GONE".into()),
        ..guest_contribution("20.00", "eva@example.org")
    };
    let resp = h.checkout(req).await.unwrap();

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.amount, money("20.00"));
    assert_eq!(t.coupon_code, None);
}

// ── Validation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn foreign_redirect_is_rejected_before_anything_is_stored() {
    let h = Harness::production();
    let req = fin_checkout::services::checkout::CheckoutRequest {
        redirect_url: Some("https://evil.test/phish".into()),
        ..guest_contribution("20.00", "eva@example.org")
    };

    let err = h.checkout(req).await.unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(h.store.transactions().is_empty());
    assert_eq!(h.provider.creates(), 0);
}

#[tokio::test]
async fn subdomain_of_allowed_host_is_accepted() {
    let h = Harness::production();
    let req = fin_checkout::services::checkout::CheckoutRequest {
        redirect_url: Some("https://pay.example.org/back".into()),
        ..guest_contribution("20.00", "eva@example.org")
    };
    assert!(h.checkout(req).await.is_ok());
}

#[tokio::test]
async fn guest_contribution_with_known_email_is_a_duplicate_identity() {
    let h = Harness::production();
    h.add_member("9", "Eva@Example.org", false);

    let err = h
        .checkout(guest_contribution("20.00", "eva@example.org"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DuplicateIdentity(_)));
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn missing_amount_is_a_validation_error() {
    let h = Harness::production();
    let req = fin_checkout::services::checkout::CheckoutRequest {
        amount: None,
        ..request("1.00", "Gala")
    };
    assert!(matches!(
        h.checkout(req).await.unwrap_err(),
        PipelineError::Validation(_)
    ));
}

// ── Gateway ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_redirect_carries_the_transaction_id() {
    let h = Harness::production();

    let resp = h.checkout(guest_contribution("20.00", "eva@example.org")).await.unwrap();

    let sent = h.provider.last_request();
    assert!(sent.redirect_url.starts_with(REDIRECT));
    assert!(sent.redirect_url.contains(&format!("transaction_id={}", resp.transaction_id)));
    assert_eq!(sent.metadata.transaction_id, Some(resp.transaction_id));
    assert_eq!(resp.checkout_url, format!("https://checkout.test/{}", resp.payment_id));

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(
        t.provider_payment_id.as_ref().map(|id| id.as_str()),
        Some(resp.payment_id.as_str())
    );
    assert_eq!(t.payment_status, PaymentStatus::Open);
}

#[tokio::test]
async fn gateway_failure_leaves_an_orphan_that_the_sweep_expires() {
    let h = Harness::without_provider();

    let err = h
        .checkout(guest_contribution("20.00", "eva@example.org"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::GatewayUnavailable(_)));

    let orphan = h.store.transactions().pop().expect("row created before the gateway call");
    assert_eq!(orphan.payment_status, PaymentStatus::Open);
    assert!(orphan.provider_payment_id.is_none());
    assert!(orphan.last_error.is_some());

    assert_eq!(worker::sweep_orphans_once(&h.pipeline).await.unwrap(), 0, "too young");
    h.store.backdate(orphan.id, chrono::Duration::hours(2));
    assert_eq!(worker::sweep_orphans_once(&h.pipeline).await.unwrap(), 1);
    assert_eq!(h.transaction(orphan.id).await.payment_status, PaymentStatus::Expired);
    assert_eq!(worker::sweep_orphans_once(&h.pipeline).await.unwrap(), 0);
}

#[tokio::test]
async fn gateway_error_during_create_is_returned() {
    let h = Harness::production();
    h.provider
        .fail_create
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = h
        .checkout(guest_contribution("20.00", "eva@example.org"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::GatewayUnavailable(_)));
    assert_eq!(h.store.transactions().len(), 1);
}
