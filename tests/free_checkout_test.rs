mod common;

use common::*;
use fin_checkout::domain::coupon::DiscountType;
use fin_checkout::domain::ports::RegistrationContact;
use fin_checkout::domain::transaction::{PaymentStatus, RegistrationKind, RegistrationRef};
use fin_checkout::infra::memory::Registration;
use fin_checkout::services::checkout::CheckoutRequest;

fn seed_event(h: &Harness, id: &str, price: &str) -> RegistrationRef {
    let registration = RegistrationRef::new(RegistrationKind::EventSignup, id).unwrap();
    h.content.add_registration(
        registration.clone(),
        Registration {
            contact: RegistrationContact {
                email: Some("guest@example.org".into()),
                participant_name: Some("Sanne".into()),
                qr_token: Some("qr-free-1".into()),
            },
            listed_price: Some(money(price)),
            ..Default::default()
        },
    );
    registration
}

#[tokio::test]
async fn free_event_settles_without_any_gateway() {
    let h = Harness::without_provider();
    let registration = seed_event(&h, "5", "0.00");

    let resp = h.checkout(signup("event_signup", "5", "12.00")).await.unwrap();

    assert!(resp.payment_id.starts_with("free_"));
    assert_eq!(
        resp.checkout_url,
        format!("{REDIRECT}?status=paid&transaction_id={}", resp.transaction_id)
    );

    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.payment_status, PaymentStatus::Paid);
    assert!(t.amount.is_zero());
    assert_eq!(
        t.provider_payment_id.as_ref().map(|id| id.as_str()),
        Some(resp.payment_id.as_str())
    );
    assert_eq!(
        h.content.registration(&registration).unwrap().payment_status.as_deref(),
        Some("paid")
    );

    h.drain_outbox().await;
    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains("qr-free-1"));
}

#[tokio::test]
async fn full_discount_coupon_takes_the_free_path_and_is_counted() {
    let h = Harness::production();
    seed_event(&h, "6", "15.00");
    let free = coupon("FREEBIE", DiscountType::Percentage, 10_000, Some(5));
    h.store.insert_coupon(free.clone());

    let resp = h
        .checkout(CheckoutRequest {
            coupon_code: Some("FREEBIE".into()),
            ..signup("event_signup", "6", "15.00")
        })
        .await
        .unwrap();

    assert_eq!(h.provider.creates(), 0);
    let t = h.transaction(resp.transaction_id).await;
    assert_eq!(t.payment_status, PaymentStatus::Paid);
    assert!(t.coupon_redeemed);
    assert_eq!(h.store.coupon(free.id).unwrap().usage_count, 1);
}

#[tokio::test]
async fn paid_amount_still_needs_the_gateway() {
    let h = Harness::without_provider();
    seed_event(&h, "7", "9.00");

    let err = h.checkout(signup("event_signup", "7", "9.00")).await.unwrap_err();

    assert!(err.is_transient());
    let rows = h.store.transactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payment_status, PaymentStatus::Open);
    assert!(rows[0].last_error.is_some());
}
