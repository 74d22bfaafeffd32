//! What happens once money has moved. Every step is idempotent on its own
//! and fails on its own: a failed step is recorded on the ledger row and
//! queued for replay, and the remaining steps still run.

use {
    super::{Pipeline, provisioning},
    crate::domain::{
        error::PipelineError,
        notification,
        outbox::{JobPayload, SideEffectStep, paid_followup_key},
        ports::{CouponRedemption, RegistrationPatch},
        ticket::Ticket,
        transaction::{
            PaymentStatus, PaymentType, RegistrationKind, Transaction, TransactionPatch,
        },
    },
    chrono::Utc,
    uuid::Uuid,
};

const STEPS: [SideEffectStep; 4] = [
    SideEffectStep::Registration,
    SideEffectStep::Tickets,
    SideEffectStep::Membership,
    SideEffectStep::Coupon,
];

fn applies(step: SideEffectStep, t: &Transaction) -> bool {
    match step {
        SideEffectStep::Registration => t.registration.is_some(),
        SideEffectStep::Tickets => t
            .registration
            .as_ref()
            .is_some_and(|r| r.kind == RegistrationKind::PubCrawlSignup),
        SideEffectStep::Membership => {
            t.is_membership() && t.approval_status.permits_provisioning()
        }
        SideEffectStep::Coupon => t.coupon_code.is_some(),
    }
}

/// Single entry point for a freshly paid transaction, used by the webhook
/// reconciler and the free checkout path alike. Only the caller that won
/// the `open → paid` transition may call this, or the worker through
/// [`resume_paid`].
#[tracing::instrument(name = "on_paid", skip_all, fields(transaction_id = %t.id))]
pub async fn on_paid(p: &Pipeline, t: &Transaction) {
    if t.is_membership() && !t.approval_status.permits_provisioning() {
        tracing::info!(approval = %t.approval_status, "membership provisioning awaits approval");
    }

    for step in STEPS.into_iter().filter(|s| applies(*s, t)) {
        if let Err(e) = run_step(p, t, step).await {
            record_failure(p, t.id, step, &e).await;
        }
    }

    queue_confirmation(p, t).await;

    // Every step ran or was queued; retire the follow-up written by the transition.
    if let Err(e) = p.ports.outbox.complete_by_key(&paid_followup_key(t.id)).await {
        tracing::warn!(error = %e, "paid follow-up left queued, it will rerun the steps");
    }
}

/// Runs the paid steps from the outbox when the run started by the
/// transition never finished. Every step tolerates a second run.
pub async fn resume_paid(p: &Pipeline, transaction_id: Uuid) -> Result<(), PipelineError> {
    let t = p
        .ports
        .ledger
        .get(transaction_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("transaction {transaction_id}")))?;
    if t.payment_status != PaymentStatus::Paid {
        tracing::warn!(%transaction_id, status = %t.payment_status, "paid follow-up for an unpaid row, skipping");
        return Ok(());
    }
    tracing::info!(%transaction_id, "resuming paid side effects");
    on_paid(p, &t).await;
    Ok(())
}

/// Runs one step again for a transaction, from the outbox.
pub async fn replay_step(
    p: &Pipeline,
    transaction_id: Uuid,
    step: SideEffectStep,
) -> Result<(), PipelineError> {
    let t = p
        .ports
        .ledger
        .get(transaction_id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("transaction {transaction_id}")))?;
    if !applies(step, &t) {
        tracing::info!(%transaction_id, step = step.as_str(), "step no longer applies, skipping");
        return Ok(());
    }
    run_step(p, &t, step).await?;
    if t.last_error.is_some() {
        p.ports
            .ledger
            .patch(
                t.id,
                TransactionPatch {
                    last_error: Some(None),
                    ..Default::default()
                },
            )
            .await?;
    }
    tracing::info!(%transaction_id, step = step.as_str(), "side effect replayed");
    Ok(())
}

async fn run_step(p: &Pipeline, t: &Transaction, step: SideEffectStep) -> Result<(), PipelineError> {
    let wrap = |e: PipelineError| PipelineError::SideEffect {
        step: step.as_str().to_string(),
        message: e.to_string(),
    };
    match step {
        SideEffectStep::Registration => mark_registration_paid(p, t).await.map_err(wrap),
        SideEffectStep::Tickets => issue_tickets(p, t).await.map_err(wrap),
        SideEffectStep::Membership => provisioning::provision(p, t).await.map(drop),
        SideEffectStep::Coupon => redeem_coupon(p, t).await.map_err(wrap),
    }
}

pub(crate) async fn record_failure(p: &Pipeline, transaction_id: Uuid, step: SideEffectStep, e: &PipelineError) {
    tracing::error!(
        %transaction_id,
        step = step.as_str(),
        error = %e,
        "side effect failed, queued for replay"
    );
    let recorded = p
        .ports
        .ledger
        .patch(
            transaction_id,
            TransactionPatch {
                last_error: Some(Some(e.to_string())),
                ..Default::default()
            },
        )
        .await;
    if let Err(patch_err) = recorded {
        tracing::error!(%transaction_id, error = %patch_err, "could not record side effect failure");
    }
    p.enqueue(
        Some(transaction_id),
        JobPayload::SideEffect {
            transaction_id,
            step,
        },
        format!("side_effect:{transaction_id}:{}", step.as_str()),
    )
    .await;
}

async fn mark_registration_paid(p: &Pipeline, t: &Transaction) -> Result<(), PipelineError> {
    let Some(registration) = &t.registration else {
        return Ok(());
    };
    let at = t.paid_at.unwrap_or_else(Utc::now);
    let patch = match (registration.kind, t.payment_type) {
        (RegistrationKind::TripSignup, PaymentType::Deposit) => RegistrationPatch::DepositPaid { at },
        (RegistrationKind::TripSignup, _) => RegistrationPatch::FullPaymentPaid { at },
        _ => RegistrationPatch::Paid,
    };
    p.ports.content.patch_registration(registration, patch).await?;
    tracing::info!(registration = %registration.id, kind = %registration.kind, "registration marked paid");
    Ok(())
}

/// One ticket per participant; participants that already hold one are skipped.
async fn issue_tickets(p: &Pipeline, t: &Transaction) -> Result<(), PipelineError> {
    let Some(registration) = &t.registration else {
        return Ok(());
    };
    let content = &p.ports.content;
    let participants = content.pub_crawl_participants(&registration.id).await?;
    let mut tickets = content.tickets_for(&registration.id).await?;

    let mut issued = 0;
    for (index, participant) in participants.iter().enumerate() {
        let index = index as u32;
        if tickets.iter().any(|existing| existing.participant_index == index) {
            continue;
        }
        let ticket = Ticket::issue(&registration.id, index, participant);
        content.create_ticket(&ticket).await?;
        tickets.push(ticket);
        issued += 1;
    }
    tracing::info!(signup = %registration.id, issued, total = tickets.len(), "tickets issued");

    let email = match &t.customer.email {
        Some(email) => Some(email.clone()),
        None => content.registration_contact(registration).await?.email,
    };
    match email {
        Some(email) if !tickets.is_empty() => {
            tickets.sort_by_key(|ticket| ticket.participant_index);
            let list: Vec<(String, String)> = tickets
                .iter()
                .map(|ticket| (ticket.name.clone(), ticket.qr_token.clone()))
                .collect();
            p.enqueue(
                Some(t.id),
                JobPayload::Notification {
                    notification: notification::pub_crawl_tickets(&email, &t.description, &list),
                },
                format!("notify:{}:tickets", t.id),
            )
            .await;
        }
        Some(_) => {}
        None => tracing::warn!(signup = %registration.id, "no address for ticket mail"),
    }
    Ok(())
}

async fn redeem_coupon(p: &Pipeline, t: &Transaction) -> Result<(), PipelineError> {
    let Some(code) = &t.coupon_code else {
        return Ok(());
    };
    match p.ports.coupons.redeem_for_transaction(t.id, code).await? {
        CouponRedemption::Redeemed => tracing::info!(%code, "coupon usage counted"),
        CouponRedemption::AlreadyRedeemed => tracing::debug!(%code, "coupon already counted"),
        CouponRedemption::Exhausted => {
            tracing::warn!(%code, "coupon limit reached after checkout, discount honoured")
        }
        CouponRedemption::UnknownCode => tracing::warn!(%code, "coupon vanished after checkout"),
    }
    Ok(())
}

/// Event and trip confirmations. Pub crawls get their ticket list instead,
/// memberships their renewal or welcome mail from provisioning.
async fn queue_confirmation(p: &Pipeline, t: &Transaction) {
    let Some(registration) = &t.registration else {
        return;
    };
    if registration.kind == RegistrationKind::PubCrawlSignup {
        return;
    }
    let contact = match p.ports.content.registration_contact(registration).await {
        Ok(contact) => contact,
        Err(e) => {
            tracing::warn!(error = %e, "registration contact unavailable, confirming without ticket code");
            Default::default()
        }
    };
    let Some(email) = t.customer.email.clone().or(contact.email) else {
        tracing::warn!(signup = %registration.id, "no address for confirmation mail");
        return;
    };
    let mail = notification::confirmation(
        &email,
        &t.description,
        contact.participant_name.as_deref(),
        contact.qr_token.as_deref(),
    );
    p.enqueue(
        Some(t.id),
        JobPayload::Notification { notification: mail },
        format!("notify:{}:confirmation", t.id),
    )
    .await;
}
