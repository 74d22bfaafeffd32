//! Provider notification → ledger transition. The notification body is only
//! a pointer; the canonical payment object is always fetched again.

use {
    super::{Pipeline, orchestrator},
    crate::domain::{
        error::PipelineError,
        id::ProviderPaymentId,
        outbox::JobPayload,
        provider::FetchedPayment,
        transaction::{PaymentStatus, Transaction, TransactionPatch, TransitionOutcome},
    },
    backon::{ExponentialBuilder, Retryable},
    std::time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This call moved the row; side effects ran if it moved to `paid`.
    Applied(PaymentStatus),
    AlreadyInState(PaymentStatus),
    /// Out-of-order or contradicting notification, ignored.
    Rejected {
        current: PaymentStatus,
        attempted: PaymentStatus,
    },
    /// Provider still reports the payment as in progress.
    NotSettled,
    /// No ledger row belongs to this provider id.
    Unknown,
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::AlreadyInState(_) => "already_processed",
            Self::Rejected { .. } => "ignored",
            Self::NotSettled => "pending",
            Self::Unknown => "unknown",
        }
    }
}

fn fetch_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(3)
}

async fn fetch(p: &Pipeline, id: &ProviderPaymentId) -> Result<FetchedPayment, PipelineError> {
    let provider = p.ports.provider()?;
    (move || provider.fetch_by_id(id))
        .retry(fetch_backoff())
        .when(PipelineError::is_transient)
        .notify(|e, after| {
            tracing::warn!(error = %e, retry_in = ?after, "payment fetch failed, retrying")
        })
        .await
}

/// The ledger row the payment belongs to. The metadata link is preferred;
/// the stored provider id is the fallback for rows created before it.
async fn locate(
    p: &Pipeline,
    payment: &FetchedPayment,
) -> Result<Option<Transaction>, PipelineError> {
    let ledger = &p.ports.ledger;
    let Some(transaction_id) = payment.metadata.transaction_id else {
        return ledger.find_by_provider_id(&payment.provider_id).await;
    };
    let Some(t) = ledger.get(transaction_id).await? else {
        return ledger.find_by_provider_id(&payment.provider_id).await;
    };
    match &t.provider_payment_id {
        None => {
            let patched = ledger
                .patch(
                    t.id,
                    TransactionPatch {
                        provider_payment_id: Some(payment.provider_id.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(Some(patched))
        }
        Some(stored) if *stored == payment.provider_id => Ok(Some(t)),
        Some(stored) => {
            tracing::warn!(
                security = true,
                %transaction_id,
                stored = stored.as_str(),
                notified = payment.provider_id.as_str(),
                "payment metadata points at a transaction bound to another payment"
            );
            Ok(None)
        }
    }
}

#[tracing::instrument(name = "reconcile", skip(p, id), fields(provider_id = id.as_str(), transaction_id))]
pub async fn reconcile(
    p: &Pipeline,
    id: &ProviderPaymentId,
    actor: &str,
) -> Result<ReconcileOutcome, PipelineError> {
    let payment = fetch(p, id).await?;
    let Some(t) = locate(p, &payment).await? else {
        tracing::warn!("notification for a payment with no ledger row");
        return Ok(ReconcileOutcome::Unknown);
    };
    tracing::Span::current().record("transaction_id", tracing::field::display(t.id));

    if payment.amount != t.amount {
        tracing::warn!(
            security = true,
            charged = payment.amount.cents(),
            expected = t.amount.cents(),
            "provider amount differs from ledger amount"
        );
    }

    let Some(status) = payment.status.internal() else {
        tracing::debug!(provider_status = ?payment.status, "payment not settled yet");
        return Ok(ReconcileOutcome::NotSettled);
    };

    let outcome = p.ports.ledger.transition(t.id, status, actor).await?;
    tracing::info!(to = %status, outcome = outcome.label(), "reconciled");
    Ok(match outcome {
        TransitionOutcome::Applied(settled) => {
            if settled.payment_status == PaymentStatus::Paid {
                orchestrator::on_paid(p, &settled).await;
            }
            ReconcileOutcome::Applied(settled.payment_status)
        }
        TransitionOutcome::AlreadyInState(current) => {
            ReconcileOutcome::AlreadyInState(current.payment_status)
        }
        TransitionOutcome::Rejected {
            transaction,
            attempted,
        } => {
            if attempted == PaymentStatus::Paid {
                flag_paid_after_close(p, &transaction).await;
            }
            ReconcileOutcome::Rejected {
                current: transaction.payment_status,
                attempted,
            }
        }
    })
}

/// Money arrived for a row that had already closed, e.g. an orphan the sweep
/// expired. Nothing is provisioned; an operator has to refund or settle it.
async fn flag_paid_after_close(p: &Pipeline, t: &Transaction) {
    tracing::error!(
        alert = true,
        transaction_id = %t.id,
        current = %t.payment_status,
        "payment captured for a closed transaction, needs manual resolution"
    );
    let note = format!("paid after {}: manual resolution required", t.payment_status);
    let patched = p
        .ports
        .ledger
        .patch(
            t.id,
            TransactionPatch {
                last_error: Some(Some(note)),
                ..Default::default()
            },
        )
        .await;
    if let Err(e) = patched {
        tracing::error!(transaction_id = %t.id, error = %e, "could not flag closed transaction");
    }
}

/// Webhook entry point. Never fails: anything that goes wrong inline is
/// handed to the outbox and the provider still gets its acknowledgement.
pub async fn handle_notification(
    p: &Pipeline,
    id: &ProviderPaymentId,
    event_id: &str,
) -> &'static str {
    match reconcile(p, id, "webhook").await {
        Ok(outcome) => outcome.label(),
        Err(e) => {
            tracing::error!(
                provider_id = id.as_str(),
                error = %e,
                "inline reconciliation failed, queued for retry"
            );
            p.enqueue(
                None,
                JobPayload::Reconcile {
                    provider_id: id.as_str().to_string(),
                },
                format!("reconcile:{}:{event_id}", id.as_str()),
            )
            .await;
            "queued"
        }
    }
}
