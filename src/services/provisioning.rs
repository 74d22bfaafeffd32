//! Membership provisioning as a small state machine on the ledger row.
//!
//! A returning member is activated in one call. A new member goes through
//! three stages, each persisted before the next starts, so a crash between
//! "record created" and "identity created" leaves a visible half-finished
//! row that the next attempt resumes instead of starting over.

use {
    super::Pipeline,
    crate::domain::{
        error::PipelineError,
        notification,
        outbox::JobPayload,
        transaction::{CustomerDetails, ProvisioningState, Transaction, TransactionPatch},
    },
    chrono::{Duration, Utc},
};

const STEP: &str = "membership";
const MEMBERSHIP_DAYS: i64 = 365;

fn failed(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::SideEffect {
        step: STEP.to_string(),
        message: e.to_string(),
    }
}

/// Advances provisioning for `t` as far as it will go. Completed rows are
/// returned untouched.
#[tracing::instrument(name = "provision", skip_all, fields(transaction_id = %t.id, stage = %t.provisioning))]
pub async fn provision(p: &Pipeline, t: &Transaction) -> Result<Transaction, PipelineError> {
    match t.provisioning {
        ProvisioningState::Completed | ProvisioningState::NotRequired => return Ok(t.clone()),
        _ => {}
    }

    match (&t.user_id, &t.account_record_id) {
        (Some(user_id), None) => activate_existing(p, t, user_id).await,
        _ => provision_new(p, t).await,
    }
}

async fn activate_existing(
    p: &Pipeline,
    t: &Transaction,
    user_id: &str,
) -> Result<Transaction, PipelineError> {
    p.ports.membership.provision(user_id).await.map_err(failed)?;
    p.ports
        .content
        .set_membership_expiry(user_id, Utc::now() + Duration::days(MEMBERSHIP_DAYS))
        .await
        .map_err(failed)?;
    let done = p
        .ports
        .ledger
        .patch(
            t.id,
            TransactionPatch {
                provisioning: Some(ProvisioningState::Completed),
                last_error: Some(None),
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(%user_id, "membership renewed");

    queue_directory_sync(p, t, user_id).await;
    match &t.customer.email {
        Some(email) => {
            p.enqueue(
                Some(t.id),
                JobPayload::Notification {
                    notification: notification::membership_renewed(email),
                },
                format!("notify:{}:renewal", t.id),
            )
            .await
        }
        None => tracing::warn!(%user_id, "no address for renewal mail"),
    }
    Ok(done)
}

/// Customer data from the ledger, completed from the gateway's copy of the
/// checkout metadata when fields are missing.
async fn customer_for(p: &Pipeline, t: &Transaction) -> CustomerDetails {
    let known = t.customer.clone();
    if known.has_full_name_and_email() {
        return known;
    }
    let Some(provider_id) = t.provider_payment_id.as_ref().filter(|id| !id.is_synthesized())
    else {
        return known;
    };
    let Ok(provider) = p.ports.provider() else {
        return known;
    };
    match provider.fetch_by_id(provider_id).await {
        Ok(payment) => known.or(payment.metadata.customer),
        Err(e) => {
            tracing::warn!(error = %e, "could not complete customer details from gateway");
            known
        }
    }
}

async fn provision_new(p: &Pipeline, t: &Transaction) -> Result<Transaction, PipelineError> {
    let customer = customer_for(p, t).await;
    if !customer.has_full_name_and_email() {
        return Err(failed("no existing user and no full name and email to create one"));
    }

    let mut t = t.clone();
    loop {
        t = match t.provisioning {
            ProvisioningState::Awaiting => {
                let record_id = p
                    .ports
                    .content
                    .create_user_record(&customer)
                    .await
                    .map_err(failed)?;
                tracing::info!(%record_id, "member record created");
                p.ports
                    .ledger
                    .patch(
                        t.id,
                        TransactionPatch {
                            account_record_id: Some(record_id),
                            provisioning: Some(ProvisioningState::AccountCreated),
                            ..Default::default()
                        },
                    )
                    .await?
            }
            ProvisioningState::AccountCreated => {
                let credentials = p
                    .ports
                    .membership
                    .create_account(&customer)
                    .await
                    .map_err(failed)?;
                tracing::info!(identity_id = %credentials.identity_id, "identity created");
                if let Some(email) = &customer.email {
                    let first_name = customer.first_name.as_deref().unwrap_or_default();
                    p.enqueue(
                        Some(t.id),
                        JobPayload::Notification {
                            notification: notification::welcome(email, first_name, &credentials),
                        },
                        format!("notify:{}:welcome", t.id),
                    )
                    .await;
                }
                p.ports
                    .ledger
                    .patch(
                        t.id,
                        TransactionPatch {
                            identity_id: Some(credentials.identity_id),
                            provisioning: Some(ProvisioningState::IdentityCreated),
                            ..Default::default()
                        },
                    )
                    .await?
            }
            ProvisioningState::IdentityCreated => {
                let (Some(record_id), Some(identity_id)) = (&t.account_record_id, &t.identity_id)
                else {
                    return Err(failed(format!(
                        "stage {} without record and identity ids",
                        t.provisioning
                    )));
                };
                let content = &p.ports.content;
                content
                    .link_identity(record_id, identity_id)
                    .await
                    .map_err(failed)?;
                content
                    .set_membership_expiry(record_id, Utc::now() + Duration::days(MEMBERSHIP_DAYS))
                    .await
                    .map_err(failed)?;
                let done = p
                    .ports
                    .ledger
                    .patch(
                        t.id,
                        TransactionPatch {
                            user_id: Some(record_id.clone()),
                            provisioning: Some(ProvisioningState::Completed),
                            last_error: Some(None),
                            ..Default::default()
                        },
                    )
                    .await?;
                tracing::info!(%record_id, %identity_id, "new member linked");
                queue_directory_sync(p, &done, identity_id).await;
                return Ok(done);
            }
            ProvisioningState::Completed | ProvisioningState::NotRequired => return Ok(t),
        };
    }
}

async fn queue_directory_sync(p: &Pipeline, t: &Transaction, user_id: &str) {
    p.enqueue(
        Some(t.id),
        JobPayload::DirectorySync {
            user_id: user_id.to_string(),
        },
        format!("directory_sync:{}", t.id),
    )
    .await;
}
