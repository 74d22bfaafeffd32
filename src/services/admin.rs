//! Admin actions. Approval is the only way out of `pending`, and approving
//! a paid membership runs the same provisioning as the webhook path.

use {
    super::{Pipeline, orchestrator, provisioning},
    crate::domain::{
        error::PipelineError,
        outbox::SideEffectStep,
        ports::{ContentUser, PaymentSettings},
        transaction::{
            ApprovalStatus, PaymentStatus, ProductType, Transaction, TransactionFilter,
        },
    },
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

const DEFAULT_LIMIT: i64 = 100;

/// An authenticated admin.
#[derive(Debug, Clone)]
pub struct Admin {
    pub user_id: String,
}

impl Admin {
    fn actor(&self) -> String {
        format!("admin:{}", self.user_id)
    }
}

/// Resolves a bearer token to an admin. Only users linked to an external
/// identity count.
pub async fn authenticate(p: &Pipeline, bearer: Option<&str>) -> Result<Admin, PipelineError> {
    let token = bearer
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PipelineError::Unauthorized("missing bearer token".into()))?;
    let user = p
        .ports
        .content
        .current_user(token)
        .await?
        .ok_or_else(|| PipelineError::Unauthorized("invalid token".into()))?;
    match user {
        ContentUser {
            id,
            identity_id: Some(_),
            ..
        } => Ok(Admin { user_id: id }),
        ContentUser { id, .. } => {
            tracing::warn!(security = true, user_id = %id, "admin route used by non-admin");
            Err(PipelineError::Forbidden("admin access required".into()))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub transaction_id: Uuid,
    pub approval_status: ApprovalStatus,
}

impl From<&Transaction> for ApprovalResponse {
    fn from(t: &Transaction) -> Self {
        Self {
            transaction_id: t.id,
            approval_status: t.approval_status,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingQuery {
    pub approval_status: Option<String>,
    pub product_type: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_pending(
    p: &Pipeline,
    query: PendingQuery,
) -> Result<Vec<Transaction>, PipelineError> {
    let approval_status = match query.approval_status.as_deref().map(str::trim) {
        None | Some("") => Some(ApprovalStatus::Pending),
        Some("all") => None,
        Some(s) => Some(ApprovalStatus::try_from(s)?),
    };
    let product_type = match query.product_type.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(s) => Some(ProductType::try_from(s)?),
    };
    p.ports
        .ledger
        .list(TransactionFilter {
            approval_status,
            product_type,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, DEFAULT_LIMIT),
        })
        .await
}

async fn pending_transaction(p: &Pipeline, id: Uuid) -> Result<Transaction, PipelineError> {
    let t = p
        .ports
        .ledger
        .get(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("transaction {id}")))?;
    if t.approval_status != ApprovalStatus::Pending {
        return Err(PipelineError::InvalidState(format!(
            "transaction {id} is already {}",
            t.approval_status
        )));
    }
    Ok(t)
}

#[tracing::instrument(name = "approve", skip(p, admin), fields(admin = %admin.user_id))]
pub async fn approve(
    p: &Pipeline,
    admin: &Admin,
    id: Uuid,
) -> Result<ApprovalResponse, PipelineError> {
    let t = pending_transaction(p, id).await?;
    if t.payment_status != PaymentStatus::Paid {
        return Err(PipelineError::InvalidState(format!(
            "transaction {id} is {}, only paid transactions can be approved",
            t.payment_status
        )));
    }

    let approved = p
        .ports
        .ledger
        .decide_approval(id, ApprovalStatus::Approved, &admin.actor())
        .await?;
    tracing::info!("transaction approved");

    if approved.is_membership() {
        if let Err(e) = provisioning::provision(p, &approved).await {
            orchestrator::record_failure(p, id, SideEffectStep::Membership, &e).await;
        }
    }
    Ok(ApprovalResponse::from(&approved))
}

#[tracing::instrument(name = "reject", skip(p, admin), fields(admin = %admin.user_id))]
pub async fn reject(
    p: &Pipeline,
    admin: &Admin,
    id: Uuid,
) -> Result<ApprovalResponse, PipelineError> {
    pending_transaction(p, id).await?;
    let rejected = p
        .ports
        .ledger
        .decide_approval(id, ApprovalStatus::Rejected, &admin.actor())
        .await?;
    tracing::info!("transaction rejected");
    Ok(ApprovalResponse::from(&rejected))
}

pub async fn settings(p: &Pipeline) -> Result<PaymentSettings, PipelineError> {
    p.ports.content.payment_settings().await
}

pub async fn update_settings(
    p: &Pipeline,
    admin: &Admin,
    settings: PaymentSettings,
) -> Result<PaymentSettings, PipelineError> {
    let saved = p.ports.content.update_payment_settings(settings).await?;
    tracing::info!(
        admin = %admin.user_id,
        manual_approval = saved.manual_approval,
        "payment settings updated"
    );
    Ok(saved)
}
