use {
    super::{audit_repo::insert_audit_entry, outbox_repo::enqueue_with},
    crate::domain::{
        audit::NewAuditEntry,
        outbox::NewJob,
        error::PipelineError,
        id::ProviderPaymentId,
        money::MoneyAmount,
        transaction::{
            ApprovalStatus, CustomerDetails, Environment, NewTransaction, PaymentStatus,
            PaymentType, ProductType, ProvisioningState, RegistrationKind, RegistrationRef,
            Transaction, TransactionFilter, TransactionPatch, TransitionDecision,
            TransitionOutcome, decide_transition,
        },
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, amount_cents, description, payment_status, approval_status, \
    environment, provider_payment_id, registration_type, registration_id, payment_type, \
    product_type, user_id, email, first_name, last_name, date_of_birth, phone_number, \
    coupon_code, coupon_redeemed, provisioning, account_record_id, identity_id, last_error, \
    decided_by, decided_at, paid_at, created_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    amount_cents: i64,
    description: String,
    payment_status: String,
    approval_status: String,
    environment: String,
    provider_payment_id: Option<String>,
    registration_type: Option<String>,
    registration_id: Option<String>,
    payment_type: String,
    product_type: String,
    user_id: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    phone_number: Option<String>,
    coupon_code: Option<String>,
    coupon_redeemed: bool,
    provisioning: String,
    account_record_id: Option<String>,
    identity_id: Option<String>,
    last_error: Option<String>,
    decided_by: Option<String>,
    decided_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = PipelineError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let registration = match (row.registration_type, row.registration_id) {
            (Some(kind), Some(id)) => Some(RegistrationRef::new(
                RegistrationKind::try_from(kind.as_str())?,
                id,
            )?),
            _ => None,
        };
        Ok(Transaction {
            id: row.id,
            amount: MoneyAmount::new(row.amount_cents)?,
            description: row.description,
            payment_status: PaymentStatus::try_from(row.payment_status.as_str())?,
            approval_status: ApprovalStatus::try_from(row.approval_status.as_str())?,
            environment: Environment::try_from(row.environment.as_str())?,
            provider_payment_id: row.provider_payment_id.map(ProviderPaymentId::new).transpose()?,
            registration,
            payment_type: PaymentType::try_from(row.payment_type.as_str())?,
            product_type: ProductType::try_from(row.product_type.as_str())?,
            user_id: row.user_id,
            customer: CustomerDetails {
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
                date_of_birth: row.date_of_birth,
                phone_number: row.phone_number,
            },
            coupon_code: row.coupon_code,
            coupon_redeemed: row.coupon_redeemed,
            provisioning: ProvisioningState::try_from(row.provisioning.as_str())?,
            account_record_id: row.account_record_id,
            identity_id: row.identity_id,
            last_error: row.last_error,
            decided_by: row.decided_by,
            decided_at: row.decided_at,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

pub async fn insert(
    pool: &PgPool,
    new: NewTransaction,
    actor: &str,
) -> Result<Transaction, PipelineError> {
    let draft = new.into_transaction(Utc::now());
    let mut tx = pool.begin().await?;

    let row: TransactionRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO transactions
            (id, amount_cents, description, approval_status, environment,
             registration_type, registration_id, payment_type, product_type, user_id,
             email, first_name, last_name, date_of_birth, phone_number,
             coupon_code, provisioning, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(draft.id)
    .bind(draft.amount.cents())
    .bind(&draft.description)
    .bind(draft.approval_status.as_str())
    .bind(draft.environment.as_str())
    .bind(draft.registration.as_ref().map(|r| r.kind.as_str()))
    .bind(draft.registration.as_ref().map(|r| r.id.as_str()))
    .bind(draft.payment_type.as_str())
    .bind(draft.product_type.as_str())
    .bind(draft.user_id.as_deref())
    .bind(draft.customer.email.as_deref())
    .bind(draft.customer.first_name.as_deref())
    .bind(draft.customer.last_name.as_deref())
    .bind(draft.customer.date_of_birth.as_deref())
    .bind(draft.customer.phone_number.as_deref())
    .bind(draft.coupon_code.as_deref())
    .bind(draft.provisioning.as_str())
    .bind(draft.created_at)
    .fetch_one(&mut *tx)
    .await?;

    let audit = NewAuditEntry::transaction(
        draft.id,
        format!("created:{}", draft.id),
        "created",
        actor,
        serde_json::json!({
            "amount": draft.amount.to_string(),
            "approval_status": draft.approval_status.as_str(),
        }),
    );
    insert_audit_entry(&mut tx, &audit).await?;
    tx.commit().await?;

    Transaction::try_from(row)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Transaction>, PipelineError> {
    let row: Option<TransactionRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(Transaction::try_from).transpose()
}

pub async fn find_by_provider_id(
    pool: &PgPool,
    provider_id: &str,
) -> Result<Option<Transaction>, PipelineError> {
    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM transactions WHERE provider_payment_id = $1"
    ))
    .bind(provider_id)
    .fetch_optional(pool)
    .await?;
    row.map(Transaction::try_from).transpose()
}

pub async fn patch(
    pool: &PgPool,
    id: Uuid,
    patch: &TransactionPatch,
) -> Result<Transaction, PipelineError> {
    let mut tx = pool.begin().await?;

    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        r#"
        UPDATE transactions
        SET provider_payment_id = COALESCE($2, provider_payment_id),
            user_id = COALESCE($3, user_id),
            provisioning = COALESCE($4, provisioning),
            account_record_id = COALESCE($5, account_record_id),
            identity_id = COALESCE($6, identity_id),
            last_error = CASE WHEN $7 THEN $8 ELSE last_error END,
            updated_at = now()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(patch.provider_payment_id.as_ref().map(ProviderPaymentId::as_str))
    .bind(patch.user_id.as_deref())
    .bind(patch.provisioning.map(|p| p.as_str()))
    .bind(patch.account_record_id.as_deref())
    .bind(patch.identity_id.as_deref())
    .bind(patch.last_error.is_some())
    .bind(patch.last_error.clone().flatten())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Err(PipelineError::NotFound(format!("transaction {id}")));
    };
    if let Some(stage) = patch.provisioning {
        insert_audit_entry(&mut tx, &NewAuditEntry::provisioning(id, stage)).await?;
    }
    tx.commit().await?;

    Transaction::try_from(row)
}

/// Conditional on `payment_status = 'open'`: concurrent callers race on one
/// row update and only the winner sees `Applied`.
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    to: PaymentStatus,
    actor: &str,
) -> Result<TransitionOutcome, PipelineError> {
    let mut tx = pool.begin().await?;

    let applied: Option<TransactionRow> = if to == PaymentStatus::Open {
        None
    } else {
        sqlx::query_as(&format!(
            r#"
            UPDATE transactions
            SET payment_status = $2,
                paid_at = CASE WHEN $2 = 'paid' THEN now() ELSE paid_at END,
                updated_at = now()
            WHERE id = $1 AND payment_status = 'open'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(to.as_str())
        .fetch_optional(&mut *tx)
        .await?
    };

    if let Some(row) = applied {
        let audit = NewAuditEntry::transaction(
            id,
            format!("transition:{id}:{to}"),
            "status_changed",
            actor,
            serde_json::json!({"old_status": PaymentStatus::Open.as_str(), "new_status": to.as_str()}),
        );
        insert_audit_entry(&mut tx, &audit).await?;
        if to == PaymentStatus::Paid {
            enqueue_with(&mut tx, &NewJob::paid_followup(id)).await?;
        }
        tx.commit().await?;
        return Ok(TransitionOutcome::Applied(Transaction::try_from(row)?));
    }

    let current: Option<TransactionRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let current = current
        .map(Transaction::try_from)
        .transpose()?
        .ok_or_else(|| PipelineError::NotFound(format!("transaction {id}")))?;

    let from = current.payment_status;
    let outcome = match decide_transition(from, to) {
        TransitionDecision::SameStatus => TransitionOutcome::AlreadyInState(current),
        // The UPDATE missed, so the row is not `open` and nothing advances.
        TransitionDecision::Advance | TransitionDecision::Anomaly => {
            let audit = NewAuditEntry::transaction(
                id,
                format!("anomaly:{id}:{to}"),
                "anomaly",
                actor,
                serde_json::json!({"current_status": from.as_str(), "incoming_status": to.as_str()}),
            );
            insert_audit_entry(&mut tx, &audit).await?;
            TransitionOutcome::Rejected {
                transaction: current,
                attempted: to,
            }
        }
    };
    tx.commit().await?;
    Ok(outcome)
}

/// `pending → approved | rejected`, stamped with who decided and when.
pub async fn decide_approval(
    pool: &PgPool,
    id: Uuid,
    to: ApprovalStatus,
    actor: &str,
) -> Result<Transaction, PipelineError> {
    let mut tx = pool.begin().await?;

    let row: Option<TransactionRow> = sqlx::query_as(&format!(
        r#"
        UPDATE transactions
        SET approval_status = $2, decided_by = $3, decided_at = now(), updated_at = now()
        WHERE id = $1 AND approval_status = 'pending'
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(to.as_str())
    .bind(actor)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        let current: Option<String> =
            sqlx::query_scalar("SELECT approval_status FROM transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        return Err(match current {
            None => PipelineError::NotFound(format!("transaction {id}")),
            Some(status) => {
                PipelineError::InvalidState(format!("transaction {id} is already {status}"))
            }
        });
    };

    let audit = NewAuditEntry::transaction(
        id,
        format!("approval:{id}"),
        "approval_decided",
        actor,
        serde_json::json!({"approval_status": to.as_str()}),
    );
    insert_audit_entry(&mut tx, &audit).await?;
    tx.commit().await?;

    Transaction::try_from(row)
}

pub async fn list(
    pool: &PgPool,
    filter: &TransactionFilter,
) -> Result<Vec<Transaction>, PipelineError> {
    let limit = if filter.limit > 0 { filter.limit } else { 100 };
    let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM transactions
        WHERE ($1::text IS NULL OR approval_status = $1)
          AND ($2::text IS NULL OR product_type = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#
    ))
    .bind(filter.approval_status.map(|s| s.as_str()))
    .bind(filter.product_type.map(|p| p.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Transaction::try_from).collect()
}

pub async fn stale_orphans(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Uuid>, PipelineError> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT id FROM transactions
        WHERE payment_status = 'open' AND provider_payment_id IS NULL AND created_at < $1
        ORDER BY created_at
        LIMIT 500
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
