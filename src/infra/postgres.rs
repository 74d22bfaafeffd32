//! Postgres-backed ledger, coupons and outbox.

pub mod audit_repo;
pub mod coupon_repo;
pub mod outbox_repo;
pub mod transaction_repo;

use {
    crate::domain::{
        coupon::Coupon,
        error::PipelineError,
        id::ProviderPaymentId,
        outbox::{Job, JobFate, NewJob},
        ports::{BoxFuture, CouponRedemption, CouponStore, OutboxStore, TransactionStore},
        transaction::{
            ApprovalStatus, NewTransaction, PaymentStatus, Transaction, TransactionFilter,
            TransactionPatch, TransitionOutcome,
        },
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, postgres::PgPoolOptions},
    uuid::Uuid,
};

pub async fn connect(database_url: &str) -> Result<PgPool, PipelineError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| PipelineError::Database(e.into()))?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl TransactionStore for PgStore {
    fn create(
        &self,
        new: NewTransaction,
        actor: &str,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        let actor = actor.to_string();
        Box::pin(async move { transaction_repo::insert(&self.pool, new, &actor).await })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>> {
        Box::pin(transaction_repo::get(&self.pool, id))
    }

    fn find_by_provider_id(
        &self,
        provider_id: &ProviderPaymentId,
    ) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>> {
        let provider_id = provider_id.as_str().to_string();
        Box::pin(async move { transaction_repo::find_by_provider_id(&self.pool, &provider_id).await })
    }

    fn patch(
        &self,
        id: Uuid,
        patch: TransactionPatch,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        Box::pin(async move { transaction_repo::patch(&self.pool, id, &patch).await })
    }

    fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<TransitionOutcome, PipelineError>> {
        let actor = actor.to_string();
        Box::pin(async move { transaction_repo::transition(&self.pool, id, to, &actor).await })
    }

    fn decide_approval(
        &self,
        id: Uuid,
        to: ApprovalStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        let actor = actor.to_string();
        Box::pin(async move { transaction_repo::decide_approval(&self.pool, id, to, &actor).await })
    }

    fn list(
        &self,
        filter: TransactionFilter,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>> {
        Box::pin(async move { transaction_repo::list(&self.pool, &filter).await })
    }

    fn stale_orphans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Uuid>, PipelineError>> {
        Box::pin(transaction_repo::stale_orphans(&self.pool, cutoff))
    }
}

impl CouponStore for PgStore {
    fn find_by_code(&self, code: &str) -> BoxFuture<'_, Result<Option<Coupon>, PipelineError>> {
        let code = code.to_string();
        Box::pin(async move { coupon_repo::find_by_code(&self.pool, &code).await })
    }

    fn redeem_for_transaction(
        &self,
        transaction_id: Uuid,
        code: &str,
    ) -> BoxFuture<'_, Result<CouponRedemption, PipelineError>> {
        let code = code.to_string();
        Box::pin(async move {
            coupon_repo::redeem_for_transaction(&self.pool, transaction_id, &code).await
        })
    }
}

impl OutboxStore for PgStore {
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(async move { outbox_repo::enqueue(&self.pool, &job).await })
    }

    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>> {
        Box::pin(outbox_repo::claim(&self.pool, limit))
    }

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(outbox_repo::complete(&self.pool, id))
    }

    fn complete_by_key(&self, dedupe_key: &str) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let key = dedupe_key.to_string();
        Box::pin(async move { outbox_repo::complete_by_key(&self.pool, &key).await })
    }

    fn fail(&self, id: Uuid, error: &str) -> BoxFuture<'_, Result<JobFate, PipelineError>> {
        let error = error.to_string();
        Box::pin(async move { outbox_repo::fail(&self.pool, id, &error).await })
    }

    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        Box::pin(outbox_repo::reap_stale(&self.pool))
    }
}
