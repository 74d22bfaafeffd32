pub mod admin;
pub mod checkout;
pub mod orchestrator;
pub mod provisioning;
pub mod reconciler;
pub mod worker;

use {
    crate::domain::{
        approval::PolicyConfig,
        error::PipelineError,
        outbox::{JobPayload, NewJob},
        ports::{
            ContentStore, CouponStore, DirectorySync, MembershipService, Notifier, OutboxStore,
            TransactionStore,
        },
        pricing::MembershipRates,
        provider::PaymentProvider,
    },
    std::{sync::Arc, time::Duration},
    uuid::Uuid,
};

/// Everything the services talk to.
#[derive(Clone)]
pub struct Ports {
    pub ledger: Arc<dyn TransactionStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub content: Arc<dyn ContentStore>,
    pub membership: Arc<dyn MembershipService>,
    pub directory: Arc<dyn DirectorySync>,
    pub notifier: Arc<dyn Notifier>,
    /// `None` when no gateway credentials are configured.
    pub provider: Option<Arc<dyn PaymentProvider>>,
}

impl Ports {
    pub fn provider(&self) -> Result<&dyn PaymentProvider, PipelineError> {
        self.provider
            .as_deref()
            .ok_or_else(|| PipelineError::GatewayUnavailable("payment gateway not configured".into()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub policy: PolicyConfig,
    pub rates: MembershipRates,
    /// Empty means any absolute http(s) redirect is accepted.
    pub allowed_redirect_hosts: Vec<String>,
    pub orphan_timeout: Duration,
}

pub struct Pipeline {
    pub ports: Ports,
    pub settings: Settings,
}

impl Pipeline {
    pub fn new(ports: Ports, settings: Settings) -> Self {
        Self { ports, settings }
    }

    /// Queues a job; a failure to queue is logged, never propagated, since
    /// the caller's own work already succeeded.
    pub(crate) async fn enqueue(
        &self,
        transaction_id: Option<Uuid>,
        payload: JobPayload,
        dedupe_key: String,
    ) {
        let kind = payload.kind();
        match self
            .ports
            .outbox
            .enqueue(NewJob::new(transaction_id, payload, dedupe_key.clone()))
            .await
        {
            Ok(true) => tracing::debug!(kind, %dedupe_key, "job queued"),
            Ok(false) => tracing::debug!(kind, %dedupe_key, "job already queued"),
            Err(e) => tracing::error!(
                alert = true,
                kind,
                %dedupe_key,
                error = %e,
                "failed to queue job"
            ),
        }
    }
}
