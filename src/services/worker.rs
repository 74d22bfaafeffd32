//! Background loops: outbox worker, stale-job reaper and orphan sweep. Each
//! stops when the shutdown channel fires.

use {
    super::{Pipeline, orchestrator, reconciler},
    crate::domain::{
        error::PipelineError,
        id::ProviderPaymentId,
        outbox::{Job, JobFate, JobPayload},
        transaction::{PaymentStatus, TransitionOutcome},
    },
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

const BATCH: i64 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const REAP_INTERVAL: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sleeps for `period`; `false` once shutdown was requested.
async fn tick(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

pub async fn run_worker(p: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("outbox worker started");
    while tick(&mut shutdown, POLL_INTERVAL).await {
        if let Err(e) = poll_once(&p).await {
            tracing::error!(error = %e, "worker poll error");
        }
    }
    tracing::info!("outbox worker shutting down");
}

async fn execute(p: &Pipeline, job: &Job) -> Result<(), PipelineError> {
    match &job.payload {
        JobPayload::Reconcile { provider_id } => {
            let id = ProviderPaymentId::new(provider_id.as_str())?;
            let outcome = reconciler::reconcile(p, &id, "worker").await?;
            tracing::info!(job_id = %job.id, outcome = outcome.label(), "queued notification reconciled");
            Ok(())
        }
        JobPayload::Paid { transaction_id } => orchestrator::resume_paid(p, *transaction_id).await,
        JobPayload::SideEffect {
            transaction_id,
            step,
        } => orchestrator::replay_step(p, *transaction_id, *step).await,
        JobPayload::DirectorySync { user_id } => p.ports.directory.sync(user_id).await,
        JobPayload::Notification { notification } => p.ports.notifier.send(notification).await,
    }
}

/// Claims one batch of due jobs and runs it. Returns how many were claimed.
pub async fn poll_once(p: &Pipeline) -> Result<usize, PipelineError> {
    let outbox = &p.ports.outbox;
    let jobs = outbox.claim(BATCH).await?;
    let claimed = jobs.len();

    for job in jobs {
        let kind = job.payload.kind();
        match execute(p, &job).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, kind, "job processed");
                outbox.complete(job.id).await?;
            }
            Err(e @ (PipelineError::Validation(_) | PipelineError::NotFound(_))) => {
                tracing::warn!(job_id = %job.id, kind, error = %e, "job cannot succeed, completing (no retry)");
                outbox.complete(job.id).await?;
            }
            Err(e) => match outbox.fail(job.id, &e.to_string()).await? {
                JobFate::Retrying => tracing::warn!(
                    job_id = %job.id,
                    kind,
                    attempt = job.attempts + 1,
                    error = %e,
                    "job failed, scheduling retry"
                ),
                JobFate::DeadLettered => tracing::error!(
                    alert = true,
                    job_id = %job.id,
                    kind,
                    dedupe_key = %job.dedupe_key,
                    transaction_id = ?job.transaction_id,
                    error = %e,
                    "job dead-lettered"
                ),
            },
        }
    }

    Ok(claimed)
}

/// Periodically resets jobs stuck in `processing` back to `pending`.
pub async fn run_reaper(p: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("stale job reaper started");
    while tick(&mut shutdown, REAP_INTERVAL).await {
        match p.ports.outbox.reap_stale().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped stale jobs"),
            Err(e) => tracing::error!(error = %e, "reaper error"),
        }
    }
    tracing::info!("stale job reaper shutting down");
}

pub async fn run_orphan_sweep(p: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("orphan sweep started");
    while tick(&mut shutdown, SWEEP_INTERVAL).await {
        match sweep_orphans_once(&p).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "expired orphaned transactions"),
            Err(e) => tracing::error!(error = %e, "orphan sweep error"),
        }
    }
    tracing::info!("orphan sweep shutting down");
}

/// Expires `open` transactions that never reached the gateway. Goes through
/// the regular transition, so a row that got paid meanwhile is left alone.
pub async fn sweep_orphans_once(p: &Pipeline) -> Result<u64, PipelineError> {
    let timeout = chrono::Duration::from_std(p.settings.orphan_timeout)
        .unwrap_or_else(|_| chrono::Duration::hours(1));
    let ledger = &p.ports.ledger;
    let mut expired = 0;
    for id in ledger.stale_orphans(Utc::now() - timeout).await? {
        match ledger.transition(id, PaymentStatus::Expired, "sweeper").await? {
            TransitionOutcome::Applied(_) => {
                tracing::warn!(transaction_id = %id, "orphaned transaction expired");
                expired += 1;
            }
            other => tracing::debug!(transaction_id = %id, outcome = other.label(), "orphan already settled"),
        }
    }
    Ok(expired)
}
