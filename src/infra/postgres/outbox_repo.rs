use {
    crate::domain::error::PipelineError,
    crate::domain::outbox::{Job, JobFate, JobPayload, JobStatus, NewJob},
    sqlx::{PgConnection, PgPool},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    transaction_id: Option<Uuid>,
    payload: serde_json::Value,
    dedupe_key: String,
    attempts: i32,
    max_attempts: i32,
}

impl TryFrom<JobRow> for Job {
    type Error = PipelineError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            transaction_id: row.transaction_id,
            payload: serde_json::from_value::<JobPayload>(row.payload)?,
            dedupe_key: row.dedupe_key,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        })
    }
}

/// Returns `true` if inserted, `false` if the dedupe key is already queued.
pub async fn enqueue(pool: &PgPool, job: &NewJob) -> Result<bool, PipelineError> {
    let mut conn = pool.acquire().await?;
    enqueue_with(&mut conn, job).await
}

/// Same as [`enqueue`] on a caller's connection, so the job commits or rolls
/// back with the caller's transaction.
pub async fn enqueue_with(conn: &mut PgConnection, job: &NewJob) -> Result<bool, PipelineError> {
    let payload = serde_json::to_value(&job.payload)?;
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO outbox_jobs
            (id, kind, transaction_id, payload, dedupe_key, max_attempts, scheduled_at)
        VALUES ($1, $2, $3, $4, $5, $6, now() + make_interval(secs => $7::double precision))
        ON CONFLICT (dedupe_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(job.payload.kind())
    .bind(job.transaction_id)
    .bind(payload)
    .bind(&job.dedupe_key)
    .bind(job.max_attempts)
    .bind(job.delay_secs as f64)
    .fetch_optional(conn)
    .await?;

    Ok(inserted.is_some())
}

/// Claim up to `limit` due jobs. SKIP LOCKED keeps concurrent workers apart.
pub async fn claim(pool: &PgPool, limit: i64) -> Result<Vec<Job>, PipelineError> {
    let rows: Vec<JobRow> = sqlx::query_as(
        r#"
        UPDATE outbox_jobs
        SET status = 'processing', updated_at = now()
        WHERE id IN (
            SELECT id FROM outbox_jobs
            WHERE status = 'pending' AND scheduled_at <= now()
            ORDER BY scheduled_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, transaction_id, payload, dedupe_key, attempts, max_attempts
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Job::try_from).collect()
}

pub async fn complete(pool: &PgPool, id: Uuid) -> Result<(), PipelineError> {
    sqlx::query("UPDATE outbox_jobs SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Completes a job that has not been claimed yet. Returns `false` when no
/// pending job carries the key.
pub async fn complete_by_key(pool: &PgPool, dedupe_key: &str) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_jobs
        SET status = 'completed', updated_at = now()
        WHERE dedupe_key = $1 AND status = 'pending'
        "#,
    )
    .bind(dedupe_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a failure. Exponential backoff via scheduled_at; at max attempts
/// the job stays `failed` for manual inspection.
pub async fn fail(pool: &PgPool, id: Uuid, error: &str) -> Result<JobFate, PipelineError> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE outbox_jobs
        SET attempts = attempts + 1,
            last_error = $2,
            status = CASE
                WHEN attempts + 1 >= max_attempts THEN 'failed'
                ELSE 'pending'
            END,
            scheduled_at = CASE
                WHEN attempts + 1 >= max_attempts THEN scheduled_at
                ELSE now() + make_interval(secs => power(2, LEAST(attempts + 1, 16))::int)
            END,
            updated_at = now()
        WHERE id = $1
        RETURNING status
        "#,
    )
    .bind(id)
    .bind(error)
    .fetch_optional(pool)
    .await?;

    match status.as_deref() {
        None => Err(PipelineError::NotFound(format!("job {id}"))),
        Some(s) if s == JobStatus::Failed.as_str() => Ok(JobFate::DeadLettered),
        Some(_) => Ok(JobFate::Retrying),
    }
}

/// Reset jobs stuck in 'processing' for >2 minutes back to 'pending'.
pub async fn reap_stale(pool: &PgPool) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_jobs
        SET status = 'pending', updated_at = now()
        WHERE status = 'processing' AND updated_at < now() - interval '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
