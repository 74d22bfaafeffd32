use {crate::domain::audit::NewAuditEntry, crate::domain::error::PipelineError};

/// Writes one audit row inside the caller's transaction. Returns `false` when
/// an entry with the same dedupe key already exists.
pub async fn insert_audit_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &NewAuditEntry,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (id, entity_type, entity_id, dedupe_key, action, actor, detail)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (dedupe_key) DO NOTHING
        "#,
    )
    .bind(entry.id)
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(&entry.dedupe_key)
    .bind(&entry.action)
    .bind(&entry.actor)
    .bind(&entry.detail)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}
