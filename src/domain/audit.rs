use {super::transaction::ProvisioningState, uuid::Uuid};

pub struct NewAuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    /// Unique per logical event; replays of the same event write nothing.
    pub dedupe_key: String,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
}

impl NewAuditEntry {
    pub fn transaction(
        transaction_id: Uuid,
        dedupe_key: String,
        action: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type: "transaction".to_string(),
            entity_id: transaction_id,
            dedupe_key,
            action: action.to_string(),
            actor: actor.to_string(),
            detail,
        }
    }

    pub fn provisioning(transaction_id: Uuid, stage: ProvisioningState) -> Self {
        Self::transaction(
            transaction_id,
            format!("provisioning:{transaction_id}:{stage}"),
            "provisioning_advanced",
            "provisioning",
            serde_json::json!({ "stage": stage.as_str() }),
        )
    }
}
