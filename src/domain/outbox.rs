use {
    super::notification::Notification,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 8;

/// How long the paid follow-up waits before it assumes the inline run died.
pub const PAID_FOLLOWUP_DELAY_SECS: i64 = 300;

/// Orchestrator steps that can be replayed on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectStep {
    Registration,
    Tickets,
    Membership,
    Coupon,
}

impl SideEffectStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Tickets => "tickets",
            Self::Membership => "membership",
            Self::Coupon => "coupon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// A webhook whose inline reconciliation failed.
    Reconcile { provider_id: String },
    /// Written together with the `open → paid` transition; completed by the
    /// inline run, executed by the worker when that run never finished.
    Paid { transaction_id: Uuid },
    SideEffect {
        transaction_id: Uuid,
        step: SideEffectStep,
    },
    DirectorySync { user_id: String },
    Notification { notification: Notification },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reconcile { .. } => "reconcile",
            Self::Paid { .. } => "paid",
            Self::SideEffect { .. } => "side_effect",
            Self::DirectorySync { .. } => "directory_sync",
            Self::Notification { .. } => "notification",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub transaction_id: Option<Uuid>,
    pub payload: JobPayload,
    /// Enqueueing twice with the same key is a no-op.
    pub dedupe_key: String,
    pub max_attempts: i32,
    /// Seconds before the job becomes due.
    pub delay_secs: i64,
}

impl NewJob {
    pub fn new(transaction_id: Option<Uuid>, payload: JobPayload, dedupe_key: String) -> Self {
        Self {
            transaction_id,
            payload,
            dedupe_key,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_secs: 0,
        }
    }

    pub fn paid_followup(transaction_id: Uuid) -> Self {
        Self {
            delay_secs: PAID_FOLLOWUP_DELAY_SECS,
            ..Self::new(
                Some(transaction_id),
                JobPayload::Paid { transaction_id },
                paid_followup_key(transaction_id),
            )
        }
    }
}

pub fn paid_followup_key(transaction_id: Uuid) -> String {
    format!("paid:{transaction_id}")
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub payload: JobPayload,
    pub dedupe_key: String,
    pub attempts: i32,
    pub max_attempts: i32,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFate {
    Retrying,
    DeadLettered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Seconds until the next attempt after `attempts` failures.
pub fn backoff_secs(attempts: i32) -> i64 {
    1_i64 << attempts.clamp(0, 16)
}
