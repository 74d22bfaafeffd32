//! Seams between the services and the outside world. Each trait has a
//! Postgres or HTTP implementation under `infra` and an in-memory one used
//! in standalone mode and tests.

use {
    super::coupon::Coupon,
    super::error::PipelineError,
    super::id::ProviderPaymentId,
    super::money::MoneyAmount,
    super::notification::{Credentials, Notification},
    super::outbox::{Job, JobFate, NewJob},
    super::pricing::TripQuote,
    super::ticket::{Participant, Ticket},
    super::transaction::{
        ApprovalStatus, CustomerDetails, NewTransaction, PaymentStatus, RegistrationRef,
        Transaction, TransactionFilter, TransactionPatch, TransitionOutcome,
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{future::Future, pin::Pin},
    uuid::Uuid,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait TransactionStore: Send + Sync {
    fn create(&self, new: NewTransaction, actor: &str)
    -> BoxFuture<'_, Result<Transaction, PipelineError>>;

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>>;

    fn find_by_provider_id(
        &self,
        provider_id: &ProviderPaymentId,
    ) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>>;

    fn patch(
        &self,
        id: Uuid,
        patch: TransactionPatch,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>>;

    /// The only way `payment_status` changes. Conditional on the stored row
    /// still being `open`, so exactly one caller ever gets `Applied` for a
    /// given transaction, across processes.
    fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<TransitionOutcome, PipelineError>>;

    /// `pending → approved | rejected`. Anything else is `InvalidState`.
    fn decide_approval(
        &self,
        id: Uuid,
        to: ApprovalStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>>;

    fn list(
        &self,
        filter: TransactionFilter,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>>;

    /// `open` rows that never got a provider id and were created before `cutoff`.
    fn stale_orphans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Uuid>, PipelineError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRedemption {
    Redeemed,
    /// This transaction already counted its coupon.
    AlreadyRedeemed,
    /// The limit was reached between checkout and payment.
    Exhausted,
    UnknownCode,
}

pub trait CouponStore: Send + Sync {
    fn find_by_code(&self, code: &str) -> BoxFuture<'_, Result<Option<Coupon>, PipelineError>>;

    /// Marks the transaction's coupon as counted and increments usage, as one
    /// atomic unit: `usage_count = usage_count + 1 WHERE usage_count <
    /// usage_limit`. Safe to call repeatedly for the same transaction.
    fn redeem_for_transaction(
        &self,
        transaction_id: Uuid,
        code: &str,
    ) -> BoxFuture<'_, Result<CouponRedemption, PipelineError>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUser {
    pub id: String,
    pub email: Option<String>,
    /// Link to the external identity; admins always have one.
    pub identity_id: Option<String>,
}

/// Contact data of a registration, for confirmation mail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationContact {
    pub email: Option<String>,
    pub participant_name: Option<String>,
    pub qr_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPatch {
    Paid,
    DepositPaid { at: DateTime<Utc> },
    FullPaymentPaid { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettings {
    pub manual_approval: bool,
}

/// Externally owned records: registrations, users, tickets, settings.
/// The core patches these; it never creates or deletes registrations.
pub trait ContentStore: Send + Sync {
    fn user_by_email(&self, email: &str)
    -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>>;

    fn current_user(&self, bearer: &str)
    -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>>;

    fn is_committee_member(&self, user_id: &str) -> BoxFuture<'_, Result<bool, PipelineError>>;

    fn trip_quote(&self, signup_id: &str)
    -> BoxFuture<'_, Result<Option<TripQuote>, PipelineError>>;

    /// Price listed on the registration's event, if the event has one.
    fn listed_price(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<Option<MoneyAmount>, PipelineError>>;

    fn patch_registration(
        &self,
        registration: &RegistrationRef,
        patch: RegistrationPatch,
    ) -> BoxFuture<'_, Result<(), PipelineError>>;

    fn registration_contact(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<RegistrationContact, PipelineError>>;

    fn pub_crawl_participants(
        &self,
        signup_id: &str,
    ) -> BoxFuture<'_, Result<Vec<Participant>, PipelineError>>;

    fn tickets_for(&self, signup_id: &str) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>>;

    fn create_ticket(&self, ticket: &Ticket) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Creates the member's user record; returns its id.
    fn create_user_record(
        &self,
        customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<String, PipelineError>>;

    fn link_identity(
        &self,
        user_id: &str,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<(), PipelineError>>;

    fn set_membership_expiry(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>>;

    fn payment_settings(&self) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>>;

    fn update_payment_settings(
        &self,
        settings: PaymentSettings,
    ) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>>;
}

pub trait MembershipService: Send + Sync {
    /// Activates/extends an existing member account.
    fn provision(&self, user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Creates the external identity for a new member.
    fn create_account(
        &self,
        customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<Credentials, PipelineError>>;
}

pub trait DirectorySync: Send + Sync {
    fn sync(&self, user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>>;
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> BoxFuture<'_, Result<(), PipelineError>>;
}

pub trait OutboxStore: Send + Sync {
    /// `true` if inserted, `false` if a job with the same dedupe key exists.
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>>;

    /// Claims up to `limit` due jobs for this worker.
    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>>;

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// Completes the still-pending job with this dedupe key, if any.
    fn complete_by_key(&self, dedupe_key: &str) -> BoxFuture<'_, Result<bool, PipelineError>>;

    fn fail(&self, id: Uuid, error: &str) -> BoxFuture<'_, Result<JobFate, PipelineError>>;

    /// Puts jobs stuck in `processing` back to `pending`.
    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>>;
}
