//! In-process stores. Used when no `DATABASE_URL` is configured and by the
//! test-suite. Every operation takes the lock once, so each call is atomic
//! exactly like the single conditional statements of the Postgres stores.

use {
    crate::domain::{
        audit::NewAuditEntry,
        coupon::Coupon,
        error::PipelineError,
        id::ProviderPaymentId,
        money::MoneyAmount,
        notification::Notification,
        outbox::{Job, JobFate, JobStatus, NewJob, backoff_secs},
        ports::{
            BoxFuture, ContentStore, ContentUser, CouponRedemption, CouponStore, Notifier,
            OutboxStore, PaymentSettings, RegistrationContact, RegistrationPatch,
            TransactionStore,
        },
        pricing::TripQuote,
        ticket::{Participant, Ticket},
        transaction::{
            ApprovalStatus, CustomerDetails, NewTransaction, PaymentStatus, RegistrationKind,
            RegistrationRef,
            Transaction, TransactionFilter, TransactionPatch, TransitionDecision,
            TransitionOutcome, decide_transition,
        },
    },
    chrono::{DateTime, Duration, Utc},
    std::{
        collections::{HashMap, HashSet},
        future::ready,
        sync::{Mutex, MutexGuard},
    },
    uuid::Uuid,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub entity_id: Uuid,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
}

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<Uuid, Transaction>,
    coupons: HashMap<Uuid, Coupon>,
    audit: Vec<AuditRecord>,
    audit_keys: HashSet<String>,
    jobs: Vec<JobRecord>,
}

impl LedgerState {
    fn audit(&mut self, entry: NewAuditEntry) {
        if self.audit_keys.insert(entry.dedupe_key) {
            self.audit.push(AuditRecord {
                entity_id: entry.entity_id,
                action: entry.action,
                actor: entry.actor,
                detail: entry.detail,
            });
        }
    }

    fn push_job(&mut self, job: NewJob) -> bool {
        if self.jobs.iter().any(|r| r.job.dedupe_key == job.dedupe_key) {
            return false;
        }
        let now = Utc::now();
        self.jobs.push(JobRecord {
            job: Job {
                id: Uuid::now_v7(),
                transaction_id: job.transaction_id,
                payload: job.payload,
                dedupe_key: job.dedupe_key,
                attempts: 0,
                max_attempts: job.max_attempts,
            },
            status: JobStatus::Pending,
            scheduled_at: now + Duration::seconds(job.delay_secs),
            updated_at: now,
            last_error: None,
        });
        true
    }

    fn redeem(&mut self, transaction_id: Uuid, code: &str) -> Result<CouponRedemption, PipelineError> {
        let t = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| PipelineError::NotFound(format!("transaction {transaction_id}")))?;
        if t.coupon_redeemed {
            return Ok(CouponRedemption::AlreadyRedeemed);
        }
        t.coupon_redeemed = true;

        let coupon_id = self
            .coupons
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .map(|c| c.id);
        Ok(match coupon_id {
            None => CouponRedemption::UnknownCode,
            Some(id) if self.increment(id) => CouponRedemption::Redeemed,
            Some(_) => CouponRedemption::Exhausted,
        })
    }

    fn increment(&mut self, coupon_id: Uuid) -> bool {
        match self.coupons.get_mut(&coupon_id) {
            Some(c) if c.usage_limit.is_none_or(|limit| c.usage_count < limit) => {
                c.usage_count += 1;
                true
            }
            _ => false,
        }
    }
}

/// Ledger, coupons and outbox in one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_coupon(&self, coupon: Coupon) {
        locked(&self.state).coupons.insert(coupon.id, coupon);
    }

    pub fn coupon(&self, id: Uuid) -> Option<Coupon> {
        locked(&self.state).coupons.get(&id).cloned()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        locked(&self.state).transactions.values().cloned().collect()
    }

    pub fn audit_for(&self, id: Uuid) -> Vec<AuditRecord> {
        locked(&self.state)
            .audit
            .iter()
            .filter(|a| a.entity_id == id)
            .cloned()
            .collect()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        locked(&self.state).jobs.clone()
    }

    /// Makes every pending job due now, skipping backoff.
    pub fn expedite_jobs(&self) {
        let now = Utc::now();
        for record in locked(&self.state).jobs.iter_mut() {
            if record.status == JobStatus::Pending {
                record.scheduled_at = now;
            }
        }
    }

    /// Ages a row so orphan sweeps pick it up.
    pub fn backdate(&self, id: Uuid, by: Duration) {
        if let Some(t) = locked(&self.state).transactions.get_mut(&id) {
            t.created_at -= by;
        }
    }
}

impl TransactionStore for MemoryStore {
    fn create(
        &self,
        new: NewTransaction,
        actor: &str,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        let transaction = new.into_transaction(Utc::now());
        let mut state = locked(&self.state);
        state.audit(NewAuditEntry::transaction(
            transaction.id,
            format!("created:{}", transaction.id),
            "created",
            actor,
            serde_json::json!({
                "amount": transaction.amount.to_string(),
                "approval_status": transaction.approval_status.as_str(),
            }),
        ));
        state.transactions.insert(transaction.id, transaction.clone());
        Box::pin(ready(Ok(transaction)))
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>> {
        let found = locked(&self.state).transactions.get(&id).cloned();
        Box::pin(ready(Ok(found)))
    }

    fn find_by_provider_id(
        &self,
        provider_id: &ProviderPaymentId,
    ) -> BoxFuture<'_, Result<Option<Transaction>, PipelineError>> {
        let found = locked(&self.state)
            .transactions
            .values()
            .find(|t| t.provider_payment_id.as_ref() == Some(provider_id))
            .cloned();
        Box::pin(ready(Ok(found)))
    }

    fn patch(
        &self,
        id: Uuid,
        patch: TransactionPatch,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        let mut state = locked(&self.state);
        let result = match state.transactions.get_mut(&id) {
            Some(t) => {
                patch.apply_to(t);
                Ok(t.clone())
            }
            None => Err(PipelineError::NotFound(format!("transaction {id}"))),
        };
        if let (Ok(_), Some(stage)) = (&result, patch.provisioning) {
            state.audit(NewAuditEntry::provisioning(id, stage));
        }
        Box::pin(ready(result))
    }

    fn transition(
        &self,
        id: Uuid,
        to: PaymentStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<TransitionOutcome, PipelineError>> {
        let mut state = locked(&self.state);
        let Some(t) = state.transactions.get_mut(&id) else {
            return Box::pin(ready(Err(PipelineError::NotFound(format!(
                "transaction {id}"
            )))));
        };

        let from = t.payment_status;
        let outcome = match decide_transition(from, to) {
            TransitionDecision::Advance => {
                t.payment_status = to;
                if to == PaymentStatus::Paid {
                    t.paid_at = Some(Utc::now());
                }
                TransitionOutcome::Applied(t.clone())
            }
            TransitionDecision::SameStatus => TransitionOutcome::AlreadyInState(t.clone()),
            TransitionDecision::Anomaly => TransitionOutcome::Rejected {
                transaction: t.clone(),
                attempted: to,
            },
        };

        let entry = match &outcome {
            TransitionOutcome::Applied(_) => Some(NewAuditEntry::transaction(
                id,
                format!("transition:{id}:{to}"),
                "status_changed",
                actor,
                serde_json::json!({"old_status": from.as_str(), "new_status": to.as_str()}),
            )),
            TransitionOutcome::Rejected { .. } => Some(NewAuditEntry::transaction(
                id,
                format!("anomaly:{id}:{to}"),
                "anomaly",
                actor,
                serde_json::json!({"current_status": from.as_str(), "incoming_status": to.as_str()}),
            )),
            TransitionOutcome::AlreadyInState(_) => None,
        };
        if let Some(entry) = entry {
            state.audit(entry);
        }
        if matches!(outcome, TransitionOutcome::Applied(_)) && to == PaymentStatus::Paid {
            state.push_job(NewJob::paid_followup(id));
        }
        Box::pin(ready(Ok(outcome)))
    }

    fn decide_approval(
        &self,
        id: Uuid,
        to: ApprovalStatus,
        actor: &str,
    ) -> BoxFuture<'_, Result<Transaction, PipelineError>> {
        let mut state = locked(&self.state);
        let result = match state.transactions.get_mut(&id) {
            None => Err(PipelineError::NotFound(format!("transaction {id}"))),
            Some(t) if t.approval_status != ApprovalStatus::Pending => {
                Err(PipelineError::InvalidState(format!(
                    "transaction {id} is already {}",
                    t.approval_status
                )))
            }
            Some(t) => {
                t.approval_status = to;
                t.decided_by = Some(actor.to_string());
                t.decided_at = Some(Utc::now());
                Ok(t.clone())
            }
        };
        if result.is_ok() {
            state.audit(NewAuditEntry::transaction(
                id,
                format!("approval:{id}"),
                "approval_decided",
                actor,
                serde_json::json!({"approval_status": to.as_str()}),
            ));
        }
        Box::pin(ready(result))
    }

    fn list(
        &self,
        filter: TransactionFilter,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>> {
        let mut rows: Vec<Transaction> = locked(&self.state)
            .transactions
            .values()
            .filter(|t| filter.approval_status.is_none_or(|s| t.approval_status == s))
            .filter(|t| filter.product_type.is_none_or(|p| t.product_type == p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        rows.truncate(limit as usize);
        Box::pin(ready(Ok(rows)))
    }

    fn stale_orphans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<Uuid>, PipelineError>> {
        let ids = locked(&self.state)
            .transactions
            .values()
            .filter(|t| {
                t.payment_status == PaymentStatus::Open
                    && t.provider_payment_id.is_none()
                    && t.created_at < cutoff
            })
            .map(|t| t.id)
            .collect();
        Box::pin(ready(Ok(ids)))
    }
}

impl CouponStore for MemoryStore {
    fn find_by_code(&self, code: &str) -> BoxFuture<'_, Result<Option<Coupon>, PipelineError>> {
        let found = locked(&self.state)
            .coupons
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned();
        Box::pin(ready(Ok(found)))
    }

    fn redeem_for_transaction(
        &self,
        transaction_id: Uuid,
        code: &str,
    ) -> BoxFuture<'_, Result<CouponRedemption, PipelineError>> {
        let result = locked(&self.state).redeem(transaction_id, code);
        Box::pin(ready(result))
    }
}

impl OutboxStore for MemoryStore {
    fn enqueue(&self, job: NewJob) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(ready(Ok(locked(&self.state).push_job(job))))
    }

    fn claim(&self, limit: i64) -> BoxFuture<'_, Result<Vec<Job>, PipelineError>> {
        let now = Utc::now();
        let mut state = locked(&self.state);
        let mut due: Vec<&mut JobRecord> = state
            .jobs
            .iter_mut()
            .filter(|r| r.status == JobStatus::Pending && r.scheduled_at <= now)
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        let claimed = due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|r| {
                r.status = JobStatus::Processing;
                r.updated_at = now;
                r.job.clone()
            })
            .collect();
        Box::pin(ready(Ok(claimed)))
    }

    fn complete(&self, id: Uuid) -> BoxFuture<'_, Result<(), PipelineError>> {
        if let Some(r) = locked(&self.state).jobs.iter_mut().find(|r| r.job.id == id) {
            r.status = JobStatus::Completed;
            r.updated_at = Utc::now();
        }
        Box::pin(ready(Ok(())))
    }

    fn complete_by_key(&self, dedupe_key: &str) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let mut state = locked(&self.state);
        let record = state
            .jobs
            .iter_mut()
            .find(|r| r.job.dedupe_key == dedupe_key && r.status == JobStatus::Pending);
        let completed = match record {
            Some(r) => {
                r.status = JobStatus::Completed;
                r.updated_at = Utc::now();
                true
            }
            None => false,
        };
        Box::pin(ready(Ok(completed)))
    }

    fn fail(&self, id: Uuid, error: &str) -> BoxFuture<'_, Result<JobFate, PipelineError>> {
        let now = Utc::now();
        let mut state = locked(&self.state);
        let Some(r) = state.jobs.iter_mut().find(|r| r.job.id == id) else {
            return Box::pin(ready(Err(PipelineError::NotFound(format!("job {id}")))));
        };
        r.job.attempts += 1;
        r.last_error = Some(error.to_string());
        r.updated_at = now;
        let fate = if r.job.attempts >= r.job.max_attempts {
            r.status = JobStatus::Failed;
            JobFate::DeadLettered
        } else {
            r.status = JobStatus::Pending;
            r.scheduled_at = now + Duration::seconds(backoff_secs(r.job.attempts));
            JobFate::Retrying
        };
        Box::pin(ready(Ok(fate)))
    }

    fn reap_stale(&self) -> BoxFuture<'_, Result<u64, PipelineError>> {
        let cutoff = Utc::now() - Duration::minutes(2);
        let mut reaped = 0;
        for r in locked(&self.state).jobs.iter_mut() {
            if r.status == JobStatus::Processing && r.updated_at < cutoff {
                r.status = JobStatus::Pending;
                r.updated_at = Utc::now();
                reaped += 1;
            }
        }
        Box::pin(ready(Ok(reaped)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub contact: RegistrationContact,
    pub listed_price: Option<MoneyAmount>,
    pub payment_status: Option<String>,
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub full_payment_paid_at: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
    pub trip: Option<TripQuote>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberRecord {
    pub user: ContentUser,
    pub customer: CustomerDetails,
    pub committee: bool,
    pub membership_expires_at: Option<DateTime<Utc>>,
    pub bearer: Option<String>,
}

#[derive(Default)]
struct ContentState {
    registrations: HashMap<RegistrationRef, Registration>,
    users: Vec<MemberRecord>,
    tickets: Vec<Ticket>,
    settings: PaymentSettings,
}

/// Content store with seeded fixtures.
#[derive(Default)]
pub struct MemoryContentStore {
    state: Mutex<ContentState>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_registration(&self, registration: RegistrationRef, data: Registration) {
        locked(&self.state).registrations.insert(registration, data);
    }

    pub fn add_user(&self, record: MemberRecord) {
        locked(&self.state).users.push(record);
    }

    pub fn registration(&self, registration: &RegistrationRef) -> Option<Registration> {
        locked(&self.state).registrations.get(registration).cloned()
    }

    pub fn users(&self) -> Vec<MemberRecord> {
        locked(&self.state).users.clone()
    }

    pub fn all_tickets(&self) -> Vec<Ticket> {
        locked(&self.state).tickets.clone()
    }

    fn missing(registration: &RegistrationRef) -> PipelineError {
        PipelineError::NotFound(format!(
            "{} {}",
            registration.kind.collection(),
            registration.id
        ))
    }
}

impl ContentStore for MemoryContentStore {
    fn user_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>> {
        let found = locked(&self.state)
            .users
            .iter()
            .find(|u| {
                u.user
                    .email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|u| u.user.clone());
        Box::pin(ready(Ok(found)))
    }

    fn current_user(
        &self,
        bearer: &str,
    ) -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>> {
        let found = locked(&self.state)
            .users
            .iter()
            .find(|u| u.bearer.as_deref() == Some(bearer))
            .map(|u| u.user.clone());
        Box::pin(ready(Ok(found)))
    }

    fn is_committee_member(&self, user_id: &str) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let committee = locked(&self.state)
            .users
            .iter()
            .any(|u| u.user.id == user_id && u.committee);
        Box::pin(ready(Ok(committee)))
    }

    fn trip_quote(
        &self,
        signup_id: &str,
    ) -> BoxFuture<'_, Result<Option<TripQuote>, PipelineError>> {
        let quote = locked(&self.state)
            .registrations
            .iter()
            .find(|(r, _)| r.kind == RegistrationKind::TripSignup && r.id == signup_id)
            .and_then(|(_, data)| data.trip.clone());
        Box::pin(ready(Ok(quote)))
    }

    fn listed_price(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<Option<MoneyAmount>, PipelineError>> {
        let price = locked(&self.state)
            .registrations
            .get(registration)
            .and_then(|r| r.listed_price);
        Box::pin(ready(Ok(price)))
    }

    fn patch_registration(
        &self,
        registration: &RegistrationRef,
        patch: RegistrationPatch,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mut state = locked(&self.state);
        let result = match state.registrations.get_mut(registration) {
            None => Err(Self::missing(registration)),
            Some(r) => {
                match patch {
                    RegistrationPatch::Paid => r.payment_status = Some("paid".into()),
                    RegistrationPatch::DepositPaid { at } => r.deposit_paid_at = Some(at),
                    RegistrationPatch::FullPaymentPaid { at } => {
                        r.full_payment_paid_at = Some(at)
                    }
                }
                Ok(())
            }
        };
        Box::pin(ready(result))
    }

    fn registration_contact(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<RegistrationContact, PipelineError>> {
        let result = locked(&self.state)
            .registrations
            .get(registration)
            .map(|r| r.contact.clone())
            .ok_or_else(|| Self::missing(registration));
        Box::pin(ready(result))
    }

    fn pub_crawl_participants(
        &self,
        signup_id: &str,
    ) -> BoxFuture<'_, Result<Vec<Participant>, PipelineError>> {
        let participants = locked(&self.state)
            .registrations
            .iter()
            .find(|(r, _)| {
                r.kind == RegistrationKind::PubCrawlSignup
                    && r.id == signup_id
            })
            .map(|(_, data)| data.participants.clone())
            .unwrap_or_default();
        Box::pin(ready(Ok(participants)))
    }

    fn tickets_for(&self, signup_id: &str) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>> {
        let tickets = locked(&self.state)
            .tickets
            .iter()
            .filter(|t| t.signup_id == signup_id)
            .cloned()
            .collect();
        Box::pin(ready(Ok(tickets)))
    }

    fn create_ticket(&self, ticket: &Ticket) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mut state = locked(&self.state);
        let result = if state.tickets.iter().any(|t| t.key() == ticket.key()) {
            Err(PipelineError::InvalidState(format!(
                "ticket {}#{} already issued",
                ticket.signup_id, ticket.participant_index
            )))
        } else {
            state.tickets.push(ticket.clone());
            Ok(())
        };
        Box::pin(ready(result))
    }

    fn create_user_record(
        &self,
        customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<String, PipelineError>> {
        let id = Uuid::now_v7().to_string();
        locked(&self.state).users.push(MemberRecord {
            user: ContentUser {
                id: id.clone(),
                email: customer.email.clone(),
                identity_id: None,
            },
            customer: customer.clone(),
            ..Default::default()
        });
        Box::pin(ready(Ok(id)))
    }

    fn link_identity(
        &self,
        user_id: &str,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mut state = locked(&self.state);
        let result = match state.users.iter_mut().find(|u| u.user.id == user_id) {
            Some(u) => {
                u.user.identity_id = Some(identity_id.to_string());
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("user {user_id}"))),
        };
        Box::pin(ready(result))
    }

    fn set_membership_expiry(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mut state = locked(&self.state);
        let result = match state.users.iter_mut().find(|u| u.user.id == user_id) {
            Some(u) => {
                u.membership_expires_at = Some(expires_at);
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("user {user_id}"))),
        };
        Box::pin(ready(result))
    }

    fn payment_settings(&self) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>> {
        let settings = locked(&self.state).settings;
        Box::pin(ready(Ok(settings)))
    }

    fn update_payment_settings(
        &self,
        settings: PaymentSettings,
    ) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>> {
        locked(&self.state).settings = settings;
        Box::pin(ready(Ok(settings)))
    }
}

/// Notifier that only logs; standalone mode has nowhere to send mail.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> BoxFuture<'_, Result<(), PipelineError>> {
        tracing::info!(to = %notification.to, subject = %notification.subject, "notification (not delivered, standalone mode)");
        Box::pin(ready(Ok(())))
    }
}
