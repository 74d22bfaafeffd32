use {
    super::error::PipelineError,
    super::id::ProviderPaymentId,
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

macro_rules! string_enum {
    ($name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl TryFrom<&str> for $name {
            type Error = PipelineError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(PipelineError::Validation(format!(
                        concat!("unknown ", $what, ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Open,
    Paid,
    Failed,
    Canceled,
    Expired,
}

string_enum!(PaymentStatus, "payment status" {
    Open => "open",
    Paid => "paid",
    Failed => "failed",
    Canceled => "canceled",
    Expired => "expired",
});

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Forward-only: `open` may move to any terminal status, nothing else moves.
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        matches!(self, Self::Open) && next.is_terminal()
    }
}

/// What applying an incoming status to a stored one amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Advance,
    /// Re-delivery of the status already stored.
    SameStatus,
    /// Attempt to move a terminal row somewhere else.
    Anomaly,
}

pub fn decide_transition(current: PaymentStatus, incoming: PaymentStatus) -> TransitionDecision {
    if current == incoming {
        TransitionDecision::SameStatus
    } else if current.can_transition_to(&incoming) {
        TransitionDecision::Advance
    } else {
        TransitionDecision::Anomaly
    }
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// This call moved the row; the caller owns the follow-up work.
    Applied(Transaction),
    AlreadyInState(Transaction),
    Rejected {
        transaction: Transaction,
        attempted: PaymentStatus,
    },
}

impl TransitionOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Applied(t) | Self::AlreadyInState(t) => t,
            Self::Rejected { transaction, .. } => transaction,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::AlreadyInState(_) => "noop",
            Self::Rejected { .. } => "anomaly",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    AutoApproved,
}

string_enum!(ApprovalStatus, "approval status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    AutoApproved => "auto_approved",
});

impl ApprovalStatus {
    pub fn permits_provisioning(&self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Production,
}

string_enum!(Environment, "environment" {
    Development => "development",
    Production => "production",
});

/// Which slice of a registration's price this payment covers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    Full,
    Deposit,
    Final,
}

string_enum!(PaymentType, "payment type" {
    Full => "full",
    Deposit => "deposit",
    Final => "final",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    EventSignup,
    PubCrawlSignup,
    TripSignup,
}

string_enum!(RegistrationKind, "registration type" {
    EventSignup => "event_signup",
    PubCrawlSignup => "pub_crawl_signup",
    TripSignup => "trip_signup",
});

impl RegistrationKind {
    /// Content-store collection holding this kind of signup.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::EventSignup => "event_signups",
            Self::PubCrawlSignup => "pub_crawl_signups",
            Self::TripSignup => "trip_signups",
        }
    }
}

/// The single registration a payment belongs to. One variant, so at most one
/// kind of reference can ever be set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationRef {
    pub kind: RegistrationKind,
    pub id: String,
}

impl RegistrationRef {
    pub fn new(kind: RegistrationKind, id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PipelineError::Validation("registration id is empty".into()));
        }
        Ok(Self { kind, id })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    MembershipNew,
    MembershipRenewal,
    Event,
    PubCrawl,
    Trip,
    AttentionRequired,
}

string_enum!(ProductType, "product type" {
    MembershipNew => "membership_new",
    MembershipRenewal => "membership_renewal",
    Event => "event",
    PubCrawl => "pub_crawl",
    Trip => "trip",
    AttentionRequired => "attention_required",
});

impl ProductType {
    pub fn derive(
        is_contribution: bool,
        has_user: bool,
        registration: Option<RegistrationKind>,
    ) -> Self {
        match (is_contribution, registration) {
            (true, _) if has_user => Self::MembershipRenewal,
            (true, _) => Self::MembershipNew,
            (false, Some(RegistrationKind::EventSignup)) => Self::Event,
            (false, Some(RegistrationKind::PubCrawlSignup)) => Self::PubCrawl,
            (false, Some(RegistrationKind::TripSignup)) => Self::Trip,
            (false, None) => Self::AttentionRequired,
        }
    }

    pub fn is_membership(&self) -> bool {
        matches!(self, Self::MembershipNew | Self::MembershipRenewal)
    }
}

/// Progress of account provisioning for a membership contribution. Each stage
/// is persisted before the next external call so a crash leaves a visible,
/// resumable state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    NotRequired,
    Awaiting,
    AccountCreated,
    IdentityCreated,
    Completed,
}

string_enum!(ProvisioningState, "provisioning state" {
    NotRequired => "not_required",
    Awaiting => "awaiting",
    AccountCreated => "account_created",
    IdentityCreated => "identity_created",
    Completed => "completed",
});

/// Identity fields supplied at checkout; used for guest account creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub phone_number: Option<String>,
}

impl CustomerDetails {
    /// Fills blanks from another source without overwriting what we already hold.
    pub fn or(self, other: CustomerDetails) -> CustomerDetails {
        CustomerDetails {
            email: self.email.or(other.email),
            first_name: self.first_name.or(other.first_name),
            last_name: self.last_name.or(other.last_name),
            date_of_birth: self.date_of_birth.or(other.date_of_birth),
            phone_number: self.phone_number.or(other.phone_number),
        }
    }

    pub fn has_full_name_and_email(&self) -> bool {
        [&self.first_name, &self.last_name, &self.email]
            .iter()
            .all(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: MoneyAmount,
    pub description: String,
    pub payment_status: PaymentStatus,
    pub approval_status: ApprovalStatus,
    pub environment: Environment,
    pub provider_payment_id: Option<ProviderPaymentId>,
    pub registration: Option<RegistrationRef>,
    pub payment_type: PaymentType,
    pub product_type: ProductType,
    pub user_id: Option<String>,
    pub customer: CustomerDetails,
    pub coupon_code: Option<String>,
    pub coupon_redeemed: bool,
    pub provisioning: ProvisioningState,
    pub account_record_id: Option<String>,
    pub identity_id: Option<String>,
    pub last_error: Option<String>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_membership(&self) -> bool {
        self.product_type.is_membership()
    }
}

/// Insert shape; the id is generated here with `Uuid::now_v7()`.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: Uuid,
    pub amount: MoneyAmount,
    pub description: String,
    pub approval_status: ApprovalStatus,
    pub environment: Environment,
    pub registration: Option<RegistrationRef>,
    pub payment_type: PaymentType,
    pub product_type: ProductType,
    pub user_id: Option<String>,
    pub customer: CustomerDetails,
    pub coupon_code: Option<String>,
}

impl NewTransaction {
    /// The row as it looks right after insert: open, no provider id yet.
    pub fn into_transaction(self, created_at: DateTime<Utc>) -> Transaction {
        let provisioning = if self.product_type.is_membership() {
            ProvisioningState::Awaiting
        } else {
            ProvisioningState::NotRequired
        };
        Transaction {
            id: self.id,
            amount: self.amount,
            description: self.description,
            payment_status: PaymentStatus::Open,
            approval_status: self.approval_status,
            environment: self.environment,
            provider_payment_id: None,
            registration: self.registration,
            payment_type: self.payment_type,
            product_type: self.product_type,
            user_id: self.user_id,
            customer: self.customer,
            coupon_code: self.coupon_code,
            coupon_redeemed: false,
            provisioning,
            account_record_id: None,
            identity_id: None,
            last_error: None,
            decided_by: None,
            decided_at: None,
            paid_at: None,
            created_at,
        }
    }
}

/// Partial update of ledger bookkeeping fields. Status columns are not here:
/// they only move through the conditional transition operations.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub provider_payment_id: Option<ProviderPaymentId>,
    pub user_id: Option<String>,
    pub provisioning: Option<ProvisioningState>,
    pub account_record_id: Option<String>,
    pub identity_id: Option<String>,
    /// `Some(None)` clears the error.
    pub last_error: Option<Option<String>>,
}

impl TransactionPatch {
    pub fn apply_to(&self, t: &mut Transaction) {
        if let Some(id) = &self.provider_payment_id {
            t.provider_payment_id = Some(id.clone());
        }
        if let Some(user_id) = &self.user_id {
            t.user_id = Some(user_id.clone());
        }
        if let Some(state) = self.provisioning {
            t.provisioning = state;
        }
        if let Some(id) = &self.account_record_id {
            t.account_record_id = Some(id.clone());
        }
        if let Some(id) = &self.identity_id {
            t.identity_id = Some(id.clone());
        }
        if let Some(err) = &self.last_error {
            t.last_error = err.clone();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub approval_status: Option<ApprovalStatus>,
    pub product_type: Option<ProductType>,
    pub limit: i64,
}
