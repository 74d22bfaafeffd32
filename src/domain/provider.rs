use {
    super::error::PipelineError,
    super::id::ProviderPaymentId,
    super::money::{Currency, MoneyAmount},
    super::ports::BoxFuture,
    super::transaction::{
        CustomerDetails, PaymentStatus, PaymentType, RegistrationKind, RegistrationRef,
    },
    std::collections::HashMap,
    uuid::Uuid,
};

/// Status vocabulary of the provider, before mapping to the ledger's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Open,
    Pending,
    Paid,
    Failed,
    Canceled,
    Expired,
}

impl ProviderStatus {
    /// Fixed mapping table. `None` means "not settled yet", no transition.
    pub fn internal(&self) -> Option<PaymentStatus> {
        match self {
            Self::Open | Self::Pending => None,
            Self::Paid => Some(PaymentStatus::Paid),
            Self::Failed => Some(PaymentStatus::Failed),
            Self::Canceled => Some(PaymentStatus::Canceled),
            Self::Expired => Some(PaymentStatus::Expired),
        }
    }
}

/// Everything we attach to a provider payment so the canonical object can
/// be tied back to the ledger and its registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub transaction_id: Option<Uuid>,
    pub payment_type: PaymentType,
    pub registration: Option<RegistrationRef>,
    pub user_id: Option<String>,
    pub customer: CustomerDetails,
    pub coupon_code: Option<String>,
}

impl PaymentMetadata {
    /// Flat string map, the lowest common denominator of provider metadata.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut put = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                map.insert(k.to_string(), v);
            }
        };
        put("transaction_id", self.transaction_id.map(|id| id.to_string()));
        put("payment_type", Some(self.payment_type.as_str().to_string()));
        put(
            "registration_type",
            self.registration.as_ref().map(|r| r.kind.as_str().to_string()),
        );
        put("registration_id", self.registration.as_ref().map(|r| r.id.clone()));
        put("user_id", self.user_id.clone());
        put("email", self.customer.email.clone());
        put("first_name", self.customer.first_name.clone());
        put("last_name", self.customer.last_name.clone());
        put("date_of_birth", self.customer.date_of_birth.clone());
        put("phone_number", self.customer.phone_number.clone());
        put("coupon_code", self.coupon_code.clone());
        map
    }

    /// Lenient: unknown or malformed entries are dropped, never fatal.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |k: &str| {
            map.get(k)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty() && *v != "null")
                .map(str::to_string)
        };
        let registration = match (get("registration_type"), get("registration_id")) {
            (Some(kind), Some(id)) => RegistrationKind::try_from(kind.as_str())
                .ok()
                .and_then(|kind| RegistrationRef::new(kind, id).ok()),
            _ => None,
        };
        Self {
            transaction_id: get("transaction_id").and_then(|s| s.parse().ok()),
            payment_type: get("payment_type")
                .and_then(|s| PaymentType::try_from(s.as_str()).ok())
                .unwrap_or_default(),
            registration,
            user_id: get("user_id"),
            customer: CustomerDetails {
                email: get("email"),
                first_name: get("first_name"),
                last_name: get("last_name"),
                date_of_birth: get("date_of_birth"),
                phone_number: get("phone_number"),
            },
            coupon_code: get("coupon_code"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub description: String,
    pub redirect_url: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone)]
pub struct CheckoutIntent {
    pub provider_id: ProviderPaymentId,
    pub checkout_url: String,
}

/// What the service layer gets back after fetching from the provider API.
#[derive(Debug, Clone)]
pub struct FetchedPayment {
    pub provider_id: ProviderPaymentId,
    pub status: ProviderStatus,
    pub amount: MoneyAmount,
    pub metadata: PaymentMetadata,
}

pub trait PaymentProvider: Send + Sync {
    /// Not idempotent on the provider side: callers must not retry blindly.
    fn create_intent(
        &self,
        request: IntentRequest,
    ) -> BoxFuture<'_, Result<CheckoutIntent, PipelineError>>;

    fn fetch_by_id(
        &self,
        id: &ProviderPaymentId,
    ) -> BoxFuture<'_, Result<FetchedPayment, PipelineError>>;
}
