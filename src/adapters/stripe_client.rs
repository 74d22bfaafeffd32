use {
    crate::domain::{
        error::PipelineError,
        id::ProviderPaymentId,
        money::MoneyAmount,
        ports::BoxFuture,
        provider::{
            CheckoutIntent, FetchedPayment, IntentRequest, PaymentMetadata, PaymentProvider,
            ProviderStatus,
        },
    },
    std::{future::Future, time::Duration},
    stripe::{CheckoutSessionPaymentStatus, CheckoutSessionStatus, PaymentIntentStatus},
};

const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Stripe Checkout as the payment gateway.
pub struct StripeProvider {
    client: stripe::Client,
}

impl StripeProvider {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
        }
    }
}

impl PaymentProvider for StripeProvider {
    fn create_intent(
        &self,
        request: IntentRequest,
    ) -> BoxFuture<'_, Result<CheckoutIntent, PipelineError>> {
        Box::pin(async move { self.create_session(request).await })
    }

    fn fetch_by_id(
        &self,
        id: &ProviderPaymentId,
    ) -> BoxFuture<'_, Result<FetchedPayment, PipelineError>> {
        let id = id.clone();
        Box::pin(async move { self.retrieve_session(&id).await })
    }
}

impl StripeProvider {
    async fn create_session(&self, request: IntentRequest) -> Result<CheckoutIntent, PipelineError> {
        let metadata = request.metadata.to_map();
        let reference = request.metadata.transaction_id.map(|id| id.to_string());

        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(stripe::CheckoutSessionMode::Payment);
        params.success_url = Some(request.redirect_url.as_str());
        params.cancel_url = Some(request.redirect_url.as_str());
        params.client_reference_id = reference.as_deref();
        params.customer_email = request.metadata.customer.email.as_deref();
        params.metadata = Some(metadata);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency: stripe::Currency::EUR,
                unit_amount: Some(request.amount.cents()),
                product_data: Some(stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.description.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = bounded(stripe::CheckoutSession::create(&self.client, params)).await?;
        let checkout_url = session
            .url
            .ok_or_else(|| PipelineError::Provider("checkout session without url".into()))?;
        Ok(CheckoutIntent {
            provider_id: ProviderPaymentId::new(session.id.to_string())?,
            checkout_url,
        })
    }

    async fn retrieve_session(&self, id: &ProviderPaymentId) -> Result<FetchedPayment, PipelineError> {
        let session_id = id
            .as_str()
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| PipelineError::Validation(format!("invalid checkout session id: {e}")))?;
        // The intent carries the failure and cancellation the session hides.
        let session = bounded(stripe::CheckoutSession::retrieve(
            &self.client,
            &session_id,
            &["payment_intent"],
        ))
        .await?;
        let intent_status = match &session.payment_intent {
            Some(stripe::Expandable::Object(intent)) => Some(intent.status),
            _ => None,
        };

        let metadata = session
            .metadata
            .as_ref()
            .map(PaymentMetadata::from_map)
            .unwrap_or_default();
        Ok(FetchedPayment {
            provider_id: id.clone(),
            status: convert_session_status(session.status, session.payment_status, intent_status),
            amount: convert_amount(session.amount_total.unwrap_or(0))?,
            metadata,
        })
    }
}

/// Runs a Stripe call under the per-call deadline.
async fn bounded<T>(
    call: impl Future<Output = Result<T, stripe::StripeError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(CALL_TIMEOUT, call).await {
        Ok(result) => result.map_err(convert_error),
        Err(_) => Err(PipelineError::GatewayUnavailable(format!(
            "stripe call timed out after {}s",
            CALL_TIMEOUT.as_secs()
        ))),
    }
}

/// 4xx is the provider refusing the request; everything else is transient.
fn convert_error(e: stripe::StripeError) -> PipelineError {
    match e {
        stripe::StripeError::Stripe(req) if (400..500).contains(&req.http_status) => {
            PipelineError::Provider(format!(
                "Stripe API {}: {}",
                req.http_status,
                req.message.unwrap_or_default()
            ))
        }
        other => PipelineError::GatewayUnavailable(format!("Stripe API: {other}")),
    }
}

pub fn convert_amount(amount: i64) -> Result<MoneyAmount, PipelineError> {
    if amount < 0 {
        return Err(PipelineError::Validation("negative amount".into()));
    }
    MoneyAmount::new(amount)
}

/// Session state first; the expanded intent decides between pending,
/// failed and canceled once the customer has submitted.
pub fn convert_session_status(
    status: Option<CheckoutSessionStatus>,
    payment: CheckoutSessionPaymentStatus,
    intent: Option<PaymentIntentStatus>,
) -> ProviderStatus {
    match (status, payment, intent) {
        (_, CheckoutSessionPaymentStatus::NoPaymentRequired, _) => ProviderStatus::Paid,
        (Some(CheckoutSessionStatus::Complete), CheckoutSessionPaymentStatus::Paid, _) => {
            ProviderStatus::Paid
        }
        (Some(CheckoutSessionStatus::Expired), _, _) => ProviderStatus::Expired,
        (_, _, Some(PaymentIntentStatus::Canceled)) => ProviderStatus::Canceled,
        (
            Some(CheckoutSessionStatus::Complete),
            _,
            Some(PaymentIntentStatus::RequiresPaymentMethod),
        ) => ProviderStatus::Failed,
        (Some(CheckoutSessionStatus::Complete), _, _) => ProviderStatus::Pending,
        _ => ProviderStatus::Open,
    }
}

/// A verified Stripe notification that concerns a checkout session.
#[derive(Debug, Clone)]
pub struct SessionNotification {
    pub event_id: String,
    pub event_type: String,
    pub session_id: ProviderPaymentId,
}

/// Verifies the signature and pulls out the session id. Events about other
/// objects come back as `None`; the body is never trusted beyond the id.
pub fn verify_notification(
    body: &str,
    signature: &str,
    secret: &str,
) -> Result<Option<SessionNotification>, PipelineError> {
    let event = stripe::Webhook::construct_event(body, signature, secret)
        .map_err(|e| PipelineError::WebhookSignature(e.to_string()))?;
    let event_type = event.type_.to_string();
    match event.data.object {
        stripe::EventObject::CheckoutSession(session) => Ok(Some(SessionNotification {
            event_id: event.id.to_string(),
            event_type,
            session_id: ProviderPaymentId::new(session.id.to_string())?,
        })),
        _ => Ok(None),
    }
}
