//! Checkout: price the purchase, record it, then hand the buyer to the
//! gateway (or settle a free purchase on the spot).

use {
    super::{Pipeline, orchestrator},
    crate::domain::{
        approval,
        coupon::DiscountType,
        error::PipelineError,
        id::ProviderPaymentId,
        money::{Currency, MoneyAmount},
        pricing::{self, PricingBasis, TripQuote},
        provider::{IntentRequest, PaymentMetadata},
        transaction::{
            CustomerDetails, Environment, NewTransaction, PaymentStatus, PaymentType,
            ProductType, RegistrationKind, RegistrationRef, TransactionPatch, TransitionOutcome,
        },
    },
    chrono::Utc,
    reqwest::Url,
    serde::{Deserialize, Deserializer, Serialize},
    uuid::Uuid,
};

const ACTOR: &str = "checkout";

/// Accepts `"12"` as well as `12` for ids the content store hands out as numbers.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        Some(Raw::Text(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Raw::Int(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Client-side price. Only used when the server has no price of its own.
    pub amount: Option<MoneyAmount>,
    pub description: Option<String>,
    pub redirect_url: Option<String>,
    pub registration_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub registration_id: Option<String>,
    pub payment_type: Option<String>,
    #[serde(default)]
    pub is_contribution: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub phone_number: Option<String>,
    pub coupon_code: Option<String>,
    /// What the caller claims about its own origin. Informational only.
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub payment_id: String,
    pub transaction_id: Uuid,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Absolute http(s) URL on an allowed host (or a subdomain of one).
pub fn check_redirect(raw: &str, allowed_hosts: &[String]) -> Result<Url, PipelineError> {
    let url = Url::parse(raw)
        .map_err(|_| PipelineError::Validation("redirectUrl must be an absolute URL".into()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(
            "redirectUrl must use http or https".into(),
        ));
    }
    if allowed_hosts.is_empty() {
        return Ok(url);
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let allowed = allowed_hosts
        .iter()
        .any(|a| host == *a || host.ends_with(&format!(".{a}")));
    if !allowed {
        tracing::warn!(security = true, %host, "blocked redirect to foreign host");
        return Err(PipelineError::Validation(
            "redirectUrl host is not allowed".into(),
        ));
    }
    Ok(url)
}

fn with_params(mut url: Url, params: &[(&str, &str)]) -> String {
    url.query_pairs_mut().extend_pairs(params);
    url.to_string()
}

fn claimed_environment(raw: Option<&str>) -> Option<Environment> {
    match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        Some("production" | "prod") => Some(Environment::Production),
        Some("development" | "dev") => Some(Environment::Development),
        _ => None,
    }
}

/// Validated shape of a checkout request.
struct Order {
    hint: MoneyAmount,
    description: String,
    redirect: Url,
    registration: Option<RegistrationRef>,
    payment_type: PaymentType,
    is_contribution: bool,
    user_id: Option<String>,
    customer: CustomerDetails,
    coupon_code: Option<String>,
}

fn validate(req: &CheckoutRequest, allowed_hosts: &[String]) -> Result<Order, PipelineError> {
    let hint = req
        .amount
        .ok_or_else(|| PipelineError::Validation("amount is required".into()))?;
    let description = non_blank(&req.description)
        .ok_or_else(|| PipelineError::Validation("description is required".into()))?;
    let redirect_raw = non_blank(&req.redirect_url)
        .ok_or_else(|| PipelineError::Validation("redirectUrl is required".into()))?;
    let redirect = check_redirect(&redirect_raw, allowed_hosts)?;

    let registration = match (non_blank(&req.registration_type), &req.registration_id) {
        (Some(kind), Some(id)) => Some(RegistrationRef::new(
            RegistrationKind::try_from(kind.as_str())?,
            id.clone(),
        )?),
        (None, None) => None,
        _ => {
            return Err(PipelineError::Validation(
                "registrationType and registrationId go together".into(),
            ));
        }
    };
    if req.is_contribution && registration.is_some() {
        return Err(PipelineError::Validation(
            "a membership contribution cannot reference a registration".into(),
        ));
    }

    let payment_type = match non_blank(&req.payment_type) {
        Some(raw) => PaymentType::try_from(raw.as_str())?,
        None => PaymentType::Full,
    };
    let is_trip = registration
        .as_ref()
        .is_some_and(|r| r.kind == RegistrationKind::TripSignup);
    if payment_type != PaymentType::Full && !is_trip {
        return Err(PipelineError::Validation(format!(
            "payment type {payment_type} only applies to trip signups"
        )));
    }

    Ok(Order {
        hint,
        description,
        redirect,
        registration,
        payment_type,
        is_contribution: req.is_contribution,
        user_id: non_blank(&req.user_id),
        customer: CustomerDetails {
            email: non_blank(&req.email).map(|e| e.to_ascii_lowercase()),
            first_name: non_blank(&req.first_name),
            last_name: non_blank(&req.last_name),
            date_of_birth: non_blank(&req.date_of_birth),
            phone_number: non_blank(&req.phone_number),
        },
        coupon_code: non_blank(&req.coupon_code),
    })
}

async fn pricing_basis(p: &Pipeline, order: &Order) -> Result<PricingBasis, PipelineError> {
    let content = &p.ports.content;
    if order.is_contribution {
        let committee_member = match &order.user_id {
            Some(user_id) => content.is_committee_member(user_id).await?,
            None => false,
        };
        return Ok(PricingBasis::Contribution { committee_member });
    }

    let Some(registration) = &order.registration else {
        return Ok(PricingBasis::Hint);
    };
    if registration.kind == RegistrationKind::TripSignup {
        let quote = content
            .trip_quote(&registration.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("trip signup {}", registration.id)))?;
        return Ok(match order.payment_type {
            PaymentType::Deposit => PricingBasis::TripDeposit {
                deposit: quote.deposit,
            },
            PaymentType::Final => PricingBasis::TripFinal(quote),
            // Paying everything at once: nothing was deposited yet.
            PaymentType::Full => PricingBasis::TripFinal(TripQuote {
                deposit: MoneyAmount::ZERO,
                ..quote
            }),
        });
    }

    Ok(match content.listed_price(registration).await? {
        Some(price) => PricingBasis::Listed(price),
        None => PricingBasis::Hint,
    })
}

/// Creates the ledger row, then the provider intent. A zero amount settles
/// immediately through the same paid path the webhook uses.
#[tracing::instrument(
    name = "checkout",
    skip_all,
    fields(transaction_id = tracing::field::Empty, amount = tracing::field::Empty)
)]
pub async fn create_checkout(
    p: &Pipeline,
    req: CheckoutRequest,
) -> Result<CheckoutResponse, PipelineError> {
    let order = validate(&req, &p.settings.allowed_redirect_hosts)?;

    if order.is_contribution && order.user_id.is_none() {
        if let Some(email) = &order.customer.email {
            if p.ports.content.user_by_email(email).await?.is_some() {
                return Err(PipelineError::DuplicateIdentity(
                    "an account with this email already exists, log in to renew your membership"
                        .into(),
                ));
            }
        }
    }

    let basis = pricing_basis(p, &order).await?;
    let coupon = match &order.coupon_code {
        Some(code) => match p.ports.coupons.find_by_code(code).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%code, error = %e, "coupon lookup failed, ignoring coupon");
                None
            }
        },
        None => None,
    };
    let quote = pricing::calculate(
        order.hint,
        &basis,
        &p.settings.rates,
        coupon.as_ref(),
        Utc::now(),
    );
    if quote.amount != order.hint {
        tracing::info!(hint = %order.hint, amount = %quote.amount, "client amount overridden");
    }

    let manual_approval = match p.ports.content.payment_settings().await {
        Ok(settings) => settings.manual_approval,
        Err(e) => {
            tracing::warn!(error = %e, "payment settings unavailable, using configured default");
            p.settings.policy.manual_approval
        }
    };
    let policy = approval::PolicyConfig {
        manual_approval,
        ..p.settings.policy
    };
    let decision = approval::decide(&policy, claimed_environment(req.environment.as_deref()));

    let product_type = ProductType::derive(
        order.is_contribution,
        order.user_id.is_some(),
        order.registration.as_ref().map(|r| r.kind),
    );
    let transaction = p
        .ports
        .ledger
        .create(
            NewTransaction {
                id: Uuid::now_v7(),
                amount: quote.amount,
                description: order.description.clone(),
                approval_status: decision.status,
                environment: decision.environment,
                registration: order.registration.clone(),
                payment_type: order.payment_type,
                product_type,
                user_id: order.user_id.clone(),
                customer: order.customer.clone(),
                // Only a coupon that was actually applied gets counted later.
                coupon_code: quote.coupon_id.and(order.coupon_code.clone()),
            },
            ACTOR,
        )
        .await?;

    let span = tracing::Span::current();
    span.record("transaction_id", tracing::field::display(transaction.id));
    span.record("amount", tracing::field::display(transaction.amount));

    let transaction_id = transaction.id.to_string();

    if transaction.amount.is_zero() {
        let provider_id = ProviderPaymentId::synthesized();
        let transaction = p
            .ports
            .ledger
            .patch(
                transaction.id,
                TransactionPatch {
                    provider_payment_id: Some(provider_id.clone()),
                    ..Default::default()
                },
            )
            .await?;
        match p
            .ports
            .ledger
            .transition(transaction.id, PaymentStatus::Paid, ACTOR)
            .await?
        {
            TransitionOutcome::Applied(paid) => orchestrator::on_paid(p, &paid).await,
            other => tracing::warn!(outcome = other.label(), "free transaction did not settle"),
        }
        tracing::info!(%provider_id, "free checkout settled without gateway");
        return Ok(CheckoutResponse {
            checkout_url: with_params(
                order.redirect,
                &[("status", "paid"), ("transaction_id", &transaction_id)],
            ),
            payment_id: provider_id.into_inner(),
            transaction_id: transaction.id,
        });
    }

    let request = IntentRequest {
        amount: transaction.amount,
        currency: Currency::Eur,
        description: transaction.description.clone(),
        redirect_url: with_params(order.redirect, &[("transaction_id", &transaction_id)]),
        metadata: PaymentMetadata {
            transaction_id: Some(transaction.id),
            payment_type: transaction.payment_type,
            registration: transaction.registration.clone(),
            user_id: transaction.user_id.clone(),
            customer: transaction.customer.clone(),
            coupon_code: transaction.coupon_code.clone(),
        },
    };
    let intent = match p.ports.provider() {
        Ok(provider) => provider.create_intent(request).await,
        Err(e) => Err(e),
    };

    let intent = match intent {
        Ok(intent) => intent,
        Err(e) => {
            // The row stays open without a provider id; the orphan sweep expires it.
            let recorded = p
                .ports
                .ledger
                .patch(
                    transaction.id,
                    TransactionPatch {
                        last_error: Some(Some(format!("gateway: {e}"))),
                        ..Default::default()
                    },
                )
                .await;
            if let Err(patch_err) = recorded {
                tracing::error!(error = %patch_err, "could not record gateway failure");
            }
            return Err(e);
        }
    };

    p.ports
        .ledger
        .patch(
            transaction.id,
            TransactionPatch {
                provider_payment_id: Some(intent.provider_id.clone()),
                ..Default::default()
            },
        )
        .await?;

    tracing::info!(provider_id = %intent.provider_id, "checkout created");
    Ok(CheckoutResponse {
        checkout_url: intent.checkout_url,
        payment_id: intent.provider_id.into_inner(),
        transaction_id: transaction.id,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    pub valid: bool,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: String,
}

/// Pre-check for checkout forms. Checkout applies the same rules again.
pub async fn validate_coupon(p: &Pipeline, code: &str) -> Result<CouponValidation, PipelineError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(PipelineError::Validation("coupon code is required".into()));
    }
    let coupon = p
        .ports
        .coupons
        .find_by_code(code)
        .await?
        .ok_or_else(|| PipelineError::NotFound("invalid coupon code".into()))?;
    coupon
        .check(Utc::now())
        .map_err(|rejection| PipelineError::Validation(rejection.to_string()))?;
    Ok(CouponValidation {
        valid: true,
        code: coupon.code.clone(),
        discount_type: coupon.discount_type,
        discount_value: coupon.display_value(),
    })
}
