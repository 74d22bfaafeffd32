//! Routes and extractors.

use {
    crate::{
        AppState,
        adapters::{api_errors::ApiError, stripe_client},
        domain::{error::PipelineError, ports::PaymentSettings, transaction::Transaction},
        services::{
            admin::{self, Admin, ApprovalResponse, PendingQuery},
            checkout::{self, CheckoutRequest, CheckoutResponse, CouponValidation},
            reconciler,
        },
    },
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
        http::{HeaderMap, StatusCode, header, request::Parts},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    std::time::Duration,
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
    tracing::Instrument,
    uuid::Uuid,
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const BODY_LIMIT: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/payments", post(create_payment))
        .route("/payments/create", post(create_payment))
        .route("/coupons/validate", post(validate_coupon))
        .route("/admin/pending", get(list_pending))
        .route("/admin/approve/{id}", post(approve))
        .route("/admin/reject/{id}", post(reject))
        .route("/admin/settings", get(get_settings).post(update_settings))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        // Outside the timeout: a reconciliation runs to completion.
        .route("/payments/webhook", post(payment_webhook))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
}

/// An admin resolved from the `Authorization: Bearer` header.
pub struct AdminUser(pub Admin);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let admin = admin::authenticate(&state.pipeline, bearer(&parts.headers)).await?;
        Ok(Self(admin))
    }
}

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    if req.environment.is_none() {
        req.environment = headers
            .get("x-environment")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    let response = checkout::create_checkout(&state.pipeline, req).await?;
    Ok(Json(response))
}

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let secret = state
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| PipelineError::GatewayUnavailable("webhook secret not configured".into()))?;
    let sig = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PipelineError::WebhookSignature("missing Stripe-Signature header".into()))?;

    let Some(notification) = stripe_client::verify_notification(&body, sig, secret)? else {
        tracing::debug!("event without checkout session, ignored");
        return Ok(Json(serde_json::json!({"status": "ignored"})));
    };

    tracing::Span::current()
        .record("event_id", tracing::field::display(&notification.event_id))
        .record("event_type", tracing::field::display(&notification.event_type));

    // Spawned so a dropped connection cannot cancel a half-applied run.
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(
        async move {
            reconciler::handle_notification(
                &pipeline,
                &notification.session_id,
                &notification.event_id,
            )
            .await
        }
        .in_current_span(),
    );
    // A non-2xx answer makes Stripe redeliver the event.
    let status = task.await.map_err(|e| PipelineError::Upstream {
        service: "reconciler".into(),
        message: e.to_string(),
    })?;
    Ok(Json(serde_json::json!({"status": status})))
}

#[derive(Debug, Deserialize)]
struct CouponQuery {
    #[serde(default)]
    code: String,
}

async fn validate_coupon(
    State(state): State<AppState>,
    Json(query): Json<CouponQuery>,
) -> Result<Json<CouponValidation>, Response> {
    checkout::validate_coupon(&state.pipeline, &query.code)
        .await
        .map(Json)
        .map_err(|e| {
            let (status, _, message) = ApiError(e).parts();
            (status, Json(serde_json::json!({"valid": false, "error": message}))).into_response()
        })
}

async fn list_pending(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    Ok(Json(admin::list_pending(&state.pipeline, query).await?))
}

async fn approve(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    Ok(Json(admin::approve(&state.pipeline, &admin, id).await?))
}

async fn reject(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    Ok(Json(admin::reject(&state.pipeline, &admin, id).await?))
}

async fn get_settings(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<PaymentSettings>, ApiError> {
    Ok(Json(admin::settings(&state.pipeline).await?))
}

async fn update_settings(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(settings): Json<PaymentSettings>,
) -> Result<Json<PaymentSettings>, ApiError> {
    Ok(Json(admin::update_settings(&state.pipeline, &admin, settings).await?))
}
