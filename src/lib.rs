pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {services::Pipeline, std::sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// `None` leaves the webhook endpoint unavailable.
    pub stripe_webhook_secret: Option<Arc<str>>,
}
