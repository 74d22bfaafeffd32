use {
    fin_checkout::{
        AppState,
        adapters::{http, stripe_client::StripeProvider},
        config::Config,
        domain::{
            error::PipelineError,
            ports::{
                ContentStore, CouponStore, DirectorySync, MembershipService, Notifier,
                OutboxStore, TransactionStore,
            },
            provider::PaymentProvider,
        },
        infra::{
            Unconfigured,
            http::{
                ServiceClient, content_store::DirectusContentStore,
                directory::HttpDirectorySync, membership::HttpMembershipService,
                notifier::HttpNotifier,
            },
            memory::{LogNotifier, MemoryContentStore, MemoryStore},
            postgres::{self, PgStore},
        },
        services::{Pipeline, Ports, Settings, worker},
    },
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().expect("invalid configuration");
    let pipeline = Arc::new(build_pipeline(&config).await.expect("failed to wire services"));

    let state = AppState {
        pipeline: pipeline.clone(),
        stripe_webhook_secret: config.stripe_webhook_secret.as_deref().map(Arc::from),
    };
    if state.stripe_webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook endpoint disabled");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = [
        tokio::spawn(worker::run_worker(pipeline.clone(), shutdown_rx.clone())),
        tokio::spawn(worker::run_reaper(pipeline.clone(), shutdown_rx.clone())),
        tokio::spawn(worker::run_orphan_sweep(pipeline, shutdown_rx)),
    ];

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    tracing::info!(%addr, environment = %config.policy.environment, "listening");
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "background task panicked");
        }
    }
    tracing::info!("shutdown complete");
}

fn client(
    name: &'static str,
    url: &Option<String>,
    token: &Option<String>,
) -> Result<Option<ServiceClient>, PipelineError> {
    url.as_deref()
        .map(|url| ServiceClient::new(name, url, token.clone(), UPSTREAM_TIMEOUT))
        .transpose()
}

type Stores = (
    Arc<dyn TransactionStore>,
    Arc<dyn CouponStore>,
    Arc<dyn OutboxStore>,
);

fn stores<S: TransactionStore + CouponStore + OutboxStore + 'static>(store: Arc<S>) -> Stores {
    (store.clone(), store.clone(), store)
}

async fn build_pipeline(config: &Config) -> Result<Pipeline, PipelineError> {
    let (ledger, coupons, outbox) = match &config.database_url {
        Some(url) => stores(Arc::new(PgStore::new(postgres::connect(url).await?))),
        None => {
            tracing::warn!("DATABASE_URL not set, running on in-memory stores");
            stores(Arc::new(MemoryStore::new()))
        }
    };

    let content: Arc<dyn ContentStore> =
        match client("content", &config.content_store_url, &config.content_store_token)? {
            Some(c) => Arc::new(DirectusContentStore::new(c)),
            None => {
                tracing::warn!("CONTENT_STORE_URL not set, using an empty in-memory content store");
                Arc::new(MemoryContentStore::new())
            }
        };
    let membership: Arc<dyn MembershipService> =
        match client("membership", &config.membership_api_url, &config.service_token)? {
            Some(c) => Arc::new(HttpMembershipService::new(c)),
            None => Arc::new(Unconfigured("membership")),
        };
    let directory: Arc<dyn DirectorySync> =
        match client("directory", &config.directory_sync_url, &config.service_token)? {
            Some(c) => Arc::new(HttpDirectorySync::new(c)),
            None => Arc::new(Unconfigured("directory")),
        };
    let notifier: Arc<dyn Notifier> =
        match client("notification", &config.notification_url, &config.service_token)? {
            Some(c) => Arc::new(HttpNotifier::new(c)),
            None => Arc::new(LogNotifier),
        };
    let provider = config.stripe_secret_key.as_deref().map(|key| {
        Arc::new(StripeProvider::new(key)) as Arc<dyn PaymentProvider>
    });
    if provider.is_none() {
        tracing::warn!("STRIPE_SECRET_KEY not set, paid checkouts will fail");
    }

    Ok(Pipeline::new(
        Ports {
            ledger,
            coupons,
            outbox,
            content,
            membership,
            directory,
            notifier,
            provider,
        },
        Settings {
            policy: config.policy,
            rates: config.rates,
            allowed_redirect_hosts: config.allowed_redirect_hosts.clone(),
            orphan_timeout: config.orphan_timeout,
        },
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
