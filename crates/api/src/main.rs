//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::auth::TokenVerifier;
use api::config::{Config, LogFormat};
use broker::{AmqpConnector, BrokerClient, Connector, Dispatcher, InMemoryBroker};
use consumers::{LogMailer, SellerDashboardView};
use orchestrator::{
    CartClient, CompensationWorker, EventPublisher, HttpCartClient, HttpIdentityClient,
    HttpOrderClient, IdentityClient, OrderClient, OrderOrchestrator, Outbox, PaymentOrchestrator,
    StoreOrderClient,
};
use store::{
    CompensationLog, InMemoryCompensationLog, InMemoryOrderStore, InMemoryPaymentStore, OrderStore,
    PaymentStore, PostgresStore,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

struct Stores {
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentStore>,
    log: Arc<dyn CompensationLog>,
}

async fn open_stores(config: &Config) -> Stores {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL store");
            let store = Arc::new(store);
            Stores {
                orders: store.clone(),
                payments: store.clone(),
                log: store,
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders and payments are kept in memory");
            Stores {
                orders: Arc::new(InMemoryOrderStore::new()),
                payments: Arc::new(InMemoryPaymentStore::new()),
                log: Arc::new(InMemoryCompensationLog::new()),
            }
        }
    }
}

async fn run<C: Connector>(config: Config, connector: C, metrics_handle: metrics_exporter_prometheus::PrometheusHandle) {
    let client = BrokerClient::new(connector, config.broker_config());
    // Startup does not wait for the broker. Publishes issued while it is
    // down time out into the compensation log.
    let connecting = client.connect_in_background();
    let publisher: Arc<dyn EventPublisher> = Arc::new(client.clone());

    let stores = open_stores(&config).await;
    let orchestrator_config = config.orchestrator_config();
    let timeout = orchestrator_config.collaborator_timeout;

    let cart: Arc<dyn CartClient> = Arc::new(
        HttpCartClient::new(&config.cart_service_url, timeout).expect("invalid CART_SERVICE_URL"),
    );
    let identity: Arc<dyn IdentityClient> = Arc::new(
        HttpIdentityClient::new(&config.auth_service_url, timeout).expect("invalid AUTH_SERVICE_URL"),
    );
    let order_client: Arc<dyn OrderClient> = match &config.order_service_url {
        Some(url) => Arc::new(HttpOrderClient::new(url, timeout).expect("invalid ORDER_SERVICE_URL")),
        None => Arc::new(StoreOrderClient::new(stores.orders.clone())),
    };

    let outbox = Outbox::new(publisher.clone(), stores.log.clone(), orchestrator_config.publish_timeout);
    let orders = OrderOrchestrator::new(
        stores.orders.clone(),
        cart.clone(),
        identity,
        outbox.clone(),
        &orchestrator_config,
    );
    let payments = PaymentOrchestrator::new(stores.payments.clone(), order_client, outbox);

    let worker = CompensationWorker::new(stores.log.clone(), cart, publisher, &orchestrator_config).spawn();

    let dashboard = SellerDashboardView::new();
    let consumers = if config.run_consumers {
        let mut dispatcher = Dispatcher::new(config.ack_mode());
        consumers::register(&mut dispatcher, Arc::new(LogMailer), dashboard.clone());
        let handle = dispatcher.spawn(client.clone());
        tracing::info!(queues = handle.len(), "consumers started");
        Some(handle)
    } else {
        None
    };

    let state = Arc::new(AppState {
        orders,
        payments,
        dashboard,
        tokens: Arc::new(TokenVerifier::new(&config.jwt_secret)),
    });
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    if let Some(handle) = consumers {
        handle.shutdown();
    }
    worker.abort();
    connecting.abort();
    if let Err(e) = client.close().await {
        tracing::warn!(error = %e, "broker close failed");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the broker and run
    match config.amqp_url.clone() {
        Some(url) => run(config, AmqpConnector::new(url), metrics_handle).await,
        None => {
            tracing::warn!("AMQP_SERVER_URL not set, using the in-process broker");
            let broker = InMemoryBroker::new();
            run(config, broker.connector(), metrics_handle).await
        }
    }
}
