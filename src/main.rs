use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod bus;
mod config;
mod db;
mod engine;
mod error;
mod ledger;
mod metrics;
mod models;
mod services;
mod store;
mod utils;
mod websocket;

use crate::auth::jwt::JwtManager;
use crate::bus::{Event, EventBus, Topic};
use crate::config::AppConfig;
use crate::engine::{MatchingEngine, OrderBook, PairWriter};
use crate::ledger::Ledger;
use crate::services::accounts::AccountService;
use crate::services::kline::KlineService;
use crate::services::market_data::MarketDataService;
use crate::services::simulator::{MarketSimulator, SimulatorConfig};
use crate::services::trading::OrderService;
use crate::store::{OrderStore, PairRegistry, TradeLog};

pub struct AppState {
    pub config: AppConfig,
    pub bus: Arc<EventBus>,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<PairRegistry>,
    pub store: Arc<OrderStore>,
    pub trades: Arc<TradeLog>,
    pub orders: Arc<OrderService>,
    pub accounts: Arc<AccountService>,
    pub market_data: Arc<MarketDataService>,
    pub klines: Arc<KlineService>,
    pub jwt: Arc<JwtManager>,
    pub metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotcore_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;
    tracing::info!("Starting spotcore backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    let metrics_handle = metrics::init_metrics()?;

    // Event bus: every producer publishes through it
    let bus = Arc::new(EventBus::new(config.subscriber_queue_limit));
    tracing::info!(
        "Event bus initialized (queue limit {})",
        config.subscriber_queue_limit
    );

    // Custody ledger and authoritative stores
    let ledger = Arc::new(Ledger::new(Arc::clone(&bus)));
    let store = Arc::new(OrderStore::new());
    let trades = Arc::new(TradeLog::new());

    // Market reference data
    let registry = Arc::new(PairRegistry::new());
    registry.seed_default_markets();
    let pairs = registry.active_pairs();
    tracing::info!(
        "Seeded {} trading pairs: {:?}",
        pairs.len(),
        pairs.iter().map(|p| p.symbol.as_str()).collect::<Vec<_>>()
    );

    let market_data = Arc::new(MarketDataService::new(Arc::clone(&bus)));
    let klines = Arc::new(KlineService::new());

    // Optional PostgreSQL mirror (graceful degradation without it)
    let database = match &config.database_url {
        Some(url) => match db::Database::connect(url).await {
            Ok(database) => {
                tracing::info!("Database connected, persistence mirror enabled");
                if let Err(e) = db::persistence::mirror_reference_data(&database, &registry).await {
                    tracing::error!("Failed to mirror reference data: {}", e);
                }
                db::persistence::spawn_mirror(database.clone(), Arc::clone(&bus));
                Some(database)
            }
            Err(e) => {
                tracing::warn!("Database unavailable ({}), running without mirror", e);
                None
            }
        },
        None => {
            tracing::warn!("SPOTCORE_DATABASE_URL not set, running without mirror");
            None
        }
    };

    // Order service with one matching writer per active pair
    let orders = Arc::new(OrderService::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&market_data),
        config.slippage_cap,
    ));
    for pair in &pairs {
        let book = Arc::new(RwLock::new(OrderBook::new(&pair.symbol)));
        let engine = Arc::new(MatchingEngine::new(
            pair.clone(),
            book,
            Arc::clone(&ledger),
            Arc::clone(&store),
            Arc::clone(&trades),
            Arc::clone(&bus),
            config.simulator_depth,
        ));
        let writer = PairWriter::spawn(
            engine,
            config.writer_queue_depth,
            Duration::from_secs(config.book_snapshot_interval_seconds),
        );
        orders.register_writer(pair.id, writer);
    }
    tracing::info!("Matching writers started for {} pairs", pairs.len());

    // Per-pair workers: klines from real trades, ticker top-of-book from
    // book snapshots (engine or simulator, the worker does not care)
    for pair in &pairs {
        let symbol = pair.symbol.clone();
        let mut trade_rx = bus.subscribe(&Topic::Trade(symbol.clone()));
        let kline_feed = Arc::clone(&klines);
        tokio::spawn(async move {
            loop {
                match trade_rx.recv().await {
                    Ok(Event::Trade(trade)) => {
                        kline_feed.record_trade(
                            &trade.symbol,
                            trade.price,
                            trade.quantity,
                            trade.timestamp,
                        );
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "kline worker lagged trade events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let symbol = pair.symbol.clone();
        let mut book_rx = bus.subscribe(&Topic::Book(symbol.clone()));
        let ticker_feed = Arc::clone(&market_data);
        tokio::spawn(async move {
            loop {
                match book_rx.recv().await {
                    Ok(Event::BookSnapshot(snapshot)) => {
                        ticker_feed.update_top_of_book(
                            &symbol,
                            snapshot.bids.first().map(|l| l.price),
                            snapshot.asks.first().map(|l| l.price),
                        );
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "top-of-book worker lagged book events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // Accounts
    let accounts = Arc::new(AccountService::new(
        Arc::clone(&ledger),
        Arc::clone(&registry),
        config.starting_balance,
        "USDT",
        database.as_ref().map(|d| d.pool.clone()),
    ));
    let jwt = Arc::new(JwtManager::new(&config.jwt_secret));

    // Market simulator for pairs without real flow
    let simulator = Arc::new(MarketSimulator::new(
        Arc::clone(&registry),
        Arc::clone(&market_data),
        Arc::clone(&klines),
        Arc::clone(&bus),
        SimulatorConfig {
            price_interval: Duration::from_secs(config.simulator_price_interval_seconds),
            book_interval: Duration::from_secs(config.simulator_book_interval_seconds),
            depth: config.simulator_depth,
            quiet_window: Duration::from_secs(config.simulator_quiet_seconds),
        },
    ));
    simulator.start();

    // Build application state
    let state = Arc::new(AppState {
        config: config.clone(),
        bus,
        ledger,
        registry,
        store,
        trades,
        orders,
        accounts,
        market_data,
        klines,
        jwt,
        metrics: metrics_handle,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .merge(api::routes::create_router(state.clone()))
        .nest("/ws", websocket::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}
