use crate::config::{BookkeepingConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    DocumentService, HierarchyManager, MemoryStore, MongoStore, QuantityLedger, ReturnProcessor,
    SequenceAllocator, Store,
};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: BookkeepingConfig,
    pub store: Arc<dyn Store>,
    pub documents: DocumentService,
    pub returns: ReturnProcessor,
    pub hierarchy: HierarchyManager,
}

impl AppState {
    /// Wire the services over one shared store.
    pub fn new(config: BookkeepingConfig, store: Arc<dyn Store>) -> Self {
        let sequence = SequenceAllocator::new(store.clone(), config.store.sequence_counter_width);
        let ledger = QuantityLedger::new(store.clone());
        let hierarchy = HierarchyManager::new(store.clone());
        let documents = DocumentService::new(
            store.clone(),
            sequence.clone(),
            ledger.clone(),
            hierarchy.clone(),
        );
        let returns = ReturnProcessor::new(store.clone(), sequence, ledger);

        Self {
            config,
            store,
            documents,
            returns,
            hierarchy,
        }
    }
}

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: BookkeepingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn Store> = match config.store.backend {
            StoreBackend::Mongo => {
                let db = MongoStore::connect(
                    &config.mongodb.uri,
                    &config.mongodb.database,
                    Duration::from_secs(config.mongodb.connect_timeout_secs),
                )
                .await?;
                db.initialize_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    e
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on shutdown");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build on an already constructed store.
    pub async fn build_with_store(
        config: BookkeepingConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, AppError> {
        let state = AppState::new(config.clone(), store);
        let app = router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.common.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/documents", post(handlers::create_document))
        .route(
            "/documents/:id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        .route("/returns", post(handlers::create_return))
        .route("/returns/:id", get(handlers::get_return))
        .route("/lots/:id", get(handlers::get_lot).delete(handlers::delete_lot))
        .route("/lots/:id/deactivate", post(handlers::deactivate_lot))
        .route("/projects", post(handlers::create_project))
        .route(
            "/projects/:id",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/:id/reconcile", post(handlers::reconcile_project))
        .route(
            "/hierarchy/:parent_type/:parent_id/children",
            post(handlers::create_child),
        )
        .route("/hierarchy/:child_type/:child_id", delete(handlers::delete_child))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
