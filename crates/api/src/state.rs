use std::sync::Arc;

use promptreel_luma::client::JobClient;
use promptreel_pipeline::{BatchCoordinator, ComposeOrchestrator, LocalArtifactStore};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Single-batch coordinator for `POST /api/generateBatch`.
    pub batches: BatchCoordinator,
    /// Compose job registry and pollers.
    pub compose: ComposeOrchestrator,
    /// Cancelled on shutdown; stops every in-progress poll.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the pipeline around `client`, storing assets under
    /// `config.output_dir`.
    pub fn new(config: ServerConfig, client: Arc<dyn JobClient>) -> Self {
        let shutdown = CancellationToken::new();
        let store = Arc::new(LocalArtifactStore::new(config.output_dir.clone()));
        let policy = config.poll_policy();

        Self {
            batches: BatchCoordinator::new(
                client.clone(),
                store.clone(),
                policy,
                shutdown.clone(),
            ),
            compose: ComposeOrchestrator::new(client, store, policy, shutdown.clone()),
            config: Arc::new(config),
            shutdown,
        }
    }
}
