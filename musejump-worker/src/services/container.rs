//! Service container.
//!
//! Builds the trigger store, the provider adapters and the worker from a
//! [`WorkerConfig`], and owns them for the life of the process.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::WorkerConfig;
use crate::database::repositories::{JumpRepository, SqlxJumpRepository};
use crate::database::{self, DbPool};
use crate::directory::{ClerkConfig, ClerkDirectory};
use crate::playback::{SpotifyConfig, SpotifyPlayback};
use crate::scheduler::{ReconcileReport, Worker};
use crate::utils::http_client::build_client;

pub struct ServiceContainer {
    pub pool: DbPool,
    pub jumps: Arc<SqlxJumpRepository>,
    pub worker: Arc<Worker>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Open the store, apply migrations and wire the worker.
    ///
    /// Nothing is contacted over the network until [`Self::start`].
    pub async fn new(config: &WorkerConfig) -> Result<Self> {
        info!("Initializing service container");

        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let jumps = Arc::new(SqlxJumpRepository::new(pool.clone()));
        let client = build_client(config.scheduler.call_timeout)?;

        let directory = Arc::new(ClerkDirectory::new(
            ClerkConfig::new(config.clerk_api_base.clone(), config.clerk_api_key.clone()),
            client.clone(),
        ));
        let playback = Arc::new(SpotifyPlayback::new(
            SpotifyConfig {
                api_base: config.spotify_api_base.clone(),
            },
            client,
        ));

        let cancellation_token = CancellationToken::new();
        let worker = Arc::new(Worker::with_cancellation(
            config.scheduler.clone(),
            directory,
            playback,
            jumps.clone(),
            cancellation_token.child_token(),
        ));

        info!("Service container initialized");
        Ok(Self {
            pool,
            jumps,
            worker,
            cancellation_token,
        })
    }

    /// Store handle for trigger CRUD.
    pub fn jump_repository(&self) -> Arc<dyn JumpRepository> {
        self.jumps.clone()
    }

    pub async fn start(&self) -> Result<ReconcileReport> {
        self.worker.start().await
    }

    /// Token canceled on shutdown; background helpers hang off it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stop the worker, then close the store.
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
        self.cancellation_token.cancel();
        self.pool.close().await;
        info!("Service container shut down");
    }
}
