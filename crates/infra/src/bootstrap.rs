//! Wiring: stores, projector registry, command handler and (optionally) the
//! projection worker, assembled once from an [`EngineConfig`].

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use proofing_core::AggregateId;
use proofing_events::{CursorStore, EventEnvelope, InMemoryCursorStore, InMemoryEventBus, ProjectionError, ProjectionRunner};
use proofing_profiles::{Profile, ProfileCommand};

use crate::command_handler::{CommandHandler, CommandOutcome, DispatchError};
use crate::config::{ConfigError, EngineConfig, ProjectionDispatchMode};
use crate::db;
use crate::policy::SingleActiveProfile;
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, PublishingEventStore};
use crate::projections::{
    PostgresCursorStore, ProfileProjection, ProfileReadModel, ProfileStore, ProjectorRegistry, RebuildError,
};
use crate::read_model::{InMemoryReadModelStore, PostgresProfileStore, ReadModelStore};
use crate::workers::{ProjectionWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to start projection worker: {0}")]
    Worker(#[from] io::Error),
}

/// The assembled profile engine.
pub struct ProfileEngine {
    handler: CommandHandler<Arc<dyn EventStore>>,
    registry: Arc<ProjectorRegistry>,
    profiles: Arc<ProfileStore>,
    mode: ProjectionDispatchMode,
    worker: Option<WorkerHandle>,
}

impl core::fmt::Debug for ProfileEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProfileEngine")
            .field("mode", &self.mode)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ProfileEngine {
    /// Everything in process memory (tests/dev).
    pub fn in_memory(config: &EngineConfig) -> Result<Self, BootstrapError> {
        Self::assemble(
            config,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryReadModelStore::<AggregateId, ProfileReadModel>::new()),
            Arc::new(InMemoryCursorStore::new()),
        )
    }

    /// Postgres-backed engine. Must run on a multi-threaded tokio runtime.
    pub async fn postgres(config: &EngineConfig) -> Result<Self, BootstrapError> {
        let url = config.database_url.as_deref().ok_or(BootstrapError::MissingDatabaseUrl)?;
        let pool = db::connect(url, config.database_max_connections).await?;
        db::migrate(&pool).await?;
        info!("database schema ready");

        Self::assemble(
            config,
            Arc::new(PostgresEventStore::new(pool.clone())),
            Arc::new(PostgresProfileStore::new(pool.clone())),
            Arc::new(PostgresCursorStore::new(pool)),
        )
    }

    pub fn assemble(
        config: &EngineConfig,
        store: Arc<dyn EventStore>,
        profiles: Arc<ProfileStore>,
        cursors: Arc<dyn CursorStore>,
    ) -> Result<Self, BootstrapError> {
        config.validate()?;

        let registry = Arc::new(ProjectorRegistry::new().with_projector(ProjectionRunner::with_cursor_store(
            ProfileProjection::new(profiles.clone()),
            cursors,
        )));

        let (handler, worker) = match config.projection_dispatch {
            ProjectionDispatchMode::Synchronous => {
                let handler = CommandHandler::new(store, config.retry.clone()).with_projectors(registry.clone());
                (handler, None)
            }
            ProjectionDispatchMode::Asynchronous => {
                let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
                let worker_registry = registry.clone();
                // Postgres-backed projectors need the runtime from the worker thread.
                let runtime = tokio::runtime::Handle::try_current().ok();
                let worker = ProjectionWorker::spawn("profile-projections", &*bus, move |envelope: EventEnvelope<JsonValue>| {
                    let _guard = runtime.as_ref().map(|h| h.enter());
                    worker_registry.dispatch(&envelope);
                    Ok::<(), Infallible>(())
                })?;

                let publishing: Arc<dyn EventStore> = Arc::new(PublishingEventStore::new(store, bus));
                (CommandHandler::new(publishing, config.retry.clone()), Some(worker))
            }
        };

        info!(mode = ?config.projection_dispatch, projectors = ?registry.names(), "profile engine assembled");
        Ok(Self {
            handler,
            registry,
            profiles,
            mode: config.projection_dispatch,
            worker,
        })
    }

    /// Handle one command, then step down the user's other active profiles
    /// if it activated one.
    ///
    /// Sibling lookup goes through the read model, so in asynchronous mode a
    /// sibling activated moments ago may be missed until its row lands.
    pub fn handle(&self, command: ProfileCommand) -> Result<CommandOutcome, DispatchError> {
        let outcome = self.handler.handle(command)?;
        self.supersede_siblings(&outcome);
        Ok(outcome)
    }

    fn supersede_siblings(&self, outcome: &CommandOutcome) {
        for activation in SingleActiveProfile::activations(&outcome.committed) {
            let user_id = match self.handler.repository().load::<Profile>(activation.profile_id) {
                Ok(profile) => profile.user_id(),
                Err(err) => {
                    warn!(profile_id = %activation.profile_id, %err, "could not load activated profile");
                    continue;
                }
            };
            let Some(user_id) = user_id else { continue };
            let rows = match self.profiles.list() {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(profile_id = %activation.profile_id, %err, "could not list profiles; siblings left active");
                    continue;
                }
            };

            for command in SingleActiveProfile::react(activation, user_id, &rows) {
                match self.handler.handle(command) {
                    Ok(superseded) => {
                        info!(profile_id = %superseded.aggregate_id, superseded_by = %activation.profile_id, "profile superseded");
                    }
                    // The row was stale: the sibling already stepped down.
                    Err(DispatchError::Validation(reason)) => {
                        debug!(superseded_by = %activation.profile_id, %reason, "sibling no longer active");
                    }
                    Err(err) => {
                        warn!(superseded_by = %activation.profile_id, %err, "failed to supersede sibling profile");
                    }
                }
            }
        }
    }

    /// Read side: one profile row, if it exists (eventually consistent in async mode).
    pub fn profile(&self, profile_id: AggregateId) -> Result<Option<ProfileReadModel>, ProjectionError> {
        self.profiles.get(&profile_id)
    }

    pub fn profiles(&self) -> Result<Vec<ProfileReadModel>, ProjectionError> {
        self.profiles.list()
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        self.handler.store()
    }

    pub fn registry(&self) -> &Arc<ProjectorRegistry> {
        &self.registry
    }

    pub fn mode(&self) -> ProjectionDispatchMode {
        self.mode
    }

    pub fn catch_up(&self) -> Result<u64, EventStoreError> {
        self.registry.catch_up(self.store())
    }

    pub fn rebuild_projections(&self) -> Result<u64, RebuildError> {
        self.registry.rebuild(self.store())
    }

    /// Stop the projection worker (if any) after it drained queued events.
    pub fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}
