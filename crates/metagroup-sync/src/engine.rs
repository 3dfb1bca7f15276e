//! # Engine
//!
//! Wires the configuration and the store into every component, so callers
//! (the CLI, a host integration) hold one value.
//!
//! ```text
//! Engine ──► LinkOps (db + config)
//!              ├── Reconciler        batch runs
//!              ├── LostLinkHandler   lost links on demand
//!              ├── IncrementalSync   one user, one course
//!              ├── EventHandler      host events
//!              └── LinkManager       administrative operations
//! ```

use std::sync::Arc;

use tracing::info;

use metagroup_db::{Database, DbConfig};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::{EventHandler, HostEvent};
use crate::incremental::{IncrementalSync, SyncContext};
use crate::links::LinkManager;
use crate::lost::LostLinkHandler;
use crate::ops::LinkOps;
use crate::reconcile::{Reconciler, RunStatus};
use crate::report::SyncReport;

pub struct Engine {
    ops: LinkOps,
    reconciler: Reconciler,
    lost: LostLinkHandler,
    incremental: IncrementalSync,
    events: EventHandler,
    links: LinkManager,
}

impl Engine {
    pub fn new(config: SyncConfig, db: Arc<Database>) -> Self {
        let ops = LinkOps::new(db, Arc::new(config));
        Engine {
            reconciler: Reconciler::new(ops.clone()),
            lost: LostLinkHandler::new(ops.clone()),
            incremental: IncrementalSync::new(ops.clone()),
            events: EventHandler::new(ops.clone()),
            links: LinkManager::new(ops.clone()),
            ops,
        }
    }

    /// Opens the configured database (running migrations) and builds the
    /// engine on top of it.
    pub async fn open(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let db_config = DbConfig::new(&config.database.path).max_connections(config.database.max_connections);
        let db = Database::new(db_config).await?;
        info!(path = %config.database.path.display(), enabled = config.enabled, "Engine opened");
        Ok(Self::new(config, Arc::new(db)))
    }

    pub fn config(&self) -> &SyncConfig {
        self.ops.config()
    }

    pub fn db(&self) -> &Database {
        self.ops.db()
    }

    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    pub fn lost_links(&self) -> &LostLinkHandler {
        &self.lost
    }

    pub fn incremental(&self) -> &IncrementalSync {
        &self.incremental
    }

    pub async fn reconcile(&self, course_id: Option<i64>) -> SyncResult<SyncReport> {
        self.reconciler.reconcile(course_id).await
    }

    pub async fn run_reconciliation(&self, course_id: Option<i64>, verbose: bool) -> RunStatus {
        self.reconciler.run_reconciliation(course_id, verbose).await
    }

    /// Handles one host event on a fresh call stack.
    pub async fn handle_event(&self, event: &HostEvent) -> SyncResult<u64> {
        let mut ctx = SyncContext::new();
        self.events.handle(event, &mut ctx).await
    }

    pub async fn close(&self) {
        self.ops.db().close().await;
    }
}
