//! # metagroup-sync: Reconciliation Engine for Metagroup
//!
//! Keeps the enrolments, group memberships and roles derived from links in
//! agreement with the source groups they point at.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                     Engine (facade for callers)                  │   │
//! │  └────────────────────────────┬─────────────────────────────────────┘   │
//! │                               │                                         │
//! │       ┌───────────────┬───────┴───────┬────────────────┐                │
//! │       ▼               ▼               ▼                ▼                │
//! │  ┌──────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐       │
//! │  │Reconciler│  │ LostLink    │  │ Incremental │  │ LinkManager  │       │
//! │  │          │  │ Handler     │  │ Sync        │  │              │       │
//! │  │ 1 create │  │             │  │             │  │ create, edit │       │
//! │  │ 2 extras │  │ suspend or  │  │ one user,   │  │ delete, root │       │
//! │  │ 3 status │  │ unenrol     │  │ guarded     │  │ recalculate  │       │
//! │  │ 4 roles  │  │             │  │ cascade     │  │ cleanup      │       │
//! │  └────┬─────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘       │
//! │       └───────────────┴────────┬───────┴────────────────┘               │
//! │                                ▼                                        │
//! │                  LinkOps: shared per-user primitives                    │
//! │                                │                                        │
//! │                                ▼                                        │
//! │                  metagroup-db (Link Store, host tables)                 │
//! │                                                                         │
//! │  HOST EVENTS: EventHandler routes enrolment, role, member, group,       │
//! │  course and instance changes to the components above.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `Engine` facade wiring config and store together
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Sync error types
//! - [`ops`] - Create/restore, status, unenrol actions, roles, target groups
//! - [`reconcile`] - The four-pass batch run
//! - [`report`] - Per-pass counters and failures of a run
//! - [`lost`] - Links whose source group has disappeared
//! - [`incremental`] - Single-user sync with the reentrancy guard
//! - [`events`] - Host event routing
//! - [`links`] - Administrative link operations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metagroup_sync::{Engine, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let engine = Engine::open(config).await?;
//!
//! let link = engine
//!     .links()
//!     .create_link(target_course, source_course, source_group, Default::default())
//!     .await?;
//!
//! let status = engine.run_reconciliation(None, true).await;
//! std::process::exit(status.code());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod incremental;
pub mod links;
pub mod lost;
pub mod ops;
pub mod reconcile;
pub mod report;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use engine::Engine;
pub use error::{SyncError, SyncResult};
pub use events::{EventHandler, HostEvent};
pub use incremental::{IncrementalSync, SyncContext};
pub use links::{CleanupReport, CreateLinkOptions, FanOut, GroupEntry, LinkManager, LinkUpdate};
pub use lost::LostLinkHandler;
pub use ops::LinkOps;
pub use reconcile::{Reconciler, RunStatus};
pub use report::{Pass, PassCounts, RecordFailure, SyncReport};
