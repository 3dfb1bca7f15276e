//! # metagroup-db: Persistence Layer for Metagroup
//!
//! SQLite storage for the Link Store and the host directories (courses,
//! groups, enrolments, roles) the engine reconciles.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Metagroup Data Flow                              │
//! │                                                                         │
//! │  Reconciler / IncrementalSync / LinkManager (metagroup-sync)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                  metagroup-db (THIS CRATE)                      │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌───────────────┐   │    │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations   │   │    │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)   │   │    │
//! │  │   │               │    │ LinkRepo       │   │ 0001_host     │   │    │
//! │  │   │ SqlitePool    │◄───│ CourseRepo     │   │ 0002_links    │   │    │
//! │  │   │ WAL + FKs     │    │ GroupRepo      │   │               │   │    │
//! │  │   │               │    │ EnrolmentRepo  │   │               │   │    │
//! │  │   │               │    │ RoleRepo       │   │               │   │    │
//! │  │   └───────────────┘    └────────────────┘   └───────────────┘   │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (metagroup.db)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metagroup_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("metagroup.db")).await?;
//! let links = db.links().list_in_scope(Some(20)).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::course::CourseRepository;
pub use repository::enrolment::{EnrolmentRepository, GroupOrigin, SourceQuery};
pub use repository::group::GroupRepository;
pub use repository::link::{LinkFilter, LinkRepository};
pub use repository::role::{RoleFilter, RoleRepository};
