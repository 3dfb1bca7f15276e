//! # metagroup-core: Pure Domain Logic for Group Links
//!
//! A link makes a target group in a target course mirror the members of a
//! source group in a source course. Links can be chained, so the source of
//! one link may itself be fed by another link.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Metagroup Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                 apps/metagroup-cli (clap)                       │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │        metagroup-sync: lost links, reconciler, incremental      │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ metagroup-core (THIS CRATE) ★                   │    │
//! │  │                                                                 │    │
//! │  │   ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌──────┐  │    │
//! │  │   │  types  │  │  graph  │  │ window  │  │ naming  │  │valid.│  │    │
//! │  │   │  Link   │  │  root   │  │ status  │  │ target  │  │      │  │    │
//! │  │   │  rows   │  │  chain  │  │ union   │  │ groups  │  │      │  │    │
//! │  │   └─────────┘  └─────────┘  └─────────┘  └─────────┘  └──────┘  │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • PURE FUNCTIONS                         │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │             metagroup-db: SQLite link store + host tables       │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Link, host records, statuses and policies
//! - [`graph`] - Root resolver, source-course set, chain display
//! - [`window`] - Aggregation of several source enrolments into one window
//! - [`naming`] - Names for automatically created target groups
//! - [`validation`] - Checks run before a link is written
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use metagroup_core::graph::{LinkEdge, LinkGraph};
//! use metagroup_core::types::SourceRef;
//!
//! let mut graph = LinkGraph::new();
//! graph.add_course(1, "ROOT");
//! graph.add_course(2, "MIDDLE");
//! graph.add_group(11, "Team");
//! graph.add_link(LinkEdge {
//!     link_id: 5,
//!     target: SourceRef::new(2, Some(21)),
//!     parent: SourceRef::new(1, Some(11)),
//!     enabled: true,
//! });
//!
//! let root = graph.resolve_root(2, Some(21)).unwrap();
//! assert_eq!(root.course_id, 1);
//! assert_eq!(root.group_name.as_deref(), Some("Team"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod graph;
pub mod naming;
pub mod types;
pub mod validation;
pub mod window;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use graph::{ChainPath, ChainStep, LinkEdge, LinkGraph, MemberOrigin, OriginKind};
pub use types::{
    Course, EnrolInstance, EnrolStatus, Group, GroupMember, InstanceStatus, Link, LinkStatus,
    LostLinkAction, NewLink, RoleAssignment, RootSource, SourceEnrolment, SourceRef, SyncMode,
    UnenrolAction, UserEnrolment, LINK_COMPONENT, LINK_METHOD, MANUAL_COMPONENT, META_METHOD,
};
pub use window::{holds_roles, ParentWindow};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a group name.
///
/// ## Business Reason
/// Matches the host's group name column.
pub const MAX_GROUP_NAME_LENGTH: usize = 254;

/// Links whose source-course cache is empty that one batch run initialises.
///
/// ## Business Reason
/// The computation walks the member origins of every group in the chain.
/// Capping it keeps a run over a freshly upgraded site bounded; later runs
/// pick up the rest.
pub const INITIAL_CACHE_BATCH: usize = 50;
