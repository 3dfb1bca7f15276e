//! # Repository Module
//!
//! Repositories for the Link Store and the host directories it reconciles.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  metagroup-sync (engine)                                                │
//! │       │                                                                 │
//! │       │  db.links().list_in_scope(Some(20))                             │
//! │       │  db.enrolments().source_enrolments(query)                       │
//! │       ▼                                                                 │
//! │  LinkRepository        ← the Link Store                                 │
//! │  CourseRepository      ← course directory                               │
//! │  GroupRepository       ← group directory + memberships                  │
//! │  EnrolmentRepository   ← instances + user enrolments                    │
//! │  RoleRepository        ← role assignments                               │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each repository owns a clone of the pool and converts rows to core types
//! through private `*Row` structs.

pub mod course;
pub mod enrolment;
pub mod group;
pub mod link;
pub mod role;
