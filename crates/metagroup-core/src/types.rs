//! # Domain Types
//!
//! Core domain types shared by the store and the engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │        Link          │   │  UserEnrolment  │   │ RoleAssignment  │   │
//! │  │  ──────────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  target course/group │   │  instance_id    │   │  role/user      │   │
//! │  │  logical source      │   │  status         │   │  course context │   │
//! │  │  root source (cache) │   │  time window    │   │  component+item │   │
//! │  │  source_courses      │   └─────────────────┘   └─────────────────┘   │
//! │  │  status / sync_mode  │                                               │
//! │  └──────────────────────┘   ┌─────────────────┐   ┌─────────────────┐   │
//! │                             │   LinkStatus    │   │  UnenrolAction  │   │
//! │  ┌──────────────────────┐   │  ─────────────  │   │  ─────────────  │   │
//! │  │   SourceEnrolment    │   │  Enabled        │   │  Unenrol        │   │
//! │  │  one qualifying row  │   │  Disabled       │   │  Suspend        │   │
//! │  │  of the root source  │   │  PendingInitial │   │  SuspendNoRoles │   │
//! │  └──────────────────────┘   └─────────────────┘   └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Origin Tagging
//! Everything this mechanism creates on the host (group memberships, role
//! assignments) carries `component = LINK_COMPONENT` and `item_id = link id`,
//! so manual or other-origin records are never touched.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Origin Constants
// =============================================================================

/// Component name stamped on every membership and role this mechanism creates.
pub const LINK_COMPONENT: &str = "enrol_metagroup";

/// Enrolment method name of a link's own enrolment instance.
pub const LINK_METHOD: &str = "metagroup";

/// Enrolment method name of the host's one-level course meta link.
pub const META_METHOD: &str = "meta";

/// Component of manually created records.
pub const MANUAL_COMPONENT: &str = "";

// =============================================================================
// Link Status
// =============================================================================

/// Lifecycle status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Continuously reconciled.
    Enabled,
    /// Kept in the store, derived roles are stripped.
    Disabled,
    /// Created but not yet populated; the next batch run enables it.
    DisabledPendingInitialSync,
}

impl LinkStatus {
    /// Only `Enabled` links grant roles and react to events.
    pub fn is_enabled(self) -> bool {
        matches!(self, LinkStatus::Enabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Enabled => "enabled",
            LinkStatus::Disabled => "disabled",
            LinkStatus::DisabledPendingInitialSync => "disabled_pending_initial_sync",
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::Enabled
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enabled" => Ok(LinkStatus::Enabled),
            "disabled" => Ok(LinkStatus::Disabled),
            "disabled_pending_initial_sync" | "pending" => {
                Ok(LinkStatus::DisabledPendingInitialSync)
            }
            _ => Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: vec![
                    "enabled".to_string(),
                    "disabled".to_string(),
                    "disabled_pending_initial_sync".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Sync Mode
// =============================================================================

/// How long a link keeps following its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Continuously updated.
    Mirror,
    /// Synced once by a batch run, then frozen.
    Snapshot,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Mirror
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Mirror => write!(f, "mirror"),
            SyncMode::Snapshot => write!(f, "snapshot"),
        }
    }
}

// =============================================================================
// Host Status Codes
// =============================================================================

/// Status of a single user enrolment. Stored as 0 (active) / 1 (suspended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrolStatus {
    Active,
    Suspended,
}

impl EnrolStatus {
    pub fn code(self) -> i64 {
        match self {
            EnrolStatus::Active => 0,
            EnrolStatus::Suspended => 1,
        }
    }

    /// Any non-zero code counts as suspended.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            EnrolStatus::Active
        } else {
            EnrolStatus::Suspended
        }
    }
}

/// Status of an enrolment instance (a method attached to a course).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Enabled,
    Disabled,
}

impl InstanceStatus {
    pub fn code(self) -> i64 {
        match self {
            InstanceStatus::Enabled => 0,
            InstanceStatus::Disabled => 1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            InstanceStatus::Enabled
        } else {
            InstanceStatus::Disabled
        }
    }
}

impl From<LinkStatus> for InstanceStatus {
    fn from(status: LinkStatus) -> Self {
        if status.is_enabled() {
            InstanceStatus::Enabled
        } else {
            InstanceStatus::Disabled
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// What happens to a derived enrolment whose source disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnenrolAction {
    /// Remove the enrolment completely.
    Unenrol,
    /// Suspend the enrolment, keep its roles.
    Suspend,
    /// Suspend the enrolment and revoke every role the link granted.
    SuspendNoRoles,
}

impl Default for UnenrolAction {
    fn default() -> Self {
        UnenrolAction::SuspendNoRoles
    }
}

impl UnenrolAction {
    /// Derived roles are only ever removed when this is false.
    pub fn keeps_roles(self) -> bool {
        matches!(self, UnenrolAction::Suspend)
    }
}

impl fmt::Display for UnenrolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnenrolAction::Unenrol => write!(f, "unenrol"),
            UnenrolAction::Suspend => write!(f, "suspend"),
            UnenrolAction::SuspendNoRoles => write!(f, "suspend_no_roles"),
        }
    }
}

impl FromStr for UnenrolAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unenrol" => Ok(UnenrolAction::Unenrol),
            "suspend" => Ok(UnenrolAction::Suspend),
            "suspend_no_roles" | "suspendnoroles" => Ok(UnenrolAction::SuspendNoRoles),
            _ => Err(ValidationError::NotAllowed {
                field: "unenrol_action".to_string(),
                allowed: vec![
                    "unenrol".to_string(),
                    "suspend".to_string(),
                    "suspend_no_roles".to_string(),
                ],
            }),
        }
    }
}

/// Disposition applied to a link whose source course or group is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostLinkAction {
    /// Leave everything as it is.
    Keep,
    /// Suspend derived enrolments and revoke derived roles.
    Suspend,
    /// Disable the link and fully unenrol its members. Destructive.
    Unenrol,
}

impl Default for LostLinkAction {
    fn default() -> Self {
        LostLinkAction::Suspend
    }
}

impl LostLinkAction {
    pub fn is_destructive(self) -> bool {
        matches!(self, LostLinkAction::Unenrol)
    }
}

impl fmt::Display for LostLinkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LostLinkAction::Keep => write!(f, "keep"),
            LostLinkAction::Suspend => write!(f, "suspend"),
            LostLinkAction::Unenrol => write!(f, "unenrol"),
        }
    }
}

impl FromStr for LostLinkAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(LostLinkAction::Keep),
            "suspend" | "suspend_no_roles" => Ok(LostLinkAction::Suspend),
            "unenrol" => Ok(LostLinkAction::Unenrol),
            _ => Err(ValidationError::NotAllowed {
                field: "lost_link_action".to_string(),
                allowed: vec![
                    "keep".to_string(),
                    "suspend".to_string(),
                    "unenrol".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Link
// =============================================================================

/// A (course, optional group) reference in the link graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub course_id: i64,
    pub group_id: Option<i64>,
}

impl SourceRef {
    /// Builds a reference, treating non-positive group ids as "no group".
    pub fn new(course_id: i64, group_id: Option<i64>) -> Self {
        SourceRef {
            course_id,
            group_id: group_id.filter(|id| *id > 0),
        }
    }
}

/// "Target group in target course receives members from source group in
/// source course."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Link id. Equal to the id of the link's own enrolment instance.
    pub id: i64,

    /// Course that receives the derived enrolments.
    pub target_course_id: i64,

    /// Group that receives the derived memberships. Non-positive means "not
    /// materialized" and is treated as a configuration error.
    pub target_group_id: i64,

    /// Source as configured by the administrator.
    pub source_course_id: i64,
    pub source_group_id: i64,

    /// Transitively resolved ultimate source. `None` until first resolved.
    pub root_course_id: Option<i64>,
    pub root_group_id: Option<i64>,

    /// Display caches. Never used for sync decisions.
    pub source_group_name: Option<String>,
    pub root_course_name: Option<String>,
    pub root_group_name: Option<String>,

    /// Courses feeding this link, roots first, source course last. Empty when
    /// not yet computed.
    pub source_courses: Vec<i64>,

    pub status: LinkStatus,
    pub sync_mode: SyncMode,

    /// Role given to newly created enrolments, if any.
    pub role_id: Option<i64>,

    /// Set when root resolution hit a cycle or an unresolvable chain and the
    /// logical source was used as the root instead.
    pub root_fallback: bool,

    /// When a snapshot link completed its one and only sync.
    pub frozen_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// The source that membership is read from: the root if known, else the
    /// logical source.
    pub fn effective_source(&self) -> SourceRef {
        SourceRef::new(
            self.root_course_id.unwrap_or(self.source_course_id),
            Some(self.root_group_id.unwrap_or(self.source_group_id)),
        )
    }

    /// The source as configured.
    pub fn logical_source(&self) -> SourceRef {
        SourceRef::new(self.source_course_id, Some(self.source_group_id))
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn has_valid_target_group(&self) -> bool {
        self.target_group_id > 0
    }

    /// True when the root differs from the logical source.
    pub fn is_chained(&self) -> bool {
        self.effective_source() != self.logical_source()
    }
}

/// Fields needed to insert a new link.
#[derive(Debug, Clone, Default)]
pub struct NewLink {
    pub target_course_id: i64,
    pub target_group_id: i64,
    pub source_course_id: i64,
    pub source_group_id: i64,
    pub root: Option<RootSource>,
    pub source_group_name: Option<String>,
    pub source_courses: Vec<i64>,
    pub status: LinkStatus,
    pub sync_mode: SyncMode,
    pub role_id: Option<i64>,
    pub root_fallback: bool,
}

/// Result of a root resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSource {
    pub course_id: i64,
    pub group_id: Option<i64>,
    pub course_name: String,
    pub group_name: Option<String>,
}

// =============================================================================
// Host Records
// =============================================================================

/// A course on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub shortname: String,
    pub fullname: String,
}

impl Course {
    /// Name used in caches and chain display.
    pub fn display_name(&self) -> &str {
        if self.shortname.is_empty() {
            &self.fullname
        } else {
            &self.shortname
        }
    }
}

/// A group inside a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
}

/// A user's membership of a group, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: i64,
    pub user_id: i64,
    pub component: String,
    pub item_id: i64,
}

/// An enrolment method attached to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolInstance {
    pub id: i64,
    pub course_id: i64,
    pub method: String,
    pub status: InstanceStatus,
    /// Parent course for `meta` instances.
    pub parent_course_id: Option<i64>,
}

impl EnrolInstance {
    /// Component that tags roles and memberships created by this instance.
    pub fn component(&self) -> String {
        format!("enrol_{}", self.method)
    }
}

/// One user's enrolment through one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEnrolment {
    pub id: i64,
    pub instance_id: i64,
    pub user_id: i64,
    pub status: EnrolStatus,
    /// Unix seconds, 0 = unbounded.
    pub time_start: i64,
    /// Unix seconds, 0 = unbounded.
    pub time_end: i64,
}

/// A qualifying enrolment of a user in a link's source, with the status of
/// the instance it came through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEnrolment {
    pub user_id: i64,
    pub instance_id: i64,
    pub method: String,
    pub status: EnrolStatus,
    pub instance_status: InstanceStatus,
    pub time_start: i64,
    pub time_end: i64,
}

impl SourceEnrolment {
    /// Active enrolment through an enabled instance.
    pub fn is_active(&self) -> bool {
        self.status == EnrolStatus::Active && self.instance_status == InstanceStatus::Enabled
    }
}

/// A role held by a user in a course context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: i64,
    pub role_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub component: String,
    pub item_id: i64,
}

impl RoleAssignment {
    pub fn is_from_link(&self, link_id: i64) -> bool {
        self.component == LINK_COMPONENT && self.item_id == link_id
    }
}
