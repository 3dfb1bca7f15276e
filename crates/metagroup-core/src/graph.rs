//! # Link Graph
//!
//! In-memory snapshot of every link plus the enrolment methods that put the
//! current members into each group. The store loads it once per operation;
//! all walks below are pure and iterative.
//!
//! ## Shape
//! ```text
//!   course A / group 1 ──link 3──► course B / group 7 ──link 9──► course C / group 4
//!        (root)                       (intermediate)                  (target)
//!
//!   resolve_root(C, 4)             walks incoming edges: C ◄ B ◄ A  →  A / 1
//!   compute_source_courses(B, 7)   follows member origins:          →  [A, B]
//! ```
//!
//! ## Termination
//! Every walk carries an explicit visited set of course ids that grows by one
//! on each step, so no walk takes more steps than there are distinct courses.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Link, RootSource, SourceRef};

// =============================================================================
// Graph Records
// =============================================================================

/// One link as seen by the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub link_id: i64,
    /// Target course and group.
    pub target: SourceRef,
    /// Cached root if known, else the logical source.
    pub parent: SourceRef,
    pub enabled: bool,
}

impl From<&Link> for LinkEdge {
    fn from(link: &Link) -> Self {
        LinkEdge {
            link_id: link.id,
            target: SourceRef::new(link.target_course_id, Some(link.target_group_id)),
            parent: link.effective_source(),
            enabled: link.is_enabled(),
        }
    }
}

/// How an enrolment method relates a group's members to other courses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginKind {
    /// A link of this mechanism, pointing at its root-or-logical source.
    Link { parent: SourceRef },
    /// Host one-level meta link.
    Meta { parent_course_id: Option<i64> },
    /// Manual, self, cohort... Contributes nothing beyond its own course.
    Other,
}

/// A distinct enrolment instance through which members of a group came in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberOrigin {
    pub instance_id: i64,
    pub kind: OriginKind,
}

/// One hop of a chain for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub course_id: i64,
    pub group_id: Option<i64>,
    pub course_name: String,
    pub group_name: Option<String>,
}

/// Path from a root down to a link's target.
pub type ChainPath = Vec<ChainStep>;

// =============================================================================
// Link Graph
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    /// Arena of edges, ordered by link id.
    edges: Vec<LinkEdge>,
    /// Target course -> indices into `edges` of enabled links.
    incoming: HashMap<i64, Vec<usize>>,
    courses: HashMap<i64, String>,
    groups: HashMap<i64, String>,
    /// (course, group) -> distinct origins, ordered by instance id.
    origins: HashMap<(i64, i64), Vec<MemberOrigin>>,
}

/// Outcome of entering one level of the source-course walk.
enum Entered {
    Done(Vec<i64>),
    Frame(SourceFrame),
}

#[derive(Debug, Clone)]
enum Step {
    Recurse(SourceRef),
    Prepend(i64),
}

#[derive(Debug)]
struct SourceFrame {
    course_id: i64,
    visited: BTreeSet<i64>,
    steps: Vec<Step>,
    next: usize,
    collected: Vec<i64>,
    awaiting: Option<SourceRef>,
}

impl SourceFrame {
    fn finish(mut self) -> Vec<i64> {
        if !self.collected.contains(&self.course_id) {
            self.collected.push(self.course_id);
        }
        dedup_preserving_order(self.collected)
    }
}

enum Action {
    Continue,
    Push(SourceFrame),
    Pop,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Building
    // -------------------------------------------------------------------------

    pub fn add_course(&mut self, course_id: i64, name: impl Into<String>) {
        self.courses.insert(course_id, name.into());
    }

    pub fn add_group(&mut self, group_id: i64, name: impl Into<String>) {
        self.groups.insert(group_id, name.into());
    }

    /// Adds a link. Edges are kept ordered by link id so the lowest id wins
    /// every tie-break.
    pub fn add_link(&mut self, edge: LinkEdge) {
        let pos = self
            .edges
            .partition_point(|existing| existing.link_id < edge.link_id);
        self.edges.insert(pos, edge);
        self.rebuild_incoming();
    }

    /// Records a distinct enrolment instance that put members into a group.
    pub fn add_origin(&mut self, course_id: i64, group_id: i64, origin: MemberOrigin) {
        let origins = self.origins.entry((course_id, group_id)).or_default();
        if origins.iter().any(|o| o.instance_id == origin.instance_id) {
            return;
        }
        let pos = origins.partition_point(|o| o.instance_id < origin.instance_id);
        origins.insert(pos, origin);
    }

    fn rebuild_incoming(&mut self) {
        self.incoming.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            if edge.enabled {
                self.incoming
                    .entry(edge.target.course_id)
                    .or_default()
                    .push(idx);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }

    pub fn course_name(&self, course_id: i64) -> Option<&str> {
        self.courses.get(&course_id).map(String::as_str)
    }

    pub fn group_name(&self, group_id: i64) -> Option<&str> {
        self.groups.get(&group_id).map(String::as_str)
    }

    /// Lowest-id enabled link whose target is `at` (course alone when no
    /// group is given).
    fn first_incoming(&self, at: SourceRef) -> Option<&LinkEdge> {
        self.incoming
            .get(&at.course_id)?
            .iter()
            .map(|idx| &self.edges[*idx])
            .find(|edge| match at.group_id {
                Some(group_id) => edge.target.group_id == Some(group_id),
                None => true,
            })
    }

    /// Enabled links writing into the same target group.
    pub fn aggregated_links(&self, course_id: i64, group_id: i64) -> Vec<i64> {
        self.incoming
            .get(&course_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|idx| &self.edges[*idx])
                    .filter(|edge| edge.target.group_id == Some(group_id))
                    .map(|edge| edge.link_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Root Resolver
    // -------------------------------------------------------------------------

    /// Walks incoming links back to the first course that is not itself a
    /// link target.
    ///
    /// ## Errors
    /// - `CycleDetected` when a course is revisited.
    /// - `UnresolvableSource` when the walk ends at a missing course.
    ///
    /// Callers treat both as "use the logical source as root" and flag it.
    pub fn resolve_root(&self, course_id: i64, group_id: Option<i64>) -> CoreResult<RootSource> {
        self.walk_to_root(BTreeSet::new(), course_id, group_id)
    }

    /// Resolves the root of a link's source. The walk starts with the link's
    /// target course already visited, so a chain leading back into it is a
    /// cycle even before the link itself is stored.
    pub fn resolve_link_root(
        &self,
        target_course_id: i64,
        course_id: i64,
        group_id: Option<i64>,
    ) -> CoreResult<RootSource> {
        self.walk_to_root(BTreeSet::from([target_course_id]), course_id, group_id)
    }

    fn walk_to_root(
        &self,
        mut visited: BTreeSet<i64>,
        course_id: i64,
        group_id: Option<i64>,
    ) -> CoreResult<RootSource> {
        let mut supplied_groups: Vec<Option<i64>> = Vec::new();
        let mut current = SourceRef::new(course_id, group_id);

        loop {
            if !visited.insert(current.course_id) {
                return Err(CoreError::CycleDetected {
                    course_id: current.course_id,
                });
            }

            if let Some(edge) = self.first_incoming(current) {
                supplied_groups.push(edge.parent.group_id);
                current = edge.parent;
                continue;
            }

            let course_name = self
                .course_name(current.course_id)
                .ok_or(CoreError::UnresolvableSource {
                    course_id: current.course_id,
                })?
                .to_string();

            let mut root = RootSource {
                course_id: current.course_id,
                group_id: None,
                course_name,
                group_name: None,
            };

            // Deepest hop first, mirroring the unwinding order of the walk.
            let candidates = std::iter::once(current.group_id).chain(supplied_groups.into_iter().rev());
            for group_id in candidates.flatten() {
                if let Some(name) = self.group_name(group_id) {
                    root.group_id = Some(group_id);
                    root.group_name = Some(name.to_string());
                    break;
                }
            }

            return Ok(root);
        }
    }

    // -------------------------------------------------------------------------
    // Source-Course Set
    // -------------------------------------------------------------------------

    /// Every course that contributed members to `group_id` transitively,
    /// roots first, `course_id` last, without duplicates.
    pub fn compute_source_courses(&self, course_id: i64, group_id: Option<i64>) -> Vec<i64> {
        let mut stack = match self.enter(SourceRef::new(course_id, group_id), &BTreeSet::new()) {
            Entered::Done(courses) => return courses,
            Entered::Frame(frame) => vec![frame],
        };
        let mut returned: Option<Vec<i64>> = None;

        loop {
            let action = {
                let Some(frame) = stack.last_mut() else {
                    return vec![course_id];
                };

                if let Some(result) = returned.take() {
                    if let Some(parent) = frame.awaiting.take() {
                        self.splice(frame, result, parent);
                    }
                }

                if frame.next < frame.steps.len() {
                    let step = frame.steps[frame.next].clone();
                    frame.next += 1;
                    match step {
                        Step::Prepend(parent_course) => {
                            if !frame.collected.contains(&parent_course) {
                                frame.collected.insert(0, parent_course);
                            }
                            Action::Continue
                        }
                        Step::Recurse(parent) => match self.enter(parent, &frame.visited) {
                            Entered::Done(result) => {
                                self.splice(frame, result, parent);
                                Action::Continue
                            }
                            Entered::Frame(child) => {
                                frame.awaiting = Some(parent);
                                Action::Push(child)
                            }
                        },
                    }
                } else {
                    Action::Pop
                }
            };

            match action {
                Action::Continue => {}
                Action::Push(child) => stack.push(child),
                Action::Pop => {
                    if let Some(frame) = stack.pop() {
                        let result = frame.finish();
                        if stack.is_empty() {
                            return result;
                        }
                        returned = Some(result);
                    }
                }
            }
        }
    }

    fn enter(&self, at: SourceRef, visited: &BTreeSet<i64>) -> Entered {
        if visited.contains(&at.course_id) {
            return Entered::Done(Vec::new());
        }
        let mut visited = visited.clone();
        visited.insert(at.course_id);

        let Some(group_id) = at.group_id else {
            return Entered::Done(vec![at.course_id]);
        };
        let origins = match self.origins.get(&(at.course_id, group_id)) {
            Some(origins) if !origins.is_empty() => origins,
            _ => return Entered::Done(vec![at.course_id]),
        };

        let steps = origins
            .iter()
            .filter_map(|origin| match &origin.kind {
                OriginKind::Link { parent } if parent.course_id != at.course_id => {
                    Some(Step::Recurse(*parent))
                }
                OriginKind::Meta {
                    parent_course_id: Some(parent),
                } => Some(Step::Prepend(*parent)),
                _ => None,
            })
            .collect();

        Entered::Frame(SourceFrame {
            course_id: at.course_id,
            visited,
            steps,
            next: 0,
            collected: Vec::new(),
            awaiting: None,
        })
    }

    /// Puts a parent's courses in front of what the frame collected so far,
    /// then makes sure the parent's root leads the list.
    fn splice(&self, frame: &mut SourceFrame, parent_courses: Vec<i64>, parent: SourceRef) {
        let mut merged: Vec<i64> = parent_courses
            .into_iter()
            .filter(|course| *course != frame.course_id)
            .collect();
        merged.append(&mut frame.collected);
        frame.collected = dedup_preserving_order(merged);

        if let Ok(root) = self.resolve_root(parent.course_id, parent.group_id) {
            if !frame.collected.contains(&root.course_id) {
                frame.collected.insert(0, root.course_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Chain Display
    // -------------------------------------------------------------------------

    /// One path per enrolment method that fed the source group, each running
    /// from its root down to `target`.
    pub fn chain_paths(&self, target: SourceRef, source: SourceRef) -> Vec<ChainPath> {
        let Some(source_group) = source.group_id else {
            return Vec::new();
        };
        let direct = || vec![vec![self.step(source), self.step(target)]];

        let origins = match self.origins.get(&(source.course_id, source_group)) {
            Some(origins) if !origins.is_empty() => origins,
            _ => return direct(),
        };

        let mut paths: Vec<ChainPath> = origins
            .iter()
            .map(|origin| {
                let mut path = match &origin.kind {
                    OriginKind::Link { parent } if parent.course_id != source.course_id => {
                        self.path_to_root(*parent)
                    }
                    OriginKind::Meta {
                        parent_course_id: Some(parent),
                    } => vec![self.step(SourceRef::new(*parent, None))],
                    _ => Vec::new(),
                };
                path.push(self.step(source));
                path.push(self.step(target));
                path
            })
            .collect();

        if paths.is_empty() {
            paths = direct();
        }
        paths
    }

    /// Steps from the root down to `start`. Stops at the first revisited
    /// course.
    fn path_to_root(&self, start: SourceRef) -> ChainPath {
        let mut visited = BTreeSet::new();
        let mut walked = Vec::new();
        let mut current = start;

        while visited.insert(current.course_id) {
            walked.push(self.step(current));
            match self.first_incoming(current) {
                Some(edge) => current = edge.parent,
                None => break,
            }
        }

        walked.reverse();
        walked
    }

    fn step(&self, at: SourceRef) -> ChainStep {
        ChainStep {
            course_id: at.course_id,
            group_id: at.group_id,
            course_name: self
                .course_name(at.course_id)
                .map(str::to_string)
                .unwrap_or_else(|| at.course_id.to_string()),
            group_name: at
                .group_id
                .and_then(|id| self.group_name(id))
                .map(str::to_string),
        }
    }
}

fn dedup_preserving_order(courses: Vec<i64>) -> Vec<i64> {
    let mut seen = BTreeSet::new();
    courses
        .into_iter()
        .filter(|course| seen.insert(*course))
        .collect()
}
