use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use cadence_core::Locked;
use tracing::{debug, info};

use crate::task::{Task, TaskId, TaskInner};

/// Tag index over weakly held tasks.
///
/// Membership never keeps a task alive: a dropped task deregisters itself,
/// and snapshots skip any task that died in between. A task belongs to at
/// most one registry; [`add`](Self::add) moves it out of the previous one.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct TaskCenter {
    shared: Arc<CenterShared>,
}

#[derive(Default)]
pub(crate) struct CenterShared {
    index: Locked<TagIndex>,
}

#[derive(Default)]
struct TagIndex {
    members: BTreeMap<TaskId, Member>,
    tags: BTreeMap<String, BTreeSet<TaskId>>,
}

struct Member {
    task: Weak<TaskInner>,
    tags: BTreeSet<String>,
}

impl Member {
    fn is_alive(&self) -> bool {
        self.task.strong_count() > 0
    }
}

impl TagIndex {
    fn remove(&mut self, id: TaskId) -> Option<Member> {
        let member = self.members.remove(&id)?;
        for tag in &member.tags {
            self.untag(id, tag);
        }
        Some(member)
    }

    fn untag(&mut self, id: TaskId, tag: &str) {
        if let Some(ids) = self.tags.get_mut(tag) {
            ids.remove(&id);
            if ids.is_empty() {
                self.tags.remove(tag);
            }
        }
    }

    fn weak_tasks<'a>(&self, ids: impl Iterator<Item = &'a TaskId>) -> Vec<Weak<TaskInner>> {
        ids.filter_map(|id| self.members.get(id))
            .filter(|m| m.is_alive())
            .map(|m| m.task.clone())
            .collect()
    }
}

impl CenterShared {
    pub(crate) fn register(&self, id: TaskId, task: Weak<TaskInner>) {
        self.index.write(|ix| {
            ix.members.entry(id).or_insert_with(|| Member {
                task,
                tags: BTreeSet::new(),
            });
        });
    }

    pub(crate) fn forget(&self, id: TaskId) {
        let removed = self.index.write(|ix| ix.remove(id));
        if removed.is_some() {
            debug!(task_id = %id, "task left registry");
        }
    }
}

// Upgrading happens outside the index lock: the last strong handle of a task
// may be released here, and its teardown calls back into `forget`.
fn upgrade_all(weak: Vec<Weak<TaskInner>>) -> Vec<Task> {
    weak.iter()
        .filter_map(Weak::upgrade)
        .map(|inner| Task { inner })
        .collect()
}

impl TaskCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry new tasks join by default. Created on first
    /// use and never torn down.
    pub fn global() -> &'static TaskCenter {
        static GLOBAL: OnceLock<TaskCenter> = OnceLock::new();
        GLOBAL.get_or_init(TaskCenter::new)
    }

    pub(crate) fn from_shared(shared: Arc<CenterShared>) -> Self {
        Self { shared }
    }

    /// Register `task` here, removing it (and its tags) from any other
    /// registry. Re-adding a member keeps its tags.
    pub fn add(&self, task: &Task) {
        match task.inner.join(&self.shared) {
            Some(true) => info!(task_id = %task.id(), "task moved between registries"),
            Some(false) => debug!(task_id = %task.id(), "task registered"),
            None => {}
        }
    }

    /// Unregister `task`. Returns `false` if it was not a member.
    pub fn remove(&self, task: &Task) -> bool {
        task.inner.leave(&self.shared)
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.shared
            .index
            .read(|ix| ix.members.contains_key(&task.id()))
    }

    /// Tag a member task. Ignored for tasks registered elsewhere.
    pub fn add_tag(&self, task: &Task, tag: impl Into<String>) {
        self.add_tags(task, [tag]);
    }

    pub fn add_tags<I, S>(&self, task: &Task, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = task.id();
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        let added = self.shared.index.write(|ix| {
            let Some(member) = ix.members.get_mut(&id) else {
                return false;
            };
            for tag in &tags {
                member.tags.insert(tag.clone());
            }
            for tag in tags.iter() {
                ix.tags.entry(tag.clone()).or_default().insert(id);
            }
            true
        });
        if added {
            debug!(task_id = %id, ?tags, "tags added");
        }
    }

    pub fn remove_tag(&self, task: &Task, tag: &str) {
        self.remove_tags(task, [tag]);
    }

    pub fn remove_tags<I, S>(&self, task: &Task, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = task.id();
        self.shared.index.write(|ix| {
            let Some(member) = ix.members.get_mut(&id) else {
                return;
            };
            let removed: Vec<String> = tags
                .into_iter()
                .filter_map(|t| member.tags.take(t.as_ref()))
                .collect();
            for tag in &removed {
                ix.untag(id, tag);
            }
        });
    }

    /// Tags on `task` here, sorted. Empty for non-members.
    pub fn tags_for(&self, task: &Task) -> Vec<String> {
        self.shared.index.read(|ix| {
            ix.members
                .get(&task.id())
                .map(|m| m.tags.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Live tasks carrying `tag`, ordered by id.
    pub fn tasks_for(&self, tag: &str) -> Vec<Task> {
        let weak = self.shared.index.read(|ix| {
            ix.tags
                .get(tag)
                .map(|ids| ix.weak_tasks(ids.iter()))
                .unwrap_or_default()
        });
        upgrade_all(weak)
    }

    /// Every live member, ordered by id.
    pub fn all_tasks(&self) -> Vec<Task> {
        let weak = self
            .shared
            .index
            .read(|ix| ix.weak_tasks(ix.members.keys()));
        upgrade_all(weak)
    }

    /// Every tag held by at least one live task, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        self.shared.index.read(|ix| {
            ix.tags
                .iter()
                .filter(|(_, ids)| {
                    ids.iter()
                        .any(|id| ix.members.get(id).is_some_and(Member::is_alive))
                })
                .map(|(tag, _)| tag.clone())
                .collect()
        })
    }

    /// Suspend every live task under `tag`; returns how many were visited.
    pub fn suspend_by_tag(&self, tag: &str) -> usize {
        self.for_each_tagged(tag, "suspend", Task::suspend)
    }

    pub fn resume_by_tag(&self, tag: &str) -> usize {
        self.for_each_tagged(tag, "resume", Task::resume)
    }

    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        self.for_each_tagged(tag, "cancel", Task::cancel)
    }

    /// Unregister every member without cancelling anything.
    pub fn remove_all(&self) {
        let weak = self
            .shared
            .index
            .read(|ix| ix.weak_tasks(ix.members.keys()));
        let tasks = upgrade_all(weak);
        for task in &tasks {
            task.inner.leave(&self.shared);
        }
        info!(count = tasks.len(), "registry cleared");
    }

    fn for_each_tagged(&self, tag: &str, op: &str, f: impl Fn(&Task)) -> usize {
        let tasks = self.tasks_for(tag);
        for task in &tasks {
            f(task);
        }
        info!(%tag, op, count = tasks.len(), "bulk task operation");
        tasks.len()
    }
}

impl PartialEq for TaskCenter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for TaskCenter {}

impl fmt::Debug for TaskCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (members, tags) = self
            .shared
            .index
            .read(|ix| (ix.members.len(), ix.tags.len()));
        f.debug_struct("TaskCenter")
            .field("members", &members)
            .field("tags", &tags)
            .finish()
    }
}
