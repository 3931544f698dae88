//! Group view assignments
//!
//! The group view sorts the forest under six fixed pseudo entries. An
//! entry's group comes from `log_group.json`; entries without an explicit
//! group follow their parent, and root entries without one land in
//! `Other`.
//!
//! | Id | Group |
//! |----|-------|
//! | 1 | Deadline |
//! | 2 | WorkPerf |
//! | 3 | LifeEnhance |
//! | 4 | WorkHack |
//! | 5 | LifeHack |
//! | 6 | Other |

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{write_atomic, Result, StorageError};
use crate::domain::EntryView;

/// Group names in display order; a group's id is its position plus one
pub const GROUP_NAMES: [&str; 6] = [
    "Deadline",
    "WorkPerf",
    "LifeEnhance",
    "WorkHack",
    "LifeHack",
    "Other",
];

/// The catch-all group, collapsed until the user expands it
pub const GROUP_OTHER_ID: i64 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Assignment {
    log_id: i64,
    group_id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct GroupDocument {
    assignments: Vec<Assignment>,
}

/// Persisted entry id → group id mapping
pub struct GroupStore {
    path: PathBuf,
    mapping: Mutex<HashMap<i64, i64>>,
}

impl GroupStore {
    /// Loads `path`; a missing file means no assignments
    pub fn open(path: &Path) -> Result<Self> {
        let mut mapping = HashMap::new();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            if !content.trim().is_empty() {
                let doc: GroupDocument = serde_json::from_str(&content)?;
                for a in doc.assignments {
                    if a.group_id == 0 {
                        mapping.remove(&a.log_id);
                    } else {
                        mapping.insert(a.log_id, a.group_id);
                    }
                }
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            mapping: Mutex::new(mapping),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<i64, i64>>> {
        self.mapping
            .lock()
            .map_err(|_| StorageError::Internal("group store lock poisoned".into()))
    }

    /// Snapshot of the current mapping
    pub fn mapping(&self) -> Result<HashMap<i64, i64>> {
        Ok(self.lock()?.clone())
    }

    /// Assigns `log_id` to `group_id`; 0 removes the assignment
    pub fn assign(&self, log_id: i64, group_id: i64) -> Result<()> {
        if !(0..=GROUP_OTHER_ID).contains(&group_id) {
            return Err(StorageError::Invalid(format!("unknown group {}", group_id)));
        }

        let mut mapping = self.lock()?;
        if group_id == 0 || group_id == GROUP_OTHER_ID {
            mapping.remove(&log_id);
        } else {
            mapping.insert(log_id, group_id);
        }

        let mut assignments: Vec<Assignment> = mapping
            .iter()
            .map(|(log_id, group_id)| Assignment {
                log_id: *log_id,
                group_id: *group_id,
            })
            .collect();
        assignments.sort_by_key(|a| a.log_id);

        let bytes = serde_json::to_vec_pretty(&GroupDocument { assignments })?;
        write_atomic(&self.path, &bytes, false)?;
        tracing::debug!(log_id, group_id, "group assignment saved");
        Ok(())
    }
}

/// Where a projected entry is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Group(i64),
    Entry(i64),
}

/// Projects `forest` under the six group rows
///
/// `collapsed` holds the user's collapse choices per group id; groups
/// without a choice start expanded, except `Other`.
pub fn group_forest(
    forest: &[EntryView],
    mapping: &HashMap<i64, i64>,
    collapsed: &HashMap<i64, bool>,
) -> Vec<EntryView> {
    fn walk(
        view: &EntryView,
        ancestors: &mut Vec<(i64, i64)>,
        mapping: &HashMap<i64, i64>,
        staged: &mut HashMap<Slot, Vec<EntryView>>,
    ) {
        let id = view.id();
        let explicit = mapping
            .get(&id)
            .copied()
            .filter(|g| (1..GROUP_OTHER_ID).contains(g));

        let (group, slot) = match explicit {
            Some(g) => match ancestors.iter().rev().find(|(_, ag)| *ag == g) {
                Some((ancestor, _)) => (g, Slot::Entry(*ancestor)),
                None => (g, Slot::Group(g)),
            },
            None => match ancestors.last() {
                Some((parent, pg)) => (*pg, Slot::Entry(*parent)),
                None => (GROUP_OTHER_ID, Slot::Group(GROUP_OTHER_ID)),
            },
        };

        let mut projected = view.clone();
        projected.children = Vec::new();
        staged.entry(slot).or_default().push(projected);

        ancestors.push((id, group));
        for child in &view.children {
            walk(child, ancestors, mapping, staged);
        }
        ancestors.pop();
    }

    fn assemble(
        views: Vec<EntryView>,
        staged: &mut HashMap<Slot, Vec<EntryView>>,
    ) -> Vec<EntryView> {
        views
            .into_iter()
            .map(|mut view| {
                let children = staged.remove(&Slot::Entry(view.id())).unwrap_or_default();
                view.children = assemble(children, staged);
                view
            })
            .collect()
    }

    let mut staged = HashMap::new();
    let mut ancestors = Vec::new();
    for view in forest {
        walk(view, &mut ancestors, mapping, &mut staged);
    }

    GROUP_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let id = i as i64 + 1;
            let is_collapsed = collapsed
                .get(&id)
                .copied()
                .unwrap_or(id == GROUP_OTHER_ID);
            let mut group = EntryView::group(id, name, is_collapsed);
            let members = staged.remove(&Slot::Group(id)).unwrap_or_default();
            group.children = assemble(members, &mut staged);
            group
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{tree, Entry, ViewType};
    use tempfile::TempDir;

    fn forest() -> Vec<EntryView> {
        // 10 ── 11 ── 12
        // 20
        let mk = |id, parent_id| {
            let mut e = Entry::child_of(parent_id, format!("e{}", id));
            e.id = id;
            e
        };
        tree::build_forest(
            vec![mk(10, 0), mk(11, 10), mk(12, 11), mk(20, 0)],
            HashMap::new(),
        )
    }

    fn ids(views: &[EntryView]) -> Vec<i64> {
        views.iter().map(|v| v.id()).collect()
    }

    #[test]
    fn assignments_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log_group.json");
        {
            let store = GroupStore::open(&path).unwrap();
            store.assign(10, 1).unwrap();
            store.assign(20, 3).unwrap();
            store.assign(20, 0).unwrap();
        }
        let store = GroupStore::open(&path).unwrap();
        let mapping = store.mapping().unwrap();
        assert_eq!(mapping.get(&10), Some(&1));
        assert!(!mapping.contains_key(&20));
    }

    #[test]
    fn rejects_unknown_group() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::open(&dir.path().join("log_group.json")).unwrap();
        assert!(store.assign(1, 9).is_err());
    }

    #[test]
    fn unassigned_roots_go_to_other() {
        let groups = group_forest(&forest(), &HashMap::new(), &HashMap::new());
        assert_eq!(groups.len(), 6);
        assert!(groups.iter().all(|g| g.kind == ViewType::Group));

        let other = &groups[5];
        assert_eq!(other.data.text, "Other");
        assert!(other.collapsed);
        assert_eq!(ids(&other.children), vec![10, 20]);
        assert_eq!(ids(&other.children[0].children), vec![11]);
    }

    #[test]
    fn explicit_child_group_is_lifted_out() {
        let mapping = HashMap::from([(10, 1), (12, 2)]);
        let groups = group_forest(&forest(), &mapping, &HashMap::new());

        assert_eq!(ids(&groups[0].children), vec![10]);
        assert_eq!(ids(&groups[0].children[0].children), vec![11]);
        assert!(groups[0].children[0].children[0].children.is_empty());
        assert_eq!(ids(&groups[1].children), vec![12]);
        assert_eq!(ids(&groups[5].children), vec![20]);
    }

    #[test]
    fn collapse_choice_overrides_default() {
        let collapsed = HashMap::from([(GROUP_OTHER_ID, false), (1, true)]);
        let groups = group_forest(&forest(), &HashMap::new(), &collapsed);
        assert!(groups[0].collapsed);
        assert!(!groups[5].collapsed);
    }
}
