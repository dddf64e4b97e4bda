use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use core_model::{CorruptionGroup, PlannedFile, RepairPlan};
use store_fs::FsStore;
use tracing::warn;

/// Turns a resolved group into the deduplicated list of files to remove.
/// Files that no longer exist are dropped, so an already-repaired session
/// yields an empty plan.
pub fn plan(store: &FsStore, group: &CorruptionGroup) -> RepairPlan {
    let mut seen = HashSet::new();
    let mut plan = RepairPlan {
        session_id: group.session.id.clone(),
        ..RepairPlan::default()
    };
    for message in &group.messages_to_remove {
        if let Some(file) = admit(store, &mut seen, &message.id, &message.path) {
            plan.messages.push(file);
        }
    }
    for path in &group.parts_to_remove {
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(file) = admit(store, &mut seen, &id, path) {
            plan.parts.push(file);
        }
    }
    plan
}

/// Drops entries whose file disappeared since the plan was made.
pub fn recheck(store: &FsStore, plan: &RepairPlan) -> RepairPlan {
    let still_there = |files: &[PlannedFile]| {
        files
            .iter()
            .filter(|file| {
                let present = store.exists(&file.path);
                if !present {
                    warn!(path = %file.path.display(), "planned file vanished before commit; dropping");
                }
                present
            })
            .cloned()
            .collect::<Vec<_>>()
    };
    RepairPlan {
        session_id: plan.session_id.clone(),
        messages: still_there(&plan.messages),
        parts: still_there(&plan.parts),
    }
}

fn admit(
    store: &FsStore,
    seen: &mut HashSet<PathBuf>,
    id: &str,
    path: &Path,
) -> Option<PlannedFile> {
    if !seen.insert(path.to_path_buf()) {
        return None;
    }
    if !store.exists(path) {
        warn!(path = %path.display(), "file no longer exists; leaving it out of the plan");
        return None;
    }
    Some(PlannedFile {
        id: id.to_string(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use store_fs::fixture::StorageFixture;

    fn scenario() -> StorageFixture {
        let fx = StorageFixture::new();
        fx.message("ses_1", "msg_t0", "user", 1000)
            .message("ses_1", "msg_t1", "assistant", 2000)
            .part("msg_t1", "prt_a", "reasoning")
            .part("msg_t1", "prt_b", "text")
            .signature_error("ses_1", "msg_t2", 3000, 1, 0)
            .signature_error("ses_1", "msg_t3", 4000, 1, 0);
        fx
    }

    fn group(fx: &StorageFixture) -> CorruptionGroup {
        let store = fx.store();
        let corrupted = scan::scan_session(&store, "ses_1").unwrap().unwrap();
        scan::resolve(&store, &corrupted)
    }

    #[test]
    fn plan_lists_messages_then_parts() {
        let fx = scenario();
        let plan = plan(&fx.store(), &group(&fx));
        assert_eq!(plan.session_id, "ses_1");
        assert_eq!(plan.message_ids(), vec!["msg_t1", "msg_t2", "msg_t3"]);
        assert_eq!(
            plan.parts.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["prt_a", "prt_b"]
        );
    }

    #[test]
    fn duplicates_appear_once() {
        let fx = scenario();
        let mut group = group(&fx);
        let again = group.messages_to_remove[0].clone();
        group.messages_to_remove.push(again);
        let part = group.parts_to_remove[0].clone();
        group.parts_to_remove.push(part);
        let plan = plan(&fx.store(), &group);
        assert_eq!(plan.messages.len(), 3);
        assert_eq!(plan.parts.len(), 2);
    }

    #[test]
    fn missing_files_are_dropped() {
        let fx = scenario();
        let group = group(&fx);
        std::fs::remove_file(fx.path("message/ses_1/msg_t2.json")).unwrap();
        std::fs::remove_file(fx.path("part/msg_t1/prt_b.json")).unwrap();
        let plan = plan(&fx.store(), &group);
        assert_eq!(plan.message_ids(), vec!["msg_t1", "msg_t3"]);
        assert_eq!(plan.parts.len(), 1);
    }

    #[test]
    fn recheck_drops_vanished_entries() {
        let fx = scenario();
        let store = fx.store();
        let planned = plan(&store, &group(&fx));
        std::fs::remove_file(fx.path("part/msg_t1/prt_a.json")).unwrap();
        let rechecked = recheck(&store, &planned);
        assert_eq!(rechecked.messages, planned.messages);
        assert_eq!(rechecked.parts.len(), 1);
    }
}
