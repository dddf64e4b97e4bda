use std::{collections::BTreeSet, path::PathBuf};

use chrono::Local;
use core_model::{RepairPlan, RepairResult, RepairStatus, Session};
use store_fs::FsStore;
use tracing::{info, warn};

use crate::{RepairOptions, backup, planner};

/// Backs up and then deletes the files of a plan.
///
/// The backup is complete and verified before the first deletion. A deletion
/// failure stops the run and reports `Failed` with what was already removed;
/// there is no automatic rollback, the backup is the recovery path.
pub fn execute(
    store: &FsStore,
    session: &Session,
    plan: &RepairPlan,
    options: &RepairOptions,
) -> RepairResult {
    let plan = planner::recheck(store, plan);
    if plan.is_empty() {
        info!(session = %session.id, "nothing left to remove");
        return RepairResult::no_op(session, options.dry_run);
    }
    if options.dry_run {
        info!(
            session = %session.id,
            messages = plan.messages.len(),
            parts = plan.parts.len(),
            "dry run; storage untouched"
        );
        return RepairResult {
            session_id: session.id.clone(),
            title: session.title.clone(),
            status: RepairStatus::Success,
            dry_run: true,
            messages_removed: plan.message_ids(),
            parts_removed: plan.parts.len(),
            backup_path: None,
            error: None,
        };
    }

    let backup_dir = match backup::create_backup_dir(&options.backup_root, &session.id, Local::now())
    {
        Ok(dir) => dir,
        Err(err) => {
            warn!(session = %session.id, error = %err, "could not create backup directory");
            return RepairResult::failed(session, false, err);
        }
    };
    if let Err(err) = backup::write_backup(store, &plan, &backup_dir) {
        warn!(session = %session.id, error = %err, "backup failed; storage untouched");
        return RepairResult {
            backup_path: Some(backup_dir),
            ..RepairResult::failed(session, false, err)
        };
    }
    info!(session = %session.id, backup = %backup_dir.display(), "backup written");
    commit(store, session, &plan, backup_dir)
}

/// Deletes the files of a plan that is already backed up.
///
/// Messages go newest first: removing a later message never shifts the index
/// of an earlier source, so whatever a failed run leaves behind still points
/// at the right message.
fn commit(
    store: &FsStore,
    session: &Session,
    plan: &RepairPlan,
    backup_dir: PathBuf,
) -> RepairResult {
    let mut messages_removed = Vec::new();
    let mut parts_removed = 0;
    let mut failure = None;
    for file in plan.messages.iter().rev() {
        match store.delete_file(&file.path) {
            Ok(()) => messages_removed.push(file.id.clone()),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    messages_removed.reverse();
    if failure.is_none() {
        for file in &plan.parts {
            match store.delete_file(&file.path) {
                Ok(()) => parts_removed += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
    }

    let part_dirs: BTreeSet<_> = plan.parts.iter().filter_map(|p| p.path.parent()).collect();
    for dir in part_dirs {
        if let Err(err) = store.remove_dir_if_empty(dir) {
            warn!(dir = %dir.display(), error = %err, "could not remove empty part directory");
        }
    }

    if let Some(err) = &failure {
        warn!(
            session = %session.id,
            error = %err,
            messages = messages_removed.len(),
            parts = parts_removed,
            backup = %backup_dir.display(),
            "deletion stopped partway; restore from backup if needed"
        );
    } else {
        info!(session = %session.id, messages = messages_removed.len(), parts = parts_removed, "repaired");
    }
    RepairResult {
        session_id: session.id.clone(),
        title: session.title.clone(),
        status: if failure.is_some() {
            RepairStatus::Failed
        } else {
            RepairStatus::Success
        },
        dry_run: false,
        messages_removed,
        parts_removed,
        backup_path: Some(backup_dir),
        error: failure.map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use store_fs::fixture::StorageFixture;

    #[test]
    fn failed_delete_stops_and_keeps_the_source() {
        let fx = StorageFixture::new();
        fx.session("proj", "ses_1", "Half done")
            .message("ses_1", "msg_t0", "user", 1000)
            .message("ses_1", "msg_t1", "assistant", 2000)
            .part("msg_t1", "prt_a", "reasoning")
            .signature_error("ses_1", "msg_t2", 3000, 1, 0)
            .signature_error("ses_1", "msg_t3", 4000, 1, 0);
        let store = fx.store();
        let corrupted = scan::scan_session(&store, "ses_1").unwrap().unwrap();
        let group = scan::resolve(&store, &corrupted);
        let plan = planner::plan(&store, &group);
        let backup_dir =
            backup::create_backup_dir(&fx.path("repair-backups"), "ses_1", Local::now()).unwrap();
        backup::write_backup(&store, &plan, &backup_dir).unwrap();

        // A directory where msg_t2's file was makes its unlink fail.
        let blocked = fx.path("message/ses_1/msg_t2.json");
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();

        let result = commit(&store, &group.session, &plan, backup_dir.clone());
        assert_eq!(result.status, RepairStatus::Failed);
        assert_eq!(result.messages_removed, vec!["msg_t3"]);
        assert_eq!(result.parts_removed, 0);
        assert_eq!(result.backup_path.as_deref(), Some(backup_dir.as_path()));
        assert!(result.error.is_some());

        assert!(!fx.path("message/ses_1/msg_t3.json").exists());
        assert!(fx.path("message/ses_1/msg_t1.json").is_file());
        assert!(fx.path("part/msg_t1/prt_a.json").is_file());
        assert!(backup_dir.join("message/ses_1/msg_t3.json").is_file());
    }
}
