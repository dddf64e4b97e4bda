//! Mutating half of the pipeline: plan, back up, delete, and restore.

use std::path::PathBuf;

use core_model::{RepairResult, Result};
use scan::CorruptedSession;
use store_fs::FsStore;
use tracing::{info, warn};

pub mod backup;
mod executor;
mod planner;

pub use backup::{BackupEntry, BackupManifest, RestoreReport, read_manifest, restore};
pub use executor::execute;
pub use planner::{plan, recheck};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub backup_root: PathBuf,
    pub dry_run: bool,
}

/// Repairs one session by ID. A session without signature errors is a no-op.
pub fn repair_session(store: &FsStore, options: &RepairOptions, session_id: &str) -> RepairResult {
    match scan::scan_session(store, session_id) {
        Ok(Some(corrupted)) => repair_corrupted(store, options, &corrupted),
        Ok(None) => {
            info!(session = %session_id, "no signature errors; nothing to do");
            RepairResult::no_op(&scan::session_or_unknown(store, session_id), options.dry_run)
        }
        Err(err) => RepairResult::failed(
            &scan::session_or_unknown(store, session_id),
            options.dry_run,
            err,
        ),
    }
}

pub fn repair_corrupted(
    store: &FsStore,
    options: &RepairOptions,
    corrupted: &CorruptedSession,
) -> RepairResult {
    let group = scan::resolve(store, corrupted);
    if let Some(reason) = group.unresolved_reason() {
        return RepairResult::failed(
            &group.session,
            options.dry_run,
            format!("{reason}; refusing to guess"),
        );
    }
    let plan = plan(store, &group);
    execute(store, &group.session, &plan, options)
}

/// Repairs every corrupted session, carrying on past per-session failures.
pub fn repair_all(store: &FsStore, options: &RepairOptions) -> Result<Vec<RepairResult>> {
    let corrupted = scan::scan(store)?;
    Ok(corrupted
        .iter()
        .map(|c| {
            let result = repair_corrupted(store, options, c);
            if result.is_failed() {
                warn!(session = %result.session_id, "repair failed; continuing with the next session");
            }
            result
        })
        .collect())
}
