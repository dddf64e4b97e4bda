use std::collections::{BTreeMap, BTreeSet};

use core_model::{Error, Result};
use store_fs::FsStore;

/// Maps a user-supplied session or message ID (full, or an unambiguous
/// prefix) to the session it names.
///
/// Exact matches win over prefixes. A prefix may omit the `ses_`/`msg_`
/// type prefix.
pub fn resolve_target(store: &FsStore, target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::NotFound {
            kind: "session or message",
            id: String::new(),
        });
    }

    let message_dirs = store.list_session_ids()?;
    let mut sessions: BTreeSet<String> = message_dirs.iter().cloned().collect();
    sessions.extend(store.list_sessions().into_iter().map(|s| s.id));
    if sessions.contains(target) {
        return Ok(target.to_string());
    }

    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    for session_id in &message_dirs {
        for message_id in store.list_message_ids(session_id) {
            owners.insert(message_id, session_id.clone());
        }
    }
    if let Some(session_id) = owners.get(target) {
        return Ok(session_id.clone());
    }

    let mut matched: BTreeSet<String> = sessions
        .iter()
        .filter(|id| id_has_prefix(id, target))
        .cloned()
        .collect();
    matched.extend(
        owners
            .iter()
            .filter(|(message_id, _)| id_has_prefix(message_id, target))
            .map(|(_, session_id)| session_id.clone()),
    );

    match matched.len() {
        0 => Err(Error::NotFound {
            kind: "session or message",
            id: target.to_string(),
        }),
        1 => Ok(matched.into_iter().next().unwrap_or_default()),
        _ => Err(Error::AmbiguousTarget {
            target: target.to_string(),
            candidates: matched.into_iter().collect(),
        }),
    }
}

fn id_has_prefix(id: &str, prefix: &str) -> bool {
    id.starts_with(prefix)
        || id
            .split_once('_')
            .is_some_and(|(_, rest)| rest.starts_with(prefix))
}
