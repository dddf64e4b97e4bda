use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
    path::PathBuf,
    sync::LazyLock,
};

use core_model::{CorruptionGroup, Error, Message, Position, RepairUnit, Result};
use regex::Regex;
use store_fs::FsStore;
use tracing::{debug, warn};

use crate::scanner::CorruptedSession;

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"messages\.(\d+)\.content\.(\d+)").expect("position pattern is a valid regex")
});

/// Extracts the backend's `messages.N.content.M` reference from an errored
/// message. This is the only place that knows the backend's error format.
pub fn parse_position(message: &Message) -> Result<Position> {
    let text = message.error_text().unwrap_or_default();
    let malformed = || Error::MalformedErrorFormat {
        message_id: message.id.clone(),
        text: text.to_string(),
    };
    let caps = POSITION.captures(text).ok_or_else(malformed)?;
    let message_index = caps[1].parse().map_err(|_| malformed())?;
    let content_index = caps[2].parse().map_err(|_| malformed())?;
    Ok(Position {
        message_index,
        content_index,
    })
}

/// Works out which messages have to go for a corrupted session.
///
/// The session history in conversation order stands in for the backend's
/// message indexing. Each distinct index named by an errored message becomes
/// its own repair unit. Every signature-error message in the session is an
/// echo and is removed too; echoes are matched on error text alone, since
/// the backend gives no causal link between a retry and the original failure.
/// If any unit lacks a trusted source, nothing in the session is removed.
pub fn resolve(store: &FsStore, corrupted: &CorruptedSession) -> CorruptionGroup {
    let session_id = corrupted.session.id.as_str();
    let errored: Vec<Message> = corrupted.errored().cloned().collect();

    let mut units: BTreeMap<usize, RepairUnit> = BTreeMap::new();
    let mut unattributed = Vec::new();
    for message in &errored {
        let position = match parse_position(message) {
            Ok(position) => position,
            Err(err) => {
                warn!(session = %session_id, error = %err, "excluding message from resolution");
                unattributed.push(message.clone());
                continue;
            }
        };
        units
            .entry(position.message_index)
            .or_insert_with(|| locate_source(store, &corrupted.history, position))
            .echoes
            .push(message.clone());
    }
    let mut units: Vec<RepairUnit> = units.into_values().collect();
    for unit in &mut units {
        let problem = check_unit(session_id, corrupted.history.len(), unit);
        unit.problem = problem;
    }

    let mut doomed: Vec<&Message> = Vec::new();
    if units.is_empty() || units.iter().any(|u| !u.is_resolved()) {
        warn!(
            session = %session_id,
            unresolved = units.iter().filter(|u| !u.is_resolved()).count(),
            unattributed = unattributed.len(),
            "cannot tie every errored message to a trusted source; nothing to remove"
        );
    } else {
        doomed.extend(
            units
                .iter()
                .flat_map(|u| u.source.iter().chain(u.echoes.iter())),
        );
        doomed.extend(unattributed.iter());
    }
    doomed.sort_by(|a, b| a.conversation_cmp(b));
    doomed.dedup_by(|a, b| a.id == b.id);
    let messages_to_remove: Vec<Message> = doomed.into_iter().cloned().collect();

    let mut seen = HashSet::new();
    let parts_to_remove: Vec<PathBuf> = messages_to_remove
        .iter()
        .flat_map(|m| store.list_part_files(&m.id))
        .filter(|path| seen.insert(path.clone()))
        .collect();

    debug!(
        session = %session_id,
        units = units.len(),
        messages = messages_to_remove.len(),
        parts = parts_to_remove.len(),
        "resolved"
    );

    CorruptionGroup {
        session: corrupted.session.clone(),
        errored,
        units,
        unattributed,
        messages_to_remove,
        parts_to_remove,
    }
}

fn locate_source(store: &FsStore, history: &[Message], position: Position) -> RepairUnit {
    let source = history.get(position.message_index).cloned();
    let offending_part = source.as_ref().and_then(|s| {
        store
            .list_parts(&s.id)
            .into_iter()
            .nth(position.content_index)
    });
    RepairUnit {
        position,
        source,
        offending_part,
        echoes: Vec::new(),
        problem: None,
    }
}

/// Returns why the message at the unit's position cannot be the source, if
/// it cannot. A mismatched block type only warns; part order is a guess.
fn check_unit(session_id: &str, history_len: usize, unit: &RepairUnit) -> Option<String> {
    let Some(source) = &unit.source else {
        warn!(
            session = %session_id,
            position = %unit.position,
            messages = history_len,
            "position is past the end of the session"
        );
        return Some(format!(
            "position is past the end of the session ({history_len} messages)"
        ));
    };
    if !source.is_assistant() {
        warn!(session = %session_id, message = %source.id, role = %source.role, "source is not an assistant message");
        return Some(format!(
            "{} is a {} message, not an assistant reply",
            source.id, source.role
        ));
    }
    if unit
        .echoes
        .iter()
        .any(|e| e.id != source.id && e.conversation_cmp(source) != Ordering::Greater)
    {
        warn!(session = %session_id, message = %source.id, "source is not earlier than its echoes");
        return Some(format!(
            "{} is not earlier than the messages reporting it",
            source.id
        ));
    }
    match &unit.offending_part {
        Some(part) if !part.is_thinking() => {
            warn!(session = %session_id, part = %part.id, kind = %part.kind, "block at reported position is not a thinking block");
        }
        Some(_) => {}
        None => {
            debug!(session = %session_id, message = %source.id, position = %unit.position, "no part at reported content index");
        }
    }
    None
}
