use std::{collections::HashMap, sync::LazyLock};

use core_model::{Message, Result, Session};
use regex::Regex;
use store_fs::FsStore;
use tracing::{debug, info, warn};

static SIGNATURE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Invalid\s+`?signature`?\s+in\s+`?thinking`?\s+block")
        .expect("signature pattern is a valid regex")
});

/// Whether an error text is the backend's thinking-block signature rejection.
/// Case-sensitive; the backticks around `signature` and `thinking` are optional.
pub fn is_signature_error(text: &str) -> bool {
    SIGNATURE_ERROR.is_match(text)
}

fn has_signature_error(message: &Message) -> bool {
    message.error_text().is_some_and(is_signature_error)
}

/// A session with at least one signature-error message.
#[derive(Debug, Clone)]
pub struct CorruptedSession {
    pub session: Session,
    /// Every decodable message of the session, in conversation order.
    pub history: Vec<Message>,
}

impl CorruptedSession {
    pub fn errored(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().filter(|m| has_signature_error(m))
    }
}

/// Walks every message directory once and returns the corrupted sessions
/// sorted by session ID. Read-only.
pub fn scan(store: &FsStore) -> Result<Vec<CorruptedSession>> {
    let mut sessions: HashMap<String, Session> = store
        .list_sessions()
        .into_iter()
        .map(|s| (s.id.clone(), s))
        .collect();
    let session_ids = store.list_session_ids()?;
    info!(sessions = session_ids.len(), "scanning message directories");

    let mut out = Vec::new();
    for session_id in session_ids {
        let history = match store.list_messages(&session_id) {
            Ok(history) => history,
            Err(err) => {
                warn!(session = %session_id, error = %err, "skipping unreadable session");
                continue;
            }
        };
        if !history.iter().any(has_signature_error) {
            debug!(session = %session_id, messages = history.len(), "clean");
            continue;
        }
        let session = sessions
            .remove(&session_id)
            .unwrap_or_else(|| Session::unknown(&session_id));
        out.push(CorruptedSession { session, history });
    }
    info!(corrupted = out.len(), "scan complete");
    Ok(out)
}

/// Scans a single session; `None` when it carries no signature errors.
pub fn scan_session(store: &FsStore, session_id: &str) -> Result<Option<CorruptedSession>> {
    let history = store.list_messages(session_id)?;
    if !history.iter().any(has_signature_error) {
        return Ok(None);
    }
    Ok(Some(CorruptedSession {
        session: session_or_unknown(store, session_id),
        history,
    }))
}

pub fn session_or_unknown(store: &FsStore, session_id: &str) -> Session {
    store
        .find_session(session_id)
        .unwrap_or_else(|| Session::unknown(session_id))
}
