use std::{
    fs,
    path::{Path, PathBuf},
};

use core_model::{Error, MESSAGE_DIR, Message, PART_DIR, Part, Result, SESSION_DIR, Session};
use tracing::{debug, warn};

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;

/// Read/write access to the host application's storage tree.
///
/// ```text
/// session/{projectID}/{sessionID}.json
/// message/{sessionID}/{messageID}.json
/// part/{messageID}/{partID}.json
/// ```
///
/// Individual unreadable or malformed records are skipped with a warning;
/// only an unusable root is reported as an error from the listing calls.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|e| Error::StorageRoot {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(Error::StorageRoot {
                path: root,
                reason: "not a directory".to_string(),
            });
        }
        let message_dir = root.join(MESSAGE_DIR);
        fs::read_dir(&message_dir).map_err(|e| Error::StorageRoot {
            path: message_dir.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn message_file(&self, session_id: &str, message_id: &str) -> PathBuf {
        self.root
            .join(MESSAGE_DIR)
            .join(session_id)
            .join(format!("{message_id}.json"))
    }

    pub fn part_dir(&self, message_id: &str) -> PathBuf {
        self.root.join(PART_DIR).join(message_id)
    }

    /// Path of `path` relative to the storage root, if it lies inside it.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for project_dir in subdirs(&self.root.join(SESSION_DIR)) {
            let project = dir_name(&project_dir);
            for path in json_files(&project_dir) {
                if let Some(session) =
                    load(&path, |bytes| Session::decode(bytes, project.as_deref(), &path))
                {
                    out.push(session);
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn find_session(&self, session_id: &str) -> Option<Session> {
        let file = format!("{session_id}.json");
        subdirs(&self.root.join(SESSION_DIR))
            .into_iter()
            .map(|dir| (dir_name(&dir), dir.join(&file)))
            .filter(|(_, path)| path.is_file())
            .find_map(|(project, path)| {
                load(&path, |bytes| Session::decode(bytes, project.as_deref(), &path))
            })
    }

    /// Session IDs that own a message directory, sorted.
    pub fn list_session_ids(&self) -> Result<Vec<String>> {
        let message_dir = self.root.join(MESSAGE_DIR);
        let entries = fs::read_dir(&message_dir).map_err(|e| Error::StorageRoot {
            path: message_dir.clone(),
            reason: e.to_string(),
        })?;
        let mut out: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| dir_name(&path))
            .collect();
        out.sort();
        Ok(out)
    }

    /// Message IDs of a session taken from file names, without decoding.
    pub fn list_message_ids(&self, session_id: &str) -> Vec<String> {
        json_files(&self.root.join(MESSAGE_DIR).join(session_id))
            .iter()
            .filter_map(|path| file_stem(path))
            .collect()
    }

    /// Decoded messages of a session in conversation order.
    pub fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let dir = self.root.join(MESSAGE_DIR).join(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        let mut out: Vec<Message> = json_files(&dir)
            .into_iter()
            .filter_map(|path| load(&path, |bytes| Message::decode(bytes, session_id, &path)))
            .collect();
        out.sort_by(Message::conversation_cmp);
        Ok(out)
    }

    /// Decoded parts of a message ordered by part ID.
    pub fn list_parts(&self, message_id: &str) -> Vec<Part> {
        let mut out: Vec<Part> = self
            .list_part_files(message_id)
            .into_iter()
            .filter_map(|path| load(&path, |bytes| Part::decode(bytes, message_id, &path)))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every part file owned by a message, decodable or not.
    pub fn list_part_files(&self, message_id: &str) -> Vec<PathBuf> {
        json_files(&self.part_dir(message_id))
    }

    pub fn read_raw(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::io(path, e))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), "deleted");
        Ok(())
    }

    /// Copies a file, or a directory recursively, creating parents of `dst`.
    /// Returns the number of files copied.
    pub fn copy_tree(&self, src: &Path, dst: &Path) -> Result<usize> {
        let meta = fs::metadata(src).map_err(|e| Error::io(src, e))?;
        if meta.is_file() {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::copy(src, dst).map_err(|e| Error::io(dst, e))?;
            return Ok(1);
        }
        fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;
        let mut copied = 0;
        for entry in fs::read_dir(src).map_err(|e| Error::io(src, e))? {
            let entry = entry.map_err(|e| Error::io(src, e))?;
            copied += self.copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(copied)
    }

    /// Removes `dir` when it exists and is empty. Returns whether it was removed.
    pub fn remove_dir_if_empty(&self, dir: &Path) -> Result<bool> {
        let mut entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::io(dir, e)),
        };
        if entries.next().is_some() {
            return Ok(false);
        }
        fs::remove_dir(dir).map_err(|e| Error::io(dir, e))?;
        Ok(true)
    }
}

fn load<T>(path: &Path, decode: impl FnOnce(&[u8]) -> Result<T>) -> Option<T> {
    let outcome = fs::read(path)
        .map_err(|e| Error::io(path, e))
        .and_then(|bytes| decode(&bytes));
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable record");
            None
        }
    }
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    out.sort();
    out
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    out.sort();
    out
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(ToOwned::to_owned)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::StorageFixture;

    #[test]
    fn open_rejects_missing_root() {
        let err = FsStore::open("/nonexistent/storage/root").err().unwrap();
        assert!(matches!(err, Error::StorageRoot { .. }));
    }

    #[test]
    fn open_rejects_root_without_message_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsStore::open(dir.path()).err().unwrap();
        assert!(matches!(err, Error::StorageRoot { .. }));
    }

    #[test]
    fn messages_come_back_in_timestamp_order() {
        let fx = StorageFixture::new();
        fx.message("ses_1", "msg_c", "assistant", 300)
            .message("ses_1", "msg_a", "user", 100)
            .message("ses_1", "msg_b", "assistant", 200);
        let ids: Vec<String> = fx
            .store()
            .list_messages("ses_1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["msg_a", "msg_b", "msg_c"]);
    }

    #[test]
    fn malformed_message_is_skipped() {
        let fx = StorageFixture::new();
        fx.message("ses_1", "msg_a", "user", 100)
            .write("message/ses_1/msg_bad.json", "{ not json");
        let messages = fx.store().list_messages("ses_1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(fx.store().list_message_ids("ses_1").len(), 2);
    }

    #[test]
    fn missing_session_dir_lists_nothing() {
        let fx = StorageFixture::new();
        assert!(fx.store().list_messages("ses_nope").unwrap().is_empty());
    }

    #[test]
    fn sessions_carry_project_and_title() {
        let fx = StorageFixture::new();
        fx.session("proj_1", "ses_1", "Refactor parser")
            .write("session/proj_1/ses_broken.json", "[]");
        let store = fx.store();
        let sessions = store.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].project_id.as_deref(), Some("proj_1"));
        assert_eq!(
            store.find_session("ses_1").map(|s| s.title),
            Some("Refactor parser".to_string())
        );
        assert!(store.find_session("ses_2").is_none());
    }

    #[test]
    fn part_files_include_undecodable_parts() {
        let fx = StorageFixture::new();
        fx.part("msg_a", "prt_2", "text")
            .part("msg_a", "prt_1", "reasoning")
            .write("part/msg_a/prt_3.json", "garbage");
        let store = fx.store();
        let parts = store.list_parts("msg_a");
        assert_eq!(
            parts.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["prt_1", "prt_2"]
        );
        assert_eq!(store.list_part_files("msg_a").len(), 3);
    }

    #[test]
    fn delete_reports_not_found() {
        let fx = StorageFixture::new();
        let store = fx.store();
        let err = store
            .delete_file(&store.message_file("ses_1", "msg_gone"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.read_raw(&fx.path("message/x.json")).unwrap_err().is_not_found());
    }

    #[test]
    fn copy_tree_copies_files_and_directories() {
        let fx = StorageFixture::new();
        fx.part("msg_a", "prt_1", "text").part("msg_a", "prt_2", "text");
        let store = fx.store();
        let out = tempfile::tempdir().unwrap();
        let copied = store
            .copy_tree(&store.part_dir("msg_a"), &out.path().join("part/msg_a"))
            .unwrap();
        assert_eq!(copied, 2);
        assert!(out.path().join("part/msg_a/prt_1.json").is_file());

        let single = out.path().join("one/two/prt_1.json");
        assert_eq!(
            store
                .copy_tree(&store.part_dir("msg_a").join("prt_1.json"), &single)
                .unwrap(),
            1
        );
        assert!(single.is_file());
    }

    #[test]
    fn remove_dir_if_empty_keeps_populated_dirs() {
        let fx = StorageFixture::new();
        fx.part("msg_a", "prt_1", "text");
        let store = fx.store();
        let dir = store.part_dir("msg_a");
        assert!(!store.remove_dir_if_empty(&dir).unwrap());
        store.delete_file(&dir.join("prt_1.json")).unwrap();
        assert!(store.remove_dir_if_empty(&dir).unwrap());
        assert!(!store.remove_dir_if_empty(&dir).unwrap());
    }
}
