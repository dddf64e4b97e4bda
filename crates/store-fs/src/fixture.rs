//! Throwaway storage trees for tests.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use core_model::{MESSAGE_DIR, PART_DIR, SESSION_DIR};
use serde_json::json;
use tempfile::TempDir;

use crate::FsStore;

pub const SIGNATURE_ERROR: &str = "Invalid `signature` in `thinking` block";

pub struct StorageFixture {
    dir: TempDir,
}

impl Default for StorageFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp storage root");
        for sub in [SESSION_DIR, MESSAGE_DIR, PART_DIR] {
            fs::create_dir_all(dir.path().join(sub)).expect("create storage subdir");
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn store(&self) -> FsStore {
        FsStore::open(self.root()).expect("open fixture store")
    }

    pub fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture parent");
        }
        fs::write(&path, contents).expect("write fixture file");
        self
    }

    pub fn session(&self, project: &str, id: &str, title: &str) -> &Self {
        let body = json!({
            "id": id,
            "projectID": project,
            "title": title,
            "time": {"created": 1_700_000_000_000_i64, "updated": 1_700_000_000_000_i64},
        });
        self.write(&format!("{SESSION_DIR}/{project}/{id}.json"), &body.to_string())
    }

    pub fn message(&self, session: &str, id: &str, role: &str, created: i64) -> &Self {
        let body = json!({
            "id": id,
            "sessionID": session,
            "role": role,
            "modelID": "claude-sonnet-4",
            "providerID": "anthropic",
            "time": {"created": created},
        });
        self.write(&format!("{MESSAGE_DIR}/{session}/{id}.json"), &body.to_string())
    }

    /// An assistant message whose error record carries `text`.
    pub fn errored(&self, session: &str, id: &str, created: i64, text: &str) -> &Self {
        let body = json!({
            "id": id,
            "sessionID": session,
            "role": "assistant",
            "modelID": "gpt-5",
            "providerID": "openai",
            "time": {"created": created},
            "error": {"name": "APIError", "data": {"message": text, "statusCode": 400}},
        });
        self.write(&format!("{MESSAGE_DIR}/{session}/{id}.json"), &body.to_string())
    }

    /// An errored message reporting a bad thinking block at `messages.{index}.content.{content}`.
    pub fn signature_error(
        &self,
        session: &str,
        id: &str,
        created: i64,
        index: usize,
        content: usize,
    ) -> &Self {
        let text = format!("messages.{index}.content.{content}: {SIGNATURE_ERROR}");
        self.errored(session, id, created, &text)
    }

    pub fn part(&self, message: &str, id: &str, kind: &str) -> &Self {
        let body = json!({
            "id": id,
            "messageID": message,
            "type": kind,
            "text": "...",
        });
        self.write(&format!("{PART_DIR}/{message}/{id}.json"), &body.to_string())
    }

    /// Relative path to blake3 hex digest for every file under the root.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, String> {
        let mut out = BTreeMap::new();
        let mut stack = vec![self.root().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).expect("read fixture dir").flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let bytes = fs::read(&path).expect("read fixture file");
                let rel = path
                    .strip_prefix(self.root())
                    .expect("fixture path under root")
                    .to_path_buf();
                out.insert(rel, blake3::hash(&bytes).to_hex().to_string());
            }
        }
        out
    }
}
