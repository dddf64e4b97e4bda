use std::{io, path::Path, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A record file exists but cannot be decoded into its expected shape.
    #[error("malformed record {}: {reason}", path.display())]
    MalformedRecord { path: PathBuf, reason: String },

    /// An errored message whose text carries no `messages.N.content.M` reference.
    #[error("message {message_id}: error text has no messages.N.content.M position: {text:?}")]
    MalformedErrorFormat { message_id: String, text: String },

    #[error("'{target}' matches more than one session: {}", candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The storage root itself is unusable; fatal to the whole invocation.
    #[error("storage root {} is unusable: {reason}", path.display())]
    StorageRoot { path: PathBuf, reason: String },
}

impl Error {
    /// Classifies an I/O failure on `path` into the taxonomy.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                kind: "file",
                id: path.display().to_string(),
            },
            io::ErrorKind::PermissionDenied => Error::PermissionDenied { path },
            _ => Error::Io { path, source },
        }
    }

    pub fn malformed(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Error::MalformedRecord {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classifies_not_found() {
        let err = Error::io("/x/y.json", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "file not found: /x/y.json");
    }

    #[test]
    fn io_classifies_permission_denied() {
        let err = Error::io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn io_keeps_other_kinds() {
        let err = Error::io("/x", io::Error::other("disk on fire"));
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn ambiguous_lists_candidates() {
        let err = Error::AmbiguousTarget {
            target: "ses_a".to_string(),
            candidates: vec!["ses_a1".to_string(), "ses_a2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "'ses_a' matches more than one session: ses_a1, ses_a2"
        );
    }
}
