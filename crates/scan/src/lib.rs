//! Read-only half of the pipeline: find corrupted sessions, work out which
//! messages caused them, and map user-supplied IDs onto sessions.

mod resolver;
mod scanner;
mod target;

pub use resolver::{parse_position, resolve};
pub use scanner::{CorruptedSession, is_signature_error, scan, scan_session, session_or_unknown};
pub use target::resolve_target;
