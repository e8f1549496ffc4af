//! Self-update client: checks a JSON appcast for newer versions, downloads the
//! update package and hands it to the operating system.
//!
//! The entry point is [`SessionRegistry`], which owns one [`UpdateSession`]
//! per appcast URL and fans their [`Event`]s out to subscribers.

mod error;
pub mod filesystem;
pub mod http;
pub mod process;
pub mod updater;
#[cfg(windows)]
mod wstring;

pub use error::UpdateError;
pub use updater::events::{Decision, Event, Prompter, SessionEvent, TerminateReason, Unattended, UpdateNotice};
pub use updater::manifest::ManifestRecord;
pub use updater::progress::Progress;
pub use updater::registry::{AppInfo, SessionRegistry};
pub use updater::session::{CancelOutcome, SessionConfig, SessionState, UpdateSession};
pub use updater::version::is_greater;
