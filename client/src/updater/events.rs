use super::lock;
use super::progress::Progress;
use super::session::SessionState;
use crate::error::UpdateError;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

/// What the user is shown when a newer version is found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub module_name: String,
    pub latest_version: String,
    pub changelog: String,
    pub mandatory: bool,
}

/// Why the host application is being asked to quit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// A mandatory update was declined.
    UpdateDeclined,
    /// A mandatory download was cancelled.
    DownloadCancelled,
    /// Installing a mandatory update was deferred.
    InstallDeferred,
    /// The installer was launched and needs the application closed.
    InstallerLaunched,
}

#[derive(Debug, Clone)]
pub enum Event {
    StateChanged(SessionState),
    /// Emitted exactly once per check, whatever its outcome.
    CheckFinished {
        update_available: bool,
        error: Option<Arc<UpdateError>>,
    },
    /// Raw appcast body, in custom appcast mode.
    AppcastDownloaded(Arc<Vec<u8>>),
    /// No newer version (or the check failed) and `notify_on_finish` is set.
    UpToDate {
        error: Option<Arc<UpdateError>>,
    },
    /// A transfer (re)started; `url` is the package URL being fetched.
    DownloadStarted {
        url: String,
        path: PathBuf,
    },
    DownloadProgress(Progress),
    /// The package was saved under `path`.
    DownloadFinished {
        path: PathBuf,
    },
    DownloadFailed(Arc<UpdateError>),
    DownloadCancelled,
    /// The host process should exit. The client never exits by itself.
    TerminateRequested(TerminateReason),
}

/// An [`Event`] tagged with the appcast URL of the session that raised it.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub url: String,
    pub event: Event,
}

/// Decision points of the update flow. Called from the session's worker
/// thread (or from the caller of `cancel_download`), so implementations may
/// block until the user answers.
pub trait Prompter: Send + Sync {
    fn update_available(&self, url: &str, notice: &UpdateNotice) -> Decision;

    fn confirm_cancel(&self, url: &str, mandatory: bool) -> Decision;

    fn confirm_install(&self, url: &str, path: &Path, mandatory: bool) -> Decision;
}

/// Prompter for headless use: downloads every update and confirms
/// cancellations, but never launches an installer on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Prompter for Unattended {
    fn update_available(&self, _url: &str, _notice: &UpdateNotice) -> Decision {
        Decision::Accept
    }

    fn confirm_cancel(&self, _url: &str, _mandatory: bool) -> Decision {
        Decision::Accept
    }

    fn confirm_install(&self, _url: &str, _path: &Path, _mandatory: bool) -> Decision {
        Decision::Decline
    }
}

/// Fans events out to every live subscriber.
#[derive(Default)]
pub(crate) struct Dispatcher {
    subscribers: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl Dispatcher {
    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn emit(&self, url: &str, event: Event) {
        let mut subscribers = lock(&self.subscribers);
        // dropped receivers are pruned here
        subscribers.retain(|tx| {
            tx.send(SessionEvent {
                url: url.to_string(),
                event: event.clone(),
            })
            .is_ok()
        });
    }
}

/// A session's handle on the dispatcher.
#[derive(Clone)]
pub(crate) struct Notifier {
    url: String,
    dispatcher: Arc<Dispatcher>,
}

impl Notifier {
    pub fn new(url: &str, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            url: url.to_string(),
            dispatcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn emit(&self, event: Event) {
        self.dispatcher.emit(&self.url, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_every_subscriber_tagged_with_url() {
        let dispatcher = Arc::new(Dispatcher::default());
        let first = dispatcher.subscribe();
        let second = dispatcher.subscribe();

        Notifier::new("https://a.example/appcast.json", Arc::clone(&dispatcher))
            .emit(Event::DownloadCancelled);

        for rx in [&first, &second] {
            let received = rx.try_recv().unwrap();
            assert_eq!(received.url, "https://a.example/appcast.json");
            assert!(matches!(received.event, Event::DownloadCancelled));
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let dispatcher = Dispatcher::default();
        let kept = dispatcher.subscribe();
        drop(dispatcher.subscribe());

        dispatcher.emit("u", Event::DownloadCancelled);
        assert_eq!(lock(&dispatcher.subscribers).len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
