use super::downloader::{DownloadJob, DownloadOutcome, FileDownloader};
use super::events::{Decision, Dispatcher, Event, Notifier, Prompter, TerminateReason, UpdateNotice};
use super::lock;
use super::manifest::{self, CheckRequest, CheckResponse, ManifestRecord};
use super::registry::AppInfo;
use super::version::is_greater;
use crate::error::UpdateError;
use crate::filesystem as fs;
use crate::http::{CancelToken, Transport};
use crate::process::Opener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Platform key used to pick the appcast entry when none is configured.
pub fn host_platform_key() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else if cfg!(target_os = "android") {
        "android"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else {
        "linux"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Ask the user when a newer version is found.
    pub notify_on_update: bool,
    /// Also report checks that found nothing (or failed).
    pub notify_on_finish: bool,
    /// Download the package ourselves instead of opening its URL.
    pub downloader_enabled: bool,
    /// Hand the raw appcast to subscribers instead of parsing it.
    pub use_custom_appcast: bool,
    /// Stop after the download; the application installs the package.
    pub use_custom_install_procedures: bool,
    pub mandatory: bool,
    pub platform_key: String,
    pub module_name: String,
    pub module_version: String,
    pub user_agent: String,
    pub download_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(app: &AppInfo) -> Self {
        Self {
            notify_on_update: true,
            notify_on_finish: false,
            downloader_enabled: true,
            use_custom_appcast: false,
            use_custom_install_procedures: false,
            mandatory: false,
            platform_key: host_platform_key().to_string(),
            module_name: app.name.clone(),
            module_version: app.version.clone(),
            user_agent: format!("{}/{} (update-client)", app.name, app.version),
            download_dir: fs::default_download_dir(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Checking,
    NoUpdate,
    UpdateFound,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing is being downloaded.
    NotDownloading,
    /// The user chose to keep downloading.
    Declined,
    /// The transfer is being aborted. With `terminate` set the host
    /// application must quit (mandatory update).
    Cancelled { terminate: bool },
}

struct SessionInner {
    config: SessionConfig,
    effective_url: String,
    record: Option<ManifestRecord>,
    update_available: bool,
    state: SessionState,
    cancel: CancelToken,
    download_mandatory: bool,
    /// Set while package bytes may still arrive; cleared once the transfer is
    /// committed, so the install step can no longer be cancelled.
    transfer_active: bool,
}

/// Update check and download lifecycle for one appcast URL.
pub struct UpdateSession {
    url: String,
    inner: Mutex<SessionInner>,
    transport: Arc<dyn Transport>,
    opener: Arc<dyn Opener>,
    prompter: Arc<dyn Prompter>,
    downloader: FileDownloader,
    notifier: Notifier,
}

impl UpdateSession {
    pub(crate) fn new(
        url: &str,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        opener: Arc<dyn Opener>,
        prompter: Arc<dyn Prompter>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            url: url.to_string(),
            inner: Mutex::new(SessionInner {
                config,
                effective_url: url.to_string(),
                record: None,
                update_available: false,
                state: SessionState::Idle,
                cancel: CancelToken::new(),
                download_mandatory: false,
                transfer_active: false,
            }),
            downloader: FileDownloader::new(
                Arc::clone(&transport),
                Arc::clone(&opener),
                Arc::clone(&prompter),
            ),
            transport,
            opener,
            prompter,
            notifier: Notifier::new(url, dispatcher),
        }
    }

    /// The appcast URL this session was registered under.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Where the appcast is fetched from next; follows earlier redirects.
    pub fn effective_url(&self) -> String {
        lock(&self.inner).effective_url.clone()
    }

    pub fn config(&self) -> SessionConfig {
        lock(&self.inner).config.clone()
    }

    /// Changes the configuration. A running cycle keeps the configuration it
    /// started with.
    pub fn update_config<F: FnOnce(&mut SessionConfig)>(&self, update: F) {
        update(&mut lock(&self.inner).config);
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    pub fn update_available(&self) -> bool {
        lock(&self.inner).update_available
    }

    /// Record from the last successful check.
    pub fn manifest(&self) -> Option<ManifestRecord> {
        lock(&self.inner).record.clone()
    }

    pub fn last_download(&self) -> Option<PathBuf> {
        self.downloader.last_download()
    }

    /// Starts a check cycle on a worker thread. Progress is reported through
    /// events; the handle only serves to wait for the cycle to end.
    pub fn check_for_updates(self: &Arc<Self>) -> Result<JoinHandle<()>, UpdateError> {
        let (config, cancel) = self.begin(SessionState::Checking)?;
        self.notifier.emit(Event::StateChanged(SessionState::Checking));

        let session = Arc::clone(self);
        Ok(thread::spawn(move || {
            session.run_cycle(&config, &cancel);
            session.set_state(SessionState::Idle);
        }))
    }

    /// Downloads `package_url` without checking the appcast first, e.g. after
    /// the application interpreted a custom appcast itself. Uses the current
    /// configuration (directory, mandatory flag, install procedure).
    pub fn start_download(
        self: &Arc<Self>,
        package_url: &str,
    ) -> Result<JoinHandle<()>, UpdateError> {
        let (config, cancel) = self.begin(SessionState::Downloading)?;
        let package_url = package_url.to_string();

        let session = Arc::clone(self);
        Ok(thread::spawn(move || {
            session.download(&config, &package_url, config.mandatory, &cancel);
            session.set_state(SessionState::Idle);
        }))
    }

    /// Asks the prompter to confirm, then aborts the running download.
    pub fn cancel_download(&self) -> CancelOutcome {
        let Some(mandatory) = self.active_download() else {
            return CancelOutcome::NotDownloading;
        };

        if self.prompter.confirm_cancel(&self.url, mandatory) == Decision::Decline {
            return CancelOutcome::Declined;
        }

        {
            // the transfer may have been committed while the user was deciding
            let mut inner = lock(&self.inner);
            if !inner.transfer_active {
                return CancelOutcome::NotDownloading;
            }
            inner.transfer_active = false;
            inner.cancel.cancel();
        }

        if mandatory {
            self.notifier
                .emit(Event::TerminateRequested(TerminateReason::DownloadCancelled));
        }
        CancelOutcome::Cancelled {
            terminate: mandatory,
        }
    }

    /// Stops the running cycle without asking anyone.
    pub fn abort(&self) {
        lock(&self.inner).cancel.cancel();
    }

    /// Opens the package of the last completed download.
    pub fn open_download(&self) -> Result<PathBuf, UpdateError> {
        self.downloader.open_download()
    }

    /// Moves an idle session into `state` with a fresh cancel token and
    /// returns the configuration snapshot for the new cycle.
    fn begin(&self, state: SessionState) -> Result<(SessionConfig, CancelToken), UpdateError> {
        let mut inner = lock(&self.inner);
        if inner.state != SessionState::Idle {
            return Err(UpdateError::Busy);
        }
        inner.state = state;
        inner.cancel = CancelToken::new();
        Ok((inner.config.clone(), inner.cancel.clone()))
    }

    /// Mandatory flag of the transfer in flight, if any.
    fn active_download(&self) -> Option<bool> {
        let inner = lock(&self.inner);
        inner.transfer_active.then_some(inner.download_mandatory)
    }

    /// Called by the downloader right before the rename. Past this point a
    /// cancel request no longer applies.
    fn commit_transfer(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.cancel.is_cancelled() {
            return false;
        }
        inner.transfer_active = false;
        true
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.inner).state = state;
        self.notifier.emit(Event::StateChanged(state));
    }

    fn run_cycle(&self, config: &SessionConfig, cancel: &CancelToken) {
        let url = self.effective_url();
        let request = CheckRequest {
            url: &url,
            user_agent: &config.user_agent,
            timeout: config.timeout,
            platform_key: &config.platform_key,
            custom_appcast: config.use_custom_appcast,
        };
        log::info!("Checking {url} for updates");

        match manifest::check(self.transport.as_ref(), &request, cancel) {
            Ok((final_url, CheckResponse::Appcast(body))) => {
                {
                    let mut inner = lock(&self.inner);
                    inner.effective_url = final_url;
                    inner.update_available = false;
                }
                self.notifier.emit(Event::AppcastDownloaded(Arc::new(body)));
                self.notifier.emit(Event::CheckFinished {
                    update_available: false,
                    error: None,
                });
            }
            Ok((final_url, CheckResponse::Manifest(record))) => {
                let available = is_greater(&record.latest_version, &config.module_version);
                let mandatory = record.mandatory.unwrap_or(config.mandatory);
                {
                    let mut inner = lock(&self.inner);
                    inner.effective_url = final_url;
                    if let Some(mandatory) = record.mandatory {
                        inner.config.mandatory = mandatory;
                    }
                    inner.update_available = available;
                    inner.record = Some(record.clone());
                }
                log::info!(
                    "{}: latest version {:?}, installed {} ({})",
                    self.url,
                    record.latest_version,
                    config.module_version,
                    if available { "update available" } else { "up to date" }
                );
                self.notifier.emit(Event::CheckFinished {
                    update_available: available,
                    error: None,
                });

                if available {
                    self.on_update_found(config, &record, mandatory, cancel);
                } else {
                    self.on_no_update(config, None);
                }
            }
            Err(e) => {
                log::warn!("Update check for {} failed: {}", self.url, e);
                lock(&self.inner).update_available = false;
                let e = Arc::new(e);
                self.notifier.emit(Event::CheckFinished {
                    update_available: false,
                    error: Some(Arc::clone(&e)),
                });
                self.on_no_update(config, Some(e));
            }
        }
    }

    fn on_no_update(&self, config: &SessionConfig, error: Option<Arc<UpdateError>>) {
        self.set_state(SessionState::NoUpdate);
        if config.notify_on_finish {
            self.notifier.emit(Event::UpToDate { error });
        }
    }

    fn on_update_found(
        &self,
        config: &SessionConfig,
        record: &ManifestRecord,
        mandatory: bool,
        cancel: &CancelToken,
    ) {
        self.set_state(SessionState::UpdateFound);
        if !(config.notify_on_update || config.notify_on_finish) {
            return;
        }

        let notice = UpdateNotice {
            module_name: config.module_name.clone(),
            latest_version: record.latest_version.clone(),
            changelog: record.changelog.clone(),
            mandatory,
        };
        if self.prompter.update_available(&self.url, &notice) == Decision::Decline {
            if mandatory {
                self.notifier
                    .emit(Event::TerminateRequested(TerminateReason::UpdateDeclined));
            }
            return;
        }
        if cancel.is_cancelled() {
            return;
        }

        if !record.open_url.is_empty() {
            self.open_external(&record.open_url);
        } else if config.downloader_enabled {
            self.download(config, &record.download_url, mandatory, cancel);
        } else {
            self.open_external(&record.download_url);
        }
    }

    fn download(
        &self,
        config: &SessionConfig,
        package_url: &str,
        mandatory: bool,
        cancel: &CancelToken,
    ) {
        {
            let mut inner = lock(&self.inner);
            inner.download_mandatory = mandatory;
            inner.transfer_active = !cancel.is_cancelled();
        }
        self.set_state(SessionState::Downloading);

        let job = DownloadJob {
            url: package_url,
            directory: &config.download_dir,
            user_agent: &config.user_agent,
            timeout: config.timeout,
            mandatory,
            custom_install: config.use_custom_install_procedures,
        };
        let outcome = self
            .downloader
            .run(&job, cancel, &self.notifier, &|| self.commit_transfer());
        lock(&self.inner).transfer_active = false;

        let state = match outcome {
            DownloadOutcome::Completed(_) => SessionState::Completed,
            DownloadOutcome::Cancelled => SessionState::Cancelled,
            DownloadOutcome::Failed(_) => SessionState::Failed,
        };
        self.set_state(state);
    }

    fn open_external(&self, target: &str) {
        log::info!("Opening {target}");
        if let Err(e) = self.opener.open(target) {
            log::error!("{e}");
        }
    }
}
