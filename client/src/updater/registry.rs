use super::events::{Dispatcher, Prompter, SessionEvent, Unattended};
use super::lock;
use super::manifest::ManifestRecord;
use super::session::{SessionConfig, UpdateSession};
use crate::error::UpdateError;
use crate::http::{CurlTransport, Transport};
use crate::process::{Opener, SystemOpener};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Name and version of the application being updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Owns one [`UpdateSession`] per appcast URL. Every session reports to the
/// registry's subscribers, tagged with its URL.
pub struct SessionRegistry {
    app: AppInfo,
    transport: Arc<dyn Transport>,
    opener: Arc<dyn Opener>,
    prompter: Arc<dyn Prompter>,
    dispatcher: Arc<Dispatcher>,
    sessions: Mutex<HashMap<String, Arc<UpdateSession>>>,
}

impl SessionRegistry {
    /// Registry using libcurl, the system opener and the [`Unattended`]
    /// prompter.
    pub fn new(app: AppInfo) -> Self {
        Self {
            app,
            transport: Arc::new(CurlTransport),
            opener: Arc::new(SystemOpener),
            prompter: Arc::new(Unattended),
            dispatcher: Arc::new(Dispatcher::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Only affects sessions created afterwards.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Only affects sessions created afterwards.
    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Self {
        self.opener = opener;
        self
    }

    /// Only affects sessions created afterwards.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    /// New receiver for the events of every session, present and future.
    pub fn subscribe(&self) -> mpsc::Receiver<SessionEvent> {
        self.dispatcher.subscribe()
    }

    pub fn get_or_create(&self, url: &str) -> Arc<UpdateSession> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.entry(url.to_string()).or_insert_with(|| {
            log::debug!("Creating update session for {url}");
            Arc::new(UpdateSession::new(
                url,
                SessionConfig::new(&self.app),
                Arc::clone(&self.transport),
                Arc::clone(&self.opener),
                Arc::clone(&self.prompter),
                Arc::clone(&self.dispatcher),
            ))
        });
        Arc::clone(session)
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.sessions).keys().cloned().collect()
    }

    pub fn check_for_updates(&self, url: &str) -> Result<JoinHandle<()>, UpdateError> {
        self.get_or_create(url).check_for_updates()
    }

    /// Downloads `package_url` for the session of `url` without a check.
    pub fn start_download(
        &self,
        url: &str,
        package_url: &str,
    ) -> Result<JoinHandle<()>, UpdateError> {
        self.get_or_create(url).start_download(package_url)
    }

    fn configure<F: FnOnce(&mut SessionConfig)>(&self, url: &str, update: F) {
        self.get_or_create(url).update_config(update);
    }

    fn read<T, F: FnOnce(&SessionConfig) -> T>(&self, url: &str, read: F) -> T {
        read(&self.get_or_create(url).config())
    }

    pub fn set_module_name(&self, url: &str, name: &str) {
        self.configure(url, |config| config.module_name = name.to_string());
    }

    pub fn set_module_version(&self, url: &str, version: &str) {
        self.configure(url, |config| config.module_version = version.to_string());
    }

    pub fn set_notify_on_update(&self, url: &str, notify: bool) {
        self.configure(url, |config| config.notify_on_update = notify);
    }

    pub fn set_notify_on_finish(&self, url: &str, notify: bool) {
        self.configure(url, |config| config.notify_on_finish = notify);
    }

    pub fn set_platform_key(&self, url: &str, platform_key: &str) {
        self.configure(url, |config| config.platform_key = platform_key.to_string());
    }

    pub fn set_user_agent(&self, url: &str, user_agent: &str) {
        self.configure(url, |config| config.user_agent = user_agent.to_string());
    }

    pub fn set_mandatory_update(&self, url: &str, mandatory: bool) {
        self.configure(url, |config| config.mandatory = mandatory);
    }

    pub fn set_use_custom_appcast(&self, url: &str, custom: bool) {
        self.configure(url, |config| config.use_custom_appcast = custom);
    }

    pub fn set_use_custom_install_procedures(&self, url: &str, custom: bool) {
        self.configure(url, |config| config.use_custom_install_procedures = custom);
    }

    pub fn set_downloader_enabled(&self, url: &str, enabled: bool) {
        self.configure(url, |config| config.downloader_enabled = enabled);
    }

    pub fn set_download_dir(&self, url: &str, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.configure(url, |config| config.download_dir = dir);
    }

    pub fn set_timeout(&self, url: &str, timeout: Option<Duration>) {
        self.configure(url, |config| config.timeout = timeout);
    }

    pub fn module_name(&self, url: &str) -> String {
        self.read(url, |config| config.module_name.clone())
    }

    pub fn module_version(&self, url: &str) -> String {
        self.read(url, |config| config.module_version.clone())
    }

    pub fn notify_on_update(&self, url: &str) -> bool {
        self.read(url, |config| config.notify_on_update)
    }

    pub fn notify_on_finish(&self, url: &str) -> bool {
        self.read(url, |config| config.notify_on_finish)
    }

    pub fn platform_key(&self, url: &str) -> String {
        self.read(url, |config| config.platform_key.clone())
    }

    pub fn user_agent(&self, url: &str) -> String {
        self.read(url, |config| config.user_agent.clone())
    }

    pub fn mandatory_update(&self, url: &str) -> bool {
        self.read(url, |config| config.mandatory)
    }

    pub fn uses_custom_appcast(&self, url: &str) -> bool {
        self.read(url, |config| config.use_custom_appcast)
    }

    pub fn uses_custom_install_procedures(&self, url: &str) -> bool {
        self.read(url, |config| config.use_custom_install_procedures)
    }

    pub fn downloader_enabled(&self, url: &str) -> bool {
        self.read(url, |config| config.downloader_enabled)
    }

    pub fn download_dir(&self, url: &str) -> PathBuf {
        self.read(url, |config| config.download_dir.clone())
    }

    pub fn update_available(&self, url: &str) -> bool {
        self.get_or_create(url).update_available()
    }

    pub fn latest_version(&self, url: &str) -> String {
        self.manifest_field(url, |record| record.latest_version)
    }

    pub fn changelog(&self, url: &str) -> String {
        self.manifest_field(url, |record| record.changelog)
    }

    pub fn download_url(&self, url: &str) -> String {
        self.manifest_field(url, |record| record.download_url)
    }

    pub fn open_url(&self, url: &str) -> String {
        self.manifest_field(url, |record| record.open_url)
    }

    fn manifest_field<F>(&self, url: &str, field: F) -> String
    where
        F: FnOnce(ManifestRecord) -> String,
    {
        self.get_or_create(url)
            .manifest()
            .map(field)
            .unwrap_or_default()
    }
}
