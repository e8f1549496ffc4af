use super::events::{Decision, Event, Notifier, Prompter, TerminateReason};
use super::lock;
use super::progress::Progress;
use crate::error::UpdateError;
use crate::filesystem as fs;
use crate::http::{self, BodySink, CancelToken, Request, ResponseHead, Transport};
use crate::process::Opener;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use url::Url;

const DEFAULT_FILE_NAME: &str = "update.bin";

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename\s*=\s*"?([^";]+)"?"#).expect("Failed to compile regex")
});

pub(crate) struct DownloadJob<'a> {
    pub url: &'a str,
    pub directory: &'a Path,
    pub user_agent: &'a str,
    pub timeout: Option<Duration>,
    pub mandatory: bool,
    pub custom_install: bool,
}

pub(crate) enum DownloadOutcome {
    Completed(PathBuf),
    Cancelled,
    Failed(Arc<UpdateError>),
}

/// Bookkeeping for the transfer currently in flight.
struct DownloadState {
    target_url: String,
    file_name: String,
    bytes_received: u64,
    bytes_total: Option<u64>,
    started: Instant,
    partial_path: PathBuf,
    final_path: PathBuf,
    mandatory: bool,
}

impl DownloadState {
    fn new(target_url: &str, file_name: String, directory: &Path, mandatory: bool) -> Self {
        let final_path = directory.join(&file_name);
        Self {
            target_url: target_url.to_string(),
            file_name,
            bytes_received: 0,
            bytes_total: None,
            started: Instant::now(),
            partial_path: fs::partial_path(&final_path),
            final_path,
            mandatory,
        }
    }

    fn rename(&mut self, file_name: String) {
        self.final_path = self.final_path.with_file_name(&file_name);
        self.partial_path = fs::partial_path(&self.final_path);
        self.file_name = file_name;
    }

    /// Drops leftovers of earlier downloads under the current name.
    fn clear_destination(&self) -> Result<(), UpdateError> {
        for path in [&self.final_path, &self.partial_path] {
            fs::remove_if_exists(path).map_err(|e| UpdateError::file_system(path, e))?;
        }
        Ok(())
    }

    fn discard_partial(&self) {
        if let Err(e) = fs::remove_if_exists(&self.partial_path) {
            log::warn!(
                "Failed to remove {}: {}",
                self.partial_path.display(),
                e
            );
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            received: self.bytes_received,
            total: self.bytes_total,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Appends a 2xx response body to the partial file. Bodies of redirect and
/// error responses are never written.
struct FileSink<'a> {
    state: &'a mut DownloadState,
    notifier: &'a Notifier,
    file: Option<File>,
    skip: bool,
    error: Option<UpdateError>,
}

impl<'a> FileSink<'a> {
    fn new(state: &'a mut DownloadState, notifier: &'a Notifier) -> Self {
        Self {
            state,
            notifier,
            file: None,
            skip: false,
            error: None,
        }
    }

    fn open_partial(&mut self) -> Result<(), UpdateError> {
        let path = &self.state.partial_path;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| UpdateError::file_system(path, e))?;
        self.file = Some(file);
        Ok(())
    }

    fn accept_head(&mut self, head: &ResponseHead) -> Result<(), UpdateError> {
        if let Some(file_name) = head
            .content_disposition
            .as_deref()
            .and_then(disposition_file_name)
        {
            if file_name != self.state.file_name {
                log::debug!("Server named the download {file_name}");
                self.state.rename(file_name);
                self.state.clear_destination()?;
            }
        }

        self.state.bytes_total = head.content_length.filter(|total| *total > 0);
        log::info!(
            "Saving {} to {}{}",
            self.state.target_url,
            self.state.final_path.display(),
            if self.state.mandatory { " (mandatory)" } else { "" }
        );
        self.notifier.emit(Event::DownloadStarted {
            url: self.state.target_url.clone(),
            path: self.state.final_path.clone(),
        });
        self.open_partial()
    }
}

impl BodySink for FileSink<'_> {
    fn head(&mut self, head: &ResponseHead) -> bool {
        self.skip = head.is_redirect() || head.status >= 300;
        if self.skip {
            return true;
        }

        match self.accept_head(head) {
            Ok(()) => true,
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn data(&mut self, chunk: &[u8]) -> bool {
        if self.skip {
            return true;
        }
        if self.file.is_none() {
            if let Err(e) = self.open_partial() {
                self.error = Some(e);
                return false;
            }
        }

        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(chunk) {
                self.error = Some(UpdateError::file_system(&self.state.partial_path, e));
                return false;
            }
        }

        self.state.bytes_received += chunk.len() as u64;
        self.notifier.emit(Event::DownloadProgress(self.state.progress()));
        true
    }
}

enum Attempt {
    Redirect(String),
    Done,
}

/// Streams update packages to disk and runs the install hand-off.
pub(crate) struct FileDownloader {
    transport: Arc<dyn Transport>,
    opener: Arc<dyn Opener>,
    prompter: Arc<dyn Prompter>,
    last_download: Mutex<Option<PathBuf>>,
}

impl FileDownloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        opener: Arc<dyn Opener>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            transport,
            opener,
            prompter,
            last_download: Mutex::new(None),
        }
    }

    /// Runs the transfer and, on success, the install step. `commit` is asked
    /// right before the partial file is renamed; returning `false` turns the
    /// finished transfer into a cancellation.
    pub fn run(
        &self,
        job: &DownloadJob<'_>,
        cancel: &CancelToken,
        notifier: &Notifier,
        commit: &dyn Fn() -> bool,
    ) -> DownloadOutcome {
        match self.transfer(job, cancel, notifier, commit) {
            Ok(path) => {
                log::info!("Downloaded {} to {}", job.url, path.display());
                self.finish(job, &path, notifier);
                DownloadOutcome::Completed(path)
            }
            Err(UpdateError::Cancelled) => {
                log::info!("Download of {} cancelled", job.url);
                notifier.emit(Event::DownloadCancelled);
                DownloadOutcome::Cancelled
            }
            Err(e) => {
                log::warn!("Download of {} failed: {}", job.url, e);
                let e = Arc::new(e);
                notifier.emit(Event::DownloadFailed(Arc::clone(&e)));
                DownloadOutcome::Failed(e)
            }
        }
    }

    fn transfer(
        &self,
        job: &DownloadJob<'_>,
        cancel: &CancelToken,
        notifier: &Notifier,
        commit: &dyn Fn() -> bool,
    ) -> Result<PathBuf, UpdateError> {
        let mut url = job.url.to_string();
        let mut file_name = file_name_from_url(job.url);

        for _ in 0..=http::MAX_REDIRECTS {
            let mut state = DownloadState::new(&url, file_name, job.directory, job.mandatory);

            match self.attempt(&mut state, job, cancel, notifier) {
                Ok(Attempt::Redirect(target)) => {
                    log::debug!("Download redirected from {url} to {target}");
                    state.discard_partial();
                    url = target;
                    file_name = state.file_name;
                }
                Ok(Attempt::Done) if cancel.is_cancelled() || !commit() => {
                    state.discard_partial();
                    return Err(UpdateError::Cancelled);
                }
                Ok(Attempt::Done) => {
                    std::fs::rename(&state.partial_path, &state.final_path).map_err(|e| {
                        state.discard_partial();
                        UpdateError::file_system(&state.final_path, e)
                    })?;
                    return Ok(state.final_path);
                }
                Err(e) => {
                    state.discard_partial();
                    return Err(e);
                }
            }
        }

        Err(UpdateError::TooManyRedirects(http::MAX_REDIRECTS))
    }

    fn attempt(
        &self,
        state: &mut DownloadState,
        job: &DownloadJob<'_>,
        cancel: &CancelToken,
        notifier: &Notifier,
    ) -> Result<Attempt, UpdateError> {
        std::fs::create_dir_all(job.directory)
            .map_err(|e| UpdateError::file_system(job.directory, e))?;
        state.clear_destination()?;

        let url = state.target_url.clone();
        let request = Request {
            url: url.as_str(),
            user_agent: job.user_agent,
            timeout: job.timeout,
        };

        let mut sink = FileSink::new(state, notifier);
        log::debug!("GET {url}");
        let result = self.transport.get(&request, cancel, &mut sink);
        if let Some(e) = sink.error.take() {
            return Err(e);
        }
        let wrote_body = sink.file.is_some();
        drop(sink);
        let head = result?;

        if let Some(target) = http::redirect_target(&url, &head)? {
            return Ok(Attempt::Redirect(target));
        }
        http::ensure_success(&url, &head)?;

        if !wrote_body {
            // empty body: still leave a file behind to rename
            File::create(&state.partial_path)
                .map_err(|e| UpdateError::file_system(&state.partial_path, e))?;
        }
        Ok(Attempt::Done)
    }

    fn finish(&self, job: &DownloadJob<'_>, path: &Path, notifier: &Notifier) {
        *lock(&self.last_download) = Some(path.to_path_buf());
        notifier.emit(Event::DownloadFinished {
            path: path.to_path_buf(),
        });

        if job.custom_install {
            return;
        }
        self.install(path, job.mandatory, notifier);
    }

    fn install(&self, path: &Path, mandatory: bool, notifier: &Notifier) {
        let decision = self.prompter.confirm_install(notifier.url(), path, mandatory);

        if decision == Decision::Accept {
            match self.opener.open(&path.to_string_lossy()) {
                Ok(()) => {
                    notifier.emit(Event::TerminateRequested(TerminateReason::InstallerLaunched));
                    return;
                }
                Err(e) => log::error!("Failed to launch installer: {e}"),
            }
        }

        if mandatory {
            notifier.emit(Event::TerminateRequested(TerminateReason::InstallDeferred));
        }
    }

    /// Opens the last downloaded package, e.g. after the install was deferred.
    pub fn open_download(&self) -> Result<PathBuf, UpdateError> {
        let path = lock(&self.last_download)
            .clone()
            .filter(|path| path.exists())
            .ok_or(UpdateError::FileNotFound)?;

        self.opener
            .open(&path.to_string_lossy())
            .map_err(|e| UpdateError::file_system(&path, std::io::Error::other(e.to_string())))?;
        Ok(path)
    }

    pub fn last_download(&self) -> Option<PathBuf> {
        lock(&self.last_download).clone()
    }
}

/// Last path segment of `url`, or a generic name when there is none.
pub(crate) fn file_name_from_url(url: &str) -> String {
    let name = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => url.rsplit('/').next().unwrap_or_default().to_string(),
    };

    if name.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        name
    }
}

/// File name suggested by a `Content-Disposition` header, reduced to its
/// final path component.
pub(crate) fn disposition_file_name(header: &str) -> Option<String> {
    let header = percent_decode_str(header).decode_utf8_lossy();
    let name = FILENAME_RE.captures(&header)?.get(1)?.as_str().trim();
    let name = name.rsplit(['/', '\\']).next()?.trim();

    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/releases/setup-1.2.exe"),
            "setup-1.2.exe"
        );
        assert_eq!(
            file_name_from_url("https://example.com/app.dmg?token=abc"),
            "app.dmg"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "update.bin");
        assert_eq!(file_name_from_url(""), "update.bin");
    }

    #[test]
    fn test_disposition_file_name() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="setup.exe""#).as_deref(),
            Some("setup.exe")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=app.tar.gz").as_deref(),
            Some("app.tar.gz")
        );
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[test]
    fn test_disposition_file_name_is_percent_decoded() {
        assert_eq!(
            disposition_file_name("attachment; filename=my%20app.exe").as_deref(),
            Some("my app.exe")
        );
        assert_eq!(
            disposition_file_name("attachment; filename%3D%22setup.msi%22").as_deref(),
            Some("setup.msi")
        );
    }

    #[test]
    fn test_disposition_file_name_strips_directories() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="../../etc/passwd""#).as_deref(),
            Some("passwd")
        );
        assert_eq!(
            disposition_file_name(r#"attachment; filename="C:\temp\evil.exe""#).as_deref(),
            Some("evil.exe")
        );
        assert_eq!(disposition_file_name(r#"attachment; filename="..""#), None);
    }

    #[test]
    fn test_renaming_state_moves_partial_path() {
        let mut state = DownloadState::new(
            "https://example.com/a.bin",
            "a.bin".to_string(),
            Path::new("/downloads"),
            false,
        );
        state.rename("b.exe".to_string());
        assert_eq!(state.final_path, PathBuf::from("/downloads/b.exe"));
        assert_eq!(state.partial_path, PathBuf::from("/downloads/b.exe.part"));
    }
}
