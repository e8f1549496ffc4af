#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};
use update_client::http::{BodySink, CancelToken, Request, ResponseHead, Transport, TransportError};
use update_client::process::Opener;
use update_client::{AppInfo, Decision, Event, Prompter, SessionEvent, SessionRegistry, UpdateNotice};

pub const APPCAST_URL: &str = "https://updates.example.com/appcast.json";
pub const PACKAGE_URL: &str = "https://dl.example.com/releases/app-1.1.0.tar.gz";

/// Canned response for one URL.
#[derive(Debug, Clone)]
pub struct Reply {
    pub head: ResponseHead,
    pub chunks: Vec<Vec<u8>>,
    pub error: Option<TransportError>,
    /// Stall after the chunks until the request is cancelled.
    pub hold_until_cancelled: bool,
}

impl Reply {
    pub fn status(status: u32) -> Self {
        Self {
            head: ResponseHead {
                status,
                ..Default::default()
            },
            chunks: Vec::new(),
            error: None,
            hold_until_cancelled: false,
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let mut reply = Self::status(200);
        reply.head.content_length = Some(body.len() as u64);
        reply.chunks = vec![body];
        reply
    }

    pub fn chunked(chunks: &[&[u8]]) -> Self {
        let mut reply = Self::status(200);
        reply.head.content_length = Some(chunks.iter().map(|c| c.len() as u64).sum());
        reply.chunks = chunks.iter().map(|c| c.to_vec()).collect();
        reply
    }

    pub fn redirect(location: &str) -> Self {
        let mut reply = Self::status(302);
        reply.head.location = Some(location.to_string());
        reply.chunks = vec![b"stale redirect body".to_vec()];
        reply
    }

    pub fn failing_after(chunks: &[&[u8]], error: TransportError) -> Self {
        let mut reply = Self::chunked(chunks);
        reply.head.content_length = Some(1_000_000);
        reply.error = Some(error);
        reply
    }

    pub fn stalled(first_chunk: &[u8]) -> Self {
        let mut reply = Self::failing_after(&[first_chunk], TransportError::Aborted);
        reply.error = None;
        reply.hold_until_cancelled = true;
        reply
    }

    pub fn with_disposition(mut self, value: &str) -> Self {
        self.head.content_disposition = Some(value.to_string());
        self
    }
}

/// In-memory [`Transport`] serving canned replies by URL; unknown URLs get 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
    }

    /// Requested URLs, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, agent)| agent.clone())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn get(
        &self,
        request: &Request<'_>,
        cancel: &CancelToken,
        sink: &mut dyn BodySink,
    ) -> Result<ResponseHead, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.url.to_string(), request.user_agent.to_string()));
        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(request.url)
            .cloned()
            .unwrap_or_else(|| Reply::status(404));

        if !sink.head(&reply.head) {
            return Err(TransportError::Aborted);
        }
        for chunk in &reply.chunks {
            if cancel.is_cancelled() || !sink.data(chunk) {
                return Err(TransportError::Aborted);
            }
        }

        if reply.hold_until_cancelled {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !cancel.is_cancelled() {
                if Instant::now() > deadline {
                    return Err(TransportError::TimedOut);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            return Err(TransportError::Aborted);
        }

        match reply.error {
            Some(error) => Err(error),
            None => Ok(reply.head),
        }
    }
}

#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Opener for RecordingOpener {
    fn open(&self, target: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(target.to_string());
        Ok(())
    }
}

/// Test side of a held install prompt: `entered` fires once the prompt is
/// showing, sending on `release` lets it answer.
pub struct InstallGate {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

/// Answers every decision point with a fixed choice and counts the calls.
pub struct ScriptedPrompter {
    pub update: Decision,
    pub cancel: Decision,
    pub install: Decision,
    notices: Mutex<Vec<UpdateNotice>>,
    cancel_prompts: Mutex<Vec<bool>>,
    install_prompts: Mutex<Vec<bool>>,
    install_gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl ScriptedPrompter {
    pub fn new(update: Decision, cancel: Decision, install: Decision) -> Self {
        Self {
            update,
            cancel,
            install,
            notices: Mutex::new(Vec::new()),
            cancel_prompts: Mutex::new(Vec::new()),
            install_prompts: Mutex::new(Vec::new()),
            install_gate: Mutex::new(None),
        }
    }

    /// Makes `confirm_install` block until the returned gate releases it.
    pub fn hold_install(self) -> (Self, InstallGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.install_gate.lock().unwrap() = Some((entered_tx, release_rx));
        let gate = InstallGate {
            entered: entered_rx,
            release: release_tx,
        };
        (self, gate)
    }

    pub fn notices(&self) -> Vec<UpdateNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn cancel_prompts(&self) -> Vec<bool> {
        self.cancel_prompts.lock().unwrap().clone()
    }

    pub fn install_prompts(&self) -> Vec<bool> {
        self.install_prompts.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn update_available(&self, _url: &str, notice: &UpdateNotice) -> Decision {
        self.notices.lock().unwrap().push(notice.clone());
        self.update
    }

    fn confirm_cancel(&self, _url: &str, mandatory: bool) -> Decision {
        self.cancel_prompts.lock().unwrap().push(mandatory);
        self.cancel
    }

    fn confirm_install(&self, _url: &str, _path: &Path, mandatory: bool) -> Decision {
        self.install_prompts.lock().unwrap().push(mandatory);
        if let Some((entered, release)) = self.install_gate.lock().unwrap().take() {
            entered.send(()).unwrap();
            release
                .recv_timeout(Duration::from_secs(10))
                .expect("install prompt was never released");
        }
        self.install
    }
}

pub struct Harness {
    pub registry: SessionRegistry,
    pub transport: Arc<ScriptedTransport>,
    pub opener: Arc<RecordingOpener>,
    pub prompter: Arc<ScriptedPrompter>,
    pub events: mpsc::Receiver<SessionEvent>,
}

impl Harness {
    pub fn new(prompter: ScriptedPrompter) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let opener = Arc::new(RecordingOpener::default());
        let prompter = Arc::new(prompter);
        let registry = SessionRegistry::new(AppInfo::new("Demo", "1.0.0"))
            .with_transport(transport.clone())
            .with_opener(opener.clone())
            .with_prompter(prompter.clone());
        let events = registry.subscribe();

        Self {
            registry,
            transport,
            opener,
            prompter,
            events,
        }
    }

    pub fn accepting() -> Self {
        Self::new(ScriptedPrompter::new(
            Decision::Accept,
            Decision::Accept,
            Decision::Decline,
        ))
    }

    /// Runs one full check cycle and returns the events it produced.
    pub fn run_check(&self, url: &str) -> Vec<Event> {
        self.registry
            .check_for_updates(url)
            .expect("session should be idle")
            .join()
            .expect("worker thread panicked");
        self.drain()
    }

    pub fn drain(&self) -> Vec<Event> {
        self.events.try_iter().map(|event| event.event).collect()
    }

    /// Blocks until an event matching `predicate` arrives; returns everything
    /// received up to and including it.
    pub fn wait_for<F: Fn(&Event) -> bool>(&self, predicate: F) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self
                .events
                .recv_timeout(Duration::from_secs(10))
                .expect("timed out waiting for event")
                .event;
            let done = predicate(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
}

pub fn appcast(platform: &str, entry: &str) -> String {
    format!(r#"{{ "updates": {{ "{platform}": {entry} }} }}"#)
}

pub fn linux_appcast(latest: &str, extra: &str) -> String {
    appcast(
        "linux",
        &format!(
            r#"{{ "changelog": "Bug fixes", "download-url": "{PACKAGE_URL}", "latest-version": "{latest}"{extra} }}"#
        ),
    )
}

pub fn count<F: Fn(&Event) -> bool>(events: &[Event], predicate: F) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}
