use crate::error::UpdateError;
use curl::easy::{Easy2, Handler, WriteError};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Upper bound on redirects followed by one manifest fetch or one download.
pub const MAX_REDIRECTS: usize = 10;

/// Shared abort flag. Clones observe the same flag, so the token handed to the
/// first request also stops every request issued while following redirects.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub struct Request<'a> {
    pub url: &'a str,
    pub user_agent: &'a str,
    /// Connect timeout and maximum time without receiving a byte.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u32,
    pub location: Option<String>,
    pub content_length: Option<u64>,
    pub content_disposition: Option<String>,
}

impl ResponseHead {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

/// Receives one response as it streams in.
pub trait BodySink {
    /// Called once the status line and headers are complete. Returning
    /// `false` aborts the transfer.
    fn head(&mut self, _head: &ResponseHead) -> bool {
        true
    }

    /// Called for every body chunk. Returning `false` aborts the transfer.
    fn data(&mut self, chunk: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Stopped through the cancel token or by the sink.
    Aborted,
    TimedOut,
    Failed(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Aborted => write!(f, "transfer aborted"),
            Self::TimedOut => write!(f, "transfer timed out"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

impl From<TransportError> for UpdateError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Aborted => UpdateError::Cancelled,
            other => UpdateError::Network(other.to_string()),
        }
    }
}

/// A single HTTP GET without automatic redirect handling. Redirect responses
/// are returned to the caller with `location` filled in.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        request: &Request<'_>,
        cancel: &CancelToken,
        sink: &mut dyn BodySink,
    ) -> Result<ResponseHead, TransportError>;
}

/// libcurl-backed transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurlTransport;

struct SinkHandler<'a> {
    sink: &'a mut dyn BodySink,
    cancel: CancelToken,
    head: ResponseHead,
    head_done: bool,
    aborted: bool,
}

impl<'a> SinkHandler<'a> {
    fn new(sink: &'a mut dyn BodySink, cancel: CancelToken) -> Self {
        Self {
            sink,
            cancel,
            head: ResponseHead::default(),
            head_done: false,
            aborted: false,
        }
    }
}

impl Handler for SinkHandler<'_> {
    fn header(&mut self, data: &[u8]) -> bool {
        let line = String::from_utf8_lossy(data);
        let line = line.trim_end();

        if line.starts_with("HTTP/") {
            self.head = ResponseHead {
                status: parse_status_line(line),
                ..Default::default()
            };
            self.head_done = false;
        } else if line.is_empty() {
            // interim 1xx blocks are followed by the real one
            if !self.head_done && self.head.status >= 200 {
                self.head_done = true;
                if !self.sink.head(&self.head) {
                    self.aborted = true;
                    return false;
                }
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "location" => self.head.location = Some(value.to_string()),
                "content-length" => self.head.content_length = value.parse().ok(),
                "content-disposition" => {
                    self.head.content_disposition = Some(value.to_string())
                }
                _ => {}
            }
        }

        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.cancel.is_cancelled() || !self.sink.data(data) {
            self.aborted = true;
            return Ok(0);
        }
        Ok(data.len())
    }

    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Transport for CurlTransport {
    fn get(
        &self,
        request: &Request<'_>,
        cancel: &CancelToken,
        sink: &mut dyn BodySink,
    ) -> Result<ResponseHead, TransportError> {
        let handler = SinkHandler::new(sink, cancel.clone());
        let mut easy = build_easy_get(request, handler).map_err(map_curl_error)?;
        let result = easy.perform();

        if easy.get_ref().aborted || cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        result.map_err(map_curl_error)?;

        let mut head = easy.get_ref().head.clone();
        if head.status == 0 {
            head.status = easy.response_code().unwrap_or(0);
        }
        // libcurl resolves relative Location headers for us
        if let Ok(Some(target)) = easy.redirect_url() {
            head.location = Some(target.to_string());
        }
        Ok(head)
    }
}

fn build_easy_get<H: Handler>(request: &Request<'_>, handler: H) -> Result<Easy2<H>, curl::Error> {
    let mut easy = Easy2::new(handler);
    easy.get(true)?;
    easy.follow_location(false)?;
    easy.url(request.url)?;
    easy.useragent(request.user_agent)?;
    easy.progress(true)?;
    if let Some(timeout) = request.timeout {
        easy.connect_timeout(timeout)?;
        easy.low_speed_limit(1)?;
        easy.low_speed_time(timeout)?;
    }
    Ok(easy)
}

fn map_curl_error(err: curl::Error) -> TransportError {
    if err.is_aborted_by_callback() {
        TransportError::Aborted
    } else if err.is_operation_timedout() {
        TransportError::TimedOut
    } else {
        TransportError::Failed(err.to_string())
    }
}

fn parse_status_line(line: &str) -> u32 {
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// Resolves the redirect carried by `head`, if any. Redirects from `https`
/// to anything less secure are refused.
pub fn redirect_target(current: &str, head: &ResponseHead) -> Result<Option<String>, UpdateError> {
    if !head.is_redirect() {
        return Ok(None);
    }

    let location = head.location.as_deref().unwrap_or_default();
    let base = Url::parse(current)
        .map_err(|e| UpdateError::Network(format!("Invalid URL {current}: {e}")))?;
    let target = base
        .join(location)
        .map_err(|e| UpdateError::Network(format!("Invalid redirect target {location}: {e}")))?;

    if base.scheme() == "https" && target.scheme() != "https" {
        return Err(UpdateError::Network(format!(
            "Refusing insecure redirect from {current} to {target}"
        )));
    }

    Ok(Some(target.to_string()))
}

/// Rejects error statuses, and redirects that [`redirect_target`] could not
/// follow because they carry no `Location`.
pub fn ensure_success(url: &str, head: &ResponseHead) -> Result<(), UpdateError> {
    if (300..400).contains(&head.status) {
        return Err(UpdateError::Network(format!(
            "{url} responded with HTTP {} but no redirect target",
            head.status
        )));
    }
    if head.status >= 400 {
        return Err(UpdateError::Network(format!(
            "{url} responded with HTTP {}",
            head.status
        )));
    }
    Ok(())
}

struct Collector {
    data: Vec<u8>,
    skip: bool,
}

impl Collector {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            skip: false,
        }
    }
}

impl BodySink for Collector {
    fn head(&mut self, head: &ResponseHead) -> bool {
        self.skip = head.is_redirect();
        true
    }

    fn data(&mut self, chunk: &[u8]) -> bool {
        if !self.skip {
            self.data.extend_from_slice(chunk);
        }
        true
    }
}

/// Body of a fetch along with the URL it was finally served from.
#[derive(Debug)]
pub struct Fetched {
    pub url: String,
    pub body: Vec<u8>,
}

/// GETs `url` into memory, following at most [`MAX_REDIRECTS`] redirects.
pub fn download_bytes(
    transport: &dyn Transport,
    url: &str,
    user_agent: &str,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<Fetched, UpdateError> {
    let mut current = url.to_string();

    for _ in 0..=MAX_REDIRECTS {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let request = Request {
            url: current.as_str(),
            user_agent,
            timeout,
        };
        let mut collector = Collector::new();
        log::debug!("GET {current}");
        let head = transport.get(&request, cancel, &mut collector)?;

        if let Some(target) = redirect_target(&current, &head)? {
            log::debug!("{current} redirected to {target}");
            current = target;
            continue;
        }

        ensure_success(&current, &head)?;
        return Ok(Fetched {
            url: current,
            body: collector.data,
        });
    }

    Err(UpdateError::TooManyRedirects(MAX_REDIRECTS))
}
