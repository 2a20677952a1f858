//! Streaming download of remote images.
//!
//! The fetcher reads the body chunk by chunk into a scoped temporary file
//! and hands a growing header prefix to [`IncrementalValidator`] every
//! `check_interval` bytes, so an unsupported or oversized image is dropped
//! long before it has been downloaded in full.

pub mod error;
pub mod progress;
pub mod sniff;
pub mod validate;

pub use error::TransferError;
pub use progress::{
    NoProgress, ProgressEvent, ProgressReporter, RecordingReporter, ScriptReporter, TracingReporter,
};
pub use sniff::ImageKind;
pub use validate::{ImageInfo, IncrementalValidator, Verdict};

use crate::config::{FetchConfig, FetchLimits};
use crate::fetch::error::kb;
use crate::fetch::progress::{progress_text, summary_text, SIZE_NOTICE_DELAY, UPDATE_INTERVAL};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{header, Client, Response, Url};
use std::error::Error as _;
use std::path::Path;
use std::time::Instant;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Connecting,
    Receiving,
    Validating,
    Succeeded,
    Failed,
    Aborted,
}

/// One URL to fetch and the ceilings to enforce on it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub limits: FetchLimits,
    /// Suppress progress reporting.
    pub quiet: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, limits: FetchLimits) -> Self {
        Self { url: url.into(), limits, quiet: false }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

/// A downloaded and validated image.
///
/// Owns its temporary file: dropping the artifact deletes it, `persist`
/// moves it out of the temporary directory.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
    pub info: ImageInfo,
    pub size: u64,
    pub redirects: u32,
    /// Location the body was finally read from.
    pub final_url: String,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &'static str {
        self.info.kind.mime()
    }

    pub fn persist(self, dest: &Path) -> std::io::Result<()> {
        self.path.persist(dest).map_err(|e| e.error)
    }
}

/// Book-keeping for a single fetch attempt.
struct Transfer {
    url: String,
    limits: FetchLimits,
    state: TransferState,
    bytes_received: u64,
    content_length: Option<u64>,
    redirect_count: u32,
    /// Byte count at the previous validation pass.
    last_check: u64,
    size_notice_shown: bool,
    outcome: Option<&'static str>,
}

impl Transfer {
    fn new(request: &FetchRequest) -> Self {
        Self {
            url: request.url.clone(),
            limits: request.limits,
            state: TransferState::Pending,
            bytes_received: 0,
            content_length: None,
            redirect_count: 0,
            last_check: 0,
            size_notice_shown: false,
            outcome: None,
        }
    }

    fn set_state(&mut self, state: TransferState) {
        tracing::trace!(url = %self.url, from = ?self.state, to = ?state, "transfer state");
        self.state = state;
    }

    fn finish(&mut self, result: &Result<Artifact, TransferError>) {
        if self.outcome.is_some() {
            return;
        }
        let (state, code) = match result {
            Ok(_) => (TransferState::Succeeded, "Success"),
            Err(TransferError::Cancelled) => (TransferState::Aborted, "Cancelled"),
            Err(e) => (TransferState::Failed, e.code()),
        };
        self.set_state(state);
        self.outcome = Some(code);
        match result {
            Ok(a) => tracing::debug!(
                url = %self.url, bytes = self.bytes_received, redirects = self.redirect_count,
                "Fetched {} {}x{}", a.info.kind, a.info.width, a.info.height
            ),
            Err(e) if e.is_rejection() => tracing::warn!(
                url = %self.url, bytes = self.bytes_received, outcome = code, "Transfer rejected: {}", e
            ),
            Err(e) => tracing::debug!(
                url = %self.url, bytes = self.bytes_received, outcome = code, "Transfer failed: {}", e
            ),
        }
    }
}

/// HTTP client for image URLs. Cheap to share; transfers do not share state.
pub struct StreamingFetcher {
    client: Client,
    config: FetchConfig,
}

impl StreamingFetcher {
    /// Build the shared HTTP client.
    ///
    /// Automatic redirects are disabled so `fetch` can count them against
    /// `max_redirects`. `config.temp_dir` is not checked here: a missing
    /// directory surfaces as [`TransferError::NoTempFile`] on each fetch.
    pub fn new(config: FetchConfig) -> Result<Self, TransferError> {
        // Redirects are followed by hand so they can be counted.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(network_error)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download `request.url` into a temporary file, validating as it goes.
    ///
    /// Exactly one [`ProgressEvent::Final`] is reported unless the request is
    /// quiet. Cancelling `cancel`, or dropping the returned future, removes
    /// the partial file.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        reporter: &mut dyn ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Artifact, TransferError> {
        let mut quiet = NoProgress;
        let reporter: &mut dyn ProgressReporter = if request.quiet { &mut quiet } else { &mut *reporter };

        let started = Instant::now();
        let mut transfer = Transfer::new(request);
        let result = self.run(&mut transfer, reporter, &cancel).await;

        let summary = summary_text(result.is_ok(), started.elapsed(), transfer.redirect_count);
        reporter.report(&ProgressEvent::Final { summary });
        transfer.finish(&result);
        result
    }

    async fn run(
        &self,
        t: &mut Transfer,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Artifact, TransferError> {
        let limits = t.limits;

        // The temp file exists before any traffic; every early return drops
        // `path` and with it the file.
        let tmp = tempfile::Builder::new()
            .prefix("imgquery-")
            .tempfile_in(&self.config.temp_dir)
            .map_err(|e| {
                tracing::error!("Cannot create temp file in {:?}: {}", self.config.temp_dir, e);
                TransferError::NoTempFile
            })?;
        let (file, path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        t.set_state(TransferState::Connecting);
        let response = self.connect(t, reporter, cancel).await?;
        let final_url = response.url().to_string();

        let declared_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str().to_string());

        t.content_length = response.content_length();
        match t.content_length {
            Some(len) if t.size_notice_shown => {
                reporter.report(&ProgressEvent::SizeKnownLate { size_kb: kb(len) })
            }
            Some(len) => reporter.report(&ProgressEvent::SizeKnownEarly {
                size_kb: kb(len),
                status: progress_text(0, Some(len)),
            }),
            None if !t.size_notice_shown => {
                t.size_notice_shown = true;
                reporter.report(&ProgressEvent::SizeUnknown { status: progress_text(0, None) });
            }
            None => {}
        }
        if let Some(len) = t.content_length {
            if len > limits.max_size {
                return Err(TransferError::TooLarge(len));
            }
        }

        let mut validator = IncrementalValidator::new(limits.max_dim).with_declared_type(declared_type);
        let mut head: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        let mut last_update = Instant::now();
        let idle = self.config.idle_timeout;

        t.set_state(TransferState::Receiving);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => next,
            };
            let chunk: Bytes = match next {
                Err(_) => {
                    return Err(TransferError::NetworkError(format!(
                        "no data received for {} seconds",
                        idle.as_secs()
                    )))
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(network_error)?,
            };

            t.bytes_received += chunk.len() as u64;
            if t.bytes_received > limits.max_size {
                return Err(TransferError::AbortedTooLarge(t.bytes_received));
            }

            if validator.wants_data() {
                head.try_reserve(chunk.len()).map_err(|_| TransferError::NoMemory)?;
                head.extend_from_slice(&chunk);
            }
            file.write_all(&chunk).await.map_err(|e| {
                tracing::error!("Writing temp file {:?} failed: {}", path, e);
                TransferError::NoTempFile
            })?;

            if t.bytes_received - t.last_check >= limits.check_interval {
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                t.last_check = t.bytes_received;
                t.set_state(TransferState::Validating);
                if let Verdict::Abort(err) = validator.check(&head, false) {
                    return Err(err);
                }
                t.set_state(TransferState::Receiving);
            }

            if last_update.elapsed() >= UPDATE_INTERVAL {
                last_update = Instant::now();
                reporter.report(&ProgressEvent::PeriodicUpdate {
                    progress: progress_text(t.bytes_received, t.content_length),
                    extra: info_text(&validator),
                });
            }
        }

        if t.bytes_received == 0 {
            return Err(TransferError::NoData);
        }
        if let Some(len) = t.content_length {
            if t.bytes_received < len {
                return Err(TransferError::NetworkError(format!(
                    "connection closed after {} of {} bytes",
                    t.bytes_received, len
                )));
            }
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        t.set_state(TransferState::Validating);
        if let Verdict::Abort(err) = validator.check(&head, true) {
            return Err(err);
        }
        let info = validator.info().ok_or_else(|| {
            TransferError::UnsupportedType(mime::APPLICATION_OCTET_STREAM.to_string())
        })?;

        file.flush().await.map_err(|e| {
            tracing::error!("Flushing temp file {:?} failed: {}", path, e);
            TransferError::NoTempFile
        })?;
        drop(file);

        Ok(Artifact { path, info, size: t.bytes_received, redirects: t.redirect_count, final_url })
    }

    /// Send the request, following redirects up to the configured cap.
    async fn connect(
        &self,
        t: &mut Transfer,
        reporter: &mut dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Response, TransferError> {
        let mut url = Url::parse(&t.url)
            .map_err(|e| TransferError::RequestFailed(format!("invalid URL: {}", e)))?;
        let notice = tokio::time::sleep(SIZE_NOTICE_DELAY);
        tokio::pin!(notice);

        loop {
            let send = tokio::time::timeout(self.config.idle_timeout, self.client.get(url.clone()).send());
            tokio::pin!(send);

            let response = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    res = &mut send => {
                        let res = res.map_err(|_| {
                            TransferError::NetworkError("timed out waiting for response".into())
                        })?;
                        break res.map_err(network_error)?;
                    }
                    _ = &mut notice, if !t.size_notice_shown => {
                        t.size_notice_shown = true;
                        reporter.report(&ProgressEvent::SizeUnknown { status: "connecting".into() });
                    }
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        TransferError::RequestFailed(format!("HTTP {} without Location header", status))
                    })?;
                let next = url.join(location).map_err(|e| {
                    TransferError::RequestFailed(format!("invalid redirect target: {}", e))
                })?;
                if t.redirect_count >= t.limits.max_redirects {
                    return Err(TransferError::TooManyRedirects(t.redirect_count));
                }
                t.redirect_count += 1;
                tracing::debug!(from = %url, to = %next, count = t.redirect_count, "Following redirect");
                url = next;
                continue;
            }
            if !status.is_success() {
                return Err(TransferError::RequestFailed(format!("HTTP {}", status)));
            }
            return Ok(response);
        }
    }
}

fn info_text(validator: &IncrementalValidator) -> String {
    match validator.info() {
        Some(info) => format!("{} {}x{}", info.kind, info.width, info.height),
        None => String::new(),
    }
}

/// Flatten a reqwest error and its causes into one diagnostic line.
fn network_error(e: reqwest::Error) -> TransferError {
    let e = e.without_url();
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    TransferError::NetworkError(msg)
}

/// Filename part of a URL, used to name the resource in messages.
pub fn resource_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| url.to_string())
}
