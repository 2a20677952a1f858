//! Transfer progress events and the reporters that render them.
//!
//! Reporters only observe a transfer. Nothing they do feeds back into the
//! fetch, so a transfer run with [`NoProgress`] behaves exactly like one
//! with a live reporter.

use std::io::Write;
use std::time::Duration;

/// How long to wait for response headers before announcing an unknown size.
pub const SIZE_NOTICE_DELAY: Duration = Duration::from_secs(1);
/// Minimum spacing of periodic updates.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Content length arrived with headers inside the notice delay.
    SizeKnownEarly { size_kb: u64, status: String },
    /// No content length after the notice delay (or none at all).
    SizeUnknown { status: String },
    /// Content length arrived after `SizeUnknown` was already shown.
    SizeKnownLate { size_kb: u64 },
    PeriodicUpdate { progress: String, extra: String },
    /// Emitted exactly once per transfer.
    Final { summary: String },
}

pub trait ProgressReporter: Send {
    fn report(&mut self, event: &ProgressEvent);
}

/// Quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _event: &ProgressEvent) {}
}

/// Logs every event at debug level.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    url: String,
}

impl TracingReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ProgressReporter for TracingReporter {
    fn report(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::SizeKnownEarly { size_kb, .. } => {
                tracing::debug!(url = %self.url, size_kb, "size known")
            }
            ProgressEvent::SizeUnknown { .. } => tracing::debug!(url = %self.url, "size unknown"),
            ProgressEvent::SizeKnownLate { size_kb } => {
                tracing::debug!(url = %self.url, size_kb, "size known late")
            }
            ProgressEvent::PeriodicUpdate { progress, extra } => {
                tracing::debug!(url = %self.url, %progress, %extra, "progress")
            }
            ProgressEvent::Final { summary } => tracing::debug!(url = %self.url, %summary, "finished"),
        }
    }
}

/// Writes the status fragments of the interactive lookup page: an inline
/// size/status line first, then `<script>` calls that update it in place.
pub struct ScriptReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ScriptReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ProgressReporter for ScriptReporter<W> {
    fn report(&mut self, event: &ProgressEvent) {
        let text = render_script(event);
        // The page is best effort; a closed sink must not affect the transfer.
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::debug!("Progress sink closed: {}", e);
        }
    }
}

/// One page fragment per event.
pub fn render_script(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::SizeKnownEarly { size_kb, status } => {
            format!(" ({} KB)... <span id='urlstat'>{}</span></div>\n", size_kb, status)
        }
        ProgressEvent::SizeUnknown { status } => {
            format!(" (<span id='urlsize'>?</span> KB)... <span id='urlstat'>{}</span></div>\n", status)
        }
        ProgressEvent::SizeKnownLate { size_kb } => {
            format!("<script type='text/javascript'>url_size('{}');</script>\n", size_kb)
        }
        ProgressEvent::PeriodicUpdate { progress, extra } => progress_script(progress, extra),
        ProgressEvent::Final { summary } => progress_script(summary, ""),
    }
}

fn progress_script(progress: &str, extra: &str) -> String {
    format!(
        "<script type='text/javascript'>progress('{}','{}');</script>\n",
        js_escape(progress),
        js_escape(extra)
    )
}

fn js_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '<' => out.push_str("\\x3c"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Keeps every event in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    pub events: Vec<ProgressEvent>,
}

impl ProgressReporter for RecordingReporter {
    fn report(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}

/// `"12 of 40 KB"` or `"12 KB"` when the total is unknown.
pub fn progress_text(received: u64, total: Option<u64>) -> String {
    use crate::fetch::error::kb;
    match total {
        Some(total) => format!("{} of {} KB", kb(received), kb(total)),
        None => format!("{} KB", kb(received)),
    }
}

/// Completion line, e.g. `OK, 1.2 seconds. [Followed 2 redirects]`.
pub fn summary_text(ok: bool, elapsed: Duration, redirects: u32) -> String {
    if !ok {
        return "failed".to_string();
    }
    let redirs = match redirects {
        0 => String::new(),
        1 => " [Followed 1 redirect]".to_string(),
        n => format!(" [Followed {} redirects]", n),
    };
    format!("OK, {:.1} seconds.{}", elapsed.as_secs_f64(), redirs)
}
