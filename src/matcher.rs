//! Client side of the similarity matcher and the post-processing of its
//! results.
//!
//! The matcher runs as a separate daemon speaking a line protocol: every
//! reply line starts with a three digit status, `000` marks readiness for
//! the next command.

use crate::config::ServiceConfig;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Ignore colour information when matching.
pub const FLAG_GRAYSCALE: u32 = 0x02;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub forcegray: bool,
    /// Results requested per service.
    pub numres: u32,
}

impl MatchOptions {
    pub fn flags(&self) -> u32 {
        if self.forcegray { FLAG_GRAYSCALE } else { 0 }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MatchResult {
    /// Database id of the service the hit came from.
    pub service: u32,
    pub id: u64,
    /// Similarity in percent.
    pub score: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResponse {
    pub error: Option<String>,
    pub fatal_error: Option<String>,
    pub matches: Vec<MatchResult>,
}

#[async_trait::async_trait]
pub trait Matcher: Send + Sync {
    async fn request_match(&self, thumb: &Path, services: &[ServiceConfig], options: &MatchOptions) -> MatchResponse;
}

/// TCP client for an iqdb-style matching daemon.
///
/// Each request opens a fresh connection, waits for the greeting, sends one
/// `multi_query` and collects reply lines until the daemon is ready again.
/// Transport failures and timeouts are folded into
/// [`MatchResponse::error`] so callers always get a response to render.
pub struct IqdbMatcher {
    addr: String,
    timeout: Duration,
}

impl IqdbMatcher {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, command: &str, default_service: u32) -> std::io::Result<MatchResponse> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (rd, mut wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();
        let mut response = MatchResponse::default();

        // Greeting, then the reply to our single command.
        let mut ready = 0;
        while ready < 2 {
            let line = match lines.next_line().await? {
                Some(line) => line,
                // After a fatal error the daemon drops the connection
                // without another `000`.
                None if response.fatal_error.is_some() || response.error.is_some() => {
                    tracing::warn!("Matcher at {} closed the connection after an error", self.addr);
                    return Ok(response);
                }
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "matcher closed the connection",
                    ))
                }
            };
            if line.starts_with("000") {
                ready += 1;
                if ready == 1 {
                    tracing::trace!("matcher > {}", command.trim_end());
                    wr.write_all(command.as_bytes()).await?;
                    wr.flush().await?;
                }
                continue;
            }
            parse_reply_line(&line, default_service, &mut response);
        }

        wr.write_all(b"done\n").await?;
        wr.flush().await?;
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Matcher for IqdbMatcher {
    async fn request_match(&self, thumb: &Path, services: &[ServiceConfig], options: &MatchOptions) -> MatchResponse {
        let Some(first) = services.first() else {
            return MatchResponse { error: Some("No service selected".into()), ..Default::default() };
        };
        let command = multi_query_command(thumb, services, options);
        match tokio::time::timeout(self.timeout, self.exchange(&command, first.id)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!("Matcher at {} failed: {}", self.addr, e);
                MatchResponse { error: Some(format!("Matching engine unavailable: {}", e)), ..Default::default() }
            }
            Err(_) => MatchResponse { error: Some("Matching engine timed out".into()), ..Default::default() },
        }
    }
}

/// `multi_query <db> <flags> <numres> [+ <db> <flags> <numres>...] <file>`
pub fn multi_query_command(thumb: &Path, services: &[ServiceConfig], options: &MatchOptions) -> String {
    let queries = services
        .iter()
        .map(|s| format!("{} {} {}", s.id, options.flags(), options.numres))
        .collect::<Vec<_>>()
        .join(" + ");
    format!("multi_query {} {}\n", queries, thumb.display())
}

/// Fold one reply line into `response`. Unknown lines are ignored.
pub fn parse_reply_line(line: &str, default_service: u32, response: &mut MatchResponse) {
    let (code, rest) = line.split_once(' ').unwrap_or((line, ""));
    match code {
        "200" | "201" => {
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let (service, fields) = if code == "201" {
                match fields.split_first().and_then(|(db, rest)| db.parse::<u32>().ok().map(|db| (db, rest))) {
                    Some(split) => split,
                    None => return malformed(line, response),
                }
            } else {
                (default_service, &fields[..])
            };
            match parse_hit(service, fields) {
                Some(hit) => response.matches.push(hit),
                None => malformed(line, response),
            }
        }
        "300" | "301" => {
            if response.error.is_none() {
                response.error = Some(rest.to_string());
            }
        }
        "302" => response.fatal_error = Some(rest.to_string()),
        _ => tracing::trace!("matcher < {}", line),
    }
}

fn parse_hit(service: u32, fields: &[&str]) -> Option<MatchResult> {
    if fields.len() != 4 {
        return None;
    }
    Some(MatchResult {
        service,
        id: u64::from_str_radix(fields[0], 16).ok()?,
        score: fields[1].parse().ok()?,
        width: fields[2].parse().ok()?,
        height: fields[3].parse().ok()?,
    })
}

fn malformed(line: &str, response: &mut MatchResponse) {
    tracing::warn!("Malformed matcher reply: {}", line);
    if response.error.is_none() {
        response.error = Some(format!("Malformed reply from matching engine: {}", line));
    }
}

/// Summary of which results are worth showing.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Threshold {
    pub min_similarity: f64,
    pub best: Option<f64>,
    /// Number of results at or above `min_similarity`.
    pub relevant: usize,
}

pub trait MatchProcessor: Send + Sync {
    fn process_match(&self, matches: &[MatchResult]) -> Result<Threshold, String>;
}

pub struct ThresholdProcessor {
    min_similarity: f64,
}

impl ThresholdProcessor {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }
}

impl MatchProcessor for ThresholdProcessor {
    fn process_match(&self, matches: &[MatchResult]) -> Result<Threshold, String> {
        if let Some(bad) = matches.iter().find(|m| !m.score.is_finite()) {
            return Err(format!("Invalid similarity for image {:08x}", bad.id));
        }
        let best = matches.iter().map(|m| m.score).fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
        let relevant = matches.iter().filter(|m| m.score >= self.min_similarity).count();
        Ok(Threshold { min_similarity: self.min_similarity, best, relevant })
    }
}
