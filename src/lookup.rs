//! The lookup pipeline: validate the source image, thumbnail it, match the
//! thumbnail and render the results.

use crate::config::{AppConfig, ServiceConfig};
use crate::fetch::{resource_name, FetchRequest, IncrementalValidator, ProgressReporter, StreamingFetcher, TransferError, Verdict};
use crate::matcher::{IqdbMatcher, MatchOptions, MatchProcessor, Matcher, ThresholdProcessor};
use crate::thumbnail::{ImageThumbnailer, Thumbnailer};
use crate::xml::{MatchXmlRenderer, XmlRenderer};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a lookup produced an error document instead of results.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Upload error code {0}")]
    Upload(u16),
    #[error("{0}")]
    Request(String),
    #[error("{}", .error.describe(.name))]
    Transfer { name: String, error: TransferError },
    #[error("{0}")]
    Service(String),
    #[error("Thumbnail error code {0}")]
    Thumbnail(i32),
    #[error("{0}")]
    Match(String),
    #[error("Fatal: {0}")]
    Fatal(String),
    #[error("{0}")]
    Process(String),
    #[error("{0}")]
    Render(String),
}

/// Services and options selected by one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRequest {
    /// Service ids or names, as sent by the client.
    pub services: Vec<String>,
    pub forcegray: bool,
}

/// Turns an image into a rendered match document.
///
/// All collaborators sit behind traits so tests and embedders can swap
/// them. One instance serves every request; per-request state lives on the
/// stack of the lookup call.
pub struct LookupService {
    config: Arc<AppConfig>,
    fetcher: StreamingFetcher,
    thumbnailer: Arc<dyn Thumbnailer>,
    matcher: Arc<dyn Matcher>,
    processor: Arc<dyn MatchProcessor>,
    renderer: Arc<dyn XmlRenderer>,
    shutdown: CancellationToken,
}

impl LookupService {
    /// Service wired to the bundled thumbnailer, matcher client and renderer.
    pub fn new(config: AppConfig) -> Result<Self, TransferError> {
        let thumbnailer = Arc::new(ImageThumbnailer::new(config.thumb_dir.clone()));
        let matcher = Arc::new(IqdbMatcher::new(config.matcher_addr.clone()));
        let processor = Arc::new(ThresholdProcessor::new(config.min_similarity));
        let renderer = Arc::new(MatchXmlRenderer::new(config.services.clone()));
        Self::with_collaborators(config, thumbnailer, matcher, processor, renderer)
    }

    /// Service with caller-supplied collaborators. Fails only if the HTTP
    /// client for URL fetches cannot be built.
    pub fn with_collaborators(
        config: AppConfig,
        thumbnailer: Arc<dyn Thumbnailer>,
        matcher: Arc<dyn Matcher>,
        processor: Arc<dyn MatchProcessor>,
        renderer: Arc<dyn XmlRenderer>,
    ) -> Result<Self, TransferError> {
        let fetcher = StreamingFetcher::new(config.fetch.clone())?;
        Ok(Self {
            config: Arc::new(config),
            fetcher,
            thumbnailer,
            matcher,
            processor,
            renderer,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cancelling this token aborts every transfer in flight.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Look up an image already on local disk, e.g. an upload.
    ///
    /// `original_name` names the image in error messages. The file is
    /// validated in one pass with the same type and dimension rules as a
    /// URL fetch, then thumbnailed and matched against the services in
    /// `request`. Returns the XML document on success.
    pub async fn lookup_file(&self, source: &Path, original_name: &str, request: &MatchRequest) -> Result<String, LookupError> {
        let services = self.resolve_services(request)?;
        self.check_file(source, original_name).await?;
        self.match_image(source, original_name, &services, request).await
    }

    /// Fetch `url` and look the result up.
    ///
    /// Progress goes to `reporter` unless `quiet`. The fetch is cancelled
    /// when the service shuts down, and its temp file is removed once
    /// matching has finished.
    pub async fn lookup_url(
        &self,
        url: &str,
        request: &MatchRequest,
        quiet: bool,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<String, LookupError> {
        let services = self.resolve_services(request)?;
        let name = resource_name(url);
        let fetch = FetchRequest::new(url, self.config.fetch.limits).quiet(quiet);
        let artifact = self
            .fetcher
            .fetch(&fetch, reporter, self.shutdown.child_token())
            .await
            .map_err(|error| LookupError::Transfer { name: name.clone(), error })?;
        tracing::info!(
            "Fetched {} ({}, {} bytes, {} redirects)",
            url,
            artifact.content_type(),
            artifact.size,
            artifact.redirects
        );
        // The artifact, and with it the temp file, lives until matching is done.
        self.match_image(artifact.path(), &name, &services, request).await
    }

    fn resolve_services(&self, request: &MatchRequest) -> Result<Vec<ServiceConfig>, LookupError> {
        if request.services.is_empty() {
            return Err(LookupError::Service("No service selected".into()));
        }
        let mut selected: Vec<ServiceConfig> = Vec::new();
        for selector in &request.services {
            let service = self
                .config
                .service(selector)
                .ok_or_else(|| LookupError::Service(format!("Unknown service '{}'", selector)))?;
            if !selected.contains(service) {
                selected.push(service.clone());
            }
        }
        Ok(selected)
    }

    /// Apply the URL ceilings to a local file in a single pass.
    async fn check_file(&self, source: &Path, name: &str) -> Result<(), LookupError> {
        let limits = self.config.fetch.limits;
        let rejected = |error| LookupError::Transfer { name: name.to_string(), error };
        let bytes = tokio::fs::read(source).await.map_err(|e| {
            tracing::error!("Cannot read {:?}: {}", source, e);
            rejected(TransferError::NoData)
        })?;
        if bytes.is_empty() {
            return Err(rejected(TransferError::NoData));
        }
        if bytes.len() as u64 > limits.max_size {
            return Err(rejected(TransferError::TooLarge(bytes.len() as u64)));
        }
        match IncrementalValidator::new(limits.max_dim).check(&bytes, true) {
            Verdict::Continue => Ok(()),
            Verdict::Abort(error) => Err(rejected(error)),
        }
    }

    async fn match_image(
        &self,
        source: &Path,
        original_name: &str,
        services: &[ServiceConfig],
        request: &MatchRequest,
    ) -> Result<String, LookupError> {
        let thumb = self.thumbnailer.make_thumb(source, original_name).await.map_err(|e| {
            tracing::warn!("Thumbnail for {} failed: {}", original_name, e);
            LookupError::Thumbnail(e.code())
        })?;

        let options = MatchOptions { forcegray: request.forcegray, numres: self.config.numres };
        let res = self.matcher.request_match(&thumb.path, services, &options).await;
        if let Some(err) = res.error {
            return Err(LookupError::Match(err));
        }
        if let Some(fatal) = res.fatal_error {
            tracing::error!("Matcher reported a fatal error: {}", fatal);
            return Err(LookupError::Fatal(fatal));
        }

        let threshold = self.processor.process_match(&res.matches).map_err(LookupError::Process)?;
        let xml = self.renderer.render(&res.matches, &thumb, &threshold).map_err(LookupError::Render)?;
        tracing::info!("{} matches for {}, {} relevant", res.matches.len(), original_name, threshold.relevant);
        Ok(xml)
    }
}
