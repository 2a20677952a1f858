use crate::fetch::error::TransferError;
use crate::fetch::sniff::{sniff_dimensions, sniff_kind, Dimensions, ImageKind, Kind};

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Abort(TransferError),
}

/// Type and canvas size of an accepted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

/// Judges a download from the bytes received so far.
///
/// Type and dimensions latch the first time they can be determined and are
/// never re-derived; once a pass aborts, every later pass returns the same
/// abort. Too little data is never an error until the stream has ended.
#[derive(Debug, Clone)]
pub struct IncrementalValidator {
    max_dim: u32,
    declared_type: Option<String>,
    kind: Option<ImageKind>,
    dimensions: Option<(u32, u32)>,
    rejected: Option<TransferError>,
}

impl IncrementalValidator {
    pub fn new(max_dim: u32) -> Self {
        Self { max_dim, declared_type: None, kind: None, dimensions: None, rejected: None }
    }

    /// Type reported when the content is not recognised at all, usually the
    /// server's `Content-Type`.
    pub fn with_declared_type(mut self, declared: Option<String>) -> Self {
        self.declared_type = declared;
        self
    }

    /// `buffer` is the whole prefix received so far; `finished` marks the
    /// last pass at end of stream.
    pub fn check(&mut self, buffer: &[u8], finished: bool) -> Verdict {
        if let Some(err) = &self.rejected {
            return Verdict::Abort(err.clone());
        }
        if self.info().is_some() {
            return Verdict::Continue;
        }
        let verdict = self.evaluate(buffer, finished);
        if let Verdict::Abort(err) = &verdict {
            self.rejected = Some(err.clone());
        }
        verdict
    }

    fn evaluate(&mut self, buffer: &[u8], finished: bool) -> Verdict {
        let kind = match self.kind {
            Some(kind) => kind,
            None => match sniff_kind(buffer, finished) {
                Kind::NeedMore => return Verdict::Continue,
                Kind::Unsupported(mime) => {
                    let ty = mime
                        .map(str::to_string)
                        .or_else(|| self.declared_type.clone())
                        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
                    tracing::debug!("Rejecting content of type {}", ty);
                    return Verdict::Abort(TransferError::UnsupportedType(ty));
                }
                Kind::Supported(kind) => {
                    tracing::debug!("Content sniffed as {}", kind);
                    self.kind = Some(kind);
                    kind
                }
            },
        };

        match sniff_dimensions(kind, buffer) {
            Dimensions::NeedMore if !finished => Verdict::Continue,
            Dimensions::NeedMore | Dimensions::Malformed => {
                Verdict::Abort(TransferError::UnsupportedType(kind.mime().to_string()))
            }
            Dimensions::Found(w, h) => {
                self.dimensions = Some((w, h));
                if w > self.max_dim || h > self.max_dim {
                    Verdict::Abort(TransferError::DimensionTooLarge(w, h))
                } else {
                    Verdict::Continue
                }
            }
        }
    }

    pub fn kind(&self) -> Option<ImageKind> {
        self.kind
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Latched type and size, once both are known and accepted.
    pub fn info(&self) -> Option<ImageInfo> {
        if self.rejected.is_some() {
            return None;
        }
        match (self.kind, self.dimensions) {
            (Some(kind), Some((width, height))) => Some(ImageInfo { kind, width, height }),
            _ => None,
        }
    }

    /// Whether later passes still depend on buffered header bytes.
    pub fn wants_data(&self) -> bool {
        self.rejected.is_none() && self.info().is_none()
    }
}
