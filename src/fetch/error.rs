use thiserror::Error;

/// Terminal outcome of a failed URL transfer.
///
/// Every failure of [`StreamingFetcher::fetch`](crate::fetch::StreamingFetcher::fetch)
/// is exactly one of these. Validation aborts (`UnsupportedType`,
/// `TooLarge`, `AbortedTooLarge`, `DimensionTooLarge`) are expected
/// outcomes, distinct from transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("buffer allocation failed")]
    NoMemory,
    #[error("could not create temporary file")]
    NoTempFile,
    #[error("too many redirects ({0})")]
    TooManyRedirects(u32),
    /// Transport failure: DNS, connect, reset, idle timeout, truncated body.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The server answered, but not with something fetchable: an error
    /// status, a redirect without a target, or an unusable URL.
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unsupported type {0}")]
    UnsupportedType(String),
    #[error("no data received")]
    NoData,
    /// Declared size over the ceiling, known before the body was read.
    #[error("declared size {0} bytes exceeds limit")]
    TooLarge(u64),
    /// Ceiling crossed mid-stream; carries the bytes received so far.
    #[error("aborted after {0} bytes: too large")]
    AbortedTooLarge(u64),
    #[error("dimensions {0}x{1} exceed limit")]
    DimensionTooLarge(u32, u32),
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Stable identifier, suitable for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::NoMemory => "NoMemory",
            TransferError::NoTempFile => "NoTempFile",
            TransferError::TooManyRedirects(_) => "TooManyRedirects",
            TransferError::NetworkError(_) => "NetworkError",
            TransferError::RequestFailed(_) => "RequestFailed",
            TransferError::UnsupportedType(_) => "UnsupportedType",
            TransferError::NoData => "NoData",
            TransferError::TooLarge(_) => "TooLarge",
            TransferError::AbortedTooLarge(_) => "AbortedTooLarge",
            TransferError::DimensionTooLarge(..) => "DimensionTooLarge",
            TransferError::Cancelled => "Cancelled",
        }
    }

    /// True for outcomes produced by validation rather than by the transport
    /// or local resources.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransferError::UnsupportedType(_)
                | TransferError::TooLarge(_)
                | TransferError::AbortedTooLarge(_)
                | TransferError::DimensionTooLarge(..)
        )
    }

    /// User-facing message. `name` identifies the resource, usually the
    /// filename part of the URL.
    pub fn describe(&self, name: &str) -> String {
        match self {
            TransferError::NoMemory => "Out of memory".to_string(),
            TransferError::NoTempFile => "Can't make temp file.".to_string(),
            TransferError::TooManyRedirects(_) => "Transfer failed... too many redirections.".to_string(),
            TransferError::NetworkError(diag) => format!("Transfer failed: {}", diag),
            TransferError::RequestFailed(diag) => format!("Request failed: {}", diag),
            TransferError::UnsupportedType(ty) => format!("Failed: {} has unsupported type {}", name, ty),
            TransferError::NoData => "No data received.".to_string(),
            TransferError::TooLarge(size) => format!("{} is too large: {} KB", name, kb(*size)),
            TransferError::AbortedTooLarge(received) => {
                format!("Aborted {} after receiving {} KB: too large.", name, kb(*received))
            }
            TransferError::DimensionTooLarge(w, h) => format!("Image {} too large ({} x {})", name, w, h),
            TransferError::Cancelled => "Transfer cancelled.".to_string(),
        }
    }

    /// Secondary advice shown next to the message, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            TransferError::UnsupportedType(_) => Some("Check the URL"),
            TransferError::DimensionTooLarge(..) => Some("Try downloading a thumbnail version."),
            _ => None,
        }
    }
}

/// Rounded kilobytes, as shown to users. `bytes` may be any value a
/// server declares, so this must not overflow.
pub fn kb(bytes: u64) -> u64 {
    bytes / 1024 + u64::from(bytes % 1024 >= 512)
}
