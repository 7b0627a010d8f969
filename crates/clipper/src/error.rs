use reqwest::StatusCode;

/// Coarse failure classes used to decide retry policy and outward status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream reported the resource as absent. Never retried.
    NotFound,
    /// Bad status or undecodable document from upstream.
    TransientUpstream,
    /// The upstream data cannot produce a clip (empty variant list, bad URIs).
    Structural,
    /// Transport or body-read failure.
    Network,
    /// Muxer launch, write or exit failure.
    Process,
    /// Cancellation or a failure inside the engine itself.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error("stream not found: {url}")]
    StreamNotFound { url: String },

    #[error("channel `{channel}` not found")]
    ChannelNotFound { channel: String },

    #[error("channel `{channel}` is not live")]
    ChannelOffline { channel: String },

    #[error("failed fetching stream segments after {attempts} tries: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<ClipError>,
    },

    #[error("bad status code ({status}) during {operation} for {url}")]
    UpstreamStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("no stream playlist available at {url}")]
    NoVariantsAvailable { url: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("segment #{index} failed: {source}")]
    SegmentFetch {
        index: usize,
        #[source]
        source: Box<ClipError>,
    },

    #[error("muxer process failed: {reason}")]
    Process { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl ClipError {
    pub fn network(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upstream_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::UpstreamStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn process(reason: impl Into<String>) -> Self {
        Self::Process {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StreamNotFound { .. }
            | Self::ChannelNotFound { .. }
            | Self::ChannelOffline { .. } => ErrorKind::NotFound,
            Self::RetriesExhausted { .. } | Self::UpstreamStatus { .. } => {
                ErrorKind::TransientUpstream
            }
            Self::NoVariantsAvailable { .. } | Self::Playlist { .. } | Self::InvalidUrl { .. } => {
                ErrorKind::Structural
            }
            Self::Network { .. } => ErrorKind::Network,
            Self::SegmentFetch { source, .. } => match source.kind() {
                ErrorKind::Internal => ErrorKind::Internal,
                _ => ErrorKind::Network,
            },
            Self::Process { .. } | Self::Io { .. } => ErrorKind::Process,
            Self::Configuration { .. } | Self::Cancelled | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a media playlist failure may be retried with the cached
    /// master playlist invalidated. A stale variant URI commonly answers 404,
    /// so every upstream status counts.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamStatus { .. }
                | Self::Playlist { .. }
                | Self::Network { .. }
                | Self::InvalidUrl { .. }
        )
    }

    /// HTTP status an outer HTTP layer should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::TransientUpstream | ErrorKind::Network => 502,
            ErrorKind::Structural | ErrorKind::Process | ErrorKind::Internal => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_errors_map_to_404() {
        let err = ClipError::StreamNotFound {
            url: "https://example.com/live.m3u8".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status_code(), 404);
        assert!(!err.is_retryable());

        let offline = ClipError::ChannelOffline {
            channel: "chan1".into(),
        };
        assert!(offline.is_not_found());
    }

    #[test]
    fn retries_exhausted_keeps_last_error() {
        let err = ClipError::RetriesExhausted {
            attempts: 4,
            last_error: Box::new(ClipError::playlist("truncated document")),
        };
        assert_eq!(err.kind(), ErrorKind::TransientUpstream);
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("after 4 tries"));
        assert!(err.to_string().contains("truncated document"));
    }

    #[test]
    fn segment_failures_are_network_failures() {
        let err = ClipError::SegmentFetch {
            index: 3,
            source: Box::new(ClipError::network("https://cdn/3.ts", "connection reset")),
        };
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("segment #3 failed"));
    }

    #[test]
    fn process_failures_are_terminal() {
        let err = ClipError::process("exited with code 1");
        assert_eq!(err.kind(), ErrorKind::Process);
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_retryable());
    }
}
