//! Live stream clip engine.
//!
//! Resolves a channel's HLS playlist, downloads the live segments in
//! parallel and pipes them in order through a muxer into a single clip file.

pub mod cache;
pub mod clipper;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod muxer;
pub mod playlist;
pub mod resolver;
pub mod source;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use cache::{PlaylistCache, PlaylistCacheEntry};
pub use clipper::{ClipJob, ClipOutput, Clipper};
pub use config::ClipperConfig;
pub use error::{ClipError, ErrorKind};
pub use fetch::SegmentFetchPipeline;
pub use http::{HttpFetcher, HttpResponse, ReqwestFetcher};
pub use muxer::{MuxerBackend, MuxerPipeline, MuxerSession, ProcessMuxer};
pub use playlist::{MasterPlaylist, MediaPlaylistResolution, SegmentRef, Variant};
pub use resolver::PlaylistResolver;
pub use source::{FixedSource, StreamSource, StreamSourceResolver, TemplateSource};
