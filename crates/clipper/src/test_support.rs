//! In-memory doubles for the engine's HTTP and muxer capabilities.
//!
//! Compiled for unit tests and behind the `test-utils` feature so the
//! integration tests under `tests/` can drive the full pipeline without a
//! network or an ffmpeg binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::error::ClipError;
use crate::http::{HttpFetcher, HttpResponse};
use crate::muxer::{MuxerBackend, MuxerSession};

#[derive(Debug, Clone)]
enum Reply {
    Response { status: StatusCode, body: Bytes },
    Fail { reason: String },
}

#[derive(Debug, Clone)]
struct Route {
    reply: Reply,
    delay: Duration,
}

/// Scripted [`HttpFetcher`]. Unknown URLs answer `404`.
#[derive(Debug, Default)]
pub struct MockHttp {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, url: &str, reply: Reply) {
        let mut routes = self.routes.lock();
        let delay = routes.get(url).map(|r| r.delay).unwrap_or_default();
        routes.insert(url.to_owned(), Route { reply, delay });
    }

    /// Answer `200` with `body`.
    pub fn ok(&self, url: &str, body: impl Into<Bytes>) {
        self.respond(url, 200, body);
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.route(
            url,
            Reply::Response {
                status,
                body: body.into(),
            },
        );
    }

    /// Answer with an empty body and `status`.
    pub fn status(&self, url: &str, status: u16) {
        self.respond(url, status, Bytes::new());
    }

    /// Fail with a transport error.
    pub fn fail(&self, url: &str, reason: &str) {
        self.route(
            url,
            Reply::Fail {
                reason: reason.to_owned(),
            },
        );
    }

    /// Hold every request to `url` for `delay` before replying.
    pub fn delay(&self, url: &str, delay: Duration) {
        let mut routes = self.routes.lock();
        let route = routes.entry(url.to_owned()).or_insert_with(|| Route {
            reply: Reply::Response {
                status: StatusCode::NOT_FOUND,
                body: Bytes::new(),
            },
            delay,
        });
        route.delay = delay;
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetcher for MockHttp {
    async fn get(&self, url: &Url) -> Result<HttpResponse, ClipError> {
        self.requests.lock().push(url.to_string());
        let route = self.routes.lock().get(url.as_str()).cloned();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = route.as_ref().map(|r| r.delay).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match route.map(|r| r.reply) {
            Some(Reply::Response { status, body }) => Ok(HttpResponse::new(status, body)),
            Some(Reply::Fail { reason }) => Err(ClipError::network(url.as_str(), reason)),
            None => Ok(HttpResponse::new(StatusCode::NOT_FOUND, Bytes::new())),
        }
    }
}

/// What a [`RecordingMuxer`] saw during one session.
#[derive(Debug, Clone)]
pub struct MuxRecord {
    pub output_path: PathBuf,
    pub input: Vec<u8>,
}

/// Muxer double that reads its whole input and writes it unchanged to the
/// output path, optionally failing after the input is consumed.
#[derive(Debug, Default)]
pub struct RecordingMuxer {
    records: Arc<Mutex<Vec<MuxRecord>>>,
    failure: Option<String>,
    write_partial_output: bool,
}

impl RecordingMuxer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A muxer that consumes all input, leaves a partial file behind and
    /// then reports `reason` as a process failure.
    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(reason.to_owned()),
            write_partial_output: true,
            ..Self::default()
        })
    }

    pub fn records(&self) -> Vec<MuxRecord> {
        self.records.lock().clone()
    }

    pub fn sessions(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl MuxerBackend for RecordingMuxer {
    async fn start(&self, output_path: &Path) -> Result<MuxerSession, ClipError> {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let output_path = output_path.to_path_buf();
        let records = Arc::clone(&self.records);
        let failure = self.failure.clone();
        let write_partial_output = self.write_partial_output;

        let completion = async move {
            let mut input = Vec::new();
            reader.read_to_end(&mut input).await?;

            if failure.is_none() || write_partial_output {
                tokio::fs::write(&output_path, &input).await?;
            }
            records.lock().push(MuxRecord { output_path, input });

            match failure {
                Some(reason) => Err(ClipError::process(reason)),
                None => Ok(()),
            }
        }
        .boxed();

        Ok(MuxerSession {
            input: Box::new(writer),
            completion,
        })
    }
}

/// Build a media playlist body listing `segments` with 2 s durations.
pub fn media_playlist(segments: &[&str]) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n");
    for segment in segments {
        body.push_str("#EXTINF:2.000,live\n");
        body.push_str(segment);
        body.push('\n');
    }
    body
}

/// Build a master playlist body from `(resolution, uri)` pairs.
pub fn master_playlist(variants: &[(&str, &str)]) -> String {
    let mut body = String::from("#EXTM3U\n");
    for (i, (resolution, uri)) in variants.iter().enumerate() {
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={resolution}\n{uri}\n",
            (i + 1) * 100_000
        ));
    }
    body
}
