//! Turns a playlist source key into a ready-to-fetch list of segments.
//!
//! The master playlist is cached per source key; the media playlist of the
//! chosen variant is fetched on every call since it tracks the live edge.
//! A media playlist that cannot be loaded invalidates the cached master and
//! the next attempt starts over from the master fetch.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::PlaylistCache;
use crate::config::ResolverConfig;
use crate::error::ClipError;
use crate::http::HttpFetcher;
use crate::playlist::{MasterPlaylist, MediaPlaylistDocument, MediaPlaylistResolution};

pub struct PlaylistResolver {
    fetcher: Arc<dyn HttpFetcher>,
    cache: PlaylistCache,
    config: ResolverConfig,
}

impl PlaylistResolver {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        cache: PlaylistCache,
        config: ResolverConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &PlaylistCache {
        &self.cache
    }

    pub async fn resolve(&self, source_key: &str) -> Result<MediaPlaylistResolution, ClipError> {
        self.resolve_with_token(source_key, &CancellationToken::new())
            .await
    }

    /// Resolve `source_key`, giving up with [`ClipError::Cancelled`] once
    /// `token` fires.
    ///
    /// The cache slot for `source_key` stays locked for the whole call, so
    /// concurrent requests for one key never fetch the master twice.
    pub async fn resolve_with_token(
        &self,
        source_key: &str,
        token: &CancellationToken,
    ) -> Result<MediaPlaylistResolution, ClipError> {
        let source_url =
            Url::parse(source_key).map_err(|e| ClipError::invalid_url(source_key, e))?;
        let max_attempts = self.config.max_attempts();

        let mut slot = cancellable(token, self.cache.lock(source_key)).await?;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let master = match slot.fresh_master(Instant::now()) {
                Some(master) => {
                    debug!(source_key, attempt, "Using cached master playlist");
                    master
                }
                None => Arc::new(cancellable(token, self.fetch_master(&source_url)).await??),
            };

            let variant = master
                .best_variant()
                .ok_or_else(|| ClipError::NoVariantsAvailable {
                    url: master.url.to_string(),
                })?;
            debug!(
                source_key,
                attempt,
                variant = %variant.uri,
                resolution = %variant.resolution,
                "Selected variant"
            );

            match cancellable(token, self.fetch_media(&variant.uri)).await? {
                Ok(document) => {
                    slot.store(Arc::clone(&master), Instant::now() + self.config.master_ttl);
                    drop(slot);

                    let init_segment = match &document.init_segment_uri {
                        Some(uri) => Some(cancellable(token, self.fetch_init(uri)).await??),
                        None => None,
                    };

                    info!(
                        source_key,
                        attempt,
                        segments = document.segments.len(),
                        has_init = init_segment.is_some(),
                        "Resolved media playlist"
                    );
                    return Ok(MediaPlaylistResolution {
                        segments: document.segments,
                        init_segment,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        source_key,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Media playlist unavailable, invalidating cached master"
                    );
                    slot.store(master, Instant::now());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClipError::RetriesExhausted {
            attempts: max_attempts,
            last_error: Box::new(last_error.unwrap_or_else(|| ClipError::Internal {
                reason: "resolver made no attempts".to_string(),
            })),
        })
    }

    async fn fetch_master(&self, url: &Url) -> Result<MasterPlaylist, ClipError> {
        debug!(%url, "Fetching master playlist");
        let response = self.fetcher.get(url).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(ClipError::StreamNotFound {
                url: url.to_string(),
            });
        }
        if !response.is_success() {
            return Err(ClipError::upstream_status(
                response.status,
                url.as_str(),
                "master playlist fetch",
            ));
        }
        MasterPlaylist::parse(url, &response.body)
    }

    async fn fetch_media(&self, url: &Url) -> Result<MediaPlaylistDocument, ClipError> {
        let response = self.fetcher.get(url).await?;
        if !response.is_success() {
            return Err(ClipError::upstream_status(
                response.status,
                url.as_str(),
                "media playlist fetch",
            ));
        }
        MediaPlaylistDocument::parse(url, &response.body)
    }

    async fn fetch_init(&self, url: &Url) -> Result<Bytes, ClipError> {
        debug!(%url, "Fetching init segment");
        let response = self.fetcher.get(url).await?;
        if !response.is_success() {
            return Err(ClipError::upstream_status(
                response.status,
                url.as_str(),
                "init segment fetch",
            ));
        }
        Ok(response.body)
    }
}

async fn cancellable<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, ClipError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ClipError::Cancelled),
        output = future => Ok(output),
    }
}
