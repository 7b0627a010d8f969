//! Clip orchestration: resolver, then segment fetch, then muxer for one request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::PlaylistCache;
use crate::config::ClipperConfig;
use crate::error::ClipError;
use crate::fetch::SegmentFetchPipeline;
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::muxer::{MuxerBackend, MuxerPipeline, ProcessMuxer};
use crate::resolver::PlaylistResolver;
use crate::source::{StreamSourceResolver, normalize_channel};

/// One clip request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipJob {
    pub channel_name: String,
    pub clip_id: String,
    pub save_dir: PathBuf,
    pub output_format: String,
    pub created_at: DateTime<Utc>,
}

impl ClipJob {
    /// The clip id is the Unix timestamp of `created_at` in seconds.
    ///
    /// The channel goes through [`normalize_channel`], so the save directory
    /// always stays directly under `clips_dir`. Two jobs for one channel
    /// created within the same second share an output path; the later muxer
    /// run overwrites the earlier clip.
    pub fn new(
        clips_dir: &Path,
        channel: &str,
        created_at: DateTime<Utc>,
        output_format: &str,
    ) -> Result<Self, ClipError> {
        let channel_name = normalize_channel(channel)?;
        Ok(Self {
            save_dir: clips_dir.join(&channel_name),
            clip_id: created_at.timestamp().to_string(),
            channel_name,
            output_format: output_format.to_string(),
            created_at,
        })
    }

    /// `{channel}/{clip_id}.{format}`, relative to the clips directory.
    pub fn relative_output_path(&self) -> String {
        format!(
            "{}/{}.{}",
            self.channel_name, self.clip_id, self.output_format
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipOutput {
    pub relative_path: String,
    pub output_path: PathBuf,
    pub clip_id: String,
    pub segment_count: usize,
    pub bytes: u64,
}

pub struct Clipper {
    clips_dir: PathBuf,
    output_format: String,
    resolver: PlaylistResolver,
    fetch: SegmentFetchPipeline,
    muxer: MuxerPipeline,
}

impl Clipper {
    /// Wire the production components: reqwest for HTTP, ffmpeg for muxing.
    pub fn new(config: ClipperConfig) -> Result<Self, ClipError> {
        let fetcher: Arc<dyn HttpFetcher> =
            Arc::new(ReqwestFetcher::from_config(&config.http)?);
        let muxer: Arc<dyn MuxerBackend> = Arc::new(ProcessMuxer::ffmpeg(&config.muxer));
        Ok(Self::with_components(config, fetcher, muxer))
    }

    pub fn with_components(
        config: ClipperConfig,
        fetcher: Arc<dyn HttpFetcher>,
        muxer: Arc<dyn MuxerBackend>,
    ) -> Self {
        let cache = PlaylistCache::new(&config.cache);
        let resolver =
            PlaylistResolver::new(Arc::clone(&fetcher), cache, config.resolver.clone());
        let fetch = SegmentFetchPipeline::new(fetcher, &config.fetch);
        let muxer = MuxerPipeline::new(muxer, config.muxer.output_format.clone());

        Self {
            clips_dir: config.clips_dir,
            output_format: config.muxer.output_format,
            resolver,
            fetch,
            muxer,
        }
    }

    pub fn clips_dir(&self) -> &Path {
        &self.clips_dir
    }

    pub fn cache(&self) -> &PlaylistCache {
        self.resolver.cache()
    }

    pub fn new_job(
        &self,
        channel: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ClipJob, ClipError> {
        ClipJob::new(&self.clips_dir, channel, created_at, &self.output_format)
    }

    /// Produce a clip of `channel_name` from the playlist at `source_key`.
    pub async fn produce_clip(
        &self,
        channel_name: &str,
        source_key: &str,
    ) -> Result<ClipOutput, ClipError> {
        let job = self.new_job(channel_name, Utc::now())?;
        self.produce_job(&job, source_key).await
    }

    /// Resolve `channel` through `source` and clip it.
    pub async fn clip_channel(
        &self,
        source: &dyn StreamSourceResolver,
        channel: &str,
    ) -> Result<ClipOutput, ClipError> {
        let stream = source.resolve(channel).await?;
        debug!(
            channel = %stream.channel,
            source_key = %stream.source_key,
            "Resolved stream source"
        );
        self.produce_clip(&stream.channel, &stream.source_key).await
    }

    pub async fn produce_job(
        &self,
        job: &ClipJob,
        source_key: &str,
    ) -> Result<ClipOutput, ClipError> {
        self.produce_job_with_token(job, source_key, &CancellationToken::new())
            .await
    }

    pub async fn produce_job_with_token(
        &self,
        job: &ClipJob,
        source_key: &str,
        token: &CancellationToken,
    ) -> Result<ClipOutput, ClipError> {
        let span = info_span!("clip", channel = %job.channel_name, clip_id = %job.clip_id);
        async {
            let result = self.run(job, source_key, token).await;
            match &result {
                Ok(output) => info!(
                    path = %output.relative_path,
                    segments = output.segment_count,
                    bytes = output.bytes,
                    "Clip produced"
                ),
                Err(e) => warn!(error = %e, status = e.status_code(), "Clip failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        job: &ClipJob,
        source_key: &str,
        token: &CancellationToken,
    ) -> Result<ClipOutput, ClipError> {
        let resolution = self.resolver.resolve_with_token(source_key, token).await?;
        let segment_count = resolution.segments.len();

        let payloads = self.fetch.fetch_all(&resolution.segments, token).await?;
        let bytes: u64 = resolution
            .init_segment
            .iter()
            .chain(payloads.iter())
            .map(|b| b.len() as u64)
            .sum();

        let output_path = self
            .muxer
            .assemble(
                &job.save_dir,
                &job.clip_id,
                resolution.init_segment,
                payloads,
            )
            .await?;

        Ok(ClipOutput {
            relative_path: job.relative_output_path(),
            output_path,
            clip_id: job.clip_id.clone(),
            segment_count,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn job_paths_are_derived_from_timestamp() {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let job = ClipJob::new(Path::new("/srv/clips"), "Chan1", created_at, "mp4")
            .unwrap();

        assert_eq!(job.clip_id, "1700000000");
        assert_eq!(job.channel_name, "chan1");
        assert_eq!(job.save_dir, PathBuf::from("/srv/clips/chan1"));
        assert_eq!(job.relative_output_path(), "chan1/1700000000.mp4");
    }

    #[test]
    fn job_rejects_channels_that_leave_clips_dir() {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for channel in ["../escaped", "a/../../b", "/abs", ".."] {
            let err = ClipJob::new(Path::new("/srv/clips"), channel, created_at, "mp4")
                .unwrap_err();
            assert!(err.is_not_found(), "{channel}: {err}");
        }
    }
}
