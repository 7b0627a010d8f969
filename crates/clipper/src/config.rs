use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipperConfig {
    /// Root directory; clips land in `{clips_dir}/{channel}/{clip_id}.{format}`
    pub clips_dir: PathBuf,
    pub http: HttpConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub muxer: MuxerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Overall timeout applied to every request made by the shared client
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,

    /// Whether to follow redirects
    pub follow_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: BTreeMap::new(),
            follow_redirects: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Retries after the first attempt when the media playlist cannot be loaded
    pub max_retries: u32,

    /// How long a fetched master playlist stays fresh after a successful resolution
    #[serde(with = "duration_secs")]
    pub master_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            master_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl ResolverConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of source keys kept; least recently used keys are evicted first
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum segment downloads in flight per clip. `0` disables the limit.
    pub max_concurrent: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    /// Path to the ffmpeg binary
    pub binary_path: String,

    /// Container format of the produced clip, also used as file extension
    pub output_format: String,

    /// Forced demuxer for stdin (e.g. `mpegts`); probed by ffmpeg when unset
    pub input_format: Option<String>,

    /// Extra arguments placed before `-i -`
    pub input_args: Vec<String>,

    /// Extra arguments placed before the output path
    pub output_args: Vec<String>,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            output_format: "mp4".to_string(),
            input_format: None,
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_behaviour() {
        let config = ClipperConfig::default();
        assert_eq!(config.http.timeout, Duration::from_secs(60));
        assert_eq!(config.resolver.max_attempts(), 4);
        assert_eq!(config.resolver.master_ttl, Duration::from_secs(3600));
        assert_eq!(config.muxer.output_format, "mp4");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ClipperConfig = serde_json::from_str(
            r#"{"clips_dir": "/srv/clips", "resolver": {"master_ttl": 120}, "fetch": {"max_concurrent": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.clips_dir, PathBuf::from("/srv/clips"));
        assert_eq!(config.resolver.master_ttl, Duration::from_secs(120));
        assert_eq!(config.resolver.max_retries, 3);
        assert_eq!(config.fetch.max_concurrent, 0);
        assert_eq!(config.muxer.binary_path, "ffmpeg");
    }
}
