//! Mapping from a channel name to the playlist source key the resolver uses.
//!
//! Platform metadata lookups live outside the engine; these resolvers only
//! cover the cases where the playlist URL can be derived without an API call.

use async_trait::async_trait;
use url::Url;

use crate::error::ClipError;

/// Default proxy that hands out Twitch master playlists by channel name.
pub const TWITCH_PLAYLIST_TEMPLATE: &str = "https://luminous.alienpls.org/live/{channel}?platform=web&allow_source=true&allow_audio_only=true";

const CHANNEL_PLACEHOLDER: &str = "{channel}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub channel: String,
    pub source_key: String,
}

#[async_trait]
pub trait StreamSourceResolver: Send + Sync {
    /// Resolve `channel` to its playlist source.
    ///
    /// Implementations report [`ClipError::ChannelNotFound`] and
    /// [`ClipError::ChannelOffline`] distinctly from transport failures.
    async fn resolve(&self, channel: &str) -> Result<StreamSource, ClipError>;
}

/// Builds the source key by substituting the channel name into a URL template.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    template: String,
}

impl TemplateSource {
    pub fn new(template: impl Into<String>) -> Result<Self, ClipError> {
        let template = template.into();
        if !template.contains(CHANNEL_PLACEHOLDER) {
            return Err(ClipError::Configuration {
                reason: format!(
                    "source template `{template}` has no {CHANNEL_PLACEHOLDER} placeholder"
                ),
            });
        }
        Ok(Self { template })
    }

    pub fn twitch() -> Self {
        Self {
            template: TWITCH_PLAYLIST_TEMPLATE.to_string(),
        }
    }

    pub fn source_key(&self, channel: &str) -> Result<String, ClipError> {
        let key = self
            .template
            .replace(CHANNEL_PLACEHOLDER, &urlencoding::encode(channel));
        Url::parse(&key).map_err(|e| ClipError::invalid_url(&key, e))?;
        Ok(key)
    }
}

#[async_trait]
impl StreamSourceResolver for TemplateSource {
    async fn resolve(&self, channel: &str) -> Result<StreamSource, ClipError> {
        let channel = normalize_channel(channel)?;
        let source_key = self.source_key(&channel)?;
        Ok(StreamSource {
            channel,
            source_key,
        })
    }
}

/// Always answers with the same playlist URL.
#[derive(Debug, Clone)]
pub struct FixedSource {
    url: Url,
}

impl FixedSource {
    pub fn new(url: &str) -> Result<Self, ClipError> {
        let url = Url::parse(url).map_err(|e| ClipError::invalid_url(url, e))?;
        Ok(Self { url })
    }
}

#[async_trait]
impl StreamSourceResolver for FixedSource {
    async fn resolve(&self, channel: &str) -> Result<StreamSource, ClipError> {
        Ok(StreamSource {
            channel: normalize_channel(channel)?,
            source_key: self.url.to_string(),
        })
    }
}

/// Channel names are case-insensitive on every supported platform.
///
/// The normalized name becomes a directory under the clips root, so only
/// ASCII letters, digits, `_` and `-` are accepted. Anything else cannot name
/// a channel and is reported as [`ClipError::ChannelNotFound`].
pub fn normalize_channel(channel: &str) -> Result<String, ClipError> {
    let channel = channel.trim();
    let valid = !channel.is_empty()
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ClipError::ChannelNotFound {
            channel: channel.to_string(),
        });
    }
    Ok(channel.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn twitch_template_encodes_channel() {
        let source = TemplateSource::twitch()
            .resolve(" Some_Streamer ")
            .await
            .unwrap();
        assert_eq!(source.channel, "some_streamer");
        assert_eq!(
            source.source_key,
            "https://luminous.alienpls.org/live/some_streamer?platform=web&allow_source=true&allow_audio_only=true"
        );

        let odd = TemplateSource::new("https://proxy.example/{channel}.m3u8")
            .unwrap()
            .source_key("a b/c")
            .unwrap();
        assert_eq!(odd, "https://proxy.example/a%20b%2Fc.m3u8");
    }

    #[test]
    fn template_requires_placeholder() {
        assert!(TemplateSource::new("https://proxy.example/live.m3u8").is_err());
    }

    #[tokio::test]
    async fn fixed_source_ignores_channel_for_key() {
        let source = FixedSource::new("https://cdn.example/live/index.m3u8")
            .unwrap()
            .resolve("Chan1")
            .await
            .unwrap();
        assert_eq!(source.channel, "chan1");
        assert_eq!(source.source_key, "https://cdn.example/live/index.m3u8");

        assert!(FixedSource::new("not a url").is_err());
    }

    #[tokio::test]
    async fn blank_channel_is_not_found() {
        let err = TemplateSource::twitch().resolve("   ").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[rstest]
    #[case("../escaped")]
    #[case("..")]
    #[case("a/b")]
    #[case("a\\b")]
    #[case(".hidden")]
    #[case("chan 1")]
    #[case("chan\n1")]
    #[case("/etc")]
    fn unsafe_channel_names_are_rejected(#[case] channel: &str) {
        let err = normalize_channel(channel).unwrap_err();
        assert!(matches!(err, ClipError::ChannelNotFound { .. }));
    }

    #[rstest]
    #[case("Chan1", "chan1")]
    #[case(" some_streamer ", "some_streamer")]
    #[case("kick-user", "kick-user")]
    fn valid_channel_names_are_lowercased(#[case] channel: &str, #[case] expected: &str) {
        assert_eq!(normalize_channel(channel).unwrap(), expected);
    }
}
