//! Playlist documents: master variant lists and live media playlists.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use m3u8_rs::{MediaPlaylist, Playlist, parse_playlist_res};
use tracing::{debug, trace};
use url::Url;

use crate::error::ClipError;

/// Segment title used by Twitch for real stream content; stitched ads carry other titles.
const LIVE_SEGMENT_TITLE: &str = "live";

/// Video resolution of a variant. Unknown or malformed values are `0x0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl Resolution {
    pub const fn new(width: u64, height: u64) -> Self {
        Self { width, height }
    }

    /// Parse a `WxH` descriptor. Anything that is not exactly two numbers
    /// separated by `x` yields `0x0`; a single unparseable side yields `0` for that side.
    pub fn parse_lenient(value: &str) -> Self {
        let mut parts = value.trim().split('x');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(w), Some(h), None) => Self {
                width: w.trim().parse().unwrap_or(0),
                height: h.trim().parse().unwrap_or(0),
            },
            _ => Self::default(),
        }
    }
}

impl Ord for Resolution {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width
            .cmp(&other.width)
            .then(self.height.cmp(&other.height))
    }
}

impl PartialOrd for Resolution {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One quality option of a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub uri: Url,
    pub resolution: Resolution,
    pub bandwidth: u64,
}

/// Parsed master playlist with variant URIs resolved against the document URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterPlaylist {
    pub url: Url,
    pub variants: Vec<Variant>,
}

impl MasterPlaylist {
    /// Parse a master playlist document fetched from `url`.
    ///
    /// A media playlist served in place of a master is accepted and exposed as
    /// a single variant pointing back at `url`.
    ///
    /// Variant attributes are read from the raw `#EXT-X-STREAM-INF` lines so a
    /// malformed `RESOLUTION` ranks as `0x0` instead of dropping the variant.
    pub fn parse(url: &Url, body: &[u8]) -> Result<Self, ClipError> {
        let playlist = parse_playlist_res(body).map_err(|e| {
            ClipError::playlist(format!("failed to parse master playlist {url}: {e}"))
        })?;

        let variants = match playlist {
            Playlist::MasterPlaylist(_) => {
                let text = String::from_utf8_lossy(body);
                stream_inf_entries(&text)
                    .into_iter()
                    .map(|entry| entry.into_variant(url))
                    .collect::<Result<Vec<_>, _>>()?
            }
            Playlist::MediaPlaylist(_) => {
                debug!(
                    %url,
                    "Source serves a media playlist directly, using it as the only variant"
                );
                vec![Variant {
                    uri: url.clone(),
                    resolution: Resolution::default(),
                    bandwidth: 0,
                }]
            }
        };

        Ok(Self {
            url: url.clone(),
            variants,
        })
    }

    pub fn best_variant(&self) -> Option<&Variant> {
        select_variant(&self.variants)
    }
}

/// A `#EXT-X-STREAM-INF` tag and the URI line that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamInf<'a> {
    attributes: &'a str,
    uri: &'a str,
}

impl StreamInf<'_> {
    fn into_variant(self, base: &Url) -> Result<Variant, ClipError> {
        Ok(Variant {
            uri: resolve_uri(base, self.uri)?,
            resolution: attribute(self.attributes, "RESOLUTION")
                .map(Resolution::parse_lenient)
                .unwrap_or_default(),
            bandwidth: attribute(self.attributes, "BANDWIDTH")
                .and_then(|b| b.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// Collect the stream variants of a master document in source order.
/// I-frame variants use a different tag and are never matched.
fn stream_inf_entries(body: &str) -> Vec<StreamInf<'_>> {
    let mut entries = Vec::new();
    let mut pending = None;
    for line in body.lines().map(str::trim) {
        if let Some(attributes) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending = Some(attributes);
        } else if line.is_empty() || line.starts_with('#') {
            continue;
        } else if let Some(attributes) = pending.take() {
            entries.push(StreamInf {
                attributes,
                uri: line,
            });
        }
    }
    entries
}

/// Look up `name` in an attribute list, with surrounding quotes removed.
fn attribute<'a>(list: &'a str, name: &str) -> Option<&'a str> {
    let mut quoted = false;
    let mut start = 0;
    let mut pairs = Vec::new();
    for (i, c) in list.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                pairs.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push(&list[start..]);

    pairs.into_iter().find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Order variants best first: width descending, then height descending.
/// The sort is stable, so equal resolutions keep their source order.
pub fn sort_variants_by_resolution(variants: &mut [Variant]) {
    variants.sort_by(|a, b| b.resolution.cmp(&a.resolution));
}

/// Pick the variant with the largest `(width, height)`.
///
/// Equal resolutions keep source order, so the earliest of several equal
/// candidates wins. Returns `None` for an empty list.
pub fn select_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().fold(None, |best, candidate| match best {
        Some(current) if current.resolution >= candidate.resolution => Some(current),
        _ => Some(candidate),
    })
}

/// A media segment reference. `index` is its position in the clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub index: usize,
    pub uri: Url,
}

/// A ready-to-fetch media playlist.
#[derive(Debug, Clone, Default)]
pub struct MediaPlaylistResolution {
    pub segments: Vec<SegmentRef>,
    /// Initialization segment (fMP4 `EXT-X-MAP`), already downloaded.
    pub init_segment: Option<Bytes>,
}

/// Parsed media playlist before the init segment is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPlaylistDocument {
    pub segments: Vec<SegmentRef>,
    pub init_segment_uri: Option<Url>,
}

impl MediaPlaylistDocument {
    pub fn parse(url: &Url, body: &[u8]) -> Result<Self, ClipError> {
        let playlist = match parse_playlist_res(body) {
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(ClipError::playlist(format!(
                    "expected media playlist at {url}, got master"
                )));
            }
            Err(e) => {
                return Err(ClipError::playlist(format!(
                    "failed to parse media playlist {url}: {e}"
                )));
            }
        };

        Self::from_playlist(url, &playlist)
    }

    fn from_playlist(url: &Url, playlist: &MediaPlaylist) -> Result<Self, ClipError> {
        let live_only = is_twitch_playlist(url)
            || playlist
                .segments
                .iter()
                .any(|s| s.title.as_deref() == Some(LIVE_SEGMENT_TITLE));

        let mut init_segment_uri = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for segment in &playlist.segments {
            if init_segment_uri.is_none()
                && let Some(map) = &segment.map
                && !map.uri.is_empty()
            {
                init_segment_uri = Some(resolve_uri(url, &map.uri)?);
            }

            if segment.uri.trim().is_empty() {
                continue;
            }
            if live_only && segment.title.as_deref() != Some(LIVE_SEGMENT_TITLE) {
                trace!(uri = %segment.uri, title = ?segment.title, "Skipping non-live segment");
                continue;
            }

            segments.push(SegmentRef {
                index: segments.len(),
                uri: resolve_uri(url, &segment.uri)?,
            });
        }

        if segments.is_empty() {
            return Err(ClipError::playlist(format!(
                "media playlist {url} contains no usable segments"
            )));
        }

        Ok(Self {
            segments,
            init_segment_uri,
        })
    }
}

#[inline]
fn is_twitch_playlist(url: &Url) -> bool {
    url.host_str().is_some_and(|h| h.ends_with("ttvnw.net"))
}

/// Resolve a playlist URI against the URL of the document that contains it.
pub(crate) fn resolve_uri(base: &Url, uri: &str) -> Result<Url, ClipError> {
    base.join(uri.trim())
        .map_err(|e| ClipError::invalid_url(uri, e))
}
