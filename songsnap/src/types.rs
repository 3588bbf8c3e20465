use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Artwork references for a recognised track. Each one is either a URL from
/// the service or the configured placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackImages {
    pub background: String,
    pub cover_art: String,
    pub cover_art_hq: String,
}

/// A recognised track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackResult {
    pub title: String,
    pub artist: String,
    /// Best effort: see [`map_response`].
    pub album: Option<String>,
    pub images: TrackImages,
    pub metapage_images: Vec<String>,
}

impl TrackResult {
    /// Human-readable summary, one `Key: value` per line.
    pub fn text(&self) -> String {
        let mut out = format!("Title: {}\nArtist: {}\n", self.title, self.artist);
        out.push_str(&format!(
            "Album: {}\n",
            self.album.as_deref().unwrap_or("(unknown)")
        ));
        out.push_str(&format!("Cover art: {}\n", self.images.cover_art));
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// Subset of the detect response we read. Everything is optional and lists may
// contain nulls: the schema is undocumented and varies between tracks.

#[derive(Deserialize)]
struct DetectResponse {
    track: Option<RawTrack>,
}

#[derive(Deserialize)]
struct RawTrack {
    title: Option<String>,
    subtitle: Option<String>,
    sections: Option<Vec<Option<RawSection>>>,
    images: Option<RawImages>,
}

#[derive(Deserialize)]
struct RawSection {
    #[serde(rename = "type")]
    kind: Option<String>,
    metadata: Option<Vec<Option<RawMetadata>>>,
    metapages: Option<Vec<Option<RawMetapage>>>,
}

#[derive(Deserialize)]
struct RawMetadata {
    text: Option<String>,
}

#[derive(Deserialize)]
struct RawMetapage {
    image: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawImages {
    background: Option<String>,
    coverart: Option<String>,
    coverarthq: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).cloned()
}

/// Map a detect response body to a [`TrackResult`].
///
/// A missing track, or a track without a non-empty title and subtitle
/// (artist), is [`Error::NotFound`], never a half-filled result.
///
/// The album is read from the first entry of the first section that carries
/// metadata. The service documents no such contract, so this is a heuristic:
/// it matches what the service sends for most songs today and may come back
/// empty or wrong for others.
pub fn map_response(body: &str, placeholder: &str) -> Result<TrackResult> {
    let response: DetectResponse = serde_json::from_str(body)?;
    let track = response.track.ok_or(Error::NotFound)?;

    let title = non_empty(track.title.as_ref()).ok_or(Error::NotFound)?;
    let artist = non_empty(track.subtitle.as_ref()).ok_or(Error::NotFound)?;

    let sections: Vec<RawSection> = track
        .sections
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect();

    let album = sections
        .iter()
        .find_map(|s| s.metadata.as_deref().and_then(|m| m.first()))
        .and_then(|entry| entry.as_ref())
        .and_then(|entry| non_empty(entry.text.as_ref()));

    let raw_images = track.images.unwrap_or_default();
    let image_or_placeholder =
        |v: &Option<String>| non_empty(v.as_ref()).unwrap_or_else(|| placeholder.to_string());
    let images = TrackImages {
        background: image_or_placeholder(&raw_images.background),
        cover_art: image_or_placeholder(&raw_images.coverart),
        cover_art_hq: image_or_placeholder(&raw_images.coverarthq),
    };

    let metapage_images = sections
        .iter()
        .find(|s| s.kind.as_deref() == Some("SONG"))
        .and_then(|s| s.metapages.as_ref())
        .map(|pages| {
            pages
                .iter()
                .flatten()
                .filter_map(|page| non_empty(page.image.as_ref()))
                .collect()
        })
        .unwrap_or_default();

    Ok(TrackResult {
        title,
        artist,
        album,
        images,
        metapage_images,
    })
}
