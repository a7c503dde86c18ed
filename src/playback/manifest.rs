//! HLS playlist parsing
//!
//! Only what the engine needs to pick a rendition and know its length:
//! `#EXT-X-STREAM-INF` variants of a multivariant playlist and the `#EXTINF`
//! durations of a media playlist.

use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("playlist does not start with #EXTM3U")]
    MissingHeader,
    #[error("multivariant playlist lists no variant")]
    NoVariants,
    #[error("variant is missing its mandatory BANDWIDTH attribute")]
    MissingBandwidth,
    #[error("#EXT-X-STREAM-INF is not followed by a URI")]
    MissingUri,
    #[error("invalid variant URI {0:?}")]
    InvalidUri(String),
    #[error("invalid #EXTINF duration {0:?}")]
    InvalidDuration(String),
}

/// One quality rendition of the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Peak bits per second
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
    pub codecs: Option<String>,
    /// Absolute URL of the media playlist
    pub url: Url,
}

/// Parse a multivariant playlist, resolving variant URIs against `base`.
///
/// A media playlist given in place of a multivariant one is treated as a
/// single variant pointing at `base`.
pub fn parse_multivariant(text: &str, base: &Url) -> Result<Vec<Variant>, ManifestError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(ManifestError::MissingHeader);
    }

    let mut variants = Vec::new();
    let mut is_media_playlist = false;

    while let Some(line) = lines.next() {
        if let Some(attributes) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let mut bandwidth = None;
            let mut resolution = None;
            let mut codecs = None;

            for (key, value) in parse_attribute_list(attributes) {
                match key {
                    "BANDWIDTH" => bandwidth = value.parse::<u64>().ok(),
                    "RESOLUTION" => resolution = parse_resolution(value),
                    "CODECS" => codecs = Some(value.to_string()),
                    _ => {}
                }
            }

            let uri = lines
                .by_ref()
                .find(|l| !l.starts_with('#'))
                .ok_or(ManifestError::MissingUri)?;
            let url = base
                .join(uri)
                .map_err(|_| ManifestError::InvalidUri(uri.to_string()))?;

            variants.push(Variant {
                bandwidth: bandwidth.ok_or(ManifestError::MissingBandwidth)?,
                resolution,
                codecs,
                url,
            });
        } else if line.starts_with("#EXTINF:") || line.starts_with("#EXT-X-TARGETDURATION:") {
            is_media_playlist = true;
        }
    }

    if variants.is_empty() {
        if is_media_playlist {
            return Ok(vec![Variant {
                bandwidth: 0,
                resolution: None,
                codecs: None,
                url: base.clone(),
            }]);
        }
        return Err(ManifestError::NoVariants);
    }

    Ok(variants)
}

/// Total duration in seconds of a media playlist
pub fn parse_media_duration(text: &str) -> Result<f64, ManifestError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(ManifestError::MissingHeader);
    }

    let mut total = 0.0;
    for line in lines {
        let Some(value) = line.strip_prefix("#EXTINF:") else {
            continue;
        };
        // #EXTINF:<duration>,[<title>]
        let raw = value.split(',').next().unwrap_or_default().trim();
        let duration: f64 = raw
            .parse()
            .map_err(|_| ManifestError::InvalidDuration(raw.to_string()))?;
        if !duration.is_finite() || duration < 0.0 {
            return Err(ManifestError::InvalidDuration(raw.to_string()));
        }
        total += duration;
    }

    Ok(total)
}

/// Split an attribute list on commas outside quoted strings.
/// Quotes around values are removed.
fn parse_attribute_list(list: &str) -> Vec<(&str, &str)> {
    let mut attributes = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (idx, ch) in list.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push_attribute(&list[start..idx], &mut attributes);
                start = idx + 1;
            }
            _ => {}
        }
    }
    push_attribute(&list[start..], &mut attributes);

    attributes
}

fn push_attribute<'a>(raw: &'a str, out: &mut Vec<(&'a str, &'a str)>) {
    if let Some((key, value)) = raw.split_once('=') {
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        out.push((key.trim(), value));
    }
}

fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}
