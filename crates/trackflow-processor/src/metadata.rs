//! ID3 metadata extraction

use std::io::Cursor;

use id3::{Tag, TagLike};
use serde::{Deserialize, Serialize};

use trackflow_common::{FlowError, Result};

/// Placeholder for tag fields the file does not carry.
pub const UNKNOWN: &str = "Unknown";

/// Metadata pushed to the song catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: i64,
    pub name: String,
    pub artist: String,
    pub album: String,
    /// `m:ss`, "0:00" when the file carries no length frame.
    pub duration: String,
    pub year: String,
}

/// Render a TLEN millisecond count as `m:ss`.
fn format_duration(millis: Option<u32>) -> String {
    let total_secs = millis.unwrap_or(0) / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Extract track metadata from an ID3-tagged payload.
///
/// The caller fills in `id` afterwards; the tag knows nothing about record
/// ids. Missing text frames fall back to [`UNKNOWN`] rather than failing,
/// but an unparseable tag is a hard error.
pub fn extract(data: &[u8]) -> Result<TrackMetadata> {
    let tag = Tag::read_from2(Cursor::new(data))
        .map_err(|e| FlowError::Validation(format!("unreadable ID3 tag: {e}")))?;

    Ok(TrackMetadata {
        id: 0,
        name: tag.title().map(str::to_string).unwrap_or_else(|| UNKNOWN.to_string()),
        artist: tag.artist().map(str::to_string).unwrap_or_else(|| UNKNOWN.to_string()),
        album: tag.album().map(str::to_string).unwrap_or_else(|| UNKNOWN.to_string()),
        duration: format_duration(tag.duration()),
        year: tag
            .year()
            .map(|y| y.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use id3::Version;

    fn tagged(build: impl FnOnce(&mut Tag)) -> Vec<u8> {
        let mut tag = Tag::new();
        build(&mut tag);
        let mut buffer = Cursor::new(Vec::new());
        tag.write_to(&mut buffer, Version::Id3v24).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn extracts_all_frames() {
        let data = tagged(|tag| {
            tag.set_title("Take Five");
            tag.set_artist("Dave Brubeck");
            tag.set_album("Time Out");
            tag.set_duration(205_000);
            tag.set_year(1959);
        });

        let metadata = extract(&data).unwrap();
        assert_eq!(metadata.name, "Take Five");
        assert_eq!(metadata.artist, "Dave Brubeck");
        assert_eq!(metadata.album, "Time Out");
        assert_eq!(metadata.duration, "3:25");
        assert_eq!(metadata.year, "1959");
    }

    #[test]
    fn missing_frames_fall_back_to_unknown() {
        let data = tagged(|tag| {
            tag.set_title("Untitled");
        });

        let metadata = extract(&data).unwrap();
        assert_eq!(metadata.artist, UNKNOWN);
        assert_eq!(metadata.album, UNKNOWN);
        assert_eq!(metadata.year, UNKNOWN);
        assert_eq!(metadata.duration, "0:00");
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let err = extract(b"not a tag at all").unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(None), "0:00");
        assert_eq!(format_duration(Some(59_999)), "0:59");
        assert_eq!(format_duration(Some(60_000)), "1:00");
        assert_eq!(format_duration(Some(3_725_000)), "62:05");
    }
}
