//! File records of the host content store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::media::MediaKind;

/// Identifier of a file record in the host store.
pub type FileId = i64;

/// Marker placed in the names of files produced by the transcoder.
pub const DERIVED_NAME_MARKER: &str = "_transcoded_";

/// Number of leading content-hash characters shared by an original and its derived file.
pub const LOCALITY_PREFIX_LEN: usize = 4;

/// Metadata of one stored file. The bytes live in the blob named by `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: FileId,
    pub content_hash: String,
    pub context_id: i64,
    /// Component owning the file (e.g. `mod_page`).
    pub component: String,
    /// Storage area inside the component.
    pub file_area: String,
    pub item_id: i64,
    pub file_path: String,
    pub filename: String,
    pub mimetype: Option<String>,
    pub size: u64,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

impl StoredFile {
    /// Media kind of the file, if it is convertible.
    pub fn media_kind(&self) -> Option<MediaKind> {
        self.mimetype.as_deref().and_then(MediaKind::from_mimetype)
    }

    /// Whether the file was produced by the transcoder.
    pub fn is_derived(&self) -> bool {
        self.filename.contains(DERIVED_NAME_MARKER)
    }
}

/// A file record about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub content_hash: String,
    pub context_id: i64,
    pub component: String,
    pub file_area: String,
    pub item_id: i64,
    pub file_path: String,
    pub filename: String,
    pub mimetype: Option<String>,
    pub size: u64,
}

impl NewFile {
    /// Record for the converted output of `original`.
    ///
    /// The new file lives in the same context, component, area and item as the
    /// original, so it can be referenced from the same documents.
    pub fn derived_from(
        original: &StoredFile,
        kind: MediaKind,
        content_hash: String,
        size: u64,
        stamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content_hash,
            context_id: original.context_id,
            component: original.component.clone(),
            file_area: original.file_area.clone(),
            item_id: original.item_id,
            file_path: original.file_path.clone(),
            filename: derived_filename(&original.filename, kind, stamp),
            mimetype: Some(kind.output_mimetype().to_string()),
            size,
        }
    }

    /// Hash identifying the record's location, unique in the host store.
    pub fn path_hash(&self) -> String {
        let path = format!(
            "/{}/{}/{}/{}{}{}",
            self.context_id,
            self.component,
            self.file_area,
            self.item_id,
            self.file_path,
            self.filename
        );
        hex_digest(path.as_bytes())
    }
}

/// `<stem>_transcoded_<YYYYmmddHHMMSS>.<ext>`.
pub fn derived_filename(original: &str, kind: MediaKind, stamp: DateTime<Utc>) -> String {
    let stem = match original.rfind('.') {
        Some(idx) if idx > 0 => &original[..idx],
        _ => original,
    };
    format!(
        "{}{}{}.{}",
        stem,
        DERIVED_NAME_MARKER,
        stamp.format("%Y%m%d%H%M%S"),
        kind.output_extension()
    )
}

/// Content hash for a derived blob.
///
/// Keeps the original's first characters so both blobs share a directory.
pub fn derived_content_hash(original_hash: &str, output_digest: &str) -> String {
    let prefix: String = original_hash.chars().take(LOCALITY_PREFIX_LEN).collect();
    let rest: String = output_digest.chars().skip(prefix.chars().count()).collect();
    format!("{}{}", prefix, rest)
}

/// Lowercase hex SHA-256.
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Filter for files that discovery may queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Only files modified strictly after this instant.
    pub modified_after: DateTime<Utc>,
    /// Components to look in. Empty matches nothing.
    pub components: Vec<String>,
    /// Accepted mimetypes. Empty matches nothing.
    pub mimetypes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn original() -> StoredFile {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        StoredFile {
            id: 10,
            content_hash: "ab12ffffffffffffffffffffffffffffffffffff".to_string(),
            context_id: 33,
            component: "mod_page".to_string(),
            file_area: "content".to_string(),
            item_id: 0,
            file_path: "/".to_string(),
            filename: "lecture.one.webm".to_string(),
            mimetype: Some("video/webm".to_string()),
            size: 2048,
            time_created: at,
            time_modified: at,
        }
    }

    #[test]
    fn test_derived_filename() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            derived_filename("lecture.one.webm", MediaKind::Video, stamp),
            "lecture.one_transcoded_20240301090507.mp4"
        );
        assert_eq!(
            derived_filename("noext", MediaKind::Audio, stamp),
            "noext_transcoded_20240301090507.mp3"
        );
    }

    #[test]
    fn test_derived_content_hash_keeps_prefix() {
        let digest = hex_digest(b"output bytes");
        let hash = derived_content_hash("ab12cdef", &digest);
        assert_eq!(hash.len(), digest.len());
        assert!(hash.starts_with("ab12"));
        assert_eq!(&hash[4..], &digest[4..]);
    }

    #[test]
    fn test_new_file_derived_from_original() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let new = NewFile::derived_from(&original(), MediaKind::Video, "ab12aa".into(), 99, stamp);

        assert_eq!(new.context_id, 33);
        assert_eq!(new.component, "mod_page");
        assert_eq!(new.file_area, "content");
        assert_eq!(new.mimetype.as_deref(), Some("video/mp4"));
        assert!(new.filename.contains(DERIVED_NAME_MARKER));
        assert_eq!(new.path_hash().len(), 64);
    }

    #[test]
    fn test_media_kind_and_derived_flag() {
        let mut file = original();
        assert_eq!(file.media_kind(), Some(MediaKind::Video));
        assert!(!file.is_derived());

        file.mimetype = None;
        assert_eq!(file.media_kind(), None);
        file.filename = "x_transcoded_20240101000000.mp4".to_string();
        assert!(file.is_derived());
    }
}
