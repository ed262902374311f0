//! File metadata snapshots.
//!
//! [`RemoteFile`] is an immutable snapshot of what the server reported about
//! one file inside an item at fetch time. It is never mutated afterwards;
//! re-fetching the item is the only way to observe newer state.

use serde::Deserialize;
use serde_json::Value;

/// Raw per-file metadata as the metadata API reports it.
///
/// Numeric fields arrive as either numbers or decimal strings depending on
/// the item's age, so both are accepted. Keys this client does not model are
/// preserved in `extra` rather than dropped.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileMetadata {
    /// File name, possibly with directory segments.
    #[serde(default)]
    pub name: String,
    /// Size in bytes.
    #[serde(default, deserialize_with = "de_lenient_u64")]
    pub size: Option<u64>,
    /// MD5 hex digest.
    #[serde(default)]
    pub md5: Option<String>,
    /// SHA-1 hex digest.
    #[serde(default)]
    pub sha1: Option<String>,
    /// CRC32 checksum.
    #[serde(default)]
    pub crc32: Option<String>,
    /// Modification time, seconds since the epoch.
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub mtime: Option<f64>,
    /// Producer tag (`original`, `derivative`, `metadata`).
    #[serde(default)]
    pub source: Option<String>,
    /// Format tag (`Text`, `JPEG`, ...).
    #[serde(default)]
    pub format: Option<String>,
    /// Marks an on-the-fly derived file not stored server-side.
    #[serde(default)]
    pub otf: bool,
    /// Unrecognized metadata keys, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Immutable descriptor of one remote file.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Identifier of the owning item.
    pub identifier: String,
    /// Normalized name: no leading or trailing slashes, never empty.
    pub name: String,
    /// Size in bytes as reported by the server.
    pub size: u64,
    /// MD5 hex digest, when reported.
    pub md5: Option<String>,
    /// SHA-1 hex digest, when reported.
    pub sha1: Option<String>,
    /// CRC32 checksum, when reported.
    pub crc32: Option<String>,
    /// Modification time, seconds since the epoch (0 when unreported).
    pub mtime: f64,
    /// Producer tag.
    pub source: Option<String>,
    /// Format tag.
    pub format: Option<String>,
    /// Whether the server actually lists this file.
    pub exists: bool,
    /// Unrecognized metadata keys.
    pub extra: serde_json::Map<String, Value>,
}

impl RemoteFile {
    /// Builds a descriptor from item context and optional file metadata.
    ///
    /// When `metadata` is absent, the file is looked up by normalized name
    /// in `known_files`; a miss produces a descriptor with `exists == false`
    /// so callers can still construct URLs for speculative names.
    ///
    /// Returns `None` when the name normalizes to the empty string.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        name: &str,
        metadata: Option<&FileMetadata>,
        known_files: &[FileMetadata],
    ) -> Option<Self> {
        let name = normalize_name(name)?;

        let metadata = metadata.or_else(|| {
            known_files
                .iter()
                .find(|f| normalize_name(&f.name).as_deref() == Some(name.as_str()))
        });

        let exists = metadata.is_some();
        let metadata = metadata.cloned().unwrap_or_default();

        Some(Self {
            identifier: identifier.into(),
            name,
            size: metadata.size.unwrap_or(0),
            md5: metadata.md5,
            sha1: metadata.sha1,
            crc32: metadata.crc32,
            mtime: metadata.mtime.unwrap_or(0.0),
            source: metadata.source,
            format: metadata.format,
            exists,
            extra: metadata.extra,
        })
    }
}

/// Strips leading/trailing slashes; `None` when nothing remains.
fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn de_lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_files() -> Vec<FileMetadata> {
        serde_json::from_value(serde_json::json!([
            {
                "name": "nasa_meta.xml",
                "size": "7683",
                "md5": "0cf9e9dcf108b67cbf6f0fb6e5b57ae6",
                "mtime": "1354474557",
                "source": "metadata",
                "format": "Metadata"
            },
            {
                "name": "globe_west_540.jpg",
                "size": 66065,
                "source": "original",
                "format": "JPEG",
                "rotation": "0"
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_string_encoded_numbers_are_parsed() {
        let files = sample_files();
        assert_eq!(files[0].size, Some(7683));
        assert_eq!(files[0].mtime, Some(1_354_474_557.0));
        assert_eq!(files[1].size, Some(66065));
    }

    #[test]
    fn test_unknown_keys_land_in_extra() {
        let files = sample_files();
        assert_eq!(
            files[1].extra.get("rotation").and_then(Value::as_str),
            Some("0")
        );
    }

    #[test]
    fn test_name_is_normalized() {
        let files = sample_files();
        let file = RemoteFile::new("nasa", "/nasa_meta.xml/", None, &files).unwrap();
        assert_eq!(file.name, "nasa_meta.xml");
        assert!(file.exists);
        assert_eq!(file.size, 7683);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(RemoteFile::new("nasa", "///", None, &[]).is_none());
    }

    #[test]
    fn test_unknown_name_yields_nonexistent_descriptor() {
        let file = RemoteFile::new("nasa", "missing.txt", None, &sample_files()).unwrap();
        assert!(!file.exists);
        assert_eq!(file.size, 0);
        assert_eq!(file.md5, None);
    }
}
