//! Upload path parsing.

use std::path::PathBuf;

use crate::StorageError;

/// Where a file lives, decided by the URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `file://` URL or bare filesystem path.
    Local(PathBuf),
    /// `http://` or `https://` URL, fetched as-is (signed URLs included).
    Http(String),
    /// `s3://bucket/key`.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
}

impl Location {
    /// Parses an upload path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUrl`] for blank paths, unknown
    /// schemes, and `s3://` URLs without a key.
    pub fn parse(url: &str) -> Result<Self, StorageError> {
        let url = url.trim();
        let unsupported = || StorageError::UnsupportedUrl {
            url: url.to_string(),
        };

        if url.is_empty() {
            return Err(unsupported());
        }

        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').ok_or_else(unsupported)?;
            if bucket.is_empty() || key.is_empty() {
                return Err(unsupported());
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self::Http(url.to_string()));
        }

        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if url.contains("://") {
            return Err(unsupported());
        }

        Ok(Self::Local(PathBuf::from(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_scheme() {
        assert_eq!(
            Location::parse("s3://tdei/osw/2024/upload.zip").unwrap(),
            Location::S3 {
                bucket: "tdei".to_string(),
                key: "osw/2024/upload.zip".to_string(),
            }
        );
        assert_eq!(
            Location::parse("https://acct.blob.core.windows.net/c/x.zip?sig=abc").unwrap(),
            Location::Http("https://acct.blob.core.windows.net/c/x.zip?sig=abc".to_string())
        );
        assert_eq!(
            Location::parse("file:///tmp/x.zip").unwrap(),
            Location::Local(PathBuf::from("/tmp/x.zip"))
        );
        assert_eq!(
            Location::parse("data/x.zip").unwrap(),
            Location::Local(PathBuf::from("data/x.zip"))
        );
    }

    #[test]
    fn rejects_unusable_paths() {
        for url in ["", "   ", "s3://bucket", "s3://bucket/", "ftp://host/x.zip"] {
            assert!(
                matches!(Location::parse(url), Err(StorageError::UnsupportedUrl { .. })),
                "{url:?}"
            );
        }
    }
}
