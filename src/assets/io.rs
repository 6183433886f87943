//! Blob Fetching
//!
//! Assets arrive either from a URL (via ehttp) or from a local file path.
//! The source kind is inferred from the id's scheme.

use crate::errors::{CathodeError, Result};

/// Where a blob comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Url(String),
    Path(String),
}

impl AssetSource {
    /// Classifies an asset id: anything with an http(s) scheme is a URL.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if id.starts_with("http://") || id.starts_with("https://") {
            AssetSource::Url(id.to_string())
        } else {
            AssetSource::Path(id.to_string())
        }
    }
}

/// Fetches the raw bytes behind a source.
pub async fn fetch_blob(source: &AssetSource) -> Result<Vec<u8>> {
    match source {
        AssetSource::Url(url) => {
            // Validate early so a malformed id fails typed, not inside ehttp.
            let _ = url::Url::parse(url)?;
            let request = ehttp::Request::get(url);
            let response = ehttp::fetch_async(request)
                .await
                .map_err(CathodeError::HttpError)?;
            if !response.ok {
                return Err(CathodeError::HttpError(format!(
                    "status {} for {url}",
                    response.status
                )));
            }
            Ok(response.bytes)
        }
        AssetSource::Path(path) => Ok(std::fs::read(path)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_classification() {
        assert_eq!(
            AssetSource::from_id("https://example.com/a.png"),
            AssetSource::Url("https://example.com/a.png".into())
        );
        assert_eq!(
            AssetSource::from_id("models/ship.obj"),
            AssetSource::Path("models/ship.obj".into())
        );
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let result = fetch_blob(&AssetSource::Path("definitely/not/here.bin".into())).await;
        assert!(matches!(result, Err(CathodeError::IoError(_))));
    }
}
