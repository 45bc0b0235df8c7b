//! Loading of `<link>` and externally supplied stylesheets.

use crate::error::InlinerError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Fetches stylesheet text from an absolute http(s) URL.
pub trait UrlFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, InlinerError>;
}

#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: std::time::Duration,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }
}

#[cfg(feature = "http")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(30))
    }
}

#[cfg(feature = "http")]
impl UrlFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, InlinerError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent: ureq::Agent = config.into();
        let mut response = agent
            .get(url)
            .call()
            .map_err(|err| InlinerError::external(url, err))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| InlinerError::external(url, err))
    }
}

/// Used when the `http` feature is off or network access is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl UrlFetcher for OfflineFetcher {
    fn fetch(&self, url: &str) -> Result<String, InlinerError> {
        Err(InlinerError::external(url, "network access is disabled"))
    }
}

pub fn default_fetcher() -> Arc<dyn UrlFetcher> {
    #[cfg(feature = "http")]
    {
        Arc::new(HttpFetcher::default())
    }
    #[cfg(not(feature = "http"))]
    {
        Arc::new(OfflineFetcher)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StylesheetOrigin {
    File(PathBuf),
    Url(String),
}

impl StylesheetOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            StylesheetOrigin::File(_) => "file",
            StylesheetOrigin::Url(_) => "url",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedStylesheet {
    pub location: String,
    pub origin: StylesheetOrigin,
    pub text: String,
}

pub struct StylesheetLoader {
    base_url: Option<Url>,
    base_path: Option<PathBuf>,
    allow_network: bool,
    fetcher: Arc<dyn UrlFetcher>,
}

impl StylesheetLoader {
    pub fn new(
        base_url: Option<Url>,
        base_path: Option<PathBuf>,
        allow_network: bool,
        fetcher: Arc<dyn UrlFetcher>,
    ) -> Self {
        Self {
            base_url,
            base_path,
            allow_network,
            fetcher,
        }
    }

    fn is_https_base(&self) -> bool {
        self.base_url
            .as_ref()
            .is_some_and(|base| base.scheme() == "https")
    }

    fn fetch_url(&self, url: &str) -> Result<LoadedStylesheet, InlinerError> {
        if !self.allow_network {
            return Err(InlinerError::external(url, "network access is disabled"));
        }
        let text = self.fetcher.fetch(url)?;
        Ok(LoadedStylesheet {
            location: url.to_string(),
            origin: StylesheetOrigin::Url(url.to_string()),
            text,
        })
    }

    fn local_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.base_path {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Loads `location`: protocol-relative and http(s) URLs are fetched, anything else is read
    /// from disk relative to `base_path`, falling back to `base_url` when the file is missing.
    pub fn load(&self, location: &str) -> Result<LoadedStylesheet, InlinerError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(InlinerError::external(location, "empty stylesheet location"));
        }
        if let Some(rest) = location.strip_prefix("//") {
            let scheme = if self.is_https_base() { "https" } else { "http" };
            return self.fetch_url(&format!("{scheme}://{rest}"));
        }
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return self.fetch_url(location);
        }

        let path = self.local_path(location);
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .map_err(|err| InlinerError::external(path.display().to_string(), err))?;
            return Ok(LoadedStylesheet {
                location: location.to_string(),
                origin: StylesheetOrigin::File(path),
                text,
            });
        }
        if let Some(base) = &self.base_url {
            let joined = base
                .join(location)
                .map_err(|err| InlinerError::external(location, err))?;
            if matches!(joined.scheme(), "http" | "https") {
                return self.fetch_url(joined.as_str());
            }
        }
        Err(InlinerError::external(
            path.display().to_string(),
            "file not found",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFetcher {
        seen: Mutex<Vec<String>>,
    }

    impl UrlFetcher for RecordingFetcher {
        fn fetch(&self, url: &str) -> Result<String, InlinerError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(url.to_string());
            }
            Ok("h1 { color: red }".to_string())
        }
    }

    fn loader(
        base_url: Option<&str>,
        base_path: Option<&Path>,
        fetcher: Arc<RecordingFetcher>,
    ) -> StylesheetLoader {
        StylesheetLoader::new(
            base_url.map(|raw| Url::parse(raw).expect("test base url")),
            base_path.map(Path::to_path_buf),
            true,
            fetcher,
        )
    }

    #[test]
    fn reads_files_relative_to_base_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("style.css"), "p { margin: 0 }").expect("write css");
        let loaded = loader(None, Some(dir.path()), Arc::new(RecordingFetcher::default()))
            .load("style.css")
            .expect("load");
        assert_eq!(loaded.text, "p { margin: 0 }");
        assert_eq!(loaded.origin.as_str(), "file");
    }

    #[test]
    fn missing_file_is_an_external_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = loader(None, Some(dir.path()), Arc::new(RecordingFetcher::default()))
            .load("missing.css")
            .expect_err("missing file");
        assert!(err.is_external(), "{err}");
        assert!(err.to_string().contains("missing.css"), "{err}");
    }

    #[test]
    fn protocol_relative_follows_base_scheme() {
        let fetcher = Arc::new(RecordingFetcher::default());
        loader(Some("https://example.com/"), None, Arc::clone(&fetcher))
            .load("//cdn.example.com/a.css")
            .expect("https fetch");
        loader(None, None, Arc::clone(&fetcher))
            .load("//cdn.example.com/b.css")
            .expect("http fetch");
        let seen = fetcher.seen.lock().expect("seen").clone();
        assert_eq!(
            seen,
            vec![
                "https://cdn.example.com/a.css".to_string(),
                "http://cdn.example.com/b.css".to_string(),
            ]
        );
    }

    #[test]
    fn missing_file_falls_back_to_base_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(RecordingFetcher::default());
        let loaded = loader(
            Some("http://example.com/mail/"),
            Some(dir.path()),
            Arc::clone(&fetcher),
        )
        .load("css/base.css")
        .expect("fallback fetch");
        assert_eq!(
            loaded.origin,
            StylesheetOrigin::Url("http://example.com/mail/css/base.css".to_string())
        );
    }

    #[test]
    fn network_can_be_disabled() {
        let loader = StylesheetLoader::new(
            None,
            None,
            false,
            Arc::new(RecordingFetcher::default()),
        );
        let err = loader.load("https://example.com/a.css").expect_err("offline");
        assert!(err.to_string().contains("network access is disabled"), "{err}");
        let offline = OfflineFetcher.fetch("https://example.com/a.css").expect_err("offline");
        assert!(offline.is_external());
    }
}
