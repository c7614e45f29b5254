//! Media resolution
//!
//! Stored image references are bare file names. Platforms that fetch media
//! themselves get a public URL; platforms that need the bytes uploaded get a
//! [`TempMedia`] downloaded from that URL.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::MediaConfig;
use crate::error::PlatformError;
use crate::http::{encode_component, HttpClient, HttpRequest};
use crate::types::ImageMimeType;

#[derive(Debug, Clone)]
pub struct MediaResolver {
    public_host: String,
    scratch_dir: PathBuf,
}

impl MediaResolver {
    pub fn new(public_host: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        let public_host: String = public_host.into();
        Self {
            public_host: public_host.trim_end_matches('/').to_string(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.public_host.clone(),
            shellexpand::tilde(&config.scratch_dir).to_string(),
        )
    }

    /// `{host}/api/files/posts/{post_id}/{image_ref}`
    pub fn public_url(&self, post_id: &str, image_ref: &str) -> String {
        format!(
            "{}/api/files/posts/{}/{}",
            self.public_host,
            encode_component(post_id),
            encode_component(image_ref)
        )
    }

    pub fn public_urls(&self, post_id: &str, image_refs: &[String]) -> Vec<String> {
        image_refs
            .iter()
            .map(|image_ref| self.public_url(post_id, image_ref))
            .collect()
    }

    /// Download the public copy of an image into the scratch directory.
    pub async fn fetch(
        &self,
        http: &dyn HttpClient,
        post_id: &str,
        image_ref: &str,
    ) -> Result<TempMedia, PlatformError> {
        let url = self.public_url(post_id, image_ref);
        self.download(http, &url).await
    }

    /// GET `url` and write the body to a fresh temp file.
    ///
    /// The file is named with a random component and the source extension,
    /// and is removed when the returned [`TempMedia`] is dropped. A 4xx from
    /// the file host is a missing image and fails as `Validation`; only a
    /// 5xx is reported as `Network`.
    pub async fn download(
        &self,
        http: &dyn HttpClient,
        url: &str,
    ) -> Result<TempMedia, PlatformError> {
        let response = http.execute(HttpRequest::get(url)).await?;

        match response.status {
            200..=299 => {}
            400..=499 => {
                return Err(PlatformError::Validation(format!(
                    "image {} not found (HTTP {})",
                    url, response.status
                )))
            }
            status => {
                return Err(PlatformError::Network(format!(
                    "downloading {} returned HTTP {}",
                    url, status
                )))
            }
        }
        if response.body.is_empty() {
            return Err(PlatformError::UnexpectedResponse(format!(
                "downloading {} returned an empty body",
                url
            )));
        }

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| scratch_error(&self.scratch_dir, e))?;

        let extension = file_extension(url);
        let suffix = extension
            .as_deref()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let mut file = tempfile::Builder::new()
            .prefix("clock-")
            .suffix(&suffix)
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| scratch_error(&self.scratch_dir, e))?;

        file.write_all(&response.body)
            .and_then(|_| file.flush())
            .map_err(|e| scratch_error(&self.scratch_dir, e))?;

        tracing::debug!(
            url = %url,
            path = %file.path().display(),
            bytes = response.body.len(),
            "Downloaded media"
        );

        Ok(TempMedia {
            file,
            mime: extension.as_deref().and_then(ImageMimeType::from_extension),
        })
    }
}

fn scratch_error(dir: &Path, error: std::io::Error) -> PlatformError {
    PlatformError::Validation(format!(
        "cannot stage media in {}: {}",
        dir.display(),
        error
    ))
}

/// A downloaded image, deleted from disk when dropped.
#[derive(Debug)]
pub struct TempMedia {
    file: NamedTempFile,
    mime: Option<ImageMimeType>,
}

impl TempMedia {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    }

    pub fn mime(&self) -> Option<ImageMimeType> {
        self.mime
    }

    pub fn content_type(&self) -> &'static str {
        self.mime
            .map(|m| m.as_str())
            .unwrap_or("application/octet-stream")
    }

    pub async fn read(&self) -> Result<Vec<u8>, PlatformError> {
        tokio::fs::read(self.path()).await.map_err(|e| {
            PlatformError::Validation(format!(
                "cannot read staged media {}: {}",
                self.path().display(),
                e
            ))
        })
    }
}

/// Extension of the last path segment, ignoring query and fragment.
pub fn file_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
