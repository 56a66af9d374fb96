use crate::error::{Error, Result};
use mime_guess::MimeGuess;
use std::path::{Path, PathBuf};

/// Image content for upload or ad-hoc search, given either as a file on disk
/// or as bytes already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Request body produced from an [`ImageSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<&'static str>,
}

impl ImageSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    /// Load the image content. Files are read in full; a content type is
    /// attached when the extension identifies one.
    pub async fn resolve(self) -> Result<ImagePayload> {
        match self {
            ImageSource::Bytes(bytes) => Ok(ImagePayload {
                bytes,
                content_type: None,
            }),
            ImageSource::Path(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|source| Error::ImageRead {
                        path: path.clone(),
                        source,
                    })?;
                Ok(ImagePayload {
                    bytes,
                    content_type: guess_content_type(&path),
                })
            }
        }
    }
}

fn guess_content_type(path: &Path) -> Option<&'static str> {
    MimeGuess::from_path(path).first_raw()
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl From<&[u8]> for ImageSource {
    fn from(bytes: &[u8]) -> Self {
        ImageSource::Bytes(bytes.to_vec())
    }
}
