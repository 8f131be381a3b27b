use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;
use uuid::Uuid;
use yatube_core::forms::ValidImage;

const POST_IMAGE_DIR: &str = "posts";
const MAX_STEM_LEN: usize = 64;
pub const DEFAULT_UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

/// Filesystem storage for uploaded media.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    upload_limit: usize,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
        }
    }

    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Largest form body the upload routes read.
    pub fn upload_limit(&self) -> usize {
        self.upload_limit
    }

    /// Public URL of a media-root relative path.
    pub fn url(relative: &str) -> String {
        format!("/media/{relative}")
    }

    /// Writes a post image under `posts/` and returns its relative path.
    ///
    /// Existing files are never overwritten; a clashing name gets a random suffix.
    pub async fn save_post_image(&self, image: &ValidImage) -> Result<String, MediaError> {
        let dir = self.root.join(POST_IMAGE_DIR);
        fs::create_dir_all(&dir).await.map_err(MediaError::Io)?;

        let stem = sanitize_stem(&image.filename);
        let extension = image.extension();
        let mut name = format!("{stem}.{extension}");

        loop {
            let path = dir.join(&name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&image.bytes).await.map_err(MediaError::Io)?;
                    file.flush().await.map_err(MediaError::Io)?;
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let suffix = Uuid::new_v4().simple().to_string();
                    name = format!("{stem}_{}.{extension}", &suffix[..8]);
                }
                Err(err) => return Err(MediaError::Io(err)),
            }
        }

        let relative = format!("{POST_IMAGE_DIR}/{name}");
        info!(stage = "posts", path = %relative, bytes = image.bytes.len(), "stored post image");
        Ok(relative)
    }
}

/// Keeps ASCII letters, digits, `-` and `_` of the uploaded file's stem.
fn sanitize_stem(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(MAX_STEM_LEN)
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media storage i/o error: {0}")]
    Io(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use yatube_core::forms::ImageFormat;

    fn gif(filename: &str) -> ValidImage {
        ValidImage {
            filename: filename.to_string(),
            format: ImageFormat::Gif,
            bytes: b"GIF89a-test".to_vec(),
        }
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("small.gif"), "small");
        assert_eq!(sanitize_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_stem("C:\\photos\\my cat!.png"), "mycat");
        assert_eq!(sanitize_stem("тест.gif"), "image");
        assert_eq!(sanitize_stem(".hidden"), "hidden");
    }

    #[tokio::test]
    async fn saves_under_posts_without_overwriting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MediaStore::new(dir.path());

        let first = store.save_post_image(&gif("small.gif")).await.expect("save");
        assert_eq!(first, "posts/small.gif");

        let second = store.save_post_image(&gif("small.gif")).await.expect("save");
        assert_ne!(first, second);
        assert!(second.starts_with("posts/small_"));

        let stored = std::fs::read(dir.path().join(&first)).expect("read back");
        assert_eq!(stored, b"GIF89a-test");
        assert_eq!(MediaStore::url(&first), "/media/posts/small.gif");
    }
}
