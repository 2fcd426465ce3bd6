use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    constants::{IMAGE_EXTENSIONS, MEDIA_URL, RECIPE_IMAGE_DIR},
    error::Error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Parses `data:image/<ext>;base64,<payload>`.
pub fn decode_data_uri(uri: &str) -> Result<DecodedImage, String> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| String::from("Image must be a base64 data URI"))?;

    let mime = header
        .strip_prefix("data:")
        .and_then(|h| h.strip_suffix(";base64"))
        .ok_or_else(|| String::from("Image must be a base64 data URI"))?;

    let extension = mime
        .strip_prefix("image/")
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| format!("Unsupported image type {mime}"))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("Invalid image data: {e}"))?;
    if bytes.is_empty() {
        return Err(String::from("Image is empty"));
    }

    Ok(DecodedImage { extension, bytes })
}

/// Recipe images on local disk, served under [`MEDIA_URL`].
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Writes the image under a fresh name and returns its path relative to the root.
    pub async fn save(&self, image: &DecodedImage) -> Result<String, Error> {
        let dir = self.root.join(RECIPE_IMAGE_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("Could not create media directory: {e}")))?;

        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), image.extension);
        tokio::fs::write(dir.join(&file_name), &image.bytes)
            .await
            .map_err(|e| Error::Internal(format!("Could not store image: {e}")))?;

        Ok(format!("{RECIPE_IMAGE_DIR}/{file_name}"))
    }

    /// Best effort; a missing file is only logged.
    pub async fn remove(&self, relative: &str) {
        if let Err(e) = tokio::fs::remove_file(self.root.join(relative)).await {
            log::warn!("Could not remove image {relative}: {e}");
        }
    }
}

pub fn media_url(relative: &str) -> String {
    format!("{MEDIA_URL}{relative}")
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn decodes_png_data_uri() {
        let image = assert_ok!(decode_data_uri("data:image/png;base64,iVBORw0KGgo="));
        assert_eq!(image.extension, "png");
        assert_eq!(image.bytes[1..4], *b"PNG");
    }

    #[test]
    fn rejects_malformed_uris() {
        assert_err!(decode_data_uri("iVBORw0KGgo="));
        assert_err!(decode_data_uri("data:text/plain;base64,aGVsbG8="));
        assert_err!(decode_data_uri("data:image/png,iVBORw0KGgo="));
        assert_err!(decode_data_uri("data:image/png;base64,@@@"));
        assert_err!(decode_data_uri("data:image/png;base64,"));
    }

    #[test]
    fn url_is_under_media_prefix() {
        assert_eq!(media_url("recipes/a.png"), "/media/recipes/a.png");
    }

    #[tokio::test]
    async fn saved_image_lands_under_root() {
        let root = std::env::temp_dir().join(format!("foodgram-media-{}", uuid::Uuid::new_v4()));
        let store = MediaStore::new(&root);
        let image = DecodedImage {
            extension: String::from("png"),
            bytes: vec![1, 2, 3],
        };

        let relative = assert_ok!(store.save(&image).await);
        assert!(relative.starts_with("recipes/"));
        assert!(relative.ends_with(".png"));
        assert_eq!(assert_ok!(tokio::fs::read(root.join(&relative)).await), vec![1, 2, 3]);

        store.remove(&relative).await;
        assert!(!root.join(&relative).exists());
        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
