use std::path::Path;

use anyhow::{bail, Context};

/// Image blob attached to a search draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageAttachment {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime_type = mime_for_path(Path::new(&filename)).map(str::to_string);
        Self {
            filename,
            bytes,
            mime_type,
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        if bytes.is_empty() {
            bail!("image file is empty: {}", path.display());
        }
        let filename = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(filename, bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The pending search draft: free text plus an optional image.
///
/// Text is stored as typed and trimmed whenever it is read for submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    text: String,
    image: Option<ImageAttachment>,
}

impl Query {
    pub fn new(text: impl Into<String>, image: Option<ImageAttachment>) -> Self {
        Self {
            text: text.into(),
            image,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, None)
    }

    pub fn raw_text(&self) -> &str {
        &self.text
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    pub fn image(&self) -> Option<&ImageAttachment> {
        self.image.as_ref().filter(|image| !image.is_empty())
    }

    pub fn has_text(&self) -> bool {
        !self.trimmed_text().is_empty()
    }

    pub fn has_image(&self) -> bool {
        self.image().is_some()
    }

    /// At least one of text or image must be present before a search is issued.
    pub fn is_submittable(&self) -> bool {
        self.has_text() || self.has_image()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn attach_image(&mut self, image: ImageAttachment) {
        self.image = Some(image);
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
