use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::answers::markup;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    /// Known only for images uploaded in this session; resumed answers carry
    /// URLs without sizes.
    pub size_bytes: Option<u64>,
}

/// In-progress answer for one question. Images live inside `text` as inline
/// tags; `images` is always derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDraft {
    pub question_id: String,
    text: String,
    images: Vec<ImageRef>,
    last_synced_text: Option<String>,
}

impl AnswerDraft {
    pub fn new(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            text: String::new(),
            images: Vec::new(),
            last_synced_text: None,
        }
    }

    /// A draft restored from an answer the server already holds.
    pub fn from_saved(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut draft = Self::new(question_id);
        draft.replace_text(text.clone(), None);
        draft.last_synced_text = Some(text);
        draft
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn last_synced_text(&self) -> Option<&str> {
        self.last_synced_text.as_deref()
    }

    /// True only while the current text equals what the server last confirmed.
    pub fn is_saved(&self) -> bool {
        self.last_synced_text.as_deref() == Some(self.text.as_str())
    }

    /// Typed prose without the embedded image tags.
    pub fn prose(&self) -> String {
        markup::prose(&self.text)
    }

    /// Replaces the serialized text and re-derives the image list, keeping the
    /// sizes already known for URLs that survive. `uploaded` records the size
    /// of a newly embedded image.
    pub(crate) fn replace_text(&mut self, text: String, uploaded: Option<(&str, u64)>) {
        let mut sizes: HashMap<String, u64> = self
            .images
            .iter()
            .filter_map(|image| image.size_bytes.map(|size| (image.url.clone(), size)))
            .collect();
        if let Some((url, size)) = uploaded {
            sizes.insert(url.to_string(), size);
        }

        self.images = markup::extract_images(&text)
            .into_iter()
            .map(|tag| ImageRef {
                size_bytes: sizes.get(&tag.url).copied(),
                url: tag.url,
            })
            .collect();
        self.text = text;
    }

    pub(crate) fn mark_synced(&mut self, sent_text: String) {
        self.last_synced_text = Some(sent_text);
    }
}
