//! Inline image references inside answer text.
//!
//! Text and images share a single serialized field: every uploaded image is an
//! `<img>` tag embedded in the answer, one per line.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static IMG_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]*?\bsrc=["']([^"']+)["'][^>]*>"#).expect("image tag pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub url: String,
    pub full_tag: String,
    pub span: Range<usize>,
}

/// The tag inserted for a freshly uploaded image.
pub fn image_tag(url: &str) -> String {
    format!(
        r#"<img src="{}" alt="Uploaded image" loading="lazy" style="max-width: 100%; height: auto; margin: 8px 0;" />"#,
        url.replace('"', "%22")
    )
}

pub fn extract_images(text: &str) -> Vec<ImageTag> {
    IMG_TAG
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let url = caps.get(1)?;
            Some(ImageTag {
                url: url.as_str().to_string(),
                full_tag: whole.as_str().to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Answer text with every image tag and its joining line break removed.
pub fn prose(text: &str) -> String {
    let mut remaining = text.to_string();
    while let Some(found) = IMG_TAG.find(&remaining) {
        remaining = cut(&remaining, found.range());
    }
    remaining.trim_start_matches(['\n', '\r']).to_string()
}

/// Images first, one per line, then the prose.
pub fn compose(tags: &[ImageTag], prose: &str) -> String {
    let joined = tags
        .iter()
        .map(|tag| tag.full_tag.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    match (joined.is_empty(), prose.is_empty()) {
        (true, _) => prose.to_string(),
        (false, true) => joined,
        (false, false) => format!("{joined}\n{prose}"),
    }
}

pub fn append_image(text: &str, url: &str) -> String {
    let tag = image_tag(url);
    let head = text.trim_end();
    if head.is_empty() {
        tag
    } else {
        format!("{head}\n{tag}")
    }
}

/// Removes the image referencing `url`. The exact inserted tag is tried first,
/// then any `<img>` whose `src` matches. Returns `None` when nothing matched.
pub fn remove_image(text: &str, url: &str) -> Option<String> {
    let exact = image_tag(url);
    if let Some(start) = text.find(&exact) {
        let stripped = cut(text, start..start + exact.len());
        return Some(stripped.trim().to_string());
    }

    let pattern = format!(
        r#"<img[^>]*\bsrc=["']{}["'][^>]*>"#,
        regex::escape(url)
    );
    let by_url = Regex::new(&pattern).ok()?;

    let mut updated = text.to_string();
    let mut changed = false;
    while let Some(found) = by_url.find(&updated) {
        updated = cut(&updated, found.range());
        changed = true;
    }

    changed.then(|| updated.trim().to_string())
}

/// Drops `span` plus the single line break that joined it to its neighbours.
fn cut(text: &str, span: Range<usize>) -> String {
    let mut start = span.start;
    let mut end = span.end;

    if text[end..].starts_with("\r\n") {
        end += 2;
    } else if text[end..].starts_with('\n') {
        end += 1;
    } else if text[..start].ends_with('\n') {
        start -= 1;
        if text[..start].ends_with('\r') {
            start -= 1;
        }
    }

    let mut out = String::with_capacity(text.len() - (end - start));
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    out
}
