use once_cell::sync::Lazy;
use regex::Regex;

static TITLE_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<title[^>]*>([^<]+)</title>").expect("valid title pattern"));

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-3]\b[^>]*>(.*?)</h[1-3]>").expect("valid heading pattern"));

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&[a-z#0-9]+;").expect("valid entity pattern"));

static IMG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<img\b").expect("valid img pattern"));

static DOCUMENT_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.x?html?$").expect("valid extension pattern"));

pub(crate) const IMAGE_PAGE: &str = "Image page";

fn filename_hint(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    if lower.contains("cover") {
        Some("Cover")
    } else if lower.contains("back") {
        Some("Back cover")
    } else if lower.contains("toc") || lower.contains("nav") {
        Some("Contents")
    } else {
        None
    }
}

fn extract_title(html: &str) -> Option<String> {
    if let Some(title) = TITLE_ELEMENT
        .captures(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|title| !title.is_empty())
    {
        return Some(title);
    }
    HEADING
        .captures(html)
        .map(|caps| TAG.replace_all(&caps[1], "").trim().to_string())
        .filter(|title| !title.is_empty())
}

fn is_image_only(html: &str) -> bool {
    let text = TAG.replace_all(html, "");
    let text = ENTITY.replace_all(&text, "");
    IMG.is_match(html) && text.trim().chars().count() < 20
}

/// Chapter label: a filename hint, the document title, the first heading,
/// an image-page marker, or the file name without its extension.
pub(crate) fn chapter_title(file_name: &str, html: &str) -> String {
    if let Some(hint) = filename_hint(file_name) {
        return hint.to_string();
    }
    if let Some(title) = extract_title(html) {
        return title;
    }
    if is_image_only(html) {
        return IMAGE_PAGE.to_string();
    }
    DOCUMENT_EXTENSION.replace(file_name, "").into_owned()
}
