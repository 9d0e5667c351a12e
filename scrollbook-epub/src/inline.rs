use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::archive::{parent_dir, resolve, Archive};

static STYLESHEET_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<link\b[^>]*rel=["']?[^"']*stylesheet[^"']*["'][^>]*>"#)
        .expect("valid stylesheet link pattern")
});

static HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]+)"|'([^']+)')"#).expect("valid href pattern")
});

static STYLE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>(.*?)</style>").expect("valid style block pattern")
});

static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)@import\s+(?:url\(\s*['"]?([^'")]+)['"]?\s*\)|['"]([^'"]+)['"])\s*;?"#)
        .expect("valid import pattern")
});

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("valid css url pattern")
});

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b([^>]*?)\bsrc\s*=\s*(?:"([^"]+)"|'([^']+)')([^>]*)>"#)
        .expect("valid img pattern")
});

static SVG_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:image|use)\b[^>]*>").expect("valid svg tag pattern"));

static SVG_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\s(?:xlink:)?href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid svg href pattern")
});

const MAX_IMPORT_DEPTH: usize = 8;

fn is_external(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    ["data:", "blob:", "http:", "https:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn mime_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "css" => "text/css",
        _ => "application/octet-stream",
    }
}

fn first_group<'t>(caps: &Captures<'t>, groups: &[usize]) -> Option<&'t str> {
    groups
        .iter()
        .find_map(|group| caps.get(*group))
        .map(|m| m.as_str().trim())
}

/// Data URI for an archive entry referenced from `base_dir`.
fn data_uri(archive: &Archive, base_dir: &str, reference: &str) -> Option<String> {
    let resolved = resolve(base_dir, reference);
    let bytes = archive.bytes(&resolved)?;
    Some(format!(
        "data:{};base64,{}",
        mime_for(&resolved),
        STANDARD.encode(bytes)
    ))
}

/// Rewrites a chapter so it no longer references anything inside the
/// archive: stylesheets, CSS imports and urls, images and SVG references.
pub(crate) fn inline_resources(html: &str, chapter_path: &str, archive: &Archive) -> String {
    let html = inline_stylesheets(html, chapter_path, archive);
    let html = inline_images(&html, chapter_path, archive);
    inline_svg_references(&html, chapter_path, archive)
}

fn inline_stylesheets(html: &str, chapter_path: &str, archive: &Archive) -> String {
    let dir = parent_dir(chapter_path);

    let linked = STYLESHEET_LINK.replace_all(html, |caps: &Captures| {
        let Some(href) = HREF
            .captures(&caps[0])
            .and_then(|c| first_group(&c, &[1, 2]).map(str::to_string))
        else {
            return String::new();
        };
        if is_external(&href) {
            return String::new();
        }
        let resolved = resolve(dir, &href);
        match archive.text(&resolved) {
            Some(css) => format!(
                "<style>{}</style>",
                inline_css(&css, parent_dir(&resolved), archive, 0)
            ),
            None => String::new(),
        }
    });

    let styled = STYLE_BLOCK.replace_all(&linked, |caps: &Captures| {
        format!("<style>{}</style>", inline_css(&caps[1], dir, archive, 0))
    });

    STYLESHEET_LINK.replace_all(&styled, "").into_owned()
}

/// Resolves `@import` recursively, then turns every archive `url(..)` into
/// a data URI.
pub(crate) fn inline_css(css: &str, base_dir: &str, archive: &Archive, depth: usize) -> String {
    let imported = CSS_IMPORT.replace_all(css, |caps: &Captures| {
        let href = first_group(caps, &[1, 2]).unwrap_or_default();
        if is_external(href) {
            return caps[0].to_string();
        }
        if depth >= MAX_IMPORT_DEPTH {
            return String::new();
        }
        let resolved = resolve(base_dir, href);
        archive
            .text(&resolved)
            .map(|child| inline_css(&child, parent_dir(&resolved), archive, depth + 1))
            .unwrap_or_default()
    });

    CSS_URL
        .replace_all(&imported, |caps: &Captures| {
            let reference = first_group(caps, &[1]).unwrap_or_default();
            if is_external(reference) {
                return caps[0].to_string();
            }
            match data_uri(archive, base_dir, reference) {
                Some(uri) => format!("url({uri})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn inline_images(html: &str, chapter_path: &str, archive: &Archive) -> String {
    let dir = parent_dir(chapter_path);
    IMG_SRC
        .replace_all(html, |caps: &Captures| {
            let src = first_group(caps, &[2, 3]).unwrap_or_default();
            if is_external(src) {
                return caps[0].to_string();
            }
            match data_uri(archive, dir, src) {
                Some(uri) => format!("<img{}src=\"{}\"{}>", &caps[1], uri, &caps[4]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn inline_svg_references(html: &str, chapter_path: &str, archive: &Archive) -> String {
    let dir = parent_dir(chapter_path);
    SVG_REFERENCE
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            let Some(reference) = SVG_HREF
                .captures(tag)
                .and_then(|c| first_group(&c, &[2, 3]).map(str::to_string))
            else {
                return tag.to_string();
            };
            if reference.is_empty() || reference.starts_with('#') || is_external(&reference) {
                return tag.to_string();
            }
            match data_uri(archive, dir, &reference) {
                Some(uri) => SVG_HREF
                    .replace_all(tag, |attr: &Captures| format!("{}=\"{}\"", &attr[1], uri))
                    .into_owned(),
                None => tag.to_string(),
            }
        })
        .into_owned()
}
