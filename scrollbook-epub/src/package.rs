use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::{Document, Node};
use scrollbook_core::DecodeError;

use crate::archive::{file_name, resolve};

static HTML_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.x?html?$").expect("valid html extension pattern"));

const PLACEHOLDER_ENTRY: &str = "chapter.xhtml";

fn has_tag(node: Node<'_, '_>, expected: &str) -> bool {
    node.is_element() && node.tag_name().name() == expected
}

fn malformed(entry: &str, err: roxmltree::Error) -> DecodeError {
    DecodeError::MalformedXml {
        entry: entry.to_string(),
        message: err.to_string(),
    }
}

/// Path of the package document named by `META-INF/container.xml`.
pub(crate) fn rootfile_path(container: &str) -> Result<String, DecodeError> {
    let document =
        Document::parse(container).map_err(|err| malformed("META-INF/container.xml", err))?;
    document
        .descendants()
        .filter(|node| has_tag(*node, "rootfile"))
        .find_map(|node| node.attribute("full-path"))
        .map(|path| path.trim().replace('\\', "/"))
        .filter(|path| !path.is_empty())
        .ok_or(DecodeError::MissingContainer)
}

#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    media_type: String,
}

impl ManifestItem {
    fn looks_html(&self) -> bool {
        self.media_type.contains("html") || HTML_HREF.is_match(&self.href)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpineEntry {
    pub id: String,
    /// Archive path of the chapter document.
    pub path: String,
}

#[derive(Debug)]
pub(crate) struct Package {
    pub title: String,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
}

impl Package {
    pub(crate) fn parse(entry: &str, xml: &str) -> Result<Self, DecodeError> {
        let document = Document::parse(xml).map_err(|err| malformed(entry, err))?;

        let title = document
            .descendants()
            .filter(|node| has_tag(*node, "metadata"))
            .flat_map(|metadata| metadata.descendants())
            .filter(|node| has_tag(*node, "title"))
            .filter_map(|node| node.text())
            .map(str::trim)
            .find(|text| !text.is_empty())
            .unwrap_or("Untitled")
            .to_string();

        let manifest: HashMap<String, ManifestItem> = document
            .descendants()
            .filter(|node| has_tag(*node, "item"))
            .filter_map(|node| {
                let id = node.attribute("id")?;
                let href = node.attribute("href")?;
                let media_type = node
                    .attribute("media-type")
                    .or_else(|| node.attribute("media"))
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                Some((
                    id.to_string(),
                    ManifestItem {
                        href: href.to_string(),
                        media_type,
                    },
                ))
            })
            .collect();

        let spine: Vec<String> = document
            .descendants()
            .filter(|node| has_tag(*node, "itemref"))
            .filter_map(|node| node.attribute("idref"))
            .map(str::to_string)
            .collect();

        if manifest.is_empty() || spine.is_empty() {
            return Err(DecodeError::MissingSpine);
        }
        Ok(Self {
            title,
            manifest,
            spine,
        })
    }

    /// Readable spine documents in reading order. Unknown idrefs, non-HTML
    /// items and the `chapter.xhtml` placeholder are skipped.
    pub(crate) fn chapter_entries(&self, base_dir: &str) -> Vec<SpineEntry> {
        self.spine
            .iter()
            .filter_map(|idref| {
                let item = self.manifest.get(idref)?;
                if item.href.is_empty() || !item.looks_html() {
                    return None;
                }
                let path = resolve(base_dir, &item.href);
                if file_name(&path).eq_ignore_ascii_case(PLACEHOLDER_ENTRY) {
                    return None;
                }
                Some(SpineEntry {
                    id: idref.clone(),
                    path,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title> A Book </dc:title>
  </metadata>
  <manifest>
    <item id="c1" href="text/c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="styles/main.css" media-type="text/css"/>
    <item id="ph" href="text/chapter.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/c2.html"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="css"/>
    <itemref idref="ghost"/>
    <itemref idref="ph"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;

    #[test]
    fn rootfile_is_read_from_container() {
        let container = r#"<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;
        assert_eq!(rootfile_path(container).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn spine_keeps_only_readable_documents() {
        let package = Package::parse("OEBPS/content.opf", OPF).unwrap();
        assert_eq!(package.title, "A Book");
        let entries = package.chapter_entries("OEBPS");
        let paths: Vec<&str> = entries.iter().map(|entry| entry.path.as_str()).collect();
        assert_eq!(paths, ["OEBPS/text/c1.xhtml", "OEBPS/text/c2.html"]);
    }

    #[test]
    fn package_without_spine_is_rejected() {
        let xml = r#"<package><metadata/><manifest><item id="a" href="a.xhtml"/></manifest></package>"#;
        assert!(matches!(
            Package::parse("content.opf", xml),
            Err(DecodeError::MissingSpine)
        ));
    }

    #[test]
    fn missing_title_defaults_to_untitled() {
        let xml = r#"<package><metadata/><manifest><item id="a" href="a.xhtml"/></manifest><spine><itemref idref="a"/></spine></package>"#;
        assert_eq!(Package::parse("content.opf", xml).unwrap().title, "Untitled");
    }
}
