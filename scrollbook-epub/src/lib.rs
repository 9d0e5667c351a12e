use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use rayon::prelude::*;
use scrollbook_core::markup::sanitize;
use scrollbook_core::{Book, Chapter, DecodeError, DocumentSource};
use tracing::{debug, info, instrument};

mod archive;
mod inline;
mod package;
mod title;

use archive::{file_name, parent_dir, Archive};
use package::{rootfile_path, Package, SpineEntry};

const CONTAINER_ENTRY: &str = "META-INF/container.xml";

/// Decodes EPUB files into sanitized chapters with every archive resource
/// inlined.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpubSource;

impl EpubSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentSource for EpubSource {
    #[instrument(skip(self))]
    async fn decode(&self, path: &Path) -> Result<Book, DecodeError> {
        decode_file(path)
    }
}

pub fn decode_file(path: &Path) -> Result<Book, DecodeError> {
    let signature = file_signature(path)?;
    let archive = Archive::open(path)?;

    let container = archive
        .text(CONTAINER_ENTRY)
        .ok_or(DecodeError::MissingContainer)?;
    let opf_path = rootfile_path(&container)?;
    let opf = archive
        .text(&opf_path)
        .ok_or_else(|| DecodeError::MissingPackage(opf_path.clone()))?;
    let package = Package::parse(&opf_path, &opf)?;

    let entries = package.chapter_entries(parent_dir(&opf_path));
    let chapters: Vec<Chapter> = entries
        .par_iter()
        .filter_map(|entry| build_chapter(&archive, entry))
        .collect();

    info!(
        title = %package.title,
        chapters = chapters.len(),
        spine = entries.len(),
        "decoded epub"
    );
    Ok(Book::new(package.title, Some(path.to_path_buf()), chapters).with_signature(Some(signature)))
}

fn build_chapter(archive: &Archive, entry: &SpineEntry) -> Option<Chapter> {
    let Some(raw) = archive.text(&entry.path) else {
        debug!(path = %entry.path, "spine entry missing from archive");
        return None;
    };
    let html = sanitize(&raw);
    let html = inline::inline_resources(&html, &entry.path, archive);
    let title = title::chapter_title(file_name(&entry.path), &html);
    Some(Chapter {
        id: entry.id.clone(),
        href: entry.path.clone(),
        title,
        html,
    })
}

/// Content signature from file size and modification time.
pub fn file_signature(path: &Path) -> Result<String, DecodeError> {
    let metadata = fs::metadata(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    Ok(format!("{}-{}", metadata.len(), modified))
}
