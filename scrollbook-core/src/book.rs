use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::SnapshotMeta;

/// Table-of-contents view of a chapter: everything but the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMeta {
    pub id: String,
    pub href: String,
    pub title: String,
}

impl ChapterMeta {
    pub fn label(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.href
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub href: String,
    pub title: String,
    /// Sanitized markup with every referenced resource inlined.
    pub html: String,
}

impl Chapter {
    pub fn meta(&self) -> ChapterMeta {
        ChapterMeta {
            id: self.id.clone(),
            href: self.href.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookOrigin {
    /// Produced by a full decode; chapter bodies are authoritative.
    Decoded,
    /// Rebuilt from snapshot metadata; chapters carry no bodies.
    Snapshot,
}

#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub path: Option<PathBuf>,
    pub signature: Option<String>,
    pub chapters: Vec<Chapter>,
    pub origin: BookOrigin,
}

impl Book {
    pub fn new(title: impl Into<String>, path: Option<PathBuf>, chapters: Vec<Chapter>) -> Self {
        Self {
            title: title.into(),
            path,
            signature: None,
            chapters,
            origin: BookOrigin::Decoded,
        }
    }

    pub fn empty() -> Self {
        Self::new(String::new(), None, Vec::new())
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn from_snapshot(path: &Path, meta: &SnapshotMeta) -> Self {
        let chapters = meta
            .chapters
            .iter()
            .map(|chapter| Chapter {
                id: chapter.id.clone(),
                href: chapter.href.clone(),
                title: chapter.title.clone(),
                html: String::new(),
            })
            .collect();
        Self {
            title: meta.title.clone(),
            path: Some(path.to_path_buf()),
            signature: meta.signature.clone(),
            chapters,
            origin: BookOrigin::Snapshot,
        }
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn is_authoritative(&self) -> bool {
        self.origin == BookOrigin::Decoded
    }

    pub fn chapter(&self, idx: usize) -> Option<&Chapter> {
        self.chapters.get(idx)
    }

    /// Body markup for `idx`, or `None` when the chapter is missing or the
    /// book only carries snapshot metadata.
    pub fn body(&self, idx: usize) -> Option<&str> {
        if !self.is_authoritative() {
            return None;
        }
        self.chapters.get(idx).map(|chapter| chapter.html.as_str())
    }

    pub fn chapter_title(&self, idx: usize) -> Option<&str> {
        self.chapters
            .get(idx)
            .map(|chapter| chapter.title.trim())
            .filter(|title| !title.is_empty())
    }

    pub fn chapters_meta(&self) -> Vec<ChapterMeta> {
        self.chapters.iter().map(Chapter::meta).collect()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unreadable archive: {0}")]
    Archive(String),
    #[error("missing META-INF/container.xml")]
    MissingContainer,
    #[error("missing package document {0}")]
    MissingPackage(String),
    #[error("malformed xml in {entry}: {message}")]
    MalformedXml { entry: String, message: String },
    #[error("package has no manifest or spine")]
    MissingSpine,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Turns a book file into an ordered list of chapters.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn decode(&self, path: &Path) -> Result<Book, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chapter(idx: usize) -> Chapter {
        Chapter {
            id: format!("c{idx}"),
            href: format!("text/c{idx}.xhtml"),
            title: format!("Chapter {idx}"),
            html: format!("<p>{idx}</p>"),
        }
    }

    #[test]
    fn snapshot_books_expose_titles_but_no_bodies() {
        let decoded = Book::new("Title", None, vec![chapter(0), chapter(1)]);
        assert_eq!(decoded.body(1), Some("<p>1</p>"));

        let meta = SnapshotMeta {
            key: Uuid::nil(),
            path: PathBuf::from("/books/a.epub"),
            signature: None,
            title: "Title".into(),
            chapters: decoded.chapters_meta(),
            ts: 0,
        };
        let hydrated = Book::from_snapshot(Path::new("/books/a.epub"), &meta);
        assert_eq!(hydrated.len(), 2);
        assert_eq!(hydrated.chapter_title(1), Some("Chapter 1"));
        assert_eq!(hydrated.body(1), None);
        assert!(!hydrated.is_authoritative());
    }

    #[test]
    fn blank_titles_fall_back_to_href() {
        let mut meta = chapter(3).meta();
        meta.title = "  ".into();
        assert_eq!(meta.label(), "text/c3.xhtml");
    }
}
