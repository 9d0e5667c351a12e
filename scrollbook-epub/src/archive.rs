use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use scrollbook_core::DecodeError;
use zip::ZipArchive;

/// Every file entry of an EPUB container, read up front so chapters can be
/// processed in parallel.
pub(crate) struct Archive {
    entries: HashMap<String, Vec<u8>>,
}

impl Archive {
    pub(crate) fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut zip = ZipArchive::new(file).map_err(|err| DecodeError::Archive(err.to_string()))?;

        let mut entries = HashMap::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|err| DecodeError::Archive(err.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().replace('\\', "/");
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|err| DecodeError::Archive(format!("{name}: {err}")))?;
            entries.insert(name, bytes);
        }
        Ok(Self { entries })
    }

    pub(crate) fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub(crate) fn text(&self, name: &str) -> Option<String> {
        let bytes = self.bytes(name)?;
        let text = String::from_utf8_lossy(bytes);
        Some(text.trim_start_matches('\u{feff}').to_string())
    }
}

pub(crate) fn parent_dir(entry: &str) -> &str {
    entry.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Joins a relative reference onto an archive directory, dropping any
/// fragment or query and folding `.` and `..` segments.
pub(crate) fn resolve(base_dir: &str, reference: &str) -> String {
    let reference = reference
        .split(['#', '?'])
        .next()
        .unwrap_or_default()
        .replace('\\', "/");
    let mut segments: Vec<&str> = if reference.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub(crate) fn file_name(entry: &str) -> &str {
    entry.rsplit('/').next().unwrap_or(entry)
}
