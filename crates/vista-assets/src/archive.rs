//! ZIP bundle reading.
//!
//! Entries are extracted from an in-memory copy of the archive. Extraction of
//! independent entries can run on blocking worker threads; the resulting
//! [`AssetMap`] is only returned once every entry has been read.

use std::io::{Cursor, Read};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;
use zip::ZipArchive;

use crate::asset_map::{AssetMap, Payload};
use crate::error::AssetError;

type ArchiveSource = ZipArchive<Cursor<Arc<[u8]>>>;

/// One named entry in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// An opened ZIP archive.
pub struct ZipArchiveReader {
    archive: ArchiveSource,
    entries: Vec<ArchiveEntry>,
}

impl ZipArchiveReader {
    /// Read the central directory of `bytes`.
    pub fn open(bytes: Arc<[u8]>) -> Result<Self, AssetError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| AssetError::ArchiveUnreadable(e.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index_raw(i)
                .map_err(|e| AssetError::ArchiveUnreadable(e.to_string()))?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                is_dir: file.is_dir(),
                size: file.size(),
            });
        }

        debug!("Opened archive with {} entries", entries.len());
        Ok(Self { archive, entries })
    }

    /// Entries in central-directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// First file entry whose name ends in one of `extensions`, ignoring
    /// case. Extensions are given without the leading dot.
    pub fn find_primary(&self, extensions: &[String]) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|entry| {
            if entry.is_dir {
                return false;
            }
            let name = entry.name.to_ascii_lowercase();
            extensions
                .iter()
                .any(|ext| name.ends_with(&format!(".{}", ext.to_ascii_lowercase())))
        })
    }

    /// Decompress a single entry.
    pub fn extract(&self, name: &str) -> Result<Vec<u8>, AssetError> {
        let mut archive = self.archive.clone();
        read_entry(&mut archive, name)
    }

    /// Decompress every file entry into a fresh map keyed by in-archive path.
    /// Any failing entry fails the whole extraction.
    pub async fn extract_all(&self, parallel: bool) -> Result<AssetMap, AssetError> {
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name.clone())
            .collect();

        let mut map = AssetMap::new();

        if !parallel {
            for name in names {
                let data = self.extract(&name)?;
                map.insert_payload(name.clone(), Payload::infer(&name, data));
            }
            return Ok(map);
        }

        let mut tasks = JoinSet::new();
        for name in names {
            let mut archive = self.archive.clone();
            tasks.spawn_blocking(move || {
                let data = read_entry(&mut archive, &name)?;
                Ok::<_, AssetError>((name, data))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let extracted = joined
                .map_err(|e| AssetError::ArchiveEntryFailed("<worker>".into(), e.to_string()))
                .and_then(|result| result);
            match extracted {
                Ok((name, data)) => {
                    map.insert_payload(name.clone(), Payload::infer(&name, data));
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        debug!("Extracted {} archive entries", map.len());
        Ok(map)
    }
}

fn read_entry(archive: &mut ArchiveSource, name: &str) -> Result<Vec<u8>, AssetError> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| AssetError::ArchiveEntryFailed(name.to_string(), e.to_string()))?;
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)
        .map_err(|e| AssetError::ArchiveEntryFailed(name.to_string(), e.to_string()))?;
    Ok(data)
}
