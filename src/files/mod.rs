// src/files/mod.rs

//! Per-file metadata and state tracking
//!
//! A [`FileInfoSet`] is the element's view of the package manifest: one
//! record per file with its color bits and packed dependency references.
//! [`FileStates`] tracks what the transaction decided to do with each file.

use crate::header::{Header, Tag};

/// Flag bits selecting which semantics the file set is loaded for.
pub const FI_INSTALL: u32 = 1 << 0;
pub const FI_ERASE: u32 = 1 << 1;

/// Metadata for one file in the package manifest.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub basename: String,
    /// Architecture class bits (e.g. 32-bit vs 64-bit ELF).
    pub color: u32,
    /// Packed dependency references; see [`crate::deps::pack_depref`].
    pub depends: Vec<u32>,
    /// Hex file digest, empty when the entry carries none.
    pub digest: String,
}

/// The per-file metadata of one package.
#[derive(Debug, Clone)]
pub struct FileInfoSet {
    files: Vec<FileInfo>,
    flags: u32,
}

impl FileInfoSet {
    /// Build from the header's parallel file tags.
    ///
    /// A header without a file manifest yields an empty set. Returns None
    /// when the parallel arrays disagree in length, which means the header
    /// is inconsistent and no file view can be trusted.
    pub fn from_header(h: &Header, base_tag: Tag, flags: u32) -> Option<Self> {
        let Some(basenames) = h.get_str_vec(base_tag) else {
            return Some(Self {
                files: Vec::new(),
                flags,
            });
        };
        let fc = basenames.len();

        let colors = h.get_u32_vec(Tag::FileColors);
        if colors.is_some_and(|c| c.len() != fc) {
            return None;
        }
        let dep_offsets = h.get_u32_vec(Tag::FileDependsX);
        let dep_counts = h.get_u32_vec(Tag::FileDependsN);
        if dep_offsets.is_some_and(|v| v.len() != fc) || dep_counts.is_some_and(|v| v.len() != fc)
        {
            return None;
        }
        if dep_offsets.is_some() != dep_counts.is_some() {
            return None;
        }
        let dict = h.get_u32_vec(Tag::DependsDict).unwrap_or(&[]);
        let digests = h.get_str_vec(Tag::FileDigests);
        if digests.is_some_and(|d| d.len() != fc) {
            return None;
        }

        let mut files = Vec::with_capacity(fc);
        for i in 0..fc {
            let depends = match (dep_offsets, dep_counts) {
                (Some(offsets), Some(counts)) => {
                    let start = offsets[i] as usize;
                    let end = start + counts[i] as usize;
                    if end > dict.len() {
                        return None;
                    }
                    dict[start..end].to_vec()
                }
                _ => Vec::new(),
            };
            files.push(FileInfo {
                basename: basenames[i].clone(),
                color: colors.map_or(0, |c| c[i]),
                depends,
                digest: digests.map_or_else(String::new, |d| d[i].clone()),
            });
        }

        Some(Self { files, flags })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn file(&self, index: usize) -> Option<&FileInfo> {
        self.files.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.files.iter()
    }
}

/// Disposition of one file after the transaction has looked at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileState {
    #[default]
    Normal,
    Replaced,
    NotInstalled,
    NetShared,
    WrongColor,
    Missing,
}

/// Per-file state tracker, sized once at element construction.
#[derive(Debug, Clone)]
pub struct FileStates {
    states: Vec<FileState>,
    install: bool,
}

impl FileStates {
    pub fn new(file_count: usize, install: bool) -> Self {
        Self {
            states: vec![FileState::Normal; file_count],
            install,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// True when the tracker belongs to an install-type element.
    pub fn is_install(&self) -> bool {
        self.install
    }

    pub fn state(&self, index: usize) -> Option<FileState> {
        self.states.get(index).copied()
    }

    pub fn set_state(&mut self, index: usize, state: FileState) {
        if let Some(slot) = self.states.get_mut(index) {
            *slot = state;
        }
    }
}
