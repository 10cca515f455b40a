// src/reloc/mod.rs

//! Payload path relocation
//!
//! Builds the effective relocation table for an install element and
//! rewrites the header's directory metadata accordingly. The original
//! paths are preserved under the Orig* tags so a later reload can tell
//! that relocation already happened.

use crate::error::{Error, Result};
use crate::files::{FileState, FileStates};
use crate::header::{Header, Tag, Value};
use tracing::debug;

/// One requested path relocation; `new_path` of None excludes the subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub old_path: String,
    pub new_path: Option<String>,
}

/// Effective relocations plus a parallel bad-entry flag array.
#[derive(Debug, Clone, Default)]
pub struct RelocationTable {
    relocs: Vec<Relocation>,
    bad: Vec<bool>,
}

impl RelocationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.relocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relocs.is_empty()
    }

    pub fn relocation(&self, index: usize) -> Option<&Relocation> {
        self.relocs.get(index)
    }

    pub fn is_bad(&self, index: usize) -> bool {
        self.bad.get(index).copied().unwrap_or(false)
    }

    /// Relocations that did not apply to the package.
    pub fn iter_bad(&self) -> impl Iterator<Item = &Relocation> {
        self.relocs
            .iter()
            .zip(self.bad.iter())
            .filter(|(_, bad)| **bad)
            .map(|(r, _)| r)
    }

    fn iter_good(&self) -> impl Iterator<Item = &Relocation> {
        self.relocs
            .iter()
            .zip(self.bad.iter())
            .filter(|(_, bad)| !**bad)
            .map(|(r, _)| r)
    }
}

/// Relocation contract consumed by element construction and reload.
pub trait Relocator {
    /// Build the effective table from a requested spec; entries whose old
    /// path is not a relocatable prefix of the package are flagged bad.
    fn build(&self, h: &Header, spec: &[Relocation]) -> RelocationTable;

    /// Rewrite the header's directory names per the table, saving the
    /// originals, and mark excluded files in the state tracker.
    fn relocate_file_list(&self, h: &mut Header, table: &RelocationTable, states: &mut FileStates);

    /// Source packages are relocated into the build root instead; unlike
    /// binary relocation this can fail.
    fn relocate_source_list(&self, h: &mut Header) -> Result<()>;
}

/// Stock relocator used when the driver supplies no other.
#[derive(Debug, Clone)]
pub struct DefaultRelocator {
    /// Destination root for source-package file lists.
    pub source_root: String,
}

impl Default for DefaultRelocator {
    fn default() -> Self {
        Self {
            source_root: "/usr/src/packages".to_string(),
        }
    }
}

fn strip_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

impl Relocator for DefaultRelocator {
    fn build(&self, h: &Header, spec: &[Relocation]) -> RelocationTable {
        let prefixes = h.get_str_vec(Tag::Prefixes);

        let mut relocs: Vec<Relocation> = spec
            .iter()
            .map(|r| Relocation {
                old_path: strip_trailing_slash(&r.old_path).to_string(),
                new_path: r
                    .new_path
                    .as_deref()
                    .map(|p| strip_trailing_slash(p).to_string()),
            })
            .collect();
        // Longest prefix first, so nested relocations match most-specific
        relocs.sort_by(|a, b| b.old_path.len().cmp(&a.old_path.len()));

        let bad = relocs
            .iter()
            .map(|r| match prefixes {
                Some(prefixes) => !prefixes
                    .iter()
                    .any(|p| strip_trailing_slash(p) == r.old_path),
                // A package with no declared prefixes is not relocatable
                None => true,
            })
            .collect();

        RelocationTable { relocs, bad }
    }

    fn relocate_file_list(&self, h: &mut Header, table: &RelocationTable, states: &mut FileStates) {
        if table.is_empty() {
            return;
        }
        let Some(dirnames) = h.get_str_vec(Tag::DirNames).map(<[String]>::to_vec) else {
            return;
        };
        let dirindexes = h.get_u32_vec(Tag::DirIndexes).map(<[u32]>::to_vec);

        // Preserve the pristine manifest once
        if !h.has(Tag::OrigBaseNames) {
            if let Some(basenames) = h.get_str_vec(Tag::BaseNames).map(<[String]>::to_vec) {
                h.insert(Tag::OrigBaseNames, Value::StrVec(basenames));
            }
            h.insert(Tag::OrigDirNames, Value::StrVec(dirnames.clone()));
        }

        let mut new_dirs = dirnames.clone();
        for (d, dir) in dirnames.iter().enumerate() {
            let trimmed = strip_trailing_slash(dir);
            for reloc in table.iter_good() {
                let within = trimmed == reloc.old_path
                    || trimmed
                        .strip_prefix(&reloc.old_path)
                        .is_some_and(|rest| rest.starts_with('/'));
                if !within {
                    continue;
                }
                match &reloc.new_path {
                    Some(new_path) => {
                        let rest = &trimmed[reloc.old_path.len()..];
                        new_dirs[d] = format!("{}{}/", new_path, rest);
                        debug!("relocating {} to {}", dir, new_dirs[d]);
                    }
                    None => {
                        // Exclusion: everything under this directory is
                        // skipped at install time
                        if let Some(dirindexes) = &dirindexes {
                            for (i, &di) in dirindexes.iter().enumerate() {
                                if di as usize == d {
                                    states.set_state(i, FileState::NotInstalled);
                                }
                            }
                        }
                    }
                }
                break;
            }
        }

        h.insert(Tag::DirNames, Value::StrVec(new_dirs));
    }

    fn relocate_source_list(&self, h: &mut Header) -> Result<()> {
        if h.file_count() == 0 {
            return Ok(());
        }
        let Some(dirnames) = h.get_str_vec(Tag::DirNames).map(<[String]>::to_vec) else {
            return Err(Error::Relocation(
                "source package carries files but no directory information".to_string(),
            ));
        };

        let rebased = dirnames
            .iter()
            .map(|d| format!("{}/{}", self.source_root, d.trim_start_matches('/')))
            .collect();
        h.insert(Tag::DirNames, Value::StrVec(rebased));
        Ok(())
    }
}
