// src/header/mod.rs

//! In-memory package header model
//!
//! A header is a tag -> value map extracted from a package's metadata
//! region. The transaction engine only ever goes through the typed
//! accessors here; it never touches serialized header bytes.

pub mod rpm;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Header tags the engine reads or writes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Tag {
    // Identity
    Name,
    Epoch,
    Version,
    Release,
    Arch,
    Os,
    SourcePackage,

    // Dependency triples, one per kind
    ProvideName,
    ProvideVersion,
    ProvideFlags,
    RequireName,
    RequireVersion,
    RequireFlags,
    ConflictName,
    ConflictVersion,
    ConflictFlags,
    ObsoleteName,
    ObsoleteVersion,
    ObsoleteFlags,
    OrderName,
    OrderVersion,
    OrderFlags,
    RecommendName,
    RecommendVersion,
    RecommendFlags,
    SuggestName,
    SuggestVersion,
    SuggestFlags,
    SupplementName,
    SupplementVersion,
    SupplementFlags,
    EnhanceName,
    EnhanceVersion,
    EnhanceFlags,

    // File manifest
    BaseNames,
    DirNames,
    DirIndexes,
    OrigBaseNames,
    OrigDirNames,
    Prefixes,
    FileColors,
    FileDependsX,
    FileDependsN,
    DependsDict,
    FileDigests,
    FileDigestAlgo,

    // Transaction scriptlets (and their legacy interpreter variants)
    PreTrans,
    PreTransProg,
    PostTrans,
    PostTransProg,
    PreUnTrans,
    PreUnTransProg,
    PostUnTrans,
    PostUnTransProg,

    // Sizes and payload
    LongSigSize,
    PayloadCompressor,

    // Signature block
    FileSignatures,
    FileSignatureLength,
}

/// Typed header values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    StrVec(Vec<String>),
    U32(u32),
    U64(u64),
    U32Vec(Vec<u32>),
}

/// A package header: tag/value entries plus the database instance the
/// header was loaded from (0 = not recorded).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    entries: BTreeMap<Tag, Value>,
    #[serde(default)]
    instance: u32,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// String field, or None if absent or not a string.
    pub fn get_str(&self, tag: Tag) -> Option<&str> {
        match self.entries.get(&tag) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_str_vec(&self, tag: Tag) -> Option<&[String]> {
        match self.entries.get(&tag) {
            Some(Value::StrVec(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn get_u32_vec(&self, tag: Tag) -> Option<&[u32]> {
        match self.entries.get(&tag) {
            Some(Value::U32Vec(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Numeric field; accepts either integer width.
    pub fn get_num(&self, tag: Tag) -> Option<u64> {
        match self.entries.get(&tag) {
            Some(Value::U32(n)) => Some(u64::from(*n)),
            Some(Value::U64(n)) => Some(*n),
            _ => None,
        }
    }

    /// Entry-existence check, regardless of value type.
    pub fn has(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn insert(&mut self, tag: Tag, value: Value) {
        self.entries.insert(tag, value);
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Value> {
        self.entries.remove(&tag)
    }

    /// Number of files in the package manifest.
    pub fn file_count(&self) -> usize {
        self.get_str_vec(Tag::BaseNames).map_or(0, <[String]>::len)
    }

    pub fn is_source(&self) -> bool {
        self.get_num(Tag::SourcePackage).unwrap_or(0) != 0
    }

    /// Serialized byte size of the header.
    pub fn size(&self) -> u32 {
        serde_json::to_vec(self).map_or(0, |v| v.len() as u32)
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn set_instance(&mut self, instance: u32) {
        self.instance = instance;
    }
}

/// Verification flag requiring the package read to leave the payload
/// readable on the stream (headers alone are not enough for an install).
pub const VSFLAG_NEED_PAYLOAD: u32 = 1 << 0;

/// Outcome of reading a package from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    /// Signature present but the key is not trusted.
    NotTrusted,
    /// No key available to check the signature.
    NoKey,
    NotFound,
    Fail,
}

/// Contract for parsing a package header off an open stream.
///
/// Implementations verify signatures/digests according to `vsflags` and
/// report the outcome; the stream is left positioned at the payload.
pub trait PackageReader {
    fn read_package(
        &mut self,
        fd: &mut dyn Read,
        nevra: &str,
        vsflags: u32,
    ) -> (Option<Header>, ReadStatus);
}
