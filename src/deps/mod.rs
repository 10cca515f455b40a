// src/deps/mod.rs

//! Dependency sets
//!
//! One ordered set per dependency kind (provides, requires, ...), built
//! from the header's parallel name/version/flags tags. Records carry a
//! color bitmask filled in by the element's coloring pass.

use crate::header::{Header, Tag};

/// Comparison flag bits, matching the rpm sense flags.
pub const DEP_LESS: u32 = 1 << 1;
pub const DEP_GREATER: u32 = 1 << 2;
pub const DEP_EQUAL: u32 = 1 << 3;

const DEP_CMP_MASK: u32 = DEP_LESS | DEP_GREATER | DEP_EQUAL;

/// The nine dependency kinds an element carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
    Order,
    Recommends,
    Suggests,
    Supplements,
    Enhances,
}

impl DepKind {
    pub const ALL: [DepKind; 9] = [
        DepKind::Provides,
        DepKind::Requires,
        DepKind::Conflicts,
        DepKind::Obsoletes,
        DepKind::Order,
        DepKind::Recommends,
        DepKind::Suggests,
        DepKind::Supplements,
        DepKind::Enhances,
    ];

    /// One-character type tag; doubles as the kind byte in packed per-file
    /// dependency references and as the first character of a formatted
    /// record.
    pub fn type_char(self) -> char {
        match self {
            DepKind::Provides => 'P',
            DepKind::Requires => 'R',
            DepKind::Conflicts => 'C',
            DepKind::Obsoletes => 'O',
            DepKind::Order => 'o',
            DepKind::Recommends => 'r',
            DepKind::Suggests => 's',
            DepKind::Supplements => 'S',
            DepKind::Enhances => 'e',
        }
    }

    fn tags(self) -> (Tag, Tag, Tag) {
        match self {
            DepKind::Provides => (Tag::ProvideName, Tag::ProvideVersion, Tag::ProvideFlags),
            DepKind::Requires => (Tag::RequireName, Tag::RequireVersion, Tag::RequireFlags),
            DepKind::Conflicts => (Tag::ConflictName, Tag::ConflictVersion, Tag::ConflictFlags),
            DepKind::Obsoletes => (Tag::ObsoleteName, Tag::ObsoleteVersion, Tag::ObsoleteFlags),
            DepKind::Order => (Tag::OrderName, Tag::OrderVersion, Tag::OrderFlags),
            DepKind::Recommends => {
                (Tag::RecommendName, Tag::RecommendVersion, Tag::RecommendFlags)
            }
            DepKind::Suggests => (Tag::SuggestName, Tag::SuggestVersion, Tag::SuggestFlags),
            DepKind::Supplements => (
                Tag::SupplementName,
                Tag::SupplementVersion,
                Tag::SupplementFlags,
            ),
            DepKind::Enhances => (Tag::EnhanceName, Tag::EnhanceVersion, Tag::EnhanceFlags),
        }
    }
}

/// Pack a per-file dependency reference: kind tag in the high byte,
/// 24-bit record index in the low bits.
pub fn pack_depref(kind: DepKind, index: u32) -> u32 {
    ((kind.type_char() as u32) << 24) | (index & 0x00ff_ffff)
}

/// Kind byte of a packed reference.
pub fn depref_kind(packed: u32) -> char {
    (((packed >> 24) & 0xff) as u8) as char
}

/// Record index of a packed reference.
pub fn depref_index(packed: u32) -> usize {
    (packed & 0x00ff_ffff) as usize
}

/// A single dependency record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepRecord {
    pub name: String,
    pub evr: String,
    pub flags: u32,
    color: u32,
}

impl DepRecord {
    pub fn color(&self) -> u32 {
        self.color
    }
}

/// An ordered set of dependency records of one kind.
#[derive(Debug, Clone)]
pub struct DependencySet {
    kind: DepKind,
    records: Vec<DepRecord>,
    instance: u32,
}

impl DependencySet {
    /// Build from the header's parallel triple tags. A missing name tag
    /// yields an empty set; version/flags entries default when shorter.
    pub fn from_header(h: &Header, kind: DepKind) -> Self {
        let (name_tag, version_tag, flags_tag) = kind.tags();
        let names = h.get_str_vec(name_tag).unwrap_or(&[]);
        let versions = h.get_str_vec(version_tag).unwrap_or(&[]);
        let flags = h.get_u32_vec(flags_tag).unwrap_or(&[]);

        let records = names
            .iter()
            .enumerate()
            .map(|(i, name)| DepRecord {
                name: name.clone(),
                evr: versions.get(i).cloned().unwrap_or_default(),
                flags: flags.get(i).copied().unwrap_or(0),
                color: 0,
            })
            .collect();

        Self {
            kind,
            records,
            instance: h.instance(),
        }
    }

    /// The element's own identity as an "equals" provide, used for
    /// self-matching during resolution.
    pub fn this_provide(name: &str, evr: &str, instance: u32) -> Self {
        Self {
            kind: DepKind::Provides,
            records: vec![DepRecord {
                name: name.to_string(),
                evr: evr.to_string(),
                flags: DEP_EQUAL,
                color: 0,
            }],
            instance,
        }
    }

    pub fn empty(kind: DepKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            instance: 0,
        }
    }

    pub fn kind(&self) -> DepKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Header instance of the package this set came from.
    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn record(&self, index: usize) -> Option<&DepRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DepRecord> {
        self.records.iter()
    }

    pub fn color(&self, index: usize) -> u32 {
        self.records.get(index).map_or(0, DepRecord::color)
    }

    pub fn set_color(&mut self, index: usize, color: u32) {
        if let Some(rec) = self.records.get_mut(index) {
            rec.color = color;
        }
    }

    /// Format a record as "<type char> <name> [<op> <evr>]", e.g.
    /// "R glibc >= 2.34". The first character is the kind's type tag.
    pub fn format_record(&self, index: usize) -> Option<String> {
        let rec = self.records.get(index)?;
        let mut out = format!("{} {}", self.kind.type_char(), rec.name);
        if rec.flags & DEP_CMP_MASK != 0 && !rec.evr.is_empty() {
            out.push(' ');
            if rec.flags & DEP_LESS != 0 {
                out.push('<');
            }
            if rec.flags & DEP_GREATER != 0 {
                out.push('>');
            }
            if rec.flags & DEP_EQUAL != 0 {
                out.push('=');
            }
            out.push(' ');
            out.push_str(&rec.evr);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Value;

    fn header_with_requires() -> Header {
        let mut h = Header::new();
        h.insert(
            Tag::RequireName,
            Value::StrVec(vec!["glibc".to_string(), "openssl-libs".to_string()]),
        );
        h.insert(
            Tag::RequireVersion,
            Value::StrVec(vec!["2.34".to_string(), String::new()]),
        );
        h.insert(
            Tag::RequireFlags,
            Value::U32Vec(vec![DEP_GREATER | DEP_EQUAL, 0]),
        );
        h
    }

    #[test]
    fn test_from_header_builds_ordered_records() {
        let ds = DependencySet::from_header(&header_with_requires(), DepKind::Requires);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.record(0).unwrap().name, "glibc");
        assert_eq!(ds.record(1).unwrap().name, "openssl-libs");
    }

    #[test]
    fn test_missing_tag_yields_empty_set() {
        let ds = DependencySet::from_header(&Header::new(), DepKind::Conflicts);
        assert!(ds.is_empty());
    }

    #[test]
    fn test_format_record_with_comparison() {
        let ds = DependencySet::from_header(&header_with_requires(), DepKind::Requires);
        assert_eq!(ds.format_record(0).unwrap(), "R glibc >= 2.34");
        assert_eq!(ds.format_record(1).unwrap(), "R openssl-libs");
        assert!(ds.format_record(2).is_none());
    }

    #[test]
    fn test_this_provide_is_an_equals_record() {
        let ds = DependencySet::this_provide("nginx", "1:1.21.0-3", 7);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.kind(), DepKind::Provides);
        assert_eq!(ds.instance(), 7);
        assert_eq!(ds.format_record(0).unwrap(), "P nginx = 1:1.21.0-3");
    }

    #[test]
    fn test_depref_round_trip() {
        let packed = pack_depref(DepKind::Requires, 2);
        assert_eq!(depref_kind(packed), 'R');
        assert_eq!(depref_index(packed), 2);

        // Index wider than 24 bits is truncated by the packing
        let wide = pack_depref(DepKind::Provides, 0x0100_0005);
        assert_eq!(depref_index(wide), 5);
    }

    #[test]
    fn test_color_set_and_get() {
        let mut ds = DependencySet::from_header(&header_with_requires(), DepKind::Requires);
        ds.set_color(1, 0x2);
        assert_eq!(ds.color(1), 0x2);
        assert_eq!(ds.color(0), 0);
        // Out-of-range set is ignored
        ds.set_color(9, 0x1);
        assert_eq!(ds.color(9), 0);
    }
}
