// src/header/rpm.rs

//! Conversion from on-disk RPM packages to the in-memory header model

use crate::deps::{DEP_EQUAL, DEP_GREATER, DEP_LESS};
use crate::error::{Error, Result};
use crate::header::{Header, Tag, Value};
use rpm::Package;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Comparison bits shared with the rpm wire format.
const DEP_CMP_MASK: u32 = DEP_LESS | DEP_GREATER | DEP_EQUAL;

impl Header {
    /// Parse a `.rpm` file and convert its metadata into a header.
    pub fn from_rpm_file(path: &Path) -> Result<Self> {
        debug!("Parsing RPM package: {}", path.display());

        let file = File::open(path)
            .map_err(|e| Error::Package(format!("failed to open {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        let pkg = Package::parse(&mut reader)
            .map_err(|e| Error::Package(format!("failed to parse {}: {}", path.display(), e)))?;

        Self::from_rpm_package(&pkg)
    }

    /// Build a header from an already-parsed RPM package.
    pub fn from_rpm_package(pkg: &Package) -> Result<Self> {
        let mut h = Header::new();

        let name = pkg
            .metadata
            .get_name()
            .map_err(|e| Error::Package(format!("failed to get package name: {}", e)))?;
        let version = pkg
            .metadata
            .get_version()
            .map_err(|e| Error::Package(format!("failed to get package version: {}", e)))?;
        let release = pkg
            .metadata
            .get_release()
            .map_err(|e| Error::Package(format!("failed to get package release: {}", e)))?;

        h.insert(Tag::Name, Value::Str(name.to_string()));
        h.insert(Tag::Version, Value::Str(version.to_string()));
        h.insert(Tag::Release, Value::Str(release.to_string()));

        if let Ok(epoch) = pkg.metadata.get_epoch() {
            h.insert(Tag::Epoch, Value::U32(epoch as u32));
        }
        if let Ok(arch) = pkg.metadata.get_arch() {
            h.insert(Tag::Arch, Value::Str(arch.to_string()));
        }
        // The rpm crate does not expose the OS tag; every package this
        // parser accepts is a Linux one.
        h.insert(Tag::Os, Value::Str("linux".to_string()));

        if pkg.metadata.is_source_package() {
            h.insert(Tag::SourcePackage, Value::U32(1));
        }

        insert_deps(
            &mut h,
            pkg.metadata.get_provides().ok(),
            Tag::ProvideName,
            Tag::ProvideVersion,
            Tag::ProvideFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_requires().ok(),
            Tag::RequireName,
            Tag::RequireVersion,
            Tag::RequireFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_conflicts().ok(),
            Tag::ConflictName,
            Tag::ConflictVersion,
            Tag::ConflictFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_obsoletes().ok(),
            Tag::ObsoleteName,
            Tag::ObsoleteVersion,
            Tag::ObsoleteFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_recommends().ok(),
            Tag::RecommendName,
            Tag::RecommendVersion,
            Tag::RecommendFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_suggests().ok(),
            Tag::SuggestName,
            Tag::SuggestVersion,
            Tag::SuggestFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_supplements().ok(),
            Tag::SupplementName,
            Tag::SupplementVersion,
            Tag::SupplementFlags,
        );
        insert_deps(
            &mut h,
            pkg.metadata.get_enhances().ok(),
            Tag::EnhanceName,
            Tag::EnhanceVersion,
            Tag::EnhanceFlags,
        );

        insert_files(&mut h, pkg);

        debug!(
            "Converted RPM header: {}-{}-{} ({} files)",
            name,
            version,
            release,
            h.file_count()
        );

        Ok(h)
    }
}

fn insert_deps(
    h: &mut Header,
    deps: Option<Vec<rpm::Dependency>>,
    name_tag: Tag,
    version_tag: Tag,
    flags_tag: Tag,
) {
    let Some(deps) = deps else { return };
    if deps.is_empty() {
        return;
    }

    let mut names = Vec::with_capacity(deps.len());
    let mut versions = Vec::with_capacity(deps.len());
    let mut flags = Vec::with_capacity(deps.len());
    for dep in &deps {
        names.push(dep.name.clone());
        versions.push(dep.version.clone());
        flags.push(dep.flags.bits() & DEP_CMP_MASK);
    }

    h.insert(name_tag, Value::StrVec(names));
    h.insert(version_tag, Value::StrVec(versions));
    h.insert(flags_tag, Value::U32Vec(flags));
}

fn insert_files(h: &mut Header, pkg: &Package) {
    let Ok(entries) = pkg.metadata.get_file_entries() else {
        return;
    };
    if entries.is_empty() {
        return;
    }

    let mut basenames = Vec::with_capacity(entries.len());
    let mut dirnames: Vec<String> = Vec::new();
    let mut dirindexes = Vec::with_capacity(entries.len());
    let mut digests = Vec::with_capacity(entries.len());
    let mut have_digest = false;

    for entry in &entries {
        let path = entry.path.to_string_lossy().to_string();
        let (dir, base) = match path.rfind('/') {
            Some(idx) => (path[..=idx].to_string(), path[idx + 1..].to_string()),
            None => (String::new(), path.clone()),
        };
        let dir_idx = match dirnames.iter().position(|d| *d == dir) {
            Some(idx) => idx,
            None => {
                dirnames.push(dir);
                dirnames.len() - 1
            }
        };
        basenames.push(base);
        dirindexes.push(dir_idx as u32);

        let digest = entry
            .digest
            .as_ref()
            .map(|d| format!("{}", d))
            .unwrap_or_default();
        if !digest.is_empty() {
            have_digest = true;
        }
        digests.push(digest);
    }

    h.insert(Tag::BaseNames, Value::StrVec(basenames));
    h.insert(Tag::DirNames, Value::StrVec(dirnames));
    h.insert(Tag::DirIndexes, Value::U32Vec(dirindexes));
    if have_digest {
        h.insert(Tag::FileDigests, Value::StrVec(digests));
        // get_file_entries() only yields digests for v4 packages, which
        // carry sha256 file digests
        h.insert(Tag::FileDigestAlgo, Value::U32(8));
    }
}
