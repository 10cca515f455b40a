// src/transaction/element.rs

//! Transaction elements
//!
//! One element per package participating in a transaction. The element
//! owns the package's identity, dependency sets, file info, relocation
//! table and problem list; the header and payload stream are transient,
//! held only between `open` and `close` on the owning transaction.

use std::any::Any;
use std::io::Read;
use std::rc::Rc;

use tracing::{error, warn};

use crate::deps::{DepKind, DependencySet, depref_index, depref_kind};
use crate::error::{Error, Result};
use crate::files::{FI_ERASE, FI_INSTALL, FileInfoSet, FileStates};
use crate::header::{Header, Tag};
use crate::reloc::{Relocation, RelocationTable, Relocator};
use crate::transaction::problems::ProblemSet;
use crate::transaction::{ElementId, PackageGoal, PayloadHandle, SortHandle};

/// Reserved pseudo-package name for imported public keys. Such packages
/// may only ever appear as erasable database entries.
pub const GPG_PUBKEY: &str = "gpg-pubkey";

// Framing overhead of the lead and signature regions, pinned to the v4
// package container layout.
const LEAD_SIZE: u64 = 96;
const SIG_REGION_SIZE: u64 = 256;

/// Trans-script presence bits.
pub const HAVE_PRETRANS: u8 = 1 << 0;
pub const HAVE_POSTTRANS: u8 = 1 << 1;
pub const HAVE_PREUNTRANS: u8 = 1 << 2;
pub const HAVE_POSTUNTRANS: u8 = 1 << 3;

/// Fixed role of an element within the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// To be installed.
    Added,
    /// To be erased.
    Removed,
    /// Already installed, present for reference only.
    DbResident,
    /// Being returned to a prior state.
    Restored,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Added => "install",
            Disposition::Removed => "erase",
            Disposition::DbResident => "db-resident",
            Disposition::Restored => "restored",
        }
    }
}

/// Verification status of an install element's package file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyStatus {
    #[default]
    Unverified,
    Verified,
    Failed,
}

/// Disposition-specific payload. Only install elements carry a retrieval
/// key, relocations, a payload stream and a package file size.
enum DispositionState {
    Added {
        key: Option<String>,
        relocations: RelocationTable,
        payload: Option<PayloadHandle>,
        verified: VerifyStatus,
        pkg_file_size: u64,
    },
    Removed,
    DbResident,
    Restored,
}

/// A single package instance to be installed or removed atomically.
pub struct TransactionElement {
    state: DispositionState,

    name: String,
    epoch: Option<String>,
    version: String,
    release: String,
    arch: Option<String>,
    os: Option<String>,
    nevr: String,
    nevra: String,
    is_source: bool,

    header: Option<Rc<Header>>,
    header_size: u32,
    db_instance: u32,

    this_ds: DependencySet,
    provides: DependencySet,
    requires: DependencySet,
    conflicts: DependencySet,
    obsoletes: DependencySet,
    order: DependencySet,
    recommends: DependencySet,
    suggests: DependencySet,
    supplements: DependencySet,
    enhances: DependencySet,

    files: Option<FileInfoSet>,
    file_states: FileStates,
    color: u32,

    trans_scripts: u8,
    failed: u32,
    problems: ProblemSet,

    depends_on: Option<ElementId>,
    parent: Option<ElementId>,
    ordering_info: Option<SortHandle>,
    user_data: Option<Box<dyn Any>>,
}

impl TransactionElement {
    /// Initialize an element from a header. The header is only borrowed:
    /// everything the element needs is extracted here, and relocation may
    /// rewrite the header's path metadata in place.
    pub(crate) fn new(
        relocator: &dyn Relocator,
        h: &mut Header,
        disposition: Disposition,
        key: Option<String>,
        reloc_spec: Option<&[Relocation]>,
    ) -> Result<Self> {
        // name, version and release are required in all packages
        let name = h
            .get_str(Tag::Name)
            .ok_or(Error::MissingIdentity("name"))?
            .to_string();
        let version = h
            .get_str(Tag::Version)
            .ok_or(Error::MissingIdentity("version"))?
            .to_string();
        let release = h
            .get_str(Tag::Release)
            .ok_or(Error::MissingIdentity("release"))?
            .to_string();

        let epoch = h.get_num(Tag::Epoch).map(|e| e.to_string());
        let arch = h.get_str(Tag::Arch).map(str::to_string);
        let os = h.get_str(Tag::Os).map(str::to_string);

        // Imported public keys are the one package allowed to miss both
        let exempt = matches!(disposition, Disposition::Removed | Disposition::DbResident)
            && name == GPG_PUBKEY;
        if (arch.is_none() || os.is_none()) && !exempt {
            return Err(Error::MissingArchOs(name));
        }

        if disposition != Disposition::Removed && name == GPG_PUBKEY {
            error!(
                "public keys can not be installed as gpg-pubkey packages; \
                 use the key import command for that"
            );
            return Err(Error::PubkeyInstall);
        }

        let is_source = h.is_source();

        let evr = match &epoch {
            Some(e) => format!("{}:{}-{}", e, version, release),
            None => format!("{}-{}", version, release),
        };
        let nevr = format!("{}-{}", name, evr);
        let nevra = match &arch {
            Some(a) => format!("{}.{}", nevr, a),
            None => nevr.clone(),
        };

        let relocations = match (disposition, reloc_spec) {
            (Disposition::Added, Some(spec)) => relocator.build(h, spec),
            _ => RelocationTable::empty(),
        };

        let db_instance = h.instance();
        let header_size = h.size();
        let pkg_file_size = if disposition == Disposition::Added {
            h.get_num(Tag::LongSigSize).unwrap_or(0) + LEAD_SIZE + SIG_REGION_SIZE
        } else {
            0
        };

        let this_ds = DependencySet::this_provide(&name, &evr, db_instance);
        let provides = DependencySet::from_header(h, DepKind::Provides);
        let requires = DependencySet::from_header(h, DepKind::Requires);
        let conflicts = DependencySet::from_header(h, DepKind::Conflicts);
        let obsoletes = DependencySet::from_header(h, DepKind::Obsoletes);
        let order = DependencySet::from_header(h, DepKind::Order);
        let recommends = DependencySet::from_header(h, DepKind::Recommends);
        let suggests = DependencySet::from_header(h, DepKind::Suggests);
        let supplements = DependencySet::from_header(h, DepKind::Supplements);
        let enhances = DependencySet::from_header(h, DepKind::Enhances);

        // Relocation needs the file count before the file info is built
        let mut file_states = FileStates::new(
            h.file_count(),
            matches!(disposition, Disposition::Added | Disposition::Restored),
        );
        let files = Self::build_files(
            relocator,
            h,
            disposition,
            is_source,
            &relocations,
            &mut file_states,
            &nevra,
        )?;

        let mut trans_scripts = 0u8;
        if h.has(Tag::PreTrans) || h.has(Tag::PreTransProg) {
            trans_scripts |= HAVE_PRETRANS;
        }
        if h.has(Tag::PostTrans) || h.has(Tag::PostTransProg) {
            trans_scripts |= HAVE_POSTTRANS;
        }
        if h.has(Tag::PreUnTrans) || h.has(Tag::PreUnTransProg) {
            trans_scripts |= HAVE_PREUNTRANS;
        }
        if h.has(Tag::PostUnTrans) || h.has(Tag::PostUnTransProg) {
            trans_scripts |= HAVE_POSTUNTRANS;
        }

        let state = match disposition {
            Disposition::Added => DispositionState::Added {
                key,
                relocations,
                payload: None,
                verified: VerifyStatus::Unverified,
                pkg_file_size,
            },
            Disposition::Removed => DispositionState::Removed,
            Disposition::DbResident => DispositionState::DbResident,
            Disposition::Restored => DispositionState::Restored,
        };

        let mut te = Self {
            state,
            name,
            epoch,
            version,
            release,
            arch,
            os,
            nevr,
            nevra,
            is_source,
            header: None,
            header_size,
            db_instance,
            this_ds,
            provides,
            requires,
            conflicts,
            obsoletes,
            order,
            recommends,
            suggests,
            supplements,
            enhances,
            files: Some(files),
            file_states,
            color: 0,
            trans_scripts,
            failed: 0,
            problems: ProblemSet::new(),
            depends_on: None,
            parent: None,
            ordering_info: None,
            user_data: None,
        };

        te.color_ds(DepKind::Provides);
        te.color_ds(DepKind::Requires);

        Ok(te)
    }

    /// Build the file info set, relocating path metadata first when the
    /// element installs files and the header has not been relocated yet.
    fn build_files(
        relocator: &dyn Relocator,
        h: &mut Header,
        disposition: Disposition,
        is_source: bool,
        relocations: &RelocationTable,
        states: &mut FileStates,
        nevra: &str,
    ) -> Result<FileInfoSet> {
        let flags = match disposition {
            Disposition::Added | Disposition::Restored => FI_INSTALL,
            Disposition::Removed | Disposition::DbResident => FI_ERASE,
        };

        if disposition == Disposition::Added && h.file_count() > 0 && !h.has(Tag::OrigBaseNames) {
            if is_source {
                // Unlike binary packages, source relocation can fail
                relocator.relocate_source_list(h)?;
            } else if !relocations.is_empty() {
                relocator.relocate_file_list(h, relocations, states);
            }
        }

        // Packages with no files yield an empty set; None is an error
        FileInfoSet::from_header(h, Tag::BaseNames, flags)
            .ok_or_else(|| Error::FileInfo(nevra.to_string()))
    }

    /// Recompute the file info set from a freshly obtained header. This is
    /// the one place an already-constructed element can still fail.
    pub(crate) fn reload_files(&mut self, relocator: &dyn Relocator, h: &mut Header) -> bool {
        let relocations = match &self.state {
            DispositionState::Added { relocations, .. } => relocations.clone(),
            _ => RelocationTable::empty(),
        };
        match Self::build_files(
            relocator,
            h,
            self.disposition(),
            self.is_source,
            &relocations,
            &mut self.file_states,
            &self.nevra,
        ) {
            Ok(files) => {
                self.files = Some(files);
                true
            }
            Err(e) => {
                warn!("failed to reload file info for {}: {}", self.nevra, e);
                self.files = None;
                false
            }
        }
    }

    /// Compute per-record colors for one dependency kind by scanning the
    /// file set's packed dependency references. Each reference carries the
    /// kind tag in its high byte and a 24-bit record index; a reference
    /// outside the record count is an invariant violation in the header.
    fn color_ds(&mut self, kind: DepKind) {
        let count = self.ds(kind).len();
        if count == 0 {
            return;
        }

        let mut colors = vec![0u32; count];
        {
            let Some(files) = self.files.as_ref() else {
                return;
            };
            if files.is_empty() {
                return;
            }
            let dt = kind.type_char();
            for file in files.iter() {
                for &packed in &file.depends {
                    if depref_kind(packed) != dt {
                        continue;
                    }
                    let ix = depref_index(packed);
                    assert!(ix < count, "file dependency index out of range");
                    colors[ix] |= file.color;
                }
            }
        }

        for (i, &val) in colors.iter().enumerate() {
            self.color |= val;
            self.ds_mut(kind).set_color(i, val);
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.state {
            DispositionState::Added { .. } => Disposition::Added,
            DispositionState::Removed => Disposition::Removed,
            DispositionState::DbResident => Disposition::DbResident,
            DispositionState::Restored => Disposition::Restored,
        }
    }

    pub fn type_str(&self) -> &'static str {
        self.disposition().as_str()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> Option<&str> {
        self.epoch.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
    }

    pub fn os(&self) -> Option<&str> {
        self.os.as_deref()
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn nevr(&self) -> &str {
        &self.nevr
    }

    pub fn nevra(&self) -> &str {
        &self.nevra
    }

    /// Epoch-version-release portion of the identity.
    pub fn evr(&self) -> &str {
        &self.nevr[self.name.len() + 1..]
    }

    /// Retrieval key, only meaningful for install elements.
    pub fn key(&self) -> Option<&str> {
        match &self.state {
            DispositionState::Added { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// Approximate package file size in bytes; zero except for installs.
    pub fn pkg_file_size(&self) -> u64 {
        match self.state {
            DispositionState::Added { pkg_file_size, .. } => pkg_file_size,
            _ => 0,
        }
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    /// Replace the accumulated color, returning the previous value.
    pub fn set_color(&mut self, color: u32) -> u32 {
        std::mem::replace(&mut self.color, color)
    }

    pub fn db_instance(&self) -> u32 {
        self.db_instance
    }

    pub fn set_db_instance(&mut self, instance: u32) {
        self.db_instance = instance;
    }

    /// The element's own identity as an "equals" provide.
    pub fn this_ds(&self) -> &DependencySet {
        &self.this_ds
    }

    pub fn ds(&self, kind: DepKind) -> &DependencySet {
        match kind {
            DepKind::Provides => &self.provides,
            DepKind::Requires => &self.requires,
            DepKind::Conflicts => &self.conflicts,
            DepKind::Obsoletes => &self.obsoletes,
            DepKind::Order => &self.order,
            DepKind::Recommends => &self.recommends,
            DepKind::Suggests => &self.suggests,
            DepKind::Supplements => &self.supplements,
            DepKind::Enhances => &self.enhances,
        }
    }

    pub(crate) fn ds_mut(&mut self, kind: DepKind) -> &mut DependencySet {
        match kind {
            DepKind::Provides => &mut self.provides,
            DepKind::Requires => &mut self.requires,
            DepKind::Conflicts => &mut self.conflicts,
            DepKind::Obsoletes => &mut self.obsoletes,
            DepKind::Order => &mut self.order,
            DepKind::Recommends => &mut self.recommends,
            DepKind::Suggests => &mut self.suggests,
            DepKind::Supplements => &mut self.supplements,
            DepKind::Enhances => &mut self.enhances,
        }
    }

    /// Drop every dependency set as a unit, once ordering no longer needs
    /// them.
    pub fn clean_deps(&mut self) {
        self.this_ds = DependencySet::empty(DepKind::Provides);
        for kind in DepKind::ALL {
            *self.ds_mut(kind) = DependencySet::empty(kind);
        }
    }

    pub fn files(&self) -> Option<&FileInfoSet> {
        self.files.as_ref()
    }

    /// Discard the file info set; the state tracker stays.
    pub fn clean_files(&mut self) {
        self.files = None;
    }

    pub fn file_states(&self) -> &FileStates {
        &self.file_states
    }

    pub fn file_states_mut(&mut self) -> &mut FileStates {
        &mut self.file_states
    }

    pub fn header(&self) -> Option<Rc<Header>> {
        self.header.clone()
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    pub fn set_header(&mut self, h: Option<Rc<Header>>) {
        self.header = h;
    }

    pub fn trans_scripts(&self) -> u8 {
        self.trans_scripts
    }

    /// Whether the element has the scriptlet a script-stage goal needs.
    /// Non-script goals are never filtered.
    pub fn have_trans_script(&self, goal: PackageGoal) -> bool {
        match goal {
            PackageGoal::PreTrans => self.trans_scripts & HAVE_PRETRANS != 0,
            PackageGoal::PostTrans => self.trans_scripts & HAVE_POSTTRANS != 0,
            PackageGoal::PreUnTrans => self.trans_scripts & HAVE_PREUNTRANS != 0,
            PackageGoal::PostUnTrans => self.trans_scripts & HAVE_POSTUNTRANS != 0,
            _ => true,
        }
    }

    /// Cumulative failure count; zero means untouched.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn is_failed(&self) -> bool {
        self.failed > 0
    }

    pub(crate) fn bump_failed(&mut self) {
        self.failed = self.failed.saturating_add(1);
    }

    pub fn problems(&self) -> &ProblemSet {
        &self.problems
    }

    pub(crate) fn problems_mut(&mut self) -> &mut ProblemSet {
        &mut self.problems
    }

    pub fn clean_problems(&mut self) {
        self.problems.clear();
    }

    /// Relocation table, only present on install elements.
    pub fn relocations(&self) -> Option<&RelocationTable> {
        match &self.state {
            DispositionState::Added { relocations, .. } => Some(relocations),
            _ => None,
        }
    }

    pub fn verified(&self) -> VerifyStatus {
        match self.state {
            DispositionState::Added { verified, .. } => verified,
            _ => VerifyStatus::Unverified,
        }
    }

    pub fn set_verified(&mut self, status: VerifyStatus) {
        if let DispositionState::Added { verified, .. } = &mut self.state {
            *verified = status;
        }
    }

    pub(crate) fn set_payload(&mut self, fd: Option<PayloadHandle>) {
        if let DispositionState::Added { payload, .. } = &mut self.state {
            *payload = fd;
        }
    }

    pub(crate) fn payload_mut(&mut self) -> Option<&mut PayloadHandle> {
        match &mut self.state {
            DispositionState::Added { payload, .. } => payload.as_mut(),
            _ => None,
        }
    }

    pub fn has_payload(&self) -> bool {
        matches!(
            &self.state,
            DispositionState::Added {
                payload: Some(_),
                ..
            }
        )
    }

    /// Take the payload stream, wrapped in the decompressor named by the
    /// header's payload-compressor tag (gzip when unnamed).
    pub fn take_payload(&mut self) -> Option<Box<dyn Read>> {
        let compressor = self
            .header
            .as_ref()
            .and_then(|h| h.get_str(Tag::PayloadCompressor))
            .unwrap_or("gzip")
            .to_string();
        let DispositionState::Added { payload, .. } = &mut self.state else {
            return None;
        };
        let fd = payload.take()?;
        let stream: Box<dyn Read> = match compressor.as_str() {
            "zstd" => Box::new(zstd::stream::read::Decoder::new(fd).ok()?),
            "xz" | "lzma" => Box::new(xz2::read::XzDecoder::new(fd)),
            _ => Box::new(flate2::read::GzDecoder::new(fd)),
        };
        Some(stream)
    }

    /// The element whose removal/obsolescence enables this one; used only
    /// for failure cascading.
    pub fn depends_on(&self) -> Option<ElementId> {
        self.depends_on
    }

    pub fn set_depends_on(&mut self, id: Option<ElementId>) {
        self.depends_on = id;
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn set_parent(&mut self, id: Option<ElementId>) -> Option<ElementId> {
        std::mem::replace(&mut self.parent, id)
    }

    /// Opaque ordering handle owned by the external sorter; stored and
    /// returned unmodified.
    pub fn ordering_info(&self) -> Option<SortHandle> {
        self.ordering_info
    }

    pub fn set_ordering_info(&mut self, handle: Option<SortHandle>) {
        self.ordering_info = handle;
    }

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    pub fn set_user_data(&mut self, data: Option<Box<dyn Any>>) {
        self.user_data = data;
    }
}
