// src/transaction/mod.rs

//! Transaction engine
//!
//! The [`Transaction`] owns every element in an arena and hands out plain
//! index ids. All cross-element references (failure cascades, parents)
//! are ids into the arena, so elements never point at each other
//! directly.

pub mod element;
pub mod problems;

use std::io::Read;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::db::HeaderStore;
use crate::deps::DepKind;
use crate::error::Result;
use crate::header::{Header, PackageReader, ReadStatus, VSFLAG_NEED_PAYLOAD};
use crate::reloc::{DefaultRelocator, Relocation, Relocator};

pub use element::{Disposition, TransactionElement, VerifyStatus};
pub use problems::{Problem, ProblemKind, ProblemSet};

/// Index of an element in the transaction arena.
pub type ElementId = usize;

/// Open package file stream, as handed over by the driver's callback.
pub type PayloadHandle = Box<dyn Read>;

/// Opaque per-element handle owned by the external ordering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortHandle(pub u64);

/// Dry run: evaluate and report, touch nothing on disk.
pub const TRANS_FLAG_TEST: u32 = 1 << 0;

/// Events reported to the driver callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    /// The engine needs the element's package file opened.
    InstOpenFile,
    /// The engine is done with the element's package file.
    InstCloseFile,
    /// An element is about to be processed; amount/total carry its
    /// position in the run.
    ElemProgress,
}

/// Driver callback for payload lifecycle and progress.
pub trait TransactionNotify {
    /// For `InstOpenFile` the return value is the opened package stream;
    /// other events ignore it.
    fn notify(
        &mut self,
        te: &TransactionElement,
        event: CallbackEvent,
        amount: u64,
        total: u64,
    ) -> Option<PayloadHandle>;
}

/// What [`Transaction::process`] is asked to do with an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageGoal {
    Install,
    Erase,
    Restore,
    PreTrans,
    PostTrans,
    PreUnTrans,
    PostUnTrans,
}

impl PackageGoal {
    /// Script stages run collection scriptlets rather than package
    /// contents.
    pub fn is_script_stage(self) -> bool {
        !matches!(
            self,
            PackageGoal::Install | PackageGoal::Erase | PackageGoal::Restore
        )
    }
}

/// Executes the actual package work once the engine has the element open.
pub trait PackageExecutor {
    /// Returns true when the element failed.
    fn run(&mut self, te: &mut TransactionElement, goal: PackageGoal) -> bool;
}

/// Arena of transaction elements plus the collaborators they need.
pub struct Transaction {
    elements: Vec<TransactionElement>,
    store: Option<Box<dyn HeaderStore>>,
    notify: Option<Box<dyn TransactionNotify>>,
    reader: Option<Box<dyn PackageReader>>,
    relocator: Box<dyn Relocator>,
    flags: u32,
    vs_flags: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            store: None,
            notify: None,
            reader: None,
            relocator: Box::new(DefaultRelocator::default()),
            flags: 0,
            vs_flags: 0,
        }
    }

    pub fn set_store(&mut self, store: Box<dyn HeaderStore>) {
        self.store = Some(store);
    }

    pub fn set_notify(&mut self, notify: Box<dyn TransactionNotify>) {
        self.notify = Some(notify);
    }

    pub fn set_reader(&mut self, reader: Box<dyn PackageReader>) {
        self.reader = Some(reader);
    }

    pub fn set_relocator(&mut self, relocator: Box<dyn Relocator>) {
        self.relocator = relocator;
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_vs_flags(&mut self, vs_flags: u32) {
        self.vs_flags = vs_flags;
    }

    /// Construct an element from a header and add it to the arena.
    pub fn add(
        &mut self,
        h: &mut Header,
        disposition: Disposition,
        key: Option<String>,
        relocations: Option<&[Relocation]>,
    ) -> Result<ElementId> {
        let te = TransactionElement::new(self.relocator.as_ref(), h, disposition, key, relocations)?;
        debug!("adding {} element {}", te.type_str(), te.nevra());
        self.elements.push(te);
        Ok(self.elements.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, id: ElementId) -> Option<&TransactionElement> {
        self.elements.get(id)
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut TransactionElement> {
        self.elements.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionElement> {
        self.elements.iter()
    }

    pub fn iter_by_disposition(
        &self,
        disposition: Disposition,
    ) -> impl Iterator<Item = &TransactionElement> {
        self.elements
            .iter()
            .filter(move |te| te.disposition() == disposition)
    }

    /// Record a failure on an element and cascade it to erasures that were
    /// enabled by it. Only the first failure of an element propagates, so
    /// dependency cycles terminate. Returns the element's failure count.
    pub fn mark_failed(&mut self, id: ElementId) -> u32 {
        let mut worklist = vec![id];
        while let Some(cur) = worklist.pop() {
            let Some(te) = self.elements.get_mut(cur) else {
                continue;
            };
            te.bump_failed();
            if te.failed() != 1 {
                continue;
            }
            for (other, te) in self.elements.iter().enumerate() {
                if te.disposition() == Disposition::Removed && te.depends_on() == Some(cur) {
                    worklist.push(other);
                }
            }
        }
        self.elements.get(id).map_or(0, |te| te.failed())
    }

    fn append_problem(&mut self, id: ElementId, problem: Problem) {
        let Some(te) = self.elements.get_mut(id) else {
            return;
        };
        if te.problems_mut().append_unique(problem) {
            self.mark_failed(id);
        }
    }

    /// Attach a problem to an element. A duplicate of an already recorded
    /// problem neither grows the list nor counts as a new failure.
    pub fn add_problem(
        &mut self,
        id: ElementId,
        kind: ProblemKind,
        alt_nevr: Option<String>,
        msg: String,
        number: u64,
    ) {
        let Some(te) = self.elements.get(id) else {
            return;
        };
        let key = te.key().map(str::to_string);
        self.append_problem(
            id,
            Problem {
                kind,
                key,
                alt_nevr,
                msg,
                number,
            },
        );
    }

    /// Attach a dependency problem derived from one record of one of the
    /// element's dependency sets. The problem kind follows the record's
    /// set, and the number is the set's header instance.
    pub fn add_dep_problem(
        &mut self,
        id: ElementId,
        alt_nevr: Option<String>,
        kind: DepKind,
        record: usize,
        suggested_key: Option<&str>,
    ) {
        let Some(te) = self.elements.get(id) else {
            return;
        };
        let ds = te.ds(kind);
        let Some(text) = ds.format_record(record) else {
            return;
        };
        let number = ds.instance() as u64;
        let problem_kind = match text.chars().next() {
            Some('O') => ProblemKind::Obsoletes,
            Some('C') => ProblemKind::Conflict,
            _ => ProblemKind::Requires,
        };
        let key = suggested_key.map(str::to_string);
        let msg = text.get(2..).unwrap_or("").to_string();
        self.append_problem(
            id,
            Problem {
                kind: problem_kind,
                key,
                alt_nevr,
                msg,
                number,
            },
        );
    }

    /// Record one problem per relocation that did not apply to the
    /// element's package.
    pub fn add_reloc_problems(&mut self, id: ElementId) {
        let Some(te) = self.elements.get(id) else {
            return;
        };
        let bad: Vec<String> = te
            .relocations()
            .map(|table| table.iter_bad().map(|r| r.old_path.clone()).collect())
            .unwrap_or_default();
        for old_path in bad {
            self.add_problem(id, ProblemKind::BadRelocation, None, old_path, 0);
        }
    }

    /// All problems currently recorded across the arena.
    pub fn problems(&self) -> Vec<Problem> {
        self.elements
            .iter()
            .flat_map(|te| te.problems().iter().cloned())
            .collect()
    }

    /// Materialize the element's header, from the store for database
    /// residents and from the package file for installs. Returns whether
    /// the element ended up with a usable header.
    pub fn open(&mut self, id: ElementId, reload_files: bool) -> bool {
        let Some(te) = self.elements.get(id) else {
            return false;
        };
        // An element that already failed is never reopened
        if te.is_failed() {
            return false;
        }
        let disposition = te.disposition();
        let instance = te.db_instance();
        let cached = te.header();

        let h = match disposition {
            Disposition::Added => {
                if instance != 0 {
                    self.db_header(instance)
                } else {
                    self.fd_header(id)
                }
            }
            // Erasures keep their header across close when a post-trans
            // script still needs it
            Disposition::Removed if cached.is_some() => cached,
            Disposition::Removed | Disposition::DbResident | Disposition::Restored => {
                self.db_header(instance)
            }
        };

        let mut ok = h.is_some();
        if let Some(h) = &h
            && reload_files
        {
            let mut fresh = (**h).clone();
            let relocator = std::mem::replace(
                &mut self.relocator,
                Box::new(DefaultRelocator::default()),
            );
            if let Some(te) = self.elements.get_mut(id) {
                ok = te.reload_files(relocator.as_ref(), &mut fresh);
            }
            self.relocator = relocator;
        }
        if let Some(te) = self.elements.get_mut(id) {
            te.set_header(h);
        }
        ok
    }

    /// Release the element's transient resources. Erasure elements keep
    /// their header when a post-uninstall-transaction script still needs
    /// it; everything else drops it.
    pub fn close(&mut self, id: ElementId, reset_files: bool) {
        let Some(te) = self.elements.get_mut(id) else {
            return;
        };
        match te.disposition() {
            Disposition::Added => {
                if te.has_payload() {
                    te.set_payload(None);
                    let te = &self.elements[id];
                    if let Some(notify) = self.notify.as_mut() {
                        notify.notify(te, CallbackEvent::InstCloseFile, 0, 0);
                    }
                }
                if let Some(te) = self.elements.get_mut(id) {
                    te.set_header(None);
                }
            }
            Disposition::Removed => {
                if te.trans_scripts() & element::HAVE_POSTUNTRANS == 0 {
                    te.set_header(None);
                }
            }
            Disposition::DbResident | Disposition::Restored => {
                te.set_header(None);
            }
        }
        if reset_files
            && let Some(te) = self.elements.get_mut(id)
        {
            te.clean_files();
        }
    }

    fn db_header(&self, instance: u32) -> Option<Rc<Header>> {
        let store = self.store.as_ref()?;
        match store.fetch(instance) {
            Ok(h) => h.map(Rc::new),
            Err(e) => {
                warn!("failed to fetch header instance {}: {}", instance, e);
                None
            }
        }
    }

    /// Obtain the header by opening and reading the element's package
    /// file through the driver callback.
    fn fd_header(&mut self, id: ElementId) -> Option<Rc<Header>> {
        let payload = {
            let te = &self.elements[id];
            let notify = self.notify.as_mut()?;
            notify.notify(te, CallbackEvent::InstOpenFile, 0, 0)
        };
        self.elements[id].set_payload(payload);
        if !self.elements[id].has_payload() {
            return None;
        }

        let Some(reader) = self.reader.as_mut() else {
            self.close(id, false);
            return None;
        };
        let nevra = self.elements[id].nevra().to_string();
        let vs_flags = self.vs_flags | VSFLAG_NEED_PAYLOAD;
        let (h, status) = {
            let fd = self.elements[id].payload_mut()?;
            reader.read_package(fd.as_mut(), &nevra, vs_flags)
        };
        match status {
            ReadStatus::Ok | ReadStatus::NotTrusted | ReadStatus::NoKey => h.map(Rc::new),
            _ => {
                debug!("package {} cannot be read: {:?}", nevra, status);
                self.close(id, true);
                None
            }
        }
    }

    /// Open, execute and close one element for one goal. Returns the
    /// element's failure count after the step; zero means success.
    pub fn process(
        &mut self,
        id: ElementId,
        goal: PackageGoal,
        index: usize,
        executor: &mut dyn PackageExecutor,
    ) -> u32 {
        let Some(te) = self.elements.get(id) else {
            return 0;
        };
        // Script stages silently skip elements without the scriptlet
        if !te.have_trans_script(goal) {
            return 0;
        }

        // File info is rebuilt and torn down only for real package work
        // outside a dry run
        let reset_files = !goal.is_script_stage() && self.flags & TRANS_FLAG_TEST == 0;

        let mut failed = true;
        if self.open(id, reset_files) {
            if !goal.is_script_stage()
                && let Some(notify) = self.notify.as_mut()
            {
                let total = self.elements.len() as u64;
                notify.notify(
                    &self.elements[id],
                    CallbackEvent::ElemProgress,
                    index as u64,
                    total,
                );
            }
            failed = executor.run(&mut self.elements[id], goal);
        }
        self.close(id, reset_files);

        if failed { self.mark_failed(id) } else { 0 }
    }
}
