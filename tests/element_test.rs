// tests/element_test.rs

//! Integration tests for the transaction engine
//!
//! These tests drive element lifecycle end to end: construction from
//! headers, open/close against a real header store, the package-file
//! read path through the driver callback, and the process loop.

use std::cell::RefCell;
use std::io::{Cursor, Read};
use std::rc::Rc;

use tempfile::NamedTempFile;
use tevra::db::SqliteHeaderStore;
use tevra::deps::DepKind;
use tevra::header::{Header, PackageReader, ReadStatus, Tag, Value};
use tevra::transaction::{
    CallbackEvent, Disposition, PackageExecutor, PackageGoal, PayloadHandle, ProblemKind,
    TRANS_FLAG_TEST, Transaction, TransactionElement, TransactionNotify,
};

fn sample_header(name: &str) -> Header {
    let mut h = Header::new();
    h.insert(Tag::Name, Value::Str(name.to_string()));
    h.insert(Tag::Version, Value::Str("2.4".to_string()));
    h.insert(Tag::Release, Value::Str("7".to_string()));
    h.insert(Tag::Arch, Value::Str("x86_64".to_string()));
    h.insert(Tag::Os, Value::Str("linux".to_string()));
    h.insert(
        Tag::BaseNames,
        Value::StrVec(vec!["httpd".to_string(), "httpd.conf".to_string()]),
    );
    h
}

fn temp_store() -> SqliteHeaderStore {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);
    SqliteHeaderStore::init(&db_path).unwrap()
}

/// Records events and hands out an empty payload stream on open.
struct RecordingNotify {
    events: Rc<RefCell<Vec<CallbackEvent>>>,
}

impl TransactionNotify for RecordingNotify {
    fn notify(
        &mut self,
        _te: &TransactionElement,
        event: CallbackEvent,
        _amount: u64,
        _total: u64,
    ) -> Option<PayloadHandle> {
        self.events.borrow_mut().push(event);
        match event {
            CallbackEvent::InstOpenFile => Some(Box::new(Cursor::new(Vec::new()))),
            _ => None,
        }
    }
}

/// Returns a canned header with a fixed status.
struct StubReader {
    header: Header,
    status: ReadStatus,
}

impl PackageReader for StubReader {
    fn read_package(
        &mut self,
        _fd: &mut dyn Read,
        _nevra: &str,
        _vsflags: u32,
    ) -> (Option<Header>, ReadStatus) {
        match self.status {
            ReadStatus::NotFound | ReadStatus::Fail => (None, self.status),
            _ => (Some(self.header.clone()), self.status),
        }
    }
}

struct StubExecutor {
    fail: bool,
    runs: Vec<PackageGoal>,
}

impl PackageExecutor for StubExecutor {
    fn run(&mut self, _te: &mut TransactionElement, goal: PackageGoal) -> bool {
        self.runs.push(goal);
        self.fail
    }
}

#[test]
fn test_add_builds_identity_and_dependency_sets() {
    let mut ts = Transaction::new();
    let mut h = sample_header("httpd");
    h.insert(Tag::Epoch, Value::U32(1));
    h.insert(
        Tag::RequireName,
        Value::StrVec(vec!["libc.so.6".to_string()]),
    );

    let id = ts
        .add(&mut h, Disposition::Added, Some("httpd.rpm".to_string()), None)
        .unwrap();
    let te = ts.element(id).unwrap();

    assert_eq!(te.nevra(), "httpd-1:2.4-7.x86_64");
    assert_eq!(te.key(), Some("httpd.rpm"));
    assert_eq!(te.ds(DepKind::Requires).len(), 1);
    assert_eq!(te.files().unwrap().len(), 2);
    assert!(te.file_states().is_install());
}

#[test]
fn test_add_rejects_pubkey_install_but_not_erase() {
    let mut ts = Transaction::new();
    let mut h = sample_header("gpg-pubkey");
    h.remove(Tag::Arch);
    h.remove(Tag::Os);

    assert!(ts.add(&mut h, Disposition::Added, None, None).is_err());
    assert!(ts.add(&mut h, Disposition::Removed, None, None).is_ok());
    assert_eq!(ts.len(), 1);
}

#[test]
fn test_open_and_close_against_store() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));

    assert!(ts.open(id, false));
    let te = ts.element(id).unwrap();
    assert!(te.has_header());
    assert_eq!(te.header().unwrap().get_str(Tag::Name), Some("httpd"));

    ts.close(id, false);
    assert!(!ts.element(id).unwrap().has_header());
}

#[test]
fn test_open_install_with_recorded_instance_uses_store() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    // The header now carries its instance id, so the install element is
    // database-backed and never needs the package file
    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Added, None, None).unwrap();
    assert!(ts.element(id).unwrap().db_instance() > 0);
    ts.set_store(Box::new(store));

    assert!(ts.open(id, false));
    assert!(ts.element(id).unwrap().has_header());
    ts.close(id, false);
    assert!(!ts.element(id).unwrap().has_header());
}

#[test]
fn test_open_refuses_failed_element() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));
    ts.mark_failed(id);

    assert!(!ts.open(id, false));
    assert!(!ts.element(id).unwrap().has_header());
}

#[test]
fn test_close_keeps_erasure_header_for_postuntrans() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    h.insert(Tag::PostUnTrans, Value::Str("echo done".to_string()));
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));

    assert!(ts.open(id, false));
    ts.close(id, false);
    // Still needed by the post-uninstall-transaction script
    assert!(ts.element(id).unwrap().has_header());

    // A later open reuses the cached header without the store
    assert!(ts.open(id, false));
}

#[test]
fn test_open_install_reads_package_through_callback() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut ts = Transaction::new();
    let mut h = sample_header("httpd");
    let id = ts
        .add(&mut h, Disposition::Added, Some("httpd.rpm".to_string()), None)
        .unwrap();
    ts.set_notify(Box::new(RecordingNotify {
        events: events.clone(),
    }));
    ts.set_reader(Box::new(StubReader {
        header: h.clone(),
        status: ReadStatus::Ok,
    }));

    assert!(ts.open(id, false));
    assert!(ts.element(id).unwrap().has_header());
    assert!(ts.element(id).unwrap().has_payload());

    ts.close(id, false);
    assert!(!ts.element(id).unwrap().has_payload());
    assert_eq!(
        *events.borrow(),
        vec![CallbackEvent::InstOpenFile, CallbackEvent::InstCloseFile]
    );
}

#[test]
fn test_open_install_unreadable_package_fails_and_closes() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut ts = Transaction::new();
    let mut h = sample_header("httpd");
    let id = ts.add(&mut h, Disposition::Added, None, None).unwrap();
    ts.set_notify(Box::new(RecordingNotify {
        events: events.clone(),
    }));
    ts.set_reader(Box::new(StubReader {
        header: h.clone(),
        status: ReadStatus::Fail,
    }));

    assert!(!ts.open(id, false));
    assert!(!ts.element(id).unwrap().has_header());
    assert!(!ts.element(id).unwrap().has_payload());
    // A failed read also tears down the file info
    assert!(ts.element(id).unwrap().files().is_none());
}

#[test]
fn test_untrusted_signature_still_yields_header() {
    let mut ts = Transaction::new();
    let mut h = sample_header("httpd");
    let id = ts.add(&mut h, Disposition::Added, None, None).unwrap();
    ts.set_notify(Box::new(RecordingNotify {
        events: Rc::new(RefCell::new(Vec::new())),
    }));
    ts.set_reader(Box::new(StubReader {
        header: h.clone(),
        status: ReadStatus::NotTrusted,
    }));

    assert!(ts.open(id, false));
}

#[test]
fn test_open_with_reload_rebuilds_file_info() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));

    ts.element_mut(id).unwrap().clean_files();
    assert!(ts.element(id).unwrap().files().is_none());

    assert!(ts.open(id, true));
    assert_eq!(ts.element(id).unwrap().files().unwrap().len(), 2);
}

#[test]
fn test_process_runs_executor_and_reports_progress() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));
    ts.set_notify(Box::new(RecordingNotify {
        events: events.clone(),
    }));

    let mut executor = StubExecutor {
        fail: false,
        runs: Vec::new(),
    };
    assert_eq!(ts.process(id, PackageGoal::Erase, 0, &mut executor), 0);
    assert_eq!(executor.runs, vec![PackageGoal::Erase]);
    assert_eq!(*events.borrow(), vec![CallbackEvent::ElemProgress]);
    // Real package work tears the file info down afterwards
    assert!(ts.element(id).unwrap().files().is_none());
}

#[test]
fn test_process_failure_marks_element_and_dependents() {
    let store = temp_store();
    let mut ha = sample_header("httpd");
    let mut hb = sample_header("httpd-old");
    store.insert(&mut ha, "httpd-2.4-7.x86_64").unwrap();
    store.insert(&mut hb, "httpd-old-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let a = ts.add(&mut ha, Disposition::Restored, None, None).unwrap();
    let b = ts.add(&mut hb, Disposition::Removed, None, None).unwrap();
    ts.element_mut(b).unwrap().set_depends_on(Some(a));
    ts.set_store(Box::new(store));

    let mut executor = StubExecutor {
        fail: true,
        runs: Vec::new(),
    };
    assert_eq!(ts.process(a, PackageGoal::Restore, 0, &mut executor), 1);
    assert!(ts.element(b).unwrap().is_failed());
}

#[test]
fn test_process_skips_script_stage_without_scriptlet() {
    let mut ts = Transaction::new();
    let mut h = sample_header("httpd");
    let id = ts.add(&mut h, Disposition::Added, None, None).unwrap();

    let mut executor = StubExecutor {
        fail: true,
        runs: Vec::new(),
    };
    // No pre-transaction scriptlet: nothing runs, nothing fails
    assert_eq!(ts.process(id, PackageGoal::PreTrans, 0, &mut executor), 0);
    assert!(executor.runs.is_empty());
    assert!(!ts.element(id).unwrap().is_failed());
}

#[test]
fn test_dry_run_keeps_file_info() {
    let store = temp_store();
    let mut h = sample_header("httpd");
    store.insert(&mut h, "httpd-2.4-7.x86_64").unwrap();

    let mut ts = Transaction::new();
    let id = ts.add(&mut h, Disposition::Removed, None, None).unwrap();
    ts.set_store(Box::new(store));
    ts.set_flags(TRANS_FLAG_TEST);

    let mut executor = StubExecutor {
        fail: false,
        runs: Vec::new(),
    };
    ts.process(id, PackageGoal::Erase, 0, &mut executor);
    assert!(ts.element(id).unwrap().files().is_some());
}

#[test]
fn test_problem_accumulation_across_elements() {
    let mut ts = Transaction::new();
    let mut ha = sample_header("httpd");
    ha.insert(
        Tag::RequireName,
        Value::StrVec(vec!["libssl.so.3".to_string()]),
    );
    let mut hb = sample_header("nginx");
    let a = ts.add(&mut ha, Disposition::Added, None, None).unwrap();
    let b = ts.add(&mut hb, Disposition::Added, None, None).unwrap();

    ts.add_dep_problem(a, None, DepKind::Requires, 0, None);
    ts.add_problem(
        b,
        ProblemKind::Conflict,
        Some("httpd-1:2.4-7".to_string()),
        "nginx".to_string(),
        0,
    );
    // Same problem again on a is a no-op
    ts.add_dep_problem(a, None, DepKind::Requires, 0, None);

    let problems = ts.problems();
    assert_eq!(problems.len(), 2);
    assert_eq!(ts.element(a).unwrap().failed(), 1);
    assert_eq!(problems[0].msg, "libssl.so.3");
}
