// src/lib.rs

//! Tevra Transaction Element Engine
//!
//! The core abstraction of an atomic package transaction: one element per
//! package being installed, erased, or held for reference, behind a single
//! polymorphic interface.
//!
//! # Architecture
//!
//! - Arena-owned elements: a [`transaction::Transaction`] owns every element;
//!   cross-references between elements are ids, never pointers
//! - Lazy lifecycle: headers and payload streams are acquired at `open` and
//!   released at `close`, so a thousand-package transaction never holds a
//!   thousand open descriptors
//! - Dependency coloring: per-record architecture bitmasks keep multilib
//!   (32/64-bit) package pairs from clobbering each other
//! - Deduplicated problems: diagnostics accumulate on the element and
//!   cascade failure through erase dependencies

pub mod db;
pub mod deps;
mod error;
pub mod files;
pub mod header;
pub mod reloc;
pub mod sign;
pub mod transaction;

pub use error::{Error, Result};
