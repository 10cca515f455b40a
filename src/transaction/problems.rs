// src/transaction/problems.rs

//! Deduplicated problem records
//!
//! Problems are blocking diagnostics collected on an element during
//! evaluation and surfaced as one list at the end of the run. Appending a
//! record that is structurally equal to an existing one is a no-op.

use std::fmt;

/// What kind of condition blocked the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// A requirement is not satisfied.
    Requires,
    /// The package conflicts with another.
    Conflict,
    /// The package is obsoleted by another.
    Obsoletes,
    /// A requested relocation did not apply to the package.
    BadRelocation,
}

/// One diagnostic record. Equality is structural over all fields, which
/// is what the deduplication in [`ProblemSet`] relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub kind: ProblemKind,
    /// Retrieval key of the package the problem points at, if any.
    pub key: Option<String>,
    /// NEVR of the other package involved, if any.
    pub alt_nevr: Option<String>,
    pub msg: String,
    pub number: u64,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let other = self
            .alt_nevr
            .as_deref()
            .or(self.key.as_deref())
            .unwrap_or("?");
        match self.kind {
            ProblemKind::Requires => write!(f, "{} is needed by {}", self.msg, other),
            ProblemKind::Conflict => write!(f, "{} conflicts with {}", self.msg, other),
            ProblemKind::Obsoletes => write!(f, "{} is obsoleted by {}", self.msg, other),
            ProblemKind::BadRelocation => {
                write!(f, "path {} in package {} is not relocatable", self.msg, other)
            }
        }
    }
}

/// Append-only set of unique problems.
#[derive(Debug, Default)]
pub struct ProblemSet {
    problems: Vec<Problem>,
}

impl ProblemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an equivalent record is already present; returns
    /// whether the problem was actually stored.
    pub fn append_unique(&mut self, problem: Problem) -> bool {
        if self.problems.contains(&problem) {
            return false;
        }
        self.problems.push(problem);
        true
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    pub fn clear(&mut self) {
        self.problems.clear();
    }
}
