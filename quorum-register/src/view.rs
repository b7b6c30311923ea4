//! Static membership of the replica group.
//!
//! A [`View`] is fixed for the lifetime of a deployment. It knows how many
//! replicas must answer before an operation may complete (the quorum size)
//! and how many may be lost without losing availability.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of a single replica, e.g. `127.0.0.1:5000`.
///
/// Ordering only exists so that views iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Process {
    addr: String,
}

impl Process {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl From<&str> for Process {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for Process {
    fn from(addr: String) -> Self {
        Self::new(addr)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("a view needs at least one process")]
    Empty,
}

/// Immutable set of replica processes.
///
/// On the wire a view is a sorted array of address strings; decoding accepts
/// any order and collapses duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Process>", try_from = "Vec<Process>")]
pub struct View {
    members: BTreeSet<Process>,
}

impl View {
    /// Builds a view from a list of processes. Duplicates collapse into one
    /// member; an empty list is rejected because the quorum would be undefined.
    pub fn with_processes<I, P>(processes: I) -> Result<Self, ViewError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Process>,
    {
        let members: BTreeSet<Process> = processes.into_iter().map(Into::into).collect();
        if members.is_empty() {
            return Err(ViewError::Empty);
        }
        Ok(Self { members })
    }

    /// Smallest number of processes that is a strict majority of the view.
    pub fn quorum_size(&self) -> usize {
        self.n() / 2 + 1
    }

    pub fn n(&self) -> usize {
        self.members.len()
    }

    /// Number of processes that may be unreachable while operations still complete.
    pub fn f(&self) -> usize {
        self.n() - self.quorum_size()
    }

    pub fn has_member(&self, process: &Process) -> bool {
        self.members.contains(process)
    }

    pub fn members(&self) -> impl Iterator<Item = &Process> {
        self.members.iter()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, process) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{process}")?;
        }
        f.write_str("}")
    }
}

impl From<View> for Vec<Process> {
    fn from(view: View) -> Self {
        view.members.into_iter().collect()
    }
}

impl TryFrom<Vec<Process>> for View {
    type Error = ViewError;

    fn try_from(processes: Vec<Process>) -> Result<Self, Self::Error> {
        View::with_processes(processes)
    }
}
