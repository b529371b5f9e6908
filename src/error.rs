use std::{error::Error, fmt};

use backtrace::Backtrace;
use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The tree structure can not be trusted any more, e.g. a pointer
    /// resolved to an undecidable state.
    TreeInconsistency,

    /// A generation safe pointer pair could not be read.
    PointerRead,

    /// A generation safe pointer pair could not be written.
    PointerWrite,

    /// A cursor read or wrote outside of its page.
    OutOfBounds,

    /// The crash generation cleanup job failed.
    CleanupFailed,

    Config,
}

#[derive(Debug, Clone)]
pub struct TreeError {
    kind: ErrorKind,
    details: String,
}

impl TreeError {
    pub fn new(kind: ErrorKind, msg: &str) -> TreeError {
        TreeError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn inconsistency(msg: &str) -> TreeError {
        Self::new(ErrorKind::TreeInconsistency, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// Append the details of another error to this one, keeping the
    /// kind of the first error.
    pub fn chain(mut self, other: &TreeError) -> TreeError {
        self.details.push_str(&format!(
            "\n\tsuppressed: [{:?}] {}",
            other.kind, other.details
        ));
        self
    }

    pub fn show_backtrace(&self) {
        let bt = Backtrace::new();
        error!("error: [{}], backtrace: {:?}", self, bt);
    }
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.details)
    }
}

impl Error for TreeError {}
