use std::fmt;

use crate::addr::AddrError;
use crate::db::DbError;
use crate::expand::ExpandError;
use crate::job::{JobError, JobStatus};
use crate::oid::OidError;
use crate::report::{Report, ReportError};

/// The error type of the generator driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The generator executable is not set.
    #[error("generator executable path is empty")]
    NoExecutable,

    /// The operation is not allowed in the current state.
    #[error("cannot {op} a generator that is {state}")]
    InvalidState {
        /// The rejected operation.
        op: &'static str,
        /// The application state.
        state: &'static str,
    },

    /// The output of the last run has already been read.
    #[error("the report of the last run has already been collected")]
    ReportTaken,

    /// The generator exited unsuccessfully.
    #[error("generator {0}")]
    ChildFailed(JobStatus),

    /// A report was assembled, but some values are missing.
    #[error("report is incomplete")]
    PartialReport {
        /// The values that could be assembled; missing values are zero.
        report: Box<Report>,
        /// The first problem encountered.
        #[source]
        source: Box<Error>,
    },

    /// Error parsing an address.
    #[error(transparent)]
    Addr(#[from] AddrError),

    /// Error parsing an OID.
    #[error(transparent)]
    Oid(#[from] OidError),

    /// Error accessing the configuration database.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Error rendering a configuration template.
    #[error("failed to render configuration")]
    Expand(#[from] ExpandError),

    /// Error from the job.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Error assembling or querying a report.
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl Error {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoExecutable | Error::InvalidState { .. } | Error::ReportTaken => {
                ErrorKind::InvalidArgument
            }
            Error::ChildFailed(_) => ErrorKind::Io,
            Error::PartialReport { source, .. } => source.kind(),
            Error::Addr(_) | Error::Oid(_) | Error::Expand(_) => ErrorKind::InvalidArgument,
            Error::Db(e) => match e {
                DbError::NotFound(_) => ErrorKind::NotFound,
                DbError::Refused { .. } | DbError::Io(_) => ErrorKind::Io,
            },
            Error::Job(e) => match e {
                JobError::InProgress => ErrorKind::InProgress,
                JobError::NotRunning
                | JobError::InvalidFilter { .. }
                | JobError::UnknownFilter(_) => ErrorKind::InvalidArgument,
                JobError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                JobError::Io(_) => ErrorKind::Io,
            },
            Error::Report(e) => report_kind(e),
        }
    }
}

fn report_kind(e: &ReportError) -> ErrorKind {
    match e {
        ReportError::NoPerPortStats | ReportError::EmptyWindow => ErrorKind::NoData,
        ReportError::Malformed { .. } => ErrorKind::InvalidArgument,
        ReportError::SampleCountMismatch { .. }
        | ReportError::BadEos(_)
        | ReportError::NotScalar { .. }
        | ReportError::NoSuchPort { .. }
        | ReportError::WindowOutOfRange { .. } => ErrorKind::OutOfRange,
    }
}

/// Abstract error kinds, each with an errno-compatible code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Null, empty or inconsistent input.
    InvalidArgument,
    /// A lookup found nothing.
    NotFound,
    /// The object already exists.
    AlreadyExists,
    /// Allocation failure. Never returned: allocation failure aborts.
    NoMemory,
    /// The child failed, or a filesystem or driver operation failed.
    Io,
    /// An operation timed out.
    Timeout,
    /// A wait ended before the child did.
    InProgress,
    /// Report invariants were violated.
    OutOfRange,
    /// The requested data was not collected.
    NoData,
}

impl ErrorKind {
    /// The errno value of the kind.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 22,
            ErrorKind::NotFound => 2,
            ErrorKind::AlreadyExists => 17,
            ErrorKind::NoMemory => 12,
            ErrorKind::Io => 5,
            ErrorKind::Timeout => 110,
            ErrorKind::InProgress => 115,
            ErrorKind::OutOfRange => 34,
            ErrorKind::NoData => 61,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::NoMemory => "no-memory",
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InProgress => "in-progress",
            ErrorKind::OutOfRange => "out-of-range",
            ErrorKind::NoData => "no-data",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trex:{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_carry_source_tag_and_code() {
        let e = Error::from(JobError::InProgress);
        assert_eq!(e.kind(), ErrorKind::InProgress);
        assert_eq!(e.kind().to_string(), "trex:in-progress");
        assert_eq!(e.kind().code(), 115);
        let e = Error::ChildFailed(JobStatus::Exited(1));
        assert_eq!(e.kind(), ErrorKind::Io);
        insta::assert_snapshot!(e, @"generator exited with status 1");
        let e = Error::from(DbError::NotFound("PCI function 0000:00:04.0".into()));
        assert_eq!(e.kind(), ErrorKind::NotFound);
        let e = Error::from(ReportError::NoPerPortStats);
        assert_eq!(e.kind(), ErrorKind::NoData);
    }
}
