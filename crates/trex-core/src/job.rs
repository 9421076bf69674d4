//! The job-factory capability: running a program on a test agent and reading its output
//! through line filters.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use regex::Regex;

/// Signal sent to stop the generator gracefully.
pub const SIGTERM: i32 = 15;

/// Signal that kills a process unconditionally.
pub const SIGKILL: i32 = 9;

identifier!(FilterId, usize);

/// Creates jobs and manages files on one test agent.
pub trait JobFactory {
    /// Name of the agent jobs run on.
    fn agent(&self) -> &str;

    /// Creates a job. Filters are identified by their position in `desc.filters`.
    fn create_job(&self, desc: JobDesc) -> Result<Box<dyn Job>, JobError>;

    /// Writes `contents` to `path` on the agent, replacing any existing file.
    fn write_file(&self, path: &Path, contents: &str) -> Result<(), JobError>;

    /// Removes `path` from the agent.
    fn remove_file(&self, path: &Path) -> Result<(), JobError>;
}

/// A supervised process.
///
/// A job may be started again after it exits; every run ends with an [`Message::Eos`] on
/// each filter.
pub trait Job {
    /// Sets the directory the process is started in.
    fn set_workdir(&mut self, dir: &Path) -> Result<(), JobError>;

    /// Spawns the process. Does not wait for it.
    fn start(&mut self) -> Result<(), JobError>;

    /// Waits for the process to exit, indefinitely if `timeout` is `None`.
    ///
    /// Returns [`JobError::InProgress`] if the process is still running at the deadline.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<JobStatus, JobError>;

    /// Sends `signum` and waits up to `grace` for the process to exit before killing it.
    fn stop(&mut self, signum: i32, grace: Duration) -> Result<(), JobError>;

    /// Sends `signum` to the process.
    fn kill(&mut self, signum: i32) -> Result<(), JobError>;

    /// Receives messages from `filter`, in the order they were produced.
    ///
    /// Returns once an [`Message::Eos`] has been received, or when no message arrived for
    /// `timeout`.
    fn receive_many(&self, filter: FilterId, timeout: Duration) -> Result<Vec<Message>, JobError>;

    /// Stops the process if it is running and releases every resource of the job.
    fn destroy(&mut self, grace: Duration) -> Result<(), JobError>;
}

/// Describes a job to create.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct JobDesc {
    /// The program to run.
    #[builder(setter(into))]
    pub program: String,
    /// The full argument vector, including `argv[0]`.
    pub argv: Vec<String>,
    /// Filters over the program's output.
    #[builder(default)]
    pub filters: Vec<FilterDesc>,
}

/// An output stream of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Describes a line filter over a job's output.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct FilterDesc {
    /// Filter name, used as the prefix of logged lines.
    #[builder(setter(into))]
    pub name: String,
    /// The stream the filter reads.
    #[builder(default = Stream::Stdout)]
    pub stream: Stream,
    /// Whether matches are queued for [`Job::receive_many`].
    #[builder(default = true)]
    pub readable: bool,
    /// Level matching lines are logged at, if any.
    #[builder(default, setter(strip_option))]
    pub log_level: Option<log::Level>,
    /// Pattern a line must match; every line matches when unset.
    #[builder(default, setter(strip_option, into))]
    pub pattern: Option<String>,
    /// Capture group extracted from a match; 0 is the whole match.
    #[builder(default)]
    pub extract: usize,
}

/// A message received from a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text extracted from one line.
    Data(String),
    /// The stream was closed.
    Eos,
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Exited with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
}

impl JobStatus {
    /// Returns `true` for a zero exit status.
    pub fn success(&self) -> bool {
        matches!(self, JobStatus::Exited(0))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Exited(code) => write!(f, "exited with status {code}"),
            JobStatus::Signaled(signum) => write!(f, "killed by signal {signum}"),
        }
    }
}

/// A compiled [`FilterDesc`]. Factories run every output line through the filters of its
/// stream.
#[derive(Debug, Clone)]
pub struct LineFilter {
    desc: FilterDesc,
    re: Option<Regex>,
}

impl LineFilter {
    /// Compiles a filter description.
    pub fn new(desc: FilterDesc) -> Result<Self, JobError> {
        let re = desc
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| JobError::InvalidFilter {
                name: desc.name.clone(),
                source,
            })?;
        Ok(Self { desc, re })
    }

    /// The filter's description.
    pub fn desc(&self) -> &FilterDesc {
        &self.desc
    }

    /// Runs `line` through the filter, logging it if configured. Returns the extracted text
    /// if the filter is readable and the line matched.
    pub fn feed(&self, line: &str) -> Option<String> {
        let extracted = match &self.re {
            None => line,
            Some(re) => re.captures(line)?.get(self.desc.extract)?.as_str(),
        };
        if let Some(level) = self.desc.log_level {
            log::log!(level, "{}: {}", self.desc.name, extracted);
        }
        self.desc.readable.then(|| extracted.to_owned())
    }
}

/// Error from a job or its factory.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job was still running at the deadline.
    #[error("job is still running")]
    InProgress,

    /// The job has not been started.
    #[error("job is not running")]
    NotRunning,

    /// A filter pattern does not compile.
    #[error("invalid pattern for filter {name:?}")]
    InvalidFilter {
        /// The filter name.
        name: String,
        /// The compile error.
        #[source]
        source: regex::Error,
    },

    /// The job has no such filter, or it is not readable.
    #[error("no readable filter {0}")]
    UnknownFilter(FilterId),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
