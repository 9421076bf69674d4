//! Jobs running as child processes of this host.

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use trex_core::{
    FilterId, Job, JobDesc, JobError, JobFactory, JobStatus, LineFilter, Message, Stream,
    SIGTERM,
};
use wait_timeout::ChildExt;

/// How long output readers may lag behind an exited child before the rest of its process
/// group is killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A job factory for the local host. Files are read and written directly.
#[derive(Debug, Clone)]
pub struct LocalFactory {
    agent: String,
}

impl LocalFactory {
    /// Creates a factory for the agent named `agent`.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl JobFactory for LocalFactory {
    fn agent(&self) -> &str {
        &self.agent
    }

    fn create_job(&self, desc: JobDesc) -> Result<Box<dyn Job>, JobError> {
        Ok(Box::new(LocalJob::new(desc)?))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), JobError> {
        fs::write(path, contents)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), JobError> {
        fs::remove_file(path)?;
        Ok(())
    }
}

/// A child process with line filters over its output.
///
/// One reader thread per output stream runs every line through the filters of that stream.
/// Readable filters deliver into a channel owned by the job, so messages of earlier runs stay
/// queued until they are received.
///
/// The child leads its own process group and signals go to the whole group, so helpers the
/// generator forks are stopped with it.
#[derive(Debug)]
pub struct LocalJob {
    program: String,
    argv: Vec<String>,
    workdir: Option<PathBuf>,
    filters: Arc<[LineFilter]>,
    channels: Vec<Option<(Sender<Message>, Receiver<Message>)>>,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    /// Signalled by each reader of the current run when it is done.
    done: Option<Receiver<()>>,
    /// Readers of the current run that have not signalled yet.
    pending: usize,
}

impl LocalJob {
    /// Creates a job. Nothing runs until [`Job::start`].
    pub fn new(desc: JobDesc) -> Result<Self, JobError> {
        let filters = desc
            .filters
            .into_iter()
            .map(LineFilter::new)
            .collect::<Result<Vec<_>, _>>()?;
        let channels = filters
            .iter()
            .map(|f| f.desc().readable.then(crossbeam_channel::unbounded::<Message>))
            .collect();
        Ok(Self {
            program: desc.program,
            argv: desc.argv,
            workdir: None,
            filters: filters.into(),
            channels,
            child: None,
            readers: Vec::new(),
            done: None,
            pending: 0,
        })
    }

    fn spawn_reader(
        &self,
        stream: Stream,
        pipe: impl Read + Send + 'static,
        done: Sender<()>,
    ) -> JoinHandle<()> {
        let filters = Arc::clone(&self.filters);
        let senders = self
            .channels
            .iter()
            .map(|c| c.as_ref().map(|(tx, _)| tx.clone()))
            .collect::<Vec<_>>();
        let program = self.program.clone();
        thread::spawn(move || {
            let own = || {
                filters
                    .iter()
                    .zip(&senders)
                    .filter(|(f, _)| f.desc().stream == stream)
            };
            for line in BufReader::new(pipe).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("{program}: failed to read {stream:?}: {e}");
                        break;
                    }
                };
                for (filter, tx) in own() {
                    if let (Some(data), Some(tx)) = (filter.feed(&line), tx) {
                        // The job keeps a receiver, so sending cannot fail while it lives.
                        let _ = tx.send(Message::Data(data));
                    }
                }
            }
            for (_, tx) in own() {
                if let Some(tx) = tx {
                    let _ = tx.send(Message::Eos);
                }
            }
            // Nobody listens any more if the job gave up on this run.
            let _ = done.send(());
        })
    }

    /// Forgets the exited child once its output has been read.
    ///
    /// Whatever is left of the child's process group after `drain` is killed, since it holds
    /// the output pipes open. Readers that still do not finish are abandoned.
    fn reap(&mut self, status: ExitStatus, drain: Duration) -> JobStatus {
        let pgid = self.child.take().map(|child| child.id());
        if !self.join_readers(drain) {
            if let Some(pgid) = pgid {
                log::warn!(
                    "{}: output still open {drain:?} after exit, killing process group {pgid}",
                    self.program
                );
                // The group may be gone by now.
                let _ = signal_group(pgid, Signal::SIGKILL as i32);
            }
            if !self.join_readers(DRAIN_TIMEOUT) {
                log::error!("{}: abandoning output readers", self.program);
                self.readers.clear();
                self.done = None;
                self.pending = 0;
            }
        }
        match status.code() {
            Some(code) => JobStatus::Exited(code),
            None => JobStatus::Signaled(status.signal().unwrap_or_default()),
        }
    }

    /// Joins the readers of the current run, giving up after `timeout`.
    fn join_readers(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if let Some(done) = &self.done {
            while self.pending > 0 {
                match done.recv_deadline(deadline) {
                    Ok(()) => self.pending -= 1,
                    Err(RecvTimeoutError::Timeout) => return false,
                    // Every reader is gone.
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        self.pending = 0;
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                log::error!("{}: output reader panicked", self.program);
            }
        }
        self.done = None;
        true
    }
}

/// Sends `signum` to the process group led by `pgid`.
fn signal_group(pgid: u32, signum: i32) -> io::Result<()> {
    let signal = Signal::try_from(signum)?;
    signal::killpg(Pid::from_raw(pgid as i32), signal)?;
    Ok(())
}

impl Job for LocalJob {
    fn set_workdir(&mut self, dir: &Path) -> Result<(), JobError> {
        self.workdir = Some(dir.to_owned());
        Ok(())
    }

    fn start(&mut self) -> Result<(), JobError> {
        if self.child.is_some() {
            return Err(JobError::InProgress);
        }
        let mut command = Command::new(&self.program);
        command
            .args(self.argv.iter().skip(1))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        let mut child = command.spawn()?;
        log::debug!("{}: spawned with pid {}", self.program, child.id());
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        if let Some(stdout) = child.stdout.take() {
            let reader = self.spawn_reader(Stream::Stdout, stdout, done_tx.clone());
            self.readers.push(reader);
        }
        if let Some(stderr) = child.stderr.take() {
            let reader = self.spawn_reader(Stream::Stderr, stderr, done_tx);
            self.readers.push(reader);
        }
        self.pending = self.readers.len();
        self.done = Some(done_rx);
        self.child = Some(child);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<JobStatus, JobError> {
        let child = self.child.as_mut().ok_or(JobError::NotRunning)?;
        let status = match timeout {
            None => child.wait()?,
            Some(timeout) => child.wait_timeout(timeout)?.ok_or(JobError::InProgress)?,
        };
        Ok(self.reap(status, DRAIN_TIMEOUT))
    }

    fn stop(&mut self, signum: i32, grace: Duration) -> Result<(), JobError> {
        let started = Instant::now();
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        signal_group(child.id(), signum)?;
        let status = match child.wait_timeout(grace)? {
            Some(status) => status,
            None => {
                log::warn!("{}: still running after {grace:?}, killing it", self.program);
                signal_group(child.id(), Signal::SIGKILL as i32)?;
                child.wait()?
            }
        };
        // Group members still handling the signal get the rest of the grace period.
        let drain = grace.saturating_sub(started.elapsed()).max(DRAIN_TIMEOUT);
        let status = self.reap(status, drain);
        log::debug!("{}: {status}", self.program);
        Ok(())
    }

    fn kill(&mut self, signum: i32) -> Result<(), JobError> {
        let child = self.child.as_ref().ok_or(JobError::NotRunning)?;
        signal_group(child.id(), signum)?;
        Ok(())
    }

    fn receive_many(&self, filter: FilterId, timeout: Duration) -> Result<Vec<Message>, JobError> {
        let (_, rx) = self
            .channels
            .get(filter.inner())
            .and_then(Option::as_ref)
            .ok_or(JobError::UnknownFilter(filter))?;
        let mut messages = Vec::new();
        loop {
            match rx.recv_timeout(timeout) {
                Ok(Message::Eos) => {
                    messages.push(Message::Eos);
                    break;
                }
                Ok(message) => messages.push(message),
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("filter {filter}: nothing received for {timeout:?}");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(messages)
    }

    fn destroy(&mut self, grace: Duration) -> Result<(), JobError> {
        self.stop(SIGTERM, grace)
    }
}

impl Drop for LocalJob {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = signal_group(child.id(), Signal::SIGKILL as i32);
            let _ = child.wait();
        }
    }
}
