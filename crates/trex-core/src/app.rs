//! The generator application: one generator instance on one test agent.
//!
//! A [`TrexApp`] owns everything it acquires during [`TrexApp::create`]: the rendered files
//! on the agent, the PCI bindings and the job. All of it is given back by
//! [`TrexApp::destroy`], or on drop.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derivative::Derivative;

use crate::args::build_args;
use crate::assembler::assemble;
use crate::config;
use crate::db::ConfigDb;
use crate::filters::{filter_set, FilterSet};
use crate::iface::{self, Binding};
use crate::job::{FilterDesc, Job, JobDesc, JobError, JobFactory, SIGTERM};
use crate::opts::TrexOpts;
use crate::report::Report;
use crate::Error;

/// Grace period for stopping the generator, and idle timeout when draining its output.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`TrexApp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Configured, not started yet.
    Created,
    /// The generator is running.
    Running,
    /// The generator has exited; a report can be collected or the generator restarted.
    Exited,
    /// Every resource has been released.
    Destroyed,
}

impl AppState {
    fn name(self) -> &'static str {
        match self {
            AppState::Created => "created",
            AppState::Running => "running",
            AppState::Exited => "exited",
            AppState::Destroyed => "destroyed",
        }
    }
}

#[derive(Debug, Default)]
struct Resources {
    files: Vec<PathBuf>,
    bindings: Vec<Binding>,
}

/// A generator instance.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TrexApp<'a> {
    #[derivative(Debug = "ignore")]
    factory: &'a dyn JobFactory,
    #[derivative(Debug = "ignore")]
    db: &'a dyn ConfigDb,
    #[derivative(Debug = "ignore")]
    job: Option<Box<dyn Job>>,
    argv: Vec<String>,
    filters: FilterSet,
    /// Whether the output of the last run is still queued.
    unread: Cell<bool>,
    resources: Resources,
    state: AppState,
}

impl<'a> TrexApp<'a> {
    /// Renders the generator's configuration onto the agent, binds its PCI ports and creates
    /// the job.
    ///
    /// Nothing acquired is kept if creation fails.
    pub fn create(
        factory: &'a dyn JobFactory,
        db: &'a dyn ConfigDb,
        opts: &TrexOpts,
    ) -> Result<Self, Error> {
        if opts.exec.as_os_str().is_empty() {
            return Err(Error::NoExecutable);
        }
        let yaml_path = config::yaml_path();
        let astf_path = config::astf_path(opts.prefix());
        let n_ports = config::ports(opts).len();
        let (descs, filters) = filter_set(opts, n_ports);
        let mut app = Self {
            factory,
            db,
            job: None,
            argv: build_args(opts, &yaml_path),
            filters,
            unread: Cell::new(false),
            resources: Resources::default(),
            state: AppState::Created,
        };
        // On error, dropping `app` releases whatever was acquired.
        if let Err(e) = app.setup(opts, descs, &yaml_path, &astf_path) {
            log::error!("{}: failed to create generator: {e}", factory.agent());
            return Err(e);
        }
        log::debug!("{}: created generator: {}", factory.agent(), app.argv.join(" "));
        Ok(app)
    }

    fn setup(
        &mut self,
        opts: &TrexOpts,
        filters: Vec<FilterDesc>,
        yaml_path: &Path,
        astf_path: &Path,
    ) -> Result<(), Error> {
        let factory = self.factory;
        let agent = factory.agent();

        let profile = config::render_astf_profile(opts)?;
        self.write_file(astf_path, &profile)?;
        let device_config = config::render_device_config(opts)?;
        self.write_file(yaml_path, &device_config)?;

        let pci_ports = config::ports(opts)
            .into_iter()
            .flatten()
            .filter_map(|endpoint| endpoint.interface.as_ref()?.pci_addr())
            .collect::<Vec<_>>();
        match &opts.driver {
            Some(driver) => {
                for addr in pci_ports {
                    let binding = iface::bind(self.db, agent, addr, driver)?;
                    self.resources.bindings.push(binding);
                }
            }
            None if !pci_ports.is_empty() => {
                log::debug!("{agent}: no driver configured, PCI ports are used as bound");
            }
            None => (),
        }

        let desc = JobDesc::builder()
            .program(opts.exec.display().to_string())
            .argv(self.argv.clone())
            .filters(filters)
            .build();
        let job = self.job.insert(self.factory.create_job(desc)?);
        if let Some(dir) = opts.exec.parent().filter(|d| !d.as_os_str().is_empty()) {
            job.set_workdir(dir)?;
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), Error> {
        self.factory.write_file(path, contents)?;
        self.resources.files.push(path.to_owned());
        Ok(())
    }

    /// Starts the generator. Does not wait for it.
    pub fn start(&mut self) -> Result<(), Error> {
        self.check_state("start", &[AppState::Created, AppState::Exited])?;
        if self.unread.replace(false) {
            self.discard_output();
        }
        self.job_mut("start")?.start()?;
        self.state = AppState::Running;
        log::info!("{}: generator started", self.factory.agent());
        Ok(())
    }

    /// Waits for the generator to exit, indefinitely if `timeout` is `None`.
    ///
    /// If the generator is still running at the deadline the error is of kind
    /// [`InProgress`](crate::ErrorKind::InProgress) and the application stays running, to be
    /// stopped or killed by the caller. An unsuccessful exit is [`Error::ChildFailed`].
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.check_state("wait", &[AppState::Running])?;
        let factory = self.factory;
        let agent = factory.agent();
        match self.job_mut("wait")?.wait(timeout) {
            Ok(status) => {
                self.state = AppState::Exited;
                self.unread.set(true);
                if status.success() {
                    log::info!("{agent}: generator {status}");
                    Ok(())
                } else {
                    log::error!("{agent}: generator {status}");
                    Err(Error::ChildFailed(status))
                }
            }
            Err(JobError::InProgress) => {
                log::warn!("{agent}: generator is still running after {timeout:?}");
                Err(JobError::InProgress.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops the generator, killing it if it does not exit within [`TIMEOUT`]. Stopping a
    /// generator that has already exited does nothing.
    pub fn stop(&mut self) -> Result<(), Error> {
        match self.state {
            AppState::Running => {
                self.job_mut("stop")?.stop(SIGTERM, TIMEOUT)?;
                self.state = AppState::Exited;
                self.unread.set(true);
                log::info!("{}: generator stopped", self.factory.agent());
                Ok(())
            }
            AppState::Exited => Ok(()),
            state => Err(Error::InvalidState {
                op: "stop",
                state: state.name(),
            }),
        }
    }

    /// Sends `signum` to the generator.
    ///
    /// The application stays running until [`wait`](Self::wait) observes the exit.
    pub fn kill(&mut self, signum: i32) -> Result<(), Error> {
        self.check_state("kill", &[AppState::Running])?;
        self.job_mut("kill")?.kill(signum)?;
        log::info!("{}: sent signal {signum} to generator", self.factory.agent());
        Ok(())
    }

    /// Collects the statistics of the last run from the generator's output.
    ///
    /// Values that cannot be read are zeroed and reported through
    /// [`Error::PartialReport`], which still carries everything that was read. The output of
    /// a run is consumed by reading it, so each run has a single report.
    pub fn get_report(&self) -> Result<Report, Error> {
        self.check_state("report on", &[AppState::Exited])?;
        let job = self.job.as_deref().ok_or(Error::InvalidState {
            op: "report on",
            state: AppState::Destroyed.name(),
        })?;
        if !self.unread.replace(false) {
            return Err(Error::ReportTaken);
        }
        assemble(job, &self.filters, TIMEOUT)
    }

    /// Drops the unread output of the previous run so that the next report reads the next
    /// run.
    fn discard_output(&self) {
        let Some(job) = self.job.as_deref() else {
            return;
        };
        for id in self.filters.ids() {
            if let Err(e) = job.receive_many(id, TIMEOUT) {
                log::warn!("failed to discard output of the previous run: {e}");
            }
        }
    }

    /// Stops the generator if needed and releases every resource of the application.
    ///
    /// Releasing continues past failures; the first one is returned.
    pub fn destroy(mut self) -> Result<(), Error> {
        self.teardown()
    }

    /// The generator's argument vector.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// The lifecycle state.
    pub fn state(&self) -> AppState {
        self.state
    }

    fn check_state(&self, op: &'static str, allowed: &[AppState]) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                op,
                state: self.state.name(),
            })
        }
    }

    fn job_mut(&mut self, op: &'static str) -> Result<&mut Box<dyn Job>, Error> {
        self.job.as_mut().ok_or(Error::InvalidState {
            op,
            state: AppState::Destroyed.name(),
        })
    }

    fn teardown(&mut self) -> Result<(), Error> {
        if self.state == AppState::Destroyed {
            return Ok(());
        }
        self.state = AppState::Destroyed;
        let factory = self.factory;
        let agent = factory.agent();
        let mut first = None;
        let mut note = |res: Result<(), Error>| {
            if let Err(e) = res {
                log::error!("{agent}: {e}");
                first.get_or_insert(e);
            }
        };
        if let Some(mut job) = self.job.take() {
            note(job.destroy(TIMEOUT).map_err(Into::into));
        }
        for path in self.resources.files.drain(..) {
            note(factory.remove_file(&path).map_err(Into::into));
        }
        // CORRECTNESS: bindings are undone in reverse so a function bound twice ends up with
        // the driver it had first.
        while let Some(binding) = self.resources.bindings.pop() {
            note(iface::release(self.db, agent, &binding).map_err(Into::into));
        }
        log::debug!("{agent}: generator destroyed");
        first.map_or(Ok(()), Err)
    }
}

impl Drop for TrexApp<'_> {
    fn drop(&mut self) {
        // Errors are logged by `teardown`.
        let _ = self.teardown();
    }
}
