use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::addr::PciAddr;
use crate::db::{ConfigDb, DbError};
use crate::job::{
    FilterDesc, FilterId, Job, JobDesc, JobError, JobFactory, JobStatus, LineFilter, Message,
    Stream, SIGKILL, SIGTERM,
};

/// A traffic profile template using every generated variable.
pub(crate) const ASTF_TEMPLATE: &str = r#"{
  "buf_list": ["${CLIENT_HTTP[0]|base64}", "${SERVER_HTTP[0]|base64}"],
  "ip_gen_dist_client": {
    "ip_start": "${CLIENT_IP_START[0]:-16.0.0.1}",
    "ip_end": "${CLIENT_IP_END[0]:-16.0.0.255}",
    "ip_offset": "${CLIENT_IP_OFFSET[0]:-1.0.0.0}"
  },
  "ip_gen_dist_server": {
    "ip_start": "${SERVER_IP_START[0]:-48.0.0.1}",
    "ip_end": "${SERVER_IP_END[0]:-48.0.255.255}",
    "ip_offset": "${SERVER_IP_OFFSET[0]:-1.0.0.0}"
  },
  "port": ${SERVER_IP_PORT[0]:-80}
}"#;

/// Two per-port sampling blocks of a two-port generator.
pub(crate) const PORT_STATS: &[&str] = &[
    "current time    : 1.0 sec  ",
    "test duration   : 5.0 sec  ",
    "      ports |               0 |               1 ",
    "   opackets |            1000 |             990 ",
    "     obytes |           90000 |           89100 ",
    "   ipackets |             990 |            1000 ",
    "     ibytes |           89100 |           90000 ",
    "    ierrors |               0 |               0 ",
    "    oerrors |               0 |               0 ",
    "current time    : 2.0 sec  ",
    "test duration   : 5.0 sec  ",
    "      ports |               0 |               1 ",
    "   opackets |            3000 |            2970 ",
    "     obytes |          270000 |          267300 ",
    "   ipackets |            2970 |            3000 ",
    "     ibytes |          267300 |          270000 ",
    "    ierrors |               0 |               0 ",
    "    oerrors |               0 |               0 ",
];

/// Output and outcome of one scripted run.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockRun {
    stdout: Vec<String>,
    stderr: Vec<String>,
    /// `None` runs until stopped.
    status: Option<JobStatus>,
}

impl MockRun {
    pub(crate) fn exiting(stdout: &[&str], status: JobStatus) -> Self {
        Self {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: Vec::new(),
            status: Some(status),
        }
    }

    pub(crate) fn until_stopped(stdout: &[&str]) -> Self {
        Self {
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: Vec::new(),
            status: None,
        }
    }

    pub(crate) fn with_stderr(mut self, stderr: &[&str]) -> Self {
        self.stderr = stderr.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    files: BTreeMap<PathBuf, String>,
    removed: Vec<PathBuf>,
    runs: VecDeque<MockRun>,
    events: Vec<String>,
    jobs: Vec<JobDesc>,
    refuse_writes: bool,
}

/// An in-memory job factory. Jobs replay scripted runs in order.
#[derive(Debug, Clone)]
pub(crate) struct MockFactory {
    agent: String,
    state: Rc<RefCell<FactoryState>>,
}

impl MockFactory {
    pub(crate) fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_owned(),
            state: Default::default(),
        }
    }

    pub(crate) fn with_run(self, run: MockRun) -> Self {
        self.state.borrow_mut().runs.push_back(run);
        self
    }

    pub(crate) fn refusing_writes(self) -> Self {
        self.state.borrow_mut().refuse_writes = true;
        self
    }

    pub(crate) fn files(&self) -> BTreeMap<PathBuf, String> {
        self.state.borrow().files.clone()
    }

    pub(crate) fn removed(&self) -> Vec<PathBuf> {
        self.state.borrow().removed.clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub(crate) fn jobs(&self) -> Vec<JobDesc> {
        self.state.borrow().jobs.clone()
    }
}

impl JobFactory for MockFactory {
    fn agent(&self) -> &str {
        &self.agent
    }

    fn create_job(&self, desc: JobDesc) -> Result<Box<dyn Job>, JobError> {
        let job = ScriptedJob::new(desc.filters.clone(), Some(Rc::clone(&self.state)))?;
        self.state.borrow_mut().jobs.push(desc);
        Ok(Box::new(job))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), JobError> {
        let mut state = self.state.borrow_mut();
        if state.refuse_writes {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into());
        }
        state.files.insert(path.to_owned(), contents.to_owned());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), JobError> {
        let mut state = self.state.borrow_mut();
        state
            .files
            .remove(path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        state.removed.push(path.to_owned());
        Ok(())
    }
}

/// A job whose output is scripted.
#[derive(Debug)]
pub(crate) struct ScriptedJob {
    filters: Vec<LineFilter>,
    queues: RefCell<Vec<VecDeque<Message>>>,
    factory: Option<Rc<RefCell<FactoryState>>>,
    running: Option<MockRun>,
}

impl ScriptedJob {
    fn new(
        descs: Vec<FilterDesc>,
        factory: Option<Rc<RefCell<FactoryState>>>,
    ) -> Result<Self, JobError> {
        let filters = descs
            .into_iter()
            .map(LineFilter::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            queues: RefCell::new(vec![VecDeque::new(); filters.len()]),
            filters,
            factory,
            running: None,
        })
    }

    /// A job that printed `stdout` and exited.
    pub(crate) fn finished(descs: Vec<FilterDesc>, stdout: &[&str]) -> Result<Self, JobError> {
        let job = Self::new(descs, None)?;
        job.emit(Stream::Stdout, stdout.iter().copied());
        job.close();
        Ok(job)
    }

    /// A job that printed `stdout` and is still running.
    pub(crate) fn running(descs: Vec<FilterDesc>, stdout: &[&str]) -> Result<Self, JobError> {
        let job = Self::new(descs, None)?;
        job.emit(Stream::Stdout, stdout.iter().copied());
        Ok(job)
    }

    fn emit<'a>(&self, stream: Stream, lines: impl Iterator<Item = &'a str>) {
        let mut queues = self.queues.borrow_mut();
        for line in lines {
            for (filter, queue) in self.filters.iter().zip(queues.iter_mut()) {
                if filter.desc().stream == stream {
                    if let Some(data) = filter.feed(line) {
                        queue.push_back(Message::Data(data));
                    }
                }
            }
        }
    }

    fn close(&self) {
        let mut queues = self.queues.borrow_mut();
        for (filter, queue) in self.filters.iter().zip(queues.iter_mut()) {
            if filter.desc().readable {
                queue.push_back(Message::Eos);
            }
        }
    }

    fn event(&self, event: String) {
        if let Some(state) = &self.factory {
            state.borrow_mut().events.push(event);
        }
    }

    /// Ends the current run; `status` applies if the run would not have ended by itself.
    fn finish(&mut self, status: JobStatus) -> Option<JobStatus> {
        let run = self.running.take()?;
        self.emit(Stream::Stdout, run.stdout.iter().map(String::as_str));
        self.emit(Stream::Stderr, run.stderr.iter().map(String::as_str));
        self.close();
        Some(run.status.unwrap_or(status))
    }
}

impl Job for ScriptedJob {
    fn set_workdir(&mut self, dir: &Path) -> Result<(), JobError> {
        self.event(format!("workdir {}", dir.display()));
        Ok(())
    }

    fn start(&mut self) -> Result<(), JobError> {
        if self.running.is_some() {
            return Err(JobError::InProgress);
        }
        let run = self
            .factory
            .as_ref()
            .and_then(|state| state.borrow_mut().runs.pop_front())
            .unwrap_or_else(|| MockRun::exiting(&[], JobStatus::Exited(0)));
        self.running = Some(run);
        self.event("start".into());
        Ok(())
    }

    fn wait(&mut self, _timeout: Option<Duration>) -> Result<JobStatus, JobError> {
        let exits = match &self.running {
            None => return Err(JobError::NotRunning),
            Some(run) => run.status.is_some(),
        };
        if !exits {
            return Err(JobError::InProgress);
        }
        self.finish(JobStatus::Exited(0))
            .ok_or(JobError::NotRunning)
    }

    fn stop(&mut self, signum: i32, _grace: Duration) -> Result<(), JobError> {
        self.event(format!("stop {signum}"));
        self.finish(JobStatus::Signaled(signum));
        Ok(())
    }

    fn kill(&mut self, signum: i32) -> Result<(), JobError> {
        if self.running.is_none() {
            return Err(JobError::NotRunning);
        }
        self.event(format!("kill {signum}"));
        if signum == SIGKILL {
            self.finish(JobStatus::Signaled(signum));
        }
        Ok(())
    }

    fn receive_many(&self, filter: FilterId, _timeout: Duration) -> Result<Vec<Message>, JobError> {
        if !self
            .filters
            .get(filter.inner())
            .map_or(false, |f| f.desc().readable)
        {
            return Err(JobError::UnknownFilter(filter));
        }
        let mut queues = self.queues.borrow_mut();
        let queue = &mut queues[filter.inner()];
        let mut messages = Vec::new();
        while let Some(message) = queue.pop_front() {
            let eos = message == Message::Eos;
            messages.push(message);
            if eos {
                break;
            }
        }
        Ok(messages)
    }

    fn destroy(&mut self, _grace: Duration) -> Result<(), JobError> {
        self.event("destroy".into());
        self.finish(JobStatus::Signaled(SIGTERM));
        Ok(())
    }
}

/// An in-memory configuration database recording lookups and driver changes.
#[derive(Debug, Default)]
pub(crate) struct MockDb {
    interfaces: BTreeMap<String, PciAddr>,
    instances: Vec<(String, String, PciAddr)>,
    drivers: RefCell<BTreeMap<PciAddr, Option<String>>>,
    refuse: Option<PciAddr>,
    lookups: RefCell<Vec<String>>,
    binds: RefCell<Vec<String>>,
}

impl MockDb {
    pub(crate) fn with_interface(mut self, ifname: &str, addr: PciAddr) -> Self {
        self.interfaces.insert(ifname.to_owned(), addr);
        self.drivers.get_mut().entry(addr).or_insert(None);
        self
    }

    pub(crate) fn with_device(mut self, addr: PciAddr, driver: &str) -> Self {
        self.drivers.get_mut().insert(addr, Some(driver.to_owned()));
        self
    }

    pub(crate) fn with_instance(mut self, vendor: &str, device: &str, addr: PciAddr) -> Self {
        self.instances
            .push((vendor.to_owned(), device.to_owned(), addr));
        self.drivers.get_mut().entry(addr).or_insert(None);
        self
    }

    pub(crate) fn refusing(mut self, addr: PciAddr) -> Self {
        self.refuse = Some(addr);
        self
    }

    pub(crate) fn lookups(&self) -> Vec<String> {
        self.lookups.borrow().clone()
    }

    pub(crate) fn binds(&self) -> Vec<String> {
        self.binds.borrow().clone()
    }

    pub(crate) fn driver_of(&self, addr: PciAddr) -> Option<String> {
        self.drivers.borrow().get(&addr).cloned().flatten()
    }

    fn known(&self, addr: PciAddr) -> Result<(), DbError> {
        if self.drivers.borrow().contains_key(&addr) {
            Ok(())
        } else {
            Err(DbError::NotFound(format!("PCI function {addr}")))
        }
    }
}

impl ConfigDb for MockDb {
    fn interface_pci_addr(&self, agent: &str, ifname: &str) -> Result<PciAddr, DbError> {
        self.lookups
            .borrow_mut()
            .push(format!("{agent} interface {ifname}"));
        self.interfaces
            .get(ifname)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("interface {ifname} on {agent}")))
    }

    fn device_pci_addr(&self, agent: &str, addr: PciAddr) -> Result<PciAddr, DbError> {
        self.lookups.borrow_mut().push(format!("{agent} device {addr}"));
        self.known(addr).map(|()| addr)
    }

    fn instance_pci_addr(
        &self,
        agent: &str,
        vendor: &str,
        device: &str,
        instance: u32,
    ) -> Result<PciAddr, DbError> {
        self.lookups
            .borrow_mut()
            .push(format!("{agent} instance {vendor}:{device}#{instance}"));
        let mut matching = self
            .instances
            .iter()
            .filter(|(v, d, _)| v == vendor && d == device)
            .map(|&(_, _, addr)| addr)
            .collect::<Vec<_>>();
        matching.sort();
        matching
            .get(instance as usize)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("{vendor}:{device} instance {instance}")))
    }

    fn pci_driver(&self, _agent: &str, addr: PciAddr) -> Result<Option<String>, DbError> {
        self.known(addr)?;
        Ok(self.driver_of(addr))
    }

    fn bind_driver(&self, _agent: &str, addr: PciAddr, driver: &str) -> Result<(), DbError> {
        self.known(addr)?;
        if self.refuse == Some(addr) {
            return Err(DbError::Refused {
                addr,
                driver: driver.to_owned(),
                source: io::Error::new(io::ErrorKind::Other, "device busy"),
            });
        }
        self.binds.borrow_mut().push(format!("bind {addr} {driver}"));
        self.drivers
            .borrow_mut()
            .insert(addr, Some(driver.to_owned()));
        Ok(())
    }

    fn unbind_driver(&self, _agent: &str, addr: PciAddr) -> Result<(), DbError> {
        self.known(addr)?;
        self.binds.borrow_mut().push(format!("unbind {addr}"));
        self.drivers.borrow_mut().insert(addr, None);
        Ok(())
    }
}
