//! Liveness of self-registered processes on this machine.
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

use crate::error::{DescriptorError, StatusError};
use crate::model::{LOCAL_SERVER, ServiceStatus, ServiceType};

/// Identity a monitored process writes about itself into the status directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub pid: u32,
    /// Command-line the process was started with, script first.
    pub cmdline: Vec<String>,
}

impl Descriptor {
    /// Reads and validates one descriptor file.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path).map_err(|source| DescriptorError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let descriptor: Descriptor =
            serde_json::from_str(&content).map_err(|source| DescriptorError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        if descriptor.cmdline.is_empty() {
            return Err(DescriptorError::EmptyCmdline(path.to_path_buf()));
        }
        Ok(descriptor)
    }
}

/// A process as seen in the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveProcess {
    /// Executable name.
    pub name: String,
    pub cmdline: Vec<String>,
}

/// Read access to the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Returns the processes that currently exist among `pids`. Missing pids are absent.
    fn lookup(&self, pids: &[u32]) -> HashMap<u32, LiveProcess>;
}

/// Process table backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn lookup(&self, pids: &[u32]) -> HashMap<u32, LiveProcess> {
        if pids.is_empty() {
            return HashMap::new();
        }

        let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&targets),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        targets
            .iter()
            .filter_map(|pid| {
                let process = system.process(*pid)?;
                // A zombie has already exited; only its table entry remains.
                if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                    return None;
                }
                Some((
                    pid.as_u32(),
                    LiveProcess {
                        name: process.name().to_string_lossy().into_owned(),
                        cmdline: process
                            .cmd()
                            .iter()
                            .map(|arg| arg.to_string_lossy().into_owned())
                            .collect(),
                    },
                ))
            })
            .collect()
    }
}

/// Reads every descriptor in `dir`, skipping unreadable ones.
///
/// A missing directory means nothing has registered yet and yields no descriptors.
pub fn read_descriptors(dir: &Path) -> Result<Vec<Descriptor>, StatusError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("status directory {} does not exist yet", dir.display());
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(StatusError::StatusDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        match Descriptor::load(&path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => warn!("skipping descriptor: {err}"),
        }
    }
    Ok(descriptors)
}

/// Decides whether a descriptor is backed by the live process carrying its pid.
///
/// The live process must run the recorded script as its first argument and its executable
/// name must start with `interpreter_prefix`; anything else is a reused pid.
pub fn is_alive(
    descriptor: &Descriptor,
    live: Option<&LiveProcess>,
    interpreter_prefix: &str,
) -> bool {
    let Some(live) = live else {
        return false;
    };

    let same_script = match (live.cmdline.get(1), descriptor.cmdline.first()) {
        (Some(actual), Some(expected)) => actual == expected,
        _ => false,
    };

    same_script && live.name.starts_with(interpreter_prefix)
}

/// Probes every registered local process. All entries carry `server = "local"`.
pub fn probe_local(
    dir: &Path,
    interpreter_prefix: &str,
    table: &dyn ProcessTable,
) -> Result<Vec<ServiceStatus>, StatusError> {
    let descriptors = read_descriptors(dir)?;
    let pids: Vec<u32> = descriptors.iter().map(|d| d.pid).collect();
    let live = table.lookup(&pids);
    let service_type = ServiceType::from_interpreter(interpreter_prefix);

    Ok(descriptors
        .into_iter()
        .map(|descriptor| {
            let process = live.get(&descriptor.pid);
            let online = is_alive(&descriptor, process, interpreter_prefix);
            if !online && process.is_some() {
                debug!(
                    "pid {} no longer belongs to '{}', reporting offline",
                    descriptor.pid, descriptor.name
                );
            }
            if online {
                ServiceStatus::online(descriptor.name, LOCAL_SERVER, service_type)
            } else {
                ServiceStatus::offline(descriptor.name, LOCAL_SERVER)
            }
        })
        .collect())
}
