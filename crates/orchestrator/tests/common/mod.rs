//! In-memory Director and remote hosts for orchestrator integration tests.
//!
//! Each [`FakeHost`] keeps a tiny filesystem (files and directories keyed
//! by absolute path) and a table of scripts with scripted behaviour. All
//! hosts of a fixture append to one shared call log so tests can assert on
//! global ordering.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bbr_core::hashing::{checksum_key, sha256_hex, Checksums};
use bbr_core::instance::InstanceIdentity;
use bbr_core::script::{script_path, ScriptKind};
use bbr_orchestrator::config::OrchestratorConfig;
use bbr_orchestrator::Orchestrator;
use bbr_remote::director::{DirectorClient, DirectorError};
use bbr_remote::session::{CommandOutput, RemoteSession, SessionError, SessionProvider};
use tokio::sync::Notify;

pub const JOBS_ROOT: &str = "/var/vcap/jobs";
pub const SCRATCH: &str = "/var/vcap/store/bbr-backup";
pub const DEPLOYMENT: &str = "redis-dev";

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Action {
    Succeed,
    /// Exit with the given code, printing to both streams.
    Fail(i32),
    /// Print to stdout and succeed.
    Print(String),
    /// Write files below the artifact directory and succeed.
    WriteArtifact(Vec<(String, Vec<u8>)>),
    /// Copy everything below the artifact directory to another directory.
    CopyArtifactTo(String),
}

/// Side effect run after a script's action, outside the fake host.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct Script {
    pub action: Action,
    pub delay: Option<Duration>,
    /// Notified when the script starts running.
    pub started: Option<Arc<Notify>>,
    pub hook: Option<Hook>,
}

impl Script {
    pub fn ok() -> Self {
        Self::new(Action::Succeed)
    }

    pub fn fail(code: i32) -> Self {
        Self::new(Action::Fail(code))
    }

    pub fn print(stdout: &str) -> Self {
        Self::new(Action::Print(stdout.to_string()))
    }

    pub fn writes(files: &[(&str, &[u8])]) -> Self {
        Self::new(Action::WriteArtifact(
            files
                .iter()
                .map(|(path, data)| (path.to_string(), data.to_vec()))
                .collect(),
        ))
    }

    pub fn copies_to(dest: &str) -> Self {
        Self::new(Action::CopyArtifactTo(dest.to_string()))
    }

    pub fn slow(mut self, delay: Duration, started: Arc<Notify>) -> Self {
        self.delay = Some(delay);
        self.started = Some(started);
        self
    }

    pub fn then(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    fn new(action: Action) -> Self {
        Self {
            action,
            delay: None,
            started: None,
            hook: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    scripts: BTreeMap<String, Script>,
    extra_listing: Vec<String>,
    fail_cleanup: bool,
    slow_close: Option<(Duration, Arc<Notify>)>,
}

pub struct FakeHost {
    identity: InstanceIdentity,
    state: Mutex<HostState>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeHost {
    fn new(identity: InstanceIdentity, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            identity,
            state: Mutex::new(HostState::default()),
            log,
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Install `kind` for `job` with the given behaviour.
    pub fn script(&self, job: &str, kind: ScriptKind, script: Script) -> &Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(script_path(JOBS_ROOT, job, kind), script);
        self
    }

    /// Add a file that shows up in the script listing but is not a script.
    pub fn stray_file(&self, path: &str) -> &Self {
        self.state.lock().unwrap().extra_listing.push(path.to_string());
        self
    }

    pub fn create_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.insert(path.to_string());
    }

    pub fn fail_cleanup(&self) {
        self.state.lock().unwrap().fail_cleanup = true;
    }

    /// Make `close` take `delay`, notifying `started` when it begins.
    pub fn slow_close(&self, delay: Duration, started: Arc<Notify>) {
        self.state.lock().unwrap().slow_close = Some((delay, started));
    }

    pub fn exists(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        exists_in(&state, path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn perform(&self, action: &Action, path: &str, env: &[(String, String)]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        match action {
            Action::Succeed => CommandOutput::default(),
            Action::Fail(code) => CommandOutput {
                stdout: format!("{path} stdout"),
                stderr: format!("{path} stderr"),
                exit_code: *code,
            },
            Action::Print(stdout) => CommandOutput {
                stdout: stdout.clone(),
                ..Default::default()
            },
            Action::WriteArtifact(files) => {
                let dir = artifact_dir(env).unwrap_or_default();
                for (rel, data) in files {
                    state.files.insert(format!("{dir}/{rel}"), data.clone());
                }
                CommandOutput::default()
            }
            Action::CopyArtifactTo(dest) => {
                let dir = artifact_dir(env).unwrap_or_default();
                for (rel, data) in files_below(&state, &dir) {
                    state.files.insert(format!("{dest}/{rel}"), data);
                }
                CommandOutput::default()
            }
        }
    }

    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {entry}", self.identity));
    }
}

fn exists_in(state: &HostState, path: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    state.dirs.contains(path.trim_end_matches('/'))
        || state.files.contains_key(path)
        || state.dirs.iter().any(|d| d.starts_with(&prefix))
        || state.files.keys().any(|f| f.starts_with(&prefix))
}

fn files_below(state: &HostState, dir: &str) -> Vec<(String, Vec<u8>)> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    state
        .files
        .iter()
        .filter_map(|(path, data)| {
            path.strip_prefix(&prefix)
                .map(|rel| (rel.to_string(), data.clone()))
        })
        .collect()
}

fn add_dir_with_parents(state: &mut HostState, path: &str) {
    let mut current = String::new();
    for part in path.trim_matches('/').split('/') {
        current.push('/');
        current.push_str(part);
        state.dirs.insert(current.clone());
    }
}

fn artifact_dir(env: &[(String, String)]) -> Option<String> {
    env.iter()
        .find(|(k, _)| k == "BBR_ARTIFACT_DIRECTORY")
        .map(|(_, v)| v.trim_end_matches('/').to_string())
}

pub fn tar_of(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, path, data.as_slice())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

#[async_trait]
impl RemoteSession for FakeHost {
    fn instance(&self) -> &InstanceIdentity {
        &self.identity
    }

    async fn run_script(
        &self,
        path: &str,
        env: &[(String, String)],
    ) -> Result<CommandOutput, SessionError> {
        self.record(format!("run {path}"));
        let script = self.state.lock().unwrap().scripts.get(path).cloned();
        let Some(script) = script else {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("{path}: not found"),
                exit_code: 127,
            });
        };

        if let Some(started) = &script.started {
            started.notify_one();
        }
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        let output = self.perform(&script.action, path, env);
        if let Some(hook) = &script.hook {
            hook();
        }
        Ok(output)
    }

    async fn list_job_scripts(&self, jobs_root: &str) -> Result<Vec<String>, SessionError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .scripts
            .keys()
            .chain(state.extra_listing.iter())
            .filter(|p| p.starts_with(jobs_root))
            .cloned()
            .collect())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, SessionError> {
        Ok(self.exists(path))
    }

    async fn create_directory(&self, path: &str) -> Result<(), SessionError> {
        self.record(format!("mkdir {path}"));
        add_dir_with_parents(&mut self.state.lock().unwrap(), path);
        Ok(())
    }

    async fn remove_directory(&self, path: &str) -> Result<(), SessionError> {
        self.record(format!("rm {path}"));
        let mut state = self.state.lock().unwrap();
        if state.fail_cleanup {
            return Err(SessionError::CommandFailed {
                command: format!("rm -rf {path}"),
                exit_code: 1,
                stderr: "permission denied".into(),
            });
        }
        let root = path.trim_end_matches('/').to_string();
        let prefix = format!("{root}/");
        state.dirs.retain(|d| *d != root && !d.starts_with(&prefix));
        state.files.retain(|f, _| *f != root && !f.starts_with(&prefix));
        Ok(())
    }

    async fn download_directory(
        &self,
        path: &str,
        destination: &Path,
    ) -> Result<u64, SessionError> {
        let archive = {
            let state = self.state.lock().unwrap();
            if !exists_in(&state, path) {
                return Err(SessionError::CommandFailed {
                    command: format!("tar -C {path} -cf - ."),
                    exit_code: 2,
                    stderr: "No such file or directory".into(),
                });
            }
            tar_of(&files_below(&state, path))
        };
        tokio::fs::write(destination, &archive).await?;
        Ok(archive.len() as u64)
    }

    async fn upload_directory(&self, path: &str, source: &Path) -> Result<(), SessionError> {
        self.record(format!("upload {path}"));
        let archive = tokio::fs::read(source).await?;
        let mut state = self.state.lock().unwrap();
        add_dir_with_parents(&mut state, path);
        let mut tar = tar::Archive::new(archive.as_slice());
        for entry in tar.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let rel = entry.path()?.to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            state
                .files
                .insert(format!("{}/{rel}", path.trim_end_matches('/')), data);
        }
        Ok(())
    }

    async fn checksum_directory(&self, path: &str) -> Result<Checksums, SessionError> {
        let state = self.state.lock().unwrap();
        Ok(files_below(&state, path)
            .into_iter()
            .map(|(rel, data)| (checksum_key(&rel), sha256_hex(&data)))
            .collect())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.record("close".to_string());
        let slow = self.state.lock().unwrap().slow_close.clone();
        if let Some((delay, started)) = slow {
            started.notify_one();
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Director and provider
// ---------------------------------------------------------------------------

pub struct FakeDirector {
    instances: Vec<InstanceIdentity>,
    manifest: String,
}

#[async_trait]
impl DirectorClient for FakeDirector {
    async fn list_instances(
        &self,
        _deployment: &str,
    ) -> Result<Vec<InstanceIdentity>, DirectorError> {
        Ok(self.instances.clone())
    }

    async fn download_manifest(&self, _deployment: &str) -> Result<String, DirectorError> {
        Ok(self.manifest.clone())
    }
}

pub struct FakeSessionProvider {
    hosts: Vec<Arc<FakeHost>>,
    unreachable: HashSet<String>,
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    async fn open(
        &self,
        instance: &InstanceIdentity,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        if self.unreachable.contains(&instance.id) {
            return Err(SessionError::Connect {
                address: instance.address.clone(),
                message: "connection refused".into(),
            });
        }
        let host = self
            .hosts
            .iter()
            .find(|h| h.identity.id == instance.id)
            .cloned()
            .ok_or_else(|| SessionError::Connect {
                address: instance.address.clone(),
                message: "unknown host".into(),
            })?;
        host.record("open".to_string());
        Ok(host as Arc<dyn RemoteSession>)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub hosts: Vec<Arc<FakeHost>>,
    pub log: Arc<Mutex<Vec<String>>>,
    pub unreachable: HashSet<String>,
    pub manifest: String,
}

impl Fixture {
    /// A deployment with one host per `(group, index)`.
    pub fn new(instances: &[(&str, u32)]) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hosts = instances
            .iter()
            .map(|(group, index)| {
                let identity = InstanceIdentity::new(
                    *group,
                    *index,
                    format!("{group}-{index}-id"),
                    format!("10.0.{index}.1"),
                );
                Arc::new(FakeHost::new(identity, Arc::clone(&log)))
            })
            .collect();
        Self {
            hosts,
            log,
            unreachable: HashSet::new(),
            manifest: "name: redis-dev\n".to_string(),
        }
    }

    pub fn host(&self, i: usize) -> &FakeHost {
        &self.hosts[i]
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let director = FakeDirector {
            instances: self.hosts.iter().map(|h| h.identity.clone()).collect(),
            manifest: self.manifest.clone(),
        };
        let provider = FakeSessionProvider {
            hosts: self.hosts.clone(),
            unreachable: self.unreachable.clone(),
        };
        let config = OrchestratorConfig {
            jobs_root: JOBS_ROOT.to_string(),
            scratch_dir: SCRATCH.to_string(),
            max_parallel_instances: 4,
        };
        Orchestrator::new(Arc::new(director), Arc::new(provider), config)
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Script runs, as `"<group>/<index> <job> <kind>"`, in call order.
    pub fn script_runs(&self) -> Vec<String> {
        let prefix = format!("{JOBS_ROOT}/");
        self.calls()
            .into_iter()
            .filter_map(|entry| {
                let (instance, rest) = entry.split_once(' ')?;
                let path = rest.strip_prefix("run ")?;
                let rel = path.strip_prefix(&prefix)?;
                let (job, tail) = rel.split_once('/')?;
                let kind = tail.rsplit('/').next()?;
                Some(format!("{instance} {job} {kind}"))
            })
            .collect()
    }

    /// Script runs of `kind` only.
    pub fn runs_of(&self, kind: ScriptKind) -> Vec<String> {
        let suffix = format!(" {}", kind.file_name());
        self.script_runs()
            .into_iter()
            .filter(|r| r.ends_with(&suffix))
            .collect()
    }

    /// Mutating remote calls (script runs other than `metadata`, mkdir,
    /// upload, rm).
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                (c.contains(" run ") && !c.ends_with("/metadata"))
                    || c.contains(" mkdir ")
                    || c.contains(" upload ")
                    || c.contains(" rm ")
            })
            .collect()
    }
}

/// Sub-directories of `parent`, by name.
pub fn dirs_in(parent: &Path) -> Vec<String> {
    std::fs::read_dir(parent)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}
