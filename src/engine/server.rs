//! Lifecycle of auxiliary server processes.
//!
//! A [`ServerGroup`] owns every server started for one target and repetition.
//! Dropping it shuts down whatever is still running, so servers never
//! outlive the scope that started them.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{BenchError, BenchResult};

use super::capture::status_value;
use super::environment::ChildEnv;
use super::template::Substitutions;

/// An auxiliary server declared by a benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    #[serde(default = "default_server_name")]
    pub name: String,
    pub cmd: String,
    /// Run once the server has settled.
    #[serde(default)]
    pub prepare_cmds: Vec<String>,
    /// Run before the server is terminated.
    #[serde(default)]
    pub shutdown_cmds: Vec<String>,
}

fn default_server_name() -> String {
    "server".to_string()
}

/// How servers are launched and torn down.
#[derive(Debug, Clone)]
pub struct ServerOptions<'a> {
    /// Words placed before each server command (measurement wrapper and the
    /// target's command prefix).
    pub prefix: &'a [String],
    pub env: &'a ChildEnv,
    pub cwd: Option<&'a Path>,
    pub settle: Duration,
    pub grace: Duration,
}

#[derive(Debug)]
struct RunningServer {
    name: String,
    child: Child,
    output: std::fs::File,
    shutdown_cmds: Vec<Vec<String>>,
}

/// Servers started for one target and repetition.
#[derive(Debug)]
pub struct ServerGroup {
    servers: Vec<RunningServer>,
    env: ChildEnv,
    grace: Duration,
}

impl ServerGroup {
    /// An empty group, for benchmarks without servers.
    pub fn none() -> Self {
        ServerGroup {
            servers: Vec::new(),
            env: ChildEnv::default(),
            grace: Duration::ZERO,
        }
    }

    /// Start every server in order. If one fails, the ones already started
    /// are shut down again and the error is returned.
    pub fn start(
        specs: &[ServerSpec],
        subs: &Substitutions,
        options: &ServerOptions<'_>,
    ) -> BenchResult<Self> {
        let mut group = ServerGroup {
            servers: Vec::with_capacity(specs.len()),
            env: options.env.clone(),
            grace: options.grace,
        };
        for spec in specs {
            let server = start_one(spec, subs, options)?;
            group.servers.push(server);

            for prepare in &spec.prepare_cmds {
                info!(server = %spec.name, "preparing");
                let argv = subs.render_argv(prepare)?;
                run_aux(&argv, &group.env, options.cwd)?;
            }
        }
        Ok(group)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.servers.iter().map(|s| s.child.id()).collect()
    }

    /// `key` from each live server's `/proc/<pid>/status`, as
    /// `(server name, value)`.
    pub fn status_values(&self, key: &str) -> Vec<(String, String)> {
        self.servers
            .iter()
            .filter_map(|s| {
                let text = std::fs::read_to_string(format!("/proc/{}/status", s.child.id())).ok()?;
                Some((s.name.clone(), status_value(&text, key)?))
            })
            .collect()
    }

    /// Run shutdown commands and terminate every server, last started first.
    pub fn shutdown(&mut self) {
        while let Some(mut server) = self.servers.pop() {
            if matches!(server.child.try_wait(), Ok(Some(_))) {
                debug!(server = %server.name, "already exited");
                continue;
            }
            info!(server = %server.name, "shutting down");
            for argv in &server.shutdown_cmds {
                if let Err(e) = run_aux(argv, &self.env, None) {
                    warn!(server = %server.name, error = %e, "shutdown command failed");
                }
            }
            terminate(&mut server.child, self.grace);
            debug!(server = %server.name, output = %read_back(&mut server.output), "server output");
        }
    }
}

impl Drop for ServerGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_one(
    spec: &ServerSpec,
    subs: &Substitutions,
    options: &ServerOptions<'_>,
) -> BenchResult<RunningServer> {
    let mut argv = options.prefix.to_vec();
    argv.extend(subs.render_argv(&spec.cmd)?);
    let shutdown_cmds = spec
        .shutdown_cmds
        .iter()
        .map(|c| subs.render_argv(c))
        .collect::<Result<Vec<_>, _>>()?;

    let Some((program, args)) = argv.split_first() else {
        return Err(BenchError::Config(format!("server '{}' has an empty command", spec.name)));
    };

    info!(server = %spec.name, "starting");
    debug!(server = %spec.name, argv = ?argv, "server command");

    // stdout and stderr share one scratch file so a chatty server cannot
    // block on a full pipe
    let mut output = tempfile::tempfile()?;
    let mut cmd = Command::new(options.env.resolve(program));
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output.try_clone()?))
        .stderr(Stdio::from(output.try_clone()?));
    options.env.apply(&mut cmd);
    if let Some(dir) = options.cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd
        .spawn()
        .map_err(|e| BenchError::Message(format!("failed to spawn {}: {e}", spec.name)))?;

    std::thread::sleep(options.settle);

    if let Some(status) = child.try_wait()? {
        debug!(server = %spec.name, output = %read_back(&mut output), "server output");
        return Err(BenchError::Message(format!(
            "starting {} failed with {status}",
            spec.name
        )));
    }

    Ok(RunningServer {
        name: spec.name.clone(),
        child,
        output,
        shutdown_cmds,
    })
}

/// Run a preparation or shutdown command to completion.
fn run_aux(argv: &[String], env: &ChildEnv, cwd: Option<&Path>) -> BenchResult<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let mut cmd = Command::new(env.resolve(program));
    cmd.args(args).stdin(Stdio::null());
    env.apply(&mut cmd);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let out = cmd
        .output()
        .map_err(|e| BenchError::Message(format!("failed to run {program}: {e}")))?;
    debug!(
        argv = ?argv,
        stdout = %String::from_utf8_lossy(&out.stdout),
        stderr = %String::from_utf8_lossy(&out.stderr),
        "auxiliary command finished"
    );
    if !out.status.success() {
        warn!(argv = ?argv, status = %out.status, "auxiliary command failed");
    }
    Ok(())
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
fn terminate(child: &mut Child, grace: Duration) {
    if let Err(e) = send_sigterm(child.id()) {
        debug!(pid = child.id(), error = %e, "SIGTERM not delivered");
    }
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if start.elapsed() < grace => std::thread::sleep(Duration::from_millis(50)),
            _ => break,
        }
    }
    warn!(pid = child.id(), "server ignored SIGTERM, killing");
    let _ = child.kill();
    let _ = child.wait();
}

fn read_back(file: &mut std::fs::File) -> String {
    let mut text = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() {
        let _ = file.read_to_string(&mut text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options<'a>(env: &'a ChildEnv, grace: Duration) -> ServerOptions<'a> {
        ServerOptions {
            prefix: &[],
            env,
            cwd: None,
            settle: Duration::from_millis(100),
            grace,
        }
    }

    fn alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
            && !std::fs::read_to_string(format!("/proc/{pid}/status"))
                .map(|s| s.contains("State:\tZ"))
                .unwrap_or(true)
    }

    #[test]
    fn test_start_and_shutdown() {
        let env = ChildEnv::inherited();
        let spec = ServerSpec {
            name: "sleeper".into(),
            cmd: "sleep 30".into(),
            ..Default::default()
        };
        let mut group =
            ServerGroup::start(&[spec], &Substitutions::new(), &options(&env, Duration::from_secs(2)))
                .unwrap();
        let pids = group.pids();
        assert_eq!(pids.len(), 1);
        assert!(alive(pids[0]));
        group.shutdown();
        assert!(group.is_empty());
        assert!(!alive(pids[0]));
    }

    #[test]
    fn test_early_exit_is_startup_failure() {
        let env = ChildEnv::inherited();
        let spec = ServerSpec {
            name: "broken".into(),
            cmd: "sh -c 'exit 3'".into(),
            ..Default::default()
        };
        let err = ServerGroup::start(&[spec], &Substitutions::new(), &options(&env, Duration::ZERO))
            .unwrap_err();
        assert!(err.to_string().contains("starting broken failed"));
    }

    #[test]
    fn test_sigterm_ignored_escalates_to_kill() {
        let env = ChildEnv::inherited();
        let spec = ServerSpec {
            name: "stubborn".into(),
            cmd: "sh -c 'trap \"\" TERM; while true; do sleep 1; done'".into(),
            ..Default::default()
        };
        let group = ServerGroup::start(
            &[spec],
            &Substitutions::new(),
            &options(&env, Duration::from_millis(200)),
        )
        .unwrap();
        let pid = group.pids()[0];
        drop(group);
        assert!(!alive(pid));
    }

    #[test]
    fn test_shutdown_cmds_run_before_termination() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopped");
        let mut subs = Substitutions::new();
        subs.set("marker", marker.to_string_lossy());
        let env = ChildEnv::inherited();
        let spec = ServerSpec {
            name: "svc".into(),
            cmd: "sleep 30".into(),
            prepare_cmds: vec!["true".into()],
            shutdown_cmds: vec!["touch {marker}".into()],
        };
        let mut group = ServerGroup::start(&[spec], &subs, &options(&env, Duration::from_secs(1))).unwrap();
        assert!(!marker.exists());
        group.shutdown();
        assert!(marker.exists());
    }
}
