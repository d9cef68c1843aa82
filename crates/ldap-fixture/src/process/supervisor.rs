//! Launching and terminating the server process.

use crate::config::GatewayDefaults;
use crate::error::{FixtureError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Name of the runtime executable expected on `PATH`.
#[cfg(not(windows))]
const RUNTIME_BINARY: &str = "java";
#[cfg(windows)]
const RUNTIME_BINARY: &str = "java.exe";

/// Settings for launching the server jar.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Path to the server jar artifact.
    pub server_jar: PathBuf,
    /// Explicit runtime executable; when unset, `PATH` is searched.
    pub runtime: Option<PathBuf>,
    /// Gateway port handed to the server process on its command line.
    pub gateway_port: u16,
}

impl LaunchSettings {
    pub fn new(server_jar: impl Into<PathBuf>) -> Self {
        Self {
            server_jar: server_jar.into(),
            runtime: None,
            gateway_port: GatewayDefaults::GATEWAY_PORT,
        }
    }

    /// Use an explicit runtime executable instead of searching `PATH`.
    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Set the gateway port passed to the server process.
    pub fn with_gateway_port(mut self, port: u16) -> Self {
        self.gateway_port = port;
        self
    }
}

/// Handle to the spawned server process.
#[derive(Debug)]
pub struct ServerProcess {
    child: Option<Child>,
    pid: u32,
}

impl ServerProcess {
    /// Spawn the server process.
    ///
    /// Does not wait for the server to become ready. Its gateway listener
    /// comes up at an unpredictable point after the spawn, and the
    /// connector's retry loop owns that wait.
    pub fn launch(settings: &LaunchSettings) -> Result<Self> {
        if !settings.server_jar.is_file() {
            return Err(FixtureError::MissingServerJar(settings.server_jar.clone()));
        }

        let runtime = match &settings.runtime {
            Some(path) => {
                if !path.is_file() {
                    return Err(FixtureError::RuntimeNotFound {
                        binary: path.display().to_string(),
                    });
                }
                path.clone()
            }
            None => locate_runtime(RUNTIME_BINARY)?,
        };

        info!(
            "launching directory server: {} -jar {} --port {}",
            runtime.display(),
            settings.server_jar.display(),
            settings.gateway_port
        );

        let child = Command::new(&runtime)
            .arg("-jar")
            .arg(&settings.server_jar)
            .arg("--port")
            .arg(settings.gateway_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FixtureError::Launch {
                message: format!("failed to spawn {}", runtime.display()),
                source: Some(e),
            })?;

        let pid = child.id();
        debug!("directory server process started (pid {})", pid);

        Ok(Self {
            child: Some(child),
            pid,
        })
    }

    /// PID of the server process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Forcibly kill the process and reap it.
    ///
    /// Safe to call repeatedly; a no-op once the process has been reaped.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("failed to kill server process {}: {}", self.pid, e);
            }
            let _ = child.wait();
            info!("directory server process {} terminated", self.pid);
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Search `PATH` for the runtime executable.
fn locate_runtime(binary: &str) -> Result<PathBuf> {
    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if is_executable(&candidate) {
            debug!("runtime resolved to {}", candidate.display());
            return Ok(candidate);
        }
    }
    Err(FixtureError::RuntimeNotFound {
        binary: binary.to_string(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
