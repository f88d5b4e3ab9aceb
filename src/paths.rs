//! Socket and pid file locations.
//!
//! Both files live in the runtime directory and are named after the server
//! plus a short hash of the start script, so two copies of the same binary in
//! different locations never share a socket.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use sha2::{Digest, Sha256};

use crate::config::Config;

/// Resolved runtime file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub socket: PathBuf,
    pub pid_file: PathBuf,
}

impl RuntimePaths {
    /// Paths for the running executable.
    pub fn for_current_exe(config: &Config) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::for_script(config, &exe))
    }

    /// Paths for an explicit start script.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use procvisor::{Config, RuntimePaths};
    ///
    /// let mut cfg = Config::default();
    /// cfg.name = "shop".into();
    /// cfg.runtime_dir = "/run/shop".into();
    ///
    /// let paths = RuntimePaths::for_script(&cfg, Path::new("/srv/shop/server"));
    /// assert!(paths.socket.starts_with("/run/shop"));
    /// assert_eq!(paths.socket.extension().unwrap(), "socket");
    /// assert_eq!(paths.pid_file.extension().unwrap(), "pid");
    /// ```
    pub fn for_script(config: &Config, script: &Path) -> Self {
        let stem = format!("{}.{}", config.name, script_hash(script));
        Self {
            socket: config.runtime_dir.join(format!("{stem}.socket")),
            pid_file: config.runtime_dir.join(format!("{stem}.pid")),
        }
    }

    /// Pid recorded in the pid file.
    pub fn read_pid(&self) -> Option<i32> {
        fs::read_to_string(&self.pid_file).ok()?.trim().parse().ok()
    }

    /// Pid of the live master owning these paths.
    ///
    /// A pid file left behind by a dead master yields `None`.
    pub fn running_pid(&self) -> Option<i32> {
        let pid = self.read_pid().filter(|pid| *pid > 0)?;
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => Some(pid),
            Err(_) => None,
        }
    }

    /// Records the current process as the master.
    pub fn write_pid(&self) -> io::Result<()> {
        if let Some(dir) = self.pid_file.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.pid_file, format!("{}\n", std::process::id()))
    }

    /// Removes the pid file and the socket; missing files are fine.
    pub fn remove_files(&self) {
        let _ = fs::remove_file(&self.pid_file);
        let _ = fs::remove_file(&self.socket);
    }
}

/// First 8 hex chars of the SHA-256 of the script's canonical path.
pub fn script_hash(script: &Path) -> String {
    let canonical = script.canonicalize().unwrap_or_else(|_| script.to_path_buf());
    let digest = Sha256::digest(canonical.as_os_str().as_encoded_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}
