use std::{process::Command, sync::Mutex};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System};

use super::port::TerminalProcess;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Executable name of the terminal emulator, matched case-insensitively.
    pub name: String,
    /// Program and arguments that start a fresh emulator connected to the host.
    pub launch_command: Vec<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: "xterm".into(),
            launch_command: vec![
                "xterm".into(),
                "-title".into(),
                "Registration".into(),
                "-e".into(),
                "ssh".into(),
                "registration.example.edu".into(),
            ],
        }
    }
}

/// Finds the terminal emulator by scanning the process table.
pub struct SysinfoProcess {
    config: ProcessConfig,
    system: Mutex<System>,
    own_pid: u32,
}

impl SysinfoProcess {
    pub fn new(config: ProcessConfig) -> Self {
        log::info!("[process] watching for '{}', own_pid={}", config.name, std::process::id());
        Self {
            config,
            system: Mutex::new(System::new()),
            own_pid: std::process::id(),
        }
    }

    fn with_matches<T>(&self, f: impl FnOnce(Vec<&Process>) -> T) -> T {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

        let wanted = self.config.name.to_lowercase();
        let matches = system
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != self.own_pid)
            .filter(|(_, process)| process.name().to_string_lossy().to_lowercase() == wanted)
            .map(|(_, process)| process)
            .collect();
        f(matches)
    }
}

impl TerminalProcess for SysinfoProcess {
    fn is_alive(&self) -> bool {
        self.with_matches(|matches| !matches.is_empty())
    }

    fn launch(&self) -> Result<()> {
        let Some((program, args)) = self.config.launch_command.split_first() else {
            bail!("no launch command configured for '{}'", self.config.name);
        };
        let child = Command::new(program)
            .args(args)
            .spawn()
            .with_context(|| format!("failed to launch {program}"))?;
        log::info!("[process] launched {program} (pid {})", child.id());
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        let killed = self.with_matches(|matches| matches.iter().filter(|process| process.kill()).count());
        log::info!("[process] terminated {killed} '{}' process(es)", self.config.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_process_is_not_alive() {
        let process = SysinfoProcess::new(ProcessConfig {
            name: "termreg-no-such-emulator".into(),
            launch_command: Vec::new(),
        });
        assert!(!process.is_alive());
        assert!(process.launch().is_err());
        assert!(process.terminate().is_ok());
    }
}
