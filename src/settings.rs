use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    coordinator::{CoordinatorConfig, PreflightConfig},
    daemons::DaemonConfig,
    reliability::ReliabilityConfig,
    scheduler::SchedulerConfig,
    screen::{ScreenConfig, WaitConfig},
    terminal::{DriverConfig, ProcessConfig},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub process: ProcessConfig,
    pub driver: DriverConfig,
    /// Window title the desktop bridge searches for.
    pub window_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub binary: PathBuf,
    pub language: String,
    /// Unpacks the bundled OCR archive when the binary is missing. Empty to skip.
    pub provisioning_command: Vec<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".into(),
            provisioning_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    pub capture: ScreenConfig,
    pub ocr: OcrSettings,
    pub waits: WaitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub terminal: TerminalSettings,
    pub remote: PreflightConfig,
    pub screen: ScreenSettings,
    pub reliability: ReliabilityConfig,
    pub scheduler: SchedulerConfig,
    pub daemons: DaemonConfig,
    pub coordinator: CoordinatorConfig,
    pub database_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            terminal: TerminalSettings {
                window_title: "Registration".into(),
                ..TerminalSettings::default()
            },
            remote: PreflightConfig::default(),
            screen: ScreenSettings::default(),
            reliability: ReliabilityConfig::default(),
            scheduler: SchedulerConfig::default(),
            daemons: DaemonConfig::default(),
            coordinator: CoordinatorConfig::default(),
            database_path: PathBuf::from("termreg.sqlite3"),
        }
    }
}

impl EngineSettings {
    /// The database path, resolved against the settings file's directory when
    /// relative.
    pub fn resolved_database_path(&self, settings_dir: &Path) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            settings_dir.join(&self.database_path)
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Malformed settings in {}", path.display()))?
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn directory(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn snapshot(&self) -> EngineSettings {
        self.read().clone()
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        self.read().scheduler.clone()
    }

    pub fn reliability(&self) -> ReliabilityConfig {
        self.read().reliability.clone()
    }

    /// Apply `change` and write the result to disk.
    pub fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: EngineSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
