//! Wires the engine's pieces to the X11 desktop from one settings snapshot.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};

use crate::{
    coordinator::{OperationCoordinator, Preflight, SessionContext},
    db::Database,
    desktop_bridge::{self, X11Clipboard, X11Desktop},
    notify::{LogNotifier, Notifier},
    reliability::ReliabilityMonitor,
    scheduler::{EnrollmentScheduler, LogSurface},
    screen::{ResponseWaiter, ScreenReader, TesseractOcr},
    settings::{EngineSettings, SettingsStore},
    terminal::{ClipboardTransfer, SysinfoProcess, TerminalDriver},
    vault::{CredentialSource, EnvCredentials},
};

/// Title of the countdown window, lowered during captures.
pub const COUNTDOWN_WINDOW_TITLE: &str = "termreg countdown";

pub struct Engine {
    pub settings: Arc<SettingsStore>,
    pub db: Database,
    pub coordinator: OperationCoordinator,
    pub reliability: ReliabilityMonitor,
    pub scheduler: Arc<EnrollmentScheduler>,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl Engine {
    pub async fn start(settings: SettingsStore) -> Result<Self> {
        let config: EngineSettings = settings.snapshot();

        let db_path = config.resolved_database_path(&settings.directory());
        let db = Database::new(db_path)?;

        // Runs left open by a crash can never finish now.
        let interrupted = db.mark_unfinished_runs_interrupted(Utc::now()).await?;
        if interrupted > 0 {
            warn!("marked {interrupted} unfinished enrollment run(s) as force-ended");
        }

        let desktop = Arc::new(
            X11Desktop::new(config.terminal.window_title.clone())
                .with_overlays(vec![COUNTDOWN_WINDOW_TITLE.to_string()]),
        );
        let ocr = Arc::new(
            TesseractOcr::new(&config.screen.ocr.binary, config.screen.ocr.language.clone())
                .with_provisioning(config.screen.ocr.provisioning_command.clone()),
        );
        let reader = ScreenReader::new(desktop.clone(), ocr, config.screen.capture.clone())
            .with_overlays(desktop.clone());
        let waiter = ResponseWaiter::new(Arc::new(reader), config.screen.waits.clone());
        let driver = TerminalDriver::new(desktop.clone(), waiter, config.terminal.driver.clone())
            .with_clipboard(ClipboardTransfer::new(Arc::new(X11Clipboard)));

        let process = Arc::new(SysinfoProcess::new(config.terminal.process.clone()));
        let session = SessionContext::new(desktop.clone(), process.clone());
        let preflight = Preflight::new(config.remote.clone(), process);
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let mut daemon_config = config.daemons.clone();
        if daemon_config.idle.display_timeout_secs.is_none() {
            daemon_config.idle.display_timeout_secs = desktop_bridge::display_timeout_secs();
        }

        let coordinator = OperationCoordinator::new(
            driver,
            session,
            preflight,
            notifier.clone(),
            daemon_config,
            config.coordinator.clone(),
        );

        let reliability = ReliabilityMonitor::new(config.reliability.clone(), Some(db.clone()));
        if let Err(err) = reliability.load_history().await {
            warn!("could not load latency history: {err:#}");
        }

        let env_credentials = EnvCredentials::default();
        let credentials: Option<Arc<dyn CredentialSource>> = if env_credentials.is_configured() {
            Some(Arc::new(env_credentials))
        } else {
            info!("no stored credentials; scheduled runs will not pre-boot");
            None
        };

        let mut scheduler = EnrollmentScheduler::new(
            coordinator.clone(),
            reliability.clone(),
            Arc::new(LogSurface),
            notifier,
            config.scheduler.clone(),
        )
        .with_database(db.clone());
        if let Some(credentials) = &credentials {
            scheduler = scheduler.with_credentials(credentials.clone());
        }

        Ok(Self {
            settings: Arc::new(settings),
            db,
            coordinator,
            reliability,
            scheduler: Arc::new(scheduler),
            credentials,
        })
    }

    pub fn credentials(&self) -> Option<&Arc<dyn CredentialSource>> {
        self.credentials.as_ref()
    }
}
