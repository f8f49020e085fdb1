use std::{sync::Arc, time::Duration};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpStream,
    task::JoinSet,
    time::{sleep, timeout, Instant},
};

use crate::{
    error::{AutomationError, AutomationResult, ConnectivityIssue},
    terminal::{OperationIntent, TerminalProcess},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Well-known `host:port` pairs raced to decide whether the internet is up.
    /// Empty skips the check.
    pub internet_endpoints: Vec<String>,
    /// `host:port` of the registration service. Empty skips the check.
    pub remote_host: String,
    pub connect_timeout_ms: u64,
    /// How long a freshly launched terminal has to show up as a process.
    pub launch_wait_ms: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            internet_endpoints: vec!["1.1.1.1:53".into(), "8.8.8.8:53".into(), "9.9.9.9:53".into()],
            remote_host: "registration.example.edu:22".into(),
            connect_timeout_ms: 3_000,
            launch_wait_ms: 8_000,
        }
    }
}

pub struct Preflight {
    config: PreflightConfig,
    process: Arc<dyn TerminalProcess>,
}

impl Preflight {
    pub fn new(config: PreflightConfig, process: Arc<dyn TerminalProcess>) -> Self {
        Self { config, process }
    }

    pub async fn check(&self, intent: &OperationIntent) -> AutomationResult<()> {
        if !self.internet_reachable().await {
            return Err(AutomationError::Connectivity(ConnectivityIssue::NoInternet));
        }
        if !self.host_accepting().await {
            return Err(AutomationError::Connectivity(ConnectivityIssue::HostUnreachable));
        }
        self.ensure_terminal(intent).await
    }

    /// True as soon as any endpoint accepts a connection.
    pub async fn internet_reachable(&self) -> bool {
        if self.config.internet_endpoints.is_empty() {
            return true;
        }

        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        let mut race = JoinSet::new();
        for endpoint in self.config.internet_endpoints.clone() {
            race.spawn(async move { matches!(timeout(limit, TcpStream::connect(endpoint)).await, Ok(Ok(_))) });
        }

        while let Some(joined) = race.join_next().await {
            if matches!(joined, Ok(true)) {
                race.abort_all();
                return true;
            }
        }
        warn!("no internet endpoint answered within {limit:?}");
        false
    }

    pub async fn host_accepting(&self) -> bool {
        if self.config.remote_host.is_empty() {
            return true;
        }
        let limit = Duration::from_millis(self.config.connect_timeout_ms);
        match timeout(limit, TcpStream::connect(&self.config.remote_host)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                warn!("registration host {} refused: {err}", self.config.remote_host);
                false
            }
            Err(_) => {
                warn!("registration host {} did not answer within {limit:?}", self.config.remote_host);
                false
            }
        }
    }

    async fn ensure_terminal(&self, intent: &OperationIntent) -> AutomationResult<()> {
        if self.process.is_alive() {
            return Ok(());
        }
        if !intent.may_launch_terminal() {
            return Err(AutomationError::TerminalUnavailable(
                "terminal emulator is not running".into(),
            ));
        }

        info!("terminal emulator not running; launching it for {}", intent.label());
        self.process
            .launch()
            .map_err(|err| AutomationError::TerminalUnavailable(format!("{err:#}")))?;

        let deadline = Instant::now() + Duration::from_millis(self.config.launch_wait_ms);
        while Instant::now() < deadline {
            if self.process.is_alive() {
                return Ok(());
            }
            sleep(Duration::from_millis(250)).await;
        }
        Err(AutomationError::TerminalUnavailable(
            "terminal emulator did not start".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        terminal::{MenuTarget, Semester},
        testing::{accepting_endpoint, closed_endpoint, FakeProcess},
        vault::Credentials,
    };

    fn config(internet: Vec<String>, remote: String) -> PreflightConfig {
        PreflightConfig {
            internet_endpoints: internet,
            remote_host: remote,
            connect_timeout_ms: 300,
            launch_wait_ms: 300,
        }
    }

    fn login() -> OperationIntent {
        OperationIntent::Login {
            credentials: Credentials::new("1", "2"),
            semester: Semester::new("B25").unwrap(),
        }
    }

    #[tokio::test]
    async fn one_live_endpoint_is_enough() {
        let preflight = Preflight::new(
            config(vec![closed_endpoint().await, accepting_endpoint().await], String::new()),
            Arc::new(FakeProcess::running()),
        );
        assert!(preflight.internet_reachable().await);
    }

    #[tokio::test]
    async fn maps_connectivity_failures() {
        let offline = Preflight::new(
            config(vec![closed_endpoint().await], String::new()),
            Arc::new(FakeProcess::running()),
        );
        let err = offline.check(&login()).await.unwrap_err();
        assert!(matches!(err, AutomationError::Connectivity(ConnectivityIssue::NoInternet)));

        let host_down = Preflight::new(config(Vec::new(), closed_endpoint().await), Arc::new(FakeProcess::running()));
        let err = host_down.check(&login()).await.unwrap_err();
        assert!(matches!(err, AutomationError::Connectivity(ConnectivityIssue::HostUnreachable)));
    }

    #[tokio::test]
    async fn only_login_may_launch_the_terminal() {
        let process = Arc::new(FakeProcess::stopped());
        let preflight = Preflight::new(config(Vec::new(), String::new()), process.clone());

        let err = preflight
            .check(&OperationIntent::Menu {
                target: MenuTarget::MainMenu,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TerminalUnavailable);
        assert_eq!(process.launches(), 0);

        preflight.check(&login()).await.unwrap();
        assert_eq!(process.launches(), 1);
    }
}
