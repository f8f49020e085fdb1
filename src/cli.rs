use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::OperationReport,
    engine::Engine,
    scheduler::{EnrollmentPlan, EnrollmentScheduler},
    settings::SettingsStore,
    terminal::{CourseRequest, MenuTarget, OperationIntent, OperationOutput, Semester},
};

#[derive(Debug, Parser)]
#[command(name = "termreg", version, about = "Scheduled enrollment for a screen-only registration terminal")]
pub struct Cli {
    /// Settings file; created with defaults on first update.
    #[arg(long, global = true, default_value = "termreg.json")]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Arm a countdown to the opening time shown on the terminal and submit at it.
    Schedule {
        #[arg(long)]
        term: String,
        /// COURSE-SECTION, repeatable.
        #[arg(long = "course", required = true)]
        courses: Vec<CourseRequest>,
        /// Read the deadline from a saved screen dump instead of the live terminal.
        #[arg(long)]
        screen: Option<PathBuf>,
    },
    /// Sample the registration host's latency.
    Probe {
        #[arg(long, default_value_t = 5)]
        count: usize,
        #[arg(long)]
        sequential: bool,
    },
    /// Reliability statistics and recent scheduled runs.
    Stats {
        #[arg(long, default_value_t = 10)]
        runs: usize,
    },
    /// Run one terminal operation now.
    Run {
        #[command(subcommand)]
        operation: RunOperation,
    },
}

#[derive(Debug, Subcommand)]
pub enum RunOperation {
    Login {
        #[arg(long)]
        term: String,
    },
    Search {
        course: String,
    },
    Enroll {
        course: CourseRequest,
    },
    Drop {
        course: CourseRequest,
    },
    Submit {
        #[arg(required = true)]
        courses: Vec<CourseRequest>,
    },
    Menu {
        #[arg(value_enum)]
        target: MenuArg,
    },
    SignOut,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MenuArg {
    Main,
    Enrollment,
    Search,
}

impl From<MenuArg> for MenuTarget {
    fn from(arg: MenuArg) -> Self {
        match arg {
            MenuArg::Main => MenuTarget::MainMenu,
            MenuArg::Enrollment => MenuTarget::Enrollment,
            MenuArg::Search => MenuTarget::SectionSearch,
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = SettingsStore::new(cli.settings.clone())?;
    let engine = Engine::start(settings).await?;

    match cli.command {
        Command::Schedule { term, courses, screen } => {
            let plan = EnrollmentPlan {
                semester: Semester::new(&term)?,
                requests: courses,
            };
            schedule(&engine, plan, screen).await
        }
        Command::Probe { count, sequential } => {
            let stats = engine.reliability.sample(count.max(1), !sequential).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Stats { runs } => {
            let stats = engine.reliability.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            for run in engine.db.list_enrollment_runs(runs).await? {
                println!(
                    "{}  {}  {}  {}  {}",
                    run.deadline,
                    run.term,
                    run.courses,
                    run.termination.map(|t| t.as_str()).unwrap_or("open"),
                    run.detail.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Run { operation } => {
            let intent = intent_for(&engine, operation)?;
            let report = engine
                .coordinator
                .spawn(intent)
                .wait(engine.coordinator.outer_timeout())
                .await?;
            print_report(&report)?;
            if report.is_success() {
                Ok(())
            } else {
                bail!("{} failed", report.label)
            }
        }
    }
}

fn intent_for(engine: &Engine, operation: RunOperation) -> Result<OperationIntent> {
    Ok(match operation {
        RunOperation::Login { term } => {
            let source = engine
                .credentials()
                .ok_or_else(|| anyhow!("set TERMREG_STUDENT_ID and TERMREG_PIN to log in"))?;
            OperationIntent::Login {
                credentials: source.credentials()?,
                semester: Semester::new(&term)?,
            }
        }
        RunOperation::Search { course } => OperationIntent::Search { course },
        RunOperation::Enroll { course } => OperationIntent::Enroll { request: course },
        RunOperation::Drop { course } => OperationIntent::Drop { request: course },
        RunOperation::Submit { courses } => OperationIntent::MultiSubmit { requests: courses },
        RunOperation::Menu { target } => OperationIntent::Menu {
            target: target.into(),
        },
        RunOperation::SignOut => OperationIntent::SignOut,
    })
}

async fn schedule(engine: &Engine, plan: EnrollmentPlan, screen: Option<PathBuf>) -> Result<()> {
    let scheduler = &engine.scheduler;
    let deadline = match screen {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read screen dump {}", path.display()))?;
            scheduler.arm_from_text(&text, plan).await?
        }
        None => scheduler.arm_from_terminal(plan).await?,
    };
    info!("armed for {}", deadline.timestamp);

    let sampler_token = CancellationToken::new();
    let sampler = engine.reliability.spawn_sampler(sampler_token.clone());

    let termination = wait_with_interrupt(scheduler).await;

    sampler_token.cancel();
    if let Err(err) = sampler.await {
        warn!("reliability sampler did not stop cleanly: {err}");
    }
    engine.coordinator.stop_daemons().await;

    match termination {
        Some(termination) => {
            println!("{}", termination.as_str());
            Ok(())
        }
        None => bail!("countdown ended without a result"),
    }
}

/// Wait for the countdown; Ctrl-C asks it to cancel, a second one stops it.
async fn wait_with_interrupt(scheduler: &EnrollmentScheduler) -> Option<crate::db::Termination> {
    let finished = scheduler.wait_finished();
    tokio::pin!(finished);

    let mut interrupts = 0;
    loop {
        tokio::select! {
            termination = &mut finished => return termination,
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                if interrupts == 1 {
                    info!("cancelling countdown (press Ctrl-C again to stop)");
                    scheduler.cancel();
                } else {
                    scheduler.shutdown();
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn print_report(report: &OperationReport) -> Result<()> {
    match &report.result {
        Ok(OperationOutput::Listing { text }) | Ok(OperationOutput::Navigated { text, .. }) => {
            println!("{text}");
        }
        Ok(output) => println!("{}", serde_json::to_string_pretty(output)?),
        Err(failure) => {
            eprintln!("{:?}: {}", failure.kind, failure.message);
            if let Some(screen) = &failure.screen {
                eprintln!("--- screen ---\n{screen}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule_command() {
        let cli = Cli::try_parse_from([
            "termreg",
            "schedule",
            "--term",
            "B25",
            "--course",
            "CIIC3015-010",
            "--course",
            "MATE3031-020",
        ])
        .unwrap();
        match cli.command {
            Command::Schedule { term, courses, screen } => {
                assert_eq!(term, "B25");
                assert_eq!(courses.len(), 2);
                assert_eq!(courses[1].section, "020");
                assert!(screen.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.settings, PathBuf::from("termreg.json"));
    }

    #[test]
    fn rejects_malformed_course() {
        assert!(Cli::try_parse_from(["termreg", "run", "enroll", "CIIC3015"]).is_err());
        assert!(Cli::try_parse_from(["termreg", "schedule", "--term", "B25"]).is_err());
    }

    #[test]
    fn menu_targets_map() {
        let cli = Cli::try_parse_from(["termreg", "--settings", "x.json", "run", "menu", "enrollment"]).unwrap();
        match cli.command {
            Command::Run {
                operation: RunOperation::Menu { target },
            } => assert_eq!(MenuTarget::from(target), MenuTarget::Enrollment),
            other => panic!("unexpected {other:?}"),
        }
    }
}
