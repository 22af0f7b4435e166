//! CLI entrypoint for the softmte scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use softmte_harness::HarnessError;
use softmte_harness::isolation::run_isolated;
#[cfg(target_os = "linux")]
use softmte_harness::preload;
use softmte_harness::scenarios::{self, Expectation, SCENARIOS};
use softmte_harness::structured_log::{JsonlLog, Outcome, ScenarioRecord};
use softmte_membrane::CheckMode;

/// Tag-violation scenarios for softmte.
#[derive(Debug, Parser)]
#[command(name = "softmte-harness")]
#[command(about = "Runs softmte scenarios, each in an isolated process")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List scenarios and their expected termination.
    List,
    /// Run one scenario in this process (aborting scenarios end it).
    Run {
        /// Scenario name (see `list`).
        scenario: String,
    },
    /// Run one preload case in this process (needs LD_PRELOAD=libsoftmte.so).
    #[cfg(target_os = "linux")]
    Preload {
        /// Case name (see `list`).
        case: String,
    },
    /// Run scenarios in child processes and log one JSONL record each.
    Suite {
        /// Check mode passed to every child via SOFTMTE_MODE.
        #[arg(long, default_value = "strict")]
        mode: String,
        /// Write JSONL here instead of stdout.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Run identifier embedded in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
        /// Restrict to these scenarios (repeatable).
        #[arg(long = "only")]
        only: Vec<String>,
    },
}

#[cfg(target_os = "linux")]
fn print_preload_cases() {
    for case in preload::PRELOAD_CASES {
        println!(
            "{:<16} {:<9} {} (preload)",
            case.name,
            case.expectation.as_str(),
            case.description
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn print_preload_cases() {}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::List => {
            for scenario in SCENARIOS {
                println!(
                    "{:<16} {:<9} {}",
                    scenario.name,
                    scenario.expectation.as_str(),
                    scenario.description
                );
            }
            print_preload_cases();
        }
        Command::Run { scenario } => {
            let scenario = scenarios::find(&scenario)
                .ok_or_else(|| HarnessError::UnknownScenario(scenario.clone()))?;
            let report = scenario.run()?;
            println!("{}", serde_json::to_string(&report.details)?);
        }
        #[cfg(target_os = "linux")]
        Command::Preload { case } => {
            let case =
                preload::find(&case).ok_or_else(|| HarnessError::UnknownScenario(case.clone()))?;
            let details = case.run()?;
            println!("{}", serde_json::to_string(&details)?);
        }
        Command::Suite {
            mode,
            log,
            run_id,
            only,
        } => {
            let mode: CheckMode = mode.parse()?;
            let selected: Vec<_> = if only.is_empty() {
                SCENARIOS.iter().collect()
            } else {
                only.iter()
                    .map(|name| {
                        scenarios::find(name)
                            .ok_or_else(|| HarnessError::UnknownScenario(name.clone()))
                    })
                    .collect::<Result<_, _>>()?
            };

            let mut log = match &log {
                Some(path) => JsonlLog::create(path, &run_id)?,
                None => JsonlLog::stdout(&run_id),
            };

            let exe = std::env::current_exe()?;
            let mut failed = Vec::new();
            for scenario in selected {
                if !scenario.applies_to(mode) {
                    log.append(ScenarioRecord::new(scenario, mode, Outcome::Skip))?;
                    continue;
                }

                let record = match run_isolated(&exe, scenario, mode) {
                    Ok(run) => {
                        let outcome = if run.termination.satisfies(scenario.expectation) {
                            Outcome::Pass
                        } else {
                            failed.push(scenario.name);
                            Outcome::Fail
                        };
                        let details = match scenario.expectation {
                            Expectation::Completes => serde_json::from_str(run.stdout.trim())
                                .unwrap_or_else(|_| json!({ "stdout": run.stdout })),
                            Expectation::Aborts => json!({ "stderr": run.stderr.trim_end() }),
                        };
                        ScenarioRecord::new(scenario, mode, outcome)
                            .with_run(&run)
                            .with_details(details)
                    }
                    Err(err) => {
                        failed.push(scenario.name);
                        ScenarioRecord::new(scenario, mode, Outcome::Error)
                            .with_details(json!({ "error": err.to_string() }))
                    }
                };
                log.append(record)?;
            }
            log.finish()?;

            if !failed.is_empty() {
                return Err(std::io::Error::other(format!(
                    "softmte scenarios FAILED in {} mode: {}",
                    mode.as_str(),
                    failed.join(", ")
                ))
                .into());
            }
        }
    }

    Ok(())
}
