use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use broadside::cli::config::{Configuration, LoadOptions};
use broadside::engine::executor::{host_user, Launcher, ProcessExecutor, K6_THRESHOLDS_FAILED};
use broadside::engine::{collector, render, run_config, OrchestratorOptions, Rendered, RunState, Session};
use broadside::stats::dashboard::DASHBOARD_FILE;
use broadside::stats::pdf::DEFAULT_RENDER_WAIT;
use broadside::stats::server::{DashboardServer, DEFAULT_ADDR};
use broadside::stats::{self, AggregatedReport};
use broadside::utils::parse_timeout;

#[derive(Parser)]
#[command(name = "broadside")]
#[command(about = "Run k6 load tests for every request in a config and compare the results", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LauncherKind {
    /// `docker compose run` the k6 service
    Docker,
    /// Run a k6 binary on this machine
    Local,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every planned test and build the dashboards
    Run {
        /// Path to the configuration file (JSON or YAML)
        config: PathBuf,
        /// Where artifacts and reports are written
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = LauncherKind::Docker)]
        launcher: LauncherKind,
        /// Compose file for the docker launcher
        #[arg(long)]
        compose_file: Option<PathBuf>,
        /// Compose service that runs k6
        #[arg(long, default_value = "k6")]
        service: String,
        /// `--user` for the container, e.g. "1000:1000" (default: owner of the results dir)
        #[arg(long)]
        docker_user: Option<String>,
        /// k6 binary for the local launcher
        #[arg(long, default_value = "k6")]
        k6: PathBuf,
        /// Load-test script for the local launcher
        #[arg(long, default_value = "scripts/load-test.js")]
        script: PathBuf,
        /// Exit code the load generator uses for crossed thresholds
        #[arg(long, default_value_t = K6_THRESHOLDS_FAILED)]
        threshold_exit_code: i32,
        /// Per-run timeout (e.g. 30m, 2h); "none" waits forever
        #[arg(long, default_value = "2h")]
        timeout: String,
        /// Address to serve the results directory on
        #[arg(long, default_value = DEFAULT_ADDR)]
        serve: String,
        /// Do not serve the results directory
        #[arg(long, conflicts_with_all = ["pdf", "keep_serving"])]
        no_serve: bool,
        /// Also write a PDF snapshot of the dashboard
        #[arg(long)]
        pdf: bool,
        /// Keep serving the dashboard after the runs until Ctrl+C
        #[arg(long)]
        keep_serving: bool,
        /// Reject unknown test types instead of dropping them
        #[arg(long)]
        strict: bool,
    },
    /// Validate a configuration and show the plan without running anything
    Validate {
        config: PathBuf,
        #[arg(long)]
        strict: bool,
    },
    /// Print the parameters each run would hand to k6 (tokens masked)
    Plan {
        config: PathBuf,
        #[arg(long)]
        strict: bool,
        /// RESULTS_DIR value to show
        #[arg(long, default_value = "/results")]
        results_dir: String,
    },
    /// Rebuild dashboards from artifacts already in a results directory
    Report {
        results_dir: PathBuf,
        #[arg(long)]
        pdf: bool,
        #[arg(long, default_value = DEFAULT_ADDR)]
        serve: String,
        #[arg(long)]
        keep_serving: bool,
    },
    /// Write a starter configuration
    Init {
        /// Output file path (default: config.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also create a .env secrets file next to it
        #[arg(long)]
        env: bool,
    },
    /// Print the JSON Schema of the configuration file
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "broadside=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            results_dir,
            launcher,
            compose_file,
            service,
            docker_user,
            k6,
            script,
            threshold_exit_code,
            timeout,
            serve,
            no_serve,
            pdf,
            keep_serving,
            strict,
        } => {
            let timeout = parse_timeout(&timeout).map_err(anyhow::Error::msg)?;
            let options = OrchestratorOptions {
                results_dir,
                threshold_exit_code,
                serve_addr: (!no_serve).then_some(serve),
                pdf,
                pdf_wait: DEFAULT_RENDER_WAIT,
            };
            let executor_for = move |results_dir: &Path| {
                let launcher = match launcher {
                    LauncherKind::Docker => Launcher::DockerCompose {
                        compose_file,
                        service,
                        user: docker_user.or_else(|| host_user(results_dir)),
                    },
                    LauncherKind::Local => Launcher::Local {
                        program: k6,
                        args: vec!["run".to_string(), script.display().to_string()],
                    },
                };
                ProcessExecutor::new(launcher, results_dir, timeout)
            };

            let rt = Runtime::new()?;
            rt.block_on(async {
                let session =
                    run_config(&config, LoadOptions { strict }, options, executor_for).await?;
                print_summary(&session);
                match session.server {
                    Some(server) if keep_serving => serve_until_interrupted(server).await,
                    Some(server) => server.shutdown().await,
                    None => {}
                }
                Ok::<(), anyhow::Error>(())
            })
        }
        Commands::Validate { config, strict } => {
            broadside::cli::validate::run_validate(&config, strict).map(|_| ())
        }
        Commands::Plan {
            config,
            strict,
            results_dir,
        } => broadside::cli::validate::run_plan(&config, strict, &results_dir),
        Commands::Report {
            results_dir,
            pdf,
            serve,
            keep_serving,
        } => {
            let results = collector::discover(&results_dir)?;
            let report = stats::aggregate(&results);
            if report.is_empty() {
                return Err(broadside::Error::NoData.into());
            }

            let rt = Runtime::new()?;
            rt.block_on(async {
                let server = if pdf || keep_serving {
                    Some(DashboardServer::start(&results_dir, &serve).await?)
                } else {
                    None
                };
                let rendered = render(
                    &report,
                    &results_dir,
                    server.as_ref().filter(|_| pdf),
                    DEFAULT_RENDER_WAIT,
                )
                .await;
                print_report(&report);
                print_rendered(&rendered);
                match server {
                    Some(server) if keep_serving => serve_until_interrupted(server).await,
                    Some(server) => server.shutdown().await,
                    None => {}
                }
                Ok::<(), anyhow::Error>(())
            })
        }
        Commands::Init { output, env } => broadside::cli::init::run_init(output.as_deref(), env),
        Commands::Schema { output } => {
            let schema = schemars::schema_for!(Configuration);
            let schema_json = serde_json::to_string_pretty(&schema)?;
            if let Some(out_path) = output {
                std::fs::write(&out_path, schema_json)?;
                println!("JSON Schema written to {:?}", out_path);
            } else {
                println!("{}", schema_json);
            }
            Ok(())
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "broadside", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn print_summary(session: &Session) {
    println!(
        "\n{:<44} {:<28} {:>10} {:>9} {:>9}",
        "RUN", "STATE", "P95 (ms)", "ERR %", "REQ/S"
    );
    for (spec, state) in session.states() {
        let row = session.report.rows.iter().find(|r| r.base_name == spec.base_name);
        match row {
            Some(row) => {
                let state = if row.threshold_violations {
                    format!("{} (thresholds)", RunState::Collected)
                } else {
                    state.to_string()
                };
                let errors = if row.error_rate_recorded {
                    format!("{:.2}", row.error_rate_pct)
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<44} {:<28} {:>10.1} {:>9} {:>9.1}",
                    spec.label(),
                    state,
                    row.p95_latency_ms,
                    errors,
                    row.requests_per_second
                );
            }
            None => println!("{:<44} {:<28}", spec.label(), state),
        }
    }

    let collected = session.report.rows.len();
    println!(
        "\n{} of {} run(s) collected, {} with threshold violations",
        collected,
        session.results.len(),
        session.report.violations()
    );

    match &session.rendered {
        Some(rendered) => {
            print_rendered(rendered);
            if let Some(server) = &session.server {
                println!("  live:      {}", server.url(DASHBOARD_FILE));
            }
        }
        None => println!("No data to report: no run produced collectable artifacts."),
    }
}

fn print_report(report: &AggregatedReport) {
    println!(
        "Rebuilt report from {} run(s), {} excluded",
        report.rows.len(),
        report.excluded.len()
    );
    for excluded in &report.excluded {
        println!("  ✗ {}: {}", excluded.display_label, excluded.reason);
    }
}

fn print_rendered(rendered: &Rendered) {
    let entries = [
        ("dashboard", &rendered.dashboard),
        ("summary", &rendered.summary),
        ("csv", &rendered.csv),
        ("latest", &rendered.latest),
        ("pdf", &rendered.pdf),
    ];
    for (name, path) in entries {
        if let Some(path) = path {
            println!("  {:<10} {}", format!("{}:", name), path.display());
        }
    }
}

async fn serve_until_interrupted(server: DashboardServer) {
    println!(
        "\nServing {} at {} (Ctrl+C to stop)",
        server.root().display(),
        server.url(DASHBOARD_FILE)
    );
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl+C, stopping server");
    }
    server.shutdown().await;
}
