//! Sequential orchestration: plan, execute, collect, then report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::config::{self, Configuration, LoadOptions};
use crate::engine::collector::{FailureReason, ResultCollector, RunResult};
use crate::engine::executor::{OutcomeKind, RunExecutor, K6_THRESHOLDS_FAILED};
use crate::engine::plan::{Plan, RunSpec};
use crate::error::{Error, Result};
use crate::stats::dashboard::DASHBOARD_FILE;
use crate::stats::server::DashboardServer;
use crate::stats::{self, AggregatedReport};

pub mod collector;
pub mod executor;
pub mod plan;

pub const REPORT_CSV_FILE: &str = "report.csv";

/// Lifecycle of one run. `Collected`, `FailedHard` and `ArtifactMissing`
/// are the states a run ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Planned,
    Executing,
    CompletedOk,
    CompletedWithViolations,
    FailedHard,
    Collected,
    ArtifactMissing,
}

impl RunState {
    /// Terminal state a collected result ended in.
    pub fn of(result: &RunResult) -> Self {
        match &result.failure {
            None => RunState::Collected,
            Some(FailureReason::ArtifactMissing(_)) => RunState::ArtifactMissing,
            Some(FailureReason::FailedHard(_)) | Some(FailureReason::ExecutionUnavailable(_)) => {
                RunState::FailedHard
            }
        }
    }

    fn after_execution(kind: &OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Completed => RunState::CompletedOk,
            OutcomeKind::CompletedWithViolations => RunState::CompletedWithViolations,
            OutcomeKind::FailedHard(_) => RunState::FailedHard,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Planned => "PLANNED",
            RunState::Executing => "EXECUTING",
            RunState::CompletedOk => "COMPLETED_OK",
            RunState::CompletedWithViolations => "COMPLETED_WITH_VIOLATIONS",
            RunState::FailedHard => "FAILED_HARD",
            RunState::Collected => "COLLECTED",
            RunState::ArtifactMissing => "ARTIFACT_MISSING",
        };
        f.write_str(s)
    }
}

fn transition(spec: &RunSpec, state: RunState) {
    tracing::debug!(run = %spec.base_name, state = %state, "run state");
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub results_dir: PathBuf,
    pub threshold_exit_code: i32,
    /// Address to serve the results directory on; `None` disables serving (and PDF)
    pub serve_addr: Option<String>,
    pub pdf: bool,
    pub pdf_wait: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            threshold_exit_code: K6_THRESHOLDS_FAILED,
            serve_addr: Some(stats::server::DEFAULT_ADDR.to_string()),
            pdf: false,
            pdf_wait: stats::pdf::DEFAULT_RENDER_WAIT,
        }
    }
}

/// Files produced by the reporting step. Each one is optional: a rendering
/// failure is logged and leaves its slot empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub latest: Option<PathBuf>,
    pub dashboard: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub csv: Option<PathBuf>,
    pub pdf: Option<PathBuf>,
}

pub struct Session {
    pub results: Vec<RunResult>,
    pub report: AggregatedReport,
    /// `None` when no run produced collectable artifacts
    pub rendered: Option<Rendered>,
    pub server: Option<DashboardServer>,
}

impl Session {
    pub fn states(&self) -> Vec<(&RunSpec, RunState)> {
        self.results.iter().map(|r| (&r.spec, RunState::of(r))).collect()
    }
}

pub struct Orchestrator<E: RunExecutor> {
    executor: E,
    options: OrchestratorOptions,
}

impl<E: RunExecutor> Orchestrator<E> {
    pub fn new(executor: E, options: OrchestratorOptions) -> Self {
        Self { executor, options }
    }

    /// Run the whole pipeline. Only serving setup can fail here; per-run
    /// problems end up in the returned results.
    pub async fn run(&self, plan: &Plan) -> Result<Session> {
        std::fs::create_dir_all(&self.options.results_dir)?;

        let server = match &self.options.serve_addr {
            Some(addr) => Some(DashboardServer::start(&self.options.results_dir, addr).await?),
            None => None,
        };

        let pending = match plan.runs.as_slice() {
            [spec] => self.publish_pending_dashboard(spec),
            _ => None,
        };

        let results = self.execute_all(&plan.runs).await;
        let report = stats::aggregate(&results);

        let rendered = if report.is_empty() {
            tracing::error!(runs = results.len(), "{}", Error::NoData);
            if let Some(path) = pending {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove placeholder dashboard");
                }
            }
            None
        } else {
            Some(
                render(
                    &report,
                    &self.options.results_dir,
                    server.as_ref().filter(|_| self.options.pdf),
                    self.options.pdf_wait,
                )
                .await,
            )
        };

        Ok(Session {
            results,
            report,
            rendered,
            server,
        })
    }

    /// With a single run the dashboard is up before the run starts and picks
    /// up the `latest_*` files once they are published.
    fn publish_pending_dashboard(&self, spec: &RunSpec) -> Option<PathBuf> {
        let dir = &self.options.results_dir;
        if let Err(e) = stats::clear_latest(dir) {
            tracing::warn!(error = %e, "could not remove previous latest artifacts");
        }
        skip_on_error(
            "dashboard",
            stats::dashboard::write_dashboard(&AggregatedReport::pending(spec), dir, &timestamp()),
        )
    }

    /// Execute every run in order, one at a time. A failing run never stops
    /// the ones after it.
    pub async fn execute_all(&self, runs: &[RunSpec]) -> Vec<RunResult> {
        let mut collector =
            ResultCollector::new(&self.options.results_dir, self.options.threshold_exit_code);
        let total = runs.len();

        for spec in runs {
            transition(spec, RunState::Planned);
        }

        for (i, spec) in runs.iter().enumerate() {
            println!("[{}/{}] {}", i + 1, total, spec.label());
            if let Err(e) = collector.clear_previous(spec) {
                tracing::warn!(run = %spec.base_name, error = %e, "could not remove artifacts of an earlier run");
            }
            transition(spec, RunState::Executing);

            let result = match self.executor.execute(spec).await {
                Ok(outcome) => {
                    let kind = outcome.classify(self.options.threshold_exit_code);
                    transition(spec, RunState::after_execution(&kind));
                    if let OutcomeKind::CompletedWithViolations = kind {
                        tracing::warn!(run = %spec.base_name, "thresholds crossed");
                    }
                    if let OutcomeKind::FailedHard(reason) = &kind {
                        tracing::error!(run = %spec.base_name, reason = %reason, "run failed");
                    }
                    collector.collect(spec.clone(), outcome)
                }
                Err(e) => {
                    tracing::error!(run = %spec.base_name, error = %e, "run could not start");
                    collector.record_unavailable(spec.clone(), e.to_string())
                }
            };

            let state = RunState::of(result);
            transition(spec, state);
            match &result.failure {
                None if result.threshold_violations => println!("  -> collected (thresholds crossed)"),
                None => println!("  -> collected"),
                Some(reason) => println!("  -> {}: {}", state, reason),
            }
        }

        collector.into_results()
    }
}

/// Load and plan `config_path`, then run every planned test. Nothing is
/// created or executed unless the configuration loads and plans cleanly.
/// `executor_for` receives the results directory once it exists.
pub async fn run_config<E, F>(
    config_path: &Path,
    load: LoadOptions,
    options: OrchestratorOptions,
    executor_for: F,
) -> Result<Session>
where
    E: RunExecutor,
    F: FnOnce(&Path) -> E,
{
    let loaded = config::load(config_path, load)?;
    let plan = plan::plan(&loaded.config, &loaded.secrets)?;
    if plan.is_empty() {
        return Err(Error::NothingToRun(config_path.to_path_buf()));
    }

    std::fs::create_dir_all(&options.results_dir)?;
    let executor = executor_for(options.results_dir.as_path());
    print_banner(&loaded.config, plan.runs.len(), &options);
    Orchestrator::new(executor, options).run(&plan).await
}

fn print_banner(config: &Configuration, runs: usize, options: &OrchestratorOptions) {
    println!("broadside: {} run(s) against {}", runs, config.base_url);
    println!("  peak users:  {}", config.peak_users);
    println!("  results dir: {}", options.results_dir.display());
    if let Some(addr) = &options.serve_addr {
        println!("  dashboard:   http://{}/{}", addr, DASHBOARD_FILE);
    }
    println!();
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Write every report artifact for `report` into `results_dir`. A PDF is
/// produced only when a server is given to load the dashboard from.
pub async fn render(
    report: &AggregatedReport,
    results_dir: &Path,
    pdf_server: Option<&DashboardServer>,
    pdf_wait: Duration,
) -> Rendered {
    let generated_at = timestamp();
    let mut rendered = Rendered::default();

    match stats::publish_latest(report, results_dir) {
        Ok(latest) => rendered.latest = latest.map(|a| a.metrics_path),
        Err(e) => tracing::error!(error = %e, "could not publish latest artifacts"),
    }

    let csv_path = results_dir.join(REPORT_CSV_FILE);
    rendered.csv = skip_on_error(
        "report csv",
        stats::csv::write_report_csv(report, &csv_path).map(|_| csv_path),
    );
    rendered.dashboard = skip_on_error(
        "dashboard",
        stats::dashboard::write_dashboard(report, results_dir, &generated_at),
    );
    rendered.summary = skip_on_error(
        "summary",
        stats::html::write_summary(report, results_dir, &generated_at),
    );

    if let (Some(server), Some(_)) = (pdf_server, &rendered.dashboard) {
        let url = server.url(DASHBOARD_FILE);
        rendered.pdf = skip_on_error(
            "pdf",
            stats::pdf::write_pdf(url, results_dir, pdf_wait).await,
        );
    }

    rendered
}

fn skip_on_error<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(artifact = what, error = %e, "rendering step failed, skipping");
            None
        }
    }
}
