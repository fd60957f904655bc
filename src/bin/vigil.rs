//! Vigil CLI - runs API test-script suites against recorded exchanges.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vigil::{
    validate_script, ConsoleLevel, DefaultSuiteRunner, EngineConfig, RunReport, ScriptSuite,
    SuiteLoader, SuiteReport, SuiteRunner, TestResultProcessor, TestStatus,
};

/// Vigil - sandboxed pre-request and post-response script runner.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Suite file or directory path.
    #[arg(short = 'p', long = "path")]
    suite_path: Option<String>,

    /// Filter suites by name (partial match).
    #[arg(short = 'f', long = "filter")]
    suite_filter: Option<String>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Post-response timeout in milliseconds, overriding every suite.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Directory to save the run report.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,

    /// Engine configuration file.
    #[arg(short = 'c', long = "config", env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Only compile every script and report syntax errors.
    #[arg(long = "check")]
    check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
    Text,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn print_suite_report(report: &SuiteReport, verbose: bool) {
    let status = if report.success() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!("{} suite: {} ({} ms)", status, report.name, report.duration_ms);

    for (i, result) in report.results.iter().enumerate() {
        let marker = match result.status {
            TestStatus::Pass => "\x1b[32m✓\x1b[0m",
            TestStatus::Skip => "\x1b[33m-\x1b[0m",
            TestStatus::Fail | TestStatus::Error => "\x1b[31m✗\x1b[0m",
        };
        info!("  {}. {} {} ({} ms)", i + 1, marker, result.name, result.duration);

        if let Some(error) = &result.error {
            error!("     \x1b[31mError: {}\x1b[0m", error);
        } else if result.status == TestStatus::Fail {
            if let Some(message) = &result.message {
                error!("     \x1b[31m{}\x1b[0m", message);
            }
        }
    }

    if verbose {
        for entry in &report.console {
            let line = format!("     [{}] {}: {}", entry.source, entry.level, entry.message);
            match entry.level {
                ConsoleLevel::Error => error!("{}", line),
                ConsoleLevel::Warn => warn!("{}", line),
                _ => debug!("{}", line),
            }
        }
    }
}

fn save_run_report(report: &RunReport, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();

    let (filename, content) = match format {
        ReportFormat::Json => {
            let filename = format!("vigil-report-{timestamp}.json");
            let content = serde_json::to_string_pretty(report)?;
            (filename, content)
        }
        ReportFormat::Yaml => {
            let filename = format!("vigil-report-{timestamp}.yaml");
            let content = serde_yaml::to_string(report)?;
            (filename, content)
        }
        ReportFormat::Text => {
            let filename = format!("vigil-report-{timestamp}.txt");
            let processor = TestResultProcessor::new();
            let mut content = String::new();
            for suite in &report.suites {
                content.push_str(&format!(
                    "Suite: {} ({})\n",
                    suite.name,
                    if suite.success() { "PASS" } else { "FAIL" }
                ));
                content.push_str(&processor.format_for_reporting(&suite.results));
                content.push('\n');
            }
            (filename, content)
        }
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

fn load_suites(suite_path: Option<String>) -> Result<Vec<ScriptSuite>> {
    let mut loader = SuiteLoader::new();

    let suites = if let Some(path) = suite_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(anyhow!("Path does not exist: {}", path.display()));
        }

        if path.is_file() {
            vec![loader
                .load_suite(&path)
                .context(format!("Failed to load suite: {}", path.display()))?]
        } else {
            loader.load_suites_from_dir(&path).context(format!(
                "Failed to load suites from directory: {}",
                path.display()
            ))?
        }
    } else {
        for path in ["suites", "test/suites"] {
            if Path::new(path).exists() {
                loader.add_path(path);
            }
        }
        loader.load_all_suites()?
    };

    if suites.is_empty() {
        return Err(anyhow!("No script suites found"));
    }

    Ok(suites)
}

fn filter_suites(suites: Vec<ScriptSuite>, filter: Option<&str>) -> Result<Vec<ScriptSuite>> {
    let filtered: Vec<ScriptSuite> = match filter {
        Some(filter) => suites
            .into_iter()
            .filter(|s| s.name.to_lowercase().contains(&filter.to_lowercase()))
            .collect(),
        None => suites,
    };

    if filtered.is_empty() {
        return Err(anyhow!("No suites matching the filter were found"));
    }
    Ok(filtered)
}

/// Compile every script of every suite. Returns `true` when all
/// scripts parse.
fn check_suites(suites: &[ScriptSuite]) -> bool {
    let mut all_valid = true;
    for suite in suites {
        for script in suite.scripts() {
            let validation = validate_script(&script.script);
            if validation.valid {
                info!("\x1b[32mOK\x1b[0m {} / {}", suite.name, script.name);
            } else {
                all_valid = false;
                error!(
                    "\x1b[31mINVALID\x1b[0m {} / {}: {}",
                    suite.name,
                    script.name,
                    validation.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    all_valid
}

async fn run_all_suites(
    runner: &DefaultSuiteRunner,
    suites: Vec<ScriptSuite>,
    timeout_override: Option<u64>,
    verbose: bool,
) -> RunReport {
    let processor = TestResultProcessor::new();
    let total_start = Instant::now();
    let total = suites.len();
    let mut reports = Vec::with_capacity(total);

    info!("Running {} suite(s)...", total);

    for (idx, mut suite) in suites.into_iter().enumerate() {
        if timeout_override.is_some() {
            suite.timeout_ms = timeout_override;
        }

        info!("Suite {}/{}: {}", idx + 1, total, suite.name);
        match runner.run(&suite).await {
            Ok(report) => {
                print_suite_report(&report, verbose);
                reports.push(report);
            }
            Err(e) => {
                error!("\x1b[31mSuite execution error: {} - {:#}\x1b[0m", suite.name, e);
                let result = processor.create_error_result(&suite.name, &suite.name, &format!("{e:#}"), 0);
                let results = vec![result];
                reports.push(SuiteReport {
                    name: suite.name.clone(),
                    summary: processor.generate_summary(&results),
                    results,
                    console: Vec::new(),
                    variables: Default::default(),
                    globals: Default::default(),
                    duration_ms: 0,
                });
            }
        }
    }

    let all_results: Vec<_> = reports.iter().flat_map(|r| r.results.iter().cloned()).collect();
    let summary = processor.generate_summary(&all_results);
    let total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Errors: {}\n  Skipped: {}\n  Success rate: {}%\n  Duration: {} ms",
        summary.total,
        summary.passed,
        summary.failed,
        summary.errors,
        summary.skipped,
        summary.success_rate,
        total_duration_ms
    );

    RunReport {
        suites: reports,
        summary,
        total_duration_ms,
        timestamp: Utc::now().to_rfc3339(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let suites = filter_suites(load_suites(args.suite_path)?, args.suite_filter.as_deref())?;

    if args.check {
        if !check_suites(&suites) {
            exit(1);
        }
        return Ok(());
    }

    let runner = DefaultSuiteRunner::with_config(config);
    let report = run_all_suites(&runner, suites, args.timeout, args.verbose).await;

    if let Some(dir) = args.report_dir.map(PathBuf::from) {
        match save_run_report(&report, &dir, args.report_format) {
            Ok(path) => info!("Report saved: {}", path.display()),
            Err(e) => error!("Failed to save report: {}", e),
        }
    }

    if !report.suites.iter().all(SuiteReport::success) {
        exit(1);
    }

    Ok(())
}
