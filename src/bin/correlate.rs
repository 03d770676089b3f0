//! Correlate CLI - Command-line interface for Synheart Correlate
//!
//! Commands:
//! - frame: Print the wide frame as one record per date
//! - pair: Correlate two metrics
//! - trend: Correlate one metric against elapsed days
//! - top: Rank the strongest correlates of a target metric
//! - operations: List derived operations and their parameters
//! - apply: Apply a derived operation to one metric

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use synheart_correlate::{
    ColumnKey, ComputeError, ConfigError, CorrelationEngine, CorrelationOutcome,
    CorrelationRequest, EngineConfig, InMemoryStore, OperationRegistry, CORRELATE_VERSION,
};

/// Correlate - Time-series assembly and correlation for personal metrics
#[derive(Parser)]
#[command(name = "correlate")]
#[command(author = "Synheart AI Inc")]
#[command(version = CORRELATE_VERSION)]
#[command(about = "Correlate sparse daily metrics from many sources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the wide frame as one record per date
    Frame {
        #[command(flatten)]
        common: CommonArgs,

        /// Add nutrient/energy density columns
        #[arg(long)]
        derived: bool,
    },

    /// Correlate two metrics
    Pair {
        #[command(flatten)]
        common: CommonArgs,

        /// First metric (source:metric_name)
        #[arg(long)]
        metric1: ColumnKey,

        /// Second metric (source:metric_name)
        #[arg(long)]
        metric2: ColumnKey,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Correlate one metric against days elapsed since its first observation
    Trend {
        #[command(flatten)]
        common: CommonArgs,

        /// Metric (source:metric_name)
        #[arg(long)]
        metric: ColumnKey,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Rank the strongest correlates of a target metric
    Top {
        #[command(flatten)]
        common: CommonArgs,

        /// Target metric (source:metric_name)
        #[arg(long)]
        target: ColumnKey,

        /// Number of correlates to keep (defaults to the configured top_n)
        #[arg(long)]
        top_n: Option<usize>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// List derived operations and their parameters
    Operations {
        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Apply a derived operation to one metric
    Apply {
        #[command(flatten)]
        common: CommonArgs,

        /// Operation slug (see `correlate operations`)
        #[arg(long)]
        op: String,

        /// Metric to transform (source:metric_name)
        #[arg(long)]
        metric: ColumnKey,

        /// Operation parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Observation file, JSON array or NDJSON (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// First date to include (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last date to include (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Output format
    #[arg(long, default_value = "json")]
    output_format: OutputFormat,
}

#[derive(Args)]
struct RequestArgs {
    /// Correlation method: pearson, spearman or kendall
    #[arg(long)]
    method: Option<String>,

    /// Missing-data policy: drop, interpolate or forward_fill
    #[arg(long)]
    policy: Option<String>,

    /// Minimum number of valid pairs
    #[arg(long)]
    min_pairs: Option<usize>,

    /// Day shift for a source, e.g. oura=-1 (repeatable)
    #[arg(long = "shift", value_parser = parse_shift)]
    shifts: Vec<(String, i64)>,

    /// Correlate against nutrient/energy density columns as well
    #[arg(long)]
    density: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CORRELATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, CorrelateCliError> {
    match cli.command {
        Commands::Frame { common, derived } => cmd_frame(&common, derived),

        Commands::Pair {
            common,
            metric1,
            metric2,
            request,
        } => cmd_correlate(&common, &metric1, Some(&metric2), &request),

        Commands::Trend {
            common,
            metric,
            request,
        } => cmd_correlate(&common, &metric, None, &request),

        Commands::Top {
            common,
            target,
            top_n,
            request,
        } => cmd_top(&common, &target, top_n, &request),

        Commands::Operations { output_format } => {
            let registry = OperationRegistry::with_builtins();
            print!("{}", format_output(&registry.describe(), &output_format)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Apply {
            common,
            op,
            metric,
            params,
        } => cmd_apply(&common, &op, &metric, &params),
    }
}

fn cmd_frame(common: &CommonArgs, derived: bool) -> Result<ExitCode, CorrelateCliError> {
    let engine = load_engine(common)?;
    let frame = engine.build_wide_frame(common.start, common.end, derived)?;
    debug!(
        rows = frame.row_count(),
        columns = frame.column_count(),
        "frame ready"
    );
    print!("{}", format_output(&frame.to_records(), &common.output_format)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_correlate(
    common: &CommonArgs,
    metric1: &ColumnKey,
    metric2: Option<&ColumnKey>,
    args: &RequestArgs,
) -> Result<ExitCode, CorrelateCliError> {
    let engine = load_engine(common)?;
    let request = build_request(engine.config(), common, args);

    let outcome = CorrelationOutcome::from(engine.calculate_correlation(metric1, metric2, &request));
    print!("{}", format_output(std::slice::from_ref(&outcome), &common.output_format)?);

    // The failure is already reported on stdout as a structured value
    Ok(match outcome {
        CorrelationOutcome::Ok { .. } => ExitCode::SUCCESS,
        CorrelationOutcome::Error { .. } => ExitCode::from(2),
    })
}

fn cmd_top(
    common: &CommonArgs,
    target: &ColumnKey,
    top_n: Option<usize>,
    args: &RequestArgs,
) -> Result<ExitCode, CorrelateCliError> {
    let engine = load_engine(common)?;
    let request = build_request(engine.config(), common, args);
    let top_n = top_n.unwrap_or(engine.config().correlation.top_n);

    let ranked = engine.calculate_multiple_correlations(target, &request, top_n)?;
    print!("{}", format_output(&ranked, &common.output_format)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_apply(
    common: &CommonArgs,
    op: &str,
    metric: &ColumnKey,
    params: &str,
) -> Result<ExitCode, CorrelateCliError> {
    let params: Map<String, Value> = match serde_json::from_str(params)? {
        Value::Object(map) => map,
        other => {
            return Err(CorrelateCliError::InvalidArgument(format!(
                "--params must be a JSON object, got {other}"
            )))
        }
    };

    let engine = load_engine(common)?;
    let series = engine.series(metric, common.start, common.end)?;
    let derived = engine.apply_operation(op, &series, &params)?;
    print!("{}", format_output(std::slice::from_ref(&derived), &common.output_format)?);
    Ok(ExitCode::SUCCESS)
}

fn load_engine(common: &CommonArgs) -> Result<CorrelationEngine<InMemoryStore>, CorrelateCliError> {
    let config = match &common.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    let input = read_input(&common.input)?;
    let store = InMemoryStore::from_text(&input)?;
    if store.is_empty() {
        return Err(CorrelateCliError::NoObservations);
    }
    debug!(observations = store.len(), "observations loaded");

    Ok(CorrelationEngine::new(
        store,
        config,
        std::sync::Arc::new(OperationRegistry::with_builtins()),
    ))
}

fn read_input(input: &Path) -> Result<String, CorrelateCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            warn!("reading observations from an interactive terminal; end input with Ctrl-D");
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

/// Configured defaults overridden by whatever was given on the command line
fn build_request(config: &EngineConfig, common: &CommonArgs, args: &RequestArgs) -> CorrelationRequest {
    let mut request = config.default_request();
    if let Some(method) = &args.method {
        request.method = method.clone();
    }
    if let Some(policy) = &args.policy {
        request.missing_policy = policy.clone();
    }
    if let Some(min_pairs) = args.min_pairs {
        request.min_pairs = min_pairs;
    }
    for (source, days) in &args.shifts {
        request.time_shift.insert(source.clone(), *days);
    }
    request.use_density = args.density;
    request.start = common.start;
    request.end = common.end;
    request
}

fn parse_shift(s: &str) -> Result<(String, i64), String> {
    let (source, days) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SOURCE=DAYS, got '{s}'"))?;
    let days = days
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid day count in '{s}': {e}"))?;
    Ok((source.trim().to_string(), days))
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, CorrelateCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        // A single record is printed bare rather than wrapped in an array
        OutputFormat::Json => match records {
            [single] => Ok(serde_json::to_string(single)? + "\n"),
            _ => Ok(serde_json::to_string(records)? + "\n"),
        },
        OutputFormat::JsonPretty => match records {
            [single] => Ok(serde_json::to_string_pretty(single)? + "\n"),
            _ => Ok(serde_json::to_string_pretty(records)? + "\n"),
        },
    }
}

// Error handling

#[derive(Debug)]
enum CorrelateCliError {
    Io(io::Error),
    Compute(ComputeError),
    Config(ConfigError),
    Json(serde_json::Error),
    InvalidArgument(String),
    NoObservations,
}

impl From<io::Error> for CorrelateCliError {
    fn from(e: io::Error) -> Self {
        CorrelateCliError::Io(e)
    }
}

impl From<ComputeError> for CorrelateCliError {
    fn from(e: ComputeError) -> Self {
        CorrelateCliError::Compute(e)
    }
}

impl From<ConfigError> for CorrelateCliError {
    fn from(e: ConfigError) -> Self {
        CorrelateCliError::Config(e)
    }
}

impl From<serde_json::Error> for CorrelateCliError {
    fn from(e: serde_json::Error) -> Self {
        CorrelateCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CorrelateCliError> for CliError {
    fn from(e: CorrelateCliError) -> Self {
        match e {
            CorrelateCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CorrelateCliError::Compute(e) => {
                let hint = match &e {
                    ComputeError::ParameterSchema { .. } | ComputeError::UnknownOperation(_) => {
                        "Run 'correlate operations' to list parameters"
                    }
                    ComputeError::ColumnNotFound(_) => "Metrics are referenced as source:metric_name",
                    ComputeError::ParseError(_) | ComputeError::JsonError(_) => {
                        "Each observation needs source, metric_name, date and value"
                    }
                    _ => "Check the request arguments",
                };
                CliError {
                    code: "COMPUTE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CorrelateCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the TOML file and CORRELATE_* variables".to_string()),
            },
            CorrelateCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CorrelateCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: None,
            },
            CorrelateCliError::NoObservations => CliError {
                code: "NO_OBSERVATIONS".to_string(),
                message: "No observations found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
        }
    }
}
