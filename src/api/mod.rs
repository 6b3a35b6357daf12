mod validate;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Json, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    ComputationBreakdown, SimulationConfig, SimulationResult, generate_breakdown, run_simulation,
};
use crate::history;

pub use validate::{ConfigError, validate_config, validate_series};

const DEFAULT_PORT: u16 = 8090;

static SERVER_START: OnceLock<DateTime<Utc>> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "retirement-planner",
    version,
    about = "Deterministic bucket-strategy retirement simulator"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Serve the JSON API")]
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    #[command(about = "Run one simulation and print the result as JSON")]
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, help = "CSV of annual equity returns in percent")]
        returns: Option<PathBuf>,
        #[arg(long, help = "CSV of annual inflation in percent")]
        inflation: Option<PathBuf>,
        #[arg(
            long,
            help = "First historical year to replay; defaults to the config's currentYear"
        )]
        history_start: Option<i32>,
        #[arg(long)]
        pretty: bool,
    },
    #[command(about = "Print the computation breakdown for one simulated age")]
    Breakdown {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        age: u32,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownRequest {
    config: SimulationConfig,
    target_age: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ApiMetadata {
    version: String,
    build_time: String,
    server_start_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    #[serde(flatten)]
    result: SimulationResult,
    api_metadata: ApiMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownResponse {
    #[serde(flatten)]
    breakdown: ComputationBreakdown,
    api_metadata: ApiMetadata,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { port } => run_http_server(port)
            .await
            .with_context(|| format!("HTTP server on port {port} failed")),
        Command::Run {
            config,
            returns,
            inflation,
            history_start,
            pretty,
        } => {
            let config = load_config(&config)?;
            let start_year = history_start.unwrap_or(config.current_year);
            let market_returns = load_rates(returns.as_deref(), start_year)?;
            let inflation_rates = load_rates(inflation.as_deref(), start_year)?;
            validate_series("marketReturns", &market_returns)?;
            validate_series("inflationRates", &inflation_rates)?;

            let result = run_simulation(&config, &market_returns, &inflation_rates);
            info!(
                name = %config.name,
                success = result.summary.is_success,
                failure_year = ?result.summary.failure_year,
                "simulation complete"
            );
            print_json(&result, pretty)
        }
        Command::Breakdown { config, age } => {
            let config = load_config(&config)?;
            let breakdown = build_breakdown(&config, age)?;
            print_json(&breakdown, true)
        }
    }
}

fn load_config(path: &Path) -> Result<SimulationConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = config_from_json(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn config_from_json(json: &str) -> Result<SimulationConfig> {
    let config: SimulationConfig = serde_json::from_str(json).context("invalid config JSON")?;
    validate_config(&config)?;
    Ok(config)
}

fn load_rates(path: Option<&Path>, start_year: i32) -> Result<Vec<f64>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let series = history::load_series(path)?;
    Ok(history::rates_from(&series, start_year))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to encode JSON output")?;
    println!("{text}");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum BreakdownError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Age {0} not found in simulation results")]
    AgeNotSimulated(u32),
}

fn build_breakdown(
    config: &SimulationConfig,
    target_age: u32,
) -> Result<ComputationBreakdown, BreakdownError> {
    validate_config(config)?;
    let result = run_simulation(config, &[], &[]);
    let years = &result.yearly_results;
    let current = years
        .iter()
        .find(|year| year.age == target_age)
        .ok_or(BreakdownError::AgeNotSimulated(target_age))?;
    let previous = years
        .iter()
        .find(|year| target_age > 0 && year.age == target_age - 1);
    Ok(generate_breakdown(config, target_age, current, previous))
}

fn api_metadata() -> ApiMetadata {
    let started = SERVER_START.get_or_init(Utc::now);
    ApiMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_time: option_env!("RETIREMENT_PLANNER_BUILD_TIME")
            .unwrap_or("unknown")
            .to_string(),
        server_start_time: started.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/simulate/breakdown", post(breakdown_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    SERVER_START.get_or_init(Utc::now);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "retirement planner API listening");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(payload: Result<Json<SimulationConfig>, JsonRejection>) -> Response {
    let config = match payload {
        Ok(Json(config)) => config,
        Err(rejection) => return rejection_response(rejection),
    };
    match build_simulate_response(&config) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => {
            warn!(error = %err, "rejected simulation request");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

async fn breakdown_handler(payload: Result<Json<BreakdownRequest>, JsonRejection>) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(rejection),
    };
    info!(target_age = request.target_age, name = %request.config.name, "breakdown request");
    match build_breakdown(&request.config, request.target_age) {
        Ok(breakdown) => json_response(
            StatusCode::OK,
            BreakdownResponse {
                breakdown,
                api_metadata: api_metadata(),
            },
        ),
        Err(err) => {
            warn!(error = %err, "rejected breakdown request");
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn build_simulate_response(config: &SimulationConfig) -> Result<SimulateResponse, ConfigError> {
    validate_config(config)?;
    let result = run_simulation(config, &[], &[]);
    info!(
        name = %config.name,
        years = result.yearly_results.len(),
        success = result.summary.is_success,
        "simulation request"
    );
    Ok(SimulateResponse {
        result,
        api_metadata: api_metadata(),
    })
}

fn rejection_response(rejection: JsonRejection) -> Response {
    warn!(error = %rejection.body_text(), "unreadable request body");
    error_response(rejection.status(), &rejection.body_text())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
