//! pir-server: serves hypercube PIR queries over TCP, until interrupted.

mod common;

use clap::{Parser, ValueEnum};
use common::{EngineKind, ParamsArgs, RowStyleArgs};
use hypercube_pir::{ClearEngine, HomomorphicEngine, HypercubePIRError, HypercubeParams, KeywordEncoder, SolverBackend, server::Server};
use std::{collections::HashMap, error::Error, path::PathBuf};
use tokio::net::TcpListener;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Mode {
    #[default]
    Index,
    Keyword,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Backend {
    #[default]
    ModP,
    Real,
}

#[derive(Parser, Debug)]
#[command(name = "pir-server")]
#[command(about = "Hypercube PIR server")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    params: ParamsArgs,

    #[arg(long, value_enum, default_value_t = Mode::Index)]
    mode: Mode,

    /// Index mode: file of integers, separated by commas or whitespace, loaded from index 0.
    /// Keyword mode: file of `keyword,value` lines.
    #[arg(long)]
    values: Option<PathBuf>,

    #[command(flatten)]
    row_style: RowStyleArgs,

    /// Linear system solver used for keyword encoding
    #[arg(long, value_enum, default_value_t = Backend::ModP)]
    backend: Backend,

    #[arg(long, value_enum, default_value_t = EngineKind::Clear)]
    engine: EngineKind,

    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Maximum number of concurrently served connections
    #[arg(long, default_value_t = hypercube_pir::DEFAULT_MAX_CONCURRENT_CONNECTIONS)]
    max_connections: usize,
}

fn parse_index_values(text: &str) -> Result<Vec<u64>, HypercubePIRError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<u64>()
                .map_err(|e| HypercubePIRError::InvalidParameters(format!("bad value '{token}': {e}")))
        })
        .collect()
}

fn parse_keyword_values(text: &str) -> Result<Vec<(Vec<u8>, u64)>, HypercubePIRError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (keyword, value) = line
                .rsplit_once(',')
                .ok_or_else(|| HypercubePIRError::InvalidParameters(format!("expected 'keyword,value', found '{line}'")))?;
            let value = value
                .trim()
                .parse::<u64>()
                .map_err(|e| HypercubePIRError::InvalidParameters(format!("bad value in '{line}': {e}")))?;

            Ok((keyword.trim().as_bytes().to_vec(), value))
        })
        .collect()
}

fn demo_keyword_values() -> Vec<(Vec<u8>, u64)> {
    [("apple", 1), ("banana", 2), ("grape", 3), ("orange", 4), ("lemon", 5), ("kiwi", 6), ("peach", 7), ("plum", 8)]
        .into_iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v))
        .collect()
}

fn setup_server<E: HomomorphicEngine + 'static>(engine: E, params: HypercubeParams, cli: &Cli) -> Result<Server<E>, Box<dyn Error>> {
    let server = match cli.mode {
        Mode::Index => {
            let server = Server::setup_index(engine, params)?;
            if let Some(path) = &cli.values {
                let values = parse_index_values(&std::fs::read_to_string(path)?)?;
                server.load_values(&values)?;
                tracing::info!(num_values = values.len(), "loaded values");
            }
            server
        }
        Mode::Keyword => {
            let entries = match &cli.values {
                Some(path) => parse_keyword_values(&std::fs::read_to_string(path)?)?,
                None => demo_keyword_values(),
            };
            let db = entries.iter().map(|(k, v)| (k.as_slice(), *v)).collect::<HashMap<&[u8], u64>>();

            let backend = match cli.backend {
                Backend::ModP => SolverBackend::ModP,
                Backend::Real => SolverBackend::Real,
            };
            let encoder = KeywordEncoder::new(params.plaintext_modulus)
                .with_row_style(cli.row_style.resolve())
                .with_backend(backend);

            Server::setup_keyword(engine, params, &encoder, &db)?
        }
    };

    Ok(server.with_max_connections(cli.max_connections))
}

async fn run<E: HomomorphicEngine + 'static>(engine: E, params: HypercubeParams, cli: &Cli) -> Result<(), Box<dyn Error>> {
    let server = setup_server(engine, params, cli)?;
    let listener = TcpListener::bind(&cli.bind).await?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for interrupt");
            }
        })
        .await?;

    tracing::info!("PIR server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    common::init_tracing();

    let cli = Cli::parse();
    let params = cli.params.resolve()?;

    match cli.engine {
        EngineKind::Clear => {
            tracing::warn!("clear engine selected, queries are not private");
            run(ClearEngine::new(params.plaintext_modulus), params, &cli).await
        }
        #[cfg(feature = "bfv")]
        EngineKind::Bfv => run(hypercube_pir::BfvEngine::for_dimension(params.plaintext_modulus, params.dimension)?, params, &cli).await,
    }
}
