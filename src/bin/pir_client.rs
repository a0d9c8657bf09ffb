//! pir-client: privately retrieves values from a running pir-server.

mod common;

use clap::{Parser, Subcommand};
use common::{EngineKind, ParamsArgs, RowStyleArgs};
use hypercube_pir::{ClearEngine, HomomorphicEngine, HypercubeParams, RetrievalMode, client::Client};
use std::error::Error;

#[derive(Subcommand, Debug)]
enum Target {
    /// Retrieve values by linear index, server must run in index mode
    Index { indices: Vec<usize> },
    /// Retrieve values by keyword, server must run in keyword mode
    Keyword { keywords: Vec<String> },
}

#[derive(Parser, Debug)]
#[command(name = "pir-client")]
#[command(about = "Hypercube PIR client")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    params: ParamsArgs,

    #[command(flatten)]
    row_style: RowStyleArgs,

    #[arg(long, value_enum, default_value_t = EngineKind::Clear)]
    engine: EngineKind,

    /// PIR server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    connect: String,

    #[command(subcommand)]
    target: Target,
}

async fn run<E: HomomorphicEngine>(engine: E, params: HypercubeParams, cli: &Cli) -> Result<(), Box<dyn Error>> {
    let mode = match cli.target {
        Target::Index { .. } => RetrievalMode::Index,
        Target::Keyword { .. } => RetrievalMode::Keyword,
    };

    let mut client = Client::connect(cli.connect.as_str(), engine, params, mode, cli.row_style.resolve()).await?;
    tracing::info!(server = %cli.connect, ?mode, "connected to PIR server");

    match &cli.target {
        Target::Index { indices } => {
            for &idx in indices {
                let value = client.retrieve_index(idx).await?;
                println!("{idx}\t{value}");
            }
        }
        Target::Keyword { keywords } => {
            for keyword in keywords {
                let value = client.retrieve_keyword(keyword.as_bytes()).await?;
                println!("{keyword}\t{value}");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    common::init_tracing();

    let cli = Cli::parse();
    let params = cli.params.resolve()?;

    match cli.engine {
        EngineKind::Clear => run(ClearEngine::new(params.plaintext_modulus), params, &cli).await,
        #[cfg(feature = "bfv")]
        EngineKind::Bfv => run(hypercube_pir::BfvEngine::for_dimension(params.plaintext_modulus, params.dimension)?, params, &cli).await,
    }
}
