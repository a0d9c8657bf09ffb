use clap::{Args, ValueEnum};
use hypercube_pir::{DEFAULT_PLAINTEXT_MODULUS, HypercubePIRError, HypercubeParams, RowStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Hypercube shape, either read from a JSON file or given on the command line.
#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// JSON file holding `dimension`, `side_length` and `plaintext_modulus`, takes precedence over the flags below
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Number of hypercube dimensions
    #[arg(short = 'd', long, default_value_t = 2)]
    pub dimension: usize,

    /// Side length of the hypercube
    #[arg(short = 's', long, default_value_t = 4)]
    pub side_length: usize,

    /// Plaintext modulus of the homomorphic scheme
    #[arg(short = 'q', long, default_value_t = DEFAULT_PLAINTEXT_MODULUS)]
    pub modulus: u64,
}

impl ParamsArgs {
    pub fn resolve(&self) -> Result<HypercubeParams, HypercubePIRError> {
        match &self.params {
            Some(path) => HypercubeParams::from_json_file(path),
            None => HypercubeParams::new(self.dimension, self.side_length, self.modulus),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum EngineKind {
    /// Transparent engine, provides no privacy
    #[default]
    Clear,
    /// BFV engine, requires the `bfv` feature
    #[cfg(feature = "bfv")]
    Bfv,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum RowStyleArg {
    #[default]
    Dense,
    Banded,
    OneHot,
}

/// Pseudorandom row style of keyword retrieval, must agree between server and client.
#[derive(Args, Debug)]
pub struct RowStyleArgs {
    #[arg(long, value_enum, default_value_t = RowStyleArg::Dense)]
    pub row_style: RowStyleArg,

    /// Window width of banded rows
    #[arg(long, default_value_t = 8)]
    pub band_width: usize,
}

impl RowStyleArgs {
    pub fn resolve(&self) -> RowStyle {
        match self.row_style {
            RowStyleArg::Dense => RowStyle::Dense,
            RowStyleArg::Banded => RowStyle::Banded { width: self.band_width },
            RowStyleArg::OneHot => RowStyle::OneHot,
        }
    }
}

/// Structured logging to stderr, filtered through `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}
