//! HypercubePIR: A Rust library implementation of a single server, homomorphic encryption based **P**rivate **I**nformation **R**etrieval (PIR) protocol,
//! over a database laid out as a `d`-dimensional hypercube of side length `s`.
//!
//! A client retrieves either the value stored at some linear index, or the value associated with some keyword, without the server learning which.
//! The client encrypts `d·s` selection weights under a homomorphic scheme, the server folds every cell of the hypercube against them and answers with
//! one ciphertext, which only the client can decrypt.
//!
//! ## Features
//!
//! * **Index and keyword retrieval:** Keyword databases are encoded into the hypercube by solving small linear systems over `Z_p`, so that the inner
//!   product of a keyword's pseudorandom row with its partition recovers the associated value.
//! * **Pluggable homomorphic engine:** [`HomomorphicEngine`] abstracts the scheme. [`ClearEngine`] is a transparent engine with depth accounting, useful
//!   for tests and benchmarks, and `BfvEngine` (behind the `bfv` feature) is backed by a real BFV implementation.
//! * **Secure session:** Diffie-Hellman over ristretto255, HKDF derived keys, and encrypt-then-MAC framing of every message, on top of any ordered byte stream.
//! * **Networked server:** Bounded concurrency, per connection error isolation, and graceful shutdown, built on `tokio`.
//!
//! ## Usage
//!
//! Add HypercubePIR as dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! hypercube_pir = "=0.1.0"
//! tokio = { version = "=1.45.0", features = ["full"] }
//! ```
//!
//! Then, you can use it in your code:
//!
//! ```rust
//! use hypercube_pir::{client::Client, server::Server, ClearEngine, HypercubeParams, RetrievalMode, RowStyle};
//! use tokio::{io::duplex, sync::watch};
//!
//! #[tokio::main]
//! async fn main() {
//!     const Q: u64 = 65537;
//!
//!     // 2-dimensional hypercube of side length 3, holding 9 values
//!     let params = HypercubeParams::new(2, 3, Q).expect("Invalid parameters");
//!     let server = Server::setup_index(ClearEngine::new(Q), params).expect("Server setup failed");
//!     server.load_values(&[10, 20, 30, 40, 50, 60, 70, 80, 90]).expect("Failed to load values");
//!
//!     // In-memory connection, a `TcpStream` works the same
//!     let (client_io, server_io) = duplex(1 << 16);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     let handler = server.clone();
//!     tokio::spawn(async move { handler.handle_connection(server_io, shutdown_rx).await });
//!
//!     let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default())
//!         .await
//!         .expect("Client setup failed");
//!
//!     let value = client.retrieve_index(5).await.expect("Retrieval failed");
//!     assert_eq!(value, 60);
//! }
//! ```
//!
//! ## Modules
//!
//! * `server`: Contains the `Server` struct, for setting up a hypercube from plain values or a keyword database and answering client queries over the network.
//! * `client`: Contains the `Client` struct, for connecting to a server, building encrypted queries and decrypting responses.

pub use pir_internals::channel::{DhKeypair, SessionKeys};
pub use pir_internals::engine::{HomomorphicEngine, clear::ClearEngine};
pub use pir_internals::error::HypercubePIRError;
pub use pir_internals::evaluator::CubeFoldEvaluator;
pub use pir_internals::hypercube::HypercubeStore;
pub use pir_internals::keyword::{KeywordEncoder, KeywordKeys, PartitionEncoding, RowStyle, SolverBackend};
pub use pir_internals::messages::{DHPublicValue, HMACTaggedEnvelope, MessageType, QueryMessage, ResponseMessage, WireMessage};
pub use pir_internals::params::{DEFAULT_MAX_CONCURRENT_CONNECTIONS, DEFAULT_PLAINTEXT_MODULUS, ENCODE_MAX_ATTEMPT_COUNT, HypercubeParams, RetrievalMode};
pub use pir_internals::selection::{IndexStrategy, KeywordStrategy, RetrievalStrategy, SelectionBuilder};
pub use pir_internals::session::{SecureSession, SessionState};
pub use pir_internals::transport::FramedStream;

#[cfg(feature = "bfv")]
pub use pir_internals::engine::bfv::BfvEngine;

pub mod client;
pub mod server;

mod pir_internals;
mod test_pir;
