#![cfg(test)]

use crate::{
    client::Client,
    pir_internals::{
        engine::clear::ClearEngine,
        error::HypercubePIRError,
        keyword::{KeywordEncoder, RowStyle, SolverBackend},
        params::{HypercubeParams, RetrievalMode},
    },
    server::Server,
};
use std::{collections::HashMap, time::Duration};
use test_case::test_case;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, duplex},
    net::TcpListener,
    sync::{oneshot, watch},
};

const Q: u64 = 65537;

fn generate_keyword_database(num_keywords: usize) -> Vec<(Vec<u8>, u64)> {
    (0..num_keywords)
        .map(|i| (format!("value - {i}").into_bytes(), (i as u64) * 1009 + 17))
        .collect()
}

fn spawn_duplex_connection(server: &Server<ClearEngine>) -> (tokio::io::DuplexStream, tokio::task::JoinHandle<Result<usize, HypercubePIRError>>, watch::Sender<bool>) {
    let (client_io, server_io) = duplex(1 << 16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = server.clone();
    let handle = tokio::spawn(async move { server.handle_connection(server_io, shutdown_rx).await });

    (client_io, handle, shutdown_tx)
}

#[tokio::test]
async fn index_retrieval_returns_every_stored_value() {
    let params = HypercubeParams::new(2, 3, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();
    server.load_values(&(0..9).collect::<Vec<u64>>()).unwrap();

    let (client_io, handle, _shutdown) = spawn_duplex_connection(&server);
    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();

    for idx in 0..9 {
        assert_eq!(client.retrieve_index(idx).await.unwrap(), idx as u64);
    }
    assert_eq!(client.retrieve_index(9).await, Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 }));
    assert_eq!(client.retrieve_keyword(b"apple").await, Err(HypercubePIRError::MissingKeywordKeys));

    drop(client);
    assert_eq!(handle.await.unwrap().unwrap(), 9);
}

#[tokio::test]
async fn index_retrieval_sees_later_inserts() {
    let params = HypercubeParams::new(3, 2, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();

    let (client_io, _handle, _shutdown) = spawn_duplex_connection(&server);
    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();

    assert_eq!(client.retrieve_index(6).await.unwrap(), 1);
    server.insert(6, 4242).unwrap();
    assert_eq!(client.retrieve_index(6).await.unwrap(), 4242);
}

#[test_case(1, 8, RowStyle::Dense, SolverBackend::ModP, 6; "one dimension with dense rows")]
#[test_case(2, 8, RowStyle::Dense, SolverBackend::ModP, 4; "two dimensions with dense rows")]
#[test_case(2, 8, RowStyle::Banded { width: 4 }, SolverBackend::ModP, 4; "two dimensions with banded rows")]
#[test_case(2, 8, RowStyle::Dense, SolverBackend::Real, 4; "two dimensions solved over reals")]
#[test_case(3, 6, RowStyle::Dense, SolverBackend::ModP, 5; "three dimensions with dense rows")]
#[tokio::test]
async fn keyword_retrieval_returns_associated_values(d: usize, s: usize, style: RowStyle, backend: SolverBackend, num_keywords: usize) {
    let params = HypercubeParams::new(d, s, Q).unwrap();

    let db = generate_keyword_database(num_keywords);
    let db_as_ref = db.iter().map(|(k, v)| (k.as_slice(), *v)).collect::<HashMap<&[u8], u64>>();

    let encoder = KeywordEncoder::new(Q).with_row_style(style).with_backend(backend);
    let server = Server::setup_keyword(ClearEngine::new(Q), params, &encoder, &db_as_ref).unwrap();
    assert_eq!(server.mode(), RetrievalMode::Keyword);

    let (client_io, _handle, _shutdown) = spawn_duplex_connection(&server);
    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Keyword, style).await.unwrap();

    for (keyword, value) in db.iter() {
        assert_eq!(client.retrieve_keyword(keyword).await.unwrap(), *value);
    }
}

#[test]
fn keyword_setup_fails_for_overfull_partition() {
    let params = HypercubeParams::new(1, 4, Q).unwrap();

    let db = generate_keyword_database(5);
    let db_as_ref = db.iter().map(|(k, v)| (k.as_slice(), *v)).collect::<HashMap<&[u8], u64>>();

    let encoder = KeywordEncoder::new(Q).with_max_attempts(3);
    assert!(matches!(
        Server::setup_keyword(ClearEngine::new(Q), params, &encoder, &db_as_ref),
        Err(HypercubePIRError::EncodingFailure(3))
    ));
}

async fn forward_frames<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(mut from: R, mut to: W, tamper_frame: Option<usize>) {
    let mut num_frames = 0usize;

    while let Ok(len) = from.read_u32_le().await {
        let mut frame = vec![0u8; len as usize];
        if from.read_exact(&mut frame).await.is_err() {
            break;
        }

        if tamper_frame == Some(num_frames) {
            if let Some(last) = frame.last_mut() {
                *last ^= 0x01;
            }
        }

        if to.write_u32_le(len).await.is_err() || to.write_all(&frame).await.is_err() {
            break;
        }
        num_frames += 1;
    }

    let _ = to.shutdown().await;
}

#[tokio::test]
async fn tampered_query_drops_the_connection_only() {
    let params = HypercubeParams::new(2, 3, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();
    server.load_values(&[10, 11, 12, 13, 14, 15, 16, 17, 18]).unwrap();

    let (client_io, relay_client_side) = duplex(1 << 16);
    let (relay_server_side, server_io) = duplex(1 << 16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = {
        let server = server.clone();
        tokio::spawn(async move { server.handle_connection(server_io, shutdown_rx).await })
    };

    // Frame 0 is the client's Diffie-Hellman value, frame 1 its first query, whose MAC gets flipped
    let (client_read, client_write) = tokio::io::split(relay_client_side);
    let (server_read, server_write) = tokio::io::split(relay_server_side);
    tokio::spawn(forward_frames(client_read, server_write, Some(1)));
    tokio::spawn(forward_frames(server_read, client_write, None));

    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();

    assert!(matches!(client.retrieve_index(4).await, Err(HypercubePIRError::NetworkFailure(_))));
    assert_eq!(handle.await.unwrap(), Err(HypercubePIRError::AuthenticationFailure));

    // Other connections are unaffected
    let (client_io, _handle, _shutdown) = spawn_duplex_connection(&server);
    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();
    assert_eq!(client.retrieve_index(4).await.unwrap(), 14);

    drop(shutdown_tx);
}

#[tokio::test]
async fn index_client_of_keyword_server_rejects_unexpected_messages() {
    let params = HypercubeParams::new(2, 3, Q).unwrap();

    let db = generate_keyword_database(2);
    let db_as_ref = db.iter().map(|(k, v)| (k.as_slice(), *v)).collect::<HashMap<&[u8], u64>>();
    let server = Server::setup_keyword(ClearEngine::new(Q), params, &KeywordEncoder::new(Q), &db_as_ref).unwrap();

    let (client_io, _handle, _shutdown) = spawn_duplex_connection(&server);
    let mut client = Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();

    // The first sealed message the client opens is a distributed keyword key, not a response
    assert!(matches!(
        client.retrieve_index(0).await,
        Err(HypercubePIRError::UnexpectedMessage { found: 2, .. })
    ));
}

#[tokio::test]
async fn keyword_client_of_index_server_waits_until_the_server_closes() {
    let params = HypercubeParams::new(2, 3, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();

    let (client_io, handle, shutdown_tx) = spawn_duplex_connection(&server);
    let mut setup = tokio::spawn(Client::setup(client_io, ClearEngine::new(Q), params, RetrievalMode::Keyword, RowStyle::default()));

    // No keys are ever distributed, so the handshake can't complete on its own
    assert!(tokio::time::timeout(Duration::from_millis(300), &mut setup).await.is_err());

    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), Ok(0));

    let setup = tokio::time::timeout(Duration::from_secs(10), setup).await.unwrap().unwrap();
    assert!(setup.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_server_answers_concurrent_clients_and_shuts_down_gracefully() {
    let params = HypercubeParams::new(2, 4, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();
    server.load_values(&(0..16).map(|i| i * i).collect::<Vec<u64>>()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serving = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
        })
    };

    let mut clients = Vec::new();
    for c in 0..4usize {
        clients.push(tokio::spawn(async move {
            let mut client = Client::connect(addr, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();
            for idx in (c..16).step_by(4) {
                assert_eq!(client.retrieve_index(idx).await.unwrap(), (idx * idx) as u64);
            }
            client
        }));
    }

    // Clients stay connected while the server shuts down
    let mut connected = Vec::new();
    for client in clients {
        connected.push(client.await.unwrap());
    }

    shutdown_tx.send(()).unwrap();
    let served = tokio::time::timeout(Duration::from_secs(10), serving).await.unwrap().unwrap();
    assert_eq!(served, Ok(()));

    for client in connected.iter_mut() {
        assert!(client.retrieve_index(0).await.is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connections_beyond_the_cap_wait_for_a_free_slot() {
    let params = HypercubeParams::new(2, 3, Q).unwrap();
    let server = Server::setup_index(ClearEngine::new(Q), params).unwrap().with_max_connections(1);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let first = Client::connect(addr, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()).await.unwrap();

    let mut second = tokio::spawn(Client::connect(addr, ClearEngine::new(Q), params, RetrievalMode::Index, RowStyle::default()));
    assert!(tokio::time::timeout(Duration::from_millis(300), &mut second).await.is_err());

    drop(first);
    let mut second = tokio::time::timeout(Duration::from_secs(10), second).await.unwrap().unwrap().unwrap();
    assert_eq!(second.retrieve_index(8).await.unwrap(), 1);

    drop(second);
    shutdown_tx.send(()).unwrap();
    assert_eq!(serving.await.unwrap(), Ok(()));
}
