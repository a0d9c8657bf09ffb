use crate::pir_internals::{
    branch_opt_util,
    engine::HomomorphicEngine,
    error::HypercubePIRError,
    evaluator::CubeFoldEvaluator,
    hypercube::HypercubeStore,
    keyword::{KeywordEncoder, KeywordKeys},
    messages::{QueryMessage, ResponseMessage, WireMessage},
    params::{DEFAULT_MAX_CONCURRENT_CONNECTIONS, HypercubeParams, RetrievalMode},
    session::SecureSession,
};
use arc_swap::ArcSwap;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{Semaphore, watch},
    task::JoinSet,
};

/// Represents the server of the hypercube **P**rivate **I**nformation **R**etrieval scheme.
///
/// The database lives in a [`HypercubeStore`] behind an atomically swappable pointer. Writers are
/// serialized and publish a new snapshot, while every query folds the snapshot it started with.
pub struct Server<E: HomomorphicEngine> {
    engine: Arc<E>,
    store: Arc<ArcSwap<HypercubeStore>>,
    write_lock: Arc<Mutex<()>>,
    keyword_keys: Option<Arc<KeywordKeys>>,
    max_connections: usize,
}

impl<E: HomomorphicEngine> Clone for Server<E> {
    fn clone(&self) -> Self {
        Server {
            engine: self.engine.clone(),
            store: self.store.clone(),
            write_lock: self.write_lock.clone(),
            keyword_keys: self.keyword_keys.clone(),
            max_connections: self.max_connections,
        }
    }
}

impl<E: HomomorphicEngine + 'static> Server<E> {
    /// Sets up a server for retrieval by index, over a hypercube with every cell set to 1.
    pub fn setup_index(engine: E, params: HypercubeParams) -> Result<Server<E>, HypercubePIRError> {
        Self::check_modulus(&engine, &params)?;
        let store = HypercubeStore::new(params)?;

        Ok(Self::from_parts(engine, store, None))
    }

    /// Sets up a server for retrieval by keyword.
    ///
    /// Samples fresh keyword keys and encodes `db` into the hypercube, as described in [`KeywordEncoder::encode_database`].
    /// The row key the encoding finally used replaces the sampled one, so clients always query with the right key.
    ///
    /// # Arguments
    ///
    /// * `engine`: Homomorphic engine, its plaintext modulus must match `params`.
    /// * `params`: Hypercube shape.
    /// * `encoder`: Keyword encoder, configured with row style and solver backend.
    /// * `db`: Keyword database, values are reduced modulo the plaintext modulus.
    ///
    /// # Returns
    ///
    /// The server, or an error if the database is empty or can't be encoded within the attempt budget.
    pub fn setup_keyword(engine: E, params: HypercubeParams, encoder: &KeywordEncoder, db: &HashMap<&[u8], u64>) -> Result<Server<E>, HypercubePIRError> {
        Self::check_modulus(&engine, &params)?;

        let mut rng = ChaCha8Rng::from_os_rng();
        let mut keys = KeywordKeys::random(&mut rng);

        let (store, row_key) = encoder.encode_database(params, &keys.partition_key, &keys.row_key, db, &mut rng)?;
        keys.row_key = row_key;

        Ok(Self::from_parts(engine, store, Some(keys)))
    }

    fn from_parts(engine: E, store: HypercubeStore, keyword_keys: Option<KeywordKeys>) -> Server<E> {
        Server {
            engine: Arc::new(engine),
            store: Arc::new(ArcSwap::from_pointee(store)),
            write_lock: Arc::new(Mutex::new(())),
            keyword_keys: keyword_keys.map(Arc::new),
            max_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
        }
    }

    fn check_modulus(engine: &E, params: &HypercubeParams) -> Result<(), HypercubePIRError> {
        params.validate()?;
        if branch_opt_util::unlikely(engine.plaintext_modulus() != params.plaintext_modulus) {
            return Err(HypercubePIRError::InvalidParameters(format!(
                "engine plaintext modulus {} differs from hypercube modulus {}",
                engine.plaintext_modulus(),
                params.plaintext_modulus
            )));
        }
        Ok(())
    }

    /// Caps the number of connections served concurrently, further ones wait to be accepted.
    pub fn with_max_connections(mut self, max_connections: usize) -> Server<E> {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn mode(&self) -> RetrievalMode {
        if self.keyword_keys.is_some() { RetrievalMode::Keyword } else { RetrievalMode::Index }
    }

    pub fn params(&self) -> HypercubeParams {
        *self.store.load().params()
    }

    /// Immutable view of the current database.
    pub fn snapshot(&self) -> Arc<HypercubeStore> {
        self.store.load_full()
    }

    /// Stores `value mod q` at `idx`, publishing a new snapshot.
    ///
    /// Every call copies the whole store, so bulk writes should go through [`Server::insert_batch`] or
    /// [`Server::load_values`], which copy it once.
    pub fn insert(&self, idx: usize, value: u64) -> Result<(), HypercubePIRError> {
        self.update(|store| store.insert(idx, value))
    }

    /// Applies every `(idx, value)` write, publishing a single new snapshot.
    ///
    /// Either all writes land or, if any index is out of bounds, none do.
    pub fn insert_batch(&self, writes: &[(usize, u64)]) -> Result<(), HypercubePIRError> {
        self.update(|store| writes.iter().try_for_each(|&(idx, value)| store.insert(idx, value)))
    }

    /// Writes `values` into consecutive cells starting at index 0, publishing a single new snapshot.
    pub fn load_values(&self, values: &[u64]) -> Result<(), HypercubePIRError> {
        self.update(|store| store.load_values(values))
    }

    fn update<F>(&self, mutate: F) -> Result<(), HypercubePIRError>
    where
        F: FnOnce(&mut HypercubeStore) -> Result<(), HypercubePIRError>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = HypercubeStore::clone(&self.store.load());
        mutate(&mut next)?;
        self.store.store(Arc::new(next));

        Ok(())
    }

    /// Responds to an encoded query with an encoded response, folding the current snapshot.
    ///
    /// # Arguments
    ///
    /// * `query`: Serialized [`QueryMessage`].
    ///
    /// # Returns
    ///
    /// Serialized [`ResponseMessage`], or an error if the query is malformed or evaluation fails.
    pub fn respond(&self, query: &[u8]) -> Result<Vec<u8>, HypercubePIRError> {
        let query = QueryMessage::from_bytes(query)?;
        Ok(self.answer(&query)?.to_bytes())
    }

    fn answer(&self, query: &QueryMessage) -> Result<ResponseMessage, HypercubePIRError> {
        let store = self.store.load_full();

        let rk = self.engine.relin_key_from_bytes(&query.relin_key)?;
        let selection = query
            .selection
            .iter()
            .map(|ct| self.engine.ciphertext_from_bytes(ct))
            .collect::<Result<Vec<_>, _>>()?;

        let response = CubeFoldEvaluator::new(self.engine.as_ref()).evaluate(&store, &selection, &rk)?;

        Ok(ResponseMessage {
            ciphertext: self.engine.ciphertext_to_bytes(&response),
        })
    }

    /// Accepts connections until `shutdown` resolves, then waits for in-flight connections to wind down.
    ///
    /// At most `max_connections` connections are served at once. A failing connection is logged and
    /// dropped, it never stops the server.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), HypercubePIRError>
    where
        F: Future<Output = ()>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        tracing::info!(addr = ?listener.local_addr().ok(), mode = ?self.mode(), params = ?self.params(), "PIR server listening");

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| HypercubePIRError::NetworkFailure(e.to_string()))?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            tracing::info!(%peer, "new connection from PIR client");

            let server = self.clone();
            let conn_shutdown = shutdown_rx.clone();
            connections.spawn(async move {
                let _permit = permit;
                match server.handle_connection(stream, conn_shutdown).await {
                    Ok(num_queries) => tracing::info!(%peer, num_queries, "connection closed"),
                    Err(e) => tracing::warn!(%peer, error = %e, "connection dropped"),
                }
            });

            while let Some(joined) = connections.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "connection task panicked");
                }
            }
        }

        tracing::info!(in_flight = connections.len(), "shutting down PIR server");
        let _ = shutdown_tx.send(true);

        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "connection task panicked");
            }
        }

        Ok(())
    }

    /// Runs the handshake, then answers queries until the peer closes the stream or shutdown is signalled.
    ///
    /// # Returns
    ///
    /// The number of answered queries.
    pub async fn handle_connection<S>(&self, stream: S, mut shutdown: watch::Receiver<bool>) -> Result<usize, HypercubePIRError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session = SecureSession::new(stream);
        tokio::select! {
            handshake = session.handshake_as_server(self.keyword_keys.as_deref()) => handshake?,
            _ = shutdown.changed() => return Ok(0),
        }

        let mut num_queries = 0usize;
        loop {
            let query = tokio::select! {
                received = session.receive_or_eof::<QueryMessage>() => match received? {
                    Some(query) => query,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            tracing::debug!(num_ciphertexts = query.selection.len(), "received query");

            let server = self.clone();
            let response = tokio::task::spawn_blocking(move || server.answer(&query))
                .await
                .map_err(|e| HypercubePIRError::EvaluationError(e.to_string()))??;

            session.send(&response).await?;
            num_queries += 1;
        }

        Ok(num_queries)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::{
        engine::clear::ClearEngine,
        selection::{IndexStrategy, SelectionBuilder},
    };

    const Q: u64 = 65537;

    #[test]
    fn engine_and_hypercube_moduli_must_agree() {
        let params = HypercubeParams::new(2, 3, 97).unwrap();
        assert!(matches!(
            Server::setup_index(ClearEngine::new(Q), params),
            Err(HypercubePIRError::InvalidParameters(_))
        ));
    }

    #[test]
    fn writes_publish_new_snapshots() {
        let params = HypercubeParams::new(2, 3, Q).unwrap();
        let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();

        let before = server.snapshot();
        server.insert(4, Q + 10).unwrap();
        let after = server.snapshot();

        assert_eq!(before.get(4).unwrap(), 1);
        assert_eq!(after.get(4).unwrap(), 10);

        assert!(server.insert(9, 1).is_err());
        assert!(Arc::ptr_eq(&after, &server.snapshot()));
    }

    #[test]
    fn batched_writes_publish_one_snapshot_or_none() {
        let params = HypercubeParams::new(2, 3, Q).unwrap();
        let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();

        let before = server.snapshot();
        server.insert_batch(&[(0, 5), (4, 6), (8, Q + 7), (4, 9)]).unwrap();
        let after = server.snapshot();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!((0..9).map(|idx| after.get(idx).unwrap()).collect::<Vec<_>>(), vec![5, 1, 1, 1, 9, 1, 1, 1, 7]);

        assert_eq!(
            server.insert_batch(&[(1, 2), (9, 3)]),
            Err(HypercubePIRError::OutOfBounds { value: 9, bound: 9 })
        );
        assert!(Arc::ptr_eq(&after, &server.snapshot()));
        assert_eq!(server.snapshot().get(1).unwrap(), 1);
    }

    #[test]
    fn respond_answers_encoded_index_query() {
        let engine = ClearEngine::new(Q);
        let params = HypercubeParams::new(2, 3, Q).unwrap();

        let server = Server::setup_index(engine.clone(), params).unwrap();
        server.load_values(&(0..9).collect::<Vec<u64>>()).unwrap();

        let (sk, rk) = engine.generate_keys().unwrap();
        let selection = SelectionBuilder::new(&engine, params).build(&sk, &IndexStrategy, &5).unwrap();
        let query = QueryMessage {
            relin_key: engine.relin_key_to_bytes(&rk),
            selection: selection.iter().map(|ct| engine.ciphertext_to_bytes(ct)).collect(),
        };

        let response = ResponseMessage::from_bytes(&server.respond(&query.to_bytes()).unwrap()).unwrap();
        let ct = engine.ciphertext_from_bytes(&response.ciphertext).unwrap();

        assert_eq!(engine.decrypt(&sk, &ct).unwrap(), 5);
    }

    #[test]
    fn malformed_query_is_rejected() {
        let params = HypercubeParams::new(2, 3, Q).unwrap();
        let server = Server::setup_index(ClearEngine::new(Q), params).unwrap();

        let short_query = QueryMessage {
            relin_key: vec![],
            selection: vec![],
        };

        assert!(matches!(server.respond(&[3, 1, 2]), Err(HypercubePIRError::DeserializationError(_))));
        assert_eq!(
            server.respond(&short_query.to_bytes()),
            Err(HypercubePIRError::InvalidSelectionLength { expected: 6, found: 0 })
        );
    }
}
