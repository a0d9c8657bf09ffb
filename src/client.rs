use crate::pir_internals::{
    branch_opt_util,
    engine::HomomorphicEngine,
    error::HypercubePIRError,
    keyword::RowStyle,
    messages::{QueryMessage, ResponseMessage},
    params::{HypercubeParams, RetrievalMode},
    selection::{IndexStrategy, KeywordStrategy, RetrievalStrategy, SelectionBuilder},
    session::SecureSession,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
};

/// Represents a client of the hypercube **P**rivate **I**nformation **R**etrieval scheme.
///
/// A client owns one secure session with the server and a homomorphic key pair. Each retrieval encrypts
/// `d·s` selection weights, sends them along with the relinearization key, and decrypts the single
/// ciphertext the server answers with.
pub struct Client<E: HomomorphicEngine, S> {
    engine: E,
    params: HypercubeParams,
    session: SecureSession<S>,
    secret_key: E::SecretKey,
    relin_key_bytes: Vec<u8>,
    keyword: Option<KeywordStrategy>,
}

impl<E: HomomorphicEngine> Client<E, TcpStream> {
    /// Connects to a PIR server over TCP and runs the handshake, see [`Client::setup`].
    pub async fn connect<A: ToSocketAddrs>(addr: A, engine: E, params: HypercubeParams, mode: RetrievalMode, style: RowStyle) -> Result<Client<E, TcpStream>, HypercubePIRError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Self::setup(stream, engine, params, mode, style).await
    }
}

impl<E: HomomorphicEngine, S: AsyncRead + AsyncWrite + Unpin> Client<E, S> {
    /// Sets up a PIR client over an already connected stream.
    ///
    /// # Arguments
    ///
    /// * `stream`: Ordered byte stream to the server.
    /// * `engine`: Homomorphic engine, its plaintext modulus must match `params`.
    /// * `params`: Hypercube shape, as used by the server.
    /// * `mode`: Must match the server's retrieval mode, keyword keys are only received in keyword mode.
    ///   Nothing is negotiated: a keyword client of an index server waits for keys that never come, and
    ///   setup only returns, with an error, once the server closes the connection. Bound it with a timeout
    ///   when the server's mode isn't known.
    /// * `style`: Pseudorandom row style the server encoded its keyword database with. Ignored in index mode.
    ///
    /// # Returns
    ///
    /// An established client, or an error if the parameters are inconsistent or the handshake fails.
    pub async fn setup(stream: S, engine: E, params: HypercubeParams, mode: RetrievalMode, style: RowStyle) -> Result<Client<E, S>, HypercubePIRError> {
        params.validate()?;
        if branch_opt_util::unlikely(engine.plaintext_modulus() != params.plaintext_modulus) {
            return Err(HypercubePIRError::InvalidParameters(format!(
                "engine plaintext modulus {} differs from hypercube modulus {}",
                engine.plaintext_modulus(),
                params.plaintext_modulus
            )));
        }

        let (secret_key, relin_key) = engine.generate_keys()?;
        let relin_key_bytes = engine.relin_key_to_bytes(&relin_key);

        let mut session = SecureSession::new(stream);
        let keyword = session
            .handshake_as_client(mode)
            .await?
            .map(|keys| KeywordStrategy::new(keys, style));

        Ok(Client {
            engine,
            params,
            session,
            secret_key,
            relin_key_bytes,
            keyword,
        })
    }

    pub fn params(&self) -> &HypercubeParams {
        &self.params
    }

    pub fn mode(&self) -> RetrievalMode {
        if self.keyword.is_some() { RetrievalMode::Keyword } else { RetrievalMode::Index }
    }

    /// Privately retrieves the value stored at linear index `idx`.
    pub async fn retrieve_index(&mut self, idx: usize) -> Result<u64, HypercubePIRError> {
        let query = self.prepare_query(&IndexStrategy, &idx)?;
        self.exchange(&query).await
    }

    /// Privately retrieves the value associated with `keyword`.
    ///
    /// The answer is meaningful only if `keyword` was part of the server's database, otherwise it's some
    /// arbitrary field element.
    pub async fn retrieve_keyword(&mut self, keyword: &[u8]) -> Result<u64, HypercubePIRError> {
        let strategy = self.keyword.as_ref().ok_or(HypercubePIRError::MissingKeywordKeys)?;
        let query = self.prepare_query(strategy, keyword)?;
        self.exchange(&query).await
    }

    /// Builds the encrypted query for `target`, without sending it.
    pub fn prepare_query<R: RetrievalStrategy + ?Sized>(&self, strategy: &R, target: &R::Target) -> Result<QueryMessage, HypercubePIRError> {
        let selection = SelectionBuilder::new(&self.engine, self.params).build(&self.secret_key, strategy, target)?;

        Ok(QueryMessage {
            relin_key: self.relin_key_bytes.clone(),
            selection: selection.iter().map(|ct| self.engine.ciphertext_to_bytes(ct)).collect(),
        })
    }

    /// Decrypts the server's response into the retrieved value.
    pub fn process_response(&self, response: &ResponseMessage) -> Result<u64, HypercubePIRError> {
        let ct = self.engine.ciphertext_from_bytes(&response.ciphertext)?;
        self.engine.decrypt(&self.secret_key, &ct)
    }

    async fn exchange(&mut self, query: &QueryMessage) -> Result<u64, HypercubePIRError> {
        self.session.send(query).await?;
        let response = self.session.receive::<ResponseMessage>().await?;

        self.process_response(&response)
    }
}
