use super::{
    branch_opt_util,
    channel::{DhKeypair, SessionKeys},
    error::HypercubePIRError,
    keyword::KeywordKeys,
    messages::{DHPublicValue, HMACTaggedEnvelope, WireMessage},
    params::{PRF_KEY_BYTE_LEN, RetrievalMode},
    transport::FramedStream,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncRead, AsyncWrite};

/// Handshake progress. Keyword key distribution only happens on the server side, in keyword mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    DhSent,
    DhReceived,
    KeyDerived,
    KeysDistributed,
    Established,
}

/// Authenticated and encrypted message exchange over a framed stream.
///
/// Both peers send their Diffie-Hellman public value first, then read the other's, so neither waits on
/// the other before writing. Once established, every message travels inside an [`HMACTaggedEnvelope`].
pub struct SecureSession<S> {
    framed: FramedStream<S>,
    state: SessionState,
    keypair: Option<DhKeypair>,
    peer_public_value: Option<Vec<u8>>,
    keys: Option<SessionKeys>,
    rng: ChaCha8Rng,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureSession<S> {
    pub fn new(stream: S) -> SecureSession<S> {
        SecureSession {
            framed: FramedStream::new(stream),
            state: SessionState::Init,
            keypair: None,
            peer_public_value: None,
            keys: None,
            rng: ChaCha8Rng::from_os_rng(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<(), HypercubePIRError> {
        if branch_opt_util::likely(self.state == expected) {
            Ok(())
        } else {
            Err(HypercubePIRError::HandshakeOutOfOrder(operation))
        }
    }

    /// Generates an ephemeral keypair and sends its public value.
    pub async fn send_dh_public_value(&mut self) -> Result<(), HypercubePIRError> {
        self.expect_state(SessionState::Init, "send_dh_public_value")?;

        let keypair = DhKeypair::generate(&mut self.rng);
        let msg = DHPublicValue {
            public_value: keypair.public_value().to_vec(),
        };
        self.framed.send(&msg.to_bytes()).await?;

        self.keypair = Some(keypair);
        self.state = SessionState::DhSent;
        Ok(())
    }

    pub async fn receive_dh_public_value(&mut self) -> Result<(), HypercubePIRError> {
        self.expect_state(SessionState::DhSent, "receive_dh_public_value")?;

        let frame = self.framed.read().await?;
        let msg = DHPublicValue::from_bytes(&frame)?;

        self.peer_public_value = Some(msg.public_value);
        self.state = SessionState::DhReceived;
        Ok(())
    }

    /// Computes the shared secret and derives the session keys. The ephemeral secret is dropped afterwards.
    pub fn derive_keys(&mut self) -> Result<(), HypercubePIRError> {
        self.expect_state(SessionState::DhReceived, "derive_keys")?;

        let (Some(keypair), Some(peer)) = (self.keypair.take(), self.peer_public_value.take()) else {
            return Err(HypercubePIRError::HandshakeOutOfOrder("derive_keys"));
        };

        let mut shared_secret = keypair.shared_secret(&peer)?;
        let keys = SessionKeys::derive(&shared_secret);
        zeroize::Zeroize::zeroize(&mut shared_secret);

        self.keys = Some(keys?);
        self.state = SessionState::KeyDerived;
        Ok(())
    }

    /// Sends the three keyword keys, each as a raw key inside a `DHPublicValue`, sealed like any other message.
    pub async fn distribute_keyword_keys(&mut self, keyword_keys: &KeywordKeys) -> Result<(), HypercubePIRError> {
        self.expect_state(SessionState::KeyDerived, "distribute_keyword_keys")?;

        for key in [&keyword_keys.partition_key, &keyword_keys.row_key, &keyword_keys.aux_key] {
            let msg = DHPublicValue { public_value: key.to_vec() };
            self.seal_and_send(&msg).await?;
        }

        self.state = SessionState::KeysDistributed;
        Ok(())
    }

    pub async fn receive_keyword_keys(&mut self) -> Result<KeywordKeys, HypercubePIRError> {
        self.expect_state(SessionState::KeyDerived, "receive_keyword_keys")?;

        let mut keys = KeywordKeys {
            partition_key: [0u8; PRF_KEY_BYTE_LEN],
            row_key: [0u8; PRF_KEY_BYTE_LEN],
            aux_key: [0u8; PRF_KEY_BYTE_LEN],
        };

        for slot in [&mut keys.partition_key, &mut keys.row_key, &mut keys.aux_key] {
            let msg = self.receive_and_open::<DHPublicValue>().await?;
            if branch_opt_util::unlikely(msg.public_value.len() != PRF_KEY_BYTE_LEN) {
                return Err(HypercubePIRError::DeserializationError(format!(
                    "keyword key must be {}B, found {}B",
                    PRF_KEY_BYTE_LEN,
                    msg.public_value.len()
                )));
            }
            slot.copy_from_slice(&msg.public_value);
        }

        Ok(keys)
    }

    pub fn establish(&mut self) -> Result<(), HypercubePIRError> {
        match self.state {
            SessionState::KeyDerived | SessionState::KeysDistributed => {
                self.state = SessionState::Established;
                Ok(())
            }
            _ => Err(HypercubePIRError::HandshakeOutOfOrder("establish")),
        }
    }

    /// Client side handshake. In keyword mode also returns the keys distributed by the server.
    ///
    /// An index mode server sends no keys, so a keyword mode client blocks here until that server closes
    /// the connection.
    pub async fn handshake_as_client(&mut self, mode: RetrievalMode) -> Result<Option<KeywordKeys>, HypercubePIRError> {
        self.send_dh_public_value().await?;
        self.receive_dh_public_value().await?;
        self.derive_keys()?;

        let keyword_keys = match mode {
            RetrievalMode::Index => None,
            RetrievalMode::Keyword => Some(self.receive_keyword_keys().await?),
        };

        self.establish()?;
        tracing::debug!(?mode, "client session established");

        Ok(keyword_keys)
    }

    /// Server side handshake. `keyword_keys` are distributed when present.
    pub async fn handshake_as_server(&mut self, keyword_keys: Option<&KeywordKeys>) -> Result<(), HypercubePIRError> {
        self.send_dh_public_value().await?;
        self.receive_dh_public_value().await?;
        self.derive_keys()?;

        if let Some(keys) = keyword_keys {
            self.distribute_keyword_keys(keys).await?;
        }

        self.establish()?;
        tracing::debug!(keyword = keyword_keys.is_some(), "server session established");

        Ok(())
    }

    pub async fn send<M: WireMessage>(&mut self, msg: &M) -> Result<(), HypercubePIRError> {
        self.expect_state(SessionState::Established, "send")?;
        self.seal_and_send(msg).await
    }

    pub async fn receive<M: WireMessage>(&mut self) -> Result<M, HypercubePIRError> {
        self.expect_state(SessionState::Established, "receive")?;
        self.receive_and_open().await
    }

    /// Like [`SecureSession::receive`], but `None` if the peer closed the connection between messages.
    pub async fn receive_or_eof<M: WireMessage>(&mut self) -> Result<Option<M>, HypercubePIRError> {
        self.expect_state(SessionState::Established, "receive")?;

        match self.framed.read_or_eof().await? {
            Some(frame) => self.open(&frame).map(Some),
            None => Ok(None),
        }
    }

    async fn seal_and_send<M: WireMessage>(&mut self, msg: &M) -> Result<(), HypercubePIRError> {
        let keys = self.keys.as_ref().ok_or(HypercubePIRError::HandshakeOutOfOrder("send"))?;
        let envelope = keys.authenticated_encrypt(&msg.to_bytes(), &mut self.rng)?;

        self.framed.send(&envelope.to_bytes()).await
    }

    async fn receive_and_open<M: WireMessage>(&mut self) -> Result<M, HypercubePIRError> {
        let frame = self.framed.read().await?;
        self.open(&frame)
    }

    fn open<M: WireMessage>(&self, frame: &[u8]) -> Result<M, HypercubePIRError> {
        let keys = self.keys.as_ref().ok_or(HypercubePIRError::HandshakeOutOfOrder("receive"))?;

        let envelope = HMACTaggedEnvelope::from_bytes(frame)?;
        let plaintext = keys.verify_and_decrypt(&envelope).inspect_err(|_| {
            tracing::warn!(payload_len = envelope.payload.len(), "discarding message with invalid MAC");
        })?;

        M::from_bytes(&plaintext)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::messages::{QueryMessage, ResponseMessage};
    use tokio::io::duplex;

    async fn established_pair(keyword_keys: Option<KeywordKeys>) -> (SecureSession<tokio::io::DuplexStream>, SecureSession<tokio::io::DuplexStream>, Option<KeywordKeys>) {
        let (a, b) = duplex(1 << 16);
        let mut client = SecureSession::new(a);
        let mut server = SecureSession::new(b);

        let mode = if keyword_keys.is_some() { RetrievalMode::Keyword } else { RetrievalMode::Index };
        let server_task = tokio::spawn(async move {
            server.handshake_as_server(keyword_keys.as_ref()).await.unwrap();
            server
        });

        let received = client.handshake_as_client(mode).await.unwrap();
        let server = server_task.await.unwrap();

        (client, server, received)
    }

    #[tokio::test]
    async fn handshake_establishes_both_peers() {
        let (client, server, received) = established_pair(None).await;

        assert_eq!(client.state(), SessionState::Established);
        assert_eq!(server.state(), SessionState::Established);
        assert!(received.is_none());
        assert!(client.keys == server.keys);
    }

    #[tokio::test]
    async fn keyword_keys_reach_the_client() {
        let mut rng = ChaCha8Rng::from_os_rng();
        let keys = KeywordKeys::random(&mut rng);

        let (_, _, received) = established_pair(Some(keys.clone())).await;
        assert!(received.unwrap() == keys);
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (mut client, mut server, _) = established_pair(None).await;

        let query = QueryMessage {
            relin_key: vec![1, 2, 3],
            selection: vec![vec![4; 100], vec![], vec![5; 7]],
        };
        client.send(&query).await.unwrap();
        assert_eq!(server.receive::<QueryMessage>().await.unwrap(), query);

        let response = ResponseMessage { ciphertext: vec![9; 4096] };
        server.send(&response).await.unwrap();
        assert_eq!(client.receive::<ResponseMessage>().await.unwrap(), response);

        drop(client);
        assert_eq!(server.receive_or_eof::<QueryMessage>().await.unwrap(), None);
    }

    #[tokio::test]
    async fn operations_out_of_order_are_rejected() {
        let (a, _b) = duplex(1024);
        let mut session = SecureSession::new(a);

        assert_eq!(session.derive_keys(), Err(HypercubePIRError::HandshakeOutOfOrder("derive_keys")));
        assert_eq!(session.establish(), Err(HypercubePIRError::HandshakeOutOfOrder("establish")));
        assert!(matches!(
            session.send(&ResponseMessage { ciphertext: vec![] }).await,
            Err(HypercubePIRError::HandshakeOutOfOrder("send"))
        ));
        assert!(matches!(session.receive_dh_public_value().await, Err(HypercubePIRError::HandshakeOutOfOrder(_))));
    }

    #[tokio::test]
    async fn tampered_frame_is_discarded_with_authentication_failure() {
        let (mut client, mut server, _) = established_pair(None).await;

        let query = QueryMessage {
            relin_key: vec![],
            selection: vec![vec![1, 2, 3]],
        };
        let envelope = client.keys.as_ref().unwrap().authenticated_encrypt(&query.to_bytes(), &mut client.rng).unwrap();

        for i in 0..envelope.payload.len() {
            let mut tampered = envelope.clone();
            tampered.payload[i] ^= 0x01;

            client.framed.send(&tampered.to_bytes()).await.unwrap();
            assert_eq!(server.receive::<QueryMessage>().await, Err(HypercubePIRError::AuthenticationFailure));
        }

        client.framed.send(&envelope.to_bytes()).await.unwrap();
        assert_eq!(server.receive::<QueryMessage>().await.unwrap(), query);
    }

    #[tokio::test]
    async fn plaintext_message_after_handshake_is_rejected() {
        let (mut client, mut server, _) = established_pair(None).await;

        let raw = ResponseMessage { ciphertext: vec![1] };
        client.framed.send(&raw.to_bytes()).await.unwrap();

        assert!(matches!(
            server.receive::<ResponseMessage>().await,
            Err(HypercubePIRError::UnexpectedMessage { found: 4, .. })
        ));
    }
}
