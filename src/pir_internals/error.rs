use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HypercubePIRError {
    // Parameters
    #[error("Invalid hypercube parameters: {0}")]
    InvalidParameters(String),

    // Hypercube
    #[error("Index or coordinate out of bounds: '{value}' must be less than '{bound}'")]
    OutOfBounds { value: usize, bound: usize },
    #[error("Coordinate vector must have exactly '{expected}' components, found '{found}'")]
    InvalidCoordinateCount { expected: usize, found: usize },

    // Keyword encoding
    #[error("Can not encode an empty partition")]
    EmptyPartition,
    #[error("Exhausted '{0}' attempts to find an invertible encoding matrix")]
    EncodingFailure(usize),
    #[error("Keyword encoding keys were not distributed for this session")]
    MissingKeywordKeys,

    // Evaluation
    #[error("Homomorphic evaluation failed with: {0}")]
    EvaluationError(String),
    #[error("Expected '{expected}' selection ciphertexts, found '{found}'")]
    InvalidSelectionLength { expected: usize, found: usize },

    // Wire codec
    #[error("Message deserialization failed with: {0}")]
    DeserializationError(String),
    #[error("Expected message of type '{expected}', found tag '{found}'")]
    UnexpectedMessage { expected: &'static str, found: u8 },

    // Secure session
    #[error("MAC verification failed, message discarded")]
    AuthenticationFailure,
    #[error("Session operation '{0}' attempted in wrong handshake state")]
    HandshakeOutOfOrder(&'static str),
    #[error("Peer sent an invalid Diffie-Hellman public value")]
    InvalidPublicValue,
    #[error("Session key derivation failed")]
    KeyDerivationFailure,

    // Transport
    #[error("Network failure: {0}")]
    NetworkFailure(String),
}

impl From<std::io::Error> for HypercubePIRError {
    fn from(e: std::io::Error) -> Self {
        Self::NetworkFailure(e.to_string())
    }
}
