//! Binary wire codec. Every message starts with a one byte type tag, followed by string fields, each of
//! them a `u64` little-endian byte length and the raw bytes. Integers travel as decimal strings.

use super::{branch_opt_util, error::HypercubePIRError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    HMACTaggedWrapper = 1,
    DHPublicValue = 2,
    UserToServerQuery = 3,
    ServerToUserResponse = 4,
}

impl MessageType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HMACTaggedWrapper => "HMACTaggedWrapper",
            Self::DHPublicValue => "DHPublicValue",
            Self::UserToServerQuery => "UserToServerQuery",
            Self::ServerToUserResponse => "ServerToUserResponse",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = HypercubePIRError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::HMACTaggedWrapper),
            2 => Ok(Self::DHPublicValue),
            3 => Ok(Self::UserToServerQuery),
            4 => Ok(Self::ServerToUserResponse),
            _ => Err(HypercubePIRError::DeserializationError(format!("unknown message tag {}", tag))),
        }
    }
}

/// A message with a fixed type tag and a byte representation.
pub trait WireMessage: Sized {
    const TYPE: MessageType;

    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, HypercubePIRError>;
}

/// Type of an encoded message, read from its leading byte.
pub fn peek_type(bytes: &[u8]) -> Result<MessageType, HypercubePIRError> {
    match bytes.first() {
        Some(&tag) => MessageType::try_from(tag),
        None => Err(HypercubePIRError::DeserializationError("empty message".to_string())),
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new(msg_type: MessageType) -> Writer {
        Writer { buf: vec![msg_type as u8] }
    }

    fn string(mut self, bytes: &[u8]) -> Writer {
        self.buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    fn integer(self, value: usize) -> Writer {
        self.string(value.to_string().as_bytes())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], expected: MessageType) -> Result<Reader<'a>, HypercubePIRError> {
        let found = peek_type(bytes)?;
        if branch_opt_util::unlikely(found != expected) {
            return Err(HypercubePIRError::UnexpectedMessage {
                expected: expected.name(),
                found: found as u8,
            });
        }

        Ok(Reader { buf: &bytes[1..] })
    }

    fn string(&mut self) -> Result<&'a [u8], HypercubePIRError> {
        const LEN_BYTE_LEN: usize = std::mem::size_of::<u64>();

        if branch_opt_util::unlikely(self.buf.len() < LEN_BYTE_LEN) {
            return Err(HypercubePIRError::DeserializationError("truncated string length".to_string()));
        }

        let (len_bytes, rest) = self.buf.split_at(LEN_BYTE_LEN);
        let mut word = [0u8; LEN_BYTE_LEN];
        word.copy_from_slice(len_bytes);
        let len = u64::from_le_bytes(word);

        if branch_opt_util::unlikely(len > rest.len() as u64) {
            return Err(HypercubePIRError::DeserializationError(format!(
                "string of length {} exceeds remaining {} bytes",
                len,
                rest.len()
            )));
        }

        let (value, rest) = rest.split_at(len as usize);
        self.buf = rest;

        Ok(value)
    }

    fn integer(&mut self) -> Result<usize, HypercubePIRError> {
        let raw = self.string()?;
        let text = std::str::from_utf8(raw).map_err(|e| HypercubePIRError::DeserializationError(e.to_string()))?;

        // `usize::from_str` accepts a leading '+', plain decimal digits only
        if branch_opt_util::unlikely(text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit())) {
            return Err(HypercubePIRError::DeserializationError(format!("'{}' is not a decimal integer", text)));
        }
        text.parse::<usize>().map_err(|e| HypercubePIRError::DeserializationError(e.to_string()))
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn finish(self) -> Result<(), HypercubePIRError> {
        if branch_opt_util::unlikely(!self.buf.is_empty()) {
            return Err(HypercubePIRError::DeserializationError(format!("{} trailing bytes", self.buf.len())));
        }
        Ok(())
    }
}

/// Post-handshake wrapper of every message, `payload` being AES-CTR encrypted and `mac` authenticating `iv || payload`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HMACTaggedEnvelope {
    pub payload: Vec<u8>,
    pub iv: Vec<u8>,
    pub mac: Vec<u8>,
}

impl WireMessage for HMACTaggedEnvelope {
    const TYPE: MessageType = MessageType::HMACTaggedWrapper;

    fn to_bytes(&self) -> Vec<u8> {
        Writer::new(Self::TYPE).string(&self.payload).string(&self.iv).string(&self.mac).finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, HypercubePIRError> {
        let mut reader = Reader::new(bytes, Self::TYPE)?;

        let payload = reader.string()?.to_vec();
        let iv = reader.string()?.to_vec();
        let mac = reader.string()?.to_vec();
        reader.finish()?;

        Ok(HMACTaggedEnvelope { payload, iv, mac })
    }
}

/// Diffie-Hellman public value. After key derivation the same shape carries raw keyword keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DHPublicValue {
    pub public_value: Vec<u8>,
}

impl WireMessage for DHPublicValue {
    const TYPE: MessageType = MessageType::DHPublicValue;

    fn to_bytes(&self) -> Vec<u8> {
        Writer::new(Self::TYPE).string(&self.public_value).finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, HypercubePIRError> {
        let mut reader = Reader::new(bytes, Self::TYPE)?;

        let public_value = reader.string()?.to_vec();
        reader.finish()?;

        Ok(DHPublicValue { public_value })
    }
}

/// Relinearization key and the ordered selection ciphertexts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryMessage {
    pub relin_key: Vec<u8>,
    pub selection: Vec<Vec<u8>>,
}

impl WireMessage for QueryMessage {
    const TYPE: MessageType = MessageType::UserToServerQuery;

    fn to_bytes(&self) -> Vec<u8> {
        self.selection
            .iter()
            .fold(Writer::new(Self::TYPE).string(&self.relin_key).integer(self.selection.len()), |w, ct| w.string(ct))
            .finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, HypercubePIRError> {
        const MIN_STRING_BYTE_LEN: usize = std::mem::size_of::<u64>();

        let mut reader = Reader::new(bytes, Self::TYPE)?;

        let relin_key = reader.string()?.to_vec();
        let count = reader.integer()?;

        // Each ciphertext takes at least its length prefix, reject counts the buffer can't hold before allocating
        if branch_opt_util::unlikely(count > reader.remaining() / MIN_STRING_BYTE_LEN) {
            return Err(HypercubePIRError::DeserializationError(format!("ciphertext count {} exceeds message size", count)));
        }

        let selection = (0..count).map(|_| reader.string().map(|ct| ct.to_vec())).collect::<Result<Vec<_>, _>>()?;
        reader.finish()?;

        Ok(QueryMessage { relin_key, selection })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMessage {
    pub ciphertext: Vec<u8>,
}

impl WireMessage for ResponseMessage {
    const TYPE: MessageType = MessageType::ServerToUserResponse;

    fn to_bytes(&self) -> Vec<u8> {
        Writer::new(Self::TYPE).string(&self.ciphertext).finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, HypercubePIRError> {
        let mut reader = Reader::new(bytes, Self::TYPE)?;

        let ciphertext = reader.string()?.to_vec();
        reader.finish()?;

        Ok(ResponseMessage { ciphertext })
    }
}
