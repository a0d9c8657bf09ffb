use super::{branch_opt_util, error::HypercubePIRError, params::MAX_WIRE_FRAME_BYTE_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Whole message delivery over an ordered byte stream, each frame being a `u32` little-endian length and the bytes.
pub struct FramedStream<S> {
    stream: S,
    max_frame_len: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    pub fn new(stream: S) -> FramedStream<S> {
        FramedStream {
            stream,
            max_frame_len: MAX_WIRE_FRAME_BYTE_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> FramedStream<S> {
        self.max_frame_len = max_frame_len.min(u32::MAX as usize);
        self
    }

    pub async fn send(&mut self, frame: &[u8]) -> Result<(), HypercubePIRError> {
        if branch_opt_util::unlikely(frame.len() > self.max_frame_len) {
            return Err(HypercubePIRError::NetworkFailure(format!(
                "frame of {}B exceeds maximum of {}B",
                frame.len(),
                self.max_frame_len
            )));
        }

        self.stream.write_all(&(frame.len() as u32).to_le_bytes()).await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;

        Ok(())
    }

    pub async fn read(&mut self) -> Result<Vec<u8>, HypercubePIRError> {
        self.read_or_eof()
            .await?
            .ok_or_else(|| HypercubePIRError::NetworkFailure("connection closed by peer".to_string()))
    }

    /// Reads the next frame, or `None` if the peer closed the stream cleanly at a frame boundary.
    pub async fn read_or_eof(&mut self) -> Result<Option<Vec<u8>>, HypercubePIRError> {
        let mut len_buf = [0u8; 4];

        let n = self.stream.read(&mut len_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        self.stream.read_exact(&mut len_buf[n..]).await?;

        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if branch_opt_util::unlikely(frame_len > self.max_frame_len) {
            return Err(HypercubePIRError::NetworkFailure(format!(
                "peer announced frame of {}B, exceeding maximum of {}B",
                frame_len, self.max_frame_len
            )));
        }

        let mut frame = vec![0u8; frame_len];
        self.stream.read_exact(&mut frame).await?;

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frames_are_delivered_whole_and_in_order() {
        let (a, b) = duplex(1024);
        let mut sender = FramedStream::new(a);
        let mut receiver = FramedStream::new(b);

        let frames = vec![vec![], vec![1u8], vec![7u8; 5000], b"hypercube".to_vec()];

        let expected = frames.clone();
        let writer = tokio::spawn(async move {
            for frame in frames.iter() {
                sender.send(frame).await.unwrap();
            }
        });

        for frame in expected {
            assert_eq!(receiver.read().await.unwrap(), frame);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_both_ways() {
        let (a, b) = duplex(1024);
        let mut sender = FramedStream::new(a).with_max_frame_len(8);
        let mut receiver = FramedStream::new(b).with_max_frame_len(4);

        assert!(matches!(sender.send(&[0u8; 9]).await, Err(HypercubePIRError::NetworkFailure(_))));

        sender.send(&[0u8; 8]).await.unwrap();
        assert!(matches!(receiver.read().await, Err(HypercubePIRError::NetworkFailure(_))));
    }

    #[tokio::test]
    async fn truncated_frame_is_a_network_failure() {
        let (mut a, b) = duplex(1024);
        let mut receiver = FramedStream::new(b);

        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);

        assert!(matches!(receiver.read().await, Err(HypercubePIRError::NetworkFailure(_))));
    }

    #[tokio::test]
    async fn clean_close_is_distinguished_from_truncation() {
        let (a, b) = duplex(1024);
        let mut sender = FramedStream::new(a);
        let mut receiver = FramedStream::new(b);

        sender.send(b"last").await.unwrap();
        drop(sender);

        assert_eq!(receiver.read_or_eof().await.unwrap(), Some(b"last".to_vec()));
        assert_eq!(receiver.read_or_eof().await.unwrap(), None);
        assert!(matches!(receiver.read().await, Err(HypercubePIRError::NetworkFailure(_))));
    }
}
