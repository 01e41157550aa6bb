//! `BodyStream`: a bounded producer/consumer queue of byte frames carrying
//! absolute offsets and a terminal flag (spec §4.7).

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{S3ClientError, TransportErrorKind};

/// One frame of a `BodyStream`.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub bytes: Bytes,
    pub absolute_offset: u64,
    pub is_last: bool,
}

/// Producer half: pushes are backpressured by the channel's bounded
/// capacity (the "high-water mark" of spec §4.7).
pub struct BodyStreamProducer {
    tx: mpsc::Sender<StreamFrame>,
    next_offset: u64,
    terminated: bool,
}

/// Consumer half: an ordered, async sequence of frames.
pub struct BodyStreamConsumer {
    rx: mpsc::Receiver<StreamFrame>,
}

/// Construct a producer/consumer pair bounded by `high_water_mark` frames.
pub fn channel(high_water_mark: usize) -> (BodyStreamProducer, BodyStreamConsumer) {
    let (tx, rx) = mpsc::channel(high_water_mark.max(1));
    (
        BodyStreamProducer {
            tx,
            next_offset: 0,
            terminated: false,
        },
        BodyStreamConsumer { rx },
    )
}

impl BodyStreamProducer {
    /// Push one frame at the current cursor, advancing it by `bytes.len()`.
    /// Blocks (async) until the consumer has room, or returns
    /// `S3ClientError::Aborted` if the consumer has gone away.
    pub async fn push(&mut self, bytes: Bytes, is_last: bool) -> Result<(), S3ClientError> {
        if self.terminated {
            return Ok(());
        }
        let offset = self.next_offset;
        self.next_offset += bytes.len() as u64;
        self.terminated = is_last;
        self.tx
            .send(StreamFrame {
                bytes,
                absolute_offset: offset,
                is_last,
            })
            .await
            .map_err(|_| {
                S3ClientError::transport(TransportErrorKind::OperationCancelled, "consumer closed")
            })
    }

    /// Push the terminal (possibly empty) frame exactly once.
    pub async fn finish(&mut self) -> Result<(), S3ClientError> {
        if self.terminated {
            return Ok(());
        }
        self.push(Bytes::new(), true).await
    }
}

impl BodyStreamConsumer {
    /// Receive the next frame, or `None` once the producer has dropped
    /// without sending a terminal frame.
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_push_order_and_offsets() {
        let (mut tx, mut rx) = channel(4);
        tx.push(Bytes::from_static(b"abc"), false).await.unwrap();
        tx.push(Bytes::from_static(b"de"), false).await.unwrap();
        tx.finish().await.unwrap();

        let f1 = rx.recv().await.unwrap();
        assert_eq!(f1.absolute_offset, 0);
        assert!(!f1.is_last);
        let f2 = rx.recv().await.unwrap();
        assert_eq!(f2.absolute_offset, 3);
        let f3 = rx.recv().await.unwrap();
        assert!(f3.is_last);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn terminal_frame_pushed_exactly_once() {
        let (mut tx, _rx) = channel(4);
        tx.finish().await.unwrap();
        tx.finish().await.unwrap();
    }
}
