use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use super::decode::AbiDecoder;
use super::types::AbiDef;
use crate::errors::DecodeError;

struct DecodeRequest {
    type_name: String,
    data: Vec<u8>,
    reply: oneshot::Sender<Result<Value, DecodeError>>,
}

/// Fixed-size pool of isolated decode workers.
///
/// Each worker loads the ABI once and services single-shot requests.
/// Workers share nothing mutable with the main flow; all communication
/// is request/reply message passing.
pub struct DeserializerPool {
    workers: Vec<mpsc::Sender<DecodeRequest>>,
    next: AtomicUsize,
}

impl DeserializerPool {
    pub fn spawn(tag: &str, abi: Arc<AbiDef>, size: usize) -> Self {
        assert!(size > 0, "deserializer pool needs at least one worker");
        // Probe the fast backend once; workers share the outcome.
        let decoder = Arc::new(AbiDecoder::new(abi));
        tracing::debug!(
            "[{tag}] deserializer pool of {size} worker(s), fast backend: {}",
            decoder.is_fast()
        );

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let (tx, mut rx) = mpsc::channel::<DecodeRequest>(8);
            let decoder = decoder.clone();
            let tag = tag.to_owned();
            tokio::spawn(async move {
                tracing::trace!("[{tag}] deserializer worker {n} up");
                while let Some(req) = rx.recv().await {
                    let result = if req.type_name == "table_delta[]" {
                        decoder.decode_deltas(&req.data)
                    } else {
                        decoder.decode(&req.type_name, &req.data)
                    };
                    // Requester may have gone away on shutdown.
                    let _ = req.reply.send(result);
                }
            });
            workers.push(tx);
        }

        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    /// Decode `data` as `type_name` on one of the pool's workers.
    pub async fn decode(&self, type_name: &str, data: Vec<u8>) -> Result<Value, DecodeError> {
        let (reply, rx) = oneshot::channel();
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index]
            .send(DecodeRequest {
                type_name: type_name.to_owned(),
                data,
                reply,
            })
            .await
            .map_err(|_| DecodeError::WorkerGone)?;
        rx.await.map_err(|_| DecodeError::WorkerGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_pool_round_trip() {
        let pool = DeserializerPool::spawn("test", Arc::new(AbiDef::default()), 2);
        let mut data = vec![0x02];
        data.extend(7u32.to_le_bytes());
        data.extend(9u32.to_le_bytes());
        let value = pool.decode("uint32[]", data).await.unwrap();
        assert_eq!(value, json!([7, 9]));
    }

    #[tokio::test]
    async fn test_pool_reports_decode_errors() {
        let pool = DeserializerPool::spawn("test", Arc::new(AbiDef::default()), 1);
        let result = pool.decode("uint32", vec![0x01]).await;
        assert!(matches!(result, Err(DecodeError::Eof(_))));
    }
}
