//! Event broadcaster for dashboard stream consumers.
//!
//! Each consumer gets a bounded channel. Broadcasting serializes the frame
//! once and try-sends to every consumer; a full or closed channel means the
//! consumer is evicted rather than backpressured onto the request task.

use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Frames a slow consumer may fall behind before eviction.
const CONSUMER_BUFFER: usize = 256;

pub struct Broadcaster {
    consumers: Mutex<Vec<mpsc::Sender<String>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Attach a new stream consumer. The returned receiver yields serialized
    /// frames until the consumer is evicted or the broadcaster drops.
    pub fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        self.consumers.lock().unwrap().push(tx);
        rx
    }

    /// Serialize once, then try-send to every consumer, evicting any whose
    /// channel is closed or full.
    pub fn broadcast(&self, message: &Value) {
        let frame = message.to_string();
        let mut consumers = self.consumers.lock().unwrap();
        let before = consumers.len();
        consumers.retain(|tx| tx.try_send(frame.clone()).is_ok());
        let evicted = before - consumers.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = consumers.len(), "evicted stream consumers");
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().unwrap().len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_frames() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.broadcast(&json!({"type": "traffic", "n": 1}));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"traffic\""));
    }

    #[tokio::test]
    async fn dropped_consumer_is_evicted() {
        let b = Broadcaster::new();
        let rx = b.subscribe();
        assert_eq!(b.consumer_count(), 1);
        drop(rx);
        b.broadcast(&json!({"type": "traffic"}));
        assert_eq!(b.consumer_count(), 0);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_not_blocked() {
        let b = Broadcaster::new();
        let _rx = b.subscribe();
        // Fill the buffer past capacity without draining; the broadcast that
        // finds the channel full must evict instead of waiting.
        for i in 0..=CONSUMER_BUFFER {
            b.broadcast(&json!({"n": i}));
        }
        assert_eq!(b.consumer_count(), 0);
    }

    #[tokio::test]
    async fn other_consumers_survive_an_eviction() {
        let b = Broadcaster::new();
        let dead = b.subscribe();
        let mut live = b.subscribe();
        drop(dead);
        b.broadcast(&json!({"ok": true}));
        assert_eq!(b.consumer_count(), 1);
        assert!(live.recv().await.unwrap().contains("ok"));
    }
}
