//! Server-sent event framing with close-once semantics.
//!
//! Frames are `event: <name>\ndata: <json>\n\n`. The writer feeds a bounded
//! channel whose receiver becomes the response body stream. Once closed,
//! whether explicitly or because the client went away, every further send is
//! a no-op returning `false`.

use bytes::Bytes;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub struct SseWriter {
    tx: mpsc::Sender<Bytes>,
    closed: AtomicBool,
}

impl SseWriter {
    /// Create a writer and the body stream it feeds.
    pub fn channel(
        buffer: usize,
    ) -> (
        Self,
        impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
    ) {
        let (tx, mut rx) = mpsc::channel::<Bytes>(buffer);
        let stream = async_stream::stream! {
            while let Some(chunk) = rx.recv().await {
                yield Ok::<Bytes, Infallible>(chunk);
            }
        };
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            stream,
        )
    }

    /// Frame and send one event. Returns `false` when the stream is closed;
    /// the caller keeps running but writes become sinks.
    pub async fn send<T: Serialize>(&self, event: &str, data: &T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let json = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(_) => return false,
        };
        let frame = Bytes::from(format!("event: {event}\ndata: {json}\n\n"));
        if self.tx.send(frame).await.is_err() {
            self.closed.store(true, Ordering::Release);
            return false;
        }
        true
    }

    /// Close the stream. Exactly the first call has an effect.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn frames_follow_sse_format() {
        let (writer, stream) = SseWriter::channel(8);
        assert!(writer.send("delta", &json!({"text": "hi"})).await);
        drop(writer);

        let frames: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(frames.len(), 1);
        let text = String::from_utf8(frames[0].to_vec()).unwrap();
        assert_eq!(text, "event: delta\ndata: {\"text\":\"hi\"}\n\n");
    }

    #[tokio::test]
    async fn sends_after_close_are_noops() {
        let (writer, stream) = SseWriter::channel(8);
        assert!(writer.send("meta", &json!({})).await);
        writer.close();
        assert!(!writer.send("delta", &json!({"text": "late"})).await);
        assert!(writer.is_closed());
        drop(writer);

        let frames: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_marks_closed() {
        let (writer, stream) = SseWriter::channel(1);
        drop(stream);
        assert!(!writer.send("delta", &json!({})).await);
        assert!(writer.is_closed());
    }
}
