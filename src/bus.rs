//! In-process message bus: request envelopes in, replies and events out.

use crate::dispatch::Dispatcher;
use crate::error::{MongoError, Result};
use crate::event::Event;
use crate::request::{Reply, Request};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Queue depth for pending envelopes.
const BUS_CAPACITY: usize = 256;

/// A request plus the slot its reply goes to, if the caller wants one.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: Option<oneshot::Sender<Result<Reply>>>,
}

impl Envelope {
    /// An envelope whose reply is delivered to the returned receiver.
    pub fn with_reply(request: Request) -> (Self, oneshot::Receiver<Result<Reply>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// A fire-and-forget envelope.
    pub fn without_reply(request: Request) -> Self {
        Self {
            request,
            reply: None,
        }
    }
}

/// Handle to a running bus.
#[derive(Clone)]
pub struct Bus {
    sender: mpsc::Sender<Envelope>,
    events: broadcast::Sender<Event>,
}

impl Bus {
    /// Start serving `dispatcher` and return the handle plus the serve task.
    ///
    /// The serve loop ends once every `Bus` clone is dropped.
    pub fn start(dispatcher: Dispatcher) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(BUS_CAPACITY);
        let events = dispatcher.manager().event_sender();
        let task = tokio::spawn(serve(Arc::new(dispatcher), receiver));
        (Self { sender, events }, task)
    }

    /// Submit an envelope as-is.
    pub async fn submit(&self, envelope: Envelope) -> Result<()> {
        self.sender
            .send(envelope)
            .await
            .map_err(|_| MongoError::Internal("bus closed".to_string()))
    }

    /// Send a request and wait for its reply.
    pub async fn call(&self, request: Request) -> Result<Reply> {
        let (envelope, reply) = Envelope::with_reply(request);
        self.submit(envelope).await?;
        reply
            .await
            .map_err(|_| MongoError::Internal("reply dropped".to_string()))?
    }

    /// Send a request without waiting for the outcome.
    pub async fn send(&self, request: Request) -> Result<()> {
        self.submit(Envelope::without_reply(request)).await
    }

    /// Decode a positional-JSON call, run it and encode the reply.
    pub async fn call_raw(&self, method: &str, args: Vec<JsonValue>) -> Result<JsonValue> {
        let request = Request::from_call(method, args)?;
        let reply = self.call(request).await?;
        Ok(reply.to_json())
    }

    /// Subscribe to lifecycle and change events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

async fn serve(dispatcher: Arc<Dispatcher>, mut receiver: mpsc::Receiver<Envelope>) {
    while let Some(Envelope { request, reply }) = receiver.recv().await {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(request).await;
            if let Some(reply) = reply {
                // the caller may have stopped waiting
                let _ = reply.send(result);
            }
        });
    }
    tracing::debug!("bus closed");
}

/// Encode an error for a JSON reply.
pub fn error_to_json(err: &MongoError) -> JsonValue {
    serde_json::json!({
        "kind": format!("{:?}", err.kind()),
        "message": err.to_string(),
        "code": err.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_reply() {
        let (envelope, _rx) = Envelope::with_reply(Request::Watch {
            namespace: "app.users".to_string(),
        });
        assert!(envelope.reply.is_some());
        assert!(Envelope::without_reply(envelope.request).reply.is_none());
    }

    #[test]
    fn test_error_to_json() {
        let json = error_to_json(&MongoError::write(Some(11000), "duplicate key"));
        assert_eq!(json["kind"], "Write");
        assert_eq!(json["code"], 11000);
        assert_eq!(json["message"], "write error: duplicate key");

        let json = error_to_json(&MongoError::NotReady);
        assert_eq!(json["message"], "client not ready");
        assert!(json["code"].is_null());
    }
}
