//! Single-consumer inbound queue with a dispatch table
//!
//! Producers (the connection reader, async side tasks) post envelopes into a
//! bounded crossbeam channel. One consumer drains it and invokes the handler
//! registered for each envelope's `type`, one message at a time and in
//! receipt order, so handlers own their state without locks.

use std::future::Future;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use hashbrown::HashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::net::protocol::{DecodeError, Envelope};

/// Handler invoked with the envelope payload
pub type Handler<S> = Box<dyn FnMut(&mut S, Value) -> Result<(), DispatchError> + Send>;

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No handler registered for {0}")]
    UnknownType(String),
    #[error("Handler already registered for {0}")]
    DuplicateHandler(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Handler for {kind} failed: {reason}")]
    Handler { kind: String, reason: String },
    #[error("Inbound queue is full")]
    QueueFull,
    #[error("Inbound queue closed")]
    Disconnected,
}

/// Clonable producer handle
#[derive(Clone, Debug)]
pub struct QueueSender {
    sender: Sender<Envelope>,
}

impl QueueSender {
    /// Post an envelope without blocking
    pub fn post(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.sender.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Disconnected(_) => DispatchError::Disconnected,
        })
    }

    /// Post from a plain thread, blocking while the queue is full
    pub fn post_blocking(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.sender
            .send(envelope)
            .map_err(|_| DispatchError::Disconnected)
    }

    /// Post from async code, waiting for space instead of dropping the
    /// envelope. A full queue parks the send on the blocking pool until the
    /// consumer takes one. Errors only when the consumer is gone.
    pub async fn post_async(&self, envelope: Envelope) -> Result<(), DispatchError> {
        let envelope = match self.sender.try_send(envelope) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Disconnected(_)) => return Err(DispatchError::Disconnected),
            Err(TrySendError::Full(envelope)) => envelope,
        };

        let sender = self.sender.clone();
        tokio::task::spawn_blocking(move || sender.send(envelope))
            .await
            .map_err(|_| DispatchError::Disconnected)?
            .map_err(|_| DispatchError::Disconnected)
    }

    /// Run an I/O-bound unit on the runtime and post its result back as a
    /// regular `kind` message. The unit never touches consumer state.
    pub fn spawn_task<F>(
        &self,
        handle: &tokio::runtime::Handle,
        kind: impl Into<String>,
        task: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let sender = self.clone();
        let kind = kind.into();
        handle.spawn(async move {
            match task.await {
                Ok(data) => {
                    if let Err(e) = sender.post_async(Envelope::new(kind.clone(), data)).await {
                        debug!(kind = %kind, "Dropping task result: {}", e);
                    }
                }
                Err(e) => warn!(kind = %kind, "Background task failed: {:#}", e),
            }
        })
    }
}

/// Consumer side: dispatch table plus the receiving end of the queue
pub struct Dispatcher<S> {
    handlers: HashMap<String, Handler<S>>,
    receiver: Receiver<Envelope>,
    capacity: usize,
    dispatched: u64,
}

impl<S> Dispatcher<S> {
    /// Create a dispatcher and the producer handle for its queue
    pub fn new(capacity: usize) -> (Self, QueueSender) {
        let (sender, receiver) = bounded(capacity);
        let dispatcher = Self {
            handlers: HashMap::new(),
            receiver,
            capacity,
            dispatched: 0,
        };
        (dispatcher, QueueSender { sender })
    }

    /// Register the single handler for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        F: FnMut(&mut S, Value) -> Result<(), DispatchError> + Send + 'static,
    {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(DispatchError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Invoke the handler for one envelope
    pub fn dispatch(&mut self, state: &mut S, envelope: Envelope) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .get_mut(&envelope.kind)
            .ok_or_else(|| DispatchError::UnknownType(envelope.kind.clone()))?;
        self.dispatched += 1;
        handler(state, envelope.data)
    }

    /// Dispatch one envelope, logging instead of propagating failures
    fn dispatch_logged(&mut self, state: &mut S, envelope: Envelope) {
        let kind = envelope.kind.clone();
        match self.dispatch(state, envelope) {
            Ok(()) => {}
            Err(DispatchError::UnknownType(kind)) => debug!(kind = %kind, "Ignoring unhandled message"),
            Err(e) => warn!(kind = %kind, "Dropping message: {}", e),
        }
    }

    /// Dispatch everything currently queued. Returns how many envelopes
    /// were taken off the queue.
    pub fn dispatch_pending(&mut self, state: &mut S) -> usize {
        let pending: Vec<Envelope> = self.receiver.try_iter().collect();
        let count = pending.len();
        for envelope in pending {
            self.dispatch_logged(state, envelope);
        }
        count
    }

    /// Block the current thread dispatching until every producer handle
    /// has been dropped
    pub fn run_blocking(&mut self, state: &mut S) {
        while let Ok(envelope) = self.receiver.recv() {
            self.dispatch_logged(state, envelope);
        }
        debug!(dispatched = self.dispatched, "Inbound queue closed");
    }

    /// Wait up to `timeout` for one envelope and dispatch it. Returns false
    /// once the queue is closed.
    pub fn dispatch_next(&mut self, state: &mut S, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(envelope) => {
                self.dispatch_logged(state, envelope);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes handed to a handler so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Log {
        seen: Vec<String>,
    }

    fn dispatcher(capacity: usize) -> (Dispatcher<Log>, QueueSender) {
        let (mut dispatcher, sender) = Dispatcher::new(capacity);
        dispatcher
            .register("a", |log: &mut Log, data| {
                log.seen.push(format!("a:{}", data));
                Ok(())
            })
            .unwrap();
        dispatcher
            .register("b", |log: &mut Log, data| {
                log.seen.push(format!("b:{}", data));
                Ok(())
            })
            .unwrap();
        (dispatcher, sender)
    }

    #[test]
    fn test_dispatch_in_receipt_order() {
        let (mut dispatcher, sender) = dispatcher(16);
        sender.post(Envelope::new("a", json!(1))).unwrap();
        sender.post(Envelope::new("b", json!(2))).unwrap();
        sender.post(Envelope::new("a", json!(3))).unwrap();

        let mut log = Log::default();
        assert_eq!(dispatcher.dispatch_pending(&mut log), 3);
        assert_eq!(log.seen, vec!["a:1", "b:2", "a:3"]);
        assert_eq!(dispatcher.dispatched(), 3);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (mut dispatcher, _sender) = dispatcher(4);
        let err = dispatcher.register("a", |_: &mut Log, _| Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateHandler(kind) if kind == "a"));
    }

    #[test]
    fn test_unknown_type_skipped() {
        let (mut dispatcher, sender) = dispatcher(4);
        sender.post(Envelope::new("zzz", Value::Null)).unwrap();
        sender.post(Envelope::new("a", json!("x"))).unwrap();

        let mut log = Log::default();
        assert_eq!(dispatcher.dispatch_pending(&mut log), 2);
        assert_eq!(log.seen, vec![r#"a:"x""#]);
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[test]
    fn test_unknown_type_error_from_dispatch() {
        let (mut dispatcher, _sender) = dispatcher(4);
        let mut log = Log::default();
        let err = dispatcher
            .dispatch(&mut log, Envelope::new("zzz", Value::Null))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownType(_)));
    }

    #[test]
    fn test_handler_error_does_not_stop_loop() {
        let (mut dispatcher, sender) = Dispatcher::new(8);
        dispatcher
            .register("fail", |_: &mut Log, _| {
                Err(DispatchError::Handler {
                    kind: "fail".to_string(),
                    reason: "boom".to_string(),
                })
            })
            .unwrap();
        dispatcher
            .register("ok", |log: &mut Log, _| {
                log.seen.push("ok".to_string());
                Ok(())
            })
            .unwrap();

        sender.post(Envelope::new("fail", Value::Null)).unwrap();
        sender.post(Envelope::new("ok", Value::Null)).unwrap();

        let mut log = Log::default();
        dispatcher.dispatch_pending(&mut log);
        assert_eq!(log.seen, vec!["ok"]);
    }

    #[test]
    fn test_backpressure() {
        let (dispatcher, sender) = dispatcher(2);
        assert!(sender.post(Envelope::new("a", Value::Null)).is_ok());
        assert!(sender.post(Envelope::new("a", Value::Null)).is_ok());
        assert!(matches!(
            sender.post(Envelope::new("a", Value::Null)),
            Err(DispatchError::QueueFull)
        ));
        assert_eq!(dispatcher.pending_count(), 2);
        assert_eq!(dispatcher.capacity(), 2);
    }

    #[test]
    fn test_post_blocking_from_thread() {
        let (mut dispatcher, sender) = dispatcher(1);
        let producer = std::thread::spawn(move || {
            for i in 0..3 {
                sender.post_blocking(Envelope::new("b", json!(i))).unwrap();
            }
        });

        let mut log = Log::default();
        while log.seen.len() < 3 {
            dispatcher.dispatch_next(&mut log, Duration::from_millis(50));
        }
        producer.join().unwrap();
        assert_eq!(log.seen, vec!["b:0", "b:1", "b:2"]);
    }

    #[test]
    fn test_post_after_consumer_dropped() {
        let (dispatcher, sender) = dispatcher(2);
        drop(dispatcher);
        assert!(matches!(
            sender.post(Envelope::new("a", Value::Null)),
            Err(DispatchError::Disconnected)
        ));
        assert!(matches!(
            sender.post_blocking(Envelope::new("a", Value::Null)),
            Err(DispatchError::Disconnected)
        ));
    }

    #[test]
    fn test_run_blocking_until_senders_dropped() {
        let (mut dispatcher, sender) = dispatcher(16);
        let producer = std::thread::spawn(move || {
            for i in 0..5 {
                sender.post(Envelope::new("a", json!(i))).unwrap();
            }
        });
        producer.join().unwrap();

        let mut log = Log::default();
        dispatcher.run_blocking(&mut log);
        assert_eq!(log.seen.len(), 5);
        assert_eq!(log.seen[4], "a:4");
    }

    #[test]
    fn test_dispatch_next_reports_closed() {
        let (mut dispatcher, sender) = dispatcher(4);
        sender.post(Envelope::new("b", json!(true))).unwrap();
        drop(sender);

        let mut log = Log::default();
        assert!(dispatcher.dispatch_next(&mut log, Duration::from_millis(10)));
        assert!(!dispatcher.dispatch_next(&mut log, Duration::from_millis(10)));
        assert_eq!(log.seen, vec!["b:true"]);
    }

    #[tokio::test]
    async fn test_spawn_task_posts_result() {
        let (mut dispatcher, sender) = dispatcher(4);
        let handle = tokio::runtime::Handle::current();

        sender
            .spawn_task(&handle, "b", async { Ok(json!({"replay": 1})) })
            .await
            .unwrap();

        let mut log = Log::default();
        dispatcher.dispatch_pending(&mut log);
        assert_eq!(log.seen, vec![r#"b:{"replay":1}"#]);
    }

    #[tokio::test]
    async fn test_spawn_task_failure_posts_nothing() {
        let (mut dispatcher, sender) = dispatcher(4);
        let handle = tokio::runtime::Handle::current();

        sender
            .spawn_task(&handle, "b", async { Err(anyhow::anyhow!("fetch failed")) })
            .await
            .unwrap();

        let mut log = Log::default();
        assert_eq!(dispatcher.dispatch_pending(&mut log), 0);
    }

    #[tokio::test]
    async fn test_post_async_waits_for_space() {
        let (mut dispatcher, sender) = dispatcher(1);
        sender.post(Envelope::new("a", json!(1))).unwrap();

        let waiting = tokio::spawn({
            let sender = sender.clone();
            async move { sender.post_async(Envelope::new("a", json!(2))).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut log = Log::default();
        dispatcher.dispatch_pending(&mut log);

        waiting.await.unwrap().unwrap();
        dispatcher.dispatch_pending(&mut log);
        assert_eq!(log.seen, vec!["a:1", "a:2"]);
    }

    #[tokio::test]
    async fn test_post_async_on_full_queue_fails_when_consumer_dropped() {
        let (dispatcher, sender) = dispatcher(1);
        sender.post(Envelope::new("a", json!(1))).unwrap();

        let waiting = tokio::spawn({
            let sender = sender.clone();
            async move { sender.post_async(Envelope::new("a", json!(2))).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());
        drop(dispatcher);

        assert!(matches!(
            waiting.await.unwrap(),
            Err(DispatchError::Disconnected)
        ));
    }
}
