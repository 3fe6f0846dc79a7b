//! The single inbound dispatch path.
//!
//! Messages are handled strictly one at a time in arrival order. A message
//! tied to a connection (a request or `ping`) is only handled while that
//! connection is live, and its handling is abandoned the moment the
//! connection drops: the in-flight future is dropped, which cancels any
//! `wait` and releases any pending gesture callback, and no response is sent.
//! Goal notifications are applied regardless of which connection carried
//! them. Responses are addressed to the generation of their request, so one
//! finishing just as the connection is replaced is dropped by the channel
//! rather than sent on the new connection.

use droidclaw_channel::{ChannelStatus, InboundEnvelope, OutboundSink};
use droidclaw_types::InboundMessage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::router::CommandRouter;

/// Whether `message` only makes sense on the connection that delivered it.
fn is_connection_bound(message: &InboundMessage) -> bool {
    message.expects_response() || matches!(message, InboundMessage::Ping)
}

/// Drain `inbound` through `router` until the channel closes it.
pub async fn run<S: OutboundSink>(
    router: &CommandRouter<S>,
    mut inbound: mpsc::UnboundedReceiver<InboundEnvelope>,
    status: watch::Receiver<ChannelStatus>,
) {
    while let Some(InboundEnvelope {
        generation,
        message,
    }) = inbound.recv().await
    {
        if !is_connection_bound(&message) {
            router.handle(generation, message).await;
            continue;
        }

        if !status.borrow().is_live(generation) {
            debug!(
                generation,
                kind = message.kind(),
                "discarding request from a previous connection"
            );
            continue;
        }

        let kind = message.kind().to_string();
        let mut watcher = status.clone();
        tokio::select! {
            biased;
            _ = router.handle(generation, message) => {}
            _ = watcher.wait_for(|s| !s.is_live(generation)) => {
                warn!(generation, kind = %kind, "connection dropped mid-dispatch, request abandoned");
            }
        }
    }
    info!("inbound queue closed, dispatch stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use droidclaw_channel::{ChannelError, ConnectionState};
    use droidclaw_device::{GestureScript, RecordingBackend};
    use droidclaw_types::{ExecutorConfig, GoalStatus, OutboundMessage};

    use super::*;
    use crate::binding::BackendBinding;

    /// Accepts only messages addressed to the generation the status shows
    /// live, like the real channel.
    struct Captured {
        status: watch::Receiver<ChannelStatus>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl OutboundSink for Captured {
        fn send(&self, generation: u64, message: OutboundMessage) -> Result<(), ChannelError> {
            if !self.status.borrow().is_live(generation) {
                return Err(ChannelError::NotConnected);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Harness {
        sink: Arc<Captured>,
        backend: RecordingBackend,
        inbound: mpsc::UnboundedSender<InboundEnvelope>,
        status: watch::Sender<ChannelStatus>,
        router: Arc<CommandRouter<Arc<Captured>>>,
        task: tokio::task::JoinHandle<()>,
    }

    fn live(generation: u64) -> ChannelStatus {
        ChannelStatus {
            state: ConnectionState::Connected,
            generation,
        }
    }

    fn harness(backend: RecordingBackend) -> Harness {
        let (status, status_rx) = watch::channel(live(1));
        let sink = Arc::new(Captured {
            status: status_rx.clone(),
            sent: Mutex::new(Vec::new()),
        });
        let binding = BackendBinding::new();
        binding.bind(Arc::new(backend.clone()));
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&sink),
            binding,
            ExecutorConfig::default(),
        ));
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let task = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { run(&router, inbound_rx, status_rx).await })
        };
        Harness {
            sink,
            backend,
            inbound,
            status,
            router,
            task,
        }
    }

    fn envelope(generation: u64, json: &str) -> InboundEnvelope {
        InboundEnvelope {
            generation,
            message: InboundMessage::decode(json).unwrap(),
        }
    }

    async fn finish(h: Harness) -> (Vec<OutboundMessage>, Arc<CommandRouter<Arc<Captured>>>) {
        drop(h.inbound);
        tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap();
        let sent = h.sink.sent.lock().unwrap().clone();
        (sent, h.router)
    }

    #[tokio::test]
    async fn responses_follow_arrival_order() {
        let h = harness(RecordingBackend::new());
        for json in [
            r#"{"type":"wait","requestId":"w","duration":20}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"home","requestId":"h"}"#,
        ] {
            h.inbound.send(envelope(1, json)).unwrap();
        }
        let (sent, _) = finish(h).await;
        let ids: Vec<Option<&str>> = sent.iter().map(|m| m.request_id()).collect();
        assert_eq!(ids, vec![Some("w"), None, Some("h")]);
    }

    #[tokio::test]
    async fn stale_requests_are_skipped_but_notifications_apply() {
        let h = harness(RecordingBackend::new());
        h.status.send_replace(live(2));
        h.inbound
            .send(envelope(1, r#"{"type":"back","requestId":"old"}"#))
            .unwrap();
        h.inbound
            .send(envelope(1, r#"{"type":"goal_started","goal":"g"}"#))
            .unwrap();
        h.inbound
            .send(envelope(2, r#"{"type":"back","requestId":"new"}"#))
            .unwrap();

        let backend = h.backend.clone();
        let (sent, router) = finish(h).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request_id(), Some("new"));
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(router.session().status, GoalStatus::Running);
    }

    #[tokio::test]
    async fn response_finishing_after_reconnect_is_not_sent() {
        let h = harness(RecordingBackend::new());
        h.status.send_replace(live(2));
        h.router.handle(1, InboundMessage::Ping).await;
        h.router.handle(2, InboundMessage::Ping).await;

        let (sent, _) = finish(h).await;
        assert_eq!(sent, vec![OutboundMessage::Pong]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_abandons_wait() {
        let h = harness(RecordingBackend::new());
        h.inbound
            .send(envelope(1, r#"{"type":"wait","requestId":"w","duration":60000}"#))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.status.send_replace(ChannelStatus {
            state: ConnectionState::Disconnected,
            generation: 1,
        });
        let (sent, _) = finish(h).await;
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn disconnect_releases_pending_gesture() {
        let h = harness(RecordingBackend::new().with_gestures(GestureScript::Hold));
        h.inbound
            .send(envelope(1, r#"{"type":"swipe","requestId":"s","x1":0,"y1":0,"x2":0,"y2":500}"#))
            .unwrap();
        while h.backend.dispatched_gestures().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.backend.abandoned_gestures(), 0);

        h.status.send_replace(ChannelStatus {
            state: ConnectionState::Connecting,
            generation: 1,
        });
        let backend = h.backend.clone();
        let (sent, _) = finish(h).await;
        assert!(sent.is_empty());
        assert_eq!(backend.abandoned_gestures(), 1);
    }
}
