//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use droidclaw_agent::{dispatch, BackendBinding, CommandRouter};
use droidclaw_channel::{ChannelSettings, ReliableChannel};
use droidclaw_device::RecordingBackend;
use droidclaw_types::{ExecutorConfig, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A local control server the agent connects to.
pub struct ControlServer {
    listener: TcpListener,
    pub url: String,
}

impl ControlServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind local listener");
        let url = format!("ws://{}/ws/device", listener.local_addr().unwrap());
        Self { listener, url }
    }

    /// Accept the agent's next connection.
    pub async fn accept(&self) -> DeviceConnection {
        let (tcp, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("agent should connect")
            .expect("accept should succeed");
        let ws = tokio_tungstenite::accept_async(tcp)
            .await
            .expect("handshake should succeed");
        DeviceConnection { ws }
    }
}

/// Server side of one agent connection.
pub struct DeviceConnection {
    ws: WebSocketStream<TcpStream>,
}

impl DeviceConnection {
    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send should succeed");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send should succeed");
    }

    /// Next JSON frame from the agent, skipping control frames.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("agent should respond")
                .expect("connection should stay open")
                .expect("frame should be valid");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("agent sends JSON");
            }
        }
    }

    /// Assert the agent sends no data frame within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
                Ok(Some(Ok(_))) => continue,
                Ok(other) => panic!("connection ended: {other:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A running agent: channel, router, and dispatch loop.
pub struct Agent {
    pub channel: ReliableChannel,
    pub router: Arc<CommandRouter<ReliableChannel>>,
    pub binding: BackendBinding,
    dispatch: JoinHandle<()>,
}

impl Agent {
    /// Start an agent against `url` with `backend` bound (if any).
    pub fn start(url: &str, backend: Option<RecordingBackend>) -> Self {
        let settings = ChannelSettings {
            url: url.parse().expect("valid url"),
            token: None,
            keepalive: Duration::from_secs(30),
            outbound_capacity: 16,
            reconnect: ReconnectConfig {
                initial_delay_ms: 10,
                max_delay_ms: 100,
                jitter: 0.0,
            },
            tls: None,
        };
        let binding = BackendBinding::new();
        if let Some(backend) = backend {
            binding.bind(Arc::new(backend));
        }

        let (channel, inbound, _supervisor) = ReliableChannel::spawn(settings);
        let router = Arc::new(CommandRouter::new(
            channel.clone(),
            binding.clone(),
            ExecutorConfig::default(),
        ));
        let dispatch = {
            let router = Arc::clone(&router);
            let status = channel.subscribe_status();
            tokio::spawn(async move { dispatch::run(&router, inbound, status).await })
        };

        Self {
            channel,
            router,
            binding,
            dispatch,
        }
    }

    /// Wait until connection `generation` is live.
    pub async fn wait_live(&self, generation: u64) {
        let mut status = self.channel.subscribe_status();
        tokio::time::timeout(WAIT, status.wait_for(|s| s.is_live(generation)))
            .await
            .expect("agent should connect")
            .expect("channel should be running");
    }

    pub fn stop(self) {
        self.channel.shutdown();
        self.dispatch.abort();
    }
}
