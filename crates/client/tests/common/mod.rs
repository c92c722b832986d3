//! Shared helpers for client integration tests.
//!
//! [`TestServer`] is a local tokio-tungstenite server on `127.0.0.1:0`
//! that hands every accepted socket to the test as a [`ServerConn`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use stagewatch_client::{
    ChannelHandler, ChannelState, CloseCause, ConnectionEvent, ConnectionManager, ManagerConfig,
    ReconnectConfig,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Retry delay used by [`fast_config`].
pub const RETRY: Duration = Duration::from_millis(100);

pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        reconnect: ReconnectConfig::fixed(RETRY),
        connect_timeout: Some(Duration::from_secs(2)),
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct TestServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<ServerConn>,
    task: tokio::task::JoinHandle<()>,
}

enum Command {
    Send(Message),
    Drop,
}

/// Server side of one accepted socket.
pub struct ServerConn {
    /// Request path of the upgrade, e.g. `/api/v1/projects/7/progress`.
    pub path: String,
    commands: mpsc::UnboundedSender<Command>,
    received: mpsc::UnboundedReceiver<Message>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (conn_tx, conns) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let callback =
                        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
                            path = req.uri().path().to_string();
                            Ok(response)
                        };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);

                    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                    let (recv_tx, recv_rx) = mpsc::unbounded_channel();
                    let _ = conn_tx.send(ServerConn {
                        path,
                        commands: cmd_tx,
                        received: recv_rx,
                    });
                    serve_socket(ws, cmd_rx, recv_tx).await;
                });
            }
        });

        Self {
            addr,
            accepted,
            conns,
            task,
        }
    }

    /// REST origin pointing at this server.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of completed WebSocket handshakes so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted socket.
    pub async fn next_conn(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server task ended")
    }

    /// Assert that no socket is accepted within `window`.
    pub async fn expect_no_conn(&mut self, window: Duration) {
        if let Ok(Some(conn)) = tokio::time::timeout(window, self.conns.recv()).await {
            panic!("unexpected connection to {}", conn.path);
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_socket(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    received: mpsc::UnboundedSender<Message>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(msg)) => {
                    if sink.send(msg).await.is_err() {
                        return;
                    }
                }
                // Dropping both halves closes TCP without a close frame.
                Some(Command::Drop) | None => return,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(msg)) => {
                    let _ = received.send(msg);
                }
                Some(Err(_)) | None => return,
            },
        }
    }
}

impl ServerConn {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::Send(Message::Text(text.into())));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    /// Close with a close frame carrying `code`.
    pub fn close_with(&self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.commands.send(Command::Send(Message::Close(Some(frame))));
    }

    /// Start the closing handshake with an empty close frame.
    pub fn close_without_status(&self) {
        let _ = self.commands.send(Command::Send(Message::Close(None)));
    }

    /// Drop the TCP connection without a closing handshake.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Next non-heartbeat message from the client.
    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("socket closed before a message arrived")
    }

    pub async fn next_text(&mut self) -> String {
        match self.next_message().await {
            Message::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Assert the client sends nothing within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(msg)) = tokio::time::timeout(window, self.received.recv()).await {
            panic!("unexpected client message {msg:?}");
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Records every callback it receives.
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<Value>>,
    closes: Mutex<Vec<CloseCause>>,
    opens: AtomicUsize,
    errors: AtomicUsize,
}

impl RecordingHandler {
    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<CloseCause> {
        self.closes.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` messages arrived.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<Value> {
        tokio::time::timeout(WAIT, async {
            loop {
                let messages = self.messages();
                if messages.len() >= count {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for handler messages")
    }
}

impl ChannelHandler for RecordingHandler {
    fn on_message(&self, _job_id: &str, message: Value) {
        self.messages.lock().unwrap().push(message);
    }

    fn on_open(&self, _job_id: &str) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self, _job_id: &str, cause: &CloseCause) {
        self.closes.lock().unwrap().push(cause.clone());
    }

    fn on_error(&self, _job_id: &str, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Wait until the job's channel reaches `target`.
pub async fn wait_for_state(manager: &ConnectionManager, job_id: &str, target: ChannelState) {
    let mut rx = manager
        .watch_state(job_id)
        .await
        .expect("no channel for job");
    tokio::time::timeout(WAIT, rx.wait_for(|state| *state == target))
        .await
        .expect("timed out waiting for channel state")
        .expect("channel state sender dropped");
}

/// Next connection event, skipping none.
pub async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// An address nothing listens on.
pub async fn dead_api_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
