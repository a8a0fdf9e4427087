//! Scripted WebSocket server for channel tests.
//!
//! Every accepted connection is driven by a [`Behavior`] chosen from its
//! zero-based index, so a test can script "drop the first connection, keep
//! the second" style scenarios. All inbound frames are recorded.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// What the server does with one connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Record inbound frames and never reply
    Silent,
    /// Send these frames right after the handshake, then stay silent
    Greet(Vec<Message>),
    /// Send a close frame with this code right after the handshake
    Close(u16),
    /// Drop the TCP stream without a close frame
    Drop,
    /// Record inbound frames for a while, then close with `code`
    CloseAfter { after: Duration, code: u16 },
}

/// One recorded inbound frame.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub connection: usize,
    pub message: Message,
}

impl Inbound {
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            Message::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

type BehaviorFn = Arc<dyn Fn(usize) -> Behavior + Send + Sync>;

pub struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Inbound>>>,
    requests: Arc<Mutex<Vec<String>>>,
    push: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Start a server using the same behavior for every connection.
    pub async fn start(behavior: Behavior) -> Self {
        Self::start_with(move |_| behavior.clone()).await
    }

    /// Start a server choosing a behavior per connection index.
    pub async fn start_with<F>(behavior: F) -> Self
    where
        F: Fn(usize) -> Behavior + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let push = Arc::new(Mutex::new(None));
        let behavior: BehaviorFn = Arc::new(behavior);

        let handle = {
            let connections = connections.clone();
            let received = received.clone();
            let requests = requests.clone();
            let push = push.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let script = behavior(index);
                    tokio::spawn(handle_connection(
                        stream,
                        index,
                        script,
                        received.clone(),
                        requests.clone(),
                        push.clone(),
                    ));
                }
            })
        };

        Self {
            addr,
            connections,
            received,
            requests,
            push,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Request URIs (path and query) in handshake order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn received(&self) -> Vec<Inbound> {
        self.received.lock().clone()
    }

    pub fn received_texts(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|inbound| inbound.text().map(str::to_string))
            .collect()
    }

    /// Send a frame on the most recently accepted connection.
    pub fn push(&self, message: Message) -> bool {
        match self.push.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Poll the recorded frames until `predicate` holds or `timeout` passes.
    pub async fn wait_for<P>(&self, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&[Inbound]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.received.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.connection_count() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    behavior: Behavior,
    received: Arc<Mutex<Vec<Inbound>>>,
    requests: Arc<Mutex<Vec<String>>>,
    push: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let record_request = requests.clone();
    let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        record_request.lock().push(request.uri().to_string());
        Ok(response)
    };
    let ws = match accept_hdr_async(stream, record).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Mock handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let behavior_close = match &behavior {
        Behavior::CloseAfter { after, code } => Some((*after, *code)),
        _ => None,
    };

    match behavior {
        Behavior::Drop => return,
        Behavior::Close(code) => {
            let _ = write.send(close_frame(code)).await;
            // Let the client read the frame before the stream goes away.
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
        Behavior::Greet(frames) => {
            for frame in frames {
                if write.send(frame).await.is_err() {
                    return;
                }
            }
        }
        Behavior::Silent | Behavior::CloseAfter { .. } => {}
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    *push.lock() = Some(tx);

    let close_at = match behavior_close {
        Some((after, _)) => tokio::time::Instant::now() + after,
        None => tokio::time::Instant::now() + Duration::from_secs(3600),
    };

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(close_at), if behavior_close.is_some() => {
                if let Some((_, code)) = behavior_close {
                    let _ = write.send(close_frame(code)).await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                break;
            }
            Some(outbound) = rx.recv() => {
                if write.send(outbound).await.is_err() {
                    break;
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(message)) => received.lock().push(Inbound { connection: index, message }),
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

fn close_frame(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "scripted close".into(),
    }))
}
