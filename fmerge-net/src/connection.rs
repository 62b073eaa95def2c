//! The session connection
//!
//! Wraps the TCP stream in a writer protected by a transmit mutex and a
//! reader task that decodes frames and dispatches every message to its own
//! handler task. Dispatch concurrency is bounded; when the pool is full the
//! reader waits before pulling more data off the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use fmerge_proto::{Message, MessageHeader, MsgType, HEADER_LEN};

use crate::errors::{NetError, Result};

/// Maximum number of concurrently running message handler tasks.
pub const MAX_DISPATCH_WORKERS: usize = 32;

/// Receives decoded messages and the disconnect notification.
///
/// Handlers run concurrently: a long-running `handle_message` does not stop
/// the reader from dispatching further messages, which is what allows both
/// peers to serve requests while awaiting transfers of their own.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle_message(&self, message: Message);
    async fn handle_disconnect(&self);
}

/// One end of a session socket.
pub struct Connection {
    writer: Mutex<OwnedWriteHalf>,
    reader: StdMutex<Option<OwnedReadHalf>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    dispatch_slots: Arc<Semaphore>,
    disconnected: Arc<AtomicBool>,
    peer_addr: String,
    debug_protocol: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, debug_protocol: bool) -> Arc<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let (read_half, write_half) = stream.into_split();

        Arc::new(Self {
            writer: Mutex::new(write_half),
            reader: StdMutex::new(Some(read_half)),
            reader_task: StdMutex::new(None),
            dispatch_slots: Arc::new(Semaphore::new(MAX_DISPATCH_WORKERS)),
            disconnected: Arc::new(AtomicBool::new(false)),
            peer_addr,
            debug_protocol,
        })
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Spawn the reader task. Must be called exactly once per connection.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn MessageHandler>) {
        let read_half = self
            .reader
            .lock()
            .expect("reader mutex poisoned")
            .take()
            .expect("connection already started");

        let conn = Arc::clone(self);
        let task = tokio::spawn(async move {
            conn.reader_loop(read_half, handler).await;
        });
        *self.reader_task.lock().expect("reader task mutex poisoned") = Some(task);
    }

    /// Send one message. Header and payload are emitted under the transmit
    /// lock, so concurrent senders never interleave on the wire.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(NetError::ConnectionTerminated);
        }

        let frame = message.encode_frame();
        let mut writer = self.writer.lock().await;
        if self.debug_protocol {
            debug!("[peer <- local] {}", message.msg_type());
        }
        writer.write_all(&frame).await.map_err(|err| {
            if self.disconnected.load(Ordering::SeqCst) {
                NetError::ConnectionTerminated
            } else {
                NetError::Io(err)
            }
        })?;
        Ok(())
    }

    /// Signal teardown: further reads and writes fail with
    /// `ConnectionTerminated` and the reader task is interrupted.
    pub async fn shutdown(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        if let Some(task) = self.reader_task.lock().expect("reader task mutex poisoned").take() {
            task.abort();
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn reader_loop(self: Arc<Self>, mut read_half: OwnedReadHalf, handler: Arc<dyn MessageHandler>) {
        loop {
            match self.read_frame(&mut read_half).await {
                Ok(Some(message)) => self.dispatch(message, &handler).await,
                // Skipped frame (unknown type or undecodable payload).
                Ok(None) => continue,
                Err(NetError::ConnectionTerminated) => {
                    debug!("Peer {} disconnected", self.peer_addr);
                    self.disconnected.store(true, Ordering::SeqCst);
                    handler.handle_disconnect().await;
                    return;
                }
                Err(err) => {
                    error!("Connection to {} failed: {}", self.peer_addr, err);
                    self.disconnected.store(true, Ordering::SeqCst);
                    handler.handle_disconnect().await;
                    return;
                }
            }
        }
    }

    /// Read one frame. Returns `Ok(None)` for messages that must be skipped
    /// without ending the session (unknown type, malformed payload).
    async fn read_frame(&self, read_half: &mut OwnedReadHalf) -> Result<Option<Message>> {
        let mut header_buf = [0u8; HEADER_LEN];
        read_exact_or_terminated(read_half, &mut header_buf).await?;
        let header = MessageHeader::decode(&header_buf)?;

        let mut payload = vec![0u8; header.length as usize];
        read_exact_or_terminated(read_half, &mut payload).await?;

        let Some(msg_type) = MsgType::from_wire(header.raw_type) else {
            warn!(
                "Skipping message with unknown type {} ({} bytes)",
                header.raw_type, header.length
            );
            return Ok(None);
        };
        if msg_type == MsgType::Unknown {
            warn!("Skipping message with reserved type 0");
            return Ok(None);
        }

        match Message::decode(msg_type, Bytes::from(payload)) {
            Ok(message) => {
                if self.debug_protocol {
                    debug!("[peer -> local] {}", msg_type);
                }
                Ok(Some(message))
            }
            Err(err) => {
                warn!("Skipping malformed {} message: {}", msg_type, err);
                Ok(None)
            }
        }
    }

    async fn dispatch(&self, message: Message, handler: &Arc<dyn MessageHandler>) {
        let permit = match self.dispatch_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Dispatch pool full, waiting for a free worker");
                self.dispatch_slots
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("dispatch semaphore closed")
            }
        };

        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            handler.handle_message(message).await;
            drop(permit);
        });
    }
}

/// `read_exact` with EOF mapped to `ConnectionTerminated`.
async fn read_exact_or_terminated(read_half: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<()> {
    match read_half.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(NetError::ConnectionTerminated)
        }
        Err(err) => Err(NetError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{accept_peer, bind_listener};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Collector {
        received: StdMutex<Vec<Message>>,
        notify: Notify,
        disconnected: AtomicBool,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: StdMutex::new(Vec::new()),
                notify: Notify::new(),
                disconnected: AtomicBool::new(false),
            })
        }

        async fn wait_for(&self, count: usize) -> Vec<Message> {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                {
                    let received = self.received.lock().unwrap();
                    if received.len() >= count {
                        return received.clone();
                    }
                }
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "timed out waiting for messages"
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Collector {
        async fn handle_message(&self, message: Message) {
            self.received.lock().unwrap().push(message);
            self.notify.notify_waiters();
        }

        async fn handle_disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    async fn connected_pair() -> (Arc<Connection>, Arc<Connection>) {
        let listener = bind_listener(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { accept_peer(&listener).await.unwrap().0 });
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let server = accept.await.unwrap();

        (Connection::new(client, false), Connection::new(server, false))
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (a, b) = connected_pair().await;
        let collector = Collector::new();
        b.start(collector.clone() as Arc<dyn MessageHandler>);

        a.send_message(&Message::Version("0.6~;uuid".to_string()))
            .await
            .unwrap();
        a.send_message(&Message::FileRequest("d/f".to_string()))
            .await
            .unwrap();

        let received = collector.wait_for(2).await;
        assert_eq!(received[0], Message::Version("0.6~;uuid".to_string()));
        assert_eq!(received[1], Message::FileRequest("d/f".to_string()));
    }

    #[tokio::test]
    async fn test_bidirectional_concurrent_exchange() {
        // Both sides send while the other is mid-dispatch; nothing deadlocks.
        let (a, b) = connected_pair().await;
        let collector_a = Collector::new();
        let collector_b = Collector::new();
        a.start(collector_a.clone() as Arc<dyn MessageHandler>);
        b.start(collector_b.clone() as Arc<dyn MessageHandler>);

        let a2 = Arc::clone(&a);
        let b2 = Arc::clone(&b);
        let send_a = tokio::spawn(async move {
            for i in 0..20 {
                a2.send_message(&Message::FileRequest(format!("a/{}", i)))
                    .await
                    .unwrap();
            }
        });
        let send_b = tokio::spawn(async move {
            for i in 0..20 {
                b2.send_message(&Message::FileRequest(format!("b/{}", i)))
                    .await
                    .unwrap();
            }
        });
        send_a.await.unwrap();
        send_b.await.unwrap();

        assert_eq!(collector_a.wait_for(20).await.len(), 20);
        assert_eq!(collector_b.wait_for(20).await.len(), 20);
    }

    #[tokio::test]
    async fn test_unknown_message_type_is_skipped() {
        let listener = bind_listener(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { accept_peer(&listener).await.unwrap().0 });
        let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let server = accept.await.unwrap();

        let conn = Connection::new(server, false);
        let collector = Collector::new();
        conn.start(collector.clone() as Arc<dyn MessageHandler>);

        // A frame with an unrecognized type, then a valid message.
        let bogus = MessageHeader::new(99, 3).encode();
        raw.write_all(&bogus).await.unwrap();
        raw.write_all(b"xyz").await.unwrap();
        raw.write_all(&Message::Ignore.encode_frame()).await.unwrap();

        let received = collector.wait_for(1).await;
        assert_eq!(received[0], Message::Ignore);
    }

    #[tokio::test]
    async fn test_peer_close_reports_disconnect() {
        let (a, b) = connected_pair().await;
        let collector = Collector::new();
        b.start(collector.clone() as Arc<dyn MessageHandler>);

        a.shutdown().await;
        drop(a);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !collector.disconnected.load(Ordering::SeqCst) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "disconnect was not reported"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(b
            .send_message(&Message::Ignore)
            .await
            .is_err_and(|e| matches!(e, NetError::ConnectionTerminated | NetError::Io(_))));
    }
}
