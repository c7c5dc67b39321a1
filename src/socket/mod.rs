//! The client socket: configuration, event channel and the WebSocket
//! transport up to the end of the Noise handshake.

mod events;
mod frame;
mod handshake;

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::{AuthenticationCreds, AuthenticationState};
use crate::config::SocketConfig;
use crate::crypto::{CryptoError, TransportCipher};
use crate::logger::Logger;

pub use events::{ConnectionState, ConnectionUpdate, Event};
pub use frame::{FrameCodec, FrameError, MAX_FRAME_LEN, NOISE_WA_HEADER};

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("socket is not connected")]
    NotConnected,
    #[error("socket is already connected")]
    AlreadyConnected,
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("credentials lock poisoned")]
    CredsPoisoned,
}

/// Receiving half of an established connection.
struct Reader {
    stream: SplitStream<WsStream>,
    /// Also holds whatever arrived after the handshake's last frame.
    codec: FrameCodec,
    cipher: TransportCipher,
    /// Flips to `true` when the connection is ended locally.
    ended: watch::Receiver<bool>,
}

/// Sending half of an established connection.
struct Writer {
    sink: SplitSink<WsStream, Message>,
    codec: FrameCodec,
    cipher: TransportCipher,
    ended: watch::Sender<bool>,
}

/// A WhatsApp Web client socket.
///
/// Built by [`make_wa_socket`] without touching the network; call
/// [`WaSocket::connect`] to open the transport. Sending and receiving lock
/// different halves of the connection, so a task parked in
/// [`WaSocket::recv_frame`] does not hold up [`WaSocket::send_frame`] or
/// [`WaSocket::end`].
pub struct WaSocket {
    config: SocketConfig,
    logger: Logger,
    events: broadcast::Sender<Event>,
    // Lock order: reader, then writer.
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
}

pub fn make_wa_socket(config: SocketConfig) -> WaSocket {
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let logger = config.logger.child("socket");
    logger.debug(format_args!(
        "created socket for {} as {} {}",
        config.ws_url,
        config.browser.os,
        config.browser.name
    ));

    WaSocket {
        config,
        logger,
        events,
        reader: Mutex::new(None),
        writer: Mutex::new(None),
    }
}

impl WaSocket {
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthenticationState {
        &self.config.auth
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Open the WebSocket and run the Noise handshake within
    /// `connect_timeout`.
    pub async fn connect(&self) -> Result<(), SocketError> {
        // Checked before waiting on the reader, which a pending receive on a
        // live connection holds.
        if self.is_connected().await {
            return Err(SocketError::AlreadyConnected);
        }
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Err(SocketError::AlreadyConnected);
        }
        self.emit(Event::ConnectionUpdate(ConnectionUpdate::connecting()));

        let result = match timeout(self.config.connect_timeout, self.open()).await {
            Ok(result) => result,
            Err(_) => Err(SocketError::Timeout(self.config.connect_timeout)),
        };

        match result {
            Ok((halves, is_new_login)) => {
                let (read_half, write_half) = halves;
                *reader = Some(read_half);
                *writer = Some(write_half);
                self.logger.info(format_args!("connected to WA"));
                self.emit(Event::ConnectionUpdate(ConnectionUpdate::open(is_new_login)));
                Ok(())
            }
            Err(e) => {
                self.logger.error(format_args!("connection failed: {e}"));
                self.emit(Event::ConnectionUpdate(ConnectionUpdate::close(Some(
                    e.to_string(),
                ))));
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<((Reader, Writer), bool), SocketError> {
        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::Connection(e.to_string()))?;
        let origin = HeaderValue::from_str(&self.config.origin)
            .map_err(|e| SocketError::Connection(format!("invalid origin: {e}")))?;
        request.headers_mut().insert("Origin", origin);

        let (mut ws, _) = connect_async(request)
            .await
            .map_err(|e| SocketError::Connection(e.to_string()))?;
        self.logger
            .debug(format_args!("websocket open to {}", self.config.ws_url));

        let creds = self.creds_snapshot()?;
        let mut codec = FrameCodec::new(&NOISE_WA_HEADER);
        let established =
            handshake::perform(&mut ws, &mut codec, &creds, &self.config, &self.logger).await?;

        let (sink, stream) = ws.split();
        let (ended_tx, ended_rx) = watch::channel(false);
        let reader = Reader {
            stream,
            codec,
            cipher: established.read,
            ended: ended_rx,
        };
        let writer = Writer {
            sink,
            codec: FrameCodec::plain(),
            cipher: established.write,
            ended: ended_tx,
        };
        Ok(((reader, writer), established.is_new_login))
    }

    fn creds_snapshot(&self) -> Result<AuthenticationCreds, SocketError> {
        Ok(self
            .config
            .auth
            .creds
            .read()
            .map_err(|_| SocketError::CredsPoisoned)?
            .clone())
    }

    /// Encrypt and send one frame.
    pub async fn send_frame(&self, data: &[u8]) -> Result<(), SocketError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SocketError::NotConnected)?;
        let encrypted = writer.cipher.encrypt(data)?;
        handshake::write_frame(&mut writer.sink, &mut writer.codec, &encrypted).await
    }

    /// Receive and decrypt one frame.
    ///
    /// Returns [`SocketError::Closed`] when the peer closes the connection or
    /// [`WaSocket::end`] is called while waiting. A close by the peer drops
    /// the connection and emits a close update.
    pub async fn recv_frame(&self) -> Result<Vec<u8>, SocketError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SocketError::NotConnected)?;

        let result = tokio::select! {
            frame = handshake::read_frame(&mut reader.stream, &mut reader.codec) => frame,
            _ = reader.ended.wait_for(|ended| *ended) => {
                Err(SocketError::Closed("connection ended".to_string()))
            }
        };

        match result {
            Ok(frame) => Ok(reader.cipher.decrypt(&frame)?),
            Err(SocketError::Closed(reason)) => {
                let ended_locally = *reader.ended.borrow();
                *guard = None;
                if !ended_locally {
                    self.writer.lock().await.take();
                    self.logger
                        .info(format_args!("connection closed by server: {reason}"));
                    self.emit(Event::ConnectionUpdate(ConnectionUpdate::close(Some(
                        reason.clone(),
                    ))));
                }
                Err(SocketError::Closed(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Close the connection, if any, and emit a close update.
    pub async fn end(&self, reason: Option<String>) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.ended.send(true);
            if let Err(e) = writer.sink.close().await {
                self.logger
                    .debug(format_args!("error while closing websocket: {e}"));
            }
        }
        // A pending receive clears the reader itself once it sees the flag.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        self.logger.info(format_args!(
            "connection ended: {}",
            reason.as_deref().unwrap_or("requested")
        ));
        self.emit(Event::ConnectionUpdate(ConnectionUpdate::close(reason)));
    }

    /// Mutate the shared credentials and announce the change.
    pub fn creds_update<F>(&self, update: F) -> Result<(), SocketError>
    where
        F: FnOnce(&mut AuthenticationCreds),
    {
        {
            let mut creds = self
                .config
                .auth
                .creds
                .write()
                .map_err(|_| SocketError::CredsPoisoned)?;
            update(&mut creds);
        }
        self.emit(Event::CredsUpdate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{init_auth_creds, Contact, MemoryKeyStore};
    use crate::crypto::{KeyPair, NoiseState};
    use crate::proto::{ClientPayload, HandshakeMessage, ServerHello};
    use prost::Message as _;
    use std::future::Future;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    type ServerWs = WebSocketStream<TcpStream>;

    /// Server side of an established connection.
    struct ServerSession {
        ws: ServerWs,
        reader: FrameCodec,
        writer: FrameCodec,
        read: TransportCipher,
        write: TransportCipher,
    }

    impl ServerSession {
        async fn send(&mut self, data: &[u8]) {
            let frame = self.writer.encode(&self.write.encrypt(data).unwrap()).unwrap();
            self.ws.send(Message::Binary(frame.into())).await.unwrap();
        }

        async fn recv(&mut self) -> Vec<u8> {
            loop {
                if let Some(frame) = self.reader.next_frame() {
                    return self.read.decrypt(&frame).unwrap();
                }
                let data = read_binary(&mut self.ws).await;
                self.reader.push(&data);
            }
        }

        /// Wait until the client closes the connection.
        async fn drain(mut self) {
            while let Some(Ok(message)) = self.ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        }
    }

    fn config(url: String, creds: AuthenticationCreds) -> SocketConfig {
        let auth = AuthenticationState::new(creds, Arc::new(MemoryKeyStore::new()));
        SocketConfig::new(auth)
            .with_ws_url(url)
            .with_connect_timeout(Duration::from_secs(5))
    }

    async fn serve_once<F, Fut>(handler: F) -> (String, JoinHandle<Fut::Output>)
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(ws).await
        });
        (format!("ws://{addr}"), handle)
    }

    async fn read_binary(ws: &mut ServerWs) -> Vec<u8> {
        loop {
            if let Message::Binary(data) = ws.next().await.unwrap().unwrap() {
                return data.to_vec();
            }
        }
    }

    /// Plays the server half of the handshake and returns the client payload
    /// it received.
    async fn accept_handshake(mut ws: ServerWs) -> (ServerSession, ClientPayload) {
        let server_ephemeral = KeyPair::generate();
        let server_static = KeyPair::generate();
        let mut reader = FrameCodec::plain();
        let mut writer = FrameCodec::plain();

        let first = read_binary(&mut ws).await;
        assert_eq!(first[..4], NOISE_WA_HEADER);
        reader.push(&first[4..]);
        let hello = HandshakeMessage::decode(reader.next_frame().unwrap().as_slice()).unwrap();
        let client_ephemeral: [u8; 32] = hello
            .client_hello
            .unwrap()
            .ephemeral
            .unwrap()
            .try_into()
            .unwrap();

        let mut noise = NoiseState::new(&NOISE_WA_HEADER);
        noise.authenticate(&client_ephemeral);
        noise.authenticate(&server_ephemeral.public);
        noise
            .mix_shared_secret(&server_ephemeral.private, &client_ephemeral)
            .unwrap();
        let static_ct = noise.encrypt(&server_static.public).unwrap();
        noise
            .mix_shared_secret(&server_static.private, &client_ephemeral)
            .unwrap();
        let cert_ct = noise.encrypt(b"certificate").unwrap();

        let reply = HandshakeMessage {
            server_hello: Some(ServerHello {
                ephemeral: Some(server_ephemeral.public.to_vec()),
                r#static: Some(static_ct),
                payload: Some(cert_ct),
            }),
            ..Default::default()
        };
        let frame = writer.encode(&reply.encode_to_vec()).unwrap();
        ws.send(Message::Binary(frame.into())).await.unwrap();

        reader.push(&read_binary(&mut ws).await);
        let finish = HandshakeMessage::decode(reader.next_frame().unwrap().as_slice())
            .unwrap()
            .client_finish
            .unwrap();
        let client_static: [u8; 32] = noise
            .decrypt(&finish.r#static.unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        noise
            .mix_shared_secret(&server_ephemeral.private, &client_static)
            .unwrap();
        let payload_bytes = noise.decrypt(&finish.payload.unwrap()).unwrap();
        let payload = ClientPayload::decode(payload_bytes.as_slice()).unwrap();

        let (read, write) = noise.finish().unwrap();
        let session = ServerSession {
            ws,
            reader,
            writer,
            read,
            write,
        };
        (session, payload)
    }

    /// Handshake, then one frame each way.
    async fn ping_pong_server(ws: ServerWs) -> ClientPayload {
        let (mut session, payload) = accept_handshake(ws).await;
        session.send(b"ping").await;
        assert_eq!(session.recv().await, b"pong");
        payload
    }

    fn next_update(events: &mut broadcast::Receiver<Event>) -> ConnectionUpdate {
        match events.try_recv().unwrap() {
            Event::ConnectionUpdate(update) => update,
            other => panic!("expected a connection update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn construction_does_not_connect() {
        let socket = make_wa_socket(config("ws://127.0.0.1:9".into(), init_auth_creds()));
        assert!(!socket.is_connected().await);
        assert!(matches!(
            socket.send_frame(b"x").await,
            Err(SocketError::NotConnected)
        ));
        assert!(matches!(
            socket.recv_frame().await,
            Err(SocketError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn new_device_registers_and_exchanges_frames() {
        let (url, server) = serve_once(ping_pong_server).await;
        let creds = init_auth_creds();
        let identity = creds.signed_identity_key.public;
        let socket = make_wa_socket(config(url, creds));
        let mut events = socket.subscribe();

        socket.connect().await.unwrap();
        assert!(socket.is_connected().await);
        assert_eq!(socket.recv_frame().await.unwrap(), b"ping");
        socket.send_frame(b"pong").await.unwrap();

        let payload = server.await.unwrap();
        let pairing = payload.device_pairing_data.unwrap();
        assert_eq!(pairing.e_ident.unwrap(), identity.to_vec());
        assert!(payload.username.is_none());

        assert_eq!(next_update(&mut events), ConnectionUpdate::connecting());
        assert_eq!(next_update(&mut events), ConnectionUpdate::open(true));

        socket.end(None).await;
        assert!(!socket.is_connected().await);
        assert_eq!(next_update(&mut events).connection, ConnectionState::Close);
    }

    #[tokio::test]
    async fn paired_device_sends_login_payload() {
        let (url, server) = serve_once(ping_pong_server).await;
        let mut creds = init_auth_creds();
        creds.me = Some(Contact {
            id: "15551234567:2@s.whatsapp.net".into(),
            ..Default::default()
        });
        let socket = make_wa_socket(config(url, creds));
        let mut events = socket.subscribe();

        socket.connect().await.unwrap();
        assert_eq!(socket.recv_frame().await.unwrap(), b"ping");
        socket.send_frame(b"pong").await.unwrap();

        let payload = server.await.unwrap();
        assert_eq!(payload.username, Some(15551234567));
        assert_eq!(payload.device, Some(2));
        assert!(payload.device_pairing_data.is_none());

        next_update(&mut events);
        assert_eq!(next_update(&mut events), ConnectionUpdate::open(false));
        socket.end(None).await;
    }

    #[tokio::test]
    async fn paired_device_with_bad_jid_does_not_reregister() {
        let (url, server) = serve_once(|mut ws: ServerWs| async move {
            // The client gives up before sending anything.
            let mut binary_frames = 0;
            while let Some(Ok(message)) = ws.next().await {
                if message.is_binary() {
                    binary_frames += 1;
                }
            }
            binary_frames
        })
        .await;
        let mut creds = init_auth_creds();
        creds.me = Some(Contact {
            id: "not-a-number@s.whatsapp.net".into(),
            ..Default::default()
        });
        let socket = make_wa_socket(config(url, creds));
        let mut events = socket.subscribe();

        let err = socket.connect().await.unwrap_err();
        match &err {
            SocketError::Handshake(message) => {
                assert!(message.contains("invalid account jid"), "{message}")
            }
            other => panic!("expected a handshake error, got {other}"),
        }
        assert!(!socket.is_connected().await);
        assert_eq!(server.await.unwrap(), 0);

        next_update(&mut events);
        let closed = next_update(&mut events);
        assert_eq!(closed.connection, ConnectionState::Close);
        assert!(!closed.is_new_login);
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (url, server) = serve_once(ping_pong_server).await;
        let socket = make_wa_socket(config(url, init_auth_creds()));

        socket.connect().await.unwrap();
        assert!(matches!(
            socket.connect().await,
            Err(SocketError::AlreadyConnected)
        ));
        assert_eq!(socket.recv_frame().await.unwrap(), b"ping");
        socket.send_frame(b"pong").await.unwrap();
        server.await.unwrap();
        socket.end(None).await;
    }

    #[tokio::test]
    async fn pending_receive_does_not_block_send_or_end() {
        let (url, server) = serve_once(|ws: ServerWs| async move {
            let (mut session, _) = accept_handshake(ws).await;
            let received = session.recv().await;
            session.drain().await;
            received
        })
        .await;
        let socket = Arc::new(make_wa_socket(config(url, init_auth_creds())));
        let mut events = socket.subscribe();
        socket.connect().await.unwrap();

        let receiver = tokio::spawn({
            let socket = Arc::clone(&socket);
            async move { socket.recv_frame().await }
        });
        // Let the receive park on the silent server.
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(2), socket.send_frame(b"ping"))
            .await
            .expect("send waited on the pending receive")
            .unwrap();
        timeout(Duration::from_secs(2), socket.end(None))
            .await
            .expect("end waited on the pending receive");

        let pending = timeout(Duration::from_secs(2), receiver)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(pending, Err(SocketError::Closed(_))));
        assert!(!socket.is_connected().await);
        assert!(matches!(
            socket.recv_frame().await,
            Err(SocketError::NotConnected)
        ));
        assert_eq!(server.await.unwrap(), b"ping");

        assert_eq!(next_update(&mut events), ConnectionUpdate::connecting());
        assert_eq!(next_update(&mut events), ConnectionUpdate::open(true));
        assert_eq!(next_update(&mut events), ConnectionUpdate::close(None));
        // Ending locally is announced once.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_close_after_handshake_drops_the_connection() {
        let (url, server) = serve_once(|ws: ServerWs| async move {
            let (mut session, _) = accept_handshake(ws).await;
            session.ws.close(None).await.unwrap();
        })
        .await;
        let socket = make_wa_socket(config(url, init_auth_creds()));
        let mut events = socket.subscribe();
        socket.connect().await.unwrap();

        let err = socket.recv_frame().await.unwrap_err();
        assert!(matches!(err, SocketError::Closed(_)), "{err}");
        assert!(!socket.is_connected().await);
        assert!(matches!(
            socket.send_frame(b"late").await,
            Err(SocketError::NotConnected)
        ));
        server.await.unwrap();

        next_update(&mut events);
        next_update(&mut events);
        let closed = next_update(&mut events);
        assert_eq!(closed.connection, ConnectionState::Close);
        assert!(closed.last_disconnect.is_some());
    }

    #[tokio::test]
    async fn refused_connection_emits_close() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let socket = make_wa_socket(config(format!("ws://{addr}"), init_auth_creds()));
        let mut events = socket.subscribe();

        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, SocketError::Connection(_)), "{err}");
        assert_eq!(next_update(&mut events), ConnectionUpdate::connecting());
        let closed = next_update(&mut events);
        assert_eq!(closed.connection, ConnectionState::Close);
        assert!(closed.last_disconnect.is_some());
        assert!(!socket.is_connected().await);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let cfg = config(format!("ws://{addr}"), init_auth_creds())
            .with_connect_timeout(Duration::from_millis(200));
        let socket = make_wa_socket(cfg);

        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, SocketError::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn server_closing_mid_handshake_is_reported() {
        let (url, server) = serve_once(|mut ws: ServerWs| async move {
            read_binary(&mut ws).await;
            ws.close(None).await.unwrap();
        })
        .await;
        let socket = make_wa_socket(config(url, init_auth_creds()));

        let err = socket.connect().await.unwrap_err();
        assert!(matches!(err, SocketError::Closed(_)), "{err}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn creds_update_mutates_and_notifies() {
        let socket = make_wa_socket(config("ws://127.0.0.1:9".into(), init_auth_creds()));
        let mut events = socket.subscribe();

        socket
            .creds_update(|creds| {
                creds.registered = true;
                creds.next_pre_key_id = 42;
            })
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), Event::CredsUpdate);
        let creds = socket.auth().creds.read().unwrap();
        assert!(creds.registered);
        assert_eq!(creds.next_pre_key_id, 42);
    }
}
