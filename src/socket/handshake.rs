//! Client side of the Noise XX handshake over a WebSocket.

use futures::{Sink, SinkExt, Stream, StreamExt};
use prost::Message as _;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::auth::AuthenticationCreds;
use crate::config::SocketConfig;
use crate::crypto::{KeyPair, NoiseState, TransportCipher};
use crate::logger::Logger;
use crate::proto::{
    make_login_payload, make_registration_payload, ClientFinish, ClientHello, HandshakeMessage,
};
use crate::socket::{FrameCodec, SocketError, NOISE_WA_HEADER};

/// Result of a finished handshake.
pub(crate) struct Established {
    pub write: TransportCipher,
    pub read: TransportCipher,
    /// A registration payload was sent instead of a login payload.
    pub is_new_login: bool,
}

pub(crate) async fn write_frame<W>(
    sink: &mut W,
    codec: &mut FrameCodec,
    payload: &[u8],
) -> Result<(), SocketError>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let frame = codec.encode(payload)?;
    sink.send(Message::Binary(frame.into()))
        .await
        .map_err(|e| SocketError::Connection(e.to_string()))
}

/// Read WebSocket messages until the codec yields a whole frame.
pub(crate) async fn read_frame<R>(
    stream: &mut R,
    codec: &mut FrameCodec,
) -> Result<Vec<u8>, SocketError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        if let Some(frame) = codec.next_frame() {
            return Ok(frame);
        }
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => codec.push(&data),
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("{}: {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by peer".to_string());
                return Err(SocketError::Closed(reason));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SocketError::Connection(e.to_string())),
            None => return Err(SocketError::Closed("stream ended".to_string())),
        }
    }
}

fn to_key(bytes: &[u8], what: &str) -> Result<[u8; 32], SocketError> {
    bytes
        .try_into()
        .map_err(|_| SocketError::Handshake(format!("{what} is {} bytes, expected 32", bytes.len())))
}

/// Run `-> e`, `<- e, ee, s, es`, `-> s, se` and derive the transport ciphers.
///
/// The server certificate is decrypted, which authenticates it against the
/// handshake hash, but its chain is not checked.
pub(crate) async fn perform<T>(
    ws: &mut T,
    codec: &mut FrameCodec,
    creds: &AuthenticationCreds,
    config: &SocketConfig,
    logger: &Logger,
) -> Result<Established, SocketError>
where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (payload, is_new_login) = if creds.is_logged_in() {
        let payload = make_login_payload(creds, config)
            .map_err(|e| SocketError::Handshake(e.to_string()))?;
        logger.debug(format_args!("logging in as existing device"));
        (payload, false)
    } else {
        logger.debug(format_args!("not logged in, sending registration payload"));
        (make_registration_payload(creds, config), true)
    };

    let ephemeral = KeyPair::generate();
    let mut noise = NoiseState::new(&NOISE_WA_HEADER);
    noise.authenticate(&ephemeral.public);

    let hello = HandshakeMessage {
        client_hello: Some(ClientHello {
            ephemeral: Some(ephemeral.public.to_vec()),
        }),
        ..Default::default()
    };
    write_frame(ws, codec, &hello.encode_to_vec()).await?;
    logger.trace(format_args!("sent client hello"));

    let reply = read_frame(ws, codec).await?;
    let server_hello = HandshakeMessage::decode(reply.as_slice())
        .map_err(|e| SocketError::Handshake(format!("undecodable server hello: {e}")))?
        .server_hello
        .ok_or_else(|| SocketError::Handshake("reply carries no server hello".to_string()))?;

    let server_ephemeral = to_key(
        server_hello.ephemeral.as_deref().unwrap_or_default(),
        "server ephemeral key",
    )?;
    let static_ct = server_hello
        .r#static
        .ok_or_else(|| SocketError::Handshake("server hello has no static key".to_string()))?;
    let cert_ct = server_hello
        .payload
        .ok_or_else(|| SocketError::Handshake("server hello has no certificate".to_string()))?;

    noise.authenticate(&server_ephemeral);
    noise.mix_shared_secret(&ephemeral.private, &server_ephemeral)?;
    let server_static = to_key(&noise.decrypt(&static_ct)?, "server static key")?;
    noise.mix_shared_secret(&ephemeral.private, &server_static)?;
    let cert = noise.decrypt(&cert_ct)?;
    logger.debug(format_args!(
        "received server hello, certificate bytes={}",
        cert.len()
    ));

    let key_enc = noise.encrypt(&creds.noise_key.public)?;
    noise.mix_shared_secret(&creds.noise_key.private, &server_ephemeral)?;
    let payload_enc = noise.encrypt(&payload.encode_to_vec())?;

    let finish = HandshakeMessage {
        client_finish: Some(ClientFinish {
            r#static: Some(key_enc),
            payload: Some(payload_enc),
        }),
        ..Default::default()
    };
    write_frame(ws, codec, &finish.encode_to_vec()).await?;

    let (write, read) = noise.finish()?;
    Ok(Established {
        write,
        read,
        is_new_login,
    })
}
