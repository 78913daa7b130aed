//! Per-connection RTSP driver
//!
//! Parses RTSP messages off a (possibly replayed) TCP connection, answers
//! them through the relay router, and carries interleaved RTP in both
//! directions. One session per connection; the session id doubles as the
//! RTSP `Session` header value.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rtsp_types::{headers, Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::proxy::BufferedStream;
use crate::topic::RelayConfig;

use super::router::RelayRouter;
use super::stream::{InterleavedPacket, ServerStream};
use super::udp::UdpTransport;

/// Outbound queue depth per connection
const OUTBOUND_QUEUE: usize = 256;

/// Which port a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publish,
    Subscribe,
}

/// State shared by every connection of one listener
pub(crate) struct ConnShared {
    pub router: Arc<RelayRouter>,
    pub cfg: RelayConfig,
    pub direction: Direction,
    pub udp: Option<Arc<UdpTransport>>,
}

enum Outbound {
    Message(rtsp_types::Message<Vec<u8>>),
    Frame(InterleavedPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Idle,
    Publisher,
    Subscriber,
}

struct SessionState {
    peer: SocketAddr,
    role: Role,
    /// Wire stream this subscriber attached to, for detach on close
    attached: Option<Arc<ServerStream>>,
    transport_udp: bool,
    udp_client: Option<SocketAddr>,
}

/// Drive one RTSP connection to completion
pub(crate) async fn handle_connection(
    conn: BufferedStream<TcpStream>,
    peer: SocketAddr,
    session_id: u64,
    shared: Arc<ConnShared>,
    cancel: CancellationToken,
) {
    tracing::debug!(session_id = session_id, peer = %peer, "connection open");

    let (mut reader, writer) = tokio::io::split(conn);
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_loop(writer, out_rx));

    let mut session = SessionState {
        peer,
        role: Role::Idle,
        attached: None,
        transport_udp: false,
        udp_client: None,
    };
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut open = true;

    'outer: while open {
        // drain every complete message already buffered
        while !buf.is_empty() {
            match rtsp_types::Message::<Vec<u8>>::parse(&buf[..]) {
                Ok((message, consumed)) => {
                    let _ = buf.split_to(consumed);
                    open = handle_message(message, session_id, &shared, &mut session, &out_tx)
                        .await;
                    if !open {
                        break 'outer;
                    }
                }
                Err(rtsp_types::ParseError::Incomplete(_)) => break,
                Err(_) => {
                    tracing::info!(session_id = session_id, "unparseable RTSP message");
                    break 'outer;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    shared.router.on_session_close(session_id).await;
    if let Some(stream) = session.attached.take() {
        stream.detach(session_id);
    }
    if let Some(udp) = &shared.udp {
        udp.unregister_session(session_id);
    }
    drop(writer_task);
    tracing::debug!(session_id = session_id, peer = %peer, "connection closed");
}

async fn write_loop(
    mut writer: WriteHalf<BufferedStream<TcpStream>>,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(out) = rx.recv().await {
        let result = match out {
            Outbound::Message(message) => {
                let mut data = Vec::new();
                if message.write(&mut data).is_err() {
                    continue;
                }
                writer.write_all(&data).await
            }
            Outbound::Frame(frame) => {
                let len = frame.payload.len().min(u16::MAX as usize) as u16;
                let header = [b'$', frame.channel, (len >> 8) as u8, (len & 0xff) as u8];
                match writer.write_all(&header).await {
                    Ok(()) => writer.write_all(&frame.payload[..len as usize]).await,
                    Err(e) => Err(e),
                }
            }
        };
        if result.is_err() {
            break;
        }
    }
}

/// Handle one parsed message; returns whether the connection stays open
async fn handle_message(
    message: rtsp_types::Message<Vec<u8>>,
    session_id: u64,
    shared: &Arc<ConnShared>,
    session: &mut SessionState,
    out_tx: &mpsc::Sender<Outbound>,
) -> bool {
    match message {
        rtsp_types::Message::Request(req) => {
            handle_request(req, session_id, shared, session, out_tx).await
        }
        rtsp_types::Message::Data(data) => {
            if session.role == Role::Publisher {
                let channel = data.channel_id();
                // even channels carry RTP; RTCP on odd channels is not relayed
                if channel % 2 == 0 {
                    let payload = Bytes::from(data.into_body());
                    shared
                        .router
                        .on_packet_rtp(session_id, (channel / 2) as usize, payload)
                        .await;
                }
            }
            true
        }
        rtsp_types::Message::Response(_) => true,
    }
}

async fn handle_request(
    req: rtsp_types::Request<Vec<u8>>,
    session_id: u64,
    shared: &Arc<ConnShared>,
    session: &mut SessionState,
    out_tx: &mpsc::Sender<Outbound>,
) -> bool {
    let version = req.version();
    let method = req.method().clone();
    let cseq = req
        .header(&headers::CSEQ)
        .map(|v| v.as_str().to_string());
    let transport = req
        .header(&headers::TRANSPORT)
        .map(|v| v.as_str().to_string());
    let path = req
        .request_uri()
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    let respond = |status: StatusCode, with_session: bool| {
        let mut builder = rtsp_types::Response::builder(version, status);
        if let Some(cseq) = &cseq {
            builder = builder.header(headers::CSEQ, cseq.clone());
        }
        if with_session {
            builder = builder.header(headers::SESSION, session_id.to_string());
        }
        builder
    };
    let send = |out: Outbound| {
        let tx = out_tx.clone();
        async move {
            let _ = tx.send(out).await;
        }
    };

    match method {
        Method::Options => {
            let resp = respond(StatusCode::Ok, false)
                .header(
                    headers::PUBLIC,
                    "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, TEARDOWN",
                )
                .build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Announce => {
            let sdp = Bytes::from(req.into_body());
            let status = match shared
                .router
                .on_announce(session_id, &path, sdp)
                .await
            {
                Ok(_stream) => {
                    session.role = Role::Publisher;
                    StatusCode::Ok
                }
                Err(status) => status,
            };
            let resp = respond(status, false).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Describe => {
            let resp = match shared.router.stream_for(&path).await {
                Some(stream) => respond(StatusCode::Ok, false)
                    .header(headers::CONTENT_TYPE, "application/sdp")
                    .build(stream.sdp().to_vec()),
                None => respond(StatusCode::NotFound, false).build(Vec::new()),
            };
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Setup => {
            let base = base_path(&path);
            let transport = transport.unwrap_or_default();
            let is_tcp = transport.contains("TCP") || transport.contains("interleaved=");

            // transport checks come first so remote-owner UDP is refused even
            // when the topic is unknown here
            if !is_tcp && (!shared.cfg.enable_udp || !shared.router.udp_allowed(base)) {
                tracing::info!(
                    session_id = session_id,
                    topic = %base,
                    "setup rejected: UDP transport unavailable, advise TCP"
                );
                let resp =
                    respond(StatusCode::UnsupportedTransport, false).build(Vec::new());
                send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
                return true;
            }

            if shared.router.stream_for(base).await.is_none() {
                let resp = respond(StatusCode::NotFound, false).build(Vec::new());
                send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
                return true;
            }

            let resp = if is_tcp {
                let mut echo = transport.clone();
                if !echo.contains("interleaved=") {
                    let track = track_id_from_path(&path);
                    echo = format!("{echo};interleaved={}-{}", track * 2, track * 2 + 1);
                }
                respond(StatusCode::Ok, true)
                    .header(headers::TRANSPORT, echo)
                    .build(Vec::new())
            } else {
                let Some(udp) = &shared.udp else {
                    let resp =
                        respond(StatusCode::UnsupportedTransport, false).build(Vec::new());
                    send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
                    return true;
                };
                let base_port = udp.base_port();
                session.transport_udp = true;

                if let Some(client_port) = parse_client_port(&transport) {
                    let client = SocketAddr::new(session.peer.ip(), client_port);
                    session.udp_client = Some(client);
                    if shared.direction == Direction::Publish {
                        udp.register_source(client, session_id, track_id_from_path(&path));
                    }
                }

                respond(StatusCode::Ok, true)
                    .header(
                        headers::TRANSPORT,
                        format!("{transport};server_port={}-{}", base_port, base_port + 1),
                    )
                    .build(Vec::new())
            };
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Record => {
            let status = shared.router.on_record(session_id);
            let resp = respond(status, status == StatusCode::Ok).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Play => {
            let base = base_path(&path);
            let status = match shared.router.on_play(session_id, base).await {
                Ok(subscriber) => {
                    session.role = Role::Subscriber;

                    if session.transport_udp {
                        if let (Some(udp), Some(client)) = (&shared.udp, session.udp_client) {
                            let cancel = subscriber.cancel_token().clone();
                            udp.spawn_egress(subscriber, client, cancel);
                        }
                    } else if let Some(stream) = shared.router.stream_for(base).await {
                        attach_interleaved(
                            &stream,
                            session_id,
                            shared.cfg.subscriber_queue_size,
                            out_tx.clone(),
                        );
                        session.attached = Some(stream);
                    }
                    StatusCode::Ok
                }
                Err(status) => status,
            };
            let resp = respond(status, status == StatusCode::Ok).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        Method::Teardown => {
            let resp = respond(StatusCode::Ok, true).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            false
        }

        Method::GetParameter | Method::SetParameter => {
            // keepalive
            let resp = respond(StatusCode::Ok, false).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }

        _ => {
            let resp = respond(StatusCode::MethodNotAllowed, false).build(Vec::new());
            send(Outbound::Message(rtsp_types::Message::Response(resp))).await;
            true
        }
    }
}

/// Bridge a wire stream attachment into the connection's outbound queue
fn attach_interleaved(
    stream: &Arc<ServerStream>,
    session_id: u64,
    queue_size: usize,
    out_tx: mpsc::Sender<Outbound>,
) {
    let (frame_tx, mut frame_rx) = mpsc::channel(queue_size.max(1));
    if !stream.attach(session_id, frame_tx) {
        return;
    }
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if out_tx.send(Outbound::Frame(frame)).await.is_err() {
                break;
            }
        }
    });
}

/// First path segment: `/cam1/trackID=0` → `cam1`
fn base_path(path: &str) -> &str {
    let stripped = path.strip_prefix('/').unwrap_or(path);
    stripped.split('/').next().unwrap_or(stripped)
}

/// Track id from a `trackID=N` path component, default 0
fn track_id_from_path(path: &str) -> usize {
    let Some(idx) = path.find("trackID=") else {
        return 0;
    };
    let rest = &path[idx + "trackID=".len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().unwrap_or(0)
}

/// Client RTP port from a Transport header's `client_port=A-B`
fn parse_client_port(transport: &str) -> Option<u16> {
    let idx = transport.find("client_port=")?;
    let rest = &transport[idx + "client_port=".len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}
