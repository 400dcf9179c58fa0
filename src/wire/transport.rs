// src/wire/transport.rs

use crate::error::TransportError;
use crate::events::model::{LinkDirection, LogLevel};
use crate::hub::Hub;
use crate::wire::events::emit_link_event;
use crate::wire::link::LinkId;
use crate::wire::message::WireMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Normalize a target string. Accepts `host:port` and `tcp:host;port`
/// (optionally `tcp:host=H;port=P`).
pub fn parse_target(target: &str) -> Result<String, TransportError> {
    let invalid = || TransportError::InvalidTarget(target.to_string());
    let Some(rest) = target.strip_prefix("tcp:") else {
        return match target.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(target.to_string())
            }
            _ => Err(invalid()),
        };
    };
    let mut host = None;
    let mut port = None;
    for (i, part) in rest.split(';').enumerate() {
        match part.split_once('=') {
            Some(("host", v)) => host = Some(v),
            Some(("port", v)) => port = Some(v),
            Some(_) => {}
            None if i == 0 => host = Some(part),
            None if i == 1 => port = Some(part),
            None => {}
        }
    }
    match (host, port.and_then(|p| p.parse::<u16>().ok())) {
        (Some(h), Some(p)) if !h.is_empty() => Ok(format!("{}:{}", h, p)),
        _ => Err(invalid()),
    }
}

/// Bind the wire listener and accept links until the process exits.
pub async fn start_listener(port: u16, hub: Hub) -> Result<(), TransportError> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    emit_link_event(
        "listener",
        LogLevel::Info,
        "listener_bind",
        None,
        Some(addr),
        None,
        hub.allow_console(),
    );
    accept_links(listener, hub).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn accept_links(listener: TcpListener, hub: Hub) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let link = attach_stream(stream, peer_addr.to_string(), LinkDirection::Inbound, &hub).0;
                emit_link_event(
                    "listener",
                    LogLevel::Info,
                    "incoming_connection",
                    Some(link),
                    Some(peer_addr.to_string()),
                    None,
                    hub.allow_console(),
                );
            }
            Err(e) => {
                emit_link_event(
                    "listener",
                    LogLevel::Error,
                    "accept_failed",
                    None,
                    None,
                    Some(e.to_string()),
                    hub.allow_console(),
                );
            }
        }
    }
}

/// Dial a wire target and hand the connection to the hub.
pub async fn connect(target: &str, hub: &Hub) -> Result<LinkId, TransportError> {
    Ok(dial(target, hub).await?.0)
}

async fn dial(target: &str, hub: &Hub) -> Result<(LinkId, JoinHandle<()>), TransportError> {
    let addr = parse_target(target)?;
    emit_link_event(
        "transport",
        LogLevel::Info,
        "dial_start",
        None,
        Some(addr.clone()),
        None,
        hub.allow_console(),
    );
    let stream = TcpStream::connect(&addr).await?;
    Ok(attach_stream(stream, addr, LinkDirection::Outbound, hub))
}

/// Keep every target connected: dial, wait for the link to end, retry after `delay`.
pub fn connect_to_targets(targets: Vec<String>, hub: Hub, delay: Duration) -> Vec<JoinHandle<()>> {
    targets
        .into_iter()
        .map(|target| {
            let hub = hub.clone();
            tokio::spawn(async move {
                loop {
                    match dial(&target, &hub).await {
                        Ok((link, reader)) => {
                            emit_link_event(
                                "transport",
                                LogLevel::Info,
                                "target_connected",
                                Some(link),
                                Some(target.clone()),
                                None,
                                hub.allow_console(),
                            );
                            let _ = reader.await;
                        }
                        Err(TransportError::InvalidTarget(t)) => {
                            emit_link_event(
                                "transport",
                                LogLevel::Error,
                                "target_invalid",
                                None,
                                Some(t),
                                None,
                                hub.allow_console(),
                            );
                            return;
                        }
                        Err(e) => {
                            emit_link_event(
                                "transport",
                                LogLevel::Warn,
                                "target_connect_failed",
                                None,
                                Some(target.clone()),
                                Some(e.to_string()),
                                hub.allow_console(),
                            );
                        }
                    }
                    tokio::time::sleep(delay).await;
                }
            })
        })
        .collect()
}

/// Register a connected stream with the hub and spawn its writer and reader
/// tasks. The returned handle completes when the link is gone.
pub fn attach_stream(
    stream: TcpStream,
    target: String,
    direction: LinkDirection,
    hub: &Hub,
) -> (LinkId, JoinHandle<()>) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(hub.settings().link_queue);
    let (link, closed) = hub.attach_link(target.clone(), tx);
    let allow_console = hub.allow_console();
    emit_link_event(
        "transport",
        LogLevel::Debug,
        "link_open",
        Some(link),
        Some(target.clone()),
        Some(format!("direction={:?}", direction)),
        allow_console,
    );

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let written = async {
                write_half.write_all(line.as_bytes()).await?;
                write_half.write_all(b"\n").await
            };
            if let Err(e) = written.await {
                emit_link_event(
                    "transport",
                    LogLevel::Error,
                    "write_failed",
                    Some(link),
                    None,
                    Some(e.to_string()),
                    allow_console,
                );
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader_hub = hub.clone();
    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        receive_and_dispatch(&mut reader, link, closed, reader_hub, target).await;
    });
    (link, reader)
}

/// Read newline-delimited messages until the peer goes away or the hub drops the link.
pub async fn receive_and_dispatch<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    link: LinkId,
    closed: Arc<Notify>,
    hub: Hub,
    addr: String,
) {
    let allow_console = hub.allow_console();
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = closed.notified() => None,
            read = reader.read_line(&mut line) => Some(read),
        };
        match read {
            None => {
                emit_link_event(
                    "transport",
                    LogLevel::Debug,
                    "link_released",
                    Some(link),
                    Some(addr.clone()),
                    None,
                    allow_console,
                );
                break;
            }
            Some(Ok(0)) => {
                emit_link_event(
                    "transport",
                    LogLevel::Info,
                    "peer_disconnected",
                    Some(link),
                    Some(addr.clone()),
                    None,
                    allow_console,
                );
                hub.drop_link(link, "eof");
                break;
            }
            Some(Ok(_)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match WireMessage::from_json(&line) {
                    Ok(msg) => hub.handle_incoming(link, msg),
                    Err(e) => {
                        emit_link_event(
                            "transport",
                            LogLevel::Warn,
                            "message_invalid",
                            Some(link),
                            Some(addr.clone()),
                            Some(e.to_string()),
                            allow_console,
                        );
                    }
                }
            }
            Some(Err(e)) => {
                emit_link_event(
                    "transport",
                    LogLevel::Warn,
                    "peer_read_error",
                    Some(link),
                    Some(addr.clone()),
                    Some(e.to_string()),
                    allow_console,
                );
                hub.drop_link(link, "read_error");
                break;
            }
        }
    }
}
