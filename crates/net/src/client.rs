//! TCP client for one channel of a room
//!
//! A [`ChannelClient`] owns a single connection bound to a (room, channel)
//! pair. Events that do not belong to the bound channel are dropped at this
//! boundary, so callers only ever see payloads of the channel they asked for.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Channel, Command, Event, Message, RejectReason};

/// Server is considered gone after this long without any frame
const SERVER_SILENCE_TIMEOUT_MS: u64 = 15_000;

/// Time the server has to answer the hello
const WELCOME_TIMEOUT_MS: u64 = 5000;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// What a channel connection yields
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A broadcast (or a validation error) for the bound channel
    Event(Event),
    /// Server is shutting down
    ServerShutdown,
    /// Connection lost
    Disconnected,
}

enum ClientCommand {
    Send(Message),
    Disconnect,
}

/// Client handle for one room channel
pub struct ChannelClient {
    channel: Channel,
    room_id: Uuid,
    user_id: Uuid,
    nickname: String,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<ChannelEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl ChannelClient {
    /// Open a channel and wait for the server to accept it.
    ///
    /// A refused credential maps to [`Error::Authentication`]; an unknown or
    /// ended room to [`Error::Rejected`]; transport failures to
    /// [`Error::Channel`].
    pub async fn connect(addr: SocketAddr, channel: Channel, room_id: Uuid, token: &str) -> Result<Self> {
        info!(addr = %addr, room_id = %room_id, channel = %channel, "Opening channel");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Channel(format!("connect to {}: {}", addr, e)))?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let hello = Message::Hello {
            channel,
            room_id,
            token: token.to_string(),
        };
        write_frame(&mut writer, &hello)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        let reply = tokio::time::timeout(
            Duration::from_millis(WELCOME_TIMEOUT_MS),
            read_frame(&mut reader),
        )
        .await
        .map_err(|_| Error::Channel("no reply to hello".into()))?
        .map_err(|e| match e {
            Error::Protocol(_) => e,
            other => Error::Channel(other.to_string()),
        })?;

        let (user_id, nickname) = match reply {
            Message::Welcome {
                channel: bound,
                room_id: bound_room,
                user_id,
                nickname,
            } if bound == channel && bound_room == room_id => (user_id, nickname),
            Message::Rejected { reason, message } => {
                warn!(reason = ?reason, message = %message, "Channel rejected");
                return Err(match reason {
                    RejectReason::Unauthorized => Error::Authentication(message),
                    RejectReason::UnknownRoom | RejectReason::RoomEnded => Error::Rejected(message),
                    RejectReason::Full => Error::Channel(message),
                    RejectReason::Protocol => Error::Protocol(message),
                });
            }
            other => {
                return Err(Error::Protocol(format!("unexpected reply to hello: {:?}", other)));
            }
        };

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            channel,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        info!(user_id = %user_id, channel = %channel, "Channel open");

        Ok(ChannelClient {
            channel,
            room_id,
            user_id,
            nickname,
            state,
            event_rx,
            cmd_tx,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Identity the server authenticated this connection as
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Get the next event; `None` once the connection task is gone
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Send a command. Commands for another channel are refused locally.
    pub async fn send(&self, cmd: Command) -> Result<()> {
        if cmd.channel() != self.channel {
            return Err(Error::Protocol(format!(
                "{} command on {} channel",
                cmd.channel(),
                self.channel
            )));
        }
        self.cmd_tx
            .send(ClientCommand::Send(Message::Command(cmd)))
            .await
            .map_err(|_| Error::NotConnected)
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

/// Reader task - frames are read off the socket here so the main loop can
/// select on them without cancelling a half-read frame
async fn reader_task(mut reader: ReadHalf<TcpStream>, frame_tx: mpsc::Sender<Result<Message>>) {
    loop {
        let result = read_frame(&mut reader).await;
        let done = result.is_err();
        if frame_tx.send(result).await.is_err() || done {
            break;
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    channel: Channel,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<ChannelEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let reader_handle = tokio::spawn(reader_task(reader, frame_tx));

    let watchdog_interval = Duration::from_millis(1000);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            result = frame_rx.recv() => {
                match result {
                    Some(Ok(msg)) => {
                        last_seen = Instant::now();
                        match msg {
                            Message::Event(event) if event.belongs_to(channel) => {
                                let _ = event_tx.send(ChannelEvent::Event(event)).await;
                            }
                            Message::Event(event) => {
                                warn!(channel = %channel, event = ?event, "Dropping event for another channel");
                            }
                            Message::Ping => {
                                if let Err(e) = write_frame(&mut writer, &Message::Pong).await {
                                    warn!(error = %e, "Write error");
                                    break;
                                }
                            }
                            Message::ServerShutdown => {
                                let _ = event_tx.send(ChannelEvent::ServerShutdown).await;
                            }
                            _ => {
                                debug!("Ignoring unexpected message");
                            }
                        }
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(watchdog_interval) => {
                let silent_ms = last_seen.elapsed().as_millis() as u64;
                if silent_ms > SERVER_SILENCE_TIMEOUT_MS {
                    warn!(silent_ms, channel = %channel, "Server went silent");
                    break;
                }
            }
        }
    }

    reader_handle.abort();
    *state.write().await = ConnectionState::Disconnected;
    let _ = event_tx.send(ChannelEvent::Disconnected).await;
    info!(channel = %channel, "Channel closed");
}
