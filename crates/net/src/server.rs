//! TCP server hosting the authoritative side of every room
//!
//! Each connection binds to one (room, channel) pair during the handshake.
//! Commands are applied to the room's aggregate in the hub and the resulting
//! canonical events are fanned out to every subscriber of that pair.
//! Validation failures go back to the originating connection only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spinroom_core::{
    ChatEvent, CredentialValidator, Error as CoreError, Identity, PresenceStatus, RoomHub,
    RoomRole, Segment, Wheel,
};
use spinroom_core::DataService;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex, Notify, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{
    Channel, ChatBroadcast, ChatCommand, Command, Event, Message, RejectReason, RoomBroadcast,
    RoomCommand, WheelBroadcast, WheelCommand,
};

/// Default cap on connections per (room, channel)
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Time a new connection has to send its hello
const HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// Per-connection outbound queue depth
const OUTBOUND_QUEUE: usize = 64;

/// Longest accepted chat message, in characters
const MAX_MESSAGE_CHARS: usize = 1000;

/// Longest accepted emoji payload, in characters
const MAX_EMOJI_CHARS: usize = 16;

/// Server tuning knobs
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// A connection bound to a room channel
struct Subscriber {
    user_id: Uuid,
    tx: mpsc::Sender<Message>,
    /// Signalled when the subscriber is dropped for falling behind
    evicted: Arc<Notify>,
}

type Topic = (Uuid, Channel);

/// Server state shared across tasks
struct Shared {
    hub: Arc<RoomHub>,
    credentials: Arc<dyn CredentialValidator>,
    options: ServerOptions,
    subscribers: RwLock<HashMap<Topic, HashMap<Uuid, Subscriber>>>,
    /// One turn per room: mutation and broadcast happen inside the same turn
    /// so every subscriber sees a room's events in the order they were made
    turns: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Shared {
    fn new(hub: Arc<RoomHub>, credentials: Arc<dyn CredentialValidator>, options: ServerOptions) -> Self {
        Self {
            hub,
            credentials,
            options,
            subscribers: RwLock::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
        }
    }

    async fn turn(&self, room_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut turns = self.turns.lock().await;
            turns.entry(room_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Queue an event for every subscriber of a topic.
    ///
    /// Never waits on a subscriber: one whose queue is full is evicted and
    /// its connection closed, so it reconnects and resyncs instead of
    /// stalling the room.
    async fn broadcast(&self, room_id: Uuid, channel: Channel, event: Event) {
        let topic = (room_id, channel);
        let targets: Vec<(Uuid, mpsc::Sender<Message>)> = {
            let subs = self.subscribers.read().await;
            subs.get(&topic)
                .map(|m| m.iter().map(|(id, s)| (*id, s.tx.clone())).collect())
                .unwrap_or_default()
        };

        let msg = Message::Event(event);
        let mut lagging = Vec::new();
        for (conn_id, tx) in targets {
            match tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => lagging.push(conn_id),
                Err(TrySendError::Closed(_)) => {
                    debug!(room_id = %room_id, channel = %channel, "Subscriber queue closed");
                }
            }
        }

        if !lagging.is_empty() {
            self.evict(topic, &lagging).await;
        }
    }

    async fn evict(&self, topic: Topic, conn_ids: &[Uuid]) {
        let mut subs = self.subscribers.write().await;
        let Some(members) = subs.get_mut(&topic) else {
            return;
        };
        for conn_id in conn_ids {
            if let Some(sub) = members.remove(conn_id) {
                warn!(
                    room_id = %topic.0,
                    channel = %topic.1,
                    user_id = %sub.user_id,
                    "Evicting subscriber with a full queue"
                );
                sub.evicted.notify_one();
            }
        }
        if members.is_empty() {
            subs.remove(&topic);
        }
    }
}

/// The originating connection's own queue, for replies that are not
/// broadcast. A reply that does not fit closes the connection.
struct Replier {
    tx: mpsc::Sender<Message>,
    evicted: Arc<Notify>,
}

impl Replier {
    fn send(&self, msg: Message) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(msg) {
            warn!("Reply queue full, closing connection");
            self.evicted.notify_one();
        }
    }

    fn error(&self, err: impl std::fmt::Display) {
        self.send(Message::Event(Event::Error {
            message: err.to_string(),
        }));
    }
}

/// Room server handle
pub struct Server {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Start a server on the given address (port 0 picks a free port)
    pub async fn start(
        addr: SocketAddr,
        hub: Arc<RoomHub>,
        credentials: Arc<dyn CredentialValidator>,
        options: ServerOptions,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared::new(hub, credentials, options));

        tokio::spawn(accept_loop(listener, shared.clone(), shutdown_tx.clone()));
        tokio::spawn(heartbeat_task(shared.clone(), shutdown_tx.subscribe()));

        Ok(Server {
            addr: bound_addr,
            shared,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The authoritative room hub, which doubles as the data service
    pub fn hub(&self) -> Arc<RoomHub> {
        self.shared.hub.clone()
    }

    /// Number of live connections on a room channel
    pub async fn subscriber_count(&self, room_id: Uuid, channel: Channel) -> usize {
        self.shared
            .subscribers
            .read()
            .await
            .get(&(room_id, channel))
            .map_or(0, |m| m.len())
    }

    /// Install a new wheel for a room and announce it on the wheel channel
    pub async fn create_wheel(
        &self,
        caller: &Identity,
        room_id: Uuid,
        title: &str,
        segments: Vec<Segment>,
    ) -> spinroom_core::Result<Wheel> {
        let _turn = self.shared.turn(room_id).await;
        let wheel = self.shared.hub.create_wheel(caller, room_id, title, segments)?;
        self.announce_wheel(&wheel).await;
        Ok(wheel)
    }

    /// Edit a wheel's segments and announce the change on the wheel channel
    pub async fn update_wheel(
        &self,
        caller: &Identity,
        room_id: Uuid,
        wheel_id: Uuid,
        segments: Vec<Segment>,
    ) -> spinroom_core::Result<Wheel> {
        let _turn = self.shared.turn(room_id).await;
        let wheel = self.shared.hub.update_wheel(caller, wheel_id, segments)?;
        self.announce_wheel(&wheel).await;
        Ok(wheel)
    }

    async fn announce_wheel(&self, wheel: &Wheel) {
        self.shared
            .broadcast(
                wheel.room_id,
                Channel::Wheel,
                Event::Wheel(WheelBroadcast::WheelUpdated {
                    wheel_id: wheel.id,
                    title: wheel.title.clone(),
                    revision: wheel.revision,
                    segments: wheel.segments.clone(),
                }),
            )
            .await;
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            shared.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// What a successful handshake binds the connection to
#[derive(Clone)]
struct Binding {
    identity: Identity,
    room_id: Uuid,
    channel: Channel,
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let binding = match handshake(&mut reader, &shared).await {
        Ok(binding) => binding,
        Err((reason, message)) => {
            warn!(addr = %addr, reason = ?reason, message = %message, "Handshake rejected");
            let _ = write_frame(&mut writer, &Message::Rejected { reason, message }).await;
            return;
        }
    };

    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer_handle = tokio::spawn(writer_task(writer, rx));
    let evicted = Arc::new(Notify::new());

    let admitted = {
        let mut subs = shared.subscribers.write().await;
        let topic = subs.entry((binding.room_id, binding.channel)).or_default();
        if topic.len() >= shared.options.max_connections {
            false
        } else {
            // Queued under the write lock so no broadcast can overtake it
            let _ = tx.try_send(Message::Welcome {
                channel: binding.channel,
                room_id: binding.room_id,
                user_id: binding.identity.user_id,
                nickname: binding.identity.nickname.clone(),
            });
            topic.insert(
                conn_id,
                Subscriber {
                    user_id: binding.identity.user_id,
                    tx: tx.clone(),
                    evicted: evicted.clone(),
                },
            );
            true
        }
    };

    if !admitted {
        let _ = tx
            .send(Message::Rejected {
                reason: RejectReason::Full,
                message: "channel is full".into(),
            })
            .await;
        drop(tx);
        let _ = writer_handle.await;
        return;
    }

    let subscription = Subscription::new(shared.clone(), binding, conn_id);
    let binding = &subscription.binding;
    let replier = Replier { tx, evicted };

    info!(
        addr = %addr,
        user_id = %binding.identity.user_id,
        room_id = %binding.room_id,
        channel = %binding.channel,
        "Channel opened"
    );

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(Message::Command(cmd)) if cmd.channel() == binding.channel => {
                        handle_command(cmd, binding, &replier, &shared).await;
                    }
                    Ok(Message::Command(cmd)) => {
                        replier.error(format!("{} command sent on {} channel", cmd.channel(), binding.channel));
                    }
                    Ok(Message::Pong) => {}
                    Ok(_) => {
                        debug!(conn_id = %conn_id, "Ignoring unexpected message type");
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(conn_id = %conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = replier.evicted.notified() => {
                break;
            }
            _ = shutdown_rx.recv() => {
                replier.send(Message::ServerShutdown);
                break;
            }
        }
    }

    info!(user_id = %binding.identity.user_id, channel = %binding.channel, "Channel closed");
    drop(replier);
    subscription.release().await;
    let _ = writer_handle.await;
}

/// Registration of one connection in the subscriber map.
///
/// Released explicitly on a clean exit. If the connection task unwinds
/// instead, dropping it schedules the same cleanup so the entry, and the
/// queue sender that keeps the writer alive, never outlive the connection.
struct Subscription {
    shared: Arc<Shared>,
    binding: Binding,
    conn_id: Uuid,
    released: bool,
}

impl Subscription {
    fn new(shared: Arc<Shared>, binding: Binding, conn_id: Uuid) -> Self {
        Self {
            shared,
            binding,
            conn_id,
            released: false,
        }
    }

    async fn release(mut self) {
        remove_subscriber(&self.shared, &self.binding, self.conn_id).await;
        self.released = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let shared = self.shared.clone();
        let binding = self.binding.clone();
        let conn_id = self.conn_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                remove_subscriber(&shared, &binding, conn_id).await;
            });
        }
    }
}

/// Read and validate the hello frame
async fn handshake(
    reader: &mut ReadHalf<TcpStream>,
    shared: &Shared,
) -> std::result::Result<Binding, (RejectReason, String)> {
    let first = tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        read_frame(reader),
    )
    .await
    .map_err(|_| (RejectReason::Protocol, "handshake timed out".to_string()))?
    .map_err(|e| (RejectReason::Protocol, e.to_string()))?;

    let Message::Hello {
        channel,
        room_id,
        token,
    } = first
    else {
        return Err((RejectReason::Protocol, "expected hello".into()));
    };

    let identity = shared
        .credentials
        .validate(&token)
        .map_err(|e| (RejectReason::Unauthorized, e.to_string()))?;

    let room = shared
        .hub
        .get_room(room_id)
        .map_err(|e| (RejectReason::UnknownRoom, e.to_string()))?;
    if !room.is_active() {
        return Err((RejectReason::RoomEnded, "room has ended".into()));
    }

    Ok(Binding {
        identity,
        room_id,
        channel,
    })
}

/// Writer task - sends messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

async fn handle_command(cmd: Command, binding: &Binding, replier: &Replier, shared: &Shared) {
    let outcome = match cmd {
        Command::Room(cmd) => handle_room(cmd, binding, shared).await,
        Command::Wheel(cmd) => handle_wheel(cmd, binding, shared).await,
        Command::Chat(cmd) => handle_chat(cmd, binding, replier, shared).await,
    };

    if let Err(e) = outcome {
        debug!(user_id = %binding.identity.user_id, error = %e, "Command refused");
        replier.error(e);
    }
}

async fn handle_room(cmd: RoomCommand, binding: &Binding, shared: &Shared) -> spinroom_core::Result<()> {
    let room_id = binding.room_id;
    let _turn = shared.turn(room_id).await;

    match cmd {
        RoomCommand::JoinRoom { user_id, nickname } => {
            ensure_self(binding, user_id)?;
            let (outcome, notice) = shared.hub.with_room(room_id, |room| {
                let outcome = room.join(user_id, &nickname)?;
                let notice = (!outcome.rejoined)
                    .then(|| room.announce(format!("{} joined the room", outcome.participant.nickname)));
                Ok((outcome, notice))
            })?;

            shared
                .broadcast(
                    room_id,
                    Channel::Room,
                    Event::Room(RoomBroadcast::ParticipantJoined {
                        participant: outcome.participant,
                    }),
                )
                .await;
            if let Some(entry) = notice {
                shared
                    .broadcast(room_id, Channel::Chat, Event::Chat(ChatBroadcast::for_entry(entry)))
                    .await;
            }
        }
        RoomCommand::LeaveRoom { user_id } => {
            ensure_self(binding, user_id)?;
            let (outcome, notices) = shared.hub.with_room(room_id, |room| {
                let outcome = room.leave(user_id)?;
                let mut notices = vec![room.announce(format!("{} left the room", outcome.removed.nickname))];
                if let Some(heir) = &outcome.new_host {
                    notices.push(room.announce(format!("{} is now the host", heir.nickname)));
                }
                Ok((outcome, notices))
            })?;

            shared
                .broadcast(
                    room_id,
                    Channel::Room,
                    Event::Room(RoomBroadcast::ParticipantLeft {
                        user_id,
                        nickname: outcome.removed.nickname.clone(),
                        version: outcome.version,
                    }),
                )
                .await;
            if let Some(heir) = outcome.new_host {
                shared
                    .broadcast(
                        room_id,
                        Channel::Room,
                        Event::Room(RoomBroadcast::ParticipantRoleChanged {
                            user_id: heir.user_id,
                            role: RoomRole::Host,
                            version: heir.version,
                        }),
                    )
                    .await;
            }
            for entry in notices {
                shared
                    .broadcast(room_id, Channel::Chat, Event::Chat(ChatBroadcast::for_entry(entry)))
                    .await;
            }
        }
    }
    Ok(())
}

async fn handle_wheel(cmd: WheelCommand, binding: &Binding, shared: &Shared) -> spinroom_core::Result<()> {
    let room_id = binding.room_id;
    let _turn = shared.turn(room_id).await;

    match cmd {
        WheelCommand::Spin { wheel_id, seed } => {
            let result = shared
                .hub
                .with_room(room_id, |room| room.request_spin(binding.identity.user_id, wheel_id, seed))?;

            shared
                .broadcast(
                    room_id,
                    Channel::Wheel,
                    Event::Wheel(WheelBroadcast::SpinStarted {
                        spin_id: result.id,
                        seed,
                        spinner_nickname: result.spinner_nickname.clone(),
                    }),
                )
                .await;
            shared
                .broadcast(
                    room_id,
                    Channel::Wheel,
                    Event::Wheel(WheelBroadcast::SpinResult {
                        result: result.clone(),
                    }),
                )
                .await;

            // The result is out; release the wheel for the next spin
            let notice = shared.hub.with_room(room_id, |room| {
                room.acknowledge_end(result.id);
                Ok(room.announce(format!(
                    "{} spun the wheel: {}",
                    result.spinner_nickname, result.result
                )))
            })?;

            shared
                .broadcast(
                    room_id,
                    Channel::Wheel,
                    Event::Wheel(WheelBroadcast::SpinEnded { spin_id: result.id }),
                )
                .await;
            shared
                .broadcast(room_id, Channel::Chat, Event::Chat(ChatBroadcast::for_entry(notice)))
                .await;
        }
    }
    Ok(())
}

async fn handle_chat(
    cmd: ChatCommand,
    binding: &Binding,
    replier: &Replier,
    shared: &Shared,
) -> spinroom_core::Result<()> {
    let room_id = binding.room_id;
    let author = binding.identity.user_id;

    let post = match cmd {
        ChatCommand::Since { position } => {
            let backlog = shared.hub.with_room(room_id, |room| Ok(room.chat_since(position)))?;
            replier.send(Message::Event(Event::Chat(ChatBroadcast::Backlog {
                entries: backlog.entries,
                complete: backlog.complete,
            })));
            return Ok(());
        }
        // The payload nickname is advisory; the room's registry is authoritative
        ChatCommand::SendMessage { content, .. } => {
            ChatPost::Message(bounded_text(&content, MAX_MESSAGE_CHARS, "message")?)
        }
        ChatCommand::SendEmoji { emoji, .. } => ChatPost::Emoji(bounded_text(&emoji, MAX_EMOJI_CHARS, "emoji")?),
    };

    let _turn = shared.turn(room_id).await;
    let entry = shared.hub.with_room(room_id, |room| {
        let nickname = room
            .participant(author)
            .map(|p| p.nickname.clone())
            .ok_or_else(|| CoreError::PermissionDenied("only room members can chat".into()))?;
        let event = match post {
            ChatPost::Message(content) => ChatEvent::message(room_id, author, nickname, content),
            ChatPost::Emoji(emoji) => ChatEvent::emoji(room_id, author, nickname, emoji),
        };
        Ok(room.append_chat(event))
    })?;
    shared
        .broadcast(room_id, Channel::Chat, Event::Chat(ChatBroadcast::for_entry(entry)))
        .await;
    Ok(())
}

enum ChatPost {
    Message(String),
    Emoji(String),
}

fn ensure_self(binding: &Binding, user_id: Uuid) -> spinroom_core::Result<()> {
    if user_id != binding.identity.user_id {
        return Err(CoreError::PermissionDenied(
            "cannot act on behalf of another user".into(),
        ));
    }
    Ok(())
}

fn bounded_text(text: &str, max_chars: usize, what: &str) -> spinroom_core::Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::InvalidOperation(format!("{} must not be empty", what)));
    }
    if text.chars().count() > max_chars {
        return Err(CoreError::InvalidOperation(format!(
            "{} longer than {} characters",
            what, max_chars
        )));
    }
    Ok(text.to_string())
}

/// Drop a connection. Losing the last room-channel connection marks the
/// participant offline; it never removes them or cancels a running spin.
async fn remove_subscriber(shared: &Shared, binding: &Binding, conn_id: Uuid) {
    let user_id = binding.identity.user_id;
    let still_present = {
        let mut subs = shared.subscribers.write().await;
        let topic_key = (binding.room_id, binding.channel);
        let mut still_present = false;
        if let Some(topic) = subs.get_mut(&topic_key) {
            topic.remove(&conn_id);
            still_present = topic.values().any(|s| s.user_id == user_id);
            if topic.is_empty() {
                subs.remove(&topic_key);
            }
        }
        still_present
    };

    if binding.channel != Channel::Room || still_present {
        return;
    }

    let _turn = shared.turn(binding.room_id).await;
    match shared
        .hub
        .with_room(binding.room_id, |room| room.set_status(user_id, PresenceStatus::Offline))
    {
        Ok(Some(change)) => {
            shared
                .broadcast(
                    binding.room_id,
                    Channel::Room,
                    Event::Room(RoomBroadcast::ParticipantStatusChanged {
                        user_id,
                        status: change.status,
                        version: change.version,
                    }),
                )
                .await;
        }
        Ok(None) => {}
        Err(CoreError::NotFound(_)) => {
            // Left explicitly, or never joined
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Failed to mark participant offline");
        }
    }
}

/// Heartbeat task - pings every subscriber and prunes dead queues
async fn heartbeat_task(shared: Arc<Shared>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval = shared.options.heartbeat_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let targets: Vec<mpsc::Sender<Message>> = {
                    let mut subs = shared.subscribers.write().await;
                    for topic in subs.values_mut() {
                        topic.retain(|_, s| !s.tx.is_closed());
                    }
                    subs.retain(|_, topic| !topic.is_empty());
                    subs.values().flat_map(|t| t.values().map(|s| s.tx.clone())).collect()
                };

                for tx in targets {
                    let _ = tx.try_send(Message::Ping);
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Heartbeat task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinroom_core::{TokenRegistry, Visibility};

    #[tokio::test]
    async fn test_server_start() {
        let hub = Arc::new(RoomHub::new());
        let tokens = Arc::new(TokenRegistry::new());
        let server = Server::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            hub,
            tokens,
            ServerOptions::default(),
        )
        .await
        .unwrap();

        assert!(server.addr().port() > 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_update_wheel_requires_host() {
        let hub = Arc::new(RoomHub::new());
        let tokens = Arc::new(TokenRegistry::new());
        let host = Identity::new("host");
        let guest = Identity::new("guest");
        let room = hub.create_room(&host, "r", Visibility::Private).unwrap();
        hub.join_room(&guest, &room.code, "guest").unwrap();

        let server = Server::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            hub,
            tokens,
            ServerOptions::default(),
        )
        .await
        .unwrap();

        let wheel = server
            .create_wheel(&host, room.id, "w", spinroom_core::default_segments())
            .await
            .unwrap();
        assert!(server
            .update_wheel(&guest, room.id, wheel.id, spinroom_core::default_segments())
            .await
            .is_err());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_full_queue_is_evicted_not_awaited() {
        let shared = Shared::new(Arc::new(RoomHub::new()), Arc::new(TokenRegistry::new()), ServerOptions::default());
        let room_id = Uuid::new_v4();
        let topic = (room_id, Channel::Chat);

        let (stuck_tx, _stuck_rx) = mpsc::channel(1);
        stuck_tx.try_send(Message::Ping).unwrap();
        let stuck_signal = Arc::new(Notify::new());
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let stuck_id = Uuid::new_v4();
        let live_id = Uuid::new_v4();
        {
            let mut subs = shared.subscribers.write().await;
            let members = subs.entry(topic).or_default();
            members.insert(
                stuck_id,
                Subscriber {
                    user_id: Uuid::new_v4(),
                    tx: stuck_tx,
                    evicted: stuck_signal.clone(),
                },
            );
            members.insert(
                live_id,
                Subscriber {
                    user_id: Uuid::new_v4(),
                    tx: live_tx,
                    evicted: Arc::new(Notify::new()),
                },
            );
        }

        let event = Event::Error {
            message: "note".into(),
        };
        tokio::time::timeout(Duration::from_secs(1), shared.broadcast(room_id, Channel::Chat, event))
            .await
            .expect("broadcast waited on a full queue");

        assert!(matches!(live_rx.recv().await, Some(Message::Event(Event::Error { .. }))));
        let subs = shared.subscribers.read().await;
        let members = subs.get(&topic).unwrap();
        assert!(members.contains_key(&live_id));
        assert!(!members.contains_key(&stuck_id));
        drop(subs);
        tokio::time::timeout(Duration::from_secs(1), stuck_signal.notified())
            .await
            .expect("evicted connection was not told to close");
    }

    #[tokio::test]
    async fn test_dropped_subscription_cleans_up() {
        let shared = Arc::new(Shared::new(
            Arc::new(RoomHub::new()),
            Arc::new(TokenRegistry::new()),
            ServerOptions::default(),
        ));
        let binding = Binding {
            identity: Identity::new("ghost"),
            room_id: Uuid::new_v4(),
            channel: Channel::Chat,
        };
        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        shared.subscribers.write().await.entry((binding.room_id, binding.channel)).or_default().insert(
            conn_id,
            Subscriber {
                user_id: binding.identity.user_id,
                tx,
                evicted: Arc::new(Notify::new()),
            },
        );

        // Dropped without release, as when the connection task unwinds
        drop(Subscription::new(shared.clone(), binding.clone(), conn_id));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while shared.subscribers.read().await.contains_key(&(binding.room_id, binding.channel)) {
            assert!(tokio::time::Instant::now() < deadline, "subscriber outlived its connection");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_bounded_text() {
        assert_eq!(bounded_text("  hi ", 10, "message").unwrap(), "hi");
        assert!(bounded_text("   ", 10, "message").is_err());
        assert!(bounded_text("toolong", 3, "message").is_err());
    }
}
