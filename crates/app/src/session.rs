//! Room session
//!
//! Keeps one [`ChannelClient`] per channel of a room alive and feeds
//! everything they receive into a shared [`ClientStateStore`]. Each channel
//! runs in its own task:
//!
//! 1. connect (retrying with exponential backoff while the failure is
//!    recoverable)
//! 2. catch up: room and wheel fetch snapshots from the data service, chat
//!    asks for `since(watermark)`
//! 3. apply live events until the connection drops, then go back to 1
//!
//! The wheel task also runs the spin watchdog: if a spin's result has not
//! arrived within the configured window after `spinStarted`, the wheel
//! projection is degraded and the channel is re-established, which resyncs
//! it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spinroom_core::{DataService, Error as CoreError, Identity};
use spinroom_net::backoff::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};
use spinroom_net::{
    Backoff, Channel, ChannelClient, ChannelEvent, ChatBroadcast, ChatCommand, Command, Event,
    RoomCommand, WheelBroadcast, WheelCommand,
};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_SPIN_RESULT_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::store::ClientStateStore;

/// Connection and timing settings for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub server_addr: SocketAddr,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub spin_result_timeout: Duration,
}

impl SessionOptions {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            reconnect_base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            spin_result_timeout: Duration::from_millis(DEFAULT_SPIN_RESULT_TIMEOUT_MS),
        }
    }
}

/// Link state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    /// Lost or refused; retrying with backoff
    Reconnecting,
    /// Refused for good; the channel task has stopped
    Failed,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LinkChanged { channel: Channel, state: LinkState },
    /// The server refused one of our commands
    CommandRejected { channel: Channel, message: String },
    /// A spin result is overdue; the wheel view is degraded until resync
    SpinTimedOut { spin_id: Uuid },
    /// Catch-up could not fetch a snapshot
    ResyncFailed { channel: Channel, message: String },
}

enum ChannelCommand {
    Send(Command),
    Reconnect,
    Close,
}

/// Everything a channel task needs
struct ChannelContext {
    channel: Channel,
    room_id: Uuid,
    token: Arc<RwLock<String>>,
    data: Arc<dyn DataService>,
    store: Arc<RwLock<ClientStateStore>>,
    changes: watch::Sender<u64>,
    events: mpsc::Sender<SessionEvent>,
    options: SessionOptions,
}

impl ChannelContext {
    fn notify(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            debug!(channel = %self.channel, "Session event dropped");
        }
    }

    fn link(&self, state: LinkState) {
        self.notify(SessionEvent::LinkChanged {
            channel: self.channel,
            state,
        });
    }

    fn changed(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Session handle for one user in one room
pub struct RoomSession {
    room_id: Uuid,
    identity: Identity,
    store: Arc<RwLock<ClientStateStore>>,
    changes: watch::Receiver<u64>,
    event_rx: mpsc::Receiver<SessionEvent>,
    links: HashMap<Channel, mpsc::Sender<ChannelCommand>>,
    token: Arc<RwLock<String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomSession {
    /// Open all three channels of `room_id` and start synchronizing
    pub fn start(
        identity: Identity,
        token: String,
        room_id: Uuid,
        data: Arc<dyn DataService>,
        options: SessionOptions,
    ) -> Self {
        let store = Arc::new(RwLock::new(ClientStateStore::new()));
        let (changes_tx, changes_rx) = watch::channel(0u64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let token = Arc::new(RwLock::new(token));

        let mut links = HashMap::new();
        let mut tasks = Vec::new();
        for channel in Channel::ALL {
            let (cmd_tx, cmd_rx) = mpsc::channel(64);
            let ctx = ChannelContext {
                channel,
                room_id,
                token: token.clone(),
                data: data.clone(),
                store: store.clone(),
                changes: changes_tx.clone(),
                events: event_tx.clone(),
                options: options.clone(),
            };
            tasks.push(tokio::spawn(channel_task(ctx, cmd_rx)));
            links.insert(channel, cmd_tx);
        }

        info!(room_id = %room_id, user_id = %identity.user_id, "Session started");

        Self {
            room_id,
            identity,
            store,
            changes: changes_rx,
            event_rx,
            links,
            token,
            tasks,
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Copy of the current projections
    pub async fn state(&self) -> ClientStateStore {
        self.store.read().await.clone()
    }

    /// Read the projections without copying them
    pub async fn read<R>(&self, f: impl FnOnce(&ClientStateStore) -> R) -> R {
        f(&*self.store.read().await)
    }

    /// Receiver that ticks whenever a projection changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    /// Wait until `pred` holds for the store, or the timeout elapses
    pub async fn wait_until(&self, timeout: Duration, mut pred: impl FnMut(&ClientStateStore) -> bool) -> bool {
        let mut changes = self.changes.clone();
        let check = async {
            loop {
                if pred(&*self.store.read().await) {
                    return;
                }
                if changes.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(timeout, check).await.is_ok()
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Poll for a session event without waiting
    pub fn try_recv_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Ask the server to spin the room's active wheel
    pub async fn spin(&self, seed: u64) -> Result<()> {
        let wheel_id = self
            .read(|s| s.wheel.wheel().map(|w| w.wheel_id))
            .await
            .ok_or(Error::NoActiveWheel)?;
        self.send(Command::Wheel(WheelCommand::Spin { wheel_id, seed })).await
    }

    pub async fn send_message(&self, content: &str) -> Result<()> {
        self.send(Command::Chat(ChatCommand::SendMessage {
            content: content.to_string(),
            nickname: self.identity.nickname.clone(),
        }))
        .await
    }

    pub async fn send_emoji(&self, emoji: &str) -> Result<()> {
        self.send(Command::Chat(ChatCommand::SendEmoji {
            emoji: emoji.to_string(),
            nickname: self.identity.nickname.clone(),
        }))
        .await
    }

    /// Replace the bearer credential used by subsequent reconnects
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = token;
    }

    /// Drop a channel's connection; it reconnects and resyncs after backoff
    pub async fn reconnect(&self, channel: Channel) -> Result<()> {
        self.command(channel, ChannelCommand::Reconnect).await
    }

    /// Leave the room explicitly, then close every channel
    pub async fn leave(self) -> Result<()> {
        let user_id = self.identity.user_id;
        self.send(Command::Room(RoomCommand::LeaveRoom { user_id })).await?;
        self.close().await;
        Ok(())
    }

    /// Close every channel without leaving; the server marks us offline
    pub async fn close(self) {
        for tx in self.links.values() {
            let _ = tx.send(ChannelCommand::Close).await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!(room_id = %self.room_id, "Session closed");
    }

    async fn send(&self, command: Command) -> Result<()> {
        let channel = command.channel();
        self.command(channel, ChannelCommand::Send(command)).await
    }

    async fn command(&self, channel: Channel, cmd: ChannelCommand) -> Result<()> {
        let tx = self.links.get(&channel).ok_or(Error::SessionClosed)?;
        tx.send(cmd).await.map_err(|_| Error::SessionClosed)
    }
}

enum Exit {
    /// Connection dropped; reconnect
    Lost,
    /// Session asked us to stop
    Closed,
}

/// Connect, catch up, apply; repeat until closed or refused for good
async fn channel_task(ctx: ChannelContext, mut cmd_rx: mpsc::Receiver<ChannelCommand>) {
    let mut backoff = Backoff::new(ctx.options.reconnect_base_delay, ctx.options.reconnect_max_delay);
    ctx.link(LinkState::Connecting);

    loop {
        let token = ctx.token.read().await.clone();
        match ChannelClient::connect(ctx.options.server_addr, ctx.channel, ctx.room_id, &token).await {
            Ok(client) => {
                backoff.reset();
                ctx.link(LinkState::Connected);
                match run_connected(&ctx, client, &mut cmd_rx).await {
                    Exit::Closed => break,
                    Exit::Lost => {
                        info!(channel = %ctx.channel, "Channel lost");
                    }
                }
            }
            Err(e) if !e.is_recoverable() => {
                warn!(channel = %ctx.channel, error = %e, "Channel refused");
                ctx.link(LinkState::Failed);
                break;
            }
            Err(e) => {
                warn!(channel = %ctx.channel, attempt = backoff.attempts() + 1, error = %e, "Channel connect failed");
            }
        }

        ctx.link(LinkState::Reconnecting);
        let delay = backoff.next_delay();
        debug!(channel = %ctx.channel, delay_ms = delay.as_millis() as u64, "Reconnect backoff");
        if !wait_or_close(&ctx, delay, &mut cmd_rx).await {
            break;
        }
    }

    debug!(channel = %ctx.channel, "Channel task finished");
}

/// Sleep out a backoff delay. Returns false if the session closed meanwhile.
async fn wait_or_close(ctx: &ChannelContext, delay: Duration, cmd_rx: &mut mpsc::Receiver<ChannelCommand>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Send(_)) => {
                    ctx.notify(SessionEvent::CommandRejected {
                        channel: ctx.channel,
                        message: "not connected".into(),
                    });
                }
                Some(ChannelCommand::Reconnect) => {}
                Some(ChannelCommand::Close) | None => return false,
            }
        }
    }
}

/// Fetch what was missed while disconnected
async fn catch_up(ctx: &ChannelContext, client: &ChannelClient) -> Result<()> {
    match ctx.channel {
        Channel::Room => {
            let room = ctx.data.get_room(ctx.room_id)?;
            if ctx.store.write().await.room.load_snapshot(&room) {
                ctx.changed();
            }
            // Idempotent server-side; marks us online again after a drop
            client
                .send(Command::Room(RoomCommand::JoinRoom {
                    user_id: client.user_id(),
                    nickname: client.nickname().to_string(),
                }))
                .await?;
        }
        Channel::Wheel => {
            let wheel = match ctx.data.get_wheel(ctx.room_id) {
                Ok(wheel) => Some(wheel),
                Err(CoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let history = ctx.data.get_spin_history(ctx.room_id)?;
            ctx.store.write().await.wheel.load_snapshot(wheel, history);
            ctx.changed();
        }
        Channel::Chat => {
            let position = ctx.store.read().await.chat.watermark();
            client
                .send(Command::Chat(ChatCommand::Since { position }))
                .await?;
        }
    }
    debug!(channel = %ctx.channel, "Caught up");
    Ok(())
}

async fn run_connected(
    ctx: &ChannelContext,
    mut client: ChannelClient,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
) -> Exit {
    if let Err(e) = catch_up(ctx, &client).await {
        warn!(channel = %ctx.channel, error = %e, "Catch-up failed");
        ctx.notify(SessionEvent::ResyncFailed {
            channel: ctx.channel,
            message: e.to_string(),
        });
    }

    // Chat catch-up already asked for a backlog
    let mut backlog_pending = ctx.channel == Channel::Chat;
    let mut watchdog: Option<(Uuid, Instant)> = None;

    loop {
        let deadline = watchdog.map(|(_, at)| at);

        tokio::select! {
            event = client.next_event() => match event {
                Some(ChannelEvent::Event(Event::Error { message })) => {
                    debug!(channel = %ctx.channel, message = %message, "Command rejected");
                    ctx.notify(SessionEvent::CommandRejected {
                        channel: ctx.channel,
                        message,
                    });
                }
                Some(ChannelEvent::Event(event)) => {
                    let (changed, gap) = {
                        let mut store = ctx.store.write().await;
                        let changed = store.apply_from(ctx.channel, &event);
                        match &event {
                            Event::Wheel(WheelBroadcast::SpinStarted { spin_id, .. }) => {
                                if !store.wheel.has_result(*spin_id) {
                                    watchdog = Some((*spin_id, Instant::now() + ctx.options.spin_result_timeout));
                                }
                            }
                            Event::Wheel(WheelBroadcast::SpinResult { result }) => {
                                if watchdog.is_some_and(|(id, _)| id == result.id) {
                                    watchdog = None;
                                }
                            }
                            Event::Chat(ChatBroadcast::Backlog { .. }) => backlog_pending = false,
                            _ => {}
                        }
                        let gap = store.chat.has_gap().then(|| store.chat.watermark());
                        (changed, gap)
                    };
                    if changed {
                        ctx.changed();
                    }

                    if let (Channel::Chat, Some(position), false) = (ctx.channel, gap, backlog_pending) {
                        debug!(position, "Chat gap, requesting backlog");
                        if client.send(Command::Chat(ChatCommand::Since { position })).await.is_ok() {
                            backlog_pending = true;
                        }
                    }
                }
                Some(ChannelEvent::ServerShutdown) => {
                    info!(channel = %ctx.channel, "Server shutting down");
                }
                Some(ChannelEvent::Disconnected) | None => return Exit::Lost,
            },

            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Send(command)) => {
                    if let Err(e) = client.send(command).await {
                        ctx.notify(SessionEvent::CommandRejected {
                            channel: ctx.channel,
                            message: e.to_string(),
                        });
                    }
                }
                Some(ChannelCommand::Reconnect) => {
                    client.disconnect().await;
                    return Exit::Lost;
                }
                Some(ChannelCommand::Close) | None => {
                    client.disconnect().await;
                    return Exit::Closed;
                }
            },

            _ = sleep_until(deadline) => {
                if let Some((spin_id, _)) = watchdog.take() {
                    let degraded = ctx.store.write().await.wheel.degrade(spin_id);
                    if degraded {
                        warn!(spin_id = %spin_id, "Spin result overdue, resyncing");
                        ctx.changed();
                        ctx.notify(SessionEvent::SpinTimedOut { spin_id });
                        client.disconnect().await;
                        return Exit::Lost;
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinroom_core::{RoomHub, TokenRegistry, Visibility};
    use spinroom_net::{Message, Server, ServerOptions};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const WAIT: Duration = Duration::from_secs(3);

    fn fast_options(addr: SocketAddr) -> SessionOptions {
        SessionOptions {
            server_addr: addr,
            reconnect_base_delay: Duration::from_millis(50),
            reconnect_max_delay: Duration::from_millis(200),
            spin_result_timeout: Duration::from_millis(300),
        }
    }

    struct World {
        server: Server,
        hub: Arc<RoomHub>,
        tokens: Arc<TokenRegistry>,
        host: Identity,
        room_id: Uuid,
    }

    async fn world() -> World {
        let hub = Arc::new(RoomHub::new());
        let tokens = Arc::new(TokenRegistry::new());
        let host = Identity::new("host");
        let room = hub.create_room(&host, "Friday Draw", Visibility::Public).unwrap();
        hub.create_default_wheel(&host, room.id).unwrap();

        let server = Server::start(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            hub.clone(),
            tokens.clone(),
            ServerOptions::default(),
        )
        .await
        .unwrap();

        World {
            server,
            hub,
            tokens,
            host,
            room_id: room.id,
        }
    }

    impl World {
        fn session(&self, identity: &Identity) -> RoomSession {
            let token = self.tokens.issue(identity.clone());
            RoomSession::start(
                identity.clone(),
                token,
                self.room_id,
                self.hub.clone(),
                fast_options(self.server.addr()),
            )
        }
    }

    async fn all_online(session: &RoomSession, count: usize) -> bool {
        session
            .wait_until(WAIT, |s| {
                let people = s.room.participants();
                people.len() == count && people.iter().all(|p| p.is_online())
            })
            .await
    }

    #[tokio::test]
    async fn test_session_syncs_spin_to_every_member() {
        let w = world().await;
        let guest = Identity::new("guest");
        w.hub.join_room(&guest, &w.hub.get_room(w.room_id).unwrap().code, "guest").unwrap();

        let host = w.session(&w.host);
        let guest_session = w.session(&guest);
        assert!(all_online(&host, 2).await);
        assert!(all_online(&guest_session, 2).await);
        assert!(host.wait_until(WAIT, |s| s.wheel.wheel().is_some()).await);

        host.spin(2024).await.unwrap();

        for session in [&host, &guest_session] {
            assert!(session.wait_until(WAIT, |s| s.wheel.history().len() == 1).await);
        }
        let host_result = host.read(|s| s.wheel.last_result().cloned()).await.unwrap();
        let guest_result = guest_session.read(|s| s.wheel.last_result().cloned()).await.unwrap();
        assert_eq!(host_result, guest_result);
        assert_eq!(host_result.seed, 2024);

        host.close().await;
        guest_session.close().await;
        w.server.shutdown();
    }

    #[tokio::test]
    async fn test_host_leaving_hands_over_in_every_projection() {
        let w = world().await;
        let code = w.hub.get_room(w.room_id).unwrap().code;
        let first = Identity::new("first");
        let second = Identity::new("second");
        w.hub.join_room(&first, &code, "first").unwrap();
        w.hub.join_room(&second, &code, "second").unwrap();

        let host = w.session(&w.host);
        let first_session = w.session(&first);
        let second_session = w.session(&second);
        for session in [&host, &first_session, &second_session] {
            assert!(all_online(session, 3).await);
        }

        host.leave().await.unwrap();

        for session in [&first_session, &second_session] {
            let handed_over = session
                .wait_until(WAIT, |s| {
                    s.room.participants().len() == 2
                        && s.room.host_count() == 1
                        && s.room.host().map(|p| p.user_id) == Some(first.user_id)
                })
                .await;
            assert!(handed_over, "{} never saw the handover", session.identity().nickname);
        }
        assert_eq!(
            first_session.read(|s| s.room.participants().iter().map(|p| p.user_id).collect::<Vec<_>>()).await,
            second_session.read(|s| s.room.participants().iter().map(|p| p.user_id).collect::<Vec<_>>()).await,
        );

        first_session.close().await;
        second_session.close().await;
        w.server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnected_mid_spin_resyncs_identically() {
        let w = world().await;
        let guest = Identity::new("guest");
        w.hub.join_room(&guest, &w.hub.get_room(w.room_id).unwrap().code, "guest").unwrap();

        let host = w.session(&w.host);
        let mut options = fast_options(w.server.addr());
        options.reconnect_base_delay = Duration::from_millis(400);
        let guest_session = RoomSession::start(
            guest.clone(),
            w.tokens.issue(guest.clone()),
            w.room_id,
            w.hub.clone(),
            options,
        );
        assert!(all_online(&host, 2).await);
        assert!(all_online(&guest_session, 2).await);
        assert!(guest_session.wait_until(WAIT, |s| s.wheel.wheel().is_some()).await);

        // Guest drops off the wheel channel before the spin starts
        guest_session.reconnect(Channel::Wheel).await.unwrap();
        let deadline = Instant::now() + WAIT;
        while w.server.subscriber_count(w.room_id, Channel::Wheel).await != 1 {
            assert!(Instant::now() < deadline, "guest never dropped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        host.spin(7).await.unwrap();
        assert!(host.wait_until(WAIT, |s| s.wheel.history().len() == 1).await);
        assert!(guest_session.wait_until(WAIT, |s| s.wheel.history().len() == 1).await);

        // Converges to exactly what the connected client holds
        let mut converged = false;
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if host.state().await == guest_session.state().await {
                converged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(converged, "guest state diverged after resync");
        assert!(!guest_session.read(|s| s.wheel.is_degraded()).await);

        host.close().await;
        guest_session.close().await;
        w.server.shutdown();
    }

    #[tokio::test]
    async fn test_player_spin_is_rejected_to_sender_only() {
        let w = world().await;
        let guest = Identity::new("guest");
        w.hub.join_room(&guest, &w.hub.get_room(w.room_id).unwrap().code, "guest").unwrap();

        let mut guest_session = w.session(&guest);
        assert!(guest_session.wait_until(WAIT, |s| s.wheel.wheel().is_some()).await);
        guest_session.spin(1).await.unwrap();

        let rejected = tokio::time::timeout(WAIT, async {
            while let Some(event) = guest_session.next_event().await {
                if let SessionEvent::CommandRejected { channel, .. } = event {
                    return channel;
                }
            }
            panic!("session events ended");
        })
        .await
        .unwrap();
        assert_eq!(rejected, Channel::Wheel);
        assert!(guest_session.read(|s| s.wheel.history().is_empty()).await);

        guest_session.close().await;
        w.server.shutdown();
    }

    #[tokio::test]
    async fn test_refreshed_token_recovers_authentication_failure() {
        let w = world().await;
        let mut session = RoomSession::start(
            w.host.clone(),
            "expired".into(),
            w.room_id,
            w.hub.clone(),
            fast_options(w.server.addr()),
        );

        let retried = tokio::time::timeout(WAIT, async {
            while let Some(event) = session.next_event().await {
                if event
                    == (SessionEvent::LinkChanged {
                        channel: Channel::Room,
                        state: LinkState::Reconnecting,
                    })
                {
                    return;
                }
            }
        })
        .await;
        assert!(retried.is_ok());

        session.set_token(w.tokens.issue(w.host.clone())).await;
        assert!(all_online(&session, 1).await);

        session.close().await;
        w.server.shutdown();
    }

    #[tokio::test]
    async fn test_chat_reaches_other_members() {
        let w = world().await;
        let guest = Identity::new("guest");
        let host = w.session(&w.host);
        let guest_session = w.session(&guest);
        assert!(all_online(&host, 2).await);

        guest_session.send_message("hello there").await.unwrap();
        guest_session.send_emoji("🎉").await.unwrap();

        assert!(
            host.wait_until(WAIT, |s| {
                s.chat.events().any(|e| e.content == "hello there") && s.chat.events().any(|e| e.content == "🎉")
            })
            .await
        );

        host.close().await;
        guest_session.close().await;
        w.server.shutdown();
    }

    async fn read_message(stream: &mut TcpStream) -> Message {
        let len = stream.read_u32().await.unwrap();
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await.unwrap();
        Message::from_bytes(&payload).unwrap()
    }

    async fn write_message(stream: &mut TcpStream, msg: &Message) {
        let bytes = msg.to_bytes().unwrap();
        stream.write_u32(bytes.len() as u32).await.unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_spin_result_degrades_then_resyncs() {
        let hub = Arc::new(RoomHub::new());
        let host = Identity::new("host");
        let room = hub.create_room(&host, "r", Visibility::Private).unwrap();

        // A server that starts a spin and never finishes it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let user_id = host.user_id;
        tokio::spawn(async move {
            let mut open = Vec::new();
            let mut spun = false;
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let Message::Hello { channel, room_id, .. } = read_message(&mut stream).await else {
                    continue;
                };
                write_message(
                    &mut stream,
                    &Message::Welcome {
                        channel,
                        room_id,
                        user_id,
                        nickname: "host".into(),
                    },
                )
                .await;
                if channel == Channel::Wheel && !spun {
                    spun = true;
                    write_message(
                        &mut stream,
                        &Message::Event(Event::Wheel(WheelBroadcast::SpinStarted {
                            spin_id: Uuid::new_v4(),
                            seed: 1,
                            spinner_nickname: "host".into(),
                        })),
                    )
                    .await;
                }
                open.push(stream);
            }
        });

        let mut session = RoomSession::start(host, "t".into(), room.id, hub, fast_options(addr));
        let timed_out = tokio::time::timeout(WAIT, async {
            while let Some(event) = session.next_event().await {
                if let SessionEvent::SpinTimedOut { .. } = event {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(timed_out);

        // The resync after reconnect clears the degraded state
        assert!(session.wait_until(WAIT, |s| !s.wheel.is_degraded()).await);
        session.close().await;
    }
}
