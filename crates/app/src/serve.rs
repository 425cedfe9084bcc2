//! `spinroom serve`: the authoritative room server

use std::sync::Arc;

use spinroom_core::{DataService, Identity, RoomHub, TokenRegistry, Visibility};
use spinroom_net::Server;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;

/// Run until ctrl-c. Opens one public room hosted by a console identity and
/// logs the host token, which a `ChannelClient` presents to attach.
pub async fn run(config: &ServerConfig, room_name: &str) -> Result<()> {
    let hub = Arc::new(RoomHub::with_history_capacity(config.chat_history_capacity));
    let tokens = Arc::new(TokenRegistry::new());
    let server = Server::start(config.socket_addr(), hub.clone(), tokens.clone(), config.options()).await?;

    let host = Identity::new("host");
    let room = hub.create_room(&host, room_name, Visibility::Public)?;
    hub.create_default_wheel(&host, room.id)?;
    let token = tokens.issue(host.clone());

    info!(
        addr = %server.addr(),
        room_id = %room.id,
        code = %room.code,
        user_id = %host.user_id,
        token = %token,
        "Room open"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.shutdown();
    Ok(())
}
