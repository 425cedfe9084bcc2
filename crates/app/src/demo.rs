//! In-process demo: one server, a host and two guests in one room
//!
//! Everything goes through the real TCP channels; the data service is the
//! server's own room hub.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use spinroom_core::{DataService, Identity, RoomHub, TokenRegistry, Visibility};
use spinroom_net::Server;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::session::RoomSession;

const SETTLE: Duration = Duration::from_secs(5);

pub async fn run(config: &AppConfig, spins: u32, seed: u64) -> Result<()> {
    let hub = Arc::new(RoomHub::with_history_capacity(config.server.chat_history_capacity));
    let tokens = Arc::new(TokenRegistry::new());
    let server = Server::start(
        SocketAddr::new(config.server.bind_address, 0),
        hub.clone(),
        tokens.clone(),
        config.server.options(),
    )
    .await?;
    let server_addr = local_addr(server.addr());

    let host = Identity::new("Ada");
    let room = hub.create_room(&host, "Demo Night", Visibility::Public)?;
    hub.create_default_wheel(&host, room.id)?;
    info!(room_id = %room.id, code = %room.code, "Demo room ready");

    let guests = [Identity::new("Grace"), Identity::new("Linus")];
    for guest in &guests {
        hub.join_room(guest, &room.code, &guest.nickname)?;
    }

    let options = config.client.session_options(server_addr);
    let start = |identity: &Identity| {
        RoomSession::start(
            identity.clone(),
            tokens.issue(identity.clone()),
            room.id,
            hub.clone(),
            options.clone(),
        )
    };
    let host_session = start(&host);
    let guest_sessions: Vec<RoomSession> = guests.iter().map(start).collect();

    let everyone = guests.len() + 1;
    host_session
        .wait_until(SETTLE, |s| {
            s.wheel.wheel().is_some() && s.room.participants().iter().filter(|p| p.is_online()).count() == everyone
        })
        .await;

    guest_sessions[0].send_message("good luck everyone").await?;
    guest_sessions[1].send_emoji("🎲").await?;

    for i in 0..spins {
        let target = i as usize + 1;
        host_session.spin(seed.wrapping_add(i as u64)).await?;
        let settled = host_session
            .wait_until(SETTLE, |s| s.wheel.history().len() == target && s.wheel.active_spin().is_none())
            .await;
        if !settled {
            warn!(spin = target, "Spin did not settle in time");
        }
    }

    for session in guest_sessions.iter() {
        session.wait_until(SETTLE, |s| s.wheel.history().len() == spins as usize).await;
    }

    let state = host_session.state().await;
    println!("Room {} ({})", room.name, room.code);
    for p in state.room.participants() {
        println!("  {:<8} {:<9} {:?}", p.nickname, p.role, p.status);
    }
    println!("Spins:");
    for result in state.wheel.history() {
        println!(
            "  {} -> {} (seed {}, {:.1} deg)",
            result.spinner_nickname, result.result, result.seed, result.rotation
        );
    }
    println!("Chat:");
    for event in state.chat.events() {
        let who = event.nickname.as_deref().unwrap_or("*");
        println!("  [{}] {}: {}", event.format_timestamp(), who, event.content);
    }

    let stats = hub.get_statistics(room.id)?;
    println!("Statistics ({} spins):", stats.total_spins);
    for stat in &stats.segment_stats {
        println!("  {:<10} {:>3} {:>6.2}%", stat.text, stat.count, stat.percentage);
    }

    for session in guest_sessions.iter() {
        let agrees = session.read(|s| s.wheel.history() == state.wheel.history()).await;
        println!("{} agrees with host: {}", session.identity().nickname, agrees);
    }

    let mut guest_sessions = guest_sessions;
    if let Some(leaver) = guest_sessions.pop() {
        leaver.leave().await?;
    }
    for session in guest_sessions {
        session.close().await;
    }
    host_session.close().await;
    server.shutdown();
    Ok(())
}

/// Address clients should dial for a server bound to `addr`
fn local_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        let loopback = match addr.ip() {
            IpAddr::V4(_) => IpAddr::from([127, 0, 0, 1]),
            IpAddr::V6(_) => IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]),
        };
        SocketAddr::new(loopback, addr.port())
    } else {
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_addr_replaces_unspecified() {
        let any: SocketAddr = "0.0.0.0:7341".parse().unwrap();
        assert_eq!(local_addr(any), "127.0.0.1:7341".parse().unwrap());

        let fixed: SocketAddr = "10.0.0.2:7341".parse().unwrap();
        assert_eq!(local_addr(fixed), fixed);
    }

    #[tokio::test]
    async fn test_demo_runs_to_completion() {
        let mut config = AppConfig::default();
        config.client.reconnect_base_delay_ms = 50;
        run(&config, 2, 11).await.unwrap();
    }
}
