use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Spinroom - shared wheel spins with synchronized chat and presence.
#[derive(Parser, Debug)]
#[command(name = "spinroom", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the room server.
    Serve {
        /// Port override.
        #[arg(short, long)]
        port: Option<u16>,

        /// Name of a public room to open on startup.
        #[arg(long, default_value = "Lobby")]
        room: String,
    },

    /// Run an in-process server with a few simulated members.
    Demo {
        /// Number of spins the host performs.
        #[arg(long, default_value_t = 3)]
        spins: u32,

        /// Seed for the first spin; later spins add one.
        #[arg(long)]
        seed: Option<u64>,
    },
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let args = Args::try_parse_from(["spinroom", "--log-level", "debug", "serve", "-p", "9000"]).unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Command::Serve { port, room } => {
                assert_eq!(port, Some(9000));
                assert_eq!(room, "Lobby");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_demo_defaults() {
        let args = Args::try_parse_from(["spinroom", "demo", "--config", "/tmp/s.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/s.toml")));
        assert!(matches!(args.command, Command::Demo { spins: 3, seed: None }));
    }
}
