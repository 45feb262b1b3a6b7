use crate::infra::{ResolveProjectsDirError, resolve_projects_dir};
use crate::server::{DEFAULT_HEARTBEAT_INTERVAL, ServerConfig};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3737;

/// Local read-only viewer for Claude conversation transcripts.
#[derive(Clone, Debug, Parser)]
#[command(name = "ccview", version, about)]
pub struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "CCVIEW_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Transcript root holding one directory per project.
    /// Defaults to ~/.claude/projects.
    #[arg(long, env = "CLAUDE_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    /// Seconds between heartbeat events on each event stream.
    #[arg(
        long,
        env = "CCVIEW_HEARTBEAT_SECS",
        default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Error)]
pub enum CliConfigError {
    #[error(transparent)]
    ProjectsDir(#[from] ResolveProjectsDirError),
}

impl Cli {
    pub fn into_server_config(self) -> Result<ServerConfig, CliConfigError> {
        let projects_dir = match self.projects_dir {
            Some(dir) => dir,
            None => resolve_projects_dir()?,
        };
        Ok(ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            projects_dir,
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
        })
    }
}
