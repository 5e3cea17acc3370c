//! Server Configuration
//!
//! [`ServerConfig`] holds every value the server reads at runtime. The
//! command line ([`Args`]) is one way to build it; tests construct it
//! directly.

use clap::Parser;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Address of the leader a replica follows, given as `"<host> <port>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for LeaderAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) => (host, port),
            _ => return Err(format!("expected \"<host> <port>\", got {:?}", s)),
        };
        let port = port
            .parse()
            .map_err(|e| format!("invalid leader port {:?}: {}", port, e))?;
        Ok(LeaderAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for LeaderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Leader to replicate from; `None` runs as a leader
    pub replica_of: Option<LeaderAddr>,
    /// Snapshot directory, reported by `CONFIG GET dir`
    pub dir: String,
    /// Snapshot file name, reported by `CONFIG GET dbfilename`
    pub dbfilename: String,
    /// Close clients idle for this long
    pub idle_timeout: Option<Duration>,
    /// Deadline for a single write to any peer
    pub write_timeout: Duration,
    /// Deadline for each replication handshake step
    pub repl_timeout: Duration,
    /// Outbound queue length per connection, in encoded replies
    pub output_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            replica_of: None,
            dir: "/tmp/redis-files".to_string(),
            dbfilename: "dump.rdb".to_string(),
            idle_timeout: None,
            write_timeout: Duration::from_secs(10),
            repl_timeout: Duration::from_secs(60),
            output_buffer: 1024,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_replica(&self) -> bool {
        self.replica_of.is_some()
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "In-memory data-structure server")]
pub struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 6379)]
    pub port: u16,

    /// Replicate from a leader, e.g. --replicaof "localhost 6379"
    #[arg(long)]
    pub replicaof: Option<LeaderAddr>,

    /// Snapshot directory (reported by CONFIG GET)
    #[arg(long, default_value = "/tmp/redis-files")]
    pub dir: String,

    /// Snapshot file name (reported by CONFIG GET)
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// Close clients after this many idle seconds; 0 disables
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Queued replies per connection before a slow peer is dropped
    #[arg(long, default_value_t = 1024)]
    pub output_buffer: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            replica_of: args.replicaof,
            dir: args.dir,
            dbfilename: args.dbfilename,
            idle_timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            output_buffer: args.output_buffer,
            ..ServerConfig::default()
        }
    }
}
