//! Command Dispatcher
//!
//! [`CommandHandler`] is shared by every connection. It owns the handles to
//! the keyspace, the pub/sub broker, the replication state and the user
//! registry, and turns one [`Frame`] plus the caller's [`ClientSession`]
//! into an [`Outcome`].
//!
//! ## Dispatch order
//!
//! ```text
//!  frame ──> leader link? ──yes──> apply silently, answer GETACK only
//!               │ no
//!               ▼
//!          auth gate ──> subscribe-mode gate
//!               │
//!               ▼
//!     MULTI / EXEC / DISCARD ──> queue while Queuing
//!               │
//!               ▼
//!     lock keyspace ──> run ──> propagate writes (leader only)
//! ```
//!
//! Everything in `run` happens with the keyspace lock held. `EXEC` takes the
//! lock once for the whole queue, so no other connection observes a state
//! between two queued commands.

use super::data;
use super::error::CommandError;
use super::session::{ClientSession, SessionKind};
use crate::acl::{UserRegistry, DEFAULT_USER};
use crate::config::ServerConfig;
use crate::connection::handler::ConnectionStats;
use crate::connection::outbound::ClientHandle;
use crate::protocol::{Frame, RespValue};
use crate::pubsub::Broker;
use crate::replication::{ReplicationState, Role};
use crate::storage::{Keyspace, StorageEngine};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What the connection should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send one reply.
    Reply(RespValue),
    /// Send several replies in order (one acknowledgement per channel).
    Replies(Vec<RespValue>),
    /// Send nothing.
    Silent,
    /// Send the reply, then close the connection.
    Close(RespValue),
}

impl Outcome {
    /// Collapses the outcome into the single value an `EXEC` array holds.
    fn into_value(self) -> RespValue {
        match self {
            Outcome::Reply(value) | Outcome::Close(value) => value,
            Outcome::Replies(values) => RespValue::array(values),
            Outcome::Silent => RespValue::null(),
        }
    }
}

/// Commands a subscribed session may still issue.
const SUBSCRIBED_COMMANDS: &[&str] = &["SUBSCRIBE", "UNSUBSCRIBE", "PING", "QUIT"];

#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    broker: Arc<Broker>,
    replication: Arc<ReplicationState>,
    users: Arc<UserRegistry>,
    config: Arc<ServerConfig>,
    stats: Arc<ConnectionStats>,
    /// Server start time for INFO command
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(config: Arc<ServerConfig>, replication: Arc<ReplicationState>) -> Self {
        Self::with_stats(config, replication, Arc::new(ConnectionStats::new()))
    }

    pub fn with_stats(
        config: Arc<ServerConfig>,
        replication: Arc<ReplicationState>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            storage: Arc::new(StorageEngine::new()),
            broker: Arc::new(Broker::new()),
            replication,
            users: Arc::new(UserRegistry::new()),
            config,
            stats,
            start_time: Instant::now(),
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn replication(&self) -> &Arc<ReplicationState> {
        &self.replication
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Creates the session for a new connection. Clients start
    /// authenticated only while the default user has `nopass`.
    pub fn new_session(&self, kind: SessionKind, outbound: ClientHandle) -> ClientSession {
        let authenticated = kind != SessionKind::Client || self.users.default_is_open();
        ClientSession::new(kind, outbound, authenticated)
    }

    /// Releases everything the session registered elsewhere.
    pub fn disconnect(&self, session: &mut ClientSession) {
        for channel in std::mem::take(&mut session.channels) {
            self.broker.unsubscribe(&channel, session.id);
        }
        if session.kind == SessionKind::Replica {
            self.replication.detach(session.id);
        }
    }

    /// Executes one frame on behalf of `session`.
    pub fn execute(&self, session: &mut ClientSession, frame: Frame) -> Outcome {
        if frame.is_empty() {
            return Outcome::Silent;
        }
        let name = frame.name();

        if session.kind == SessionKind::LeaderLink {
            return self.apply_from_leader(session, &name, &frame);
        }

        if let Err(err) = self.check_gates(session, &name) {
            return Outcome::Reply(err.into());
        }

        match name.as_str() {
            "MULTI" => Outcome::Reply(if session.begin() {
                RespValue::ok()
            } else {
                CommandError::NestedMulti.into()
            }),
            "EXEC" => match session.take_queue() {
                Some(queue) => {
                    let mut ks = self.storage.lock();
                    let replies = queue
                        .iter()
                        .map(|queued| {
                            self.run(session, &mut ks, &queued.name(), queued)
                                .map_or_else(RespValue::from, Outcome::into_value)
                        })
                        .collect();
                    Outcome::Reply(RespValue::array(replies))
                }
                None => Outcome::Reply(CommandError::ExecWithoutMulti.into()),
            },
            "DISCARD" => Outcome::Reply(match session.take_queue() {
                Some(_) => RespValue::ok(),
                None => CommandError::DiscardWithoutMulti.into(),
            }),
            _ if session.is_queuing() => {
                session.queue(frame);
                Outcome::Reply(RespValue::simple_string("QUEUED"))
            }
            _ => {
                let mut ks = self.storage.lock();
                self.run(session, &mut ks, &name, &frame)
                    .unwrap_or_else(|err| Outcome::Reply(err.into()))
            }
        }
    }

    fn check_gates(&self, session: &ClientSession, name: &str) -> Result<(), CommandError> {
        if !session.authenticated && name != "AUTH" {
            return Err(CommandError::NoAuth);
        }
        if session.is_subscribed() && !SUBSCRIBED_COMMANDS.contains(&name) {
            return Err(CommandError::ModeRestriction(name.to_ascii_lowercase()));
        }
        Ok(())
    }

    /// Frames from our leader are applied without replies, except
    /// `REPLCONF GETACK`. The offset reported is the one before this frame.
    fn apply_from_leader(&self, session: &mut ClientSession, name: &str, frame: &Frame) -> Outcome {
        let result = {
            let mut ks = self.storage.lock();
            self.run(session, &mut ks, name, frame)
        };

        let getack = name == "REPLCONF"
            && frame
                .args()
                .first()
                .is_some_and(|sub| sub.eq_ignore_ascii_case(b"GETACK"));

        let outcome = match result {
            Ok(outcome) if getack => outcome,
            Ok(_) => Outcome::Silent,
            Err(err) => {
                debug!(command = name, error = %err, "Replicated command failed");
                Outcome::Silent
            }
        };

        self.replication.record_processed(frame.wire_len());
        outcome
    }

    /// Runs one command with the keyspace locked.
    fn run(
        &self,
        session: &mut ClientSession,
        ks: &mut Keyspace,
        name: &str,
        frame: &Frame,
    ) -> Result<Outcome, CommandError> {
        let args = frame.args();
        match name {
            "PING" => self.cmd_ping(session, args),
            "ECHO" => match args {
                [message] => Ok(Outcome::Reply(RespValue::bulk_string(message.clone()))),
                _ => Err(CommandError::arity("echo")),
            },
            "QUIT" => Ok(Outcome::Close(RespValue::ok())),
            "AUTH" => self.cmd_auth(session, args),
            "ACL" => self.cmd_acl(session, args),
            "SUBSCRIBE" => self.cmd_subscribe(session, args),
            "UNSUBSCRIBE" => Ok(self.cmd_unsubscribe(session, args)),
            "PUBLISH" => match args {
                [channel, message] => Ok(Outcome::Reply(RespValue::integer(
                    self.broker.publish(channel, message.clone()) as i64,
                ))),
                _ => Err(CommandError::arity("publish")),
            },
            "REPLCONF" => self.cmd_replconf(session, args),
            "PSYNC" => self.cmd_psync(session, args),
            "INFO" => Ok(Outcome::Reply(self.cmd_info(ks, args))),
            "CONFIG" => self.cmd_config(args),
            "COMMAND" => Ok(Outcome::Reply(RespValue::array(Vec::new()))),
            _ => self.cmd_data(session, ks, name, frame),
        }
    }

    /// Data commands, plus the replica write guard and propagation.
    fn cmd_data(
        &self,
        session: &ClientSession,
        ks: &mut Keyspace,
        name: &str,
        frame: &Frame,
    ) -> Result<Outcome, CommandError> {
        let write = data::is_write(name);
        if write && session.kind == SessionKind::Client && self.replication.is_replica() {
            return Err(CommandError::ReadOnlyReplica);
        }

        let reply = data::execute(ks, frame, data::unix_millis())?;

        if write && !self.replication.is_replica() {
            match (name, &reply) {
                // Replicas must store the id this leader generated.
                ("XADD", RespValue::BulkString(id)) => self
                    .replication
                    .propagate(&frame.clone().with_part(2, id.clone())),
                _ => self.replication.propagate(frame),
            }
        }
        Ok(Outcome::Reply(reply))
    }

    // ========================================================================
    // Connection and authentication
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, session: &ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        let reply = match args {
            [] if session.is_subscribed() => RespValue::bulk_array(["pong", ""]),
            [] => RespValue::pong(),
            [message] => RespValue::bulk_string(message.clone()),
            _ => return Err(CommandError::arity("ping")),
        };
        Ok(Outcome::Reply(reply))
    }

    /// AUTH [username] password
    fn cmd_auth(&self, session: &mut ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        let (username, password) = match args {
            [password] => (DEFAULT_USER.to_string(), password),
            [username, password] => (String::from_utf8_lossy(username).into_owned(), password),
            _ => return Err(CommandError::arity("auth")),
        };

        if !self.users.authenticate(&username, password) {
            debug!(client_id = session.id, user = %username, "Authentication failed");
            return Err(CommandError::WrongPass);
        }
        session.authenticated = true;
        session.username = username;
        Ok(Outcome::Reply(RespValue::ok()))
    }

    /// ACL SETUSER | GETUSER | WHOAMI
    fn cmd_acl(&self, session: &ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        let subcommand = match args.first() {
            Some(sub) => String::from_utf8_lossy(sub).to_ascii_uppercase(),
            None => return Err(CommandError::arity("acl")),
        };

        let reply = match (subcommand.as_str(), &args[1..]) {
            ("WHOAMI", []) => RespValue::bulk_string(session.username.clone()),
            ("SETUSER", [username, rules @ ..]) => {
                let rules: Vec<String> = rules
                    .iter()
                    .map(|rule| String::from_utf8_lossy(rule).into_owned())
                    .collect();
                self.users
                    .set_user(&String::from_utf8_lossy(username), &rules)?;
                RespValue::ok()
            }
            ("GETUSER", [username]) => match self.users.get_user(&String::from_utf8_lossy(username)) {
                Some(user) => RespValue::array(vec![
                    RespValue::bulk_string("flags"),
                    RespValue::bulk_array(user.flags),
                    RespValue::bulk_string("passwords"),
                    RespValue::bulk_array(user.passwords),
                ]),
                None => RespValue::null(),
            },
            ("WHOAMI" | "SETUSER" | "GETUSER", _) => {
                return Err(CommandError::arity(&format!("acl|{}", subcommand)))
            }
            _ => return Err(CommandError::UnknownSubcommand(subcommand, "ACL")),
        };
        Ok(Outcome::Reply(reply))
    }

    // ========================================================================
    // Pub/Sub
    // ========================================================================

    fn subscription_ack(kind: &'static str, channel: RespValue, count: usize) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk_string(kind),
            channel,
            RespValue::integer(count as i64),
        ])
    }

    /// SUBSCRIBE channel [channel ...]
    fn cmd_subscribe(&self, session: &mut ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        if args.is_empty() {
            return Err(CommandError::arity("subscribe"));
        }

        let acks = args
            .iter()
            .map(|channel| {
                if session.channels.insert(channel.clone()) {
                    self.broker.subscribe(channel.clone(), &session.outbound);
                }
                Self::subscription_ack(
                    "subscribe",
                    RespValue::bulk_string(channel.clone()),
                    session.channels.len(),
                )
            })
            .collect();
        Ok(Outcome::Replies(acks))
    }

    /// UNSUBSCRIBE [channel ...]. Without arguments, leaves every channel.
    fn cmd_unsubscribe(&self, session: &mut ClientSession, args: &[Bytes]) -> Outcome {
        let channels: Vec<Bytes> = if args.is_empty() {
            session.channels.iter().cloned().collect()
        } else {
            args.to_vec()
        };

        if channels.is_empty() {
            return Outcome::Reply(Self::subscription_ack("unsubscribe", RespValue::null(), 0));
        }

        let acks = channels
            .into_iter()
            .map(|channel| {
                session.channels.remove(&channel);
                self.broker.unsubscribe(&channel, session.id);
                Self::subscription_ack(
                    "unsubscribe",
                    RespValue::bulk_string(channel),
                    session.channels.len(),
                )
            })
            .collect();
        Outcome::Replies(acks)
    }

    // ========================================================================
    // Replication
    // ========================================================================

    /// REPLCONF listening-port <port> | capa <cap> | ACK <offset> | GETACK *
    fn cmd_replconf(&self, session: &mut ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        let option = match args.first() {
            Some(option) => String::from_utf8_lossy(option).to_ascii_lowercase(),
            None => return Err(CommandError::arity("replconf")),
        };
        let value = args.get(1).map(|v| String::from_utf8_lossy(v).into_owned());

        match (option.as_str(), value) {
            ("listening-port", Some(port)) => {
                let port = port.parse().map_err(|_| CommandError::NotInteger)?;
                session.listening_port = Some(port);
                Ok(Outcome::Reply(RespValue::ok()))
            }
            ("capa", Some(_)) => Ok(Outcome::Reply(RespValue::ok())),
            ("ack", Some(offset)) => {
                let offset = offset.parse().map_err(|_| CommandError::NotInteger)?;
                self.replication.record_ack(session.id, offset);
                Ok(Outcome::Silent)
            }
            ("getack", _) => Ok(Outcome::Reply(RespValue::bulk_array([
                "REPLCONF".to_string(),
                "ACK".to_string(),
                self.replication.offset().to_string(),
            ]))),
            _ => Err(CommandError::Syntax),
        }
    }

    /// PSYNC <replid> <offset>. Always answered with a full resync.
    fn cmd_psync(&self, session: &mut ClientSession, args: &[Bytes]) -> Result<Outcome, CommandError> {
        if self.replication.is_replica() {
            return Err(CommandError::NotLeader);
        }
        if args.len() != 2 {
            return Err(CommandError::arity("psync"));
        }

        info!(client_id = session.id, port = ?session.listening_port, "Replica requested full resync");
        if self
            .replication
            .full_resync(&session.outbound, session.listening_port)
        {
            session.kind = SessionKind::Replica;
        } else {
            warn!(client_id = session.id, "Could not queue resync, dropping replica");
            session.outbound.evict();
        }
        Ok(Outcome::Silent)
    }

    // ========================================================================
    // Server
    // ========================================================================

    /// INFO [section]
    fn cmd_info(&self, ks: &Keyspace, args: &[Bytes]) -> RespValue {
        let section = args
            .first()
            .map(|s| String::from_utf8_lossy(s).to_ascii_lowercase());
        let wanted = |name: &str| match section.as_deref() {
            None | Some("all") | Some("everything") | Some("default") => true,
            Some(s) => s == name,
        };

        let mut sections = Vec::new();

        if wanted("server") {
            sections.push(format!(
                "# Server\r\n\
                 redwire_version:{}\r\n\
                 os:{}\r\n\
                 tcp_port:{}\r\n\
                 uptime_in_seconds:{}\r\n",
                crate::VERSION,
                std::env::consts::OS,
                self.config.port,
                self.start_time.elapsed().as_secs(),
            ));
        }

        if wanted("replication") {
            let mut lines = vec![format!("role:{}", self.replication.role().as_str())];
            match self.replication.role() {
                Role::Replica { leader } => {
                    lines.push(format!("master_host:{}", leader.host));
                    lines.push(format!("master_port:{}", leader.port));
                    lines.push("connected_slaves:0".to_string());
                }
                Role::Leader => {
                    let replicas = self.replication.replicas();
                    lines.push(format!("connected_slaves:{}", replicas.len()));
                    for (i, replica) in replicas.iter().enumerate() {
                        lines.push(format!(
                            "slave{}:id={},port={},offset={}",
                            i,
                            replica.id,
                            replica.listening_port.unwrap_or(0),
                            replica.ack_offset
                        ));
                    }
                }
            }
            lines.push(format!("master_replid:{}", self.replication.repl_id()));
            lines.push(format!("master_repl_offset:{}", self.replication.offset()));
            sections.push(format!("# Replication\r\n{}\r\n", lines.join("\r\n")));
        }

        if wanted("stats") {
            sections.push(format!(
                "# Stats\r\n\
                 total_connections_received:{}\r\n\
                 connected_clients:{}\r\n\
                 total_commands_processed:{}\r\n\
                 total_net_input_bytes:{}\r\n\
                 total_net_output_bytes:{}\r\n\
                 pubsub_channels:{}\r\n",
                self.stats.connections_accepted.load(Ordering::Relaxed),
                self.stats.active_connections.load(Ordering::Relaxed),
                self.stats.commands_processed.load(Ordering::Relaxed),
                self.stats.bytes_read.load(Ordering::Relaxed),
                self.stats.bytes_written.load(Ordering::Relaxed),
                self.broker.channel_count(),
            ));
        }

        if wanted("keyspace") {
            sections.push(format!(
                "# Keyspace\r\ndb0:keys={},expires={}\r\n",
                ks.len(),
                ks.expires()
            ));
        }

        RespValue::bulk_string(sections.join("\r\n"))
    }

    /// CONFIG GET parameter [parameter ...]
    fn cmd_config(&self, args: &[Bytes]) -> Result<Outcome, CommandError> {
        let subcommand = match args.first() {
            Some(sub) => String::from_utf8_lossy(sub).to_ascii_uppercase(),
            None => return Err(CommandError::arity("config")),
        };
        if subcommand != "GET" {
            return Err(CommandError::UnknownSubcommand(subcommand, "CONFIG"));
        }
        if args.len() < 2 {
            return Err(CommandError::arity("config|get"));
        }

        let mut pairs = Vec::new();
        for parameter in &args[1..] {
            let value = match String::from_utf8_lossy(parameter).to_ascii_lowercase().as_str() {
                "dir" => &self.config.dir,
                "dbfilename" => &self.config.dbfilename,
                _ => continue,
            };
            pairs.push(RespValue::bulk_string(parameter.clone()));
            pairs.push(RespValue::bulk_string(value.clone()));
        }
        Ok(Outcome::Reply(RespValue::array(pairs)))
    }
}
