//! Fleet roster and server selection
//!
//! The roster comes from configuration and never changes during a run. Status
//! (online / available) is derived by probing on every listing and is never
//! stored on a [`Server`].

use crate::error::{ClusterError, Result};
use crate::execution::CommandRunner;
use crate::probe::Probe;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const LOCALHOST: &str = "localhost";
pub const ALL: &str = "all";

/// Whether a server is a real remote host or one of the synthetic targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerKind {
    #[default]
    Remote,
    /// The operator's own machine
    Local,
    /// Fan-out over the whole roster, never a host itself
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    #[serde(rename = "ip", alias = "address")]
    pub address: String,
    #[serde(default)]
    pub is_cluster: bool,
    #[serde(default)]
    pub is_master: bool,
    #[serde(skip)]
    pub kind: ServerKind,
}

impl Server {
    pub fn remote(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            is_cluster: true,
            is_master: false,
            kind: ServerKind::Remote,
        }
    }

    pub fn localhost() -> Self {
        Self {
            name: LOCALHOST.to_string(),
            address: String::new(),
            is_cluster: true,
            is_master: false,
            kind: ServerKind::Local,
        }
    }

    pub fn all() -> Self {
        Self {
            name: ALL.to_string(),
            address: String::new(),
            is_cluster: false,
            is_master: false,
            kind: ServerKind::All,
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind == ServerKind::Local
    }

    pub fn is_all(&self) -> bool {
        self.kind == ServerKind::All
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derived status, recomputed on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub online: bool,
    /// `None` when it cannot be inferred (offline or probe failure)
    pub available: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub server: Server,
    pub status: ServerStatus,
}

/// Which servers a selection offers and which of them are selectable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionFilter {
    pub include_local: bool,
    pub include_all: bool,
    pub online_only: bool,
    pub available_only: bool,
    pub busy_only: bool,
}

impl SelectionFilter {
    pub fn online() -> Self {
        Self { online_only: true, ..Self::default() }
    }

    /// Online and not running a job, remote hosts only
    pub fn available() -> Self {
        Self { online_only: true, available_only: true, ..Self::default() }
    }

    pub fn with_local(mut self) -> Self {
        self.include_local = true;
        self
    }

    pub fn with_all(mut self) -> Self {
        self.include_all = true;
        self
    }

    pub fn busy(mut self) -> Self {
        self.busy_only = true;
        self
    }

    /// Why an entry cannot be picked, `None` when it can
    pub fn disabled_reason(&self, entry: &ServerEntry) -> Option<&'static str> {
        if self.online_only && !entry.status.online {
            Some("Offline")
        } else if self.available_only && entry.status.available != Some(true) {
            Some("Busy")
        } else if self.busy_only && entry.status.available != Some(false) {
            Some("Not Busy")
        } else {
            None
        }
    }
}

/// One row offered to a [`ServerSelector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChoice {
    pub name: String,
    pub disabled: Option<&'static str>,
}

/// Picks a server when an operation was not given one explicitly
#[allow(async_fn_in_trait)]
pub trait ServerSelector {
    /// Return the name of the chosen server
    async fn select(&self, choices: &[SelectionChoice]) -> Result<String>;
}

/// Immutable roster plus the synthetic `localhost` and `all` targets
#[derive(Debug)]
pub struct ServerRegistry<R> {
    roster: Vec<Server>,
    probe: Probe<R>,
}

impl<R: CommandRunner> ServerRegistry<R> {
    /// Validate that names are unique across the roster and synthetic targets
    pub fn new(roster: Vec<Server>, probe: Probe<R>) -> Result<Self> {
        let mut seen: Vec<&str> = vec![LOCALHOST, ALL];
        for server in &roster {
            if seen.contains(&server.name.as_str()) {
                return Err(ClusterError::ServerLookup(format!(
                    "the server name {} is defined more than once",
                    server.name
                )));
            }
            seen.push(&server.name);
        }

        let roster = roster
            .into_iter()
            .map(|s| Server { kind: ServerKind::Remote, ..s })
            .collect();
        Ok(Self { roster, probe })
    }

    pub fn roster(&self) -> &[Server] {
        &self.roster
    }

    pub fn probe(&self) -> &Probe<R> {
        &self.probe
    }

    /// Exact match against the roster and synthetic targets, never probes
    pub fn get_server(&self, id: &str) -> Result<Server> {
        match id {
            LOCALHOST => return Ok(Server::localhost()),
            ALL => return Ok(Server::all()),
            _ => {}
        }

        let matches: Vec<&Server> = self.roster.iter().filter(|s| s.name == id).collect();
        match matches.as_slice() {
            [server] => Ok((*server).clone()),
            [] => Err(ClusterError::ServerLookup(format!("the server {id} could not be found"))),
            _ => Err(ClusterError::ServerLookup(format!(
                "the server {id} matched {} entries",
                matches.len()
            ))),
        }
    }

    /// The single roster entry flagged as master
    pub fn get_master(&self) -> Result<Server> {
        let masters: Vec<&Server> = self.roster.iter().filter(|s| s.is_master).collect();
        match masters.as_slice() {
            [master] => Ok((*master).clone()),
            [] => Err(ClusterError::ServerLookup("no master server is configured".to_string())),
            _ => Err(ClusterError::ServerLookup(format!(
                "{} servers are flagged as master",
                masters.len()
            ))),
        }
    }

    /// Fresh status of one server
    pub async fn status(&self, server: &Server) -> ServerStatus {
        match server.kind {
            ServerKind::All => ServerStatus { online: true, available: Some(true) },
            ServerKind::Local => ServerStatus {
                online: true,
                available: self.probe.is_available(true, server).await,
            },
            ServerKind::Remote => {
                let online = self.probe.is_online(server).await;
                ServerStatus { online, available: self.probe.is_available(online, server).await }
            }
        }
    }

    /// Probe every roster entry one after the other, optionally surrounded by
    /// `localhost` (first) and `all` (last)
    pub async fn list_servers(&self, include_local: bool, include_all: bool) -> Vec<ServerEntry> {
        let mut entries = Vec::with_capacity(self.roster.len() + 2);

        if include_local {
            let server = Server::localhost();
            let status = self.status(&server).await;
            entries.push(ServerEntry { server, status });
        }

        for server in &self.roster {
            let status = self.status(server).await;
            debug!("{}: online={} available={:?}", server.name, status.online, status.available);
            entries.push(ServerEntry { server: server.clone(), status });
        }

        if include_all {
            let server = Server::all();
            let status = ServerStatus { online: true, available: Some(true) };
            entries.push(ServerEntry { server, status });
        }

        entries
    }

    /// List servers under `filter` and let the selector pick one
    pub async fn select<S: ServerSelector>(&self, selector: &S, filter: SelectionFilter) -> Result<Server> {
        let entries = self.list_servers(filter.include_local, filter.include_all).await;
        let choices: Vec<SelectionChoice> = entries
            .iter()
            .map(|entry| SelectionChoice {
                name: entry.server.name.clone(),
                disabled: filter.disabled_reason(entry),
            })
            .collect();

        let name = selector.select(&choices).await?;
        match choices.iter().find(|c| c.name == name) {
            Some(SelectionChoice { disabled: Some(reason), .. }) => Err(ClusterError::Prompt(format!(
                "{name} cannot be selected ({reason})"
            ))),
            Some(_) => self.get_server(&name),
            None => Err(ClusterError::ServerLookup(format!("{name} was not offered for selection"))),
        }
    }
}
