//! SSH argument composition
//!
//! Builds argument vectors for `ssh`, `scp` and `ssh-copy-id`. Hosts are given
//! as [`Arg::Host`] and replaced in place by their `name@address` form; every
//! other argument passes through untouched and in the same position.

use crate::servers::Server;

/// One positional argument of a transport command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(String),
    Host(Server),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Literal(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Literal(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Literal(value.clone())
    }
}

impl From<&Server> for Arg {
    fn from(value: &Server) -> Self {
        Arg::Host(value.clone())
    }
}

impl From<Server> for Arg {
    fn from(value: Server) -> Self {
        Arg::Host(value)
    }
}

/// Build a `Vec<Arg>` from hosts and strings, keeping their order
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::ssh::Arg::from($arg)),*]
    };
}

/// Composes transport arguments around a fixed identity file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshArgs {
    identity: String,
}

impl SshArgs {
    pub fn new(identity: impl Into<String>) -> Self {
        Self { identity: identity.into() }
    }

    /// `name@address`
    pub fn addr(server: &Server) -> String {
        format!("{}@{}", server.name, server.address)
    }

    /// `name@address:path`, the scp form of a remote location
    pub fn remote_target(server: &Server, path: &str) -> String {
        format!("{}:{}", Self::addr(server), path)
    }

    /// Prepend the identity flag pair and substitute hosts in place.
    /// The caller supplies `partial` already in final positional order.
    pub fn build(&self, partial: Vec<Arg>) -> Vec<String> {
        let mut args = Vec::with_capacity(partial.len() + 2);
        args.push("-i".to_string());
        args.push(self.identity.clone());
        for arg in partial {
            match arg {
                Arg::Literal(value) => args.push(value),
                Arg::Host(server) => args.push(Self::addr(&server)),
            }
        }
        args
    }
}
