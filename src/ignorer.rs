//! Host rules for requests that bypass cassettes entirely

use std::collections::HashSet;

use crate::request::Request;

/// Host names treated as the local machine
pub const LOCALHOST_ALIASES: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];

/// Decides which requests skip matching and recording
#[derive(Debug, Clone, Default)]
pub struct RequestIgnorer {
    ignored_hosts: HashSet<String>,
    ignore_localhost: bool,
}

impl RequestIgnorer {
    /// Create an ignorer that ignores nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add hosts to ignore; comparison is case-insensitive and exact
    pub fn ignore_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored_hosts
            .extend(hosts.into_iter().map(|h| h.as_ref().trim().to_ascii_lowercase()));
    }

    /// Toggle ignoring of [`LOCALHOST_ALIASES`]
    pub fn set_ignore_localhost(&mut self, value: bool) {
        self.ignore_localhost = value;
    }

    /// Whether localhost aliases are currently ignored
    #[must_use]
    pub fn ignores_localhost(&self) -> bool {
        self.ignore_localhost
    }

    /// Whether the request should go straight to the real transport
    #[must_use]
    pub fn ignore(&self, request: &Request) -> bool {
        let Some(host) = request.host() else {
            return false;
        };

        if self.ignored_hosts.contains(&host) {
            return true;
        }

        self.ignore_localhost && LOCALHOST_ALIASES.contains(&host.as_str())
    }
}
