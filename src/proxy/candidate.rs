//! Proxy candidate addresses

use std::fmt;
use std::net::SocketAddrV4;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{GateError, Result};

static IPV4_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d{1,5}$").expect("valid proxy address regex")
});

/// A plain `ipv4:port` HTTP proxy endpoint.
///
/// Two candidates are equal when their string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProxyCandidate(String);

impl ProxyCandidate {
    /// Parse a single list line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if !IPV4_PORT.is_match(line) || line.parse::<SocketAddrV4>().is_err() {
            return Err(GateError::InvalidProxyAddress(line.to_string()));
        }
        Ok(Self(line.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL form passed to yt-dlp and curl
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProxyCandidate {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
