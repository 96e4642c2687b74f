use std::fmt;

use anyhow::{Context, Result, bail};

/// Listen-endpoint host sentinel meaning "all interfaces".
pub const ANY_HOST: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Port implied by the scheme when an address omits it.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of the proxy: where to listen, or where to fetch content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a positional argument: either a bare port number, or
    /// `[protocol://]host:port`. The port is whatever follows the last
    /// colon; everything before it is the host, which may itself
    /// contain colons.
    pub fn parse(raw: &str, default_host: &str) -> Result<Self> {
        if let Ok(port) = raw.parse::<u16>() {
            return Ok(Self {
                protocol: Protocol::Http,
                host: default_host.to_string(),
                port,
            });
        }

        let (protocol, rest) = if let Some(rest) = raw.strip_prefix("https://") {
            (Protocol::Https, rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            (Protocol::Http, rest)
        } else {
            (Protocol::Http, raw)
        };

        let Some((host, port)) = rest.rsplit_once(':') else {
            bail!("no port in address {raw:?}");
        };
        if host.is_empty() {
            bail!("no host in address {raw:?}");
        }
        let port = port
            .parse::<u16>()
            .with_context(|| format!("invalid port in address {raw:?}"))?;

        Ok(Self {
            protocol,
            host: host.to_string(),
            port,
        })
    }

    /// Host to actually bind: the `*` sentinel maps to all interfaces.
    pub fn bind_host(&self) -> &str {
        if self.host == ANY_HOST {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
