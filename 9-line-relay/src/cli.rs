use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    hub::{DEFAULT_PORT, HubConfig},
    relay::DEFAULT_UPSTREAM_PORT,
    service::DEFAULT_GREETING,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast hub, accepting TCP line clients.
    Hub(HubArgs),
    /// Bridge an upstream line service to a hub, forwarding lines both ways.
    Relay(RelayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HubArgs {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:9998")]
    pub listen: SocketAddr,

    /// Milliseconds between idle ticks.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub idle_ms: u64,

    /// Line sent to every client when it connects.
    #[arg(long, default_value = DEFAULT_GREETING)]
    pub greeting: String,
}

impl HubArgs {
    pub fn config(&self) -> HubConfig {
        HubConfig {
            listen: self.listen,
            idle_period: Duration::from_millis(self.idle_ms),
            greeting: self.greeting.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Upstream line service, `host` or `host:port` (default port 9999).
    #[arg(long)]
    pub upstream: Endpoint,

    /// Hub to bridge to, `host` or `host:port` (default port 9998).
    #[arg(long)]
    pub hub: Endpoint,
}

impl RelayArgs {
    pub fn upstream(&self) -> (&str, u16) {
        self.upstream.with_default_port(DEFAULT_UPSTREAM_PORT)
    }

    pub fn hub(&self) -> (&str, u16) {
        self.hub.with_default_port(DEFAULT_PORT)
    }
}

/// A host with an optional port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn with_default_port(&self, port: u16) -> (&str, u16) {
        (self.host.as_str(), self.port.unwrap_or(port))
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("endpoint cannot be empty".to_string());
        }

        // A bare IPv6 address has several colons and no port.
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|err| format!("invalid port '{port}': {err}"))?;
                (host, Some(port))
            }
            _ => (s, None),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("missing host in '{s}'"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.host.contains(':') => write!(f, "[{}]:{port}", self.host),
            Some(port) => write!(f, "{}:{port}", self.host),
            None => f.write_str(&self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_with_and_without_port() {
        let bare: Endpoint = "upstream.local".parse().unwrap();
        assert_eq!(bare.with_default_port(9999), ("upstream.local", 9999));

        let explicit: Endpoint = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(explicit.with_default_port(9999), ("127.0.0.1", 4000));

        let v6: Endpoint = "[::1]:4000".parse().unwrap();
        assert_eq!(v6.with_default_port(1), ("::1", 4000));
        assert_eq!(v6.to_string(), "[::1]:4000");

        let bare_v6: Endpoint = "::1".parse().unwrap();
        assert_eq!(bare_v6.with_default_port(9998), ("::1", 9998));
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!("".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
    }

    #[test]
    fn hub_defaults() {
        let cli = Cli::try_parse_from(["line_relay", "hub"]).unwrap();
        let Command::Hub(args) = cli.command else {
            panic!("expected hub subcommand");
        };
        let config = args.config();
        assert_eq!(config.listen, HubConfig::default().listen);
        assert_eq!(config.idle_period, Duration::from_millis(100));
        assert_eq!(config.greeting, "Hello");
    }

    #[test]
    fn greeting_flows_into_config() {
        let cli = Cli::try_parse_from(["line_relay", "hub", "--greeting", "Welcome in"]).unwrap();
        let Command::Hub(args) = cli.command else {
            panic!("expected hub subcommand");
        };
        assert_eq!(args.config().greeting, "Welcome in");
    }

    #[test]
    fn relay_applies_default_ports() {
        let cli =
            Cli::try_parse_from(["line_relay", "relay", "--upstream", "board", "--hub", "echo"])
                .unwrap();
        let Command::Relay(args) = cli.command else {
            panic!("expected relay subcommand");
        };
        assert_eq!(args.upstream(), ("board", 9999));
        assert_eq!(args.hub(), ("echo", 9998));
    }

    #[test]
    fn zero_idle_period_is_rejected() {
        assert!(Cli::try_parse_from(["line_relay", "hub", "--idle-ms", "0"]).is_err());
    }
}
