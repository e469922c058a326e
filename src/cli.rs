use clap::{ArgAction, Parser};
use std::path::PathBuf;

pub const VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Bastion Proxy - SOCKS5 proxy that forwards through SSH bastions
#[derive(Parser, Debug)]
#[command(name = "bastion-proxy")]
#[command(about = "SOCKS5 proxy that forwards each connection through an SSH bastion")]
#[command(version = VERSION)]
#[command(long_about = r#"
Bastion Proxy listens for SOCKS5 clients and forwards every CONNECT request
through an SSH bastion. The bastion is chosen per request from the SOCKS5
credentials: the username is the bastion host and the password is its SSH
port. Tunnels are opened on first use, reused by later requests, redialed
when a destination cannot be reached, and closed after sitting idle.

Authentication to the bastions uses the SSH agent at $SSH_AUTH_SOCK, then
the optional private key file.

EXAMPLES:
  # Listen on the default address (127.0.0.1:5101)
  bastion-proxy --user deploy

  # Route curl through bastion.example.com:22
  curl --proxy socks5h://bastion.example.com:22@127.0.0.1:5101 http://10.0.0.5/

  # Load settings from a file, overriding the idle timeout
  bastion-proxy --config proxy.yaml --idle-close 30m

ENVIRONMENT VARIABLES:
  BASTION_PROXY_LISTEN_HOST  Address to listen on
  BASTION_PROXY_LISTEN_PORT  Port to listen on
  BASTION_PROXY_USER         SSH username (falls back to $USER, then $LOGNAME)
  BASTION_PROXY_KEY_FILE     Private key file
  SSH_AUTH_SOCK              SSH agent socket
"#)]
pub struct Cli {
    /// Address to listen on [default: 127.0.0.1]
    #[arg(long, env = "BASTION_PROXY_LISTEN_HOST")]
    pub listen_host: Option<String>,

    /// Port to listen on [default: 5101]
    #[arg(long, env = "BASTION_PROXY_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// SSH username used for every bastion
    #[arg(long, short = 'u', env = "BASTION_PROXY_USER")]
    pub user: Option<String>,

    /// Private key file tried after the agent identities
    #[arg(long, short = 'k', env = "BASTION_PROXY_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Close a tunnel after this long without requests (e.g. 4h, 30m) [default: 4h]
    #[arg(long, short = 't')]
    pub idle_close: Option<humantime::Duration>,

    /// Attempts per request; each failed attempt redials the tunnel [default: 2]
    #[arg(long, short = 'r')]
    pub max_retries: Option<u32>,

    /// Log relay status at this interval (0 disables) [default: 0]
    #[arg(long)]
    pub status_interval: Option<humantime::Duration>,

    /// SSH connect and handshake timeout (0 disables) [default: 30s]
    #[arg(long)]
    pub connect_timeout: Option<humantime::Duration>,

    /// Only accept bastion host keys with this SHA256 fingerprint (repeatable)
    #[arg(long = "host-key", value_name = "FINGERPRINT")]
    pub host_keys: Vec<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Filter directive: `--log-level`, then `RUST_LOG`, then `-v` count
    pub fn log_filter(&self) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.is_empty() {
                return filter;
            }
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "bastion-proxy",
            "-u",
            "deploy",
            "-k",
            "/tmp/id_ed25519",
            "-t",
            "30m",
            "-r",
            "3",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.user.as_deref(), Some("deploy"));
        assert_eq!(cli.key_file, Some(PathBuf::from("/tmp/id_ed25519")));
        assert_eq!(
            cli.idle_close.map(|d| *d),
            Some(std::time::Duration::from_secs(1800))
        );
        assert_eq!(cli.max_retries, Some(3));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_explicit_log_level_wins() {
        let cli = Cli::try_parse_from(["bastion-proxy", "-v", "--log-level", "warn"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_repeated_host_keys() {
        let cli = Cli::try_parse_from([
            "bastion-proxy",
            "--host-key",
            "SHA256:aaa",
            "--host-key",
            "SHA256:bbb",
        ])
        .unwrap();
        assert_eq!(cli.host_keys, vec!["SHA256:aaa", "SHA256:bbb"]);
    }
}
