//! Configuration read at startup: `tempdir`, `timeout` (seconds;
//! multiplied by 1000 for the grace timer), and the bind port.

use std::path::PathBuf;

use clap::Parser;

/// Server configuration, parsed from CLI flags at startup.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "gateway", about = "Streaming genomics gateway")]
pub struct CliArgs {
    /// Base directory for per-request temp directories. Defaults to the
    /// OS temp directory.
    #[arg(long)]
    pub tempdir: Option<PathBuf>,

    /// Grace period, in seconds, given to subprocesses to drain after a
    /// client disconnect before they are force-killed.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// UNIX domain socket path to bind instead of TCP. Not implemented;
    /// present so the flag surface is stable and rejecting it gives a
    /// clear error rather than an unrecognized-argument one.
    #[arg(long)]
    pub uds: Option<PathBuf>,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tempdir: PathBuf,
    pub timeout_secs: u64,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tempdir: std::env::temp_dir(),
            timeout_secs: 120,
            port: 9000,
        }
    }
}

impl GatewayConfig {
    pub fn from_args(args: &CliArgs) -> anyhow::Result<Self> {
        if args.uds.is_some() {
            anyhow::bail!("UNIX domain socket binding is not implemented; use --port");
        }
        Ok(Self {
            tempdir: args.tempdir.clone().unwrap_or_else(std::env::temp_dir),
            timeout_secs: args.timeout,
            port: args.port,
        })
    }

    /// The grace timer length in milliseconds, fed to the disconnect
    /// grace timer that force-kills lingering stages.
    pub fn grace_millis(&self) -> u64 {
        self.timeout_secs * 1000
    }
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(uds: Option<PathBuf>) -> CliArgs {
        CliArgs {
            tempdir: None,
            timeout: 120,
            port: 9000,
            uds,
        }
    }

    #[test]
    fn uds_flag_is_rejected() {
        let err = GatewayConfig::from_args(&args(Some(PathBuf::from("/tmp/gateway.sock")))).unwrap_err();
        assert!(err.to_string().contains("UNIX domain socket"));
    }

    #[test]
    fn from_args_without_tempdir_falls_back_to_os_temp_dir() {
        let config = GatewayConfig::from_args(&args(None)).unwrap();
        assert_eq!(config.tempdir, std::env::temp_dir());
        assert_eq!(config.port, 9000);
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn from_args_honors_an_explicit_tempdir() {
        let mut cli = args(None);
        cli.tempdir = Some(PathBuf::from("/srv/gateway-tmp"));
        let config = GatewayConfig::from_args(&cli).unwrap();
        assert_eq!(config.tempdir, PathBuf::from("/srv/gateway-tmp"));
    }

    #[test]
    fn grace_millis_is_timeout_seconds_times_1000() {
        let config = GatewayConfig {
            tempdir: std::env::temp_dir(),
            timeout_secs: 45,
            port: 9000,
        };
        assert_eq!(config.grace_millis(), 45_000);
    }
}
