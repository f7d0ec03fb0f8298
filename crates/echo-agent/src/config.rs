use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the echo agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "echo-agent")]
#[command(about = "Echo agent test double")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:3000", env = "ECHO_LISTEN")]
    pub listen: SocketAddr,
    /// Default wait timeout for message retrieval, in seconds.
    #[arg(long, default_value = "5", env = "ECHO_WAIT_TIMEOUT")]
    pub wait_timeout: f64,
    /// Upper bound for a caller-supplied wait timeout, in seconds.
    #[arg(long, default_value = "300", env = "ECHO_MAX_WAIT_TIMEOUT")]
    pub max_wait_timeout: f64,
    /// Maximum accepted request body in bytes.
    #[arg(long, default_value = "1048576", env = "ECHO_MAX_BODY")]
    pub max_body: usize,
    /// Maximum unclaimed messages per connection. 0 = unbounded.
    #[arg(long, default_value = "0", env = "ECHO_MAILBOX_CAPACITY")]
    pub mailbox_capacity: usize,
    /// Timeout for outbound deliveries, in seconds.
    #[arg(long, default_value = "10", env = "ECHO_SEND_TIMEOUT")]
    pub send_timeout: u64,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Write logs to this file instead of stderr.
    #[arg(long, env = "ECHO_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Default wait timeout for message retrieval, in seconds.
    pub wait_timeout: f64,
    /// Upper bound for a caller-supplied wait timeout, in seconds.
    pub max_wait_timeout: f64,
    /// Maximum accepted request body in bytes.
    pub max_body: usize,
    /// Maximum unclaimed messages per connection. 0 = unbounded.
    pub mailbox_capacity: usize,
    /// Timeout for outbound deliveries, in seconds.
    pub send_timeout: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            wait_timeout: 5.0,
            max_wait_timeout: 300.0,
            max_body: 1_048_576,
            mailbox_capacity: 0,
            send_timeout: 10,
        }
    }
}

impl AgentConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if !self.wait_timeout.is_finite() || self.wait_timeout < 0.0 {
            return Err("wait_timeout must be a non-negative number of seconds".to_string());
        }
        if !self.max_wait_timeout.is_finite() || self.max_wait_timeout <= 0.0 {
            return Err("max_wait_timeout must be greater than 0".to_string());
        }
        if self.wait_timeout > self.max_wait_timeout {
            return Err("wait_timeout cannot exceed max_wait_timeout".to_string());
        }
        if self.max_wait_timeout > 86_400.0 {
            return Err("max_wait_timeout exceeds reasonable limit (86400 seconds)".to_string());
        }

        if self.max_body == 0 {
            return Err("max_body must be greater than 0".to_string());
        }
        if self.max_body > 64 * 1_048_576 {
            return Err("max_body exceeds reasonable limit (64 MiB)".to_string());
        }

        if self.send_timeout == 0 {
            return Err("send_timeout must be greater than 0".to_string());
        }
        if self.send_timeout > 3600 {
            return Err("send_timeout exceeds reasonable limit (3600 seconds)".to_string());
        }
        Ok(())
    }

    /// Resolve a caller-supplied wait timeout: the default when absent,
    /// clamped to `[0, max_wait_timeout]` otherwise.
    #[must_use]
    pub fn wait_duration(&self, requested: Option<f64>) -> Duration {
        let secs = requested
            .filter(|s| s.is_finite())
            .unwrap_or(self.wait_timeout)
            .clamp(0.0, self.max_wait_timeout);
        Duration::from_secs_f64(secs)
    }

    /// Outbound delivery timeout.
    #[must_use]
    pub fn send_duration(&self) -> Duration {
        Duration::from_secs(self.send_timeout)
    }
}

impl From<Args> for AgentConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            wait_timeout: args.wait_timeout,
            max_wait_timeout: args.max_wait_timeout,
            max_body: args.max_body,
            mailbox_capacity: args.mailbox_capacity,
            send_timeout: args.send_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn negative_wait_timeout() {
        let mut c = AgentConfig::default();
        c.wait_timeout = -1.0;
        assert!(c.validate().unwrap_err().contains("wait_timeout"));
    }

    #[test]
    fn wait_timeout_above_max() {
        let mut c = AgentConfig::default();
        c.wait_timeout = 10.0;
        c.max_wait_timeout = 5.0;
        assert!(c.validate().unwrap_err().contains("max_wait_timeout"));
    }

    #[test]
    fn max_wait_timeout_zero() {
        let mut c = AgentConfig::default();
        c.wait_timeout = 0.0;
        c.max_wait_timeout = 0.0;
        assert!(c.validate().unwrap_err().contains("max_wait_timeout"));
    }

    #[test]
    fn max_body_zero() {
        let mut c = AgentConfig::default();
        c.max_body = 0;
        assert!(c.validate().unwrap_err().contains("max_body"));
    }

    #[test]
    fn send_timeout_zero() {
        let mut c = AgentConfig::default();
        c.send_timeout = 0;
        assert!(c.validate().unwrap_err().contains("send_timeout"));
    }

    #[test]
    fn wait_duration_defaults_and_clamps() {
        let c = AgentConfig::default();
        assert_eq!(c.wait_duration(None), Duration::from_secs(5));
        assert_eq!(c.wait_duration(Some(0.25)), Duration::from_millis(250));
        assert_eq!(c.wait_duration(Some(-3.0)), Duration::ZERO);
        assert_eq!(c.wait_duration(Some(1e9)), Duration::from_secs(300));
        assert_eq!(c.wait_duration(Some(f64::NAN)), Duration::from_secs(5));
    }

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::parse_from(["echo-agent", "--listen", "127.0.0.1:0", "-vv"]);
        assert_eq!(args.verbose, 2);
        let config = AgentConfig::from(args);
        assert_eq!(config.listen.port(), 0);
        assert_eq!(config.mailbox_capacity, 0);
        assert!(config.validate().is_ok());
    }
}
