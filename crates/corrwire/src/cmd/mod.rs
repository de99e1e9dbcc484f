use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod ping;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo server.
    Serve(ServeArgs),
    /// Send one message and print the correlated response.
    Send(SendArgs),
    /// Probe a server until it stops answering.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (host:port).
    pub address: String,
    /// Network: tcp, tcp4 or tcp6.
    #[arg(long, default_value = "tcp")]
    pub network: String,
    /// Bound on each reply write (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub write_timeout: String,
    /// Do not print received messages.
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address (host:port).
    pub address: String,
    /// Network: tcp, tcp4 or tcp6.
    #[arg(long, default_value = "tcp")]
    pub network: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Send with packet ID 0 and do not wait for a response.
    #[arg(long)]
    pub no_reply: bool,
    /// Deadline for connecting, sending and receiving (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Size of the connection pool.
    #[arg(long, default_value = "1")]
    pub connections: usize,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Server address (host:port).
    pub address: String,
    /// Network: tcp, tcp4 or tcp6.
    #[arg(long, default_value = "tcp")]
    pub network: String,
    /// Probe payload.
    #[arg(long, default_value = "ping")]
    pub data: String,
    /// Give up after this many consecutive failures.
    #[arg(long, default_value = "3")]
    pub max_retry: u32,
    /// Pause between probes (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Deadline for each probe (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Run `action` on Ctrl-C.
pub(crate) fn on_interrupt(mut action: impl FnMut() + Send + 'static) -> CliResult<()> {
    ctrlc::set_handler(move || action()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        for bad in ["", "0s", "0ms", "bad", "1.5s", "-1s"] {
            let err = parse_duration(bad).expect_err(bad);
            assert_eq!(err.code, USAGE, "{bad}");
        }
    }
}
