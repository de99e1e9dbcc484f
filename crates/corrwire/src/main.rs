mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "corrwire", version, about = "Correlated request/response over pooled TCP")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "corrwire",
            "send",
            "127.0.0.1:9000",
            "--data",
            "hello",
            "--no-reply",
            "--connections",
            "4",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert!(args.no_reply);
                assert_eq!(args.connections, 4);
                assert_eq!(args.data.as_deref(), Some("hello"));
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "corrwire",
            "send",
            "127.0.0.1:9000",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_ping_defaults() {
        let cli = Cli::try_parse_from(["corrwire", "ping", "127.0.0.1:9000"])
            .expect("ping args should parse");
        match cli.command {
            Command::Ping(args) => {
                assert_eq!(args.max_retry, 3);
                assert_eq!(args.interval, "1s");
                assert_eq!(args.data, "ping");
            }
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn parses_serve_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "corrwire",
            "serve",
            "0.0.0.0:9000",
            "--quiet",
            "--log-level",
            "debug",
            "--format",
            "pretty",
        ])
        .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(ref args) if args.quiet));
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
    }
}
