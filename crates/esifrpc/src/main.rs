mod cmd;
mod config;
mod exit;
mod logging;
mod output;
mod store;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::config::CliConfig;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "esifrpc", version, about = "Host/application RPC over WebSocket")]
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

    /// JSON settings file (workers, timeouts, store values).
    #[arg(long, value_name = "PATH", env = "ESIFRPC_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = CliConfig::load(cli.config.as_deref())
        .and_then(|config| cmd::run(cli.command, format, &config));

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
    fn parses_get_config_call() {
        let cli = Cli::try_parse_from([
            "esifrpc",
            "call",
            "/tmp/test.sock",
            "get-config",
            "--path",
            "/power/limit",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert!(matches!(
            args.service,
            cmd::ServiceCall::GetConfig { buf_len: 256, ref namespace, .. } if namespace == "dptf"
        ));
    }

    #[test]
    fn set_config_requires_value() {
        let err = Cli::try_parse_from([
            "esifrpc",
            "call",
            "/tmp/test.sock",
            "set-config",
            "--path",
            "/x",
        ])
        .expect_err("missing value should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_info_subcommand() {
        let cli = Cli::try_parse_from(["esifrpc", "info", "/tmp/test.sock", "--timeout", "3s"])
            .expect("info args should parse");
        assert!(matches!(cli.command, Command::Info(_)));
    }

    #[test]
    fn parses_serve_with_global_config() {
        let cli = Cli::try_parse_from([
            "esifrpc",
            "serve",
            "ws://127.0.0.1:0/esif",
            "--count",
            "1",
            "--config",
            "/tmp/esifrpc.json",
        ])
        .expect("serve args should parse");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/esifrpc.json")));
        assert!(matches!(cli.command, Command::Serve(ref args) if args.count == Some(1)));
    }
}
