use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use esifrpc_codec::calls::{AppCreate, AppGetName};
use esifrpc_codec::{EsifData, ResultCode};
use esifrpc_peer::{AppInterface, CallContext, PeerConfig, PeerError, RpcClient};
use esifrpc_transport::{Endpoint, TransportError};

use crate::config::CliConfig;
use crate::exit::{peer_error, transport_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod info;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a demo host serving an in-memory config store.
    Serve(ServeArgs),
    /// Connect as an application and make one service call.
    Call(CallArgs),
    /// Connect and print the negotiated session.
    Info(InfoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: &CliConfig) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format, config),
        Command::Call(args) => call::run(args, format, config),
        Command::Info(args) => info::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to bind: `ws://host:port[/path]`, `tcp://host:port`,
    /// `unix:///path` or a socket path.
    pub endpoint: String,
    /// Exit after greeting this many applications.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Endpoint to connect to.
    pub endpoint: String,
    /// How long to keep retrying the connection (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Application name sent in the handshake.
    #[arg(long)]
    pub app_name: Option<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    #[command(subcommand)]
    pub service: ServiceCall,
}

#[derive(Subcommand, Debug)]
pub enum ServiceCall {
    /// Read a configuration value.
    GetConfig {
        #[arg(long, default_value = "dptf")]
        namespace: String,
        #[arg(long)]
        path: String,
        /// Initial output buffer size; grown once if the host asks for more.
        #[arg(long, default_value = "256")]
        buf_len: u32,
    },
    /// Write a configuration value.
    SetConfig {
        #[arg(long, default_value = "dptf")]
        namespace: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        value: String,
        #[arg(long, value_enum, default_value = "string")]
        r#type: ValueType,
    },
    /// Append a line to the host log.
    Log {
        #[arg(long)]
        message: String,
        /// 0 error, 1 warning, 2 info, 3 debug.
        #[arg(long, default_value = "2")]
        level: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ValueType {
    U32,
    U64,
    String,
    Json,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// What the CLI answers when a host drives it as an application.
pub struct CliApp {
    name: String,
    app_handle: u64,
}

impl CliApp {
    /// App handles are process id over a per-process counter, so CLI
    /// instances sharing one host never answer `AppCreate` alike.
    pub fn new(name: impl Into<String>) -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        let instance = NEXT.fetch_add(1, Ordering::Relaxed);
        Self {
            name: name.into(),
            app_handle: (u64::from(std::process::id()) << 32) | u64::from(instance),
        }
    }

    pub fn app_handle(&self) -> u64 {
        self.app_handle
    }
}

impl AppInterface for CliApp {
    fn app_get_name(&self, _ctx: &CallContext, call: &mut AppGetName) -> ResultCode {
        let name = EsifData::string(&self.name);
        if !name.fits(call.name.buf_len) {
            call.name = EsifData::need_larger(name.data_type, call.name.buf_len, name.data_len);
            return ResultCode::NeedLargerBuffer;
        }
        call.name = name;
        ResultCode::Ok
    }

    fn app_create(&self, _ctx: &CallContext, call: &mut AppCreate) -> ResultCode {
        call.app_handle = self.app_handle;
        ResultCode::Ok
    }
}

pub fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    Endpoint::parse(input).map_err(|err| transport_error("invalid endpoint", err))
}

/// Connect as an application, honoring `--timeout` and `--app-name`.
pub fn connect(args: &ConnectArgs, config: &CliConfig) -> CliResult<RpcClient> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let timeout = parse_timeout(&args.timeout)?;
    let mut peer: PeerConfig = config.peer_config().with_connect_timeout(timeout);
    if let Some(name) = &args.app_name {
        peer.handshake = peer.handshake.with_app_name(name.clone());
    }
    let name = peer
        .handshake
        .app_name
        .clone()
        .unwrap_or_else(|| "esifrpc-cli".to_string());
    peer.handshake.app_name = Some(name.clone());

    match RpcClient::connect_with_config(&endpoint, Arc::new(CliApp::new(name)), peer) {
        Ok(client) => Ok(client),
        Err(PeerError::Transport(TransportError::Connect { source, .. }))
            if matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            Err(CliError::new(
                TIMEOUT,
                format!("connect timed out after {timeout:?}: {source}"),
            ))
        }
        Err(err) => Err(peer_error("connect failed", err)),
    }
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use esifrpc_codec::{DataType, INVALID_HANDLE};

    use super::*;

    #[test]
    fn parse_timeout_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_timeout_millis() {
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("bad").is_err());
        assert_eq!(parse_timeout("").unwrap_err().code, USAGE);
    }

    #[test]
    fn cli_app_reports_name_and_handle() {
        let app = CliApp::new("probe");
        let mut name = AppGetName {
            name: EsifData::output(DataType::String, 64),
        };
        assert_eq!(app.app_get_name(&CallContext::local(), &mut name), ResultCode::Ok);
        assert_eq!(name.name.as_str(), Some("probe"));

        let mut tiny = AppGetName {
            name: EsifData::output(DataType::String, 2),
        };
        assert_eq!(
            app.app_get_name(&CallContext::local(), &mut tiny),
            ResultCode::NeedLargerBuffer
        );
        assert_eq!(tiny.name.data_len, 6);

        let mut create = AppCreate::default();
        assert_eq!(app.app_create(&CallContext::local(), &mut create), ResultCode::Ok);
        assert_eq!(create.app_handle, app.app_handle());
        assert_ne!(create.app_handle, INVALID_HANDLE);
    }

    #[test]
    fn cli_apps_get_distinct_app_handles() {
        let first = CliApp::new("a");
        let second = CliApp::new("b");
        assert_ne!(first.app_handle(), second.app_handle());
        assert_eq!(first.app_handle() >> 32, u64::from(std::process::id()));
    }
}
