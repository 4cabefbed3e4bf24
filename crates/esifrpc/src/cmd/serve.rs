use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use esifrpc_codec::calls::{AppCreate, AppGetName};
use esifrpc_codec::{DataType, EsifData, Handle, ResultCode, INVALID_HANDLE};
use esifrpc_peer::{AppInterface, CallContext, RpcServer, ServerHandle};
use serde::Serialize;

use crate::cmd::{parse_endpoint, ServeArgs};
use crate::config::CliConfig;
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};
use crate::store::ConfigStore;

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const NAME_BUFFER: u32 = 256;

#[derive(Debug, Serialize)]
struct Greeting {
    event: &'static str,
    session: Handle,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_handle: Option<Handle>,
    result: String,
}

impl Record for Greeting {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("session", format!("0x{:X}", self.session)),
            ("app", self.app_name.clone().unwrap_or_else(|| "-".into())),
            (
                "app_handle",
                self.app_handle
                    .map(|h| format!("0x{h:X}"))
                    .unwrap_or_else(|| "-".into()),
            ),
            ("result", self.result.clone()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        format!("0x{:X}\n", self.session).into_bytes()
    }
}

pub fn run(args: ServeArgs, format: OutputFormat, config: &CliConfig) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let store = Arc::new(ConfigStore::new(config.store_entries()?));
    tracing::info!(values = store.len(), "config store loaded");

    let server = RpcServer::bind(&endpoint, store)
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(config.peer_config())
        .spawn()
        .map_err(|err| peer_error("server start failed", err))?;
    tracing::info!(endpoint = %server.local_endpoint(), "serving");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut greeted = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(session) = server.next_session(ACCEPT_POLL) else {
            continue;
        };
        let greeting = greet(&server, session);
        print_record(&greeting, format);
        greeted += 1;
        if args.count.is_some_and(|count| greeted >= count) {
            break;
        }
    }

    server.shutdown();
    Ok(SUCCESS)
}

/// Ask a new application for its name, then create it, the way a host
/// brings an application up before it has an app handle.
fn greet(server: &ServerHandle, session: Handle) -> Greeting {
    let proxy = server.app_proxy();
    let ctx = CallContext::local();
    let mut greeting = Greeting {
        event: "app_connected",
        session,
        app_name: None,
        app_handle: None,
        result: ResultCode::Ok.to_string(),
    };

    if let Err(err) = server.sessions().bind_thread(session) {
        greeting.result = err.result_code().to_string();
        return greeting;
    }

    let mut name = AppGetName {
        name: EsifData::output(DataType::String, NAME_BUFFER),
    };
    let code = proxy.app_get_name(&ctx, &mut name);
    if code.is_ok() {
        greeting.app_name = name.name.as_str().map(str::to_owned);
    }

    let mut create = AppCreate {
        esif_handle: session,
        app_handle: INVALID_HANDLE,
        ..AppCreate::default()
    };
    let created = if code.is_ok() {
        proxy.app_create(&ctx, &mut create)
    } else {
        code
    };
    server.sessions().unbind_thread();

    if created.is_ok() && create.app_handle != INVALID_HANDLE {
        greeting.app_handle = Some(create.app_handle);
    }
    greeting.result = created.to_string();
    tracing::info!(
        session,
        app = greeting.app_name.as_deref().unwrap_or("-"),
        result = %created,
        "application greeted"
    );
    greeting
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_omits_unknown_fields() {
        let greeting = Greeting {
            event: "app_connected",
            session: 0x1234,
            app_name: None,
            app_handle: None,
            result: ResultCode::Disconnected.to_string(),
        };
        let json = serde_json::to_value(&greeting).unwrap();
        assert_eq!(json["session"], 0x1234);
        assert!(json.get("app_name").is_none());
        assert_eq!(greeting.fields()[1].1, "-");
        assert_eq!(greeting.raw(), b"0x1234\n");
    }
}
