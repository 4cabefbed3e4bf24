use serde::Serialize;

use crate::cmd::{connect, InfoArgs};
use crate::config::CliConfig;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct InfoOutput {
    endpoint: String,
    transport: &'static str,
    session_handle: u64,
    protocol_version: String,
    wire_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_name: Option<String>,
    connected: bool,
}

impl Record for InfoOutput {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("endpoint", self.endpoint.clone()),
            ("transport", self.transport.to_string()),
            ("session", format!("0x{:X}", self.session_handle)),
            ("protocol", self.protocol_version.clone()),
            ("wire_mode", self.wire_mode.to_string()),
            ("app", self.app_name.clone().unwrap_or_else(|| "-".into())),
            ("connected", self.connected.to_string()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        format!("0x{:X}\n", self.session_handle).into_bytes()
    }
}

pub fn run(args: InfoArgs, format: OutputFormat, config: &CliConfig) -> CliResult<i32> {
    let client = connect(&args.connect, config)?;
    let info = client.info();
    let out = InfoOutput {
        endpoint: client.endpoint().to_string(),
        transport: client.endpoint().transport_name(),
        session_handle: info.session_handle,
        protocol_version: info.protocol_version.clone(),
        wire_mode: info.wire_mode.name(),
        app_name: info.app_name.clone(),
        connected: client.is_connected(),
    };
    client.close();

    print_record(&out, format);
    Ok(SUCCESS)
}
