//! Settings file for the CLI (`--config <file.json>`).
//!
//! Every field is optional; absent fields keep the library defaults and
//! command-line flags override whatever the file sets.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use esifrpc_codec::{DataType, EsifData};
use esifrpc_peer::{HandshakeConfig, PeerConfig};
use serde::Deserialize;

use crate::exit::{CliError, CliResult, DATA_INVALID};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub workers: Option<usize>,
    pub queue_depth: Option<usize>,
    /// Per-call timeout in milliseconds; 0 waits forever.
    pub call_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    /// Connections `serve` lets sit in their handshake at once.
    pub max_pending_handshakes: Option<usize>,
    pub max_message_size: Option<usize>,
    pub mask_server_frames: Option<bool>,
    /// Name an application announces in its handshake.
    pub app_name: Option<String>,
    /// Initial contents of the `serve` config store, keyed
    /// `"<namespace>:<path>"`.
    pub values: BTreeMap<String, serde_json::Value>,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|err| crate::exit::io_error(&format!("read {}", path.display()), err))?;
        serde_json::from_str(&text).map_err(|err| {
            CliError::new(DATA_INVALID, format!("invalid config {}: {err}", path.display()))
        })
    }

    pub fn peer_config(&self) -> PeerConfig {
        let mut config = PeerConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(depth) = self.queue_depth {
            config = config.with_queue_depth(depth);
        }
        if let Some(ms) = self.call_timeout_ms {
            config = config.with_call_timeout((ms > 0).then(|| Duration::from_millis(ms)));
        }
        if let Some(ms) = self.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = self.max_pending_handshakes {
            config = config.with_max_pending_handshakes(max);
        }
        let mut handshake = HandshakeConfig::default();
        if let Some(ms) = self.handshake_timeout_ms {
            handshake = handshake.with_timeout(Duration::from_millis(ms));
        }
        if let Some(name) = &self.app_name {
            handshake = handshake.with_app_name(name.clone());
        }
        let mut ws = config.ws.clone();
        if let Some(max) = self.max_message_size {
            ws = ws.with_max_message_size(max);
        }
        if let Some(mask) = self.mask_server_frames {
            ws = ws.with_server_masking(mask);
        }
        config.with_handshake(handshake).with_ws(ws)
    }

    /// Parse `values` into store entries.
    pub fn store_entries(&self) -> CliResult<Vec<(String, String, EsifData)>> {
        self.values
            .iter()
            .map(|(key, value)| {
                let (namespace, path) = key.split_once(':').ok_or_else(|| {
                    CliError::new(
                        DATA_INVALID,
                        format!("config value key '{key}' must be <namespace>:<path>"),
                    )
                })?;
                Ok((namespace.to_string(), path.to_string(), json_to_data(value)))
            })
            .collect()
    }
}

/// Unsigned integers become `UInt32`/`UInt64`, strings `String`, anything
/// else its JSON text.
pub fn json_to_data(value: &serde_json::Value) -> EsifData {
    match value {
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(v) => match u32::try_from(v) {
                Ok(v) => EsifData::u32(v),
                Err(_) => EsifData::u64(v),
            },
            None => EsifData::json(&n.to_string()),
        },
        serde_json::Value::String(s) => EsifData::string(s),
        other => EsifData::from_bytes(DataType::Json, other.to_string()),
    }
}
