//! In-memory configuration store served by `esifrpc serve`.

use std::collections::BTreeMap;

use esifrpc_codec::calls::{GetConfig, SetConfig, WriteLog};
use esifrpc_codec::{EsifData, ResultCode};
use esifrpc_peer::{CallContext, EsifServices};
use parking_lot::RwLock;

type Key = (String, String);

#[derive(Debug, Default)]
pub struct ConfigStore {
    values: RwLock<BTreeMap<Key, EsifData>>,
}

impl ConfigStore {
    pub fn new(entries: impl IntoIterator<Item = (String, String, EsifData)>) -> Self {
        let values = entries
            .into_iter()
            .map(|(namespace, path, value)| ((namespace, path), value))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    fn key(name_space: &EsifData, element_path: &EsifData) -> Option<Key> {
        Some((
            name_space.as_str()?.to_string(),
            element_path.as_str()?.to_string(),
        ))
    }
}

impl EsifServices for ConfigStore {
    fn get_config(&self, ctx: &CallContext, call: &mut GetConfig) -> ResultCode {
        let Some(key) = Self::key(&call.name_space, &call.element_path) else {
            return ResultCode::ParameterIsNull;
        };
        let Some(value) = self.values.read().get(&key).cloned() else {
            tracing::debug!(session = ctx.session, namespace = %key.0, path = %key.1, "config miss");
            return ResultCode::NotFound;
        };
        if !value.fits(call.response.buf_len) {
            call.response = EsifData::need_larger(value.data_type, call.response.buf_len, value.data_len);
            return ResultCode::NeedLargerBuffer;
        }
        call.response = value;
        ResultCode::Ok
    }

    fn set_config(&self, ctx: &CallContext, call: &mut SetConfig) -> ResultCode {
        let Some(key) = Self::key(&call.name_space, &call.element_path) else {
            return ResultCode::ParameterIsNull;
        };
        tracing::info!(
            session = ctx.session,
            app = ctx.app_name.as_deref().unwrap_or("-"),
            namespace = %key.0,
            path = %key.1,
            value = %call.value,
            "config set"
        );
        let mut values = self.values.write();
        if call.value.is_null() {
            values.remove(&key);
        } else {
            values.insert(key, call.value.clone());
        }
        ResultCode::Ok
    }

    fn write_log(&self, ctx: &CallContext, call: &mut WriteLog) -> ResultCode {
        let message = call.message.as_str().unwrap_or_default();
        let app = ctx.app_name.as_deref().unwrap_or("-");
        match call.level {
            0 => tracing::error!(session = ctx.session, app, "{message}"),
            1 => tracing::warn!(session = ctx.session, app, "{message}"),
            2 => tracing::info!(session = ctx.session, app, "{message}"),
            _ => tracing::debug!(session = ctx.session, app, "{message}"),
        }
        ResultCode::Ok
    }
}
