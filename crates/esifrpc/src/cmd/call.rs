use esifrpc_codec::calls::{GetConfig, SetConfig, WriteLog};
use esifrpc_codec::{DataType, EsifData, ResultCode, RpcCall};
use esifrpc_peer::RpcClient;
use serde::Serialize;

use crate::cmd::{connect, CallArgs, ServiceCall, ValueType};
use crate::config::CliConfig;
use crate::exit::{peer_error, result_exit_code, CliError, CliResult, USAGE};
use crate::output::{print_record, DataOutput, OutputFormat, Record};

#[derive(Debug, Serialize)]
struct CallOutput {
    function: &'static str,
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<DataOutput>,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl Record for CallOutput {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("function", self.function.to_string()), ("result", self.result.to_string())];
        if let Some(value) = &self.value {
            fields.push(("type", value.data_type.clone()));
            fields.push((
                "value",
                value
                    .value
                    .as_ref()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "-".into()),
            ));
        }
        fields
    }

    fn raw(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

pub fn run(args: CallArgs, format: OutputFormat, config: &CliConfig) -> CliResult<i32> {
    let value = match &args.service {
        ServiceCall::SetConfig { value, r#type, .. } => Some(parse_value(value, *r#type)?),
        _ => None,
    };
    let client = connect(&args.connect, config)?;
    let session = client.info().session_handle;

    let out = match args.service {
        ServiceCall::GetConfig {
            namespace,
            path,
            buf_len,
        } => get_config(&client, session, &namespace, &path, buf_len)?,
        ServiceCall::SetConfig {
            namespace, path, ..
        } => {
            let mut call = SetConfig {
                esif_handle: session,
                name_space: EsifData::string(&namespace),
                element_path: EsifData::string(&path),
                value: value.unwrap_or_default(),
                flags: 0,
            };
            let code = invoke(&client, &mut call)?;
            output(SetConfig::FUNCTION.name(), code, None)
        }
        ServiceCall::Log { message, level } => {
            let mut call = WriteLog {
                esif_handle: session,
                message: EsifData::string(&message),
                level,
                ..WriteLog::default()
            };
            let code = invoke(&client, &mut call)?;
            output(WriteLog::FUNCTION.name(), code, None)
        }
    };

    client.close();
    let code = out.result_code;
    print_record(&out.record, format);
    Ok(result_exit_code(code))
}

struct Outcome {
    record: CallOutput,
    result_code: ResultCode,
}

fn output(function: &'static str, code: ResultCode, value: Option<&EsifData>) -> Outcome {
    Outcome {
        record: CallOutput {
            function,
            result: code.name(),
            value: value.map(DataOutput::new),
            raw: value.and_then(EsifData::bytes).map(<[u8]>::to_vec).unwrap_or_default(),
        },
        result_code: code,
    }
}

/// Read a value, growing the output buffer once if the host asks for more.
fn get_config(
    client: &RpcClient,
    session: u64,
    namespace: &str,
    path: &str,
    buf_len: u32,
) -> CliResult<Outcome> {
    let mut call = GetConfig {
        esif_handle: session,
        name_space: EsifData::string(namespace),
        element_path: EsifData::string(path),
        response: EsifData::output(DataType::Void, buf_len),
    };
    let mut code = invoke(client, &mut call)?;
    if code == ResultCode::NeedLargerBuffer {
        let required = call.response.data_len;
        tracing::debug!(offered = buf_len, required, "growing get-config buffer");
        call.response = EsifData::output(DataType::Void, required);
        code = invoke(client, &mut call)?;
    }
    let value = code.is_ok().then_some(&call.response);
    Ok(output(GetConfig::FUNCTION.name(), code, value))
}

fn invoke<C: RpcCall>(client: &RpcClient, call: &mut C) -> CliResult<ResultCode> {
    client
        .call(call)
        .map_err(|err| peer_error(&format!("{} failed", C::FUNCTION.name()), err))
}

fn parse_value(input: &str, value_type: ValueType) -> CliResult<EsifData> {
    let invalid = |what: &str| CliError::new(USAGE, format!("value '{input}' is not a valid {what}"));
    Ok(match value_type {
        ValueType::U32 => EsifData::u32(input.parse().map_err(|_| invalid("u32"))?),
        ValueType::U64 => EsifData::u64(input.parse().map_err(|_| invalid("u64"))?),
        ValueType::String => EsifData::string(input),
        ValueType::Json => {
            serde_json::from_str::<serde_json::Value>(input).map_err(|_| invalid("JSON document"))?;
            EsifData::json(input)
        }
    })
}
