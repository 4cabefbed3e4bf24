//! The RPC function set.
//!
//! Each function has one wire shape used for both its request and its
//! response: the caller fills the inputs and offers output buffers, the
//! callee fills the outputs and sends the same structure back.

use std::fmt;

use crate::data::EsifData;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, Result};
use crate::Handle;

/// Which side of the connection executes a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Application calls into the host.
    EsifService,
    /// Host calls into the application.
    AppLifecycle,
}

macro_rules! function_ids {
    ($($name:ident = $value:literal, $wire_name:literal, $dir:ident;)*) => {
        /// Function identifiers carried in the RPC header.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum FunctionId {
            $($name = $value,)*
        }

        impl FunctionId {
            pub const ALL: &'static [FunctionId] = &[$(FunctionId::$name,)*];

            pub fn from_u32(value: u32) -> Result<Self> {
                match value {
                    $($value => Ok(Self::$name),)*
                    other => Err(CodecError::UnknownFunction(other)),
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $wire_name,)*
                }
            }

            pub fn direction(self) -> Direction {
                match self {
                    $(Self::$name => Direction::$dir,)*
                }
            }
        }
    };
}

function_ids! {
    GetConfig = 0x0001, "GetConfig", EsifService;
    SetConfig = 0x0002, "SetConfig", EsifService;
    ExecutePrimitive = 0x0003, "ExecutePrimitive", EsifService;
    WriteLog = 0x0004, "WriteLog", EsifService;
    EventRegister = 0x0005, "EventRegister", EsifService;
    EventUnregister = 0x0006, "EventUnregister", EsifService;
    SendEvent = 0x0007, "SendEvent", EsifService;
    SendCommand = 0x0008, "SendCommand", EsifService;
    AppGetName = 0x0101, "AppGetName", AppLifecycle;
    AppGetDescription = 0x0102, "AppGetDescription", AppLifecycle;
    AppGetVersion = 0x0103, "AppGetVersion", AppLifecycle;
    AppGetIntro = 0x0104, "AppGetIntro", AppLifecycle;
    AppCreate = 0x0105, "AppCreate", AppLifecycle;
    AppDestroy = 0x0106, "AppDestroy", AppLifecycle;
    AppSuspend = 0x0107, "AppSuspend", AppLifecycle;
    AppResume = 0x0108, "AppResume", AppLifecycle;
    AppGetStatus = 0x0109, "AppGetStatus", AppLifecycle;
    ParticipantCreate = 0x010A, "ParticipantCreate", AppLifecycle;
    ParticipantDestroy = 0x010B, "ParticipantDestroy", AppLifecycle;
    DomainCreate = 0x010C, "DomainCreate", AppLifecycle;
    DomainDestroy = 0x010D, "DomainDestroy", AppLifecycle;
    AppEvent = 0x010E, "AppEvent", AppLifecycle;
}

impl FunctionId {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed function call with a fixed wire shape.
pub trait RpcCall: Sized + fmt::Debug + Send + 'static {
    const FUNCTION: FunctionId;

    fn encode_fields(&self, enc: &mut Encoder) -> Result<()>;

    fn decode_fields(dec: &mut Decoder<'_>) -> Result<Self>;
}

/// A value that can appear as a call field.
pub trait WireField: Sized {
    fn encode_field(&self, enc: &mut Encoder) -> Result<()>;

    fn decode_field(dec: &mut Decoder<'_>) -> Result<Self>;
}

impl WireField for u32 {
    fn encode_field(&self, enc: &mut Encoder) -> Result<()> {
        enc.u32(*self)
    }

    fn decode_field(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.u32()
    }
}

impl WireField for u64 {
    fn encode_field(&self, enc: &mut Encoder) -> Result<()> {
        enc.u64(*self)
    }

    fn decode_field(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.u64()
    }
}

impl WireField for EsifData {
    fn encode_field(&self, enc: &mut Encoder) -> Result<()> {
        enc.data(self)
    }

    fn decode_field(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.data()
    }
}

impl WireField for Vec<EsifData> {
    fn encode_field(&self, enc: &mut Encoder) -> Result<()> {
        enc.array(self)
    }

    fn decode_field(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.array()
    }
}

macro_rules! rpc_calls {
    ($(
        $(#[$meta:meta])*
        $name:ident => $function:ident {
            $($(#[$field_meta:meta])* $field:ident: $ty:ty,)*
        }
    )*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Default)]
        pub struct $name {
            $($(#[$field_meta])* pub $field: $ty,)*
        }

        impl RpcCall for $name {
            const FUNCTION: FunctionId = FunctionId::$function;

            #[allow(unused_variables)]
            fn encode_fields(&self, enc: &mut Encoder) -> Result<()> {
                $(self.$field.encode_field(enc)?;)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode_fields(dec: &mut Decoder<'_>) -> Result<Self> {
                Ok(Self {
                    $($field: WireField::decode_field(dec)?,)*
                })
            }
        }
    )*};
}

rpc_calls! {
    /// Read a configuration value from the host's store.
    GetConfig => GetConfig {
        esif_handle: Handle,
        name_space: EsifData,
        element_path: EsifData,
        /// Output: the stored value.
        response: EsifData,
    }

    /// Write a configuration value to the host's store.
    SetConfig => SetConfig {
        esif_handle: Handle,
        name_space: EsifData,
        element_path: EsifData,
        value: EsifData,
        flags: u32,
    }

    /// Run a primitive against a participant domain.
    ExecutePrimitive => ExecutePrimitive {
        esif_handle: Handle,
        participant: Handle,
        domain: Handle,
        request: EsifData,
        /// Output: primitive result.
        response: EsifData,
        primitive: u32,
        instance: u32,
    }

    /// Append a line to the host's log.
    WriteLog => WriteLog {
        esif_handle: Handle,
        participant: Handle,
        domain: Handle,
        message: EsifData,
        level: u32,
    }

    EventRegister => EventRegister {
        esif_handle: Handle,
        participant: Handle,
        domain: Handle,
        event_guid: EsifData,
    }

    EventUnregister => EventUnregister {
        esif_handle: Handle,
        participant: Handle,
        domain: Handle,
        event_guid: EsifData,
    }

    SendEvent => SendEvent {
        esif_handle: Handle,
        participant: Handle,
        domain: Handle,
        event_data: EsifData,
        event_guid: EsifData,
    }

    /// Run a host shell command given as an argument vector.
    SendCommand => SendCommand {
        esif_handle: Handle,
        argv: Vec<EsifData>,
        /// Output: command output.
        response: EsifData,
    }

    AppGetName => AppGetName {
        /// Output: application name.
        name: EsifData,
    }

    AppGetDescription => AppGetDescription {
        /// Output: application description.
        description: EsifData,
    }

    AppGetVersion => AppGetVersion {
        /// Output: application version string.
        version: EsifData,
    }

    AppGetIntro => AppGetIntro {
        /// Output: banner shown when the app starts.
        intro: EsifData,
    }

    /// Create the application instance; the app answers with its handle.
    AppCreate => AppCreate {
        esif_handle: Handle,
        app_data: EsifData,
        initial_status: u32,
        /// Output: handle the app assigns to itself.
        app_handle: Handle,
    }

    AppDestroy => AppDestroy {
        app_handle: Handle,
    }

    AppSuspend => AppSuspend {
        app_handle: Handle,
    }

    AppResume => AppResume {
        app_handle: Handle,
    }

    AppGetStatus => AppGetStatus {
        app_handle: Handle,
        goal: u32,
        context: u32,
        /// Output: status document.
        status: EsifData,
    }

    ParticipantCreate => ParticipantCreate {
        app_handle: Handle,
        participant: Handle,
        participant_data: EsifData,
        initial_state: u32,
        /// Output: app-side participant handle.
        participant_handle: Handle,
    }

    ParticipantDestroy => ParticipantDestroy {
        app_handle: Handle,
        participant_handle: Handle,
    }

    DomainCreate => DomainCreate {
        app_handle: Handle,
        participant_handle: Handle,
        domain: Handle,
        domain_data: EsifData,
        initial_state: u32,
        /// Output: app-side domain handle.
        domain_handle: Handle,
    }

    DomainDestroy => DomainDestroy {
        app_handle: Handle,
        participant_handle: Handle,
        domain_handle: Handle,
    }

    /// Deliver an event to the application.
    AppEvent => AppEvent {
        app_handle: Handle,
        participant_handle: Handle,
        domain_handle: Handle,
        event_data: EsifData,
        event_guid: EsifData,
    }
}
