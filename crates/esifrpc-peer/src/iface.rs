//! Interface tables: the calls each side of a connection executes.
//!
//! The host implements [`EsifServices`] for applications to call; an
//! application implements [`AppInterface`] for the host to call. Every
//! method receives the decoded call, fills its outputs in place and returns
//! the result code sent back to the caller. Unimplemented methods answer
//! `NotImplemented`.

use bytes::Bytes;
use esifrpc_codec::calls::{
    AppCreate, AppDestroy, AppEvent, AppGetDescription, AppGetIntro, AppGetName, AppGetStatus,
    AppGetVersion, AppResume, AppSuspend, DomainCreate, DomainDestroy, EventRegister,
    EventUnregister, ExecutePrimitive, GetConfig, ParticipantCreate, ParticipantDestroy,
    SendCommand, SendEvent, SetConfig, WriteLog,
};
use esifrpc_codec::{
    decode_call, encode_call, encode_status, FunctionId, Handle, ResultCode, RpcCall, RpcHeader,
    WireMode, INVALID_HANDLE,
};

use crate::error::Result;
use crate::ConnectionId;

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Session handle of the calling peer.
    pub session: Handle,
    pub connection: ConnectionId,
    /// Application name from the handshake.
    pub app_name: Option<String>,
}

impl CallContext {
    /// Context for calls made from this process rather than a peer.
    pub fn local() -> Self {
        Self {
            session: INVALID_HANDLE,
            connection: 0,
            app_name: None,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::local()
    }
}

macro_rules! not_implemented {
    ($ctx:ident, $call:ident) => {{
        let _ = ($ctx, $call);
        ResultCode::NotImplemented
    }};
}

/// Services the host offers to applications.
pub trait EsifServices: Send + Sync {
    fn get_config(&self, ctx: &CallContext, call: &mut GetConfig) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn set_config(&self, ctx: &CallContext, call: &mut SetConfig) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn execute_primitive(&self, ctx: &CallContext, call: &mut ExecutePrimitive) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn write_log(&self, ctx: &CallContext, call: &mut WriteLog) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn event_register(&self, ctx: &CallContext, call: &mut EventRegister) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn event_unregister(&self, ctx: &CallContext, call: &mut EventUnregister) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn send_event(&self, ctx: &CallContext, call: &mut SendEvent) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn send_command(&self, ctx: &CallContext, call: &mut SendCommand) -> ResultCode {
        not_implemented!(ctx, call)
    }
}

/// Lifecycle entry points an application exposes to the host.
pub trait AppInterface: Send + Sync {
    fn app_get_name(&self, ctx: &CallContext, call: &mut AppGetName) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_get_description(&self, ctx: &CallContext, call: &mut AppGetDescription) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_get_version(&self, ctx: &CallContext, call: &mut AppGetVersion) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_get_intro(&self, ctx: &CallContext, call: &mut AppGetIntro) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_create(&self, ctx: &CallContext, call: &mut AppCreate) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_destroy(&self, ctx: &CallContext, call: &mut AppDestroy) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_suspend(&self, ctx: &CallContext, call: &mut AppSuspend) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_resume(&self, ctx: &CallContext, call: &mut AppResume) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_get_status(&self, ctx: &CallContext, call: &mut AppGetStatus) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn participant_create(&self, ctx: &CallContext, call: &mut ParticipantCreate) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn participant_destroy(&self, ctx: &CallContext, call: &mut ParticipantDestroy) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn domain_create(&self, ctx: &CallContext, call: &mut DomainCreate) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn domain_destroy(&self, ctx: &CallContext, call: &mut DomainDestroy) -> ResultCode {
        not_implemented!(ctx, call)
    }

    fn app_event(&self, ctx: &CallContext, call: &mut AppEvent) -> ResultCode {
        not_implemented!(ctx, call)
    }
}

/// Host with no services; every call answers `NotImplemented`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServices;

impl EsifServices for NoServices {}

/// Application with no lifecycle handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoApp;

impl AppInterface for NoApp {}

/// The table a runtime executes incoming requests against.
#[derive(Clone)]
pub(crate) enum Handlers {
    Host(std::sync::Arc<dyn EsifServices>),
    App(std::sync::Arc<dyn AppInterface>),
}

impl Handlers {
    /// Execute one request and build the response message.
    ///
    /// A function belonging to the other side's table answers
    /// `NotSupported`.
    pub(crate) fn dispatch(
        &self,
        ctx: &CallContext,
        mode: WireMode,
        header: &RpcHeader,
        payload: &[u8],
    ) -> Result<Bytes> {
        let req = Incoming { mode, payload };
        match self {
            Self::Host(services) => dispatch_esif(services.as_ref(), ctx, req, header),
            Self::App(app) => dispatch_app(app.as_ref(), ctx, req, header),
        }
    }
}

/// An undecoded request body.
#[derive(Clone, Copy)]
struct Incoming<'a> {
    mode: WireMode,
    payload: &'a [u8],
}

impl Incoming<'_> {
    /// Decode as `C`, run the handler and encode the reply.
    fn serve<C: RpcCall>(self, handler: impl FnOnce(&mut C) -> ResultCode) -> Result<Bytes> {
        let (header, mut call) = decode_call::<C>(self.mode, self.payload)?;
        let result = handler(&mut call);
        let reply = header.response(result);
        if result.has_body() {
            Ok(encode_call(self.mode, &reply, Some(&call))?)
        } else {
            Ok(encode_status(self.mode, &reply)?)
        }
    }

    fn refuse(self, header: &RpcHeader) -> Result<Bytes> {
        Ok(encode_status(self.mode, &header.response(ResultCode::NotSupported))?)
    }
}

fn dispatch_esif(
    services: &dyn EsifServices,
    ctx: &CallContext,
    req: Incoming<'_>,
    header: &RpcHeader,
) -> Result<Bytes> {
    match header.function {
        FunctionId::GetConfig => req.serve(|c| services.get_config(ctx, c)),
        FunctionId::SetConfig => req.serve(|c| services.set_config(ctx, c)),
        FunctionId::ExecutePrimitive => req.serve(|c| services.execute_primitive(ctx, c)),
        FunctionId::WriteLog => req.serve(|c| services.write_log(ctx, c)),
        FunctionId::EventRegister => req.serve(|c| services.event_register(ctx, c)),
        FunctionId::EventUnregister => req.serve(|c| services.event_unregister(ctx, c)),
        FunctionId::SendEvent => req.serve(|c| services.send_event(ctx, c)),
        FunctionId::SendCommand => req.serve(|c| services.send_command(ctx, c)),
        _ => req.refuse(header),
    }
}

fn dispatch_app(
    app: &dyn AppInterface,
    ctx: &CallContext,
    req: Incoming<'_>,
    header: &RpcHeader,
) -> Result<Bytes> {
    match header.function {
        FunctionId::AppGetName => req.serve(|c| app.app_get_name(ctx, c)),
        FunctionId::AppGetDescription => req.serve(|c| app.app_get_description(ctx, c)),
        FunctionId::AppGetVersion => req.serve(|c| app.app_get_version(ctx, c)),
        FunctionId::AppGetIntro => req.serve(|c| app.app_get_intro(ctx, c)),
        FunctionId::AppCreate => req.serve(|c| app.app_create(ctx, c)),
        FunctionId::AppDestroy => req.serve(|c| app.app_destroy(ctx, c)),
        FunctionId::AppSuspend => req.serve(|c| app.app_suspend(ctx, c)),
        FunctionId::AppResume => req.serve(|c| app.app_resume(ctx, c)),
        FunctionId::AppGetStatus => req.serve(|c| app.app_get_status(ctx, c)),
        FunctionId::ParticipantCreate => req.serve(|c| app.participant_create(ctx, c)),
        FunctionId::ParticipantDestroy => req.serve(|c| app.participant_destroy(ctx, c)),
        FunctionId::DomainCreate => req.serve(|c| app.domain_create(ctx, c)),
        FunctionId::DomainDestroy => req.serve(|c| app.domain_destroy(ctx, c)),
        FunctionId::AppEvent => req.serve(|c| app.app_event(ctx, c)),
        _ => req.refuse(header),
    }
}
