//! Interface tables that forward every call across the connection.
//!
//! A proxy turns a local trait call into a blocking RPC and maps local
//! failures (no session, disconnect, expiry) onto result codes, so code
//! written against [`AppInterface`] or [`EsifServices`] cannot tell a proxy
//! from a local implementation.

use std::sync::Arc;

use esifrpc_codec::calls::{
    AppCreate, AppDestroy, AppEvent, AppGetDescription, AppGetIntro, AppGetName, AppGetStatus,
    AppGetVersion, AppResume, AppSuspend, DomainCreate, DomainDestroy, EventRegister,
    EventUnregister, ExecutePrimitive, GetConfig, ParticipantCreate, ParticipantDestroy,
    SendCommand, SendEvent, SetConfig, WriteLog,
};
use esifrpc_codec::{Handle, ResultCode, RpcCall, INVALID_HANDLE};

use crate::iface::{AppInterface, CallContext, EsifServices};
use crate::runtime::Shared;
use crate::session::SessionRef;

fn forward<C: RpcCall>(shared: &Shared, session: Option<SessionRef>, call: &mut C) -> ResultCode {
    let Some(session) = session else {
        tracing::debug!(function = %C::FUNCTION, "no session to forward to");
        return ResultCode::InvalidHandle;
    };
    match shared.call(&session, call) {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(
                function = %C::FUNCTION,
                session = session.handle(),
                error = %err,
                "forwarded call failed"
            );
            err.result_code()
        }
    }
}

/// Host-side [`AppInterface`] reaching applications over their sessions.
///
/// Calls made before an application has an app handle (`AppGetName` through
/// `AppCreate`) go to the session bound to the calling thread with
/// [`SessionRegistry::bind_thread`](crate::SessionRegistry::bind_thread).
/// Every other call goes to the session whose application answered
/// `AppCreate` with the call's `app_handle`. An `AppCreate` answered with an
/// app handle another live session already holds fails with
/// `InvalidHandle`.
#[derive(Clone)]
pub struct AppProxy {
    shared: Arc<Shared>,
}

impl AppProxy {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn by_thread<C: RpcCall>(&self, call: &mut C) -> ResultCode {
        forward(&self.shared, self.shared.sessions.by_thread(), call)
    }

    fn by_app<C: RpcCall>(&self, app_handle: Handle, call: &mut C) -> ResultCode {
        forward(&self.shared, self.shared.sessions.by_app_handle(app_handle), call)
    }
}

impl AppInterface for AppProxy {
    fn app_get_name(&self, _ctx: &CallContext, call: &mut AppGetName) -> ResultCode {
        self.by_thread(call)
    }

    fn app_get_description(&self, _ctx: &CallContext, call: &mut AppGetDescription) -> ResultCode {
        self.by_thread(call)
    }

    fn app_get_version(&self, _ctx: &CallContext, call: &mut AppGetVersion) -> ResultCode {
        self.by_thread(call)
    }

    fn app_get_intro(&self, _ctx: &CallContext, call: &mut AppGetIntro) -> ResultCode {
        self.by_thread(call)
    }

    fn app_create(&self, _ctx: &CallContext, call: &mut AppCreate) -> ResultCode {
        let session = self.shared.sessions.by_thread();
        let target = session.clone();
        let code = forward(&self.shared, session, call);
        let Some(session) = target else {
            return code;
        };
        if !code.is_ok() || call.app_handle == INVALID_HANDLE {
            return code;
        }
        match self.shared.sessions.assign_app_handle(session.handle(), call.app_handle) {
            Ok(()) => {
                tracing::debug!(
                    session = session.handle(),
                    app_handle = call.app_handle,
                    "application created"
                );
                code
            }
            Err(err) => {
                tracing::warn!(session = session.handle(), error = %err, "app handle refused");
                err.result_code()
            }
        }
    }

    fn app_destroy(&self, _ctx: &CallContext, call: &mut AppDestroy) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn app_suspend(&self, _ctx: &CallContext, call: &mut AppSuspend) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn app_resume(&self, _ctx: &CallContext, call: &mut AppResume) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn app_get_status(&self, _ctx: &CallContext, call: &mut AppGetStatus) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn participant_create(&self, _ctx: &CallContext, call: &mut ParticipantCreate) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn participant_destroy(&self, _ctx: &CallContext, call: &mut ParticipantDestroy) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn domain_create(&self, _ctx: &CallContext, call: &mut DomainCreate) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn domain_destroy(&self, _ctx: &CallContext, call: &mut DomainDestroy) -> ResultCode {
        self.by_app(call.app_handle, call)
    }

    fn app_event(&self, _ctx: &CallContext, call: &mut AppEvent) -> ResultCode {
        self.by_app(call.app_handle, call)
    }
}

/// App-side [`EsifServices`] reaching the host this client connected to.
#[derive(Clone)]
pub struct EsifProxy {
    shared: Arc<Shared>,
    session: Handle,
}

impl EsifProxy {
    pub(crate) fn new(shared: Arc<Shared>, session: Handle) -> Self {
        Self { shared, session }
    }

    fn forward<C: RpcCall>(&self, call: &mut C) -> ResultCode {
        let session = self.shared.sessions.by_handle(self.session);
        if session.is_none() {
            return ResultCode::Disconnected;
        }
        forward(&self.shared, session, call)
    }
}

impl EsifServices for EsifProxy {
    fn get_config(&self, _ctx: &CallContext, call: &mut GetConfig) -> ResultCode {
        self.forward(call)
    }

    fn set_config(&self, _ctx: &CallContext, call: &mut SetConfig) -> ResultCode {
        self.forward(call)
    }

    fn execute_primitive(&self, _ctx: &CallContext, call: &mut ExecutePrimitive) -> ResultCode {
        self.forward(call)
    }

    fn write_log(&self, _ctx: &CallContext, call: &mut WriteLog) -> ResultCode {
        self.forward(call)
    }

    fn event_register(&self, _ctx: &CallContext, call: &mut EventRegister) -> ResultCode {
        self.forward(call)
    }

    fn event_unregister(&self, _ctx: &CallContext, call: &mut EventUnregister) -> ResultCode {
        self.forward(call)
    }

    fn send_event(&self, _ctx: &CallContext, call: &mut SendEvent) -> ResultCode {
        self.forward(call)
    }

    fn send_command(&self, _ctx: &CallContext, call: &mut SendCommand) -> ResultCode {
        self.forward(call)
    }
}
