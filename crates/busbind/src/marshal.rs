//! # Call Marshaller
//!
//! Turns a method descriptor plus a flat argument list into a packed call, and
//! delivers the reply either to the waiting caller (sync) or to a completion
//! handler (async).
//!
//! ## Argument Lists
//!
//! Callers pass the declared positional arguments followed by optional trailers.
//! Two conventions exist:
//!
//! - **Full**: `n..=n+3` arguments. Trailers are scanned from the end; an integer
//!   value is the call flags, a [`CancellationToken`] is the cancellable, and (async
//!   only) a reply handler receives `Result<Vec<Value>>`. Without a handler, errors
//!   are logged.
//! - **Introspected**: no flags slot. Sync takes `n..=n+1` (optional cancellable);
//!   async takes `n+1..=n+2`, the last being a finish handler that receives an
//!   [`AsyncResult`], optionally preceded by a cancellable.
//!
//! ## Invariants
//!
//! - Argument errors are raised before anything reaches the connection.
//! - Every async call is a [`PendingCall`] that is removed, and completed, exactly once.
//! - Replies are checked against the declared out-signature before being handed out.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use varpack::Container;
use varpack::Type;
use varpack::Value;

use crate::config::Config;
use crate::descriptor::CallMode;
use crate::descriptor::MethodDescriptor;
use crate::error::Error;
use crate::error::Result;
use crate::message::CallFlags;
use crate::message::MethodCall;
use crate::message::Target;
use crate::transport;
use crate::transport::Connection;

/// Most trailers a full-convention call accepts: flags, cancellable, reply handler.
pub const MAX_TRAILING_ARGS: usize = 3;

/// Receives the unpacked reply of a full-convention async call.
pub type ReplyHandler = Box<dyn FnOnce(Result<Vec<Value>>) + Send + 'static>;

/// Receives the raw result of an introspected-convention async call.
pub type FinishHandler = Box<dyn FnOnce(AsyncResult) + Send + 'static>;

/// One entry of a call's flat argument list.
pub enum Arg {
    Value(Value),
    Cancellable(CancellationToken),
    Reply(ReplyHandler),
    Finish(FinishHandler),
}

impl Arg {
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn reply(f: impl FnOnce(Result<Vec<Value>>) + Send + 'static) -> Self {
        Self::Reply(Box::new(f))
    }

    pub fn finish(f: impl FnOnce(AsyncResult) + Send + 'static) -> Self {
        Self::Finish(Box::new(f))
    }

    pub(crate) fn kind(&self) -> String {
        match self {
            Self::Value(v) => v.type_name().to_string(),
            Self::Cancellable(_) => "a cancellable".to_string(),
            Self::Reply(_) => "a reply handler".to_string(),
            Self::Finish(_) => "a finish handler".to_string(),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<CancellationToken> for Arg {
    fn from(token: CancellationToken) -> Self {
        Self::Cancellable(token)
    }
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            other => write!(f, "Arg({})", other.kind()),
        }
    }
}

/// Which argument-list convention a proxy uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Convention {
    #[default]
    Full,
    Introspected,
}

enum Completion {
    /// No handler was supplied; errors are logged.
    Log,
    Reply(ReplyHandler),
    Finish(FinishHandler),
}

/// A validated call, ready to send.
pub struct PreparedCall {
    pub body: Container,
    /// `None` when the caller passed no flags.
    pub flags: Option<CallFlags>,
    pub cancel: Option<CancellationToken>,
    completion: Completion,
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("body", &self.body)
            .field("flags", &self.flags)
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

impl PreparedCall {
    /// True if the caller supplied a handler (reply or finish).
    pub fn has_handler(&self) -> bool {
        !matches!(self.completion, Completion::Log)
    }
}

fn count_error(method: &MethodDescriptor, expected: usize, actual: usize) -> Error {
    Error::ArgumentCount { method: method.name.clone(), expected, actual }
}

fn type_error(method: &MethodDescriptor, position: usize, arg: &Arg) -> Error {
    Error::ArgumentType { method: method.name.clone(), position, found: arg.kind() }
}

/// Validates and splits `args`, then packs the positional part against the
/// method's in-signature.
pub fn prepare(
    method: &MethodDescriptor,
    mode: CallMode,
    convention: Convention,
    mut args: Vec<Arg>,
) -> Result<PreparedCall> {
    let n = method.in_types.len();
    let actual = args.len();

    let mut flags = None;
    let mut cancel = None;
    let mut completion = Completion::Log;

    match convention {
        Convention::Full => {
            if actual < n {
                return Err(count_error(method, n, actual));
            }
            if actual > n + MAX_TRAILING_ARGS {
                return Err(count_error(method, n + MAX_TRAILING_ARGS, actual));
            }

            while args.len() > n {
                let position = args.len() - 1;
                let Some(arg) = args.pop() else { break };
                match arg {
                    Arg::Reply(f) if mode == CallMode::Async => completion = Completion::Reply(f),
                    Arg::Cancellable(token) => cancel = Some(token),
                    Arg::Value(v) => match v.as_u32() {
                        Some(bits) => flags = Some(CallFlags(bits)),
                        None => return Err(type_error(method, position, &Arg::Value(v))),
                    },
                    other => return Err(type_error(method, position, &other)),
                }
            }
        }
        Convention::Introspected => {
            let (min, max) = match mode {
                CallMode::Sync => (n, n + 1),
                CallMode::Async => (n + 1, n + 2),
            };
            if actual < min {
                return Err(count_error(method, min, actual));
            }
            if actual > max {
                return Err(count_error(method, max, actual));
            }

            if mode == CallMode::Async {
                let position = args.len() - 1;
                match args.pop() {
                    Some(Arg::Finish(f)) => completion = Completion::Finish(f),
                    Some(other) => return Err(type_error(method, position, &other)),
                    None => return Err(count_error(method, min, actual)),
                }
            }
            if args.len() > n {
                let position = args.len() - 1;
                match args.pop() {
                    Some(Arg::Cancellable(token)) => cancel = Some(token),
                    Some(other) => return Err(type_error(method, position, &other)),
                    None => return Err(count_error(method, min, actual)),
                }
            }
        }
    }

    let values = args
        .into_iter()
        .enumerate()
        .map(|(position, arg)| match arg {
            Arg::Value(v) => Ok(v),
            other => Err(type_error(method, position, &other)),
        })
        .collect::<Result<Vec<_>>>()?;

    let body = varpack::pack(&method.in_types, values)?;

    Ok(PreparedCall { body, flags, cancel, completion })
}

/// Checks a reply against the out-signature and unpacks it.
fn finish_reply(method: &str, reply: transport::Result<Container>, out_types: &[Type]) -> Result<Vec<Value>> {
    let container = reply?;
    varpack::unpack_as(container, out_types)
        .map_err(|source| Error::ReplyMismatch { method: method.to_string(), source })
}

/// The not-yet-unpacked outcome of an introspected-convention async call.
#[derive(Debug)]
pub struct AsyncResult {
    method: String,
    out_types: Vec<Type>,
    reply: transport::Result<Container>,
}

impl AsyncResult {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Unpacks the whole result against the out-signature, or returns the call's error.
    pub fn finish(self) -> Result<Vec<Value>> {
        finish_reply(&self.method, self.reply, &self.out_types)
    }
}

/// Identifies an in-flight async call.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct CallId(pub u64);

/// What `invoke` produced.
#[derive(Debug)]
pub enum Outcome {
    /// A sync call's unpacked reply.
    Done(Vec<Value>),
    /// An async call was submitted.
    Pending(CallId),
}

/// One in-flight async call.
pub struct PendingCall {
    method: String,
    out_types: Vec<Type>,
    call: MethodCall,
    cancel: Option<CancellationToken>,
    // Handlers are only `Send`; the mutex lets the pending map be shared.
    completion: Mutex<Completion>,
}

impl PendingCall {
    fn complete(self, reply: transport::Result<Container>) {
        tracing::debug!(
            member = %self.call.member,
            signature = %self.call.body.signature(),
            ok = reply.is_ok(),
            "call completed"
        );

        let completion = self.completion.into_inner().unwrap_or_else(PoisonError::into_inner);
        match completion {
            Completion::Reply(f) => f(finish_reply(&self.method, reply, &self.out_types)),
            Completion::Finish(f) => f(AsyncResult { method: self.method, out_types: self.out_types, reply }),
            Completion::Log => {
                if let Err(e) = finish_reply(&self.method, reply, &self.out_types) {
                    tracing::warn!(method = %self.method, "Ignored error from remote method: {}", e);
                }
            }
        }
    }
}

/// Issues calls for one remote target.
pub struct Marshaller {
    conn: Arc<dyn Connection>,
    target: Target,
    config: Config,
    pending: Arc<DashMap<u64, PendingCall>>,
    seq_gen: AtomicU64,
}

impl Marshaller {
    pub fn new(conn: Arc<dyn Connection>, target: Target, config: Config) -> Self {
        Self {
            conn,
            target,
            config,
            pending: Arc::new(DashMap::new()),
            seq_gen: AtomicU64::new(1),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of async calls still awaiting completion.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Fires the cancellation token of every pending call that has one.
    ///
    /// The calls still complete, through the normal error path.
    pub fn cancel_pending(&self) {
        for entry in self.pending.iter() {
            if let Some(token) = &entry.value().cancel {
                token.cancel();
            }
        }
    }

    /// Sync calls resolve to `Outcome::Done`, async calls to `Outcome::Pending`.
    pub async fn invoke(
        &self,
        method: &MethodDescriptor,
        mode: CallMode,
        convention: Convention,
        args: Vec<Arg>,
    ) -> Result<Outcome> {
        match mode {
            CallMode::Sync => self.call_sync(method, convention, args).await.map(Outcome::Done),
            CallMode::Async => self.call_async(method, convention, args).map(Outcome::Pending),
        }
    }

    /// Sends the call and waits for its unpacked reply.
    pub async fn call_sync(
        &self,
        method: &MethodDescriptor,
        convention: Convention,
        args: Vec<Arg>,
    ) -> Result<Vec<Value>> {
        let prepared = prepare(method, CallMode::Sync, convention, args)?;
        let flags = prepared.flags.unwrap_or(self.config.default_flags);
        let call = MethodCall::new(&self.target, method.name.clone(), prepared.body);

        let reply = self.conn.call(call, flags, self.config.call_timeout, prepared.cancel).await;
        finish_reply(&method.name, reply, &method.out_types)
    }

    /// Submits the call and returns at once; the completion runs on a spawned task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call_async(
        &self,
        method: &MethodDescriptor,
        convention: Convention,
        args: Vec<Arg>,
    ) -> Result<CallId> {
        let prepared = prepare(method, CallMode::Async, convention, args)?;
        let flags = prepared.flags.unwrap_or(self.config.default_flags);
        let call = MethodCall::new(&self.target, method.name.clone(), prepared.body);

        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(seq, PendingCall {
            method: method.name.clone(),
            out_types: method.out_types.clone(),
            call: call.clone(),
            cancel: prepared.cancel.clone(),
            completion: Mutex::new(prepared.completion),
        });

        let conn = self.conn.clone();
        let pending = self.pending.clone();
        let timeout = self.config.call_timeout;
        tokio::spawn(async move {
            let reply = conn.call(call, flags, timeout, prepared.cancel).await;
            if let Some((_, pending_call)) = pending.remove(&seq) {
                pending_call.complete(reply);
            }
        });

        Ok(CallId(seq))
    }

    /// Sends a call that bypasses argument handling (property traffic).
    pub(crate) async fn raw_call(&self, call: MethodCall) -> transport::Result<Container> {
        self.conn.call(call, self.config.default_flags, self.config.call_timeout, None).await
    }
}
