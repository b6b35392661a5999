use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use varpack::Container;
use varpack::Value;

use crate::descriptor::Access;
use crate::descriptor::CallMode;
use crate::descriptor::InterfaceDescriptor;
use crate::error::DomainError;
use crate::error::Error;
use crate::error::INVALID_ARGS;
use crate::error::MethodError;
use crate::error::NO_REPLY;
use crate::error::NamedError;
use crate::error::UNKNOWN_METHOD;
use crate::error::UNKNOWN_PROPERTY;
use crate::error::VALUE_ERROR;
use crate::export::Dispatcher;
use crate::export::pack_return;
use crate::implementation::Implementation;
use crate::implementation::Return;
use crate::invocation::Invocation;
use crate::invocation::Reply;
use crate::marshal::Arg;
use crate::marshal::Convention;
use crate::marshal::prepare;
use crate::message::CallFlags;
use crate::signal::SignalEvent;
use crate::signal::SignalHandlerId;
use crate::signal::SignalRelay;
use crate::transport::ObjectHandler;

// ============================================================================
//  FIXTURES
// ============================================================================

fn interface() -> Arc<InterfaceDescriptor> {
    InterfaceDescriptor::builder("org.busbind.Test")
        .method("frobateStuff", &["a{sv}"], &["a{sv}"])
        .method("echo", &["s", "i"], &["s", "i"])
        .method("nonJsonFrobateStuff", &["i"], &["s"])
        .method("noInParameter", &[], &["s"])
        .method("arrayOutBadSig", &[], &["i"])
        .method("structArray", &[], &["a(ii)"])
        .method("alwaysThrowException", &[], &[])
        .property("PropReadOnly", "b", Access::Read)
        .property("PropWriteOnly", "s", Access::Write)
        .property("PropReadWrite", "v", Access::ReadWrite)
        .signal("signalFoo", &["s"])
        .build()
        .expect("valid interface")
}

fn echo_args() -> Vec<Arg> {
    vec![Arg::value("hello"), Arg::value(42)]
}

fn dispatcher(implementation: Implementation) -> Dispatcher {
    Dispatcher::new(interface(), Arc::new(implementation))
}

/// Runs one inbound call through the dispatcher and returns its immediate reply.
fn dispatch(dispatcher: &Dispatcher, member: &str, body: Container) -> Reply {
    let (invocation, mut rx) = Invocation::new(":1.99", "/org/busbind/Test", "org.busbind.Test", member);
    dispatcher.method_call(member, body, invocation);
    rx.try_recv().expect("dispatcher replied")
}

fn error_name(reply: Reply) -> String {
    reply.expect_err("an error reply").name()
}

// ============================================================================
//  ARGUMENT LISTS: FULL CONVENTION
// ============================================================================

#[test]
fn test_too_few_arguments() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let err = prepare(echo, CallMode::Sync, Convention::Full, vec![Arg::value("hello")]).unwrap_err();
    assert!(matches!(
        err,
        Error::ArgumentCount { ref method, expected: 2, actual: 1 } if method == "echo"
    ));
}

#[test]
fn test_too_many_arguments() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.extend([Arg::value(0u32), Arg::value(0u32), Arg::value(0u32), Arg::value(0u32)]);
    let err = prepare(echo, CallMode::Async, Convention::Full, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 5, actual: 6, .. }));
}

#[test]
fn test_trailing_flags_and_cancellable() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let token = CancellationToken::new();
    let mut args = echo_args();
    args.push(Arg::value(CallFlags::NO_AUTO_START.bits()));
    args.push(token.clone().into());

    let prepared = prepare(echo, CallMode::Sync, Convention::Full, args).unwrap();
    assert_eq!(prepared.flags, Some(CallFlags::NO_AUTO_START));
    assert!(prepared.cancel.is_some());
    assert!(!prepared.has_handler());
    assert_eq!(prepared.body.signature(), "(si)");
    assert_eq!(prepared.body.values(), &[Value::from("hello"), Value::Int32(42)]);
}

#[test]
fn test_trailers_in_any_order() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::reply(|_| {}));
    args.push(CancellationToken::new().into());
    args.push(Arg::value(0));

    let prepared = prepare(echo, CallMode::Async, Convention::Full, args).unwrap();
    assert_eq!(prepared.flags, Some(CallFlags::NONE));
    assert!(prepared.cancel.is_some());
    assert!(prepared.has_handler());
}

#[test]
fn test_reply_handler_rejected_in_sync_mode() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::reply(|_| {}));
    let err = prepare(echo, CallMode::Sync, Convention::Full, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentType { position: 2, .. }));
}

#[test]
fn test_async_without_handler_logs() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let prepared = prepare(echo, CallMode::Async, Convention::Full, echo_args()).unwrap();
    assert!(!prepared.has_handler());
    assert_eq!(prepared.flags, None);
}

#[test]
fn test_trailing_string_rejected() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::value("surprise"));
    let err = prepare(echo, CallMode::Async, Convention::Full, args).unwrap_err();
    assert!(matches!(
        err,
        Error::ArgumentType { ref method, position: 2, ref found } if method == "echo" && found == "string"
    ));
}

#[test]
fn test_negative_flags_rejected() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::value(-1));
    let err = prepare(echo, CallMode::Sync, Convention::Full, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentType { position: 2, .. }));
}

#[test]
fn test_handler_in_positional_slot_rejected() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let args = vec![Arg::reply(|_| {}), Arg::value(42)];
    let err = prepare(echo, CallMode::Async, Convention::Full, args).unwrap_err();
    assert!(matches!(
        err,
        Error::ArgumentType { position: 0, ref found, .. } if found == "a reply handler"
    ));
}

#[test]
fn test_positional_values_are_packed() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let args = vec![Arg::value(1), Arg::value(2)];
    let err = prepare(echo, CallMode::Sync, Convention::Full, args).unwrap_err();
    assert!(matches!(err, Error::Codec(varpack::Error::TypeMismatch { .. })));
}

#[test]
fn test_no_in_parameters() {
    let desc = interface();
    let method = desc.method("noInParameter").unwrap();
    let prepared = prepare(method, CallMode::Sync, Convention::Full, Vec::new()).unwrap();
    assert!(prepared.body.is_empty());
    assert_eq!(prepared.body.signature(), "()");
}

// ============================================================================
//  ARGUMENT LISTS: INTROSPECTED CONVENTION
// ============================================================================

#[test]
fn test_introspected_sync_accepts_optional_cancellable() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();

    let plain = prepare(echo, CallMode::Sync, Convention::Introspected, echo_args()).unwrap();
    assert!(plain.cancel.is_none());

    let mut args = echo_args();
    args.push(CancellationToken::new().into());
    let with_cancel = prepare(echo, CallMode::Sync, Convention::Introspected, args).unwrap();
    assert!(with_cancel.cancel.is_some());
}

#[test]
fn test_introspected_has_no_flags_slot() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::value(0u32));
    let err = prepare(echo, CallMode::Sync, Convention::Introspected, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentType { position: 2, .. }));

    let mut args = echo_args();
    args.push(CancellationToken::new().into());
    args.push(CancellationToken::new().into());
    let err = prepare(echo, CallMode::Sync, Convention::Introspected, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 3, actual: 4, .. }));
}

#[test]
fn test_introspected_async_requires_finish_handler() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();

    let err = prepare(echo, CallMode::Async, Convention::Introspected, echo_args()).unwrap_err();
    assert!(matches!(err, Error::ArgumentCount { expected: 3, actual: 2, .. }));

    let mut args = echo_args();
    args.push(Arg::finish(|_| {}));
    let prepared = prepare(echo, CallMode::Async, Convention::Introspected, args).unwrap();
    assert!(prepared.has_handler());
    assert!(prepared.cancel.is_none());

    let mut args = echo_args();
    args.push(CancellationToken::new().into());
    args.push(Arg::finish(|_| {}));
    let prepared = prepare(echo, CallMode::Async, Convention::Introspected, args).unwrap();
    assert!(prepared.cancel.is_some());
}

#[test]
fn test_introspected_async_rejects_reply_handler() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();
    let mut args = echo_args();
    args.push(Arg::reply(|_| {}));
    let err = prepare(echo, CallMode::Async, Convention::Introspected, args).unwrap_err();
    assert!(matches!(err, Error::ArgumentType { position: 2, .. }));
}

// ============================================================================
//  RETURN PACKING
// ============================================================================

#[test]
fn test_single_out_arg_is_wrapped() {
    let desc = interface();
    let method = desc.method("noInParameter").unwrap();
    let packed = pack_return(method, Return::Value("Yes!".into())).unwrap();
    assert_eq!(varpack::unpack(packed), vec![Value::from("Yes!")]);
}

#[test]
fn test_array_for_integer_is_value_error() {
    let desc = interface();
    let method = desc.method("arrayOutBadSig").unwrap();
    let err = pack_return(method, Return::Value(Value::from(vec![1, 2, 3]))).unwrap_err();
    assert_eq!(err.name(), VALUE_ERROR);
    assert_eq!(err.message(), "Service implementation returned an incorrect value type");
}

#[test]
fn test_multiple_out_args() {
    let desc = interface();
    let echo = desc.method("echo").unwrap();

    let tuple = pack_return(echo, Return::Tuple(vec!["hello".into(), 42.into()])).unwrap();
    assert_eq!(tuple.signature(), "(si)");

    let spread = pack_return(echo, Return::Value(Value::Array(vec!["hello".into(), 42.into()]))).unwrap();
    assert_eq!(spread, tuple);
}

#[test]
fn test_tuple_wrapped_for_single_out_arg() {
    let desc = interface();
    let method = desc.method("structArray").unwrap();
    let rows = vec![Value::from(vec![5, 6]), Value::from(vec![7, 8])];

    let packed = pack_return(method, Return::Tuple(rows.clone())).unwrap();
    let expected = Value::Array(vec![
        Value::Struct(vec![Value::Int32(5), Value::Int32(6)]),
        Value::Struct(vec![Value::Int32(7), Value::Int32(8)]),
    ]);
    assert_eq!(varpack::unpack(packed), vec![expected.clone()]);

    let packed = pack_return(method, Return::Value(Value::Array(rows))).unwrap();
    assert_eq!(varpack::unpack(packed), vec![expected]);
}

#[test]
fn test_empty_and_prepacked_returns() {
    let desc = interface();
    let method = desc.method("alwaysThrowException").unwrap();
    assert!(pack_return(method, Return::Empty).unwrap().is_empty());

    let prepacked = varpack::pack_str("s", vec!["anything".into()]).unwrap();
    let sent = pack_return(method, Return::Packed(prepacked.clone())).unwrap();
    assert_eq!(sent, prepacked);
}

// ============================================================================
//  DISPATCH
// ============================================================================

#[test]
fn test_sync_handler_reply() {
    let d = dispatcher(Implementation::new().method("noInParameter", |_| Ok(Value::from("Yes!"))));
    let reply = dispatch(&d, "noInParameter", Container::empty()).unwrap();
    assert_eq!(varpack::unpack(reply), vec![Value::from("Yes!")]);
}

#[test]
fn test_sync_handler_preferred_over_async() {
    let async_calls = Arc::new(AtomicUsize::new(0));
    let counter = async_calls.clone();
    let implementation = Implementation::new()
        .method("echo", |args| Ok(Return::Tuple(args)))
        .method_async("echo", move |_, invocation| {
            counter.fetch_add(1, Ordering::SeqCst);
            invocation.return_value(Container::empty());
        });
    let d = dispatcher(implementation);

    let body = varpack::pack_str("si", vec!["hello".into(), 42.into()]).unwrap();
    let reply = dispatch(&d, "echo", body).unwrap();
    assert_eq!(varpack::unpack(reply), vec![Value::from("hello"), Value::Int32(42)]);
    assert_eq!(async_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_async_handler_owns_invocation() {
    let parked: Arc<Mutex<Option<(Vec<Value>, Invocation)>>> = Arc::new(Mutex::new(None));
    let slot = parked.clone();
    let d = dispatcher(Implementation::new().method_async("echo", move |args, invocation| {
        *slot.lock().unwrap() = Some((args, invocation));
    }));

    let (invocation, mut rx) = Invocation::new(":1.99", "/org/busbind/Test", "org.busbind.Test", "echo");
    let body = varpack::pack_str("si", vec!["hello".into(), 42.into()]).unwrap();
    d.method_call("echo", body, invocation);
    assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));

    let (args, invocation) = parked.lock().unwrap().take().unwrap();
    invocation.return_value(varpack::pack_str("si", args).unwrap());
    let reply = rx.try_recv().unwrap().unwrap();
    assert_eq!(varpack::unpack(reply), vec![Value::from("hello"), Value::Int32(42)]);
}

#[test]
fn test_missing_handler_is_unknown_method() {
    let d = dispatcher(Implementation::new());
    let body = varpack::pack_str("a{sv}", vec![Value::Dict(Vec::new())]).unwrap();
    let err = dispatch(&d, "frobateStuff", body).unwrap_err();
    assert_eq!(err.name(), UNKNOWN_METHOD);
    assert_eq!(err.message(), "Method frobateStuff is not implemented");

    assert_eq!(error_name(dispatch(&d, "notDeclared", Container::empty())), UNKNOWN_METHOD);
}

#[test]
fn test_mismatched_arguments_are_invalid_args() {
    let d = dispatcher(Implementation::new().method("echo", |args| Ok(Return::Tuple(args))));
    let body = varpack::pack_str("ss", vec!["hello".into(), "42".into()]).unwrap();
    let err = dispatch(&d, "echo", body).unwrap_err();
    assert_eq!(err.name(), INVALID_ARGS);
    assert!(err.message().contains("(ss)"));
}

#[test]
fn test_plain_error_is_namespaced() {
    let d = dispatcher(
        Implementation::new()
            .method("alwaysThrowException", |_| -> anyhow::Result<Return> {
                Err(NamedError::new("Oops", "Oops").into())
            }),
    );
    let err = dispatch(&d, "alwaysThrowException", Container::empty()).unwrap_err();
    assert_eq!(err.name(), "org.busbind.Error.Oops");
    assert_eq!(err.message(), "Oops");
}

#[test]
fn test_namespaced_error_kept() {
    let d = dispatcher(Implementation::new().method("alwaysThrowException", |_| -> anyhow::Result<Return> {
        Err(NamedError::new("com.example.Failed", "nope").into())
    }));
    assert_eq!(error_name(dispatch(&d, "alwaysThrowException", Container::empty())), "com.example.Failed");
}

#[test]
fn test_untyped_error_is_namespaced() {
    let d = dispatcher(Implementation::new().method("alwaysThrowException", |_| -> anyhow::Result<Return> {
        Err(anyhow::anyhow!("something broke"))
    }));
    let err = dispatch(&d, "alwaysThrowException", Container::empty()).unwrap_err();
    assert_eq!(err.name(), "org.busbind.Error.Error");
    assert_eq!(err.message(), "something broke");
}

#[test]
fn test_domain_error_forwarded_verbatim() {
    let d = dispatcher(Implementation::new().method("alwaysThrowException", |_| -> anyhow::Result<Return> {
        Err(DomainError::new("org.example.Domain", 7, "exploded").into())
    }));
    let err = dispatch(&d, "alwaysThrowException", Container::empty()).unwrap_err();
    assert_eq!(err, MethodError::Domain(DomainError::new("org.example.Domain", 7, "exploded")));
}

#[test]
fn test_bad_return_value_still_replies() {
    let d = dispatcher(Implementation::new().method("arrayOutBadSig", |_| Ok(Value::from(vec![1, 2, 3]))));
    assert_eq!(error_name(dispatch(&d, "arrayOutBadSig", Container::empty())), VALUE_ERROR);
}

#[test]
fn test_dropped_invocation_replies_no_reply() {
    let d = dispatcher(Implementation::new().method_async("echo", |_, invocation| drop(invocation)));
    let body = varpack::pack_str("si", vec!["hello".into(), 42.into()]).unwrap();
    assert_eq!(error_name(dispatch(&d, "echo", body)), NO_REPLY);
}

// ============================================================================
//  PROPERTY HOOKS
// ============================================================================

#[test]
fn test_property_get() {
    let d = dispatcher(Implementation::new().field("PropReadOnly", true));
    let value = d.property_get("PropReadOnly").unwrap().unwrap();
    assert_eq!(value.value(), &Value::Bool(true));
    assert_eq!(value.ty(), &varpack::Type::Bool);

    assert_eq!(d.property_get("PropReadWrite").unwrap(), None);
}

#[test]
fn test_property_get_refusals() {
    let d = dispatcher(Implementation::new().field("PropWriteOnly", "secret"));
    assert_eq!(d.property_get("PropWriteOnly").unwrap_err().name(), INVALID_ARGS);
    assert_eq!(d.property_get("Missing").unwrap_err().name(), UNKNOWN_PROPERTY);
}

#[test]
fn test_property_set() {
    let implementation = Arc::new(Implementation::new().field("PropReadOnly", false));
    let d = Dispatcher::new(interface(), implementation.clone());

    d.property_set("PropWriteOnly", "written".into()).unwrap();
    assert_eq!(implementation.get("PropWriteOnly"), Some(Value::from("written")));

    assert_eq!(d.property_set("PropReadOnly", true.into()).unwrap_err().name(), INVALID_ARGS);
    assert_eq!(d.property_set("PropWriteOnly", 5.into()).unwrap_err().name(), INVALID_ARGS);
    assert_eq!(implementation.get("PropReadOnly"), Some(Value::Bool(false)));
}

#[test]
fn test_property_accessors_override_fields() {
    let store = Arc::new(Mutex::new(Value::from("initial")));
    let read = store.clone();
    let write = store.clone();
    let implementation = Implementation::new()
        .getter("PropReadWrite", move || Some(read.lock().unwrap().clone()))
        .setter("PropReadWrite", move |v| *write.lock().unwrap() = v);
    let d = dispatcher(implementation);

    d.property_set("PropReadWrite", Value::from(10)).unwrap();
    let got = d.property_get("PropReadWrite").unwrap().unwrap();
    // `v` properties hold a variant of whatever was set.
    assert_eq!(got.value().as_variant().map(|v| v.value().clone()), Some(Value::Int32(10)));
}

#[test]
fn test_property_get_all_skips_unreadable_and_unset() {
    let d = dispatcher(Implementation::new().field("PropReadOnly", true).field("PropWriteOnly", "hidden"));
    let all = d.property_get_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "PropReadOnly");
}

// ============================================================================
//  SIGNAL RELAY
// ============================================================================

fn event(name: &str) -> SignalEvent {
    SignalEvent { sender: ":1.1".into(), signal_name: name.into(), args: vec!["foobar".into()] }
}

#[test]
fn test_relay_preserves_registration_order() {
    let relay = SignalRelay::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let seen = seen.clone();
        relay.connect("signalFoo", Arc::new(move |_: &SignalEvent| seen.lock().unwrap().push(i)));
    }
    let other = seen.clone();
    relay.connect("other", Arc::new(move |_: &SignalEvent| other.lock().unwrap().push(99)));

    assert_eq!(relay.emit(&event("signalFoo")), 3);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_relay_emission_uses_snapshot() {
    let relay = Arc::new(SignalRelay::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let second: Arc<Mutex<Option<SignalHandlerId>>> = Arc::new(Mutex::new(None));

    let (r, s) = (relay.clone(), second.clone());
    relay.connect("signalFoo", Arc::new(move |_: &SignalEvent| {
        if let Some(id) = *s.lock().unwrap() {
            r.disconnect(id);
        }
    }));
    let h = hits.clone();
    let id = relay.connect("signalFoo", Arc::new(move |_: &SignalEvent| {
        h.fetch_add(1, Ordering::SeqCst);
    }));
    *second.lock().unwrap() = Some(id);

    relay.emit(&event("signalFoo"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    relay.emit(&event("signalFoo"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(relay.listener_count("signalFoo"), 1);
}

#[test]
fn test_relay_disconnect_is_idempotent() {
    let relay = SignalRelay::new();
    let id = relay.connect("signalFoo", Arc::new(|_: &SignalEvent| {}));
    assert!(relay.disconnect(id));
    assert!(!relay.disconnect(id));
    assert_eq!(relay.emit(&event("signalFoo")), 0);
}

// ============================================================================
//  ERRORS
// ============================================================================

#[test]
fn test_method_error_names() {
    let domain = MethodError::Domain(DomainError::new("org.example.Domain", 3, "m"));
    assert_eq!(domain.name(), "org.example.Domain.Code3");
    assert_eq!(MethodError::unknown_method("x").name(), UNKNOWN_METHOD);
    assert_eq!(MethodError::invalid_args("bad").to_string(), format!("{}: bad", INVALID_ARGS));
}

#[test]
fn test_remote_error_accessor() {
    let err = Error::from(crate::transport::Error::Remote(MethodError::named("a.B", "c")));
    assert_eq!(err.remote().map(MethodError::name), Some("a.B".to_string()));
    assert!(Error::NotExported.remote().is_none());
}
