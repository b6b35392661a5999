//! # Loopback Bus
//!
//! An in-process bus. Every [`LoopbackConnection`] made from one [`Bus`] can
//! own names, export objects, call the objects of any other connection, and
//! receive each other's signals. No bytes are framed; containers are handed
//! over as they are.
//!
//! ## Routing
//!
//! - Destinations are unique names (`:1.N`) or well-known names owned through
//!   [`LoopbackConnection::own_name`].
//! - Calls on `org.freedesktop.DBus.Properties` are answered by the bus from the
//!   target object's [`ObjectHandler`] property hooks.
//! - Method handlers run on a spawned task. The caller waits for the reply, the
//!   timeout or its cancellation token, whichever comes first.
//! - Signals are queued per receiving connection and delivered in emission order
//!   on that connection's delivery task.
//!
//! Connecting requires a tokio runtime.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use varpack::Container;
use varpack::Type;
use varpack::Value;

use crate::error::FAILED;
use crate::error::MethodError;
use crate::error::SERVICE_UNKNOWN;
use crate::error::UNKNOWN_METHOD;
use crate::error::UNKNOWN_OBJECT;
use crate::invocation::Invocation;
use crate::message::CallFlags;
use crate::message::MethodCall;
use crate::message::PROPERTIES_INTERFACE;
use crate::message::SignalMessage;
use crate::transport::Connection;
use crate::transport::Error;
use crate::transport::ObjectHandler;
use crate::transport::RegistrationId;
use crate::transport::Result;
use crate::transport::SignalRule;
use crate::transport::SignalSink;
use crate::transport::SubscriptionId;

/// Default reply timeout, matching the usual bus default.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Used when a call passes no timeout of its own.
    pub call_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { call_timeout: DEFAULT_CALL_TIMEOUT }
    }
}

impl BusConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// (unique name, path, interface)
type ObjectKey = (String, String, String);

struct Registration {
    id: RegistrationId,
    handler: Arc<dyn ObjectHandler>,
}

struct Subscription {
    owner: String,
    rule: SignalRule,
    sink: SignalSink,
}

type Delivery = (SignalSink, SignalMessage);

struct BusInner {
    config: BusConfig,
    guid: String,
    next_connection: AtomicU64,
    next_id: AtomicU64,
    /// Well-known name -> owning unique name.
    names: DashMap<String, String>,
    /// Unique name -> signal delivery queue.
    queues: DashMap<String, mpsc::UnboundedSender<Delivery>>,
    objects: DashMap<ObjectKey, Registration>,
    subscriptions: DashMap<u64, Subscription>,
}

impl BusInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves a destination to the unique name behind it.
    fn resolve(&self, name: &str) -> Option<String> {
        if name.starts_with(':') {
            return self.queues.contains_key(name).then(|| name.to_string());
        }
        self.names.get(name).map(|owner| owner.clone())
    }

    fn handler(&self, owner: &str, path: &str, interface: &str) -> Option<Arc<dyn ObjectHandler>> {
        let key = (owner.to_string(), path.to_string(), interface.to_string());
        self.objects.get(&key).map(|r| r.handler.clone())
    }

    fn sender_matches(&self, rule: &SignalRule, sender: &str) -> bool {
        match rule.sender.as_deref() {
            None => true,
            Some(name) if name == sender => true,
            Some(name) => self.resolve(name).is_some_and(|owner| owner == sender),
        }
    }
}

/// An in-process bus. Cloning shares it.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let guid = format!("{:032x}", rand::random::<u128>());
        tracing::debug!(guid = %guid, "loopback bus created");
        Self {
            inner: Arc::new(BusInner {
                config,
                guid,
                next_connection: AtomicU64::new(1),
                next_id: AtomicU64::new(1),
                names: DashMap::new(),
                queues: DashMap::new(),
                objects: DashMap::new(),
                subscriptions: DashMap::new(),
            }),
        }
    }

    /// A random identifier for this bus instance.
    pub fn guid(&self) -> &str {
        &self.inner.guid
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Opens a new connection with a fresh unique name.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Arc<LoopbackConnection> {
        let n = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let unique_name = format!(":1.{}", n);

        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.inner.queues.insert(unique_name.clone(), tx);
        tokio::spawn(async move {
            while let Some((sink, message)) = rx.recv().await {
                sink(message);
            }
        });

        tracing::debug!(name = %unique_name, "connection opened");
        Arc::new(LoopbackConnection {
            bus: self.inner.clone(),
            unique_name,
            closed: AtomicBool::new(false),
        })
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("guid", &self.inner.guid)
            .field("connections", &self.inner.queues.len())
            .field("objects", &self.inner.objects.len())
            .finish()
    }
}

pub struct LoopbackConnection {
    bus: Arc<BusInner>,
    unique_name: String,
    closed: AtomicBool,
}

impl LoopbackConnection {
    /// Takes ownership of a well-known name.
    pub fn own_name(&self, name: &str) -> Result<()> {
        self.check_open()?;
        match self.bus.names.entry(name.to_string()) {
            Entry::Occupied(entry) if entry.get() != &self.unique_name => {
                Err(Error::Io(format!("name '{}' is already owned by {}", name, entry.get())))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(self.unique_name.clone());
                tracing::debug!(name = %name, owner = %self.unique_name, "name acquired");
                Ok(())
            }
        }
    }

    /// Releases a well-known name. Returns whether this connection owned it.
    pub fn release_name(&self, name: &str) -> bool {
        self.bus.names.remove_if(name, |_, owner| owner == &self.unique_name).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops this connection's names, objects and subscriptions. Later calls
    /// fail with [`Error::Disconnected`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = &self.unique_name;
        self.bus.names.retain(|_, owner| owner != me);
        self.bus.objects.retain(|(owner, _, _), _| owner != me);
        self.bus.subscriptions.retain(|_, sub| &sub.owner != me);
        self.bus.queues.remove(me);
        tracing::debug!(name = %me, "connection closed");
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() { Err(Error::Disconnected) } else { Ok(()) }
    }

    /// Answers a call on the properties interface from the target's handler.
    fn properties(&self, owner: &str, call: MethodCall) -> Result<Container> {
        let args = varpack::unpack(call.body);
        let interface = match args.first() {
            Some(Value::String(interface)) => interface.clone(),
            _ => return Err(MethodError::invalid_args("Expected an interface name").into()),
        };
        let handler = self.bus.handler(owner, &call.path, &interface).ok_or_else(|| {
            MethodError::named(
                UNKNOWN_OBJECT,
                format!("No such interface '{}' on object at path {}", interface, call.path),
            )
        })?;

        match (call.member.as_str(), args.as_slice()) {
            ("Get", [_, Value::String(name)]) => match handler.property_get(name)? {
                Some(variant) => Ok(varpack::pack(&[Type::Variant], vec![variant.into()])?),
                None => Err(MethodError::named(FAILED, format!("Property '{}' has no value", name)).into()),
            },
            ("Set", [_, Value::String(name), Value::Variant(variant)]) => {
                handler.property_set(name, variant.value().clone())?;
                Ok(Container::empty())
            }
            ("GetAll", [_]) => {
                let entries = handler
                    .property_get_all()
                    .into_iter()
                    .map(|(name, variant)| (Value::from(name), Value::from(variant)))
                    .collect();
                let all = Type::Dict(Box::new(Type::String), Box::new(Type::Variant));
                Ok(varpack::pack(&[all], vec![Value::Dict(entries)])?)
            }
            ("Get" | "Set" | "GetAll", _) => {
                Err(MethodError::invalid_args(format!("Invalid arguments for {}", call.member)).into())
            }
            (member, _) => Err(MethodError::named(
                UNKNOWN_METHOD,
                format!("No such method '{}' on {}", member, PROPERTIES_INTERFACE),
            )
            .into()),
        }
    }
}

#[async_trait::async_trait]
impl Connection for LoopbackConnection {
    fn unique_name(&self) -> String {
        self.unique_name.clone()
    }

    async fn call(
        &self,
        call: MethodCall,
        flags: CallFlags,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<Container> {
        self.check_open()?;
        let cancel = cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::trace!(
            destination = %call.destination,
            path = %call.path,
            member = %call.member,
            flags = flags.bits(),
            "call"
        );

        let owner = self.bus.resolve(&call.destination).ok_or_else(|| {
            MethodError::named(
                SERVICE_UNKNOWN,
                format!("The name {} was not provided by any .service files", call.destination),
            )
        })?;

        if call.interface == PROPERTIES_INTERFACE {
            return self.properties(&owner, call);
        }

        let handler = self.bus.handler(&owner, &call.path, &call.interface).ok_or_else(|| {
            MethodError::named(
                UNKNOWN_OBJECT,
                format!("No such interface '{}' on object at path {}", call.interface, call.path),
            )
        })?;

        let (invocation, reply) =
            Invocation::new(self.unique_name.clone(), call.path, call.interface, call.member.clone());
        let member = call.member;
        let body = call.body;
        tokio::spawn(async move {
            handler.method_call(&member, body, invocation);
        });

        let timeout = timeout.unwrap_or(self.bus.config.call_timeout);
        tokio::select! {
            biased;
            reply = reply => match reply {
                Ok(Ok(container)) => Ok(container),
                Ok(Err(e)) => Err(Error::Remote(e)),
                Err(_) => Err(Error::Disconnected),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
        }
    }

    fn subscribe_signal(&self, rule: SignalRule, sink: SignalSink) -> SubscriptionId {
        let id = self.bus.next_id();
        self.bus.subscriptions.insert(id, Subscription { owner: self.unique_name.clone(), rule, sink });
        SubscriptionId(id)
    }

    fn unsubscribe_signal(&self, id: SubscriptionId) {
        self.bus.subscriptions.remove(&id.0);
    }

    fn export(&self, path: &str, interface: &str, handler: Arc<dyn ObjectHandler>) -> Result<RegistrationId> {
        self.check_open()?;
        if !varpack::codec::is_valid_object_path(path) {
            return Err(Error::Io(format!("invalid object path '{}'", path)));
        }

        let key = (self.unique_name.clone(), path.to_string(), interface.to_string());
        match self.bus.objects.entry(key) {
            Entry::Occupied(_) => {
                Err(Error::Io(format!("an object is already exported for {} at {}", interface, path)))
            }
            Entry::Vacant(entry) => {
                let id = RegistrationId(self.bus.next_id());
                entry.insert(Registration { id, handler });
                Ok(id)
            }
        }
    }

    fn unexport(&self, id: RegistrationId) {
        self.bus.objects.retain(|_, registration| registration.id != id);
    }

    fn emit_signal(&self, mut signal: SignalMessage) -> Result<()> {
        self.check_open()?;
        signal.sender = self.unique_name.clone();

        let targets: Vec<(String, SignalSink)> = self
            .bus
            .subscriptions
            .iter()
            .filter(|sub| sub.rule.matches_route(&signal) && self.bus.sender_matches(&sub.rule, &signal.sender))
            .map(|sub| (sub.owner.clone(), sub.sink.clone()))
            .collect();

        tracing::trace!(member = %signal.member, receivers = targets.len(), "signal");
        for (owner, sink) in targets {
            if let Some(queue) = self.bus.queues.get(&owner) {
                let _ = queue.send((sink, signal.clone()));
            }
        }
        Ok(())
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LoopbackConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnection")
            .field("unique_name", &self.unique_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
