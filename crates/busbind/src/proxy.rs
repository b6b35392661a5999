//! # Proxies
//!
//! A local stand-in for one interface of a remote object.
//!
//! ## Philosophy
//!
//! - **Explicit Members**: Instead of attaching functions at runtime, a proxy
//!   resolves member names (`echoSync`, `echoRemote`, `echoFinish`, properties)
//!   through the descriptor's member table, fetched once by [`Proxy::synthesize`].
//! - **Optimistic Writes**: Setting a property updates the cache at once and sends
//!   the write in the background. A failed write is logged and the cache is left
//!   as written.
//! - **One Subscription**: Each proxy holds a single signal subscription for its
//!   object. It feeds the [`SignalRelay`] and keeps the property cache current
//!   from `PropertiesChanged`.

use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::DashMap;
use varpack::Container;
use varpack::Type;
use varpack::Value;
use varpack::Variant;

use crate::config::Config;
use crate::descriptor::Access;
use crate::descriptor::InterfaceDescriptor;
use crate::descriptor::Member;
use crate::descriptor::MemberTable;
use crate::descriptor::PropertyDescriptor;
use crate::error::Error;
use crate::error::Result;
use crate::marshal::Arg;
use crate::marshal::AsyncResult;
use crate::marshal::Convention;
use crate::marshal::Marshaller;
use crate::marshal::Outcome;
use crate::message::MethodCall;
use crate::message::PROPERTIES_CHANGED;
use crate::message::PROPERTIES_INTERFACE;
use crate::message::SignalMessage;
use crate::message::Target;
use crate::signal::Listener;
use crate::signal::SignalEvent;
use crate::signal::SignalHandlerId;
use crate::signal::SignalRelay;
use crate::transport::Connection;
use crate::transport::SignalRule;
use crate::transport::SignalSink;
use crate::transport::SubscriptionId;

pub struct ProxyBuilder {
    conn: Arc<dyn Connection>,
    descriptor: Arc<InterfaceDescriptor>,
    name: String,
    path: String,
    config: Config,
    convention: Convention,
}

impl ProxyBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    /// Creates the proxy and subscribes it to its object's signals.
    pub fn build(self) -> Proxy {
        let target = Target::new(self.name, self.path, self.descriptor.name());
        let cache = Arc::new(DashMap::new());
        let relay = Arc::new(SignalRelay::new());

        let rule = SignalRule {
            sender: Some(target.name.clone()),
            path: Some(target.path.clone()),
            interface: None,
            member: None,
        };
        let sink = signal_sink(target.interface.clone(), cache.clone(), relay.clone());
        let subscription = self.conn.subscribe_signal(rule, sink);

        tracing::debug!(target = %target, convention = ?self.convention, "proxy created");

        Proxy {
            descriptor: self.descriptor,
            members: OnceLock::new(),
            marshaller: Marshaller::new(self.conn, target, self.config),
            convention: self.convention,
            cache,
            relay,
            subscription,
        }
    }
}

fn signal_sink(interface: String, cache: Arc<DashMap<String, Value>>, relay: Arc<SignalRelay>) -> SignalSink {
    Arc::new(move |msg: SignalMessage| {
        if msg.interface == PROPERTIES_INTERFACE && msg.member == PROPERTIES_CHANGED {
            apply_properties_changed(&cache, &interface, msg.body);
        } else if msg.interface == interface {
            let args = msg.body.map(varpack::unpack).unwrap_or_default();
            let event = SignalEvent { sender: msg.sender, signal_name: msg.member, args };
            let delivered = relay.emit(&event);
            tracing::trace!(signal = %event.signal_name, delivered, "signal relayed");
        }
    })
}

/// Applies a `(sa{sv}as)` change notification to the cache.
fn apply_properties_changed(cache: &DashMap<String, Value>, interface: &str, body: Option<Container>) {
    let mut values = body.map(varpack::unpack).unwrap_or_default().into_iter();
    let (Some(Value::String(changed_interface)), Some(changed), Some(invalidated)) =
        (values.next(), values.next(), values.next())
    else {
        tracing::warn!("malformed PropertiesChanged notification");
        return;
    };
    if changed_interface != interface {
        return;
    }

    if let Value::Dict(entries) = changed {
        for (key, value) in entries {
            if let (Value::String(name), Value::Variant(v)) = (key, value) {
                cache.insert(name, v.into_value());
            }
        }
    }
    if let Value::Array(names) = invalidated {
        for name in names {
            if let Value::String(name) = name {
                cache.remove(&name);
            }
        }
    }
}

pub struct Proxy {
    descriptor: Arc<InterfaceDescriptor>,
    members: OnceLock<Arc<MemberTable>>,
    marshaller: Marshaller,
    convention: Convention,
    cache: Arc<DashMap<String, Value>>,
    relay: Arc<SignalRelay>,
    subscription: SubscriptionId,
}

impl Proxy {
    pub fn builder(
        conn: Arc<dyn Connection>,
        descriptor: Arc<InterfaceDescriptor>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> ProxyBuilder {
        ProxyBuilder {
            conn,
            descriptor,
            name: name.into(),
            path: path.into(),
            config: Config::default(),
            convention: Convention::default(),
        }
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    pub fn target(&self) -> &Target {
        self.marshaller.target()
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    /// Attaches the member table. Later calls return the same table.
    pub fn synthesize(&self) -> Arc<MemberTable> {
        self.members
            .get_or_init(|| {
                let members = self.descriptor.members();
                tracing::debug!(interface = %self.descriptor.name(), members = members.len(), "members synthesized");
                members
            })
            .clone()
    }

    pub fn members(&self) -> Arc<MemberTable> {
        self.synthesize()
    }

    /// Invokes a member by its synthesized name.
    ///
    /// - `<M>Sync` returns `Outcome::Done` with the reply values.
    /// - `<M>Remote` returns `Outcome::Pending`.
    /// - A property with no arguments reads it (`Done` with zero or one value);
    ///   with one value argument, writes it (`Done` with nothing).
    ///
    /// `<M>Finish` takes an [`AsyncResult`] rather than arguments; see [`Proxy::finish`].
    pub async fn invoke_member(&self, name: &str, args: Vec<Arg>) -> Result<Outcome> {
        let members = self.synthesize();
        let member = members.get(name).ok_or_else(|| Error::UnknownMember(name.to_string()))?;

        match *member {
            Member::Call { method, mode } => {
                let method = &self.descriptor.methods()[method];
                self.marshaller.invoke(method, mode, self.convention, args).await
            }
            Member::Property { property } => {
                let property = &self.descriptor.properties()[property];
                let mut args = args;
                match (args.pop(), args.is_empty()) {
                    (None, _) => {
                        let value = self.get_property(&property.name).await?;
                        Ok(Outcome::Done(value.into_iter().collect()))
                    }
                    (Some(Arg::Value(v)), true) => {
                        self.set_property(&property.name, v)?;
                        Ok(Outcome::Done(Vec::new()))
                    }
                    (Some(other), true) => Err(Error::ArgumentType {
                        method: property.name.clone(),
                        position: 0,
                        found: other.kind(),
                    }),
                    (Some(_), false) => Err(Error::ArgumentCount {
                        method: property.name.clone(),
                        expected: 1,
                        actual: args.len() + 1,
                    }),
                }
            }
            Member::Finish { .. } => Err(Error::UnknownMember(name.to_string())),
        }
    }

    /// Blocking call of `method`, e.g. `call_sync("echo", ..)` for `echoSync`.
    pub async fn call_sync(&self, method: &str, args: Vec<Arg>) -> Result<Vec<Value>> {
        let method = self.descriptor.method(method).ok_or_else(|| Error::UnknownMember(method.to_string()))?;
        self.marshaller.call_sync(method, self.convention, args).await
    }

    /// Non-blocking call of `method`; the reply goes to the handler among `args`.
    pub fn call_remote(&self, method: &str, args: Vec<Arg>) -> Result<crate::marshal::CallId> {
        let method = self.descriptor.method(method).ok_or_else(|| Error::UnknownMember(method.to_string()))?;
        self.marshaller.call_async(method, self.convention, args)
    }

    /// Completes an introspected-convention call through its `<M>Finish` member.
    pub fn finish(&self, member: &str, result: AsyncResult) -> Result<Vec<Value>> {
        let members = self.synthesize();
        match members.get(member) {
            Some(Member::Finish { method }) if self.descriptor.methods()[*method].name == result.method() => {
                result.finish()
            }
            _ => Err(Error::UnknownMember(member.to_string())),
        }
    }

    /// Number of `Remote` calls still in flight.
    pub fn pending_calls(&self) -> usize {
        self.marshaller.pending_calls()
    }

    /// Fires the cancellation token of every in-flight call that has one.
    pub fn cancel_pending(&self) {
        self.marshaller.cancel_pending();
    }

    fn property_descriptor(&self, name: &str, needs: Access) -> Result<&PropertyDescriptor> {
        let property = self.descriptor.property(name).ok_or_else(|| Error::UnknownMember(name.to_string()))?;
        match needs {
            Access::Read if !property.access.readable() => {
                Err(Error::PropertyAccess { property: name.to_string(), access: "readable" })
            }
            Access::Write if !property.access.writable() => {
                Err(Error::PropertyAccess { property: name.to_string(), access: "writable" })
            }
            _ => Ok(property),
        }
    }

    /// The cached value, fetched from the remote object on first access.
    pub async fn get_property(&self, name: &str) -> Result<Option<Value>> {
        self.property_descriptor(name, Access::Read)?;
        if let Some(value) = self.cache.get(name) {
            return Ok(Some(value.clone()));
        }

        let target = self.marshaller.target();
        let body = varpack::pack(&[Type::String, Type::String], vec![
            target.interface.as_str().into(),
            name.into(),
        ])?;
        let reply = self.marshaller.raw_call(MethodCall::properties(target, "Get", body)).await?;

        let value = match varpack::unpack_as(reply, &[Type::Variant])?.pop() {
            Some(Value::Variant(v)) => v.into_value(),
            _ => return Ok(None),
        };
        self.cache.insert(name.to_string(), value.clone());
        Ok(Some(value))
    }

    /// The cached value only; never touches the connection.
    pub fn cached_property(&self, name: &str) -> Option<Value> {
        self.cache.get(name).map(|v| v.clone())
    }

    /// Writes a property: the cache now, the remote object in the background.
    ///
    /// Only local failures (unknown property, read-only, type mismatch) are
    /// returned. A failed remote write is logged.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let property = self.property_descriptor(name, Access::Write)?;
        let variant = Variant::new(property.ty.clone(), value.into())?;
        self.cache.insert(name.to_string(), variant.value().clone());

        let target = self.marshaller.target();
        let body = varpack::pack(&[Type::String, Type::String, Type::Variant], vec![
            target.interface.as_str().into(),
            name.into(),
            variant.into(),
        ])?;
        let call = MethodCall::properties(target, "Set", body);

        let conn = self.marshaller.connection().clone();
        let config = self.marshaller.config().clone();
        let property = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.call(call, config.default_flags, config.call_timeout, None).await {
                tracing::warn!(property = %property, "Failed to set property: {}", e);
            }
        });
        Ok(())
    }

    /// Loads every property through `GetAll`, replacing the cache contents.
    pub async fn init(&self) -> Result<()> {
        let target = self.marshaller.target();
        let body = varpack::pack(&[Type::String], vec![target.interface.as_str().into()])?;
        let reply = self.marshaller.raw_call(MethodCall::properties(target, "GetAll", body)).await?;

        let all = Type::Dict(Box::new(Type::String), Box::new(Type::Variant));
        let entries = match varpack::unpack_as(reply, &[all])?.pop() {
            Some(Value::Dict(entries)) => entries,
            _ => Vec::new(),
        };

        self.cache.clear();
        for (key, value) in entries {
            if let (Value::String(name), Value::Variant(v)) = (key, value) {
                self.cache.insert(name, v.into_value());
            }
        }
        tracing::debug!(target = %target, properties = self.cache.len(), "properties loaded");
        Ok(())
    }

    /// Registers `listener` for `signal_name`.
    pub fn connect_signal(
        &self,
        signal_name: &str,
        listener: impl Fn(&SignalEvent) + Send + Sync + 'static,
    ) -> SignalHandlerId {
        let listener: Listener = Arc::new(listener);
        self.relay.connect(signal_name, listener)
    }

    /// Removes a listener. Unknown handles are ignored.
    pub fn disconnect_signal(&self, id: SignalHandlerId) -> bool {
        self.relay.disconnect(id)
    }

    /// The relay, for listeners that need to disconnect themselves.
    pub fn signals(&self) -> &Arc<SignalRelay> {
        &self.relay
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.marshaller.connection().unsubscribe_signal(self.subscription);
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("target", self.marshaller.target())
            .field("convention", &self.convention)
            .field("cached", &self.cache.len())
            .finish()
    }
}
