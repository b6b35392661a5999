//! # Exported Objects
//!
//! Binds an [`Implementation`] to a connection and path, and answers inbound
//! requests for one interface.
//!
//! ## Lifecycle
//!
//! Created unexported. [`ExportedObject::export`] registers a [`Dispatcher`] with
//! the connection; [`ExportedObject::unexport`] (or dropping the object) removes
//! it, after which the connection routes nothing more to it.
//!
//! ## Dispatch
//!
//! The capability table is resolved once, at construction: for each declared
//! method, a sync handler `m` wins over an async handler `mAsync`. Every inbound
//! call ends in exactly one reply:
//!
//! - sync success: the [`Return`] packed against the out-signature, or
//!   `ValueError` if it does not fit;
//! - sync failure: a [`DomainError`](crate::error::DomainError) verbatim,
//!   anything else namespaced;
//! - async: whatever the handler does with the [`Invocation`];
//! - no handler: `UnknownMethod`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use varpack::Container;
use varpack::Type;
use varpack::Value;
use varpack::Variant;

use crate::descriptor::InterfaceDescriptor;
use crate::descriptor::MethodDescriptor;
use crate::descriptor::PropertyDescriptor;
use crate::error::Error;
use crate::error::INVALID_ARGS;
use crate::error::MethodError;
use crate::error::Result;
use crate::error::UNKNOWN_PROPERTY;
use crate::error::VALUE_ERROR;
use crate::implementation::AsyncHandler;
use crate::implementation::Implementation;
use crate::implementation::Return;
use crate::implementation::SyncHandler;
use crate::invocation::Invocation;
use crate::message::PROPERTIES_CHANGED;
use crate::message::PROPERTIES_INTERFACE;
use crate::message::SignalMessage;
use crate::transport::Connection;
use crate::transport::ObjectHandler;
use crate::transport::RegistrationId;

enum Capability {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

fn capabilities(descriptor: &InterfaceDescriptor, implementation: &Implementation) -> HashMap<String, Capability> {
    let mut table = HashMap::new();
    for method in descriptor.methods() {
        let capability = match (implementation.sync_handler(&method.name), implementation.async_handler(&method.name)) {
            (Some(handler), _) => Capability::Sync(handler.clone()),
            (None, Some(handler)) => Capability::Async(handler.clone()),
            (None, None) => continue,
        };
        table.insert(method.name.clone(), capability);
    }
    table
}

/// Packs a sync handler's return value against the method's out-signature.
pub(crate) fn pack_return(method: &MethodDescriptor, ret: Return) -> std::result::Result<Container, MethodError> {
    let single = method.out_types.len() == 1;
    let values = match ret {
        Return::Packed(container) => return Ok(container),
        Return::Empty => return Ok(Container::empty()),
        Return::Value(v) if single => vec![v],
        Return::Value(Value::Array(items) | Value::Struct(items)) => items,
        Return::Value(v) => vec![v],
        Return::Tuple(values) if single && values.len() != 1 => vec![Value::Array(values)],
        Return::Tuple(values) => values,
    };

    varpack::pack(&method.out_types, values).map_err(|e| {
        tracing::warn!(method = %method.name, "handler returned a value that does not pack: {}", e);
        MethodError::named(VALUE_ERROR, "Service implementation returned an incorrect value type")
    })
}

/// The [`ObjectHandler`] a connection drives for one exported object.
pub struct Dispatcher {
    descriptor: Arc<InterfaceDescriptor>,
    implementation: Arc<Implementation>,
    capabilities: HashMap<String, Capability>,
}

impl Dispatcher {
    pub(crate) fn new(descriptor: Arc<InterfaceDescriptor>, implementation: Arc<Implementation>) -> Self {
        let capabilities = capabilities(&descriptor, &implementation);
        Self { descriptor, implementation, capabilities }
    }

    fn property(&self, name: &str) -> std::result::Result<&PropertyDescriptor, MethodError> {
        self.descriptor.property(name).ok_or_else(|| {
            MethodError::named(UNKNOWN_PROPERTY, format!("No such property '{}'", name))
        })
    }

    /// The implementation's value, packed against the property tag.
    fn read(&self, property: &PropertyDescriptor) -> std::result::Result<Option<Variant>, MethodError> {
        let Some(value) = self.implementation.get(&property.name) else {
            return Ok(None);
        };
        match Variant::new(property.ty.clone(), value) {
            Ok(variant) => Ok(Some(variant)),
            Err(e) => {
                tracing::warn!(property = %property.name, "property value does not pack: {}", e);
                Err(MethodError::named(VALUE_ERROR, "Service implementation returned an incorrect value type"))
            }
        }
    }
}

impl ObjectHandler for Dispatcher {
    fn method_call(&self, member: &str, body: Container, invocation: Invocation) {
        let Some(method) = self.descriptor.method(member) else {
            tracing::warn!(method = %member, "Missing handler for method");
            invocation.return_error(MethodError::unknown_method(member));
            return;
        };

        let found = body.signature();
        let args = match varpack::unpack_as(body, &method.in_types) {
            Ok(args) => args,
            Err(_) => {
                let expected = varpack::tuple_signature(&method.in_types);
                invocation.return_error(MethodError::invalid_args(format!(
                    "Type of message, '{}', does not match expected type '{}'",
                    found, expected
                )));
                return;
            }
        };

        match self.capabilities.get(member) {
            Some(Capability::Sync(handler)) => {
                tracing::debug!(method = %member, "dispatching to sync handler");
                let reply = match handler(args) {
                    Ok(ret) => pack_return(method, ret),
                    Err(e) => Err(MethodError::from_handler(&e)),
                };
                match reply {
                    Ok(container) => invocation.return_value(container),
                    Err(e) => invocation.return_error(e),
                }
            }
            Some(Capability::Async(handler)) => {
                tracing::debug!(method = %member, "dispatching to async handler");
                handler(args, invocation);
            }
            None => {
                tracing::warn!(method = %member, "Missing handler for method");
                invocation.return_error(MethodError::unknown_method(member));
            }
        }
    }

    fn property_get(&self, name: &str) -> std::result::Result<Option<Variant>, MethodError> {
        let property = self.property(name)?;
        if !property.access.readable() {
            return Err(MethodError::named(INVALID_ARGS, format!("Property '{}' is not readable", name)));
        }
        self.read(property)
    }

    fn property_get_all(&self) -> Vec<(String, Variant)> {
        self.descriptor
            .properties()
            .iter()
            .filter(|p| p.access.readable())
            .filter_map(|p| match self.read(p) {
                Ok(Some(value)) => Some((p.name.clone(), value)),
                _ => None,
            })
            .collect()
    }

    fn property_set(&self, name: &str, value: Value) -> std::result::Result<(), MethodError> {
        let property = self.property(name)?;
        if !property.access.writable() {
            return Err(MethodError::named(INVALID_ARGS, format!("Property '{}' is not writable", name)));
        }
        let variant = Variant::new(property.ty.clone(), value).map_err(|e| {
            MethodError::invalid_args(format!("Property '{}' expects type '{}': {}", name, property.ty, e))
        })?;
        self.implementation.set(name, variant.into_value());
        Ok(())
    }
}

struct Binding {
    conn: Arc<dyn Connection>,
    path: String,
    registration: RegistrationId,
}

pub struct ExportedObject {
    descriptor: Arc<InterfaceDescriptor>,
    implementation: Arc<Implementation>,
    dispatcher: Arc<Dispatcher>,
    binding: Mutex<Option<Binding>>,
}

impl ExportedObject {
    pub fn new(descriptor: Arc<InterfaceDescriptor>, implementation: Implementation) -> Self {
        let implementation = Arc::new(implementation);
        let dispatcher = Arc::new(Dispatcher::new(descriptor.clone(), implementation.clone()));
        Self { descriptor, implementation, dispatcher, binding: Mutex::new(None) }
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    /// The implementation, e.g. to read fields written by remote callers.
    pub fn implementation(&self) -> &Arc<Implementation> {
        &self.implementation
    }

    fn binding(&self) -> MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn export(&self, conn: Arc<dyn Connection>, path: &str) -> Result<()> {
        let mut binding = self.binding();
        if binding.is_some() {
            return Err(Error::AlreadyExported);
        }

        let handler: Arc<dyn ObjectHandler> = self.dispatcher.clone();
        let registration = conn.export(path, self.descriptor.name(), handler)?;
        tracing::debug!(path = %path, interface = %self.descriptor.name(), "object exported");

        *binding = Some(Binding { conn, path: path.to_string(), registration });
        Ok(())
    }

    pub fn unexport(&self) -> Result<()> {
        let binding = self.binding().take().ok_or(Error::NotExported)?;
        binding.conn.unexport(binding.registration);
        tracing::debug!(path = %binding.path, interface = %self.descriptor.name(), "object unexported");
        Ok(())
    }

    pub fn is_exported(&self) -> bool {
        self.binding().is_some()
    }

    pub fn object_path(&self) -> Option<String> {
        self.binding().as_ref().map(|b| b.path.clone())
    }

    fn emit(&self, interface: &str, member: &str, body: Option<Container>) -> Result<()> {
        let (conn, path) = match self.binding().as_ref() {
            Some(b) => (b.conn.clone(), b.path.clone()),
            None => return Err(Error::NotExported),
        };
        conn.emit_signal(SignalMessage {
            sender: String::new(),
            path,
            interface: interface.to_string(),
            member: member.to_string(),
            body,
        })?;
        Ok(())
    }

    /// Broadcasts a declared signal. No arguments means no body.
    pub fn emit_signal(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let signal = self.descriptor.signal(name).ok_or_else(|| Error::UnknownMember(name.to_string()))?;
        let body = if args.is_empty() {
            None
        } else {
            Some(varpack::pack(&signal.types, args)?)
        };
        self.emit(self.descriptor.name(), name, body)
    }

    /// Broadcasts `PropertiesChanged` for one property. `None` invalidates it.
    pub fn emit_property_changed(&self, name: &str, value: Option<Value>) -> Result<()> {
        let property = self.descriptor.property(name).ok_or_else(|| Error::UnknownMember(name.to_string()))?;

        let (changed, invalidated) = match value {
            Some(value) => {
                let variant = Variant::new(property.ty.clone(), value)?;
                (vec![(Value::from(name), Value::from(variant))], Vec::new())
            }
            None => (Vec::new(), vec![Value::from(name)]),
        };

        let body = varpack::pack(
            &[
                Type::String,
                Type::Dict(Box::new(Type::String), Box::new(Type::Variant)),
                Type::Array(Box::new(Type::String)),
            ],
            vec![Value::from(self.descriptor.name()), Value::Dict(changed), Value::Array(invalidated)],
        )?;
        self.emit(PROPERTIES_INTERFACE, PROPERTIES_CHANGED, Some(body))
    }
}

impl Drop for ExportedObject {
    fn drop(&mut self) {
        if let Some(binding) = self.binding().take() {
            binding.conn.unexport(binding.registration);
        }
    }
}

impl std::fmt::Debug for ExportedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedObject")
            .field("interface", &self.descriptor.name())
            .field("path", &self.object_path())
            .finish()
    }
}
