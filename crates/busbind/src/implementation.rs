//! # Service Implementations
//!
//! The handler side of an exported object. Handlers are registered by name once;
//! [`ExportedObject`](crate::export::ExportedObject) resolves them into its
//! capability table when it is created.
//!
//! - `method(name, f)`: a synchronous handler. Its [`Return`] is packed against
//!   the method's out-signature by the dispatcher.
//! - `method_async(name, f)`: registered as `<name>Async`. It receives the
//!   [`Invocation`] and replies whenever it likes.
//! - Properties are plain named fields, optionally overridden by accessors.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use varpack::Container;
use varpack::Value;

use crate::invocation::Invocation;

/// What a synchronous handler hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum Return {
    /// No return value; replies with the empty tuple.
    Empty,
    /// A single value. Wrapped when the method has one out-argument; otherwise an
    /// array or struct is spread over the out-arguments.
    Value(Value),
    /// One value per out-argument.
    Tuple(Vec<Value>),
    /// Already packed; sent as is.
    Packed(Container),
}

impl From<()> for Return {
    fn from(_: ()) -> Self {
        Return::Empty
    }
}

impl From<Value> for Return {
    fn from(v: Value) -> Self {
        Return::Value(v)
    }
}

impl From<Vec<Value>> for Return {
    fn from(values: Vec<Value>) -> Self {
        Return::Tuple(values)
    }
}

impl From<Container> for Return {
    fn from(container: Container) -> Self {
        Return::Packed(container)
    }
}

pub type SyncHandler = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Return> + Send + Sync>;
pub type AsyncHandler = Arc<dyn Fn(Vec<Value>, Invocation) + Send + Sync>;
pub type Getter = Arc<dyn Fn() -> Option<Value> + Send + Sync>;
pub type Setter = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
pub struct Implementation {
    sync_handlers: HashMap<String, SyncHandler>,
    async_handlers: HashMap<String, AsyncHandler>,
    fields: DashMap<String, Value>,
    getters: HashMap<String, Getter>,
    setters: HashMap<String, Setter>,
}

impl Implementation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F, R>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Return>,
    {
        let handler: SyncHandler = Arc::new(move |args: Vec<Value>| f(args).map(Into::<Return>::into));
        self.sync_handlers.insert(name.to_string(), handler);
        self
    }

    pub fn method_async<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>, Invocation) + Send + Sync + 'static,
    {
        self.async_handlers.insert(format!("{}Async", name), Arc::new(f));
        self
    }

    /// Sets the initial value of a plain field.
    pub fn field(self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn getter(mut self, name: &str, f: impl Fn() -> Option<Value> + Send + Sync + 'static) -> Self {
        self.getters.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn setter(mut self, name: &str, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.setters.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn sync_handler(&self, method: &str) -> Option<&SyncHandler> {
        self.sync_handlers.get(method)
    }

    /// Looks up `<method>Async`.
    pub fn async_handler(&self, method: &str) -> Option<&AsyncHandler> {
        self.async_handlers.get(&format!("{}Async", method))
    }

    /// The accessor's value if one is registered, otherwise the field's.
    pub fn get(&self, name: &str) -> Option<Value> {
        match self.getters.get(name) {
            Some(getter) => getter(),
            None => self.fields.get(name).map(|v| v.clone()),
        }
    }

    pub fn set(&self, name: &str, value: Value) {
        match self.setters.get(name) {
            Some(setter) => setter(value),
            None => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sync: Vec<&String> = self.sync_handlers.keys().collect();
        let mut async_: Vec<&String> = self.async_handlers.keys().collect();
        sync.sort();
        async_.sort();
        f.debug_struct("Implementation")
            .field("sync_handlers", &sync)
            .field("async_handlers", &async_)
            .field("fields", &self.fields.len())
            .finish()
    }
}
