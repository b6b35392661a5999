//! # Interface Descriptors
//!
//! The parsed callable surface of one remote interface: methods, properties and
//! signals, each with ordered wire type tags.
//!
//! ## Philosophy
//!
//! - **Build-Time Safety**: Tags are parsed and names checked for uniqueness when the
//!   descriptor is built. Nothing on the call path re-validates them.
//! - **Immutable and Shared**: A built descriptor is wrapped in `Arc` and shared by
//!   every proxy and exported object created from it.
//! - **Members Once**: The synthesized member table (`fooRemote`, `fooSync`, ...)
//!   is computed once per descriptor.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use varpack::Type;

/// Descriptor construction errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Two members of the same kind share a name.
    DuplicateMember { kind: &'static str, name: String },
    /// Two synthesized member names collide (e.g. method `a` and property `aSync`).
    MemberCollision(String),
    /// A member carries an unparseable type tag.
    InvalidTag { member: String, source: varpack::Error },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateMember { kind, name } => write!(f, "duplicate {} '{}'", kind, name),
            Self::MemberCollision(name) => write!(f, "synthesized member '{}' is declared twice", name),
            Self::InvalidTag { member, source } => write!(f, "member '{}' has an invalid tag: {}", member, source),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Property access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub in_types: Vec<Type>,
    pub out_types: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub ty: Type,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub name: String,
    pub types: Vec<Type>,
}

/// How a proxy member behaves when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Waits for the reply.
    Sync,
    /// Returns after submission; the reply goes to a completion handler.
    Async,
}

/// One synthesized proxy member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    /// `<Method>Remote` or `<Method>Sync`; indexes `InterfaceDescriptor::methods`.
    Call { method: usize, mode: CallMode },
    /// `<Method>Finish`.
    Finish { method: usize },
    /// A property accessor; indexes `InterfaceDescriptor::properties`.
    Property { property: usize },
}

/// Name -> member lookup for everything a proxy exposes.
#[derive(Debug, Clone, Default)]
pub struct MemberTable {
    members: HashMap<String, Member>,
}

impl MemberTable {
    fn build(methods: &[MethodDescriptor], properties: &[PropertyDescriptor]) -> Result<Self> {
        let mut members = HashMap::new();
        let mut insert = |name: String, member: Member| match members.insert(name.clone(), member) {
            Some(_) => Err(Error::MemberCollision(name)),
            None => Ok(()),
        };

        for (method, m) in methods.iter().enumerate() {
            insert(format!("{}Remote", m.name), Member::Call { method, mode: CallMode::Async })?;
            insert(format!("{}Sync", m.name), Member::Call { method, mode: CallMode::Sync })?;
            insert(format!("{}Finish", m.name), Member::Finish { method })?;
        }
        for (property, p) in properties.iter().enumerate() {
            insert(p.name.clone(), Member::Property { property })?;
        }

        Ok(Self { members })
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.members.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// The callable surface of one interface.
#[derive(Debug)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    signals: Vec<SignalDescriptor>,
    members: Arc<MemberTable>,
}

impl InterfaceDescriptor {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn signals(&self) -> &[SignalDescriptor] {
        &self.signals
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// The synthesized member table, shared by every proxy of this interface.
    pub fn members(&self) -> Arc<MemberTable> {
        self.members.clone()
    }
}

/// Collects members, then validates everything in [`InterfaceBuilder::build`].
///
/// The first tag error is remembered and reported by `build`, so calls can be chained.
pub struct InterfaceBuilder {
    name: String,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    signals: Vec<SignalDescriptor>,
    error: Option<Error>,
}

impl InterfaceBuilder {
    pub fn method(mut self, name: &str, in_tags: &[&str], out_tags: &[&str]) -> Self {
        let in_types = self.parse_tags(name, in_tags);
        let out_types = self.parse_tags(name, out_tags);
        self.methods.push(MethodDescriptor { name: name.to_string(), in_types, out_types });
        self
    }

    pub fn property(mut self, name: &str, tag: &str, access: Access) -> Self {
        let ty = self.parse_tags(name, &[tag]).pop().unwrap_or(Type::Variant);
        self.properties.push(PropertyDescriptor { name: name.to_string(), ty, access });
        self
    }

    pub fn signal(mut self, name: &str, tags: &[&str]) -> Self {
        let types = self.parse_tags(name, tags);
        self.signals.push(SignalDescriptor { name: name.to_string(), types });
        self
    }

    fn parse_tags(&mut self, member: &str, tags: &[&str]) -> Vec<Type> {
        let mut types = Vec::with_capacity(tags.len());
        for tag in tags {
            match Type::parse(tag) {
                Ok(ty) => types.push(ty),
                Err(source) => {
                    self.error.get_or_insert(Error::InvalidTag { member: member.to_string(), source });
                }
            }
        }
        types
    }

    pub fn build(self) -> Result<Arc<InterfaceDescriptor>> {
        if let Some(e) = self.error {
            return Err(e);
        }

        check_unique("method", self.methods.iter().map(|m| m.name.as_str()))?;
        check_unique("property", self.properties.iter().map(|p| p.name.as_str()))?;
        check_unique("signal", self.signals.iter().map(|s| s.name.as_str()))?;

        let members = Arc::new(MemberTable::build(&self.methods, &self.properties)?);

        Ok(Arc::new(InterfaceDescriptor {
            name: self.name,
            methods: self.methods,
            properties: self.properties,
            signals: self.signals,
            members,
        }))
    }
}

fn check_unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::DuplicateMember { kind, name: name.to_string() });
        }
    }
    Ok(())
}
