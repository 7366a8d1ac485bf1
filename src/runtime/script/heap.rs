//! Object and scope storage for one script context.
//!
//! Both arenas hand out plain index handles. Objects live as long as their
//! context; scopes are recycled once the block or call that opened them
//! finishes, unless a closure captured them.

use std::fmt;
use std::sync::Arc;

use im::HashMap;

use super::ast::{AccessorKind, ClassDef, FunctionDef};
use super::eval::{Eval, Interpreter};
use super::value::Value;

/// Most objects one context may allocate.
pub const MAX_OBJECTS: usize = 1_000_000;
/// Most live scopes one context may hold.
pub const MAX_SCOPES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// Signature of a builtin function: interpreter, receiver, arguments.
pub type NativeFn = fn(&mut Interpreter<'_>, Value, Vec<Value>) -> Eval<Value>;

#[derive(Clone)]
pub enum Callable {
    Script {
        def: Arc<FunctionDef>,
        scope: ScopeId,
        /// Present when this function is a class constructor.
        class: Option<Arc<ClassDef>>,
        /// The constructor a derived class hands `super(...)` to.
        parent: Option<Value>,
    },
    Native {
        name: &'static str,
        func: NativeFn,
    },
    Bound {
        target: ObjectId,
        this: Value,
        args: Vec<Value>,
    },
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Script { def, class, .. } => f
                .debug_struct("Script")
                .field("name", &def.name)
                .field("class", &class.is_some())
                .finish(),
            Callable::Native { name, .. } => f.debug_struct("Native").field("name", name).finish(),
            Callable::Bound { target, .. } => {
                f.debug_struct("Bound").field("target", target).finish()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(Callable),
    /// Carries the error name for printing; the message is a property.
    Error,
}

#[derive(Debug, Clone)]
pub struct Property {
    pub key: String,
    /// Always `undefined` on accessor properties.
    pub value: Value,
    pub enumerable: bool,
    pub accessor: Option<Accessor>,
}

/// The getter / setter pair of an accessor property.
#[derive(Debug, Clone, Default)]
pub struct Accessor {
    pub get: Option<Value>,
    pub set: Option<Value>,
}

impl Accessor {
    /// How the console shows the property in place of a value.
    pub fn label(&self) -> &'static str {
        match (&self.get, &self.set) {
            (Some(_), Some(_)) => "[Getter/Setter]",
            (None, Some(_)) => "[Setter]",
            _ => "[Getter]",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Object {
    pub kind: ObjectKind,
    pub properties: Vec<Property>,
    pub proto: Option<ObjectId>,
    pub frozen: bool,
}

impl Object {
    pub fn new(kind: ObjectKind, proto: Option<ObjectId>) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            proto,
            frozen: false,
        }
    }

    pub fn own(&self, key: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }

    pub fn own_property(&self, key: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Inserts or overwrites an own property, keeping first-insertion order.
    /// Overwriting an accessor turns it back into a data property.
    pub fn define(&mut self, key: impl Into<String>, value: Value, enumerable: bool) {
        let key = key.into();
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.accessor = None;
            }
            None => self.properties.push(Property {
                key,
                value,
                enumerable,
                accessor: None,
            }),
        }
    }

    /// Installs one half of an accessor property. A getter and a setter for
    /// the same key share one property.
    pub fn define_accessor(
        &mut self,
        key: impl Into<String>,
        kind: AccessorKind,
        function: Value,
        enumerable: bool,
    ) {
        let key = key.into();
        let index = match self.properties.iter().position(|p| p.key == key) {
            Some(index) => index,
            None => {
                self.properties.push(Property {
                    key,
                    value: Value::Undefined,
                    enumerable,
                    accessor: None,
                });
                self.properties.len() - 1
            }
        };
        let property = &mut self.properties[index];
        property.value = Value::Undefined;
        let accessor = property.accessor.get_or_insert_with(Accessor::default);
        match kind {
            AccessorKind::Get => accessor.get = Some(function),
            AccessorKind::Set => accessor.set = Some(function),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| p.key != key);
        before != self.properties.len()
    }

    pub fn callable(&self) -> Option<&Callable> {
        match &self.kind {
            ObjectKind::Function(callable) => Some(callable),
            _ => None,
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(
            &self.kind,
            ObjectKind::Function(Callable::Script { class: Some(_), .. })
        )
    }
}

/// The object arena.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    /// Stores `object`, or returns `None` once the allocation cap is hit.
    pub fn alloc(&mut self, object: Object) -> Option<ObjectId> {
        if self.objects.len() >= MAX_OBJECTS {
            return None;
        }
        self.objects.push(object);
        Some(ObjectId(self.objects.len() - 1))
    }

    pub fn get(&self, id: ObjectId) -> &Object {
        &self.objects[id.0]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.0]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks `key` up along the prototype chain.
    pub fn lookup(&self, mut id: ObjectId, key: &str) -> Option<&Value> {
        loop {
            let object = self.get(id);
            if let Some(value) = object.own(key) {
                return Some(value);
            }
            id = object.proto?;
        }
    }

    /// The accessor behind `key` when the nearest definition along the
    /// prototype chain is one.
    pub fn lookup_accessor(&self, mut id: ObjectId, key: &str) -> Option<&Accessor> {
        loop {
            let object = self.get(id);
            if let Some(property) = object.own_property(key) {
                return property.accessor.as_ref();
            }
            id = object.proto?;
        }
    }

    /// True when `proto` appears on the prototype chain of `id`.
    pub fn inherits_from(&self, id: ObjectId, proto: ObjectId) -> bool {
        let mut current = self.get(id).proto;
        while let Some(candidate) = current {
            if candidate == proto {
                return true;
            }
            current = self.get(candidate).proto;
        }
        false
    }
}

/// A variable slot. `value` is `None` while a lexical binding sits in its
/// temporal dead zone.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Option<Value>,
    pub mutable: bool,
    pub lexical: bool,
}

impl Binding {
    pub fn var(value: Value) -> Self {
        Self {
            value: Some(value),
            mutable: true,
            lexical: false,
        }
    }

    pub fn uninitialized(mutable: bool) -> Self {
        Self {
            value: None,
            mutable,
            lexical: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub bindings: HashMap<String, Binding>,
    /// Function and global scopes receive hoisted `var` declarations.
    pub function_scope: bool,
    captured: bool,
}

/// The scope arena.
#[derive(Debug, Default)]
pub struct Scopes {
    scopes: Vec<Scope>,
    free: Vec<ScopeId>,
}

impl Scopes {
    pub fn open(&mut self, parent: Option<ScopeId>, function_scope: bool) -> Option<ScopeId> {
        let scope = Scope {
            parent,
            bindings: HashMap::new(),
            function_scope,
            captured: false,
        };
        if let Some(id) = self.free.pop() {
            self.scopes[id.0] = scope;
            return Some(id);
        }
        if self.scopes.len() >= MAX_SCOPES {
            return None;
        }
        self.scopes.push(scope);
        Some(ScopeId(self.scopes.len() - 1))
    }

    /// Returns `id` to the free list unless a closure still refers to it.
    pub fn close(&mut self, id: ScopeId) {
        let scope = &mut self.scopes[id.0];
        if !scope.captured {
            scope.bindings = HashMap::new();
            self.free.push(id);
        }
    }

    /// Pins `id` and all of its ancestors.
    pub fn capture(&mut self, mut id: ScopeId) {
        loop {
            let scope = &mut self.scopes[id.0];
            if scope.captured {
                return;
            }
            scope.captured = true;
            match scope.parent {
                Some(parent) => id = parent,
                None => return,
            }
        }
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Finds the scope that declares `name`, starting at `from`.
    pub fn resolve(&self, mut from: ScopeId, name: &str) -> Option<ScopeId> {
        loop {
            let scope = self.get(from);
            if scope.bindings.contains_key(name) {
                return Some(from);
            }
            from = scope.parent?;
        }
    }

    /// The nearest enclosing function (or global) scope.
    pub fn function_scope(&self, mut from: ScopeId) -> ScopeId {
        loop {
            let scope = self.get(from);
            match scope.parent {
                Some(parent) if !scope.function_scope => from = parent,
                _ => return from,
            }
        }
    }

    pub fn declare(&mut self, scope: ScopeId, name: impl Into<String>, binding: Binding) {
        self.get_mut(scope).bindings.insert(name.into(), binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_scopes_are_recycled() {
        let mut scopes = Scopes::default();
        let root = scopes.open(None, true).unwrap();
        let block = scopes.open(Some(root), false).unwrap();
        scopes.declare(block, "x", Binding::var(Value::Number(1.0)));
        scopes.close(block);
        let reused = scopes.open(Some(root), false).unwrap();
        assert_eq!(reused, block);
        assert!(scopes.get(reused).bindings.is_empty());
    }

    #[test]
    fn captured_scopes_survive_close() {
        let mut scopes = Scopes::default();
        let root = scopes.open(None, true).unwrap();
        let call = scopes.open(Some(root), true).unwrap();
        scopes.declare(call, "count", Binding::var(Value::Number(0.0)));
        scopes.capture(call);
        scopes.close(call);
        assert!(scopes.get(call).bindings.contains_key("count"));
        assert_ne!(scopes.open(Some(root), false).unwrap(), call);
    }

    #[test]
    fn resolve_walks_outward() {
        let mut scopes = Scopes::default();
        let root = scopes.open(None, true).unwrap();
        let inner = scopes.open(Some(root), false).unwrap();
        scopes.declare(root, "x", Binding::var(Value::Null));
        assert_eq!(scopes.resolve(inner, "x"), Some(root));
        assert_eq!(scopes.resolve(inner, "y"), None);
        assert_eq!(scopes.function_scope(inner), root);
    }

    #[test]
    fn prototype_lookup_follows_chain() {
        let mut heap = Heap::default();
        let mut base = Object::new(ObjectKind::Ordinary, None);
        base.define("greet", Value::str("hi"), false);
        let base = heap.alloc(base).unwrap();
        let child = heap
            .alloc(Object::new(ObjectKind::Ordinary, Some(base)))
            .unwrap();
        assert_eq!(heap.lookup(child, "greet"), Some(&Value::str("hi")));
        assert!(heap.inherits_from(child, base));
        assert!(!heap.inherits_from(base, child));
    }

    #[test]
    fn getter_and_setter_share_one_property() {
        let mut heap = Heap::default();
        let mut base = Object::new(ObjectKind::Ordinary, None);
        base.define_accessor("x", AccessorKind::Get, Value::Number(1.0), false);
        base.define_accessor("x", AccessorKind::Set, Value::Number(2.0), false);
        assert_eq!(base.properties.len(), 1);
        let base = heap.alloc(base).unwrap();
        let child = heap
            .alloc(Object::new(ObjectKind::Ordinary, Some(base)))
            .unwrap();
        let accessor = heap.lookup_accessor(child, "x").unwrap();
        assert_eq!(accessor.label(), "[Getter/Setter]");

        heap.get_mut(child).define("x", Value::Null, true);
        assert!(heap.lookup_accessor(child, "x").is_none());
    }
}
