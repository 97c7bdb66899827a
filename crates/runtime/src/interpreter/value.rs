//! Runtime values.
//!
//! Values are reference counted and single threaded: a whole run, from the
//! first statement to the last drop, happens on one worker thread.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use super::call::CallArgs;
use super::exceptions::{fail, ExceptionKind, Exec};
use super::Interpreter;
use crate::ast::{Comprehension, FunctionDef, ScopeInfo};
use crate::sandbox::ModuleKind;

/// Longest list, tuple, dict or set a program may build
pub const MAX_COLLECTION_LEN: usize = 4_000_000;

/// Longest string a program may build, in bytes
pub const MAX_STR_BYTES: usize = 16 * 1024 * 1024;

/// Deepest tuple nesting accepted as a dict key or set member
const MAX_KEY_DEPTH: usize = 500;

pub type NativeFn = fn(&mut Interpreter, CallArgs) -> Exec<Value>;
pub type MethodFn = fn(&mut Interpreter, &Value, CallArgs) -> Exec<Value>;

/// A built-in function such as `len` or `math.sqrt`.
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// A method of a built-in type, such as `str.upper`.
pub struct MethodDef {
    pub name: &'static str,
    pub func: MethodFn,
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<method {}>", self.name)
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Items>>),
    Tuple(Rc<Items>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Range(Range),
    Iterator(Rc<RefCell<IteratorObject>>),
    Function(Rc<Function>),
    BoundMethod(Rc<BoundMethod>),
    NativeMethod(Rc<NativeMethod>),
    Builtin(&'static NativeFunction),
    Type(TypeKind),
    ExceptionType(ExceptionKind),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Exception(Rc<ExceptionObject>),
    Module(Rc<Module>),
    Super(Rc<SuperObject>),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(Rc::from(text.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        let list = Rc::new(RefCell::new(Items::from(items)));
        cycles::track_list(&list);
        Value::List(list)
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Items::from(items)))
    }

    pub fn dict(dict: Dict) -> Value {
        let dict = Rc::new(RefCell::new(dict));
        cycles::track_dict(&dict);
        Value::Dict(dict)
    }

    pub fn set(set: Set) -> Value {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn iterator(iter: IteratorObject) -> Value {
        Value::Iterator(Rc::new(RefCell::new(iter)))
    }

    /// Python name of the value's type, as used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Class(_) | Value::Type(_) | Value::ExceptionType(_) => "type".to_string(),
            Value::Instance(instance) => instance.class.name.clone(),
            Value::Exception(exc) => exc.kind.name().to_string(),
            Value::Super(_) => "super".to_string(),
            other => other.type_kind().name().to_string(),
        }
    }

    /// Built-in type of the value. Instances report `Object`.
    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Ellipsis => TypeKind::Ellipsis,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Iterator(_) => TypeKind::Iterator,
            Value::Function(_) => TypeKind::Function,
            Value::BoundMethod(_) | Value::NativeMethod(_) => TypeKind::Method,
            Value::Builtin(_) => TypeKind::BuiltinFunction,
            Value::Type(_) | Value::ExceptionType(_) | Value::Class(_) => TypeKind::Type,
            Value::Module(_) => TypeKind::Module,
            Value::Instance(_) | Value::Exception(_) | Value::Super(_) => TypeKind::Object,
        }
    }

    /// Whether dropping this value may release other values.
    fn holds_objects(&self) -> bool {
        !matches!(
            self,
            Value::None
                | Value::Ellipsis
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Range(_)
                | Value::Builtin(_)
                | Value::Type(_)
                | Value::ExceptionType(_)
        )
    }

    /// Key used for dict and set membership.
    pub fn hash_key(&self) -> Exec<HashKey> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> Exec<HashKey> {
        if depth > MAX_KEY_DEPTH {
            return fail(ExceptionKind::RecursionError, "maximum recursion depth exceeded while hashing");
        }
        Ok(match self {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Named("Ellipsis"),
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => {
                let keys = items
                    .iter()
                    .map(|item| item.hash_key_at(depth + 1))
                    .collect::<Exec<Vec<_>>>()?;
                HashKey::Tuple(Rc::from(keys))
            }
            Value::Range(range) => HashKey::Range(range.start, range.stop, range.step),
            Value::Type(kind) => HashKey::Named(kind.name()),
            Value::ExceptionType(kind) => HashKey::Named(kind.name()),
            Value::Builtin(native) => HashKey::Identity(*native as *const NativeFunction as usize),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as usize),
            Value::Class(c) => HashKey::Identity(Rc::as_ptr(c) as usize),
            Value::Instance(i) => HashKey::Identity(Rc::as_ptr(i) as usize),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as usize),
            Value::Module(m) => HashKey::Identity(Rc::as_ptr(m) as usize),
            Value::Iterator(i) => HashKey::Identity(Rc::as_ptr(i) as *const u8 as usize),
            Value::BoundMethod(m) => HashKey::Identity(Rc::as_ptr(m) as usize),
            Value::NativeMethod(m) => HashKey::Identity(Rc::as_ptr(m) as usize),
            Value::Super(s) => HashKey::Identity(Rc::as_ptr(s) as usize),
            Value::List(_) | Value::Dict(_) | Value::Set(_) => {
                return fail(
                    ExceptionKind::TypeError,
                    format!("unhashable type: '{}'", self.type_name()),
                )
            }
        })
    }

    /// Address of the shared object, for identity checks.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(v) => Some(Rc::as_ptr(v) as *const u8 as usize),
            Value::Tuple(v) => Some(Rc::as_ptr(v) as usize),
            Value::Dict(v) => Some(Rc::as_ptr(v) as *const u8 as usize),
            Value::Set(v) => Some(Rc::as_ptr(v) as *const u8 as usize),
            Value::Iterator(v) => Some(Rc::as_ptr(v) as *const u8 as usize),
            Value::Function(v) => Some(Rc::as_ptr(v) as usize),
            Value::BoundMethod(v) => Some(Rc::as_ptr(v) as usize),
            Value::NativeMethod(v) => Some(Rc::as_ptr(v) as usize),
            Value::Class(v) => Some(Rc::as_ptr(v) as usize),
            Value::Instance(v) => Some(Rc::as_ptr(v) as usize),
            Value::Exception(v) => Some(Rc::as_ptr(v) as usize),
            Value::Module(v) => Some(Rc::as_ptr(v) as usize),
            Value::Super(v) => Some(Rc::as_ptr(v) as usize),
            Value::Builtin(v) => Some(*v as *const NativeFunction as usize),
            _ => None,
        }
    }

    /// Exception kind at the root of an exception value's class, if it is one.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self {
            Value::Exception(exc) => Some(exc.kind),
            Value::Instance(instance) => instance.class.exception_kind(),
            _ => None,
        }
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f.abs() < 9.2e18 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => write!(f, "<list len={}>", items.borrow().len()),
            Value::Tuple(items) => write!(f, "<tuple len={}>", items.len()),
            Value::Dict(dict) => write!(f, "<dict len={}>", dict.borrow().len()),
            Value::Set(set) => write!(f, "<set len={}>", set.borrow().len()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

/// Hashable identity of a dict key or set member.
///
/// Numbers that compare equal share a key, so `1`, `1.0` and `True` land
/// in the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Rc<[HashKey]>),
    Range(i64, i64, i64),
    Named(&'static str),
    Identity(usize),
}

/// Built-in types visible to programs through `type()` and `isinstance()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Ellipsis,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Iterator,
    Function,
    Method,
    BuiltinFunction,
    Type,
    Module,
    Object,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Ellipsis => "ellipsis",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Iterator => "iterator",
            TypeKind::Function => "function",
            TypeKind::Method => "method",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Type => "type",
            TypeKind::Module => "module",
            TypeKind::Object => "object",
        }
    }

    /// `issubclass(self, other)` for built-in types.
    pub fn is_subclass_of(self, other: TypeKind) -> bool {
        self == other || other == TypeKind::Object || (self == TypeKind::Bool && other == TypeKind::Int)
    }
}

macro_rules! buried_collection {
    ($name:ident, $inner:ty) => {
        impl Deref for $name {
            type Target = $inner;
            fn deref(&self) -> &$inner {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut $inner {
                &mut self.0
            }
        }
    };
}

/// Element storage of lists and tuples.
#[derive(Debug, Default)]
pub struct Items(Vec<Value>);

buried_collection!(Items, Vec<Value>);

impl From<Vec<Value>> for Items {
    fn from(items: Vec<Value>) -> Self {
        Items(items)
    }
}

impl Items {
    pub fn into_vec(mut self) -> Vec<Value> {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        graveyard::bury(std::mem::take(&mut self.0));
    }
}

/// Named bindings: scope variables, instance and class attributes.
#[derive(Debug, Default)]
pub struct Attrs(IndexMap<String, Value>);

buried_collection!(Attrs, IndexMap<String, Value>);

impl Drop for Attrs {
    fn drop(&mut self) {
        graveyard::bury(std::mem::take(&mut self.0).into_values());
    }
}

/// Insertion ordered mapping.
#[derive(Debug, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or update. An existing entry keeps its original key object.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) -> Exec<()> {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.1 = value;
            return Ok(());
        }
        if self.entries.len() >= MAX_COLLECTION_LEN {
            return fail(ExceptionKind::MemoryError, "dict is too large");
        }
        self.entries.insert(hash, (key, value));
        Ok(())
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        graveyard::bury(entries.into_values().flat_map(|(k, v)| [k, v]));
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .values()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    pub fn copy(&self) -> Dict {
        Dict {
            entries: self.entries.clone(),
        }
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Insertion ordered set. Iteration follows insertion order.
#[derive(Debug, Default)]
pub struct Set {
    members: IndexMap<HashKey, Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.members.contains_key(key)
    }

    pub fn insert(&mut self, hash: HashKey, value: Value) -> Exec<()> {
        if self.members.contains_key(&hash) {
            return Ok(());
        }
        if self.members.len() >= MAX_COLLECTION_LEN {
            return fail(ExceptionKind::MemoryError, "set is too large");
        }
        self.members.insert(hash, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.members.shift_remove(key)
    }

    pub fn pop_first(&mut self) -> Option<Value> {
        self.members.shift_remove_index(0).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        graveyard::bury(std::mem::take(&mut self.members).into_values());
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.members.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.members.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.members.values().cloned().collect()
    }

    pub fn copy(&self) -> Set {
        Set {
            members: self.members.clone(),
        }
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        self.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let count = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        count as usize
    }

    /// Length as seen by `len()`, which must fit a signed 64-bit count.
    pub fn checked_len(&self) -> Exec<usize> {
        let len = self.len();
        if len > i64::MAX as usize {
            return fail(ExceptionKind::OverflowError, "Python int too large to convert to C ssize_t");
        }
        Ok(len)
    }

    /// Element at a position counted from either end.
    pub fn at(&self, index: i64) -> Option<i64> {
        let len = self.len() as i128;
        let index = if index < 0 { index as i128 + len } else { index as i128 };
        if index < 0 || index >= len {
            return None;
        }
        Some((self.start as i128 + index * self.step as i128) as i64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a non-negative position.
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some((self.start as i128 + index as i128 * self.step as i128) as i64)
    }

    pub fn contains(&self, value: i64) -> bool {
        let (start, step, value) = (self.start as i128, self.step as i128, value as i128);
        let in_bounds = if step > 0 {
            value >= start && value < self.stop as i128
        } else {
            value <= start && value > self.stop as i128
        };
        in_bounds && (value - start) % step == 0
    }
}

/// State of a live iterator.
#[derive(Debug)]
pub enum IteratorObject {
    /// Walks a list by position, seeing later appends.
    List { list: Rc<RefCell<Items>>, index: usize },
    /// Walks a fixed sequence of values.
    Snapshot { items: Items, index: usize },
    Range { next: i64, remaining: usize, step: i64 },
    Enumerate { inner: Value, count: i64 },
    Zip { inners: Items },
    Map { func: Value, inners: Items },
    Filter { func: Value, inner: Value },
    Generator(Box<GeneratorState>),
    Exhausted,
}

/// A suspended generator expression.
#[derive(Debug)]
pub struct GeneratorState {
    pub comp: Arc<Comprehension>,
    pub scope: Rc<Scope>,
    /// Live `for` clauses, outermost first, with their clause index
    pub frames: Vec<(usize, Rc<RefCell<IteratorObject>>)>,
}

impl IteratorObject {
    pub fn snapshot(items: Vec<Value>) -> Self {
        IteratorObject::Snapshot {
            items: Items::from(items),
            index: 0,
        }
    }
}

impl Drop for IteratorObject {
    fn drop(&mut self) {
        match self {
            IteratorObject::Enumerate { inner, .. } => graveyard::bury([std::mem::replace(inner, Value::None)]),
            IteratorObject::Map { func, .. } => graveyard::bury([std::mem::replace(func, Value::None)]),
            IteratorObject::Filter { func, inner } => graveyard::bury([
                std::mem::replace(func, Value::None),
                std::mem::replace(inner, Value::None),
            ]),
            _ => {}
        }
    }
}

/// Variables of one function call or comprehension.
#[derive(Debug)]
pub struct Scope {
    pub info: Arc<ScopeInfo>,
    pub vars: RefCell<Attrs>,
    /// Enclosing function scope, for closures
    pub parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(info: Arc<ScopeInfo>, parent: Option<Rc<Scope>>) -> Rc<Scope> {
        let scope = Rc::new(Scope {
            info,
            vars: RefCell::new(Attrs::default()),
            parent,
        });
        cycles::track_scope(&scope);
        scope
    }
}

/// A function defined with `def` or `lambda`.
#[derive(Debug)]
pub struct Function {
    pub def: Arc<FunctionDef>,
    pub qualname: String,
    /// Defaults of the trailing positional parameters
    pub defaults: Items,
    pub kw_defaults: Attrs,
    pub closure: Option<Rc<Scope>>,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Rc<Function>,
}

#[derive(Debug)]
pub struct NativeMethod {
    pub receiver: Value,
    pub method: &'static MethodDef,
}

#[derive(Debug)]
pub enum ClassBase {
    Object,
    Class(Rc<Class>),
    Exception(ExceptionKind),
}

/// A class defined with `class`.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub base: ClassBase,
    pub attrs: RefCell<Attrs>,
}

impl Class {
    /// Attribute lookup along the inheritance chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.borrow().get(name) {
            return Some(value.clone());
        }
        let mut base = match &self.base {
            ClassBase::Class(parent) => Some(parent.clone()),
            _ => None,
        };
        while let Some(class) = base {
            if let Some(value) = class.attrs.borrow().get(name) {
                return Some(value.clone());
            }
            base = match &class.base {
                ClassBase::Class(parent) => Some(parent.clone()),
                _ => None,
            };
        }
        None
    }

    /// Built-in exception this class ultimately derives from.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match &self.base {
            ClassBase::Object => None,
            ClassBase::Exception(kind) => Some(*kind),
            ClassBase::Class(parent) => {
                let mut current = parent.clone();
                loop {
                    let next = match &current.base {
                        ClassBase::Object => return None,
                        ClassBase::Exception(kind) => return Some(*kind),
                        ClassBase::Class(parent) => parent.clone(),
                    };
                    current = next;
                }
            }
        }
    }

    /// Whether `self` is `other` or inherits from it.
    pub fn is_subclass_of(self: &Rc<Class>, other: &Rc<Class>) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if Rc::ptr_eq(&class, other) {
                return true;
            }
            current = match &class.base {
                ClassBase::Class(parent) => Some(parent.clone()),
                _ => None,
            };
        }
        false
    }
}

impl Drop for Class {
    fn drop(&mut self) {
        if let ClassBase::Class(parent) = std::mem::replace(&mut self.base, ClassBase::Object) {
            graveyard::bury([Value::Class(parent)]);
        }
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<Attrs>,
    /// Constructor arguments, kept for exception subclasses
    pub args: RefCell<Items>,
}

impl Instance {
    pub fn create(class: Rc<Class>) -> Rc<Instance> {
        let instance = Rc::new(Instance {
            class,
            attrs: RefCell::new(Attrs::default()),
            args: RefCell::new(Items::default()),
        });
        cycles::track_instance(&instance);
        instance
    }
}

/// Instance of a built-in exception class.
#[derive(Debug)]
pub struct ExceptionObject {
    pub kind: ExceptionKind,
    pub args: Items,
}

impl ExceptionObject {
    pub fn new(kind: ExceptionKind, args: Items) -> Self {
        Self { kind, args }
    }
}

/// Result of `super()` inside a method.
#[derive(Debug)]
pub struct SuperObject {
    /// Class whose method called `super()`; lookup starts at its base
    pub class: Rc<Class>,
    pub receiver: Value,
}

#[derive(Debug)]
pub struct Module {
    pub kind: ModuleKind,
    pub attrs: RefCell<Attrs>,
}

/// Deferred destruction of nested values.
///
/// Dropping a deeply nested structure (a list holding a list holding a
/// list ...) would otherwise recurse once per level and can exhaust the
/// stack. Containers hand their children to a per-thread queue instead,
/// and the outermost drop empties it in a loop.
mod graveyard {
    use std::cell::{Cell, RefCell};

    use super::Value;

    thread_local! {
        static PENDING: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
        static DRAINING: Cell<bool> = const { Cell::new(false) };
    }

    pub(super) fn bury<I>(values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut values = values.into_iter().filter(Value::holds_objects).peekable();
        if values.peek().is_none() {
            return;
        }
        if PENDING.try_with(|pending| pending.borrow_mut().extend(values)).is_err() {
            return;
        }

        let already_draining = DRAINING.try_with(|draining| draining.replace(true)).unwrap_or(true);
        if already_draining {
            return;
        }
        loop {
            let next = PENDING.try_with(|pending| pending.borrow_mut().pop()).ok().flatten();
            match next {
                Some(value) => drop(value),
                None => break,
            }
        }
        let _ = DRAINING.try_with(|draining| draining.set(false));
    }
}

/// Break the reference cycles left behind by a finished run.
///
/// Lists, dicts, scopes and instances are the only objects that can close a
/// cycle. Each one a run allocates is tracked weakly; whatever is still alive
/// once the run's own references are gone is only kept alive by a cycle and
/// gets emptied here.
pub fn release_cycles() {
    cycles::release();
}

mod cycles {
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    use super::{Dict, Instance, Items, Scope};

    /// Dead handles are pruned whenever the registry doubles.
    const MIN_PRUNE_LEN: usize = 1024;

    struct Registry<T> {
        entries: Vec<Weak<T>>,
        prune_at: usize,
    }

    impl<T> Registry<T> {
        const fn new() -> Self {
            Self {
                entries: Vec::new(),
                prune_at: MIN_PRUNE_LEN,
            }
        }

        fn track(&mut self, value: &Rc<T>) {
            if self.entries.len() >= self.prune_at {
                self.entries.retain(|entry| entry.strong_count() > 0);
                self.prune_at = (self.entries.len() * 2).max(MIN_PRUNE_LEN);
            }
            self.entries.push(Rc::downgrade(value));
        }

        fn take(&mut self) -> Vec<Weak<T>> {
            self.prune_at = MIN_PRUNE_LEN;
            std::mem::take(&mut self.entries)
        }
    }

    thread_local! {
        static LISTS: RefCell<Registry<RefCell<Items>>> = const { RefCell::new(Registry::new()) };
        static DICTS: RefCell<Registry<RefCell<Dict>>> = const { RefCell::new(Registry::new()) };
        static SCOPES: RefCell<Registry<Scope>> = const { RefCell::new(Registry::new()) };
        static INSTANCES: RefCell<Registry<Instance>> = const { RefCell::new(Registry::new()) };
    }

    pub(super) fn track_list(list: &Rc<RefCell<Items>>) {
        let _ = LISTS.try_with(|registry| registry.borrow_mut().track(list));
    }

    pub(super) fn track_dict(dict: &Rc<RefCell<Dict>>) {
        let _ = DICTS.try_with(|registry| registry.borrow_mut().track(dict));
    }

    pub(super) fn track_scope(scope: &Rc<Scope>) {
        let _ = SCOPES.try_with(|registry| registry.borrow_mut().track(scope));
    }

    pub(super) fn track_instance(instance: &Rc<Instance>) {
        let _ = INSTANCES.try_with(|registry| registry.borrow_mut().track(instance));
    }

    pub(super) fn release() {
        let lists = LISTS.try_with(|r| r.borrow_mut().take()).unwrap_or_default();
        let dicts = DICTS.try_with(|r| r.borrow_mut().take()).unwrap_or_default();
        let scopes = SCOPES.try_with(|r| r.borrow_mut().take()).unwrap_or_default();
        let instances = INSTANCES.try_with(|r| r.borrow_mut().take()).unwrap_or_default();

        for list in lists.iter().filter_map(Weak::upgrade) {
            let items = list.try_borrow_mut().map(|mut items| std::mem::take(&mut *items));
            drop(items);
        }
        for dict in dicts.iter().filter_map(Weak::upgrade) {
            if let Ok(mut dict) = dict.try_borrow_mut() {
                dict.clear();
            }
        }
        for scope in scopes.iter().filter_map(Weak::upgrade) {
            let vars = scope.vars.try_borrow_mut().map(|mut vars| std::mem::take(&mut *vars));
            drop(vars);
        }
        for instance in instances.iter().filter_map(Weak::upgrade) {
            let attrs = instance.attrs.try_borrow_mut().map(|mut attrs| std::mem::take(&mut *attrs));
            drop(attrs);
            let args = instance.args.try_borrow_mut().map(|mut args| std::mem::take(&mut *args));
            drop(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_unify() {
        assert_eq!(Value::Int(1).hash_key().unwrap(), Value::Bool(true).hash_key().unwrap());
        assert_eq!(Value::Float(2.0).hash_key().unwrap(), Value::Int(2).hash_key().unwrap());
        assert_ne!(Value::Float(2.5).hash_key().unwrap(), Value::Int(2).hash_key().unwrap());
    }

    #[test]
    fn test_unhashable() {
        assert!(Value::list(vec![]).hash_key().is_err());
        let key = Value::tuple(vec![Value::Int(1), Value::str("a")]).hash_key().unwrap();
        assert!(matches!(key, HashKey::Tuple(_)));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(9));
        assert!(r.contains(6));
        assert!(!r.contains(7));
        let down = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
        assert!(Range { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn test_dict_keeps_first_key_object() {
        let mut dict = Dict::new();
        dict.insert(HashKey::Int(1), Value::Int(1), Value::str("a")).unwrap();
        dict.insert(HashKey::Int(1), Value::Float(1.0), Value::str("b")).unwrap();
        assert_eq!(dict.len(), 1);
        let (key, value) = dict.entries().next().unwrap();
        assert!(matches!(key, Value::Int(1)));
        assert!(matches!(value, Value::Str(s) if &**s == "b"));
    }

    #[test]
    fn test_deep_nesting_drops_without_overflow() {
        let mut value = Value::list(vec![]);
        for _ in 0..200_000 {
            value = Value::list(vec![value]);
        }
        drop(value);

        let mut chain = Value::None;
        for _ in 0..200_000 {
            chain = Value::tuple(vec![chain, Value::Int(1)]);
        }
        drop(chain);
    }

    #[test]
    fn test_release_cycles_frees_self_referencing_list() {
        let list = Value::list(vec![]);
        let Value::List(inner) = &list else { unreachable!() };
        inner.borrow_mut().push(list.clone());
        let weak = Rc::downgrade(inner);
        drop(list);
        assert!(weak.upgrade().is_some());
        release_cycles();
        assert!(weak.upgrade().is_none());
    }
}
