//! Capability Namespace Module
//!
//! This module builds the only names a submission can reach. Everything
//! else (files, sockets, processes, dynamic evaluation, reflection) has no
//! entry here, so it cannot be reached however the program spells it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::config::PolicyConfig;
use crate::interpreter::builtins::BUILTINS;
use crate::interpreter::{ExceptionKind, NativeFunction, TypeKind};

/// Modules the engine can provide to an `import`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleKind {
    Math,
    Random,
    Json,
    Time,
}

impl ModuleKind {
    /// Get all modules the engine implements
    pub fn all() -> Vec<ModuleKind> {
        vec![ModuleKind::Math, ModuleKind::Random, ModuleKind::Json, ModuleKind::Time]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Math => "math",
            ModuleKind::Random => "random",
            ModuleKind::Json => "json",
            ModuleKind::Time => "time",
        }
    }

    pub fn from_name(name: &str) -> Option<ModuleKind> {
        ModuleKind::all().into_iter().find(|kind| kind.name() == name)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            ModuleKind::Math => "Floating point and integer math",
            ModuleKind::Random => "Seeded pseudo-random numbers",
            ModuleKind::Json => "JSON encoding and decoding",
            ModuleKind::Time => "Clock reads and cancellable sleep",
        }
    }
}

/// One entry of the namespace
#[derive(Debug, Clone, Copy)]
pub enum Capability {
    /// A built-in function such as `print`
    Function(&'static NativeFunction),
    /// A built-in type such as `int`, callable as a constructor
    Type(TypeKind),
    /// A built-in exception class
    Exception(ExceptionKind),
}

/// Supplies the pre-set answer to every `input()` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputProvider {
    line: String,
}

impl InputProvider {
    /// One trailing newline (`\n` or `\r\n`) is dropped, as a console read would.
    pub fn new(data: &str) -> Self {
        let line = data
            .strip_suffix("\r\n")
            .or_else(|| data.strip_suffix('\n'))
            .unwrap_or(data);
        Self { line: line.to_string() }
    }

    /// The same string is returned on every read.
    pub fn read(&self) -> &str {
        &self.line
    }
}

/// Identifiers visible to one run, built fresh for every execution.
#[derive(Debug, Clone)]
pub struct CapabilityNamespace {
    entries: BTreeMap<&'static str, Capability>,
    modules: BTreeSet<ModuleKind>,
    input: InputProvider,
    random_seed: u64,
}

impl CapabilityNamespace {
    pub fn lookup(&self, name: &str) -> Option<Capability> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Module for an `import`, when it is both implemented and allowed.
    pub fn module(&self, name: &str) -> Option<ModuleKind> {
        ModuleKind::from_name(name).filter(|kind| self.modules.contains(kind))
    }

    pub fn modules(&self) -> impl Iterator<Item = ModuleKind> + '_ {
        self.modules.iter().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn input(&self) -> &InputProvider {
        &self.input
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }
}

/// Builds a [`CapabilityNamespace`] from the shared policy
pub struct NamespaceBuilder {
    policy: Arc<PolicyConfig>,
    input: InputProvider,
    random_seed: u64,
}

impl NamespaceBuilder {
    pub fn new(policy: Arc<PolicyConfig>) -> Self {
        Self {
            policy,
            input: InputProvider::default(),
            random_seed: 0,
        }
    }

    pub fn with_input(mut self, data: &str) -> Self {
        self.input = InputProvider::new(data);
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn build(self) -> CapabilityNamespace {
        let mut entries = BTreeMap::new();

        for native in BUILTINS {
            entries.insert(native.name, Capability::Function(native));
        }
        for kind in CONSTRUCTIBLE_TYPES {
            entries.insert(kind.name(), Capability::Type(*kind));
        }
        entries.insert("type", Capability::Type(TypeKind::Type));
        for kind in ExceptionKind::EXPOSED {
            entries.insert(kind.name(), Capability::Exception(*kind));
        }

        // A banned name stays unreachable even under indirection.
        entries.retain(|name, _| !self.policy.is_banned(name));

        let modules: BTreeSet<ModuleKind> = ModuleKind::all()
            .into_iter()
            .filter(|kind| self.policy.allows_module(kind.name()))
            .collect();

        debug!(
            builtins = entries.len(),
            modules = ?modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "capability namespace built"
        );

        CapabilityNamespace {
            entries,
            modules,
            input: self.input,
            random_seed: self.random_seed,
        }
    }
}

/// Built-in types callable as constructors
const CONSTRUCTIBLE_TYPES: &[TypeKind] = &[
    TypeKind::Int,
    TypeKind::Float,
    TypeKind::Str,
    TypeKind::Bool,
    TypeKind::List,
    TypeKind::Tuple,
    TypeKind::Dict,
    TypeKind::Set,
    TypeKind::Range,
    TypeKind::Object,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(modules: &str) -> CapabilityNamespace {
        NamespaceBuilder::new(Arc::new(PolicyConfig::from_csv(modules).unwrap())).build()
    }

    #[test]
    fn test_module_basic_functionality() {
        assert_eq!(ModuleKind::Math.name(), "math");
        assert_eq!(ModuleKind::from_name("json"), Some(ModuleKind::Json));
        assert_eq!(ModuleKind::from_name("os"), None);
        assert!(!ModuleKind::Random.description().is_empty());
    }

    #[test]
    fn test_dangerous_names_are_absent() {
        let ns = namespace("math");
        for name in ["open", "eval", "exec", "compile", "__import__", "getattr", "globals", "vars", "exit"] {
            assert!(!ns.contains(name), "{} must not be reachable", name);
        }
    }

    #[test]
    fn test_expected_names_are_present() {
        let ns = namespace("math");
        for name in ["print", "input", "len", "range", "sorted", "isinstance", "ValueError", "int", "type"] {
            assert!(ns.contains(name), "{} should be reachable", name);
        }
        assert!(matches!(ns.lookup("int"), Some(Capability::Type(TypeKind::Int))));
        assert!(matches!(ns.lookup("KeyError"), Some(Capability::Exception(ExceptionKind::KeyError))));
        assert!(matches!(ns.lookup("print"), Some(Capability::Function(f)) if f.name == "print"));
    }

    #[test]
    fn test_banned_names_are_removed() {
        let policy = PolicyConfig::from_csv("math").unwrap().with_banned_callables(["input", "print"]);
        let ns = NamespaceBuilder::new(Arc::new(policy)).build();
        assert!(!ns.contains("input"));
        assert!(!ns.contains("print"));
        assert!(ns.contains("len"));
    }

    #[test]
    fn test_modules_follow_the_allow_list() {
        let ns = namespace("math,datetime");
        assert_eq!(ns.module("math"), Some(ModuleKind::Math));
        assert_eq!(ns.module("random"), None);
        assert_eq!(ns.module("datetime"), None);
        assert_eq!(ns.modules().collect::<Vec<_>>(), vec![ModuleKind::Math]);
    }

    #[test]
    fn test_input_provider() {
        assert_eq!(InputProvider::new("42\n").read(), "42");
        assert_eq!(InputProvider::new("a b\r\n").read(), "a b");
        assert_eq!(InputProvider::new("x\n\n").read(), "x\n");
        assert_eq!(InputProvider::default().read(), "");

        let ns = NamespaceBuilder::new(Arc::new(PolicyConfig::default()))
            .with_input("hello\n")
            .with_random_seed(7)
            .build();
        assert_eq!(ns.input().read(), "hello");
        assert_eq!(ns.random_seed(), 7);
    }
}
