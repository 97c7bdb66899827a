//! Tree-walking interpreter for accepted submissions.
//!
//! A run owns all of its state: the global variables, the captured output
//! channels, the module cache and the random generator. Nothing survives the
//! run; reference cycles the program built are broken when it ends.

pub mod builtins;
mod call;
mod eval;
mod exceptions;
mod exec;
mod format;
mod iter;
mod json;
mod methods;
mod modules;
mod ops;
mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::ast::Program;
use crate::execution::{CancellationToken, OutputBuffer};
use crate::sandbox::{Capability, CapabilityNamespace, ModuleKind};

pub use call::CallArgs;
pub use exceptions::{ExceptionKind, Exec, Interrupt, RaisedException};
pub use value::{MethodDef, NativeFunction, TypeKind, Value};

use exceptions::fail;
use value::{Attrs, Function, Module, Scope};

/// Channels and limits a run works with.
pub struct RunContext {
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
    pub cancel: CancellationToken,
    pub max_call_depth: usize,
}

/// How a program left the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramExit {
    Finished,
    /// Uncaught exception, formatted as `"<Kind>: <message>"`
    Raised { message: String },
    Cancelled,
}

/// Execute a parsed program to completion.
pub fn run(program: &Program, namespace: CapabilityNamespace, context: RunContext) -> ProgramExit {
    let exit = {
        let mut interpreter = Interpreter::new(namespace, context);
        interpreter.run_program(program)
    };
    value::release_cycles();
    exit
}

/// Where names are read from and written to.
pub(crate) enum Env {
    /// Top level of the program
    Module,
    /// Inside a function call or a comprehension
    Local(Rc<Scope>),
    /// Inside a class body
    Class {
        name: String,
        attrs: RefCell<Attrs>,
        outer: Option<Rc<Scope>>,
    },
}

impl Env {
    /// Scope that functions defined here close over.
    fn closure(&self) -> Option<Rc<Scope>> {
        match self {
            Env::Module => None,
            Env::Local(scope) => Some(scope.clone()),
            Env::Class { outer, .. } => outer.clone(),
        }
    }
}

/// An active call of a user-defined function.
struct Frame {
    function: Rc<Function>,
    scope: Rc<Scope>,
}

pub struct Interpreter {
    namespace: CapabilityNamespace,
    globals: Attrs,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    cancel: CancellationToken,
    rng: StdRng,
    modules: HashMap<ModuleKind, Rc<Module>>,
    frames: Vec<Frame>,
    max_call_depth: usize,
    /// Depth of recursive repr / comparison / serialization
    nesting: usize,
    /// Exceptions being handled by enclosing `except` blocks
    handling: Vec<Value>,
    started: Instant,
}

impl Interpreter {
    fn new(namespace: CapabilityNamespace, context: RunContext) -> Self {
        let rng = StdRng::seed_from_u64(namespace.random_seed());
        let mut globals = Attrs::default();
        globals.insert("__name__".to_string(), Value::str("__main__"));
        Self {
            namespace,
            globals,
            stdout: context.stdout,
            stderr: context.stderr,
            cancel: context.cancel,
            rng,
            modules: HashMap::new(),
            frames: Vec::new(),
            max_call_depth: context.max_call_depth,
            nesting: 0,
            handling: Vec::new(),
            started: Instant::now(),
        }
    }

    fn run_program(&mut self, program: &Program) -> ProgramExit {
        match self.exec_block(&program.body, &Env::Module) {
            Ok(_) => ProgramExit::Finished,
            Err(Interrupt::Cancelled) => {
                trace!("run cancelled");
                ProgramExit::Cancelled
            }
            Err(Interrupt::Raised(raised)) => {
                let message = self.describe_exception(&raised.value);
                let location = match raised.line {
                    Some(line) => format!("  File \"<submission>\", line {}\n", line),
                    None => String::new(),
                };
                // The error channel may itself be full; the message is still reported.
                let _ = self
                    .stderr
                    .write(&format!("Traceback (most recent call last):\n{}{}\n", location, message));
                ProgramExit::Raised { message }
            }
        }
    }

    /// `"<Kind>: <str(exc)>"`, the form faults are reported in.
    fn describe_exception(&mut self, value: &Value) -> String {
        let text = match self.to_str(value) {
            Ok(text) => text,
            Err(_) => "<exception str() failed>".to_string(),
        };
        format!("{}: {}", value.type_name(), text)
    }

    /// Stop when the run has been cancelled from outside.
    pub(crate) fn checkpoint(&self) -> Exec<()> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn write_stdout(&mut self, text: &str) -> Exec<()> {
        self.stdout
            .write(text)
            .or_else(|err| fail(ExceptionKind::MemoryError, err.to_string()))
    }

    /// Run `f` one level deeper in a recursive walk over nested values.
    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Exec<T>) -> Exec<T> {
        if self.nesting >= self.max_call_depth {
            return fail(ExceptionKind::RecursionError, "maximum recursion depth exceeded");
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // Names

    fn builtin(&self, name: &str) -> Option<Value> {
        self.namespace.lookup(name).map(|capability| match capability {
            Capability::Function(native) => Value::Builtin(native),
            Capability::Type(kind) => Value::Type(kind),
            Capability::Exception(kind) => Value::ExceptionType(kind),
        })
    }

    fn load_global(&self, name: &str) -> Exec<Value> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        match self.builtin(name) {
            Some(value) => Ok(value),
            None => fail(ExceptionKind::NameError, format!("name '{}' is not defined", name)),
        }
    }

    /// Resolve a free name through the enclosing function scopes.
    fn load_enclosing(&self, name: &str, mut scope: Option<Rc<Scope>>) -> Exec<Value> {
        while let Some(current) = scope {
            if current.info.globals.contains(name) {
                break;
            }
            if current.info.is_local(name) {
                return match current.vars.borrow().get(name) {
                    Some(value) => Ok(value.clone()),
                    None => fail(
                        ExceptionKind::NameError,
                        format!(
                            "cannot access free variable '{}' where it is not associated with a value in enclosing scope",
                            name
                        ),
                    ),
                };
            }
            scope = current.parent.clone();
        }
        self.load_global(name)
    }

    pub(crate) fn load_name(&self, name: &str, env: &Env) -> Exec<Value> {
        match env {
            Env::Module => self.load_global(name),
            Env::Local(scope) => {
                if scope.info.globals.contains(name) {
                    return self.load_global(name);
                }
                if scope.info.is_local(name) {
                    return match scope.vars.borrow().get(name) {
                        Some(value) => Ok(value.clone()),
                        None => fail(
                            ExceptionKind::UnboundLocalError,
                            format!("cannot access local variable '{}' where it is not associated with a value", name),
                        ),
                    };
                }
                self.load_enclosing(name, scope.parent.clone())
            }
            Env::Class { attrs, outer, .. } => {
                if let Some(value) = attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                self.load_enclosing(name, outer.clone())
            }
        }
    }

    /// Scope that owns a `nonlocal` name.
    fn owner_scope(name: &str, mut scope: Option<Rc<Scope>>) -> Option<Rc<Scope>> {
        while let Some(current) = scope {
            if current.info.is_local(name) {
                return Some(current);
            }
            scope = current.parent.clone();
        }
        None
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value, env: &Env) -> Exec<()> {
        match env {
            Env::Module => {
                self.globals.insert(name.to_string(), value);
            }
            Env::Local(scope) => {
                if scope.info.globals.contains(name) {
                    self.globals.insert(name.to_string(), value);
                } else if scope.info.nonlocals.contains(name) {
                    match Self::owner_scope(name, scope.parent.clone()) {
                        Some(owner) => {
                            owner.vars.borrow_mut().insert(name.to_string(), value);
                        }
                        None => {
                            self.globals.insert(name.to_string(), value);
                        }
                    }
                } else {
                    scope.vars.borrow_mut().insert(name.to_string(), value);
                }
            }
            Env::Class { attrs, .. } => {
                attrs.borrow_mut().insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    pub(crate) fn delete_name(&mut self, name: &str, env: &Env) -> Exec<()> {
        let removed = match env {
            Env::Module => self.globals.shift_remove(name),
            Env::Local(scope) => {
                if scope.info.globals.contains(name) {
                    self.globals.shift_remove(name)
                } else if scope.info.nonlocals.contains(name) {
                    Self::owner_scope(name, scope.parent.clone())
                        .and_then(|owner| owner.vars.borrow_mut().shift_remove(name))
                } else {
                    scope.vars.borrow_mut().shift_remove(name)
                }
            }
            Env::Class { attrs, .. } => attrs.borrow_mut().shift_remove(name),
        };
        match removed {
            Some(_) => Ok(()),
            None => fail(ExceptionKind::NameError, format!("name '{}' is not defined", name)),
        }
    }

    pub(crate) fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for running snippets in unit tests.

    use std::sync::Arc;

    use super::*;
    use crate::config::PolicyConfig;
    use crate::parser::parse_program;
    use crate::sandbox::NamespaceBuilder;

    pub struct Finished {
        pub stdout: String,
        pub stderr: String,
        pub exit: ProgramExit,
    }

    impl Finished {
        pub fn error(&self) -> Option<&str> {
            match &self.exit {
                ProgramExit::Raised { message } => Some(message),
                _ => None,
            }
        }
    }

    pub fn run_with_input(source: &str, input: &str) -> Finished {
        let source = source.to_string();
        let input = input.to_string();
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || {
                let program = parse_program(&source).unwrap();
                let policy = PolicyConfig::from_csv("math,random,json,time,datetime").unwrap();
                let namespace = NamespaceBuilder::new(Arc::new(policy))
                    .with_input(&input)
                    .with_random_seed(42)
                    .build();
                let stdout = OutputBuffer::new(1024 * 1024);
                let stderr = OutputBuffer::new(1024 * 1024);
                let context = RunContext {
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                    cancel: CancellationToken::new(),
                    max_call_depth: 200,
                };
                let exit = super::run(&program, namespace, context);
                Finished {
                    stdout: stdout.contents(),
                    stderr: stderr.contents(),
                    exit,
                }
            })
            .unwrap()
            .join()
            .unwrap()
    }

    pub fn run(source: &str) -> Finished {
        run_with_input(source, "")
    }

    /// Standard output of a snippet that must finish cleanly.
    pub fn output(source: &str) -> String {
        let finished = run_with_input(source, "");
        assert_eq!(finished.exit, ProgramExit::Finished, "stderr: {}", finished.stderr);
        finished.stdout
    }

    /// Fault message of a snippet that must raise.
    pub fn fault(source: &str) -> String {
        let finished = run_with_input(source, "");
        match finished.exit {
            ProgramExit::Raised { message } => message,
            other => panic!("expected a fault, got {:?} with output {:?}", other, finished.stdout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{fault, output, run};
    use super::ProgramExit;

    #[test]
    fn test_hello_world() {
        assert_eq!(output("print(\"Olá, mundo!\")"), "Olá, mundo!\n");
    }

    #[test]
    fn test_globals_and_locals() {
        let source = "x = 1\ndef f():\n    y = x + 1\n    return y\nprint(f(), x)\n";
        assert_eq!(output(source), "2 1\n");
    }

    #[test]
    fn test_global_and_nonlocal_statements() {
        let source = "\
count = 0
def bump():
    global count
    count += 1
bump()
bump()
def outer():
    n = 0
    def inner():
        nonlocal n
        n += 5
    inner()
    return n
print(count, outer())
";
        assert_eq!(output(source), "2 5\n");
    }

    #[test]
    fn test_name_errors() {
        assert_eq!(fault("print(undefined)"), "NameError: name 'undefined' is not defined");
        assert_eq!(
            fault("x = 1\ndef f():\n    print(x)\n    x = 2\nf()"),
            "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
        );
    }

    #[test]
    fn test_closures_capture_enclosing_scope() {
        let source = "\
def make_adder(n):
    def add(x):
        return x + n
    return add
add3 = make_adder(3)
print(add3(4))
";
        assert_eq!(output(source), "7\n");
    }

    #[test]
    fn test_main_guard() {
        assert_eq!(output("if __name__ == '__main__':\n    print('main')"), "main\n");
    }

    #[test]
    fn test_traceback_written_to_stderr() {
        let finished = run("x = 1\nraise ValueError('bad value')\n");
        assert_eq!(
            finished.exit,
            ProgramExit::Raised {
                message: "ValueError: bad value".to_string()
            }
        );
        assert!(finished.stderr.starts_with("Traceback (most recent call last):"));
        assert!(finished.stderr.contains("line 2"));
        assert!(finished.stderr.ends_with("ValueError: bad value\n"));
    }

    #[test]
    fn test_dangerous_names_do_not_exist() {
        assert_eq!(fault("f = open"), "NameError: name 'open' is not defined");
        assert_eq!(fault("g = getattr"), "NameError: name 'getattr' is not defined");
        assert_eq!(fault("x = __builtins__"), "NameError: name '__builtins__' is not defined");
    }

    #[test]
    fn test_self_referencing_structures_are_released() {
        let source = "\
class Node:
    def __init__(self):
        self.me = self
items = []
items.append(items)
for i in range(1000):
    n = Node()
print(len(items))
";
        assert_eq!(output(source), "1\n");
    }
}
