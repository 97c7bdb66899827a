//! Statement execution.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::ops::check_collection_len;
use super::value::{Attrs, Class, ClassBase, Function, Items, Value};
use super::{Env, Interpreter};
use crate::ast::{BinOp, ClassDef, Expr, ExprKind, FunctionDef, ImportFrom, ImportNames, Stmt, StmtKind, TryStmt};

/// How control leaves a block.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

impl Interpreter {
    pub(crate) fn exec_block(&mut self, body: &[Stmt], env: &Env) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Exec<Flow> {
        self.checkpoint()?;
        self.exec_kind(stmt, env).map_err(|interrupt| interrupt.at_line(stmt.line))
    }

    fn exec_kind(&mut self, stmt: &Stmt, env: &Env) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.assign(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value, env)?,
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value, env)?;
                    self.assign(target, value, env)?;
                }
            }
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise { exception, cause } => return self.exec_raise(exception.as_ref(), cause.as_ref(), env),
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, env)?;
                }
            }
            StmtKind::Assert { test, message } => {
                let test = self.eval(test, env)?;
                if !self.truthy(&test)? {
                    let args = match message {
                        Some(message) => vec![self.eval(message, env)?],
                        None => Vec::new(),
                    };
                    let exc = self.call(&Value::ExceptionType(ExceptionKind::AssertionError), CallArgs::new(args))?;
                    return Err(Interrupt::raised(exc));
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    self.store_name(alias.bound_name(), module, env)?;
                }
            }
            StmtKind::ImportFrom(import) => self.exec_import_from(import, env)?,
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, env)?;
                return if self.truthy(&test)? {
                    self.exec_block(body, env)
                } else {
                    self.exec_block(orelse, env)
                };
            }
            StmtKind::While { test, body, orelse } => return self.exec_while(test, body, orelse, env),
            StmtKind::For { target, iter, body, orelse } => return self.exec_for(target, iter, body, orelse, env),
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, env)?;
                self.store_name(&def.name, function, env)?;
            }
            StmtKind::ClassDef(def) => {
                let class = self.exec_class(def, env)?;
                self.store_name(&def.name, class, env)?;
            }
            StmtKind::Try(try_stmt) => return self.exec_try(try_stmt, env),
        }
        Ok(Flow::Normal)
    }

    fn exec_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt], env: &Env) -> Exec<Flow> {
        loop {
            self.checkpoint()?;
            let condition = self.eval(test, env)?;
            if !self.truthy(&condition)? {
                return self.exec_block(orelse, env);
            }
            match self.exec_block(body, env)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
    }

    fn exec_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt], env: &Env) -> Exec<Flow> {
        let iterable = self.eval(iter, env)?;
        let iterator = self.iter_of(&iterable)?;
        loop {
            self.checkpoint()?;
            let Some(item) = self.next_item(&iterator)? else {
                return self.exec_block(orelse, env);
            };
            self.assign(target, item, env)?;
            match self.exec_block(body, env)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
    }

    fn exec_aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, env: &Env) -> Exec<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name, env)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace(op, current, rhs)?;
                self.store_name(name, result, env)
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, env)?;
                let current = self.get_attribute(&object, attr)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace(op, current, rhs)?;
                self.set_attribute(&object, attr, result)
            }
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval(container, env)?;
                let index = self.eval(index, env)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace(op, current, rhs)?;
                self.set_item(&container, index, result)
            }
            _ => fail(ExceptionKind::TypeError, "illegal expression for augmented assignment"),
        }
    }

    /// `a op= b`. Lists grow in place; everything else rebinds.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: Value) -> Exec<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            {
                let mut items = list.borrow_mut();
                check_collection_len(items.len().saturating_add(extra.len()))?;
                items.extend(extra);
            }
            return Ok(current);
        }
        self.binary(op, &current, &rhs)
    }

    pub(crate) fn assign(&mut self, target: &Expr, value: Value, env: &Env) -> Exec<()> {
        match &target.kind {
            ExprKind::Name(name) => self.store_name(name, value, env),
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object, env)?;
                self.set_attribute(&object, attr, value)
            }
            ExprKind::Subscript { value: container, index } => {
                let container = self.eval(container, env)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref(), env)?;
                    return self.set_slice(&container, bounds, value);
                }
                let index = self.eval(index, env)?;
                self.set_item(&container, index, value)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => self.unpack(items, value, env),
            _ => fail(ExceptionKind::TypeError, "cannot assign to expression"),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, env: &Env) -> Exec<()> {
        if !self.is_iterable(&value) {
            return type_error(format!("cannot unpack non-iterable {} object", value.type_name()));
        }
        let mut values = self.collect(&value)?;
        let star = targets.iter().position(|t| matches!(t.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if values.len() < targets.len() {
                    return value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        values.len()
                    ));
                }
                if values.len() > targets.len() {
                    return value_error(format!("too many values to unpack (expected {})", targets.len()));
                }
                for (target, item) in targets.iter().zip(values) {
                    self.assign(target, item, env)?;
                }
            }
            Some(star) => {
                let fixed = targets.len() - 1;
                if values.len() < fixed {
                    return value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        fixed,
                        values.len()
                    ));
                }
                let after = targets.len() - star - 1;
                let tail = values.split_off(values.len() - after);
                let middle = values.split_off(star);
                for (target, item) in targets[..star].iter().zip(values) {
                    self.assign(target, item, env)?;
                }
                if let ExprKind::Starred(inner) = &targets[star].kind {
                    self.assign(inner, Value::list(middle), env)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item, env)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr, env: &Env) -> Exec<()> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name, env),
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, env)?;
                self.delete_attribute(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, env)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref(), env)?;
                    return self.delete_slice(&container, bounds);
                }
                let index = self.eval(index, env)?;
                self.delete_item(&container, &index)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete(item, env)?;
                }
                Ok(())
            }
            _ => fail(ExceptionKind::TypeError, "cannot delete expression"),
        }
    }

    fn exec_raise(&mut self, exception: Option<&Expr>, cause: Option<&Expr>, env: &Env) -> Exec<Flow> {
        let Some(exception) = exception else {
            return match self.handling.last() {
                Some(active) => Err(Interrupt::raised(active.clone())),
                None => fail(ExceptionKind::RuntimeError, "No active exception to reraise"),
            };
        };
        let value = self.eval(exception, env)?;
        if let Some(cause) = cause {
            self.eval(cause, env)?;
        }
        let exception = self.make_exception(value)?;
        Err(Interrupt::raised(exception))
    }

    /// Turn the operand of `raise` into an exception instance.
    fn make_exception(&mut self, value: Value) -> Exec<Value> {
        match &value {
            Value::ExceptionType(_) => self.call(&value, CallArgs::empty()),
            Value::Class(class) if class.exception_kind().is_some() => self.call(&value, CallArgs::empty()),
            other if other.exception_kind().is_some() => Ok(value),
            _ => type_error("exceptions must derive from BaseException"),
        }
    }

    fn exec_try(&mut self, try_stmt: &TryStmt, env: &Env) -> Exec<Flow> {
        let outcome = match self.exec_block(&try_stmt.body, env) {
            Ok(Flow::Normal) => self.exec_block(&try_stmt.orelse, env),
            Ok(flow) => Ok(flow),
            Err(Interrupt::Raised(raised)) => self.handle_exception(try_stmt, Interrupt::Raised(raised), env),
            Err(Interrupt::Cancelled) => return Err(Interrupt::Cancelled),
        };
        if try_stmt.finalbody.is_empty() || matches!(outcome, Err(Interrupt::Cancelled)) {
            return outcome;
        }
        match self.exec_block(&try_stmt.finalbody, env)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle_exception(&mut self, try_stmt: &TryStmt, interrupt: Interrupt, env: &Env) -> Exec<Flow> {
        let Interrupt::Raised(raised) = &interrupt else {
            return Err(interrupt);
        };
        let exception = raised.value.clone();
        for handler in &try_stmt.handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval(kind, env).map_err(|err| err.at_line(handler.line))?;
                    self.exception_matches(&exception, &kind)
                        .map_err(|err| err.at_line(handler.line))?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, exception.clone(), env)?;
            }
            self.handling.push(exception);
            let result = self.exec_block(&handler.body, env);
            self.handling.pop();
            if let Some(name) = &handler.name {
                // The handler body may already have removed the name.
                let _ = self.delete_name(name, env);
            }
            return result;
        }
        Err(interrupt)
    }

    /// Whether `exception` is caught by an `except <kind>` clause.
    pub(crate) fn exception_matches(&mut self, exception: &Value, kind: &Value) -> Exec<bool> {
        match kind {
            Value::ExceptionType(expected) => Ok(exception
                .exception_kind()
                .is_some_and(|actual| actual.is_subclass_of(*expected))),
            Value::Class(class) if class.exception_kind().is_some() => Ok(match exception {
                Value::Instance(instance) => instance.class.is_subclass_of(class),
                _ => false,
            }),
            Value::Tuple(kinds) => {
                for kind in kinds.iter() {
                    if self.exception_matches(exception, kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => type_error("catching classes that do not inherit from BaseException is not allowed"),
        }
    }

    pub(crate) fn make_function(&mut self, def: &Arc<FunctionDef>, env: &Env) -> Exec<Value> {
        let mut defaults = Vec::new();
        for param in &def.params.positional {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, env)?);
            }
        }
        let mut kw_defaults = Attrs::default();
        for param in &def.params.kwonly {
            if let Some(default) = &param.default {
                let value = self.eval(default, env)?;
                kw_defaults.insert(param.name.clone(), value);
            }
        }
        let qualname = match env {
            Env::Class { name, .. } => format!("{}.{}", name, def.name),
            _ => def.name.clone(),
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            qualname,
            defaults: Items::from(defaults),
            kw_defaults,
            closure: env.closure(),
        })))
    }

    fn exec_class(&mut self, def: &ClassDef, env: &Env) -> Exec<Value> {
        let base = match def.bases.as_slice() {
            [] => ClassBase::Object,
            [base] => match self.eval(base, env)? {
                Value::Class(parent) => ClassBase::Class(parent),
                Value::ExceptionType(kind) => ClassBase::Exception(kind),
                Value::Type(kind) if kind == super::TypeKind::Object => ClassBase::Object,
                Value::Type(kind) => {
                    return type_error(format!("inheriting from built-in type '{}' is not supported", kind.name()))
                }
                other => return type_error(format!("cannot inherit from '{}' object", other.type_name())),
            },
            _ => return type_error("multiple inheritance is not supported"),
        };

        let body_env = Env::Class {
            name: def.name.clone(),
            attrs: RefCell::new(Attrs::default()),
            outer: env.closure(),
        };
        match self.exec_block(&def.body, &body_env)? {
            Flow::Normal => {}
            _ => return fail(ExceptionKind::RuntimeError, "invalid control flow in class body"),
        }
        let Env::Class { attrs, .. } = body_env else {
            return fail(ExceptionKind::RuntimeError, "invalid class body");
        };
        Ok(Value::Class(Rc::new(Class {
            name: def.name.clone(),
            base,
            attrs,
        })))
    }

    fn exec_import_from(&mut self, import: &ImportFrom, env: &Env) -> Exec<()> {
        let module_name = match (&import.module, import.level) {
            (Some(name), 0) => name,
            _ => {
                return fail(
                    ExceptionKind::ImportError,
                    "attempted relative import with no known parent package",
                )
            }
        };
        let module = self.import_module(module_name)?;
        let Value::Module(module) = module else {
            return fail(ExceptionKind::ImportError, format!("No module named '{}'", module_name));
        };
        match &import.names {
            ImportNames::Star => {
                let exported: Vec<(String, Value)> = module
                    .attrs
                    .borrow()
                    .iter()
                    .filter(|(name, _)| !name.starts_with('_'))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                for (name, value) in exported {
                    self.store_name(&name, value, env)?;
                }
            }
            ImportNames::Aliases(aliases) => {
                for alias in aliases {
                    let value = module.attrs.borrow().get(&alias.name).cloned();
                    let Some(value) = value else {
                        return fail(
                            ExceptionKind::ImportError,
                            format!("cannot import name '{}' from '{}'", alias.name, module_name),
                        );
                    };
                    self.store_name(alias.asname.as_deref().unwrap_or(&alias.name), value, env)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_growth_is_capped() {
        let big = "xs = [0] * 3000000\n";
        assert_eq!(fault(&format!("{}xs += xs", big)), "MemoryError: sequence is too large");
        assert_eq!(fault(&format!("{}xs += range(1500000)", big)), "MemoryError: sequence is too large");
        assert_eq!(fault(&format!("{}xs.extend(xs)", big)), "MemoryError: sequence is too large");
        assert_eq!(fault(&format!("{}ys = xs + xs", big)), "MemoryError: sequence is too large");
        assert_eq!(fault(&format!("{}t = tuple(xs)\nu = t + t", big)), "MemoryError: sequence is too large");
        assert_eq!(
            fault("s = 'x' * 10000000\nt = f'{s}-{s}'"),
            "MemoryError: string is too large"
        );
        assert_eq!(fault("s = 'x' * 10000000\ns += s"), "MemoryError: string is too large");
        assert_eq!(output("xs = [1]\nxs += (2, 3)\nxs += xs\nprint(xs)"), "[1, 2, 3, 1, 2, 3]\n");
    }

    #[test]
    fn test_annotations_are_not_evaluated() {
        let source = "\
count: int = 3
pending: Undefined
def scale(x: float, *rest: Whatever, factor: float = 2.0, **opts: Missing) -> float:
    return x * factor
print(count, scale(1.5))
";
        assert_eq!(output(source), "3 3.0\n");
    }

    #[test]
    fn test_loops_with_else_break_continue() {
        let source = "\
for i in range(5):
    if i == 1:
        continue
    if i == 3:
        break
    print(i)
else:
    print('no break')
n = 0
while n < 3:
    n += 1
else:
    print('done', n)
";
        assert_eq!(output(source), "0\n2\ndone 3\n");
    }

    #[test]
    fn test_unpacking() {
        let source = "\
a, b = 1, 2
a, b = b, a
first, *rest = [1, 2, 3, 4]
*init, last = 'abc'
x, (y, z) = 1, (2, 3)
print(a, b, first, rest, init, last, x, y, z)
";
        assert_eq!(output(source), "2 1 1 [2, 3, 4] ['a', 'b'] c 1 2 3\n");
        assert_eq!(
            fault("a, b = [1, 2, 3]"),
            "ValueError: too many values to unpack (expected 2)"
        );
        assert_eq!(
            fault("a, b, c = (1, 2)"),
            "ValueError: not enough values to unpack (expected 3, got 2)"
        );
        assert_eq!(fault("a, b = 5"), "TypeError: cannot unpack non-iterable int object");
    }

    #[test]
    fn test_augmented_assignment() {
        let source = "\
xs = [1]
alias = xs
xs += [2, 3]
d = {'n': 1}
d['n'] *= 10
class C:
    pass
c = C()
c.v = 'a'
c.v += 'b'
t = (1,)
t += (2,)
print(alias, d, c.v, t)
";
        assert_eq!(output(source), "[1, 2, 3] {'n': 10} ab (1, 2)\n");
    }

    #[test]
    fn test_try_except_else_finally() {
        let source = "\
def check(x):
    try:
        r = 10 // x
    except ZeroDivisionError as e:
        print('caught', e)
        return -1
    else:
        print('ok')
        return r
    finally:
        print('finally')
print(check(2))
print(check(0))
";
        assert_eq!(output(source), "ok\nfinally\n5\ncaught integer division or modulo by zero\nfinally\n-1\n");
    }

    #[test]
    fn test_exception_hierarchy_and_tuples() {
        let source = "\
try:
    [][1]
except (KeyError, IndexError) as e:
    print(type(e).__name__)
try:
    {}['k']
except LookupError as e:
    print('lookup', e)
try:
    int('x')
except Exception as e:
    print(e)
";
        assert_eq!(
            output(source),
            "IndexError\nlookup 'k'\ninvalid literal for int() with base 10: 'x'\n"
        );
    }

    #[test]
    fn test_bare_raise_and_custom_exceptions() {
        let source = "\
class InsufficientFunds(Exception):
    pass
def withdraw(balance, amount):
    if amount > balance:
        raise InsufficientFunds('need ' + str(amount - balance))
    return balance - amount
try:
    withdraw(5, 8)
except InsufficientFunds as e:
    print('error:', e)
try:
    try:
        raise ValueError('inner')
    except ValueError:
        raise
except ValueError as e:
    print('reraised', e)
";
        assert_eq!(output(source), "error: need 3\nreraised inner\n");
        assert_eq!(
            fault("class E(Exception):\n    pass\nraise E('x')"),
            "E: x"
        );
        assert_eq!(fault("raise"), "RuntimeError: No active exception to reraise");
        assert_eq!(fault("raise 5"), "TypeError: exceptions must derive from BaseException");
    }

    #[test]
    fn test_assert_and_del() {
        assert_eq!(fault("assert 1 == 2, 'math is broken'"), "AssertionError: math is broken");
        assert_eq!(fault("assert False"), "AssertionError: ");
        assert_eq!(fault("x = 1\ndel x\nprint(x)"), "NameError: name 'x' is not defined");
        assert_eq!(output("d = {'a': 1, 'b': 2}\ndel d['a']\nxs = [1, 2, 3, 4]\ndel xs[1:3]\nprint(d, xs)"), "{'b': 2} [1, 4]\n");
    }

    #[test]
    fn test_imports() {
        let source = "\
import math
import random as rnd
from math import sqrt, pi as PI
from json import *
print(math.floor(2.7), sqrt(16), round(PI, 2), dumps([1]))
";
        assert_eq!(output(source), "2 4.0 3.14 [1]\n");
        assert_eq!(fault("import datetime"), "ModuleNotFoundError: No module named 'datetime'");
        assert_eq!(fault("from math import nope"), "ImportError: cannot import name 'nope' from 'math'");
    }

    #[test]
    fn test_class_attributes_and_methods() {
        let source = "\
class Counter:
    total = 0
    def __init__(self, start=0):
        self.value = start
        Counter.total += 1
    def inc(self, by=1):
        self.value += by
        return self
    def __str__(self):
        return 'Counter(' + str(self.value) + ')'
a = Counter()
b = Counter(5).inc().inc(2)
print(a, b, Counter.total)
";
        assert_eq!(output(source), "Counter(0) Counter(8) 2\n");
    }

    #[test]
    fn test_finally_runs_on_error() {
        let source = "try:\n    print('body')\n    1 / 0\nfinally:\n    print('cleanup')\n";
        let finished = super::super::testing::run(source);
        assert_eq!(finished.stdout, "body\ncleanup\n");
        assert_eq!(finished.error(), Some("ZeroDivisionError: division by zero"));
    }
}
