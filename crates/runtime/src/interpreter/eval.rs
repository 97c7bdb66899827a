//! Expression evaluation and attribute access.

use std::rc::Rc;
use std::sync::Arc;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, ExceptionKind, Exec};
use super::methods;
use super::ops::{check_str_len, SliceSpec};
use super::value::{
    BoundMethod, ClassBase, Dict, GeneratorState, IteratorObject, NativeMethod, Scope, Set, SuperObject, Value, MAX_COLLECTION_LEN,
};
use super::{Env, Interpreter};
use crate::ast::{
    Argument, BoolOp, CompClause, Comprehension, ComprehensionKind, Constant, DictItem, Expr, ExprKind, FStringPart,
};

/// Results gathered by a comprehension.
enum Gathered {
    Items(Vec<Value>),
    Set(Set),
    Dict(Dict),
}

impl Gathered {
    fn len(&self) -> usize {
        match self {
            Gathered::Items(items) => items.len(),
            Gathered::Set(set) => set.len(),
            Gathered::Dict(dict) => dict.len(),
        }
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s.as_str()),
        Constant::Ellipsis => Value::Ellipsis,
    }
}

impl Interpreter {
    pub(crate) fn eval(&mut self, expr: &Expr, env: &Env) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => Ok(constant_value(constant)),
            ExprKind::FString(parts) => Ok(Value::str(self.eval_fstring(parts, env)?)),
            ExprKind::Name(name) => self.load_name(name, env),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items, env)?)),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items, env)?)),
            ExprKind::Set(items) => {
                let mut set = Set::new();
                for item in self.eval_items(items, env)? {
                    set.insert(item.hash_key()?, item)?;
                }
                Ok(Value::set(set))
            }
            ExprKind::Dict(items) => self.eval_dict(items, env),
            ExprKind::Starred(_) => fail(ExceptionKind::RuntimeError, "can't use starred expression here"),
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, &left, &right)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, env)?;
                self.unary(*op, &operand)
            }
            ExprKind::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value, env)?;
                    let truthy = self.truthy(&result)?;
                    match op {
                        BoolOp::And if !truthy => return Ok(result),
                        BoolOp::Or if truthy => return Ok(result),
                        _ => {}
                    }
                }
                Ok(result)
            }
            ExprKind::Compare { left, comparisons } => {
                let mut left = self.eval(left, env)?;
                for (op, right) in comparisons {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.eval(test, env)?;
                if self.truthy(&test)? {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, env),
            ExprKind::Call { func, args } => {
                let callee = self.eval(func, env)?;
                let args = self.eval_args(args, env)?;
                self.call(&callee, args)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value, env)?;
                self.get_attribute(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value, env)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let spec = self.eval_slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref(), env)?;
                    return self.get_slice(&container, spec);
                }
                let index = self.eval(index, env)?;
                self.get_item(&container, &index)
            }
            ExprKind::Slice { .. } => type_error("slice objects are not supported outside of subscripts"),
            ExprKind::Comprehension(comp) => self.eval_comprehension(comp, env),
        }
    }

    /// Evaluate display items, expanding `*iterable` entries.
    fn eval_items(&mut self, items: &[Expr], env: &Env) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let iterable = self.eval(inner, env)?;
                    values.extend(self.collect(&iterable)?);
                }
                _ => values.push(self.eval(item, env)?),
            }
        }
        Ok(values)
    }

    fn eval_dict(&mut self, items: &[DictItem], env: &Env) -> Exec<Value> {
        let mut dict = Dict::new();
        for item in items {
            match item {
                DictItem::Pair(key, value) => {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    dict.insert(key.hash_key()?, key, value)?;
                }
                DictItem::Unpack(mapping) => {
                    let mapping = self.eval(mapping, env)?;
                    let Value::Dict(source) = &mapping else {
                        return type_error(format!("'{}' object is not a mapping", mapping.type_name()));
                    };
                    let entries: Vec<(Value, Value)> =
                        source.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect();
                    for (key, value) in entries {
                        dict.insert(key.hash_key()?, key, value)?;
                    }
                }
            }
        }
        Ok(Value::dict(dict))
    }

    fn eval_args(&mut self, args: &[Argument], env: &Env) -> Exec<CallArgs> {
        let mut call = CallArgs::empty();
        for arg in args {
            match arg {
                Argument::Positional(expr) => call.positional.push(self.eval(expr, env)?),
                Argument::Starred(expr) => {
                    let iterable = self.eval(expr, env)?;
                    if !self.is_iterable(&iterable) {
                        return type_error(format!(
                            "argument after * must be an iterable, not {}",
                            iterable.type_name()
                        ));
                    }
                    call.positional.extend(self.collect(&iterable)?);
                }
                Argument::Keyword(name, expr) => {
                    let value = self.eval(expr, env)?;
                    push_keyword(&mut call, name.clone(), value)?;
                }
                Argument::DoubleStarred(expr) => {
                    let mapping = self.eval(expr, env)?;
                    let Value::Dict(dict) = &mapping else {
                        return type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            mapping.type_name()
                        ));
                    };
                    let entries: Vec<(Value, Value)> =
                        dict.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect();
                    for (key, value) in entries {
                        let Value::Str(key) = key else {
                            return type_error("keywords must be strings");
                        };
                        push_keyword(&mut call, key.to_string(), value)?;
                    }
                }
            }
        }
        Ok(call)
    }

    pub(crate) fn eval_slice_bounds(
        &mut self,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
        step: Option<&Expr>,
        env: &Env,
    ) -> Exec<SliceSpec> {
        let bound = |interp: &mut Self, expr: Option<&Expr>| -> Exec<Option<i64>> {
            let Some(expr) = expr else {
                return Ok(None);
            };
            match interp.eval(expr, env)? {
                Value::None => Ok(None),
                Value::Int(i) => Ok(Some(i)),
                Value::Bool(b) => Ok(Some(b as i64)),
                _ => type_error("slice indices must be integers or None or have an __index__ method"),
            }
        };
        Ok(SliceSpec {
            start: bound(self, lower)?,
            stop: bound(self, upper)?,
            step: bound(self, step)?,
        })
    }

    fn eval_fstring(&mut self, parts: &[FStringPart], env: &Env) -> Exec<String> {
        let mut text = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(literal) => text.push_str(literal),
                FStringPart::Field { expr, conversion, spec } => {
                    let value = self.eval(expr, env)?;
                    let value = match conversion {
                        Some('r') => Value::str(self.repr(&value)?),
                        Some('s') => Value::str(self.to_str(&value)?),
                        Some('a') => Value::str(super::format::ascii_escape(&self.repr(&value)?)),
                        _ => value,
                    };
                    let spec = self.eval_fstring(spec, env)?;
                    let formatted = self.format_value(&value, &spec)?;
                    check_str_len(text.len().saturating_add(formatted.len()))?;
                    text.push_str(&formatted);
                }
            }
        }
        Ok(text)
    }

    fn eval_comprehension(&mut self, comp: &Arc<Comprehension>, env: &Env) -> Exec<Value> {
        // The outermost iterable belongs to the enclosing scope.
        let first = match comp.clauses.first() {
            Some(CompClause::For { iter, .. }) => self.eval(iter, env)?,
            _ => return fail(ExceptionKind::RuntimeError, "comprehension without a for clause"),
        };
        let scope = Scope::new(comp.scope.clone(), env.closure());
        if let ComprehensionKind::Generator(_) = &comp.kind {
            let outer = self.iter_of(&first)?;
            return Ok(Value::iterator(IteratorObject::Generator(Box::new(GeneratorState {
                comp: comp.clone(),
                scope,
                frames: vec![(0, outer)],
            }))));
        }
        let scope = Env::Local(scope);
        let mut gathered = match &comp.kind {
            ComprehensionKind::List(_) | ComprehensionKind::Generator(_) => Gathered::Items(Vec::new()),
            ComprehensionKind::Set(_) => Gathered::Set(Set::new()),
            ComprehensionKind::Dict(..) => Gathered::Dict(Dict::new()),
        };
        self.comprehension_level(comp, 0, Some(first), &scope, &mut gathered)?;

        Ok(match gathered {
            Gathered::Items(items) => Value::list(items),
            Gathered::Set(set) => Value::set(set),
            Gathered::Dict(dict) => Value::dict(dict),
        })
    }

    /// Run a generator expression up to its next element. `None` once every
    /// `for` clause is exhausted.
    pub(crate) fn resume_generator(&mut self, state: &mut GeneratorState) -> Exec<Option<Value>> {
        let comp = state.comp.clone();
        let ComprehensionKind::Generator(element) = &comp.kind else {
            return fail(ExceptionKind::RuntimeError, "mismatched comprehension");
        };
        let env = Env::Local(state.scope.clone());
        let mut descend = None;
        loop {
            self.checkpoint()?;
            let level = match descend.take() {
                Some(level) => level,
                None => {
                    let Some((level, iterator)) = state.frames.last().cloned() else {
                        return Ok(None);
                    };
                    match self.nested(|interp| interp.next_item(&iterator))? {
                        Some(item) => {
                            if let Some(CompClause::For { target, .. }) = comp.clauses.get(level) {
                                self.assign(target, item, &env)?;
                            }
                            level + 1
                        }
                        None => {
                            state.frames.pop();
                            continue;
                        }
                    }
                }
            };
            match comp.clauses.get(level) {
                None => return self.eval(element, &env).map(Some),
                Some(CompClause::For { iter, .. }) => {
                    let iterable = self.eval(iter, &env)?;
                    let iterator = self.iter_of(&iterable)?;
                    state.frames.push((level, iterator));
                }
                Some(CompClause::If(test)) => {
                    let test = self.eval(test, &env)?;
                    if self.truthy(&test)? {
                        descend = Some(level + 1);
                    }
                }
            }
        }
    }

    fn comprehension_level(
        &mut self,
        comp: &Comprehension,
        level: usize,
        preset: Option<Value>,
        env: &Env,
        gathered: &mut Gathered,
    ) -> Exec<()> {
        let Some(clause) = comp.clauses.get(level) else {
            if gathered.len() >= MAX_COLLECTION_LEN {
                return fail(ExceptionKind::MemoryError, "comprehension result is too large");
            }
            return self.gather(comp, env, gathered);
        };
        match clause {
            CompClause::For { target, iter } => {
                let iterable = match preset {
                    Some(value) => value,
                    None => self.eval(iter, env)?,
                };
                let iterator = self.iter_of(&iterable)?;
                while let Some(item) = self.next_item(&iterator)? {
                    self.checkpoint()?;
                    self.assign(target, item, env)?;
                    self.comprehension_level(comp, level + 1, None, env, gathered)?;
                }
                Ok(())
            }
            CompClause::If(test) => {
                let test = self.eval(test, env)?;
                if self.truthy(&test)? {
                    self.comprehension_level(comp, level + 1, None, env, gathered)?;
                }
                Ok(())
            }
        }
    }

    fn gather(&mut self, comp: &Comprehension, env: &Env, gathered: &mut Gathered) -> Exec<()> {
        match (&comp.kind, gathered) {
            (ComprehensionKind::List(element) | ComprehensionKind::Generator(element), Gathered::Items(items)) => {
                items.push(self.eval(element, env)?);
            }
            (ComprehensionKind::Set(element), Gathered::Set(set)) => {
                let value = self.eval(element, env)?;
                set.insert(value.hash_key()?, value)?;
            }
            (ComprehensionKind::Dict(key, value), Gathered::Dict(dict)) => {
                let key = self.eval(key, env)?;
                let value = self.eval(value, env)?;
                dict.insert(key.hash_key()?, key, value)?;
            }
            _ => return fail(ExceptionKind::RuntimeError, "mismatched comprehension"),
        }
        Ok(())
    }

    // Attributes

    pub(crate) fn get_attribute(&mut self, object: &Value, name: &str) -> Exec<Value> {
        match object {
            Value::Instance(instance) => {
                let own = instance.attrs.borrow().get(name).cloned();
                if let Some(value) = own {
                    return Ok(value);
                }
                if name == "args" && instance.class.exception_kind().is_some() {
                    let args = instance.args.borrow().to_vec();
                    return Ok(Value::tuple(args));
                }
                match instance.class.lookup(name) {
                    Some(value) => Ok(bind(value, object)),
                    None => fail(
                        ExceptionKind::AttributeError,
                        format!("'{}' object has no attribute '{}'", instance.class.name, name),
                    ),
                }
            }
            Value::Class(class) => {
                if name == "__name__" {
                    return Ok(Value::str(class.name.as_str()));
                }
                match class.lookup(name) {
                    Some(value) => Ok(value),
                    None => fail(
                        ExceptionKind::AttributeError,
                        format!("type object '{}' has no attribute '{}'", class.name, name),
                    ),
                }
            }
            Value::Module(module) => {
                let found = module.attrs.borrow().get(name).cloned();
                match found {
                    Some(value) => Ok(value),
                    None => fail(
                        ExceptionKind::AttributeError,
                        format!("module '{}' has no attribute '{}'", module.kind.name(), name),
                    ),
                }
            }
            Value::Exception(exc) if name == "args" => Ok(Value::tuple(exc.args.to_vec())),
            Value::Super(proxy) => self.super_attribute(proxy, name),
            Value::Type(kind) if name == "__name__" => Ok(Value::str(kind.name())),
            Value::ExceptionType(kind) if name == "__name__" => Ok(Value::str(kind.name())),
            Value::Function(function) if name == "__name__" => Ok(Value::str(function.def.name.as_str())),
            Value::Builtin(native) if name == "__name__" => Ok(Value::str(native.name)),
            Value::Type(kind) => fail(
                ExceptionKind::AttributeError,
                format!("type object '{}' has no attribute '{}'", kind.name(), name),
            ),
            other => match methods::lookup(other, name) {
                Some(method) => Ok(Value::NativeMethod(Rc::new(NativeMethod {
                    receiver: other.clone(),
                    method,
                }))),
                None => fail(
                    ExceptionKind::AttributeError,
                    format!("'{}' object has no attribute '{}'", other.type_name(), name),
                ),
            },
        }
    }

    pub(crate) fn set_attribute(&mut self, object: &Value, name: &str, value: Value) -> Exec<()> {
        match object {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => fail(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            ),
        }
    }

    pub(crate) fn delete_attribute(&mut self, object: &Value, name: &str) -> Exec<()> {
        let removed = match object {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name),
            _ => None,
        };
        match removed {
            Some(_) => Ok(()),
            None => fail(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{}'", object.type_name(), name),
            ),
        }
    }

    /// Attribute lookup through `super()`, starting above the calling class.
    fn super_attribute(&mut self, proxy: &SuperObject, name: &str) -> Exec<Value> {
        if let ClassBase::Class(parent) = &proxy.class.base {
            if let Some(value) = parent.lookup(name) {
                return Ok(bind(value, &proxy.receiver));
            }
        }
        match methods::object_method(name) {
            Some(method) => Ok(Value::NativeMethod(Rc::new(NativeMethod {
                receiver: proxy.receiver.clone(),
                method,
            }))),
            None => fail(
                ExceptionKind::AttributeError,
                format!("'super' object has no attribute '{}'", name),
            ),
        }
    }

    /// `super()`
    pub(crate) fn make_super(&mut self) -> Exec<Value> {
        let (class, receiver) = self.current_super()?;
        Ok(Value::Super(Rc::new(SuperObject { class, receiver })))
    }
}

fn push_keyword(call: &mut CallArgs, name: String, value: Value) -> Exec<()> {
    if call.keywords.iter().any(|(key, _)| *key == name) {
        return type_error(format!("got multiple values for keyword argument '{}'", name));
    }
    call.keywords.push((name, value));
    Ok(())
}

/// Functions found on a class become methods bound to the instance.
fn bind(value: Value, receiver: &Value) -> Value {
    match value {
        Value::Function(function) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            function,
        })),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_fstrings() {
        let source = "\
name = 'Ana'
score = 9.456
items = [1, 2]
print(f'{name} scored {score:.1f} on {len(items)} items')
print(f'{name!r:>8}|{42:05d}|{3.5:{6}.2f}|{{literal}}')
";
        assert_eq!(output(source), "Ana scored 9.5 on 2 items\n   'Ana'|00042|  3.50|{literal}\n");
    }

    #[test]
    fn test_comprehensions() {
        let source = "\
squares = [x * x for x in range(6) if x % 2 == 0]
pairs = [(a, b) for a in range(3) for b in range(a)]
lengths = {w: len(w) for w in ['aa', 'b']}
unique = {c for c in 'hello'}
total = sum(n for n in range(5))
print(squares, pairs, lengths, sorted(unique), total)
";
        assert_eq!(
            output(source),
            "[0, 4, 16] [(1, 0), (2, 0), (2, 1)] {'aa': 2, 'b': 1} ['e', 'h', 'l', 'o'] 10\n"
        );
    }

    #[test]
    fn test_comprehension_variables_do_not_leak() {
        assert_eq!(fault("[i for i in range(3)]\nprint(i)"), "NameError: name 'i' is not defined");
        let source = "def f(n):\n    return [x * n for x in range(3)]\nprint(f(2))";
        assert_eq!(output(source), "[0, 2, 4]\n");
    }

    #[test]
    fn test_boolean_operators_return_operands() {
        assert_eq!(output("print(0 or 'x', 1 and 2, None or [], 'a' and '')"), "x 2 []  \n");
        assert_eq!(output("print(1 < 2 < 3, 3 > 2 > 2, 1 == 1.0 != 2)"), "True False True\n");
    }

    #[test]
    fn test_displays_with_unpacking() {
        let source = "a = [1, 2]\nb = {'x': 1}\nprint([*a, 3], (*a,), {*a}, {**b, 'y': 2})";
        assert_eq!(output(source), "[1, 2, 3] (1, 2) {1, 2} {'x': 1, 'y': 2}\n");
    }

    #[test]
    fn test_attribute_errors() {
        assert_eq!(
            fault("class P:\n    pass\nP().z"),
            "AttributeError: 'P' object has no attribute 'z'"
        );
        assert_eq!(fault("(5).foo"), "AttributeError: 'int' object has no attribute 'foo'");
        assert_eq!(
            fault("import math\nmath.nothing"),
            "AttributeError: module 'math' has no attribute 'nothing'"
        );
        assert_eq!(fault("x = [1]\nx.y = 2"), "AttributeError: 'list' object has no attribute 'y'");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(
            output("class A:\n    pass\nprint(type(1).__name__, type('s').__name__, A.__name__, type(A()).__name__)"),
            "int str A A\n"
        );
    }

    #[test]
    fn test_lambda_and_sorting_key() {
        let source = "people = [('bo', 30), ('al', 25)]\nprint(sorted(people, key=lambda p: p[1]))";
        assert_eq!(output(source), "[('al', 25), ('bo', 30)]\n");
    }

    #[test]
    fn test_exception_subclass_args_and_super_init() {
        let source = "\
class AppError(Exception):
    def __init__(self, code, message):
        super().__init__(message)
        self.code = code
try:
    raise AppError(404, 'not found')
except AppError as e:
    print(e.code, e, e.args)
";
        assert_eq!(output(source), "404 not found ('not found',)\n");
    }
}
