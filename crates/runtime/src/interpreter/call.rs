//! Calling values and binding arguments to parameters.

use std::rc::Rc;

use super::exceptions::{fail, type_error, ExceptionKind, Exec};
use super::value::{Class, ClassBase, Dict, ExceptionObject, Function, HashKey, Instance, Items, Scope, Value};
use super::{Env, Frame, Interpreter};

/// Arguments of one call, after `*` and `**` unpacking.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    fn with_receiver(mut self, receiver: Value) -> Self {
        self.positional.insert(0, receiver);
        self
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(key, _)| key == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Fail if any keyword argument was left unconsumed.
    pub fn no_keywords(&self, name: &str) -> Exec<()> {
        match self.keywords.first() {
            None => Ok(()),
            Some((key, _)) => type_error(format!("'{}' is an invalid keyword argument for {}()", key, name)),
        }
    }

    /// Exactly `N` positional arguments and no keywords.
    pub fn exact<const N: usize>(self, name: &str) -> Exec<[Value; N]> {
        self.no_keywords(name)?;
        let given = self.positional.len();
        <[Value; N]>::try_from(self.positional).or_else(|_| {
            if N == 1 {
                type_error(format!("{}() takes exactly one argument ({} given)", name, given))
            } else if N == 0 {
                type_error(format!("{}() takes no arguments ({} given)", name, given))
            } else {
                type_error(format!("{}() takes exactly {} arguments ({} given)", name, N, given))
            }
        })
    }

    /// Between `min` and `max` positional arguments and no keywords.
    pub fn between(self, name: &str, min: usize, max: usize) -> Exec<Vec<Value>> {
        self.no_keywords(name)?;
        let given = self.positional.len();
        if given < min {
            return type_error(format!(
                "{}() takes at least {} argument{} ({} given)",
                name,
                min,
                plural(min),
                given
            ));
        }
        if given > max {
            return type_error(format!(
                "{}() takes at most {} argument{} ({} given)",
                name,
                max,
                plural(max),
                given
            ));
        }
        Ok(self.positional)
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`
fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{}'", name)).collect();
    match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

impl Interpreter {
    /// Call any callable value.
    pub fn call(&mut self, callee: &Value, args: CallArgs) -> Exec<Value> {
        match callee {
            Value::Builtin(native) => (native.func)(self, args),
            Value::NativeMethod(method) => (method.method.func)(self, &method.receiver, args),
            Value::Function(function) => self.call_function(function, args),
            Value::BoundMethod(bound) => {
                let function = bound.function.clone();
                self.call_function(&function, args.with_receiver(bound.receiver.clone()))
            }
            Value::Type(kind) => self.construct(*kind, args),
            Value::ExceptionType(kind) => {
                args.no_keywords(kind.name())?;
                Ok(Value::Exception(Rc::new(ExceptionObject::new(
                    *kind,
                    Items::from(args.positional),
                ))))
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::Instance(instance) => match instance.class.lookup("__call__") {
                Some(Value::Function(function)) => self.call_function(&function, args.with_receiver(callee.clone())),
                _ => type_error(format!("'{}' object is not callable", callee.type_name())),
            },
            other => type_error(format!("'{}' object is not callable", other.type_name())),
        }
    }

    pub(crate) fn call_function(&mut self, function: &Rc<Function>, args: CallArgs) -> Exec<Value> {
        self.checkpoint()?;
        if self.frames.len() >= self.max_call_depth {
            return fail(ExceptionKind::RecursionError, "maximum recursion depth exceeded");
        }
        let scope = Scope::new(function.def.scope.clone(), function.closure.clone());
        self.bind_arguments(function, args, &scope)?;

        self.frames.push(Frame {
            function: function.clone(),
            scope: scope.clone(),
        });
        let result = self.exec_block(&function.def.body, &Env::Local(scope));
        self.frames.pop();

        Ok(match result? {
            super::exec::Flow::Return(value) => value,
            _ => Value::None,
        })
    }

    fn bind_arguments(&mut self, function: &Function, args: CallArgs, scope: &Scope) -> Exec<()> {
        let params = &function.def.params;
        let name = &function.qualname;
        let mut vars = scope.vars.borrow_mut();

        let given = args.positional.len();
        let mut positional = args.positional.into_iter();
        for (param, value) in params.positional.iter().zip(&mut positional) {
            vars.insert(param.name.clone(), value);
        }
        let extra: Vec<Value> = positional.collect();
        match &params.vararg {
            Some(vararg) => {
                vars.insert(vararg.clone(), Value::tuple(extra));
            }
            None if !extra.is_empty() => {
                let max = params.positional.len();
                let min = max - function.defaults.len();
                let accepted = if min == max {
                    format!("{} positional argument{}", max, plural(max))
                } else {
                    format!("from {} to {} positional arguments", min, max)
                };
                let verb = if given == 1 { "was" } else { "were" };
                return type_error(format!("{}() takes {} but {} {} given", name, accepted, given, verb));
            }
            None => {}
        }

        let mut extra_keywords = params.kwarg.as_ref().map(|_| Dict::new());
        for (key, value) in args.keywords {
            let is_param = params.positional.iter().chain(params.kwonly.iter()).any(|p| p.name == key);
            if is_param {
                if vars.contains_key(&key) {
                    return type_error(format!("{}() got multiple values for argument '{}'", name, key));
                }
                vars.insert(key, value);
            } else if let Some(extra) = extra_keywords.as_mut() {
                extra.insert(HashKey::Str(Rc::from(key.as_str())), Value::str(key), value)?;
            } else {
                return type_error(format!("{}() got an unexpected keyword argument '{}'", name, key));
            }
        }

        let first_default = params.positional.len() - function.defaults.len();
        let mut missing = Vec::new();
        for (index, param) in params.positional.iter().enumerate() {
            if vars.contains_key(&param.name) {
                continue;
            }
            if index >= first_default {
                vars.insert(param.name.clone(), function.defaults[index - first_default].clone());
            } else {
                missing.push(param.name.as_str());
            }
        }
        if !missing.is_empty() {
            return type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                name,
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            ));
        }

        for param in &params.kwonly {
            if vars.contains_key(&param.name) {
                continue;
            }
            match function.kw_defaults.get(&param.name) {
                Some(default) => {
                    vars.insert(param.name.clone(), default.clone());
                }
                None => missing.push(param.name.as_str()),
            }
        }
        if !missing.is_empty() {
            return type_error(format!(
                "{}() missing {} required keyword-only argument{}: {}",
                name,
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            ));
        }

        if let (Some(kwarg), Some(extra)) = (&params.kwarg, extra_keywords) {
            vars.insert(kwarg.clone(), Value::dict(extra));
        }
        Ok(())
    }

    /// `ClassName(...)`
    fn instantiate(&mut self, class: &Rc<Class>, args: CallArgs) -> Exec<Value> {
        let instance = Instance::create(class.clone());
        if class.exception_kind().is_some() {
            *instance.args.borrow_mut() = Items::from(args.positional.clone());
        }
        let value = Value::Instance(instance);

        match class.lookup("__init__") {
            Some(Value::Function(init)) => {
                let result = self.call_function(&init, args.with_receiver(value.clone()))?;
                if !matches!(result, Value::None) {
                    return type_error(format!("__init__() should return None, not '{}'", result.type_name()));
                }
            }
            Some(other) => {
                self.call(&other, args.with_receiver(value.clone()))?;
            }
            None => {
                if class.exception_kind().is_none() && !args.is_empty() {
                    return type_error(format!("{}() takes no arguments", class.name));
                }
            }
        }
        Ok(value)
    }

    /// `super()` inside a method: the enclosing class and the first argument.
    pub(crate) fn current_super(&self) -> Exec<(Rc<Class>, Value)> {
        let Some(frame) = self.frames.last() else {
            return fail(ExceptionKind::RuntimeError, "super(): no arguments");
        };
        let receiver = frame
            .function
            .def
            .params
            .positional
            .first()
            .and_then(|param| frame.scope.vars.borrow().get(&param.name).cloned());
        let Some(receiver) = receiver else {
            return fail(ExceptionKind::RuntimeError, "super(): no arguments");
        };
        let class = match &receiver {
            Value::Instance(instance) => instance.class.clone(),
            Value::Class(class) => class.clone(),
            _ => return fail(ExceptionKind::RuntimeError, "super(): __class__ cell not found"),
        };

        // The class along the receiver's chain that defines the running method.
        let mut current = Some(class);
        while let Some(candidate) = current {
            let defines = candidate
                .attrs
                .borrow()
                .values()
                .any(|value| matches!(value, Value::Function(f) if Rc::ptr_eq(f, &frame.function)));
            if defines {
                return Ok((candidate, receiver));
            }
            current = match &candidate.base {
                ClassBase::Class(parent) => Some(parent.clone()),
                _ => None,
            };
        }
        fail(ExceptionKind::RuntimeError, "super(): __class__ cell not found")
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_defaults_and_keywords() {
        let source = "\
def greet(name, greeting='Hello', *, punct='!'):
    return greeting + ', ' + name + punct
print(greet('Ana'))
print(greet('Bo', 'Hi'))
print(greet(greeting='Hey', name='Cy', punct='?'))
";
        assert_eq!(output(source), "Hello, Ana!\nHi, Bo!\nHey, Cy?\n");
    }

    #[test]
    fn test_varargs_and_kwargs() {
        let source = "\
def f(a, *rest, **opts):
    return (a, rest, sorted(opts.items()))
print(f(1, 2, 3, x=4, y=5))
args = [10, 20]
kw = {'k': 1}
print(f(*args, **kw))
";
        assert_eq!(output(source), "(1, (2, 3), [('x', 4), ('y', 5)])\n(10, (20,), [('k', 1)])\n");
    }

    #[test]
    fn test_binding_errors() {
        assert_eq!(
            fault("def f(a, b):\n    pass\nf(1)"),
            "TypeError: f() missing 1 required positional argument: 'b'"
        );
        assert_eq!(
            fault("def f(a, b, c):\n    pass\nf()"),
            "TypeError: f() missing 3 required positional arguments: 'a', 'b', and 'c'"
        );
        assert_eq!(
            fault("def f(a):\n    pass\nf(1, 2)"),
            "TypeError: f() takes 1 positional argument but 2 were given"
        );
        assert_eq!(
            fault("def f(a, b=1):\n    pass\nf(1, 2, 3)"),
            "TypeError: f() takes from 1 to 2 positional arguments but 3 were given"
        );
        assert_eq!(
            fault("def f(a):\n    pass\nf(1, a=2)"),
            "TypeError: f() got multiple values for argument 'a'"
        );
        assert_eq!(
            fault("def f(a):\n    pass\nf(z=2)"),
            "TypeError: f() got an unexpected keyword argument 'z'"
        );
        assert_eq!(
            fault("def f(*, k):\n    pass\nf()"),
            "TypeError: f() missing 1 required keyword-only argument: 'k'"
        );
    }

    #[test]
    fn test_builtin_arity_errors() {
        assert_eq!(fault("len(1, 2)"), "TypeError: len() takes exactly one argument (2 given)");
        assert_eq!(fault("x = 5\nx()"), "TypeError: 'int' object is not callable");
    }

    #[test]
    fn test_recursion_limit() {
        let source = "def f(n):\n    return f(n + 1)\nf(0)";
        assert_eq!(fault(source), "RecursionError: maximum recursion depth exceeded");
    }

    #[test]
    fn test_recursive_functions() {
        let source = "\
def fact(n):
    return 1 if n <= 1 else n * fact(n - 1)
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
print(fact(10), fib(15))
";
        assert_eq!(output(source), "3628800 610\n");
    }

    #[test]
    fn test_classes_and_super() {
        let source = "\
class Animal:
    def __init__(self, name):
        self.name = name
    def speak(self):
        return self.name + ' makes a sound'
class Dog(Animal):
    def __init__(self, name, breed):
        super().__init__(name)
        self.breed = breed
    def speak(self):
        return super().speak() + ' (woof)'
d = Dog('Rex', 'lab')
print(d.speak(), d.breed)
print(isinstance(d, Animal), isinstance(d, Dog))
";
        assert_eq!(output(source), "Rex makes a sound (woof) lab\nTrue True\n");
    }

    #[test]
    fn test_object_without_init_rejects_arguments() {
        assert_eq!(fault("class A:\n    pass\nA(1)"), "TypeError: A() takes no arguments");
        assert_eq!(
            fault("class A:\n    def __init__(self):\n        return 1\nA()"),
            "TypeError: __init__() should return None, not 'int'"
        );
    }

    #[test]
    fn test_callable_instances() {
        let source = "class Add:\n    def __init__(self, n):\n        self.n = n\n    def __call__(self, x):\n        return x + self.n\nprint(Add(2)(3))";
        assert_eq!(output(source), "5\n");
    }
}
