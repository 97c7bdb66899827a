//! Iteration protocol.

use std::cell::RefCell;
use std::rc::Rc;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, ExceptionKind, Exec};
use super::value::{IteratorObject, Value, MAX_COLLECTION_LEN};
use super::Interpreter;

/// What `next_item` has to do once the iterator state is released.
enum Step {
    Done(Option<Value>),
    Enumerate(Value),
    Zip(Vec<Value>),
    Map(Value, Vec<Value>),
    Filter(Value, Value),
    Generator,
}

fn instance_iter(value: &Value) -> Option<Value> {
    match value {
        Value::Instance(instance) => instance.class.lookup("__iter__"),
        _ => None,
    }
}

impl Interpreter {
    pub(crate) fn is_iterable(&self, value: &Value) -> bool {
        match value {
            Value::Str(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::Range(_)
            | Value::Iterator(_) => true,
            other => instance_iter(other).is_some(),
        }
    }

    /// `iter(value)`
    pub(crate) fn iter_of(&mut self, value: &Value) -> Exec<Rc<RefCell<IteratorObject>>> {
        let state = match value {
            Value::Iterator(iterator) => return Ok(iterator.clone()),
            Value::List(list) => IteratorObject::List {
                list: list.clone(),
                index: 0,
            },
            Value::Str(text) => IteratorObject::snapshot(text.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Tuple(items) => IteratorObject::snapshot(items.to_vec()),
            Value::Dict(dict) => IteratorObject::snapshot(dict.borrow().keys()),
            Value::Set(set) => IteratorObject::snapshot(set.borrow().values()),
            Value::Range(range) => IteratorObject::Range {
                next: range.start,
                remaining: range.len(),
                step: range.step,
            },
            other => match instance_iter(other) {
                Some(method) => {
                    let iterable = self.call(&method, CallArgs::new(vec![other.clone()]))?;
                    if matches!(iterable, Value::Instance(_)) {
                        return type_error(format!(
                            "iter() returned non-iterator of type '{}'",
                            iterable.type_name()
                        ));
                    }
                    return self.nested(|interp| interp.iter_of(&iterable));
                }
                None => return type_error(format!("'{}' object is not iterable", other.type_name())),
            },
        };
        Ok(Rc::new(RefCell::new(state)))
    }

    /// Advance an iterator. `None` once it is exhausted.
    pub(crate) fn next_item(&mut self, iterator: &Rc<RefCell<IteratorObject>>) -> Exec<Option<Value>> {
        let step = {
            let mut state = iterator.borrow_mut();
            match &mut *state {
                IteratorObject::List { list, index } => {
                    let item = list.borrow().get(*index).cloned();
                    *index += 1;
                    Step::Done(item)
                }
                IteratorObject::Snapshot { items, index } => {
                    let item = items.get(*index).cloned();
                    *index += 1;
                    Step::Done(item)
                }
                IteratorObject::Range { next, remaining, step } => {
                    if *remaining == 0 {
                        Step::Done(None)
                    } else {
                        let item = *next;
                        *remaining -= 1;
                        *next = next.wrapping_add(*step);
                        Step::Done(Some(Value::Int(item)))
                    }
                }
                IteratorObject::Enumerate { inner, .. } => Step::Enumerate(inner.clone()),
                IteratorObject::Zip { inners } => Step::Zip(inners.to_vec()),
                IteratorObject::Map { func, inners } => Step::Map(func.clone(), inners.to_vec()),
                IteratorObject::Filter { func, inner } => Step::Filter(func.clone(), inner.clone()),
                IteratorObject::Generator(_) => Step::Generator,
                IteratorObject::Exhausted => Step::Done(None),
            }
        };

        let item = match step {
            Step::Done(item) => item,
            Step::Enumerate(inner) => match self.advance(&inner)? {
                Some(value) => {
                    let mut state = iterator.borrow_mut();
                    let count = match &mut *state {
                        IteratorObject::Enumerate { count, .. } => {
                            let current = *count;
                            *count += 1;
                            current
                        }
                        _ => 0,
                    };
                    Some(Value::tuple(vec![Value::Int(count), value]))
                }
                None => None,
            },
            Step::Zip(inners) => {
                if inners.is_empty() {
                    None
                } else {
                    let mut row = Vec::with_capacity(inners.len());
                    for inner in &inners {
                        match self.advance(inner)? {
                            Some(value) => row.push(value),
                            None => break,
                        }
                    }
                    (row.len() == inners.len()).then(|| Value::tuple(row))
                }
            }
            Step::Map(func, inners) => {
                let mut args = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match self.advance(inner)? {
                        Some(value) => args.push(value),
                        None => break,
                    }
                }
                if args.len() == inners.len() && !inners.is_empty() {
                    Some(self.call(&func, CallArgs::new(args))?)
                } else {
                    None
                }
            }
            Step::Filter(func, inner) => {
                let mut found = None;
                while let Some(value) = self.advance(&inner)? {
                    self.checkpoint()?;
                    let keep = match &func {
                        Value::None => self.truthy(&value)?,
                        func => {
                            let verdict = self.call(func, CallArgs::new(vec![value.clone()]))?;
                            self.truthy(&verdict)?
                        }
                    };
                    if keep {
                        found = Some(value);
                        break;
                    }
                }
                found
            }
            Step::Generator => {
                // Taken out while it runs; a generator that raises stays finished.
                let mut running = std::mem::replace(&mut *iterator.borrow_mut(), IteratorObject::Exhausted);
                let IteratorObject::Generator(state) = &mut running else {
                    return Ok(None);
                };
                let item = self.resume_generator(state)?;
                if item.is_some() {
                    *iterator.borrow_mut() = running;
                }
                item
            }
        };

        if item.is_none() {
            let finished = std::mem::replace(&mut *iterator.borrow_mut(), IteratorObject::Exhausted);
            drop(finished);
        }
        Ok(item)
    }

    /// Advance an iterator held inside another one.
    fn advance(&mut self, inner: &Value) -> Exec<Option<Value>> {
        let Value::Iterator(inner) = inner else {
            return fail(ExceptionKind::RuntimeError, "iterator expected");
        };
        self.nested(|interp| interp.next_item(inner))
    }

    /// Drain any iterable into a vector.
    pub(crate) fn collect(&mut self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::List(items) => return Ok(items.borrow().to_vec()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            _ => {}
        }
        let iterator = self.iter_of(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_item(&iterator)? {
            if items.len() >= MAX_COLLECTION_LEN {
                return fail(ExceptionKind::MemoryError, "sequence is too large");
            }
            self.checkpoint()?;
            items.push(item);
        }
        Ok(items)
    }

    /// Wrap `iter(value)` as a program-visible iterator.
    pub(crate) fn iterator_value(&mut self, value: &Value) -> Exec<Value> {
        Ok(Value::Iterator(self.iter_of(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_generator_expressions_are_lazy() {
        let source = "\
xs = [1, 2]
squares = (x * x for x in xs)
xs.append(3)
print(next(squares), list(squares), list(squares))
print(list((x, y) for x in range(4) if x % 2 for y in range(x) if y != 1))
seen = []
g = (seen.append(n) or n for n in range(5))
print(next(g), next(g), seen)
";
        assert_eq!(output(source), "1 [4, 9] []\n[(1, 0), (3, 0), (3, 2)]\n0 1 [0, 1]\n");
        assert_eq!(fault("g = (1 // x for x in [1, 0])\nprint(next(g))\nnext(g)"), "ZeroDivisionError: integer division or modulo by zero");
        assert_eq!(fault("g = (x for x in 5)"), "TypeError: 'int' object is not iterable");
    }

    #[test]
    fn test_builtin_iterators() {
        let source = "\
names = ['a', 'b', 'c']
print(list(enumerate(names, 1)))
print(list(zip(names, range(10))))
print(list(map(lambda x, y: x * y, [1, 2, 3], [4, 5])))
print(list(filter(None, [0, 1, '', 'x'])), list(filter(lambda n: n % 2, range(6))))
print(list(reversed([1, 2, 3])), list(reversed('ab')))
";
        assert_eq!(
            output(source),
            "[(1, 'a'), (2, 'b'), (3, 'c')]\n[('a', 0), ('b', 1), ('c', 2)]\n[4, 10]\n[1, 'x'] [1, 3, 5]\n[3, 2, 1] ['b', 'a']\n"
        );
    }

    #[test]
    fn test_iterators_are_single_pass() {
        let source = "\
it = iter([1, 2, 3])
print(next(it), list(it), list(it), next(it, 'done'))
m = map(str, [1, 2])
print(list(m), list(m))
";
        assert_eq!(output(source), "1 [2, 3] [] done\n['1', '2'] []\n");
        assert_eq!(fault("next(iter([]))"), "StopIteration: ");
    }

    #[test]
    fn test_list_iteration_sees_appends() {
        let source = "\
xs = [1]
for x in xs:
    if x < 4:
        xs.append(x + 1)
print(xs)
";
        assert_eq!(output(source), "[1, 2, 3, 4]\n");
    }

    #[test]
    fn test_not_iterable() {
        assert_eq!(fault("for x in 5:\n    pass"), "TypeError: 'int' object is not iterable");
        assert_eq!(fault("a, b = 1"), "TypeError: cannot unpack non-iterable int object");
    }

    #[test]
    fn test_custom_iterable() {
        let source = "\
class Bag:
    def __init__(self):
        self.items = [3, 1, 2]
    def __iter__(self):
        return iter(self.items)
print(sorted(Bag()), 2 in Bag(), list(Bag()))
";
        assert_eq!(output(source), "[1, 2, 3] True [3, 1, 2]\n");
    }
}
