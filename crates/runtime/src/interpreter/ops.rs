//! Operators, comparisons, truth values and subscripts.

use std::cmp::Ordering;
use std::rc::Rc;

use super::call::CallArgs;
use super::exceptions::{fail, overflow, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::value::{Dict, ExceptionObject, Items, Range, Set, Value, MAX_COLLECTION_LEN, MAX_STR_BYTES};
use super::Interpreter;
use crate::ast::{BinOp, CmpOp, UnaryOp};

/// Evaluated bounds of `a[start:stop:step]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Clamp the bounds against a sequence of `len` items.
    pub fn indices(&self, len: usize) -> Exec<(i64, i64, i64)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return value_error("slice step cannot be zero");
        }
        let len = len as i64;
        let clamp = |bound: i64| -> i64 {
            if bound < 0 {
                let shifted = bound + len;
                if shifted < 0 {
                    if step < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    shifted
                }
            } else if bound >= len {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            } else {
                bound
            }
        };
        let start = match self.start {
            Some(start) => clamp(start),
            None if step < 0 => len - 1,
            None => 0,
        };
        let stop = match self.stop {
            Some(stop) => clamp(stop),
            None if step < 0 => -1,
            None => len,
        };
        Ok((start, stop, step))
    }

    /// Positions selected from a sequence of `len` items, in slice order.
    pub fn positions(&self, len: usize) -> Exec<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut positions = Vec::new();
        let mut index = start;
        while (step > 0 && index < stop) || (step < 0 && index > stop) {
            positions.push(index as usize);
            index += step;
        }
        Ok(positions)
    }

    fn is_contiguous(&self) -> bool {
        matches!(self.step, None | Some(1))
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(b) => Some(Number::Int(*b as i64)),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

fn dunder_names(op: BinOp) -> (&'static str, &'static str) {
    match op {
        BinOp::Add => ("__add__", "__radd__"),
        BinOp::Sub => ("__sub__", "__rsub__"),
        BinOp::Mul => ("__mul__", "__rmul__"),
        BinOp::Div => ("__truediv__", "__rtruediv__"),
        BinOp::FloorDiv => ("__floordiv__", "__rfloordiv__"),
        BinOp::Mod => ("__mod__", "__rmod__"),
        BinOp::Pow => ("__pow__", "__rpow__"),
        BinOp::LShift => ("__lshift__", "__rlshift__"),
        BinOp::RShift => ("__rshift__", "__rrshift__"),
        BinOp::BitAnd => ("__and__", "__rand__"),
        BinOp::BitOr => ("__or__", "__ror__"),
        BinOp::BitXor => ("__xor__", "__rxor__"),
    }
}

/// Method defined by the class of an instance.
fn special_method(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Instance(instance) => instance.class.lookup(name),
        _ => None,
    }
}

fn zero_division<T>(message: &str) -> Exec<T> {
    fail(ExceptionKind::ZeroDivisionError, message)
}

fn floor_div(a: i64, b: i64) -> Exec<i64> {
    if b == 0 {
        return zero_division("integer division or modulo by zero");
    }
    let quotient = a.checked_div(b).ok_or_else(|| Interrupt::error(ExceptionKind::OverflowError, "integer overflow"))?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn int_mod(a: i64, b: i64) -> Exec<i64> {
    if b == 0 {
        return zero_division("integer division or modulo by zero");
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

fn float_mod(a: f64, b: f64) -> Exec<f64> {
    if b == 0.0 {
        return zero_division("float modulo");
    }
    let remainder = a % b;
    if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

fn int_pow(base: i64, exp: i64) -> Exec<Value> {
    if exp < 0 {
        if base == 0 {
            return zero_division("0.0 cannot be raised to a negative power");
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    match u32::try_from(exp) {
        Ok(exp) => base.checked_pow(exp).map(Value::Int).ok_or_else(|| {
            Interrupt::error(ExceptionKind::OverflowError, "integer overflow")
        }),
        Err(_) => match base {
            0 | 1 => Ok(Value::Int(base)),
            -1 => Ok(Value::Int(if exp % 2 == 0 { 1 } else { -1 })),
            _ => overflow(),
        },
    }
}

fn float_pow(base: f64, exp: f64) -> Exec<Value> {
    if base == 0.0 && exp < 0.0 {
        return zero_division("0.0 cannot be raised to a negative power");
    }
    if base < 0.0 && exp.fract() != 0.0 && exp.is_finite() {
        return value_error("negative number cannot be raised to a fractional power");
    }
    let result = base.powf(exp);
    if result.is_infinite() && base.is_finite() && exp.is_finite() {
        return fail(ExceptionKind::OverflowError, "(34, 'Numerical result out of range')");
    }
    Ok(Value::Float(result))
}

fn shift_count(count: i64) -> Exec<u32> {
    if count < 0 {
        return value_error("negative shift count");
    }
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

fn numeric_binary(op: BinOp, left: Number, right: Number) -> Exec<Option<Value>> {
    use Number::{Float, Int};
    let value = match (left, right) {
        (Int(a), Int(b)) => match op {
            BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow_error)?),
            BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow_error)?),
            BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow_error)?),
            BinOp::Div => {
                if b == 0 {
                    return zero_division("division by zero");
                }
                Value::Float(a as f64 / b as f64)
            }
            BinOp::FloorDiv => Value::Int(floor_div(a, b)?),
            BinOp::Mod => Value::Int(int_mod(a, b)?),
            BinOp::Pow => int_pow(a, b)?,
            BinOp::LShift => {
                let count = shift_count(b)?;
                if a == 0 {
                    Value::Int(0)
                } else if count >= 63 {
                    return overflow();
                } else {
                    let shifted = a << count;
                    if shifted >> count != a {
                        return overflow();
                    }
                    Value::Int(shifted)
                }
            }
            BinOp::RShift => {
                let count = shift_count(b)?;
                Value::Int(if count >= 63 { if a < 0 { -1 } else { 0 } } else { a >> count })
            }
            BinOp::BitAnd => Value::Int(a & b),
            BinOp::BitOr => Value::Int(a | b),
            BinOp::BitXor => Value::Int(a ^ b),
        },
        (left, right) => {
            let as_float = |n: Number| match n {
                Int(i) => i as f64,
                Float(f) => f,
            };
            let (a, b) = (as_float(left), as_float(right));
            match op {
                BinOp::Add => Value::Float(a + b),
                BinOp::Sub => Value::Float(a - b),
                BinOp::Mul => Value::Float(a * b),
                BinOp::Div => {
                    if b == 0.0 {
                        return zero_division("float division by zero");
                    }
                    Value::Float(a / b)
                }
                BinOp::FloorDiv => {
                    if b == 0.0 {
                        return zero_division("float floor division by zero");
                    }
                    Value::Float(((a - float_mod(a, b)?) / b).round())
                }
                BinOp::Mod => Value::Float(float_mod(a, b)?),
                BinOp::Pow => float_pow(a, b)?,
                _ => return Ok(None),
            }
        }
    };
    Ok(Some(value))
}

fn overflow_error() -> Interrupt {
    Interrupt::error(ExceptionKind::OverflowError, "integer overflow")
}

fn repeat_count(count: i64) -> usize {
    usize::try_from(count).unwrap_or(0)
}

pub(crate) fn check_str_len(len: usize) -> Exec<()> {
    if len > MAX_STR_BYTES {
        return fail(ExceptionKind::MemoryError, "string is too large");
    }
    Ok(())
}

pub(crate) fn check_collection_len(len: usize) -> Exec<()> {
    if len > MAX_COLLECTION_LEN {
        return fail(ExceptionKind::MemoryError, "sequence is too large");
    }
    Ok(())
}

fn repeat_items(items: &[Value], count: i64) -> Exec<Vec<Value>> {
    let count = repeat_count(count);
    check_collection_len(items.len().saturating_mul(count))?;
    let mut repeated = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        repeated.extend(items.iter().cloned());
    }
    Ok(repeated)
}

pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let index = if index < 0 {
        index.checked_add(i64::try_from(len).ok()?)?
    } else {
        index
    };
    if index >= 0 && (index as usize) < len {
        Some(index as usize)
    } else {
        None
    }
}

pub(crate) fn int_index(index: &Value) -> Option<i64> {
    match index {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

pub(crate) fn key_error(key: Value) -> Interrupt {
    Interrupt::raised(Value::Exception(Rc::new(ExceptionObject::new(
        ExceptionKind::KeyError,
        Items::from(vec![key]),
    ))))
}

/// Character at a code point position.
fn char_at(text: &str, index: usize) -> Option<char> {
    if text.is_ascii() {
        text.as_bytes().get(index).map(|b| *b as char)
    } else {
        text.chars().nth(index)
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    if text.is_ascii() {
        text.len()
    } else {
        text.chars().count()
    }
}

impl Interpreter {
    pub(crate) fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Exec<Value> {
        if let (Some(a), Some(b)) = (number(left), number(right)) {
            if let (BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Bool(a), Value::Bool(b)) = (op, left, right) {
                return Ok(Value::Bool(match op {
                    BinOp::BitAnd => a & b,
                    BinOp::BitOr => a | b,
                    _ => a ^ b,
                }));
            }
            if let Some(value) = numeric_binary(op, a, b)? {
                return Ok(value);
            }
        }

        let (forward, reflected) = dunder_names(op);
        if let Some(method) = special_method(left, forward) {
            return self.call(&method, CallArgs::new(vec![left.clone(), right.clone()]));
        }
        if let Some(method) = special_method(right, reflected) {
            return self.call(&method, CallArgs::new(vec![right.clone(), left.clone()]));
        }

        match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                check_str_len(a.len().saturating_add(b.len()))?;
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Ok(Value::str(joined))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                check_collection_len(a.len().saturating_add(b.len()))?;
                let mut items = a.to_vec();
                items.extend(b.iter().cloned());
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                check_collection_len(a.len().saturating_add(b.len()))?;
                let mut items = a.to_vec();
                items.extend(b.iter().cloned());
                Ok(Value::tuple(items))
            }
            (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => type_error(format!(
                "can only concatenate {} (not \"{}\") to {}",
                left.type_name(),
                other.type_name(),
                left.type_name()
            )),
            (BinOp::Mul, sequence, count) | (BinOp::Mul, count, sequence)
                if matches!(sequence, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
            {
                let Some(count) = int_index(count) else {
                    return type_error(format!(
                        "can't multiply sequence by non-int of type '{}'",
                        count.type_name()
                    ));
                };
                match sequence {
                    Value::Str(text) => {
                        let count = repeat_count(count);
                        check_str_len(text.len().saturating_mul(count))?;
                        Ok(Value::str(text.repeat(count)))
                    }
                    Value::List(items) => {
                        let items = items.borrow().to_vec();
                        Ok(Value::list(repeat_items(&items, count)?))
                    }
                    Value::Tuple(items) => Ok(Value::tuple(repeat_items(items, count)?)),
                    other => type_error(format!("'{}' object cannot be repeated", other.type_name())),
                }
            }
            (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(self.percent_format(template, args)?)),
            (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
                let result = set_operation(op, &a.borrow(), &b.borrow())?;
                Ok(Value::set(result))
            }
            (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
                let mut merged = a.borrow().copy();
                let entries: Vec<(Value, Value)> = b.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect();
                for (key, value) in entries {
                    merged.insert(key.hash_key()?, key, value)?;
                }
                Ok(Value::dict(merged))
            }
            _ => {
                let symbol = match op {
                    BinOp::Pow => "** or pow()",
                    other => other.symbol(),
                };
                type_error(format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    symbol,
                    left.type_name(),
                    right.type_name()
                ))
            }
        }
    }

    pub(crate) fn unary(&mut self, op: UnaryOp, operand: &Value) -> Exec<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(operand)?));
        }
        let (symbol, method) = match op {
            UnaryOp::Neg => ("-", "__neg__"),
            UnaryOp::Pos => ("+", "__pos__"),
            _ => ("~", "__invert__"),
        };
        match (op, operand) {
            (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow_error),
            (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-(*b as i64))),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Pos, Value::Int(i)) => Ok(Value::Int(*i)),
            (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
            (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
            (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
            (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!(*b as i64))),
            _ => match special_method(operand, method) {
                Some(method) => self.call(&method, CallArgs::new(vec![operand.clone()])),
                None => type_error(format!("bad operand type for unary {}: '{}'", symbol, operand.type_name())),
            },
        }
    }

    pub(crate) fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        match op {
            CmpOp::Eq => self.eq(left, right),
            CmpOp::NotEq => Ok(!self.eq(left, right)?),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Is => Ok(is_same(left, right)),
            CmpOp::IsNot => Ok(!is_same(left, right)),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => self.order(op, left, right),
        }
    }

    /// `left == right`
    pub(crate) fn eq(&mut self, left: &Value, right: &Value) -> Exec<bool> {
        if let (Some(a), Some(b)) = (number(left), number(right)) {
            return Ok(match (a, b) {
                (Number::Int(a), Number::Int(b)) => a == b,
                (Number::Int(a), Number::Float(b)) => a as f64 == b,
                (Number::Float(a), Number::Int(b)) => a == b as f64,
                (Number::Float(a), Number::Float(b)) => a == b,
            });
        }
        if let Some(method) = special_method(left, "__eq__") {
            let result = self.call(&method, CallArgs::new(vec![left.clone(), right.clone()]))?;
            return self.truthy(&result);
        }
        match (left, right) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => Ok(true),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow().to_vec(), b.borrow().to_vec());
                self.sequence_eq(&a, &b)
            }
            (Value::Tuple(a), Value::Tuple(b)) => self.sequence_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let entries: Vec<(Value, Value)> = a.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect();
                if entries.len() != b.borrow().len() {
                    return Ok(false);
                }
                for (key, value) in entries {
                    let other = b.borrow().get(&key.hash_key()?).cloned();
                    match other {
                        Some(other) => {
                            if !self.nested(|interp| interp.eq(&value, &other))? {
                                return Ok(false);
                            }
                        }
                        None => return Ok(false),
                    }
                }
                Ok(true)
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                Ok(a.len() == b.len() && a.keys().all(|key| b.contains(key)))
            }
            (Value::Range(a), Value::Range(b)) => {
                let (len_a, len_b) = (a.len(), b.len());
                Ok(len_a == len_b && (len_a == 0 || (a.start == b.start && (len_a == 1 || a.step == b.step))))
            }
            (Value::Type(a), Value::Type(b)) => Ok(a == b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => Ok(a == b),
            _ => Ok(is_same(left, right)),
        }
    }

    fn sequence_eq(&mut self, a: &[Value], b: &[Value]) -> Exec<bool> {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b) {
            if is_same(x, y) {
                continue;
            }
            if !self.nested(|interp| interp.eq(x, y))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `left < right`, as used by `sorted`, `min` and `max`.
    pub(crate) fn lt(&mut self, left: &Value, right: &Value) -> Exec<bool> {
        self.order(CmpOp::Lt, left, right)
    }

    fn order(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        if let (Some(a), Some(b)) = (number(left), number(right)) {
            let ordering = match (a, b) {
                (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
                (Number::Int(a), Number::Float(b)) => (a as f64).partial_cmp(&b),
                (Number::Float(a), Number::Int(b)) => a.partial_cmp(&(b as f64)),
                (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
            };
            return Ok(ordering.is_some_and(|ordering| matches_order(op, ordering)));
        }

        let (forward, reflected) = match op {
            CmpOp::Lt => ("__lt__", "__gt__"),
            CmpOp::LtE => ("__le__", "__ge__"),
            CmpOp::Gt => ("__gt__", "__lt__"),
            _ => ("__ge__", "__le__"),
        };
        if let Some(method) = special_method(left, forward) {
            let result = self.call(&method, CallArgs::new(vec![left.clone(), right.clone()]))?;
            return self.truthy(&result);
        }
        if let Some(method) = special_method(right, reflected) {
            let result = self.call(&method, CallArgs::new(vec![right.clone(), left.clone()]))?;
            return self.truthy(&result);
        }

        match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(matches_order(op, a.cmp(b))),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().to_vec(), b.borrow().to_vec());
                self.sequence_order(op, &a, &b)
            }
            (Value::Tuple(a), Value::Tuple(b)) => self.sequence_order(op, a, b),
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let subset = |x: &Set, y: &Set| x.keys().all(|key| y.contains(key));
                Ok(match op {
                    CmpOp::Lt => a.len() < b.len() && subset(&a, &b),
                    CmpOp::LtE => subset(&a, &b),
                    CmpOp::Gt => a.len() > b.len() && subset(&b, &a),
                    _ => subset(&b, &a),
                })
            }
            _ => type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            )),
        }
    }

    fn sequence_order(&mut self, op: CmpOp, a: &[Value], b: &[Value]) -> Exec<bool> {
        for (x, y) in a.iter().zip(b) {
            if is_same(x, y) {
                continue;
            }
            if !self.nested(|interp| interp.eq(x, y))? {
                return self.nested(|interp| interp.order(op, x, y));
            }
        }
        Ok(matches_order(op, a.len().cmp(&b.len())))
    }

    /// `item in container`
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        match container {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(&**needle)),
                other => type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::List(items) => {
                let items = items.borrow().to_vec();
                self.any_equal(&items, item)
            }
            Value::Tuple(items) => self.any_equal(items, item),
            Value::Dict(dict) => Ok(dict.borrow().contains(&item.hash_key()?)),
            Value::Set(set) => Ok(set.borrow().contains(&item.hash_key()?)),
            Value::Range(range) => Ok(match item {
                Value::Int(i) => range.contains(*i),
                Value::Bool(b) => range.contains(*b as i64),
                Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => range.contains(*f as i64),
                _ => false,
            }),
            Value::Instance(_) => {
                if let Some(method) = special_method(container, "__contains__") {
                    let result = self.call(&method, CallArgs::new(vec![container.clone(), item.clone()]))?;
                    return self.truthy(&result);
                }
                self.contains_by_iteration(container, item)
            }
            Value::Iterator(_) => self.contains_by_iteration(container, item),
            other => type_error(format!("argument of type '{}' is not iterable", other.type_name())),
        }
    }

    fn contains_by_iteration(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        if !self.is_iterable(container) {
            return type_error(format!("argument of type '{}' is not iterable", container.type_name()));
        }
        let iterator = self.iter_of(container)?;
        while let Some(next) = self.next_item(&iterator)? {
            self.checkpoint()?;
            if is_same(&next, item) || self.eq(&next, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> Exec<bool> {
        for candidate in items {
            if is_same(candidate, item) || self.eq(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn truthy(&mut self, value: &Value) -> Exec<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            Value::Instance(_) => {
                if let Some(method) = special_method(value, "__bool__") {
                    let result = self.call(&method, CallArgs::new(vec![value.clone()]))?;
                    return match result {
                        Value::Bool(b) => Ok(b),
                        other => type_error(format!("__bool__ should return bool, returned {}", other.type_name())),
                    };
                }
                if special_method(value, "__len__").is_some() {
                    return Ok(self.length(value)? > 0);
                }
                true
            }
            _ => true,
        })
    }

    /// `len(value)`
    pub(crate) fn length(&mut self, value: &Value) -> Exec<usize> {
        match value {
            Value::Str(s) => Ok(char_len(s)),
            Value::List(items) => Ok(items.borrow().len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::Dict(dict) => Ok(dict.borrow().len()),
            Value::Set(set) => Ok(set.borrow().len()),
            Value::Range(range) => range.checked_len(),
            Value::Instance(_) => match special_method(value, "__len__") {
                Some(method) => match self.call(&method, CallArgs::new(vec![value.clone()]))? {
                    Value::Int(n) if n >= 0 => Ok(n as usize),
                    Value::Int(_) => value_error("__len__() should return >= 0"),
                    other => type_error(format!("'{}' object cannot be interpreted as an integer", other.type_name())),
                },
                None => type_error(format!("object of type '{}' has no len()", value.type_name())),
            },
            other => type_error(format!("object of type '{}' has no len()", other.type_name())),
        }
    }

    // Subscripts

    pub(crate) fn get_item(&mut self, container: &Value, index: &Value) -> Exec<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let position = sequence_index(index, items.len(), "list")?;
                Ok(items[position].clone())
            }
            Value::Tuple(items) => {
                let position = sequence_index(index, items.len(), "tuple")?;
                Ok(items[position].clone())
            }
            Value::Str(text) => {
                let Some(index) = int_index(index) else {
                    return type_error(format!("string indices must be integers, not '{}'", index.type_name()));
                };
                normalize_index(index, char_len(text))
                    .and_then(|position| char_at(text, position))
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| Interrupt::error(ExceptionKind::IndexError, "string index out of range"))
            }
            Value::Dict(dict) => {
                let found = dict.borrow().get(&index.hash_key()?).cloned();
                found.ok_or_else(|| key_error(index.clone()))
            }
            Value::Range(range) => {
                let Some(index) = int_index(index) else {
                    return type_error(format!(
                        "range indices must be integers or slices, not {}",
                        index.type_name()
                    ));
                };
                range
                    .at(index)
                    .map(Value::Int)
                    .ok_or_else(|| Interrupt::error(ExceptionKind::IndexError, "range object index out of range"))
            }
            Value::Instance(_) => match special_method(container, "__getitem__") {
                Some(method) => self.call(&method, CallArgs::new(vec![container.clone(), index.clone()])),
                None => type_error(format!("'{}' object is not subscriptable", container.type_name())),
            },
            other => type_error(format!("'{}' object is not subscriptable", other.type_name())),
        }
    }

    pub(crate) fn set_item(&mut self, container: &Value, index: Value, value: Value) -> Exec<()> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let Some(position) = int_index(&index) else {
                    return type_error(format!(
                        "list indices must be integers or slices, not {}",
                        index.type_name()
                    ));
                };
                let Some(position) = normalize_index(position, items.len()) else {
                    return fail(ExceptionKind::IndexError, "list assignment index out of range");
                };
                let previous = std::mem::replace(&mut items[position], value);
                drop(items);
                drop(previous);
                Ok(())
            }
            Value::Dict(dict) => {
                let hash = index.hash_key()?;
                dict.borrow_mut().insert(hash, index, value)
            }
            Value::Instance(_) => match special_method(container, "__setitem__") {
                Some(method) => {
                    self.call(&method, CallArgs::new(vec![container.clone(), index, value]))?;
                    Ok(())
                }
                None => type_error(format!(
                    "'{}' object does not support item assignment",
                    container.type_name()
                )),
            },
            other => type_error(format!("'{}' object does not support item assignment", other.type_name())),
        }
    }

    pub(crate) fn delete_item(&mut self, container: &Value, index: &Value) -> Exec<()> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let Some(position) = int_index(index) else {
                    return type_error(format!(
                        "list indices must be integers or slices, not {}",
                        index.type_name()
                    ));
                };
                let Some(position) = normalize_index(position, items.len()) else {
                    return fail(ExceptionKind::IndexError, "list assignment index out of range");
                };
                let removed = items.remove(position);
                drop(items);
                drop(removed);
                Ok(())
            }
            Value::Dict(dict) => {
                let removed = dict.borrow_mut().remove(&index.hash_key()?);
                match removed {
                    Some(_) => Ok(()),
                    None => Err(key_error(index.clone())),
                }
            }
            Value::Instance(_) => match special_method(container, "__delitem__") {
                Some(method) => {
                    self.call(&method, CallArgs::new(vec![container.clone(), index.clone()]))?;
                    Ok(())
                }
                None => type_error(format!("'{}' object doesn't support item deletion", container.type_name())),
            },
            other => type_error(format!("'{}' object doesn't support item deletion", other.type_name())),
        }
    }

    pub(crate) fn get_slice(&mut self, container: &Value, spec: SliceSpec) -> Exec<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let selected = spec.positions(items.len())?.into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::list(selected))
            }
            Value::Tuple(items) => {
                let selected = spec.positions(items.len())?.into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::tuple(selected))
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let selected: String = spec.positions(chars.len())?.into_iter().map(|i| chars[i]).collect();
                Ok(Value::str(selected))
            }
            Value::Range(range) => {
                let (start, stop, step) = spec.indices(range.checked_len()?)?;
                let at = |i: i64| range.start.checked_add(i.checked_mul(range.step)?);
                match (at(start), at(stop), range.step.checked_mul(step)) {
                    (Some(start), Some(stop), Some(step)) => Ok(Value::Range(Range { start, stop, step })),
                    _ => overflow(),
                }
            }
            Value::Instance(_) => type_error(format!(
                "'{}' object does not support slicing",
                container.type_name()
            )),
            other => type_error(format!("'{}' object is not subscriptable", other.type_name())),
        }
    }

    pub(crate) fn set_slice(&mut self, container: &Value, spec: SliceSpec, value: Value) -> Exec<()> {
        let Value::List(items) = container else {
            return type_error(format!(
                "'{}' object does not support item assignment",
                container.type_name()
            ));
        };
        if !self.is_iterable(&value) {
            return type_error("can only assign an iterable");
        }
        let replacement = self.collect(&value)?;
        let mut items = items.borrow_mut();
        if spec.is_contiguous() {
            let (start, stop, _) = spec.indices(items.len())?;
            let start = start as usize;
            let stop = (stop.max(start as i64)) as usize;
            check_collection_len(items.len() - (stop - start) + replacement.len())?;
            let removed: Vec<Value> = items.splice(start..stop, replacement).collect();
            drop(items);
            drop(removed);
            return Ok(());
        }
        let positions = spec.positions(items.len())?;
        if positions.len() != replacement.len() {
            return value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                positions.len()
            ));
        }
        let mut removed = Vec::with_capacity(positions.len());
        for (position, value) in positions.into_iter().zip(replacement) {
            removed.push(std::mem::replace(&mut items[position], value));
        }
        drop(items);
        drop(removed);
        Ok(())
    }

    pub(crate) fn delete_slice(&mut self, container: &Value, spec: SliceSpec) -> Exec<()> {
        let Value::List(items) = container else {
            return type_error(format!("'{}' object doesn't support item deletion", container.type_name()));
        };
        let mut items = items.borrow_mut();
        let mut positions = spec.positions(items.len())?;
        positions.sort_unstable();
        let mut removed = Vec::with_capacity(positions.len());
        for position in positions.into_iter().rev() {
            removed.push(items.remove(position));
        }
        drop(items);
        drop(removed);
        Ok(())
    }
}

fn sequence_index(index: &Value, len: usize, kind: &str) -> Exec<usize> {
    let Some(index) = int_index(index) else {
        return type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        ));
    };
    normalize_index(index, len)
        .ok_or_else(|| Interrupt::error(ExceptionKind::IndexError, format!("{} index out of range", kind)))
}

fn matches_order(op: CmpOp, ordering: Ordering) -> bool {
    match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::GtE => ordering != Ordering::Less,
        _ => false,
    }
}

/// `a is b`. Scalars compare by value since they carry no identity.
pub(crate) fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => match (a.identity(), b.identity()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn set_operation(op: BinOp, a: &Set, b: &Set) -> Exec<Set> {
    let mut result = Set::new();
    match op {
        BinOp::BitOr => {
            for (key, value) in a.entries().chain(b.entries()) {
                result.insert(key.clone(), value.clone())?;
            }
        }
        BinOp::BitAnd => {
            for (key, value) in a.entries().filter(|(key, _)| b.contains(key)) {
                result.insert(key.clone(), value.clone())?;
            }
        }
        BinOp::Sub => {
            for (key, value) in a.entries().filter(|(key, _)| !b.contains(key)) {
                result.insert(key.clone(), value.clone())?;
            }
        }
        _ => {
            for (key, value) in a.entries().filter(|(key, _)| !b.contains(key)) {
                result.insert(key.clone(), value.clone())?;
            }
            for (key, value) in b.entries().filter(|(key, _)| !a.contains(key)) {
                result.insert(key.clone(), value.clone())?;
            }
        }
    }
    Ok(result)
}

/// Set union, intersection, difference and symmetric difference by name.
pub(crate) fn set_combine(name: &str, a: &Set, b: &Set) -> Exec<Set> {
    let op = match name {
        "union" => BinOp::BitOr,
        "intersection" => BinOp::BitAnd,
        "difference" => BinOp::Sub,
        _ => BinOp::BitXor,
    };
    set_operation(op, a, b)
}

/// Copy of a dict, for `dict(other)` and `.copy()`.
pub(crate) fn copy_dict(dict: &Dict) -> Value {
    Value::dict(dict.copy())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};
    use super::SliceSpec;

    #[test]
    fn test_slice_indices() {
        let spec = SliceSpec {
            start: None,
            stop: None,
            step: Some(-1),
        };
        assert_eq!(spec.positions(4).unwrap(), vec![3, 2, 1, 0]);
        let spec = SliceSpec {
            start: Some(-2),
            stop: Some(100),
            step: None,
        };
        assert_eq!(spec.positions(5).unwrap(), vec![3, 4]);
        let zero = SliceSpec {
            step: Some(0),
            ..SliceSpec::default()
        };
        assert!(zero.positions(3).is_err());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(output("print(7 // 2, -7 // 2, 7 % 3, -7 % 3, 7 / 2, 2 ** 10, 2 ** -1)"), "3 -4 1 2 3.5 1024 0.5\n");
        assert_eq!(output("print(7.5 // 2, -7.5 % 2, 1 + 2.0, True + True, 3 * 'ab')"), "3.0 0.5 3.0 2 ababab\n");
        assert_eq!(output("print(5 & 3, 5 | 3, 5 ^ 3, ~5, 1 << 4, -16 >> 2)"), "1 7 6 -6 16 -4\n");
    }

    #[test]
    fn test_division_by_zero_messages() {
        assert_eq!(fault("1 / 0"), "ZeroDivisionError: division by zero");
        assert_eq!(fault("1 // 0"), "ZeroDivisionError: integer division or modulo by zero");
        assert_eq!(fault("1 % 0"), "ZeroDivisionError: integer division or modulo by zero");
        assert_eq!(fault("1.0 / 0"), "ZeroDivisionError: float division by zero");
    }

    #[test]
    fn test_integer_overflow() {
        assert_eq!(fault("x = 2 ** 63"), "OverflowError: integer overflow");
        assert_eq!(fault("x = 9223372036854775807 + 1"), "OverflowError: integer overflow");
        assert_eq!(output("print(2 ** 62)"), "4611686018427387904\n");
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(fault("'a' + 1"), "TypeError: can only concatenate str (not \"int\") to str");
        assert_eq!(fault("1 + 'a'"), "TypeError: unsupported operand type(s) for +: 'int' and 'str'");
        assert_eq!(fault("[1] * 1.5"), "TypeError: can't multiply sequence by non-int of type 'float'");
        assert_eq!(fault("1 < 'a'"), "TypeError: '<' not supported between instances of 'int' and 'str'");
        assert_eq!(fault("-'a'"), "TypeError: bad operand type for unary -: 'str'");
    }

    #[test]
    fn test_comparisons() {
        let source = "\
print([1, 2] < [1, 3], (1, 2) == (1, 2), 'abc' < 'abd', {1, 2} <= {1, 2, 3})
print(1 == 1.0, None is None, [] is [], 'x' in 'xyz', 3 in range(5), 2 not in [1])
print({'a': 1} == {'a': 1}, float('nan') == float('nan'))
";
        assert_eq!(output(source), "True True True True\nTrue True False True True True\nTrue False\n");
    }

    #[test]
    fn test_indexing_and_slicing() {
        let source = "\
s = 'héllo'
xs = [0, 1, 2, 3, 4, 5]
print(s[1], s[-1], s[::-1], xs[1:4], xs[::2], xs[-2:], (1, 2, 3)[1:])
print(range(10)[2:8:3], range(10)[-1])
xs[1:3] = ['a', 'b', 'c']
del xs[0]
xs[::2] = [9, 9, 9]
print(xs)
d = {'k': 1}
d['j'] = 2
del d['k']
print(d)
";
        assert_eq!(
            output(source),
            "é o olléh [1, 2, 3] [0, 2, 4] [4, 5] (2, 3)\nrange(2, 8, 3) 9\n[9, 'b', 9, 3, 9, 5]\n{'j': 2}\n"
        );
    }

    #[test]
    fn test_full_width_range() {
        let wide = "range(-9223372036854775807 - 1, 9223372036854775807";
        assert_eq!(
            fault(&format!("len({}))", wide)),
            "OverflowError: Python int too large to convert to C ssize_t"
        );
        assert_eq!(
            fault(&format!("len({}, 2))", wide)),
            "OverflowError: Python int too large to convert to C ssize_t"
        );
        assert_eq!(
            output(&format!("r = {}, 2)\nprint(r[-1], r[0], r[1])", wide)),
            "9223372036854775806 -9223372036854775808 -9223372036854775806\n"
        );
        assert_eq!(output(&format!("print({})[-9223372036854775807 - 1])", wide)), "-1\n");
        assert_eq!(fault("[1, 2][-9223372036854775807 - 1]"), "IndexError: list index out of range");
    }

    #[test]
    fn test_lookup_errors() {
        assert_eq!(fault("[1][5]"), "IndexError: list index out of range");
        assert_eq!(fault("'ab'[2]"), "IndexError: string index out of range");
        assert_eq!(fault("{}['missing']"), "KeyError: 'missing'");
        assert_eq!(fault("(1, 2)[0] = 3"), "TypeError: 'tuple' object does not support item assignment");
        assert_eq!(fault("x = 5\nx[0]"), "TypeError: 'int' object is not subscriptable");
        assert_eq!(fault("[1]['a']"), "TypeError: list indices must be integers or slices, not str");
    }

    #[test]
    fn test_set_and_dict_operators() {
        let source = "a = {1, 2, 3}\nb = {2, 3, 4}\nprint(a | b, a & b, a - b, a ^ b, {'x': 1} | {'y': 2})";
        assert_eq!(output(source), "{1, 2, 3, 4} {2, 3} {1} {1, 4} {'x': 1, 'y': 2}\n");
    }

    #[test]
    fn test_operator_overloading() {
        let source = "\
class V:
    def __init__(self, x):
        self.x = x
    def __add__(self, other):
        return V(self.x + other.x)
    def __eq__(self, other):
        return self.x == other.x
    def __lt__(self, other):
        return self.x < other.x
    def __len__(self):
        return self.x
print((V(1) + V(2)).x, V(1) == V(1), V(1) < V(2), len(V(4)), bool(V(0)))
";
        assert_eq!(output(source), "3 True True 4 False\n");
    }
}
