//! Built-in functions and the constructors of built-in types.

use std::cell::RefCell;
use std::rc::Rc;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::format::{char_from_code, FormatSpec};
use super::ops::char_len;
use super::value::{
    Attrs, Class, ClassBase, Dict, Instance, IteratorObject, Items, NativeFunction, Range, Set, TypeKind, Value,
};
use super::Interpreter;
use crate::ast::BinOp;

/// Every built-in function a namespace may expose.
pub static BUILTINS: &[NativeFunction] = &[
    NativeFunction { name: "print", func: print },
    NativeFunction { name: "input", func: input },
    NativeFunction { name: "len", func: len },
    NativeFunction { name: "abs", func: abs },
    NativeFunction { name: "max", func: max },
    NativeFunction { name: "min", func: min },
    NativeFunction { name: "sum", func: sum },
    NativeFunction { name: "sorted", func: sorted },
    NativeFunction { name: "enumerate", func: enumerate },
    NativeFunction { name: "zip", func: zip },
    NativeFunction { name: "map", func: map },
    NativeFunction { name: "filter", func: filter },
    NativeFunction { name: "isinstance", func: isinstance },
    NativeFunction { name: "round", func: round },
    NativeFunction { name: "reversed", func: reversed },
    NativeFunction { name: "any", func: any },
    NativeFunction { name: "all", func: all },
    NativeFunction { name: "chr", func: chr },
    NativeFunction { name: "ord", func: ord },
    NativeFunction { name: "divmod", func: divmod },
    NativeFunction { name: "pow", func: pow },
    NativeFunction { name: "repr", func: repr },
    NativeFunction { name: "format", func: format },
    NativeFunction { name: "hex", func: hex },
    NativeFunction { name: "bin", func: bin },
    NativeFunction { name: "oct", func: oct },
    NativeFunction { name: "iter", func: iter },
    NativeFunction { name: "next", func: next },
    NativeFunction { name: "super", func: super_ },
];

fn print(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let sep = text_option(args.take_keyword("sep"), "sep", " ")?;
    let end = text_option(args.take_keyword("end"), "end", "\n")?;
    let _ = args.take_keyword("flush");
    args.no_keywords("print")?;

    let mut line = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&interp.to_str(value)?);
    }
    line.push_str(&end);
    interp.write_stdout(&line)?;
    Ok(Value::None)
}

fn text_option(value: Option<Value>, name: &str, default: &str) -> Exec<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(text)) => Ok(text.to_string()),
        Some(other) => type_error(format!("{} must be None or a string, not {}", name, other.type_name())),
    }
}

/// The prompt is accepted and discarded.
fn input(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.between("input", 0, 1)?;
    Ok(Value::str(interp.namespace.input().read()))
}

fn len(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("len")?;
    Ok(Value::Int(interp.length(&value)? as i64))
}

fn abs(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("abs")?;
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Interrupt::error(ExceptionKind::OverflowError, "integer overflow")),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Instance(ref instance) => match instance.class.lookup("__abs__") {
            Some(method) => interp.call(&method, CallArgs::new(vec![value.clone()])),
            None => type_error(format!("bad operand type for abs(): '{}'", value.type_name())),
        },
        other => type_error(format!("bad operand type for abs(): '{}'", other.type_name())),
    }
}

fn max(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    extremum(interp, args, "max")
}

fn min(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    extremum(interp, args, "min")
}

fn extremum(interp: &mut Interpreter, mut args: CallArgs, name: &str) -> Exec<Value> {
    let key = args.take_keyword("key").filter(|key| !matches!(key, Value::None));
    let default = args.take_keyword("default");
    args.no_keywords(name)?;
    let candidates = match args.positional.len() {
        0 => return type_error(format!("{} expected at least 1 argument, got 0", name)),
        1 => args.positional.remove(0),
        _ => {
            if default.is_some() {
                return type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                ));
            }
            Value::tuple(args.positional)
        }
    };

    let candidates = interp.iter_of(&candidates)?;
    let mut best: Option<(Value, Value)> = None;
    while let Some(candidate) = interp.next_item(&candidates)? {
        interp.checkpoint()?;
        let rank = match &key {
            Some(key) => interp.call(key, CallArgs::new(vec![candidate.clone()]))?,
            None => candidate.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) if name == "max" => interp.lt(best_rank, &rank)?,
            Some((best_rank, _)) => interp.lt(&rank, best_rank)?,
        };
        if replace {
            best = Some((rank, candidate));
        }
    }
    match (best, default) {
        (Some((_, value)), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => value_error(format!("{}() iterable argument is empty", name)),
    }
}

fn sum(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let start = args.take_keyword("start");
    let mut positional = args.between("sum", 1, 2)?;
    let start = match (positional.len(), start) {
        (2, _) => positional.remove(1),
        (_, Some(start)) => start,
        _ => Value::Int(0),
    };
    if matches!(start, Value::Str(_)) {
        return type_error("sum() can't sum strings [use ''.join(seq) instead]");
    }
    let items = interp.iter_of(&positional[0])?;

    // Floats are added with Neumaier compensation.
    let mut total = start;
    let mut compensation = 0.0_f64;
    while let Some(item) = interp.next_item(&items)? {
        interp.checkpoint()?;
        let addend = match (&total, &item) {
            (Value::Float(_), Value::Float(x)) => Some(*x),
            (Value::Float(_), Value::Int(i)) => Some(*i as f64),
            (Value::Float(_), Value::Bool(b)) => Some(*b as i64 as f64),
            _ => None,
        };
        match (addend, &total) {
            (Some(x), Value::Float(sum)) => {
                let t = sum + x;
                if sum.abs() >= x.abs() {
                    compensation += (sum - t) + x;
                } else {
                    compensation += (x - t) + sum;
                }
                total = Value::Float(t);
            }
            _ => {
                if let Value::Float(sum) = total {
                    if compensation != 0.0 && compensation.is_finite() {
                        total = Value::Float(sum + compensation);
                    }
                    compensation = 0.0;
                }
                total = interp.binary(BinOp::Add, &total, &item)?;
            }
        }
    }
    if let Value::Float(sum) = total {
        if compensation != 0.0 && compensation.is_finite() {
            total = Value::Float(sum + compensation);
        }
    }
    Ok(total)
}

fn sorted(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let key = args.take_keyword("key").filter(|key| !matches!(key, Value::None));
    let reverse = match args.take_keyword("reverse") {
        Some(flag) => interp.truthy(&flag)?,
        None => false,
    };
    let [iterable] = args.exact("sorted")?;
    let items = interp.collect(&iterable)?;
    Ok(Value::list(interp.sort_values(items, key.as_ref(), reverse)?))
}

fn enumerate(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let start = args.take_keyword("start");
    let mut positional = args.between("enumerate", 1, 2)?;
    let start = if positional.len() == 2 { positional.pop() } else { start };
    let count = match start {
        Some(Value::Int(i)) => i,
        Some(Value::Bool(b)) => b as i64,
        Some(other) => {
            return type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }
        None => 0,
    };
    let iterable = positional.remove(0);
    let inner = interp.iterator_value(&iterable)?;
    Ok(Value::iterator(IteratorObject::Enumerate { inner, count }))
}

fn zip(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.no_keywords("zip")?;
    let mut inners = Vec::with_capacity(args.positional.len());
    for iterable in &args.positional {
        inners.push(interp.iterator_value(iterable)?);
    }
    Ok(Value::iterator(IteratorObject::Zip {
        inners: Items::from(inners),
    }))
}

fn map(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    args.no_keywords("map")?;
    if args.positional.len() < 2 {
        return type_error("map() must have at least two arguments.");
    }
    let mut positional = args.positional.into_iter();
    let func = positional.next().unwrap_or(Value::None);
    let mut inners = Vec::new();
    for iterable in positional {
        inners.push(interp.iterator_value(&iterable)?);
    }
    Ok(Value::iterator(IteratorObject::Map {
        func,
        inners: Items::from(inners),
    }))
}

fn filter(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [func, iterable] = args.exact("filter")?;
    let inner = interp.iterator_value(&iterable)?;
    Ok(Value::iterator(IteratorObject::Filter { func, inner }))
}

fn isinstance(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value, class] = args.exact("isinstance")?;
    Ok(Value::Bool(interp.is_instance(&value, &class)?))
}

fn round(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let ndigits = args.take_keyword("ndigits");
    let mut positional = args.between("round", 1, 2)?;
    let ndigits = match (positional.len(), ndigits) {
        (2, _) => positional.pop(),
        (_, keyword) => keyword,
    };
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(Value::Int(n)) => Some(n),
        Some(Value::Bool(b)) => Some(b as i64),
        Some(other) => {
            return type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }
    };
    match (&positional[0], ndigits) {
        (Value::Int(i), None) => Ok(Value::Int(*i)),
        (Value::Bool(b), None) => Ok(Value::Int(*b as i64)),
        (Value::Int(i), Some(n)) => Ok(Value::Int(round_int(*i, n)?)),
        (Value::Bool(b), Some(n)) => Ok(Value::Int(round_int(*b as i64, n)?)),
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_float(*f, n))),
        (other, _) => match other {
            Value::Instance(instance) => match instance.class.lookup("__round__") {
                Some(method) => {
                    let mut call = vec![other.clone()];
                    call.extend(ndigits.map(Value::Int));
                    interp.call(&method, CallArgs::new(call))
                }
                None => type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                )),
            },
            _ => type_error(format!("type {} doesn't define __round__ method", other.type_name())),
        },
    }
}

/// Round an integer to `-ndigits` tens, ties to even.
fn round_int(value: i64, ndigits: i64) -> Exec<i64> {
    if ndigits >= 0 {
        return Ok(value);
    }
    let Some(unit) = u32::try_from(ndigits.unsigned_abs()).ok().and_then(|exp| 10_i64.checked_pow(exp)) else {
        return Ok(0);
    };
    let quotient = value.div_euclid(unit);
    let remainder = value.rem_euclid(unit);
    let rounded = match (remainder * 2).cmp(&unit) {
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 != 0 => quotient + 1,
        _ => quotient,
    };
    rounded
        .checked_mul(unit)
        .ok_or_else(|| Interrupt::error(ExceptionKind::OverflowError, "integer overflow"))
}

/// Round through the shortest decimal text, so `round(2.675, 2)` is `2.67`
/// just as the binary value says.
fn round_float(value: f64, ndigits: i64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    if ndigits >= 0 {
        if ndigits > 300 {
            return value;
        }
        return format!("{:.*}", ndigits as usize, value).parse().unwrap_or(value);
    }
    let Some(unit) = u32::try_from(ndigits.unsigned_abs()).ok().filter(|exp| *exp <= 308).map(|exp| 10_f64.powi(exp as i32)) else {
        return 0.0 * value.signum();
    };
    (value / unit).round_ties_even() * unit
}

pub(crate) fn float_to_int(value: f64) -> Exec<i64> {
    if value.is_nan() {
        return value_error("cannot convert float NaN to integer");
    }
    if value.is_infinite() {
        return fail(ExceptionKind::OverflowError, "cannot convert float infinity to integer");
    }
    let truncated = value.trunc();
    if truncated < -9.223_372_036_854_775_808e18 || truncated >= 9.223_372_036_854_775_808e18 {
        return fail(ExceptionKind::OverflowError, "integer overflow");
    }
    Ok(truncated as i64)
}

fn reversed(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("reversed")?;
    let state = match &value {
        Value::List(items) => IteratorObject::snapshot(items.borrow().iter().rev().cloned().collect()),
        Value::Tuple(items) => IteratorObject::snapshot(items.iter().rev().cloned().collect()),
        Value::Str(text) => IteratorObject::snapshot(text.chars().rev().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(dict) => IteratorObject::snapshot(dict.borrow().keys().into_iter().rev().collect()),
        Value::Range(range) => match range.len() {
            0 => IteratorObject::Exhausted,
            len => IteratorObject::Range {
                next: range.get(len - 1).unwrap_or(range.start),
                remaining: len,
                step: range.step.wrapping_neg(),
            },
        },
        Value::Instance(instance) => match instance.class.lookup("__reversed__") {
            Some(method) => return interp.call(&method, CallArgs::new(vec![value.clone()])),
            None => return type_error(format!("'{}' object is not reversible", value.type_name())),
        },
        other => return type_error(format!("'{}' object is not reversible", other.type_name())),
    };
    Ok(Value::iterator(state))
}

fn any(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [iterable] = args.exact("any")?;
    let iterator = interp.iter_of(&iterable)?;
    while let Some(item) = interp.next_item(&iterator)? {
        interp.checkpoint()?;
        if interp.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [iterable] = args.exact("all")?;
    let iterator = interp.iter_of(&iterable)?;
    while let Some(item) = interp.next_item(&iterator)? {
        interp.checkpoint()?;
        if !interp.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn chr(_interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [code] = args.exact("chr")?;
    match code {
        Value::Int(code) => Ok(Value::str(char_from_code(code)?.to_string())),
        Value::Bool(b) => Ok(Value::str(char_from_code(b as i64)?.to_string())),
        other => type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            other.type_name()
        )),
    }
}

fn ord(_interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("ord")?;
    let Value::Str(text) = &value else {
        return type_error(format!(
            "ord() expected string of length 1, but {} found",
            value.type_name()
        ));
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => type_error(format!(
            "ord() expected a character, but string of length {} found",
            char_len(&text)
        )),
    }
}

fn divmod(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [a, b] = args.exact("divmod")?;
    let quotient = interp.binary(BinOp::FloorDiv, &a, &b)?;
    let remainder = interp.binary(BinOp::Mod, &a, &b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn pow(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("pow", 2, 3)?;
    match values.as_slice() {
        [base, exp] => interp.binary(BinOp::Pow, base, exp),
        [Value::Int(base), Value::Int(exp), Value::Int(modulus)] => {
            if *modulus == 0 {
                return value_error("pow() 3rd argument cannot be 0");
            }
            if *exp < 0 {
                return value_error("pow() negative exponent with a modulus is not supported");
            }
            Ok(Value::Int(mod_pow(*base, *exp, *modulus)))
        }
        [_, _, _] => type_error("pow() 3rd argument not allowed unless all arguments are integers"),
        _ => type_error("pow() takes 2 or 3 arguments"),
    }
}

fn mod_pow(base: i64, mut exp: i64, modulus: i64) -> i64 {
    let m = modulus as i128;
    let mut result: i128 = 1;
    let mut base = (base as i128).rem_euclid(m);
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * base).rem_euclid(m);
        }
        base = (base * base).rem_euclid(m);
        exp >>= 1;
    }
    // The result takes the sign of the modulus.
    let result = result.rem_euclid(m);
    if modulus < 0 && result != 0 {
        (result + m) as i64
    } else {
        result as i64
    }
}

fn repr(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("repr")?;
    Ok(Value::str(interp.repr(&value)?))
}

fn format(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let values = args.between("format", 1, 2)?;
    let spec = match values.get(1) {
        None => String::new(),
        Some(Value::Str(spec)) => spec.to_string(),
        Some(other) => {
            return type_error(format!(
                "format() argument 2 must be str, not {}",
                other.type_name()
            ))
        }
    };
    Ok(Value::str(interp.format_value(&values[0], &spec)?))
}

fn radix(args: CallArgs, name: &str, kind: char) -> Exec<Value> {
    let [value] = args.exact(name)?;
    let number = match value {
        Value::Int(i) => i,
        Value::Bool(b) => b as i64,
        other => {
            return type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }
    };
    let spec = FormatSpec::parse(&format!("#{}", kind))?;
    Ok(Value::str(spec.format_int(number)?))
}

fn hex(_interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    radix(args, "hex", 'x')
}

fn bin(_interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    radix(args, "bin", 'b')
}

fn oct(_interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    radix(args, "oct", 'o')
}

fn iter(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [value] = args.exact("iter")?;
    interp.iterator_value(&value)
}

fn next(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let mut values = args.between("next", 1, 2)?;
    let default = if values.len() == 2 { values.pop() } else { None };
    let Value::Iterator(iterator) = &values[0] else {
        return type_error(format!("'{}' object is not an iterator", values[0].type_name()));
    };
    match (interp.next_item(iterator)?, default) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Interrupt::raised(Value::Exception(Rc::new(
            super::value::ExceptionObject::new(ExceptionKind::StopIteration, Items::default()),
        )))),
    }
}

fn super_(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    if !args.is_empty() {
        return type_error("super() arguments are not supported; use super()");
    }
    interp.make_super()
}

/// Why a string did not parse as an integer.
enum IntParseError {
    Invalid,
    Overflow,
}

fn parse_int(text: &str, base: u32) -> Result<i64, IntParseError> {
    let trimmed = text.trim();
    let (negative, mut digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut base = base;
    let lower = digits.to_ascii_lowercase();
    for (prefix, prefix_base) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if lower.starts_with(prefix) && (base == 0 || base == prefix_base) {
            digits = &digits[2..];
            digits = digits.strip_prefix('_').unwrap_or(digits);
            base = prefix_base;
            break;
        }
    }
    if base == 0 {
        base = 10;
    }
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(IntParseError::Invalid);
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(IntParseError::Invalid);
    }
    if !cleaned.chars().all(|c| c.to_digit(base).is_some()) {
        return Err(IntParseError::Invalid);
    }
    let magnitude = u64::from_str_radix(&cleaned, base).map_err(|_| IntParseError::Overflow)?;
    let value = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };
    i64::try_from(value).map_err(|_| IntParseError::Overflow)
}

fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    let negative = lower.starts_with('-');
    let special = match unsigned {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(value) = special {
        if lower.len() - unsigned.len() > 1 {
            return None;
        }
        return Some(if negative { -value } else { value });
    }
    let chars: Vec<char> = trimmed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c == '_' {
            let digit_before = i > 0 && chars[i - 1].is_ascii_digit();
            let digit_after = chars.get(i + 1).is_some_and(char::is_ascii_digit);
            if !digit_before || !digit_after {
                return None;
            }
        }
    }
    let cleaned: String = chars.into_iter().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || cleaned.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

impl Interpreter {
    /// Call a built-in type: `int(x)`, `list(xs)`, `type(x)` and friends.
    pub(crate) fn construct(&mut self, kind: TypeKind, mut args: CallArgs) -> Exec<Value> {
        match kind {
            TypeKind::Int => {
                let base = args.take_keyword("base");
                let mut values = args.between("int", 0, 2)?;
                let base = if values.len() == 2 { values.pop() } else { base };
                let Some(value) = values.pop() else {
                    return Ok(Value::Int(0));
                };
                self.to_int(&value, base)
            }
            TypeKind::Float => {
                let values = args.between("float", 0, 1)?;
                match values.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Float(f)) => Ok(Value::Float(*f)),
                    Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
                    Some(Value::Bool(b)) => Ok(Value::Float(*b as i64 as f64)),
                    Some(Value::Str(text)) => parse_float(text).map(Value::Float).ok_or_else(|| {
                        Interrupt::error(
                            ExceptionKind::ValueError,
                            format!("could not convert string to float: {}", super::format::str_repr(text)),
                        )
                    }),
                    Some(other) => type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        other.type_name()
                    )),
                }
            }
            TypeKind::Str => {
                let values = args.between("str", 0, 1)?;
                match values.first() {
                    None => Ok(Value::str("")),
                    Some(value) => Ok(Value::str(self.to_str(value)?)),
                }
            }
            TypeKind::Bool => {
                let values = args.between("bool", 0, 1)?;
                match values.first() {
                    None => Ok(Value::Bool(false)),
                    Some(value) => Ok(Value::Bool(self.truthy(value)?)),
                }
            }
            TypeKind::List => {
                let values = args.between("list", 0, 1)?;
                match values.first() {
                    None => Ok(Value::list(Vec::new())),
                    Some(iterable) => Ok(Value::list(self.collect(iterable)?)),
                }
            }
            TypeKind::Tuple => {
                let values = args.between("tuple", 0, 1)?;
                match values.first() {
                    None => Ok(Value::tuple(Vec::new())),
                    Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
                    Some(iterable) => Ok(Value::tuple(self.collect(iterable)?)),
                }
            }
            TypeKind::Set => {
                let values = args.between("set", 0, 1)?;
                let mut set = Set::new();
                if let Some(iterable) = values.first() {
                    for item in self.collect(iterable)? {
                        set.insert(item.hash_key()?, item)?;
                    }
                }
                Ok(Value::set(set))
            }
            TypeKind::Dict => {
                let keywords = std::mem::take(&mut args.keywords);
                let values = args.between("dict", 0, 1)?;
                let mut dict = Dict::new();
                if let Some(source) = values.first() {
                    for (key, value) in self.mapping_pairs(source)? {
                        dict.insert(key.hash_key()?, key, value)?;
                    }
                }
                for (key, value) in keywords {
                    let key = Value::str(key);
                    dict.insert(key.hash_key()?, key, value)?;
                }
                Ok(Value::dict(dict))
            }
            TypeKind::Range => {
                let values = args.between("range", 1, 3)?;
                let mut bounds = Vec::with_capacity(values.len());
                for value in &values {
                    bounds.push(match value {
                        Value::Int(i) => *i,
                        Value::Bool(b) => *b as i64,
                        other => {
                            return type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                other.type_name()
                            ))
                        }
                    });
                }
                let range = match bounds.as_slice() {
                    [stop] => Range {
                        start: 0,
                        stop: *stop,
                        step: 1,
                    },
                    [start, stop] => Range {
                        start: *start,
                        stop: *stop,
                        step: 1,
                    },
                    [start, stop, step] => {
                        if *step == 0 {
                            return value_error("range() arg 3 must not be zero");
                        }
                        Range {
                            start: *start,
                            stop: *stop,
                            step: *step,
                        }
                    }
                    _ => return type_error("range expected at most 3 arguments"),
                };
                Ok(Value::Range(range))
            }
            TypeKind::Object => {
                args.exact::<0>("object")?;
                let class = Rc::new(Class {
                    name: "object".to_string(),
                    base: ClassBase::Object,
                    attrs: RefCell::new(Attrs::default()),
                });
                Ok(Value::Instance(Instance::create(class)))
            }
            TypeKind::Type => {
                if args.len() == 3 {
                    return type_error("type() with three arguments is not supported");
                }
                let [value] = args.exact("type")?;
                Ok(type_of(&value))
            }
            other => type_error(format!("cannot create '{}' instances", other.name())),
        }
    }

    fn to_int(&mut self, value: &Value, base: Option<Value>) -> Exec<Value> {
        let base = match base {
            None => None,
            Some(Value::Int(base)) if base == 0 || (2..=36).contains(&base) => Some(base as u32),
            Some(Value::Int(_)) => return value_error("int() base must be >= 2 and <= 36, or 0"),
            Some(other) => {
                return type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                ))
            }
        };
        match (value, base) {
            (Value::Str(text), base) => {
                let base = base.unwrap_or(10);
                parse_int(text, base).map(Value::Int).map_err(|err| match err {
                    IntParseError::Invalid => Interrupt::error(
                        ExceptionKind::ValueError,
                        format!(
                            "invalid literal for int() with base {}: {}",
                            base,
                            super::format::str_repr(text)
                        ),
                    ),
                    IntParseError::Overflow => Interrupt::error(ExceptionKind::OverflowError, "integer overflow"),
                })
            }
            (_, Some(_)) => type_error("int() can't convert non-string with explicit base"),
            (Value::Int(i), None) => Ok(Value::Int(*i)),
            (Value::Bool(b), None) => Ok(Value::Int(*b as i64)),
            (Value::Float(f), None) => Ok(Value::Int(float_to_int(*f)?)),
            (Value::Instance(instance), None) => match instance.class.lookup("__int__") {
                Some(method) => self.call(&method, CallArgs::new(vec![value.clone()])),
                None => type_error(format!(
                    "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                    value.type_name()
                )),
            },
            (other, None) => type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                other.type_name()
            )),
        }
    }

    /// Key/value pairs of a mapping or of an iterable of pairs.
    pub(crate) fn mapping_pairs(&mut self, source: &Value) -> Exec<Vec<(Value, Value)>> {
        if let Value::Dict(dict) = source {
            return Ok(dict.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect());
        }
        let mut pairs = Vec::new();
        for (index, item) in self.collect(source)?.into_iter().enumerate() {
            if !self.is_iterable(&item) {
                return type_error(format!(
                    "cannot convert dictionary update sequence element #{} to a sequence",
                    index
                ));
            }
            let pair = self.collect(&item)?;
            let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
                Interrupt::error(
                    ExceptionKind::ValueError,
                    format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        index,
                        pair.len()
                    ),
                )
            })?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// `isinstance(value, class)`
    pub(crate) fn is_instance(&mut self, value: &Value, class: &Value) -> Exec<bool> {
        Ok(match class {
            Value::Type(TypeKind::Object) => true,
            Value::Type(kind) => match value {
                Value::Instance(_) | Value::Exception(_) | Value::Super(_) => false,
                other => other.type_kind().is_subclass_of(*kind),
            },
            Value::ExceptionType(kind) => value.exception_kind().is_some_and(|actual| actual.is_subclass_of(*kind)),
            Value::Class(class) => matches!(value, Value::Instance(instance) if instance.class.is_subclass_of(class)),
            Value::Tuple(classes) => {
                for class in classes.iter() {
                    if self.nested(|interp| interp.is_instance(value, class))? {
                        return Ok(true);
                    }
                }
                false
            }
            _ => return type_error("isinstance() arg 2 must be a type, a tuple of types, or a union"),
        })
    }

    /// Stable merge sort. The comparison may fail or be inconsistent, so
    /// the standard library sort is not used.
    pub(crate) fn sort_values(&mut self, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> Exec<Vec<Value>> {
        let keys = match key {
            Some(key) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call(key, CallArgs::new(vec![item.clone()]))?);
                }
                keys
            }
            None => items.clone(),
        };

        let n = items.len();
        let mut order: Vec<usize> = (0..n).collect();
        let mut scratch = vec![0usize; n];
        let mut width = 1;
        while width < n {
            let mut start = 0;
            while start < n {
                let mid = (start + width).min(n);
                let end = (start + 2 * width).min(n);
                let (mut i, mut j, mut k) = (start, mid, start);
                while i < mid && j < end {
                    self.checkpoint()?;
                    let (left, right) = (&keys[order[i]], &keys[order[j]]);
                    let right_first = if reverse {
                        self.lt(left, right)?
                    } else {
                        self.lt(right, left)?
                    };
                    if right_first {
                        scratch[k] = order[j];
                        j += 1;
                    } else {
                        scratch[k] = order[i];
                        i += 1;
                    }
                    k += 1;
                }
                scratch[k..k + (mid - i)].copy_from_slice(&order[i..mid]);
                k += mid - i;
                scratch[k..k + (end - j)].copy_from_slice(&order[j..end]);
                start = end;
            }
            std::mem::swap(&mut order, &mut scratch);
            width *= 2;
        }
        Ok(order.into_iter().map(|index| items[index].clone()).collect())
    }
}

/// `type(value)`
fn type_of(value: &Value) -> Value {
    match value {
        Value::Instance(instance) => Value::Class(instance.class.clone()),
        Value::Exception(exc) => Value::ExceptionType(exc.kind),
        other => Value::Type(other.type_kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output, run_with_input};
    use super::{parse_float, parse_int, round_float, round_int};

    #[test]
    fn test_parse_int() {
        assert!(matches!(parse_int(" 42 ", 10), Ok(42)));
        assert!(matches!(parse_int("-1_000", 10), Ok(-1000)));
        assert!(matches!(parse_int("ff", 16), Ok(255)));
        assert!(matches!(parse_int("0b101", 0), Ok(5)));
        assert!(matches!(parse_int("-9223372036854775808", 10), Ok(i64::MIN)));
        assert!(parse_int("12a", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("99999999999999999999", 10).is_err());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(" 2.5 "), Some(2.5));
        assert_eq!(parse_float("1e3"), Some(1000.0));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("1_000.5"), Some(1000.5));
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float("--1"), None);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1234.5, -2), 1200.0);
        assert_eq!(round_int(15, -1).ok(), Some(20));
        assert_eq!(round_int(25, -1).ok(), Some(20));
        assert_eq!(round_int(123, i64::MIN).ok(), Some(0));
        assert_eq!(round_float(123.0, i64::MIN), 0.0);
        assert_eq!(output("print(round(123, -9223372036854775807 - 1), round(-7, -30))"), "0 0\n");
        assert_eq!(output("print(round(2.5), round(3.5), round(-0.5), round(3.14159, 3), round(7))"), "2 4 0 3.142 7\n");
    }

    #[test]
    fn test_print_options() {
        assert_eq!(output("print(1, 2, sep='-', end='!')\nprint()"), "1-2!\n");
        assert_eq!(output("print('a', None, 3.0)"), "a None 3.0\n");
    }

    #[test]
    fn test_input_returns_preset_line() {
        let finished = run_with_input("name = input('Name? ')\nagain = input()\nprint(name.upper(), again)", "ana\n");
        assert_eq!(finished.stdout, "ANA ana\n");
    }

    #[test]
    fn test_conversions() {
        let source = "\
print(int('  7 '), int(3.9), int(-3.9), int('ff', 16), float('1.5'), str(12), bool([]), bool('x'))
print(list('ab'), tuple([1, 2]), sorted(set([3, 1, 3])), dict([('a', 1)], b=2), list(range(5, 0, -2)))
";
        assert_eq!(
            output(source),
            "7 3 -3 255 1.5 12 False True\n['a', 'b'] (1, 2) [1, 3] {'a': 1, 'b': 2} [5, 3, 1]\n"
        );
        assert_eq!(fault("int('x')"), "ValueError: invalid literal for int() with base 10: 'x'");
        assert_eq!(fault("float('abc')"), "ValueError: could not convert string to float: 'abc'");
        assert_eq!(fault("range(1, 2, 0)"), "ValueError: range() arg 3 must not be zero");
    }

    #[test]
    fn test_aggregates() {
        let source = "\
xs = [3, 1, 4, 1, 5]
print(len(xs), max(xs), min(xs), sum(xs), sum([0.1] * 10), sum([[1], [2]], []))
print(max('apple', 'fig', key=len), min([], default=None), max(2, 7, 3))
print(any(x > 4 for x in xs), all(x > 0 for x in xs), abs(-3), abs(-2.5))
print(divmod(17, 5), divmod(-7, 2), pow(2, 10), pow(3, 4, 5), hex(255), bin(5), oct(8))
print(chr(65), ord('a'), repr('q'), isinstance(True, int), isinstance(1, (str, float)))
";
        assert_eq!(
            output(source),
            "5 5 1 14 1.0 [1, 2]\napple None 7\nTrue True 3 2.5\n(3, 2) (-4, 1) 1024 1 0xff 0b101 0o10\nA 97 'q' True False\n"
        );
        assert_eq!(fault("max([])"), "ValueError: max() iterable argument is empty");
        assert_eq!(fault("sum(['a'], '')"), "TypeError: sum() can't sum strings [use ''.join(seq) instead]");
    }

    #[test]
    fn test_aggregates_stream_past_collection_limit() {
        let source = "\
print(sum(range(4100000)))
print(any(x > 4050000 for x in range(4100000)), max(range(4100000)), min(range(4100000)))
print(max(n % 7 for n in range(100)), min(3, 1, 2))
";
        assert_eq!(output(source), "8404997950000\nTrue 4099999 0\n6 1\n");
        assert!(fault("list(range(4100000))").starts_with("MemoryError"));
    }

    #[test]
    fn test_sorted_is_stable() {
        let source = "\
words = ['bb', 'a', 'cc', 'd', 'eee']
print(sorted(words, key=len))
print(sorted(words, key=len, reverse=True))
print(sorted([3, 1, 2], reverse=True))
";
        assert_eq!(
            output(source),
            "['a', 'd', 'bb', 'cc', 'eee']\n['eee', 'bb', 'cc', 'a', 'd']\n[3, 2, 1]\n"
        );
        assert_eq!(
            fault("sorted([1, 'a'])"),
            "TypeError: '<' not supported between instances of 'str' and 'int'"
        );
    }

    #[test]
    fn test_type_and_isinstance() {
        let source = "\
class A:
    pass
class B(A):
    pass
b = B()
print(type(b) is B, isinstance(b, A), isinstance(b, object), type(3) == int, type('') is str)
print(isinstance(ValueError(), Exception), isinstance(3, bool), type(b).__name__)
";
        assert_eq!(output(source), "True True True True True\nTrue False B\n");
    }
}
