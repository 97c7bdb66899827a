//! Methods of the built-in types.

use std::cell::RefCell;
use std::rc::Rc;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::ops::{char_len, check_collection_len, check_str_len, copy_dict, int_index, key_error, normalize_index, set_combine};
use super::value::{Dict, Items, MethodDef, Set, Value, MAX_STR_BYTES};
use super::Interpreter;

macro_rules! methods {
    ($($name:literal => $func:ident),* $(,)?) => {
        &[$(MethodDef { name: $name, func: $func }),*]
    };
}

static STR_METHODS: &[MethodDef] = methods! {
    "upper" => str_upper,
    "lower" => str_lower,
    "strip" => str_strip,
    "lstrip" => str_lstrip,
    "rstrip" => str_rstrip,
    "split" => str_split,
    "rsplit" => str_rsplit,
    "join" => str_join,
    "replace" => str_replace,
    "find" => str_find,
    "rfind" => str_rfind,
    "index" => str_index,
    "count" => str_count,
    "startswith" => str_startswith,
    "endswith" => str_endswith,
    "title" => str_title,
    "capitalize" => str_capitalize,
    "swapcase" => str_swapcase,
    "isdigit" => str_isdigit,
    "isnumeric" => str_isnumeric,
    "isalpha" => str_isalpha,
    "isalnum" => str_isalnum,
    "isspace" => str_isspace,
    "isupper" => str_isupper,
    "islower" => str_islower,
    "format" => str_format,
    "center" => str_center,
    "ljust" => str_ljust,
    "rjust" => str_rjust,
    "zfill" => str_zfill,
    "splitlines" => str_splitlines,
};

static LIST_METHODS: &[MethodDef] = methods! {
    "append" => list_append,
    "extend" => list_extend,
    "insert" => list_insert,
    "pop" => list_pop,
    "remove" => list_remove,
    "index" => list_index,
    "count" => list_count,
    "sort" => list_sort,
    "reverse" => list_reverse,
    "clear" => list_clear,
    "copy" => list_copy,
};

static DICT_METHODS: &[MethodDef] = methods! {
    "get" => dict_get,
    "keys" => dict_keys,
    "values" => dict_values,
    "items" => dict_items,
    "pop" => dict_pop,
    "update" => dict_update,
    "setdefault" => dict_setdefault,
    "clear" => dict_clear,
    "copy" => dict_copy,
};

static SET_METHODS: &[MethodDef] = methods! {
    "add" => set_add,
    "remove" => set_remove,
    "discard" => set_discard,
    "pop" => set_pop,
    "union" => set_union,
    "intersection" => set_intersection,
    "difference" => set_difference,
    "symmetric_difference" => set_symmetric_difference,
    "issubset" => set_issubset,
    "issuperset" => set_issuperset,
    "clear" => set_clear,
    "copy" => set_copy,
    "update" => set_update,
};

static INT_METHODS: &[MethodDef] = methods! {
    "bit_length" => int_bit_length,
};

static FLOAT_METHODS: &[MethodDef] = methods! {
    "is_integer" => float_is_integer,
};

static OBJECT_METHODS: &[MethodDef] = methods! {
    "__init__" => object_init,
    "__str__" => object_str,
    "__repr__" => object_repr,
};

/// Method `name` of a built-in value.
pub(crate) fn lookup(receiver: &Value, name: &str) -> Option<&'static MethodDef> {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Int(_) | Value::Bool(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        _ => return None,
    };
    table.iter().find(|method| method.name == name)
}

/// Methods every class inherits, reached through `super()`.
pub(crate) fn object_method(name: &str) -> Option<&'static MethodDef> {
    OBJECT_METHODS.iter().find(|method| method.name == name)
}

fn receiver_str(receiver: &Value) -> Exec<&str> {
    match receiver {
        Value::Str(text) => Ok(text),
        other => type_error(format!("descriptor requires a 'str' object but received a '{}'", other.type_name())),
    }
}

fn receiver_list(receiver: &Value) -> Exec<&Rc<RefCell<Items>>> {
    match receiver {
        Value::List(items) => Ok(items),
        other => type_error(format!("descriptor requires a 'list' object but received a '{}'", other.type_name())),
    }
}

fn receiver_dict(receiver: &Value) -> Exec<&Rc<RefCell<Dict>>> {
    match receiver {
        Value::Dict(dict) => Ok(dict),
        other => type_error(format!("descriptor requires a 'dict' object but received a '{}'", other.type_name())),
    }
}

fn receiver_set(receiver: &Value) -> Exec<&Rc<RefCell<Set>>> {
    match receiver {
        Value::Set(set) => Ok(set),
        other => type_error(format!("descriptor requires a 'set' object but received a '{}'", other.type_name())),
    }
}

fn str_arg<'a>(value: &'a Value, method: &str) -> Exec<&'a str> {
    match value {
        Value::Str(text) => Ok(text),
        other => type_error(format!("{}() argument must be str, not {}", method, other.type_name())),
    }
}

fn optional_str_arg<'a>(value: Option<&'a Value>, method: &str) -> Exec<Option<&'a str>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(value, method).map(Some),
    }
}

fn optional_int_arg(value: Option<&Value>) -> Exec<Option<i64>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => match int_index(value) {
            Some(i) => Ok(Some(i)),
            None => type_error(format!(
                "slice indices must be integers or None or have an __index__ method, not {}",
                value.type_name()
            )),
        },
    }
}

fn int_arg(value: &Value) -> Exec<i64> {
    int_index(value).ok_or_else(|| {
        Interrupt::error(
            ExceptionKind::TypeError,
            format!("'{}' object cannot be interpreted as an integer", value.type_name()),
        )
    })
}

fn text(value: impl Into<String>) -> Exec<Value> {
    Ok(Value::str(value))
}

// str

fn str_upper(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("upper")?;
    text(receiver_str(receiver)?.to_uppercase())
}

fn str_lower(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("lower")?;
    text(receiver_str(receiver)?.to_lowercase())
}

fn strip_with(receiver: &Value, args: CallArgs, name: &str, left: bool, right: bool) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let values = args.between(name, 0, 1)?;
    let chars = optional_str_arg(values.first(), name)?;
    let matches = |c: char| match chars {
        Some(chars) => chars.contains(c),
        None => c.is_whitespace(),
    };
    let mut result = s;
    if left {
        result = result.trim_start_matches(matches);
    }
    if right {
        result = result.trim_end_matches(matches);
    }
    text(result)
}

fn str_strip(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    strip_with(receiver, args, "strip", true, true)
}

fn str_lstrip(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    strip_with(receiver, args, "lstrip", true, false)
}

fn str_rstrip(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    strip_with(receiver, args, "rstrip", false, true)
}

/// `(sep, maxsplit)` of `split` and `rsplit`.
fn split_args(args: &mut CallArgs, name: &str) -> Exec<(Option<Value>, Option<usize>)> {
    let sep = args.take_keyword("sep");
    let maxsplit = args.take_keyword("maxsplit");
    args.no_keywords(name)?;
    if args.positional.len() > 2 {
        return type_error(format!("{}() takes at most 2 arguments ({} given)", name, args.positional.len()));
    }
    let mut positional = std::mem::take(&mut args.positional).into_iter();
    let sep = positional.next().or(sep);
    let maxsplit = match positional.next().or(maxsplit) {
        None => None,
        Some(value) => usize::try_from(int_arg(&value)?).ok(),
    };
    Ok((sep, maxsplit))
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|max| parts.len() >= max) {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(at) => {
                parts.push(Value::str(&rest[..at]));
                rest = rest[at..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn rsplit_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|max| parts.len() >= max) {
            parts.push(Value::str(rest));
            break;
        }
        match rest.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            Some((at, c)) => {
                parts.push(Value::str(&rest[at + c.len_utf8()..]));
                rest = rest[..at].trim_end();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts.reverse();
    parts
}

fn str_split(_: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let (sep, maxsplit) = split_args(&mut args, "split")?;
    let parts = match optional_str_arg(sep.as_ref(), "split")? {
        None => split_whitespace(s, maxsplit),
        Some("") => return value_error("empty separator"),
        Some(sep) => match maxsplit {
            Some(max) => s.splitn(max.saturating_add(1), sep).map(Value::str).collect(),
            None => s.split(sep).map(Value::str).collect(),
        },
    };
    Ok(Value::list(parts))
}

fn str_rsplit(_: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let (sep, maxsplit) = split_args(&mut args, "rsplit")?;
    let parts = match optional_str_arg(sep.as_ref(), "rsplit")? {
        None => rsplit_whitespace(s, maxsplit),
        Some("") => return value_error("empty separator"),
        Some(sep) => {
            let mut parts: Vec<Value> = match maxsplit {
                Some(max) => s.rsplitn(max.saturating_add(1), sep).map(Value::str).collect(),
                None => s.rsplit(sep).map(Value::str).collect(),
            };
            parts.reverse();
            parts
        }
    };
    Ok(Value::list(parts))
}

fn str_join(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let sep = receiver_str(receiver)?;
    let [iterable] = args.exact("join")?;
    let items = interp.collect(&iterable)?;
    let mut total = 0usize;
    let mut parts = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Value::Str(part) = item else {
            return type_error(format!(
                "sequence item {}: expected str instance, {} found",
                index,
                item.type_name()
            ));
        };
        total = total.saturating_add(part.len() + sep.len());
        check_str_len(total)?;
        parts.push(part.as_ref());
    }
    text(parts.join(sep))
}

fn str_replace(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let values = args.between("replace", 2, 3)?;
    let old = str_arg(&values[0], "replace")?;
    let new = str_arg(&values[1], "replace")?;
    let count = match values.get(2) {
        Some(count) => usize::try_from(int_arg(count)?).ok(),
        None => None,
    };
    let occurrences = if old.is_empty() {
        char_len(s) + 1
    } else {
        s.matches(old).count()
    };
    let replaced = count.map_or(occurrences, |count| count.min(occurrences));
    check_str_len(s.len().saturating_add(replaced.saturating_mul(new.len())))?;
    text(match count {
        Some(count) => s.replacen(old, new, count),
        None => s.replace(old, new),
    })
}

/// The part of `s` between Python-style `start` and `end` character
/// positions, with the char offset where it begins.
fn window(s: &str, start: Option<i64>, end: Option<i64>) -> Option<(usize, &str)> {
    let len = char_len(s) as i64;
    let clamp = |index: i64| {
        if index < 0 {
            (index + len).max(0)
        } else {
            index.min(len)
        }
    };
    let start = start.map_or(0, clamp);
    let end = end.map_or(len, clamp);
    if start > len || end < start {
        return None;
    }
    let byte = |pos: i64| s.char_indices().nth(pos as usize).map_or(s.len(), |(at, _)| at);
    Some((start as usize, &s[byte(start)..byte(end)]))
}

fn search_args<'a>(args: &'a [Value], name: &str) -> Exec<(&'a str, Option<i64>, Option<i64>)> {
    let sub = str_arg(&args[0], name)?;
    Ok((sub, optional_int_arg(args.get(1))?, optional_int_arg(args.get(2))?))
}

fn find_in(receiver: &Value, args: CallArgs, name: &str, from_right: bool) -> Exec<Option<usize>> {
    let s = receiver_str(receiver)?;
    let values = args.between(name, 1, 3)?;
    let (sub, start, end) = search_args(&values, name)?;
    let Some((offset, hay)) = window(s, start, end) else {
        return Ok(None);
    };
    let found = if from_right { hay.rfind(sub) } else { hay.find(sub) };
    Ok(found.map(|at| offset + char_len(&hay[..at])))
}

fn position(found: Option<usize>) -> Exec<Value> {
    Ok(Value::Int(found.map_or(-1, |at| at as i64)))
}

fn str_find(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    position(find_in(receiver, args, "find", false)?)
}

fn str_rfind(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    position(find_in(receiver, args, "rfind", true)?)
}

fn str_index(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    match find_in(receiver, args, "index", false)? {
        Some(at) => Ok(Value::Int(at as i64)),
        None => value_error("substring not found"),
    }
}

fn str_count(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let values = args.between("count", 1, 3)?;
    let (sub, start, end) = search_args(&values, "count")?;
    let count = match window(s, start, end) {
        None => 0,
        Some((_, hay)) if sub.is_empty() => char_len(hay) + 1,
        Some((_, hay)) => hay.matches(sub).count(),
    };
    Ok(Value::Int(count as i64))
}

fn affix_check(receiver: &Value, args: CallArgs, name: &str, suffix: bool) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let values = args.between(name, 1, 3)?;
    let Some((_, hay)) = window(s, optional_int_arg(values.get(1))?, optional_int_arg(values.get(2))?) else {
        return Ok(Value::Bool(false));
    };
    let candidates: Vec<Value> = match &values[0] {
        Value::Tuple(items) => items.to_vec(),
        Value::Str(_) => vec![values[0].clone()],
        other => {
            return type_error(format!(
                "{} first arg must be str or a tuple of str, not {}",
                name,
                other.type_name()
            ))
        }
    };
    for candidate in &candidates {
        let affix = str_arg(candidate, name)?;
        let hit = if suffix { hay.ends_with(affix) } else { hay.starts_with(affix) };
        if hit {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn str_startswith(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    affix_check(receiver, args, "startswith", false)
}

fn str_endswith(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    affix_check(receiver, args, "endswith", true)
}

fn is_cased(c: char) -> bool {
    c.is_uppercase() || c.is_lowercase()
}

fn str_title(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("title")?;
    let mut out = String::new();
    let mut previous_cased = false;
    for c in receiver_str(receiver)?.chars() {
        if is_cased(c) {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(c);
            previous_cased = false;
        }
    }
    text(out)
}

fn str_capitalize(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("capitalize")?;
    let mut chars = receiver_str(receiver)?.chars();
    let mut out = String::new();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(&chars.as_str().to_lowercase());
    }
    text(out)
}

fn str_swapcase(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("swapcase")?;
    let mut out = String::new();
    for c in receiver_str(receiver)?.chars() {
        if c.is_uppercase() {
            out.extend(c.to_lowercase());
        } else if c.is_lowercase() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
    }
    text(out)
}

fn char_class(receiver: &Value, args: CallArgs, name: &str, test: fn(char) -> bool) -> Exec<Value> {
    args.exact::<0>(name)?;
    let s = receiver_str(receiver)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
}

fn str_isdigit(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    char_class(receiver, args, "isdigit", |c| c.is_ascii_digit() || matches!(c, '²' | '³' | '¹'))
}

fn str_isnumeric(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    char_class(receiver, args, "isnumeric", char::is_numeric)
}

fn str_isalpha(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    char_class(receiver, args, "isalpha", char::is_alphabetic)
}

fn str_isalnum(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    char_class(receiver, args, "isalnum", char::is_alphanumeric)
}

fn str_isspace(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    char_class(receiver, args, "isspace", char::is_whitespace)
}

fn str_isupper(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("isupper")?;
    let s = receiver_str(receiver)?;
    Ok(Value::Bool(s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)))
}

fn str_islower(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("islower")?;
    let s = receiver_str(receiver)?;
    Ok(Value::Bool(s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase)))
}

fn str_format(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let template = receiver_str(receiver)?;
    text(interp.str_format(template, &args)?)
}

/// `(width, fillchar)` of the justification methods.
fn justify_args(args: CallArgs, name: &str) -> Exec<(usize, char)> {
    let values = args.between(name, 1, 2)?;
    let width = usize::try_from(int_arg(&values[0])?).unwrap_or(0);
    if width > MAX_STR_BYTES {
        return fail(ExceptionKind::MemoryError, "string is too large");
    }
    let fill = match values.get(1) {
        None => ' ',
        Some(Value::Str(fill)) => {
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return type_error("The fill character must be exactly one character long"),
            }
        }
        Some(other) => {
            return type_error(format!(
                "The fill character must be a unicode character, not {}",
                other.type_name()
            ))
        }
    };
    Ok((width, fill))
}

fn padded(s: &str, left: usize, right: usize, fill: char) -> String {
    let mut out = String::with_capacity(s.len() + left + right);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(s);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

fn str_center(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let (width, fill) = justify_args(args, "center")?;
    let len = char_len(s);
    if width <= len {
        return text(s);
    }
    let margin = width - len;
    let left = margin / 2 + (margin & width & 1);
    text(padded(s, left, margin - left, fill))
}

fn str_ljust(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let (width, fill) = justify_args(args, "ljust")?;
    text(padded(s, 0, width.saturating_sub(char_len(s)), fill))
}

fn str_rjust(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let (width, fill) = justify_args(args, "rjust")?;
    text(padded(s, width.saturating_sub(char_len(s)), 0, fill))
}

fn str_zfill(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let [width] = args.exact("zfill")?;
    let width = usize::try_from(int_arg(&width)?).unwrap_or(0);
    check_str_len(width)?;
    let zeros = width.saturating_sub(char_len(s));
    let (sign, digits) = match s.strip_prefix(['+', '-']) {
        Some(rest) => (&s[..1], rest),
        None => ("", s),
    };
    text(format!("{}{}{}", sign, "0".repeat(zeros), digits))
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn str_splitlines(interp: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> Exec<Value> {
    let s = receiver_str(receiver)?;
    let keepends = args.take_keyword("keepends");
    let values = args.between("splitlines", 0, 1)?;
    let keepends = match values.into_iter().next().or(keepends) {
        Some(flag) => interp.truthy(&flag)?,
        None => false,
    };
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = s.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        let mut end = at + c.len_utf8();
        if c == '\r' && chars.peek().is_some_and(|(_, next)| *next == '\n') {
            chars.next();
            end += 1;
        }
        lines.push(Value::str(if keepends { &s[start..end] } else { &s[start..at] }));
        start = end;
    }
    if start < s.len() {
        lines.push(Value::str(&s[start..]));
    }
    Ok(Value::list(lines))
}

// list

fn list_append(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let [item] = args.exact("append")?;
    let mut items = list.borrow_mut();
    check_collection_len(items.len() + 1)?;
    items.push(item);
    Ok(Value::None)
}

fn list_extend(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let [iterable] = args.exact("extend")?;
    let extra = interp.collect(&iterable)?;
    let mut items = list.borrow_mut();
    check_collection_len(items.len() + extra.len())?;
    items.extend(extra);
    Ok(Value::None)
}

fn list_insert(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let [index, item] = args.exact("insert")?;
    let index = int_arg(&index)?;
    let mut items = list.borrow_mut();
    check_collection_len(items.len() + 1)?;
    let len = items.len() as i64;
    let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(at as usize, item);
    Ok(Value::None)
}

fn list_pop(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let values = args.between("pop", 0, 1)?;
    let index = match values.first() {
        Some(index) => int_arg(index)?,
        None => -1,
    };
    let mut items = list.borrow_mut();
    if items.is_empty() {
        return fail(ExceptionKind::IndexError, "pop from empty list");
    }
    match normalize_index(index, items.len()) {
        Some(at) => Ok(items.remove(at)),
        None => fail(ExceptionKind::IndexError, "pop index out of range"),
    }
}

/// Position of the first element equal to `target`, comparing against a
/// snapshot so `__eq__` may touch the list.
fn position_of(interp: &mut Interpreter, list: &Rc<RefCell<Items>>, target: &Value, from: usize, to: usize) -> Exec<Option<usize>> {
    let snapshot = list.borrow().to_vec();
    for (at, item) in snapshot.iter().enumerate().take(to).skip(from) {
        interp.checkpoint()?;
        if interp.eq(item, target)? {
            return Ok(Some(at));
        }
    }
    Ok(None)
}

fn list_remove(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let [target] = args.exact("remove")?;
    let found = position_of(interp, list, &target, 0, usize::MAX)?;
    let mut items = list.borrow_mut();
    match found.filter(|at| *at < items.len()) {
        Some(at) => {
            items.remove(at);
            Ok(Value::None)
        }
        None => value_error("list.remove(x): x not in list"),
    }
}

fn list_index(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let values = args.between("index", 1, 3)?;
    let len = list.borrow().len() as i64;
    let clamp = |index: i64| {
        if index < 0 {
            (index + len).max(0) as usize
        } else {
            index.min(len) as usize
        }
    };
    let from = optional_int_arg(values.get(1))?.map_or(0, clamp);
    let to = optional_int_arg(values.get(2))?.map_or(len as usize, clamp);
    match position_of(interp, list, &values[0], from, to)? {
        Some(at) => Ok(Value::Int(at as i64)),
        None => {
            let shown = interp.repr(&values[0])?;
            value_error(format!("{} is not in list", shown))
        }
    }
}

fn list_count(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let [target] = args.exact("count")?;
    let snapshot = list.borrow().to_vec();
    let mut count = 0;
    for item in &snapshot {
        interp.checkpoint()?;
        if interp.eq(item, &target)? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_sort(interp: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    let key = args.take_keyword("key").filter(|key| !matches!(key, Value::None));
    let reverse = match args.take_keyword("reverse") {
        Some(flag) => interp.truthy(&flag)?,
        None => false,
    };
    args.exact::<0>("sort")?;
    // The list reads as empty while its items are being sorted.
    let items = std::mem::take(&mut *list.borrow_mut()).into_vec();
    let sorted = interp.sort_values(items.clone(), key.as_ref(), reverse);
    let mut slot = list.borrow_mut();
    match sorted {
        Ok(sorted) => {
            *slot = Items::from(sorted);
            Ok(Value::None)
        }
        Err(err) => {
            *slot = Items::from(items);
            Err(err)
        }
    }
}

fn list_reverse(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    args.exact::<0>("reverse")?;
    list.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_clear(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    args.exact::<0>("clear")?;
    let old = std::mem::take(&mut *list.borrow_mut());
    drop(old);
    Ok(Value::None)
}

fn list_copy(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let list = receiver_list(receiver)?;
    args.exact::<0>("copy")?;
    let items = list.borrow().to_vec();
    Ok(Value::list(items))
}

// dict

fn dict_get(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let dict = receiver_dict(receiver)?;
    let mut values = args.between("get", 1, 2)?;
    let default = if values.len() == 2 { values.pop() } else { None };
    let hash = values[0].hash_key()?;
    let found = dict.borrow().get(&hash).cloned();
    Ok(found.or(default).unwrap_or(Value::None))
}

fn dict_keys(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("keys")?;
    Ok(Value::list(receiver_dict(receiver)?.borrow().keys()))
}

fn dict_values(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("values")?;
    Ok(Value::list(receiver_dict(receiver)?.borrow().values()))
}

fn dict_items(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("items")?;
    Ok(Value::list(receiver_dict(receiver)?.borrow().items()))
}

fn dict_pop(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let dict = receiver_dict(receiver)?;
    let mut values = args.between("pop", 1, 2)?;
    let default = if values.len() == 2 { values.pop() } else { None };
    let key = values.remove(0);
    let removed = dict.borrow_mut().remove(&key.hash_key()?);
    match (removed, default) {
        (Some((_, value)), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(key_error(key)),
    }
}

fn dict_update(interp: &mut Interpreter, receiver: &Value, mut args: CallArgs) -> Exec<Value> {
    let dict = receiver_dict(receiver)?;
    let keywords = std::mem::take(&mut args.keywords);
    let values = args.between("update", 0, 1)?;
    let mut pairs = match values.first() {
        Some(source) => interp.mapping_pairs(source)?,
        None => Vec::new(),
    };
    pairs.extend(keywords.into_iter().map(|(key, value)| (Value::str(key), value)));
    let mut hashed = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        hashed.push((key.hash_key()?, key, value));
    }
    let mut target = dict.borrow_mut();
    for (hash, key, value) in hashed {
        target.insert(hash, key, value)?;
    }
    Ok(Value::None)
}

fn dict_setdefault(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let dict = receiver_dict(receiver)?;
    let mut values = args.between("setdefault", 1, 2)?;
    let default = if values.len() == 2 { values.pop() } else { None }.unwrap_or(Value::None);
    let key = values.remove(0);
    let hash = key.hash_key()?;
    let existing = dict.borrow().get(&hash).cloned();
    match existing {
        Some(value) => Ok(value),
        None => {
            dict.borrow_mut().insert(hash, key, default.clone())?;
            Ok(default)
        }
    }
}

fn dict_clear(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("clear")?;
    receiver_dict(receiver)?.borrow_mut().clear();
    Ok(Value::None)
}

fn dict_copy(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("copy")?;
    Ok(copy_dict(&receiver_dict(receiver)?.borrow()))
}

// set

/// Any iterable as a set, for the set methods that take one.
fn as_set(interp: &mut Interpreter, value: &Value) -> Exec<Set> {
    if let Value::Set(set) = value {
        return Ok(set.borrow().copy());
    }
    let mut set = Set::new();
    for item in interp.collect(value)? {
        set.insert(item.hash_key()?, item)?;
    }
    Ok(set)
}

fn set_add(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    let [item] = args.exact("add")?;
    let hash = item.hash_key()?;
    set.borrow_mut().insert(hash, item)?;
    Ok(Value::None)
}

fn set_remove(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    let [item] = args.exact("remove")?;
    let removed = set.borrow_mut().remove(&item.hash_key()?);
    match removed {
        Some(_) => Ok(Value::None),
        None => Err(key_error(item)),
    }
}

fn set_discard(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    let [item] = args.exact("discard")?;
    let removed = set.borrow_mut().remove(&item.hash_key()?);
    drop(removed);
    Ok(Value::None)
}

fn set_pop(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    args.exact::<0>("pop")?;
    let popped = set.borrow_mut().pop_first();
    popped.ok_or_else(|| Interrupt::error(ExceptionKind::KeyError, "pop from an empty set"))
}

fn combine_all(interp: &mut Interpreter, receiver: &Value, args: CallArgs, name: &str) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    args.no_keywords(name)?;
    let mut result = set.borrow().copy();
    for other in &args.positional {
        let other = as_set(interp, other)?;
        result = set_combine(name, &result, &other)?;
    }
    Ok(Value::set(result))
}

fn set_union(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    combine_all(interp, receiver, args, "union")
}

fn set_intersection(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    combine_all(interp, receiver, args, "intersection")
}

fn set_difference(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    combine_all(interp, receiver, args, "difference")
}

fn set_symmetric_difference(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let [other] = args.exact("symmetric_difference")?;
    combine_all(interp, receiver, CallArgs::new(vec![other]), "symmetric_difference")
}

fn set_issubset(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    let [other] = args.exact("issubset")?;
    let other = as_set(interp, &other)?;
    let subset = set.borrow().keys().all(|key| other.contains(key));
    Ok(Value::Bool(subset))
}

fn set_issuperset(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    let [other] = args.exact("issuperset")?;
    let other = as_set(interp, &other)?;
    let own = set.borrow();
    let covered = other.keys().all(|key| own.contains(key));
    Ok(Value::Bool(covered))
}

fn set_clear(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("clear")?;
    receiver_set(receiver)?.borrow_mut().clear();
    Ok(Value::None)
}

fn set_copy(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("copy")?;
    let copy = receiver_set(receiver)?.borrow().copy();
    Ok(Value::set(copy))
}

fn set_update(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    let set = receiver_set(receiver)?;
    args.no_keywords("update")?;
    for other in &args.positional {
        let other = as_set(interp, other)?;
        let mut target = set.borrow_mut();
        for (key, value) in other.entries() {
            target.insert(key.clone(), value.clone())?;
        }
    }
    Ok(Value::None)
}

// numbers

fn int_bit_length(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("bit_length")?;
    let value = int_arg(receiver)?;
    Ok(Value::Int(64 - value.unsigned_abs().leading_zeros() as i64))
}

fn float_is_integer(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("is_integer")?;
    match receiver {
        Value::Float(f) => Ok(Value::Bool(f.is_finite() && f.fract() == 0.0)),
        other => type_error(format!("descriptor requires a 'float' object but received a '{}'", other.type_name())),
    }
}

// object

fn object_init(_: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    match receiver {
        Value::Instance(instance) if instance.class.exception_kind().is_some() => {
            args.no_keywords("__init__")?;
            *instance.args.borrow_mut() = Items::from(args.positional);
            Ok(Value::None)
        }
        _ if args.is_empty() => Ok(Value::None),
        _ => type_error("object.__init__() takes exactly one argument (the instance to initialize)"),
    }
}

fn object_str(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("__str__")?;
    match receiver {
        Value::Instance(instance) => match instance.class.exception_kind() {
            Some(kind) => {
                let items = instance.args.borrow().to_vec();
                text(interp.exception_text(kind.is_subclass_of(ExceptionKind::KeyError), &items)?)
            }
            None => text(interp.repr(receiver)?),
        },
        other => text(interp.to_str(other)?),
    }
}

fn object_repr(interp: &mut Interpreter, receiver: &Value, args: CallArgs) -> Exec<Value> {
    args.exact::<0>("__repr__")?;
    match receiver {
        Value::Instance(instance) if instance.class.exception_kind().is_some() => {
            let items = instance.args.borrow().to_vec();
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(interp.repr(item)?);
            }
            text(format!("{}({})", instance.class.name, parts.join(", ")))
        }
        Value::Instance(instance) => text(format!("<__main__.{} object>", instance.class.name)),
        other => text(interp.repr(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};
    use super::window;

    #[test]
    fn test_window_clamps_like_slices() {
        assert_eq!(window("hello", Some(1), Some(3)), Some((1, "el")));
        assert_eq!(window("hello", Some(-2), None), Some((3, "lo")));
        assert_eq!(window("héllo", Some(1), Some(100)), Some((1, "éllo")));
        assert_eq!(window("abc", Some(5), None), None);
        assert_eq!(window("abc", Some(2), Some(1)), None);
    }

    #[test]
    fn test_case_methods() {
        let source = "\
s = 'hello World'
print(s.upper(), s.lower(), s.title(), s.capitalize(), s.swapcase())
print('abc2def ghi'.title())
";
        assert_eq!(
            output(source),
            "HELLO WORLD hello world Hello World Hello world HELLO wORLD\nAbc2Def Ghi\n"
        );
    }

    #[test]
    fn test_split_and_join() {
        let source = "\
print('  a b  c '.split(), '  a b  c '.split(None, 1), '  a b  c '.rsplit(None, 1))
print('a,b,,c'.split(','), 'a,b,c'.split(',', 1), 'a,b,c'.rsplit(',', 1), ''.split())
print('-'.join(['x', 'y', 'z']), ''.join(reversed('abc')))
print('one\\ntwo\\r\\nthree'.splitlines(), 'x\\ny\\n'.splitlines(True))
";
        assert_eq!(
            output(source),
            "['a', 'b', 'c'] ['a', 'b  c '] ['  a b', 'c']\n\
['a', 'b', '', 'c'] ['a', 'b,c'] ['a,b', 'c'] []\n\
x-y-z cba\n\
['one', 'two', 'three'] ['x\\n', 'y\\n']\n"
        );
        assert_eq!(fault("'a b'.split('')"), "ValueError: empty separator");
        assert_eq!(
            fault("', '.join([1, 2])"),
            "TypeError: sequence item 0: expected str instance, int found"
        );
    }

    #[test]
    fn test_search_methods() {
        let source = "\
s = 'banana'
print(s.find('an'), s.rfind('an'), s.find('x'), s.index('n'), s.count('a'), s.count('an', 2))
print(s.startswith('ban'), s.endswith(('x', 'na')), s.find('a', -2), s.replace('a', 'o', 2))
print('x'.center(5, '*'), 'ab'.center(5), 'ab'.ljust(4, '.'), 'ab'.rjust(4), '-42'.zfill(6), '7'.zfill(3))
print(' \\t x \\n'.strip(), 'xxhixx'.strip('x'), '  a'.lstrip(), 'b  '.rstrip() + '|')
print('123'.isdigit(), 'abc'.isalpha(), 'a1'.isalnum(), '  '.isspace(), 'ABC'.isupper(), 'abc'.islower(), ''.isdigit())
";
        assert_eq!(
            output(source),
            "1 3 -1 2 3 1\nTrue True 5 bonona\n**x**   ab  ab..   ab -00042 007\nx hi a b|\nTrue True True True True True False\n"
        );
        assert_eq!(fault("'abc'.index('z')"), "ValueError: substring not found");
    }

    #[test]
    fn test_list_methods() {
        let source = "\
xs = [3, 1, 2]
xs.append(4)
xs.extend(range(2))
xs.insert(0, 9)
print(xs, xs.pop(), xs.pop(0), xs.index(2), xs.count(1))
xs.remove(1)
xs.sort()
print(xs)
xs.reverse()
ys = xs.copy()
xs.clear()
print(xs, ys)
words = ['pear', 'fig', 'apple']
words.sort(key=len, reverse=True)
print(words)
";
        assert_eq!(
            output(source),
            "[3, 1, 2, 4, 0] 1 9 2 1\n[0, 2, 3, 4]\n[] [4, 3, 2, 0]\n['apple', 'pear', 'fig']\n"
        );
        assert_eq!(fault("[].pop()"), "IndexError: pop from empty list");
        assert_eq!(fault("[1].remove(2)"), "ValueError: list.remove(x): x not in list");
        assert_eq!(fault("['a'].index('b')"), "ValueError: 'b' is not in list");
    }

    #[test]
    fn test_dict_methods() {
        let source = "\
d = {'a': 1}
print(d.get('a'), d.get('z'), d.get('z', 0), d.setdefault('b', 2), d.setdefault('a', 5))
d.update({'c': 3}, d=4)
d.update([('e', 5)])
print(d.keys(), d.values(), d.pop('a'), d.pop('zz', None))
for k, v in d.items():
    print(k, v, end='; ')
print()
e = d.copy()
d.clear()
print(d, len(e))
";
        assert_eq!(
            output(source),
            "1 None 0 2 1\n['a', 'b', 'c', 'd', 'e'] [1, 2, 3, 4, 5] 1 None\nb 2; c 3; d 4; e 5; \n{} 4\n"
        );
        assert_eq!(fault("{}.pop('k')"), "KeyError: 'k'");
    }

    #[test]
    fn test_set_methods() {
        let source = "\
s = {1, 2, 3}
s.add(4)
s.discard(10)
s.remove(1)
print(s, s.union([5]), s.intersection({2, 3, 9}), s.difference([2]), s.symmetric_difference({4, 6}))
print({1, 2}.issubset([1, 2, 3]), {1, 2}.issuperset({1}), s.pop(), s)
s.update([7], {8})
t = s.copy()
s.clear()
print(s, t)
";
        assert_eq!(
            output(source),
            "{2, 3, 4} {2, 3, 4, 5} {2, 3} {3, 4} {2, 3, 6}\nTrue True 2 {3, 4}\nset() {3, 4, 7, 8}\n"
        );
        assert_eq!(fault("set().pop()"), "KeyError: 'pop from an empty set'");
        assert_eq!(
            output("print({1, 2, 3}.issuperset([1, 3]), {1}.issuperset(range(3)), set().issuperset(''))"),
            "True False True\n"
        );
        assert_eq!(fault("{1}.remove(5)"), "KeyError: 5");
    }

    #[test]
    fn test_number_methods() {
        assert_eq!(
            output("print((255).bit_length(), (0).bit_length(), (2.0).is_integer(), (2.5).is_integer())"),
            "8 0 True False\n"
        );
    }

    #[test]
    fn test_super_reaches_object_methods() {
        let source = "\
class Point:
    def __init__(self, x):
        super().__init__()
        self.x = x
    def __repr__(self):
        return 'P(' + str(self.x) + ')'
    def __str__(self):
        return 'point ' + super().__str__()
class Oops(Exception):
    def __init__(self, code):
        super().__init__('code', code)
        self.code = code
print(Point(1), [Point(2)])
print(str(Oops(3)), repr(Oops(4)))
";
        assert_eq!(output(source), "point P(1) [P(2)]\n('code', 3) Oops('code', 4)\n");
    }
}
