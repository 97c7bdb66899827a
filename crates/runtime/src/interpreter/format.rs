//! Text conversion: `repr`, `str`, format specs, `%` and `str.format`.

use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec, Interrupt};
use super::ops::char_len;
use super::value::{IteratorObject, Value, MAX_STR_BYTES};
use super::Interpreter;

/// Python's `repr()` of a float: shortest round-trip digits, switching to
/// exponent notation below `1e-4` and from `1e16` up.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let scientific = format!("{:e}", value.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
        let point = exponent + 1;
        let text = if point <= 0 {
            format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
        } else if point as usize >= digits.len() {
            format!("{}{}.0", digits, "0".repeat(point as usize - digits.len()))
        } else {
            let (whole, fraction) = digits.split_at(point as usize);
            format!("{}.{}", whole, fraction)
        };
        format!("{}{}", sign, text)
    } else {
        format!("{}{}", sign, exponent_form(mantissa, exponent))
    }
}

/// `1.5e+16` style exponent with at least two digits.
fn exponent_form(mantissa: &str, exponent: i32) -> String {
    format!(
        "{}e{}{:02}",
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.unsigned_abs()
    )
}

/// Quote a string the way `repr()` does.
pub(crate) fn str_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if c.is_control() => match c as u32 {
                code @ 0..=0xff => out.push_str(&format!("\\x{:02x}", code)),
                code @ 0x100..=0xffff => out.push_str(&format!("\\u{:04x}", code)),
                code => out.push_str(&format!("\\U{:08x}", code)),
            },
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// `ascii()`: escape everything outside ASCII.
pub(crate) fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            code @ 0x80..=0xff => out.push_str(&format!("\\x{:02x}", code)),
            code @ 0x100..=0xffff => out.push_str(&format!("\\u{:04x}", code)),
            code => out.push_str(&format!("\\U{:08x}", code)),
        }
    }
    out
}

fn iterator_name(state: &IteratorObject) -> &'static str {
    match state {
        IteratorObject::List { .. } => "list_iterator",
        IteratorObject::Range { .. } => "range_iterator",
        IteratorObject::Enumerate { .. } => "enumerate",
        IteratorObject::Zip { .. } => "zip",
        IteratorObject::Map { .. } => "map",
        IteratorObject::Filter { .. } => "filter",
        IteratorObject::Generator(_) => "generator",
        IteratorObject::Snapshot { .. } | IteratorObject::Exhausted => "iterator",
    }
}

impl Interpreter {
    /// `repr(value)`
    pub(crate) fn repr(&mut self, value: &Value) -> Exec<String> {
        let mut open = Vec::new();
        self.repr_inner(value, &mut open)
    }

    /// `open` holds the containers currently being printed, so a container
    /// that contains itself prints as `[...]`.
    fn repr_inner(&mut self, value: &Value, open: &mut Vec<usize>) -> Exec<String> {
        if let (Some(id), Value::List(_) | Value::Dict(_) | Value::Set(_)) = (value.identity(), value) {
            if open.contains(&id) {
                return Ok(match value {
                    Value::List(_) => "[...]",
                    _ => "{...}",
                }
                .to_string());
            }
        }
        Ok(match value {
            Value::None => "None".to_string(),
            Value::Ellipsis => "Ellipsis".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => str_repr(s),
            Value::List(items) => {
                let items = items.borrow().to_vec();
                format!("[{}]", self.repr_items(value, &items, open)?)
            }
            Value::Tuple(items) => {
                let inner = self.repr_items(value, items, open)?;
                if items.len() == 1 {
                    format!("({},)", inner)
                } else {
                    format!("({})", inner)
                }
            }
            Value::Dict(dict) => {
                let entries: Vec<(Value, Value)> =
                    dict.borrow().entries().map(|(k, v)| (k.clone(), v.clone())).collect();
                open.extend(value.identity());
                let mut parts = Vec::with_capacity(entries.len());
                for (key, item) in &entries {
                    let key = self.nested(|interp| interp.repr_inner(key, open));
                    let item = key.and_then(|key| {
                        let item = self.nested(|interp| interp.repr_inner(item, open))?;
                        Ok(format!("{}: {}", key, item))
                    });
                    match item {
                        Ok(part) => parts.push(part),
                        Err(err) => {
                            open.pop();
                            return Err(err);
                        }
                    }
                }
                open.pop();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(set) => {
                let members = set.borrow().values();
                if members.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", self.repr_items(value, &members, open)?)
                }
            }
            Value::Range(range) => {
                if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Iterator(state) => format!("<{} object>", iterator_name(&state.borrow())),
            Value::Function(function) => format!("<function {}>", function.qualname),
            Value::BoundMethod(bound) => format!("<bound method {}>", bound.function.qualname),
            Value::NativeMethod(method) => format!(
                "<built-in method {} of {} object>",
                method.method.name,
                method.receiver.type_name()
            ),
            Value::Builtin(native) => format!("<built-in function {}>", native.name),
            Value::Type(kind) => format!("<class '{}'>", kind.name()),
            Value::ExceptionType(kind) => format!("<class '{}'>", kind.name()),
            Value::Class(class) => format!("<class '__main__.{}'>", class.name),
            Value::Module(module) => format!("<module '{}' (built-in)>", module.kind.name()),
            Value::Super(proxy) => format!("<super: <class '{}'>>", proxy.class.name),
            Value::Exception(exc) => {
                let args = exc.args.to_vec();
                format!("{}({})", exc.kind.name(), self.repr_items(value, &args, open)?)
            }
            Value::Instance(instance) => {
                if let Some(method) = instance.class.lookup("__repr__") {
                    return self.text_method(&method, value, "__repr__");
                }
                if instance.class.exception_kind().is_some() {
                    let args = instance.args.borrow().to_vec();
                    format!("{}({})", instance.class.name, self.repr_items(value, &args, open)?)
                } else {
                    format!("<__main__.{} object>", instance.class.name)
                }
            }
        })
    }

    fn repr_items(&mut self, container: &Value, items: &[Value], open: &mut Vec<usize>) -> Exec<String> {
        open.extend(container.identity());
        let mut parts = Vec::with_capacity(items.len());
        let mut total = 0;
        for item in items {
            let part = match self.nested(|interp| interp.repr_inner(item, open)) {
                Ok(part) => part,
                Err(err) => {
                    open.pop();
                    return Err(err);
                }
            };
            total += part.len() + 2;
            if total > MAX_STR_BYTES {
                open.pop();
                return fail(ExceptionKind::MemoryError, "repr is too large");
            }
            parts.push(part);
        }
        open.pop();
        Ok(parts.join(", "))
    }

    /// Call a user `__str__` / `__repr__` and check it produced text.
    fn text_method(&mut self, method: &Value, receiver: &Value, name: &str) -> Exec<String> {
        match self.call(method, CallArgs::new(vec![receiver.clone()]))? {
            Value::Str(text) => Ok(text.to_string()),
            other => type_error(format!("{} returned non-string (type {})", name, other.type_name())),
        }
    }

    /// `str(value)`
    pub(crate) fn to_str(&mut self, value: &Value) -> Exec<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Exception(exc) => {
                let args = exc.args.to_vec();
                self.exception_text(exc.kind == ExceptionKind::KeyError, &args)
            }
            Value::Instance(instance) => {
                if let Some(method) = instance.class.lookup("__str__") {
                    return self.text_method(&method, value, "__str__");
                }
                if let Some(kind) = instance.class.exception_kind() {
                    let args = instance.args.borrow().to_vec();
                    return self.exception_text(kind.is_subclass_of(ExceptionKind::KeyError), &args);
                }
                self.repr(value)
            }
            other => self.repr(other),
        }
    }

    /// `str()` of an exception: its only argument, or the tuple of all of them.
    pub(crate) fn exception_text(&mut self, quote_single: bool, args: &[Value]) -> Exec<String> {
        match args {
            [] => Ok(String::new()),
            [single] if quote_single => self.repr(single),
            [single] => self.to_str(single),
            many => self.repr(&Value::tuple(many.to_vec())),
        }
    }

    /// `format(value, spec)`
    pub(crate) fn format_value(&mut self, value: &Value, spec: &str) -> Exec<String> {
        if let Value::Instance(instance) = value {
            if let Some(method) = instance.class.lookup("__format__") {
                let result = self.call(&method, CallArgs::new(vec![value.clone(), Value::str(spec)]))?;
                return match result {
                    Value::Str(text) => Ok(text.to_string()),
                    other => type_error(format!("__format__ must return a str, not {}", other.type_name())),
                };
            }
        }
        if spec.is_empty() {
            return self.to_str(value);
        }
        let parsed = FormatSpec::parse(spec)?;
        match value {
            Value::Str(text) => parsed.format_str(text),
            Value::Bool(b) if parsed.kind.is_none() => parsed.format_str(if *b { "True" } else { "False" }),
            Value::Int(_) | Value::Bool(_) => {
                let Value::Int(i) = coerce_int(value) else {
                    return type_error("integer expected");
                };
                parsed.format_int(i)
            }
            Value::Float(f) => parsed.format_float(*f),
            other => type_error(format!(
                "unsupported format string passed to {}.__format__",
                other.type_name()
            )),
        }
    }

    /// `template % args`
    pub(crate) fn percent_format(&mut self, template: &str, args: &Value) -> Exec<String> {
        let positional: Vec<Value> = match args {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        };
        let mapping = matches!(args, Value::Dict(_));
        let mut next = 0;
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut key = None;
            if chars.peek() == Some(&'(') {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(')') => break,
                        Some(c) => name.push(c),
                        None => return value_error("incomplete format key"),
                    }
                }
                key = Some(name);
            }

            let mut spec = FormatSpec::default();
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => spec.align = Some('<'),
                    '+' => spec.sign = '+',
                    ' ' if spec.sign != '+' => spec.sign = ' ',
                    ' ' => {}
                    '0' => spec.zero = true,
                    '#' => spec.alternate = true,
                    _ => break,
                }
                chars.next();
            }
            if spec.zero && spec.align.is_none() {
                spec.fill = '0';
                spec.align = Some('=');
            }
            if chars.peek() == Some(&'*') {
                chars.next();
                let width = positional.get(next).cloned();
                next += 1;
                match width {
                    Some(Value::Int(w)) => spec.width = w.unsigned_abs() as usize,
                    _ => return type_error("* wants int"),
                }
            } else {
                spec.width = take_number(&mut chars).unwrap_or(0);
            }
            if chars.peek() == Some(&'.') {
                chars.next();
                spec.precision = Some(take_number(&mut chars).unwrap_or(0));
            }
            let Some(conversion) = chars.next() else {
                return value_error("incomplete format");
            };
            if conversion == '%' {
                out.push('%');
                continue;
            }

            let value = match (&key, args) {
                (Some(name), Value::Dict(dict)) => {
                    let found = dict.borrow().get(&Value::str(name.as_str()).hash_key()?).cloned();
                    match found {
                        Some(value) => value,
                        None => return Err(key_error(name)),
                    }
                }
                (Some(_), _) => return type_error("format requires a mapping"),
                (None, _) if mapping => args.clone(),
                (None, _) => {
                    let Some(value) = positional.get(next).cloned() else {
                        return type_error("not enough arguments for format string");
                    };
                    next += 1;
                    value
                }
            };

            let text = match conversion {
                's' => spec.format_str(&self.to_str(&value)?)?,
                'r' => spec.format_str(&self.repr(&value)?)?,
                'a' => spec.format_str(&ascii_escape(&self.repr(&value)?))?,
                'd' | 'i' | 'u' => match number_for_percent(&value, conversion)? {
                    Value::Float(f) => {
                        if !f.is_finite() {
                            return fail(ExceptionKind::OverflowError, "cannot convert float infinity to integer");
                        }
                        spec.format_int(f.trunc() as i64)?
                    }
                    other => match coerce_int(&other) {
                        Value::Int(i) => spec.format_int(i)?,
                        _ => return type_error("integer expected"),
                    },
                },
                'x' | 'X' | 'o' => match coerce_int(&value) {
                    Value::Int(i) => {
                        let spec = FormatSpec {
                            kind: Some(conversion),
                            ..spec
                        };
                        spec.format_int(i)?
                    }
                    other => {
                        return type_error(format!(
                            "%{} format: an integer is required, not {}",
                            conversion,
                            other.type_name()
                        ))
                    }
                },
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                    let number = match number_for_percent(&value, conversion)? {
                        Value::Float(f) => f,
                        Value::Int(i) => i as f64,
                        Value::Bool(b) => b as i64 as f64,
                        _ => 0.0,
                    };
                    let spec = FormatSpec {
                        kind: Some(conversion),
                        precision: Some(spec.precision.unwrap_or(6)),
                        ..spec
                    };
                    spec.format_float(number)?
                }
                'c' => match &value {
                    Value::Int(code) => spec.format_str(&char_from_code(*code)?.to_string())?,
                    Value::Str(s) if char_len(s) == 1 => spec.format_str(s)?,
                    _ => return type_error("%c requires an int or a unicode character"),
                },
                other => {
                    return value_error(format!(
                        "unsupported format character '{}' (0x{:x})",
                        other, other as u32
                    ))
                }
            };
            out.push_str(&text);
            if out.len() > MAX_STR_BYTES {
                return fail(ExceptionKind::MemoryError, "string is too large");
            }
        }

        if !mapping && next < positional.len() {
            return type_error("not all arguments converted during string formatting");
        }
        Ok(out)
    }

    /// `template.format(*args, **kwargs)`
    pub(crate) fn str_format(&mut self, template: &str, args: &CallArgs) -> Exec<String> {
        let mut auto = AutoNumber::Unset;
        self.str_format_inner(template, args, &mut auto, 0)
    }

    fn str_format_inner(&mut self, template: &str, args: &CallArgs, auto: &mut AutoNumber, depth: usize) -> Exec<String> {
        if depth > 2 {
            return value_error("Max string recursion exceeded");
        }
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return value_error("Single '}' encountered in format string"),
                '{' => {
                    let mut field = String::new();
                    let mut level = 1;
                    loop {
                        match chars.next() {
                            Some('{') => {
                                level += 1;
                                field.push('{');
                            }
                            Some('}') => {
                                level -= 1;
                                if level == 0 {
                                    break;
                                }
                                field.push('}');
                            }
                            Some(c) => field.push(c),
                            None => return value_error("expected '}' before end of string"),
                        }
                    }
                    let text = self.replacement_field(&field, args, auto, depth)?;
                    out.push_str(&text);
                    if out.len() > MAX_STR_BYTES {
                        return fail(ExceptionKind::MemoryError, "string is too large");
                    }
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }

    fn replacement_field(&mut self, field: &str, args: &CallArgs, auto: &mut AutoNumber, depth: usize) -> Exec<String> {
        let (head, spec) = match field.find(':') {
            Some(at) => (&field[..at], &field[at + 1..]),
            None => (field, ""),
        };
        let (name, conversion) = match head.find('!') {
            Some(at) => {
                let conversion = &head[at + 1..];
                let mut conv_chars = conversion.chars();
                match (conv_chars.next(), conv_chars.next()) {
                    (Some(c @ ('r' | 's' | 'a')), None) => (&head[..at], Some(c)),
                    _ => return value_error("Unknown conversion specifier"),
                }
            }
            None => (head, None),
        };

        let first_end = name.find(['.', '[']).unwrap_or(name.len());
        let (first, mut rest) = name.split_at(first_end);
        let mut value = if first.is_empty() {
            let index = auto.next()?;
            positional_arg(args, index)?
        } else if let Ok(index) = first.parse::<usize>() {
            auto.manual()?;
            positional_arg(args, index)?
        } else {
            match args.keywords.iter().find(|(key, _)| key == first) {
                Some((_, value)) => value.clone(),
                None => return Err(key_error(first)),
            }
        };

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                let attr = &after[..end];
                if attr.starts_with('_') {
                    return fail(
                        ExceptionKind::AttributeError,
                        format!("'{}' object has no attribute '{}'", value.type_name(), attr),
                    );
                }
                value = self.get_attribute(&value, attr)?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(end) = after.find(']') else {
                    return value_error("Missing ']' in format string");
                };
                let key = &after[..end];
                let index = match key.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::str(key),
                };
                value = self.get_item(&value, &index)?;
                rest = &after[end + 1..];
            } else {
                return value_error("Only '.' or '[' may follow ']' in format field specifier");
            }
        }

        let value = match conversion {
            Some('r') => Value::str(self.repr(&value)?),
            Some('a') => Value::str(ascii_escape(&self.repr(&value)?)),
            Some(_) => Value::str(self.to_str(&value)?),
            None => value,
        };
        let spec = if spec.contains('{') {
            self.str_format_inner(spec, args, auto, depth + 1)?
        } else {
            spec.to_string()
        };
        self.format_value(&value, &spec)
    }
}

/// Field numbering mode of one `str.format` call.
enum AutoNumber {
    Unset,
    Auto(usize),
    Manual,
}

impl AutoNumber {
    fn next(&mut self) -> Exec<usize> {
        match self {
            AutoNumber::Unset => {
                *self = AutoNumber::Auto(1);
                Ok(0)
            }
            AutoNumber::Auto(next) => {
                let index = *next;
                *next += 1;
                Ok(index)
            }
            AutoNumber::Manual => value_error("cannot switch from manual field specification to automatic field numbering"),
        }
    }

    fn manual(&mut self) -> Exec<()> {
        match self {
            AutoNumber::Auto(_) => value_error("cannot switch from automatic field numbering to manual field specification"),
            _ => {
                *self = AutoNumber::Manual;
                Ok(())
            }
        }
    }
}

fn positional_arg(args: &CallArgs, index: usize) -> Exec<Value> {
    args.positional.get(index).cloned().ok_or_else(|| {
        Interrupt::error(
            ExceptionKind::IndexError,
            format!("Replacement index {} out of range for positional args tuple", index),
        )
    })
}

fn key_error(name: &str) -> Interrupt {
    Interrupt::raised(Value::Exception(std::rc::Rc::new(super::value::ExceptionObject::new(
        ExceptionKind::KeyError,
        super::value::Items::from(vec![Value::str(name)]),
    ))))
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut number: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        number = Some(number.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
    }
    number
}

fn coerce_int(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Int(*b as i64),
        other => other.clone(),
    }
}

fn number_for_percent(value: &Value, conversion: char) -> Exec<Value> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => Ok(value.clone()),
        other => type_error(format!(
            "%{} format: a real number is required, not {}",
            conversion,
            other.type_name()
        )),
    }
}

pub(crate) fn char_from_code(code: i64) -> Exec<char> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| Interrupt::error(ExceptionKind::ValueError, "chr() arg not in range(0x110000)"))
}

/// Parsed format spec: `[[fill]align][sign][#][0][width][,|_][.precision][type]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

impl FormatSpec {
    pub(crate) fn parse(spec: &str) -> Exec<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&sign @ ('+' | '-' | ' ')) = chars.get(i) {
            parsed.sign = sign;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            parsed.width = digits.parse().map_err(|_| too_large())?;
        }
        if let Some(&group @ (',' | '_')) = chars.get(i) {
            parsed.grouping = Some(group);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return value_error("Format specifier missing precision");
            }
            let digits: String = chars[start..i].iter().collect();
            parsed.precision = Some(digits.parse().map_err(|_| too_large())?);
        }
        match &chars[i..] {
            [] => {}
            [kind] => parsed.kind = Some(*kind),
            _ => return value_error("Invalid format specifier"),
        }
        if parsed.width > MAX_STR_BYTES || parsed.precision.is_some_and(|p| p > MAX_STR_BYTES) {
            return Err(too_large());
        }
        if parsed.zero && parsed.align.is_none() {
            parsed.fill = '0';
            parsed.align = Some('=');
        }
        Ok(parsed)
    }

    fn pad(&self, sign: &str, body: &str, default_align: char) -> String {
        let len = char_len(sign) + char_len(body);
        if len >= self.width {
            return format!("{}{}", sign, body);
        }
        let padding = self.width - len;
        let fill = |n: usize| self.fill.to_string().repeat(n);
        match self.align.unwrap_or(default_align) {
            '<' => format!("{}{}{}", sign, body, fill(padding)),
            '^' => format!("{}{}{}{}", fill(padding / 2), sign, body, fill(padding - padding / 2)),
            '=' => format!("{}{}{}", sign, fill(padding), body),
            _ => format!("{}{}{}", fill(padding), sign, body),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }

    pub(crate) fn format_str(&self, text: &str) -> Exec<String> {
        match self.kind {
            None | Some('s') => {}
            Some(kind) => {
                return value_error(format!("Unknown format code '{}' for object of type 'str'", kind));
            }
        }
        if self.sign != '-' {
            return value_error("Sign not allowed in string format specifier");
        }
        if self.align == Some('=') {
            return value_error("'=' alignment not allowed in string format specifier");
        }
        let text: String = match self.precision {
            Some(precision) => text.chars().take(precision).collect(),
            None => text.to_string(),
        };
        Ok(self.pad("", &text, '<'))
    }

    pub(crate) fn format_int(&self, value: i64) -> Exec<String> {
        let magnitude = value.unsigned_abs();
        let (prefix, digits) = match self.kind {
            None | Some('d') | Some('n') => ("", group_digits(&magnitude.to_string(), self.grouping)),
            Some('b') => ("0b", format!("{:b}", magnitude)),
            Some('o') => ("0o", format!("{:o}", magnitude)),
            Some('x') => ("0x", format!("{:x}", magnitude)),
            Some('X') => ("0X", format!("{:X}", magnitude)),
            Some('c') => {
                let c = char_from_code(value)?;
                return Ok(self.pad("", &c.to_string(), '>'));
            }
            Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return self.format_float(value as f64),
            Some(kind) => {
                return value_error(format!("Unknown format code '{}' for object of type 'int'", kind));
            }
        };
        if self.precision.is_some() {
            return value_error("Precision not allowed in integer format specifier");
        }
        let prefix = if self.alternate { prefix } else { "" };
        let sign = format!("{}{}", self.sign_for(value < 0), prefix);
        Ok(self.pad(&sign, &digits, '>'))
    }

    pub(crate) fn format_float(&self, value: f64) -> Exec<String> {
        let negative = value.is_sign_negative() && !value.is_nan();
        let magnitude = value.abs();
        let body = if !magnitude.is_finite() {
            let text = if magnitude.is_nan() { "nan" } else { "inf" };
            match self.kind {
                Some('E' | 'F' | 'G') => text.to_uppercase(),
                Some('%') => format!("{}%", text),
                _ => text.to_string(),
            }
        } else {
            match self.kind {
                Some('f' | 'F') => group_fixed(&format!("{:.*}", self.precision.unwrap_or(6), magnitude), self.grouping),
                Some('e' | 'E') => {
                    let text = scientific(magnitude, self.precision.unwrap_or(6));
                    if self.kind == Some('E') {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
                Some('g' | 'G') => {
                    let text = general(magnitude, self.precision.unwrap_or(6), self.alternate);
                    if self.kind == Some('G') {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
                Some('%') => format!(
                    "{}%",
                    group_fixed(&format!("{:.*}", self.precision.unwrap_or(6), magnitude * 100.0), self.grouping)
                ),
                None => match self.precision {
                    Some(precision) => {
                        let text = general(magnitude, precision, self.alternate);
                        if text.contains(['.', 'e']) {
                            text
                        } else {
                            format!("{}.0", text)
                        }
                    }
                    None => group_fixed(&float_repr(magnitude), self.grouping),
                },
                Some(kind) => {
                    return value_error(format!("Unknown format code '{}' for object of type 'float'", kind));
                }
            }
        };
        Ok(self.pad(self.sign_for(negative), &body, '>'))
    }
}

fn too_large() -> Interrupt {
    Interrupt::error(ExceptionKind::ValueError, "Too many decimal digits in format string")
}

/// `{:e}` with a fixed number of digits and a Python style exponent.
fn scientific(value: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    exponent_form(mantissa, exponent.parse().unwrap_or(0))
}

/// The `g` presentation: fixed or exponent form depending on magnitude,
/// trailing zeros removed.
fn general(value: f64, precision: usize, keep_zeros: bool) -> String {
    let precision = precision.max(1);
    if value == 0.0 {
        return if keep_zeros {
            format!("{:.*}", precision - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let rounded = format!("{:.*e}", precision - 1, value);
    let exponent: i64 = rounded
        .split_once('e')
        .and_then(|(_, exponent)| exponent.parse().ok())
        .unwrap_or(0);
    if exponent < -4 || exponent >= precision as i64 {
        let (mantissa, _) = rounded.split_once('e').unwrap_or((rounded.as_str(), ""));
        let mantissa = if keep_zeros { mantissa.to_string() } else { strip_zeros(mantissa) };
        exponent_form(&mantissa, exponent as i32)
    } else {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        if keep_zeros {
            fixed
        } else {
            strip_zeros(&fixed)
        }
    }
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn group_digits(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

/// Group the integer part of a fixed-point number.
fn group_fixed(text: &str, separator: Option<char>) -> String {
    if separator.is_none() {
        return text.to_string();
    }
    match text.split_once('.') {
        Some((whole, fraction)) => format!("{}.{}", group_digits(whole, separator), fraction),
        None => group_digits(text, separator),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(3.0), "3.0");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(123.456), "123.456");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_str_repr_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb\\"), "'a\\nb\\\\'");
        assert_eq!(str_repr("both ' and \""), "'both \\' and \"'");
    }

    #[test]
    fn test_format_spec() {
        let spec = |s: &str| FormatSpec::parse(s).unwrap();
        assert_eq!(spec(">8").format_str("ab").unwrap(), "      ab");
        assert_eq!(spec("*^7").format_str("ab").unwrap(), "**ab***");
        assert_eq!(spec("05d").format_int(-42).unwrap(), "-0042");
        assert_eq!(spec(",").format_int(1234567).unwrap(), "1,234,567");
        assert_eq!(spec("#x").format_int(255).unwrap(), "0xff");
        assert_eq!(spec("08b").format_int(5).unwrap(), "00000101");
        assert_eq!(spec(".2f").format_float(3.14159).unwrap(), "3.14");
        assert_eq!(spec("+.1f").format_float(2.0).unwrap(), "+2.0");
        assert_eq!(spec(".3e").format_float(12345.678).unwrap(), "1.235e+04");
        assert_eq!(spec("g").format_float(0.00001234).unwrap(), "1.234e-05");
        assert_eq!(spec("g").format_float(1234.5).unwrap(), "1234.5");
        assert_eq!(spec(".1%").format_float(0.256).unwrap(), "25.6%");
        assert_eq!(spec(",.2f").format_float(1234567.891).unwrap(), "1,234,567.89");
        assert!(FormatSpec::parse("abc").is_err());
    }

    #[test]
    fn test_str_and_repr_of_values() {
        let source = "\
print(str(1.0), repr('x'), [1.5, 'a', None, True], (1,), {}, set(), {'k': (1, 2)})
print(range(3), range(0, 10, 2), str(ValueError('bad')), repr(ValueError('bad')))
print(str(KeyError('k')), repr(Exception()), str(Exception(1, 2)))
def f():
    pass
class A:
    pass
print(f, A, type(1), len)
";
        assert_eq!(
            output(source),
            "1.0 'x' [1.5, 'a', None, True] (1,) {} set() {'k': (1, 2)}\n\
             range(0, 3) range(0, 10, 2) bad ValueError('bad')\n\
             'k' Exception() (1, 2)\n\
             <function f> <class '__main__.A'> <class 'int'> <built-in function len>\n"
        );
    }

    #[test]
    fn test_user_str_and_repr() {
        let source = "\
class P:
    def __init__(self, x):
        self.x = x
    def __repr__(self):
        return f'P({self.x})'
class Q(P):
    def __str__(self):
        return 'q'
print(P(1), [P(2)], Q(3), [Q(4)], str(P(5)))
";
        assert_eq!(output(source), "P(1) [P(2)] q [P(4)] P(5)\n");
        assert_eq!(
            fault("class B:\n    def __str__(self):\n        return 1\nprint(B())"),
            "TypeError: __str__ returned non-string (type int)"
        );
    }

    #[test]
    fn test_recursive_containers() {
        assert_eq!(output("a = [1]\na.append(a)\nprint(a)\nd = {}\nd['d'] = d\nprint(d)"), "[1, [...]]\n{'d': {...}}\n");
    }

    #[test]
    fn test_percent_formatting() {
        let source = "\
print('%s is %d years, %.2f m' % ('Ana', 30, 1.756))
print('%5s|%-5s|%03d|%x|%r|%%' % ('a', 'b', 7, 255, 'q'))
print('%(name)s=%(value)d' % {'name': 'n', 'value': 3})
print('%s' % [1, 2])
";
        assert_eq!(
            output(source),
            "Ana is 30 years, 1.76 m\n    a|b    |007|ff|'q'|%\nn=3\n[1, 2]\n"
        );
        assert_eq!(fault("'%d %d' % (1,)"), "TypeError: not enough arguments for format string");
        assert_eq!(
            fault("'%d' % (1, 2)"),
            "TypeError: not all arguments converted during string formatting"
        );
        assert_eq!(fault("'%d' % 'x'"), "TypeError: %d format: a real number is required, not str");
    }

    #[test]
    fn test_str_format() {
        let source = "\
print('{} + {} = {}'.format(1, 2, 3))
print('{0}{1}{0}'.format('a', 'b'), '{name:>6}'.format(name='x'), '{:.{}f}'.format(3.14159, 2))
print('{{}} {0[1]} {1[k]}'.format([5, 6], {'k': 'v'}))
print(format(0.5, '.0%'), format(42, 'b'), format('x', '^5'), format(True), format(3.0, '.2'))
";
        assert_eq!(output(source), "1 + 2 = 3\naba      x 3.14\n{} 6 v\n50% 101010   x   True 3.0\n");
        assert_eq!(
            fault("'{} {}'.format(1)"),
            "IndexError: Replacement index 1 out of range for positional args tuple"
        );
        assert_eq!(fault("'{x}'.format(y=1)"), "KeyError: 'x'");
        assert_eq!(
            fault("'{0} {}'.format(1, 2)"),
            "ValueError: cannot switch from manual field specification to automatic field numbering"
        );
    }
}
