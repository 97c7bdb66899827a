//! The `json` module.
//!
//! Text is decoded with `serde_json`. Encoding walks the value itself so the
//! output matches what CPython prints: its separators, its indentation and
//! its float formatting. String escaping is left to `serde_json`.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use super::call::CallArgs;
use super::exceptions::{fail, type_error, value_error, ExceptionKind, Exec};
use super::format::float_repr;
use super::ops::check_str_len;
use super::value::{Dict, Value};
use super::Interpreter;

/// Escapes every character outside printable ASCII, as `ensure_ascii` does.
struct AsciiFormatter {
    ensure_ascii: bool,
}

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if !self.ensure_ascii {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Options of one `dumps` call.
struct Encoder {
    indent: Option<String>,
    item_separator: String,
    key_separator: String,
    sort_keys: bool,
    ensure_ascii: bool,
    /// Identities of the containers being encoded
    open: Vec<usize>,
    out: Vec<u8>,
}

impl Encoder {
    fn string(&mut self, text: &str) -> Exec<()> {
        let mut serializer = serde_json::Serializer::with_formatter(
            &mut self.out,
            AsciiFormatter {
                ensure_ascii: self.ensure_ascii,
            },
        );
        text.serialize(&mut serializer)
            .or_else(|err| fail(ExceptionKind::ValueError, err.to_string()))
    }

    fn newline(&mut self, depth: usize) {
        if let Some(indent) = &self.indent {
            self.out.push(b'\n');
            for _ in 0..depth {
                self.out.extend_from_slice(indent.as_bytes());
            }
        }
    }

    fn float(&mut self, f: f64) {
        let text = if f.is_nan() {
            "NaN".to_string()
        } else if f.is_infinite() {
            if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        } else {
            float_repr(f)
        };
        self.out.extend_from_slice(text.as_bytes());
    }

    fn enter(&mut self, value: &Value) -> Exec<()> {
        if let Some(id) = value.identity() {
            if self.open.contains(&id) {
                return value_error("Circular reference detected");
            }
            self.open.push(id);
        }
        Ok(())
    }

    fn leave(&mut self, value: &Value) {
        if value.identity().is_some() {
            self.open.pop();
        }
    }

    fn encode(&mut self, interp: &mut Interpreter, value: &Value, depth: usize) -> Exec<()> {
        interp.checkpoint()?;
        check_str_len(self.out.len())?;
        match value {
            Value::None => self.out.extend_from_slice(b"null"),
            Value::Bool(true) => self.out.extend_from_slice(b"true"),
            Value::Bool(false) => self.out.extend_from_slice(b"false"),
            Value::Int(i) => self.out.extend_from_slice(i.to_string().as_bytes()),
            Value::Float(f) => self.float(*f),
            Value::Str(text) => self.string(text)?,
            Value::List(items) => {
                let items = items.borrow().to_vec();
                self.enter(value)?;
                interp.nested(|interp| self.sequence(interp, &items, depth))?;
                self.leave(value);
            }
            Value::Tuple(items) => {
                let items = items.to_vec();
                interp.nested(|interp| self.sequence(interp, &items, depth))?;
            }
            Value::Dict(dict) => {
                let entries = self.entries(&dict.borrow())?;
                self.enter(value)?;
                interp.nested(|interp| self.object(interp, entries, depth))?;
                self.leave(value);
            }
            other => {
                return type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                ))
            }
        }
        Ok(())
    }

    fn sequence(&mut self, interp: &mut Interpreter, items: &[Value], depth: usize) -> Exec<()> {
        if items.is_empty() {
            self.out.extend_from_slice(b"[]");
            return Ok(());
        }
        self.out.push(b'[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                let separator = self.item_separator.clone();
                self.out.extend_from_slice(separator.as_bytes());
            }
            self.newline(depth + 1);
            self.encode(interp, item, depth + 1)?;
        }
        self.newline(depth);
        self.out.push(b']');
        Ok(())
    }

    /// Dict entries with their keys already turned into JSON object keys.
    fn entries(&self, dict: &Dict) -> Exec<Vec<(String, Value)>> {
        let mut entries = Vec::with_capacity(dict.len());
        for (key, value) in dict.entries() {
            let key = match key {
                Value::Str(text) => text.to_string(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => float_repr(*f),
                Value::Bool(b) => b.to_string(),
                Value::None => "null".to_string(),
                other => {
                    return type_error(format!(
                        "keys must be str, int, float, bool or None, not {}",
                        other.type_name()
                    ))
                }
            };
            entries.push((key, value.clone()));
        }
        if self.sort_keys {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(entries)
    }

    fn object(&mut self, interp: &mut Interpreter, entries: Vec<(String, Value)>, depth: usize) -> Exec<()> {
        if entries.is_empty() {
            self.out.extend_from_slice(b"{}");
            return Ok(());
        }
        self.out.push(b'{');
        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                let separator = self.item_separator.clone();
                self.out.extend_from_slice(separator.as_bytes());
            }
            self.newline(depth + 1);
            self.string(key)?;
            let separator = self.key_separator.clone();
            self.out.extend_from_slice(separator.as_bytes());
            self.encode(interp, value, depth + 1)?;
        }
        self.newline(depth);
        self.out.push(b'}');
        Ok(())
    }
}

/// `json.dumps(obj, *, indent=None, separators=None, sort_keys=False, ensure_ascii=True)`
pub(crate) fn dumps(interp: &mut Interpreter, mut args: CallArgs) -> Exec<Value> {
    let indent = match args.take_keyword("indent") {
        None | Some(Value::None) => None,
        Some(Value::Int(n)) => Some(" ".repeat(usize::try_from(n).unwrap_or(0).min(64))),
        Some(Value::Str(text)) => Some(text.to_string()),
        Some(other) => return type_error(format!("indent must be int or str, not {}", other.type_name())),
    };
    let separators = args.take_keyword("separators");
    let sort_keys = match args.take_keyword("sort_keys") {
        Some(flag) => interp.truthy(&flag)?,
        None => false,
    };
    let ensure_ascii = match args.take_keyword("ensure_ascii") {
        Some(flag) => interp.truthy(&flag)?,
        None => true,
    };
    let [value] = args.exact("dumps")?;

    let (item_separator, key_separator) = match separators {
        None | Some(Value::None) => {
            let item = if indent.is_some() { "," } else { ", " };
            (item.to_string(), ": ".to_string())
        }
        Some(other) => {
            let pair = interp.collect(&other)?;
            match pair.as_slice() {
                [Value::Str(item), Value::Str(key)] => (item.to_string(), key.to_string()),
                _ => return value_error("separators must be a pair of strings"),
            }
        }
    };

    let mut encoder = Encoder {
        indent,
        item_separator,
        key_separator,
        sort_keys,
        ensure_ascii,
        open: Vec::new(),
        out: Vec::new(),
    };
    encoder.encode(interp, &value, 0)?;
    check_str_len(encoder.out.len())?;
    match String::from_utf8(encoder.out) {
        Ok(text) => Ok(Value::str(text)),
        Err(err) => fail(ExceptionKind::ValueError, err.to_string()),
    }
}

/// `json.loads(text)`
pub(crate) fn loads(interp: &mut Interpreter, args: CallArgs) -> Exec<Value> {
    let [text] = args.exact("loads")?;
    let Value::Str(text) = &text else {
        return type_error(format!(
            "the JSON object must be str, bytes or bytearray, not {}",
            text.type_name()
        ));
    };
    let parsed: serde_json::Value = serde_json::from_str(text)
        .or_else(|err| value_error(format!("Expecting value: {}", err)))?;
    interp.nested(|interp| from_json(interp, parsed))
}

fn from_json(interp: &mut Interpreter, json: serde_json::Value) -> Exec<Value> {
    interp.checkpoint()?;
    Ok(match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(_)) if number.is_u64() => return fail(ExceptionKind::OverflowError, "integer overflow"),
            (None, Some(f)) => Value::Float(f),
            (None, None) => return value_error(format!("invalid number {}", number)),
        },
        serde_json::Value::String(text) => Value::str(text),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(interp.nested(|interp| from_json(interp, item))?);
            }
            Value::list(values)
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (key, item) in map {
                let key = Value::str(key);
                let item = interp.nested(|interp| from_json(interp, item))?;
                dict.insert(key.hash_key()?, key, item)?;
            }
            Value::dict(dict)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault, output};

    #[test]
    fn test_dumps_output_is_capped() {
        let source = "import json\ns = 'x' * 10000000\njson.dumps([s, s])";
        assert_eq!(fault(source), "MemoryError: string is too large");
        let source = "import json\ns = 'x' * 10000000\nprint(len(json.dumps(s)))";
        assert_eq!(output(source), "10000002\n");
    }

    #[test]
    fn test_dumps_matches_python_layout() {
        let source = "\
import json
data = {'name': 'Ana', 'scores': [9.5, 10, None], 'ok': True, 1: 'one'}
print(json.dumps(data))
print(json.dumps([1, (2, 3)], separators=(',', ':')))
print(json.dumps({'b': 1, 'a': [1, 2]}, indent=2, sort_keys=True))
print(json.dumps('olá\\n'), json.dumps('olá', ensure_ascii=False), json.dumps({}), json.dumps([], indent=4))
print(json.dumps(float('nan')), json.dumps(1e16), json.dumps(0.1))
";
        assert_eq!(
            output(source),
            "{\"name\": \"Ana\", \"scores\": [9.5, 10, null], \"ok\": true, \"1\": \"one\"}\n\
[1,[2,3]]\n\
{\n  \"a\": [\n    1,\n    2\n  ],\n  \"b\": 1\n}\n\
\"ol\\u00e1\\n\" \"olá\" {} []\n\
NaN 1e+16 0.1\n"
        );
    }

    #[test]
    fn test_dumps_rejects_unserializable() {
        assert_eq!(
            fault("import json\njson.dumps({1, 2})"),
            "TypeError: Object of type set is not JSON serializable"
        );
        assert_eq!(
            fault("import json\njson.dumps({(1, 2): 3})"),
            "TypeError: keys must be str, int, float, bool or None, not tuple"
        );
        assert_eq!(
            fault("import json\nxs = []\nxs.append(xs)\njson.dumps(xs)"),
            "ValueError: Circular reference detected"
        );
    }

    #[test]
    fn test_loads() {
        let source = "\
import json
value = json.loads('{\"a\": [1, 2.5, true, null], \"b\": {\"c\": \"d\"}}')
print(value, value['a'][1] * 2, type(value['b']).__name__)
print(json.loads(json.dumps({'k': [1, 'x']})) == {'k': [1, 'x']})
";
        assert_eq!(output(source), "{'a': [1, 2.5, True, None], 'b': {'c': 'd'}} 5.0 dict\nTrue\n");
        assert!(fault("import json\njson.loads('{bad')").starts_with("ValueError: Expecting value"));
    }
}
