//! Decoding of numeric and string literal text.

/// Parse the text of an integer literal (`42`, `0x2A`, `1_000`).
pub fn parse_int(text: &str) -> Result<i64, String> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        if lower.len() > 1 && lower.starts_with('0') && lower.bytes().any(|b| b != b'0') {
            return Err("leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers".to_string());
        }
        (lower.as_str(), 10)
    };
    i64::from_str_radix(digits, radix).map_err(|_| "integer literal is too large".to_string())
}

/// Parse the text of a float literal (`3.14`, `1e-5`, `.5`).
pub fn parse_float(text: &str) -> Result<f64, String> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    cleaned
        .parse::<f64>()
        .map_err(|_| format!("invalid float literal '{}'", text))
}

/// Resolve backslash escapes in the body of a non-raw string literal.
pub fn decode_escapes(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0C'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0B'),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).ok_or_else(|| "invalid octal escape".to_string())?);
            }
            'x' => out.push(hex_escape(&mut chars, 2, "\\xXX")?),
            'u' => out.push(hex_escape(&mut chars, 4, "\\uXXXX")?),
            'U' => out.push(hex_escape(&mut chars, 8, "\\UXXXXXXXX")?),
            'N' => return Err("named unicode escapes are not supported".to_string()),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Ok(out)
}

fn hex_escape<I>(chars: &mut std::iter::Peekable<I>, len: usize, form: &str) -> Result<char, String>
where
    I: Iterator<Item = char>,
{
    let mut value: u32 = 0;
    for _ in 0..len {
        let digit = chars
            .next()
            .and_then(|d| d.to_digit(16))
            .ok_or_else(|| format!("truncated {} escape", form))?;
        value = value * 16 + digit;
    }
    char::from_u32(value).ok_or_else(|| format!("illegal Unicode character in {} escape", form))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_literals() {
        assert_eq!(parse_int("42"), Ok(42));
        assert_eq!(parse_int("1_000_000"), Ok(1_000_000));
        assert_eq!(parse_int("0x2A"), Ok(42));
        assert_eq!(parse_int("0o17"), Ok(15));
        assert_eq!(parse_int("0b101"), Ok(5));
        assert!(parse_int("99999999999999999999").is_err());
        assert_eq!(parse_int("0"), Ok(0));
        assert_eq!(parse_int("00"), Ok(0));
        assert_eq!(parse_int("0_0"), Ok(0));
        assert!(parse_int("01").unwrap_err().starts_with("leading zeros in decimal integer literals"));
        assert!(parse_int("0_7").is_err());
        assert_eq!(parse_int("10"), Ok(10));
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(parse_float("3.5"), Ok(3.5));
        assert_eq!(parse_float(".5"), Ok(0.5));
        assert_eq!(parse_float("1e3"), Ok(1000.0));
        assert_eq!(parse_float("1_0.0"), Ok(10.0));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(decode_escapes(r"a\tb\n").unwrap(), "a\tb\n");
        assert_eq!(decode_escapes(r"\x41é\101").unwrap(), "A\u{e9}A");
        assert_eq!(decode_escapes(r"\d").unwrap(), "\\d");
        assert_eq!(decode_escapes("a\\\nb").unwrap(), "ab");
        assert!(decode_escapes(r"\x4").is_err());
    }
}
