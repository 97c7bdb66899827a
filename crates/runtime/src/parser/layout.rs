//! Physical to logical line conversion.
//!
//! Strips comments and blank lines, joins lines inside brackets and after a
//! trailing backslash, and measures indentation. String literals are tracked
//! so that `#`, quotes and brackets inside them are left alone.

use super::SyntaxError;

/// Deepest bracket nesting accepted on one logical line
pub const MAX_BRACKET_DEPTH: usize = 32;

/// Most `lambda` keywords accepted on one logical line
pub const MAX_LAMBDAS_PER_LINE: usize = 16;

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// Indentation width in columns
    pub indent: usize,
    /// Source text with indentation and comments removed
    pub text: String,
    /// 1-based physical line where the logical line starts
    pub line: usize,
}

#[derive(Clone, Copy)]
struct OpenString {
    quote: char,
    triple: bool,
    line: usize,
}

pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, SyntaxError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let normalized = source.replace("\r\n", "\n");
    let chars: Vec<char> = normalized.chars().collect();
    let mut lines = Vec::new();
    let mut pos = 0;
    let mut line_no = 1;

    while pos < chars.len() {
        // Measure indentation of the physical line.
        let mut indent = 0;
        while pos < chars.len() {
            match chars[pos] {
                ' ' => indent += 1,
                '\t' => indent = (indent / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0C' => indent = 0,
                _ => break,
            }
            pos += 1;
        }

        // Blank and comment-only lines produce nothing.
        if pos >= chars.len() {
            break;
        }
        if chars[pos] == '\n' {
            pos += 1;
            line_no += 1;
            continue;
        }
        if chars[pos] == '#' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        let start_line = line_no;
        let mut text = String::new();
        let mut brackets: Vec<(char, usize)> = Vec::new();
        let mut lambdas = 0;
        let mut open: Option<OpenString> = None;

        while pos < chars.len() {
            let c = chars[pos];

            if let Some(string) = open {
                if c == '\\' {
                    text.push(c);
                    pos += 1;
                    if let Some(&next) = chars.get(pos) {
                        if next == '\n' {
                            line_no += 1;
                        }
                        text.push(next);
                        pos += 1;
                    }
                    continue;
                }
                if c == '\n' {
                    if !string.triple {
                        return Err(SyntaxError::new(
                            string.line,
                            format!("unterminated string literal (detected at line {})", line_no),
                        ));
                    }
                    line_no += 1;
                    text.push(c);
                    pos += 1;
                    continue;
                }
                if c == string.quote {
                    if !string.triple {
                        open = None;
                        text.push(c);
                        pos += 1;
                        continue;
                    }
                    if chars.get(pos + 1) == Some(&c) && chars.get(pos + 2) == Some(&c) {
                        open = None;
                        text.extend([c, c, c]);
                        pos += 3;
                        continue;
                    }
                }
                text.push(c);
                pos += 1;
                continue;
            }

            match c {
                '#' => {
                    while pos < chars.len() && chars[pos] != '\n' {
                        pos += 1;
                    }
                }
                '\'' | '"' => {
                    let triple = chars.get(pos + 1) == Some(&c) && chars.get(pos + 2) == Some(&c);
                    open = Some(OpenString { quote: c, triple, line: line_no });
                    if triple {
                        text.extend([c, c, c]);
                        pos += 3;
                    } else {
                        text.push(c);
                        pos += 1;
                    }
                }
                '(' | '[' | '{' => {
                    brackets.push((c, line_no));
                    if brackets.len() > MAX_BRACKET_DEPTH {
                        return Err(SyntaxError::new(line_no, "too many nested parentheses"));
                    }
                    text.push(c);
                    pos += 1;
                }
                ')' | ']' | '}' => {
                    match brackets.pop() {
                        Some((opening, opened_at)) if !brackets_match(opening, c) => {
                            let message = if opened_at == line_no {
                                format!("closing parenthesis '{}' does not match opening parenthesis '{}'", c, opening)
                            } else {
                                format!(
                                    "closing parenthesis '{}' does not match opening parenthesis '{}' on line {}",
                                    c, opening, opened_at
                                )
                            };
                            return Err(SyntaxError::new(line_no, message));
                        }
                        Some(_) => {}
                        None => return Err(SyntaxError::new(line_no, format!("unmatched '{}'", c))),
                    }
                    text.push(c);
                    pos += 1;
                }
                '\\' if chars.get(pos + 1) == Some(&'\n') => {
                    text.push_str("\\\n");
                    pos += 2;
                    line_no += 1;
                    if pos >= chars.len() {
                        return Err(SyntaxError::new(line_no - 1, "unexpected EOF while parsing"));
                    }
                }
                '\n' => {
                    pos += 1;
                    line_no += 1;
                    if brackets.is_empty() {
                        break;
                    }
                    text.push('\n');
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = pos;
                    while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                        pos += 1;
                    }
                    let word: String = chars[start..pos].iter().collect();
                    if word == "lambda" {
                        lambdas += 1;
                        if lambdas > MAX_LAMBDAS_PER_LINE {
                            return Err(SyntaxError::new(line_no, "too many nested lambda expressions"));
                        }
                    }
                    text.push_str(&word);
                }
                _ => {
                    text.push(c);
                    pos += 1;
                }
            }
        }

        if let Some(string) = open {
            let message = if string.triple {
                format!("unterminated triple-quoted string literal (detected at line {})", line_no)
            } else {
                format!("unterminated string literal (detected at line {})", line_no)
            };
            return Err(SyntaxError::new(string.line, message));
        }
        if let Some((opening, opened_at)) = brackets.last() {
            return Err(SyntaxError::new(*opened_at, format!("'{}' was never closed", opening)));
        }

        let text = text.trim_end().to_string();
        if !text.is_empty() {
            lines.push(LogicalLine { indent, text, line: start_line });
        }
    }

    Ok(lines)
}

fn brackets_match(opening: char, closing: char) -> bool {
    matches!((opening, closing), ('(', ')') | ('[', ']') | ('{', '}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_comment_lines_are_dropped() {
        let lines = logical_lines("# header\n\nx = 1  # trailing\n   \n").unwrap();
        assert_eq!(lines, vec![LogicalLine { indent: 0, text: "x = 1".to_string(), line: 3 }]);
    }

    #[test]
    fn test_indentation_is_measured() {
        let lines = logical_lines("if x:\n    y = 1\n\tz = 2\n").unwrap();
        assert_eq!(lines[1].indent, 4);
        assert_eq!(lines[2].indent, 8);
    }

    #[test]
    fn test_brackets_join_lines() {
        let lines = logical_lines("total = sum([\n    1,\n    2,\n])\nprint(total)\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, 1);
        assert_eq!(lines[1].line, 5);
        assert!(lines[0].text.contains('\n'));
    }

    #[test]
    fn test_hash_inside_string_is_kept() {
        let lines = logical_lines("print('#1') # note").unwrap();
        assert_eq!(lines[0].text, "print('#1')");
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let lines = logical_lines("s = \"\"\"a\n(b\n\"\"\"\nprint(s)").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 4);
    }

    #[test]
    fn test_unterminated_string() {
        let err = logical_lines("x = 1\nprint('hi)\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated string literal"));
    }

    #[test]
    fn test_bracket_errors() {
        let err = logical_lines("print(1))").unwrap_err();
        assert_eq!(err.message, "unmatched ')'");

        let err = logical_lines("x = [1,\n2\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.message, "'[' was never closed");

        let err = logical_lines("x = (1]").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_nesting_limits() {
        let deep = format!("x = {}1{}", "(".repeat(40), ")".repeat(40));
        let err = logical_lines(&deep).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");

        let lambdas = format!("f = {}0", "lambda: ".repeat(20));
        let err = logical_lines(&lambdas).unwrap_err();
        assert_eq!(err.message, "too many nested lambda expressions");
    }

    #[test]
    fn test_backslash_continuation() {
        let lines = logical_lines("x = 1 + \\\n    2\ny = x").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 3);
    }
}
