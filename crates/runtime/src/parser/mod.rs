//! Submission parser
//!
//! Parsing runs in three steps: the layout pass turns source text into
//! logical lines, pest parses each line on its own, and the block assembler
//! uses indentation to attach bodies to compound statements.

pub mod builder;
pub mod layout;
pub mod literals;

use std::iter::Peekable;
use std::vec::IntoIter;

use pest::error::LineColLocation;
use pest::Parser;
use thiserror::Error;

use crate::ast::{
    analyze_scope, walk_body, walk_expr, ClassDef, ExceptHandler, Expr, FunctionDef, Program, ScopeInfo, Stmt,
    StmtKind, TryStmt, Visitor,
};
use builder::{AstBuilder, Header, LineItem};
use layout::LogicalLine;

use std::sync::Arc;

/// Deepest nesting of indented blocks
pub const MAX_BLOCK_DEPTH: usize = 32;

/// Deepest nesting of expression nodes
pub const MAX_EXPR_DEPTH: usize = 200;

#[derive(pest_derive::Parser)]
#[grammar = "parser/grammar.pest"] // Path relative to src/
pub struct SubmissionParser;

/// A submission that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Parse a whole submission.
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let lines = layout::logical_lines(source)?;
    let mut parsed = Vec::with_capacity(lines.len());
    for line in lines {
        let item = parse_line(&line)?;
        parsed.push(ParsedLine {
            indent: line.indent,
            line: line.line,
            item,
        });
    }

    let mut assembler = BlockAssembler {
        lines: parsed.into_iter().peekable(),
    };
    let body = assembler.block(0, 0)?;
    if let Some(extra) = assembler.lines.next() {
        return Err(SyntaxError::new(extra.line, "unexpected indent"));
    }

    ContextChecker::default().check_body(&body)?;

    let mut nesting = NestingCheck::default();
    walk_body(&mut nesting, &body);
    if let Some(line) = nesting.exceeded_at {
        return Err(SyntaxError::new(line, "expression is too complex"));
    }
    Ok(Program { body })
}

fn parse_line(line: &LogicalLine) -> Result<LineItem, SyntaxError> {
    let mut pairs = SubmissionParser::parse(Rule::line, &line.text).map_err(|err| {
        let offset = match err.line_col {
            LineColLocation::Pos((l, _)) => l,
            LineColLocation::Span((l, _), _) => l,
        };
        SyntaxError::new(line.line + offset - 1, describe_failure(&line.text))
    })?;
    let node = pairs
        .next()
        .ok_or_else(|| SyntaxError::new(line.line, "invalid syntax"))?;
    AstBuilder::new(line.line).build_line(node)
}

fn describe_failure(text: &str) -> String {
    let word: String = text.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if word == "print" && !text[word.len()..].trim_start().starts_with('(') {
        return "Missing parentheses in call to 'print'. Did you mean print(...)?".to_string();
    }
    if matches!(word.as_str(), "if" | "elif" | "else" | "while" | "for" | "def" | "class" | "try" | "except" | "finally")
        && !text.trim_end().ends_with(':')
        && !text.contains(':')
    {
        return "expected ':'".to_string();
    }
    "invalid syntax".to_string()
}

struct ParsedLine {
    indent: usize,
    line: usize,
    item: LineItem,
}

struct BlockAssembler {
    lines: Peekable<IntoIter<ParsedLine>>,
}

impl BlockAssembler {
    /// Collect statements at exactly `indent` until a shallower line.
    fn block(&mut self, indent: usize, depth: usize) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        let mut last_child_indent: Option<usize> = None;

        while let Some(next) = self.lines.peek() {
            if next.indent < indent {
                break;
            }
            if next.indent > indent {
                let message = match last_child_indent {
                    Some(child) if next.indent < child => "unindent does not match any outer indentation level",
                    _ => "unexpected indent",
                };
                return Err(SyntaxError::new(next.line, message));
            }
            let Some(parsed) = self.lines.next() else { break };
            last_child_indent = None;
            match parsed.item {
                LineItem::Simple(stmts) => body.extend(stmts),
                LineItem::Compound { header, inline, line } => {
                    let (stmt, child) = self.compound(header, inline, line, indent, depth)?;
                    last_child_indent = child;
                    body.push(stmt);
                }
            }
        }
        Ok(body)
    }

    /// Body of a compound statement: inline after the colon or an indented block.
    fn suite(
        &mut self,
        inline: Option<Vec<Stmt>>,
        header_line: usize,
        what: &str,
        indent: usize,
        depth: usize,
    ) -> Result<(Vec<Stmt>, Option<usize>), SyntaxError> {
        if let Some(stmts) = inline {
            return Ok((stmts, None));
        }
        match self.lines.peek() {
            Some(next) if next.indent > indent => {
                if depth + 1 > MAX_BLOCK_DEPTH {
                    return Err(SyntaxError::new(next.line, "too many statically nested blocks"));
                }
                let child = next.indent;
                let body = self.block(child, depth + 1)?;
                Ok((body, Some(child)))
            }
            next => {
                let line = next.map(|n| n.line).unwrap_or(header_line + 1);
                Err(SyntaxError::new(
                    line,
                    format!("expected an indented block after {} on line {}", what, header_line),
                ))
            }
        }
    }

    /// Take the next line if it is a clause header (`elif`, `else`, ...) at `indent`.
    fn take_clause<F>(&mut self, indent: usize, accept: F) -> Option<(Header, Option<Vec<Stmt>>, usize)>
    where
        F: Fn(&Header) -> bool,
    {
        let matches = matches!(
            self.lines.peek(),
            Some(ParsedLine { indent: i, item: LineItem::Compound { header, .. }, .. })
                if *i == indent && accept(header)
        );
        if !matches {
            return None;
        }
        match self.lines.next() {
            Some(ParsedLine { item: LineItem::Compound { header, inline, line }, .. }) => Some((header, inline, line)),
            _ => None,
        }
    }

    fn else_clause(&mut self, indent: usize, depth: usize) -> Result<(Vec<Stmt>, Option<usize>), SyntaxError> {
        match self.take_clause(indent, |h| matches!(h, Header::Else)) {
            Some((header, inline, line)) => self.suite(inline, line, header.describe(), indent, depth),
            None => Ok((Vec::new(), None)),
        }
    }

    fn compound(
        &mut self,
        header: Header,
        inline: Option<Vec<Stmt>>,
        line: usize,
        indent: usize,
        depth: usize,
    ) -> Result<(Stmt, Option<usize>), SyntaxError> {
        let what = header.describe();
        let (kind, child) = match header {
            Header::If(test) => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                let (orelse, tail_child) = self.if_tail(indent, depth)?;
                (StmtKind::If { test, body, orelse }, tail_child.or(child))
            }
            Header::While(test) => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                let (orelse, else_child) = self.else_clause(indent, depth)?;
                (StmtKind::While { test, body, orelse }, else_child.or(child))
            }
            Header::For { target, iter } => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                let (orelse, else_child) = self.else_clause(indent, depth)?;
                (StmtKind::For { target, iter, body, orelse }, else_child.or(child))
            }
            Header::Def { name, params } => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                let scope = analyze_scope(&params, &body);
                for name in params.names() {
                    if scope.globals.contains(name) {
                        return Err(SyntaxError::new(line, format!("name '{}' is parameter and global", name)));
                    }
                    if scope.nonlocals.contains(name) {
                        return Err(SyntaxError::new(line, format!("name '{}' is parameter and nonlocal", name)));
                    }
                }
                let def = FunctionDef {
                    name,
                    params,
                    body,
                    scope: Arc::new(scope),
                    line,
                };
                (StmtKind::FunctionDef(Arc::new(def)), child)
            }
            Header::Class { name, bases } => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                (StmtKind::ClassDef(Arc::new(ClassDef { name, bases, body, line })), child)
            }
            Header::Try => {
                let (body, mut child) = self.suite(inline, line, what, indent, depth)?;
                let mut handlers: Vec<ExceptHandler> = Vec::new();
                while let Some((header, inline, handler_line)) =
                    self.take_clause(indent, |h| matches!(h, Header::Except { .. }))
                {
                    if handlers.last().map_or(false, |h| h.kind.is_none()) {
                        return Err(SyntaxError::new(handler_line, "default 'except:' must be last"));
                    }
                    let what = header.describe();
                    let Header::Except { kind, name } = header else {
                        return Err(SyntaxError::new(handler_line, "invalid syntax"));
                    };
                    let (handler_body, handler_child) = self.suite(inline, handler_line, what, indent, depth)?;
                    child = handler_child.or(child);
                    handlers.push(ExceptHandler {
                        kind,
                        name,
                        body: handler_body,
                        line: handler_line,
                    });
                }
                let (orelse, else_child) = if handlers.is_empty() {
                    (Vec::new(), None)
                } else {
                    self.else_clause(indent, depth)?
                };
                let (finalbody, final_child) = match self.take_clause(indent, |h| matches!(h, Header::Finally)) {
                    Some((header, inline, final_line)) => self.suite(inline, final_line, header.describe(), indent, depth)?,
                    None => (Vec::new(), None),
                };
                if handlers.is_empty() && finalbody.is_empty() {
                    return Err(SyntaxError::new(line, "expected 'except' or 'finally' block"));
                }
                let child = final_child.or(else_child).or(child);
                (
                    StmtKind::Try(Box::new(TryStmt { body, handlers, orelse, finalbody })),
                    child,
                )
            }
            Header::Elif(_) | Header::Else | Header::Except { .. } | Header::Finally => {
                return Err(SyntaxError::new(line, "invalid syntax"));
            }
        };
        Ok((Stmt { kind, line }, child))
    }

    fn if_tail(&mut self, indent: usize, depth: usize) -> Result<(Vec<Stmt>, Option<usize>), SyntaxError> {
        let Some((header, inline, line)) =
            self.take_clause(indent, |h| matches!(h, Header::Elif(_) | Header::Else))
        else {
            return Ok((Vec::new(), None));
        };
        let what = header.describe();
        match header {
            Header::Elif(test) => {
                let (body, child) = self.suite(inline, line, what, indent, depth)?;
                let (orelse, tail_child) = self.if_tail(indent, depth)?;
                let stmt = Stmt { kind: StmtKind::If { test, body, orelse }, line };
                Ok((vec![stmt], tail_child.or(child)))
            }
            _ => self.suite(inline, line, what, indent, depth),
        }
    }
}

/// Placement rules the grammar cannot express on a single line.
#[derive(Default)]
struct ContextChecker {
    in_function: bool,
    in_loop: bool,
    enclosing: Vec<Arc<ScopeInfo>>,
}

impl ContextChecker {
    fn check_body(&mut self, body: &[Stmt]) -> Result<(), SyntaxError> {
        body.iter().try_for_each(|stmt| self.check_stmt(stmt))
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), SyntaxError> {
        match &stmt.kind {
            StmtKind::Return(_) if !self.in_function => Err(SyntaxError::new(stmt.line, "'return' outside function")),
            StmtKind::Break if !self.in_loop => Err(SyntaxError::new(stmt.line, "'break' outside loop")),
            StmtKind::Continue if !self.in_loop => {
                Err(SyntaxError::new(stmt.line, "'continue' not properly in loop"))
            }
            StmtKind::Nonlocal(names) => {
                if !self.in_function {
                    return Err(SyntaxError::new(stmt.line, "nonlocal declaration not allowed at module level"));
                }
                // The innermost entry is the current function; look outside it.
                let outer = &self.enclosing[..self.enclosing.len().saturating_sub(1)];
                for name in names {
                    let bound = outer
                        .iter()
                        .any(|scope| scope.locals.contains(name) || scope.nonlocals.contains(name));
                    if !bound {
                        return Err(SyntaxError::new(stmt.line, format!("no binding for nonlocal '{}' found", name)));
                    }
                }
                Ok(())
            }
            StmtKind::If { body, orelse, .. } => {
                self.check_body(body)?;
                self.check_body(orelse)
            }
            StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
                let was_in_loop = std::mem::replace(&mut self.in_loop, true);
                let result = self.check_body(body);
                self.in_loop = was_in_loop;
                result?;
                self.check_body(orelse)
            }
            StmtKind::FunctionDef(def) => {
                let saved = (self.in_function, self.in_loop);
                self.in_function = true;
                self.in_loop = false;
                self.enclosing.push(def.scope.clone());
                let result = self.check_body(&def.body);
                self.enclosing.pop();
                (self.in_function, self.in_loop) = saved;
                result
            }
            StmtKind::ClassDef(def) => {
                let saved = (self.in_function, self.in_loop);
                self.in_function = false;
                self.in_loop = false;
                let result = self.check_body(&def.body);
                (self.in_function, self.in_loop) = saved;
                result
            }
            StmtKind::Try(try_stmt) => {
                self.check_body(&try_stmt.body)?;
                for handler in &try_stmt.handlers {
                    self.check_body(&handler.body)?;
                }
                self.check_body(&try_stmt.orelse)?;
                self.check_body(&try_stmt.finalbody)
            }
            _ => Ok(()),
        }
    }
}

/// Stops descending once an expression is nested deeper than `MAX_EXPR_DEPTH`.
#[derive(Default)]
struct NestingCheck {
    depth: usize,
    exceeded_at: Option<usize>,
}

impl Visitor for NestingCheck {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.exceeded_at.is_some() {
            return;
        }
        if self.depth >= MAX_EXPR_DEPTH {
            self.exceeded_at = Some(expr.line);
            return;
        }
        self.depth += 1;
        walk_expr(self, expr);
        self.depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Constant, ExprKind, FStringPart, ImportNames};

    /// Parse on a roomy stack, as the validator does.
    fn parse_deep(source: String) -> Result<Program, SyntaxError> {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || parse_program(&source))
            .unwrap()
            .join()
            .unwrap()
    }

    fn parse_ok(source: &str) -> Program {
        match parse_program(source) {
            Ok(program) => program,
            Err(err) => panic!("failed to parse {:?}: {}", source, err),
        }
    }

    #[test]
    fn test_simple_statements() {
        let program = parse_ok("x = 1\ny = x + 2; print(y)\n");
        assert_eq!(program.body.len(), 3);
        assert_eq!(program.body[2].line, 2);
        assert!(matches!(program.body[0].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_compound_statements() {
        let source = "\
def fact(n):
    if n <= 1:
        return 1
    else:
        return n * fact(n - 1)

for i in range(3):
    print(fact(i))
else:
    print('done')
";
        let program = parse_ok(source);
        assert_eq!(program.body.len(), 2);
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "fact");
                assert_eq!(def.params.positional.len(), 1);
                assert!(def.scope.is_local("n"));
                assert!(!def.scope.is_local("fact"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::For { orelse, .. } => assert_eq!(orelse.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_elif_chain_and_try() {
        let source = "\
try:
    x = int('3')
except ValueError as e:
    x = 0
except:
    pass
else:
    x += 1
finally:
    print(x)
if x == 1: print('one')
elif x == 2: print('two')
else: print('many')
";
        let program = parse_ok(source);
        match &program.body[0].kind {
            StmtKind::Try(t) => {
                assert_eq!(t.handlers.len(), 2);
                assert_eq!(t.handlers[0].name.as_deref(), Some("e"));
                assert_eq!(t.orelse.len(), 1);
                assert_eq!(t.finalbody.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::If { orelse, .. } => {
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_imports() {
        let program = parse_ok("import math, random as r\nfrom json import dumps as d, loads\nfrom . import x\n");
        match &program.body[0].kind {
            StmtKind::Import(aliases) => {
                assert_eq!(aliases[0].name, "math");
                assert_eq!(aliases[1].asname.as_deref(), Some("r"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::ImportFrom(import) => {
                assert_eq!(import.module.as_deref(), Some("json"));
                assert!(matches!(&import.names, ImportNames::Aliases(a) if a.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &program.body[2].kind {
            StmtKind::ImportFrom(import) => {
                assert_eq!(import.level, 1);
                assert!(import.module.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_fields() {
        let program = parse_ok("print(f'{name!r:>10} = {value:.2f} {{x}}')");
        let StmtKind::Expr(call) = &program.body[0].kind else { panic!() };
        let ExprKind::Call { args, .. } = &call.kind else { panic!() };
        let crate::ast::Argument::Positional(arg) = &args[0] else { panic!() };
        let ExprKind::FString(parts) = &arg.kind else { panic!("not an f-string: {:?}", arg) };
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], FStringPart::Field { conversion: Some('r'), .. }));
        assert!(matches!(&parts[1], FStringPart::Literal(text) if text == " = "));
        assert!(matches!(&parts[3], FStringPart::Literal(text) if text == " {x}"));
    }

    #[test]
    fn test_string_concatenation_and_escapes() {
        let program = parse_ok("s = 'a\\n' \"b\"\n");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else { panic!() };
        assert_eq!(value.kind, ExprKind::Constant(Constant::Str("a\nb".to_string())));
    }

    #[test]
    fn test_power_and_unary_precedence() {
        let program = parse_ok("x = -2 ** 2\n");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::UnaryOp { .. }));
    }

    #[test]
    fn test_syntax_errors_report_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.line, 2);

        let err = parse_program("x = 1\nif x\n    pass\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "expected ':'");

        let err = parse_program("print 'hi'\n").unwrap_err();
        assert!(err.message.contains("Missing parentheses"));
        assert_eq!(err.to_string(), format!("syntax error at line 1: {}", err.message));
    }

    #[test]
    fn test_indentation_errors() {
        let err = parse_program("if True:\nprint(1)\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.starts_with("expected an indented block after 'if' statement on line 1"));

        let err = parse_program("x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(err.message, "unexpected indent");

        let err = parse_program("if True:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.message, "unindent does not match any outer indentation level");
    }

    #[test]
    fn test_context_errors() {
        assert_eq!(parse_program("return 1").unwrap_err().message, "'return' outside function");
        assert_eq!(parse_program("break").unwrap_err().message, "'break' outside loop");
        assert_eq!(
            parse_program("def f():\n    nonlocal x\n").unwrap_err().message,
            "no binding for nonlocal 'x' found"
        );
        assert!(parse_program("def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n").is_ok());
        assert!(parse_program("while True:\n    def f():\n        break\n").is_err());
    }

    #[test]
    fn test_unsupported_constructs() {
        assert_eq!(
            parse_program("with open('f') as f:\n    pass\n").unwrap_err().message,
            "'with' statements are not supported"
        );
        assert_eq!(
            parse_program("@decorator\ndef f():\n    pass\n").unwrap_err().message,
            "decorators are not supported"
        );
        assert_eq!(parse_program("x = b'raw'").unwrap_err().message, "bytes literals are not supported");
        assert_eq!(parse_program("x = 1j").unwrap_err().message, "complex numbers are not supported");
    }

    #[test]
    fn test_leading_zeros_and_byte_order_mark() {
        let err = parse_program("x = 1\ny = 007\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.starts_with("leading zeros in decimal integer literals are not permitted"));
        assert!(parse_program("x = 00 + 0_0 + 0 + 0.5 + 0o7\n").is_ok());

        let program = parse_ok("\u{feff}x = 1\nprint(x)\n");
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[1].line, 2);
    }

    #[test]
    fn test_block_nesting_limit() {
        let mut source = String::new();
        for depth in 0..40 {
            source.push_str(&" ".repeat(depth));
            source.push_str("if True:\n");
        }
        source.push_str(&" ".repeat(40));
        source.push_str("pass\n");
        let err = parse_program(&source).unwrap_err();
        assert_eq!(err.message, "too many statically nested blocks");
    }

    #[test]
    fn test_expression_nesting_limit() {
        let mut source = String::from("x = ");
        for _ in 0..30 {
            source.push_str(&"~".repeat(90));
            source.push('(');
        }
        source.push('1');
        source.push_str(&")".repeat(30));
        let err = parse_deep(source).unwrap_err();
        assert_eq!(err.message, "expression is too complex");

        assert!(parse_deep(format!("x = {}1", "~".repeat(50))).is_ok());
    }

    #[test]
    fn test_comprehensions_and_lambdas() {
        let program = parse_ok(
            "squares = [x * x for x in range(10) if x % 2 == 0]\nd = {k: v for k, v in pairs}\nf = lambda a, b=2: a + b\ns = sum(x for x in xs)\n",
        );
        let StmtKind::Assign { value, .. } = &program.body[0].kind else { panic!() };
        match &value.kind {
            ExprKind::Comprehension(comp) => {
                assert_eq!(comp.clauses.len(), 2);
                assert!(comp.scope.is_local("x"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let StmtKind::Assign { value, .. } = &program.body[2].kind else { panic!() };
        match &value.kind {
            ExprKind::Lambda(def) => {
                assert_eq!(def.params.positional.len(), 2);
                assert!(def.params.positional[1].default.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assignment_targets() {
        assert!(parse_program("a, *b = [1, 2, 3]").is_ok());
        assert!(parse_program("x[0], y.z = 1, 2").is_ok());
        assert_eq!(parse_program("f() = 1").unwrap_err().message, "cannot assign to function call");
        assert_eq!(parse_program("1 = x").unwrap_err().message, "cannot assign to literal");
    }
}
