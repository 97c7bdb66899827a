//! Turns pest pairs for one logical line into syntax tree nodes.

use std::sync::Arc;

use pest::iterators::Pair;
use pest::Parser;

use super::literals::{decode_escapes, parse_float, parse_int};
use super::{Rule, SubmissionParser, SyntaxError};
use crate::ast::*;

/// Longest operator chain (`a + b + ...`) accepted in one expression
pub const MAX_CHAIN_OPERANDS: usize = 100;

type Node<'i> = Pair<'i, Rule>;
type Result<T> = std::result::Result<T, SyntaxError>;

/// Header of a compound statement, before its block is attached.
#[derive(Debug)]
pub enum Header {
    If(Expr),
    Elif(Expr),
    Else,
    While(Expr),
    For { target: Expr, iter: Expr },
    Def { name: String, params: Parameters },
    Class { name: String, bases: Vec<Expr> },
    Try,
    Except { kind: Option<Expr>, name: Option<String> },
    Finally,
}

impl Header {
    pub fn describe(&self) -> &'static str {
        match self {
            Header::If(_) => "'if' statement",
            Header::Elif(_) => "'elif' statement",
            Header::Else => "'else' statement",
            Header::While(_) => "'while' statement",
            Header::For { .. } => "'for' statement",
            Header::Def { .. } => "function definition",
            Header::Class { .. } => "class definition",
            Header::Try => "'try' statement",
            Header::Except { .. } => "'except' statement",
            Header::Finally => "'finally' statement",
        }
    }
}

#[derive(Debug)]
pub enum LineItem {
    Simple(Vec<Stmt>),
    Compound {
        header: Header,
        inline: Option<Vec<Stmt>>,
        line: usize,
    },
}

pub struct AstBuilder {
    line_base: usize,
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_and
            | Rule::kw_as
            | Rule::kw_assert
            | Rule::kw_async
            | Rule::kw_await
            | Rule::kw_break
            | Rule::kw_class
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_del
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_is
            | Rule::kw_lambda
            | Rule::kw_nonlocal
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_raise
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_while
            | Rule::kw_with
            | Rule::kw_yield
            | Rule::kw_none
            | Rule::kw_true
            | Rule::kw_false
            | Rule::EOI
    )
}

/// Children of a node without keyword tokens.
fn significant(node: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    node.into_inner().filter(|child| !is_keyword(child.as_rule()))
}

impl AstBuilder {
    /// `line_base` is the physical line the parsed text starts on.
    pub fn new(line_base: usize) -> Self {
        Self { line_base }
    }

    fn line_of(&self, node: &Node<'_>) -> usize {
        self.line_base + node.as_span().start_pos().line_col().0 - 1
    }

    fn invalid(&self, node: &Node<'_>) -> SyntaxError {
        SyntaxError::new(self.line_of(node), "invalid syntax")
    }

    fn error(&self, node: &Node<'_>, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line_of(node), message)
    }

    fn first_child<'i>(&self, node: Node<'i>) -> Result<Node<'i>> {
        let err = self.invalid(&node);
        significant(node).next().ok_or(err)
    }

    // ------------------------------------------------------------------
    // Lines and statements

    pub fn build_line(&self, node: Node<'_>) -> Result<LineItem> {
        let line = self.line_of(&node);
        let content = self.first_child(node)?;
        match content.as_rule() {
            Rule::unsupported => Err(self.unsupported(&content)),
            Rule::compound_line => {
                let mut parts = significant(content);
                let header_node = parts
                    .next()
                    .ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
                let header = self.build_header(header_node)?;
                let inline = match parts.next() {
                    Some(stmts) => Some(self.build_simple_stmts(stmts)?),
                    None => None,
                };
                Ok(LineItem::Compound { header, inline, line })
            }
            Rule::simple_stmts => Ok(LineItem::Simple(self.build_simple_stmts(content)?)),
            _ => Err(self.invalid(&content)),
        }
    }

    fn unsupported(&self, node: &Node<'_>) -> SyntaxError {
        let text = node.as_str();
        let message = if text.starts_with('@') {
            "decorators are not supported".to_string()
        } else {
            let word: String = text.chars().take_while(|c| c.is_alphabetic()).collect();
            match word.as_str() {
                "yield" => "'yield' is not supported".to_string(),
                other => format!("'{}' statements are not supported", other),
            }
        };
        self.error(node, message)
    }

    fn build_header(&self, node: Node<'_>) -> Result<Header> {
        match node.as_rule() {
            Rule::if_header => Ok(Header::If(self.build_expr(self.first_child(node)?)?)),
            Rule::elif_header => Ok(Header::Elif(self.build_expr(self.first_child(node)?)?)),
            Rule::else_header => Ok(Header::Else),
            Rule::while_header => Ok(Header::While(self.build_expr(self.first_child(node)?)?)),
            Rule::for_header => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let target = self.build_expr(parts.next().ok_or_else(|| err.clone())?)?;
                self.check_target(&target, "assign to")?;
                let iter = self.build_expr(parts.next().ok_or(err)?)?;
                Ok(Header::For { target, iter })
            }
            Rule::def_header => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let name = parts.next().ok_or_else(|| err.clone())?.as_str().to_string();
                let mut params = Parameters::default();
                for part in parts {
                    match part.as_rule() {
                        Rule::parameters => params = self.build_parameters(part)?,
                        Rule::return_annotation => {
                            let annotation = self.build_expr(self.first_child(part)?)?;
                            params.annotations.push(annotation);
                        }
                        _ => return Err(err),
                    }
                }
                Ok(Header::Def { name, params })
            }
            Rule::class_header => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let name = parts.next().ok_or_else(|| err.clone())?.as_str().to_string();
                let mut bases = Vec::new();
                if let Some(arglist) = parts.next() {
                    for arg in self.build_arglist(arglist)? {
                        match arg {
                            Argument::Positional(base) => bases.push(base),
                            _ => {
                                return Err(SyntaxError::new(
                                    err.line,
                                    "class keyword arguments are not supported",
                                ))
                            }
                        }
                    }
                }
                Ok(Header::Class { name, bases })
            }
            Rule::try_header => Ok(Header::Try),
            Rule::except_header => {
                let mut parts = significant(node);
                let kind = match parts.next() {
                    Some(test) => Some(self.build_expr(test)?),
                    None => None,
                };
                let name = parts.next().map(|ident| ident.as_str().to_string());
                Ok(Header::Except { kind, name })
            }
            Rule::finally_header => Ok(Header::Finally),
            _ => Err(self.invalid(&node)),
        }
    }

    fn build_parameters(&self, node: Node<'_>) -> Result<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;
        let mut names: Vec<String> = Vec::new();

        for item in significant(node) {
            let line_err = self.invalid(&item);
            match item.as_rule() {
                Rule::param | Rule::lambda_param => {
                    let mut name = None;
                    let mut default = None;
                    for part in item.into_inner() {
                        match part.as_rule() {
                            Rule::identifier => name = Some(part.as_str().to_string()),
                            Rule::param_default => default = Some(self.build_expr(self.first_child(part)?)?),
                            Rule::param_annotation => {
                                params.annotations.push(self.build_expr(self.first_child(part)?)?);
                            }
                            _ => return Err(line_err),
                        }
                    }
                    let name = name.ok_or_else(|| line_err.clone())?;
                    names.push(name.clone());
                    if seen_star {
                        params.kwonly.push(Param { name, default });
                    } else {
                        if default.is_some() {
                            seen_default = true;
                        } else if seen_default {
                            return Err(SyntaxError::new(
                                line_err.line,
                                "parameter without a default follows parameter with a default",
                            ));
                        }
                        params.positional.push(Param { name, default });
                    }
                }
                Rule::varargs_param | Rule::lambda_varargs | Rule::star_marker => {
                    if seen_star {
                        return Err(SyntaxError::new(line_err.line, "* argument may appear only once"));
                    }
                    seen_star = true;
                    for part in item.into_inner() {
                        match part.as_rule() {
                            Rule::identifier => {
                                let name = part.as_str().to_string();
                                names.push(name.clone());
                                params.vararg = Some(name);
                            }
                            Rule::param_annotation => {
                                params.annotations.push(self.build_expr(self.first_child(part)?)?);
                            }
                            _ => {}
                        }
                    }
                }
                Rule::kwargs_param | Rule::lambda_kwargs => {
                    let mut name = None;
                    for part in item.into_inner() {
                        match part.as_rule() {
                            Rule::identifier => name = Some(part.as_str().to_string()),
                            Rule::param_annotation => {
                                params.annotations.push(self.build_expr(self.first_child(part)?)?);
                            }
                            _ => {}
                        }
                    }
                    let name = name.ok_or_else(|| line_err.clone())?;
                    names.push(name.clone());
                    params.kwarg = Some(name);
                }
                Rule::slash_marker => {}
                _ => return Err(line_err),
            }
        }

        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(SyntaxError::new(
                    self.line_base,
                    format!("duplicate argument '{}' in function definition", name),
                ));
            }
        }
        Ok(params)
    }

    fn build_simple_stmts(&self, node: Node<'_>) -> Result<Vec<Stmt>> {
        significant(node).map(|stmt| self.build_simple_stmt(stmt)).collect()
    }

    fn build_simple_stmt(&self, node: Node<'_>) -> Result<Stmt> {
        let line = self.line_of(&node);
        let kind = match node.as_rule() {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => {
                let value = match significant(node).next() {
                    Some(value) => Some(self.build_expr(value)?),
                    None => None,
                };
                StmtKind::Return(value)
            }
            Rule::raise_stmt => {
                let mut exception = None;
                let mut cause = None;
                for part in significant(node) {
                    if part.as_rule() == Rule::raise_cause {
                        cause = Some(self.build_expr(self.first_child(part)?)?);
                    } else {
                        exception = Some(self.build_expr(part)?);
                    }
                }
                StmtKind::Raise { exception, cause }
            }
            Rule::global_stmt => StmtKind::Global(significant(node).map(|n| n.as_str().to_string()).collect()),
            Rule::nonlocal_stmt => {
                StmtKind::Nonlocal(significant(node).map(|n| n.as_str().to_string()).collect())
            }
            Rule::del_stmt => {
                let target = self.build_expr(self.first_child(node)?)?;
                let targets = match target {
                    Expr { kind: ExprKind::Tuple(items), .. } => items,
                    other => vec![other],
                };
                for target in &targets {
                    self.check_target(target, "delete")?;
                }
                StmtKind::Delete(targets)
            }
            Rule::assert_stmt => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let test = self.build_expr(parts.next().ok_or(err)?)?;
                let message = match parts.next() {
                    Some(message) => Some(self.build_expr(message)?),
                    None => None,
                };
                StmtKind::Assert { test, message }
            }
            Rule::import_stmt => {
                let mut aliases = Vec::new();
                for dotted in significant(node) {
                    let mut parts = significant(dotted);
                    let name = parts
                        .next()
                        .map(|n| dotted_name(&n))
                        .ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
                    let asname = parts.next().map(|n| n.as_str().to_string());
                    aliases.push(ImportAlias { name, asname });
                }
                StmtKind::Import(aliases)
            }
            Rule::from_import_stmt => StmtKind::ImportFrom(self.build_from_import(node)?),
            Rule::assign_stmt => {
                let mut parts: Vec<Expr> = significant(node)
                    .map(|part| self.build_expr(part))
                    .collect::<Result<_>>()?;
                let value = parts.pop().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
                for target in &parts {
                    self.check_target(target, "assign to")?;
                }
                StmtKind::Assign { targets: parts, value }
            }
            Rule::aug_assign_stmt => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let target = self.build_expr(parts.next().ok_or_else(|| err.clone())?)?;
                let op_node = parts.next().ok_or_else(|| err.clone())?;
                let value = self.build_expr(parts.next().ok_or_else(|| err.clone())?)?;
                if !matches!(
                    target.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(SyntaxError::new(
                        line,
                        format!("'{}' is an illegal expression for augmented assignment", describe(&target)),
                    ));
                }
                let op = match op_node.as_str().trim_end_matches('=') {
                    "+" => BinOp::Add,
                    "-" => BinOp::Sub,
                    "*" => BinOp::Mul,
                    "/" => BinOp::Div,
                    "//" => BinOp::FloorDiv,
                    "%" => BinOp::Mod,
                    "**" => BinOp::Pow,
                    "<<" => BinOp::LShift,
                    ">>" => BinOp::RShift,
                    "&" => BinOp::BitAnd,
                    "|" => BinOp::BitOr,
                    "^" => BinOp::BitXor,
                    _ => return Err(err),
                };
                StmtKind::AugAssign { target, op, value }
            }
            Rule::ann_assign_stmt => {
                let err = self.invalid(&node);
                let mut parts = significant(node);
                let target = self.build_expr(parts.next().ok_or_else(|| err.clone())?)?;
                let annotation = self.build_expr(parts.next().ok_or(err)?)?;
                let value = match parts.next() {
                    Some(value) => Some(self.build_expr(value)?),
                    None => None,
                };
                if !matches!(
                    target.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(SyntaxError::new(
                        line,
                        "only single target (not tuple) can be annotated",
                    ));
                }
                StmtKind::AnnAssign { target, annotation, value }
            }
            Rule::expr_stmt => StmtKind::Expr(self.build_expr(self.first_child(node)?)?),
            _ => return Err(self.invalid(&node)),
        };
        Ok(Stmt { kind, line })
    }

    fn build_from_import(&self, node: Node<'_>) -> Result<ImportFrom> {
        let err = self.invalid(&node);
        let mut parts = significant(node);
        let relative = parts.next().ok_or_else(|| err.clone())?;
        let mut level = 0;
        let mut module = None;
        for part in relative.into_inner() {
            match part.as_rule() {
                Rule::dot_prefix => level = part.as_str().len(),
                Rule::dotted_name => module = Some(dotted_name(&part)),
                _ => return Err(err),
            }
        }
        if level == 0 && module.is_none() {
            return Err(err);
        }

        let names_node = parts.next().ok_or_else(|| err.clone())?;
        let names = match names_node.as_rule() {
            Rule::import_star => ImportNames::Star,
            Rule::import_as_names => {
                let mut aliases = Vec::new();
                for alias in significant(names_node) {
                    let mut idents = significant(alias);
                    let name = idents.next().ok_or_else(|| err.clone())?.as_str().to_string();
                    let asname = idents.next().map(|n| n.as_str().to_string());
                    aliases.push(ImportAlias { name, asname });
                }
                ImportNames::Aliases(aliases)
            }
            _ => return Err(err),
        };
        Ok(ImportFrom { module, level, names })
    }

    fn check_target(&self, target: &Expr, action: &str) -> Result<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items.iter().filter(|i| matches!(i.kind, ExprKind::Starred(_))).count();
                if starred > 1 {
                    return Err(SyntaxError::new(target.line, "multiple starred expressions in assignment"));
                }
                items.iter().try_for_each(|item| self.check_target(item, action))
            }
            ExprKind::Starred(inner) if action == "assign to" => self.check_target(inner, action),
            _ => Err(SyntaxError::new(
                target.line,
                format!("cannot {} {}", action, describe(target)),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    pub fn build_expr(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        match node.as_rule() {
            Rule::test | Rule::slice_lower | Rule::slice_upper | Rule::slice_step | Rule::fstring_field => {
                self.build_expr(self.first_child(node)?)
            }
            Rule::testlist | Rule::testlist_star | Rule::target_list => self.build_tuple_or_single(node),
            Rule::lambda_expr => self.build_lambda(node),
            Rule::conditional => self.build_conditional(node),
            Rule::or_test => self.build_bool_op(node, BoolOp::Or),
            Rule::and_test => self.build_bool_op(node, BoolOp::And),
            Rule::not_test | Rule::factor | Rule::pow_operand => self.build_unary(node),
            Rule::comparison => self.build_comparison(node),
            Rule::bit_or => self.build_uniform_chain(node, BinOp::BitOr),
            Rule::bit_xor => self.build_uniform_chain(node, BinOp::BitXor),
            Rule::bit_and => self.build_uniform_chain(node, BinOp::BitAnd),
            Rule::shift_expr | Rule::arith | Rule::term => self.build_op_chain(node),
            Rule::power => self.build_power(node),
            Rule::primary => self.build_primary(node),
            Rule::star_expr => {
                let inner = self.build_expr(self.first_child(node)?)?;
                Ok(Expr::new(ExprKind::Starred(Box::new(inner)), line))
            }
            Rule::paren_form => self.build_paren(node),
            Rule::list_form => self.build_list(node),
            Rule::brace_form => self.build_brace(node),
            Rule::strings => self.build_strings(node),
            Rule::int_number => parse_int(node.as_str())
                .map(|v| Expr::constant(Constant::Int(v), line))
                .map_err(|message| SyntaxError::new(line, message)),
            Rule::float_number => parse_float(node.as_str())
                .map(|v| Expr::constant(Constant::Float(v), line))
                .map_err(|message| SyntaxError::new(line, message)),
            Rule::imag_number => Err(SyntaxError::new(line, "complex numbers are not supported")),
            Rule::ellipsis => Ok(Expr::constant(Constant::Ellipsis, line)),
            Rule::none_lit => Ok(Expr::constant(Constant::None, line)),
            Rule::true_lit => Ok(Expr::constant(Constant::Bool(true), line)),
            Rule::false_lit => Ok(Expr::constant(Constant::Bool(false), line)),
            Rule::identifier => Ok(Expr::new(ExprKind::Name(node.as_str().to_string()), line)),
            _ => Err(self.invalid(&node)),
        }
    }

    /// Comma separated items: a tuple when a comma is present, else the item.
    fn build_tuple_or_single(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut items = Vec::new();
        let mut has_comma = false;
        for child in significant(node) {
            if child.as_rule() == Rule::comma {
                has_comma = true;
            } else {
                items.push(self.build_expr(child)?);
            }
        }
        if !has_comma && items.len() == 1 {
            let item = items.remove(0);
            if matches!(item.kind, ExprKind::Starred(_)) {
                return Err(SyntaxError::new(line, "can't use starred expression here"));
            }
            return Ok(item);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn build_lambda(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut params = Parameters::default();
        let mut body = None;
        for part in significant(node) {
            match part.as_rule() {
                Rule::lambda_params => params = self.build_parameters(part)?,
                _ => body = Some(self.build_expr(part)?),
            }
        }
        let body = body.ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        let body = vec![Stmt { kind: StmtKind::Return(Some(body)), line }];
        let scope = analyze_scope(&params, &body);
        Ok(Expr::new(
            ExprKind::Lambda(Arc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body,
                scope: Arc::new(scope),
                line,
            })),
            line,
        ))
    }

    fn build_conditional(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut children = significant(node);
        let first = self.build_expr(children.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;

        let mut bodies = vec![first];
        let mut tests = Vec::new();
        for tail in children {
            if tests.len() >= MAX_CHAIN_OPERANDS {
                return Err(self.error(&tail, "expression is too complex"));
            }
            let err = self.invalid(&tail);
            let mut parts = significant(tail);
            tests.push(self.build_expr(parts.next().ok_or_else(|| err.clone())?)?);
            bodies.push(self.build_expr(parts.next().ok_or(err)?)?);
        }
        if tests.is_empty() {
            return Ok(bodies.remove(0));
        }

        let mut result = bodies.pop().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        while let (Some(test), Some(body)) = (tests.pop(), bodies.pop()) {
            result = Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(result),
                },
                line,
            );
        }
        Ok(result)
    }

    fn build_bool_op(&self, node: Node<'_>, op: BoolOp) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut values: Vec<Expr> = significant(node).map(|v| self.build_expr(v)).collect::<Result<_>>()?;
        if values.len() > MAX_CHAIN_OPERANDS {
            return Err(SyntaxError::new(line, "expression is too complex"));
        }
        if values.len() == 1 {
            return Ok(values.remove(0));
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, line))
    }

    /// `not x`, `-x`, `~x`: zero or more prefix operators then an operand.
    fn build_unary(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut children: Vec<Node<'_>> = significant(node).collect();
        let operand = children.pop().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        if children.len() > MAX_CHAIN_OPERANDS {
            return Err(SyntaxError::new(line, "expression is too complex"));
        }
        let mut expr = self.build_expr(operand)?;
        for op_node in children.iter().rev() {
            let op = match (op_node.as_rule(), op_node.as_str()) {
                (Rule::not_op, _) => UnaryOp::Not,
                (_, "-") => UnaryOp::Neg,
                (_, "+") => UnaryOp::Pos,
                (_, "~") => UnaryOp::Invert,
                _ => return Err(self.invalid(op_node)),
            };
            expr = match (op, expr.kind) {
                (UnaryOp::Neg, ExprKind::Constant(Constant::Int(v))) if v != 0 => {
                    Expr::constant(Constant::Int(-v), line)
                }
                (UnaryOp::Neg, ExprKind::Constant(Constant::Float(v))) => Expr::constant(Constant::Float(-v), line),
                (op, kind) => Expr::new(
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(Expr { kind, line: expr.line }),
                    },
                    line,
                ),
            };
        }
        Ok(expr)
    }

    fn build_comparison(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut children = significant(node);
        let left = self.build_expr(children.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
        let mut comparisons = Vec::new();
        while let Some(op_node) = children.next() {
            let op = match op_node.as_rule() {
                Rule::op_eq => CmpOp::Eq,
                Rule::op_ne => CmpOp::NotEq,
                Rule::op_lt => CmpOp::Lt,
                Rule::op_le => CmpOp::LtE,
                Rule::op_gt => CmpOp::Gt,
                Rule::op_ge => CmpOp::GtE,
                Rule::op_in => CmpOp::In,
                Rule::op_not_in => CmpOp::NotIn,
                Rule::op_is => CmpOp::Is,
                Rule::op_is_not => CmpOp::IsNot,
                _ => return Err(self.invalid(&op_node)),
            };
            let right = self.build_expr(children.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
            comparisons.push((op, right));
            if comparisons.len() >= MAX_CHAIN_OPERANDS {
                return Err(SyntaxError::new(line, "expression is too complex"));
            }
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(ExprKind::Compare { left: Box::new(left), comparisons }, line))
    }

    fn build_uniform_chain(&self, node: Node<'_>, op: BinOp) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut operands = significant(node);
        let mut left = self.build_expr(operands.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
        for (count, right) in operands.enumerate() {
            if count + 2 > MAX_CHAIN_OPERANDS {
                return Err(SyntaxError::new(line, "expression is too complex"));
            }
            let right = self.build_expr(right)?;
            left = Expr::new(ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) }, line);
        }
        Ok(left)
    }

    fn build_op_chain(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut children = significant(node);
        let mut left = self.build_expr(children.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
        let mut operands = 1;
        while let Some(op_node) = children.next() {
            let op = match op_node.as_str() {
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "//" => BinOp::FloorDiv,
                "%" => BinOp::Mod,
                "<<" => BinOp::LShift,
                ">>" => BinOp::RShift,
                _ => return Err(self.invalid(&op_node)),
            };
            let right = self.build_expr(children.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
            operands += 1;
            if operands > MAX_CHAIN_OPERANDS {
                return Err(SyntaxError::new(line, "expression is too complex"));
            }
            left = Expr::new(ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) }, line);
        }
        Ok(left)
    }

    /// `a ** b ** c` groups to the right.
    fn build_power(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut operands: Vec<Expr> = significant(node).map(|n| self.build_expr(n)).collect::<Result<_>>()?;
        if operands.len() > MAX_CHAIN_OPERANDS {
            return Err(SyntaxError::new(line, "expression is too complex"));
        }
        let mut result = operands.pop().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        while let Some(base) = operands.pop() {
            result = Expr::new(
                ExprKind::BinOp { left: Box::new(base), op: BinOp::Pow, right: Box::new(result) },
                line,
            );
        }
        Ok(result)
    }

    fn build_primary(&self, node: Node<'_>) -> Result<Expr> {
        let mut children = significant(node);
        let atom = children.next().ok_or_else(|| SyntaxError::new(self.line_base, "invalid syntax"))?;
        let mut expr = self.build_expr(atom)?;
        for (count, trailer) in children.enumerate() {
            let line = self.line_of(&trailer);
            if count >= MAX_CHAIN_OPERANDS {
                return Err(SyntaxError::new(line, "expression is too complex"));
            }
            expr = match trailer.as_rule() {
                Rule::call => {
                    let args = match significant(trailer).next() {
                        Some(arglist) => self.build_arglist(arglist)?,
                        None => Vec::new(),
                    };
                    Expr::new(ExprKind::Call { func: Box::new(expr), args }, line)
                }
                Rule::subscription => {
                    let index = self.build_subscript_list(self.first_child(trailer)?)?;
                    Expr::new(ExprKind::Subscript { value: Box::new(expr), index: Box::new(index) }, line)
                }
                Rule::attribute_ref => {
                    let attr = self.first_child(trailer)?.as_str().to_string();
                    Expr::new(ExprKind::Attribute { value: Box::new(expr), attr }, line)
                }
                _ => return Err(self.invalid(&trailer)),
            };
        }
        Ok(expr)
    }

    fn build_arglist(&self, node: Node<'_>) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        let mut seen_kwargs = false;
        let mut bare_generator = false;

        for arg in significant(node) {
            let line = self.line_of(&arg);
            match arg.as_rule() {
                Rule::keyword_arg => {
                    let err = self.invalid(&arg);
                    let mut parts = significant(arg);
                    let name = parts.next().ok_or_else(|| err.clone())?.as_str().to_string();
                    let value = self.build_expr(parts.next().ok_or(err)?)?;
                    if args.iter().any(|a| matches!(a, Argument::Keyword(n, _) if *n == name)) {
                        return Err(SyntaxError::new(line, format!("keyword argument repeated: {}", name)));
                    }
                    seen_keyword = true;
                    args.push(Argument::Keyword(name, value));
                }
                Rule::dstar_arg => {
                    seen_kwargs = true;
                    args.push(Argument::DoubleStarred(self.build_expr(self.first_child(arg)?)?));
                }
                Rule::star_arg => {
                    if seen_kwargs {
                        return Err(SyntaxError::new(
                            line,
                            "iterable argument unpacking follows keyword argument unpacking",
                        ));
                    }
                    args.push(Argument::Starred(self.build_expr(self.first_child(arg)?)?));
                }
                Rule::positional_arg => {
                    if seen_keyword || seen_kwargs {
                        return Err(SyntaxError::new(line, "positional argument follows keyword argument"));
                    }
                    let mut parts = significant(arg);
                    let element = self.build_expr(parts.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?)?;
                    let value = match parts.next() {
                        Some(clauses) => {
                            bare_generator = true;
                            self.build_comprehension(ComprehensionKind::Generator(element), clauses, line)?
                        }
                        None => element,
                    };
                    args.push(Argument::Positional(value));
                }
                _ => return Err(self.invalid(&arg)),
            }
        }

        if bare_generator && args.len() > 1 {
            return Err(SyntaxError::new(self.line_base, "Generator expression must be parenthesized"));
        }
        Ok(args)
    }

    fn build_subscript_list(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut items = Vec::new();
        let mut has_comma = false;
        for child in significant(node) {
            match child.as_rule() {
                Rule::comma => has_comma = true,
                Rule::subscript => items.push(self.build_subscript(child)?),
                _ => return Err(self.invalid(&child)),
            }
        }
        if !has_comma && items.len() == 1 {
            return Ok(items.remove(0));
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn build_subscript(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut colons = 0;
        for child in significant(node) {
            match child.as_rule() {
                Rule::slice_colon => colons += 1,
                _ => {
                    let slot = colons.min(2);
                    parts[slot] = Some(Box::new(self.build_expr(child)?));
                }
            }
        }
        let [lower, upper, step] = parts;
        if colons == 0 {
            return lower.map(|expr| *expr).ok_or_else(|| SyntaxError::new(line, "invalid syntax"));
        }
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn build_paren(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let (items, has_comma, clauses) = self.collect_items(node)?;
        if let Some(clauses) = clauses {
            let element = single(items, line)?;
            return self.build_comprehension(ComprehensionKind::Generator(element), clauses, line);
        }
        if items.len() == 1 && !has_comma {
            let item = single(items, line)?;
            if matches!(item.kind, ExprKind::Starred(_)) {
                return Err(SyntaxError::new(line, "cannot use starred expression here"));
            }
            return Ok(item);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn build_list(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let (items, _, clauses) = self.collect_items(node)?;
        if let Some(clauses) = clauses {
            let element = single(items, line)?;
            return self.build_comprehension(ComprehensionKind::List(element), clauses, line);
        }
        Ok(Expr::new(ExprKind::List(items), line))
    }

    /// Items of a parenthesised or bracketed display plus any comprehension.
    fn collect_items<'i>(&self, node: Node<'i>) -> Result<(Vec<Expr>, bool, Option<Node<'i>>)> {
        let mut items = Vec::new();
        let mut has_comma = false;
        let mut clauses = None;
        for child in significant(node) {
            match child.as_rule() {
                Rule::comma => has_comma = true,
                Rule::comp_clauses => clauses = Some(child),
                _ => items.push(self.build_expr(child)?),
            }
        }
        Ok((items, has_comma, clauses))
    }

    fn build_brace(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut pairs: Vec<DictItem> = Vec::new();
        let mut elements: Vec<Expr> = Vec::new();
        let mut clauses = None;

        for child in significant(node) {
            match child.as_rule() {
                Rule::comma => {}
                Rule::comp_clauses => clauses = Some(child),
                Rule::brace_item => {
                    let err = self.invalid(&child);
                    let mut parts = significant(child);
                    let first = parts.next().ok_or_else(|| err.clone())?;
                    match first.as_rule() {
                        Rule::dstar_item => {
                            pairs.push(DictItem::Unpack(self.build_expr(self.first_child(first)?)?));
                        }
                        _ => {
                            let key = self.build_expr(first)?;
                            match parts.next() {
                                Some(value) => {
                                    let value = self.build_expr(self.first_child(value)?)?;
                                    pairs.push(DictItem::Pair(key, value));
                                }
                                None => elements.push(key),
                            }
                        }
                    }
                    if !pairs.is_empty() && !elements.is_empty() {
                        return Err(err);
                    }
                }
                _ => return Err(self.invalid(&child)),
            }
        }

        if let Some(clauses) = clauses {
            if let Some(element) = elements.pop() {
                return self.build_comprehension(ComprehensionKind::Set(element), clauses, line);
            }
            return match pairs.pop() {
                Some(DictItem::Pair(key, value)) => {
                    self.build_comprehension(ComprehensionKind::Dict(key, value), clauses, line)
                }
                _ => Err(SyntaxError::new(line, "dict unpacking cannot be used in dict comprehension")),
            };
        }

        if !elements.is_empty() {
            return Ok(Expr::new(ExprKind::Set(elements), line));
        }
        Ok(Expr::new(ExprKind::Dict(pairs), line))
    }

    fn build_comprehension(&self, kind: ComprehensionKind, node: Node<'_>, line: usize) -> Result<Expr> {
        let mut clauses = Vec::new();
        for clause in significant(node) {
            let err = self.invalid(&clause);
            match clause.as_rule() {
                Rule::comp_for => {
                    let mut parts = significant(clause);
                    let target = self.build_expr(parts.next().ok_or_else(|| err.clone())?)?;
                    self.check_target(&target, "assign to")?;
                    let iter = self.build_expr(parts.next().ok_or(err)?)?;
                    clauses.push(CompClause::For { target, iter });
                }
                Rule::comp_if => {
                    clauses.push(CompClause::If(self.build_expr(self.first_child(clause)?)?));
                }
                _ => return Err(err),
            }
        }
        let scope = comprehension_scope(&clauses);
        Ok(Expr::new(
            ExprKind::Comprehension(Arc::new(Comprehension { kind, clauses, scope: Arc::new(scope) })),
            line,
        ))
    }

    // ------------------------------------------------------------------
    // Strings

    fn build_strings(&self, node: Node<'_>) -> Result<Expr> {
        let line = self.line_of(&node);
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut any_fstring = false;

        for literal in significant(node) {
            let lit_line = self.line_of(&literal);
            let mut prefix = String::new();
            let mut body = "";
            for part in literal.into_inner() {
                match part.as_rule() {
                    Rule::string_prefix => prefix = part.as_str().to_ascii_lowercase(),
                    _ => {
                        body = part.into_inner().next().map(|inner| inner.as_str()).unwrap_or("");
                    }
                }
            }
            if prefix.contains('b') {
                return Err(SyntaxError::new(lit_line, "bytes literals are not supported"));
            }
            let raw = prefix.contains('r');
            if prefix.contains('f') {
                any_fstring = true;
                parts.extend(self.parse_fstring(body, raw, lit_line)?);
            } else {
                let text = if raw {
                    body.to_string()
                } else {
                    decode_escapes(body).map_err(|message| SyntaxError::new(lit_line, message))?
                };
                parts.push(FStringPart::Literal(text));
            }
        }

        if !any_fstring {
            let text: String = parts
                .into_iter()
                .map(|part| match part {
                    FStringPart::Literal(text) => text,
                    FStringPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::constant(Constant::Str(text), line));
        }
        Ok(Expr::new(ExprKind::FString(merge_literals(parts)), line))
    }

    fn parse_fstring(&self, body: &str, raw: bool, line: usize) -> Result<Vec<FStringPart>> {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut pos = 0;

        let flush = |literal: &mut String, parts: &mut Vec<FStringPart>| -> Result<()> {
            if !literal.is_empty() {
                let text = if raw {
                    std::mem::take(literal)
                } else {
                    let decoded = decode_escapes(literal).map_err(|m| SyntaxError::new(line, m))?;
                    literal.clear();
                    decoded
                };
                parts.push(FStringPart::Literal(text));
            }
            Ok(())
        };

        while pos < chars.len() {
            let c = chars[pos];
            match c {
                '{' if chars.get(pos + 1) == Some(&'{') => {
                    literal.push('{');
                    pos += 2;
                }
                '}' if chars.get(pos + 1) == Some(&'}') => {
                    literal.push('}');
                    pos += 2;
                }
                '}' => return Err(SyntaxError::new(line, "f-string: single '}' is not allowed")),
                '{' => {
                    flush(&mut literal, &mut parts)?;
                    let (field, next) = self.parse_fstring_field(&chars, pos + 1, raw, line)?;
                    parts.extend(field);
                    pos = next;
                }
                _ => {
                    literal.push(c);
                    pos += 1;
                }
            }
        }
        flush(&mut literal, &mut parts)?;
        Ok(parts)
    }

    /// Parse one `{expr[=][!c][:spec]}` field starting after the `{`.
    /// Returns the produced parts and the position after the closing `}`.
    fn parse_fstring_field(
        &self,
        chars: &[char],
        start: usize,
        raw: bool,
        line: usize,
    ) -> Result<(Vec<FStringPart>, usize)> {
        let mut pos = start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut debug = false;

        // Expression text runs until a top-level '!', ':', '=' or '}'.
        let expr_end = loop {
            let Some(&c) = chars.get(pos) else {
                return Err(SyntaxError::new(line, "f-string: expecting '}'"));
            };
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                pos += 1;
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                '}' => break pos,
                '!' if depth == 0 && chars.get(pos + 1) != Some(&'=') => break pos,
                ':' if depth == 0 => break pos,
                '=' if depth == 0 => {
                    let prev = if pos > start { chars[pos - 1] } else { ' ' };
                    let next = chars.get(pos + 1).copied().unwrap_or(' ');
                    if next != '=' && !matches!(prev, '=' | '!' | '<' | '>') {
                        debug = true;
                        break pos;
                    }
                    if next == '=' {
                        pos += 1;
                    }
                }
                _ => {}
            }
            pos += 1;
        };

        let expr_text: String = chars[start..expr_end].iter().collect();
        if expr_text.trim().is_empty() {
            return Err(SyntaxError::new(line, "f-string: valid expression required before '}'"));
        }
        let expr = self.parse_fstring_expr(expr_text.trim(), line)?;

        pos = expr_end;
        let mut parts = Vec::new();
        if debug {
            parts.push(FStringPart::Literal(format!("{}=", expr_text)));
            pos += 1;
        }

        let mut conversion = None;
        if chars.get(pos) == Some(&'!') {
            match chars.get(pos + 1) {
                Some(&c) if matches!(c, 's' | 'r' | 'a') => conversion = Some(c),
                _ => {
                    return Err(SyntaxError::new(
                        line,
                        "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                    ))
                }
            }
            pos += 2;
        }

        let mut spec = Vec::new();
        if chars.get(pos) == Some(&':') {
            pos += 1;
            let spec_start = pos;
            let mut nested = 0usize;
            loop {
                match chars.get(pos) {
                    None => return Err(SyntaxError::new(line, "f-string: expecting '}'")),
                    Some('{') => nested += 1,
                    Some('}') if nested > 0 => nested -= 1,
                    Some('}') => break,
                    _ => {}
                }
                pos += 1;
            }
            let spec_text: String = chars[spec_start..pos].iter().collect();
            spec = self.parse_fstring(&spec_text, raw, line)?;
        }

        if chars.get(pos) != Some(&'}') {
            return Err(SyntaxError::new(line, "f-string: expecting '}'"));
        }
        if debug && conversion.is_none() && spec.is_empty() {
            conversion = Some('r');
        }
        parts.push(FStringPart::Field { expr: Box::new(expr), conversion, spec });
        Ok((parts, pos + 1))
    }

    fn parse_fstring_expr(&self, text: &str, line: usize) -> Result<Expr> {
        let mut pairs = SubmissionParser::parse(Rule::fstring_field, text)
            .map_err(|_| SyntaxError::new(line, "f-string: invalid syntax"))?;
        let node = pairs.next().ok_or_else(|| SyntaxError::new(line, "f-string: invalid syntax"))?;
        AstBuilder::new(line).build_expr(node)
    }
}

fn single(mut items: Vec<Expr>, line: usize) -> Result<Expr> {
    if items.len() != 1 {
        return Err(SyntaxError::new(line, "invalid syntax"));
    }
    Ok(items.remove(0))
}

fn merge_literals(parts: Vec<FStringPart>) -> Vec<FStringPart> {
    let mut merged: Vec<FStringPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(FStringPart::Literal(prev)), FStringPart::Literal(text)) => prev.push_str(&text),
            (_, part) => merged.push(part),
        }
    }
    merged
}

fn dotted_name(node: &Node<'_>) -> String {
    node.clone()
        .into_inner()
        .map(|part| part.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Short description of an expression for assignment errors.
fn describe(expr: &Expr) -> &'static str {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::FString(_) => "literal",
        ExprKind::Call { .. } => "function call",
        ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } => "expression",
        ExprKind::BoolOp { .. } => "expression",
        ExprKind::Compare { .. } => "comparison",
        ExprKind::IfExp { .. } => "conditional expression",
        ExprKind::Lambda(_) => "lambda",
        ExprKind::Dict(_) => "dict literal",
        ExprKind::Set(_) => "set display",
        ExprKind::Comprehension(_) => "comprehension",
        ExprKind::Tuple(_) => "tuple",
        ExprKind::List(_) => "list",
        ExprKind::Starred(_) => "starred",
        ExprKind::Slice { .. } => "slice",
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => "name",
    }
}
