//! Syntax tree of a submission.
//!
//! The tree is plain owned data (`Send + Sync`), so a validated program can be
//! handed to an execution worker as-is. Function bodies are shared through
//! `Arc` because every closure created at run time keeps a reference to its
//! definition.

use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign { targets: Vec<Expr>, value: Expr },
    AugAssign { target: Expr, op: BinOp, value: Expr },
    AnnAssign { target: Expr, annotation: Expr, value: Option<Expr> },
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    Raise { exception: Option<Expr>, cause: Option<Expr> },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Delete(Vec<Expr>),
    Assert { test: Expr, message: Option<Expr> },
    Import(Vec<ImportAlias>),
    ImportFrom(ImportFrom),
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    For { target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    FunctionDef(Arc<FunctionDef>),
    ClassDef(Arc<ClassDef>),
    Try(Box<TryStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportAlias {
    /// Dotted module or member name as written
    pub name: String,
    pub asname: Option<String>,
}

impl ImportAlias {
    /// Name bound in the importing scope by `import <name> [as <asname>]`.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(alias) => alias,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportFrom {
    /// `None` for `from . import x`
    pub module: Option<String>,
    /// Number of leading dots
    pub level: usize,
    pub names: ImportNames,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportNames {
    Star,
    Aliases(Vec<ImportAlias>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<Stmt>,
    pub finalbody: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

/// Names a function body binds, resolved once at parse time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeInfo {
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
}

impl ScopeInfo {
    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Parameters,
    pub body: Vec<Stmt>,
    pub scope: Arc<ScopeInfo>,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pub positional: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
    /// Parameter and return annotations. Never evaluated, only walked.
    pub annotations: Vec<Expr>,
}

impl Parameters {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positional
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwonly.iter().map(|p| p.name.as_str()))
            .chain(self.kwarg.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Constant),
    FString(Vec<FStringPart>),
    Name(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    BinOp { left: Box<Expr>, op: BinOp, right: Box<Expr> },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    BoolOp { op: BoolOp, values: Vec<Expr> },
    Compare { left: Box<Expr>, comparisons: Vec<(CmpOp, Expr)> },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
    Lambda(Arc<FunctionDef>),
    Call { func: Box<Expr>, args: Vec<Argument> },
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Slice { lower: Option<Box<Expr>>, upper: Option<Box<Expr>>, step: Option<Box<Expr>> },
    Comprehension(Arc<Comprehension>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: Vec<FStringPart>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Positional(Expr),
    Starred(Expr),
    Keyword(String, Expr),
    DoubleStarred(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    pub clauses: Vec<CompClause>,
    pub scope: Arc<ScopeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComprehensionKind {
    List(Expr),
    Set(Expr),
    Generator(Expr),
    Dict(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompClause {
    For { target: Expr, iter: Expr },
    If(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn constant(value: Constant, line: usize) -> Self {
        Self::new(ExprKind::Constant(value), line)
    }
}

/// Read-only traversal over the tree.
///
/// Override `visit_stmt` / `visit_expr` and call the matching `walk_*`
/// function to keep descending.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(expr) => visitor.visit_expr(expr),
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr(target);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::AnnAssign { target, annotation, value } => {
            visitor.visit_expr(target);
            visitor.visit_expr(annotation);
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Raise { exception, cause } => {
            for expr in exception.iter().chain(cause.iter()) {
                visitor.visit_expr(expr);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::Assert { test, message } => {
            visitor.visit_expr(test);
            if let Some(message) = message {
                visitor.visit_expr(message);
            }
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::For { target, iter, body, orelse } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::FunctionDef(def) => walk_function(visitor, def),
        StmtKind::ClassDef(def) => {
            for base in &def.bases {
                visitor.visit_expr(base);
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::Try(try_stmt) => {
            walk_body(visitor, &try_stmt.body);
            for handler in &try_stmt.handlers {
                if let Some(kind) = &handler.kind {
                    visitor.visit_expr(kind);
                }
                walk_body(visitor, &handler.body);
            }
            walk_body(visitor, &try_stmt.orelse);
            walk_body(visitor, &try_stmt.finalbody);
        }
        StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Import(_)
        | StmtKind::ImportFrom(_) => {}
    }
}

fn walk_function<V: Visitor + ?Sized>(visitor: &mut V, def: &FunctionDef) {
    for param in def.params.positional.iter().chain(def.params.kwonly.iter()) {
        if let Some(default) = &param.default {
            visitor.visit_expr(default);
        }
    }
    for annotation in &def.params.annotations {
        visitor.visit_expr(annotation);
    }
    walk_body(visitor, &def.body);
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
        ExprKind::FString(parts) => walk_fstring(visitor, parts),
        ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        ExprKind::Dict(items) => {
            for item in items {
                match item {
                    DictItem::Pair(key, value) => {
                        visitor.visit_expr(key);
                        visitor.visit_expr(value);
                    }
                    DictItem::Unpack(mapping) => visitor.visit_expr(mapping),
                }
            }
        }
        ExprKind::Starred(inner) => visitor.visit_expr(inner),
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Compare { left, comparisons } => {
            visitor.visit_expr(left);
            for (_, right) in comparisons {
                visitor.visit_expr(right);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Lambda(def) => walk_function(visitor, def),
        ExprKind::Call { func, args } => {
            visitor.visit_expr(func);
            for arg in args {
                match arg {
                    Argument::Positional(value)
                    | Argument::Starred(value)
                    | Argument::Keyword(_, value)
                    | Argument::DoubleStarred(value) => visitor.visit_expr(value),
                }
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Comprehension(comp) => {
            match &comp.kind {
                ComprehensionKind::List(element)
                | ComprehensionKind::Set(element)
                | ComprehensionKind::Generator(element) => visitor.visit_expr(element),
                ComprehensionKind::Dict(key, value) => {
                    visitor.visit_expr(key);
                    visitor.visit_expr(value);
                }
            }
            for clause in &comp.clauses {
                match clause {
                    CompClause::For { target, iter } => {
                        visitor.visit_expr(target);
                        visitor.visit_expr(iter);
                    }
                    CompClause::If(test) => visitor.visit_expr(test),
                }
            }
        }
    }
}

fn walk_fstring<V: Visitor + ?Sized>(visitor: &mut V, parts: &[FStringPart]) {
    for part in parts {
        if let FStringPart::Field { expr, spec, .. } = part {
            visitor.visit_expr(expr);
            walk_fstring(visitor, spec);
        }
    }
}

/// Collects the names a function body binds.
///
/// Nested function and class bodies are separate scopes, only their names
/// are bound here. Comprehension targets are never visible outside the
/// comprehension.
pub fn analyze_scope(params: &Parameters, body: &[Stmt]) -> ScopeInfo {
    let mut info = ScopeInfo::default();
    for name in params.names() {
        info.locals.insert(name.to_string());
    }
    collect_bindings(body, &mut info);
    for name in info.globals.iter().chain(info.nonlocals.iter()) {
        info.locals.remove(name);
    }
    info
}

fn collect_bindings(body: &[Stmt], info: &mut ScopeInfo) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    bind_target(target, info);
                }
            }
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                bind_target(target, info)
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    bind_target(target, info);
                }
            }
            StmtKind::Global(names) => info.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => info.nonlocals.extend(names.iter().cloned()),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    info.locals.insert(alias.bound_name().to_string());
                }
            }
            StmtKind::ImportFrom(import) => {
                if let ImportNames::Aliases(aliases) = &import.names {
                    for alias in aliases {
                        let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                        info.locals.insert(bound.to_string());
                    }
                }
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, info);
                collect_bindings(orelse, info);
            }
            StmtKind::For { target, body, orelse, .. } => {
                bind_target(target, info);
                collect_bindings(body, info);
                collect_bindings(orelse, info);
            }
            StmtKind::FunctionDef(def) => {
                info.locals.insert(def.name.clone());
            }
            StmtKind::ClassDef(def) => {
                info.locals.insert(def.name.clone());
            }
            StmtKind::Try(try_stmt) => {
                collect_bindings(&try_stmt.body, info);
                for handler in &try_stmt.handlers {
                    if let Some(name) = &handler.name {
                        info.locals.insert(name.clone());
                    }
                    collect_bindings(&handler.body, info);
                }
                collect_bindings(&try_stmt.orelse, info);
                collect_bindings(&try_stmt.finalbody, info);
            }
            StmtKind::Expr(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Return(_)
            | StmtKind::Raise { .. }
            | StmtKind::Assert { .. } => {}
        }
    }
}

fn bind_target(target: &Expr, info: &mut ScopeInfo) {
    match &target.kind {
        ExprKind::Name(name) => {
            info.locals.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                bind_target(item, info);
            }
        }
        ExprKind::Starred(inner) => bind_target(inner, info),
        _ => {}
    }
}

/// Names bound by the `for` clauses of a comprehension.
pub fn comprehension_scope(clauses: &[CompClause]) -> ScopeInfo {
    let mut info = ScopeInfo::default();
    for clause in clauses {
        if let CompClause::For { target, .. } = clause {
            bind_target(target, &mut info);
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Expr {
        Expr::new(ExprKind::Name(id.to_string()), 1)
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt { kind, line: 1 }
    }

    #[test]
    fn test_scope_collects_assignments_and_params() {
        let params = Parameters {
            positional: vec![Param { name: "a".to_string(), default: None }],
            ..Parameters::default()
        };
        let body = vec![
            stmt(StmtKind::Assign {
                targets: vec![Expr::new(ExprKind::Tuple(vec![name("x"), name("y")]), 1)],
                value: name("a"),
            }),
            stmt(StmtKind::Global(vec!["g".to_string()])),
            stmt(StmtKind::Assign { targets: vec![name("g")], value: name("a") }),
            stmt(StmtKind::Expr(name("unused"))),
        ];
        let info = analyze_scope(&params, &body);
        assert!(info.is_local("a"));
        assert!(info.is_local("x"));
        assert!(info.is_local("y"));
        assert!(!info.is_local("g"));
        assert!(info.globals.contains("g"));
        assert!(!info.is_local("unused"));
    }

    #[test]
    fn test_import_alias_binding() {
        let plain = ImportAlias { name: "os.path".to_string(), asname: None };
        assert_eq!(plain.bound_name(), "os");
        let aliased = ImportAlias { name: "math".to_string(), asname: Some("m".to_string()) };
        assert_eq!(aliased.bound_name(), "m");
    }

    #[test]
    fn test_visitor_reaches_nested_calls() {
        struct Calls(Vec<String>);
        impl Visitor for Calls {
            fn visit_expr(&mut self, expr: &Expr) {
                if let ExprKind::Call { func, .. } = &expr.kind {
                    if let ExprKind::Name(id) = &func.kind {
                        self.0.push(id.clone());
                    }
                }
                walk_expr(self, expr);
            }
        }

        let inner = Expr::new(ExprKind::Call { func: Box::new(name("eval")), args: vec![] }, 2);
        let outer = Expr::new(
            ExprKind::Call {
                func: Box::new(name("print")),
                args: vec![Argument::Positional(inner)],
            },
            2,
        );
        let def = FunctionDef {
            name: "f".to_string(),
            params: Parameters::default(),
            body: vec![stmt(StmtKind::Expr(outer))],
            scope: Arc::new(ScopeInfo::default()),
            line: 1,
        };
        let mut calls = Calls(Vec::new());
        walk_body(&mut calls, &[stmt(StmtKind::FunctionDef(Arc::new(def)))]);
        assert_eq!(calls.0, vec!["print".to_string(), "eval".to_string()]);
    }
}
