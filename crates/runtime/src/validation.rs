//! Policy Validation Module
//!
//! This module statically checks a submission before anything runs. The
//! source is parsed, then every node is walked looking for imports of
//! modules outside the allow-list and direct calls to banned names.
//!
//! Only unqualified calls (`eval(...)`) are matched. Reaching a banned
//! capability through attributes is not detected here; the capability
//! namespace never provides those names in the first place.

use std::sync::Arc;

use pystep_protocol::ValidationVerdict;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ast::{walk_expr, walk_stmt, Expr, ExprKind, ImportFrom, Program, Stmt, StmtKind, Visitor};
use crate::config::PolicyConfig;
use crate::parser::{parse_program, SyntaxError};

/// Reasons a submission is rejected before execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("{0}")]
    Syntax(#[from] SyntaxError),

    #[error("submission size {size} bytes exceeds maximum {max_size} bytes")]
    SourceTooLarge { size: usize, max_size: usize },

    #[error("import of module '{module}' is not allowed (line {line})")]
    DisallowedImport { module: String, line: usize },

    #[error("call to '{name}' is not allowed (line {line})")]
    BannedCall { name: String, line: usize },
}

impl PolicyViolation {
    /// Source line the violation refers to, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            PolicyViolation::Syntax(err) => Some(err.line),
            PolicyViolation::SourceTooLarge { .. } => None,
            PolicyViolation::DisallowedImport { line, .. } | PolicyViolation::BannedCall { line, .. } => Some(*line),
        }
    }
}

/// Detailed outcome of validating one submission
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Whether the submission passed validation
    pub is_valid: bool,
    /// Size of the submission in bytes
    pub size_bytes: usize,
    /// Top-level statements in the parsed program
    pub statements: usize,
    /// Modules the program imports, in source order
    pub imports: Vec<String>,
    /// Violations found, in source order
    pub violations: Vec<PolicyViolation>,
}

impl ValidationReport {
    fn success(size_bytes: usize, statements: usize, imports: Vec<String>) -> Self {
        Self {
            is_valid: true,
            size_bytes,
            statements,
            imports,
            violations: Vec::new(),
        }
    }

    fn failure(size_bytes: usize, imports: Vec<String>, violations: Vec<PolicyViolation>) -> Self {
        Self {
            is_valid: false,
            size_bytes,
            statements: 0,
            imports,
            violations,
        }
    }

    /// Collapse the report into the wire verdict. The first violation wins.
    pub fn verdict(&self) -> ValidationVerdict {
        match self.violations.first() {
            None => ValidationVerdict::Accepted,
            Some(violation) => ValidationVerdict::Rejected {
                reason: violation.to_string(),
            },
        }
    }
}

/// Stack for the parser thread. Nested brackets recurse deeply through the
/// grammar, well past what a default thread stack holds in debug builds.
const PARSER_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Static validator bound to one shared policy
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    policy: Arc<PolicyConfig>,
}

impl PolicyValidator {
    pub fn new(policy: Arc<PolicyConfig>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Validate a submission and return the verdict only.
    pub fn validate(&self, source: &str) -> ValidationVerdict {
        self.report(source).verdict()
    }

    /// Parse and check a submission, returning the program when it is acceptable.
    pub fn check(&self, source: &str) -> Result<Program, Vec<PolicyViolation>> {
        match self.inspect(source) {
            (Some(program), violations) if violations.is_empty() => Ok(program),
            (_, violations) => Err(violations),
        }
    }

    /// Full report, including the imports seen.
    pub fn report(&self, source: &str) -> ValidationReport {
        let size_bytes = source.len();
        let (program, violations) = self.inspect(source);
        let imports = program.as_ref().map(collect_imports).unwrap_or_default();
        match program {
            Some(program) if violations.is_empty() => {
                ValidationReport::success(size_bytes, program.body.len(), imports)
            }
            _ => {
                debug!(size_bytes, violations = violations.len(), "submission rejected");
                ValidationReport::failure(size_bytes, imports, violations)
            }
        }
    }

    /// Run [`Self::inspect_here`] on a thread with a parser sized stack, so
    /// the caller's own stack depth never matters.
    fn inspect(&self, source: &str) -> (Option<Program>, Vec<PolicyViolation>) {
        std::thread::scope(|scope| {
            let spawned = std::thread::Builder::new()
                .name("pystep-validate".to_string())
                .stack_size(PARSER_STACK_BYTES)
                .spawn_scoped(scope, || self.inspect_here(source));
            match spawned {
                Ok(handle) => match handle.join() {
                    Ok(inspected) => inspected,
                    Err(panic) => std::panic::resume_unwind(panic),
                },
                Err(err) => {
                    warn!(error = %err, "could not start validation thread, parsing inline");
                    self.inspect_here(source)
                }
            }
        })
    }

    fn inspect_here(&self, source: &str) -> (Option<Program>, Vec<PolicyViolation>) {
        // Check size limits first (fast check)
        let max_size = self.policy.max_source_bytes();
        if source.len() > max_size {
            let violation = PolicyViolation::SourceTooLarge {
                size: source.len(),
                max_size,
            };
            return (None, vec![violation]);
        }

        let program = match parse_program(source) {
            Ok(program) => program,
            Err(err) => return (None, vec![PolicyViolation::from(err)]),
        };

        let mut walker = PolicyWalker::new(&self.policy);
        walker.visit_body(&program.body);
        (Some(program), walker.violations)
    }
}

/// Validate a submission against a policy.
pub fn validate(source: &str, policy: &PolicyConfig) -> ValidationVerdict {
    PolicyValidator::new(Arc::new(policy.clone())).validate(source)
}

struct PolicyWalker<'p> {
    policy: &'p PolicyConfig,
    violations: Vec<PolicyViolation>,
}

impl<'p> PolicyWalker<'p> {
    fn new(policy: &'p PolicyConfig) -> Self {
        Self {
            policy,
            violations: Vec::new(),
        }
    }

    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn check_module(&mut self, module: &str, line: usize) {
        if !self.policy.allows_module(module) {
            self.violations.push(PolicyViolation::DisallowedImport {
                module: module.to_string(),
                line,
            });
        }
    }
}

impl Visitor for PolicyWalker<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.check_module(&alias.name, stmt.line);
                }
            }
            // `from . import x` names no module and is left to fail at run time.
            StmtKind::ImportFrom(ImportFrom { module: Some(module), .. }) => self.check_module(module, stmt.line),
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call { func, .. } = &expr.kind {
            if let ExprKind::Name(name) = &func.kind {
                if self.policy.is_banned(name) {
                    self.violations.push(PolicyViolation::BannedCall {
                        name: name.clone(),
                        line: expr.line,
                    });
                }
            }
        }
        walk_expr(self, expr);
    }
}

fn collect_imports(program: &Program) -> Vec<String> {
    struct Imports(Vec<String>);

    impl Visitor for Imports {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            match &stmt.kind {
                StmtKind::Import(aliases) => self.0.extend(aliases.iter().map(|a| a.name.clone())),
                StmtKind::ImportFrom(ImportFrom { module: Some(module), .. }) => self.0.push(module.clone()),
                _ => {}
            }
            walk_stmt(self, stmt);
        }
    }

    let mut imports = Imports(Vec::new());
    for stmt in &program.body {
        imports.visit_stmt(stmt);
    }
    imports.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(modules: &str) -> PolicyValidator {
        PolicyValidator::new(Arc::new(PolicyConfig::from_csv(modules).unwrap()))
    }

    #[test]
    fn test_rejects_disallowed_import() {
        let verdict = validator("math,random").validate("import os");
        assert_eq!(
            verdict,
            ValidationVerdict::Rejected {
                reason: "import of module 'os' is not allowed (line 1)".to_string()
            }
        );
    }

    #[test]
    fn test_accepts_whitelisted_program() {
        let verdict = validator("math").validate("import math\nprint(1)");
        assert!(verdict.is_accepted());
    }

    #[test]
    fn test_dotted_and_from_imports() {
        let v = validator("math,json");
        assert!(v.validate("import math.fake as m").is_accepted());
        assert!(v.validate("from json import dumps").is_accepted());
        let verdict = v.validate("x = 1\nfrom os.path import join");
        assert_eq!(verdict.reason(), Some("import of module 'os.path' is not allowed (line 2)"));
        assert!(v.validate("from . import sibling").is_accepted());
    }

    #[test]
    fn test_nested_imports_are_found() {
        let source = "def f():\n    if True:\n        import subprocess\n";
        let verdict = validator("math").validate(source);
        assert_eq!(verdict.reason(), Some("import of module 'subprocess' is not allowed (line 3)"));
    }

    #[test]
    fn test_banned_direct_calls() {
        let v = validator("math");
        let verdict = v.validate("print(eval('1 + 1'))");
        assert_eq!(verdict.reason(), Some("call to 'eval' is not allowed (line 1)"));

        let verdict = v.validate("f = lambda: open('x')");
        assert!(!verdict.is_accepted());

        // Attribute-qualified calls are not matched by name.
        assert!(v.validate("x.eval('1')").is_accepted());
        // Referencing without calling is not a call.
        assert!(v.validate("f = eval").is_accepted());
    }

    #[test]
    fn test_banned_calls_in_annotations() {
        let v = validator("math");
        let verdict = v.validate("x: eval('t') = 1");
        assert_eq!(verdict.reason(), Some("call to 'eval' is not allowed (line 1)"));

        let verdict = v.validate("y = 2\ndef f(a: open('x')):\n    pass\n");
        assert_eq!(verdict.reason(), Some("call to 'open' is not allowed (line 2)"));

        let report = v.report("def g(*a: exec('1'), b: int = 0, **k: eval('2')) -> open('y'):\n    pass\n");
        assert_eq!(report.violations.len(), 3);

        assert!(v.validate("total: int = 0\ndef h(n: int, *rest: str) -> list:\n    return [n]\n").is_accepted());
    }

    #[test]
    fn test_syntax_error_reason() {
        let verdict = validator("math").validate("x = 1\ny = = 2\n");
        assert_eq!(verdict.reason(), Some("syntax error at line 2: invalid syntax"));
    }

    #[test]
    fn test_size_validation() {
        let policy = PolicyConfig::from_csv("math").unwrap().with_max_source_bytes(10);
        let v = PolicyValidator::new(Arc::new(policy));
        let report = v.report("print('this is too long')");
        assert!(!report.is_valid);
        assert!(matches!(report.violations[0], PolicyViolation::SourceTooLarge { .. }));
        assert_eq!(report.violations[0].line(), None);
    }

    #[test]
    fn test_report_lists_every_violation() {
        let report = validator("math").report("import os\nimport math\nexec('x')\nimport sys");
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 3);
        assert_eq!(report.imports, vec!["os", "math", "sys"]);
        assert_eq!(report.violations[1].line(), Some(3));
        assert_eq!(report.violations[2].line(), Some(4));
        assert_eq!(report.verdict().reason(), Some("import of module 'os' is not allowed (line 1)"));
    }

    #[test]
    fn test_report_success() {
        let report = validator("math").report("import math\nprint(math.pi)\n");
        assert!(report.is_valid);
        assert_eq!(report.statements, 2);
        assert_eq!(report.imports, vec!["math"]);
    }

    #[test]
    fn test_deep_brackets_validate_on_a_small_stack() {
        let sources = [
            format!("x = {}1{}", "(".repeat(32), ")".repeat(32)),
            format!("x = {}1{}", "[".repeat(32), "]".repeat(32)),
            format!("x = {}1{}", "f(".repeat(32), ")".repeat(32)),
        ];
        let verdicts = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let v = validator("math");
                sources.iter().map(|source| v.validate(source)).collect::<Vec<_>>()
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(verdicts.iter().all(ValidationVerdict::is_accepted), "{:?}", verdicts);

        let too_deep = format!("x = {}1{}", "(".repeat(40), ")".repeat(40));
        assert!(!validator("math").validate(&too_deep).is_accepted());
    }

    #[test]
    fn test_free_function() {
        let policy = PolicyConfig::from_csv("math,random").unwrap();
        assert!(validate("import random\nprint(random.randint(1, 6))", &policy).is_accepted());
        assert!(!validate("import socket", &policy).is_accepted());
    }
}
