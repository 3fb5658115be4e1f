//! Static resolver pass for the **Lox** interpreter.
//!
//! This resolver does three things in one AST walk:
//! 1. Build lexical scopes (a stack of name → binding-state maps tracking
//!    declared/defined/used).
//! 2. Report static errors (redeclaration, forward-read in an initializer,
//!    misplaced `return`/`break`/`continue`/`this`/`super`, static `init`,
//!    locals that are never read). The pass keeps walking past errors so
//!    one run surfaces as many as possible; execution is gated on the
//!    collected list being empty.
//! 3. Tell the interpreter, for *each* variable occurrence, whether it is
//!    a local (and at what depth) or a global, so the interpreter never
//!    falls back to dynamic lookup that would see a later shadowing local.

use std::collections::HashMap;
use std::mem;

use log::{debug, info};

use crate::error::LoxError;
use crate::interpreter::Interpreter;
use crate::parser::{Expr, ExprId, FunctionDecl, Stmt};
use crate::token::Token;

/// What kind of function body is being resolved. Used to validate
/// `return` placement and the initializer return contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

/// What kind of class body is being resolved. Used to validate `this`
/// and `super`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Lifecycle of one local binding within its scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BindState {
    Declared,
    Defined,
    Used,
}

/// One tracked local: its state plus the declaration line for diagnostics.
#[derive(Debug)]
struct Binding {
    state: BindState,
    line: usize,
}

/// Resolver: tracks scopes, enforces static rules, and *records* binding
/// distances (locals vs. globals) by calling back into the interpreter.
pub struct Resolver<'interp, 'src> {
    interpreter: &'interp mut Interpreter<'src>,
    scopes: Vec<HashMap<&'src str, Binding>>,
    current_function: FunctionType,
    current_class: ClassType,
    in_loop: bool,
    errors: Vec<LoxError>,
}

impl<'interp, 'src> Resolver<'interp, 'src> {
    /// Create a new resolver bound to the given interpreter.
    pub fn new(interpreter: &'interp mut Interpreter<'src>) -> Self {
        info!("Resolver instantiated");

        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            in_loop: false,
            errors: Vec::new(),
        }
    }

    /// Walk all top-level statements, accumulating every static error.
    pub fn resolve(
        &mut self,
        statements: &[Stmt<'src>],
    ) -> std::result::Result<(), Vec<LoxError>> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );

        self.resolve_stmts(statements);

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(mem::take(&mut self.errors))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_stmts(&mut self, statements: &[Stmt<'src>]) {
        for stmt in statements {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt<'src>) {
        debug!("Resolving stmt: {:?}", stmt);

        match stmt {
            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr);
            }

            Stmt::Block(statements) => {
                self.begin_scope();
                self.resolve_stmts(statements);
                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                // declare → resolve initializer → define, so the
                // initializer sees the old binding, never its own.
                self.declare(name);

                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }

                self.define(name);
            }

            Stmt::Function(declaration) => {
                // The name is visible (and exempt from the unused check)
                // before the body resolves, permitting recursion.
                if let Some(name) = &declaration.name {
                    self.declare(name);
                    self.define(name);
                    self.mark_used(name);
                }

                self.resolve_function(declaration, FunctionType::Function);
            }

            Stmt::Class {
                name,
                superclass,
                methods,
                statics,
            } => self.resolve_class(name, superclass.as_ref(), methods, statics),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);

                if let Some(else_stmt) = else_branch.as_deref() {
                    self.resolve_stmt(else_stmt);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);

                let enclosing: bool = self.in_loop;
                self.in_loop = true;

                self.resolve_stmt(body);

                self.in_loop = enclosing;
            }

            Stmt::Break { keyword } => {
                if !self.in_loop {
                    self.errors.push(LoxError::resolve(
                        keyword.line,
                        "Cannot use 'break' outside of a loop.",
                    ));
                }
            }

            Stmt::Continue { keyword } => {
                if !self.in_loop {
                    self.errors.push(LoxError::resolve(
                        keyword.line,
                        "Cannot use 'continue' outside of a loop.",
                    ));
                }
            }

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.errors.push(LoxError::resolve(
                        keyword.line,
                        "Cannot return from top-level code.",
                    ));
                }

                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.errors.push(LoxError::resolve(
                            keyword.line,
                            "Cannot return a value from an initializer.",
                        ));
                    }

                    self.resolve_expr(expr);
                }
            }
        }
    }

    /// Class declaration: the name is declared before the superclass
    /// expression resolves, then `super` and `this` scopes wrap the method
    /// bodies. Static methods resolve inside the same scopes but never with
    /// initializer kind; a static named `init` is rejected outright.
    fn resolve_class(
        &mut self,
        name: &Token<'src>,
        superclass: Option<&Expr<'src>>,
        methods: &[std::rc::Rc<FunctionDecl<'src>>],
        statics: &[std::rc::Rc<FunctionDecl<'src>>],
    ) {
        let enclosing: ClassType = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name);

        if let Some(expr) = superclass {
            self.current_class = ClassType::Subclass;
            self.resolve_expr(expr);
        }

        self.define(name);
        self.mark_used(name);

        if superclass.is_some() {
            self.begin_scope();
            self.bind_keyword("super", name.line);
        }

        self.begin_scope();
        self.bind_keyword("this", name.line);

        for method in methods {
            let kind: FunctionType = if method.name_str() == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };

            self.resolve_function(method, kind);
        }

        for method in statics {
            if method.name_str() == "init" {
                let line: usize = method.name.as_ref().map_or(name.line, |token| token.line);

                self.errors.push(LoxError::resolve(
                    line,
                    "Initializer 'init' cannot be a static method.",
                ));
            }

            self.resolve_function(method, FunctionType::Method);
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr<'src>) {
        debug!("Resolving expr: {:?}", expr);

        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => {
                self.resolve_expr(inner);
            }

            Expr::Unary { right, .. } => {
                self.resolve_expr(right);
            }

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Ternary {
                condition,
                first,
                second,
            } => {
                self.resolve_expr(condition);
                self.resolve_expr(first);
                self.resolve_expr(second);
            }

            Expr::Variable { name, id } => {
                // Cannot read in own initializer.
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name.lexeme).map(|binding| binding.state)
                        == Some(BindState::Declared)
                    {
                        self.errors.push(LoxError::resolve(
                            name.line,
                            "Cannot read local variable in its own initializer.",
                        ));
                    }
                }

                self.resolve_local(*id, name);
            }

            Expr::Assign { name, value, id } => {
                // First resolve the RHS, then bind the LHS.
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);

                for argument in arguments {
                    self.resolve_expr(argument);
                }
            }

            Expr::Lambda(declaration) => {
                self.resolve_function(declaration, FunctionType::Function);
            }

            Expr::Get { object, .. } => {
                self.resolve_expr(object);
            }

            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }

            Expr::This { keyword, id } => {
                if self.current_class == ClassType::None {
                    self.errors.push(LoxError::resolve(
                        keyword.line,
                        "Cannot use 'this' outside of a class.",
                    ));
                }

                self.resolve_local(*id, keyword);
            }

            Expr::Super { keyword, id, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.errors.push(LoxError::resolve(
                            keyword.line,
                            "Cannot use 'super' outside of a class.",
                        ));
                    }

                    ClassType::Class => {
                        self.errors.push(LoxError::resolve(
                            keyword.line,
                            "Cannot use 'super' in a class with no superclass.",
                        ));
                    }

                    ClassType::Subclass => {}
                }

                self.resolve_local(*id, keyword);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Function helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Enter a fresh scope for a function's parameters + body. Parameters
    /// are pre-marked used; a loop outside the function does not license
    /// `break`/`continue` inside it.
    fn resolve_function(&mut self, declaration: &FunctionDecl<'src>, kind: FunctionType) {
        let enclosing_function: FunctionType = self.current_function;
        let enclosing_loop: bool = self.in_loop;

        self.current_function = kind;
        self.in_loop = false;

        self.begin_scope();

        for param in &declaration.params {
            self.declare(param);
            self.define(param);
            self.mark_used(param);
        }

        self.resolve_stmts(&declaration.body);

        self.end_scope();

        self.current_function = enclosing_function;
        self.in_loop = enclosing_loop;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pop the innermost scope, reporting every binding that was never
    /// read. `this`, `super`, parameters, and function/class names enter
    /// pre-marked and cannot trip this check.
    fn end_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            for (name, binding) in &scope {
                if binding.state != BindState::Used {
                    self.errors.push(LoxError::resolve(
                        binding.line,
                        format!("Local variable '{}' is never used.", name),
                    ));
                }
            }
        }
    }

    fn declare(&mut self, name: &Token<'src>) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        if scope.contains_key(name.lexeme) {
            self.errors.push(LoxError::resolve(
                name.line,
                "Already a variable with this name in this scope.",
            ));
        }

        scope.insert(
            name.lexeme,
            Binding {
                state: BindState::Declared,
                line: name.line,
            },
        );
    }

    fn define(&mut self, name: &Token<'src>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.lexeme,
                Binding {
                    state: BindState::Defined,
                    line: name.line,
                },
            );
        }
    }

    fn mark_used(&mut self, name: &Token<'src>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name.lexeme,
                Binding {
                    state: BindState::Used,
                    line: name.line,
                },
            );
        }
    }

    /// Insert an implicitly bound keyword slot (`this`/`super`) into the
    /// innermost scope, already satisfied for the unused check.
    fn bind_keyword(&mut self, name: &'static str, line: usize) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(
                name,
                Binding {
                    state: BindState::Used,
                    line,
                },
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding-distance helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Record this variable occurrence as either:
    ///  - a local at depth `d`, taken from the *innermost* scope that
    ///    declares the name (that binding is marked used), or
    ///  - a global if not found in any scope (nothing recorded; the
    ///    interpreter falls back to global lookup by name).
    fn resolve_local(&mut self, id: ExprId, name: &Token<'src>) {
        for (depth, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(binding) = scope.get_mut(name.lexeme) {
                debug!("Resolved '{}' at depth {}", name.lexeme, depth);

                binding.state = BindState::Used;
                self.interpreter.note_local(id, depth);

                return;
            }
        }

        debug!("Deferred '{}' to global lookup", name.lexeme);
    }
}
