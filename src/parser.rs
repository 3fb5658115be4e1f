/*!
Recursive-descent parser and AST definitions for Lox.

The parser consumes the scanner's token sequence and produces owned
statement/expression trees: tokens are cloned out of the borrowed slice, so
the AST's only lifetime is the source text itself. Function declarations are
wrapped in `Rc` because the interpreter shares them with every closure value
created from the same declaration.

Every node that can be the target of variable resolution (variable reference,
assignment, `this`, `super`) carries a unique [`ExprId`], assigned from a
process-wide counter at construction. The resolver keys its distance table by
these ids; a session-long table therefore never confuses two structurally
identical nodes, even across separate REPL lines.

Time is Θ(n) over the token stream: each token is consumed once via
`advance()`, and error recovery (`synchronize`) only discards tokens up to the
next statement boundary. Space is one `Box`/`Vec` per interior node.

Grammar (EBNF, extensions included)
-----------------------------------

```text
program        → declaration* EOF ;
declaration    → classDecl | funDecl | varDecl | statement ;
classDecl      → "class" IDENT ( "<" IDENT )? "{" ( "class"? function )* "}" ;
funDecl        → "fun" function ;            // only when IDENT follows "fun"
function       → IDENT "(" parameters? ")" block ;
varDecl        → "var" IDENT ( "=" expression )? ";" ;
statement      → exprStmt | forStmt | ifStmt | printStmt | returnStmt
               | whileStmt | breakStmt | continueStmt | block ;
forStmt        → "for" "(" ( varDecl | exprStmt | ";" ) expression? ";"
                 expression? ")" statement ;          // desugars to while
expression     → comma ;
comma          → assignment ( "," assignment )* ;
assignment     → ( call "." )? IDENT "=" assignment | ternary ;
ternary        → logic_or ( "?" expression ":" ternary )? ;
logic_or       → logic_and ( "or" logic_and )* ;
logic_and      → equality ( "and" equality )* ;
equality       → bit_or ( ( "!=" | "==" ) bit_or )* ;
bit_or         → bit_xor ( "|" bit_xor )* ;
bit_xor        → bit_and ( "^" bit_and )* ;
bit_and        → comparison ( "&" comparison )* ;
comparison     → term ( ( ">" | ">=" | "<" | "<=" ) term )* ;
term           → factor ( ( "-" | "+" ) factor )* ;
factor         → unary ( ( "/" | "*" ) unary )* ;
unary          → ( "!" | "-" ) unary | call ;
call           → primary ( "(" arguments? ")" | "." IDENT )* ;
arguments      → assignment ( "," assignment )* ;     // comma operator excluded
primary        → NUMBER | STRING | "true" | "false" | "nil"
               | "fun" "(" parameters? ")" block      // anonymous function
               | "this" | "super" "." IDENT
               | IDENT | "(" expression ")" ;
```

`for` never reaches the later passes: it is rewritten here into
`{ init; while (cond) { body; incr; } }`, with a literal `true` condition when
the clause is empty. The increment is the tail statement of the loop-body
block, so a `continue` truncating that block also skips the increment for
that iteration.

Error recovery: a failed declaration records its error, discards tokens to
the next statement boundary, and parsing continues; the entry point returns
either the full statement list or every collected error.
*/

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::error::{LoxError, Result};
use crate::token::{Token, TokenType};

use log::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// AST
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a resolvable AST node, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExprId(usize);

impl ExprId {
    /// Allocate a fresh id. Process-wide so REPL lines never collide in the
    /// session's resolution table.
    fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);

        ExprId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A **literal constant** appearing directly in the source.
///
/// These are the terminal leaves of the expression tree; the parser copies
/// the value out of the token at parse time so the AST can outlive the
/// lexer's token buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LiteralValue {
    /// Numeric literal, IEEE-754 `f64`. Integral lexemes such as `"3"` still
    /// parse as `3.0`.
    Number(f64),

    /// String literal without the surrounding quotes.
    Str(String),

    /// The boolean constant `true`.
    True,

    /// The boolean constant `false`.
    False,

    /// The `nil` literal.
    Nil,
}

/// A function declaration shared between the AST and the runtime: named
/// functions and methods carry their name token, anonymous `fun` expressions
/// do not. Closure values hold an `Rc` to this node, so a declaration is
/// parsed once and shared by every closure created from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl<'src> {
    /// Name token; `None` for anonymous functions.
    pub name: Option<Token<'src>>,

    /// Parameter name tokens (at most 255).
    pub params: Vec<Token<'src>>,

    /// Body statements, executed in a fresh scope on every call.
    pub body: Vec<Stmt<'src>>,
}

impl<'src> FunctionDecl<'src> {
    /// The declared name, or `<fn>` placeholder text for anonymous functions.
    pub fn name_str(&self) -> &str {
        self.name.as_ref().map_or("<anonymous>", |t| t.lexeme)
    }
}

/// **Expression node.** The lifetime ties lexemes back to the source buffer;
/// tokens themselves are stored by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr<'src> {
    /// A literal constant: number, string, `true`, `false`, or `nil`.
    Literal(LiteralValue),

    /// Prefix unary operator: `!ready`, `-42`.
    Unary {
        /// The operator token (`!` or `-`).
        operator: Token<'src>,
        right: Box<Expr<'src>>,
    },

    /// Infix binary operator: arithmetic, comparison, equality, bitwise, and
    /// the comma operator.
    Binary {
        left: Box<Expr<'src>>,
        operator: Token<'src>,
        right: Box<Expr<'src>>,
    },

    /// `condition ? first : second`; only the selected branch is evaluated.
    Ternary {
        condition: Box<Expr<'src>>,
        first: Box<Expr<'src>>,
        second: Box<Expr<'src>>,
    },

    /// Parenthesised sub-expression.
    Grouping(Box<Expr<'src>>),

    /// Variable reference, resolved by the static pass via `id`.
    Variable { name: Token<'src>, id: ExprId },

    /// Assignment to a variable: `name = value`.
    Assign {
        name: Token<'src>,
        value: Box<Expr<'src>>,
        id: ExprId,
    },

    /// Short-circuiting `and` / `or`.
    Logical {
        left: Box<Expr<'src>>,
        operator: Token<'src>,
        right: Box<Expr<'src>>,
    },

    /// Call expression: `callee(arguments)`.
    Call {
        callee: Box<Expr<'src>>,
        /// The closing `)`, kept for runtime error locations.
        paren: Token<'src>,
        arguments: Vec<Expr<'src>>,
    },

    /// Anonymous function expression.
    Lambda(Rc<FunctionDecl<'src>>),

    /// Property read: `object.name`.
    Get {
        object: Box<Expr<'src>>,
        name: Token<'src>,
    },

    /// Property write: `object.name = value`.
    Set {
        object: Box<Expr<'src>>,
        name: Token<'src>,
        value: Box<Expr<'src>>,
    },

    /// The `this` keyword inside a method body.
    This { keyword: Token<'src>, id: ExprId },

    /// `super.method` inside a subclass method body.
    Super {
        keyword: Token<'src>,
        method: Token<'src>,
        id: ExprId,
    },
}

/// **Statement node.** A program is the `Vec<Stmt>` returned by
/// [`Parser::parse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt<'src> {
    /// Stand-alone expression terminated by `;`.
    Expression(Expr<'src>),

    /// `print expr ;`
    Print(Expr<'src>),

    /// `var name ( = initializer )? ;`
    Var {
        name: Token<'src>,
        initializer: Option<Expr<'src>>,
    },

    /// Braced scope containing zero or more declarations/statements.
    Block(Vec<Stmt<'src>>),

    /// `if` / optional `else`.
    If {
        condition: Expr<'src>,
        then_branch: Box<Stmt<'src>>,
        else_branch: Option<Box<Stmt<'src>>>,
    },

    /// `while` loop. `for` loops desugar into this plus enclosing blocks.
    While {
        condition: Expr<'src>,
        body: Box<Stmt<'src>>,
    },

    /// Named function declaration; becomes a first-class closure value.
    Function(Rc<FunctionDecl<'src>>),

    /// Class declaration with optional superclass, instance methods, and
    /// static methods (marked by a leading `class` keyword in the body).
    Class {
        name: Token<'src>,
        /// Always an `Expr::Variable` when present; kept as an expression so
        /// the resolver and evaluator treat it like any other reference.
        superclass: Option<Expr<'src>>,
        methods: Vec<Rc<FunctionDecl<'src>>>,
        statics: Vec<Rc<FunctionDecl<'src>>>,
    },

    /// `break ;` — the keyword token is kept for diagnostics.
    Break { keyword: Token<'src> },

    /// `continue ;`
    Continue { keyword: Token<'src> },

    /// `return ( value )? ;`
    Return {
        keyword: Token<'src>,
        value: Option<Expr<'src>>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level parser over an immutable slice of tokens. `'t` is the borrow of
/// the token slice, `'src` the source text the lexemes point into; the
/// produced AST only carries `'src`.
pub struct Parser<'t, 'src> {
    tokens: &'t [Token<'src>],
    current: usize,
    errors: Vec<LoxError>,
}

impl<'t, 'src> Parser<'t, 'src> {
    /// Construct a new parser.
    pub fn new(tokens: &'t [Token<'src>]) -> Self {
        info!("Parser created with {} tokens", tokens.len());

        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    // ───────────────────────── public API ─────────────────────────

    /// Parse an entire program. Returns the statement list, or every parse
    /// error encountered (recovery continues at statement boundaries).
    pub fn parse(&mut self) -> std::result::Result<Vec<Stmt<'src>>, Vec<LoxError>> {
        info!("Beginning parse phase");

        let mut statements: Vec<Stmt<'src>> = Vec::new();

        while !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        if self.errors.is_empty() {
            info!("Parse phase produced {} statements", statements.len());

            Ok(statements)
        } else {
            info!("Parse phase failed with {} errors", self.errors.len());

            Err(std::mem::take(&mut self.errors))
        }
    }

    // ──────────────────────── declaration rules ───────────────────

    /// One declaration or statement. On error: record it, resynchronize, and
    /// return `None` so the caller can keep going.
    fn declaration(&mut self) -> Option<Stmt<'src>> {
        debug!("Entering declaration");

        let result: Result<Stmt<'src>> = if self.matches(TokenType::CLASS) {
            self.class_declaration()
        } else if self.check(TokenType::FUN) && self.check_next(TokenType::IDENTIFIER) {
            self.advance(); // consume 'fun'; lambdas take the expression path
            self.function("function").map(Stmt::Function)
        } else if self.matches(TokenType::VAR) {
            self.var_declaration()
        } else {
            self.statement()
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(e) => {
                debug!("Recovering from parse error: {}", e);

                self.errors.push(e);
                self.synchronize();

                None
            }
        }
    }

    fn class_declaration(&mut self) -> Result<Stmt<'src>> {
        let name: Token<'src> = self
            .consume(TokenType::IDENTIFIER, "Expected class name")?
            .clone();

        let superclass: Option<Expr<'src>> = if self.matches(TokenType::LESS) {
            let sup: Token<'src> = self
                .consume(TokenType::IDENTIFIER, "Expected superclass name")?
                .clone();

            Some(Expr::Variable {
                name: sup,
                id: ExprId::next(),
            })
        } else {
            None
        };

        self.consume(TokenType::LEFT_BRACE, "Expected '{' before class body")?;

        let mut methods: Vec<Rc<FunctionDecl<'src>>> = Vec::new();
        let mut statics: Vec<Rc<FunctionDecl<'src>>> = Vec::new();

        while !self.check(TokenType::RIGHT_BRACE) && !self.is_at_end() {
            // A leading 'class' keyword marks a static method.
            if self.matches(TokenType::CLASS) {
                statics.push(self.function("static method")?);
            } else {
                methods.push(self.function("method")?);
            }
        }

        self.consume(TokenType::RIGHT_BRACE, "Expected '}' after class body")?;

        Ok(Stmt::Class {
            name,
            superclass,
            methods,
            statics,
        })
    }

    /// Shared tail of named function parsing: `IDENT "(" params? ")" block`.
    /// `kind` distinguishes diagnostics for functions, methods, and static
    /// methods.
    fn function(&mut self, kind: &str) -> Result<Rc<FunctionDecl<'src>>> {
        let name: Token<'src> = self
            .consume(TokenType::IDENTIFIER, &format!("Expected {kind} name"))?
            .clone();

        self.consume(
            TokenType::LEFT_PAREN,
            &format!("Expected '(' after {kind} name"),
        )?;

        let params: Vec<Token<'src>> = self.parameters()?;

        self.consume(
            TokenType::LEFT_BRACE,
            &format!("Expected '{{' before {kind} body"),
        )?;

        let body: Vec<Stmt<'src>> = self.block()?;

        Ok(Rc::new(FunctionDecl {
            name: Some(name),
            params,
            body,
        }))
    }

    /// Parameter list including the closing `)`. Enforces the 255 cap.
    fn parameters(&mut self) -> Result<Vec<Token<'src>>> {
        let mut params: Vec<Token<'src>> = Vec::new();

        if !self.check(TokenType::RIGHT_PAREN) {
            loop {
                if params.len() >= 255 {
                    return Err(LoxError::parse(
                        self.peek().line,
                        "Cannot have more than 255 parameters",
                    ));
                }

                params.push(
                    self.consume(TokenType::IDENTIFIER, "Expected parameter name")?
                        .clone(),
                );

                if !self.matches(TokenType::COMMA) {
                    break;
                }
            }
        }

        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after parameters")?;

        Ok(params)
    }

    fn var_declaration(&mut self) -> Result<Stmt<'src>> {
        let name: Token<'src> = self
            .consume(TokenType::IDENTIFIER, "Expected variable name")?
            .clone();

        let initializer: Option<Expr<'src>> = if self.matches(TokenType::EQUAL) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(
            TokenType::SEMICOLON,
            "Expected ';' after variable declaration",
        )?;

        Ok(Stmt::Var { name, initializer })
    }

    // ───────────────────────── statement rules ────────────────────

    fn statement(&mut self) -> Result<Stmt<'src>> {
        debug!("Entering statement");

        if self.matches(TokenType::FOR) {
            self.for_statement()
        } else if self.matches(TokenType::IF) {
            self.if_statement()
        } else if self.matches(TokenType::WHILE) {
            self.while_statement()
        } else if self.matches(TokenType::RETURN) {
            self.return_statement()
        } else if self.matches(TokenType::BREAK) {
            let keyword: Token<'src> = self.previous().clone();

            self.consume(TokenType::SEMICOLON, "Expected ';' after 'break'")?;

            Ok(Stmt::Break { keyword })
        } else if self.matches(TokenType::CONTINUE) {
            let keyword: Token<'src> = self.previous().clone();

            self.consume(TokenType::SEMICOLON, "Expected ';' after 'continue'")?;

            Ok(Stmt::Continue { keyword })
        } else if self.matches(TokenType::LEFT_BRACE) {
            Ok(Stmt::Block(self.block()?))
        } else if self.matches(TokenType::PRINT) {
            self.print_statement()
        } else {
            self.expression_statement()
        }
    }

    /// `for` is pure sugar: rewrite into an initializer block around a
    /// `while` whose body ends with the increment statement.
    fn for_statement(&mut self) -> Result<Stmt<'src>> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'for'")?;

        let initializer: Option<Stmt<'src>> = if self.matches(TokenType::SEMICOLON) {
            None
        } else if self.matches(TokenType::VAR) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition: Option<Expr<'src>> = if !self.check(TokenType::SEMICOLON) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::SEMICOLON, "Expected ';' after loop condition")?;

        let increment: Option<Expr<'src>> = if !self.check(TokenType::RIGHT_PAREN) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after for clauses")?;

        let mut body: Stmt<'src> = self.statement()?;

        // The increment is the tail of the loop-body block; a `continue`
        // truncates the block and therefore skips it for that iteration.
        if let Some(incr) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(incr)]);
        }

        body = Stmt::While {
            condition: condition.unwrap_or(Expr::Literal(LiteralValue::True)),
            body: Box::new(body),
        };

        if let Some(init) = initializer {
            body = Stmt::Block(vec![init, body]);
        }

        Ok(body)
    }

    fn print_statement(&mut self) -> Result<Stmt<'src>> {
        let value: Expr<'src> = self.expression()?;

        self.consume(TokenType::SEMICOLON, "Expected ';' after value")?;

        Ok(Stmt::Print(value))
    }

    fn expression_statement(&mut self) -> Result<Stmt<'src>> {
        let expr: Expr<'src> = self.expression()?;

        self.consume(TokenType::SEMICOLON, "Expected ';' after expression")?;

        Ok(Stmt::Expression(expr))
    }

    fn if_statement(&mut self) -> Result<Stmt<'src>> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'if'")?;
        let condition: Expr<'src> = self.expression()?;
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after condition")?;

        let then_branch: Box<Stmt<'src>> = Box::new(self.statement()?);
        let else_branch: Option<Box<Stmt<'src>>> = if self.matches(TokenType::ELSE) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt<'src>> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'while'")?;
        let condition: Expr<'src> = self.expression()?;
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after condition")?;

        let body: Box<Stmt<'src>> = Box::new(self.statement()?);

        Ok(Stmt::While { condition, body })
    }

    fn return_statement(&mut self) -> Result<Stmt<'src>> {
        let keyword: Token<'src> = self.previous().clone();

        let value: Option<Expr<'src>> = if !self.check(TokenType::SEMICOLON) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(TokenType::SEMICOLON, "Expected ';' after return value")?;

        Ok(Stmt::Return { keyword, value })
    }

    fn block(&mut self) -> Result<Vec<Stmt<'src>>> {
        let mut statements: Vec<Stmt<'src>> = Vec::new();

        while !self.check(TokenType::RIGHT_BRACE) && !self.is_at_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }

        self.consume(TokenType::RIGHT_BRACE, "Expected '}' after block")?;

        Ok(statements)
    }

    // ─────────────────────── expression rules ─────────────────────

    fn expression(&mut self) -> Result<Expr<'src>> {
        self.comma()
    }

    /// Lowest precedence: the comma operator evaluates its left operand for
    /// effect and yields the right. Argument lists start below this level.
    fn comma(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.assignment()?;

        while self.matches(TokenType::COMMA) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.assignment()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Expr<'src>> {
        let expr: Expr<'src> = self.ternary()?;

        if self.matches(TokenType::EQUAL) {
            let equals: Token<'src> = self.previous().clone();
            let value: Expr<'src> = self.assignment()?;

            match expr {
                Expr::Variable { name, .. } => {
                    return Ok(Expr::Assign {
                        name,
                        value: Box::new(value),
                        id: ExprId::next(),
                    });
                }

                Expr::Get { object, name } => {
                    return Ok(Expr::Set {
                        object,
                        name,
                        value: Box::new(value),
                    });
                }

                _ => {
                    return Err(LoxError::parse(equals.line, "Invalid assignment target"));
                }
            }
        }

        Ok(expr)
    }

    /// `cond ? first : second`, right-associative; either branch may itself
    /// be a ternary.
    fn ternary(&mut self) -> Result<Expr<'src>> {
        let expr: Expr<'src> = self.logical_or()?;

        if self.matches(TokenType::QMARK) {
            let first: Expr<'src> = self.expression()?;

            self.consume(TokenType::COLON, "Expected ':' in ternary expression")?;

            let second: Expr<'src> = self.ternary()?;

            return Ok(Expr::Ternary {
                condition: Box::new(expr),
                first: Box::new(first),
                second: Box::new(second),
            });
        }

        Ok(expr)
    }

    fn logical_or(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.logical_and()?;

        while self.matches(TokenType::OR) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.logical_and()?;

            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.equality()?;

        while self.matches(TokenType::AND) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.equality()?;

            expr = Expr::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.bit_or()?;

        while self.matches(TokenType::BANG_EQUAL) || self.matches(TokenType::EQUAL_EQUAL) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.bit_or()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    // The bitwise chain sits between equality and comparison, binding looser
    // than `<` and tighter than `==`.

    fn bit_or(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.bit_xor()?;

        while self.matches(TokenType::BITWISE_OR) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.bit_xor()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn bit_xor(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.bit_and()?;

        while self.matches(TokenType::XOR) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.bit_and()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn bit_and(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.comparison()?;

        while self.matches(TokenType::BITWISE_AND) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.comparison()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.term()?;

        while self.matches(TokenType::GREATER)
            || self.matches(TokenType::GREATER_EQUAL)
            || self.matches(TokenType::LESS)
            || self.matches(TokenType::LESS_EQUAL)
        {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.term()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.factor()?;

        while self.matches(TokenType::MINUS) || self.matches(TokenType::PLUS) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.factor()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.unary()?;

        while self.matches(TokenType::STAR) || self.matches(TokenType::SLASH) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.unary()?;

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr<'src>> {
        if self.matches(TokenType::BANG) || self.matches(TokenType::MINUS) {
            let operator: Token<'src> = self.previous().clone();
            let right: Expr<'src> = self.unary()?;

            return Ok(Expr::Unary {
                operator,
                right: Box::new(right),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expr<'src>> {
        let mut expr: Expr<'src> = self.primary()?;

        loop {
            if self.matches(TokenType::LEFT_PAREN) {
                expr = self.finish_call(expr)?;
            } else if self.matches(TokenType::DOT) {
                let name: Token<'src> = self
                    .consume(TokenType::IDENTIFIER, "Expected property name after '.'")?
                    .clone();

                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr<'src>) -> Result<Expr<'src>> {
        let mut arguments: Vec<Expr<'src>> = Vec::new();

        if !self.check(TokenType::RIGHT_PAREN) {
            loop {
                if arguments.len() >= 255 {
                    return Err(LoxError::parse(
                        self.peek().line,
                        "Cannot have more than 255 arguments",
                    ));
                }

                // One level below the comma operator, so `f(a, b)` is two
                // arguments and `f((a, b))` is one.
                arguments.push(self.assignment()?);

                if !self.matches(TokenType::COMMA) {
                    break;
                }
            }
        }

        let paren: Token<'src> = self
            .consume(TokenType::RIGHT_PAREN, "Expected ')' after arguments")?
            .clone();

        Ok(Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }

    fn primary(&mut self) -> Result<Expr<'src>> {
        if self.matches(TokenType::FALSE) {
            return Ok(Expr::Literal(LiteralValue::False));
        }

        if self.matches(TokenType::TRUE) {
            return Ok(Expr::Literal(LiteralValue::True));
        }

        if self.matches(TokenType::NIL) {
            return Ok(Expr::Literal(LiteralValue::Nil));
        }

        if self.matches(TokenType::NUMBER(0.0)) {
            if let TokenType::NUMBER(n) = self.previous().token_type.clone() {
                return Ok(Expr::Literal(LiteralValue::Number(n)));
            }
        }

        if let TokenType::STRING(ref s) = self.peek().token_type {
            let value: String = s.clone();

            self.advance();

            return Ok(Expr::Literal(LiteralValue::Str(value)));
        }

        if self.matches(TokenType::FUN) {
            return self.lambda();
        }

        if self.matches(TokenType::THIS) {
            return Ok(Expr::This {
                keyword: self.previous().clone(),
                id: ExprId::next(),
            });
        }

        if self.matches(TokenType::SUPER) {
            let keyword: Token<'src> = self.previous().clone();

            self.consume(TokenType::DOT, "Expected '.' after 'super'")?;

            let method: Token<'src> = self
                .consume(TokenType::IDENTIFIER, "Expected superclass method name")?
                .clone();

            return Ok(Expr::Super {
                keyword,
                method,
                id: ExprId::next(),
            });
        }

        if self.matches(TokenType::IDENTIFIER) {
            return Ok(Expr::Variable {
                name: self.previous().clone(),
                id: ExprId::next(),
            });
        }

        if self.matches(TokenType::LEFT_PAREN) {
            let expr: Expr<'src> = self.expression()?;

            self.consume(TokenType::RIGHT_PAREN, "Expected ')' after expression")?;

            return Ok(Expr::Grouping(Box::new(expr)));
        }

        // A binary operator with no left operand reads better as its own
        // error than a bare "expected expression".
        if matches!(
            self.peek().token_type,
            TokenType::PLUS
                | TokenType::SLASH
                | TokenType::STAR
                | TokenType::BANG_EQUAL
                | TokenType::EQUAL_EQUAL
                | TokenType::GREATER
                | TokenType::GREATER_EQUAL
                | TokenType::LESS
                | TokenType::LESS_EQUAL
                | TokenType::BITWISE_AND
                | TokenType::BITWISE_OR
                | TokenType::XOR
        ) {
            return Err(LoxError::parse(
                self.peek().line,
                format!(
                    "Missing left-hand operand before '{}'",
                    self.peek().lexeme
                ),
            ));
        }

        Err(LoxError::parse(self.peek().line, "Expected expression"))
    }

    /// Anonymous function body; the `fun` keyword is already consumed.
    fn lambda(&mut self) -> Result<Expr<'src>> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'fun'")?;

        let params: Vec<Token<'src>> = self.parameters()?;

        self.consume(TokenType::LEFT_BRACE, "Expected '{' before function body")?;

        let body: Vec<Stmt<'src>> = self.block()?;

        Ok(Expr::Lambda(Rc::new(FunctionDecl {
            name: None,
            params,
            body,
        })))
    }

    // ────────────────────── utility helpers ───────────────────────

    #[inline(always)]
    fn matches(&mut self, ttype: TokenType) -> bool {
        if self.check(ttype) {
            self.advance();

            return true;
        }

        false
    }

    #[inline(always)]
    fn consume(&mut self, ttype: TokenType, message: &str) -> Result<&'t Token<'src>> {
        if self.check(ttype) {
            return Ok(self.advance());
        }

        Err(LoxError::parse(self.peek().line, message))
    }

    #[inline(always)]
    fn check(&self, ttype: TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }

        self.peek().token_type == ttype
    }

    /// Lookahead one past the current token; used to split `fun name` from
    /// `fun (`.
    #[inline(always)]
    fn check_next(&self, ttype: TokenType) -> bool {
        self.tokens
            .get(self.current + 1)
            .map_or(false, |t| t.token_type == ttype)
    }

    #[inline(always)]
    fn advance(&mut self) -> &'t Token<'src> {
        if !self.is_at_end() {
            self.current += 1;
        }

        self.previous()
    }

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::EOF)
    }

    #[inline(always)]
    fn peek(&self) -> &'t Token<'src> {
        &self.tokens[self.current]
    }

    #[inline(always)]
    fn previous(&self) -> &'t Token<'src> {
        &self.tokens[self.current - 1]
    }

    /// Discard tokens until the next likely statement boundary.
    fn synchronize(&mut self) {
        self.advance(); // skip the token that caused the error

        while !self.is_at_end() {
            if matches!(self.previous().token_type, TokenType::SEMICOLON) {
                return;
            }

            match self.peek().token_type {
                TokenType::CLASS
                | TokenType::FUN
                | TokenType::VAR
                | TokenType::FOR
                | TokenType::IF
                | TokenType::WHILE
                | TokenType::PRINT
                | TokenType::BREAK
                | TokenType::CONTINUE
                | TokenType::RETURN => return,
                _ => {}
            }

            self.advance();
        }
    }
}
