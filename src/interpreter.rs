//! Recursive evaluator over the resolved syntax tree.
//!
//! One evaluation rule per node variant. Control transfer (`break`,
//! `continue`, `return`) rides the error channel as [`Interrupt`] signals
//! consumed by the nearest loop or call frame; only [`Interrupt::Error`]
//! ever reaches the driver.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use chrono::Utc;
use log::{debug, info};
use thiserror::Error;

use crate::environment::{EnvRef, Environment};
use crate::error::LoxError;
use crate::object::{LoxCallable, LoxClass, LoxFunction, LoxInstance, NativeFunction};
use crate::parser::{Expr, ExprId, FunctionDecl, LiteralValue, Stmt};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Non-local exits threaded through statement execution. Exactly one is
/// pending at a time; loops consume `Break`/`Continue`, call frames consume
/// `Return`, and `Error` propagates all the way out.
#[derive(Debug, Error)]
pub enum Interrupt<'src> {
    #[error(transparent)]
    Error(#[from] LoxError),

    #[error("return {0}")]
    Return(Value<'src>),

    #[error("break")]
    Break,

    #[error("continue")]
    Continue,
}

impl<'src> From<Interrupt<'src>> for LoxError {
    /// Collapse an interrupt reaching the top level into a reportable
    /// error. The resolver rejects stray `break`/`continue`/`return`
    /// statically, so the signal arms are unreachable through the normal
    /// pipeline and exist to keep the conversion total.
    fn from(interrupt: Interrupt<'src>) -> Self {
        match interrupt {
            Interrupt::Error(error) => error,

            Interrupt::Return(_) | Interrupt::Break | Interrupt::Continue => LoxError::Runtime {
                message: "Unexpected control-flow signal at top level.".to_string(),
                lexeme: String::new(),
                line: 0,
            },
        }
    }
}

/// Convenient alias for evaluator results.
pub type IResult<'src, T> = std::result::Result<T, Interrupt<'src>>;

/// Session-lifetime evaluator state: the global scope, the currently
/// active scope, the resolver's distance annotations, and the print sink.
pub struct Interpreter<'src> {
    globals: EnvRef<'src>,
    environment: EnvRef<'src>,
    locals: HashMap<ExprId, usize>,
    output: Box<dyn Write>,
}

impl<'src> Interpreter<'src> {
    /// Creates an interpreter printing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Creates an interpreter printing to an arbitrary sink and defines
    /// native functions such as `clock`.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        info!("Initializing interpreter");

        let globals: EnvRef<'src> = Rc::new(RefCell::new(Environment::new()));

        debug!("Defining native function 'clock'");

        globals.borrow_mut().define(
            "clock",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: |_arguments: &[Value<'src>]| {
                    let seconds: f64 = Utc::now().timestamp_micros() as f64 / 1_000_000.0;

                    Value::Number(seconds)
                },
            })),
        );

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            output,
        }
    }

    /// Records a resolved reference: `id` binds `depth` scopes out from
    /// whatever environment is active when it is evaluated. Annotations
    /// accumulate for the whole session.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        debug!("Resolved reference {:?} at depth {}", id, depth);

        self.locals.insert(id, depth);
    }

    /// Interprets a statement sequence (a "program").
    ///
    /// Yields the value of the final expression statement as long as every
    /// statement so far has been an expression statement; the first
    /// non-expression statement permanently disables the result for this
    /// sequence. Definitions persist in the globals across calls.
    pub fn interpret(
        &mut self,
        statements: &[Stmt<'src>],
    ) -> crate::error::Result<Option<Value<'src>>> {
        debug!("Interpreting {} statements", statements.len());

        let mut last: Option<Value<'src>> = None;
        let mut expressions_only: bool = true;

        for stmt in statements {
            debug!("Executing statement: {:?}", stmt);

            if let Stmt::Expression(expr) = stmt {
                let value: Value<'src> = self.evaluate(expr).map_err(LoxError::from)?;

                if expressions_only {
                    last = Some(value);
                }
            } else {
                expressions_only = false;
                last = None;

                self.execute(stmt).map_err(LoxError::from)?;
            }
        }

        info!("Interpretation completed successfully");

        Ok(last)
    }

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &Stmt<'src>) -> IResult<'src, ()> {
        match stmt {
            Stmt::Expression(expr) => {
                debug!("Evaluating expression statement");

                let _ = self.evaluate(expr)?;

                Ok(())
            }

            Stmt::Print(expr) => {
                debug!("Evaluating print statement");

                let value: Value<'src> = self.evaluate(expr)?;

                writeln!(self.output, "{}", value).map_err(LoxError::from)?;

                info!("Printed value: {}", value);

                Ok(())
            }

            Stmt::Var { name, initializer } => {
                debug!("Defining variable '{}'", name.lexeme);

                let value: Value<'src> = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                self.environment.borrow_mut().define(name.lexeme, value);

                Ok(())
            }

            Stmt::Block(statements) => {
                debug!("Entering block with {} statements", statements.len());

                let scope: Environment<'src> =
                    Environment::with_enclosing(Rc::clone(&self.environment));

                self.execute_block(statements, Rc::new(RefCell::new(scope)))
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                debug!("Evaluating if condition");

                let chosen: bool = is_truthy(&self.evaluate(condition)?);

                if chosen {
                    self.execute(then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)
                } else {
                    Ok(())
                }
            }

            Stmt::While { condition, body } => {
                debug!("Entering while loop");

                while is_truthy(&self.evaluate(condition)?) {
                    match self.execute(body) {
                        Ok(()) => {}

                        Err(Interrupt::Break) => {
                            debug!("Loop terminated by 'break'");
                            break;
                        }

                        Err(Interrupt::Continue) => {
                            debug!("Iteration cut short by 'continue'");
                            continue;
                        }

                        Err(other) => return Err(other),
                    }
                }

                info!("Exited while loop");

                Ok(())
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name_str());

                let function: Value<'src> = Value::Function(Rc::new(LoxFunction::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                )));

                if let Some(name) = &declaration.name {
                    self.environment.borrow_mut().define(name.lexeme, function);
                }

                Ok(())
            }

            Stmt::Class {
                name,
                superclass,
                methods,
                statics,
            } => self.execute_class(name, superclass.as_ref(), methods, statics),

            Stmt::Break { .. } => {
                debug!("Raising break signal");

                Err(Interrupt::Break)
            }

            Stmt::Continue { .. } => {
                debug!("Raising continue signal");

                Err(Interrupt::Continue)
            }

            Stmt::Return { keyword: _, value } => {
                debug!("Executing return statement");

                let result: Value<'src> = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                Err(Interrupt::Return(result))
            }
        }
    }

    /// Executes `statements` inside `environment`, restoring the previous
    /// environment afterwards whether or not an interrupt fired.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt<'src>],
        environment: EnvRef<'src>,
    ) -> IResult<'src, ()> {
        let previous: EnvRef<'src> = Rc::clone(&self.environment);
        self.environment = environment;

        let mut result: IResult<'src, ()> = Ok(());

        for stmt in statements {
            result = self.execute(stmt);

            if result.is_err() {
                break;
            }
        }

        self.environment = previous;

        result
    }

    /// Class declaration: evaluate the superclass, build the method and
    /// static tables closing over an optional `super` scope, then bind the
    /// finished class under its name.
    fn execute_class(
        &mut self,
        name: &Token<'src>,
        superclass: Option<&Expr<'src>>,
        methods: &[Rc<FunctionDecl<'src>>],
        statics: &[Rc<FunctionDecl<'src>>],
    ) -> IResult<'src, ()> {
        debug!("Declaring class '{}'", name.lexeme);

        let parent: Option<Rc<LoxClass<'src>>> = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),

                _ => {
                    let at: &Token<'src> = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };

                    return Err(LoxError::runtime(at, "Superclass must be a class.").into());
                }
            },

            None => None,
        };

        // Visible to its own methods by name before the class is finished.
        self.environment.borrow_mut().define(name.lexeme, Value::Nil);

        let method_env: EnvRef<'src> = match &parent {
            Some(class) => {
                let mut scope: Environment<'src> =
                    Environment::with_enclosing(Rc::clone(&self.environment));

                scope.define("super", Value::Class(Rc::clone(class)));

                Rc::new(RefCell::new(scope))
            }

            None => Rc::clone(&self.environment),
        };

        let mut method_table: HashMap<&'src str, LoxFunction<'src>> =
            HashMap::with_capacity(methods.len());

        for declaration in methods {
            let method_name: &'src str = declaration
                .name
                .as_ref()
                .map_or("<unnamed>", |token| token.lexeme);

            let function: LoxFunction<'src> = LoxFunction::new(
                Rc::clone(declaration),
                Rc::clone(&method_env),
                method_name == "init",
            );

            method_table.insert(method_name, function);
        }

        let mut static_table: HashMap<&'src str, LoxFunction<'src>> =
            HashMap::with_capacity(statics.len());

        for declaration in statics {
            let static_name: &'src str = declaration
                .name
                .as_ref()
                .map_or("<unnamed>", |token| token.lexeme);

            let function: LoxFunction<'src> =
                LoxFunction::new(Rc::clone(declaration), Rc::clone(&method_env), false);

            static_table.insert(static_name, function);
        }

        let class: Rc<LoxClass<'src>> = Rc::new(LoxClass::new(
            name.lexeme,
            parent,
            method_table,
            static_table,
        ));

        self.environment
            .borrow_mut()
            .define(name.lexeme, Value::Class(class));

        info!("Class '{}' declared", name.lexeme);

        Ok(())
    }

    /// Evaluates an expression and returns a value.
    pub fn evaluate(&mut self, expr: &Expr<'src>) -> IResult<'src, Value<'src>> {
        let value: Value<'src> = match expr {
            Expr::Literal(literal) => match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            },

            Expr::Grouping(inner) => self.evaluate(inner)?,

            Expr::Unary { operator, right } => {
                let value: Value<'src> = self.evaluate(right)?;

                self.evaluate_unary(operator, value)?
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left_value: Value<'src> = self.evaluate(left)?;
                let right_value: Value<'src> = self.evaluate(right)?;

                self.evaluate_binary(operator, left_value, right_value)?
            }

            Expr::Ternary {
                condition,
                first,
                second,
            } => {
                // Only the selected branch is evaluated.
                if is_truthy(&self.evaluate(condition)?) {
                    self.evaluate(first)?
                } else {
                    self.evaluate(second)?
                }
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_value: Value<'src> = self.evaluate(left)?;

                // Short-circuit yields the operand value itself, never a
                // coerced boolean.
                let take_left: bool = match operator.token_type {
                    TokenType::OR => is_truthy(&left_value),
                    _ => !is_truthy(&left_value),
                };

                if take_left {
                    left_value
                } else {
                    self.evaluate(right)?
                }
            }

            Expr::Variable { name, id } => self.lookup_variable(name, *id)?,

            Expr::Assign { name, value, id } => {
                debug!("Assigning to variable '{}'", name.lexeme);

                let result: Value<'src> = self.evaluate(value)?;

                let assigned: bool = match self.locals.get(id) {
                    Some(&distance) => self.environment.borrow_mut().assign_at(
                        distance,
                        name.lexeme,
                        result.clone(),
                    ),

                    None => self
                        .globals
                        .borrow_mut()
                        .assign(name.lexeme, result.clone()),
                };

                if !assigned {
                    return Err(LoxError::runtime(
                        name,
                        format!("Undefined variable '{}'.", name.lexeme),
                    )
                    .into());
                }

                result
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                debug!("Evaluating call with {} arguments", arguments.len());

                let callee_value: Value<'src> = self.evaluate(callee)?;

                // Callability is checked before the arguments run.
                if !matches!(
                    callee_value,
                    Value::Function(_) | Value::Class(_) | Value::NativeFunction(_)
                ) {
                    return Err(
                        LoxError::runtime(paren, "Can only call functions and classes.").into(),
                    );
                }

                let mut evaluated: Vec<Value<'src>> = Vec::with_capacity(arguments.len());

                for argument in arguments {
                    evaluated.push(self.evaluate(argument)?);
                }

                self.invoke_callable(&callee_value, paren, evaluated)?
            }

            Expr::Lambda(declaration) => Value::Function(Rc::new(LoxFunction::new(
                Rc::clone(declaration),
                Rc::clone(&self.environment),
                false,
            ))),

            Expr::Get { object, name } => {
                let target: Value<'src> = self.evaluate(object)?;

                match &target {
                    Value::Instance(instance) => LoxInstance::get(instance, name)?,

                    Value::Class(class) => class.get_static(name)?,

                    _ => {
                        return Err(
                            LoxError::runtime(name, "Only instances have properties.").into()
                        );
                    }
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let target: Value<'src> = self.evaluate(object)?;
                let result: Value<'src> = self.evaluate(value)?;

                match &target {
                    Value::Instance(instance) => instance.set(name, result.clone()),

                    Value::Class(class) => class.set_field(name, result.clone()),

                    _ => {
                        return Err(LoxError::runtime(name, "Only instances have fields.").into());
                    }
                }

                result
            }

            Expr::This { keyword, id } => self.lookup_variable(keyword, *id)?,

            Expr::Super {
                keyword,
                method,
                id,
            } => self.evaluate_super(keyword, method, *id)?,
        };

        Ok(value)
    }

    /// Resolved references jump straight to their annotated scope;
    /// unannotated names fall back to the globals.
    fn lookup_variable(&self, name: &Token<'src>, id: ExprId) -> IResult<'src, Value<'src>> {
        debug!("Looking up variable '{}'", name.lexeme);

        let found: Option<Value<'src>> = match self.locals.get(&id) {
            Some(&distance) => self.environment.borrow().get_at(distance, name.lexeme),
            None => self.globals.borrow().get(name.lexeme),
        };

        match found {
            Some(value) => Ok(value),

            None => Err(LoxError::runtime(
                name,
                format!("Undefined variable '{}'.", name.lexeme),
            )
            .into()),
        }
    }

    /// Evaluates a unary operation over an already-evaluated operand.
    fn evaluate_unary(
        &self,
        operator: &Token<'src>,
        value: Value<'src>,
    ) -> IResult<'src, Value<'src>> {
        debug!("Evaluating unary operation '{}'", operator.lexeme);

        match operator.token_type {
            TokenType::MINUS => match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(LoxError::runtime(operator, "Operand must be a number.").into()),
            },

            TokenType::BANG => Ok(Value::Bool(!is_truthy(&value))),

            _ => Err(LoxError::runtime(operator, "Invalid unary operator.").into()),
        }
    }

    /// Evaluates a binary operation over already-evaluated operands.
    fn evaluate_binary(
        &self,
        operator: &Token<'src>,
        left: Value<'src>,
        right: Value<'src>,
    ) -> IResult<'src, Value<'src>> {
        debug!("Evaluating binary operation '{}'", operator.lexeme);

        match operator.token_type {
            // Left side already ran for its effect; the pair yields the right.
            TokenType::COMMA => Ok(right),

            TokenType::PLUS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),

                // A string mixed with a number concatenates the number's
                // textual form, preserving operand order.
                (Value::String(a), Value::Number(b)) => {
                    Ok(Value::String(format!("{}{}", a, Value::Number(b))))
                }

                (Value::Number(a), Value::String(b)) => {
                    Ok(Value::String(format!("{}{}", Value::Number(a), b)))
                }

                _ => Err(LoxError::runtime(
                    operator,
                    "Operands must be two numbers or two strings.",
                )
                .into()),
            },

            TokenType::MINUS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::STAR => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::SLASH => match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    if b == 0.0 {
                        Err(LoxError::runtime(operator, "Division by zero is not allowed.").into())
                    } else {
                        Ok(Value::Number(a / b))
                    }
                }

                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::GREATER => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::GREATER_EQUAL => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::LESS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::LESS_EQUAL => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),
                _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
            },

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(left == right)),

            TokenType::BANG_EQUAL => Ok(Value::Bool(left != right)),

            TokenType::BITWISE_AND | TokenType::BITWISE_OR | TokenType::XOR => {
                match (left, right) {
                    (Value::Number(a), Value::Number(b)) => {
                        // Operands truncate to 32-bit integers for the bit
                        // operation; the result widens back to a number.
                        let x: i32 = a as i32;
                        let y: i32 = b as i32;

                        let bits: i32 = match operator.token_type {
                            TokenType::BITWISE_AND => x & y,
                            TokenType::BITWISE_OR => x | y,
                            _ => x ^ y,
                        };

                        Ok(Value::Number(f64::from(bits)))
                    }

                    _ => Err(LoxError::runtime(operator, "Operands must be numbers.").into()),
                }
            }

            _ => Err(LoxError::runtime(operator, "Invalid binary operator.").into()),
        }
    }

    /// `super.method`: fetch the superclass from the annotated scope and
    /// the receiver from the scope one step closer, then bind the method
    /// found on the superclass chain, skipping the overriding subclass.
    fn evaluate_super(
        &mut self,
        keyword: &Token<'src>,
        method: &Token<'src>,
        id: ExprId,
    ) -> IResult<'src, Value<'src>> {
        debug!("Evaluating super access '{}'", method.lexeme);

        let distance: usize = match self.locals.get(&id) {
            Some(&distance) => distance,
            None => return Err(LoxError::runtime(keyword, "Undefined variable 'super'.").into()),
        };

        let superclass: Rc<LoxClass<'src>> =
            match self.environment.borrow().get_at(distance, "super") {
                Some(Value::Class(class)) => class,
                _ => {
                    return Err(LoxError::runtime(keyword, "Undefined variable 'super'.").into());
                }
            };

        let receiver: Option<Value<'src>> = distance
            .checked_sub(1)
            .and_then(|closer| self.environment.borrow().get_at(closer, "this"));

        let instance: Rc<LoxInstance<'src>> = match receiver {
            Some(Value::Instance(instance)) => instance,
            _ => return Err(LoxError::runtime(keyword, "Undefined variable 'this'.").into()),
        };

        match superclass.find_method(method.lexeme) {
            Some(found) => Ok(Value::Function(Rc::new(found.bind(instance)))),

            None => Err(LoxError::runtime(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            )
            .into()),
        }
    }

    /// Invokes a callable (function, class constructor, or native builtin)
    /// after validating arity.
    fn invoke_callable(
        &mut self,
        callee: &Value<'src>,
        paren: &Token<'src>,
        arguments: Vec<Value<'src>>,
    ) -> IResult<'src, Value<'src>> {
        let callable: &dyn LoxCallable<'src> = match callee {
            Value::Function(function) => function.as_ref(),
            Value::NativeFunction(native) => native.as_ref(),
            Value::Class(class) => class,

            _ => {
                return Err(
                    LoxError::runtime(paren, "Can only call functions and classes.").into(),
                );
            }
        };

        if arguments.len() != callable.arity() {
            return Err(LoxError::runtime(
                paren,
                format!(
                    "Expected {} arguments but got {}.",
                    callable.arity(),
                    arguments.len()
                ),
            )
            .into());
        }

        callable.call(self, arguments)
    }
}

impl Default for Interpreter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// `nil` and `false` are falsy; everything else, including `0` and the
/// empty string, is truthy.
fn is_truthy(value: &Value<'_>) -> bool {
    match value {
        Value::Nil => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}
