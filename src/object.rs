//! Runtime object model: user functions (closures), classes, instances, and
//! the native builtin wrapper, plus the callable capability they share.
//!
//! Method binding follows the classic protocol: looking a method up on an
//! instance produces a fresh function value whose closure is a one-slot
//! environment mapping `this` to that instance. Bound methods are never
//! cached; two lookups yield two distinct values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::environment::{EnvRef, Environment};
use crate::error::LoxError;
use crate::interpreter::{IResult, Interpreter, Interrupt};
use crate::parser::FunctionDecl;
use crate::token::Token;
use crate::value::Value;

/// Capability shared by everything invocable: user functions, classes
/// (construction), and native builtins. Callers validate arity *before*
/// invoking `call`.
pub trait LoxCallable<'src> {
    fn arity(&self) -> usize;

    fn call(
        &self,
        interpreter: &mut Interpreter<'src>,
        arguments: Vec<Value<'src>>,
    ) -> IResult<'src, Value<'src>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Native builtins
// ─────────────────────────────────────────────────────────────────────────────

/// A builtin implemented in Rust. The function pointer is infallible; the
/// only builtin shipped (`clock`) cannot fail.
pub struct NativeFunction<'src> {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value<'src>]) -> Value<'src>,
}

impl<'src> LoxCallable<'src> for NativeFunction<'src> {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(
        &self,
        _interpreter: &mut Interpreter<'src>,
        arguments: Vec<Value<'src>>,
    ) -> IResult<'src, Value<'src>> {
        debug!("Calling native function '{}'", self.name);

        Ok((self.func)(&arguments))
    }
}

impl fmt::Display for NativeFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

impl fmt::Debug for NativeFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User functions / closures
// ─────────────────────────────────────────────────────────────────────────────

/// A function value: shared declaration AST, captured environment, and a
/// flag marking class initializers (whose calls always yield `this`).
#[derive(Clone)]
pub struct LoxFunction<'src> {
    pub declaration: Rc<FunctionDecl<'src>>,
    pub closure: EnvRef<'src>,
    pub is_initializer: bool,
}

impl<'src> LoxFunction<'src> {
    pub fn new(
        declaration: Rc<FunctionDecl<'src>>,
        closure: EnvRef<'src>,
        is_initializer: bool,
    ) -> Self {
        Self {
            declaration,
            closure,
            is_initializer,
        }
    }

    /// Produce a new function whose closure is a fresh environment binding
    /// `this` to `instance`, nested under the original closure. The
    /// initializer flag carries over, so `instance.init()` re-invocation
    /// still yields the instance.
    pub fn bind(&self, instance: Rc<LoxInstance<'src>>) -> LoxFunction<'src> {
        debug!(
            "Binding method '{}' to an instance of {}",
            self.declaration.name_str(),
            instance.class.name
        );

        let mut scope: Environment<'src> = Environment::with_enclosing(Rc::clone(&self.closure));
        scope.define("this", Value::Instance(instance));

        LoxFunction {
            declaration: Rc::clone(&self.declaration),
            closure: Rc::new(RefCell::new(scope)),
            is_initializer: self.is_initializer,
        }
    }

    /// The `this` slot of an initializer's closure, produced as the call
    /// result for every initializer invocation.
    fn closure_this(&self) -> IResult<'src, Value<'src>> {
        let found: Option<Value<'src>> = self.closure.borrow().get_at(0, "this");

        match found {
            Some(value) => Ok(value),
            None => Err(Interrupt::Error(LoxError::Runtime {
                message: "Undefined variable 'this'.".to_string(),
                lexeme: "this".to_string(),
                line: self.declaration.name.as_ref().map_or(0, |t| t.line),
            })),
        }
    }
}

impl<'src> LoxCallable<'src> for LoxFunction<'src> {
    fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    /// One call frame: a fresh environment under the closure, parameters
    /// bound by position, body executed as a block. A return signal is
    /// consumed here; break/continue and runtime errors propagate.
    fn call(
        &self,
        interpreter: &mut Interpreter<'src>,
        arguments: Vec<Value<'src>>,
    ) -> IResult<'src, Value<'src>> {
        debug!(
            "Calling function '{}' with {} arguments",
            self.declaration.name_str(),
            arguments.len()
        );

        let mut frame: Environment<'src> = Environment::with_enclosing(Rc::clone(&self.closure));

        for (param, value) in self.declaration.params.iter().zip(arguments) {
            frame.define(param.lexeme, value);
        }

        let result: Result<(), Interrupt<'src>> =
            interpreter.execute_block(&self.declaration.body, Rc::new(RefCell::new(frame)));

        match result {
            Ok(()) => {
                if self.is_initializer {
                    self.closure_this()
                } else {
                    Ok(Value::Nil)
                }
            }

            Err(Interrupt::Return(value)) => {
                if self.is_initializer {
                    self.closure_this()
                } else {
                    Ok(value)
                }
            }

            Err(other) => Err(other),
        }
    }
}

impl fmt::Display for LoxFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaration.name {
            Some(token) => write!(f, "<fn {}>", token.lexeme),
            None => write!(f, "<fn>"),
        }
    }
}

impl fmt::Debug for LoxFunction<'_> {
    // The closure chain can reach this function again; Debug stays shallow.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxFunction")
            .field("name", &self.declaration.name_str())
            .field("is_initializer", &self.is_initializer)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classes
// ─────────────────────────────────────────────────────────────────────────────

/// A class value. Classes are themselves a kind of instance: they carry
/// their own field table, written by property assignment on the class value
/// and read before static methods during static lookup.
pub struct LoxClass<'src> {
    pub name: &'src str,
    pub superclass: Option<Rc<LoxClass<'src>>>,
    methods: HashMap<&'src str, LoxFunction<'src>>,
    statics: HashMap<&'src str, LoxFunction<'src>>,
    fields: RefCell<HashMap<&'src str, Value<'src>>>,
}

impl<'src> LoxClass<'src> {
    pub fn new(
        name: &'src str,
        superclass: Option<Rc<LoxClass<'src>>>,
        methods: HashMap<&'src str, LoxFunction<'src>>,
        statics: HashMap<&'src str, LoxFunction<'src>>,
    ) -> Self {
        Self {
            name,
            superclass,
            methods,
            statics,
            fields: RefCell::new(HashMap::new()),
        }
    }

    /// Instance-method lookup walking the superclass chain. The caller
    /// binds the result to a receiver.
    pub fn find_method(&self, name: &str) -> Option<&LoxFunction<'src>> {
        if let Some(method) = self.methods.get(name) {
            return Some(method);
        }

        match &self.superclass {
            Some(superclass) => superclass.find_method(name),
            None => None,
        }
    }

    /// Static lookup on the class value: own fields, then own static
    /// methods (unbound), then the superclass's static lookup. Instance
    /// methods are never visible here, nor statics through instances.
    pub fn get_static(&self, name: &Token<'src>) -> crate::error::Result<Value<'src>> {
        if let Some(value) = self.fields.borrow().get(name.lexeme) {
            return Ok(value.clone());
        }

        if let Some(function) = self.statics.get(name.lexeme) {
            return Ok(Value::Function(Rc::new(function.clone())));
        }

        if let Some(superclass) = &self.superclass {
            return superclass.get_static(name);
        }

        Err(LoxError::runtime(
            name,
            format!("Undefined static property '{}'.", name.lexeme),
        ))
    }

    /// Property assignment on the class value itself.
    pub fn set_field(&self, name: &Token<'src>, value: Value<'src>) {
        self.fields.borrow_mut().insert(name.lexeme, value);
    }

    /// Constructor lookup uses the class's own table only; construction
    /// does not invoke an inherited `init`.
    fn init_method(&self) -> Option<&LoxFunction<'src>> {
        self.methods.get("init")
    }
}

impl<'src> LoxCallable<'src> for Rc<LoxClass<'src>> {
    fn arity(&self) -> usize {
        self.init_method().map_or(0, |init| init.arity())
    }

    /// Construction: allocate an instance, run the bound `init` (if any)
    /// discarding its result, and yield the instance.
    fn call(
        &self,
        interpreter: &mut Interpreter<'src>,
        arguments: Vec<Value<'src>>,
    ) -> IResult<'src, Value<'src>> {
        debug!("Constructing an instance of {}", self.name);

        let instance: Rc<LoxInstance<'src>> = LoxInstance::new(Rc::clone(self));

        if let Some(init) = self.init_method() {
            init.bind(Rc::clone(&instance)).call(interpreter, arguments)?;
        }

        Ok(Value::Instance(instance))
    }
}

impl fmt::Display for LoxClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for LoxClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name))
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Instances
// ─────────────────────────────────────────────────────────────────────────────

/// An instance: class back-reference plus a lazily populated field map,
/// disjoint from every other instance's.
pub struct LoxInstance<'src> {
    pub class: Rc<LoxClass<'src>>,
    fields: RefCell<HashMap<&'src str, Value<'src>>>,
}

impl<'src> LoxInstance<'src> {
    pub fn new(class: Rc<LoxClass<'src>>) -> Rc<Self> {
        Rc::new(Self {
            class,
            fields: RefCell::new(HashMap::new()),
        })
    }

    /// Property read: fields shadow methods; methods bind to the receiver
    /// on every lookup.
    pub fn get(
        instance: &Rc<LoxInstance<'src>>,
        name: &Token<'src>,
    ) -> crate::error::Result<Value<'src>> {
        if let Some(value) = instance.fields.borrow().get(name.lexeme) {
            return Ok(value.clone());
        }

        if let Some(method) = instance.class.find_method(name.lexeme) {
            return Ok(Value::Function(Rc::new(method.bind(Rc::clone(instance)))));
        }

        Err(LoxError::runtime(
            name,
            format!("Undefined property '{}'.", name.lexeme),
        ))
    }

    /// Property write: unconditional insert, no declaration required.
    pub fn set(&self, name: &Token<'src>, value: Value<'src>) {
        self.fields.borrow_mut().insert(name.lexeme, value);
    }
}

impl fmt::Display for LoxInstance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.class.name)
    }
}

impl fmt::Debug for LoxInstance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxInstance")
            .field("class", &self.class.name)
            .finish_non_exhaustive()
    }
}
