//! Lexical scope chain. Each `Environment` owns one scope's bindings and a
//! shared handle to its enclosing scope; closures alias the environment that
//! was current at their declaration site, so sibling closures observe each
//! other's writes through the same scope object.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Shared handle to one scope in the chain.
pub type EnvRef<'src> = Rc<RefCell<Environment<'src>>>;

#[derive(Debug, Default)]
pub struct Environment<'src> {
    values: HashMap<&'src str, Value<'src>>,
    enclosing: Option<EnvRef<'src>>,
}

impl<'src> Environment<'src> {
    /// The root (global) scope.
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    /// A fresh scope nested under `enclosing`.
    pub fn with_enclosing(enclosing: EnvRef<'src>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Bind `name` in this scope, silently replacing a same-scope binding.
    pub fn define(&mut self, name: &'src str, value: Value<'src>) {
        self.values.insert(name, value);
    }

    /// Search outward for `name`. `None` means undefined everywhere; the
    /// caller owns the token and reports the runtime error.
    pub fn get(&self, name: &str) -> Option<Value<'src>> {
        if let Some(value) = self.values.get(name) {
            Some(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name)
        } else {
            None
        }
    }

    /// Search outward and overwrite an existing binding. Returns `false`
    /// when no binding exists anywhere; assignment never creates one.
    pub fn assign(&mut self, name: &'src str, value: Value<'src>) -> bool {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            true
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value)
        } else {
            false
        }
    }

    /// Read `name` from the scope exactly `distance` hops outward, bypassing
    /// the search. Total: a missing scope or name yields `None` (the
    /// resolver can bind `this`/`super` slots that a static method's call
    /// chain never creates).
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value<'src>> {
        if distance == 0 {
            self.values.get(name).cloned()
        } else {
            match &self.enclosing {
                Some(enclosing) => enclosing.borrow().get_at(distance - 1, name),
                None => None,
            }
        }
    }

    /// Write `name` in the scope exactly `distance` hops outward. Returns
    /// `false` if the scope or the binding does not exist.
    pub fn assign_at(&mut self, distance: usize, name: &'src str, value: Value<'src>) -> bool {
        if distance == 0 {
            match self.values.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            }
        } else {
            match &self.enclosing {
                Some(enclosing) => enclosing.borrow_mut().assign_at(distance - 1, name, value),
                None => false,
            }
        }
    }
}
