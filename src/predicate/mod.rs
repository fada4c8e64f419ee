//! Sandboxed predicate language.
//!
//! A predicate is a small expression evaluated against the decoded JSON body
//! of a probe response, bound to the name `body`. It must produce a boolean.
//!
//! ```text
//! let depth = body.queues[0].depth;
//! depth > 100 && !body.paused
//! ```
//!
//! The language has no I/O, no host access and no unbounded loops: iteration
//! only happens inside builtins over finite arrays, every evaluation is
//! capped by a step budget, and values a predicate builds are size-limited. Compilation happens once, at registry build time,
//! so a malformed predicate is reported before the first cycle runs.

use serde_json::Value;
use thiserror::Error;

mod builtins;
mod interpreter;
mod lexer;
mod parser;

use interpreter::{type_name, Interpreter, DEFAULT_STEP_BUDGET};
use parser::Program;

/// Predicate compilation and evaluation errors.
#[derive(Debug, Error)]
pub enum PredicateError {
    /// The predicate source does not parse.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// 1-based line of the offending token.
        line: usize,
        /// 1-based column of the offending token.
        column: usize,
        /// What the parser expected or rejected.
        message: String,
    },
    /// The response body is not valid JSON.
    #[error("response body is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    /// Evaluation failed: type mismatch, unknown name, bad builtin call.
    #[error("evaluation failed: {0}")]
    Runtime(String),
    /// The predicate finished but produced something other than a boolean.
    #[error("not-a-boolean: predicate returned {found}")]
    NotABoolean {
        /// Type name of the value actually produced.
        found: &'static str,
    },
    /// Evaluation exceeded its step budget.
    #[error("evaluation exceeded its budget of {0} steps")]
    BudgetExhausted(u64),
}

/// A compiled predicate, ready to be evaluated against many payloads.
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    program: Program,
    budget: u64,
}

impl Predicate {
    /// Parse predicate source text.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::Syntax`] when the source is malformed.
    pub fn compile(source: &str) -> Result<Self, PredicateError> {
        let tokens = lexer::tokenize(source)?;
        let program = parser::parse(tokens)?;
        Ok(Self {
            source: source.to_owned(),
            program,
            budget: DEFAULT_STEP_BUDGET,
        })
    }

    /// Override the evaluation step budget.
    #[must_use]
    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Decode a raw response body as JSON and evaluate against it.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::InvalidPayload`] for non-JSON bodies, or any
    /// error [`Predicate::evaluate_value`] can return.
    pub fn evaluate(&self, body: &[u8]) -> Result<bool, PredicateError> {
        let payload: Value = serde_json::from_slice(body).map_err(PredicateError::InvalidPayload)?;
        self.evaluate_value(&payload)
    }

    /// Evaluate against an already-decoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError::NotABoolean`] when the verdict is not a
    /// boolean, and runtime or budget errors raised during evaluation.
    pub fn evaluate_value(&self, payload: &Value) -> Result<bool, PredicateError> {
        match Interpreter::new(self.budget).run(&self.program, payload)? {
            Value::Bool(verdict) => Ok(verdict),
            other => Err(PredicateError::NotABoolean {
                found: type_name(&other),
            }),
        }
    }
}

/// Compile and evaluate a predicate in one step.
///
/// # Errors
///
/// Returns any compilation or evaluation error.
pub fn evaluate(source: &str, body: &[u8]) -> Result<bool, PredicateError> {
    Predicate::compile(source)?.evaluate(body)
}
