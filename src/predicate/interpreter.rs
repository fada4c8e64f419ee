//! Tree-walking evaluator for parsed predicates.
//!
//! Values are plain `serde_json::Value`s. Nothing reachable from here touches
//! the filesystem, network, environment, or clock. CPU is bounded by a step
//! budget. Memory is bounded by charging steps for the bytes a predicate
//! produces and by capping the size and nesting of values it builds.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::builtins;
use super::parser::{BinaryOp, Expr, Program, UnaryOp};
use super::PredicateError;

/// Default number of evaluation steps a single predicate may take.
pub(crate) const DEFAULT_STEP_BUDGET: u64 = 100_000;

/// Largest value a predicate may build: string bytes plus one per node.
pub(crate) const MAX_VALUE_SIZE: usize = 4 << 20;

/// Deepest array/object nesting a predicate may build.
pub(crate) const MAX_VALUE_DEPTH: usize = 128;

/// Bytes of produced data covered by one evaluation step.
const BYTES_PER_STEP: usize = 256;

pub(crate) struct Interpreter {
    scopes: Vec<(String, Value)>,
    steps: u64,
    budget: u64,
}

impl Interpreter {
    pub(crate) fn new(budget: u64) -> Self {
        Self {
            scopes: Vec::new(),
            steps: 0,
            budget,
        }
    }

    /// Run a program with `body` bound to the payload and return the raw verdict.
    pub(crate) fn run(&mut self, program: &Program, payload: &Value) -> Result<Value, PredicateError> {
        self.scopes.push(("body".to_owned(), payload.clone()));
        for (name, expr) in &program.bindings {
            let value = self.eval(expr)?;
            // Bindings outlive the expression, so retaining them costs steps.
            self.charge_value(&value)?;
            self.scopes.push((name.clone(), value));
        }
        self.eval(&program.result)
    }

    pub(crate) fn tick(&mut self) -> Result<(), PredicateError> {
        self.charge(1)
    }

    fn charge(&mut self, steps: u64) -> Result<(), PredicateError> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.budget {
            return Err(PredicateError::BudgetExhausted(self.budget));
        }
        Ok(())
    }

    fn charge_bytes(&mut self, bytes: usize) -> Result<(), PredicateError> {
        let steps = bytes.checked_div(BYTES_PER_STEP).unwrap_or(0);
        self.charge(u64::try_from(steps).unwrap_or(u64::MAX))
    }

    /// Charge for `value` by size and return its `(size, depth)`.
    fn charge_value(&mut self, value: &Value) -> Result<(usize, usize), PredicateError> {
        let (size, depth) = measure(value);
        self.charge_bytes(size)?;
        Ok((size, depth))
    }

    /// Charge for a freshly built value and reject it if it is too large.
    pub(crate) fn admit(&mut self, value: Value) -> Result<Value, PredicateError> {
        let (size, depth) = self.charge_value(&value)?;
        check_depth(depth)?;
        check_size(size)?;
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    /// Call a lambda argument with `arg` bound to its parameter.
    pub(crate) fn apply(&mut self, lambda: &Expr, arg: Value) -> Result<Value, PredicateError> {
        let Expr::Lambda { param, body } = lambda else {
            return Err(runtime("expected a lambda such as `x => x > 0`"));
        };
        self.scopes.push((param.clone(), arg));
        let result = self.eval(body);
        self.scopes.pop();
        result
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, PredicateError> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => {
                let mut array = ArrayBuilder::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item)?;
                    array.push(self, value)?;
                }
                Ok(array.finish())
            }
            Expr::Name(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| runtime(format!("unknown name `{name}`"))),
            Expr::Member(target, field) => {
                let target = self.eval(target)?;
                member(&target, field)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&target, &index)
            }
            Expr::Call { name, args } => builtins::call(self, name, args),
            Expr::Lambda { .. } => Err(runtime("a lambda can only be passed to a function")),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, &value)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = binary(*op, &left, &right)?;
                if let Value::String(text) = &value {
                    self.charge_bytes(text.len())?;
                }
                Ok(value)
            }
            Expr::And(left, right) => {
                if !self.eval_bool(left, "&&")? {
                    return Ok(Value::Bool(false));
                }
                self.eval_bool(right, "&&").map(Value::Bool)
            }
            Expr::Or(left, right) => {
                if self.eval_bool(left, "||")? {
                    return Ok(Value::Bool(true));
                }
                self.eval_bool(right, "||").map(Value::Bool)
            }
            Expr::Conditional(condition, then, otherwise) => {
                if self.eval_bool(condition, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_bool(&mut self, expr: &Expr, operator: &str) -> Result<bool, PredicateError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(runtime(format!(
                "`{operator}` expects boolean operands, got {}",
                type_name(&other)
            ))),
        }
    }
}

pub(crate) fn runtime(message: impl Into<String>) -> PredicateError {
    PredicateError::Runtime(message.into())
}

/// Accumulates an array the predicate is building, enforcing the value limits
/// element by element so an oversized result is never fully allocated.
pub(crate) struct ArrayBuilder {
    items: Vec<Value>,
    size: usize,
}

impl ArrayBuilder {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            size: 1,
        }
    }

    pub(crate) fn push(&mut self, interp: &mut Interpreter, value: Value) -> Result<(), PredicateError> {
        let (size, depth) = interp.charge_value(&value)?;
        check_depth(depth.saturating_add(1))?;
        self.size = self.size.saturating_add(size);
        check_size(self.size)?;
        self.items.push(value);
        Ok(())
    }

    pub(crate) fn finish(self) -> Value {
        Value::Array(self.items)
    }
}

/// String bytes plus one per node, and array/object nesting depth.
///
/// Walks with an explicit stack so deeply nested values cannot exhaust the
/// call stack.
pub(crate) fn measure(value: &Value) -> (usize, usize) {
    let mut size = 0_usize;
    let mut depth = 0_usize;
    let mut pending = vec![(value, 0_usize)];
    while let Some((value, level)) = pending.pop() {
        size = size.saturating_add(1);
        match value {
            Value::String(text) => size = size.saturating_add(text.len()),
            Value::Array(items) => {
                let level = level.saturating_add(1);
                depth = depth.max(level);
                pending.extend(items.iter().map(|item| (item, level)));
            }
            Value::Object(map) => {
                let level = level.saturating_add(1);
                depth = depth.max(level);
                for (key, item) in map {
                    size = size.saturating_add(key.len());
                    pending.push((item, level));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }
    (size, depth)
}

pub(crate) fn check_size(size: usize) -> Result<(), PredicateError> {
    if size > MAX_VALUE_SIZE {
        return Err(runtime(format!(
            "value would exceed the {MAX_VALUE_SIZE}-byte size limit"
        )));
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<(), PredicateError> {
    if depth > MAX_VALUE_DEPTH {
        return Err(runtime(format!(
            "value would be nested deeper than {MAX_VALUE_DEPTH} levels"
        )));
    }
    Ok(())
}

/// The predicate-language name of a value's type.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Wrap a float as a JSON number, rejecting NaN and infinities.
pub(crate) fn number(n: f64) -> Result<Value, PredicateError> {
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| runtime("arithmetic produced a non-finite number"))
}

pub(crate) fn as_number(value: &Value, context: &str) -> Result<f64, PredicateError> {
    value
        .as_f64()
        .ok_or_else(|| runtime(format!("{context} expects a number, got {}", type_name(value))))
}

pub(crate) fn as_str<'v>(value: &'v Value, context: &str) -> Result<&'v str, PredicateError> {
    value
        .as_str()
        .ok_or_else(|| runtime(format!("{context} expects a string, got {}", type_name(value))))
}

fn member(target: &Value, field: &str) -> Result<Value, PredicateError> {
    match target {
        Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(runtime(format!(
            "cannot read field `{field}` of a {}",
            type_name(other)
        ))),
    }
}

fn index_value(target: &Value, index: &Value) -> Result<Value, PredicateError> {
    match (target, index) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Array(items), Value::Number(n)) => {
            let position = array_position(n)
                .ok_or_else(|| runtime("array index must be a non-negative integer"))?;
            Ok(items.get(position).cloned().unwrap_or(Value::Null))
        }
        (target, index) => Err(runtime(format!(
            "cannot index a {} with a {}",
            type_name(target),
            type_name(index)
        ))),
    }
}

/// Non-negative whole numbers become positions; literals are floats, so `1.0` counts.
fn array_position(n: &Number) -> Option<usize> {
    if let Some(u) = n.as_u64() {
        return Some(usize::try_from(u).unwrap_or(usize::MAX));
    }
    let f = n.as_f64()?;
    if f < 0.0 || f.fract() != 0.0 {
        return None;
    }
    // Float-to-int `as` saturates, so huge values simply miss the array.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let position = f as usize;
    Some(position)
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, PredicateError> {
    match op {
        UnaryOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(runtime(format!(
                "`!` expects a boolean, got {}",
                type_name(other)
            ))),
        },
        UnaryOp::Neg => number(-as_number(value, "unary `-`")?),
    }
}

#[allow(clippy::arithmetic_side_effects)]
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, PredicateError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => compare(left, right, "<").map(|o| Value::Bool(o == Ordering::Less)),
        BinaryOp::LtEq => compare(left, right, "<=").map(|o| Value::Bool(o != Ordering::Greater)),
        BinaryOp::Gt => compare(left, right, ">").map(|o| Value::Bool(o == Ordering::Greater)),
        BinaryOp::GtEq => compare(left, right, ">=").map(|o| Value::Bool(o != Ordering::Less)),
        BinaryOp::In => contains(right, left).map(Value::Bool),
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => {
                check_size(a.len().saturating_add(b.len()))?;
                Ok(Value::String(format!("{a}{b}")))
            }
            _ => number(as_number(left, "`+`")? + as_number(right, "`+`")?),
        },
        BinaryOp::Sub => number(as_number(left, "`-`")? - as_number(right, "`-`")?),
        BinaryOp::Mul => number(as_number(left, "`*`")? * as_number(right, "`*`")?),
        BinaryOp::Div => {
            let divisor = as_number(right, "`/`")?;
            if divisor == 0.0 {
                return Err(runtime("division by zero"));
            }
            number(as_number(left, "`/`")? / divisor)
        }
        BinaryOp::Rem => {
            let divisor = as_number(right, "`%`")?;
            if divisor == 0.0 {
                return Err(runtime("division by zero"));
            }
            number(as_number(left, "`%`")? % divisor)
        }
    }
}

/// Deep JSON equality; numbers compare by value so `1 == 1.0`.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

pub(crate) fn compare(left: &Value, right: &Value, operator: &str) -> Result<Ordering, PredicateError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| runtime("numbers are not comparable")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(runtime(format!(
            "`{operator}` cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

/// Membership: array element, object key, or substring.
pub(crate) fn contains(haystack: &Value, needle: &Value) -> Result<bool, PredicateError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Object(map) => Ok(map.contains_key(as_str(needle, "object membership")?)),
        Value::String(text) => Ok(text.contains(as_str(needle, "substring membership")?)),
        other => Err(runtime(format!(
            "membership test needs an array, object or string, got {}",
            type_name(other)
        ))),
    }
}
