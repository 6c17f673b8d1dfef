//! Expression evaluation against an [`Environment`].

use tracing::trace;

use crate::error::{EvalError, EvalResult};

use super::ast::{BinaryOp, NodeId, NodeKind, RuleTree, UnaryOp};
use super::environment::{Environment, PathStep, Place, ScopeId, ScopeKind, Symbol};
use super::value::Value;

/// Evaluates expression nodes. Expressions never suspend.
pub struct Evaluator<'a> {
    tree: &'a RuleTree,
    env: &'a mut Environment,
}

enum Member {
    Key(String),
    Index(i64),
}

impl<'a> Evaluator<'a> {
    /// Borrow the tree and environment for a batch of evaluations.
    pub fn new(tree: &'a RuleTree, env: &'a mut Environment) -> Self {
        Self { tree, env }
    }

    /// Evaluate an expression node to a value.
    pub fn evaluate(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<Value> {
        match self.tree.kind(node) {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Variable(name) => self
                .env
                .lookup(scope, name)
                .cloned()
                .ok_or_else(|| EvalError::Unresolved(name.clone())),
            NodeKind::Binary {
                op: BinaryOp::Dot,
                lhs,
                rhs,
            } => {
                if let Some(value) = self
                    .place_of(scope, node)
                    .ok()
                    .and_then(|place| self.env.read(&place))
                {
                    return Ok(value.clone());
                }
                let base = self.evaluate(scope, *lhs)?;
                let member = self.member(scope, *rhs)?;
                self.project(&base, member, node)
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let left = self.evaluate(scope, *lhs)?;
                let right = self.evaluate(scope, *rhs)?;
                self.compare(*op, &left, &right, node).map(Value::Bool)
            }
            NodeKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(Value::Bool(!self.evaluate_bool(scope, *operand)?)),
            NodeKind::FunctionCall {
                receiver,
                name,
                args,
            } => self.call(scope, *receiver, name, args),
            NodeKind::Format { .. } => self.format(scope, node).map(Value::String),
            other => Err(EvalError::TypeMismatch(format!(
                "'{}' is not an expression",
                other.label()
            ))),
        }
    }

    /// Evaluate an expression that must produce a boolean.
    pub fn evaluate_bool(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<bool> {
        match self.evaluate(scope, node)? {
            Value::Bool(flag) => Ok(flag),
            other => Err(EvalError::TypeMismatch(format!(
                "'{}' evaluated to {} where a bool was expected",
                self.tree.render(node),
                other.kind()
            ))),
        }
    }

    /// Evaluate an expression that must produce a non-negative integer.
    pub fn evaluate_count(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<usize> {
        match self.evaluate(scope, node)? {
            Value::Int(num) if num >= 0 => Ok(num as usize),
            other => Err(EvalError::TypeMismatch(format!(
                "'{}' evaluated to {} where a count was expected",
                self.tree.render(node),
                other
            ))),
        }
    }

    /// Render a [`NodeKind::Format`] node, substituting each argument in order.
    pub fn format(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<String> {
        let NodeKind::Format { pieces, args } = self.tree.kind(node) else {
            return self.evaluate(scope, node).map(|value| value.to_string());
        };
        let mut text = String::new();
        for (idx, piece) in pieces.iter().enumerate() {
            text.push_str(piece);
            if let Some(arg) = args.get(idx) {
                let value = self.evaluate(scope, *arg)?;
                text.push_str(&value.to_string());
            }
        }
        Ok(text)
    }

    /// Resolve a path expression to the place it names.
    pub fn place_of(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<Place> {
        match self.tree.kind(node) {
            NodeKind::Variable(name) => self
                .env
                .locate(scope, name)
                .ok_or_else(|| EvalError::Unresolved(name.clone())),
            NodeKind::Binary {
                op: BinaryOp::Dot,
                lhs,
                rhs,
            } => {
                let base = self.place_of(scope, *lhs)?;
                let member = self.member(scope, *rhs)?;
                let container = self
                    .env
                    .read(&base)
                    .ok_or_else(|| EvalError::Unresolved(base.describe()))?;
                match (container, member) {
                    (Value::Map(_), Member::Key(key)) => Ok(base.child(PathStep::Key(key))),
                    (Value::List(_), Member::Key(key)) if key == "elements" => Ok(base),
                    (Value::List(items), Member::Index(idx))
                        if idx >= 0 && (idx as usize) < items.len() =>
                    {
                        Ok(base.child(PathStep::Index(idx as usize)))
                    }
                    (other, _) => Err(EvalError::Unresolved(format!(
                        "'{}' does not name a location inside {}",
                        self.tree.render(node),
                        other.kind()
                    ))),
                }
            }
            _ => Err(EvalError::TypeMismatch(format!(
                "'{}' is not assignable",
                self.tree.render(node)
            ))),
        }
    }

    fn member(&mut self, scope: ScopeId, rhs: NodeId) -> EvalResult<Member> {
        if let NodeKind::Variable(key) = self.tree.kind(rhs) {
            return Ok(Member::Key(key.clone()));
        }
        match self.evaluate(scope, rhs)? {
            Value::String(key) => Ok(Member::Key(key)),
            Value::Int(idx) => Ok(Member::Index(idx)),
            other => Err(EvalError::TypeMismatch(format!(
                "member selector '{}' evaluated to {}",
                self.tree.render(rhs),
                other.kind()
            ))),
        }
    }

    fn project(&self, base: &Value, member: Member, node: NodeId) -> EvalResult<Value> {
        let unresolved = || EvalError::Unresolved(self.tree.render(node));
        match (base, member) {
            (Value::Map(map), Member::Key(key)) => match map.get(&key) {
                Some(value) => Ok(value.clone()),
                None if key == "size" => Ok(Value::Int(map.len() as i64)),
                None => Err(unresolved()),
            },
            (Value::List(items), Member::Key(key)) => match key.as_str() {
                "size" => Ok(Value::Int(items.len() as i64)),
                "elements" => Ok(base.clone()),
                _ => base.slice(&key).ok_or_else(unresolved),
            },
            (Value::List(items), Member::Index(idx)) => usize::try_from(idx)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or_else(unresolved),
            (Value::String(text), Member::Key(key)) if key == "size" => {
                Ok(Value::Int(text.chars().count() as i64))
            }
            (other, _) => Err(EvalError::TypeMismatch(format!(
                "cannot select '{}' from {}",
                self.tree.render(node),
                other.kind()
            ))),
        }
    }

    fn compare(&self, op: BinaryOp, left: &Value, right: &Value, node: NodeId) -> EvalResult<bool> {
        let outcome = match op {
            BinaryOp::Equals => left.equal(right),
            BinaryOp::NotEquals => left.equal(right).map(|eq| !eq),
            BinaryOp::Greater => left.greater(right),
            BinaryOp::Less => left.less(right),
            BinaryOp::GreaterEquals => left.less(right).map(|lt| !lt),
            BinaryOp::LessEquals => left.greater(right).map(|gt| !gt),
            BinaryOp::Dot => None,
        };
        outcome.ok_or_else(|| {
            EvalError::TypeMismatch(format!(
                "cannot compare {} with {} in '{}'",
                left.kind(),
                right.kind(),
                self.tree.render(node)
            ))
        })
    }

    fn call(
        &mut self,
        scope: ScopeId,
        receiver: Option<NodeId>,
        name: &str,
        args: &[NodeId],
    ) -> EvalResult<Value> {
        let (receiver, args) = match (receiver, args.split_first()) {
            (Some(recv), _) => (recv, args),
            (None, Some((first, rest))) => (*first, rest),
            (None, None) => {
                return Err(EvalError::TypeMismatch(format!(
                    "'{}' needs a receiver",
                    name
                )));
            }
        };
        trace!(function = name, "calling builtin");
        match name {
            "collect" => self.collect(scope, receiver, args),
            "upfrom" => {
                let [start] = args else {
                    return Err(arity(name, 1, args.len()));
                };
                let end = self.evaluate_int(scope, receiver)?;
                let start = self.evaluate_int(scope, *start)?;
                match end.checked_sub(start) {
                    Some(span) if span >= MAX_RANGE_SPAN => Err(EvalError::TypeMismatch(format!(
                        "range {}..={} exceeds {} elements",
                        start, end, MAX_RANGE_SPAN
                    ))),
                    None => Err(EvalError::TypeMismatch(format!(
                        "range {}..={} overflows",
                        start, end
                    ))),
                    Some(_) => Ok(Value::List((start..=end).map(Value::Int).collect())),
                }
            }
            "contains" => {
                let [needle] = args else {
                    return Err(arity(name, 1, args.len()));
                };
                let haystack = self.evaluate(scope, receiver)?;
                let needle = self.evaluate(scope, *needle)?;
                let found = match (&haystack, &needle) {
                    (Value::List(items), _) => items
                        .iter()
                        .any(|item| item.equal(&needle).unwrap_or(false)),
                    (Value::Map(map), Value::String(key)) => map.contains_key(key),
                    (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
                    _ => {
                        return Err(EvalError::TypeMismatch(format!(
                            "contains is not defined for {} and {}",
                            haystack.kind(),
                            needle.kind()
                        )));
                    }
                };
                Ok(Value::Bool(found))
            }
            "size" => {
                if !args.is_empty() {
                    return Err(arity(name, 0, args.len()));
                }
                let value = self.evaluate(scope, receiver)?;
                value
                    .size()
                    .map(|len| Value::Int(len as i64))
                    .ok_or_else(|| {
                        EvalError::TypeMismatch(format!("{} has no size", value.kind()))
                    })
            }
            other => Err(EvalError::Unresolved(format!("function '{}'", other))),
        }
    }

    fn evaluate_int(&mut self, scope: ScopeId, node: NodeId) -> EvalResult<i64> {
        match self.evaluate(scope, node)? {
            Value::Int(num) => Ok(num),
            other => Err(EvalError::TypeMismatch(format!(
                "'{}' evaluated to {} where an int was expected",
                self.tree.render(node),
                other.kind()
            ))),
        }
    }

    // list.collect(element, predicate): keep the elements for which the
    // predicate holds with `element` bound to each one.
    fn collect(&mut self, scope: ScopeId, receiver: NodeId, args: &[NodeId]) -> EvalResult<Value> {
        let [element, predicate] = args else {
            return Err(arity("collect", 2, args.len()));
        };
        let NodeKind::Variable(element) = self.tree.kind(*element) else {
            return Err(EvalError::TypeMismatch(format!(
                "collect expects a name, got '{}'",
                self.tree.render(*element)
            )));
        };
        let items = match self.evaluate(scope, receiver)? {
            Value::List(items) => items,
            other => {
                return Err(EvalError::TypeMismatch(format!(
                    "collect expects a list, got {}",
                    other.kind()
                )));
            }
        };

        let mut kept = Vec::new();
        for item in items {
            let frame = self.env.create_child(scope, ScopeKind::Frame);
            self.env
                .allocate(frame.id(), element.clone(), Symbol::constant(item.clone()));
            let verdict = self.evaluate_bool(frame.id(), *predicate);
            self.env.release(frame);
            if verdict? {
                kept.push(item);
            }
        }
        Ok(Value::List(kept))
    }
}

// Longest list `upfrom` will build.
const MAX_RANGE_SPAN: i64 = 1 << 16;

fn arity(name: &str, expected: usize, got: usize) -> EvalError {
    EvalError::TypeMismatch(format!(
        "{} takes {} argument(s), got {}",
        name, expected, got
    ))
}
