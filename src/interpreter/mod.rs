//! Rule interpreter for the rulebook game language.
//!
//! Rule documents are JSON trees of typed nodes. The builder turns them into
//! an arena-backed [`RuleTree`], parsing embedded condition and path strings
//! with the expression parser. The runtime then evaluates the tree one
//! [`NodeTask`] per node, suspending whenever a rule waits on players or
//! timers and resuming on the next tick.

/// Rule and expression node definitions.
pub mod ast;
/// Builders that translate rule JSON into a [`RuleTree`].
pub mod builder;
/// Scoped bindings.
pub mod environment;
/// Expression evaluation.
pub mod eval;
/// Player-input suspension points.
pub mod input;
/// Expression tokenizer and parser.
pub mod parser;
/// Node evaluation tasks and their execution context.
pub mod runtime;
/// Resumable task primitive.
pub mod task;
/// Dynamically-typed rule values.
pub mod value;

pub use ast::{BinaryOp, InputKind, Node, NodeId, NodeKind, RuleTree, TimerMode, UnaryOp};
pub use builder::{build_rules, build_rules_from_json, split_format};
pub use environment::{Environment, PathStep, Place, ScopeHandle, ScopeId, ScopeKind, Symbol};
pub use eval::Evaluator;
pub use parser::{Token, TokenKind, parse_expression, tokenize};
pub use runtime::{Machine, NodeTask};
pub use task::{CancelToken, Cancelled, Resumable, Resumed, Step, Task};
pub use value::{Value, ValueKind};
