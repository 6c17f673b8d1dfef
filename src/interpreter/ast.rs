use std::fmt;

use super::value::Value;

/// Index of a node inside a [`RuleTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Raw arena position.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binary operators of the expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Member access (`a.b`).
    Dot,
    /// `==`
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    Greater,
    /// `>=`
    GreaterEquals,
    /// `<`
    Less,
    /// `<=`
    LessEquals,
}

impl BinaryOp {
    /// Source spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Dot => ".",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEquals => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEquals => "<=",
        }
    }
}

/// Unary operators of the expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation (`!`).
    Not,
}

/// How a timer relates to the rules it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Run the rules, then wait out whatever remains of the duration.
    #[default]
    Exact,
    /// Abandon the rules once the duration elapses.
    AtMost,
    /// Run the rules to completion and raise a flag if the duration elapsed.
    Track,
}

/// Which input primitive an input node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Pick one of a list of choices.
    Choice,
    /// Free-form non-empty text.
    Text,
    /// Every addressed player picks a choice; the result is a tally.
    Vote,
}

/// Closed set of rule and expression node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Ordered sequence of rules sharing a block scope.
    Rules(Vec<NodeId>),
    /// Broadcast a formatted message to every player.
    GlobalMessage {
        /// [`NodeKind::Format`] node.
        message: NodeId,
    },
    /// Send a formatted message to one or more players.
    Message {
        /// Recipient expression.
        to: NodeId,
        /// [`NodeKind::Format`] node.
        message: NodeId,
    },
    /// Text with `{}` placeholders filled left to right from `args`.
    Format {
        /// Literal pieces; always one more than `args`.
        pieces: Vec<String>,
        /// Embedded expressions.
        args: Vec<NodeId>,
    },
    /// Broadcast a scoreboard of every player ordered by an attribute.
    Scores {
        /// Attribute holding each player's score.
        score: String,
        /// Lowest score first when set.
        ascending: bool,
    },
    /// Rebind an existing name or path.
    Assign {
        /// Path expression naming the destination.
        target: NodeId,
        /// Expression producing the new value.
        value: NodeId,
    },
    /// Introduce a name in the current scope.
    Declare {
        /// Bound name.
        name: String,
        /// Expression producing the initial value.
        value: NodeId,
        /// Whether later assignments are allowed.
        mutable: bool,
    },
    /// Run `body` once per list element, sequentially.
    ForEach {
        /// Expression producing the list.
        list: NodeId,
        /// Name bound to each element.
        element: String,
        /// Per-element rules.
        body: NodeId,
    },
    /// Run `body` for every list element concurrently.
    ParallelFor {
        /// Expression producing the list.
        list: NodeId,
        /// Name bound to each element.
        element: String,
        /// Per-element rules.
        body: NodeId,
    },
    /// Run heterogeneous branches concurrently.
    InParallel(Vec<NodeId>),
    /// Repeat `body` while (or until) `condition` holds.
    Loop {
        /// Boolean expression checked before each iteration.
        condition: NodeId,
        /// Repeat until the condition becomes true instead of while it is.
        until: bool,
        /// Loop body.
        body: NodeId,
    },
    /// Run the first case whose literal equals the controlling value.
    Switch {
        /// Controlling expression.
        value: NodeId,
        /// [`NodeKind::SwitchCase`] nodes.
        cases: Vec<NodeId>,
    },
    /// One arm of a switch.
    SwitchCase {
        /// Literal compared against the controlling value.
        case: Value,
        /// Rules run on a match.
        body: NodeId,
    },
    /// Run the first case whose condition is true.
    When {
        /// [`NodeKind::WhenCase`] nodes.
        cases: Vec<NodeId>,
    },
    /// One arm of a when.
    WhenCase {
        /// Boolean expression.
        condition: NodeId,
        /// Rules run when the condition holds.
        body: NodeId,
    },
    /// Reverse a list in place.
    Reverse {
        /// Path to the list.
        list: NodeId,
    },
    /// Shuffle a list in place.
    Shuffle {
        /// Path to the list.
        list: NodeId,
    },
    /// Sort a list in place, optionally by a map key.
    Sort {
        /// Path to the list.
        list: NodeId,
        /// Key to sort maps by.
        key: Option<String>,
    },
    /// Move every element of `list` onto the end of `target`.
    Extend {
        /// Path to the receiving list.
        target: NodeId,
        /// Path to the list that is emptied.
        list: NodeId,
    },
    /// Move elements from the tail of one list to another.
    Deal {
        /// Path to the source list.
        from: NodeId,
        /// Path to the destination list.
        to: NodeId,
        /// Expression producing the element count.
        count: NodeId,
    },
    /// Drop elements from the tail of a list.
    Discard {
        /// Path to the list.
        from: NodeId,
        /// Expression producing the element count.
        count: NodeId,
    },
    /// Push onto a list or add to a number.
    Add {
        /// Path to the destination.
        to: NodeId,
        /// Expression producing the value to add.
        value: NodeId,
    },
    /// Time-box a block of rules.
    Timer {
        /// Length in ticks.
        duration: NodeId,
        /// Relationship between the timer and its rules.
        mode: TimerMode,
        /// Wrapped rules.
        body: NodeId,
        /// Path set to `true` when a tracked timer elapses.
        flag: Option<NodeId>,
    },
    /// Request input from one or more players.
    Input {
        /// Input primitive.
        kind: InputKind,
        /// Player (or players, for votes) expression.
        to: NodeId,
        /// [`NodeKind::Format`] prompt.
        prompt: NodeId,
        /// Choice list expression; absent for text input.
        choices: Option<NodeId>,
        /// Path the answer is stored at.
        result: NodeId,
        /// Collect answers into the `result` map (keyed by player id) or
        /// list instead of overwriting it.
        by_player: bool,
        /// Ticks after which the input gives up without binding.
        timeout: Option<u64>,
    },
    /// Constant.
    Literal(Value),
    /// Name lookup.
    Variable(String),
    /// Binary operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: NodeId,
        /// Right operand.
        rhs: NodeId,
    },
    /// Unary operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: NodeId,
    },
    /// Builtin call, optionally on a receiver (`list.collect(...)`).
    FunctionCall {
        /// Receiver expression for method-style calls.
        receiver: Option<NodeId>,
        /// Builtin name.
        name: String,
        /// Arguments.
        args: Vec<NodeId>,
    },
}

impl NodeKind {
    /// Short label used in logs and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Rules(_) => "rules",
            NodeKind::GlobalMessage { .. } => "global-message",
            NodeKind::Message { .. } => "message",
            NodeKind::Format { .. } => "format",
            NodeKind::Scores { .. } => "scores",
            NodeKind::Assign { .. } => "variable",
            NodeKind::Declare { .. } => "variable-declaration",
            NodeKind::ForEach { .. } => "foreach",
            NodeKind::ParallelFor { .. } => "parallelfor",
            NodeKind::InParallel(_) => "inparallel",
            NodeKind::Loop { .. } => "loop",
            NodeKind::Switch { .. } => "switch",
            NodeKind::SwitchCase { .. } => "case",
            NodeKind::When { .. } => "when",
            NodeKind::WhenCase { .. } => "case",
            NodeKind::Reverse { .. } => "reverse",
            NodeKind::Shuffle { .. } => "shuffle",
            NodeKind::Sort { .. } => "sort",
            NodeKind::Extend { .. } => "extend",
            NodeKind::Deal { .. } => "deal",
            NodeKind::Discard { .. } => "discard",
            NodeKind::Add { .. } => "add",
            NodeKind::Timer { .. } => "timer",
            NodeKind::Input {
                kind: InputKind::Choice,
                ..
            } => "input-choice",
            NodeKind::Input {
                kind: InputKind::Text,
                ..
            } => "input-text",
            NodeKind::Input {
                kind: InputKind::Vote,
                ..
            } => "input-vote",
            NodeKind::Literal(_) => "literal",
            NodeKind::Variable(_) => "variable-ref",
            NodeKind::Binary { .. } => "binary",
            NodeKind::Unary { .. } => "unary",
            NodeKind::FunctionCall { .. } => "call",
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Rules(items) | NodeKind::InParallel(items) => items.clone(),
            NodeKind::GlobalMessage { message } => vec![*message],
            NodeKind::Message { to, message } => vec![*to, *message],
            NodeKind::Format { args, .. } => args.clone(),
            NodeKind::Scores { .. } | NodeKind::Literal(_) | NodeKind::Variable(_) => Vec::new(),
            NodeKind::Assign { target, value } => vec![*target, *value],
            NodeKind::Declare { value, .. } => vec![*value],
            NodeKind::ForEach { list, body, .. } | NodeKind::ParallelFor { list, body, .. } => {
                vec![*list, *body]
            }
            NodeKind::Loop {
                condition, body, ..
            } => vec![*condition, *body],
            NodeKind::Switch { value, cases } => {
                let mut ids = vec![*value];
                ids.extend(cases.iter().copied());
                ids
            }
            NodeKind::SwitchCase { body, .. } => vec![*body],
            NodeKind::When { cases } => cases.clone(),
            NodeKind::WhenCase { condition, body } => vec![*condition, *body],
            NodeKind::Reverse { list } | NodeKind::Shuffle { list } | NodeKind::Sort { list, .. } => {
                vec![*list]
            }
            NodeKind::Extend { target, list } => vec![*target, *list],
            NodeKind::Deal { from, to, count } => vec![*from, *to, *count],
            NodeKind::Discard { from, count } => vec![*from, *count],
            NodeKind::Add { to, value } => vec![*to, *value],
            NodeKind::Timer {
                duration,
                body,
                flag,
                ..
            } => {
                let mut ids = vec![*duration, *body];
                ids.extend(flag.iter().copied());
                ids
            }
            NodeKind::Input {
                to,
                prompt,
                choices,
                result,
                ..
            } => {
                let mut ids = vec![*to, *prompt];
                ids.extend(choices.iter().copied());
                ids.push(*result);
                ids
            }
            NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::Unary { operand, .. } => vec![*operand],
            NodeKind::FunctionCall { receiver, args, .. } => {
                let mut ids: Vec<NodeId> = receiver.iter().copied().collect();
                ids.extend(args.iter().copied());
                ids
            }
        }
    }
}

/// A node plus the index of the node that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Owning node; `None` for roots.
    pub parent: Option<NodeId>,
    /// What the node does.
    pub kind: NodeKind,
}

/// Arena holding every node of a parsed rule document.
///
/// Nodes are pushed children-first, so a node's children always have lower
/// ids than the node itself. Each node is owned by exactly one parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl RuleTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, recording it as the parent of each of its children.
    pub fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        for child in kind.children() {
            if let Some(node) = self.nodes.get_mut(child.0) {
                node.parent = Some(id);
            }
        }
        self.nodes.push(Node { parent: None, kind });
        id
    }

    /// Borrow a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Borrow the kind of a node. Ids come from this tree, so a miss is a bug;
    /// an empty sequence is returned rather than panicking.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        static EMPTY: NodeKind = NodeKind::Rules(Vec::new());
        self.nodes.get(id.0).map_or(&EMPTY, |node| &node.kind)
    }

    /// Owning node of `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    /// Designate the entry node.
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Entry node, if one has been designated.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render an expression sub-tree back to source form.
    pub fn render(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Literal(value) => value.to_string(),
            NodeKind::Variable(name) => name.clone(),
            NodeKind::Binary {
                op: BinaryOp::Dot,
                lhs,
                rhs,
            } => format!("{}.{}", self.render(*lhs), self.render(*rhs)),
            NodeKind::Binary { op, lhs, rhs } => {
                format!("{} {} {}", self.render(*lhs), op.symbol(), self.render(*rhs))
            }
            NodeKind::Unary { operand, .. } => format!("!{}", self.render(*operand)),
            NodeKind::FunctionCall {
                receiver,
                name,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.render(*arg))
                    .collect::<Vec<_>>()
                    .join(", ");
                match receiver {
                    Some(recv) => format!("{}.{}({})", self.render(*recv), name, args),
                    None => format!("{}({})", name, args),
                }
            }
            other => format!("<{}>", other.label()),
        }
    }
}
