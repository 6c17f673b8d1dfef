use rand::rngs::StdRng;
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::game::communicator::{Communicator, Inbox, PlayerId};

use super::ast::{NodeId, NodeKind, RuleTree, TimerMode};
use super::environment::{Environment, PathStep, Place, ScopeHandle, ScopeId, ScopeKind, Symbol};
use super::eval::Evaluator;
use super::input::PendingInput;
use super::task::{CancelToken, Resumable, Resumed, Step, Task, await_child};
use super::value::Value;

/// Everything a rule needs while it runs: the tree, the bindings, the outside
/// world and the clock. Rebuilt by the driver for every tick.
pub struct Machine<'a> {
    /// Rule tree being executed.
    pub tree: &'a RuleTree,
    /// Game bindings.
    pub env: &'a mut Environment,
    /// Channel to the owner and players.
    pub comm: &'a mut dyn Communicator,
    /// Replies received but not yet consumed by an input.
    pub inbox: &'a mut Inbox,
    /// Random source for shuffles.
    pub rng: &'a mut StdRng,
    /// Engine limits.
    pub config: &'a EngineConfig,
    /// Current tick.
    pub clock: u64,
    /// Cancellation flag shared with every spawned task.
    pub cancel: CancelToken,
}

impl Machine<'_> {
    /// Expression evaluator over this machine's tree and environment.
    pub fn evaluator(&mut self) -> Evaluator<'_> {
        Evaluator::new(self.tree, self.env)
    }

    /// Create a task that evaluates `node` in `scope`.
    pub fn spawn(&self, node: NodeId, scope: ScopeId) -> Task<NodeTask> {
        Task::new(NodeTask::new(node, scope), self.cancel.clone())
    }
}

/// Resumable evaluation of one rule node.
#[derive(Debug)]
pub struct NodeTask {
    node: NodeId,
    scope: ScopeId,
    state: Box<NodeState>,
}

#[derive(Debug)]
enum NodeState {
    Start,
    Sequence {
        block: Option<ScopeHandle>,
        next: usize,
        child: Option<Task<NodeTask>>,
    },
    ForEach {
        source: Source,
        element: String,
        body: NodeId,
        index: usize,
        frame: Option<ScopeHandle>,
        child: Option<Task<NodeTask>>,
    },
    Parallel {
        branches: Vec<Branch>,
    },
    Loop {
        condition: NodeId,
        until: bool,
        body: NodeId,
        child: Option<Task<NodeTask>>,
    },
    Delegate {
        child: Option<Task<NodeTask>>,
    },
    Timer {
        deadline: u64,
        mode: TimerMode,
        flag: Option<NodeId>,
        flagged: bool,
        child: Option<Task<NodeTask>>,
    },
    Input(PendingInput),
    Finished,
}

#[derive(Debug)]
struct Branch {
    frame: Option<ScopeHandle>,
    task: Option<Task<NodeTask>>,
}

// Where iteration elements come from: a bound list (elements are bound by
// reference) or a computed one (elements are copied). A bound list is read
// live: element `i` refers to slot `i` of the list as it is when read, so a
// body that reorders or shrinks its own list shifts later elements and
// iteration ends once the index passes the current length.
#[derive(Debug)]
enum Source {
    Place(Place),
    Owned(Vec<Value>),
}

impl Source {
    fn resolve(cx: &mut Machine<'_>, scope: ScopeId, list: NodeId) -> EvalResult<Source> {
        let mut eval = cx.evaluator();
        if let Ok(place) = eval.place_of(scope, list) {
            if matches!(cx.env.read(&place), Some(Value::List(_))) {
                return Ok(Source::Place(place));
            }
        }
        match cx.evaluator().evaluate(scope, list)? {
            Value::List(items) => Ok(Source::Owned(items)),
            other => Err(EvalError::TypeMismatch(format!(
                "'{}' evaluated to {} where a list was expected",
                cx.tree.render(list),
                other.kind()
            ))),
        }
    }

    fn len(&self, env: &Environment) -> usize {
        match self {
            Source::Place(place) => env.read(place).and_then(Value::size).unwrap_or(0),
            Source::Owned(items) => items.len(),
        }
    }

    // Bind element `index` as `name` in `frame`; false once exhausted.
    fn bind(&self, env: &mut Environment, frame: ScopeId, name: &str, index: usize) -> bool {
        if index >= self.len(env) {
            return false;
        }
        let symbol = match self {
            Source::Place(place) => Symbol::element(place.child(PathStep::Index(index))),
            Source::Owned(items) => Symbol::mutable(items[index].clone()),
        };
        env.allocate(frame, name, symbol);
        true
    }
}

impl NodeTask {
    /// Evaluate `node` with `scope` as the enclosing scope.
    pub fn new(node: NodeId, scope: ScopeId) -> Self {
        Self {
            node,
            scope,
            state: Box::new(NodeState::Start),
        }
    }

    /// Node this task evaluates.
    pub fn node(&self) -> NodeId {
        self.node
    }

    fn begin(&self, cx: &mut Machine<'_>) -> EvalResult<NodeState> {
        let scope = self.scope;
        let kind = cx.tree.kind(self.node);
        debug!(node = %self.node, rule = kind.label(), "evaluating rule");

        let state = match kind {
            NodeKind::Rules(_) => NodeState::Sequence {
                block: Some(cx.env.create_child(scope, ScopeKind::Block)),
                next: 0,
                child: None,
            },
            NodeKind::GlobalMessage { message } => {
                let text = cx.evaluator().format(scope, *message)?;
                cx.comm.send_global_message(&text);
                NodeState::Finished
            }
            NodeKind::Message { to, message } => {
                let recipients = cx.evaluator().evaluate(scope, *to)?;
                let text = cx.evaluator().format(scope, *message)?;
                for player in player_ids(&recipients)? {
                    cx.comm.send_to_player(&player, &text);
                }
                NodeState::Finished
            }
            NodeKind::Scores { score, ascending } => {
                let board = scoreboard(cx, scope, score, *ascending)?;
                cx.comm.send_global_message(&board);
                NodeState::Finished
            }
            NodeKind::Assign { target, value } => {
                let value = cx.evaluator().evaluate(scope, *value)?;
                store(cx, scope, *target, value)?;
                NodeState::Finished
            }
            NodeKind::Declare {
                name,
                value,
                mutable,
            } => {
                if let Some((_, symbol)) = cx.env.find_in_frame(scope, name) {
                    if !symbol.is_mutable() {
                        return Err(EvalError::ImmutableBinding(name.clone()));
                    }
                }
                let value = cx.evaluator().evaluate(scope, *value)?;
                let symbol = if *mutable {
                    Symbol::mutable(value)
                } else {
                    Symbol::constant(value)
                };
                cx.env.allocate(scope, name.clone(), symbol);
                NodeState::Finished
            }
            NodeKind::ForEach {
                list,
                element,
                body,
            } => NodeState::ForEach {
                source: Source::resolve(cx, scope, *list)?,
                element: element.clone(),
                body: *body,
                index: 0,
                frame: None,
                child: None,
            },
            NodeKind::ParallelFor {
                list,
                element,
                body,
            } => {
                let source = Source::resolve(cx, scope, *list)?;
                let mut branches = Vec::new();
                let mut index = 0;
                loop {
                    let frame = cx.env.create_child(scope, ScopeKind::Frame);
                    if !source.bind(cx.env, frame.id(), element, index) {
                        cx.env.release(frame);
                        break;
                    }
                    branches.push(Branch {
                        task: Some(cx.spawn(*body, frame.id())),
                        frame: Some(frame),
                    });
                    index += 1;
                }
                NodeState::Parallel { branches }
            }
            NodeKind::InParallel(items) => NodeState::Parallel {
                branches: items
                    .iter()
                    .map(|item| Branch {
                        frame: None,
                        task: Some(cx.spawn(*item, scope)),
                    })
                    .collect(),
            },
            NodeKind::Loop {
                condition,
                until,
                body,
            } => NodeState::Loop {
                condition: *condition,
                until: *until,
                body: *body,
                child: None,
            },
            NodeKind::Switch { value, cases } => {
                let value = cx.evaluator().evaluate(scope, *value)?;
                let mut chosen = None;
                for case in cases {
                    let NodeKind::SwitchCase { case: literal, body } = cx.tree.kind(*case) else {
                        continue;
                    };
                    let matched = value.equal(literal).ok_or_else(|| {
                        EvalError::TypeMismatch(format!(
                            "cannot compare {} with case {}",
                            value.kind(),
                            literal
                        ))
                    })?;
                    if matched {
                        chosen = Some(*body);
                        break;
                    }
                }
                delegate(cx, scope, chosen)
            }
            NodeKind::When { cases } => {
                let mut chosen = None;
                for case in cases {
                    let NodeKind::WhenCase { condition, body } = cx.tree.kind(*case) else {
                        continue;
                    };
                    if cx.evaluator().evaluate_bool(scope, *condition)? {
                        chosen = Some(*body);
                        break;
                    }
                }
                delegate(cx, scope, chosen)
            }
            NodeKind::SwitchCase { body, .. } | NodeKind::WhenCase { body, .. } => {
                delegate(cx, scope, Some(*body))
            }
            NodeKind::Reverse { list } => {
                with_list(cx, scope, *list, "reverse", |value| value.reverse())?;
                NodeState::Finished
            }
            NodeKind::Shuffle { list } => {
                let place = cx.evaluator().place_of(scope, *list)?;
                let target = cx.env.read_mut(&place)?;
                if !target.shuffle(&mut *cx.rng) {
                    warn!(list = %place.describe(), "shuffle skipped: not a list");
                }
                NodeState::Finished
            }
            NodeKind::Sort { list, key } => {
                with_list(cx, scope, *list, "sort", |value| match key {
                    Some(key) => value.sort_by_key(key),
                    None => value.sort(),
                })?;
                NodeState::Finished
            }
            NodeKind::Extend { target, list } => {
                let source = cx.evaluator().place_of(scope, *list)?;
                let mut moved = cx.env.take(&source)?;
                let outcome = with_list(cx, scope, *target, "extend", |value| {
                    value.extend(&mut moved)
                });
                cx.env.write(&source, moved)?;
                outcome?;
                NodeState::Finished
            }
            NodeKind::Deal { from, to, count } => {
                let count = cx.evaluator().evaluate_count(scope, *count)?;
                let source = cx.evaluator().place_of(scope, *from)?;
                let mut pile = cx.env.take(&source)?;
                let outcome = with_list(cx, scope, *to, "deal", |value| {
                    value.deal(&mut pile, count)
                });
                cx.env.write(&source, pile)?;
                outcome?;
                NodeState::Finished
            }
            NodeKind::Discard { from, count } => {
                let count = cx.evaluator().evaluate_count(scope, *count)?;
                with_list(cx, scope, *from, "discard", |value| value.discard(count))?;
                NodeState::Finished
            }
            NodeKind::Add { to, value } => {
                let value = cx.evaluator().evaluate(scope, *value)?;
                add(cx, scope, *to, value)?;
                NodeState::Finished
            }
            NodeKind::Timer {
                duration,
                mode,
                body,
                flag,
            } => {
                let ticks = cx.evaluator().evaluate_count(scope, *duration)? as u64;
                if let (TimerMode::Track, Some(flag)) = (mode, flag) {
                    store(cx, scope, *flag, Value::Bool(false))?;
                }
                NodeState::Timer {
                    deadline: cx.clock.saturating_add(ticks),
                    mode: *mode,
                    flag: *flag,
                    flagged: false,
                    child: Some(cx.spawn(*body, scope)),
                }
            }
            NodeKind::Input { .. } => NodeState::Input(PendingInput::begin(cx, self.node, scope)?),
            other => {
                return Err(EvalError::TypeMismatch(format!(
                    "'{}' cannot be run as a rule",
                    other.label()
                )));
            }
        };
        Ok(state)
    }
}

impl<'a> Resumable<Machine<'a>> for NodeTask {
    type Output = ();
    type Error = EvalError;

    fn step(&mut self, cx: &mut Machine<'a>) -> EvalResult<Step<()>> {
        if matches!(*self.state, NodeState::Start) {
            let state = self.begin(cx)?;
            *self.state = state;
        }
        let scope = self.scope;
        let node = self.node;

        match &mut *self.state {
            NodeState::Start | NodeState::Finished => Ok(Step::Done(())),
            NodeState::Sequence { block, next, child } => {
                let NodeKind::Rules(items) = cx.tree.kind(node) else {
                    return Ok(Step::Done(()));
                };
                let inner = block.as_ref().map_or(scope, ScopeHandle::id);
                loop {
                    await_child!(*child, cx);
                    match items.get(*next) {
                        Some(item) => {
                            *child = Some(cx.spawn(*item, inner));
                            *next += 1;
                        }
                        None => break,
                    }
                }
                if let Some(handle) = block.take() {
                    cx.env.release(handle);
                }
                Ok(Step::Done(()))
            }
            NodeState::ForEach {
                source,
                element,
                body,
                index,
                frame,
                child,
            } => loop {
                if await_child!(*child, cx).is_some() {
                    if let Some(handle) = frame.take() {
                        cx.env.release(handle);
                    }
                }
                let handle = cx.env.create_child(scope, ScopeKind::Frame);
                if !source.bind(cx.env, handle.id(), element, *index) {
                    cx.env.release(handle);
                    return Ok(Step::Done(()));
                }
                *child = Some(cx.spawn(*body, handle.id()));
                *frame = Some(handle);
                *index += 1;
            },
            NodeState::Parallel { branches } => {
                for branch in branches.iter_mut() {
                    let Some(task) = branch.task.take() else {
                        continue;
                    };
                    match task.resume(cx)? {
                        Resumed::Suspended(task) => branch.task = Some(task),
                        Resumed::Done(()) => {
                            if let Some(handle) = branch.frame.take() {
                                cx.env.release(handle);
                            }
                        }
                    }
                }
                if branches.iter().all(|branch| branch.task.is_none()) {
                    Ok(Step::Done(()))
                } else {
                    Ok(Step::Suspended)
                }
            }
            NodeState::Loop {
                condition,
                until,
                body,
                child,
            } => {
                let limit = cx.config.loop_iterations_per_tick.max(1);
                let mut iterations = 0;
                loop {
                    await_child!(*child, cx);
                    if iterations >= limit {
                        return Ok(Step::Suspended);
                    }
                    let holds = cx.evaluator().evaluate_bool(scope, *condition)?;
                    if holds == *until {
                        return Ok(Step::Done(()));
                    }
                    *child = Some(cx.spawn(*body, scope));
                    iterations += 1;
                }
            }
            NodeState::Delegate { child } => {
                await_child!(*child, cx);
                Ok(Step::Done(()))
            }
            NodeState::Timer {
                deadline,
                mode,
                flag,
                flagged,
                child,
            } => {
                let elapsed = cx.clock >= *deadline;
                match mode {
                    TimerMode::AtMost if elapsed => {
                        if let Some(task) = child.take() {
                            debug!(node = %node, "timer elapsed, abandoning rules");
                            task.abort(cx);
                        }
                        return Ok(Step::Done(()));
                    }
                    TimerMode::Track if elapsed && !*flagged => {
                        *flagged = true;
                        if let Some(flag) = flag {
                            store(cx, scope, *flag, Value::Bool(true))?;
                        }
                    }
                    _ => {}
                }
                await_child!(*child, cx);
                if *mode == TimerMode::Exact && !elapsed {
                    return Ok(Step::Suspended);
                }
                Ok(Step::Done(()))
            }
            NodeState::Input(pending) => pending.step(cx),
        }
    }

    fn unwind(self, cx: &mut Machine<'a>) {
        debug!(node = %self.node, "unwinding rule");
        match *self.state {
            NodeState::Sequence { block, child, .. } => {
                abort(child, cx);
                if let Some(handle) = block {
                    cx.env.release(handle);
                }
            }
            NodeState::ForEach { frame, child, .. } => {
                abort(child, cx);
                if let Some(handle) = frame {
                    cx.env.release(handle);
                }
            }
            NodeState::Parallel { branches } => {
                for branch in branches {
                    abort(branch.task, cx);
                    if let Some(handle) = branch.frame {
                        cx.env.release(handle);
                    }
                }
            }
            NodeState::Loop { child, .. }
            | NodeState::Delegate { child }
            | NodeState::Timer { child, .. } => abort(child, cx),
            NodeState::Input(pending) => pending.unwind(cx),
            NodeState::Start | NodeState::Finished => {}
        }
    }
}

fn abort(child: Option<Task<NodeTask>>, cx: &mut Machine<'_>) {
    if let Some(task) = child {
        task.abort(cx);
    }
}

fn delegate(cx: &Machine<'_>, scope: ScopeId, body: Option<NodeId>) -> NodeState {
    match body {
        Some(body) => NodeState::Delegate {
            child: Some(cx.spawn(body, scope)),
        },
        None => NodeState::Finished,
    }
}

/// Store `value` at the path `target`. An unbound plain name is declared
/// (mutable) in `scope`.
pub(crate) fn store(cx: &mut Machine<'_>, scope: ScopeId, target: NodeId, value: Value) -> EvalResult<()> {
    if let NodeKind::Variable(name) = cx.tree.kind(target) {
        if cx.env.find(scope, name).is_none() {
            cx.env.allocate(scope, name.clone(), Symbol::mutable(value));
            return Ok(());
        }
    }
    let place = cx.evaluator().place_of(scope, target)?;
    cx.env.write(&place, value)
}

/// Player ids addressed by a player record, an id string, or a list of either.
pub(crate) fn player_ids(value: &Value) -> EvalResult<Vec<PlayerId>> {
    match value {
        Value::String(id) => Ok(vec![PlayerId::from(id.as_str())]),
        Value::Map(record) => match record.get("id") {
            Some(Value::String(id)) => Ok(vec![PlayerId::from(id.as_str())]),
            _ => Err(EvalError::TypeMismatch(
                "player record has no string 'id'".to_string(),
            )),
        },
        Value::List(items) => {
            let mut ids = Vec::new();
            for item in items {
                ids.extend(player_ids(item)?);
            }
            Ok(ids)
        }
        other => Err(EvalError::TypeMismatch(format!(
            "{} does not identify a player",
            other.kind()
        ))),
    }
}

// Apply a list operation in place; non-lists are skipped with a warning.
fn with_list(
    cx: &mut Machine<'_>,
    scope: ScopeId,
    list: NodeId,
    op: &str,
    apply: impl FnOnce(&mut Value) -> bool,
) -> EvalResult<()> {
    let place = cx.evaluator().place_of(scope, list)?;
    let target = cx.env.read_mut(&place)?;
    if !apply(target) {
        warn!(list = %place.describe(), op, "list operation skipped");
    }
    Ok(())
}

fn add(cx: &mut Machine<'_>, scope: ScopeId, to: NodeId, value: Value) -> EvalResult<()> {
    let place = cx.evaluator().place_of(scope, to)?;
    let target = cx.env.read_mut(&place)?;
    if let Value::List(items) = target {
        items.push(value);
        return Ok(());
    }
    let sum = match (&*target, &value) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.saturating_add(*b)),
        (Value::Int(a), Value::Double(b)) => Value::Double(*a as f64 + b),
        (Value::Double(a), Value::Int(b)) => Value::Double(a + *b as f64),
        (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
        (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
        (current, _) => {
            return Err(EvalError::TypeMismatch(format!(
                "cannot add {} to {} at '{}'",
                value.kind(),
                current.kind(),
                place.describe()
            )));
        }
    };
    *target = sum;
    Ok(())
}

fn scoreboard(cx: &mut Machine<'_>, scope: ScopeId, score: &str, ascending: bool) -> EvalResult<String> {
    let players = cx
        .env
        .lookup(scope, "players")
        .and_then(Value::as_list)
        .ok_or_else(|| EvalError::Unresolved("players".to_string()))?;

    let mut rows = Vec::with_capacity(players.len());
    for player in players {
        let name = player
            .get("name")
            .map(Value::to_string)
            .ok_or_else(|| EvalError::Unresolved("player.name".to_string()))?;
        let points = player
            .get(score)
            .cloned()
            .ok_or_else(|| EvalError::Unresolved(format!("player.{}", score)))?;
        rows.push((name, points));
    }

    let mut incomparable = false;
    rows.sort_by(|(_, a), (_, b)| {
        let ord = a.compare(b).unwrap_or_else(|| {
            incomparable = true;
            Ordering::Equal
        });
        if ascending { ord } else { ord.reverse() }
    });
    if incomparable {
        return Err(EvalError::TypeMismatch(format!(
            "scores under '{}' are not comparable",
            score
        )));
    }

    let mut board = String::from("Scores:");
    for (rank, (name, points)) in rows.iter().enumerate() {
        board.push_str(&format!("\n{}. {}: {}", rank + 1, name, points));
    }
    Ok(board)
}
