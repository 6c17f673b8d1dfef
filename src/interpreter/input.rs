//! Player-input suspension points.
//!
//! An input node prompts its players, then suspends until every addressed
//! player has sent an acceptable reply. Invalid replies re-prompt only the
//! player who sent them.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::game::communicator::PlayerId;

use super::ast::{InputKind, NodeId, NodeKind};
use super::environment::{ScopeHandle, ScopeId, ScopeKind};
use super::runtime::{Machine, player_ids, store};
use super::task::Step;
use super::value::Value;

#[derive(Debug)]
struct Waiter {
    player: PlayerId,
    answer: Option<Value>,
    // Votes are held in the return slot of a per-voter frame until tallied.
    frame: Option<ScopeHandle>,
}

/// In-flight input request.
#[derive(Debug)]
pub(crate) struct PendingInput {
    node: NodeId,
    kind: InputKind,
    scope: ScopeId,
    result: NodeId,
    by_player: bool,
    prompt: String,
    choices: Vec<Value>,
    waiters: Vec<Waiter>,
    timeout_at: Option<u64>,
    deadline_at: Option<u64>,
}

impl PendingInput {
    /// Evaluate the prompt, choices and recipients, then send the prompt.
    pub(crate) fn begin(cx: &mut Machine<'_>, node: NodeId, scope: ScopeId) -> EvalResult<Self> {
        let NodeKind::Input {
            kind,
            to,
            prompt,
            choices,
            result,
            by_player,
            timeout,
        } = cx.tree.kind(node)
        else {
            return Err(EvalError::TypeMismatch(format!("{} is not an input", node)));
        };

        let recipients = cx.evaluator().evaluate(scope, *to)?;
        let players = player_ids(&recipients)?;
        if *kind != InputKind::Vote && players.len() != 1 {
            return Err(EvalError::TypeMismatch(format!(
                "{} expects exactly one player, got {}",
                cx.tree.kind(node).label(),
                players.len()
            )));
        }

        let choices = match choices {
            Some(list) => match cx.evaluator().evaluate(scope, *list)? {
                Value::List(items) if !items.is_empty() => items,
                other => {
                    return Err(EvalError::TypeMismatch(format!(
                        "choices must be a non-empty list, got {}",
                        other
                    )));
                }
            },
            None => Vec::new(),
        };

        let mut prompt = cx.evaluator().format(scope, *prompt)?;
        for (idx, choice) in choices.iter().enumerate() {
            prompt.push_str(&format!("\n{}. {}", idx + 1, label(choice)));
        }

        let waiters = players
            .into_iter()
            .map(|player| Waiter {
                frame: (*kind == InputKind::Vote)
                    .then(|| cx.env.create_child(scope, ScopeKind::Frame)),
                player,
                answer: None,
            })
            .collect::<Vec<_>>();
        for waiter in &waiters {
            cx.comm.send_to_player(&waiter.player, &prompt);
        }
        debug!(node = %node, players = waiters.len(), "awaiting input");

        Ok(Self {
            node,
            kind: *kind,
            scope,
            result: *result,
            by_player: *by_player,
            prompt,
            choices,
            waiters,
            timeout_at: timeout.map(|ticks| cx.clock.saturating_add(ticks)),
            deadline_at: match timeout {
                Some(_) => None,
                None => cx
                    .config
                    .input_deadline_ticks
                    .map(|ticks| cx.clock.saturating_add(ticks)),
            },
        })
    }

    /// Consume replies; done once every player answered or the node timed out.
    pub(crate) fn step(&mut self, cx: &mut Machine<'_>) -> EvalResult<Step<()>> {
        for idx in 0..self.waiters.len() {
            if self.waiters[idx].answer.is_some() {
                continue;
            }
            let player = self.waiters[idx].player.clone();
            while let Some(reply) = cx.inbox.next_from_player(&mut *cx.comm, &player) {
                match self.validate(&reply) {
                    Some(answer) => {
                        self.accept(cx, idx, answer);
                        break;
                    }
                    None => {
                        warn!(player = %player, reply = %reply, "rejected input");
                        let retry = format!("Invalid response '{}'.\n{}", reply.trim(), self.prompt);
                        cx.comm.send_to_player(&player, &retry);
                    }
                }
            }
        }

        if self.waiters.iter().all(|waiter| waiter.answer.is_some()) {
            self.finish(cx)?;
            return Ok(Step::Done(()));
        }
        if self.timeout_at.is_some_and(|at| cx.clock >= at) {
            info!(node = %self.node, "input timed out");
            if self.kind == InputKind::Vote {
                self.finish(cx)?;
            } else {
                self.release(cx);
            }
            return Ok(Step::Done(()));
        }
        if self.deadline_at.is_some_and(|at| cx.clock >= at) {
            let player = self
                .waiters
                .iter()
                .find(|waiter| waiter.answer.is_none())
                .map(|waiter| waiter.player.to_string())
                .unwrap_or_default();
            self.release(cx);
            return Err(EvalError::InputTimedOut { player });
        }
        Ok(Step::Suspended)
    }

    /// Release per-voter frames without binding anything.
    pub(crate) fn unwind(mut self, cx: &mut Machine<'_>) {
        self.release(cx);
    }

    fn validate(&self, reply: &str) -> Option<Value> {
        let reply = reply.trim();
        if reply.is_empty() {
            return None;
        }
        match self.kind {
            InputKind::Text => Some(Value::from(reply)),
            InputKind::Choice | InputKind::Vote => {
                if let Ok(position) = reply.parse::<usize>() {
                    return position
                        .checked_sub(1)
                        .and_then(|idx| self.choices.get(idx))
                        .cloned();
                }
                self.choices
                    .iter()
                    .find(|choice| label(choice).eq_ignore_ascii_case(reply))
                    .cloned()
            }
        }
    }

    fn accept(&mut self, cx: &mut Machine<'_>, idx: usize, answer: Value) {
        let waiter = &mut self.waiters[idx];
        debug!(player = %waiter.player, answer = %answer, "input accepted");
        if let Some(frame) = &waiter.frame {
            cx.env.set_return(frame.id(), answer.clone());
        }
        waiter.answer = Some(answer);
    }

    fn finish(&mut self, cx: &mut Machine<'_>) -> EvalResult<()> {
        let value = match self.kind {
            InputKind::Vote => {
                let mut tally: BTreeMap<String, Value> = self
                    .choices
                    .iter()
                    .map(|choice| (label(choice), Value::Int(0)))
                    .collect();
                for waiter in &mut self.waiters {
                    let Some(frame) = waiter.frame.take() else {
                        continue;
                    };
                    if let Some(vote) = cx.env.take_return(frame.id()) {
                        if let Some(Value::Int(count)) = tally.get_mut(&label(&vote)) {
                            *count += 1;
                        }
                    }
                    cx.env.release(frame);
                }
                Value::Map(tally)
            }
            InputKind::Choice | InputKind::Text if self.by_player => {
                for waiter in &mut self.waiters {
                    if let Some(answer) = waiter.answer.take() {
                        collect(cx, self.scope, self.result, &waiter.player, answer)?;
                    }
                }
                return Ok(());
            }
            InputKind::Choice | InputKind::Text => self
                .waiters
                .iter_mut()
                .find_map(|waiter| waiter.answer.take())
                .unwrap_or_default(),
        };
        store(cx, self.scope, self.result, value)
    }

    fn release(&mut self, cx: &mut Machine<'_>) {
        for waiter in &mut self.waiters {
            if let Some(frame) = waiter.frame.take() {
                cx.env.release(frame);
            }
        }
    }
}

// Record `answer` in the collection at `target`: maps are keyed by player id,
// lists get the answer appended. An unbound plain name becomes a new map.
fn collect(
    cx: &mut Machine<'_>,
    scope: ScopeId,
    target: NodeId,
    player: &PlayerId,
    answer: Value,
) -> EvalResult<()> {
    if let NodeKind::Variable(name) = cx.tree.kind(target) {
        if cx.env.find(scope, name).is_none() {
            let mut answers = BTreeMap::new();
            answers.insert(player.0.clone(), answer);
            return store(cx, scope, target, Value::Map(answers));
        }
    }
    let place = cx.evaluator().place_of(scope, target)?;
    match cx.env.read_mut(&place)? {
        Value::Map(answers) => {
            answers.insert(player.0.clone(), answer);
            Ok(())
        }
        Value::List(answers) => {
            answers.push(answer);
            Ok(())
        }
        other => Err(EvalError::TypeMismatch(format!(
            "cannot collect answers into {} at '{}'",
            other.kind(),
            place.describe()
        ))),
    }
}

/// Display text of a choice: a record's `name`, otherwise the value itself.
pub(crate) fn label(choice: &Value) -> String {
    match choice.get("name") {
        Some(name) => name.to_string(),
        None => choice.to_string(),
    }
}
