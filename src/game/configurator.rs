//! Interactive game setup: asks the owner the definition's setup questions,
//! then builds the initial [`Environment`].

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{ConfigError, ConfigResult, EngineError};
use crate::interpreter::environment::{Environment, Symbol};
use crate::interpreter::task::{Resumable, Step};
use crate::interpreter::value::Value;

use super::communicator::{Communicator, Inbox};
use super::{GameDefinition, Participant, Roster};

/// What the configurator needs from the driver on each resume.
pub struct SetupContext<'a> {
    /// Channel to the owner.
    pub comm: &'a mut dyn Communicator,
    /// Owner replies received but not yet consumed.
    pub inbox: &'a mut Inbox,
    /// Engine settings (retry text).
    pub config: &'a EngineConfig,
}

/// Kind of answer a setup prompt expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    /// A JSON integer, optionally bounded by `range`.
    Integer,
    /// Any text.
    String,
    /// `true`/`false`/`yes`/`no`.
    Boolean,
    /// A non-empty answer to the prompt, stored with its question.
    QuestionAnswer,
    /// One of `choices`, by text or 1-based position.
    MultipleChoice,
}

/// A setup entry resolved by asking the owner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prompt {
    /// Expected answer kind.
    pub kind: PromptKind,
    /// Question text.
    pub prompt: String,
    /// Inclusive bounds for integer answers.
    #[serde(default)]
    pub range: Option<(i64, i64)>,
    /// Options for multiple-choice answers.
    #[serde(default)]
    pub choices: Vec<String>,
}

impl Prompt {
    /// Text sent to the owner.
    pub fn render(&self) -> String {
        let mut text = self.prompt.clone();
        match self.kind {
            PromptKind::Integer => {
                if let Some((low, high)) = self.range {
                    text.push_str(&format!(" ({}-{})", low, high));
                }
            }
            PromptKind::Boolean => text.push_str(" (yes/no)"),
            PromptKind::MultipleChoice => {
                for (idx, choice) in self.choices.iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", idx + 1, choice));
                }
            }
            PromptKind::String | PromptKind::QuestionAnswer => {}
        }
        text
    }

    /// Validate a reply, producing the bound value.
    pub fn parse(&self, reply: &str) -> Option<Value> {
        let reply = reply.trim();
        match self.kind {
            PromptKind::Integer => {
                let number = serde_json::from_str::<serde_json::Value>(reply)
                    .ok()?
                    .as_i64()?;
                match self.range {
                    Some((low, high)) if number < low || number > high => None,
                    _ => Some(Value::Int(number)),
                }
            }
            PromptKind::String => Some(Value::from(reply)),
            PromptKind::Boolean => match reply.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" => Some(Value::Bool(true)),
                "false" | "no" | "n" => Some(Value::Bool(false)),
                _ => None,
            },
            PromptKind::QuestionAnswer => {
                if reply.is_empty() {
                    return None;
                }
                let mut pair = BTreeMap::new();
                pair.insert("question".to_string(), Value::from(self.prompt.as_str()));
                pair.insert("answer".to_string(), Value::from(reply));
                Some(Value::Map(pair))
            }
            PromptKind::MultipleChoice => {
                let by_position = reply
                    .parse::<usize>()
                    .ok()
                    .and_then(|position| position.checked_sub(1))
                    .and_then(|idx| self.choices.get(idx));
                by_position
                    .or_else(|| {
                        self.choices
                            .iter()
                            .find(|choice| choice.eq_ignore_ascii_case(reply))
                    })
                    .map(|choice| Value::from(choice.as_str()))
            }
        }
    }
}

#[derive(Debug)]
enum Entry {
    Literal(Value),
    Ask(Prompt),
}

/// Resolves setup entries in key order, then builds the root scope.
#[derive(Debug)]
pub struct Configurator {
    definition: GameDefinition,
    roster: Roster,
    entries: Vec<(String, Entry)>,
    next: usize,
    awaiting: Option<(String, Prompt)>,
    answers: BTreeMap<String, Value>,
}

impl Configurator {
    /// Validate the roster against the definition and parse its setup entries.
    pub fn new(definition: GameDefinition, roster: Roster) -> ConfigResult<Self> {
        let count = roster.players.len();
        let bounds = definition.player_count;
        if count < bounds.min || count > bounds.max {
            return Err(ConfigError::PlayerCount {
                count,
                min: bounds.min,
                max: bounds.max,
            });
        }
        if !definition.audience && !roster.audience.is_empty() {
            return Err(ConfigError::AudienceNotAllowed);
        }

        let mut entries = Vec::with_capacity(definition.setup.len());
        for (key, json) in &definition.setup {
            let entry = if json.get("kind").is_some() {
                let prompt = Prompt::deserialize(json).map_err(|err| ConfigError::InvalidSetup {
                    key: key.clone(),
                    detail: err.to_string(),
                })?;
                if prompt.kind == PromptKind::MultipleChoice && prompt.choices.is_empty() {
                    return Err(ConfigError::InvalidSetup {
                        key: key.clone(),
                        detail: "multiple-choice prompt has no choices".to_string(),
                    });
                }
                Entry::Ask(prompt)
            } else {
                Entry::Literal(Value::from(json.clone()))
            };
            entries.push((key.clone(), entry));
        }

        Ok(Self {
            definition,
            roster,
            entries,
            next: 0,
            awaiting: None,
            answers: BTreeMap::new(),
        })
    }

    /// Setup values resolved so far.
    pub fn answers(&self) -> &BTreeMap<String, Value> {
        &self.answers
    }

    fn build(&mut self) -> Environment {
        let mut env = Environment::new();
        let root = env.root();

        let mut configuration = BTreeMap::new();
        configuration.insert(
            "name".to_string(),
            Value::from(self.definition.name.as_str()),
        );
        let mut bounds = BTreeMap::new();
        bounds.insert(
            "min".to_string(),
            Value::Int(self.definition.player_count.min as i64),
        );
        bounds.insert(
            "max".to_string(),
            Value::Int(self.definition.player_count.max as i64),
        );
        configuration.insert("player count".to_string(), Value::Map(bounds));
        configuration.insert("audience".to_string(), Value::Bool(self.definition.audience));
        configuration.append(&mut self.answers);
        env.allocate(root, "configuration", Symbol::constant(Value::Map(configuration)));

        let players = records(&self.roster.players, &self.definition.per_player);
        env.allocate(root, "players", Symbol::mutable(players));
        let audience = records(&self.roster.audience, &self.definition.per_audience);
        env.allocate(root, "audience", Symbol::mutable(audience));

        for (name, json) in &self.definition.constants {
            env.allocate(root, name.clone(), Symbol::constant(Value::from(json.clone())));
        }
        for (name, json) in &self.definition.variables {
            env.allocate(root, name.clone(), Symbol::mutable(Value::from(json.clone())));
        }
        env
    }
}

fn records(people: &[Participant], defaults: &BTreeMap<String, serde_json::Value>) -> Value {
    Value::List(
        people
            .iter()
            .map(|person| {
                let mut record: BTreeMap<String, Value> = defaults
                    .iter()
                    .map(|(key, json)| (key.clone(), Value::from(json.clone())))
                    .collect();
                record.insert("id".to_string(), Value::from(person.id.0.as_str()));
                record.insert("name".to_string(), Value::from(person.name.as_str()));
                Value::Map(record)
            })
            .collect(),
    )
}

impl<'a> Resumable<SetupContext<'a>> for Configurator {
    type Output = Environment;
    type Error = EngineError;

    fn step(&mut self, cx: &mut SetupContext<'a>) -> Result<Step<Environment>, EngineError> {
        loop {
            if let Some((key, prompt)) = &self.awaiting {
                let mut accepted = None;
                while let Some(reply) = cx.inbox.next_from_owner(&mut *cx.comm) {
                    match prompt.parse(&reply) {
                        Some(value) => {
                            accepted = Some(value);
                            break;
                        }
                        None => {
                            warn!(setup = %key, reply = %reply, "rejected setup answer");
                            cx.comm.send_to_owner(&cx.config.retry_message);
                        }
                    }
                }
                let Some(value) = accepted else {
                    return Ok(Step::Suspended);
                };
                debug!(setup = %key, value = %value, "setup answer accepted");
                let key = key.clone();
                self.answers.insert(key, value);
                self.awaiting = None;
            }

            let Some((key, entry)) = self.entries.get(self.next) else {
                return Ok(Step::Done(self.build()));
            };
            self.next += 1;
            match entry {
                Entry::Literal(value) => {
                    self.answers.insert(key.clone(), value.clone());
                }
                Entry::Ask(prompt) => {
                    cx.comm.send_to_owner(&prompt.render());
                    self.awaiting = Some((key.clone(), prompt.clone()));
                }
            }
        }
    }
}
