use serde_json::{Map, Value as Json};

use crate::error::{ParseError, ParseResult};

use super::ast::{BinaryOp, InputKind, NodeId, NodeKind, RuleTree, TimerMode};
use super::parser::parse_expression;
use super::value::Value;

type Object = Map<String, Json>;

/// Parse a rule document (`{"rules": [...]}` or a bare array of rules) into a
/// [`RuleTree`] whose root is a [`NodeKind::Rules`] sequence.
pub fn build_rules(source: &str) -> ParseResult<RuleTree> {
    let document: Json = serde_json::from_str(source)?;
    build_rules_from_json(&document)
}

/// Build a [`RuleTree`] from an already-decoded rule document.
pub fn build_rules_from_json(document: &Json) -> ParseResult<RuleTree> {
    let rules = match document {
        Json::Array(items) => items,
        Json::Object(object) => match object.get("rules") {
            Some(Json::Array(items)) => items,
            Some(_) => return Err(invalid("document", "rules", "expected an array")),
            None => return Err(missing("document", "rules")),
        },
        _ => return Err(invalid("document", "rules", "expected an object or array")),
    };
    let mut builder = Builder {
        tree: RuleTree::new(),
    };
    let root = builder.sequence(rules)?;
    builder.tree.set_root(root);
    Ok(builder.tree)
}

/// Split a format string into literal pieces and `{expression}` arguments.
pub fn split_format(text: &str) -> ParseResult<(Vec<String>, Vec<String>)> {
    let mut pieces = vec![String::new()];
    let mut args = Vec::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                let mut expr = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(ParseError::Format(text.to_string())),
                        other => expr.push(other),
                    }
                }
                if !closed {
                    return Err(ParseError::Format(text.to_string()));
                }
                args.push(expr);
                pieces.push(String::new());
            }
            '}' => return Err(ParseError::Format(text.to_string())),
            other => {
                if let Some(last) = pieces.last_mut() {
                    last.push(other);
                }
            }
        }
    }
    Ok((pieces, args))
}

struct Builder {
    tree: RuleTree,
}

impl Builder {
    fn sequence(&mut self, rules: &[Json]) -> ParseResult<NodeId> {
        let children = rules
            .iter()
            .map(|rule| self.rule(rule))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(self.tree.push(NodeKind::Rules(children)))
    }

    fn rule(&mut self, json: &Json) -> ParseResult<NodeId> {
        let Json::Object(obj) = json else {
            return Err(invalid("rule", "rule", "each rule must be an object"));
        };
        let name = match obj.get("rule") {
            Some(Json::String(name)) => name.as_str(),
            Some(_) => return Err(invalid("rule", "rule", "expected a string")),
            None => return Err(missing("rule", "rule")),
        };

        let kind = match name {
            "global-message" => NodeKind::GlobalMessage {
                message: self.format(name, obj, "value")?,
            },
            "message" => NodeKind::Message {
                to: self.expression(name, obj, "to")?,
                message: self.format(name, obj, "value")?,
            },
            "scores" => NodeKind::Scores {
                score: string(name, obj, "score")?,
                ascending: optional_bool(name, obj, "ascending")?.unwrap_or(false),
            },
            "variable" => NodeKind::Assign {
                target: self.path(name, obj, "name")?,
                value: self.value_or_expression(name, obj)?,
            },
            "variable-declaration" => NodeKind::Declare {
                name: identifier(name, obj, "name")?,
                value: self.value_or_expression(name, obj)?,
                mutable: optional_bool(name, obj, "mutable")?.unwrap_or(true),
            },
            "foreach" => NodeKind::ForEach {
                list: self.expression(name, obj, "list")?,
                element: identifier(name, obj, "element")?,
                body: self.body(name, obj)?,
            },
            "parallelfor" => NodeKind::ParallelFor {
                list: self.expression(name, obj, "list")?,
                element: identifier(name, obj, "element")?,
                body: self.body(name, obj)?,
            },
            "inparallel" => {
                let branches = array(name, obj, "rules")?
                    .iter()
                    .map(|branch| self.rule(branch))
                    .collect::<ParseResult<Vec<_>>>()?;
                NodeKind::InParallel(branches)
            }
            "loop" => {
                let (field, until) = match (obj.get("while"), obj.get("until")) {
                    (Some(_), None) => ("while", false),
                    (None, Some(_)) => ("until", true),
                    (Some(_), Some(_)) => {
                        return Err(invalid(name, "while", "cannot combine 'while' and 'until'"));
                    }
                    (None, None) => return Err(missing(name, "while")),
                };
                NodeKind::Loop {
                    condition: self.expression(name, obj, field)?,
                    until,
                    body: self.body(name, obj)?,
                }
            }
            "switch" => {
                let value = self.expression(name, obj, "value")?;
                let mut cases = Vec::new();
                for case in array(name, obj, "cases")? {
                    let Json::Object(arm) = case else {
                        return Err(invalid(name, "cases", "each case must be an object"));
                    };
                    let literal = arm.get("case").ok_or_else(|| missing(name, "case"))?;
                    let body = self.body(name, arm)?;
                    cases.push(self.tree.push(NodeKind::SwitchCase {
                        case: Value::from(literal.clone()),
                        body,
                    }));
                }
                NodeKind::Switch { value, cases }
            }
            "when" => {
                let mut cases = Vec::new();
                for case in array(name, obj, "cases")? {
                    let Json::Object(arm) = case else {
                        return Err(invalid(name, "cases", "each case must be an object"));
                    };
                    let condition = self.expression(name, arm, "condition")?;
                    let body = self.body(name, arm)?;
                    cases.push(self.tree.push(NodeKind::WhenCase { condition, body }));
                }
                NodeKind::When { cases }
            }
            "reverse" => NodeKind::Reverse {
                list: self.path(name, obj, "list")?,
            },
            "shuffle" => NodeKind::Shuffle {
                list: self.path(name, obj, "list")?,
            },
            "sort" => NodeKind::Sort {
                list: self.path(name, obj, "list")?,
                key: optional_string(name, obj, "key")?,
            },
            "extend" => NodeKind::Extend {
                target: self.path(name, obj, "target")?,
                list: self.path(name, obj, "list")?,
            },
            "deal" => NodeKind::Deal {
                from: self.path(name, obj, "from")?,
                to: self.path(name, obj, "to")?,
                count: self.operand(name, obj, "count")?,
            },
            "discard" => NodeKind::Discard {
                from: self.path(name, obj, "from")?,
                count: self.operand(name, obj, "count")?,
            },
            "add" => NodeKind::Add {
                to: self.path(name, obj, "to")?,
                value: self.value_or_expression(name, obj)?,
            },
            "timer" => {
                let mode = match optional_string(name, obj, "mode")?.as_deref() {
                    None | Some("exact") => TimerMode::Exact,
                    Some("at-most") => TimerMode::AtMost,
                    Some("track") => TimerMode::Track,
                    Some(other) => {
                        return Err(invalid(name, "mode", &format!("unknown timer mode '{}'", other)));
                    }
                };
                let flag = match obj.get("flag") {
                    Some(_) => Some(self.path(name, obj, "flag")?),
                    None if mode == TimerMode::Track => return Err(missing(name, "flag")),
                    None => None,
                };
                NodeKind::Timer {
                    duration: self.operand(name, obj, "duration")?,
                    mode,
                    body: self.body(name, obj)?,
                    flag,
                }
            }
            "input-choice" | "input-text" | "input-vote" => {
                let kind = match name {
                    "input-choice" => InputKind::Choice,
                    "input-text" => InputKind::Text,
                    _ => InputKind::Vote,
                };
                let choices = match kind {
                    InputKind::Text => None,
                    _ => Some(self.operand(name, obj, "choices")?),
                };
                let timeout = match obj.get("timeout") {
                    None => None,
                    Some(json) => Some(json.as_u64().ok_or_else(|| {
                        invalid(name, "timeout", "expected a non-negative integer")
                    })?),
                };
                // `to`/`prompt`/`result`, or the collecting form
                // `value`/`list`/`element` where `element` names the player.
                let to = match (obj.get("to"), obj.get("element")) {
                    (Some(_), _) => self.expression(name, obj, "to")?,
                    (None, Some(_)) => {
                        let player = identifier(name, obj, "element")?;
                        self.tree.push(NodeKind::Variable(player))
                    }
                    (None, None) => return Err(missing(name, "to")),
                };
                let prompt = match obj.get("prompt") {
                    Some(_) => self.format(name, obj, "prompt")?,
                    None if obj.contains_key("value") => self.format(name, obj, "value")?,
                    None => return Err(missing(name, "prompt")),
                };
                let (result, by_player) = match (obj.get("result"), obj.get("list")) {
                    (Some(_), _) => (self.path(name, obj, "result")?, false),
                    (None, Some(_)) => (self.path(name, obj, "list")?, true),
                    (None, None) => return Err(missing(name, "result")),
                };
                NodeKind::Input {
                    kind,
                    to,
                    prompt,
                    choices,
                    result,
                    by_player,
                    timeout,
                }
            }
            other => return Err(ParseError::UnknownRule(other.to_string())),
        };
        Ok(self.tree.push(kind))
    }

    fn body(&mut self, rule: &str, obj: &Object) -> ParseResult<NodeId> {
        let rules = array(rule, obj, "rules")?;
        self.sequence(rules)
    }

    fn expression(&mut self, rule: &str, obj: &Object, field: &'static str) -> ParseResult<NodeId> {
        let text = string(rule, obj, field)?;
        parse_expression(&mut self.tree, &text)
    }

    // A path is a name optionally followed by `.member` steps.
    fn path(&mut self, rule: &str, obj: &Object, field: &'static str) -> ParseResult<NodeId> {
        let id = self.expression(rule, obj, field)?;
        if self.is_path(id) {
            Ok(id)
        } else {
            Err(invalid(rule, field, "expected a variable path"))
        }
    }

    fn is_path(&self, id: NodeId) -> bool {
        match self.tree.kind(id) {
            NodeKind::Variable(_) => true,
            NodeKind::Binary {
                op: BinaryOp::Dot,
                lhs,
                ..
            } => self.is_path(*lhs),
            _ => false,
        }
    }

    // Strings are expressions; any other JSON is a literal.
    fn operand(&mut self, rule: &str, obj: &Object, field: &'static str) -> ParseResult<NodeId> {
        match obj.get(field) {
            Some(Json::String(text)) => parse_expression(&mut self.tree, text),
            Some(json) => Ok(self.tree.push(NodeKind::Literal(Value::from(json.clone())))),
            None => Err(missing(rule, field)),
        }
    }

    fn value_or_expression(&mut self, rule: &str, obj: &Object) -> ParseResult<NodeId> {
        match (obj.get("value"), obj.get("expression")) {
            (Some(json), None) => Ok(self.tree.push(NodeKind::Literal(Value::from(json.clone())))),
            (None, Some(_)) => self.expression(rule, obj, "expression"),
            (Some(_), Some(_)) => Err(invalid(
                rule,
                "value",
                "cannot combine 'value' and 'expression'",
            )),
            (None, None) => Err(missing(rule, "value")),
        }
    }

    fn format(&mut self, rule: &str, obj: &Object, field: &'static str) -> ParseResult<NodeId> {
        let text = string(rule, obj, field)?;
        let (pieces, exprs) = split_format(&text)?;
        let args = exprs
            .iter()
            .map(|expr| parse_expression(&mut self.tree, expr))
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(self.tree.push(NodeKind::Format { pieces, args }))
    }
}

fn missing(rule: &str, field: &'static str) -> ParseError {
    ParseError::MissingField {
        rule: rule.to_string(),
        field,
    }
}

fn invalid(rule: &str, field: &'static str, detail: &str) -> ParseError {
    ParseError::InvalidField {
        rule: rule.to_string(),
        field,
        detail: detail.to_string(),
    }
}

fn string(rule: &str, obj: &Object, field: &'static str) -> ParseResult<String> {
    match obj.get(field) {
        Some(Json::String(text)) => Ok(text.clone()),
        Some(_) => Err(invalid(rule, field, "expected a string")),
        None => Err(missing(rule, field)),
    }
}

fn optional_string(rule: &str, obj: &Object, field: &'static str) -> ParseResult<Option<String>> {
    match obj.get(field) {
        None => Ok(None),
        Some(_) => string(rule, obj, field).map(Some),
    }
}

fn identifier(rule: &str, obj: &Object, field: &'static str) -> ParseResult<String> {
    let name = string(rule, obj, field)?;
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(invalid(rule, field, "expected a plain identifier"))
    }
}

fn optional_bool(rule: &str, obj: &Object, field: &'static str) -> ParseResult<Option<bool>> {
    match obj.get(field) {
        None => Ok(None),
        Some(Json::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(invalid(rule, field, "expected a boolean")),
    }
}

fn array<'a>(rule: &str, obj: &'a Object, field: &'static str) -> ParseResult<&'a Vec<Json>> {
    match obj.get(field) {
        Some(Json::Array(items)) => Ok(items),
        Some(_) => Err(invalid(rule, field, "expected an array")),
        None => Err(missing(rule, field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_format_handles_placeholders() {
        let (pieces, args) = split_format("Round {round} of {configuration.rounds}!").expect("split");
        assert_eq!(pieces, vec!["Round ", " of ", "!"]);
        assert_eq!(args, vec!["round", "configuration.rounds"]);

        assert!(matches!(split_format("oops {x"), Err(ParseError::Format(_))));
        assert!(matches!(split_format("oops }"), Err(ParseError::Format(_))));
    }

    #[test]
    fn builds_nested_sequences_with_parents() {
        let tree = build_rules_from_json(&json!({
            "rules": [
                { "rule": "foreach", "list": "players", "element": "player", "rules": [
                    { "rule": "message", "to": "player", "value": "Hi {player.name}" }
                ]}
            ]
        }))
        .expect("build");
        let root = tree.root().expect("root");
        let NodeKind::Rules(children) = tree.kind(root) else {
            panic!("expected rules, got {:?}", tree.kind(root));
        };
        let NodeKind::ForEach { body, element, .. } = tree.kind(children[0]) else {
            panic!("expected foreach, got {:?}", tree.kind(children[0]));
        };
        assert_eq!(element, "player");
        assert_eq!(tree.parent(*body), Some(children[0]));
        assert_eq!(tree.parent(children[0]), Some(root));
    }

    #[test]
    fn unknown_rule_and_missing_field_are_reported() {
        match build_rules_from_json(&json!([{ "rule": "teleport" }])) {
            Err(ParseError::UnknownRule(rule)) => assert_eq!(rule, "teleport"),
            other => panic!("expected unknown rule, got {:?}", other),
        }
        match build_rules_from_json(&json!([{ "rule": "foreach", "list": "players" }])) {
            Err(ParseError::MissingField { field, .. }) => assert_eq!(field, "element"),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn list_operations_require_paths() {
        let result = build_rules_from_json(&json!([{ "rule": "reverse", "list": "a == b" }]));
        assert!(matches!(result, Err(ParseError::InvalidField { field: "list", .. })));
    }

    #[test]
    fn input_text_accepts_value_list_element_form() {
        let tree = build_rules_from_json(&json!({
            "rules": [
                { "rule": "input-text", "value": "Name?", "list": "answers", "element": "player" }
            ]
        }))
        .expect("build");
        let root = tree.root().expect("root");
        let NodeKind::Rules(children) = tree.kind(root) else {
            panic!("expected rules, got {:?}", tree.kind(root));
        };
        let NodeKind::Input {
            kind,
            to,
            prompt,
            result,
            by_player,
            ..
        } = tree.kind(children[0])
        else {
            panic!("expected input, got {:?}", tree.kind(children[0]));
        };
        assert_eq!(*kind, InputKind::Text);
        assert!(*by_player);
        assert_eq!(tree.kind(*to), &NodeKind::Variable("player".into()));
        assert_eq!(tree.kind(*result), &NodeKind::Variable("answers".into()));
        assert!(matches!(tree.kind(*prompt), NodeKind::Format { pieces, .. } if pieces == &vec!["Name?".to_string()]));

        match build_rules_from_json(&json!([{ "rule": "input-text", "value": "Name?", "list": "answers" }])) {
            Err(ParseError::MissingField { field, .. }) => assert_eq!(field, "to"),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn counts_accept_numbers_or_expressions() {
        let tree = build_rules_from_json(&json!([
            { "rule": "discard", "from": "deck", "count": 2 },
            { "rule": "discard", "from": "deck", "count": "configuration.burn" }
        ]))
        .expect("build");
        assert!(tree.len() > 4);
    }
}
