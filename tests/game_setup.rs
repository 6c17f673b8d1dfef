use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

use rulebook::game::{Game, GameDocument, GameEvent, Mailbox, Outbound, Participant, Roster};
use rulebook::interpreter::NodeKind;
use rulebook::{ConfigError, EngineConfig, EngineError, ParseError, Value};

fn document(setup: serde_json::Value) -> GameDocument {
    let source = json!({
        "name": "Quiz",
        "player count": { "min": 1, "max": 3 },
        "setup": setup,
        "rules": [
            { "rule": "global-message", "value": "Playing {configuration.rounds} rounds" }
        ]
    });
    GameDocument::parse(&source.to_string()).expect("parse game")
}

fn owner(text: &str) -> Outbound {
    Outbound::Owner(text.to_string())
}

#[test]
fn invalid_setup_answer_sends_one_retry() {
    let config = EngineConfig::default();
    let retry = config.retry_message.clone();
    let mut game = Game::new(
        document(json!({ "rounds": { "kind": "integer", "prompt": "How many rounds?" } })),
        Roster::of_players(&["ana"]),
        Mailbox::new(),
        config,
    )
    .expect("create game");

    assert_eq!(game.tick().expect("tick"), GameEvent::Configuring);
    assert_eq!(game.communicator().outbound(), &[owner("How many rounds?")]);

    game.communicator_mut().post_from_owner("abc");
    assert_eq!(game.tick().expect("tick"), GameEvent::Configuring);
    assert_eq!(
        game.communicator().outbound(),
        &[owner("How many rounds?"), owner(&retry)]
    );

    game.communicator_mut().post_from_owner("3");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(
        game.communicator().outbound().last(),
        Some(&Outbound::Global("Playing 3 rounds".to_string()))
    );
}

#[test]
fn literal_setup_entries_need_no_owner() {
    let mut game = Game::new(
        document(json!({ "rounds": 5 })),
        Roster::of_players(&["ana"]),
        Mailbox::new(),
        EngineConfig::default(),
    )
    .expect("create game");

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    let env = game.environment();
    let configuration = env.lookup(env.root(), "configuration").expect("configuration");
    assert_eq!(configuration.get("rounds"), Some(&Value::Int(5)));
    assert_eq!(configuration.get("name"), Some(&Value::from("Quiz")));
    assert_eq!(
        configuration.get("player count").and_then(|bounds| bounds.get("max")),
        Some(&Value::Int(3))
    );
}

#[test]
fn roster_outside_player_count_is_rejected() {
    let result = Game::new(
        document(json!({})),
        Roster::of_players(&["a", "b", "c", "d"]),
        Mailbox::new(),
        EngineConfig::default(),
    );
    match result {
        Err(ConfigError::PlayerCount { count, min, max }) => {
            assert_eq!((count, min, max), (4, 1, 3));
        }
        Err(other) => panic!("expected player count error, got {:?}", other),
        Ok(_) => panic!("expected player count error, got a game"),
    }
}

#[test]
fn audience_requires_permission() {
    let roster = Roster {
        players: vec![Participant::named("ana")],
        audience: vec![Participant::named("viewer")],
    };
    match Game::new(document(json!({})), roster, Mailbox::new(), EngineConfig::default()) {
        Err(ConfigError::AudienceNotAllowed) => {}
        Err(other) => panic!("expected audience error, got {:?}", other),
        Ok(_) => panic!("expected audience error, got a game"),
    }
}

#[test]
fn per_player_defaults_populate_records() {
    let source = json!({
        "name": "Cards",
        "player count": { "min": 2, "max": 2 },
        "audience": true,
        "per-player": { "hand": [], "score": 0 },
        "per-audience": { "cheers": 0 },
        "rules": []
    });
    let document = GameDocument::parse(&source.to_string()).expect("parse game");
    let roster = Roster {
        players: vec![Participant::named("ana"), Participant::named("bo")],
        audience: vec![Participant::named("viewer")],
    };
    let mut game = Game::new(document, roster, Mailbox::new(), EngineConfig::default())
        .expect("create game");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    let env = game.environment();
    let players = env.lookup(env.root(), "players").expect("players");
    assert_eq!(players.slice("score"), Some(Value::List(vec![Value::Int(0); 2])));
    assert_eq!(
        players.slice("id"),
        Some(Value::List(vec!["ana".into(), "bo".into()]))
    );
    let audience = env.lookup(env.root(), "audience").expect("audience");
    assert_eq!(audience.slice("cheers"), Some(Value::List(vec![Value::Int(0)])));
}

#[test]
fn test_load_game_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    let source = json!({
        "name": "Hello",
        "player count": { "min": 1, "max": 1 },
        "rules": [{ "rule": "global-message", "value": "hello" }]
    });
    write!(file, "{}", source).unwrap();

    let document = GameDocument::load(file.path()).unwrap();
    assert_eq!(document.definition.name, "Hello");
    let root = document.rules.root().expect("rules root");
    assert!(matches!(document.rules.kind(root), NodeKind::Rules(items) if items.len() == 1));
}

#[test]
fn test_load_reports_unknown_rules() {
    let mut file = NamedTempFile::new().unwrap();
    let source = json!({
        "name": "Broken",
        "player count": { "min": 1, "max": 1 },
        "rules": [{ "rule": "teleport" }]
    });
    write!(file, "{}", source).unwrap();

    let err = GameDocument::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse game"));
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Parse(ParseError::UnknownRule(name))) => assert_eq!(name, "teleport"),
        other => panic!("expected unknown rule error, got {:?}", other),
    }
}

#[test]
fn owner_replies_queued_together_answer_later_prompts() {
    let source = json!({
        "name": "Quiz",
        "player count": { "min": 1, "max": 1 },
        "setup": {
            "a": { "kind": "integer", "prompt": "A?" },
            "b": { "kind": "integer", "prompt": "B?" }
        },
        "rules": [
            { "rule": "global-message", "value": "{configuration.a} and {configuration.b}" }
        ]
    });
    let config = EngineConfig::default();
    let retry = config.retry_message.clone();
    let document = GameDocument::parse(&source.to_string()).expect("parse game");
    let mut game = Game::new(document, Roster::of_players(&["ana"]), Mailbox::new(), config)
        .expect("create game");
    game.communicator_mut().post_from_owner("abc");
    game.communicator_mut().post_from_owner("3");
    game.communicator_mut().post_from_owner("4");

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(
        game.communicator().outbound(),
        &[
            owner("A?"),
            owner(&retry),
            owner("B?"),
            Outbound::Global("3 and 4".to_string()),
        ]
    );
}
