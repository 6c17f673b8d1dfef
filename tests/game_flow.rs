use serde_json::json;

use rulebook::game::{Game, GameDocument, GameEvent, Mailbox, Outbound, PlayerId, Roster};
use rulebook::{EngineConfig, EngineError, EvalError, StateError, Value};

fn config() -> EngineConfig {
    EngineConfig {
        seed: Some(11),
        ..EngineConfig::default()
    }
}

fn start(document: serde_json::Value, players: &[&str], config: EngineConfig) -> Game<Mailbox> {
    rulebook::init_tracing();
    let document = GameDocument::parse(&document.to_string()).expect("parse game");
    Game::new(document, Roster::of_players(players), Mailbox::new(), config).expect("create game")
}

fn game(rules: serde_json::Value) -> serde_json::Value {
    json!({
        "name": "Test",
        "player count": { "min": 1, "max": 4 },
        "rules": rules,
    })
}

fn global(text: &str) -> Outbound {
    Outbound::Global(text.to_string())
}

fn to_player(player: &str, text: &str) -> Outbound {
    Outbound::Player(PlayerId::from(player), text.to_string())
}

fn root_value(game: &Game<Mailbox>, name: &str) -> Value {
    let env = game.environment();
    env.lookup(env.root(), name)
        .cloned()
        .unwrap_or_else(|| panic!("expected '{}' to be bound", name))
}

fn rock_paper_scissors() -> serde_json::Value {
    json!({
        "name": "Rock, Paper, Scissors",
        "player count": { "min": 2, "max": 4 },
        "per-player": { "weapon": "", "wins": 0 },
        "constants": {
            "weapons": [
                { "name": "Rock", "beats": "Scissors" },
                { "name": "Paper", "beats": "Rock" },
                { "name": "Scissors", "beats": "Paper" }
            ]
        },
        "rules": [
            { "rule": "parallelfor", "list": "players", "element": "player", "rules": [
                { "rule": "input-choice", "to": "player",
                  "prompt": "{player.name}, choose your weapon!",
                  "choices": "weapons.name", "result": "player.weapon" }
            ]},
            { "rule": "global-message", "value": "Weapons: {players.weapon}" },
            { "rule": "foreach", "list": "players", "element": "player", "rules": [
                { "rule": "foreach", "list": "weapons", "element": "weapon", "rules": [
                    { "rule": "when", "cases": [
                        { "condition": "player.weapon == weapon.name", "rules": [
                            { "rule": "foreach",
                              "list": "players.elements.collect(other, other.weapon == weapon.beats)",
                              "element": "other", "rules": [
                                { "rule": "add", "to": "player.wins", "value": 1 }
                            ]}
                        ]}
                    ]}
                ]}
            ]},
            { "rule": "scores", "score": "wins" }
        ]
    })
}

#[test]
fn single_message_completes_on_first_tick() {
    let mut game = start(
        game(json!([{ "rule": "global-message", "value": "Great job!" }])),
        &["ana"],
        config(),
    );

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(game.communicator().outbound(), &[global("Great job!")]);
    assert!(game.is_finished());
    assert_eq!(game.environment().live_scopes(), 1);
}

#[test]
fn tick_after_completion_reports_finished() {
    let mut game = start(
        game(json!([{ "rule": "global-message", "value": "done" }])),
        &["ana"],
        config(),
    );
    game.tick().expect("tick");

    match game.tick() {
        Err(EngineError::State(StateError::Finished)) => {}
        other => panic!("expected finished error, got {:?}", other),
    }
}

#[test]
fn parallel_inputs_accept_replies_in_any_order() {
    let mut game = start(rock_paper_scissors(), &["ana", "bo"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    let prompts = game.communicator_mut().drain_outbound();
    assert_eq!(
        prompts,
        vec![
            to_player("ana", "ana, choose your weapon!\n1. Rock\n2. Paper\n3. Scissors"),
            to_player("bo", "bo, choose your weapon!\n1. Rock\n2. Paper\n3. Scissors"),
        ]
    );

    game.communicator_mut().post_from_player("bo", "2");
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert!(game.communicator().outbound().is_empty());

    game.communicator_mut().post_from_player("ana", "rock");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(
        game.communicator().outbound(),
        &[
            global("Weapons: [Rock, Paper]"),
            global("Scores:\n1. bo: 1\n2. ana: 0"),
        ]
    );
}

#[test]
fn element_writes_land_in_the_player_list() {
    let mut game = start(rock_paper_scissors(), &["ana", "bo"], config());
    game.tick().expect("tick");
    game.communicator_mut().post_from_player("ana", "3");
    game.communicator_mut().post_from_player("bo", "paper");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    let players = root_value(&game, "players");
    let players = players.as_list().expect("players is a list");
    assert_eq!(players[0].get("weapon"), Some(&Value::from("Scissors")));
    assert_eq!(players[0].get("wins"), Some(&Value::Int(1)));
    assert_eq!(players[1].get("weapon"), Some(&Value::from("Paper")));
    assert_eq!(players[1].get("wins"), Some(&Value::Int(0)));
    assert_eq!(game.environment().live_scopes(), 1);
}

#[test]
fn invalid_reply_reprompts_only_the_sender() {
    let mut game = start(rock_paper_scissors(), &["ana", "bo"], config());
    game.tick().expect("tick");
    game.communicator_mut().drain_outbound();

    game.communicator_mut().post_from_player("ana", "lizard");
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(
        game.communicator().outbound(),
        &[to_player(
            "ana",
            "Invalid response 'lizard'.\nana, choose your weapon!\n1. Rock\n2. Paper\n3. Scissors"
        )]
    );
}

#[test]
fn messages_address_player_records() {
    let mut game = start(
        game(json!([
            { "rule": "message", "to": "players", "value": "Welcome to {configuration.name}" }
        ])),
        &["ana", "bo"],
        config(),
    );
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(
        game.communicator().outbound(),
        &[
            to_player("ana", "Welcome to Test"),
            to_player("bo", "Welcome to Test"),
        ]
    );
}

#[test]
fn list_operations_mutate_bound_lists() {
    let mut document = game(json!([
        { "rule": "deal", "from": "deck", "to": "hand", "count": 2 },
        { "rule": "reverse", "list": "deck" },
        { "rule": "discard", "from": "deck", "count": 1 },
        { "rule": "extend", "target": "hand", "list": "deck" },
        { "rule": "sort", "list": "hand" },
        { "rule": "add", "to": "hand", "value": 9 },
        { "rule": "sort", "list": "people", "key": "age" }
    ]));
    document["variables"] = json!({
        "deck": [1, 2, 3, 4, 5],
        "hand": [],
        "people": [{ "name": "x", "age": 40 }, { "name": "y", "age": 12 }]
    });
    let mut game = start(document, &["ana"], config());
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    assert_eq!(root_value(&game, "deck"), Value::List(vec![]));
    assert_eq!(
        root_value(&game, "hand"),
        Value::List([2, 3, 4, 5, 9].into_iter().map(Value::Int).collect())
    );
    let people = root_value(&game, "people");
    assert_eq!(people.slice("name"), Some(Value::List(vec!["y".into(), "x".into()])));
}

#[test]
fn switch_and_when_pick_the_first_match() {
    let mut document = game(json!([
        { "rule": "switch", "value": "mode", "cases": [
            { "case": "slow", "rules": [{ "rule": "global-message", "value": "slow" }] },
            { "case": "fast", "rules": [{ "rule": "global-message", "value": "fast" }] }
        ]},
        { "rule": "when", "cases": [
            { "condition": "rounds < 2", "rules": [{ "rule": "global-message", "value": "short" }] },
            { "condition": "rounds >= 2", "rules": [{ "rule": "global-message", "value": "long" }] },
            { "condition": "true", "rules": [{ "rule": "global-message", "value": "never" }] }
        ]}
    ]));
    document["variables"] = json!({ "mode": "fast", "rounds": 3 });
    let mut game = start(document, &["ana"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(game.communicator().outbound(), &[global("fast"), global("long")]);
}

#[test]
fn loops_yield_after_the_iteration_budget() {
    let mut document = game(json!([
        { "rule": "loop", "until": "count == 5", "rules": [
            { "rule": "add", "to": "count", "value": 1 }
        ]}
    ]));
    document["variables"] = json!({ "count": 0 });
    let mut game = start(
        document,
        &["ana"],
        EngineConfig {
            loop_iterations_per_tick: 2,
            ..config()
        },
    );

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(root_value(&game, "count"), Value::Int(2));
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(root_value(&game, "count"), Value::Int(5));
}

#[test]
fn exact_timer_waits_out_its_duration() {
    let mut game = start(
        game(json!([
            { "rule": "timer", "duration": 2, "rules": [
                { "rule": "global-message", "value": "start" }
            ]},
            { "rule": "global-message", "value": "end" }
        ])),
        &["ana"],
        config(),
    );

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.communicator().outbound(), &[global("start")]);
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(game.communicator().outbound(), &[global("start"), global("end")]);
}

#[test]
fn at_most_timer_abandons_pending_input() {
    let mut game = start(
        game(json!([
            { "rule": "timer", "duration": 1, "mode": "at-most", "rules": [
                { "rule": "input-text", "to": "players", "prompt": "Say something", "result": "said" }
            ]},
            { "rule": "global-message", "value": "Too slow" }
        ])),
        &["ana"],
        config(),
    );

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(
        game.communicator().outbound(),
        &[to_player("ana", "Say something"), global("Too slow")]
    );
    assert_eq!(game.environment().live_scopes(), 1);
}

#[test]
fn track_timer_flags_late_answers() {
    let mut document = game(json!([
        { "rule": "timer", "duration": 1, "mode": "track", "flag": "late", "rules": [
            { "rule": "input-text", "to": "players", "prompt": "Answer?", "result": "answer" }
        ]}
    ]));
    document["variables"] = json!({ "late": true, "answer": "" });
    let mut game = start(document, &["ana"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(root_value(&game, "late"), Value::Bool(false));
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(root_value(&game, "late"), Value::Bool(true));

    game.communicator_mut().post_from_player("ana", "  hi ");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(root_value(&game, "answer"), Value::from("hi"));
}

#[test]
fn input_timeout_leaves_result_unbound() {
    let mut document = game(json!([
        { "rule": "input-text", "to": "players", "prompt": "Quick!", "result": "answer", "timeout": 2 }
    ]));
    document["variables"] = json!({ "answer": "none" });
    let mut game = start(document, &["ana"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(root_value(&game, "answer"), Value::from("none"));
}

#[test]
fn vote_tallies_every_choice() {
    let document = json!({
        "name": "Dinner",
        "player count": { "min": 3, "max": 3 },
        "constants": { "options": ["pizza", "tacos"] },
        "variables": { "tally": {} },
        "rules": [
            { "rule": "input-vote", "to": "players", "prompt": "Dinner?",
              "choices": "options", "result": "tally" }
        ]
    });
    let mut game = start(document, &["ana", "bo", "cy"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    game.communicator_mut().post_from_player("cy", "2");
    game.communicator_mut().post_from_player("ana", "1");
    game.communicator_mut().post_from_player("bo", "Tacos");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    let tally = root_value(&game, "tally");
    assert_eq!(tally.get("pizza"), Some(&Value::Int(1)));
    assert_eq!(tally.get("tacos"), Some(&Value::Int(2)));
    assert_eq!(game.environment().live_scopes(), 1);
}

#[test]
fn vote_timeout_counts_partial_votes() {
    let document = json!({
        "name": "Dinner",
        "player count": { "min": 2, "max": 2 },
        "variables": { "tally": {} },
        "rules": [
            { "rule": "input-vote", "to": "players", "prompt": "Dinner?",
              "choices": ["pizza", "tacos"], "result": "tally", "timeout": 1 }
        ]
    });
    let mut game = start(document, &["ana", "bo"], config());

    game.communicator_mut().post_from_player("bo", "pizza");
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    let tally = root_value(&game, "tally");
    assert_eq!(tally.get("pizza"), Some(&Value::Int(1)));
    assert_eq!(tally.get("tacos"), Some(&Value::Int(0)));
}

#[test]
fn input_deadline_fails_the_game() {
    let mut game = start(
        game(json!([
            { "rule": "input-text", "to": "players", "prompt": "Well?", "result": "answer" }
        ])),
        &["ana"],
        EngineConfig {
            input_deadline_ticks: Some(2),
            ..config()
        },
    );

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    match game.tick() {
        Err(EngineError::Eval(EvalError::InputTimedOut { player })) => assert_eq!(player, "ana"),
        other => panic!("expected input timeout, got {:?}", other),
    }
    assert!(game.is_finished());
    assert_eq!(game.environment().live_scopes(), 1);
    assert!(
        game.communicator()
            .outbound()
            .iter()
            .any(|message| matches!(message, Outbound::Owner(text) if text.starts_with("Game aborted")))
    );
    match game.tick() {
        Err(EngineError::State(StateError::Failed)) => {}
        other => panic!("expected failed error, got {:?}", other),
    }
}

#[test]
fn unresolved_names_abort_the_game() {
    let mut game = start(
        game(json!([{ "rule": "global-message", "value": "{missing.thing}" }])),
        &["ana"],
        config(),
    );
    match game.tick() {
        Err(EngineError::Eval(EvalError::Unresolved(_))) => {}
        other => panic!("expected unresolved error, got {:?}", other),
    }
}

#[test]
fn immutable_bindings_reject_writes() {
    let mut game1 = start(
        game(json!([
            { "rule": "variable-declaration", "name": "rounds", "value": 3, "mutable": false },
            { "rule": "variable-declaration", "name": "rounds", "value": 4 }
        ])),
        &["ana"],
        config(),
    );
    match game1.tick() {
        Err(EngineError::Eval(EvalError::ImmutableBinding(name))) => assert_eq!(name, "rounds"),
        other => panic!("expected immutable binding error, got {:?}", other),
    }

    let mut game = start(
        game(json!([{ "rule": "variable", "name": "configuration.name", "value": "Other" }])),
        &["ana"],
        config(),
    );
    match game.tick() {
        Err(EngineError::Eval(EvalError::ImmutableBinding(_))) => {}
        other => panic!("expected immutable binding error, got {:?}", other),
    }
}

#[test]
fn cancel_unwinds_pending_inputs() {
    let mut game = start(rock_paper_scissors(), &["ana", "bo"], config());
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert!(game.environment().live_scopes() > 1);

    game.cancel();
    assert!(game.is_finished());
    assert_eq!(game.environment().live_scopes(), 1);
    assert_eq!(game.communicator().outbound().last(), Some(&global("Game cancelled.")));
    match game.tick() {
        Err(EngineError::State(StateError::Failed)) => {}
        other => panic!("expected failed error, got {:?}", other),
    }
}

#[test]
fn cancel_token_stops_the_next_tick() {
    let mut game = start(rock_paper_scissors(), &["ana", "bo"], config());
    game.tick().expect("tick");

    game.cancel_token().cancel();
    match game.tick() {
        Err(EngineError::Eval(EvalError::Cancelled)) => {}
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(game.environment().live_scopes(), 1);
}

#[test]
fn input_text_collects_answers_by_player() {
    let mut document = game(json!([
        { "rule": "parallelfor", "list": "players", "element": "player", "rules": [
            { "rule": "input-text", "value": "Name?", "list": "answers", "element": "player" }
        ]}
    ]));
    document["variables"] = json!({ "answers": {} });
    let mut game = start(document, &["ana", "bo"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(
        game.communicator().outbound(),
        &[to_player("ana", "Name?"), to_player("bo", "Name?")]
    );
    game.communicator_mut().post_from_player("bo", "Bob");
    game.communicator_mut().post_from_player("ana", "Ann");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);

    let answers = root_value(&game, "answers");
    assert_eq!(answers.get("ana"), Some(&Value::from("Ann")));
    assert_eq!(answers.get("bo"), Some(&Value::from("Bob")));
}

#[test]
fn replies_queued_together_feed_sequential_inputs() {
    let mut document = game(json!([
        { "rule": "input-text", "to": "players", "prompt": "A?", "result": "a" },
        { "rule": "input-text", "to": "players", "prompt": "B?", "result": "b" }
    ]));
    document["variables"] = json!({ "a": "", "b": "" });
    let mut game = start(document, &["ana"], config());
    game.communicator_mut().post_from_player("ana", "first");
    game.communicator_mut().post_from_player("ana", "second");

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(root_value(&game, "a"), Value::from("first"));
    assert_eq!(root_value(&game, "b"), Value::from("second"));
}

#[test]
fn inparallel_branches_share_scope_and_finish_in_any_order() {
    let mut document = game(json!([
        { "rule": "inparallel", "rules": [
            { "rule": "input-text", "to": "players.0", "prompt": "A?", "result": "a" },
            { "rule": "input-text", "to": "players.1", "prompt": "B?", "result": "b" }
        ]},
        { "rule": "global-message", "value": "{a} {b}" }
    ]));
    document["variables"] = json!({ "a": "", "b": "" });
    let mut game = start(document, &["ana", "bo"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    assert_eq!(
        game.communicator_mut().drain_outbound(),
        vec![to_player("ana", "A?"), to_player("bo", "B?")]
    );

    game.communicator_mut().post_from_player("bo", "y");
    assert_eq!(game.tick().expect("tick"), GameEvent::Waiting);
    game.communicator_mut().post_from_player("ana", "x");
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(game.communicator().outbound(), &[global("x y")]);
    assert_eq!(game.environment().live_scopes(), 1);
}

fn shuffled_deck(seed: u64) -> Value {
    let mut document = game(json!([{ "rule": "shuffle", "list": "deck" }]));
    document["variables"] = json!({ "deck": (1..=20).collect::<Vec<i64>>() });
    let mut game = start(
        document,
        &["ana"],
        EngineConfig {
            seed: Some(seed),
            ..EngineConfig::default()
        },
    );
    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    root_value(&game, "deck")
}

#[test]
fn seeded_shuffle_is_deterministic() {
    let first = shuffled_deck(5);
    assert_eq!(first, shuffled_deck(5));

    let mut sorted = first.clone();
    assert!(sorted.sort());
    assert_eq!(sorted, Value::List((1..=20).map(Value::Int).collect()));
}

#[test]
fn foreach_follows_the_live_list() {
    let mut document = game(json!([
        { "rule": "foreach", "list": "deck", "element": "card", "rules": [
            { "rule": "global-message", "value": "{card}" },
            { "rule": "discard", "from": "deck", "count": 1 }
        ]}
    ]));
    document["variables"] = json!({ "deck": [1, 2, 3, 4] });
    let mut game = start(document, &["ana"], config());

    assert_eq!(game.tick().expect("tick"), GameEvent::Completed);
    assert_eq!(game.communicator().outbound(), &[global("1"), global("2")]);
    assert_eq!(
        root_value(&game, "deck"),
        Value::List(vec![Value::Int(1), Value::Int(2)])
    );
}
