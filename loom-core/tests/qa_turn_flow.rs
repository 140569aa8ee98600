//! QA tests for the full turn pipeline using the test harness.
//!
//! These verify the retrieve → prompt → narrate → parse → apply loop
//! end to end with a scripted narrator: directives mutate state, rules
//! fire against the mutated state, audio cues resolve, and turns that
//! change nothing surface as no-ops.

use loom_core::testing::TestHarness;
use loom_core::world::{sample_world, AudioKind, AudioTrack, Value};
use loom_core::{Condition, ConditionLogic, ConditionOp, Effect, EffectOp, Rule};

fn wounded_rule() -> Rule {
    Rule {
        id: "wounded".to_string(),
        conditions: vec![Condition {
            variable_id: "hp".to_string(),
            op: ConditionOp::Lt,
            value: Value::Number(5.0),
        }],
        condition_logic: ConditionLogic::All,
        effects: vec![Effect {
            variable_id: "mood".to_string(),
            op: EffectOp::Set,
            value: Value::Text("desperate".to_string()),
        }],
        audio_effects: vec!["heartbeat".to_string()],
        priority: 1,
    }
}

#[tokio::test]
async fn test_directives_then_rules_mutate_state() {
    let mut world = sample_world();
    world.rules = vec![wounded_rule()];
    world.audio = vec![AudioTrack {
        id: "heartbeat".to_string(),
        name: "Heartbeat".to_string(),
        url: "audio/heartbeat.ogg".to_string(),
        kind: AudioKind::Effect,
        looping: true,
    }];

    let mut harness = TestHarness::with_world(world).unwrap();
    harness.expect_reply(
        "The blade falls. <state var=\"hp\" op=\"set\" value=\"2\"/>\n<choices>\n- Yield\n- Fight on\n</choices>",
    );

    let outcome = harness.play("I charge the warden").await.unwrap();

    assert_eq!(outcome.display_text, "The blade falls.");
    assert_eq!(outcome.choices, vec!["Yield", "Fight on"]);
    assert_eq!(outcome.directives.len(), 1);

    // The directive dropped hp below the rule's threshold, so the rule
    // saw the mutated state within the same turn
    assert_eq!(outcome.fired_rule_ids, vec!["wounded"]);
    let state = harness.session.state();
    assert_eq!(state.variables["hp"], Value::Number(2.0));
    assert_eq!(state.variables["mood"], Value::Text("desperate".to_string()));

    assert_eq!(outcome.audio.len(), 1);
    assert_eq!(outcome.audio[0].id, "heartbeat");
    assert!(!outcome.no_op);
    assert_eq!(harness.session.turn_count(), 1);
}

#[tokio::test]
async fn test_plain_narration_is_a_noop_turn() {
    let mut harness = TestHarness::new().unwrap();
    harness.expect_reply("The wind shifts. Nothing else happens.");

    let outcome = harness.play("I wait").await.unwrap();

    assert!(outcome.no_op);
    assert_eq!(outcome.display_text, "The wind shifts. Nothing else happens.");
    assert!(outcome.directives.is_empty());
    assert!(outcome.fired_rule_ids.is_empty());
    // A no-op turn still advances the conversation
    assert_eq!(harness.session.turn_count(), 1);
}

#[tokio::test]
async fn test_malformed_directive_stays_visible_and_harmless() {
    let mut harness = TestHarness::new().unwrap();
    harness.expect_reply(r#"Strange runes: <state var="hp" op="divide" value="2"/>"#);

    let before = harness.session.state().clone();
    let outcome = harness.play("I read the runes").await.unwrap();

    assert!(outcome.directives.is_empty());
    assert!(outcome.display_text.contains("op=\"divide\""));
    assert_eq!(harness.session.state().variables, before.variables);
    assert!(outcome.no_op);
}

#[tokio::test]
async fn test_directive_clamps_to_variable_bounds() {
    let mut harness = TestHarness::new().unwrap();
    harness.expect_reply(r#"A surge of vitality. <state var="hp" op="add" value="500"/>"#);

    let outcome = harness.play("I drink the elixir").await.unwrap();
    // hp is bounded to 100 in the sample world
    assert_eq!(
        harness.session.state().variables["hp"],
        Value::Number(100.0)
    );
    assert!(!outcome.no_op);
}

#[tokio::test]
async fn test_unknown_variable_directive_surfaces_diagnostic() {
    let mut harness = TestHarness::new().unwrap();
    harness.expect_reply(r#"Done. <state var="mana" op="set" value="3"/>"#);

    let outcome = harness.play("I meditate").await.unwrap();
    assert!(outcome.directives.len() == 1);
    assert_eq!(outcome.diagnostics.len(), 1);
    // The directive parsed but applied nothing
    assert!(outcome.no_op);
}

#[tokio::test]
async fn test_choice_list_component_resolves() {
    let mut world = sample_world();
    world.components = vec![loom_core::components::ComponentDef {
        id: "choices".to_string(),
        kind: loom_core::components::ComponentKind::ChoiceList(
            loom_core::components::ChoiceListConfig { prompt: None },
        ),
    }];

    let mut harness = TestHarness::with_world(world).unwrap();
    harness.expect_reply("Pick.\n<choices>\n- Left\n- Right\n</choices>");

    let outcome = harness.play("I look at the fork").await.unwrap();
    assert!(matches!(
        &outcome.components[0],
        loom_core::components::ComponentView::ChoiceList { choices, .. }
            if choices == &vec!["Left".to_string(), "Right".to_string()]
    ));
}

#[tokio::test]
async fn test_save_load_roundtrip_preserves_state_and_memory() {
    let path = std::env::temp_dir().join(format!("loom-qa-save-{}.json", std::process::id()));

    let mut harness = TestHarness::new().unwrap();
    harness.expect_reply(r#"Marked. <state var="mood" op="set" value="grim"/>"#);
    harness.play("I carve my name into the gate").await.unwrap();
    harness.session.save(&path).await.unwrap();

    let restored = loom_core::Session::load(
        &path,
        sample_world(),
        Box::new(loom_core::testing::MockNarrator::empty()),
    )
    .await
    .unwrap();

    assert_eq!(
        restored.state().variables["mood"],
        Value::Text("grim".to_string())
    );
    assert_eq!(restored.turn_count(), 1);
    // Greeting + player turn + narrator turn
    assert_eq!(restored.memory().len(), 3);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_load_rejects_wrong_world() {
    let path = std::env::temp_dir().join(format!("loom-qa-mismatch-{}.json", std::process::id()));

    let harness = TestHarness::new().unwrap();
    harness.session.save(&path).await.unwrap();

    let mut other = sample_world();
    other.id = "different-world".to_string();

    let result = loom_core::Session::load(
        &path,
        other,
        Box::new(loom_core::testing::MockNarrator::empty()),
    )
    .await;

    assert!(matches!(
        result,
        Err(loom_core::SessionError::WorldMismatch { .. })
    ));

    let _ = std::fs::remove_file(&path);
}
