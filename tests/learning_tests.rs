use tokio::sync::mpsc;

use phrasebook::config::Config;
use phrasebook::dictionary::CommandSource;
use phrasebook::kernel::event::{Event, Utterance};
use phrasebook::kernel::learning::{LearningState, CORRECTION_PROMPT};
use phrasebook::kernel::scheduler::SideEffect;
use phrasebook::resolve::ClassifierOutcome;
use phrasebook::Reactor;

fn reactor(config: Config) -> Reactor {
    let (_tx, rx) = mpsc::channel(100);
    Reactor::in_memory(rx, config)
}

fn with_classifier() -> Config {
    let mut config = Config::default();
    config.classifier.enabled = true;
    config
}

fn say(reactor: &mut Reactor, text: &str) -> Vec<SideEffect> {
    reactor.tick_step(vec![Event::Input(Utterance::text(text))])
}

fn executed(effects: &[SideEffect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            SideEffect::Execute { action, .. } => Some(action.clone()),
            _ => None,
        })
        .collect()
}

fn spoken(effects: &[SideEffect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            SideEffect::Speak(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

fn classify_epoch(effects: &[SideEffect]) -> phrasebook::kernel::event::ClassifyEpoch {
    effects
        .iter()
        .find_map(|e| match e {
            SideEffect::Classify { epoch, .. } => Some(*epoch),
            _ => None,
        })
        .expect("expected a classification request")
}

fn intent(action: &str, confidence: f32) -> ClassifierOutcome {
    ClassifierOutcome::Intent {
        action: action.to_string(),
        confidence,
        params: None,
    }
}

fn confidence_of(reactor: &Reactor, phrase: &str) -> f32 {
    reactor.dictionary.owner_of(phrase).expect("mapping present").confidence
}

#[tokio::test]
async fn test_implicit_positive_applies_once_after_observation() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Learned);

    let effects = say(&mut reactor, "Turn it up");
    assert_eq!(executed(&effects), vec!["volume_up"]);
    assert_eq!(reactor.learning.state(), LearningState::Observing);
    assert!((confidence_of(&reactor, "turn it up") - 0.8).abs() < 1e-4);
    let uses_after_hit = reactor.dictionary.owner_of("turn it up").unwrap().use_count;
    assert_eq!(uses_after_hit, 1);

    reactor.advance(reactor.config.learning.observation_ms);
    assert_eq!(reactor.learning.state(), LearningState::Idle);
    assert!((confidence_of(&reactor, "turn it up") - 0.82).abs() < 1e-4);
    assert_eq!(reactor.dictionary.owner_of("turn it up").unwrap().use_count, uses_after_hit + 1);

    // No second bump once observation closed.
    reactor.advance(20_000);
    assert!((confidence_of(&reactor, "turn it up") - 0.82).abs() < 1e-4);
    assert_eq!(reactor.dictionary.owner_of("turn it up").unwrap().use_count, uses_after_hit + 1);
    assert_eq!(reactor.snapshot().feedback.implicit_positive, 1);
}

#[tokio::test]
async fn test_new_action_settles_previous_observation() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Learned);
    reactor.dictionary.learn("next", "next_track", CommandSource::Learned);

    say(&mut reactor, "turn it up");
    say(&mut reactor, "next");
    assert!((confidence_of(&reactor, "turn it up") - 0.82).abs() < 1e-4);
    assert_eq!(reactor.learning.state(), LearningState::Observing);

    reactor.advance(reactor.config.learning.observation_ms);
    assert!((confidence_of(&reactor, "next") - 0.82).abs() < 1e-4);
    assert!((confidence_of(&reactor, "turn it up") - 0.82).abs() < 1e-4);
}

#[tokio::test]
async fn test_undo_penalizes_and_forgets_weak_learned_mapping() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Learned);
    let id = reactor.dictionary.owner_of("turn it up").unwrap().id.clone();
    reactor.dictionary.adjust_confidence(&id, -0.25, 0.0);

    say(&mut reactor, "turn it up");
    let effects = say(&mut reactor, "undo");
    assert!(
        effects
            .iter()
            .any(|e| matches!(e, SideEffect::Unresolved { utterance } if utterance == "undo")),
        "undo still flows through resolution"
    );
    assert!(reactor.dictionary.lookup_exact("turn it up").is_none());
    assert_eq!(reactor.learning.state(), LearningState::Idle);

    let snap = reactor.snapshot();
    assert_eq!(snap.feedback.implicit_negative, 1);
    assert_eq!(snap.feedback.forgotten_by_feedback, 1);
}

#[tokio::test]
async fn test_negatives_never_delete_trained_and_respect_floor() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("send it", "enter", CommandSource::Trained);

    for _ in 0..12 {
        say(&mut reactor, "send it");
        say(&mut reactor, "undo");
    }
    let confidence = confidence_of(&reactor, "send it");
    assert!((confidence - reactor.config.learning.negative_floor).abs() < 1e-4, "got {}", confidence);
}

#[tokio::test]
async fn test_correction_during_observation_runs_target() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Default);
    reactor.dictionary.learn("turn it down", "volume_down", CommandSource::Default);

    say(&mut reactor, "turn it up");
    let effects = say(&mut reactor, "No, I meant volume down");

    assert!(effects.contains(&SideEffect::CorrectionReceived {
        phrase: "turn it up".into(),
        wrong_action: "volume_up".into(),
        target: "volume down".into(),
    }));
    assert_eq!(executed(&effects), vec!["volume_down"]);
    assert!((confidence_of(&reactor, "turn it up") - 0.7).abs() < 1e-4);
    // The phrase is owned, so it is not moved to the corrected action.
    assert_eq!(reactor.dictionary.lookup_exact("turn it up").unwrap().action, "volume_up");
}

#[tokio::test]
async fn test_plain_no_asks_what_was_meant() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Default);
    reactor.dictionary.learn("mute", "mute", CommandSource::Default);

    say(&mut reactor, "turn it up");
    let effects = say(&mut reactor, "no");
    assert_eq!(spoken(&effects), vec![CORRECTION_PROMPT]);
    assert_eq!(reactor.learning.state(), LearningState::AwaitingCorrection);

    let effects = say(&mut reactor, "mute");
    assert_eq!(executed(&effects), vec!["mute"]);
    assert_eq!(reactor.learning.state(), LearningState::Idle);
}

#[tokio::test]
async fn test_unrelated_utterance_keeps_observing() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("turn it up", "volume_up", CommandSource::Default);

    say(&mut reactor, "turn it up");
    let effects = say(&mut reactor, "what time is it");
    assert!(effects.iter().any(|e| matches!(e, SideEffect::Unresolved { .. })));
    assert_eq!(reactor.learning.state(), LearningState::Observing);
}

#[tokio::test]
async fn test_scenario_c_mid_confidence_asks_once() {
    let mut reactor = reactor(with_classifier());

    let effects = say(&mut reactor, "make it go away");
    let epoch = classify_epoch(&effects);
    let effects = reactor.tick_step(vec![Event::ClassificationProposed(epoch, intent("close_tab", 0.6))]);

    assert!(executed(&effects).is_empty(), "0.6 must not execute");
    assert_eq!(spoken(&effects), vec!["Did you mean close tab?"]);
    assert_eq!(reactor.learning.state(), LearningState::AwaitingConfirmation);
    assert_eq!(reactor.snapshot().resolution.confirmations_asked, 1);

    let effects = say(&mut reactor, "yes");
    assert_eq!(executed(&effects), vec!["close_tab"]);
    let learned = reactor.dictionary.owner_of("make it go away").expect("confirmed phrase learned");
    assert_eq!(learned.action, "close_tab");
    assert_eq!(learned.source, CommandSource::Confirmed);
    assert_eq!(learned.confidence, 1.0);
    assert_eq!(reactor.learning.state(), LearningState::Idle);
}

#[tokio::test]
async fn test_rejected_confirmation_adopts_correction() {
    let mut reactor = reactor(with_classifier());
    reactor.dictionary.learn("turn it down", "volume_down", CommandSource::Default);

    let effects = say(&mut reactor, "make it quieter");
    let epoch = classify_epoch(&effects);
    reactor.tick_step(vec![Event::ClassificationProposed(epoch, intent("volume_up", 0.55))]);

    let effects = say(&mut reactor, "no");
    assert_eq!(spoken(&effects), vec![CORRECTION_PROMPT]);
    assert_eq!(reactor.learning.state(), LearningState::AwaitingCorrection);

    let effects = say(&mut reactor, "volume down");
    assert_eq!(executed(&effects), vec!["volume_down"]);
    let adopted = reactor.dictionary.owner_of("make it quieter").expect("adopted");
    assert_eq!(adopted.action, "volume_down");
    assert_eq!(adopted.source, CommandSource::Default, "joins the existing command");

    let snap = reactor.snapshot();
    assert_eq!(snap.feedback.rejected, 1);
    assert_eq!(snap.feedback.adopted, 1);
}

#[tokio::test]
async fn test_confirmation_expires_without_learning() {
    let mut reactor = reactor(with_classifier());

    let effects = say(&mut reactor, "make it go away");
    let epoch = classify_epoch(&effects);
    reactor.tick_step(vec![Event::ClassificationProposed(epoch, intent("close_tab", 0.6))]);
    reactor.advance(reactor.config.learning.confirmation_ms);

    assert_eq!(reactor.learning.state(), LearningState::Idle);
    assert!(reactor.dictionary.owner_of("make it go away").is_none());
    assert_eq!(reactor.snapshot().feedback.confirmations_expired, 1);
}

#[tokio::test]
async fn test_uncorrected_classifier_action_is_learned() {
    let mut reactor = reactor(with_classifier());

    let effects = say(&mut reactor, "lights off please");
    let epoch = classify_epoch(&effects);
    let effects = reactor.tick_step(vec![Event::ClassificationProposed(epoch, intent("lights_off", 0.8))]);
    assert_eq!(executed(&effects), vec!["lights_off"]);
    assert_eq!(reactor.learning.state(), LearningState::Observing);

    reactor.advance(reactor.config.learning.observation_ms);
    let learned = reactor.dictionary.owner_of("lights off please").expect("learned");
    assert_eq!(learned.action, "lights_off");
    assert_eq!(learned.source, CommandSource::Learned);

    // Next time it resolves locally.
    let effects = say(&mut reactor, "lights off please");
    assert_eq!(executed(&effects), vec!["lights_off"]);
}

#[tokio::test]
async fn test_late_correction_after_observation() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("play it", "play_music", CommandSource::Learned);
    reactor.dictionary.learn("podcast", "play_podcast", CommandSource::Default);

    say(&mut reactor, "play it");
    reactor.advance(reactor.config.learning.observation_ms);
    assert_eq!(reactor.learning.state(), LearningState::Idle);

    let effects = say(&mut reactor, "no, I meant play podcast");
    assert_eq!(executed(&effects), vec!["play_podcast"]);
    assert!(effects.iter().any(|e| matches!(
        e,
        SideEffect::CorrectionReceived { phrase, wrong_action, .. } if phrase == "play it" && wrong_action == "play_music"
    )));
    assert_eq!(reactor.snapshot().feedback.late_corrections, 1);
    // 0.8 + 0.02 - 0.1
    assert!((confidence_of(&reactor, "play it") - 0.72).abs() < 1e-4);
}

#[tokio::test]
async fn test_late_correction_window_closes() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("play it", "play_music", CommandSource::Learned);
    reactor.dictionary.learn("podcast", "play_podcast", CommandSource::Default);

    say(&mut reactor, "play it");
    reactor.advance((reactor.config.learning.late_correction_secs + 1) * 1_000);

    let effects = say(&mut reactor, "no, I meant play podcast");
    assert!(executed(&effects).is_empty());
    assert_eq!(reactor.snapshot().feedback.late_corrections, 0);
}

#[tokio::test]
async fn test_plain_speech_after_action_is_not_a_late_correction() {
    let mut reactor = reactor(Config::default());
    reactor.dictionary.learn("play it", "play_music", CommandSource::Learned);

    say(&mut reactor, "play it");
    reactor.advance(reactor.config.learning.observation_ms);

    for text in ["I wanted to check mail", "actually open the browser"] {
        let effects = say(&mut reactor, text);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, SideEffect::CorrectionReceived { .. })));
    }
    assert_eq!(reactor.snapshot().feedback.late_corrections, 0);
    assert!((confidence_of(&reactor, "play it") - 0.82).abs() < 1e-4);
}
