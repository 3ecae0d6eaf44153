use tokio::sync::mpsc;
use uuid::Uuid;

use phrasebook::config::Config;
use phrasebook::context::ResolutionContext;
use phrasebook::dictionary::{CommandSource, InMemoryDictionaryStore, PhraseDictionary, StepCondition, Tier};
use phrasebook::kernel::event::{Event, Utterance};
use phrasebook::kernel::scheduler::SideEffect;
use phrasebook::kernel::training::{
    DraftStore, FileDraftStore, InMemoryDraftStore, SessionType, TrainingSession, TrainingState,
};
use phrasebook::Reactor;

fn reactor_with(drafts: InMemoryDraftStore) -> Reactor {
    let (_tx, rx) = mpsc::channel(100);
    let config = Config::default();
    let dictionary = PhraseDictionary::in_memory(&config.dictionary);
    Reactor::new(rx, config, dictionary, Box::new(drafts))
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

fn spoken(effects: &[SideEffect]) -> String {
    effects
        .iter()
        .filter_map(|e| match e {
            SideEffect::Speak(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[tokio::test]
async fn test_simple_command_round_trip() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());

    say(&mut reactor, "train");
    assert_eq!(reactor.training.state(), TrainingState::Listening);

    say(&mut reactor, "\"yeet\" means delete selection");
    assert_eq!(reactor.training.state(), TrainingState::CollectingVariations);

    let effects = say(&mut reactor, "chuck it");
    assert!(spoken(&effects).contains("Added \"chuck it\""));

    say(&mut reactor, "done");
    assert_eq!(reactor.training.state(), TrainingState::Confirming);

    let effects = say(&mut reactor, "yes");
    assert!(
        spoken(&effects).contains("Saved. \"yeet\", \"chuck it\" will now delete selection."),
        "got: {}",
        spoken(&effects)
    );
    assert_eq!(reactor.training.state(), TrainingState::Idle);

    assert_eq!(executed(&say(&mut reactor, "yeet")), vec!["delete_selection"]);
    assert_eq!(executed(&say(&mut reactor, "Chuck it!")), vec!["delete_selection"]);

    let cmd = reactor.dictionary.owner_of("yeet").unwrap();
    assert_eq!(cmd.source, CommandSource::Trained);
    assert_eq!(cmd.phrases.len(), 2);

    let snap = reactor.snapshot();
    assert_eq!(snap.training.saved, 1);
    assert_eq!(snap.training.phrases_saved, 2);
}

#[tokio::test]
async fn test_scenario_d_cancel_with_no_content() {
    let store = InMemoryDictionaryStore::new();
    let (_tx, rx) = mpsc::channel(100);
    let config = Config::default();
    let dictionary = PhraseDictionary::open(Box::new(store.clone()), &config.dictionary);
    let mut reactor = Reactor::new(rx, config, dictionary, Box::new(InMemoryDraftStore::new()));

    say(&mut reactor, "training mode");
    let effects = say(&mut reactor, "cancel");

    assert!(spoken(&effects).contains("Training cancelled."));
    assert_eq!(reactor.training.state(), TrainingState::Idle);
    assert_eq!(store.save_count(), 0, "no dictionary writes");
    assert!(reactor.dictionary.all_commands().is_empty());
    assert_eq!(reactor.snapshot().training.discarded, 1);
}

#[tokio::test]
async fn test_taken_phrase_is_refused_and_skipped() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());
    reactor.dictionary.learn("send it", "enter", CommandSource::Default);

    say(&mut reactor, "train");
    let effects = say(&mut reactor, "\"send it\" means submit form");
    assert!(spoken(&effects).contains("already does something else"));
    assert_eq!(reactor.training.state(), TrainingState::Listening);

    say(&mut reactor, "\"ship it\" means submit form");
    let effects = say(&mut reactor, "send it");
    assert!(spoken(&effects).contains("already used by another command"));
    say(&mut reactor, "that's it");
    say(&mut reactor, "yes");

    assert_eq!(reactor.dictionary.lookup_exact("send it").unwrap().action, "enter");
    assert_eq!(reactor.dictionary.lookup_exact("ship it").unwrap().action, "submit_form");
}

#[tokio::test]
async fn test_confirm_no_discards_everything() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());

    say(&mut reactor, "train");
    say(&mut reactor, "\"yeet\" means delete selection");
    say(&mut reactor, "done");
    let effects = say(&mut reactor, "no");

    assert!(spoken(&effects).contains("nothing was saved"));
    assert_eq!(reactor.training.state(), TrainingState::Idle);
    assert!(reactor.dictionary.lookup_exact("yeet").is_none());
}

#[tokio::test]
async fn test_exit_with_content_asks_before_leaving() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());

    say(&mut reactor, "train");
    say(&mut reactor, "\"yeet\" means delete selection");
    let effects = say(&mut reactor, "never mind");
    assert!(spoken(&effects).starts_with("Before you go:"));
    assert_eq!(reactor.training.state(), TrainingState::Confirming);

    // A second exit word while confirming leaves without saving.
    say(&mut reactor, "cancel");
    assert_eq!(reactor.training.state(), TrainingState::Idle);
    assert!(reactor.dictionary.lookup_exact("yeet").is_none());
}

#[tokio::test]
async fn test_timeout_warns_then_discards() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());
    let cfg = reactor.config.training.clone();

    say(&mut reactor, "train");
    let effects = reactor.advance(cfg.listen_timeout_ms - cfg.warning_lead_ms);
    assert!(spoken(&effects).contains("Still there?"));
    assert_eq!(reactor.training.state(), TrainingState::Listening);

    let effects = reactor.advance(cfg.warning_lead_ms);
    assert!(spoken(&effects).contains("Training timed out."));
    assert_eq!(reactor.training.state(), TrainingState::Idle);
    assert_eq!(reactor.snapshot().training.timed_out, 1);
}

#[tokio::test]
async fn test_timeout_with_content_offers_to_save() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());
    let collect = reactor.config.training.collect_timeout_ms;

    say(&mut reactor, "train");
    say(&mut reactor, "\"yeet\" means delete selection");
    let effects = reactor.advance(collect);
    assert!(spoken(&effects).contains("Time's up."));
    assert_eq!(reactor.training.state(), TrainingState::Confirming);

    say(&mut reactor, "yes");
    assert!(reactor.dictionary.lookup_exact("yeet").is_some());
}

#[tokio::test]
async fn test_new_content_pushes_timeout_back() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());
    let collect = reactor.config.training.collect_timeout_ms;

    say(&mut reactor, "train");
    say(&mut reactor, "\"yeet\" means delete selection");
    reactor.advance(collect - 1_000);
    say(&mut reactor, "chuck it");
    reactor.advance(2_000);
    assert_eq!(reactor.training.state(), TrainingState::CollectingVariations);
}

#[tokio::test]
async fn test_draft_recovery_resume() {
    let drafts = InMemoryDraftStore::new();
    {
        let mut first = reactor_with(drafts.clone());
        say(&mut first, "train");
        say(&mut first, "\"yeet\" means delete selection");
    }
    let draft = drafts.current().expect("draft written after each step");
    assert_eq!(draft.state, TrainingState::CollectingVariations);
    assert_eq!(draft.trigger_phrases, vec!["yeet"]);

    let mut reactor = reactor_with(drafts.clone());
    let effects = reactor.start();
    assert!(spoken(&effects).contains("unfinished training session"));
    assert_eq!(reactor.training.state(), TrainingState::AwaitingRecovery);
    assert_eq!(
        drafts.current().map(|d| d.state),
        Some(TrainingState::CollectingVariations),
        "recovery prompt must not overwrite the draft"
    );

    say(&mut reactor, "resume");
    assert_eq!(reactor.training.state(), TrainingState::CollectingVariations);
    say(&mut reactor, "done");
    say(&mut reactor, "yes");

    assert_eq!(executed(&say(&mut reactor, "yeet")), vec!["delete_selection"]);
    assert!(drafts.current().is_none(), "draft cleared after save");
    assert_eq!(reactor.snapshot().training.recovered, 1);
}

#[tokio::test]
async fn test_draft_recovery_discard() {
    let mut session = TrainingSession::new();
    session.trigger_phrases = vec!["yeet".into()];
    session.action = Some("delete_selection".into());
    session.state = TrainingState::CollectingVariations;
    let drafts = InMemoryDraftStore::with_draft(session);

    let mut reactor = reactor_with(drafts.clone());
    reactor.start();
    say(&mut reactor, "discard it");

    assert_eq!(reactor.training.state(), TrainingState::Idle);
    assert!(drafts.current().is_none());
    assert!(reactor.dictionary.lookup_exact("yeet").is_none());
}

#[tokio::test]
async fn test_file_draft_store_round_trip() {
    let dir = std::env::temp_dir().join(format!("phrasebook-test-{}", Uuid::new_v4()));
    let store = FileDraftStore::new(dir.join("draft.json"));
    assert!(store.load().unwrap().is_none());

    let mut session = TrainingSession::new();
    session.session_type = SessionType::Workflow;
    session.workflow_name = Some("good morning".into());
    session.state = TrainingState::CollectingSteps;
    store.save(&session).unwrap();

    let loaded = store.load().unwrap().expect("draft present");
    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.state, TrainingState::CollectingSteps);

    store.clear().unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_context_rule_session() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());
    reactor.dictionary.learn("close it", "close_window", CommandSource::Trained);

    say(&mut reactor, "train");
    say(&mut reactor, "in slack \"close it\" means close tab");
    say(&mut reactor, "done");
    let effects = say(&mut reactor, "yes");
    assert!(spoken(&effects).contains("will now close tab in slack"), "got: {}", spoken(&effects));

    let effects = reactor.tick_step(vec![Event::Input(Utterance::in_context(
        "close it",
        ResolutionContext::in_app("slack"),
    ))]);
    assert_eq!(executed(&effects), vec!["close_tab"]);
    assert_eq!(executed(&say(&mut reactor, "close it")), vec!["close_window"]);
    assert_eq!(reactor.snapshot().resolution.hits(Tier::ContextOverride), 1);
}

#[tokio::test]
async fn test_workflow_session_executes_steps() {
    let mut reactor = reactor_with(InMemoryDraftStore::new());

    say(&mut reactor, "train");
    let effects = say(&mut reactor, "create a routine called \"good morning\"");
    assert_eq!(reactor.training.state(), TrainingState::CollectingSteps);
    assert!(spoken(&effects).contains("first step"));

    // Done with no steps is refused.
    say(&mut reactor, "done");
    assert_eq!(reactor.training.state(), TrainingState::CollectingSteps);

    say(&mut reactor, "open mail");
    say(&mut reactor, "then check calendar");
    say(&mut reactor, "if that fails, open notes");
    say(&mut reactor, "done");
    let effects = say(&mut reactor, "yes");
    assert!(spoken(&effects).contains("Saved routine \"good morning\" with 3 steps."));

    let workflow = &reactor.dictionary.workflows()[0];
    assert_eq!(workflow.steps[2].condition, Some(StepCondition::IfPreviousFailed));

    let effects = say(&mut reactor, "Good morning");
    assert_eq!(executed(&effects), vec!["open_mail", "check_calendar"]);
}
