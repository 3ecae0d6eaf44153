use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use phrasebook::context::ResolutionContext;
use phrasebook::dictionary::{FileDictionaryStore, PhraseDictionary};
use phrasebook::kernel::event::{Event, Utterance};
use phrasebook::kernel::scheduler::SideEffect;
use phrasebook::kernel::time::TICK_MS;
use phrasebook::kernel::training::FileDraftStore;
use phrasebook::resolve::{validate, ClassifierError, IntentClassifier};
use phrasebook::services::llm::LlmClassifier;
use phrasebook::{Config, Reactor};

const DEFAULT_CONFIG: &str = "phrasebook.config.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = Config::load(&config_path).with_context(|| format!("loading config {}", config_path.display()))?;
    info!("Phrasebook booting with dictionary {}", config.dictionary_path.display());

    let dictionary = PhraseDictionary::open(
        Box::new(FileDictionaryStore::new(config.dictionary_path.clone())),
        &config.dictionary,
    );
    let drafts = Box::new(FileDraftStore::new(config.draft_path.clone()));

    let (tx, rx) = mpsc::channel(100);
    let mut reactor = Reactor::new(rx, config.clone(), dictionary, drafts);
    let classifier = LlmClassifier::new(&config.classifier);
    let classify_timeout = Duration::from_millis(config.classifier.timeout_ms);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }
    tokio::spawn(read_stdin(tx.clone(), shutdown.clone()));

    for effect in reactor.start() {
        dispatch(effect, &tx, &classifier, classify_timeout);
    }

    let mut cadence = tokio::time::interval(Duration::from_millis(TICK_MS));
    cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("Listening. Type an utterance, `/app <name>` to change focus, `/quit` to stop.");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = cadence.tick() => {}
        }
        let events = reactor.drain();
        for effect in reactor.tick_step(events) {
            dispatch(effect, &tx, &classifier, classify_timeout);
        }
    }

    if let Err(e) = reactor.dictionary.flush() {
        error!("Final dictionary write failed: {}", e);
    }
    let stats = reactor.stats();
    info!(
        "Shutting down: {} commands, {} phrases, {} hits (t0 {:.0}%, t1 {:.0}%, t2 {:.0}%, t3 {:.0}%)",
        stats.commands,
        stats.phrases,
        stats.total_hits,
        stats.tier0_rate * 100.0,
        stats.tier1_rate * 100.0,
        stats.tier2_rate * 100.0,
        stats.tier3_rate * 100.0
    );
    Ok(())
}

/// One utterance per line. `/app <id>` sets the focused app for the lines
/// that follow; `/app` alone clears it.
async fn read_stdin(tx: mpsc::Sender<Event>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut context = ResolutionContext::empty();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                shutdown.cancel();
                break;
            }
            Err(e) => {
                warn!("stdin read failed: {}", e);
                shutdown.cancel();
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed == "/quit" {
            shutdown.cancel();
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("/app") {
            let app = rest.trim();
            context = if app.is_empty() {
                ResolutionContext::empty()
            } else {
                ResolutionContext::in_app(app)
            };
            println!("[FOCUS] {}", context.describe());
            continue;
        }
        if tx
            .send(Event::Input(Utterance::in_context(trimmed, context.clone())))
            .await
            .is_err()
        {
            break;
        }
    }
}

fn dispatch(effect: SideEffect, tx: &mpsc::Sender<Event>, classifier: &LlmClassifier, timeout: Duration) {
    match effect {
        SideEffect::Speak(text) => println!("[SPEAK] {}", text),
        SideEffect::Execute { action, params } => match params {
            Some(params) => println!("[EXECUTE] {} {}", action, params),
            None => println!("[EXECUTE] {}", action),
        },
        SideEffect::StateChanged(change) => debug!("State change: {:?}", change),
        SideEffect::Classify { epoch, request } => {
            let tx = tx.clone();
            let classifier = classifier.clone();
            tokio::spawn(async move {
                let known = request.known_actions.clone();
                let result = match tokio::time::timeout(timeout, classifier.classify(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ClassifierError::Timeout),
                };
                let outcome = validate(result, &known);
                let _ = tx.send(Event::ClassificationProposed(epoch, outcome)).await;
            });
        }
        SideEffect::CorrectionReceived {
            phrase,
            wrong_action,
            target,
        } => println!("[CORRECTION] \"{}\" is not {}; wanted \"{}\"", phrase, wrong_action, target),
        SideEffect::Unresolved { utterance } => println!("[UNRESOLVED] {}", utterance),
    }
}
