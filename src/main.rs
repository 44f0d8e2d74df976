use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;

use autopilot::config::RunConfig;
use autopilot::error::ConfigError;
use autopilot::pipeline::events;
use autopilot::pipeline::{
    BroadcastStatus, Orchestrator, OrchestratorDeps, RunPhase, StatusEvent, StatusUpdate,
    StopReason, default_provider_factory,
};
use autopilot::scripted::Fixture;
use autopilot::store::{JsonFileStore, SettingsPatch, SettingsStore};
use autopilot::worker::WorkerContextManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing()?;

    let fixture_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "fixture".into(),
            hint: "Usage: autopilot <fixture.json>".into(),
        })?;

    let config = RunConfig::from_env();
    let fixture = Fixture::from_path(&fixture_path)
        .await
        .with_context(|| format!("Failed to load fixture {}", fixture_path.display()))?;

    let store = Arc::new(JsonFileStore::new(config.settings_path.clone()));
    seed_settings(store.as_ref()).await?;

    eprintln!("🤖 Autopilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.generation.model);
    eprintln!("   Step timeout: {:?}", config.step_timeout);
    eprintln!("   Settings: {}", store.path().display());
    eprintln!("   Catalog: {} ({} pages)", fixture.catalog, fixture.pages.len());
    eprintln!("   Press Ctrl+C to stop.\n");

    // ── Orchestrator ────────────────────────────────────────────────────
    let (sender, inbox) = events::channel();
    let (catalog, contexts) = fixture.build(sender.clone());
    let status = BroadcastStatus::new();
    let mut updates = Box::pin(status.stream());

    let deps = OrchestratorDeps {
        catalog,
        contexts: Arc::new(WorkerContextManager::new(contexts)),
        store,
        status: status.clone(),
        llm_factory: default_provider_factory(),
    };
    let (handle, task) = Orchestrator::new(config, deps, (sender, inbox)).spawn();

    if let Err(e) = handle.start(fixture.catalog_ref()).await {
        handle.shutdown();
        let _ = task.await;
        return Err(e).context("Failed to start the run");
    }

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, stopping the run...");
                handle.stop(StopReason::UserRequest).await?;
            }
            event = updates.next() => {
                match event {
                    Some(StatusEvent::Update(update)) => {
                        print_update(&update);
                        if update.done && update.phase == RunPhase::Stopped {
                            break;
                        }
                    }
                    Some(StatusEvent::ConfigurationRequested { missing }) => {
                        eprintln!("⚙️  Configuration needed: {missing}");
                    }
                    None => break,
                }
            }
        }
    }

    handle.shutdown();
    let _ = task.await;
    Ok(())
}

/// Stderr logging, or daily-rolling files when `AUTOPILOT_LOG_DIR` is set.
fn init_tracing() -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("AUTOPILOT_LOG_DIR") {
        Ok(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {dir}"))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "autopilot.log"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

/// Copy credentials given through the environment into the settings store.
async fn seed_settings(store: &dyn SettingsStore) -> anyhow::Result<()> {
    let mut patch = SettingsPatch::default();

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.trim().is_empty() {
            patch = patch.with_api_key(key);
        }
    }

    if let Ok(path) = std::env::var("AUTOPILOT_PROFILE_PATH") {
        let profile = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read profile {path}"))?;
        patch = patch.with_profile(profile);
    }

    store.save(patch).await.context("Failed to save settings")?;
    Ok(())
}

fn print_update(update: &StatusUpdate) {
    let icon = if update.error.is_some() { "⚠️ " } else { "•" };
    let text = update
        .error
        .as_deref()
        .or(update.message.as_deref())
        .unwrap_or("");
    eprintln!(
        "{icon} [{}] {text}  (done: {}, skipped: {})",
        update.phase, update.completed, update.skipped
    );
}
