//! Policy discovery, compilation, and hot-reload.
//!
//! # Purpose
//! Finds the policy directory (first existing of the configured
//! candidates, typically a bind-mount path then a dev path), compiles
//! every `.rego` source into a new module, and publishes it atomically.
//! A filesystem watcher coalesces editor write bursts with a short
//! debounce and recompiles on change; a failed compile leaves the
//! previous module serving.
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::embedded::{PolicyModule, PolicySlot};

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct PolicyLoader {
    policy_dirs: Vec<PathBuf>,
    query: String,
    slot: PolicySlot,
}

/// Keeps the filesystem watcher and its reload task alive. Dropping the
/// handle stops both.
pub struct PolicyWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for PolicyWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl PolicyLoader {
    pub fn new(policy_dirs: Vec<PathBuf>, query: String, slot: PolicySlot) -> Self {
        Self {
            policy_dirs,
            query,
            slot,
        }
    }

    pub fn discover_dir(&self) -> Option<PathBuf> {
        self.policy_dirs.iter().find(|dir| dir.is_dir()).cloned()
    }

    /// Compiles the current sources and swaps them in. On error the
    /// previously published module stays active.
    pub fn load(&self) -> anyhow::Result<usize> {
        let dir = self
            .discover_dir()
            .ok_or_else(|| anyhow::anyhow!("no policy directory found"))?;

        let sources = read_sources(&dir)?;
        anyhow::ensure!(
            !sources.is_empty(),
            "no .rego sources under {}",
            dir.display()
        );

        let count = sources.len();
        let module = PolicyModule::compile(sources, self.query.clone())?;
        self.slot.store(Some(Arc::new(module)));
        tracing::info!(dir = %dir.display(), sources = count, "policy module loaded");
        Ok(count)
    }

    /// Starts watching the policy directory for `.rego`/`.wasm` changes.
    /// Returns `None` when no directory exists to watch.
    pub fn spawn_watcher(
        self: Arc<Self>,
        on_reload: impl Fn() + Send + Sync + 'static,
    ) -> anyhow::Result<Option<PolicyWatcher>> {
        let Some(dir) = self.discover_dir() else {
            tracing::info!("no policy directory found to watch for hot-reloading");
            return Ok(None);
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else { return };
            let relevant = matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) && event.paths.iter().any(is_policy_artifact);
            if relevant {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = %dir.display(), "policy hot-reload watcher started");

        let loader = self;
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Coalesce editor write bursts.
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                match loader.load() {
                    Ok(count) => {
                        tracing::info!(sources = count, "policy module hot-reloaded");
                        on_reload();
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "policy reload failed, keeping previous module");
                    }
                }
            }
        });

        Ok(Some(PolicyWatcher {
            _watcher: watcher,
            task,
        }))
    }
}

fn read_sources(dir: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("rego") => {
                let contents = std::fs::read_to_string(&path)?;
                sources.push((path.display().to_string(), contents));
            }
            Some("wasm") => {
                // The in-process engine evaluates sources directly.
                tracing::debug!(path = %path.display(), "ignoring pre-built wasm artifact");
            }
            _ => {}
        }
    }
    // Deterministic compile order.
    sources.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(sources)
}

fn is_policy_artifact(path: &PathBuf) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("rego") | Some("wasm")
    )
}
