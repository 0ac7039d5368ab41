//! Build an [`Assistant`] from configuration.
//!
//! The REST store and HTTP upstream wrap blocking clients, so [`build`] must
//! run outside the tokio runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{AssistantConfig, Backend, BackendConfig, Strategy};
use crate::engine::Assistant;
use crate::intent::{
    Embedder, HashEmbedder, HttpEmbedder, IntentClassifier, RuleClassifier, SemanticClassifier,
};
use crate::store::{DataAccess, DataStore, RestDataStore, SqliteStore, StoreError};
use crate::tasks::Orchestrator;
use crate::upstream::{HttpUpstream, Refresher, UpstreamSource};

const STORE_DB: &str = "store.db";
const UPSTREAM_DB: &str = "upstream.db";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("store: {0}")]
    Store(#[source] StoreError),

    #[error("upstream: {0}")]
    Upstream(#[source] StoreError),
}

/// Wire store, upstream, classifier and orchestrator together.
pub fn build(config: &AssistantConfig, data_dir: &Path) -> Result<Assistant, BootstrapError> {
    let store = build_store(&config.store, data_dir).map_err(BootstrapError::Store)?;
    let upstream = build_upstream(&config.upstream, data_dir).map_err(BootstrapError::Upstream)?;
    let classifier = build_classifier(config);

    let access = DataAccess::new(Arc::clone(&store), config.orchestrator.worker_threads);
    let refresher = Refresher::new(upstream, store).with_windows(config.windows.clone());
    let orchestrator = Orchestrator::new(access, refresher)
        .with_empty_step_policy(config.orchestrator.on_empty_step);

    tracing::info!(
        store = ?config.store.backend,
        upstream = ?config.upstream.backend,
        classifier = ?config.classifier.strategy,
        workers = config.orchestrator.worker_threads,
        "assistant ready"
    );
    Ok(Assistant::new(classifier, orchestrator)
        .with_turn_timeout(Duration::from_secs(config.orchestrator.turn_timeout_secs)))
}

fn sqlite_path(section: &BackendConfig, data_dir: &Path, fallback: &str) -> String {
    section
        .sqlite_file(data_dir, fallback)
        .to_string_lossy()
        .into_owned()
}

fn build_store(section: &BackendConfig, data_dir: &Path) -> Result<Arc<dyn DataStore>, StoreError> {
    match section.backend {
        Backend::Rest => {
            let store = RestDataStore::new(
                section.url.as_deref().unwrap_or_default(),
                section.api_key.as_deref().unwrap_or_default(),
                Duration::from_secs(section.timeout_secs),
            )?;
            Ok(Arc::new(store))
        }
        Backend::Sqlite => {
            let path = sqlite_path(section, data_dir, STORE_DB);
            tracing::info!(path = %path, "opening sqlite store");
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
    }
}

fn build_upstream(
    section: &BackendConfig,
    data_dir: &Path,
) -> Result<Arc<dyn UpstreamSource>, StoreError> {
    match section.backend {
        Backend::Rest => {
            let upstream = HttpUpstream::new(
                section.url.as_deref().unwrap_or_default(),
                section.api_key.as_deref().unwrap_or_default(),
                Duration::from_secs(section.timeout_secs),
            )?;
            Ok(Arc::new(upstream))
        }
        Backend::Sqlite => {
            let path = sqlite_path(section, data_dir, UPSTREAM_DB);
            tracing::info!(path = %path, "opening sqlite upstream");
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
    }
}

/// The embedding client is created on first classification, not here.
fn build_classifier(config: &AssistantConfig) -> Arc<dyn IntentClassifier> {
    let section = &config.classifier;
    match section.strategy {
        Strategy::Rules => Arc::new(RuleClassifier::new()),
        Strategy::Semantic => match section.embedding_endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                let endpoint = endpoint.to_string();
                let timeout = Duration::from_secs(section.timeout_secs);
                Arc::new(SemanticClassifier::new(
                    move || {
                        let embedder: Arc<dyn Embedder> =
                            Arc::new(HttpEmbedder::new(&endpoint, timeout)?);
                        Ok(embedder)
                    },
                    section.confidence_floor,
                ))
            }
            _ => {
                tracing::warn!("no embedding endpoint configured, using hashing embedder");
                Arc::new(SemanticClassifier::with_embedder(
                    Arc::new(HashEmbedder::default()),
                    section.confidence_floor,
                ))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::tasks::{ExecutionContext, TaskResult};

    #[tokio::test]
    async fn default_config_builds_local_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse_config("").unwrap();
        let assistant = build(&config, dir.path()).unwrap();
        assert_eq!(assistant.turn_timeout(), Duration::from_secs(300));
        assert!(dir.path().join(STORE_DB).exists());
        assert!(dir.path().join(UPSTREAM_DB).exists());

        let result = assistant
            .handle_turn(ExecutionContext::new("chào buổi sáng"))
            .await;
        assert!(matches!(result, TaskResult::NoTaskMatched { .. }));
    }

    #[tokio::test]
    async fn semantic_without_endpoint_uses_hashing_embedder() {
        let config = parse_config("classifier:\n  strategy: semantic\n").unwrap();
        let classifier = build_classifier(&config);
        let scores = classifier.task_confidence("Lấy submat demand cho S24M12345").await;
        assert_eq!(scores.len(), 12);
    }

    #[test]
    fn explicit_sqlite_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.db");
        let yaml = format!("store:\n  path: {}\n", path.display());
        let config = parse_config(&yaml).unwrap();
        build_store(&config.store, dir.path()).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join(STORE_DB).exists());
    }
}
