//! Model acquisition: one model at a time, or a bounded-parallel batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use modeldb_core::{ModelId, ModelIdentity, ModelRegistry, RunInstruction};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::cache::PackageCache;
use crate::client::ModelDbClient;
use crate::error::Result;

/// A model package now present in the cache.
#[derive(Debug, Clone)]
pub struct FetchedModel {
    pub identity: ModelIdentity,
    pub archive: std::path::PathBuf,
}

/// Fetches one model package into the local cache.
///
/// `known` is the identity already recorded in the registry metadata, if any.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    async fn fetch(
        &self,
        id: ModelId,
        instruction: &RunInstruction,
        known: Option<&ModelIdentity>,
    ) -> Result<FetchedModel>;
}

/// ModelDB-backed fetcher, optionally replacing the archive with the GitHub
/// mirror's zipball when the instruction asks for it.
pub struct ModelDbFetcher {
    client: ModelDbClient,
    cache: PackageCache,
}

impl ModelDbFetcher {
    pub fn new(client: ModelDbClient, cache: PackageCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &ModelDbClient {
        &self.client
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }
}

#[async_trait]
impl PackageFetcher for ModelDbFetcher {
    async fn fetch(
        &self,
        id: ModelId,
        instruction: &RunInstruction,
        known: Option<&ModelIdentity>,
    ) -> Result<FetchedModel> {
        // GitHub zipballs are not versioned by ModelDB, always refetch those.
        if let Some(identity) = known.filter(|_| instruction.github.is_none()) {
            if self.cache.is_current(identity) {
                debug!(model_id = %id, ver_date = %identity.ver_date, "cached package is current");
                return Ok(FetchedModel {
                    identity: identity.clone(),
                    archive: self.cache.archive_path(id),
                });
            }
        }

        let object = self.client.fetch_object(id).await?;
        let archive = match &instruction.github {
            Some(source) => {
                info!(model_id = %id, source = ?source, "using GitHub mirror archive");
                self.client.fetch_github_zipball(id, source).await?
            }
            None => object.archive,
        };
        let path = self.cache.store(&object.identity, &archive)?;
        Ok(FetchedModel {
            identity: object.identity,
            archive: path,
        })
    }
}

/// Outcome of a batch fetch; failures never abort the batch.
#[derive(Debug, Default)]
pub struct BatchFetchReport {
    pub fetched: Vec<ModelIdentity>,
    pub failed: BTreeMap<ModelId, String>,
}

/// Fetch `ids` with at most `concurrency` downloads in flight.
///
/// Results are ordered by model id regardless of completion order.
pub async fn fetch_all(
    fetcher: Arc<dyn PackageFetcher>,
    registry: &ModelRegistry,
    ids: &[ModelId],
    concurrency: usize,
) -> BatchFetchReport {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();
    for id in ids.iter().copied() {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&sem);
        let instruction = registry.instruction(id).clone();
        let known = registry.identity(id).cloned();
        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            (id, fetcher.fetch(id, &instruction, known.as_ref()).await)
        });
    }

    let mut fetched = BTreeMap::new();
    let mut report = BatchFetchReport::default();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(model))) => {
                fetched.insert(model.identity.id, model.identity);
            }
            Ok((id, Err(e))) => {
                report.failed.insert(id, e.to_string());
            }
            Err(e) => error!(error = %e, "fetch task join error"),
        }
    }
    report.fetched = fetched.into_values().collect();

    if !report.failed.is_empty() {
        error!(failed = ?report.failed, "error downloading models");
    }
    info!(
        fetched = report.fetched.len(),
        failed = report.failed.len(),
        "batch fetch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;

    struct FakeFetcher;

    #[async_trait]
    impl PackageFetcher for FakeFetcher {
        async fn fetch(
            &self,
            id: ModelId,
            _instruction: &RunInstruction,
            _known: Option<&ModelIdentity>,
        ) -> Result<FetchedModel> {
            if id.0 % 2 == 0 {
                return Err(FetchError::MissingArchive(id));
            }
            Ok(FetchedModel {
                identity: ModelIdentity::new(id, format!("model {id}"), "", "v1"),
                archive: format!("/cache/{id}.zip").into(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let ids: Vec<ModelId> = (1..=6).map(ModelId).collect();
        let report = fetch_all(Arc::new(FakeFetcher), &ModelRegistry::default(), &ids, 2).await;

        let fetched: Vec<ModelId> = report.fetched.iter().map(|m| m.id).collect();
        assert_eq!(fetched, vec![ModelId(1), ModelId(3), ModelId(5)]);
        assert_eq!(
            report.failed.keys().copied().collect::<Vec<_>>(),
            vec![ModelId(2), ModelId(4), ModelId(6)]
        );
    }
}
