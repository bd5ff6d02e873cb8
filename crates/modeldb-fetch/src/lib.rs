//! ModelDB-Fetch: model package acquisition for ModelDB CI
//!
//! Downloads model packages from the ModelDB web API (or the GitHub mirror
//! when a run instruction says so) into a local cache, keyed by accession
//! number and fingerprinted by version timestamp.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;

use std::sync::Arc;

use modeldb_core::{ModelId, ModelRegistry};
use tracing::info;

pub use cache::{Fingerprint, PackageCache};
pub use client::{ModelDbClient, ModelObject, ARCHIVE_ATTRIBUTE_ID};
pub use config::FetchConfig;
pub use error::{FetchError, Result};
pub use fetcher::{fetch_all, BatchFetchReport, FetchedModel, ModelDbFetcher, PackageFetcher};

/// Fetch `ids` (or every NEURON model when `None`) and merge the fetched
/// identities into the registry metadata.
///
/// A full fetch starts from empty metadata. Returns the updated registry and
/// the batch report; the caller persists the metadata.
pub async fn download_models(
    config: FetchConfig,
    registry: ModelRegistry,
    ids: Option<Vec<ModelId>>,
) -> Result<(ModelRegistry, BatchFetchReport)> {
    let client = ModelDbClient::new(config.clone())?;
    let cache = PackageCache::new(&config.cache_dir);
    cache.ensure_dir()?;

    let (registry, ids) = match ids {
        Some(ids) => (registry, ids),
        None => {
            let ids = client.list_model_ids().await?;
            (registry.without_metadata(), ids)
        }
    };
    info!(models = ids.len(), concurrency = config.concurrency, "fetching models");

    let fetcher: Arc<dyn PackageFetcher> = Arc::new(ModelDbFetcher::new(client, cache));
    let report = fetch_all(fetcher, &registry, &ids, config.concurrency).await;
    let registry = registry.with_metadata(report.fetched.iter().cloned());
    Ok((registry, report))
}
