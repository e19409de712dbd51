//! Batch orchestration.
//!
//! `Loader::load` runs one resolution pipeline per input transaction:
//!
//! ```text
//! classify ─┬─ public ──────> fetch(hex(payload))
//!           └─ permission ──> parties -> shared key -> envelope -> fetch -> decrypt?
//! ```
//!
//! Pipelines run concurrently as plain futures and share one `LookupCache`
//! per call. Output order equals input order, and a failing pipeline never
//! affects its siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use chainloader_crypto::SharedKey;

use crate::classify::{Classifier, MarkerParser, TxParser};
use crate::config::{ConfigError, LoaderConfig};
use crate::content::{decrypt_content, ContentFetcher};
use crate::errors::{LoadError, ResolveError};
use crate::keeper::Keeper;
use crate::parties::{derive_shared_key, IdentityLookup, LookupCache, PartyMatch, PartyResolver};
use crate::permission::{PermissionCodec, PermissionEnvelope, PermissionResolver};
use crate::types::{Progress, ResolutionResult, TxInput, TxType};

type LoadOutcome = Result<ResolutionResult, LoadError>;

// ============================================================================
// Observer
// ============================================================================

/// Side channel for pipeline events. All methods default to no-ops.
///
/// Callbacks run inline on the pipeline and must not block.
pub trait LoadObserver: Send + Sync {
    /// A transaction passed classification.
    fn on_classified(&self, _progress: &Progress) {}

    /// A permission envelope was recovered.
    fn on_permission_recovered(&self, _tx_id: &str, _permission: &PermissionEnvelope) {}

    fn on_resolved(&self, _result: &ResolutionResult) {}

    fn on_failed(&self, _error: &LoadError) {}
}

struct NoopObserver;

impl LoadObserver for NoopObserver {}

// ============================================================================
// Loader Statistics
// ============================================================================

/// Counters accumulated across all `load` calls of a loader.
#[derive(Debug, Default)]
pub struct LoaderStats {
    /// Input transactions received
    pub received: AtomicU64,
    /// Transactions resolved to content
    pub resolved: AtomicU64,
    /// Transactions that ended in a `LoadError`
    pub failed: AtomicU64,
    /// External identity lookups started
    pub lookups: AtomicU64,
    /// Public transactions served by the batch prefetch
    pub prefetch_hits: AtomicU64,
}

impl LoaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        LoaderStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics to zero.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.resolved.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.lookups.store(0, Ordering::Relaxed);
        self.prefetch_hits.store(0, Ordering::Relaxed);
    }

    fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    fn add_lookups(&self, n: u64) {
        self.lookups.fetch_add(n, Ordering::Relaxed);
    }

    fn add_prefetch_hits(&self, n: u64) {
        self.prefetch_hits.fetch_add(n, Ordering::Relaxed);
    }

    fn inc_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of loader statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStatsSnapshot {
    pub received: u64,
    pub resolved: u64,
    pub failed: u64,
    pub lookups: u64,
    pub prefetch_hits: u64,
}

// ============================================================================
// Builder
// ============================================================================

/// Collects the loader's collaborators. Nothing can be swapped after `build`.
pub struct LoaderBuilder {
    config: LoaderConfig,
    keeper: Arc<dyn Keeper>,
    codec: Arc<dyn PermissionCodec>,
    lookup: Option<Arc<dyn IdentityLookup>>,
    parser: Option<Arc<dyn TxParser>>,
    observer: Option<Arc<dyn LoadObserver>>,
}

impl LoaderBuilder {
    pub fn new(
        config: LoaderConfig,
        keeper: Arc<dyn Keeper>,
        codec: Arc<dyn PermissionCodec>,
    ) -> Self {
        Self {
            config,
            keeper,
            codec,
            lookup: None,
            parser: None,
            observer: None,
        }
    }

    /// Identity directory for permission transactions. Without one the
    /// loader only resolves public transactions.
    pub fn lookup(mut self, lookup: Arc<dyn IdentityLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Parser for raw transactions; defaults to `MarkerParser`.
    pub fn parser(mut self, parser: Arc<dyn TxParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Loader, ConfigError> {
        self.config.validate()?;

        let parser = self.parser.unwrap_or_else(|| Arc::new(MarkerParser));
        let fetcher = ContentFetcher::new(self.keeper);

        Ok(Loader {
            classifier: Classifier::new(parser, &self.config.network, &self.config.prefix),
            parties: PartyResolver::new(self.lookup, self.config.match_policy),
            permissions: PermissionResolver::new(self.codec, fetcher.clone()),
            fetcher,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            stats: Arc::new(LoaderStats::new()),
            config: self.config,
        })
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Resolves batches of transactions to file content.
pub struct Loader {
    config: LoaderConfig,
    classifier: Classifier,
    parties: PartyResolver,
    permissions: PermissionResolver,
    fetcher: ContentFetcher,
    observer: Arc<dyn LoadObserver>,
    stats: Arc<LoaderStats>,
}

impl Loader {
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<LoaderStats> {
        &self.stats
    }

    /// Resolve every input, returning one outcome per input in input order.
    ///
    /// Identity lookups are shared across the whole batch: each distinct
    /// address is looked up at most once per call.
    pub async fn load(&self, inputs: impl IntoIterator<Item = TxInput>) -> Vec<LoadOutcome> {
        let mut batch: Vec<Result<Progress, LoadError>> =
            inputs.into_iter().map(|input| self.classify(input)).collect();
        self.stats.add_received(batch.len() as u64);

        if self.config.prefetch_public {
            self.prefetch_public(&mut batch).await;
        }

        let cache = LookupCache::new();
        let cache = &cache;
        let pipelines = batch.into_iter().map(|classified| async move {
            match classified {
                Ok(progress) => self.run(progress, cache).await,
                Err(e) => Err(e),
            }
        });

        let outcomes = match self.config.max_concurrent {
            Some(limit) => stream::iter(pipelines).buffered(limit).collect::<Vec<_>>().await,
            None => join_all(pipelines).await,
        };
        self.stats.add_lookups(cache.launched());

        for outcome in &outcomes {
            self.record(outcome);
        }

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        info!(
            total = outcomes.len(),
            failed,
            lookups = cache.launched(),
            "batch resolved"
        );
        outcomes
    }

    /// Resolve a single transaction with its own lookup cache.
    pub async fn load_one(&self, input: TxInput) -> LoadOutcome {
        self.stats.add_received(1);

        let cache = LookupCache::new();
        let outcome = match self.classify(input) {
            Ok(progress) => self.run(progress, &cache).await,
            Err(e) => Err(e),
        };
        self.stats.add_lookups(cache.launched());

        self.record(&outcome);
        outcome
    }

    fn classify(&self, input: TxInput) -> Result<Progress, LoadError> {
        let classified = self.classifier.classify(input);
        if let Ok(progress) = &classified {
            self.observer.on_classified(progress);
        }
        classified
    }

    fn record(&self, outcome: &LoadOutcome) {
        match outcome {
            Ok(result) => {
                self.stats.inc_resolved();
                self.observer.on_resolved(result);
            }
            Err(e) => {
                self.stats.inc_failed();
                debug!(tx_id = ?e.tx_id(), kind = ?e.kind(), error = %e, "transaction failed");
                self.observer.on_failed(e);
            }
        }
    }

    /// Read all public content of the batch with one keeper call.
    ///
    /// Hits become cached data on the progress record. Misses and backend
    /// failures leave the record untouched so the pipeline fetches it itself.
    async fn prefetch_public(&self, batch: &mut [Result<Progress, LoadError>]) {
        let targets: Vec<(usize, String)> = batch
            .iter()
            .enumerate()
            .filter_map(|(i, classified)| match classified {
                Ok(p) if p.parsed.tx_type == TxType::Public && p.data.is_none() => {
                    Some((i, p.parsed.public_file_key()))
                }
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return;
        }

        let keys: Vec<String> = targets.iter().map(|(_, key)| key.clone()).collect();
        let values = match self.fetcher.fetch_many(&keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    keys = keys.len(),
                    error = %e,
                    "public prefetch failed, falling back to single reads"
                );
                return;
            }
        };

        let mut hits = 0;
        for ((i, key), value) in targets.into_iter().zip(values) {
            if let (Some(data), Ok(progress)) = (value, &mut batch[i]) {
                progress.key = Some(key);
                progress.data = Some(data);
                hits += 1;
            }
        }
        self.stats.add_prefetch_hits(hits);
        debug!(keys = keys.len(), hits, "public prefetch done");
    }

    async fn run(&self, mut progress: Progress, cache: &LookupCache) -> LoadOutcome {
        let resolved = match progress.parsed.tx_type {
            TxType::Public => self.resolve_public(&mut progress).await,
            TxType::Permission => self.resolve_permission(&mut progress, cache).await,
        };
        if let Err(error) = resolved {
            return Err(LoadError::new(error).with_progress(progress));
        }

        match progress.to_result() {
            Some(result) => Ok(result),
            None => {
                let error = ResolveError::NotEnoughInfo {
                    tx_id: progress.tx_id().to_string(),
                };
                Err(LoadError::new(error).with_progress(progress))
            }
        }
    }

    async fn resolve_public(&self, progress: &mut Progress) -> Result<(), ResolveError> {
        let key = progress.parsed.public_file_key();
        progress.key = Some(key.clone());

        if progress.data.is_none() {
            progress.data = Some(self.fetcher.fetch(&key).await?);
        }
        Ok(())
    }

    async fn resolve_permission(
        &self,
        progress: &mut Progress,
        cache: &LookupCache,
    ) -> Result<(), ResolveError> {
        let permission = match progress.permission.clone() {
            Some(permission) => {
                debug!(tx_id = %progress.tx_id(), "have permission, skipping lookups");
                permission
            }
            None => {
                let shared_key = self.shared_key(progress, cache).await?;
                let permission = self.permissions.resolve(progress, &shared_key).await?;
                self.observer
                    .on_permission_recovered(progress.tx_id(), &permission);
                permission
            }
        };

        let file_key = permission.file_key().to_string();
        progress.key = Some(file_key.clone());

        let encrypted = match progress.encrypted_data.clone() {
            Some(data) => data,
            None => {
                let data = self.fetcher.fetch(&file_key).await?;
                progress.encrypted_data = Some(data.clone());
                data
            }
        };

        let data = match permission.decryption_key() {
            Some(key) => decrypt_content(&encrypted, key, progress.tx_id(), &file_key)?,
            None => encrypted,
        };
        progress.data = Some(data);
        Ok(())
    }

    async fn shared_key(
        &self,
        progress: &Progress,
        cache: &LookupCache,
    ) -> Result<SharedKey, ResolveError> {
        let parsed = &progress.parsed;
        let parties = self
            .parties
            .resolve(cache, &parsed.addresses_from, &parsed.addresses_to)
            .await;

        let Some((from, to)) = parties.as_ref().and_then(PartyMatch::pair) else {
            debug!(tx_id = %parsed.tx_id, "no sender/recipient pair resolved");
            return Err(ResolveError::ParticipantsNotFound {
                tx_id: parsed.tx_id.clone(),
            });
        };

        derive_shared_key(from, to).ok_or_else(|| ResolveError::Ecdh {
            tx_id: parsed.tx_id.clone(),
        })
    }
}
