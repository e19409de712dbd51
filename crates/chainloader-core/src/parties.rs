//! Party resolution and shared-key derivation.
//!
//! The sender and recipient addresses of a transaction are looked up through
//! an injected `IdentityLookup`. Lookups are memoized per address for the
//! whole `load` call, so an address referenced by several transactions (or
//! on both sides of one) costs a single external call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use chainloader_crypto::ecdh::{self, KEY_LEN};
use chainloader_crypto::utils::constant_time_compare;
use chainloader_crypto::SharedKey;

// ============================================================================
// Key Material
// ============================================================================

/// Key material returned by an identity lookup.
///
/// Every identity exposes a public value; only the caller's own identities
/// expose a private value.
pub trait KeyMaterial: Send + Sync {
    fn public_value(&self) -> &[u8];
    fn private_value(&self) -> Option<&[u8]>;
}

/// x25519 identity key. The private half is zeroized on drop.
#[derive(Clone)]
pub struct IdentityKey {
    public: [u8; KEY_LEN],
    private: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl IdentityKey {
    /// Someone else's identity: public half only.
    pub fn public_only(public: [u8; KEY_LEN]) -> Self {
        Self {
            public,
            private: None,
        }
    }

    /// An owned identity; the public half is derived from `private`.
    pub fn from_private(private: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(private);
        Self {
            public: *X25519PublicKey::from(&secret).as_bytes(),
            private: Some(Zeroizing::new(private)),
        }
    }

    /// Generate a fresh owned identity.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_private(secret.to_bytes())
    }

    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public
    }

    /// The same identity without its private half.
    pub fn to_public(&self) -> Self {
        Self::public_only(self.public)
    }
}

impl KeyMaterial for IdentityKey {
    fn public_value(&self) -> &[u8] {
        &self.public
    }

    fn private_value(&self) -> Option<&[u8]> {
        self.private.as_deref().map(|k| &k[..])
    }
}

/// A looked-up transaction participant.
#[derive(Clone)]
pub struct ResolvedParty {
    pub address: String,
    pub key: Arc<dyn KeyMaterial>,
}

impl ResolvedParty {
    pub fn is_owned(&self) -> bool {
        self.key.private_value().is_some()
    }

    fn same_identity(&self, other: &ResolvedParty) -> bool {
        constant_time_compare(self.key.public_value(), other.key.public_value())
    }
}

impl std::fmt::Debug for ResolvedParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedParty")
            .field("address", &self.address)
            .field("public", &hex::encode(self.key.public_value()))
            .field("owned", &self.is_owned())
            .finish()
    }
}

/// Sender/recipient pair found for a transaction. Either side may be
/// missing; permission transactions need both.
#[derive(Clone, Debug, Default)]
pub struct PartyMatch {
    pub from: Option<ResolvedParty>,
    pub to: Option<ResolvedParty>,
}

impl PartyMatch {
    /// Both sides, if both resolved.
    pub fn pair(&self) -> Option<(&ResolvedParty, &ResolvedParty)> {
        Some((self.from.as_ref()?, self.to.as_ref()?))
    }
}

// ============================================================================
// Identity Lookup
// ============================================================================

/// Errors reported by an identity lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Directory mapping address fingerprints to identity keys.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Resolve the key material for `address`.
    ///
    /// # Returns
    /// * `Ok(key)` - the identity's key material (with private half for own identities)
    /// * `Err(LookupError)` - unknown address or directory failure
    async fn lookup(&self, address: &str) -> Result<Arc<dyn KeyMaterial>, LookupError>;
}

type LookupOutcome = Result<Arc<dyn KeyMaterial>, LookupError>;
type LookupFuture = Shared<BoxFuture<'static, LookupOutcome>>;

/// Per-call memo of in-flight and settled lookups, keyed by address.
///
/// Each address gets exactly one future, created on first request and
/// awaited by every pipeline that references the address.
#[derive(Default)]
pub struct LookupCache {
    inflight: Mutex<HashMap<String, LookupFuture>>,
    launched: AtomicU64,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of external lookups started through this cache.
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    async fn get(&self, lookup: &Arc<dyn IdentityLookup>, address: &str) -> LookupOutcome {
        let fut = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(address.to_string())
                .or_insert_with(|| {
                    self.launched.fetch_add(1, Ordering::Relaxed);
                    let lookup = Arc::clone(lookup);
                    let address = address.to_string();
                    async move { lookup.lookup(&address).await }.boxed().shared()
                })
                .clone()
        };
        fut.await
    }
}

// ============================================================================
// Party Resolver
// ============================================================================

/// How the recipient is chosen when several candidates resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First resolved recipient whose key differs from the sender's.
    #[default]
    FirstDistinct,
    /// As `FirstDistinct`, but leave the recipient unset when more than one
    /// distinct recipient key resolves.
    RejectAmbiguous,
}

/// Maps transaction addresses to resolved parties.
#[derive(Clone)]
pub struct PartyResolver {
    lookup: Option<Arc<dyn IdentityLookup>>,
    policy: MatchPolicy,
}

impl PartyResolver {
    pub fn new(lookup: Option<Arc<dyn IdentityLookup>>, policy: MatchPolicy) -> Self {
        Self { lookup, policy }
    }

    pub fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    /// Resolve the sender/recipient pair.
    ///
    /// Returns `None` when no lookup is configured or nothing resolved.
    pub async fn resolve(
        &self,
        cache: &LookupCache,
        addresses_from: &[String],
        addresses_to: &[String],
    ) -> Option<PartyMatch> {
        let lookup = self.lookup.as_ref()?;

        let all: Vec<&String> = addresses_from.iter().chain(addresses_to).collect();
        let outcomes = join_all(all.iter().map(|address| async move {
            if address.is_empty() {
                return None;
            }
            match cache.get(lookup, address).await {
                Ok(key) => Some(ResolvedParty {
                    address: address.to_string(),
                    key,
                }),
                Err(e) => {
                    debug!(address = %address, error = %e, "identity lookup failed");
                    None
                }
            }
        }))
        .await;

        let (from_outcomes, to_outcomes) = outcomes.split_at(addresses_from.len());
        let from = from_outcomes.iter().flatten().next().cloned();

        let mut recipients = to_outcomes
            .iter()
            .flatten()
            .filter(|party| from.as_ref().map_or(true, |f| !f.same_identity(party)));
        let mut to = recipients.next().cloned();

        if self.policy == MatchPolicy::RejectAmbiguous {
            let ambiguous = match &to {
                Some(first) => recipients.any(|other| !other.same_identity(first)),
                None => false,
            };
            if ambiguous {
                debug!("more than one distinct recipient resolved, rejecting");
                to = None;
            }
        }

        if from.is_none() && to.is_none() {
            return None;
        }
        Some(PartyMatch { from, to })
    }
}

// ============================================================================
// Shared-Key Derivation
// ============================================================================

/// Derive the shared key between two parties.
///
/// The sender's private half is tried first; when the sender is not one of
/// our identities, the recipient's private half is paired with the sender's
/// public value instead.
pub fn derive_shared_key(from: &ResolvedParty, to: &ResolvedParty) -> Option<SharedKey> {
    let (private, public) = match from.key.private_value() {
        Some(private) => (private, to.key.public_value()),
        None => (to.key.private_value()?, from.key.public_value()),
    };

    ecdh::shared_encryption_key(private, public)
        .map_err(|e| debug!(from = %from.address, to = %to.address, error = %e, "ECDH failed"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::StaticLookup;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn party(address: &str, key: IdentityKey) -> ResolvedParty {
        ResolvedParty {
            address: address.into(),
            key: Arc::new(key),
        }
    }

    #[tokio::test]
    async fn test_no_lookup_is_public_only_mode() {
        let resolver = PartyResolver::new(None, MatchPolicy::default());
        let cache = LookupCache::new();
        assert!(!resolver.has_lookup());
        assert!(resolver
            .resolve(&cache, &addrs(&["a"]), &addrs(&["b"]))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_first_from_and_first_distinct_to() {
        let me = IdentityKey::generate();
        let bob = IdentityKey::generate();
        let carol = IdentityKey::generate();
        let lookup = StaticLookup::new()
            .with("me", me.clone())
            .with("bob", bob.to_public())
            .with("carol", carol.to_public());
        let resolver = PartyResolver::new(Some(Arc::new(lookup)), MatchPolicy::FirstDistinct);
        let cache = LookupCache::new();

        // "me" also appears as change output and must be skipped on the to side
        let m = resolver
            .resolve(
                &cache,
                &addrs(&["unknown", "me"]),
                &addrs(&["me", "bob", "carol"]),
            )
            .await
            .unwrap();

        assert_eq!(m.from.unwrap().address, "me");
        assert_eq!(m.to.unwrap().address, "bob");
        // "me" listed twice but looked up once
        assert_eq!(cache.launched(), 4);
    }

    #[tokio::test]
    async fn test_self_transaction_leaves_to_unset() {
        let me = IdentityKey::generate();
        let lookup = StaticLookup::new().with("me", me.clone()).with("me2", me.clone());
        let resolver = PartyResolver::new(Some(Arc::new(lookup)), MatchPolicy::default());
        let cache = LookupCache::new();

        let m = resolver
            .resolve(&cache, &addrs(&["me"]), &addrs(&["me2"]))
            .await
            .unwrap();

        assert!(m.from.is_some());
        assert!(m.to.is_none());
        assert!(m.pair().is_none());
    }

    #[tokio::test]
    async fn test_only_recipient_resolved_is_partial_match() {
        let me = IdentityKey::generate();
        let lookup = StaticLookup::new().with("me", me);
        let resolver = PartyResolver::new(Some(Arc::new(lookup)), MatchPolicy::default());
        let cache = LookupCache::new();

        let m = resolver
            .resolve(&cache, &addrs(&["stranger"]), &addrs(&["me"]))
            .await
            .unwrap();

        assert!(m.from.is_none());
        assert_eq!(m.to.unwrap().address, "me");
    }

    #[tokio::test]
    async fn test_all_lookups_fail_returns_none() {
        let resolver =
            PartyResolver::new(Some(Arc::new(StaticLookup::new())), MatchPolicy::default());
        let cache = LookupCache::new();

        let m = resolver
            .resolve(&cache, &addrs(&["a", ""]), &addrs(&["b"]))
            .await;

        assert!(m.is_none());
        // empty address never reaches the lookup
        assert_eq!(cache.launched(), 2);
    }

    #[tokio::test]
    async fn test_reject_ambiguous_recipients() {
        let me = IdentityKey::generate();
        let lookup = StaticLookup::new()
            .with("me", me)
            .with("bob", IdentityKey::generate().to_public())
            .with("carol", IdentityKey::generate().to_public());
        let resolver = PartyResolver::new(Some(Arc::new(lookup)), MatchPolicy::RejectAmbiguous);
        let cache = LookupCache::new();

        let m = resolver
            .resolve(&cache, &addrs(&["me"]), &addrs(&["bob", "carol"]))
            .await
            .unwrap();

        assert!(m.from.is_some());
        assert!(m.to.is_none());
    }

    #[test]
    fn test_shared_key_either_direction() {
        let me = IdentityKey::generate();
        let bob = IdentityKey::generate();

        let sent = derive_shared_key(&party("me", me.clone()), &party("bob", bob.to_public()))
            .unwrap();
        let received = derive_shared_key(&party("bob", bob.to_public()), &party("me", me.clone()))
            .unwrap();
        let bobs_view = derive_shared_key(&party("bob", bob), &party("me", me.to_public()))
            .unwrap();

        assert_eq!(sent.as_bytes(), received.as_bytes());
        assert_eq!(sent.as_bytes(), bobs_view.as_bytes());
    }

    #[test]
    fn test_identity_key_halves() {
        let me = IdentityKey::generate();
        let public = me.to_public();

        assert_eq!(public.public_key(), me.public_key());
        assert_eq!(public.public_value(), &me.public_key()[..]);
        assert!(me.private_value().is_some());
        assert!(public.private_value().is_none());

        let private: [u8; KEY_LEN] = me.private_value().unwrap().try_into().unwrap();
        assert_eq!(IdentityKey::from_private(private).public_key(), me.public_key());
    }

    #[test]
    fn test_shared_key_needs_a_private_half() {
        let a = party("a", IdentityKey::generate().to_public());
        let b = party("b", IdentityKey::generate().to_public());
        assert!(derive_shared_key(&a, &b).is_none());
    }
}
