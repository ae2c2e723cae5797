//! Chooses the pair a token's USD price history is read from.

use crate::domain::{Pair, PriceSource, SnapshotStore, Token};
use num_bigint::BigUint;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Decides which tokens are treated as USD-pegged.
pub trait TokenClassifier: Send + Sync {
    fn is_stablecoin(&self, token: &Token) -> bool;
}

/// Symbol allow-list, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StablecoinList {
    symbols: HashSet<String>,
}

impl StablecoinList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl TokenClassifier for StablecoinList {
    fn is_stablecoin(&self, token: &Token) -> bool {
        self.symbols.contains(&token.symbol.to_uppercase())
    }
}

pub struct PairLocator {
    store: Arc<dyn SnapshotStore>,
    classifier: Arc<dyn TokenClassifier>,
}

impl PairLocator {
    pub fn new(store: Arc<dyn SnapshotStore>, classifier: Arc<dyn TokenClassifier>) -> Self {
        Self { store, classifier }
    }

    pub fn classifier(&self) -> &dyn TokenClassifier {
        self.classifier.as_ref()
    }

    /// Resolve the token by id, falling back to its address, and locate its
    /// price source.
    pub async fn find_best_price_data_pair(
        &self,
        token_id: &str,
        token_address: &str,
    ) -> anyhow::Result<Option<(Token, Pair, PriceSource)>> {
        let token = match self.store.find_token(token_id).await? {
            Some(token) => Some(token),
            None if !token_address.is_empty() => self.store.find_token(token_address).await?,
            None => None,
        };
        let Some(token) = token else {
            info!("Token {} ({}) not found", token_id, token_address);
            return Ok(None);
        };
        Ok(self
            .locate(&token)
            .await?
            .map(|(pair, source)| (token, pair, source)))
    }

    /// Locate the price source of an already resolved token.
    pub async fn locate(&self, token: &Token) -> anyhow::Result<Option<(Pair, PriceSource)>> {
        let as_token0 = self.store.pairs_with_token0(&token.id).await?;
        let as_token1 = self.store.pairs_with_token1(&token.id).await?;

        let selected = select_price_pair(token, as_token0, as_token1, self.classifier.as_ref());
        match &selected {
            Some((pair, source)) => debug!(
                "Price source for {}: pair {} (token0: {})",
                token.symbol, pair.id, source.is_token0
            ),
            None => info!("No pairs found for token {}", token.symbol),
        }
        Ok(selected)
    }
}

/// Pure selection over both candidate lists.
///
/// Each list is re-sorted (stable) by creation time desc then own-side
/// reserve desc, so the result does not depend on store ordering. Ties keep
/// the earlier candidate, token0-side first.
pub fn select_price_pair(
    token: &Token,
    mut as_token0: Vec<Pair>,
    mut as_token1: Vec<Pair>,
    classifier: &dyn TokenClassifier,
) -> Option<(Pair, PriceSource)> {
    sort_candidates(&mut as_token0, true);
    sort_candidates(&mut as_token1, false);

    let candidates = || {
        as_token0
            .iter()
            .map(|p| (p, true))
            .chain(as_token1.iter().map(|p| (p, false)))
    };

    let chosen = if classifier.is_stablecoin(token) {
        deepest(candidates())
    } else {
        as_token0
            .iter()
            .find(|p| classifier.is_stablecoin(&p.token1))
            .map(|p| (p, true))
            .or_else(|| {
                as_token1
                    .iter()
                    .find(|p| classifier.is_stablecoin(&p.token0))
                    .map(|p| (p, false))
            })
            .or_else(|| deepest(candidates()))
    };

    chosen.map(|(pair, is_token0)| {
        (
            pair.clone(),
            PriceSource {
                pair_id: pair.id.clone(),
                is_token0,
            },
        )
    })
}

fn sort_candidates(pairs: &mut [Pair], is_token0: bool) {
    pairs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.reserve(is_token0).magnitude().cmp(&a.reserve(is_token0).magnitude()))
    });
}

fn deepest<'a>(candidates: impl Iterator<Item = (&'a Pair, bool)>) -> Option<(&'a Pair, bool)> {
    let mut best: Option<(&'a Pair, bool, BigUint)> = None;
    for (pair, is_token0) in candidates {
        let depth = pair.reserve(is_token0).magnitude();
        if best.as_ref().map_or(true, |(_, _, d)| depth > *d) {
            best = Some((pair, is_token0, depth));
        }
    }
    best.map(|(pair, is_token0, _)| (pair, is_token0))
}
