//! Curation signal ledger
//!
//! Curators signal tokens on subgraph deployments; the global and
//! per-subgraph totals drive the reward accumulators. Callers must run the
//! subgraph signal update on the rewards accumulator before any change here.

use graph_core::math::{checked_add, checked_sub};
use graph_core::{Address, GraphError, Result, SubgraphDeploymentId, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only signal totals consumed by the rewards accumulator
pub trait SignalView {
    fn total_signal(&self) -> U256;
    fn subgraph_signal(&self, subgraph: &SubgraphDeploymentId) -> U256;
}

/// Signal held on a single deployment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationPool {
    pub tokens: U256,
    pub curators: BTreeMap<Address, U256>,
}

/// Global signal book
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalLedger {
    total: U256,
    pools: BTreeMap<SubgraphDeploymentId, CurationPool>,
}

impl SignalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self, subgraph: &SubgraphDeploymentId) -> Option<&CurationPool> {
        self.pools.get(subgraph)
    }

    pub fn curator_signal(&self, curator: &Address, subgraph: &SubgraphDeploymentId) -> U256 {
        self.pools
            .get(subgraph)
            .and_then(|pool| pool.curators.get(curator))
            .copied()
            .unwrap_or_default()
    }

    /// Add signal for a curator, returning the curator's new balance
    pub fn signal(&mut self, curator: &Address, subgraph: &SubgraphDeploymentId, tokens: U256) -> Result<U256> {
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let pool = self.pools.entry(*subgraph).or_default();
        let owned = pool.curators.entry(*curator).or_default();
        *owned = checked_add(*owned, tokens)?;
        let balance = *owned;
        pool.tokens = checked_add(pool.tokens, tokens)?;
        self.total = checked_add(self.total, tokens)?;
        Ok(balance)
    }

    /// Remove signal for a curator, returning the curator's new balance
    pub fn unsignal(&mut self, curator: &Address, subgraph: &SubgraphDeploymentId, tokens: U256) -> Result<U256> {
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let owned = self.curator_signal(curator, subgraph);
        if owned < tokens {
            return Err(GraphError::InsufficientSignal {
                requested: tokens,
                owned,
            });
        }
        let pool = self
            .pools
            .get_mut(subgraph)
            .ok_or(GraphError::InsufficientSignal { requested: tokens, owned })?;
        let remaining = owned - tokens;
        if remaining.is_zero() {
            pool.curators.remove(curator);
        } else {
            pool.curators.insert(*curator, remaining);
        }
        pool.tokens = checked_sub(pool.tokens, tokens)?;
        self.total = checked_sub(self.total, tokens)?;
        Ok(remaining)
    }

    /// Add curation fees to a deployment's signal without minting curator
    /// balances
    pub fn collect(&mut self, subgraph: &SubgraphDeploymentId, tokens: U256) -> Result<()> {
        let pool = self.pools.entry(*subgraph).or_default();
        pool.tokens = checked_add(pool.tokens, tokens)?;
        self.total = checked_add(self.total, tokens)?;
        Ok(())
    }

    /// Whether a deployment carries any signal
    pub fn is_curated(&self, subgraph: &SubgraphDeploymentId) -> bool {
        !self.subgraph_signal(subgraph).is_zero()
    }
}

impl SignalView for SignalLedger {
    fn total_signal(&self) -> U256 {
        self.total
    }

    fn subgraph_signal(&self, subgraph: &SubgraphDeploymentId) -> U256 {
        self.pools.get(subgraph).map(|p| p.tokens).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_core::tokens;

    #[test]
    fn test_signal_and_unsignal() {
        let mut ledger = SignalLedger::new();
        let curator = Address::repeat_byte(7);
        let subgraph = SubgraphDeploymentId::from_content(b"Qm1");

        ledger.signal(&curator, &subgraph, tokens(100)).unwrap();
        assert_eq!(ledger.total_signal(), tokens(100));
        assert_eq!(ledger.subgraph_signal(&subgraph), tokens(100));

        assert_eq!(ledger.unsignal(&curator, &subgraph, tokens(40)).unwrap(), tokens(60));
        assert_eq!(ledger.total_signal(), tokens(60));

        let err = ledger.unsignal(&curator, &subgraph, tokens(61)).unwrap_err();
        assert!(matches!(err, GraphError::InsufficientSignal { .. }));
    }

    #[test]
    fn test_collect_adds_signal_only() {
        let mut ledger = SignalLedger::new();
        let subgraph = SubgraphDeploymentId::from_content(b"Qm2");
        ledger.collect(&subgraph, tokens(5)).unwrap();

        assert!(ledger.is_curated(&subgraph));
        assert_eq!(ledger.total_signal(), tokens(5));
        assert_eq!(ledger.pool(&subgraph).unwrap().curators.len(), 0);
    }
}
