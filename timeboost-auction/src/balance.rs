use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use timeboost_contract::{AuctionContract, ContractError};
use timeboost_types::{Address, U256};
use tokio::time::Instant;

/// Deposit balances read from the contract, reused for a short time.
pub struct BalanceCache<C> {
    contract: Arc<C>,
    ttl: Duration,
    entries: Mutex<HashMap<Address, (Instant, U256)>>,
}

impl<C: AuctionContract> BalanceCache<C> {
    pub fn new(contract: Arc<C>, ttl: Duration) -> Self {
        Self {
            contract,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn balance(&self, a: Address) -> Result<U256, ContractError> {
        if let Some((t, b)) = self.entries.lock().get(&a) {
            if t.elapsed() < self.ttl {
                return Ok(*b);
            }
        }
        let b = self.contract.balance_of(a).await?;
        self.entries.lock().insert(a, (Instant::now(), b));
        Ok(b)
    }

    pub fn invalidate(&self, a: &Address) {
        self.entries.lock().remove(a);
    }
}
