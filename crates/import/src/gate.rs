use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::AccountId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How widely file imports are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One import at a time, process-wide.
    #[default]
    Global,
    /// One import at a time per account; different accounts run in parallel.
    Account,
}

/// Mutual exclusion for the write phase of an import. Dedup and
/// categorization must see every row committed by earlier imports.
#[derive(Debug)]
pub struct ImportGate {
    scope: LockScope,
    global: Arc<Mutex<()>>,
    accounts: std::sync::Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

/// Held for the duration of one import.
#[derive(Debug)]
pub struct ImportPermit {
    _guard: OwnedMutexGuard<()>,
}

impl ImportGate {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            global: Arc::new(Mutex::new(())),
            accounts: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Waits until no other import holds the lock for `account`.
    pub async fn acquire(&self, account: AccountId) -> ImportPermit {
        let lock = match self.scope {
            LockScope::Global => Arc::clone(&self.global),
            LockScope::Account => self.account_lock(account),
        };
        ImportPermit {
            _guard: lock.lock_owned().await,
        }
    }

    fn account_lock(&self, account: AccountId) -> Arc<Mutex<()>> {
        // A poisoned map still holds valid locks.
        let mut locks = self
            .accounts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(account).or_default())
    }
}

impl Default for ImportGate {
    fn default() -> Self {
        Self::new(LockScope::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn global_scope_blocks_other_accounts() {
        let gate = ImportGate::new(LockScope::Global);
        let _held = gate.acquire(AccountId(1)).await;
        let other = timeout(Duration::from_millis(50), gate.acquire(AccountId(2))).await;
        assert!(other.is_err());
    }

    #[tokio::test]
    async fn account_scope_only_blocks_same_account() {
        let gate = ImportGate::new(LockScope::Account);
        let _held = gate.acquire(AccountId(1)).await;

        let other = timeout(Duration::from_millis(50), gate.acquire(AccountId(2))).await;
        assert!(other.is_ok());

        let same = timeout(Duration::from_millis(50), gate.acquire(AccountId(1))).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn permit_release_unblocks_waiter() {
        let gate = Arc::new(ImportGate::default());
        let held = gate.acquire(AccountId(1)).await;

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire(AccountId(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
