//! Account secrets handed from one session to the next

use dashmap::DashMap;
use imbot_core::account::AccountSecrets;
use imbot_core::types::Uin;

/// Keeps the signature material needed for fast login.
///
/// This is the only state that survives from one network handler to the next.
pub trait AccountSecretsStore: Send + Sync {
    fn load(&self, uin: Uin) -> Option<AccountSecrets>;
    fn save(&self, secrets: AccountSecrets);
    fn clear(&self, uin: Uin);
}

/// Process-local store; secrets are lost on restart
#[derive(Debug, Default)]
pub struct InMemorySecretsStore {
    secrets: DashMap<Uin, AccountSecrets>,
}

impl InMemorySecretsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountSecretsStore for InMemorySecretsStore {
    fn load(&self, uin: Uin) -> Option<AccountSecrets> {
        self.secrets.get(&uin).map(|s| s.clone())
    }

    fn save(&self, secrets: AccountSecrets) {
        self.secrets.insert(secrets.uin, secrets);
    }

    fn clear(&self, uin: Uin) {
        self.secrets.remove(&uin);
    }
}
