use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracon_runtime::{ControllerToken, SimError};

pub const TOKEN_LENGTH: usize = 32;

/// Generates a fresh, unguessable controller token.
pub fn generate_token() -> ControllerToken {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    ControllerToken::new(value)
}

/// Maps live controller tokens to the instance that issued them.
///
/// A token that has been revoked moves to the retired set and can never be
/// registered or resolved again. The retired set is never pruned: it grows by
/// one entry per sign-off or position change for the life of the process.
#[derive(Debug)]
pub struct TokenRegistry<T> {
    inner: RwLock<TokenTable<T>>,
}

#[derive(Debug)]
struct TokenTable<T> {
    live: HashMap<ControllerToken, Arc<T>>,
    retired: HashSet<ControllerToken>,
}

impl<T> Default for TokenRegistry<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(TokenTable {
                live: HashMap::new(),
                retired: HashSet::new(),
            }),
        }
    }
}

impl<T> TokenRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: ControllerToken, target: Arc<T>) -> Result<(), SimError> {
        let mut table = self.inner.write();
        if table.retired.contains(&token) || table.live.contains_key(&token) {
            return Err(SimError::TokenReused);
        }
        table.live.insert(token, target);
        Ok(())
    }

    pub fn resolve(&self, token: &ControllerToken) -> Option<Arc<T>> {
        self.inner.read().live.get(token).cloned()
    }

    /// Removes a live token; returns the instance it pointed at.
    pub fn revoke(&self, token: &ControllerToken) -> Option<Arc<T>> {
        let mut table = self.inner.write();
        let target = table.live.remove(token)?;
        table.retired.insert(token.clone());
        Some(target)
    }

    /// Retires every live token, e.g. at shutdown.
    pub fn revoke_all(&self) -> usize {
        let mut table = self.inner.write();
        let tokens: Vec<ControllerToken> = table.live.drain().map(|(token, _)| token).collect();
        let count = tokens.len();
        table.retired.extend(tokens);
        count
    }

    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn generated_tokens_are_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.as_str().len(), TOKEN_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn revoked_token_never_resolves_or_registers_again() {
        let registry = TokenRegistry::new();
        let token = ControllerToken::new("alpha");
        registry.register(token.clone(), Arc::new(1u32)).expect("register");
        assert_eq!(registry.resolve(&token).as_deref(), Some(&1));

        assert!(registry.revoke(&token).is_some());
        assert!(registry.resolve(&token).is_none());
        assert!(registry.revoke(&token).is_none());
        assert_eq!(
            registry.register(token, Arc::new(2u32)),
            Err(SimError::TokenReused)
        );
    }

    #[test]
    fn revoke_all_retires_every_live_token() {
        let registry = TokenRegistry::new();
        let token = ControllerToken::new("delta");
        registry.register(token.clone(), Arc::new(())).expect("register");
        registry
            .register(ControllerToken::new("epsilon"), Arc::new(()))
            .expect("register");

        assert_eq!(registry.revoke_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(
            registry.register(token, Arc::new(())),
            Err(SimError::TokenReused)
        );
    }

    #[test]
    fn duplicate_live_token_is_rejected() {
        let registry = TokenRegistry::new();
        let token = ControllerToken::new("beta");
        registry.register(token.clone(), Arc::new(())).expect("register");
        assert_eq!(
            registry.register(token, Arc::new(())),
            Err(SimError::TokenReused)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_lookups_see_revoke_exactly_once() {
        let registry = Arc::new(TokenRegistry::new());
        let token = ControllerToken::new("gamma");
        registry.register(token.clone(), Arc::new(7u8)).expect("register");

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let token = token.clone();
                thread::spawn(move || {
                    let mut seen_missing = false;
                    for _ in 0..1_000 {
                        match registry.resolve(&token) {
                            Some(_) => assert!(!seen_missing, "token resolved after revoke"),
                            None => seen_missing = true,
                        }
                    }
                })
            })
            .collect();

        registry.revoke(&token);
        for reader in readers {
            reader.join().expect("reader thread");
        }
        assert!(registry.resolve(&token).is_none());
    }
}
