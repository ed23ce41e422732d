use std::sync::Arc;

use crate::store::MachineStore;

/// Decides whether an agent's reported auth key is acceptable.
///
/// The expected key is the store's entry for the hostname, or the shared
/// secret when the store has none. An empty expected key never matches.
pub struct Authenticator {
    shared_secret: String,
    store: Arc<dyn MachineStore>,
}

impl Authenticator {
    pub fn new(shared_secret: impl Into<String>, store: Arc<dyn MachineStore>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            store,
        }
    }

    pub fn verify(&self, hostname: &str, auth_key: &str) -> bool {
        let expected = self
            .store
            .lookup_auth_key(hostname)
            .unwrap_or_else(|| self.shared_secret.clone());
        !expected.is_empty() && constant_time_eq(auth_key, &expected)
    }
}

fn constant_time_eq(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}
