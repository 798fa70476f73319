use std::collections::VecDeque;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::endpoint::Endpoint;

const SECRET_LEN: usize = 20;

/// Rotating secrets behind `get_peers` tokens.
///
/// A token is `sha1(packed_endpoint || secret)` over the newest secret.
/// Validation accepts a token made with any retained secret, so a token
/// outlives `capacity - 1` rotations.
#[derive(Debug, Clone)]
pub struct SecretWindow {
    secrets: VecDeque<[u8; SECRET_LEN]>,
    capacity: usize,
}

impl SecretWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut secrets = VecDeque::with_capacity(capacity);
        secrets.push_front(random_secret());
        Self { secrets, capacity }
    }

    pub fn rotate(&mut self) {
        self.secrets.push_front(random_secret());
        self.secrets.truncate(self.capacity);
    }

    pub fn token_for(&self, endpoint: &Endpoint) -> Bytes {
        // The window always holds at least one secret.
        let secret = self.secrets.front().copied().unwrap_or_default();
        Bytes::copy_from_slice(&compute(endpoint, &secret))
    }

    pub fn validate(&self, endpoint: &Endpoint, token: &[u8]) -> bool {
        token.len() == SECRET_LEN
            && self
                .secrets
                .iter()
                .any(|secret| compute(endpoint, secret)[..] == *token)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

fn random_secret() -> [u8; SECRET_LEN] {
    rand::random()
}

fn compute(endpoint: &Endpoint, secret: &[u8; SECRET_LEN]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(endpoint.to_packed());
    hasher.update(secret);
    hasher.finalize().into()
}
