/// Volatile in-memory store
use crate::store::{is_valid_subject, JwtStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<HashMap<String, String>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only store pre-populated with `tokens`
    pub fn read_only(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: RwLock::new(tokens),
            read_only: true,
        }
    }
}

#[async_trait]
impl JwtStore for MemoryStore {
    async fn load(&self, subject: &str) -> StoreResult<String> {
        self.tokens
            .read()
            .await
            .get(subject)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(subject.to_string()))
    }

    async fn save(&self, subject: &str, token: &str) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        if !is_valid_subject(subject) {
            return Err(StoreError::InvalidSubject(subject.to_string()));
        }
        self.tokens
            .write()
            .await
            .insert(subject.to_string(), token.to_string());
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.tokens.read().await.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    async fn close(&self) {}
}
