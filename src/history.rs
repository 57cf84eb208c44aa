//! Secure history store
//!
//! Each save serializes the transcript, seals it under a fresh data key,
//! wraps that key through the [`KeyWrapper`] and writes both halves as one
//! expiring record. The store only ever sees ciphertext.

mod envelope;
mod keywrap;
mod kv;

pub use keywrap::{KeyWrapError, KeyWrapper, LocalKeyWrapper};
pub use kv::{KeyValueStore, KvError, MemoryKvStore, SqliteKvStore};

use crate::transcript::Transcript;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("no history for session {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] KvError),
    #[error("key wrapping error: {0}")]
    KeyWrap(#[from] KeyWrapError),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("record encoding error: {0}")]
    Encoding(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted record shape
#[derive(Debug, Serialize, Deserialize)]
struct HistoryRecord {
    ciphertext: String,
    wrapped_key: String,
}

fn record_key(session_id: &str) -> String {
    format!("chist:{session_id}")
}

pub struct SecureHistoryStore {
    kv: Arc<dyn KeyValueStore>,
    wrapper: Arc<dyn KeyWrapper>,
    ttl: Duration,
}

impl SecureHistoryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, wrapper: Arc<dyn KeyWrapper>, ttl: Duration) -> Self {
        Self { kv, wrapper, ttl }
    }

    /// Encrypt and persist, replacing any earlier snapshot. Returns the session id.
    pub async fn save(
        &self,
        transcript: &Transcript,
        session_id: &str,
    ) -> Result<String, HistoryError> {
        let plaintext = serde_json::to_vec(transcript)?;
        let data_key = envelope::generate_key();
        let sealed = envelope::seal(&data_key, &plaintext)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;
        let wrapped = self.wrapper.wrap(&data_key).await?;

        let record = HistoryRecord {
            ciphertext: BASE64.encode(sealed),
            wrapped_key: BASE64.encode(wrapped),
        };
        self.kv
            .set(
                &record_key(session_id),
                &serde_json::to_string(&record)?,
                self.ttl,
            )
            .await?;

        tracing::debug!(session_id = %session_id, turns = transcript.len(), "History saved");
        Ok(session_id.to_string())
    }

    /// Fetch, unwrap, decrypt and authenticate. Every failure is fatal.
    pub async fn load(&self, session_id: &str) -> Result<Transcript, HistoryError> {
        let raw = self
            .kv
            .get(&record_key(session_id))
            .await?
            .ok_or_else(|| HistoryError::NotFound(session_id.to_string()))?;

        let record: HistoryRecord = serde_json::from_str(&raw)?;
        let sealed = BASE64
            .decode(&record.ciphertext)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;
        let wrapped = BASE64
            .decode(&record.wrapped_key)
            .map_err(|e| HistoryError::Encoding(e.to_string()))?;

        let data_key = self.wrapper.unwrap(&wrapped).await?;
        let plaintext = envelope::open(&data_key, &sealed)
            .map_err(|e| HistoryError::Decrypt(e.to_string()))?;

        let turns = serde_json::from_slice(&plaintext)?;
        Transcript::from_turns(turns).ok_or_else(|| {
            HistoryError::Encoding("stored transcript does not start with a system turn".into())
        })
    }

    /// Remove the record. Absent records are not an error.
    pub async fn delete(&self, session_id: &str) -> Result<(), HistoryError> {
        self.kv.del(&record_key(session_id)).await?;
        tracing::debug!(session_id = %session_id, "History deleted");
        Ok(())
    }

    /// Drop records whose TTL has passed
    pub async fn purge_expired(&self) -> Result<usize, HistoryError> {
        Ok(self.kv.purge_expired().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Role, ToolCall, Turn};
    use serde_json::json;

    fn store_with_memory() -> (SecureHistoryStore, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let store = SecureHistoryStore::new(
            kv.clone(),
            Arc::new(LocalKeyWrapper::derive_from_secret("test-kek")),
            DEFAULT_TTL,
        );
        (store, kv)
    }

    fn sample() -> Transcript {
        let mut t = Transcript::new("system prompt");
        t.push(Turn::assistant("How was your day?", Vec::new()));
        t.push(Turn::new(Role::Human, "I ran for 30 minutes"));
        t.push(Turn::assistant(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "parseActivities".into(),
                arguments: json!({"activities": [{"name": "Running"}]}),
            }],
        ));
        t.push(Turn::new(Role::System, "parseActivities completed; continue"));
        t
    }

    #[tokio::test]
    async fn load_reproduces_saved_turns() {
        let (store, _) = store_with_memory();
        let transcript = sample();
        assert_eq!(store.save(&transcript, "s1").await.unwrap(), "s1");
        assert_eq!(store.load("s1").await.unwrap(), transcript);
    }

    #[tokio::test]
    async fn record_holds_no_plaintext_and_key_changes_per_save() {
        let (store, kv) = store_with_memory();
        let transcript = sample();
        store.save(&transcript, "s1").await.unwrap();
        let first = kv.get("chist:s1").await.unwrap().unwrap();
        store.save(&transcript, "s1").await.unwrap();
        let second = kv.get("chist:s1").await.unwrap().unwrap();

        assert!(!first.contains("Running"));
        let a: HistoryRecord = serde_json::from_str(&first).unwrap();
        let b: HistoryRecord = serde_json::from_str(&second).unwrap();
        assert_ne!(a.wrapped_key, b.wrapped_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    fn flip_bit(encoded: &str, index: usize) -> String {
        let mut bytes = BASE64.decode(encoded).unwrap();
        let i = index % bytes.len();
        bytes[i] ^= 0x80;
        BASE64.encode(bytes)
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_load() {
        let (store, kv) = store_with_memory();
        store.save(&sample(), "s1").await.unwrap();
        kv.corrupt("chist:s1", |raw| {
            let mut record: HistoryRecord = serde_json::from_str(raw).unwrap();
            record.ciphertext = flip_bit(&record.ciphertext, 40);
            *raw = serde_json::to_string(&record).unwrap();
        });
        assert!(matches!(
            store.load("s1").await,
            Err(HistoryError::Decrypt(_))
        ));
    }

    #[tokio::test]
    async fn tampered_wrapped_key_fails_load() {
        let (store, kv) = store_with_memory();
        store.save(&sample(), "s1").await.unwrap();
        kv.corrupt("chist:s1", |raw| {
            let mut record: HistoryRecord = serde_json::from_str(raw).unwrap();
            record.wrapped_key = flip_bit(&record.wrapped_key, 3);
            *raw = serde_json::to_string(&record).unwrap();
        });
        assert!(matches!(
            store.load("s1").await,
            Err(HistoryError::KeyWrap(_))
        ));
    }

    #[tokio::test]
    async fn missing_record_is_not_found_and_delete_is_idempotent() {
        let (store, _) = store_with_memory();
        assert!(matches!(
            store.load("nope").await,
            Err(HistoryError::NotFound(_))
        ));
        store.save(&sample(), "s1").await.unwrap();
        store.delete("s1").await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(matches!(
            store.load("s1").await,
            Err(HistoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_record_reads_as_missing() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = SecureHistoryStore::new(
            kv,
            Arc::new(LocalKeyWrapper::derive_from_secret("k")),
            Duration::ZERO,
        );
        store.save(&sample(), "s1").await.unwrap();
        assert!(matches!(
            store.load("s1").await,
            Err(HistoryError::NotFound(_))
        ));
    }
}
