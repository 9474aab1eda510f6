use std::{collections::BTreeSet, fmt, sync::Arc};

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::{
    reconciler::Reconciler,
    remote::{RemoteTripCollection, MAX_IN_OPERAND},
};

pub const CHUNK_SIZE: usize = MAX_IN_OPERAND;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sorted: BTreeSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        let mut hasher = Sha256::new();
        for id in &sorted {
            // length prefix keeps ["a,b"] and ["a", "b"] apart
            hasher.update(format!("{}:{id};", id.len()).as_bytes());
        }
        let digest = hasher.finalize();
        let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn chunk_ids<S: AsRef<str>>(ids: &[S]) -> Vec<Vec<String>> {
    let sorted: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();
    let sorted: Vec<String> = sorted.into_iter().map(str::to_string).collect();
    sorted.chunks(CHUNK_SIZE).map(<[String]>::to_vec).collect()
}

pub struct SubscriptionSet {
    key: SubscriptionKey,
    listeners: Vec<JoinHandle<()>>,
}

impl SubscriptionSet {
    pub fn empty() -> Self {
        Self {
            key: SubscriptionKey::from_ids(std::iter::empty::<&str>()),
            listeners: Vec::new(),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn open(
        remote: Arc<dyn RemoteTripCollection>,
        reconciler: Reconciler,
        ids: &[String],
    ) -> Self {
        let key = SubscriptionKey::from_ids(ids);
        let mut listeners = Vec::new();
        for (chunk_no, chunk) in chunk_ids(ids).into_iter().enumerate() {
            let mut stream = match remote.subscribe(chunk).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(chunk = chunk_no, "trip subscription failed: {err}");
                    continue;
                }
            };
            let reconciler = reconciler.clone();
            listeners.push(tokio::spawn(async move {
                while let Some(event) = stream.recv().await {
                    match event {
                        Ok(snapshot) => {
                            reconciler.apply_snapshot(snapshot).await;
                        }
                        Err(err) => {
                            warn!(chunk = chunk_no, "trip subscription error: {err}");
                            break;
                        }
                    }
                }
                debug!(chunk = chunk_no, "trip subscription ended");
            }));
        }
        Self { key, listeners }
    }

    pub fn close(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_order_and_duplicates() {
        let a = SubscriptionKey::from_ids(["t3", "t1", "t2"]);
        let b = SubscriptionKey::from_ids(["t1", "t2", "t3", "t1"]);
        assert_eq!(a, b);
        assert_ne!(a, SubscriptionKey::from_ids(["t1", "t2"]));
    }

    #[test]
    fn key_keeps_ids_with_separators_apart() {
        assert_ne!(
            SubscriptionKey::from_ids(["a,b"]),
            SubscriptionKey::from_ids(["a", "b"])
        );
    }

    #[test]
    fn ids_are_split_into_groups_of_ten() {
        let ids: Vec<String> = (0..23).map(|n| format!("trip-{n:02}")).collect();
        let chunks = chunk_ids(&ids);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks[2].len(), 3);
        assert!(chunk_ids::<String>(&[]).is_empty());
    }
}
