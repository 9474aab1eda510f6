use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{error::AppError, models::Trip};

pub const MAX_IN_OPERAND: usize = 10;

const SNAPSHOT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteStamp {
    pub origin: String,
    pub op_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteTrip {
    #[serde(flatten)]
    pub trip: Trip,
    #[serde(rename = "_write", default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<WriteStamp>,
}

impl RemoteTrip {
    pub fn unstamped(trip: Trip) -> Self {
        Self { trip, stamp: None }
    }

    pub fn id(&self) -> &str {
        &self.trip.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct TripSnapshot {
    pub docs: Vec<RemoteTrip>,
    pub has_pending_writes: bool,
}

pub type SnapshotStream = mpsc::Receiver<Result<TripSnapshot, AppError>>;

#[async_trait]
pub trait RemoteTripCollection: Send + Sync {
    async fn upsert(&self, doc: RemoteTrip) -> Result<(), AppError>;

    // dropping the stream ends the subscription
    async fn subscribe(&self, ids: Vec<String>) -> Result<SnapshotStream, AppError>;
}

struct Subscriber {
    ids: HashSet<String>,
    tx: mpsc::Sender<Result<TripSnapshot, AppError>>,
}

#[derive(Default)]
struct MemoryInner {
    docs: HashMap<String, RemoteTrip>,
    subscribers: Vec<Subscriber>,
}

impl MemoryInner {
    fn snapshot_for(&self, ids: &HashSet<String>) -> TripSnapshot {
        let mut docs: Vec<RemoteTrip> = ids
            .iter()
            .filter_map(|id| self.docs.get(id).cloned())
            .collect();
        docs.sort_by(|a, b| a.trip.id.cmp(&b.trip.id));
        TripSnapshot {
            docs,
            has_pending_writes: false,
        }
    }

    fn prune(&mut self) {
        self.subscribers.retain(|sub| !sub.tx.is_closed());
    }
}

#[derive(Clone, Default)]
pub struct MemoryTripCollection {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTripCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, trip_id: &str) -> Option<RemoteTrip> {
        self.inner.lock().docs.get(trip_id).cloned()
    }

    pub fn active_subscriptions(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.prune();
        inner.subscribers.len()
    }

    pub fn subscribed_id_sets(&self) -> Vec<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.prune();
        inner
            .subscribers
            .iter()
            .map(|sub| {
                let mut ids: Vec<String> = sub.ids.iter().cloned().collect();
                ids.sort();
                ids
            })
            .collect()
    }

    pub fn fail_subscriptions(&self, message: &str) {
        let mut inner = self.inner.lock();
        inner.prune();
        for sub in &inner.subscribers {
            let _ = sub.tx.try_send(Err(AppError::Remote(message.to_string())));
        }
    }
}

#[async_trait]
impl RemoteTripCollection for MemoryTripCollection {
    async fn upsert(&self, doc: RemoteTrip) -> Result<(), AppError> {
        if doc.trip.id.trim().is_empty() {
            return Err(AppError::Remote("document id is required".into()));
        }
        let mut inner = self.inner.lock();
        let trip_id = doc.trip.id.clone();
        inner.docs.insert(trip_id.clone(), doc);
        inner.prune();
        for sub in inner.subscribers.iter().filter(|sub| sub.ids.contains(&trip_id)) {
            let snapshot = inner.snapshot_for(&sub.ids);
            if sub.tx.try_send(Ok(snapshot)).is_err() {
                warn!(trip_id = %trip_id, "subscriber is lagging, snapshot dropped");
            }
        }
        debug!(trip_id = %trip_id, "trip document committed");
        Ok(())
    }

    async fn subscribe(&self, ids: Vec<String>) -> Result<SnapshotStream, AppError> {
        if ids.is_empty() {
            return Err(AppError::Remote("subscription needs at least one id".into()));
        }
        if ids.len() > MAX_IN_OPERAND {
            return Err(AppError::Remote(format!(
                "subscription accepts at most {MAX_IN_OPERAND} ids, got {}",
                ids.len()
            )));
        }
        let ids: HashSet<String> = ids.into_iter().collect();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let mut inner = self.inner.lock();
        let initial = inner.snapshot_for(&ids);
        let _ = tx.try_send(Ok(initial));
        inner.subscribers.push(Subscriber { ids, tx });
        Ok(rx)
    }
}
