use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    models::Trip,
    services::remote::{RemoteTrip, RemoteTripCollection, WriteStamp},
};

#[derive(Debug, Default, Clone, Copy)]
struct TripWrites {
    issued: u64,
    settled: u64,
}

pub struct WriteLedger {
    client_id: String,
    next_op: AtomicU64,
    trips: Mutex<HashMap<String, TripWrites>>,
    settled: Notify,
}

impl WriteLedger {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            next_op: AtomicU64::new(1),
            trips: Mutex::new(HashMap::new()),
            settled: Notify::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn issue(&self, trip_id: &str) -> WriteStamp {
        let op_id = self.next_op.fetch_add(1, Ordering::SeqCst);
        self.trips
            .lock()
            .entry(trip_id.to_string())
            .or_default()
            .issued = op_id;
        WriteStamp {
            origin: self.client_id.clone(),
            op_id,
        }
    }

    pub fn settle(&self, trip_id: &str, op_id: u64) {
        {
            let mut trips = self.trips.lock();
            let entry = trips.entry(trip_id.to_string()).or_default();
            entry.settled = entry.settled.max(op_id);
        }
        self.settled.notify_waiters();
    }

    pub fn in_flight(&self, trip_id: &str) -> bool {
        self.trips
            .lock()
            .get(trip_id)
            .is_some_and(|w| w.issued > w.settled)
    }

    // rejects while a local write is unsettled, and stale echoes of our own writes
    pub fn accepts(&self, doc: &RemoteTrip) -> bool {
        let trips = self.trips.lock();
        let Some(writes) = trips.get(doc.id()) else {
            return true;
        };
        if writes.issued > writes.settled {
            return false;
        }
        match &doc.stamp {
            Some(stamp) if stamp.origin == self.client_id => stamp.op_id >= writes.issued,
            _ => true,
        }
    }

    pub async fn wait_settled(&self, trip_id: &str) {
        loop {
            let notified = self.settled.notified();
            if !self.in_flight(trip_id) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Clone)]
pub struct SyncWriter {
    tx: mpsc::UnboundedSender<RemoteTrip>,
}

impl SyncWriter {
    pub fn spawn(
        remote: Arc<dyn RemoteTripCollection>,
        ledger: Arc<WriteLedger>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteTrip>();
        let handle = tokio::spawn(async move {
            while let Some(doc) = rx.recv().await {
                let trip_id = doc.trip.id.clone();
                let op_id = doc.stamp.as_ref().map(|s| s.op_id).unwrap_or_default();
                match remote.upsert(doc).await {
                    Ok(()) => debug!(trip_id = %trip_id, op_id, "trip write committed"),
                    Err(err) => warn!(trip_id = %trip_id, op_id, "trip write failed: {err}"),
                }
                ledger.settle(&trip_id, op_id);
            }
        });
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, trip: Trip, stamp: WriteStamp) -> Result<(), AppError> {
        self.tx
            .send(RemoteTrip {
                trip,
                stamp: Some(stamp),
            })
            .map_err(|_| AppError::Remote("trip writer has stopped".into()))
    }
}
