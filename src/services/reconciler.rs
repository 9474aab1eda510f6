use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    models::Trip,
    services::{
        remote::{RemoteTrip, RemoteTripCollection, TripSnapshot},
        subscriptions::{SubscriptionKey, SubscriptionSet},
        trips::TripStore,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    IgnoredPendingWrite,
    Unchanged,
    Replaced(Vec<String>),
}

pub fn merge_trips(
    local: &mut [Trip],
    docs: &[RemoteTrip],
    accepts: impl Fn(&RemoteTrip) -> bool,
) -> Vec<String> {
    let mut replaced = Vec::new();
    for doc in docs {
        let Some(current) = local.iter_mut().find(|t| t.id == doc.trip.id) else {
            continue;
        };
        if *current == doc.trip || !accepts(doc) {
            continue;
        }
        *current = doc.trip.clone();
        replaced.push(doc.trip.id.clone());
    }
    replaced
}

#[derive(Clone)]
pub struct Reconciler {
    store: TripStore,
    remote: Arc<dyn RemoteTripCollection>,
}

impl Reconciler {
    pub fn new(store: TripStore, remote: Arc<dyn RemoteTripCollection>) -> Self {
        Self { store, remote }
    }

    pub async fn apply_snapshot(&self, snapshot: TripSnapshot) -> ReconcileOutcome {
        if snapshot.has_pending_writes {
            debug!(docs = snapshot.docs.len(), "ignoring snapshot of a pending local write");
            return ReconcileOutcome::IgnoredPendingWrite;
        }
        let replaced = self.store.absorb_remote(&snapshot.docs).await;
        if replaced.is_empty() {
            return ReconcileOutcome::Unchanged;
        }
        info!(trips = ?replaced, "local trips replaced by remote documents");
        ReconcileOutcome::Replaced(replaced)
    }

    pub async fn resubscribe(&self, current: &mut SubscriptionSet, ids: &[String]) -> bool {
        if *current.key() == SubscriptionKey::from_ids(ids) {
            return false;
        }
        current.close();
        *current = SubscriptionSet::open(self.remote.clone(), self.clone(), ids).await;
        debug!(key = %current.key(), chunks = current.len(), "trip subscriptions opened");
        true
    }

    pub async fn run(self) {
        let mut trips = self.store.subscribe();
        let mut subscriptions = SubscriptionSet::empty();
        loop {
            let ids: Vec<String> = trips.borrow_and_update().iter().map(|t| t.id.clone()).collect();
            self.resubscribe(&mut subscriptions, &ids).await;
            if trips.changed().await.is_err() {
                break;
            }
        }
        subscriptions.close();
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::models::{Currency, ExpenseItem, Member};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn trip(id: &str) -> Trip {
        let mut trip = Trip::new("Osaka", day(1), day(5), Currency::Twd, Member::new("Aki", "1234"));
        trip.id = id.into();
        trip
    }

    #[test]
    fn equal_documents_do_not_replace_anything() {
        let mut local = vec![trip("t1")];
        let docs = vec![RemoteTrip::unstamped(local[0].clone())];
        assert!(merge_trips(&mut local, &docs, |_| true).is_empty());
    }

    #[test]
    fn differing_document_replaces_the_whole_trip() {
        let mut local = vec![trip("t1"), trip("t2")];
        let mut remote = local[0].clone();
        remote.dest = "Kyoto".into();
        remote
            .expenses
            .push(ExpenseItem::new(day(2), "Taxi", 1200.0, Currency::Jpy));
        remote.extra.insert("coverImage".into(), json!("kyoto.jpg"));

        let replaced = merge_trips(&mut local, &[RemoteTrip::unstamped(remote.clone())], |_| true);

        assert_eq!(replaced, vec!["t1".to_string()]);
        assert_eq!(local[0], remote);
        assert_eq!(local[1], trip("t2"));
    }

    #[test]
    fn unknown_remote_trips_are_ignored_and_local_ones_kept() {
        let mut local = vec![trip("t1")];
        let replaced = merge_trips(&mut local, &[RemoteTrip::unstamped(trip("t9"))], |_| true);
        assert!(replaced.is_empty());
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, "t1");
    }

    #[test]
    fn rejected_documents_leave_local_state_alone() {
        let mut local = vec![trip("t1")];
        let mut remote = local[0].clone();
        remote.dest = "Nara".into();
        let replaced = merge_trips(&mut local, &[RemoteTrip::unstamped(remote)], |_| false);
        assert!(replaced.is_empty());
        assert_eq!(local[0].dest, "Osaka");
    }
}
