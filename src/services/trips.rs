use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::verify_member_pin,
    error::AppError,
    models::{Member, ScheduleItem, Tab, Trip, TripEntry, UiState},
    services::{
        reconciler::merge_trips,
        remote::{RemoteTrip, WriteStamp},
        storage::StorageService,
        writer::{SyncWriter, WriteLedger},
    },
};

struct TripStoreInner {
    trips: watch::Sender<Vec<Trip>>,
    ui: watch::Sender<UiState>,
    storage: StorageService,
    ledger: Arc<WriteLedger>,
    writer: SyncWriter,
    // held across snapshot and save so an older snapshot never lands last
    persist_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct TripStore {
    inner: Arc<TripStoreInner>,
}

impl TripStore {
    pub async fn load(
        storage: StorageService,
        ledger: Arc<WriteLedger>,
        writer: SyncWriter,
    ) -> Result<Self, AppError> {
        let trips = storage.load_trips().await?;
        let ui = storage.load_ui_state().await?;
        debug!(count = trips.len(), "trip collection loaded");
        Ok(Self {
            inner: Arc::new(TripStoreInner {
                trips: watch::channel(trips).0,
                ui: watch::channel(ui).0,
                storage,
                ledger,
                writer,
                persist_lock: Mutex::new(()),
            }),
        })
    }

    pub fn ledger(&self) -> &Arc<WriteLedger> {
        &self.inner.ledger
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Trip>> {
        self.inner.trips.subscribe()
    }

    pub fn trips(&self) -> Vec<Trip> {
        self.inner.trips.borrow().clone()
    }

    pub fn trip(&self, trip_id: &str) -> Option<Trip> {
        self.inner
            .trips
            .borrow()
            .iter()
            .find(|t| t.id == trip_id)
            .cloned()
    }

    pub fn trip_ids(&self) -> Vec<String> {
        self.inner.trips.borrow().iter().map(|t| t.id.clone()).collect()
    }

    pub fn ui_state(&self) -> UiState {
        self.inner.ui.borrow().clone()
    }

    pub async fn create_trip(&self, trip: Trip) -> Result<Trip, AppError> {
        trip.validate()?;
        let ledger = &self.inner.ledger;
        let mut outcome = Ok(None);
        self.inner.trips.send_if_modified(|trips| {
            if trips.iter().any(|t| t.id == trip.id) {
                outcome = Err(AppError::BadRequest(format!("trip {} already exists", trip.id)));
                return false;
            }
            let stamp = ledger.issue(&trip.id);
            trips.push(trip.clone());
            outcome = Ok(Some(stamp));
            true
        });
        if let Some(stamp) = outcome? {
            self.commit(None, trip.clone(), stamp).await?;
        }
        Ok(trip)
    }

    pub async fn update_trip(&self, trip: Trip) -> Result<Trip, AppError> {
        trip.validate()?;
        let trip_id = trip.id.clone();
        self.mutate_trip(&trip_id, move |current| {
            check_replacement(current, &trip)?;
            *current = trip;
            Ok(current.clone())
        })
        .await
    }

    // local only, the remote document is left alone
    pub async fn delete_trip(&self, trip_id: &str) -> Result<(), AppError> {
        let mut found = false;
        self.inner.trips.send_if_modified(|trips| {
            let before = trips.len();
            trips.retain(|t| t.id != trip_id);
            found = trips.len() != before;
            found
        });
        if !found {
            return Err(AppError::NotFound);
        }
        self.persist().await?;
        let cleared = self.inner.ui.send_if_modified(|ui| {
            if ui.current_trip_id.as_deref() == Some(trip_id) {
                ui.current_trip_id = None;
                true
            } else {
                false
            }
        });
        if cleared {
            self.persist_ui().await?;
        }
        Ok(())
    }

    pub async fn add_entry<T: TripEntry>(&self, trip_id: &str, mut entry: T) -> Result<T, AppError> {
        entry.validate()?;
        if entry.id().trim().is_empty() {
            entry.set_id(Uuid::new_v4().to_string());
        }
        self.mutate_trip(trip_id, move |trip| {
            warn_out_of_range(trip, &entry);
            if T::entries(trip).iter().any(|e| e.id() == entry.id()) {
                return Err(AppError::BadRequest(format!(
                    "{}: id {} already exists",
                    T::COLLECTION,
                    entry.id()
                )));
            }
            T::entries_mut(trip).push(entry.clone());
            Ok(entry)
        })
        .await
    }

    pub async fn update_entry<T: TripEntry>(&self, trip_id: &str, entry: T) -> Result<T, AppError> {
        entry.validate()?;
        self.mutate_trip(trip_id, move |trip| {
            warn_out_of_range(trip, &entry);
            let slot = T::entries_mut(trip)
                .iter_mut()
                .find(|e| e.id() == entry.id())
                .ok_or(AppError::NotFound)?;
            *slot = entry.clone();
            Ok(entry)
        })
        .await
    }

    pub async fn delete_entry<T: TripEntry>(&self, trip_id: &str, entry_id: &str) -> Result<(), AppError> {
        self.mutate_trip(trip_id, |trip| {
            let entries = T::entries_mut(trip);
            let before = entries.len();
            entries.retain(|e| e.id() != entry_id);
            if entries.len() == before {
                return Err(AppError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn toggle_completed(&self, trip_id: &str, item_id: &str) -> Result<bool, AppError> {
        self.mutate_trip(trip_id, |trip| {
            let item = find_item(trip, item_id)?;
            item.is_completed = !item.is_completed;
            Ok(item.is_completed)
        })
        .await
    }

    pub async fn set_transport_suggestion(
        &self,
        trip_id: &str,
        item_id: &str,
        suggestion: String,
    ) -> Result<(), AppError> {
        self.mutate_trip(trip_id, move |trip| {
            let item = find_item(trip, item_id)?;
            item.transport_suggestion = Some(suggestion);
            Ok(())
        })
        .await
    }

    pub async fn add_member(&self, trip_id: &str, mut member: Member) -> Result<Member, AppError> {
        member.validate()?;
        if member.id.trim().is_empty() {
            member.id = Uuid::new_v4().to_string();
        }
        self.mutate_trip(trip_id, move |trip| {
            if trip.member(&member.id).is_some() {
                return Err(AppError::BadRequest(format!("member {} already exists", member.id)));
            }
            trip.members.push(member.clone());
            Ok(member)
        })
        .await
    }

    pub async fn remove_member(&self, trip_id: &str, member_id: &str, pin: &str) -> Result<(), AppError> {
        self.mutate_trip(trip_id, |trip| {
            let member = trip.member(member_id).ok_or(AppError::NotFound)?;
            verify_member_pin(member, pin)?;
            if trip.members.len() == 1 {
                return Err(AppError::BadRequest("a trip needs at least one member".into()));
            }
            trip.members.retain(|m| m.id != member_id);
            Ok(())
        })
        .await
    }

    pub async fn set_current_trip(&self, trip_id: Option<String>) -> Result<UiState, AppError> {
        if let Some(id) = trip_id.as_deref() {
            if self.trip(id).is_none() {
                return Err(AppError::NotFound);
            }
        }
        self.inner.ui.send_modify(|ui| ui.current_trip_id = trip_id);
        self.persist_ui().await?;
        Ok(self.ui_state())
    }

    pub async fn set_active_tab(&self, tab: Tab) -> Result<UiState, AppError> {
        self.inner.ui.send_modify(|ui| ui.active_tab = tab);
        self.persist_ui().await?;
        Ok(self.ui_state())
    }

    pub async fn absorb_remote(&self, docs: &[RemoteTrip]) -> Vec<String> {
        let ledger = &self.inner.ledger;
        let mut replaced = Vec::new();
        self.inner.trips.send_if_modified(|trips| {
            replaced = merge_trips(trips, docs, |doc| ledger.accepts(doc));
            !replaced.is_empty()
        });
        if !replaced.is_empty() {
            if let Err(err) = self.persist().await {
                warn!("merged remote trips could not be persisted: {err}");
            }
        }
        replaced
    }

    async fn mutate_trip<R>(
        &self,
        trip_id: &str,
        apply: impl FnOnce(&mut Trip) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let ledger = &self.inner.ledger;
        let mut outcome: Option<Result<R, AppError>> = None;
        let mut changed = None;
        self.inner.trips.send_if_modified(|trips| {
            let Some(current) = trips.iter_mut().find(|t| t.id == trip_id) else {
                outcome = Some(Err(AppError::NotFound));
                return false;
            };
            let mut draft = current.clone();
            match apply(&mut draft) {
                Ok(value) => {
                    outcome = Some(Ok(value));
                    if draft == *current {
                        return false;
                    }
                    let stamp = ledger.issue(trip_id);
                    let previous = std::mem::replace(current, draft.clone());
                    changed = Some((previous, draft, stamp));
                    true
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    false
                }
            }
        });
        let value = outcome.unwrap_or(Err(AppError::NotFound))?;
        if let Some((previous, trip, stamp)) = changed {
            self.commit(Some(previous), trip, stamp).await?;
        }
        Ok(value)
    }

    async fn commit(
        &self,
        previous: Option<Trip>,
        trip: Trip,
        stamp: WriteStamp,
    ) -> Result<(), AppError> {
        let trip_id = trip.id.clone();
        let op_id = stamp.op_id;
        if let Err(err) = self.persist().await {
            self.roll_back(&trip, previous);
            self.inner.ledger.settle(&trip_id, op_id);
            warn!(trip_id = %trip_id, "trip change not saved, rolled back: {err}");
            return Err(err);
        }
        if let Err(err) = self.inner.writer.enqueue(trip, stamp) {
            self.inner.ledger.settle(&trip_id, op_id);
            warn!(trip_id = %trip_id, "trip write not queued: {err}");
        }
        Ok(())
    }

    // Restore `previous` unless another change already replaced `applied`.
    fn roll_back(&self, applied: &Trip, previous: Option<Trip>) {
        self.inner.trips.send_if_modified(|trips| {
            let Some(pos) = trips.iter().position(|t| t.id == applied.id) else {
                return false;
            };
            if trips[pos] != *applied {
                return false;
            }
            match previous {
                Some(previous) => trips[pos] = previous,
                None => {
                    trips.remove(pos);
                }
            }
            true
        });
    }

    async fn persist(&self) -> Result<(), AppError> {
        let _guard = self.inner.persist_lock.lock().await;
        let trips = self.trips();
        self.inner.storage.save_trips(&trips).await
    }

    async fn persist_ui(&self) -> Result<(), AppError> {
        let _guard = self.inner.persist_lock.lock().await;
        let ui = self.ui_state();
        self.inner.storage.save_ui_state(&ui).await
    }
}

// Members leave only through `remove_member`, and PINs are not editable here.
fn check_replacement(current: &Trip, next: &Trip) -> Result<(), AppError> {
    for member in &current.members {
        let Some(kept) = next.member(&member.id) else {
            return Err(AppError::BadRequest(format!(
                "member {} can only be removed with their PIN",
                member.id
            )));
        };
        if kept.pin != member.pin {
            return Err(AppError::BadRequest(format!(
                "PIN of member {} cannot be changed",
                member.id
            )));
        }
    }
    if !current.pin.is_empty() && next.pin != current.pin {
        return Err(AppError::BadRequest("trip PIN cannot be changed".into()));
    }
    Ok(())
}

fn find_item<'a>(trip: &'a mut Trip, item_id: &str) -> Result<&'a mut ScheduleItem, AppError> {
    trip.items
        .iter_mut()
        .find(|item| item.id == item_id)
        .ok_or(AppError::NotFound)
}

fn warn_out_of_range<T: TripEntry>(trip: &Trip, entry: &T) {
    if let Some(day) = entry.day().filter(|day| !trip.contains_date(*day)) {
        warn!(
            trip_id = %trip.id,
            entry_id = %entry.id(),
            date = %day,
            "schedule entry falls outside the trip dates"
        );
    }
}
