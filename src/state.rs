use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    config::AppConfig,
    db::DbPool,
    error::AppError,
    services::{
        ai::AiGateway,
        reconciler::Reconciler,
        remote::RemoteTripCollection,
        storage::StorageService,
        trips::TripStore,
        writer::{SyncWriter, WriteLedger},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: StorageService,
    pub trips: TripStore,
    pub remote: Arc<dyn RemoteTripCollection>,
    pub ai: AiGateway,
}

pub struct SyncTasks {
    pub writer: JoinHandle<()>,
    pub reconciler: JoinHandle<()>,
}

impl SyncTasks {
    pub fn abort(&self) {
        self.reconciler.abort();
        self.writer.abort();
    }
}

impl AppState {
    pub async fn new(
        config: AppConfig,
        db: DbPool,
        remote: Arc<dyn RemoteTripCollection>,
        ai: AiGateway,
    ) -> Result<(Self, SyncTasks), AppError> {
        let storage = StorageService::new(db);
        let ledger = Arc::new(WriteLedger::new(config.client_id.clone()));
        let (writer, writer_task) = SyncWriter::spawn(remote.clone(), ledger.clone());
        let trips = TripStore::load(storage.clone(), ledger, writer).await?;
        let reconciler = Reconciler::new(trips.clone(), remote.clone()).spawn();

        let state = Self {
            config,
            storage,
            trips,
            remote,
            ai,
        };
        Ok((
            state,
            SyncTasks {
                writer: writer_task,
                reconciler,
            },
        ))
    }
}
