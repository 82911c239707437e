use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cosdrama_common::{CanonicalVideoRecord, IngestError};
use cosdrama_store::{EntityStore, UpsertOutcome};

/// Writes composed records, keyed by `bv_number`.
pub struct PersistenceUpserter {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
}

impl PersistenceUpserter {
    pub fn new(store: Arc<dyn EntityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn upsert(&self, record: &CanonicalVideoRecord) -> Result<UpsertOutcome, IngestError> {
        let persistence = |message: String| IngestError::Persistence {
            external_id: record.external_id.clone(),
            message,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.store.upsert_video(record)).await
        {
            Ok(result) => result.map_err(|e| persistence(e.to_string())),
            Err(_) => Err(persistence(format!("upsert timed out after {:?}", self.timeout))),
        };

        match &outcome {
            Ok(o) => info!(external_id = record.external_id.as_str(), outcome = %o, "Upserted video"),
            Err(e) => warn!(external_id = record.external_id.as_str(), error = %e, "Upsert failed"),
        }
        outcome
    }

    /// Literal SQL for the upsert, for display only.
    pub fn describe(&self, record: &CanonicalVideoRecord) -> String {
        self.store.describe_upsert(record)
    }
}
