use thiserror::Error;

use crate::types::EntityKind;

/// Everything that can go wrong while ingesting videos.
///
/// Stage functions absorb the soft variants into an item's trace; only
/// `Discovery` escapes a batch run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Discovery error: {message}")]
    Discovery { message: String, retryable: bool },

    #[error("Video not found: {0}")]
    DetailNotFound(String),

    #[error("Detail fetch failed for {external_id}: {message}")]
    DetailFetch {
        external_id: String,
        message: String,
    },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Resolution error ({kind}): {message}")]
    Resolution { kind: EntityKind, message: String },

    #[error("Auto-create of group '{name}' failed: {message}")]
    AutoCreate { name: String, message: String },

    #[error("Persistence failed for {external_id}: {message}")]
    Persistence {
        external_id: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Whether this error stops the item it occurred in.
    pub fn is_fatal_to_item(&self) -> bool {
        matches!(
            self,
            IngestError::Discovery { .. }
                | IngestError::DetailNotFound(_)
                | IngestError::DetailFetch { .. }
                | IngestError::Persistence { .. }
                | IngestError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_detail_and_persistence_failures_stop_an_item() {
        let soft = [
            IngestError::Extraction("timeout".into()),
            IngestError::Resolution {
                kind: EntityKind::Group,
                message: "pool closed".into(),
            },
            IngestError::AutoCreate {
                name: "x".into(),
                message: "unique violation".into(),
            },
        ];
        for e in &soft {
            assert!(!e.is_fatal_to_item(), "{e}");
        }

        assert!(IngestError::DetailNotFound("BV1".into()).is_fatal_to_item());
        assert!(IngestError::Persistence {
            external_id: "BV1".into(),
            message: "deadlock".into()
        }
        .is_fatal_to_item());
    }

    #[test]
    fn messages_name_the_entity_kind() {
        let e = IngestError::Resolution {
            kind: EntityKind::Competition,
            message: "boom".into(),
        };
        assert_eq!(e.to_string(), "Resolution error (competition): boom");
    }
}
