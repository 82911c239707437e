//! Maps extracted mentions to canonical entity ids.
//!
//! Competitions are looked up only; a rejected match leaves the key null.
//! Groups are looked up and, when nothing is close enough, created on the
//! spot so a mentioned group always ends up with an id. A preview resolves
//! the same way but never writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cosdrama_common::{
    CanonicalGroupEntity, EntityKind, ExtractedMentions, IngestError, ResolvedForeignKeys,
};
use cosdrama_store::{EntityMatch, EntityStore, StoreError};

/// Outcome of comparing the best candidate against the threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Accept(EntityMatch),
    Reject { best: Option<EntityMatch> },
}

/// Accept iff `similarity >= threshold`. No candidate or a NaN score rejects.
pub fn decide(best: Option<EntityMatch>, threshold: f64) -> MatchDecision {
    match best {
        Some(m) if !m.similarity.is_nan() && m.similarity >= threshold => MatchDecision::Accept(m),
        best => MatchDecision::Reject { best },
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub fks: ResolvedForeignKeys,
    pub logs: Vec<String>,
    pub errors: Vec<IngestError>,
}

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    threshold: f64,
    timeout: Duration,
}

impl EntityResolver {
    pub fn new(
        store: Arc<dyn EntityStore>,
        threshold: f64,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IngestError::Config(format!(
                "similarity threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self {
            store,
            threshold,
            timeout,
        })
    }

    pub async fn resolve(&self, mentions: &ExtractedMentions) -> Resolution {
        self.run(mentions, true).await
    }

    /// Like `resolve`, but an unmatched group is reported instead of created.
    pub async fn preview(&self, mentions: &ExtractedMentions) -> Resolution {
        self.run(mentions, false).await
    }

    async fn run(&self, mentions: &ExtractedMentions, create_groups: bool) -> Resolution {
        let mut resolution = Resolution::default();

        resolution.fks.competition_id = self
            .resolve_competition(mentions.competition.as_deref(), &mut resolution)
            .await;
        resolution.fks.group_id = self
            .resolve_group(mentions.group.as_deref(), create_groups, &mut resolution)
            .await;

        resolution
    }

    async fn resolve_competition(
        &self,
        mention: Option<&str>,
        out: &mut Resolution,
    ) -> Option<Uuid> {
        let name = present(mention, EntityKind::Competition, out)?;
        let best = self.lookup(EntityKind::Competition, name, out).await.ok()?;

        match decide(best, self.threshold) {
            MatchDecision::Accept(m) => Some(self.accepted(EntityKind::Competition, name, m, out)),
            MatchDecision::Reject { best } => {
                info!(mention = name, best_similarity = ?best.as_ref().map(|b| b.similarity), "Competition unmatched, leaving null");
                out.logs.push(format!(
                    "competition '{name}' unmatched ({}), left null",
                    describe_best(&best)
                ));
                None
            }
        }
    }

    async fn resolve_group(
        &self,
        mention: Option<&str>,
        create: bool,
        out: &mut Resolution,
    ) -> Option<Uuid> {
        let name = present(mention, EntityKind::Group, out)?;
        let best = self.lookup(EntityKind::Group, name, out).await.ok()?;

        match decide(best, self.threshold) {
            MatchDecision::Accept(m) => Some(self.accepted(EntityKind::Group, name, m, out)),
            MatchDecision::Reject { best } if create => {
                out.logs.push(format!(
                    "group '{name}' unmatched ({}), creating",
                    describe_best(&best)
                ));
                self.create_group(name, out).await
            }
            MatchDecision::Reject { best } => {
                info!(mention = name, "Group unmatched, skipping create in dry run");
                out.logs.push(format!(
                    "group '{name}' unmatched ({}), would create",
                    describe_best(&best)
                ));
                None
            }
        }
    }

    async fn lookup(
        &self,
        kind: EntityKind,
        name: &str,
        out: &mut Resolution,
    ) -> Result<Option<EntityMatch>, StoreError> {
        match self.timed("lookup", self.store.find_best_match(kind, name)).await {
            Ok(best) => Ok(best),
            Err(e) => {
                warn!(%kind, mention = name, error = %e, "Entity lookup failed");
                out.logs.push(format!("{kind} lookup for '{name}' failed: {e}"));
                out.errors.push(IngestError::Resolution {
                    kind,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn accepted(&self, kind: EntityKind, name: &str, m: EntityMatch, out: &mut Resolution) -> Uuid {
        debug!(%kind, mention = name, matched = m.name.as_str(), similarity = m.similarity, "Matched entity");
        out.logs.push(format!(
            "{kind} '{name}' matched '{}' (similarity {:.3}) -> {}",
            m.name, m.similarity, m.id
        ));
        m.id
    }

    async fn create_group(&self, name: &str, out: &mut Resolution) -> Option<Uuid> {
        let group = CanonicalGroupEntity::placeholder(name, Utc::now());

        match self.timed("group insert", self.store.insert_group(&group)).await {
            Ok(id) => {
                info!(group = group.name.as_str(), %id, "Created group");
                out.logs.push(format!("created group '{}' -> {id}", group.name));
                Some(id)
            }
            Err(e) => {
                error!(group = group.name.as_str(), error = %e, "Group auto-create failed");
                out.logs
                    .push(format!("creating group '{}' failed: {e}", group.name));
                out.errors.push(IngestError::AutoCreate {
                    name: group.name.clone(),
                    message: e.to_string(),
                });
                None
            }
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = cosdrama_store::Result<T>>,
    ) -> cosdrama_store::Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}

fn present<'a>(mention: Option<&'a str>, kind: EntityKind, out: &mut Resolution) -> Option<&'a str> {
    match mention.map(str::trim).filter(|m| !m.is_empty()) {
        Some(name) => Some(name),
        None => {
            out.logs.push(format!("no {kind} mentioned, skipping"));
            None
        }
    }
}

fn describe_best(best: &Option<EntityMatch>) -> String {
    match best {
        Some(m) => format!("best '{}' at {:.3}", m.name, m.similarity),
        None => "no candidates".to_string(),
    }
}
