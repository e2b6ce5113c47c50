#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

pub type Hash = [u8; 32];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: Option<ActorInfo>,
    pub resource: ResourceInfo,
    pub details: Value,
    pub previous_hash: Hash,
    pub hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEventType {
    PermissionRegistered {
        code: String,
        category: String,
    },
    PermissionDeactivated {
        code: String,
    },
    RoleCreated {
        role_id: String,
    },
    RoleDeactivated {
        role_id: String,
    },
    InheritanceLinked {
        child: String,
        parent: String,
        mode: String,
    },
    InheritanceUnlinked {
        child: String,
        parent: String,
    },
    GrantIssued {
        grant_id: String,
        role_id: String,
        permission: String,
        effect: String,
        scope: String,
    },
    GrantRevoked {
        grant_id: String,
        revoked_by: String,
    },
    DependencyAdded {
        permission: String,
        requires: String,
    },
    PermissionsResolved {
        role_id: String,
        scope: String,
        entry_count: usize,
        evaluation_time_us: u64,
    },
    AccessChecked {
        role_id: String,
        permission: String,
        scope: String,
        granted: bool,
    },
    ConflictsDetected {
        role_id: String,
        scope: String,
        conflict_count: usize,
    },
    ModelLoaded {
        permissions: usize,
        roles: usize,
        grants: usize,
    },
    SystemStarted {
        version: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorInfo {
    pub actor_type: ActorType,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActorType {
    User,
    Service,
    System,
}

impl ActorInfo {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            id: id.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: "palisade".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceInfo {
    pub fn permission(code: &str) -> Self {
        Self {
            resource_type: "permission".into(),
            resource_id: code.into(),
        }
    }

    pub fn role(id: &str) -> Self {
        Self {
            resource_type: "role".into(),
            resource_id: id.into(),
        }
    }

    pub fn grant(id: &str) -> Self {
        Self {
            resource_type: "grant".into(),
            resource_id: id.into(),
        }
    }

    pub fn system() -> Self {
        Self {
            resource_type: "system".into(),
            resource_id: "palisade".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChainVerification {
    Valid {
        events_checked: usize,
        last_sequence: u64,
    },
    Broken {
        at_sequence: u64,
        expected: Hash,
        found: Hash,
    },
    Tampered {
        at_sequence: u64,
    },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub resource_id: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub actor_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<()>;
    async fn get_event(&self, sequence: u64) -> Result<AuditEvent>;
    async fn get_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>>;
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>>;
    async fn get_latest_sequence(&self) -> Result<u64>;
    async fn get_latest_hash(&self) -> Result<Hash>;
}

pub struct AuditLog<S: AuditStore> {
    store: S,
    sequence: AtomicU64,
    last_hash: RwLock<Hash>,
    record_mutex: Mutex<()>,
}

impl<S: AuditStore> AuditLog<S> {
    pub async fn new(store: S) -> Result<Self> {
        let sequence = store.get_latest_sequence().await.unwrap_or(0);
        let last_hash = store.get_latest_hash().await.unwrap_or([0u8; 32]);

        Ok(Self {
            store,
            sequence: AtomicU64::new(sequence),
            last_hash: RwLock::new(last_hash),
            record_mutex: Mutex::new(()),
        })
    }

    pub async fn record(
        &self,
        event_type: AuditEventType,
        actor: Option<ActorInfo>,
        resource: ResourceInfo,
        details: Value,
    ) -> Result<EventId> {
        let _guard = self.record_mutex.lock().await;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let previous_hash = *self.last_hash.read().await;

        let mut event = AuditEvent {
            id: EventId::new(),
            sequence,
            timestamp: Utc::now(),
            event_type,
            actor,
            resource,
            details,
            previous_hash,
            hash: [0u8; 32],
        };

        event.hash = self.compute_hash(&event)?;

        self.store.append(&event).await?;

        *self.last_hash.write().await = event.hash;

        Ok(event.id)
    }

    fn compute_hash(&self, event: &AuditEvent) -> Result<Hash> {
        let mut hasher = Sha256::new();

        hasher.update(event.id.as_bytes());
        hasher.update(event.sequence.to_le_bytes());
        hasher.update(event.timestamp.to_rfc3339().as_bytes());
        let event_type_bytes = serde_json::to_vec(&event.event_type)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        hasher.update(&event_type_bytes);
        hasher.update(event.previous_hash);

        Ok(hasher.finalize().into())
    }

    pub async fn verify_chain(&self, from_sequence: u64) -> Result<ChainVerification> {
        let latest = self.store.get_latest_sequence().await?;
        let events = self.store.get_range(from_sequence, latest).await?;

        if events.is_empty() {
            return Ok(ChainVerification::Valid {
                events_checked: 0,
                last_sequence: from_sequence.saturating_sub(1),
            });
        }

        let mut expected_hash = if from_sequence > 1 {
            self.store.get_event(from_sequence - 1).await?.hash
        } else {
            [0u8; 32]
        };

        for event in &events {
            if event.previous_hash != expected_hash {
                return Ok(ChainVerification::Broken {
                    at_sequence: event.sequence,
                    expected: expected_hash,
                    found: event.previous_hash,
                });
            }

            let computed = self.compute_hash(event)?;
            if computed != event.hash {
                return Ok(ChainVerification::Tampered {
                    at_sequence: event.sequence,
                });
            }

            expected_hash = event.hash;
        }

        Ok(ChainVerification::Valid {
            events_checked: events.len(),
            last_sequence: events.last().map(|e| e.sequence).unwrap_or(0),
        })
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        self.store.query(query).await
    }

    pub async fn get_latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

pub struct InMemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn get_event(&self, sequence: u64) -> Result<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .find(|e| e.sequence == sequence)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("audit event {}", sequence)))
    }

    async fn get_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.sequence >= from && e.sequence <= to)
            .cloned()
            .collect())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let mut results: Vec<_> = events
            .iter()
            .filter(|e| {
                if let Some(ref from) = query.from_time {
                    if e.timestamp < *from {
                        return false;
                    }
                }
                if let Some(ref to) = query.to_time {
                    if e.timestamp > *to {
                        return false;
                    }
                }
                if let Some(ref resource_id) = query.resource_id {
                    if e.resource.resource_id != *resource_id {
                        return false;
                    }
                }
                if let Some(ref actor_id) = query.actor_id {
                    match e.actor {
                        Some(ref actor) if actor.id == *actor_id => {}
                        _ => return false,
                    }
                }
                if let Some(ref event_types) = query.event_types {
                    let name = serde_json::to_value(&e.event_type)
                        .ok()
                        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(String::from)));
                    match name {
                        Some(name) if event_types.contains(&name) => {}
                        _ => return false,
                    }
                }
                true
            })
            .cloned()
            .collect();

        if let Some(offset) = query.offset {
            results = results.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn get_latest_sequence(&self) -> Result<u64> {
        Ok(self
            .events
            .read()
            .await
            .last()
            .map(|e| e.sequence)
            .unwrap_or(0))
    }

    async fn get_latest_hash(&self) -> Result<Hash> {
        Ok(self
            .events
            .read()
            .await
            .last()
            .map(|e| e.hash)
            .unwrap_or([0u8; 32]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new(InMemoryAuditStore::new()).await.unwrap();

        log.record(
            AuditEventType::SystemStarted {
                version: "0.4.2".into(),
            },
            None,
            ResourceInfo::system(),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        log.record(
            AuditEventType::GrantIssued {
                grant_id: "g-1".into(),
                role_id: "manager".into(),
                permission: "budget:read".into(),
                effect: "ALLOW".into(),
                scope: "org:acme".into(),
            },
            Some(ActorInfo::user("admin")),
            ResourceInfo::grant("g-1"),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let verification = log.verify_chain(1).await.unwrap();
        assert!(matches!(
            verification,
            ChainVerification::Valid {
                events_checked: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_query_by_resource_and_type() {
        let log = AuditLog::new(InMemoryAuditStore::new()).await.unwrap();

        log.record(
            AuditEventType::RoleCreated {
                role_id: "manager".into(),
            },
            Some(ActorInfo::user("admin")),
            ResourceInfo::role("manager"),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        log.record(
            AuditEventType::RoleCreated {
                role_id: "clerk".into(),
            },
            Some(ActorInfo::user("admin")),
            ResourceInfo::role("clerk"),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        log.record(
            AuditEventType::RoleDeactivated {
                role_id: "clerk".into(),
            },
            Some(ActorInfo::user("root")),
            ResourceInfo::role("clerk"),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let results = log
            .query(&AuditQuery {
                resource_id: Some("clerk".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        let results = log
            .query(&AuditQuery {
                resource_id: Some("clerk".into()),
                event_types: Some(vec!["RoleDeactivated".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        let results = log
            .query(&AuditQuery {
                actor_id: Some("root".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_tamper_detected() {
        let store = InMemoryAuditStore::new();
        let log = AuditLog::new(store).await.unwrap();

        log.record(
            AuditEventType::SystemStarted {
                version: "0.4.2".into(),
            },
            None,
            ResourceInfo::system(),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        // Reach in and flip the stored event's type.
        {
            let mut events = log.store.events.write().await;
            events[0].event_type = AuditEventType::RoleCreated {
                role_id: "forged".into(),
            };
        }

        let verification = log.verify_chain(1).await.unwrap();
        assert!(matches!(
            verification,
            ChainVerification::Tampered { at_sequence: 1 }
        ));
    }
}
