//! Manifest file: the declared objects of every kind.
//!
//! The manifest is applied to the stores as a whole. Objects missing from
//! it get their deletion requested.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::model::dns::DnsZoneSpec;
use crate::model::run::CloudRunSpec;
use crate::model::{Object, ObjectKey};
use crate::store::{ObjectStore, StoreError};

const UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub dns_zones: Vec<ManifestEntry<DnsZoneSpec>>,
    #[serde(default)]
    pub cloud_runs: Vec<ManifestEntry<CloudRunSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry<S> {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub spec: S,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl<S> ManifestEntry<S> {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What one sync changed in a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deletion_requested: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deletion_requested > 0
    }
}

/// Make the store hold exactly the objects in `entries`.
pub async fn sync<St, S, T>(
    store: &St,
    entries: &[ManifestEntry<S>],
) -> Result<SyncReport, StoreError>
where
    St: ObjectStore<S, T> + ?Sized,
    S: Clone + PartialEq + Send + Sync,
    T: Send + Sync,
{
    let mut report = SyncReport::default();
    let mut existing: HashMap<ObjectKey, Object<S, T>> = store
        .list()
        .await?
        .into_iter()
        .map(|o| (o.meta.key.clone(), o))
        .collect();
    let known: HashSet<ObjectKey> = existing.keys().cloned().collect();
    let mut desired: HashSet<ObjectKey> = HashSet::new();

    for entry in entries {
        let key = entry.key();
        if !desired.insert(key.clone()) {
            warn!("Duplicate manifest entry {}, keeping the first", key);
            continue;
        }

        match existing.remove(&key) {
            None => match store.create(key.clone(), entry.spec.clone()).await {
                Ok(_) => {
                    info!("Created {}", key);
                    report.created += 1;
                }
                Err(StoreError::Conflict(_)) => report.unchanged += 1,
                Err(e) => return Err(e),
            },
            Some(object) if object.meta.deletion_requested => {
                warn!("{} is still being deleted, declaring it again later", key);
                report.unchanged += 1;
            }
            Some(object) => {
                if update_spec(store, object, &entry.spec).await? {
                    info!("Updated spec of {}", key);
                    report.updated += 1;
                } else {
                    report.unchanged += 1;
                }
            }
        }
    }

    for key in known.difference(&desired) {
        let already = existing
            .get(key)
            .is_some_and(|o| o.meta.deletion_requested);
        if already {
            continue;
        }
        info!("Pruning {}", key);
        match store.request_deletion(key).await {
            Ok(()) => report.deletion_requested += 1,
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}

/// Write `spec` into `object`, re-reading on concurrent edits.
async fn update_spec<St, S, T>(
    store: &St,
    mut object: Object<S, T>,
    spec: &S,
) -> Result<bool, StoreError>
where
    St: ObjectStore<S, T> + ?Sized,
    S: Clone + PartialEq + Send + Sync,
    T: Send + Sync,
{
    for _ in 0..UPDATE_ATTEMPTS {
        if object.spec == *spec {
            return Ok(false);
        }
        object.spec = spec.clone();
        match store.update(&object).await {
            Ok(_) => return Ok(true),
            Err(e) if e.is_version_mismatch() => match store.get(object.key()).await? {
                Some(fresh) => object = fresh,
                None => return Ok(false),
            },
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Conflict(format!(
        "{} kept changing while its spec was updated",
        object.key()
    )))
}
