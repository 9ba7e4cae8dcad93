use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the function store, translated to RPC statuses at the
/// handler layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("function version '{0}' not found")]
    VersionNotFound(String),

    #[error("function alias '{0}' not found")]
    AliasNotFound(String),

    #[error("alias '{id}' cannot transition from {state:?}")]
    AliasState { id: String, state: AliasState },
}

/// A published function version. The CRI pod sandbox maps onto one of
/// these: running a sandbox publishes a version, stopping it stops
/// routing, removing it retires the version.
#[derive(Debug, Clone)]
pub struct FunctionVersion {
    pub id: String,
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
    pub ready: bool,
    pub created_at: i64,
    pub runtime_handler: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Routing state of an alias. Containers map onto aliases: created means
/// the alias exists but routes no traffic, routing is the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasState {
    Created,
    Routing,
    Stopped,
}

/// A function alias pointing at a version. The CRI container maps onto
/// one of these.
#[derive(Debug, Clone)]
pub struct FunctionAlias {
    pub id: String,
    pub version_id: String,
    pub name: String,
    pub attempt: u32,
    pub image: String,
    pub image_ref: String,
    pub state: AliasState,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// A registry image mirrored into the function provider. CRI image pulls
/// map onto mirroring operations.
#[derive(Debug, Clone)]
pub struct MirroredImage {
    pub id: String,
    pub reference: String,
    pub size: u64,
    pub username: String,
    pub pinned: bool,
}

/// In-memory state of the function provider: versions, aliases, and the
/// image mirror. Concurrent maps, no coordination beyond per-entry
/// locking.
#[derive(Debug, Default)]
pub struct FunctionStore {
    versions: DashMap<String, FunctionVersion, ahash::RandomState>,
    aliases: DashMap<String, FunctionAlias, ahash::RandomState>,
    images: DashMap<String, MirroredImage, ahash::RandomState>,
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl FunctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- versions (pod sandboxes) -------------------------------------

    /// Publish a new version and start routing for it.
    pub fn publish_version(
        &self,
        name: String,
        uid: String,
        namespace: String,
        attempt: u32,
        runtime_handler: String,
        labels: HashMap<String, String>,
        annotations: HashMap<String, String>,
    ) -> FunctionVersion {
        let version = FunctionVersion {
            id: Uuid::new_v4().to_string(),
            name,
            uid,
            namespace,
            attempt,
            ready: true,
            created_at: now_nanos(),
            runtime_handler,
            labels,
            annotations,
        };
        self.versions.insert(version.id.clone(), version.clone());
        version
    }

    /// Stop routing for a version and stop its aliases.
    ///
    /// Stopping an already-stopped version is a no-op, not an error.
    pub fn retire_version(&self, id: &str) -> Result<(), StoreError> {
        let mut version = self
            .versions
            .get_mut(id)
            .ok_or_else(|| StoreError::VersionNotFound(id.to_owned()))?;
        version.ready = false;

        for mut alias in self.aliases.iter_mut() {
            if alias.version_id == id && alias.state == AliasState::Routing {
                alias.state = AliasState::Stopped;
                alias.finished_at = now_nanos();
            }
        }
        Ok(())
    }

    /// Delete a version and every alias pointing at it.
    ///
    /// Removing an absent version is a no-op.
    pub fn remove_version(&self, id: &str) {
        self.versions.remove(id);
        self.aliases.retain(|_, alias| alias.version_id != id);
    }

    pub fn get_version(&self, id: &str) -> Result<FunctionVersion, StoreError> {
        self.versions
            .get(id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::VersionNotFound(id.to_owned()))
    }

    pub fn list_versions(&self) -> Vec<FunctionVersion> {
        self.versions.iter().map(|v| v.clone()).collect()
    }

    // -- aliases (containers) -----------------------------------------

    /// Create an alias pointing at an existing version.
    pub fn create_alias(
        &self,
        version_id: &str,
        name: String,
        attempt: u32,
        image: String,
        labels: HashMap<String, String>,
        annotations: HashMap<String, String>,
    ) -> Result<FunctionAlias, StoreError> {
        if !self.versions.contains_key(version_id) {
            return Err(StoreError::VersionNotFound(version_id.to_owned()));
        }

        let image_ref = self
            .images
            .iter()
            .find(|img| img.reference == image)
            .map(|img| img.id.clone())
            .unwrap_or_default();

        let alias = FunctionAlias {
            id: Uuid::new_v4().to_string(),
            version_id: version_id.to_owned(),
            name,
            attempt,
            image,
            image_ref,
            state: AliasState::Created,
            created_at: now_nanos(),
            started_at: 0,
            finished_at: 0,
            exit_code: 0,
            labels,
            annotations,
        };
        self.aliases.insert(alias.id.clone(), alias.clone());
        Ok(alias)
    }

    /// Begin routing traffic through an alias. Only a freshly created
    /// alias can start.
    pub fn start_alias(&self, id: &str) -> Result<(), StoreError> {
        let mut alias = self
            .aliases
            .get_mut(id)
            .ok_or_else(|| StoreError::AliasNotFound(id.to_owned()))?;
        if alias.state != AliasState::Created {
            return Err(StoreError::AliasState {
                id: id.to_owned(),
                state: alias.state,
            });
        }
        alias.state = AliasState::Routing;
        alias.started_at = now_nanos();
        Ok(())
    }

    /// Stop routing through an alias. Stopping a stopped alias is a
    /// no-op.
    pub fn stop_alias(&self, id: &str) -> Result<(), StoreError> {
        let mut alias = self
            .aliases
            .get_mut(id)
            .ok_or_else(|| StoreError::AliasNotFound(id.to_owned()))?;
        if alias.state == AliasState::Routing {
            alias.state = AliasState::Stopped;
            alias.finished_at = now_nanos();
        }
        Ok(())
    }

    /// Delete an alias regardless of state. Absent alias is a no-op.
    pub fn remove_alias(&self, id: &str) {
        self.aliases.remove(id);
    }

    pub fn get_alias(&self, id: &str) -> Result<FunctionAlias, StoreError> {
        self.aliases
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::AliasNotFound(id.to_owned()))
    }

    pub fn list_aliases(&self) -> Vec<FunctionAlias> {
        self.aliases.iter().map(|a| a.clone()).collect()
    }

    // -- images (registry mirror) -------------------------------------

    /// Mirror an image into the provider registry. Mirroring the same
    /// reference twice returns the existing entry.
    pub fn mirror_image(&self, reference: &str, username: String) -> MirroredImage {
        if let Some(existing) = self.find_image(reference) {
            return existing;
        }

        let image = MirroredImage {
            id: format!("sha256:{}", Uuid::new_v4().simple()),
            reference: reference.to_owned(),
            // Stand-in for the mirrored blob size.
            size: 1024 * 1024 + reference.len() as u64 * 4096,
            username,
            pinned: false,
        };
        self.images.insert(image.id.clone(), image.clone());
        image
    }

    /// Look an image up by mirror id or original reference.
    pub fn find_image(&self, key: &str) -> Option<MirroredImage> {
        if let Some(image) = self.images.get(key) {
            return Some(image.clone());
        }
        self.images
            .iter()
            .find(|img| img.reference == key)
            .map(|img| img.clone())
    }

    /// Drop an image from the mirror. Absent image is a no-op.
    pub fn remove_image(&self, key: &str) {
        match self.find_image(key) {
            Some(image) => {
                self.images.remove(&image.id);
            }
            None => {}
        }
    }

    pub fn list_images(&self) -> Vec<MirroredImage> {
        self.images.iter().map(|img| img.clone()).collect()
    }

    /// Total bytes held by the mirror, for filesystem info reporting.
    pub fn mirror_bytes(&self) -> u64 {
        self.images.iter().map(|img| img.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_lifecycle() {
        let store = FunctionStore::new();
        let version = store.publish_version(
            "fn-a".into(),
            "uid-1".into(),
            "default".into(),
            0,
            String::new(),
            HashMap::new(),
            HashMap::new(),
        );
        assert!(version.ready);

        store.retire_version(&version.id).unwrap();
        assert!(!store.get_version(&version.id).unwrap().ready);

        // Retiring twice is fine.
        store.retire_version(&version.id).unwrap();

        store.remove_version(&version.id);
        assert!(store.get_version(&version.id).is_err());

        // Removing twice is fine.
        store.remove_version(&version.id);
    }

    #[test]
    fn test_alias_lifecycle() {
        let store = FunctionStore::new();
        let version = store.publish_version(
            "fn-a".into(),
            "uid-1".into(),
            "default".into(),
            0,
            String::new(),
            HashMap::new(),
            HashMap::new(),
        );

        let alias = store
            .create_alias(
                &version.id,
                "main".into(),
                0,
                "registry/fn-a:1".into(),
                HashMap::new(),
                HashMap::new(),
            )
            .unwrap();
        assert_eq!(alias.state, AliasState::Created);

        store.start_alias(&alias.id).unwrap();
        assert_eq!(store.get_alias(&alias.id).unwrap().state, AliasState::Routing);

        // Double start is a state error.
        assert!(matches!(
            store.start_alias(&alias.id),
            Err(StoreError::AliasState { .. })
        ));

        store.stop_alias(&alias.id).unwrap();
        store.stop_alias(&alias.id).unwrap();
        assert_eq!(store.get_alias(&alias.id).unwrap().state, AliasState::Stopped);
    }

    #[test]
    fn test_alias_requires_version() {
        let store = FunctionStore::new();
        let result = store.create_alias(
            "missing",
            "main".into(),
            0,
            "registry/fn-a:1".into(),
            HashMap::new(),
            HashMap::new(),
        );
        assert!(matches!(result, Err(StoreError::VersionNotFound(_))));
    }

    #[test]
    fn test_retire_version_stops_aliases() {
        let store = FunctionStore::new();
        let version = store.publish_version(
            "fn-a".into(),
            "uid-1".into(),
            "default".into(),
            0,
            String::new(),
            HashMap::new(),
            HashMap::new(),
        );
        let alias = store
            .create_alias(
                &version.id,
                "main".into(),
                0,
                "registry/fn-a:1".into(),
                HashMap::new(),
                HashMap::new(),
            )
            .unwrap();
        store.start_alias(&alias.id).unwrap();

        store.retire_version(&version.id).unwrap();
        assert_eq!(store.get_alias(&alias.id).unwrap().state, AliasState::Stopped);
    }

    #[test]
    fn test_mirror_is_idempotent() {
        let store = FunctionStore::new();
        let first = store.mirror_image("registry/fn-a:1", "user1".into());
        let second = store.mirror_image("registry/fn-a:1", "user1".into());
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_images().len(), 1);

        assert!(store.find_image(&first.id).is_some());
        assert!(store.find_image("registry/fn-a:1").is_some());

        store.remove_image("registry/fn-a:1");
        assert!(store.list_images().is_empty());
        store.remove_image("registry/fn-a:1");
    }
}
