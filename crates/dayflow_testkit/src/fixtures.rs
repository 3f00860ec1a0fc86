//! Simulated devices sharing one backend.
//!
//! A [`TestDevice`] is a complete client: local stores for every kind, a
//! remote connection with its own credential, an auth layer and a started
//! [`ClientRuntime`].

use dayflow_core::{DeviceId, EntityKind, UserId};
use dayflow_remote::{MemoryRemote, RemoteClient};
use dayflow_store::{FileStore, LocalStore, MemoryStore, StoreResult};
use dayflow_sync_engine::{
    AuthFacade, ClientRuntime, KindTable, MemoryAuth, SessionConfig, SessionCoordinator,
    SessionState, SyncConfig, SyncEngine,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Where a device keeps its local data.
#[derive(Debug, Clone)]
pub enum LocalBackend {
    /// In-memory stores.
    Memory,
    /// JSON files under the given directory.
    Files(PathBuf),
}

/// Builder for [`TestDevice`].
#[derive(Debug)]
pub struct DeviceBuilder {
    remote: MemoryRemote,
    name: String,
    sync: SyncConfig,
    session: SessionConfig,
    backend: LocalBackend,
    kinds: Vec<EntityKind>,
}

impl DeviceBuilder {
    /// Starts a device called `name` on `remote`.
    pub fn new(remote: &MemoryRemote, name: impl Into<String>) -> Self {
        Self {
            remote: remote.clone(),
            name: name.into(),
            sync: SyncConfig::default(),
            session: SessionConfig::default(),
            backend: LocalBackend::Memory,
            kinds: EntityKind::ALL.to_vec(),
        }
    }

    /// Sets the engine configuration.
    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync = config;
        self
    }

    /// Sets the session configuration.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Keeps local data in files under `dir`.
    pub fn with_files(mut self, dir: impl AsRef<Path>) -> Self {
        self.backend = LocalBackend::Files(dir.as_ref().to_path_buf());
        self
    }

    /// Limits the device to the given kinds.
    pub fn with_kinds(mut self, kinds: &[EntityKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Builds the device and starts its runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> StoreResult<TestDevice> {
        let client = self.remote.connect(DeviceId::new(self.name.clone()));
        let (table, memory) = self.kind_table(&client)?;

        let auth = Arc::new(MemoryAuth::new());
        let engine = SyncEngine::new(self.sync, table);
        let session =
            SessionCoordinator::new(Arc::new(client.clone()), auth.clone(), self.session);
        let runtime = ClientRuntime::new(engine, session, auth.clone());
        runtime.start();

        Ok(TestDevice {
            name: self.name,
            client,
            auth,
            runtime,
            memory,
        })
    }

    /// Builds a bare engine with no session or auth layer attached.
    ///
    /// Several bare engines can sync the same account at once, which the
    /// session protocol would otherwise forbid.
    pub fn build_engine(self) -> StoreResult<(SyncEngine, RemoteClient)> {
        let client = self.remote.connect(DeviceId::new(self.name.clone()));
        let (table, _) = self.kind_table(&client)?;
        Ok((SyncEngine::new(self.sync, table), client))
    }

    fn kind_table(
        &self,
        client: &RemoteClient,
    ) -> StoreResult<(KindTable, BTreeMap<EntityKind, Arc<MemoryStore>>)> {
        let mut table = KindTable::new();
        let mut memory = BTreeMap::new();
        for &kind in &self.kinds {
            let local: Arc<dyn LocalStore> = match &self.backend {
                LocalBackend::Memory => {
                    let store = Arc::new(MemoryStore::new(kind));
                    memory.insert(kind, Arc::clone(&store));
                    store
                }
                LocalBackend::Files(dir) => Arc::new(FileStore::open(dir, kind)?),
            };
            // Both sides are built for the same kind.
            let _ = table.insert(local, Arc::new(client.collection(kind)));
        }
        Ok((table, memory))
    }
}

/// One simulated client device.
#[derive(Debug)]
pub struct TestDevice {
    name: String,
    client: RemoteClient,
    auth: Arc<MemoryAuth>,
    runtime: ClientRuntime,
    memory: BTreeMap<EntityKind, Arc<MemoryStore>>,
}

impl TestDevice {
    /// Builds an in-memory device with default configuration.
    pub fn new(remote: &MemoryRemote, name: &str) -> Self {
        DeviceBuilder::new(remote, name)
            .build()
            .expect("Failed to build in-memory device")
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the remote connection.
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    /// Returns the auth layer.
    pub fn auth(&self) -> &MemoryAuth {
        &self.auth
    }

    /// Returns the runtime.
    pub fn runtime(&self) -> &ClientRuntime {
        &self.runtime
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine {
        self.runtime.engine()
    }

    /// Returns the session coordinator.
    pub fn session(&self) -> &SessionCoordinator {
        self.runtime.session()
    }

    /// Returns the in-memory store for `kind`, if the device uses them.
    pub fn memory_store(&self, kind: EntityKind) -> Option<&MemoryStore> {
        self.memory.get(&kind).map(Arc::as_ref)
    }

    /// Signs `user` in on this device.
    pub fn sign_in(&self, user: &UserId) {
        self.auth.sign_in(user.clone());
    }

    /// Signs the current user out of this device.
    pub async fn sign_out(&self) {
        // MemoryAuth never fails to sign out.
        let _ = self.auth.sign_out().await;
    }

    /// Returns true if this device owns the account.
    pub fn is_active(&self) -> bool {
        self.session().state() == SessionState::Active
    }

    /// Takes the device off the network, or back on.
    pub fn set_offline(&self, offline: bool) {
        self.client.set_offline(offline);
    }
}

/// A device whose local files live in a temporary directory.
#[derive(Debug)]
pub struct FileDevice {
    /// The device.
    pub device: TestDevice,
    dir: TempDir,
}

impl FileDevice {
    /// Builds a file-backed device in a fresh temporary directory.
    pub fn new(remote: &MemoryRemote, name: &str) -> StoreResult<Self> {
        let dir = TempDir::new()?;
        let device = DeviceBuilder::new(remote, name).with_files(dir.path()).build()?;
        Ok(Self { device, dir })
    }

    /// Returns the data directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl std::ops::Deref for FileDevice {
    type Target = TestDevice;

    fn deref(&self) -> &TestDevice {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn device_signs_in_and_syncs() {
        let remote = MemoryRemote::default();
        let device = TestDevice::new(&remote, "phone");
        device.sign_in(&UserId::from("u1"));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(device.is_active());
        assert_eq!(device.engine().subscription_count(), 4);
        assert!(device.memory_store(EntityKind::Todo).is_some());
    }

    #[tokio::test]
    async fn file_device_uses_its_directory() {
        let remote = MemoryRemote::default();
        let device = FileDevice::new(&remote, "laptop").unwrap();
        assert!(device.memory_store(EntityKind::Todo).is_none());
        assert!(device.path().exists());
    }
}
