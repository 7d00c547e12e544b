//! In-memory collaborators for engine tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::domain::{Device, DeviceId, NewDevice, RotationState};
use crate::errors::{CredplaneError, Result};
use crate::identity::IdentityProvider;
use crate::notification::{DeviceNotifier, RotationNotification};
use crate::rotation::{
    CompletionDetector, EngineSettings, RotationEngine, RotationJob, ScheduleEvaluator,
};
use crate::services::{AesGcmCipher, SecretCache};
use crate::storage::{
    DeviceRepository, LocalRotationLock, SettingsRepository, StateCounts,
};

pub const TEST_MASTER_SECRET: &[u8] = b"test-master-secret-0123456789abcdef";

/// Device record with `key-{id}` key and `esp32` model.
pub fn device(id: &str, state: RotationState, secret_created_at: DateTime<Utc>) -> Device {
    Device {
        id: DeviceId::from_str_unchecked(id),
        device_key: format!("key-{}", id),
        model_code: "esp32".to_string(),
        rotation_state: state,
        secret_created_at,
        last_rotation_attempt_at: None,
        last_rotation_completed_at: None,
        cached_secret: None,
    }
}

fn injected() -> CredplaneError {
    CredplaneError::database(sqlx::Error::PoolTimedOut, "injected write failure")
}

#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: Mutex<BTreeMap<DeviceId, Device>>,
    fail_writes: AtomicBool,
}

impl InMemoryDeviceRepository {
    pub fn insert(&self, device: Device) {
        self.devices.lock().unwrap().insert(device.id.clone(), device);
    }

    pub fn snapshot(&self, id: &DeviceId) -> Device {
        self.devices.lock().unwrap().get(id).cloned().expect("device exists")
    }

    pub fn all(&self) -> Vec<Device> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write<T>(&self, id: &DeviceId, f: impl FnOnce(&mut Device) -> Result<T>) -> Result<T> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let mut devices = self.devices.lock().unwrap();
        let device = devices.get_mut(id).ok_or_else(|| CredplaneError::not_found("device", id.as_str()))?;
        f(device)
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn create_device(&self, device: NewDevice) -> Result<Device> {
        let record = Device {
            id: device.id,
            device_key: device.device_key,
            model_code: device.model_code,
            rotation_state: RotationState::Ok,
            secret_created_at: device.secret_created_at,
            last_rotation_attempt_at: None,
            last_rotation_completed_at: None,
            cached_secret: None,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Device> {
        self.devices
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CredplaneError::not_found("device", id.as_str()))
    }

    async fn find_by_key(&self, device_key: &str) -> Result<Option<Device>> {
        Ok(self.all().into_iter().find(|d| d.device_key == device_key))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.all())
    }

    async fn list_by_state(&self, state: RotationState) -> Result<Vec<Device>> {
        // Reverse id order so callers cannot lean on storage ordering.
        let mut devices: Vec<Device> =
            self.all().into_iter().filter(|d| d.rotation_state == state).collect();
        devices.reverse();
        Ok(devices)
    }

    async fn count_by_state(&self) -> Result<StateCounts> {
        let mut counts = StateCounts::default();
        for device in self.all() {
            counts.add(device.rotation_state, 1);
        }
        Ok(counts)
    }

    async fn latest_completion(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.all().into_iter().filter_map(|d| d.last_rotation_completed_at).max())
    }

    async fn queue_all_ok(&self) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let mut devices = self.devices.lock().unwrap();
        let mut queued = 0;
        for device in devices.values_mut().filter(|d| d.rotation_state == RotationState::Ok) {
            device.rotation_state = RotationState::Queued;
            queued += 1;
        }
        Ok(queued)
    }

    async fn queue_device(&self, id: &DeviceId) -> Result<bool> {
        self.write(id, |d| {
            if d.rotation_state != RotationState::Ok {
                return Ok(false);
            }
            d.rotation_state = RotationState::Queued;
            Ok(true)
        })
    }

    async fn mark_pending(&self, id: &DeviceId, attempted_at: DateTime<Utc>) -> Result<()> {
        if self.all().iter().any(|d| d.rotation_state == RotationState::Pending) {
            return Err(CredplaneError::database(
                sqlx::Error::Protocol("idx_devices_single_pending violated".to_string()),
                "Failed to mark device pending",
            ));
        }
        self.write(id, |d| {
            if !matches!(d.rotation_state, RotationState::Queued | RotationState::Timeout) {
                return Err(CredplaneError::validation("device not QUEUED or TIMEOUT"));
            }
            d.rotation_state = RotationState::Pending;
            d.last_rotation_attempt_at =
                Some(d.last_rotation_attempt_at.map_or(attempted_at, |prev| prev.max(attempted_at)));
            Ok(())
        })
    }

    async fn mark_timed_out(&self, id: &DeviceId) -> Result<bool> {
        self.write(id, |d| {
            if d.rotation_state != RotationState::Pending {
                return Ok(false);
            }
            d.rotation_state = RotationState::Timeout;
            d.cached_secret = None;
            Ok(true)
        })
    }

    async fn mark_completed(&self, id: &DeviceId, completed_at: DateTime<Utc>) -> Result<bool> {
        self.write(id, |d| {
            if d.rotation_state != RotationState::Pending {
                return Ok(false);
            }
            d.rotation_state = RotationState::Ok;
            d.last_rotation_completed_at = Some(completed_at);
            d.secret_created_at = d.secret_created_at.max(completed_at);
            d.cached_secret = None;
            Ok(true)
        })
    }

    async fn store_cached_secret(&self, id: &DeviceId, ciphertext: &[u8]) -> Result<()> {
        self.write(id, |d| {
            if d.rotation_state == RotationState::Ok {
                return Err(CredplaneError::validation("cannot cache a secret on an OK device"));
            }
            d.cached_secret = Some(ciphertext.to_vec());
            Ok(())
        })
    }

    async fn clear_cached_secret(&self, id: &DeviceId) -> Result<()> {
        self.write(id, |d| {
            d.cached_secret = None;
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Identity provider holding one secret per client.
#[derive(Default)]
pub struct MockIdentityProvider {
    secrets: Mutex<HashMap<String, String>>,
    generation: AtomicUsize,
    fail_regenerate: AtomicBool,
    fail_set_secret: AtomicBool,
    regenerate_calls: AtomicUsize,
    set_secret_calls: AtomicUsize,
}

impl MockIdentityProvider {
    pub fn register(&self, client_id: &str, secret: &str) {
        self.secrets.lock().unwrap().insert(client_id.to_string(), secret.to_string());
    }

    pub fn remove_client(&self, client_id: &str) {
        self.secrets.lock().unwrap().remove(client_id);
    }

    pub fn secret_for(&self, client_id: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(client_id).cloned()
    }

    pub fn fail_regenerate(&self, fail: bool) {
        self.fail_regenerate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_secret(&self, fail: bool) {
        self.fail_set_secret.store(fail, Ordering::SeqCst);
    }

    pub fn regenerate_calls(&self) -> usize {
        self.regenerate_calls.load(Ordering::SeqCst)
    }

    pub fn set_secret_calls(&self) -> usize {
        self.set_secret_calls.load(Ordering::SeqCst)
    }

    fn existing(&self, client_id: &str) -> Result<String> {
        self.secret_for(client_id)
            .ok_or_else(|| CredplaneError::not_found("identity_provider_client", client_id))
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn create_client(&self, client_id: &str) -> Result<Zeroizing<String>> {
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .entry(client_id.to_string())
            .or_insert_with(|| format!("created-{}", client_id))
            .clone();
        Ok(Zeroizing::new(secret))
    }

    async fn get_secret(&self, client_id: &str) -> Result<Zeroizing<String>> {
        self.existing(client_id).map(Zeroizing::new)
    }

    async fn regenerate_secret(&self, client_id: &str) -> Result<Zeroizing<String>> {
        self.regenerate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_regenerate.load(Ordering::SeqCst) {
            return Err(CredplaneError::external("identity_provider", "regenerate unavailable"));
        }
        self.existing(client_id)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let secret = format!("rotated-{}-{}", client_id, generation);
        self.register(client_id, &secret);
        Ok(Zeroizing::new(secret))
    }

    async fn set_secret(&self, client_id: &str, secret: &str) -> Result<()> {
        self.set_secret_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set_secret.load(Ordering::SeqCst) {
            return Err(CredplaneError::external("identity_provider", "update unavailable"));
        }
        self.existing(client_id)?;
        self.register(client_id, secret);
        Ok(())
    }

    async fn client_exists(&self, client_id: &str) -> Result<bool> {
        Ok(self.secret_for(client_id).is_some())
    }
}

/// Records published notifications. A dropping notifier loses them silently.
#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<RotationNotification>>,
    dropping: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_dropping(&self, dropping: bool) {
        self.dropping.store(dropping, Ordering::SeqCst);
    }

    pub fn published_for(&self) -> Vec<DeviceId> {
        self.published.lock().unwrap().iter().map(|n| n.device_id.clone()).collect()
    }
}

impl DeviceNotifier for RecordingNotifier {
    fn publish(&self, notification: RotationNotification) {
        if !self.dropping.load(Ordering::SeqCst) {
            self.published.lock().unwrap().push(notification);
        }
    }
}

/// Fully wired engine over in-memory collaborators.
pub struct TestStack {
    pub devices: Arc<InMemoryDeviceRepository>,
    pub settings: Arc<InMemorySettingsRepository>,
    pub identity: Arc<MockIdentityProvider>,
    pub notifier: Arc<RecordingNotifier>,
    engine: Arc<RotationEngine>,
}

impl TestStack {
    /// Seed `devices`, registering an identity provider client for each.
    pub fn new(devices: Vec<Device>) -> Self {
        Self::with_settings(devices, EngineSettings::default())
    }

    pub fn with_settings(devices: Vec<Device>, settings: EngineSettings) -> Self {
        let repo = Arc::new(InMemoryDeviceRepository::default());
        let identity = Arc::new(MockIdentityProvider::default());
        for device in devices {
            let client_id = device.client_id().expect("valid test identifiers");
            identity.register(&client_id, &format!("initial-{}", client_id));
            repo.insert(device);
        }

        let notifier = Arc::new(RecordingNotifier::default());
        let cipher = AesGcmCipher::from_master_secret(TEST_MASTER_SECRET).expect("test cipher");
        let engine = Arc::new(RotationEngine::new(
            repo.clone(),
            identity.clone(),
            notifier.clone(),
            SecretCache::new(repo.clone(), Arc::new(cipher)),
            Arc::new(LocalRotationLock::new(StdDuration::from_secs(2))),
            ScheduleEvaluator::parse("0 3 1 * *").expect("test schedule"),
            settings,
        ));

        Self {
            devices: repo,
            settings: Arc::new(InMemorySettingsRepository::default()),
            identity,
            notifier,
            engine,
        }
    }

    pub fn engine(&self) -> Arc<RotationEngine> {
        self.engine.clone()
    }

    pub fn detector(&self) -> CompletionDetector {
        CompletionDetector::new(self.engine.clone())
    }

    pub fn job(&self) -> RotationJob {
        RotationJob::new(self.engine.clone(), self.settings.clone())
    }

    pub fn secret_cache(&self) -> SecretCache {
        let cipher = AesGcmCipher::from_master_secret(TEST_MASTER_SECRET).expect("test cipher");
        SecretCache::new(self.devices.clone(), Arc::new(cipher))
    }

    pub fn device(&self, id: &str) -> Device {
        self.devices.snapshot(&DeviceId::from_str_unchecked(id))
    }

    pub fn state_of(&self, id: &str) -> RotationState {
        self.device(id).rotation_state
    }

    pub fn pending_count(&self) -> usize {
        self.devices.all().iter().filter(|d| d.is_pending()).count()
    }
}
