#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use diskplug_node::attach::{AttachGate, DiskAttacher};
use diskplug_node::storage::{
    DeviceLocator, Mounter, PathKind, Resizer, StatsCollector, VolumeRecordStore, VolumeStats,
};
use diskplug_node::volume::{
    AttachMode, Collaborators, LifecyclePaths, PublishRequest, StageRequest, VolumeCapability,
    VolumeLifecycle,
};
use diskplug_shared::errors::{DiskplugError, DiskplugResult};

pub const NODE_ID: &str = "i-node-1";
pub const PUBLISH_DEVICE_DIR: &str =
    "/var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/publish";
pub const GLOBAL_MOUNT_ROOT: &str = "/var/lib/container/kubelet/plugins/kubernetes.io/csi/pv";

// ============================================================================
// HOST
// ============================================================================

#[derive(Default)]
pub struct HostState {
    pub paths: HashMap<PathBuf, PathKind>,
    pub non_empty: HashSet<PathBuf>,
    /// (target, source), oldest first
    pub mounts: Vec<(PathBuf, PathBuf)>,
    pub volume_devices: HashMap<String, PathBuf>,
    pub block_devices: HashSet<PathBuf>,
    pub filesystems: HashMap<PathBuf, String>,
    pub calls: Vec<String>,
    pub fail_unmount: bool,
}

/// In-memory host: paths, mount table and block devices.
#[derive(Default)]
pub struct FakeHost {
    pub state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Register a disk that shows up as `device` once attached.
    pub fn add_disk(&self, volume_id: &str, device: &str) {
        let mut state = self.state();
        state
            .volume_devices
            .insert(volume_id.to_string(), PathBuf::from(device));
        state.block_devices.insert(PathBuf::from(device));
    }

    pub fn add_dir(&self, path: &str) {
        self.state()
            .paths
            .insert(PathBuf::from(path), PathKind::Directory);
    }

    pub fn add_file(&self, path: &str) {
        self.state().paths.insert(PathBuf::from(path), PathKind::File);
    }

    /// A node that is neither a directory, file nor block device.
    pub fn add_special(&self, path: &str) {
        self.state().paths.insert(PathBuf::from(path), PathKind::Other);
    }

    pub fn mark_non_empty(&self, path: &str) {
        self.state().non_empty.insert(PathBuf::from(path));
    }

    /// Put an existing mount in place, creating the target.
    pub fn add_mount(&self, source: &str, target: &str) {
        let mut state = self.state();
        state
            .paths
            .entry(PathBuf::from(target))
            .or_insert(PathKind::Directory);
        state
            .mounts
            .push((PathBuf::from(target), PathBuf::from(source)));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        let state = self.state();
        state.mounts.iter().any(|(t, _)| t == Path::new(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state().paths.contains_key(Path::new(path))
    }

    /// Follow bind mounts back to the underlying source.
    fn resolve(state: &HostState, path: &Path) -> Option<PathBuf> {
        let mut current = path.to_path_buf();
        let mut resolved = None;
        for _ in 0..8 {
            match state.mounts.iter().rev().find(|(t, _)| *t == current) {
                Some((_, source)) => {
                    resolved = Some(source.clone());
                    current = source.clone();
                }
                None => break,
            }
        }
        resolved
    }
}

impl Mounter for FakeHost {
    fn is_mount_point(&self, path: &Path) -> DiskplugResult<bool> {
        Ok(self.state().mounts.iter().any(|(t, _)| t == path))
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        _fs_type: &str,
        options: &[String],
    ) -> DiskplugResult<()> {
        let mut state = self.state();
        if !state.paths.contains_key(target) {
            return Err(DiskplugError::Storage(format!(
                "mount target {} does not exist",
                target.display()
            )));
        }
        state.calls.push(format!(
            "mount {} {} {}",
            source.display(),
            target.display(),
            options.join(",")
        ));
        state
            .mounts
            .push((target.to_path_buf(), source.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> DiskplugResult<()> {
        let mut state = self.state();
        if state.fail_unmount {
            return Err(DiskplugError::Storage(format!(
                "umount {}: device busy",
                target.display()
            )));
        }
        let Some(index) = state.mounts.iter().rposition(|(t, _)| t == target) else {
            return Err(DiskplugError::Storage(format!(
                "{} not mounted",
                target.display()
            )));
        };
        state.mounts.remove(index);
        state.calls.push(format!("unmount {}", target.display()));
        Ok(())
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        mkfs_options: &[String],
        options: &[String],
    ) -> DiskplugResult<()> {
        {
            let mut state = self.state();
            match state.filesystems.get(device).cloned() {
                None => {
                    state.calls.push(format!(
                        "format {} {} {}",
                        device.display(),
                        fs_type,
                        mkfs_options.join(" ")
                    ));
                    state
                        .filesystems
                        .insert(device.to_path_buf(), fs_type.to_string());
                }
                Some(existing) if existing != fs_type => {
                    return Err(DiskplugError::Storage(format!(
                        "{} already formatted as {}",
                        device.display(),
                        existing
                    )));
                }
                Some(_) => {}
            }
        }
        self.mount(device, target, fs_type, options)
    }

    fn mount_refs(&self, path: &Path) -> DiskplugResult<Vec<PathBuf>> {
        let state = self.state();
        let Some(device) = Self::resolve(&state, path) else {
            return Ok(Vec::new());
        };
        Ok(state
            .mounts
            .iter()
            .filter(|(t, _)| t != path)
            .filter(|(t, _)| Self::resolve(&state, t).as_ref() == Some(&device))
            .map(|(t, _)| t.clone())
            .collect())
    }

    fn ensure_folder(&self, path: &Path) -> DiskplugResult<()> {
        self.state()
            .paths
            .entry(path.to_path_buf())
            .or_insert(PathKind::Directory);
        Ok(())
    }

    fn ensure_block(&self, path: &Path) -> DiskplugResult<()> {
        self.state()
            .paths
            .entry(path.to_path_buf())
            .or_insert(PathKind::File);
        Ok(())
    }

    fn safe_remove(&self, path: &Path) -> DiskplugResult<()> {
        let mut state = self.state();
        if state.non_empty.contains(path) {
            return Err(DiskplugError::Storage(format!(
                "{} is not empty",
                path.display()
            )));
        }
        if state.paths.remove(path).is_some() {
            state.calls.push(format!("remove {}", path.display()));
        }
        Ok(())
    }

    fn path_kind(&self, path: &Path) -> DiskplugResult<Option<PathKind>> {
        let state = self.state();
        let kind = state.paths.get(path).copied();
        // A device bound onto a file looks like the device itself
        if kind == Some(PathKind::File) {
            if let Some(source) = Self::resolve(&state, path) {
                if state.block_devices.contains(&source) {
                    return Ok(Some(PathKind::BlockDevice));
                }
            }
        }
        Ok(kind)
    }

    fn is_dir_empty(&self, path: &Path) -> DiskplugResult<bool> {
        Ok(!self.state().non_empty.contains(path))
    }
}

impl DeviceLocator for FakeHost {
    fn device_for_volume(&self, volume_id: &str) -> DiskplugResult<PathBuf> {
        self.state()
            .volume_devices
            .get(volume_id)
            .cloned()
            .ok_or_else(|| DiskplugError::NotFound(format!("no device for {}", volume_id)))
    }

    fn device_for_mount_point(&self, mount_point: &Path) -> DiskplugResult<Option<PathBuf>> {
        Ok(Self::resolve(&self.state(), mount_point))
    }

    fn check_device(&self, device: &Path) -> DiskplugResult<()> {
        if self.state().block_devices.contains(device) {
            Ok(())
        } else {
            Err(DiskplugError::Storage(format!(
                "{} is not a block device",
                device.display()
            )))
        }
    }
}

// ============================================================================
// ATTACHER
// ============================================================================

/// Attacher that hands out the devices registered on the [`FakeHost`].
pub struct FakeAttacher {
    host: Arc<FakeHost>,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Option<Receiver<()>>>,
    pub fail_detach: Mutex<bool>,
}

impl FakeAttacher {
    pub fn new(host: Arc<FakeHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
            entered: Mutex::new(None),
            release: Mutex::new(None),
            fail_detach: Mutex::new(false),
        })
    }

    /// Make the next attach block until the returned sender fires. The
    /// returned receiver fires once the attach has started.
    pub fn block_next_attach(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.entered.lock().unwrap() = Some(entered_tx);
        *self.release.lock().unwrap() = Some(release_rx);
        (entered_rx, release_tx)
    }

    pub fn attaches(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }
}

impl DiskAttacher for FakeAttacher {
    fn attach_disk(
        &self,
        volume_id: &str,
        _node_id: &str,
        _shared: bool,
        _wait: bool,
    ) -> DiskplugResult<PathBuf> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);

        let entered = self.entered.lock().unwrap().take();
        if let Some(entered) = entered {
            let _ = entered.send(());
        }
        let release = self.release.lock().unwrap().take();
        if let Some(release) = release {
            let _ = release.recv();
        }

        self.host
            .device_for_volume(volume_id)
            .map_err(|e| DiskplugError::Attach(e.to_string()))
    }

    fn detach_disk(&self, volume_id: &str, _node_id: &str, _wait: bool) -> DiskplugResult<()> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_detach.lock().unwrap() {
            return Err(DiskplugError::Attach(format!(
                "cloud refused to detach {}",
                volume_id
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RECORDS / RESIZE / STATS
// ============================================================================

#[derive(Default)]
pub struct MemoryRecords {
    pub records: Mutex<HashMap<String, PathBuf>>,
    pub fail_save: Mutex<bool>,
}

impl MemoryRecords {
    pub fn get(&self, volume_id: &str) -> Option<PathBuf> {
        self.records.lock().unwrap().get(volume_id).cloned()
    }

    pub fn insert(&self, volume_id: &str, device: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(volume_id.to_string(), PathBuf::from(device));
    }
}

impl VolumeRecordStore for MemoryRecords {
    fn save(&self, volume_id: &str, device: &Path) -> DiskplugResult<()> {
        if *self.fail_save.lock().unwrap() {
            return Err(DiskplugError::Storage("record dir read-only".to_string()));
        }
        self.insert(volume_id, &device.to_string_lossy());
        Ok(())
    }

    fn load(&self, volume_id: &str) -> DiskplugResult<Option<PathBuf>> {
        Ok(self.get(volume_id))
    }

    fn delete(&self, volume_id: &str) -> DiskplugResult<()> {
        self.records.lock().unwrap().remove(volume_id);
        Ok(())
    }
}

/// `None` makes the resize fail outright.
pub struct FakeResizer {
    pub outcome: Mutex<Option<bool>>,
    pub calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl Default for FakeResizer {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(Some(true)),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Resizer for FakeResizer {
    fn resize(&self, device: &Path, mount_path: &Path) -> DiskplugResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((device.to_path_buf(), mount_path.to_path_buf()));
        match *self.outcome.lock().unwrap() {
            Some(grown) => Ok(grown),
            None => Err(DiskplugError::Storage("resize2fs exited 1".to_string())),
        }
    }
}

pub struct FakeStats;

pub const FAKE_STATS: VolumeStats = VolumeStats {
    block: false,
    total_bytes: 20 << 30,
    available_bytes: 15 << 30,
    used_bytes: 5 << 30,
    total_inodes: 1_310_720,
    free_inodes: 1_310_000,
    used_inodes: 720,
};

impl StatsCollector for FakeStats {
    fn collect(&self, _path: &Path) -> DiskplugResult<VolumeStats> {
        Ok(FAKE_STATS)
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub host: Arc<FakeHost>,
    pub attacher: Arc<FakeAttacher>,
    pub records: Arc<MemoryRecords>,
    pub resizer: Arc<FakeResizer>,
    pub gate: Arc<AttachGate>,
    pub lifecycle: Arc<VolumeLifecycle>,
}

impl Harness {
    /// Node owns attach and detach.
    pub fn node_attach() -> Self {
        Self::build(true)
    }

    /// A controller attaches; the node only locates devices.
    pub fn controller_attach() -> Self {
        Self::build(false)
    }

    fn build(node_owned: bool) -> Self {
        let host = FakeHost::new();
        let attacher = FakeAttacher::new(Arc::clone(&host));
        let records = Arc::new(MemoryRecords::default());
        let resizer = Arc::new(FakeResizer::default());
        let gate = Arc::new(AttachGate::new());

        let mode = if node_owned {
            AttachMode::Node(attacher.clone())
        } else {
            AttachMode::Controller
        };

        let lifecycle = VolumeLifecycle::new(
            NODE_ID,
            mode,
            Arc::clone(&gate),
            LifecyclePaths {
                publish_device_dir: PathBuf::from(PUBLISH_DEVICE_DIR),
                global_mount_root: PathBuf::from(GLOBAL_MOUNT_ROOT),
            },
            Collaborators {
                locator: host.clone(),
                mounter: host.clone(),
                records: records.clone(),
                resizer: resizer.clone(),
                stats: Arc::new(FakeStats),
            },
        );

        Self {
            host,
            attacher,
            records,
            resizer,
            gate,
            lifecycle: Arc::new(lifecycle),
        }
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

pub fn stage_fs(volume_id: &str, staging: &str) -> StageRequest {
    StageRequest {
        volume_id: volume_id.to_string(),
        staging_path: PathBuf::from(staging),
        capability: Some(VolumeCapability::mount("", vec![])),
        volume_context: HashMap::new(),
    }
}

pub fn stage_block(volume_id: &str, staging: &str) -> StageRequest {
    StageRequest {
        capability: Some(VolumeCapability::block()),
        ..stage_fs(volume_id, staging)
    }
}

pub fn publish_fs(volume_id: &str, staging: &str, target: &str) -> PublishRequest {
    PublishRequest {
        volume_id: volume_id.to_string(),
        staging_path: PathBuf::from(staging),
        target_path: PathBuf::from(target),
        capability: Some(VolumeCapability::mount("", vec![])),
        readonly: false,
    }
}

pub fn publish_block(volume_id: &str, staging: &str, target: &str) -> PublishRequest {
    PublishRequest {
        capability: Some(VolumeCapability::block()),
        ..publish_fs(volume_id, staging, target)
    }
}
