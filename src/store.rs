//! Thread-safe storage for the installed spec snapshot.
//!
//! Evaluation reads and snapshot installs happen on different threads, so the active
//! [Snapshot] lives behind an [RwLock] as an [Arc]. A reader clones the [Arc] once at the
//! start of a call and evaluates against that snapshot even if an install lands mid-call;
//! it never observes a mix of two downloads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::spec::{ConfigSpec, DownloadedSpecs};

/// A complete, immutable set of gate and dynamic config definitions, indexed by name.
/// Gates and dynamic configs are separate namespaces.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    gates: HashMap<String, ConfigSpec>,
    dynamic_configs: HashMap<String, ConfigSpec>,
    time: u64,
}

impl Snapshot {
    /// Build a snapshot from separate gate and dynamic config lists.
    pub fn new(gates: Vec<ConfigSpec>, dynamic_configs: Vec<ConfigSpec>) -> Self {
        Self {
            gates: index_by_name(gates),
            dynamic_configs: index_by_name(dynamic_configs),
            time: 0,
        }
    }

    /// Build a snapshot from a download envelope.
    pub fn from_download(download: DownloadedSpecs) -> Self {
        Self {
            gates: index_by_name(download.feature_gates),
            dynamic_configs: index_by_name(download.dynamic_configs),
            time: download.time,
        }
    }

    /// Retrieve the feature gate named `name`.
    pub fn gate(&self, name: &str) -> Option<&ConfigSpec> {
        self.gates.get(name)
    }

    /// Retrieve the dynamic config named `name`.
    pub fn dynamic_config(&self, name: &str) -> Option<&ConfigSpec> {
        self.dynamic_configs.get(name)
    }

    /// Server timestamp of the download this snapshot came from, zero if unknown.
    pub fn time(&self) -> u64 {
        self.time
    }
}

fn index_by_name(specs: Vec<ConfigSpec>) -> HashMap<String, ConfigSpec> {
    specs
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect()
}

/// `SpecStore` holds the active snapshot, allowing any number of concurrent readers and
/// occasional whole-snapshot replacement by a writer.
#[derive(Default)]
pub struct SpecStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl SpecStore {
    /// Create a store holding an empty snapshot; every lookup misses until a real one is
    /// installed.
    pub fn new() -> Self {
        SpecStore::default()
    }

    /// Get the currently installed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        // read() can only fail if the lock is poisoned (a writer panicked while holding
        // it), and the writer below does nothing that can panic.
        self.snapshot
            .read()
            .expect("thread holding snapshot lock should not panic")
            .clone()
    }

    /// Atomically replace the installed snapshot for all subsequent readers.
    pub fn install(&self, snapshot: Arc<Snapshot>) {
        let mut active = self
            .snapshot
            .write()
            .expect("thread holding snapshot lock should not panic");
        *active = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_named(name: &str) -> ConfigSpec {
        serde_json::from_str(&format!(
            r#"{{"name": "{}", "enabled": true, "salt": "s", "defaultValue": false, "rules": []}}"#,
            name
        ))
        .unwrap()
    }

    #[test]
    fn empty_store_misses_everything() {
        let store = SpecStore::new();
        let snapshot = store.snapshot();
        assert!(snapshot.gate("any").is_none());
        assert!(snapshot.dynamic_config("any").is_none());
        assert_eq!(snapshot.time(), 0);
    }

    #[test]
    fn gates_and_configs_are_separate_namespaces() {
        let snapshot = Snapshot::new(vec![gate_named("shared_name")], vec![]);
        assert!(snapshot.gate("shared_name").is_some());
        assert!(snapshot.dynamic_config("shared_name").is_none());
    }

    #[test]
    fn install_replaces_the_whole_snapshot() {
        let store = SpecStore::new();
        store.install(Arc::new(Snapshot::new(vec![gate_named("old_gate")], vec![])));
        store.install(Arc::new(Snapshot::new(vec![gate_named("new_gate")], vec![])));

        let snapshot = store.snapshot();
        assert!(snapshot.gate("new_gate").is_some());
        assert!(
            snapshot.gate("old_gate").is_none(),
            "replacement is wholesale, not a merge"
        );
    }

    #[test]
    fn readers_keep_the_snapshot_they_started_with() {
        let store = SpecStore::new();
        store.install(Arc::new(Snapshot::new(vec![gate_named("gate_v1")], vec![])));

        let before_install = store.snapshot();
        store.install(Arc::new(Snapshot::new(vec![gate_named("gate_v2")], vec![])));

        assert!(before_install.gate("gate_v1").is_some());
        assert!(store.snapshot().gate("gate_v2").is_some());
    }

    #[test]
    fn can_install_a_snapshot_from_another_thread() {
        let store = Arc::new(SpecStore::new());

        {
            let store = store.clone();
            let handle = std::thread::spawn(move || {
                store.install(Arc::new(Snapshot::new(vec![gate_named("threaded")], vec![])));
            });
            handle.join().unwrap();
        }

        assert!(store.snapshot().gate("threaded").is_some());
    }

    #[test]
    fn keeps_the_download_timestamp() {
        let download = serde_json::from_str(
            r#"{"feature_gates": [], "dynamic_configs": [], "has_updates": true, "time": 1631638014811}"#,
        )
        .unwrap();
        let snapshot = Snapshot::from_download(download);
        assert_eq!(snapshot.time(), 1631638014811);
    }
}
