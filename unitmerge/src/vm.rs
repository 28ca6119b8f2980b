use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};

use crate::{
    Activation, Cell, EntityRegistry, Func, Host, MergeStats,
    MergeStatsSnapshot, NoopHost, SlotHandle, SlotTable, Value,
};

#[derive(Debug, Clone, Copy)]
pub struct VMSettings {
    /// Whole-program mode: the compiler has seen every unit, so `UNIQUE`
    /// and `PERSISTENT` attributes can be trusted.
    pub authoritative: bool,
    pub initial_entity_capacity: usize,
    pub initial_persistent_slots: usize,
}

impl Default for VMSettings {
    fn default() -> Self {
        Self {
            authoritative: false,
            initial_entity_capacity: 4096,
            initial_persistent_slots: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VMCreateInfo {
    pub authoritative: Option<bool>,
    pub entity_capacity: Option<usize>,
    pub persistent_slots: Option<usize>,
}

pub struct VMShared {
    settings: VMSettings,
    registry: EntityRegistry,
    slots: SlotTable,
    constants: RwLock<HashMap<Arc<str>, SlotHandle, RandomState>>,
    host: Arc<dyn Host>,
    /// Serializes one-time unit setup and compaction.
    pub(crate) unit_init_lock: Mutex<()>,
    /// Held only while linking a new class version into a chain.
    pub(crate) classes_lock: Mutex<()>,
    pub(crate) stats: MergeStats,
    unit_ids: AtomicU64,
    activation_ids: AtomicU64,
}

#[derive(Clone)]
pub struct VM {
    inner: Arc<VMShared>,
}

impl VM {
    pub fn new(info: VMCreateInfo) -> Self {
        Self::with_host(info, Arc::new(NoopHost))
    }

    pub fn with_host(info: VMCreateInfo, host: Arc<dyn Host>) -> Self {
        let mut settings = VMSettings::default();
        info.authoritative.inspect(|&val| settings.authoritative = val);
        info.entity_capacity
            .inspect(|&val| settings.initial_entity_capacity = val);
        info.persistent_slots
            .inspect(|&val| settings.initial_persistent_slots = val);

        let inner = VMShared {
            settings,
            registry: EntityRegistry::new(settings.initial_entity_capacity),
            slots: SlotTable::new(settings.initial_persistent_slots),
            constants: RwLock::new(HashMap::default()),
            host,
            unit_init_lock: Mutex::new(()),
            classes_lock: Mutex::new(()),
            stats: MergeStats::default(),
            unit_ids: AtomicU64::new(0),
            activation_ids: AtomicU64::new(0),
        };

        log::debug!("vm: created with {settings:?}");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Starts a new request context. Activations are independent and may run
    /// on different threads.
    pub fn new_activation(&self) -> Activation {
        Activation::new(self.inner.clone())
    }

    pub fn shared(&self) -> &Arc<VMShared> {
        &self.inner
    }
}

impl Deref for VM {
    type Target = VMShared;

    fn deref(&self) -> &VMShared {
        &self.inner
    }
}

impl VMShared {
    pub fn settings(&self) -> &VMSettings {
        &self.settings
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn entity_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> MergeStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Handle of an already bound constant. Constant names are case
    /// sensitive.
    pub fn constant_handle(&self, name: &str) -> Option<SlotHandle> {
        self.constants.read().get(name).copied()
    }

    /// Binds a slot for the constant `name`; the first binding decides
    /// whether it is persistent.
    pub fn constant_slot(&self, name: &str, persistent: bool) -> SlotHandle {
        if let Some(handle) = self.constant_handle(name) {
            return handle;
        }
        let mut constants = self.constants.write();
        if let Some(handle) = constants.get(name) {
            return *handle;
        }
        let handle = self.slots.alloc(persistent);
        constants.insert(Arc::from(name), handle);
        handle
    }

    /// Defines a process-wide constant. Returns false if it already had a
    /// value.
    pub(crate) fn define_persistent_constant(
        &self,
        handle: SlotHandle,
        value: &Value,
    ) -> bool {
        if !handle.is_persistent() || !value.is_scalar() {
            return false;
        }
        self.slots.init_persistent(handle, Cell::Value(value.clone()))
    }

    pub(crate) fn func_slot(&self, func: &Func) -> SlotHandle {
        let persistent = self.settings.authoritative && func.is_persistent();
        func.entity().func_slot_or_init(&self.slots, persistent)
    }

    pub(crate) fn next_unit_id(&self) -> u64 {
        self.unit_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_activation_id(&self) -> u64 {
        self.activation_ids.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for VMShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VMShared")
            .field("settings", &self.settings)
            .field("entities", &self.registry.len())
            .field("persistent_slots", &self.slots.persistent_slots())
            .field("request_slots", &self.slots.request_slots())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for VM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_overrides_defaults() {
        let vm = VM::new(VMCreateInfo {
            authoritative: Some(true),
            ..Default::default()
        });
        assert!(vm.settings().authoritative);
        assert_eq!(
            vm.settings().initial_entity_capacity,
            VMSettings::default().initial_entity_capacity
        );
    }

    #[test]
    fn constant_slots_are_bound_once() {
        let vm = VM::new(VMCreateInfo::default());
        let a = vm.constant_slot("LIMIT", true);
        let b = vm.constant_slot("LIMIT", false);
        assert_eq!(a, b);
        assert!(a.is_persistent());
        assert!(vm.constant_handle("limit").is_none());

        assert!(vm.define_persistent_constant(a, &Value::Int(3)));
        assert!(!vm.define_persistent_constant(a, &Value::Int(4)));
    }
}
