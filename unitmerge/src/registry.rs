//! Named Entity Registry.
//!
//! Every declared name maps to exactly one [`NamedEntity`] for the lifetime of
//! the process. Entities are never removed, so an `Arc<NamedEntity>` obtained
//! once can be kept in bytecode metadata and compared by pointer.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};

use ahash::RandomState;
use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use crate::{Class, Name, SlotHandle, SlotTable, names::fold_case};

pub struct NamedEntity {
    name: Name,
    /// Head of the class version chain, newest first.
    class_list: ArcSwapOption<Class>,
    func_slot: OnceLock<SlotHandle>,
    class_slot: OnceLock<SlotHandle>,
    name_def_slot: OnceLock<SlotHandle>,
}

impl NamedEntity {
    fn new(name: Name) -> Self {
        Self {
            name,
            class_list: ArcSwapOption::empty(),
            func_slot: OnceLock::new(),
            class_slot: OnceLock::new(),
            name_def_slot: OnceLock::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn class_list(&self) -> Option<Arc<Class>> {
        self.class_list.load_full()
    }

    /// Walks every class version ever defined under this name, newest first.
    pub fn classes(&self) -> ClassChain {
        ClassChain {
            next: self.class_list(),
        }
    }

    /// Links `class` in as the new head. Callers hold the VM's classes lock
    /// and have built `class` with the previous head as its `next`.
    pub(crate) fn push_class(&self, class: Arc<Class>) {
        self.class_list.store(Some(class));
    }

    pub fn func_slot(&self) -> Option<SlotHandle> {
        self.func_slot.get().copied()
    }

    pub fn class_slot(&self) -> Option<SlotHandle> {
        self.class_slot.get().copied()
    }

    pub fn name_def_slot(&self) -> Option<SlotHandle> {
        self.name_def_slot.get().copied()
    }

    /// The first caller decides whether the slot is persistent.
    pub(crate) fn func_slot_or_init(
        &self,
        slots: &SlotTable,
        persistent: bool,
    ) -> SlotHandle {
        *self.func_slot.get_or_init(|| slots.alloc(persistent))
    }

    pub(crate) fn class_slot_or_init(
        &self,
        slots: &SlotTable,
        persistent: bool,
    ) -> SlotHandle {
        *self.class_slot.get_or_init(|| slots.alloc(persistent))
    }

    pub(crate) fn name_def_slot_or_init(&self, slots: &SlotTable) -> SlotHandle {
        *self.name_def_slot.get_or_init(|| slots.alloc(false))
    }
}

impl fmt::Debug for NamedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedEntity")
            .field("name", &self.name)
            .field("func_slot", &self.func_slot())
            .field("class_slot", &self.class_slot())
            .finish_non_exhaustive()
    }
}

pub struct ClassChain {
    next: Option<Arc<Class>>,
}

impl Iterator for ClassChain {
    type Item = Arc<Class>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.next().cloned();
        Some(current)
    }
}

#[derive(Debug)]
pub struct EntityRegistry {
    map: RwLock<HashMap<Box<str>, Arc<NamedEntity>, RandomState>>,
}

impl EntityRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
        }
    }

    pub fn lookup_or_create(&self, name: &str) -> Arc<NamedEntity> {
        let key = fold_case(name);
        if let Some(entity) = self.map.read().get(&*key) {
            return entity.clone();
        }

        let mut map = self.map.write();
        // another thread may have won between the two guards
        if let Some(entity) = map.get(&*key) {
            return entity.clone();
        }
        let entity = Arc::new(NamedEntity::new(Name::new(name)));
        map.insert(key.into_owned().into_boxed_str(), entity.clone());
        log::trace!("registry: created entity {name}");
        entity
    }

    pub fn get(&self, name: &str) -> Option<Arc<NamedEntity>> {
        self.map.read().get(&*fold_case(name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entities, in no particular order.
    pub fn entities(&self) -> Vec<Arc<NamedEntity>> {
        self.map.read().values().cloned().collect()
    }
}
