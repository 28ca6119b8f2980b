//! Resolution slots.
//!
//! A [`SlotHandle`] names one resolution cell. Request handles are allocated
//! process-wide but every [`Activation`](crate::Activation) stores its own
//! cells for them, so their contents die with the activation. Persistent
//! handles index the VM's [`SlotTable`] and stay valid for the whole process.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use parking_lot::RwLock;

use crate::{Class, Func, Typedef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u32);

impl SlotHandle {
    const PERSISTENT: u32 = 1 << 31;

    fn new(index: u32, persistent: bool) -> Self {
        debug_assert_eq!(index & Self::PERSISTENT, 0, "slot index overflow");
        if persistent {
            Self(index | Self::PERSISTENT)
        } else {
            Self(index)
        }
    }

    #[inline]
    pub fn is_persistent(self) -> bool {
        self.0 & Self::PERSISTENT != 0
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 & !Self::PERSISTENT) as usize
    }
}

/// Contents of one resolution cell.
#[derive(Debug, Clone, Default)]
pub enum Cell {
    #[default]
    Empty,
    Func(Arc<Func>),
    Class(Arc<Class>),
    Typedef(Arc<Typedef>),
    Value(Value),
}

impl Cell {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn into_func(self) -> Option<Arc<Func>> {
        match self {
            Cell::Func(func) => Some(func),
            _ => None,
        }
    }

    pub fn into_class(self) -> Option<Arc<Class>> {
        match self {
            Cell::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Cell::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Hands out slot handles and owns the persistent cells.
#[derive(Debug)]
pub struct SlotTable {
    next_request: AtomicU32,
    persistent: RwLock<Vec<Cell>>,
}

impl SlotTable {
    pub fn new(persistent_capacity: usize) -> Self {
        Self {
            next_request: AtomicU32::new(0),
            persistent: RwLock::new(Vec::with_capacity(persistent_capacity)),
        }
    }

    pub fn alloc(&self, persistent: bool) -> SlotHandle {
        if persistent {
            let mut cells = self.persistent.write();
            let index = cells.len() as u32;
            cells.push(Cell::Empty);
            SlotHandle::new(index, true)
        } else {
            let index = self.next_request.fetch_add(1, Ordering::Relaxed);
            SlotHandle::new(index, false)
        }
    }

    /// Number of request handles handed out so far.
    pub fn request_slots(&self) -> usize {
        self.next_request.load(Ordering::Relaxed) as usize
    }

    pub fn persistent_slots(&self) -> usize {
        self.persistent.read().len()
    }

    pub(crate) fn load_persistent(&self, handle: SlotHandle) -> Cell {
        debug_assert!(handle.is_persistent());
        self.persistent
            .read()
            .get(handle.index())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn store_persistent(&self, handle: SlotHandle, cell: Cell) {
        debug_assert!(handle.is_persistent());
        if let Some(slot) = self.persistent.write().get_mut(handle.index()) {
            *slot = cell;
        }
    }

    /// Stores `cell` only if the slot is still empty.
    pub(crate) fn init_persistent(&self, handle: SlotHandle, cell: Cell) -> bool {
        debug_assert!(handle.is_persistent());
        match self.persistent.write().get_mut(handle.index()) {
            Some(slot) if slot.is_empty() => {
                *slot = cell;
                true
            }
            _ => false,
        }
    }
}

/// Request-scoped cells owned by a single activation. Grows on first store.
#[derive(Debug, Default)]
pub struct RequestCells {
    cells: Vec<Cell>,
}

impl RequestCells {
    pub fn get(&self, index: usize) -> Cell {
        self.cells.get(index).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, cell: Cell) {
        if index >= self.cells.len() {
            self.cells.resize(index + 1, Cell::Empty);
        }
        self.cells[index] = cell;
    }

    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_empty()).count()
    }
}
