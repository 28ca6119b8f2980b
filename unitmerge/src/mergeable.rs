//! The Mergeable Declaration List.
//!
//! Layout, in order: hoistable functions, hoistable classes, the statement
//! tail in source order, then a single [`MergeEntry::Done`]. The two prefix
//! boundaries are stored as indices so each region is a plain slice.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{Class, Func, PreClass, SlotHandle, Unit, VMShared, Value};

/// Statement kind codes. They fit in three bits so a serialized list can
/// store them in the low bits of an aligned pointer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeKind {
    Class = 0,
    UniqueDefinedClass = 1,
    Define = 2,
    Global = 3,
    PersistentDefine = 4,
    ReqDoc = 5,
    Done = 6,
}

/// Name and value of a `define` or global assignment.
#[derive(Debug)]
pub struct Literal {
    name: Arc<str>,
    value: Value,
    slot: OnceLock<SlotHandle>,
}

impl Literal {
    pub fn new(name: &str, value: Value) -> Self {
        Self {
            name: Arc::from(name),
            value,
            slot: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn slot(&self) -> Option<SlotHandle> {
        self.slot.get().copied()
    }

    /// Binds the constant's slot on first use. Globals never need one.
    pub(crate) fn slot_or_init(
        &self,
        vm: &VMShared,
        persistent: bool,
    ) -> SlotHandle {
        *self
            .slot
            .get_or_init(|| vm.constant_slot(&self.name, persistent))
    }
}

#[derive(Debug, Clone)]
pub enum MergeEntry {
    /// Hoistable function.
    Func(Arc<Func>),
    /// Hoistable class blueprint, defined optimistically.
    HoistableClass(Arc<PreClass>),
    /// Compacted hoistable class: a known version, published directly.
    DefinedClass(Arc<Class>),
    /// Tail class definition in source order.
    Class(Arc<PreClass>),
    /// Compacted tail class.
    UniqueDefinedClass(Arc<Class>),
    Define(Arc<Literal>),
    /// Constant defined once per process during initial setup.
    PersistentDefine(Arc<Literal>),
    Global(Arc<Literal>),
    Require(Arc<Unit>),
    Done,
}

impl MergeEntry {
    /// Statement kind; `None` for the hoistable prefixes.
    pub fn kind(&self) -> Option<MergeKind> {
        Some(match self {
            MergeEntry::Func(_)
            | MergeEntry::HoistableClass(_)
            | MergeEntry::DefinedClass(_) => return None,
            MergeEntry::Class(_) => MergeKind::Class,
            MergeEntry::UniqueDefinedClass(_) => MergeKind::UniqueDefinedClass,
            MergeEntry::Define(_) => MergeKind::Define,
            MergeEntry::PersistentDefine(_) => MergeKind::PersistentDefine,
            MergeEntry::Global(_) => MergeKind::Global,
            MergeEntry::Require(_) => MergeKind::ReqDoc,
            MergeEntry::Done => MergeKind::Done,
        })
    }

    pub fn is_hoistable_class(&self) -> bool {
        matches!(
            self,
            MergeEntry::HoistableClass(_) | MergeEntry::DefinedClass(_)
        )
    }
}

#[derive(Debug)]
pub struct MergeInfo {
    entries: Box<[MergeEntry]>,
    first_hoistable_class: usize,
    first_mergeable: usize,
}

impl MergeInfo {
    /// `entries` must already be in list order and must not contain `Done`.
    pub(crate) fn new(
        mut entries: Vec<MergeEntry>,
        first_hoistable_class: usize,
        first_mergeable: usize,
    ) -> Self {
        debug_assert!(first_hoistable_class <= first_mergeable);
        debug_assert!(first_mergeable <= entries.len());
        debug_assert!(
            entries[..first_hoistable_class]
                .iter()
                .all(|e| matches!(e, MergeEntry::Func(_)))
        );
        debug_assert!(
            entries[first_hoistable_class..first_mergeable]
                .iter()
                .all(MergeEntry::is_hoistable_class)
        );
        entries.push(MergeEntry::Done);
        Self {
            entries: entries.into_boxed_slice(),
            first_hoistable_class,
            first_mergeable,
        }
    }

    pub fn funcs(&self) -> &[MergeEntry] {
        &self.entries[..self.first_hoistable_class]
    }

    pub fn hoistable_classes(&self) -> &[MergeEntry] {
        &self.entries[self.first_hoistable_class..self.first_mergeable]
    }

    /// The tail, without the terminating `Done`.
    pub fn statements(&self) -> &[MergeEntry] {
        &self.entries[self.first_mergeable..self.entries.len() - 1]
    }

    /// Every entry including `Done`.
    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    pub fn first_hoistable_class(&self) -> usize {
        self.first_hoistable_class
    }

    pub fn first_mergeable(&self) -> usize {
        self.first_mergeable
    }

    /// Number of entries, not counting `Done`.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&MergeEntry> {
        self.entries.get(index)
    }
}

impl fmt::Display for MergeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeEntry::Func(func) => write!(f, "func {}", func.name()),
            MergeEntry::HoistableClass(pre) => {
                write!(f, "hoistable class {}", pre.name())
            }
            MergeEntry::DefinedClass(class) => {
                write!(f, "defined class {}", class.name())
            }
            MergeEntry::Class(pre) => write!(f, "class {}", pre.name()),
            MergeEntry::UniqueDefinedClass(class) => {
                write!(f, "unique class {}", class.name())
            }
            MergeEntry::Define(lit) => {
                write!(f, "define {} = {}", lit.name(), lit.value())
            }
            MergeEntry::PersistentDefine(lit) => {
                write!(f, "persistent define {} = {}", lit.name(), lit.value())
            }
            MergeEntry::Global(lit) => {
                write!(f, "global ${} = {}", lit.name(), lit.value())
            }
            MergeEntry::Require(unit) => write!(f, "require {}", unit.path()),
            MergeEntry::Done => f.write_str("done"),
        }
    }
}

impl fmt::Display for MergeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            let marker = if i == self.first_hoistable_class
                && i < self.first_mergeable
            {
                "c"
            } else if i == self.first_mergeable {
                "m"
            } else {
                " "
            };
            writeln!(f, "{marker} {i:3}: {entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_slices() {
        let entries = vec![
            MergeEntry::Define(Arc::new(Literal::new("A", Value::Int(1)))),
            MergeEntry::Global(Arc::new(Literal::new("g", Value::Null))),
        ];
        let info = MergeInfo::new(entries, 0, 0);

        assert!(info.funcs().is_empty());
        assert!(info.hoistable_classes().is_empty());
        assert_eq!(info.statements().len(), 2);
        assert_eq!(info.len(), 2);
        assert!(matches!(info.get(2), Some(MergeEntry::Done)));
        assert_eq!(info.get(0).and_then(MergeEntry::kind), Some(MergeKind::Define));

        let dump = info.to_string();
        assert!(dump.contains("define A = 1"));
        assert!(dump.ends_with("done\n"));
    }
}
