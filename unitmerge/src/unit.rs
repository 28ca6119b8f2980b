//! Compiled units and their one-time setup.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use ahash::RandomState;
use arc_swap::ArcSwap;
use bitflags::bitflags;

use crate::{
    Attr, ClassDecl, Func, Literal, MergeEntry, MergeInfo, Name, PreClass,
    TypeKind, Typedef, VMShared, Value, stats,
};

bitflags! {
    /// Merge progress of a unit. An empty set means unmerged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MergeState: u8 {
        const MERGING       = 1 << 0;
        const MERGED        = 1 << 1;
        /// Every hoistable function is unique; publish without checks.
        const UNIQUE_FUNCS  = 1 << 2;
        const NEEDS_COMPACT = 1 << 3;
        /// Compaction left nothing to merge.
        const EMPTY         = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

pub struct Unit {
    id: UnitId,
    path: Arc<str>,
    bytecode: Box<[u8]>,
    funcs: Box<[Arc<Func>]>,
    pre_classes: Box<[Arc<PreClass>]>,
    typedefs: Box<[Arc<Typedef>]>,
    merge_only: bool,
    merge_info: ArcSwap<MergeInfo>,
    state: AtomicU8,
}

impl Unit {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn path(&self) -> &Arc<str> {
        &self.path
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn funcs(&self) -> &[Arc<Func>] {
        &self.funcs
    }

    pub fn pre_classes(&self) -> &[Arc<PreClass>] {
        &self.pre_classes
    }

    pub fn typedefs(&self) -> &[Arc<Typedef>] {
        &self.typedefs
    }

    /// The declaration list describes all of this unit's top-level effects.
    pub fn is_merge_only(&self) -> bool {
        self.merge_only
    }

    /// Snapshot of the current declaration list. A pass must keep using the
    /// snapshot it started with even if compaction swaps the list meanwhile.
    pub fn merge_info(&self) -> Arc<MergeInfo> {
        self.merge_info.load_full()
    }

    pub fn merge_state(&self) -> MergeState {
        MergeState::from_bits_retain(self.state.load(Ordering::Acquire))
    }

    pub fn is_merged(&self) -> bool {
        self.merge_state().contains(MergeState::MERGED)
    }

    /// Callers hold the VM's unit init lock.
    pub(crate) fn set_merge_state(&self, state: MergeState) {
        self.state.store(state.bits(), Ordering::Release);
    }

    pub(crate) fn replace_merge_info(&self, info: MergeInfo) {
        self.merge_info.store(Arc::new(info));
    }

    /// One-time setup. Callers hold the VM's unit init lock; required units
    /// are set up recursively under the same lock.
    pub(crate) fn initial_merge(&self, vm: &VMShared) {
        if !self.merge_state().is_empty() {
            return;
        }
        self.set_merge_state(MergeState::MERGING);

        let authoritative = vm.settings().authoritative;
        let info = self.merge_info();
        let mut needs_compact = false;

        for func in self.funcs.iter() {
            if vm.func_slot(func).is_persistent() {
                needs_compact = true;
            }
        }
        let unique_funcs = authoritative
            && info.funcs().iter().all(|entry| match entry {
                MergeEntry::Func(func) => func.is_unique(),
                _ => true,
            });

        if authoritative {
            needs_compact |= info.hoistable_classes().iter().any(|entry| {
                matches!(entry, MergeEntry::HoistableClass(pre) if pre.is_unique())
            });
        }

        let mut demoted = Vec::new();
        if self.merge_only {
            for entry in info.statements() {
                match entry {
                    MergeEntry::Class(pre) => {
                        needs_compact |= authoritative && pre.is_unique();
                    }
                    MergeEntry::Require(target) => target.initial_merge(vm),
                    MergeEntry::PersistentDefine(literal) => {
                        let handle = literal.slot_or_init(vm, true);
                        if vm.define_persistent_constant(handle, literal.value())
                        {
                            needs_compact = true;
                        } else {
                            log::debug!(
                                "{}: persistent constant {} demoted to define",
                                self.path,
                                literal.name()
                            );
                            demoted.push(literal.clone());
                        }
                    }
                    MergeEntry::Define(literal) => {
                        literal.slot_or_init(vm, false);
                    }
                    _ => {}
                }
            }
        }
        if !demoted.is_empty() {
            self.replace_merge_info(demote_persistent_defines(&info, &demoted));
        }

        let mut state = MergeState::MERGED;
        state.set(MergeState::UNIQUE_FUNCS, unique_funcs);
        state.set(MergeState::NEEDS_COMPACT, needs_compact);
        self.set_merge_state(state);

        stats::inc(&vm.stats.initial_merges);
        log::debug!("unit {}: initial merge done, state {state:?}", self.path);
    }
}

/// Rewrites persistent defines that did not get a persistent value as
/// ordinary defines, so every activation defines them or gets the warning.
fn demote_persistent_defines(
    info: &MergeInfo,
    demoted: &[Arc<Literal>],
) -> MergeInfo {
    let entries = info.entries()[..info.len()]
        .iter()
        .map(|entry| match entry {
            MergeEntry::PersistentDefine(literal)
                if demoted.iter().any(|d| Arc::ptr_eq(d, literal)) =>
            {
                MergeEntry::Define(literal.clone())
            }
            _ => entry.clone(),
        })
        .collect();
    MergeInfo::new(entries, info.first_hoistable_class(), info.first_mergeable())
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("merge_only", &self.merge_only)
            .field("state", &self.merge_state())
            .field("entries", &self.merge_info().len())
            .finish()
    }
}

/// When a class declaration can be hoisted ahead of the unit's top-level
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Hoisting {
    /// Defined only when top-level code reaches it.
    NotHoistable,
    /// Defined in source order by the merge pass.
    Mergeable,
    /// Tried up front; defined in source order if that fails.
    MaybeHoistable,
    /// Always defined up front.
    AlwaysHoistable,
}

/// Assembles a [`Unit`] and its declaration list the way the compiler lays
/// it out.
pub struct UnitBuilder<'a> {
    vm: &'a VMShared,
    path: Arc<str>,
    bytecode: Vec<u8>,
    merge_only: bool,
    funcs: Vec<Arc<Func>>,
    hoistable_funcs: Vec<MergeEntry>,
    pre_classes: Vec<Arc<PreClass>>,
    hoistable_classes: Vec<MergeEntry>,
    hoistable_names: HashSet<Name, RandomState>,
    statements: Vec<MergeEntry>,
    all_classes_hoistable: bool,
    typedefs: Vec<Arc<Typedef>>,
}

impl<'a> UnitBuilder<'a> {
    pub fn new(vm: &'a VMShared, path: &str) -> Self {
        Self {
            vm,
            path: Arc::from(path),
            bytecode: Vec::new(),
            merge_only: true,
            funcs: Vec::new(),
            hoistable_funcs: Vec::new(),
            pre_classes: Vec::new(),
            hoistable_classes: Vec::new(),
            hoistable_names: HashSet::default(),
            statements: Vec::new(),
            all_classes_hoistable: true,
            typedefs: Vec::new(),
        }
    }

    pub fn set_bytecode(&mut self, bytecode: Vec<u8>) -> &mut Self {
        self.bytecode = bytecode;
        self
    }

    /// Units with top-level code beyond declarations are not merge-only.
    pub fn set_merge_only(&mut self, merge_only: bool) -> &mut Self {
        self.merge_only = merge_only;
        self
    }

    pub fn add_function(
        &mut self,
        name: &str,
        attrs: Attr,
        hoistable: bool,
    ) -> Arc<Func> {
        let func = Arc::new(Func::new(self.vm.registry(), name, attrs));
        self.funcs.push(func.clone());
        if hoistable {
            self.hoistable_funcs.push(MergeEntry::Func(func.clone()));
        }
        func
    }

    pub fn add_class(
        &mut self,
        decl: ClassDecl,
        mut hoisting: Hoisting,
    ) -> Arc<PreClass> {
        // a second hoistable class of the same name has to wait its turn
        if hoisting >= Hoisting::MaybeHoistable
            && self.hoistable_names.contains(&decl.name)
        {
            hoisting = Hoisting::Mergeable;
        }

        let pre = Arc::new(PreClass::new(
            self.vm.registry(),
            decl,
            self.path.clone(),
        ));
        self.pre_classes.push(pre.clone());

        if hoisting >= Hoisting::MaybeHoistable {
            self.hoistable_names.insert(pre.name().clone());
            self.hoistable_classes
                .push(MergeEntry::HoistableClass(pre.clone()));
        } else {
            self.all_classes_hoistable = false;
        }
        if matches!(hoisting, Hoisting::Mergeable | Hoisting::MaybeHoistable) {
            self.statements.push(MergeEntry::Class(pre.clone()));
        }
        pre
    }

    pub fn add_define(&mut self, name: &str, value: Value) -> &mut Self {
        self.push_literal(MergeEntry::Define(Arc::new(Literal::new(name, value))))
    }

    /// Only honoured in authoritative mode; otherwise an ordinary define.
    pub fn add_persistent_define(
        &mut self,
        name: &str,
        value: Value,
    ) -> &mut Self {
        let literal = Arc::new(Literal::new(name, value));
        if self.vm.settings().authoritative {
            self.push_literal(MergeEntry::PersistentDefine(literal))
        } else {
            self.push_literal(MergeEntry::Define(literal))
        }
    }

    pub fn add_global(&mut self, name: &str, value: Value) -> &mut Self {
        self.push_literal(MergeEntry::Global(Arc::new(Literal::new(name, value))))
    }

    pub fn add_require(&mut self, unit: &Arc<Unit>) -> &mut Self {
        self.push_literal(MergeEntry::Require(unit.clone()))
    }

    pub fn add_typedef(
        &mut self,
        name: &str,
        kind: TypeKind,
        value: &str,
    ) -> Arc<Typedef> {
        let typedef =
            Arc::new(Typedef::new(self.vm.registry(), name, kind, value));
        self.typedefs.push(typedef.clone());
        typedef
    }

    fn push_literal(&mut self, entry: MergeEntry) -> &mut Self {
        self.statements.push(entry);
        self.all_classes_hoistable = false;
        self
    }

    pub fn build(self) -> Arc<Unit> {
        let mut merge_only = self.merge_only;
        let mut statements = self.statements;

        if !merge_only || self.all_classes_hoistable {
            statements.clear();
        } else if !self.vm.settings().authoritative
            && statements
                .iter()
                .any(|entry| !matches!(entry, MergeEntry::Class(_)))
        {
            // outside whole-program mode only class statements can be merged
            merge_only = false;
            statements.clear();
        }

        let first_hoistable_class = self.hoistable_funcs.len();
        let first_mergeable = first_hoistable_class + self.hoistable_classes.len();
        let mut entries = self.hoistable_funcs;
        entries.extend(self.hoistable_classes);
        entries.extend(statements);

        let info = MergeInfo::new(entries, first_hoistable_class, first_mergeable);
        let unit = Unit {
            id: UnitId(self.vm.next_unit_id()),
            path: self.path,
            bytecode: self.bytecode.into_boxed_slice(),
            funcs: self.funcs.into_boxed_slice(),
            pre_classes: self.pre_classes.into_boxed_slice(),
            typedefs: self.typedefs.into_boxed_slice(),
            merge_only,
            merge_info: ArcSwap::from_pointee(info),
            state: AtomicU8::new(MergeState::empty().bits()),
        };

        log::trace!(
            "unit {}: built, merge_only={merge_only}, {} entries",
            unit.path,
            unit.merge_info().len()
        );
        Arc::new(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MergeKind, VM, VMCreateInfo};

    fn vm(authoritative: bool) -> VM {
        VM::new(VMCreateInfo {
            authoritative: Some(authoritative),
            ..Default::default()
        })
    }

    #[test]
    fn layout_puts_hoistables_first() {
        let vm = vm(true);
        let mut b = UnitBuilder::new(&vm, "layout.php");
        b.add_class(ClassDecl::new("Late"), Hoisting::Mergeable);
        b.add_function("helper", Attr::UNIQUE, true);
        b.add_class(ClassDecl::new("Early"), Hoisting::MaybeHoistable);
        b.add_define("X", Value::Int(1));
        let unit = b.build();
        let info = unit.merge_info();

        assert_eq!(info.funcs().len(), 1);
        assert_eq!(info.hoistable_classes().len(), 1);
        let kinds: Vec<_> =
            info.statements().iter().filter_map(MergeEntry::kind).collect();
        assert_eq!(
            kinds,
            [MergeKind::Class, MergeKind::Class, MergeKind::Define]
        );
        assert!(unit.is_merge_only());
        assert!(unit.merge_state().is_empty());
    }

    #[test]
    fn all_hoistable_units_drop_the_tail() {
        let vm = vm(true);
        let mut b = UnitBuilder::new(&vm, "hoist.php");
        b.add_class(ClassDecl::new("A"), Hoisting::MaybeHoistable);
        b.add_class(ClassDecl::new("B"), Hoisting::AlwaysHoistable);
        let unit = b.build();

        assert_eq!(unit.merge_info().hoistable_classes().len(), 2);
        assert!(unit.merge_info().statements().is_empty());
    }

    #[test]
    fn duplicate_hoistable_name_is_demoted() {
        let vm = vm(true);
        let mut b = UnitBuilder::new(&vm, "dup.php");
        b.add_class(ClassDecl::new("Twice"), Hoisting::AlwaysHoistable);
        b.add_class(ClassDecl::new("twice"), Hoisting::AlwaysHoistable);
        let unit = b.build();

        let info = unit.merge_info();
        assert_eq!(info.hoistable_classes().len(), 1);
        assert_eq!(info.statements().len(), 1);
    }

    #[test]
    fn non_class_statements_demote_outside_authoritative_mode() {
        let vm = vm(false);
        let mut b = UnitBuilder::new(&vm, "demote.php");
        b.add_class(ClassDecl::new("C"), Hoisting::Mergeable);
        b.add_global("g", Value::Int(1));
        let unit = b.build();

        assert!(!unit.is_merge_only());
        assert!(unit.merge_info().statements().is_empty());
    }

    #[test]
    fn initial_merge_classifies_units() {
        let vm = vm(true);
        let mut b = UnitBuilder::new(&vm, "init.php");
        b.add_function("f", Attr::UNIQUE, true);
        b.add_class(
            ClassDecl::new("U").attrs(Attr::UNIQUE),
            Hoisting::AlwaysHoistable,
        );
        b.add_persistent_define("P", Value::Int(9));
        let unit = b.build();

        {
            let _guard = vm.unit_init_lock.lock();
            unit.initial_merge(&vm);
        }
        let state = unit.merge_state();
        assert!(state.contains(MergeState::MERGED));
        assert!(state.contains(MergeState::UNIQUE_FUNCS));
        assert!(state.contains(MergeState::NEEDS_COMPACT));

        let handle = vm.constant_handle("P").unwrap();
        assert!(handle.is_persistent());
        assert_eq!(
            vm.slots().load_persistent(handle).into_value(),
            Some(Value::Int(9))
        );
    }

    #[test]
    fn initial_merge_without_unique_funcs() {
        let vm = vm(false);
        let mut b = UnitBuilder::new(&vm, "plain.php");
        b.add_function("g", Attr::UNIQUE, true);
        let unit = b.build();

        {
            let _guard = vm.unit_init_lock.lock();
            unit.initial_merge(&vm);
        }
        assert_eq!(unit.merge_state(), MergeState::MERGED);
        assert!(vm.registry().get("g").unwrap().func_slot().is_some());
    }
}
