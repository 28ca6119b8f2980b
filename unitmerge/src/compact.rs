//! One-time rewrite of a unit's declaration list.
//!
//! Once every unique declaration of a unit has been defined, the list can
//! refer to the resulting class versions directly and drop whatever lives in
//! persistent slots. Readers still holding the old list keep it alive until
//! they finish their pass.

use std::sync::Arc;

use crate::{
    Class, MergeEntry, MergeInfo, MergeState, PreClass, SlotHandle, Unit,
    VMShared, stats,
};

/// What a `Require` of a unit turns into when the requiring unit compacts.
#[derive(Debug, Clone)]
pub enum Replacement {
    /// The unit has nothing left to merge.
    Drop,
    /// The unit's single remaining statement, merged in place.
    Inline(MergeEntry),
    Keep,
}

impl Unit {
    pub fn replacement(&self) -> Replacement {
        if self.merge_state().contains(MergeState::EMPTY) {
            return Replacement::Drop;
        }
        let info = self.merge_info();
        if !self.is_merge_only() || info.len() != 1 || !info.funcs().is_empty()
        {
            return Replacement::Keep;
        }
        match (info.hoistable_classes(), info.statements()) {
            ([], [entry]) if !matches!(entry, MergeEntry::Class(_)) => {
                Replacement::Inline(entry.clone())
            }
            ([MergeEntry::DefinedClass(class)], []) => {
                Replacement::Inline(MergeEntry::UniqueDefinedClass(class.clone()))
            }
            _ => Replacement::Keep,
        }
    }

    /// Rewrites the declaration list if setup asked for it. Runs at most once
    /// per unit; later callers find the flag already cleared.
    pub(crate) fn compact(&self, vm: &VMShared) {
        let _guard = vm.unit_init_lock.lock();
        let state = self.merge_state();
        if !state.contains(MergeState::NEEDS_COMPACT) {
            return;
        }

        let old = self.merge_info();
        let removable = old.entries()[..old.len()]
            .iter()
            .filter(|entry| compact_entry(entry).is_none())
            .count();

        let compacted = rebuild(&old);
        let before = old.len();
        let after = compacted.len();
        let empty = self.is_merge_only() && compacted.is_empty();
        self.replace_merge_info(compacted);

        let mut next = state - MergeState::NEEDS_COMPACT;
        next.set(MergeState::EMPTY, empty);
        self.set_merge_state(next);

        stats::inc(&vm.stats.compactions);
        log::debug!(
            "unit {}: compacted {before} -> {after} entries ({removable} removed{})",
            self.path(),
            if empty { ", now empty" } else { "" }
        );
    }
}

fn rebuild(old: &MergeInfo) -> MergeInfo {
    let mut entries = Vec::with_capacity(old.len());
    entries.extend(old.funcs().iter().filter_map(compact_entry));
    let first_hoistable_class = entries.len();
    entries.extend(old.hoistable_classes().iter().filter_map(compact_entry));
    let first_mergeable = entries.len();
    entries.extend(old.statements().iter().filter_map(compact_entry));
    MergeInfo::new(entries, first_hoistable_class, first_mergeable)
}

/// `None` drops the entry.
fn compact_entry(entry: &MergeEntry) -> Option<MergeEntry> {
    match entry {
        MergeEntry::Func(func) => {
            let persistent = func
                .entity()
                .func_slot()
                .is_some_and(SlotHandle::is_persistent);
            (!persistent).then(|| entry.clone())
        }
        MergeEntry::HoistableClass(pre) if pre.is_unique() => {
            match unique_class(pre) {
                Some(class) if class.is_persistent() => None,
                Some(class) => Some(MergeEntry::DefinedClass(class)),
                None => Some(entry.clone()),
            }
        }
        MergeEntry::Class(pre) if pre.is_unique() => match unique_class(pre) {
            Some(class) if class.is_persistent() => None,
            Some(class) => Some(MergeEntry::UniqueDefinedClass(class)),
            None => Some(entry.clone()),
        },
        MergeEntry::PersistentDefine(_) => None,
        MergeEntry::Require(unit) => match unit.replacement() {
            Replacement::Drop => None,
            Replacement::Inline(inlined) => Some(inlined),
            Replacement::Keep => Some(entry.clone()),
        },
        _ => Some(entry.clone()),
    }
}

/// The single version of a unique class, if it has been defined.
fn unique_class(pre: &Arc<PreClass>) -> Option<Arc<Class>> {
    let class = pre.entity().class_list()?;
    if !Arc::ptr_eq(class.pre_class(), pre) || class.next().is_some() {
        log::warn!("class {} is marked unique but has other versions", pre.name());
        return None;
    }
    Some(class)
}
