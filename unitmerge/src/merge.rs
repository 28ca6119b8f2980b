//! The per-activation merge pass.

use std::sync::Arc;

use crate::{
    Activation, Avail, DefineMode, MergeEntry, MergeError, MergeInfo,
    MergeResult, MergeState, Unit, stats,
};

impl Unit {
    /// Publishes this unit's declarations into `act`, running the one-time
    /// setup first if no activation has done so yet.
    ///
    /// This does not mark the unit as loaded and does not run its top-level
    /// code; [`Activation::require`] does both.
    pub fn merge(self: &Arc<Self>, act: &mut Activation) -> MergeResult<()> {
        if !self.is_merged() {
            let vm = act.vm().clone();
            let _guard = vm.unit_init_lock.lock();
            self.initial_merge(&vm);
        }
        let info = self.merge_info();
        self.merge_impl(act, &info)
    }

    fn merge_impl(
        self: &Arc<Self>,
        act: &mut Activation,
        info: &MergeInfo,
    ) -> MergeResult<()> {
        let vm = act.vm().clone();
        let state = self.merge_state();

        if state.contains(MergeState::UNIQUE_FUNCS) {
            for entry in info.funcs() {
                if let MergeEntry::Func(func) = entry {
                    act.publish_func(func);
                }
            }
        } else {
            for entry in info.funcs() {
                if let MergeEntry::Func(func) = entry {
                    act.define_func(func)?;
                }
            }
        }

        let mut redo_hoistable = false;
        for entry in info.hoistable_classes() {
            match entry {
                MergeEntry::DefinedClass(class) => {
                    stats::inc(&vm.stats.hoistable);
                    if class.is_persistent() {
                        stats::inc(&vm.stats.hoistable_persistent);
                    }
                    if class.dependencies_cached(act) {
                        act.publish_class(class);
                    } else {
                        redo_hoistable = true;
                    }
                }
                MergeEntry::HoistableClass(pre) => {
                    if act.define_class(pre, DefineMode::Probe)?.is_none() {
                        redo_hoistable = true;
                    }
                }
                _ => {}
            }
        }

        if redo_hoistable {
            // top-level code will define the rest, and report failures
            if !self.is_merge_only() {
                return Ok(());
            }
            stats::inc(&vm.stats.redo_hoistable);
            log::debug!("unit {}: retrying hoistable classes", self.path());
            if info.statements().is_empty() {
                for entry in info.hoistable_classes() {
                    let pre = match entry {
                        MergeEntry::DefinedClass(class) => class.pre_class(),
                        MergeEntry::HoistableClass(pre) => pre,
                        _ => continue,
                    };
                    act.define_class(pre, DefineMode::Fatal)?;
                }
                return Ok(());
            }
        }

        for entry in info.statements() {
            match entry {
                MergeEntry::Class(pre) => {
                    stats::inc(&vm.stats.mergeable_class);
                    act.define_class(pre, DefineMode::Fatal)?;
                }
                MergeEntry::UniqueDefinedClass(class) => {
                    stats::inc(&vm.stats.mergeable_unique);
                    let mut parent = None;
                    match class.avail(act, &mut parent, true) {
                        Avail::True => act.publish_class(class),
                        Avail::False => {
                            act.define_class(class.pre_class(), DefineMode::Fatal)?;
                        }
                        Avail::Fail(missing) => {
                            return Err(MergeError::UnknownClass(missing));
                        }
                    }
                }
                // defined during setup; compaction removes these
                MergeEntry::PersistentDefine(_) => {}
                MergeEntry::Define(literal) => {
                    stats::inc(&vm.stats.mergeable_define);
                    let handle = literal.slot_or_init(&vm, false);
                    act.define_constant_at(handle, literal.name(), literal.value());
                }
                MergeEntry::Global(literal) => {
                    stats::inc(&vm.stats.mergeable_global);
                    act.assign_global(literal.name(), literal.value());
                }
                MergeEntry::Require(unit) => {
                    stats::inc(&vm.stats.mergeable_require);
                    act.require(unit)?;
                }
                MergeEntry::Func(_)
                | MergeEntry::HoistableClass(_)
                | MergeEntry::DefinedClass(_)
                | MergeEntry::Done => {}
            }
        }

        if self.merge_state().contains(MergeState::NEEDS_COMPACT) {
            self.compact(&vm);
        }
        Ok(())
    }
}

impl Activation {
    /// Include-once: merges `unit` and runs its top-level code unless it was
    /// already loaded in this activation. Returns whether anything ran.
    pub fn require(&mut self, unit: &Arc<Unit>) -> MergeResult<bool> {
        let vm = self.vm().clone();
        if !self.mark_loaded(unit) {
            stats::inc(&vm.stats.pseudo_main_guarded);
            return Ok(false);
        }

        unit.merge(self)?;
        if unit.is_merge_only() {
            stats::inc(&vm.stats.pseudo_main_skip_deep);
        } else {
            stats::inc(&vm.stats.pseudo_main_reentered);
            let host = vm.host().clone();
            host.run_top_level(self, unit)?;
        }
        Ok(true)
    }
}
