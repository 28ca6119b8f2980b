//! Per-request state.
//!
//! An [`Activation`] owns the request-scoped resolution cells, the set of
//! units already loaded in this request, its globals and the warnings raised
//! so far. It is driven by exactly one thread at a time.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use ahash::RandomState;

use crate::{
    Cell, Class, Func, NameDef, NamedEntity, RequestCells, SlotHandle, Unit,
    UnitId, VMShared, Value, Warning, names::normalize_ns,
};

pub struct Activation {
    id: u64,
    vm: Arc<VMShared>,
    cells: RequestCells,
    loaded: HashSet<UnitId, RandomState>,
    globals: HashMap<Arc<str>, Value, RandomState>,
    warnings: Vec<Warning>,
}

impl Activation {
    pub(crate) fn new(vm: Arc<VMShared>) -> Self {
        let id = vm.next_activation_id();
        log::trace!("activation {id}: started");
        Self {
            id,
            vm,
            cells: RequestCells::default(),
            loaded: HashSet::default(),
            globals: HashMap::default(),
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn vm(&self) -> &Arc<VMShared> {
        &self.vm
    }

    pub fn load_slot(&self, handle: SlotHandle) -> Cell {
        if handle.is_persistent() {
            self.vm.slots().load_persistent(handle)
        } else {
            self.cells.get(handle.index())
        }
    }

    pub(crate) fn store_slot(&mut self, handle: SlotHandle, cell: Cell) {
        if handle.is_persistent() {
            self.vm.slots().store_persistent(handle, cell);
        } else {
            self.cells.set(handle.index(), cell);
        }
    }

    pub fn cached_func(&self, entity: &NamedEntity) -> Option<Arc<Func>> {
        entity
            .func_slot()
            .and_then(|handle| self.load_slot(handle).into_func())
    }

    pub fn cached_class(&self, entity: &NamedEntity) -> Option<Arc<Class>> {
        entity
            .class_slot()
            .and_then(|handle| self.load_slot(handle).into_class())
    }

    pub fn cached_name_def(&self, entity: &NamedEntity) -> Option<NameDef> {
        match self.load_slot(entity.name_def_slot()?) {
            Cell::Class(class) => Some(NameDef::Class(class)),
            Cell::Typedef(typedef) => Some(NameDef::Typedef(typedef)),
            _ => None,
        }
    }

    /// Makes `class` the visible version of its name in this activation.
    pub(crate) fn publish_class(&mut self, class: &Arc<Class>) {
        self.store_slot(class.slot(), Cell::Class(class.clone()));
        log::trace!("activation {}: class {} visible", self.id, class.name());
        self.vm.host().on_define_class(class);
    }

    pub(crate) fn publish_func(&mut self, func: &Arc<Func>) {
        let handle = self.vm.func_slot(func);
        self.store_slot(handle, Cell::Func(func.clone()));
        self.vm.host().on_define_func(func);
    }

    /// Pure lookup: never autoloads.
    pub fn lookup_class(&self, name: &str) -> Option<Arc<Class>> {
        let entity = self.vm.registry().get(name)?;
        self.cached_class(&entity)
    }

    pub fn get_class(
        &mut self,
        name: &str,
        try_autoload: bool,
    ) -> Option<Arc<Class>> {
        if let Some(class) = self.lookup_class(name) {
            return Some(class);
        }
        if let Some(stripped) = normalize_ns(name) {
            return self.get_class(stripped, try_autoload);
        }
        if !try_autoload {
            return None;
        }
        let host = self.vm.host().clone();
        if host.autoload_class(self, name) {
            self.lookup_class(name)
        } else {
            None
        }
    }

    pub fn load_class(&mut self, name: &str) -> Option<Arc<Class>> {
        self.get_class(name, true)
    }

    /// Only plain classes count; interfaces and traits do not.
    pub fn class_exists(&mut self, name: &str, autoload: bool) -> bool {
        self.get_class(name, autoload)
            .is_some_and(|class| !class.is_interface() && !class.is_trait())
    }

    pub fn lookup_func(&self, name: &str) -> Option<Arc<Func>> {
        let entity = self.vm.registry().get(name)?;
        self.cached_func(&entity)
    }

    pub fn load_func(&mut self, name: &str) -> Option<Arc<Func>> {
        if let Some(func) = self.lookup_func(name) {
            return Some(func);
        }
        if let Some(stripped) = normalize_ns(name) {
            return self.load_func(stripped);
        }
        let host = self.vm.host().clone();
        if host.autoload_function(self, name) {
            self.lookup_func(name)
        } else {
            None
        }
    }

    pub fn lookup_constant(&self, name: &str) -> Option<Value> {
        let handle = self.vm.constant_handle(name)?;
        self.load_slot(handle).into_value()
    }

    pub fn load_constant(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.lookup_constant(name) {
            return Some(value);
        }
        if let Some(stripped) = normalize_ns(name) {
            return self.load_constant(stripped);
        }
        let host = self.vm.host().clone();
        if host.autoload_constant(self, name) {
            self.lookup_constant(name)
        } else {
            None
        }
    }

    /// Runtime `define()`. Returns false, with a warning, if the constant
    /// already has a value or `value` is not a scalar.
    pub fn define_constant(&mut self, name: &str, value: Value) -> bool {
        let handle = self.vm.constant_slot(name, false);
        self.define_constant_at(handle, &Arc::from(name), &value)
    }

    pub(crate) fn define_constant_at(
        &mut self,
        handle: SlotHandle,
        name: &Arc<str>,
        value: &Value,
    ) -> bool {
        if !value.is_scalar() {
            self.raise_warning(Warning::ConstantsMustBeScalar(name.clone()));
            return false;
        }
        if !self.load_slot(handle).is_empty() {
            self.raise_warning(Warning::ConstantAlreadyDefined(name.clone()));
            return false;
        }
        self.store_slot(handle, Cell::Value(value.clone()));
        true
    }

    pub fn assign_global(&mut self, name: &Arc<str>, value: &Value) {
        match self.globals.insert(name.clone(), value.clone()) {
            Some(previous) if previous != *value => {
                self.raise_warning(Warning::GlobalReassigned(name.clone()));
            }
            _ => {}
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn raise_warning(&mut self, warning: Warning) {
        log::warn!("activation {}: {warning}", self.id);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Returns false if `unit` was already loaded in this activation.
    pub(crate) fn mark_loaded(&mut self, unit: &Unit) -> bool {
        self.loaded.insert(unit.id())
    }

    pub fn is_loaded(&self, unit: &Unit) -> bool {
        self.loaded.contains(&unit.id())
    }

    /// Every class currently visible in this activation.
    pub fn defined_classes(&self) -> Vec<Arc<Class>> {
        self.vm
            .registry()
            .entities()
            .iter()
            .filter_map(|entity| self.cached_class(entity))
            .collect()
    }
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("id", &self.id)
            .field("cells", &self.cells.occupied())
            .field("loaded", &self.loaded.len())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VM, VMCreateInfo};

    #[test]
    fn constants_are_defined_once() {
        let vm = VM::new(VMCreateInfo::default());
        let mut act = vm.new_activation();

        assert!(act.define_constant("X", Value::Int(1)));
        assert!(!act.define_constant("X", Value::Int(2)));
        assert_eq!(act.lookup_constant("X"), Some(Value::Int(1)));
        assert_eq!(
            act.warnings(),
            [Warning::ConstantAlreadyDefined(Arc::from("X"))]
        );

        assert_eq!(act.load_constant("\\X"), Some(Value::Int(1)));
    }

    #[test]
    fn arrays_are_not_constants() {
        let vm = VM::new(VMCreateInfo::default());
        let mut act = vm.new_activation();

        let array = Value::Array(Arc::from([Value::Int(1)]));
        assert!(!act.define_constant("ARR", array));
        assert!(act.lookup_constant("ARR").is_none());
        assert!(matches!(
            act.warnings(),
            [Warning::ConstantsMustBeScalar(_)]
        ));
    }

    #[test]
    fn request_constants_die_with_the_activation() {
        let vm = VM::new(VMCreateInfo::default());
        let mut first = vm.new_activation();
        first.define_constant("TMP", Value::Bool(true));

        let second = vm.new_activation();
        assert_ne!(first.id(), second.id());
        assert!(second.lookup_constant("TMP").is_none());
    }

    #[test]
    fn global_reassignment_warns_on_change_only() {
        let vm = VM::new(VMCreateInfo::default());
        let mut act = vm.new_activation();
        let name: Arc<str> = Arc::from("config");

        act.assign_global(&name, &Value::Int(1));
        act.assign_global(&name, &Value::Int(1));
        assert!(act.warnings().is_empty());

        act.assign_global(&name, &Value::Int(2));
        assert_eq!(act.global("config"), Some(&Value::Int(2)));
        assert_eq!(act.take_warnings().len(), 1);
        assert!(act.warnings().is_empty());
    }
}
