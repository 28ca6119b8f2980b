//! Class blueprints, class versions and typedefs.
//!
//! A [`PreClass`] is what the compiler emits: a name plus the *names* of its
//! parent and interfaces. A [`Class`] is one concrete version of that
//! blueprint, bound to specific parent and interface versions. The same
//! blueprint can yield several versions when it is defined against different
//! parents in different activations; all of them stay linked in the entity's
//! class chain.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{
    Activation, Attr, EntityRegistry, Name, NamedEntity, SlotHandle,
};

/// Emitter-side description of a class declaration.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Name,
    pub parent: Option<Name>,
    pub interfaces: Vec<Name>,
    pub attrs: Attr,
}

impl ClassDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: Name::new(name),
            parent: None,
            interfaces: Vec::new(),
            attrs: Attr::empty(),
        }
    }

    pub fn extends(mut self, parent: &str) -> Self {
        self.parent = Some(Name::new(parent));
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(Name::new(interface));
        self
    }

    pub fn attrs(mut self, attrs: Attr) -> Self {
        self.attrs |= attrs;
        self
    }
}

pub struct PreClass {
    name: Name,
    parent: Option<Name>,
    interfaces: Box<[Name]>,
    attrs: Attr,
    entity: Arc<NamedEntity>,
    unit: Arc<str>,
}

impl PreClass {
    pub(crate) fn new(
        registry: &EntityRegistry,
        decl: ClassDecl,
        unit: Arc<str>,
    ) -> Self {
        let entity = registry.lookup_or_create(&decl.name);
        Self {
            name: decl.name,
            parent: decl.parent,
            interfaces: decl.interfaces.into_boxed_slice(),
            attrs: decl.attrs,
            entity,
            unit,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn parent(&self) -> Option<&Name> {
        self.parent.as_ref()
    }

    pub fn interfaces(&self) -> &[Name] {
        &self.interfaces
    }

    pub fn attrs(&self) -> Attr {
        self.attrs
    }

    pub fn entity(&self) -> &Arc<NamedEntity> {
        &self.entity
    }

    /// Path of the unit that declared this blueprint.
    pub fn unit_path(&self) -> &str {
        &self.unit
    }

    pub fn is_unique(&self) -> bool {
        self.attrs.contains(Attr::UNIQUE)
    }

    pub fn is_persistent(&self) -> bool {
        self.attrs.contains(Attr::PERSISTENT)
    }
}

impl fmt::Debug for PreClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreClass")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("interfaces", &self.interfaces)
            .field("attrs", &self.attrs)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Whether a class version can be used in the current activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Avail {
    /// Parent and interfaces resolve to the versions this class was built on.
    True,
    /// Something resolves, but to a different version.
    False,
    /// The named dependency is not defined at all.
    Fail(Name),
}

pub struct Class {
    pre: Arc<PreClass>,
    parent: Option<Weak<Class>>,
    interfaces: Box<[Weak<Class>]>,
    slot: SlotHandle,
    next: Option<Arc<Class>>,
}

impl Class {
    pub(crate) fn new(
        pre: Arc<PreClass>,
        parent: Option<&Arc<Class>>,
        interfaces: &[Arc<Class>],
        slot: SlotHandle,
        next: Option<Arc<Class>>,
    ) -> Self {
        Self {
            pre,
            parent: parent.map(Arc::downgrade),
            interfaces: interfaces.iter().map(Arc::downgrade).collect(),
            slot,
            next,
        }
    }

    pub fn name(&self) -> &Name {
        self.pre.name()
    }

    pub fn pre_class(&self) -> &Arc<PreClass> {
        &self.pre
    }

    pub fn entity(&self) -> &Arc<NamedEntity> {
        self.pre.entity()
    }

    /// Versions are never unlinked from their chain, so the upgrade only
    /// fails once the whole VM is torn down.
    pub fn parent(&self) -> Option<Arc<Class>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = Arc<Class>> + '_ {
        self.interfaces.iter().filter_map(Weak::upgrade)
    }

    pub fn slot(&self) -> SlotHandle {
        self.slot
    }

    pub fn is_persistent(&self) -> bool {
        self.slot.is_persistent()
    }

    pub fn next(&self) -> Option<&Arc<Class>> {
        self.next.as_ref()
    }

    pub fn attrs(&self) -> Attr {
        self.pre.attrs()
    }

    pub fn is_interface(&self) -> bool {
        self.attrs().contains(Attr::INTERFACE)
    }

    pub fn is_trait(&self) -> bool {
        self.attrs().contains(Attr::TRAIT)
    }

    pub fn is_final(&self) -> bool {
        self.attrs().contains(Attr::FINAL)
    }

    pub fn is_cached(&self, act: &Activation) -> bool {
        act.load_slot(self.slot)
            .into_class()
            .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(&cached), self))
    }

    /// `parent_hint` carries the parent resolved for an earlier version of
    /// the same blueprint, so walking a chain resolves it only once.
    pub fn avail(
        &self,
        act: &mut Activation,
        parent_hint: &mut Option<Arc<Class>>,
        try_autoload: bool,
    ) -> Avail {
        if let Some(ours) = &self.parent {
            if parent_hint.is_none() {
                let Some(name) = self.pre.parent() else {
                    return Avail::False;
                };
                match act.get_class(name, try_autoload) {
                    Some(found) => *parent_hint = Some(found),
                    None => return Avail::Fail(name.clone()),
                }
            }
            let matches = parent_hint
                .as_ref()
                .is_some_and(|found| ptr_eq_weak(ours, found));
            if !matches {
                return Avail::False;
            }
        }

        for (weak, name) in self.interfaces.iter().zip(self.pre.interfaces()) {
            match act.get_class(name, try_autoload) {
                Some(found) if ptr_eq_weak(weak, &found) => {}
                Some(_) => return Avail::False,
                None => return Avail::Fail(name.clone()),
            }
        }
        Avail::True
    }

    /// True when the exact parent and interface versions this class was
    /// built on are visible in `act`. Never autoloads.
    pub fn dependencies_cached(&self, act: &Activation) -> bool {
        let parent_ok = match &self.parent {
            None => true,
            Some(weak) => weak.upgrade().is_some_and(|p| p.is_cached(act)),
        };
        parent_ok
            && self
                .interfaces
                .iter()
                .all(|weak| weak.upgrade().is_some_and(|i| i.is_cached(act)))
    }
}

fn ptr_eq_weak(weak: &Weak<Class>, class: &Arc<Class>) -> bool {
    std::ptr::eq(weak.as_ptr(), Arc::as_ptr(class))
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", self.name())
            .field("parent", &self.pre.parent())
            .field("slot", &self.slot)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Null,
    Bool,
    Int,
    Double,
    String,
    Array,
    /// Alias of a class; `Typedef::value` names it.
    Object,
    Mixed,
}

pub struct Typedef {
    name: Name,
    kind: TypeKind,
    value: Name,
    entity: Arc<NamedEntity>,
}

impl Typedef {
    pub(crate) fn new(
        registry: &EntityRegistry,
        name: &str,
        kind: TypeKind,
        value: &str,
    ) -> Self {
        Self {
            name: Name::new(name),
            kind,
            value: Name::new(value),
            entity: registry.lookup_or_create(name),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn value(&self) -> &Name {
        &self.value
    }

    pub fn entity(&self) -> &Arc<NamedEntity> {
        &self.entity
    }

    pub(crate) fn is_compatible(&self, other: &Typedef) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl fmt::Debug for Typedef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typedef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .finish()
    }
}

/// What a name-definition slot resolves to.
#[derive(Debug, Clone)]
pub enum NameDef {
    Class(Arc<Class>),
    Typedef(Arc<Typedef>),
}

impl NameDef {
    pub fn name(&self) -> &Name {
        match self {
            NameDef::Class(class) => class.name(),
            NameDef::Typedef(typedef) => typedef.name(),
        }
    }
}
