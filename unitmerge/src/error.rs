use std::sync::Arc;

use thiserror::Error;

use crate::Name;

/// A declaration conflict that aborts the current activation's merge.
///
/// Anything already published before the failure stays visible; merging the
/// same unit again is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Cannot declare class with the same name ({0}) as an existing type")]
    NameInUse(Name),

    #[error("Class already declared: {0}")]
    ClassRedeclared(Name),

    #[error("unknown class {0}")]
    UnknownClass(Name),

    #[error("Cannot redeclare {0}()")]
    FunctionRedeclared(Name),

    #[error("Class {class} may not inherit from final class ({parent})")]
    FinalParent { class: Name, parent: Name },

    #[error("Class {class} cannot extend from {kind} {parent}")]
    InvalidParent {
        class: Name,
        parent: Name,
        kind: &'static str,
    },

    #[error("{class} cannot implement {interface} - it is not an interface")]
    NotAnInterface { class: Name, interface: Name },

    #[error("The type {name} is already defined to a different class ({existing})")]
    TypedefClassConflict { name: Name, existing: Name },

    #[error("The name {0} is already defined as a class")]
    NameIsClass(Name),

    #[error("The type {0} is already defined to an incompatible type")]
    TypedefConflict(Name),

    #[error("Unknown type or class {0}")]
    UnknownType(Name),

    /// Raised by the host while running a unit's top-level code.
    #[error("{unit}: {message}")]
    TopLevel { unit: Arc<str>, message: String },
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Recoverable problems, recorded on the activation while merging continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("Constant {0} already defined")]
    ConstantAlreadyDefined(Arc<str>),

    #[error("Constants may only evaluate to scalar values ({0})")]
    ConstantsMustBeScalar(Arc<str>),

    #[error("Cannot redeclare class {0}")]
    ClassRedeclared(Name),

    #[error("Global ${0} reassigned with a different value")]
    GlobalReassigned(Arc<str>),
}
