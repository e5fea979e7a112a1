//! Object registry and ownership tracking.
//!
//! Every object handed out is identified by a process-unique id; the pointer
//! callers see is that id. Freed ids are never reused, so a stale pointer is
//! always detected as a use after free rather than aliasing a new object.

use crate::engine::{ChannelObj, ConditionObj, FieldObj, OperationObj, QueryObj, SubarrayDef};
use crate::error::{SimError, SimResult};
use crate::model::{
    AttributeDef, ConfigObj, ContextObj, DimensionDef, DomainDef, EnumerationDef, ErrorObj, EvolutionDef,
    FilterDef, FilterListDef, SchemaDef,
};
use crate::storage::{ArrayObj, FragmentInfoObj, GroupObj};
use crate::vfs::{FileObj, VfsObj};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// An ownership rule broken by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The object was freed more than once.
    DoubleFree,
    /// The object was passed to a call after it was freed.
    UseAfterFree,
    /// `parent` was freed while `child`, created under it, was still live.
    ParentFreedBeforeChild {
        /// Object freed first.
        parent: usize,
        /// Object still live at that point.
        child: usize,
    },
}

/// Typed payload of a registry entry.
pub(crate) trait Kind: Sized {
    const NAME: &'static str;

    fn wrap(self) -> Object;
    fn peek(object: &Object) -> Option<&Self>;
    fn peek_mut(object: &mut Object) -> Option<&mut Self>;
}

macro_rules! objects {
    ($($variant:ident($ty:ty) = $name:literal,)*) => {
        pub(crate) enum Object {
            $($variant($ty),)*
        }

        $(impl Kind for $ty {
            const NAME: &'static str = $name;

            fn wrap(self) -> Object {
                Object::$variant(self)
            }

            fn peek(object: &Object) -> Option<&Self> {
                match object {
                    Object::$variant(value) => Some(value),
                    _ => None,
                }
            }

            fn peek_mut(object: &mut Object) -> Option<&mut Self> {
                match object {
                    Object::$variant(value) => Some(value),
                    _ => None,
                }
            }
        })*
    };
}

objects! {
    Config(ConfigObj) = "config",
    Error(ErrorObj) = "error",
    Context(ContextObj) = "context",
    Attribute(AttributeDef) = "attribute",
    Dimension(DimensionDef) = "dimension",
    Domain(DomainDef) = "domain",
    Filter(FilterDef) = "filter",
    FilterList(FilterListDef) = "filter list",
    Enumeration(EnumerationDef) = "enumeration",
    Schema(SchemaDef) = "array schema",
    Evolution(EvolutionDef) = "array schema evolution",
    Array(ArrayObj) = "array",
    Subarray(SubarrayDef) = "subarray",
    Condition(ConditionObj) = "query condition",
    Query(QueryObj) = "query",
    Field(FieldObj) = "query field",
    Channel(ChannelObj) = "query channel",
    Operation(OperationObj) = "channel operation",
    Group(GroupObj) = "group",
    FragmentInfo(FragmentInfoObj) = "fragment info",
    Vfs(VfsObj) = "vfs",
    File(FileObj) = "vfs file",
}

struct Entry {
    kind: &'static str,
    children: Vec<usize>,
    object: Option<Object>,
    free_count: u32,
    freed_seq: Option<u64>,
    violations: Vec<Violation>,
}

/// All objects ever handed out, live or freed.
pub(crate) struct Registry {
    entries: BTreeMap<usize, Entry>,
    next_id: usize,
    free_seq: u64,
}

impl Registry {
    pub(crate) const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            free_seq: 0,
        }
    }

    /// Registers `value` as a child of every id in `parents` and returns its id.
    pub(crate) fn insert<T: Kind>(&mut self, value: T, parents: &[usize]) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        for parent in parents {
            if let Some(entry) = self.entries.get_mut(parent) {
                entry.children.push(id);
            }
        }
        self.entries.insert(
            id,
            Entry {
                kind: T::NAME,
                children: Vec::new(),
                object: Some(value.wrap()),
                free_count: 0,
                freed_seq: None,
                violations: Vec::new(),
            },
        );
        trace!(kind = T::NAME, id, "allocated");
        id
    }

    fn live_entry(&mut self, id: usize, kind: &'static str) -> SimResult<&mut Entry> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(SimError::InvalidHandle { kind })?;
        if entry.object.is_none() {
            warn!(kind = entry.kind, id, "use after free");
            entry.violations.push(Violation::UseAfterFree);
            return Err(SimError::UseAfterFree { kind: entry.kind });
        }
        Ok(entry)
    }

    pub(crate) fn get<T: Kind>(&mut self, id: usize) -> SimResult<&T> {
        self.live_entry(id, T::NAME)?
            .object
            .as_ref()
            .and_then(T::peek)
            .ok_or(SimError::InvalidHandle { kind: T::NAME })
    }

    pub(crate) fn get_mut<T: Kind>(&mut self, id: usize) -> SimResult<&mut T> {
        self.live_entry(id, T::NAME)?
            .object
            .as_mut()
            .and_then(T::peek_mut)
            .ok_or(SimError::InvalidHandle { kind: T::NAME })
    }

    /// Frees `id`, recording a violation for a double free or for children
    /// that are still live.
    pub(crate) fn free(&mut self, id: usize) {
        let Some(entry) = self.entries.get_mut(&id) else {
            warn!(id, "free of unknown object");
            return;
        };
        entry.free_count += 1;
        let Some(object) = entry.object.take() else {
            warn!(kind = entry.kind, id, "double free");
            entry.violations.push(Violation::DoubleFree);
            return;
        };
        self.free_seq += 1;
        entry.freed_seq = Some(self.free_seq);
        trace!(kind = entry.kind, id, "freed");
        let children = entry.children.clone();
        drop(object);

        for child in children {
            if !self.is_live(child) {
                continue;
            }
            let violation = Violation::ParentFreedBeforeChild { parent: id, child };
            warn!(parent = id, child, "parent freed before child");
            for target in [id, child] {
                if let Some(entry) = self.entries.get_mut(&target) {
                    entry.violations.push(violation.clone());
                }
            }
        }
    }

    pub(crate) fn is_live(&self, id: usize) -> bool {
        self.entries.get(&id).is_some_and(|e| e.object.is_some())
    }

    pub(crate) fn free_count(&self, id: usize) -> u32 {
        self.entries.get(&id).map_or(0, |e| e.free_count)
    }

    pub(crate) fn violations(&self, id: usize) -> Vec<Violation> {
        self.entries
            .get(&id)
            .map(|e| e.violations.clone())
            .unwrap_or_default()
    }

    pub(crate) fn freed_before(&self, first: usize, second: usize) -> bool {
        let seq = |id| self.entries.get(&id).and_then(|e: &Entry| e.freed_seq);
        matches!((seq(first), seq(second)), (Some(a), Some(b)) if a < b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigObj {
        ConfigObj::default()
    }

    #[test]
    fn ids_are_never_reused() {
        let mut registry = Registry::new();
        let a = registry.insert(config(), &[]);
        registry.free(a);
        let b = registry.insert(config(), &[]);
        assert_ne!(a, b);
        assert!(!registry.is_live(a));
        assert!(registry.is_live(b));
    }

    #[test]
    fn double_free_and_use_after_free() {
        let mut registry = Registry::new();
        let id = registry.insert(config(), &[]);
        registry.free(id);
        registry.free(id);
        assert_eq!(registry.free_count(id), 2);
        assert!(matches!(
            registry.get::<ConfigObj>(id),
            Err(SimError::UseAfterFree { kind: "config" })
        ));
        assert_eq!(
            registry.violations(id),
            vec![Violation::DoubleFree, Violation::UseAfterFree]
        );
    }

    #[test]
    fn parent_before_child() {
        let mut registry = Registry::new();
        let parent = registry.insert(config(), &[]);
        let child = registry.insert(config(), &[parent]);
        registry.free(parent);
        registry.free(child);
        let expected = Violation::ParentFreedBeforeChild { parent, child };
        assert_eq!(registry.violations(parent), vec![expected.clone()]);
        assert_eq!(registry.violations(child), vec![expected]);
        assert!(registry.freed_before(parent, child));
        assert!(!registry.freed_before(child, parent));
    }

    #[test]
    fn wrong_kind_is_invalid() {
        let mut registry = Registry::new();
        let id = registry.insert(config(), &[]);
        assert!(matches!(
            registry.get::<ErrorObj>(id),
            Err(SimError::InvalidHandle { kind: "error" })
        ));
    }
}
