//! Arena storage for compound terms.
//!
//! Atoms, numbers and variables are immediate [`TermRef`] values; only
//! compound terms allocate. A [`Heap`] is append-only: terms are released in
//! bulk by truncating to a [`HeapMark`], never one at a time.

use crate::atom::Atom;
use std::mem::size_of;

/// Index of a variable in a binding vector.
pub(crate) type VarId = u32;

/// Index of a compound term in a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct StructId(pub(crate) u32);

/// A copyable handle to a term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TermRef {
    Atom(Atom),
    Int(i64),
    Float(f64),
    Var(VarId),
    Struct(StructId),
}

impl TermRef {
    pub(crate) const NIL: TermRef = TermRef::Atom(Atom::NIL);
    pub(crate) const TRUE: TermRef = TermRef::Atom(Atom::TRUE);
}

/// Header of a compound term: its name, arity and where its arguments start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Functor {
    pub(crate) name: Atom,
    pub(crate) arity: u32,
    start: u32,
}

/// Saved allocation point of a [`Heap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HeapMark {
    structs: usize,
    args: usize,
}

/// Offsets produced by [`Heap::copy_from`], used to relocate the roots of the
/// copied terms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Relocation {
    structs: u32,
    vars: VarId,
}

impl Relocation {
    pub(crate) fn apply(self, term: TermRef) -> TermRef {
        match term {
            TermRef::Struct(StructId(id)) => TermRef::Struct(StructId(id + self.structs)),
            TermRef::Var(var) => TermRef::Var(var + self.vars),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Heap {
    structs: Vec<Functor>,
    args: Vec<TermRef>,
}

impl Heap {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates a compound term.
    pub(crate) fn new_struct(&mut self, name: Atom, args: &[TermRef]) -> TermRef {
        let id = self.structs.len();
        self.structs.push(Functor {
            name,
            arity: u32::try_from(args.len()).unwrap_or(u32::MAX),
            start: u32::try_from(self.args.len()).unwrap_or(u32::MAX),
        });
        self.args.extend_from_slice(args);
        TermRef::Struct(StructId(u32::try_from(id).unwrap_or(u32::MAX)))
    }

    pub(crate) fn functor(&self, id: StructId) -> Functor {
        self.structs[id.0 as usize]
    }

    pub(crate) fn args(&self, id: StructId) -> &[TermRef] {
        let functor = self.structs[id.0 as usize];
        let start = functor.start as usize;
        &self.args[start..start + functor.arity as usize]
    }

    pub(crate) fn arg(&self, id: StructId, index: usize) -> TermRef {
        self.args(id)[index]
    }

    /// Fills an argument of a term that is still being built.
    pub(crate) fn set_arg(&mut self, id: StructId, index: usize, value: TermRef) {
        let start = self.structs[id.0 as usize].start as usize;
        self.args[start + index] = value;
    }

    /// Builds a list from `items` ending in `tail`.
    pub(crate) fn new_list(&mut self, items: &[TermRef], tail: TermRef) -> TermRef {
        items
            .iter()
            .rev()
            .fold(tail, |rest, &item| self.new_struct(Atom::DOT, &[item, rest]))
    }

    /// Appends every term of `other` to this heap, renumbering variables by
    /// `var_base`. Runs in one linear pass over `other`.
    pub(crate) fn copy_from(&mut self, other: &Heap, var_base: VarId) -> Relocation {
        let relocation = Relocation {
            structs: u32::try_from(self.structs.len()).unwrap_or(u32::MAX),
            vars: var_base,
        };
        let args_base = u32::try_from(self.args.len()).unwrap_or(u32::MAX);
        self.structs
            .extend(other.structs.iter().map(|functor| Functor {
                start: functor.start + args_base,
                ..*functor
            }));
        self.args
            .extend(other.args.iter().map(|&arg| relocation.apply(arg)));
        relocation
    }

    pub(crate) fn mark(&self) -> HeapMark {
        HeapMark {
            structs: self.structs.len(),
            args: self.args.len(),
        }
    }

    pub(crate) fn truncate(&mut self, mark: HeapMark) {
        self.structs.truncate(mark.structs);
        self.args.truncate(mark.args);
    }

    pub(crate) fn size_in_bytes(&self) -> usize {
        self.structs.len() * size_of::<Functor>() + self.args.len() * size_of::<TermRef>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_round_trip() {
        let mut heap = Heap::new();
        let name = Atom(100);
        let t = heap.new_struct(name, &[TermRef::Int(1), TermRef::Var(0)]);
        let TermRef::Struct(id) = t else {
            panic!("expected a struct")
        };
        assert_eq!(heap.functor(id).name, name);
        assert_eq!(heap.functor(id).arity, 2);
        assert_eq!(heap.args(id), &[TermRef::Int(1), TermRef::Var(0)]);
    }

    #[test]
    fn test_copy_from_relocates_structs_and_vars() {
        let mut clause = Heap::new();
        let inner = clause.new_struct(Atom(100), &[TermRef::Var(0)]);
        let outer = clause.new_struct(Atom(101), &[inner, TermRef::Var(1)]);

        let mut session = Heap::new();
        session.new_struct(Atom(102), &[TermRef::Int(7)]);
        let relocation = session.copy_from(&clause, 10);

        let TermRef::Struct(root) = relocation.apply(outer) else {
            panic!("expected a struct")
        };
        assert_eq!(session.functor(root).name, Atom(101));
        assert_eq!(session.arg(root, 1), TermRef::Var(11));
        let TermRef::Struct(child) = session.arg(root, 0) else {
            panic!("expected a struct")
        };
        assert_eq!(session.args(child), &[TermRef::Var(10)]);
    }

    #[test]
    fn test_truncate_releases_everything_after_mark() {
        let mut heap = Heap::new();
        heap.new_struct(Atom(100), &[TermRef::Int(1)]);
        let mark = heap.mark();
        let before = heap.size_in_bytes();
        heap.new_list(&[TermRef::Int(1), TermRef::Int(2)], TermRef::NIL);
        assert!(heap.size_in_bytes() > before);
        heap.truncate(mark);
        assert_eq!(heap.size_in_bytes(), before);
    }
}
