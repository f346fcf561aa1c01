//! Bindings, the trail, and conversion between owned and stored terms.

use crate::atom::{Atom, Interner};
use crate::heap::{Heap, HeapMark, Relocation, StructId, TermRef, VarId};
use crate::term::Term;
use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use std::mem::size_of;

/// Source variable names seen while building terms.
///
/// `_` is anonymous: every occurrence is a distinct variable and none is
/// recorded.
#[derive(Debug, Clone, Default)]
pub(crate) struct VarNames {
    names: IndexMap<String, VarId>,
    next: VarId,
}

impl VarNames {
    pub(crate) fn starting_at(base: VarId) -> Self {
        Self {
            names: IndexMap::new(),
            next: base,
        }
    }

    fn get_or_insert(&mut self, name: &str) -> VarId {
        if name == "_" {
            return self.fresh();
        }
        if let Some(&var) = self.names.get(name) {
            return var;
        }
        let var = self.fresh();
        self.names.insert(name.to_string(), var);
        var
    }

    fn fresh(&mut self) -> VarId {
        let var = self.next;
        self.next += 1;
        var
    }

    /// One past the highest variable handed out.
    pub(crate) fn end(&self) -> VarId {
        self.next
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, VarId)> {
        self.names.iter().map(|(name, &var)| (name.as_str(), var))
    }
}

enum BuildTask<'t> {
    Visit(&'t Term),
    Struct(Atom, usize),
    List(usize),
}

/// Stores an owned term in `heap`, numbering new variables through `names`.
pub(crate) fn build_term(
    heap: &mut Heap,
    term: &Term,
    atoms: &mut impl Interner,
    names: &mut VarNames,
) -> TermRef {
    let mut tasks = vec![BuildTask::Visit(term)];
    let mut out: Vec<TermRef> = Vec::new();
    while let Some(task) = tasks.pop() {
        match task {
            BuildTask::Visit(term) => match term {
                Term::Atom(name) => out.push(TermRef::Atom(atoms.intern(name))),
                Term::Integer(value) => out.push(TermRef::Int(*value)),
                Term::Float(value) => out.push(TermRef::Float(*value)),
                Term::Var(name) => out.push(TermRef::Var(names.get_or_insert(name))),
                Term::Compound(name, args) => {
                    tasks.push(BuildTask::Struct(atoms.intern(name), args.len()));
                    tasks.extend(args.iter().rev().map(BuildTask::Visit));
                }
                Term::List(items, tail) => {
                    tasks.push(BuildTask::List(items.len()));
                    tasks.push(BuildTask::Visit(tail));
                    tasks.extend(items.iter().rev().map(BuildTask::Visit));
                }
            },
            BuildTask::Struct(name, arity) => {
                let start = out.len() - arity;
                let term = heap.new_struct(name, &out[start..]);
                out.truncate(start);
                out.push(term);
            }
            BuildTask::List(len) => {
                let tail = out.pop().unwrap_or(TermRef::NIL);
                let start = out.len() - len;
                let term = heap.new_list(&out[start..], tail);
                out.truncate(start);
                out.push(term);
            }
        }
    }
    out.pop().unwrap_or(TermRef::NIL)
}

/// A term copied out of a store into a heap of its own, with its variables
/// renumbered from zero. Survives backtracking of the store it came from.
#[derive(Debug, Clone)]
pub(crate) struct Detached {
    heap: Heap,
    root: TermRef,
    var_count: VarId,
}

impl Detached {
    pub(crate) fn size_in_bytes(&self) -> usize {
        self.heap.size_in_bytes()
    }
}

enum Slot {
    Root,
    Arg(StructId, usize),
}

enum ResolveTask {
    Visit(TermRef),
    Struct(StructId),
    List(Vec<StructId>),
}

/// The mutable state of one resolution: term heap, bindings and trail.
#[derive(Debug, Clone)]
pub(crate) struct Store {
    pub(crate) heap: Heap,
    vars: Vec<Option<TermRef>>,
    trail: Vec<VarId>,
    /// Variables at or above this id are newer than every choice point and
    /// are not trailed: backtracking discards them wholesale.
    pub(crate) trail_floor: VarId,
    pub(crate) occurs_check: bool,
}

impl Store {
    pub(crate) fn new(occurs_check: bool) -> Self {
        Self {
            heap: Heap::new(),
            vars: Vec::new(),
            trail: Vec::new(),
            trail_floor: VarId::MAX,
            occurs_check,
        }
    }

    pub(crate) fn var_count(&self) -> VarId {
        VarId::try_from(self.vars.len()).unwrap_or(VarId::MAX)
    }

    pub(crate) fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub(crate) fn new_var(&mut self) -> TermRef {
        let var = self.var_count();
        self.vars.push(None);
        TermRef::Var(var)
    }

    /// Makes sure variables `0..end` exist.
    pub(crate) fn reserve_vars(&mut self, end: VarId) {
        if self.vars.len() < end as usize {
            self.vars.resize(end as usize, None);
        }
    }

    pub(crate) fn size_in_bytes(&self) -> usize {
        self.heap.size_in_bytes()
            + self.vars.len() * size_of::<Option<TermRef>>()
            + self.trail.len() * size_of::<VarId>()
    }

    pub(crate) fn build(
        &mut self,
        term: &Term,
        atoms: &mut impl Interner,
        names: &mut VarNames,
    ) -> TermRef {
        let root = build_term(&mut self.heap, term, atoms, names);
        self.reserve_vars(names.end());
        root
    }

    /// Follows variable bindings until a non-variable or an unbound variable.
    pub(crate) fn deref(&self, mut term: TermRef) -> TermRef {
        while let TermRef::Var(var) = term {
            match self.vars.get(var as usize).copied().flatten() {
                Some(value) => term = value,
                None => break,
            }
        }
        term
    }

    pub(crate) fn bind(&mut self, var: VarId, value: TermRef) {
        self.vars[var as usize] = Some(value);
        if var < self.trail_floor {
            self.trail.push(var);
        }
    }

    /// Tests whether two terms unify without leaving any binding behind.
    pub(crate) fn unifiable(&mut self, left: TermRef, right: TermRef) -> bool {
        let floor = std::mem::replace(&mut self.trail_floor, VarId::MAX);
        let mark = self.trail.len();
        let result = self.unify(left, right);
        self.undo_to(mark);
        self.trail_floor = floor;
        result
    }

    /// Undoes every binding made after the trail had `len` entries.
    pub(crate) fn undo_to(&mut self, len: usize) {
        for var in self.trail.drain(len..) {
            if let Some(slot) = self.vars.get_mut(var as usize) {
                *slot = None;
            }
        }
    }

    /// Rolls the store back to a checkpoint.
    pub(crate) fn restore(&mut self, trail_len: usize, heap: HeapMark, var_count: VarId) {
        self.undo_to(trail_len);
        self.heap.truncate(heap);
        self.vars.truncate(var_count as usize);
    }

    /// Copies a detached heap in, giving its variables fresh ids.
    pub(crate) fn import(&mut self, heap: &Heap, var_count: VarId) -> Relocation {
        let relocation = self.heap.copy_from(heap, self.var_count());
        let end = self.var_count() + var_count;
        self.reserve_vars(end);
        relocation
    }

    pub(crate) fn import_detached(&mut self, detached: &Detached) -> TermRef {
        self.import(&detached.heap, detached.var_count)
            .apply(detached.root)
    }

    /// Copies the current instance of `root` into its own heap. Shared and
    /// cyclic subterms stay shared.
    pub(crate) fn detach(&self, root: TermRef) -> Detached {
        let mut heap = Heap::new();
        let mut vars: IndexMap<VarId, VarId> = IndexMap::new();
        let mut copied: IndexMap<StructId, StructId> = IndexMap::new();
        let mut new_root = TermRef::NIL;
        let mut stack = vec![(root, Slot::Root)];
        while let Some((term, slot)) = stack.pop() {
            let value = match self.deref(term) {
                TermRef::Var(var) => {
                    let next = VarId::try_from(vars.len()).unwrap_or(VarId::MAX);
                    TermRef::Var(*vars.entry(var).or_insert(next))
                }
                TermRef::Struct(id) => {
                    if let Some(&done) = copied.get(&id) {
                        TermRef::Struct(done)
                    } else {
                        let functor = self.heap.functor(id);
                        let placeholders: SmallVec<[TermRef; 8]> =
                            SmallVec::from_elem(TermRef::NIL, functor.arity as usize);
                        let TermRef::Struct(new) = heap.new_struct(functor.name, &placeholders)
                        else {
                            continue;
                        };
                        copied.insert(id, new);
                        for (index, &arg) in self.heap.args(id).iter().enumerate() {
                            stack.push((arg, Slot::Arg(new, index)));
                        }
                        TermRef::Struct(new)
                    }
                }
                other => other,
            };
            match slot {
                Slot::Root => new_root = value,
                Slot::Arg(id, index) => heap.set_arg(id, index, value),
            }
        }
        Detached {
            heap,
            root: new_root,
            var_count: VarId::try_from(vars.len()).unwrap_or(VarId::MAX),
        }
    }

    /// Converts a stored term to an owned one. Unbound variables are named
    /// by `var_name`; a subterm that contains itself is cut off and rendered
    /// as a variable `_S<n>`.
    pub(crate) fn resolve(
        &self,
        root: TermRef,
        atoms: &impl Interner,
        var_name: &mut impl FnMut(VarId) -> String,
    ) -> Term {
        let mut tasks = vec![ResolveTask::Visit(root)];
        let mut out: Vec<Term> = Vec::new();
        let mut on_path: IndexSet<StructId> = IndexSet::new();
        let mut cycles: IndexMap<StructId, usize> = IndexMap::new();
        while let Some(task) = tasks.pop() {
            match task {
                ResolveTask::Visit(term) => match self.deref(term) {
                    TermRef::Atom(atom) => out.push(Term::Atom(atoms.name(atom).to_string())),
                    TermRef::Int(value) => out.push(Term::Integer(value)),
                    TermRef::Float(value) => out.push(Term::Float(value)),
                    TermRef::Var(var) => out.push(Term::Var(var_name(var))),
                    TermRef::Struct(id) if on_path.contains(&id) => {
                        let next = cycles.len();
                        let n = *cycles.entry(id).or_insert(next);
                        out.push(Term::Var(format!("_S{n}")));
                    }
                    TermRef::Struct(id) => {
                        let functor = self.heap.functor(id);
                        if functor.name == Atom::DOT && functor.arity == 2 {
                            let mut cells = vec![id];
                            on_path.insert(id);
                            let mut tail = self.deref(self.heap.arg(id, 1));
                            while let TermRef::Struct(next) = tail {
                                let functor = self.heap.functor(next);
                                if functor.name != Atom::DOT
                                    || functor.arity != 2
                                    || on_path.contains(&next)
                                {
                                    break;
                                }
                                on_path.insert(next);
                                cells.push(next);
                                tail = self.deref(self.heap.arg(next, 1));
                            }
                            let heads: Vec<TermRef> =
                                cells.iter().map(|&cell| self.heap.arg(cell, 0)).collect();
                            tasks.push(ResolveTask::List(cells));
                            tasks.push(ResolveTask::Visit(tail));
                            tasks.extend(heads.into_iter().rev().map(ResolveTask::Visit));
                        } else {
                            on_path.insert(id);
                            tasks.push(ResolveTask::Struct(id));
                            tasks.extend(
                                self.heap.args(id).iter().rev().map(|&arg| ResolveTask::Visit(arg)),
                            );
                        }
                    }
                },
                ResolveTask::Struct(id) => {
                    on_path.swap_remove(&id);
                    let functor = self.heap.functor(id);
                    let start = out.len() - functor.arity as usize;
                    let args = out.split_off(start);
                    out.push(Term::compound(atoms.name(functor.name), args));
                }
                ResolveTask::List(cells) => {
                    let tail = out.pop().unwrap_or_else(Term::nil);
                    let start = out.len() - cells.len();
                    let items = out.split_off(start);
                    for cell in &cells {
                        on_path.swap_remove(cell);
                    }
                    out.push(Term::list_with_tail(items, tail));
                }
            }
        }
        out.pop().unwrap_or_else(Term::nil)
    }

    /// The items of a proper list, or `None` for a partial or improper list.
    pub(crate) fn list_items(&self, list: TermRef) -> Option<Vec<TermRef>> {
        let mut items = Vec::new();
        let mut seen: IndexSet<StructId> = IndexSet::new();
        let mut term = self.deref(list);
        loop {
            match term {
                TermRef::Atom(Atom::NIL) => return Some(items),
                TermRef::Struct(id) => {
                    let functor = self.heap.functor(id);
                    if functor.name != Atom::DOT || functor.arity != 2 || !seen.insert(id) {
                        return None;
                    }
                    items.push(self.heap.arg(id, 0));
                    term = self.deref(self.heap.arg(id, 1));
                }
                _ => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;

    fn unnamed(var: VarId) -> String {
        format!("_G{var}")
    }

    #[test]
    fn test_build_then_resolve_preserves_the_term() {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let term = Term::parse("foo(X, [1, 2.5 | T], 'hello world', X)").unwrap();
        let mut names = VarNames::starting_at(0);
        let root = store.build(&term, &mut atoms, &mut names);
        let names: Vec<_> = names.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, ["X", "T"]);
        let back = store.resolve(root, &atoms, &mut unnamed);
        assert_eq!(back.to_string(), "foo(_G0,[1,2.5|_G1],'hello world',_G0)");
    }

    #[test]
    fn test_anonymous_variables_are_distinct() {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let mut names = VarNames::starting_at(0);
        let root = store.build(&Term::parse("f(_, _)").unwrap(), &mut atoms, &mut names);
        assert_eq!(names.end(), 2);
        assert_eq!(names.iter().count(), 0);
        assert_eq!(store.resolve(root, &atoms, &mut unnamed).to_string(), "f(_G0,_G1)");
    }

    #[test]
    fn test_bind_and_undo() {
        let mut store = Store::new(false);
        let TermRef::Var(x) = store.new_var() else {
            panic!("expected a variable")
        };
        let mark = store.trail_len();
        store.bind(x, TermRef::Int(3));
        assert_eq!(store.deref(TermRef::Var(x)), TermRef::Int(3));
        store.undo_to(mark);
        assert_eq!(store.deref(TermRef::Var(x)), TermRef::Var(x));
    }

    #[test]
    fn test_cyclic_terms_resolve_finitely() {
        let mut atoms = AtomTable::new();
        let f = atoms.intern("f");
        let mut store = Store::new(false);
        let TermRef::Var(x) = store.new_var() else {
            panic!("expected a variable")
        };
        let cyclic = store.heap.new_struct(f, &[TermRef::Var(x)]);
        store.bind(x, cyclic);
        let term = store.resolve(TermRef::Var(x), &atoms, &mut unnamed);
        assert_eq!(term.to_string(), "f(_S0)");

        let TermRef::Var(l) = store.new_var() else {
            panic!("expected a variable")
        };
        let list = store.heap.new_list(&[TermRef::Int(1)], TermRef::Var(l));
        store.bind(l, list);
        let term = store.resolve(TermRef::Var(l), &atoms, &mut unnamed);
        assert_eq!(term.to_string(), "[1|_S0]");
        assert_eq!(store.list_items(list), None);
    }

    #[test]
    fn test_detach_survives_backtracking() {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let mut names = VarNames::starting_at(0);
        let root = store.build(&Term::parse("p(X, Y, X)").unwrap(), &mut atoms, &mut names);
        let heap_mark = store.heap.mark();
        let trail = store.trail_len();
        let vars = store.var_count();
        store.bind(0, TermRef::Int(1));
        let detached = store.detach(root);

        store.restore(trail, heap_mark, vars);
        let copy = store.import_detached(&detached);
        let term = store.resolve(copy, &atoms, &mut unnamed);
        assert_eq!(term.to_string(), "p(1,_G2,1)");
    }

    #[test]
    fn test_list_items() {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let mut names = VarNames::starting_at(0);
        let proper = store.build(&Term::parse("[a, b]").unwrap(), &mut atoms, &mut names);
        assert_eq!(store.list_items(proper).map(|items| items.len()), Some(2));
        let partial = store.build(&Term::parse("[a | T]").unwrap(), &mut atoms, &mut names);
        assert_eq!(store.list_items(partial), None);
    }
}
