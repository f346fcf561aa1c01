//! Modules, predicates and their clauses.

use crate::atom::{Atom, Interner};
use crate::error::{Error, Result};
use crate::heap::{Heap, TermRef, VarId};
use crate::store::{build_term, VarNames};
use crate::term::Term;
use indexmap::IndexMap;

/// Predicate indicator: name and arity.
pub(crate) type PredKey = (Atom, u32);

/// The principal functor of a first argument, used to skip clauses that
/// cannot match a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgKey {
    Atom(Atom),
    Int(i64),
    Float(u64),
    Functor(Atom, u32),
}

impl ArgKey {
    /// The key of an already dereferenced term; `None` for variables.
    pub(crate) fn of(term: TermRef, heap: &Heap) -> Option<ArgKey> {
        match term {
            TermRef::Atom(atom) => Some(ArgKey::Atom(atom)),
            TermRef::Int(value) => Some(ArgKey::Int(value)),
            TermRef::Float(value) => Some(ArgKey::Float(value.to_bits())),
            TermRef::Struct(id) => {
                let functor = heap.functor(id);
                Some(ArgKey::Functor(functor.name, functor.arity))
            }
            TermRef::Var(_) => None,
        }
    }
}

/// A stored clause. Its terms live in a private heap with variables
/// numbered `0..var_count`.
#[derive(Debug, Clone)]
pub(crate) struct Clause {
    heap: Heap,
    pub(crate) head: TermRef,
    pub(crate) body: TermRef,
    pub(crate) var_count: VarId,
    key: Option<ArgKey>,
}

impl Clause {
    /// Compiles `Head :- Body` or a fact.
    pub(crate) fn compile(term: &Term, atoms: &mut impl Interner) -> Result<(PredKey, Clause)> {
        let (head, body) = split_clause(term);
        let indicator = match head {
            Term::Atom(name) => (atoms.intern(name), 0),
            Term::Compound(name, args) => (
                atoms.intern(name),
                u32::try_from(args.len()).unwrap_or(u32::MAX),
            ),
            Term::List(..) => (Atom::DOT, 2),
            Term::Var(_) => return Err(Error::Instantiation),
            other => return Err(Error::type_error("callable", other.clone())),
        };
        if let Some(body) = body {
            check_body(body)?;
        }

        let mut heap = Heap::new();
        let mut names = VarNames::starting_at(0);
        let head = build_term(&mut heap, head, atoms, &mut names);
        let body = match body {
            Some(body) => build_term(&mut heap, body, atoms, &mut names),
            None => TermRef::TRUE,
        };
        let key = match head {
            TermRef::Struct(id) => ArgKey::of(heap.arg(id, 0), &heap),
            _ => None,
        };
        let clause = Clause {
            heap,
            head,
            body,
            var_count: names.end(),
            key,
        };
        Ok((indicator, clause))
    }

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    /// False when the clause cannot match a call whose first argument has
    /// key `key`.
    pub(crate) fn may_match(&self, key: Option<ArgKey>) -> bool {
        match (self.key, key) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        }
    }
}

/// Splits a clause term into head and body. Facts have no body.
pub(crate) fn split_clause(term: &Term) -> (&Term, Option<&Term>) {
    match term {
        Term::Compound(name, args) if name == ":-" && args.len() == 2 => {
            (&args[0], Some(&args[1]))
        }
        _ => (term, None),
    }
}

/// Rejects bodies with a number in a goal position.
fn check_body(body: &Term) -> Result<()> {
    let mut stack = vec![body];
    while let Some(goal) = stack.pop() {
        match goal {
            Term::Integer(_) | Term::Float(_) => {
                return Err(Error::type_error("callable", body.clone()));
            }
            Term::Compound(name, args)
                if args.len() == 2 && matches!(name.as_str(), "," | ";" | "->") =>
            {
                stack.extend(args);
            }
            _ => {}
        }
    }
    Ok(())
}

/// The clauses of one predicate, in program order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Predicate {
    pub(crate) clauses: Vec<Clause>,
    pub(crate) dynamic: bool,
}

/// The predicates of one module.
#[derive(Debug, Clone, Default)]
pub(crate) struct Module {
    predicates: IndexMap<PredKey, Predicate>,
}

impl Module {
    pub(crate) fn predicate(&self, key: PredKey) -> Option<&Predicate> {
        self.predicates.get(&key)
    }

    pub(crate) fn predicate_mut(&mut self, key: PredKey) -> &mut Predicate {
        self.predicates.entry(key).or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.predicates.len()
    }
}

/// Every consulted module, in consult order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    modules: IndexMap<Atom, Module>,
}

impl Database {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs a freshly consulted module, dropping whatever the module held
    /// before. A module keeps its place in consult order.
    pub(crate) fn replace_module(&mut self, name: Atom, module: Module) {
        self.modules.insert(name, module);
    }

    /// Finds the predicate a goal resolves to from `context`: the context
    /// module, then `user`, then the other modules in consult order, then
    /// `system`. Returns the defining module too.
    pub(crate) fn lookup(&self, context: Atom, key: PredKey) -> Option<(Atom, &Predicate)> {
        let found = |module: Atom| {
            self.modules
                .get(&module)
                .and_then(|m| m.predicate(key))
                .map(|predicate| (module, predicate))
        };
        found(context)
            .or_else(|| found(Atom::USER))
            .or_else(|| {
                self.modules
                    .iter()
                    .filter(|&(&name, _)| {
                        name != context && name != Atom::USER && name != Atom::SYSTEM
                    })
                    .find_map(|(&name, module)| module.predicate(key).map(|p| (name, p)))
            })
            .or_else(|| found(Atom::SYSTEM))
    }

    /// The predicate `key` as defined in `module` itself.
    pub(crate) fn predicate(&self, module: Atom, key: PredKey) -> Option<&Predicate> {
        self.modules.get(&module).and_then(|m| m.predicate(key))
    }

    /// Adds a clause at the front or the back of its predicate. Predicates
    /// created this way are dynamic.
    pub(crate) fn assert(&mut self, module: Atom, key: PredKey, clause: Clause, front: bool) {
        let predicate = self
            .modules
            .entry(module)
            .or_default()
            .predicates
            .entry(key)
            .or_insert_with(|| Predicate {
                clauses: Vec::new(),
                dynamic: true,
            });
        if front {
            predicate.clauses.insert(0, clause);
        } else {
            predicate.clauses.push(clause);
        }
    }

    /// Removes the first clause of `key` in `module` accepted by `matcher`.
    pub(crate) fn retract(
        &mut self,
        module: Atom,
        key: PredKey,
        mut matcher: impl FnMut(&Clause) -> bool,
    ) -> bool {
        let Some(predicate) = self
            .modules
            .get_mut(&module)
            .and_then(|m| m.predicates.get_mut(&key))
        else {
            return false;
        };
        match predicate.clauses.iter().position(|clause| matcher(clause)) {
            Some(index) => {
                predicate.clauses.remove(index);
                true
            }
            None => false,
        }
    }
}
