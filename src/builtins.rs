//! Deterministic built-in predicates.
//!
//! A built-in either succeeds once, fails, or raises an error; none of them
//! leaves a choice point. Nondeterministic library predicates are written in
//! Prolog in `prelude.pl` on top of these.

use crate::arith::{self, compare_numbers, Number};
use crate::atom::{Atom, AtomTable, Interner};
use crate::database::PredKey;
use crate::engine::Engine;
use crate::error::{Error, EvaluationError, ParseError, Result};
use crate::heap::{StructId, TermRef, VarId};
use crate::parser;
use crate::store::VarNames;
use crate::term::{format_float, Term};
use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// A built-in receives the arguments of the goal, not yet dereferenced.
pub(crate) type Builtin = fn(&mut Engine<'_>, &[TermRef]) -> Result<bool>;

const MAX_ARITY: i64 = 1 << 20;

const BUILTINS: &[(&str, u32, Builtin)] = &[
    // unification and comparison
    ("=", 2, unify),
    ("\\=", 2, not_unifiable),
    ("unify_with_occurs_check", 2, unify_with_occurs_check),
    ("==", 2, |e, args| standard(e, args, Ordering::is_eq)),
    ("\\==", 2, |e, args| standard(e, args, Ordering::is_ne)),
    ("@<", 2, |e, args| standard(e, args, Ordering::is_lt)),
    ("@>", 2, |e, args| standard(e, args, Ordering::is_gt)),
    ("@=<", 2, |e, args| standard(e, args, Ordering::is_le)),
    ("@>=", 2, |e, args| standard(e, args, Ordering::is_ge)),
    ("compare", 3, compare),
    // type checks
    ("var", 1, |e, args| type_check(e, args, |t| matches!(t, TermRef::Var(_)))),
    ("nonvar", 1, |e, args| type_check(e, args, |t| !matches!(t, TermRef::Var(_)))),
    ("atom", 1, |e, args| type_check(e, args, |t| matches!(t, TermRef::Atom(_)))),
    ("number", 1, |e, args| {
        type_check(e, args, |t| matches!(t, TermRef::Int(_) | TermRef::Float(_)))
    }),
    ("integer", 1, |e, args| type_check(e, args, |t| matches!(t, TermRef::Int(_)))),
    ("float", 1, |e, args| type_check(e, args, |t| matches!(t, TermRef::Float(_)))),
    ("atomic", 1, |e, args| {
        type_check(e, args, |t| !matches!(t, TermRef::Var(_) | TermRef::Struct(_)))
    }),
    ("compound", 1, |e, args| type_check(e, args, |t| matches!(t, TermRef::Struct(_)))),
    ("callable", 1, |e, args| {
        type_check(e, args, |t| matches!(t, TermRef::Atom(_) | TermRef::Struct(_)))
    }),
    ("is_list", 1, |e, args| Ok(e.store.list_items(args[0]).is_some())),
    ("ground", 1, |e, args| Ok(is_ground(e, args[0]))),
    // arithmetic
    ("is", 2, is),
    ("=:=", 2, |e, args| numeric(e, args, |o| o == Some(Ordering::Equal))),
    ("=\\=", 2, |e, args| numeric(e, args, |o| o != Some(Ordering::Equal))),
    ("<", 2, |e, args| numeric(e, args, |o| o == Some(Ordering::Less))),
    (">", 2, |e, args| numeric(e, args, |o| o == Some(Ordering::Greater))),
    ("=<", 2, |e, args| {
        numeric(e, args, |o| matches!(o, Some(Ordering::Less | Ordering::Equal)))
    }),
    (">=", 2, |e, args| {
        numeric(e, args, |o| matches!(o, Some(Ordering::Greater | Ordering::Equal)))
    }),
    ("succ", 2, succ),
    ("plus", 3, plus),
    // term construction and inspection
    ("functor", 3, functor),
    ("arg", 3, arg),
    ("=..", 2, univ),
    ("copy_term", 2, copy_term),
    ("term_variables", 2, term_variables),
    // atoms and text
    ("atom_codes", 2, |e, args| convert(e, args, Kind::Atom, Encoding::Codes)),
    ("atom_chars", 2, |e, args| convert(e, args, Kind::Atom, Encoding::Chars)),
    ("number_codes", 2, |e, args| convert(e, args, Kind::Number, Encoding::Codes)),
    ("number_chars", 2, |e, args| convert(e, args, Kind::Number, Encoding::Chars)),
    ("char_code", 2, char_code),
    ("atom_length", 2, atom_length),
    ("atom_number", 2, atom_number),
    ("$atom_concat", 3, atom_concat),
    ("$atom_splits", 2, atom_splits),
    ("upcase_atom", 2, |e, args| map_case(e, args, str::to_uppercase)),
    ("downcase_atom", 2, |e, args| map_case(e, args, str::to_lowercase)),
    ("atomic_list_concat", 2, atomic_list_concat),
    ("atomic_list_concat", 3, atomic_list_concat_sep),
    ("term_to_atom", 2, term_to_atom),
    // sorting
    ("msort", 2, |e, args| sort_list(e, args[0], args[1], 0, Ordering::is_le)),
    ("sort", 2, |e, args| sort_list(e, args[0], args[1], 0, Ordering::is_lt)),
    ("sort", 4, sort4),
    ("keysort", 2, keysort),
];

/// The table of built-in predicates, keyed by name and arity.
#[derive(Clone)]
pub(crate) struct Builtins {
    table: IndexMap<PredKey, Builtin>,
}

impl fmt::Debug for Builtins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtins")
            .field("len", &self.table.len())
            .finish()
    }
}

impl Builtins {
    pub(crate) fn new(atoms: &mut AtomTable) -> Self {
        let table = BUILTINS
            .iter()
            .map(|&(name, arity, builtin)| ((atoms.intern(name), arity), builtin))
            .collect();
        Self { table }
    }

    pub(crate) fn get(&self, key: PredKey) -> Option<Builtin> {
        self.table.get(&key).copied()
    }

    pub(crate) fn is_builtin(&self, key: PredKey) -> bool {
        self.table.contains_key(&key)
    }
}

fn type_error(e: &Engine<'_>, expected: &'static str, term: TermRef) -> Error {
    Error::type_error(expected, e.to_term(term))
}

fn domain_error(e: &Engine<'_>, domain: &'static str, term: TermRef) -> Error {
    Error::Domain {
        domain,
        culprit: e.to_term(term),
    }
}

fn atom(e: &mut Engine<'_>, name: &str) -> TermRef {
    TermRef::Atom(e.atoms.intern(name))
}

/// An integer argument; `None` when unbound.
fn integer(e: &Engine<'_>, term: TermRef) -> Result<Option<i64>> {
    match e.store.deref(term) {
        TermRef::Int(value) => Ok(Some(value)),
        TermRef::Var(_) => Ok(None),
        other => Err(type_error(e, "integer", other)),
    }
}

fn number(term: TermRef) -> Option<Number> {
    match term {
        TermRef::Int(value) => Some(Number::Int(value)),
        TermRef::Float(value) => Some(Number::Float(value)),
        _ => None,
    }
}

/// The text of an atomic term.
fn text(e: &Engine<'_>, term: TermRef) -> Result<String> {
    match e.store.deref(term) {
        TermRef::Atom(atom) => Ok(e.atoms.name(atom).to_string()),
        TermRef::Int(value) => Ok(value.to_string()),
        TermRef::Float(value) => Ok(format_float(value)),
        TermRef::Var(_) => Err(Error::Instantiation),
        other => Err(type_error(e, "atomic", other)),
    }
}

/// Reads a number the way the reader does, so `atom_number('0x1A', N)` works.
fn parse_number(text: &str) -> Option<Number> {
    match parser::read_term(text.trim_start()) {
        Ok(Term::Integer(value)) => Some(Number::Int(value)),
        Ok(Term::Float(value)) => Some(Number::Float(value)),
        _ => None,
    }
}

/// The items of a proper list.
fn proper_list(e: &Engine<'_>, list: TermRef) -> Result<Vec<TermRef>> {
    if let Some(items) = e.store.list_items(list) {
        return Ok(items);
    }
    let mut seen: IndexSet<StructId> = IndexSet::new();
    let mut tail = e.store.deref(list);
    while let TermRef::Struct(id) = tail {
        let functor = e.store.heap.functor(id);
        if functor.name != Atom::DOT || functor.arity != 2 || !seen.insert(id) {
            break;
        }
        tail = e.store.deref(e.store.heap.arg(id, 1));
    }
    match tail {
        TermRef::Var(_) => Err(Error::Instantiation),
        _ => Err(type_error(e, "list", list)),
    }
}

fn new_list(e: &mut Engine<'_>, items: &[TermRef]) -> TermRef {
    e.store.heap.new_list(items, TermRef::NIL)
}

/// Walks every subterm once, stopping early when `visit` returns false.
fn walk(e: &Engine<'_>, root: TermRef, mut visit: impl FnMut(TermRef) -> bool) {
    let mut stack: SmallVec<[TermRef; 16]> = SmallVec::new();
    stack.push(root);
    let mut seen: IndexSet<StructId> = IndexSet::new();
    while let Some(term) = stack.pop() {
        let term = e.store.deref(term);
        if !visit(term) {
            return;
        }
        if let TermRef::Struct(id) = term {
            if seen.insert(id) {
                stack.extend(e.store.heap.args(id).iter().rev().copied());
            }
        }
    }
}

fn is_ground(e: &Engine<'_>, term: TermRef) -> bool {
    let mut ground = true;
    walk(e, term, |t| {
        ground = !matches!(t, TermRef::Var(_));
        ground
    });
    ground
}

fn unify(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    Ok(e.store.unify(args[0], args[1]))
}

fn not_unifiable(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    Ok(!e.store.unifiable(args[0], args[1]))
}

fn unify_with_occurs_check(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let saved = std::mem::replace(&mut e.store.occurs_check, true);
    let unified = e.store.unify(args[0], args[1]);
    e.store.occurs_check = saved;
    Ok(unified)
}

fn standard(e: &mut Engine<'_>, args: &[TermRef], test: fn(Ordering) -> bool) -> Result<bool> {
    Ok(test(e.store.compare(args[0], args[1], &e.atoms)))
}

fn compare(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[0]) {
        TermRef::Var(_) | TermRef::Atom(Atom::LESS | Atom::EQUAL | Atom::GREATER) => {}
        TermRef::Atom(_) => return Err(domain_error(e, "order", args[0])),
        other => return Err(type_error(e, "atom", other)),
    }
    let order = match e.store.compare(args[1], args[2], &e.atoms) {
        Ordering::Less => Atom::LESS,
        Ordering::Equal => Atom::EQUAL,
        Ordering::Greater => Atom::GREATER,
    };
    Ok(e.store.unify(args[0], TermRef::Atom(order)))
}

fn type_check(e: &mut Engine<'_>, args: &[TermRef], test: fn(TermRef) -> bool) -> Result<bool> {
    Ok(test(e.store.deref(args[0])))
}

fn is(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let value = arith::eval(&e.store, &e.atoms, args[1])?;
    Ok(e.store.unify(args[0], value.to_term_ref()))
}

fn numeric(
    e: &mut Engine<'_>,
    args: &[TermRef],
    test: fn(Option<Ordering>) -> bool,
) -> Result<bool> {
    let left = arith::eval(&e.store, &e.atoms, args[0])?;
    let right = arith::eval(&e.store, &e.atoms, args[1])?;
    Ok(test(compare_numbers(left, right)))
}

fn not_less_than_zero(e: &Engine<'_>, value: i64) -> Result<()> {
    if value < 0 {
        return Err(domain_error(e, "not_less_than_zero", TermRef::Int(value)));
    }
    Ok(())
}

fn overflow() -> Error {
    Error::Evaluation(EvaluationError::IntOverflow)
}

fn succ(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match (integer(e, args[0])?, integer(e, args[1])?) {
        (Some(x), _) => {
            not_less_than_zero(e, x)?;
            let y = x.checked_add(1).ok_or_else(overflow)?;
            Ok(e.store.unify(args[1], TermRef::Int(y)))
        }
        (None, Some(y)) => {
            not_less_than_zero(e, y)?;
            if y == 0 {
                return Ok(false);
            }
            Ok(e.store.unify(args[0], TermRef::Int(y - 1)))
        }
        (None, None) => Err(Error::Instantiation),
    }
}

fn plus(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let (target, value) = match (
        integer(e, args[0])?,
        integer(e, args[1])?,
        integer(e, args[2])?,
    ) {
        (Some(x), Some(y), _) => (args[2], x.checked_add(y)),
        (Some(x), None, Some(z)) => (args[1], z.checked_sub(x)),
        (None, Some(y), Some(z)) => (args[0], z.checked_sub(y)),
        _ => return Err(Error::Instantiation),
    };
    let value = value.ok_or_else(overflow)?;
    Ok(e.store.unify(target, TermRef::Int(value)))
}

fn functor(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[0]) {
        TermRef::Struct(id) => {
            let functor = e.store.heap.functor(id);
            Ok(e.store.unify(args[1], TermRef::Atom(functor.name))
                && e.store.unify(args[2], TermRef::Int(i64::from(functor.arity))))
        }
        TermRef::Var(_) => {
            let name = e.store.deref(args[1]);
            let Some(arity) = integer(e, args[2])? else {
                return Err(Error::Instantiation);
            };
            not_less_than_zero(e, arity)?;
            if arity > MAX_ARITY {
                return Err(domain_error(e, "max_arity", args[2]));
            }
            match name {
                TermRef::Var(_) => Err(Error::Instantiation),
                TermRef::Struct(_) => Err(type_error(e, "atomic", name)),
                _ if arity == 0 => Ok(e.store.unify(args[0], name)),
                TermRef::Atom(name) => {
                    let vars: SmallVec<[TermRef; 8]> =
                        (0..arity).map(|_| e.store.new_var()).collect();
                    let term = e.store.heap.new_struct(name, &vars);
                    Ok(e.store.unify(args[0], term))
                }
                other => Err(type_error(e, "atom", other)),
            }
        }
        atomic => Ok(e.store.unify(args[1], atomic) && e.store.unify(args[2], TermRef::Int(0))),
    }
}

fn arg(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let Some(n) = integer(e, args[0])? else {
        return Err(Error::Instantiation);
    };
    let id = match e.store.deref(args[1]) {
        TermRef::Struct(id) => id,
        TermRef::Var(_) => return Err(Error::Instantiation),
        other => return Err(type_error(e, "compound", other)),
    };
    let arity = i64::from(e.store.heap.functor(id).arity);
    if n < 1 || n > arity {
        return Ok(false);
    }
    let index = usize::try_from(n - 1).unwrap_or(usize::MAX);
    let value = e.store.heap.arg(id, index);
    Ok(e.store.unify(args[2], value))
}

fn univ(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[0]) {
        TermRef::Struct(id) => {
            let name = TermRef::Atom(e.store.heap.functor(id).name);
            let mut items: SmallVec<[TermRef; 8]> = SmallVec::new();
            items.push(name);
            items.extend_from_slice(e.store.heap.args(id));
            let list = new_list(e, &items);
            Ok(e.store.unify(args[1], list))
        }
        TermRef::Var(_) => {
            let items = proper_list(e, args[1])?;
            let Some((&head, rest)) = items.split_first() else {
                return Err(domain_error(e, "non_empty_list", args[1]));
            };
            let head = e.store.deref(head);
            let term = match head {
                TermRef::Var(_) => return Err(Error::Instantiation),
                _ if rest.is_empty() => match head {
                    TermRef::Struct(_) => return Err(type_error(e, "atomic", head)),
                    _ => head,
                },
                TermRef::Atom(name) => e.store.heap.new_struct(name, rest),
                other => return Err(type_error(e, "atom", other)),
            };
            Ok(e.store.unify(args[0], term))
        }
        atomic => {
            let list = new_list(e, &[atomic]);
            Ok(e.store.unify(args[1], list))
        }
    }
}

fn copy_term(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let copy = e.store.detach(args[0]);
    let term = e.store.import_detached(&copy);
    Ok(e.store.unify(args[1], term))
}

fn term_variables(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let mut vars: IndexSet<VarId> = IndexSet::new();
    walk(e, args[0], |t| {
        if let TermRef::Var(var) = t {
            vars.insert(var);
        }
        true
    });
    let items: Vec<TermRef> = vars.into_iter().map(TermRef::Var).collect();
    let list = new_list(e, &items);
    Ok(e.store.unify(args[1], list))
}

#[derive(Clone, Copy)]
enum Kind {
    Atom,
    Number,
}

#[derive(Clone, Copy)]
enum Encoding {
    Chars,
    Codes,
}

fn encode(e: &mut Engine<'_>, text: &str, encoding: Encoding) -> TermRef {
    let items: Vec<TermRef> = match encoding {
        Encoding::Codes => text
            .chars()
            .map(|c| TermRef::Int(i64::from(u32::from(c))))
            .collect(),
        Encoding::Chars => text
            .chars()
            .map(|c| atom(e, c.encode_utf8(&mut [0; 4])))
            .collect(),
    };
    new_list(e, &items)
}

fn char_of(e: &Engine<'_>, term: TermRef) -> Result<char> {
    match e.store.deref(term) {
        TermRef::Int(code) => u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| domain_error(e, "character_code", term)),
        TermRef::Atom(atom) => {
            let mut chars = e.atoms.name(atom).chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(type_error(e, "character", term)),
            }
        }
        TermRef::Var(_) => Err(Error::Instantiation),
        other => Err(type_error(e, "character", other)),
    }
}

/// Reads a list of characters or codes back into text.
fn decode(e: &Engine<'_>, list: TermRef) -> Result<String> {
    proper_list(e, list)?
        .into_iter()
        .map(|item| char_of(e, item))
        .collect()
}

/// `atom_codes/2` and friends: text to list when the first argument is
/// bound, list to text otherwise.
fn convert(e: &mut Engine<'_>, args: &[TermRef], kind: Kind, encoding: Encoding) -> Result<bool> {
    let subject = e.store.deref(args[0]);
    if !matches!(subject, TermRef::Var(_)) {
        if matches!(kind, Kind::Number) && number(subject).is_none() {
            return Err(type_error(e, "number", subject));
        }
        let text = text(e, subject)?;
        let list = encode(e, &text, encoding);
        return Ok(e.store.unify(args[1], list));
    }
    let text = decode(e, args[1])?;
    let value = match kind {
        Kind::Atom => atom(e, &text),
        Kind::Number => match parse_number(&text) {
            Some(number) => number.to_term_ref(),
            None => return Err(ParseError::at(&text, 0, "illegal number").into()),
        },
    };
    Ok(e.store.unify(args[0], value))
}

fn char_code(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[0]) {
        TermRef::Var(_) => {
            let c = match e.store.deref(args[1]) {
                TermRef::Var(_) => return Err(Error::Instantiation),
                TermRef::Int(_) => char_of(e, args[1])?,
                other => return Err(type_error(e, "integer", other)),
            };
            let value = atom(e, c.encode_utf8(&mut [0; 4]));
            Ok(e.store.unify(args[0], value))
        }
        TermRef::Atom(_) => {
            let c = char_of(e, args[0])?;
            Ok(e.store.unify(args[1], TermRef::Int(i64::from(u32::from(c)))))
        }
        other => Err(type_error(e, "character", other)),
    }
}

fn atom_length(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let text = text(e, args[0])?;
    if let Some(length) = integer(e, args[1])? {
        not_less_than_zero(e, length)?;
    }
    let length = i64::try_from(text.chars().count()).unwrap_or(i64::MAX);
    Ok(e.store.unify(args[1], TermRef::Int(length)))
}

fn atom_number(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[0]) {
        TermRef::Var(_) => {
            let value = e.store.deref(args[1]);
            match value {
                TermRef::Var(_) => Err(Error::Instantiation),
                TermRef::Int(_) | TermRef::Float(_) => {
                    let text = text(e, value)?;
                    let name = atom(e, &text);
                    Ok(e.store.unify(args[0], name))
                }
                other => Err(type_error(e, "number", other)),
            }
        }
        TermRef::Atom(name) => match parse_number(e.atoms.name(name)) {
            Some(number) => Ok(e.store.unify(args[1], number.to_term_ref())),
            None => Ok(false),
        },
        other => Err(type_error(e, "atom", other)),
    }
}

fn atom_concat(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let joined = text(e, args[0])? + &text(e, args[1])?;
    let joined = atom(e, &joined);
    Ok(e.store.unify(args[2], joined))
}

/// Every way to split an atom in two, as a list of `Prefix-Suffix` pairs.
fn atom_splits(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let whole = text(e, args[0])?;
    let bounds = whole
        .char_indices()
        .map(|(at, _)| at)
        .chain(std::iter::once(whole.len()));
    let mut pairs = Vec::new();
    for at in bounds {
        let prefix = atom(e, &whole[..at]);
        let suffix = atom(e, &whole[at..]);
        pairs.push(e.store.heap.new_struct(Atom::MINUS, &[prefix, suffix]));
    }
    let list = new_list(e, &pairs);
    Ok(e.store.unify(args[1], list))
}

fn map_case(e: &mut Engine<'_>, args: &[TermRef], map: fn(&str) -> String) -> Result<bool> {
    let mapped = map(&text(e, args[0])?);
    let mapped = atom(e, &mapped);
    Ok(e.store.unify(args[1], mapped))
}

fn atomic_list_concat(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let joined = proper_list(e, args[0])?
        .into_iter()
        .map(|item| text(e, item))
        .collect::<Result<String>>()?;
    let joined = atom(e, &joined);
    Ok(e.store.unify(args[1], joined))
}

/// Joins with a separator, or splits when the list is not fully bound.
fn atomic_list_concat_sep(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let separator = text(e, args[1])?;
    let joinable = e.store.list_items(args[0]).filter(|items| {
        items
            .iter()
            .all(|&item| !matches!(e.store.deref(item), TermRef::Var(_)))
    });
    if let Some(items) = joinable {
        let parts = items
            .into_iter()
            .map(|item| text(e, item))
            .collect::<Result<Vec<String>>>()?;
        let joined = atom(e, &parts.join(&separator));
        return Ok(e.store.unify(args[2], joined));
    }
    let whole = text(e, args[2])?;
    if separator.is_empty() {
        return Err(domain_error(e, "non_empty_atom", args[1]));
    }
    let parts: Vec<TermRef> = whole
        .split(separator.as_str())
        .map(|part| atom(e, part))
        .collect();
    let list = new_list(e, &parts);
    Ok(e.store.unify(args[0], list))
}

fn term_to_atom(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    match e.store.deref(args[1]) {
        TermRef::Var(_) => {
            if matches!(e.store.deref(args[0]), TermRef::Var(_)) {
                return Err(Error::Instantiation);
            }
            let written = e.to_term(args[0]).to_string();
            let written = atom(e, &written);
            Ok(e.store.unify(args[1], written))
        }
        _ => {
            let source = text(e, args[1])?;
            let term = parser::read_term(&source)?;
            let mut names = VarNames::starting_at(e.store.var_count());
            let read = e.store.build(&term, &mut e.atoms, &mut names);
            Ok(e.store.unify(args[0], read))
        }
    }
}

/// Sorts a list by the standard order of its items, or of their `key`-th
/// argument. Neighbours for which `keep` is false are dropped, so
/// `Ordering::is_lt` removes duplicates and `Ordering::is_le` keeps them.
fn sort_list(
    e: &mut Engine<'_>,
    list: TermRef,
    sorted: TermRef,
    key: usize,
    keep: fn(Ordering) -> bool,
) -> Result<bool> {
    let mut items = proper_list(e, list)?;
    let keys = items
        .iter()
        .map(|&item| sort_key(e, item, key))
        .collect::<Result<Vec<TermRef>>>()?;
    let mut pairs: Vec<(TermRef, TermRef)> = keys.into_iter().zip(items.iter().copied()).collect();
    let descending = !keep(Ordering::Less);
    pairs.sort_by(|a, b| {
        let order = e.store.compare(a.0, b.0, &e.atoms);
        if descending {
            order.reverse()
        } else {
            order
        }
    });
    pairs.dedup_by(|later, earlier| !keep(e.store.compare(earlier.0, later.0, &e.atoms)));
    items = pairs.into_iter().map(|(_, item)| item).collect();
    let result = new_list(e, &items);
    Ok(e.store.unify(sorted, result))
}

fn sort_key(e: &Engine<'_>, item: TermRef, key: usize) -> Result<TermRef> {
    if key == 0 {
        return Ok(item);
    }
    match e.store.deref(item) {
        TermRef::Struct(id) if e.store.heap.functor(id).arity as usize >= key => {
            Ok(e.store.heap.arg(id, key - 1))
        }
        TermRef::Var(_) => Err(Error::Instantiation),
        other => Err(type_error(e, "compound", other)),
    }
}

fn sort4(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    let Some(key) = integer(e, args[0])? else {
        return Err(Error::Instantiation);
    };
    not_less_than_zero(e, key)?;
    let key = usize::try_from(key).unwrap_or(usize::MAX);
    let keep: fn(Ordering) -> bool = match e.store.deref(args[1]) {
        TermRef::Var(_) => return Err(Error::Instantiation),
        TermRef::Atom(order) => match e.atoms.name(order) {
            "@<" => Ordering::is_lt,
            "@=<" => Ordering::is_le,
            "@>" => Ordering::is_gt,
            "@>=" => Ordering::is_ge,
            _ => return Err(domain_error(e, "order", args[1])),
        },
        other => return Err(type_error(e, "atom", other)),
    };
    sort_list(e, args[2], args[3], key, keep)
}

fn keysort(e: &mut Engine<'_>, args: &[TermRef]) -> Result<bool> {
    for item in proper_list(e, args[0])? {
        match e.store.deref(item) {
            TermRef::Struct(id)
                if e.store.heap.functor(id).name == Atom::MINUS
                    && e.store.heap.functor(id).arity == 2 => {}
            TermRef::Var(_) => return Err(Error::Instantiation),
            other => return Err(type_error(e, "pair", other)),
        }
    }
    sort_list(e, args[0], args[1], 1, Ordering::is_le)
}
