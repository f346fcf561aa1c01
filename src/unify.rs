//! Unification and the standard order of terms.

use crate::arith::compare_int_float;
use crate::atom::Interner;
use crate::heap::{StructId, TermRef, VarId};
use crate::store::Store;
use indexmap::IndexSet;
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;

type WorkStack = SmallVec<[(TermRef, TermRef); 16]>;

impl Store {
    /// Unifies two terms, leaving the bindings on the trail.
    ///
    /// On failure some bindings may already have been made; the caller
    /// restores a trail checkpoint.
    pub(crate) fn unify(&mut self, left: TermRef, right: TermRef) -> bool {
        let mut stack: WorkStack = smallvec![(left, right)];
        let mut visited: IndexSet<(StructId, StructId)> = IndexSet::new();
        while let Some((left, right)) = stack.pop() {
            let left = self.deref(left);
            let right = self.deref(right);
            match (left, right) {
                (TermRef::Var(x), TermRef::Var(y)) => {
                    // the younger variable points at the older one
                    match x.cmp(&y) {
                        Ordering::Less => self.bind(y, left),
                        Ordering::Greater => self.bind(x, right),
                        Ordering::Equal => {}
                    }
                }
                (TermRef::Var(var), value) | (value, TermRef::Var(var)) => {
                    if self.occurs_check && self.occurs(var, value) {
                        return false;
                    }
                    self.bind(var, value);
                }
                (TermRef::Atom(x), TermRef::Atom(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (TermRef::Int(x), TermRef::Int(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (TermRef::Float(x), TermRef::Float(y)) => {
                    if x.to_bits() != y.to_bits() {
                        return false;
                    }
                }
                (TermRef::Struct(x), TermRef::Struct(y)) => {
                    if x == y {
                        continue;
                    }
                    let (fx, fy) = (self.heap.functor(x), self.heap.functor(y));
                    if fx.name != fy.name || fx.arity != fy.arity {
                        return false;
                    }
                    if !self.occurs_check && !visited.insert((x, y)) {
                        continue;
                    }
                    stack.extend(
                        self.heap
                            .args(x)
                            .iter()
                            .zip(self.heap.args(y))
                            .rev()
                            .map(|(&a, &b)| (a, b)),
                    );
                }
                _ => return false,
            }
        }
        true
    }

    /// True if `var` occurs in `term`.
    pub(crate) fn occurs(&self, var: VarId, term: TermRef) -> bool {
        let mut stack: SmallVec<[TermRef; 16]> = smallvec![term];
        let mut seen: IndexSet<StructId> = IndexSet::new();
        while let Some(term) = stack.pop() {
            match self.deref(term) {
                TermRef::Var(other) if other == var => return true,
                TermRef::Struct(id) if seen.insert(id) => {
                    stack.extend(self.heap.args(id).iter().copied());
                }
                _ => {}
            }
        }
        false
    }

    /// Compares two terms in the standard order:
    /// variables, then numbers, then atoms, then compound terms.
    pub(crate) fn compare(&self, left: TermRef, right: TermRef, atoms: &impl Interner) -> Ordering {
        let mut stack: WorkStack = smallvec![(left, right)];
        let mut visited: IndexSet<(StructId, StructId)> = IndexSet::new();
        while let Some((left, right)) = stack.pop() {
            let left = self.deref(left);
            let right = self.deref(right);
            let order = match (left, right) {
                (TermRef::Var(x), TermRef::Var(y)) => x.cmp(&y),
                (TermRef::Atom(x), TermRef::Atom(y)) => atoms.name(x).cmp(atoms.name(y)),
                (TermRef::Int(x), TermRef::Int(y)) => x.cmp(&y),
                (TermRef::Float(x), TermRef::Float(y)) => x.total_cmp(&y),
                (TermRef::Int(x), TermRef::Float(y)) => compare_mixed(x, y),
                (TermRef::Float(x), TermRef::Int(y)) => compare_mixed(y, x).reverse(),
                (TermRef::Struct(x), TermRef::Struct(y)) => {
                    if x == y || !visited.insert((x, y)) {
                        continue;
                    }
                    let (fx, fy) = (self.heap.functor(x), self.heap.functor(y));
                    let order = fx
                        .arity
                        .cmp(&fy.arity)
                        .then_with(|| atoms.name(fx.name).cmp(atoms.name(fy.name)));
                    if order == Ordering::Equal {
                        stack.extend(
                            self.heap
                                .args(x)
                                .iter()
                                .zip(self.heap.args(y))
                                .rev()
                                .map(|(&a, &b)| (a, b)),
                        );
                    }
                    order
                }
                _ => rank(left).cmp(&rank(right)),
            };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    }
}

fn rank(term: TermRef) -> u8 {
    match term {
        TermRef::Var(_) => 0,
        TermRef::Int(_) | TermRef::Float(_) => 1,
        TermRef::Atom(_) => 2,
        TermRef::Struct(_) => 3,
    }
}

/// Integer against float by value; a float sorts before an equal integer
/// and NaN sorts by its sign.
fn compare_mixed(int: i64, float: f64) -> Ordering {
    match compare_int_float(int, float) {
        Some(Ordering::Equal) => Ordering::Greater,
        Some(order) => order,
        None if float.is_sign_negative() => Ordering::Greater,
        None => Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;
    use crate::store::VarNames;
    use crate::term::Term;

    struct Fixture {
        atoms: AtomTable,
        store: Store,
        names: VarNames,
    }

    impl Fixture {
        fn new(occurs_check: bool) -> Self {
            Self {
                atoms: AtomTable::new(),
                store: Store::new(occurs_check),
                names: VarNames::starting_at(0),
            }
        }

        fn term(&mut self, text: &str) -> TermRef {
            let term = Term::parse(text).unwrap();
            self.store.build(&term, &mut self.atoms, &mut self.names)
        }

        fn show(&self, term: TermRef) -> String {
            self.store
                .resolve(term, &self.atoms, &mut |var| format!("_G{var}"))
                .to_string()
        }
    }

    #[test]
    fn test_unify_binds_variables_both_ways() {
        let mut fx = Fixture::new(false);
        let a = fx.term("f(X, b, Z)");
        let b = fx.term("f(a, Y, g(Y))");
        assert!(fx.store.unify(a, b));
        assert_eq!(fx.show(a), "f(a,b,g(b))");
        assert_eq!(fx.show(b), "f(a,b,g(b))");
    }

    #[test]
    fn test_unify_mismatch_fails() {
        let mut fx = Fixture::new(false);
        let a = fx.term("f(a, b)");
        let b = fx.term("f(a, c)");
        assert!(!fx.store.unify(a, b));
        let c = fx.term("g(a, b)");
        let a2 = fx.term("f(a, b)");
        assert!(!fx.store.unify(a2, c));
        let one = fx.term("1");
        let one_float = fx.term("1.0");
        assert!(!fx.store.unify(one, one_float));
    }

    #[test]
    fn test_younger_variable_is_bound_to_older() {
        let mut fx = Fixture::new(false);
        let x = fx.term("X");
        let y = fx.term("Y");
        assert!(fx.store.unify(y, x));
        assert_eq!(fx.store.deref(y), x);
        assert_eq!(fx.store.deref(x), x);
    }

    #[test]
    fn test_occurs_check() {
        let mut fx = Fixture::new(true);
        let x = fx.term("X");
        let fx_term = fx.term("f(X)");
        assert!(!fx.store.unify(x, fx_term));

        let mut fx = Fixture::new(false);
        let x = fx.term("X");
        let fx_term = fx.term("f(X)");
        assert!(fx.store.unify(x, fx_term));
        assert_eq!(fx.show(x), "f(_S0)");
    }

    #[test]
    fn test_cyclic_terms_unify_coinductively() {
        let mut fx = Fixture::new(false);
        let x = fx.term("X");
        let fx_x = fx.term("f(X)");
        let y = fx.term("Y");
        let fy_y = fx.term("f(Y)");
        assert!(fx.store.unify(x, fx_x));
        assert!(fx.store.unify(y, fy_y));
        assert!(fx.store.unify(x, y));
    }

    #[test]
    fn test_standard_order() {
        let mut fx = Fixture::new(false);
        let ordered = [
            "_", "1.0", "1", "2", "a", "b", "f(z)", "g(a)", "f(a, b)", "f(b, a)",
        ];
        let terms: Vec<_> = ordered.iter().map(|text| fx.term(text)).collect();
        for pair in terms.windows(2) {
            assert_eq!(
                fx.store.compare(pair[0], pair[1], &fx.atoms),
                Ordering::Less,
                "{} < {}",
                fx.show(pair[0]),
                fx.show(pair[1])
            );
        }
        let a = fx.term("f(X, 1)");
        assert_eq!(fx.store.compare(a, a, &fx.atoms), Ordering::Equal);
    }

    #[test]
    fn test_mixed_numbers_order_exactly() {
        let mut fx = Fixture::new(false);
        let big = fx.term("9007199254740993");
        let float = fx.term("9007199254740992.0");
        assert_eq!(fx.store.compare(big, float, &fx.atoms), Ordering::Greater);
        assert_eq!(fx.store.compare(float, big, &fx.atoms), Ordering::Less);
        let exact = fx.term("9007199254740992");
        assert_eq!(fx.store.compare(float, exact, &fx.atoms), Ordering::Less);
    }

    #[test]
    fn test_unifying_a_term_with_itself_binds_nothing() {
        let mut fx = Fixture::new(false);
        let term = fx.term("f(X, g(Y, [a|Z]), X)");
        let before = fx.store.trail_len();
        assert!(fx.store.unify(term, term));
        assert_eq!(fx.store.trail_len(), before);
        let x = fx.term("X");
        assert!(fx.store.unify(x, x));
        assert_eq!(fx.store.trail_len(), before);
        assert_eq!(fx.show(term), "f(_G0,g(_G1,[a|_G2]),_G0)");
        let ground = fx.term("f(1, g(2, [a]), 1)");
        assert!(fx.store.unify(term, ground));
        assert_eq!(fx.store.trail_len(), before + 3);
    }

    #[test]
    fn test_occurs_check_rejects_nested_cycles() {
        let mut fx = Fixture::new(true);
        let left = fx.term("g(X, Y, a)");
        let right = fx.term("g(f(Y), h(X), a)");
        let mark = fx.store.trail_len();
        assert!(!fx.store.unify(left, right));
        fx.store.undo_to(mark);
        let x = fx.term("X");
        let list = fx.term("[1, 2 | X]");
        assert!(!fx.store.unify(x, list));
        fx.store.undo_to(mark);
        let ok = fx.term("g(f(Z), h(W), a)");
        assert!(fx.store.unify(left, ok));
    }

    proptest::proptest! {
        #[test]
        fn prop_occurs_check_never_binds_a_variable_inside_itself(depth in 1usize..6, name in "[fgh]") {
            let mut fx = Fixture::new(true);
            let mut text = "X".to_string();
            for _ in 0..depth {
                text = format!("{name}({text}, b)");
            }
            let x = fx.term("X");
            let nested = fx.term(&text);
            let mark = fx.store.trail_len();
            proptest::prop_assert!(!fx.store.unify(x, nested));
            proptest::prop_assert!(!fx.store.unify(nested, x));
            fx.store.undo_to(mark);
            proptest::prop_assert_eq!(fx.store.deref(x), x);
        }
    }
}
