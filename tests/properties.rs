use microprolog::{Machine, Solution, Term};
use proptest::prelude::*;
use std::sync::OnceLock;

fn machine() -> &'static Machine {
    static MACHINE: OnceLock<Machine> = OnceLock::new();
    MACHINE.get_or_init(|| Machine::new(None, None))
}

fn first(query: &str) -> Option<Solution> {
    machine()
        .run_query(query)
        .expect("query parses")
        .next()
        .expect("query runs")
}

fn ground_term() -> impl Strategy<Value = Term> {
    let leaf = prop_oneof![
        any::<i32>().prop_map(|value| Term::Integer(i64::from(value))),
        prop::sample::select(vec!["a", "foo", "bar_baz", "hello world", "[]"]).prop_map(|name| Term::atom(name)),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (
                prop::sample::select(vec!["f", "g", "point"]),
                prop::collection::vec(inner.clone(), 1..4)
            )
                .prop_map(|(name, args)| Term::compound(name, args)),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Term::list),
            // operators that sit next to signs and digits when written
            (prop::sample::select(vec!["-", "+"]), inner.clone())
                .prop_map(|(name, arg)| Term::compound(name, vec![arg])),
            (prop::sample::select(vec!["-", "^"]), inner.clone(), inner)
                .prop_map(|(name, left, right)| Term::compound(name, vec![left, right])),
        ]
    })
}

proptest! {
    #[test]
    fn prop_unification_is_reflexive(term in ground_term()) {
        prop_assert_eq!(first(&format!("{term} = {term}")), Some(Solution::True));
        prop_assert_eq!(first(&format!("{term} == {term}")), Some(Solution::True));
    }

    #[test]
    fn prop_bindings_read_back(term in ground_term()) {
        let solution = first(&format!("X = {term}")).expect("X unifies");
        prop_assert_eq!(solution.get("X"), Some(&term));
    }

    #[test]
    fn prop_backtracking_undoes_bindings(term in ground_term()) {
        let solution = first(&format!("(X = {term}, fail ; true)")).expect("second branch");
        prop_assert_eq!(solution.get("X"), Some(&Term::var("X")));
        let solution = first(&format!("(X = {term}, fail ; X = {term})")).expect("rebinds");
        prop_assert_eq!(solution.get("X"), Some(&term));
    }

    #[test]
    fn prop_writer_output_reads_back(term in ground_term()) {
        prop_assert_eq!(Term::parse(&term.to_string()), Ok(term));
    }

    #[test]
    fn prop_standard_order_is_antisymmetric(a in ground_term(), b in ground_term()) {
        let solution = first(&format!("compare(O1, {a}, {b}), compare(O2, {b}, {a})"))
            .expect("compare succeeds");
        let o1 = solution.get("O1").and_then(Term::as_atom).map(str::to_string);
        let o2 = solution.get("O2").and_then(Term::as_atom).map(str::to_string);
        let flipped = match o1.as_deref() {
            Some("<") => ">",
            Some(">") => "<",
            _ => "=",
        };
        prop_assert_eq!(o2.as_deref(), Some(flipped));
    }

    #[test]
    fn prop_sorting_is_idempotent(items in prop::collection::vec(ground_term(), 0..8)) {
        let list = Term::list(items);
        let query = format!("msort({list}, S), msort(S, S2), S == S2, sort(S, U), length(U, N), length(S, M), N =< M");
        prop_assert!(first(&query).is_some());
    }
}
