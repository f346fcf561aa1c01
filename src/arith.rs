//! Arithmetic evaluation for `is/2` and the numeric comparisons.

use crate::atom::{Atom, Interner};
use crate::error::{Error, EvaluationError, Result};
use crate::heap::{StructId, TermRef};
use crate::store::Store;
use crate::term::Term;
use indexmap::IndexSet;
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn to_term_ref(self) -> TermRef {
        match self {
            Number::Int(value) => TermRef::Int(value),
            Number::Float(value) => TermRef::Float(value),
        }
    }

    fn to_term(self) -> Term {
        match self {
            Number::Int(value) => Term::Integer(value),
            Number::Float(value) => Term::Float(value),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(value) => value as f64,
            Number::Float(value) => value,
        }
    }

    fn as_int(self) -> Result<i64> {
        match self {
            Number::Int(value) => Ok(value),
            Number::Float(_) => Err(Error::type_error("integer", self.to_term())),
        }
    }
}

const UNARY: &[&str] = &[
    "-", "+", "abs", "sign", "sqrt", "sin", "cos", "tan", "asin", "acos", "atan", "exp", "log",
    "log2", "float", "integer", "float_integer_part", "float_fractional_part", "truncate",
    "round", "ceiling", "floor", "\\", "msb", "succ",
];

const BINARY: &[&str] = &[
    "+", "-", "*", "/", "//", "mod", "rem", "div", "min", "max", "**", "^", ">>", "<<", "/\\",
    "\\/", "xor", "atan2", "atan", "gcd", "log", "copysign",
];

fn is_evaluable(name: &str, arity: u32) -> bool {
    match arity {
        1 => UNARY.contains(&name),
        2 => BINARY.contains(&name),
        _ => false,
    }
}

fn not_evaluable(name: &str, arity: u32) -> Error {
    Error::type_error(
        "evaluable",
        Term::compound("/", vec![Term::atom(name), Term::Integer(i64::from(arity))]),
    )
}

fn evaluation(error: EvaluationError) -> Error {
    Error::Evaluation(error)
}

fn constant(name: &str) -> Option<Number> {
    let value = match name {
        "pi" => Number::Float(std::f64::consts::PI),
        "e" => Number::Float(std::f64::consts::E),
        "inf" | "infinite" => Number::Float(f64::INFINITY),
        "nan" => Number::Float(f64::NAN),
        "epsilon" => Number::Float(f64::EPSILON),
        "max_tagged_integer" => Number::Int((1 << 60) - 1),
        "min_tagged_integer" => Number::Int(-(1 << 60)),
        "max_integer" => Number::Int(i64::MAX),
        "min_integer" => Number::Int(i64::MIN),
        _ => return None,
    };
    Some(value)
}

enum Task {
    Eval(TermRef),
    Apply(Atom, u32, StructId),
    Leave(StructId),
}

/// Evaluates an arithmetic expression.
///
/// Compound terms on the path from the root are tracked, so a cyclic
/// expression is a type error rather than an endless evaluation.
pub(crate) fn eval(store: &Store, atoms: &impl Interner, expr: TermRef) -> Result<Number> {
    let mut tasks: SmallVec<[Task; 16]> = smallvec![Task::Eval(expr)];
    let mut values: SmallVec<[Number; 16]> = SmallVec::new();
    let mut path: IndexSet<StructId> = IndexSet::new();
    while let Some(task) = tasks.pop() {
        match task {
            Task::Eval(term) => match store.deref(term) {
                TermRef::Int(value) => values.push(Number::Int(value)),
                TermRef::Float(value) => values.push(Number::Float(value)),
                TermRef::Var(_) => return Err(Error::Instantiation),
                TermRef::Atom(atom) => {
                    let name = atoms.name(atom);
                    values.push(constant(name).ok_or_else(|| not_evaluable(name, 0))?);
                }
                TermRef::Struct(id) => {
                    let functor = store.heap.functor(id);
                    let name = atoms.name(functor.name);
                    if !path.insert(id) {
                        return Err(not_evaluable(name, functor.arity));
                    }
                    if functor.name == Atom::DOT && functor.arity == 2 {
                        // "a" evaluates to the code of its only character
                        if store.deref(store.heap.arg(id, 1)) != TermRef::NIL {
                            return Err(not_evaluable(".", 2));
                        }
                        match store.deref(store.heap.arg(id, 0)) {
                            TermRef::Atom(atom) => {
                                let code = char_code(atoms.name(atom))
                                    .ok_or_else(|| not_evaluable(atoms.name(atom), 0))?;
                                values.push(Number::Int(code));
                                path.swap_remove(&id);
                            }
                            head => {
                                tasks.push(Task::Leave(id));
                                tasks.push(Task::Eval(head));
                            }
                        }
                        continue;
                    }
                    if !is_evaluable(name, functor.arity) {
                        return Err(not_evaluable(name, functor.arity));
                    }
                    tasks.push(Task::Apply(functor.name, functor.arity, id));
                    tasks.extend(store.heap.args(id).iter().rev().map(|&arg| Task::Eval(arg)));
                }
            },
            Task::Apply(name, arity, id) => {
                path.swap_remove(&id);
                let name = atoms.name(name);
                let result = if arity == 1 {
                    let x = values.pop().ok_or(Error::Instantiation)?;
                    unary(name, x)?
                } else {
                    let y = values.pop().ok_or(Error::Instantiation)?;
                    let x = values.pop().ok_or(Error::Instantiation)?;
                    binary(name, x, y)?
                };
                values.push(result);
            }
            Task::Leave(id) => {
                path.swap_remove(&id);
            }
        }
    }
    values.pop().ok_or(Error::Instantiation)
}

/// Single character atoms evaluate to their code.
fn char_code(name: &str) -> Option<i64> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(i64::from(u32::from(c))),
        _ => None,
    }
}

/// Checks a float result computed from `inputs`.
fn float(value: f64, inputs: &[f64]) -> Result<Number> {
    if value.is_nan() && !inputs.iter().any(|x| x.is_nan()) {
        return Err(evaluation(EvaluationError::Undefined));
    }
    if value.is_infinite() && !inputs.iter().any(|x| x.is_infinite()) {
        return Err(evaluation(EvaluationError::FloatOverflow));
    }
    Ok(Number::Float(value))
}

fn int(value: Option<i64>) -> Result<Number> {
    value
        .map(Number::Int)
        .ok_or_else(|| evaluation(EvaluationError::IntOverflow))
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_int(value: f64) -> Result<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if value.is_nan() {
        return Err(evaluation(EvaluationError::Undefined));
    }
    if !(-LIMIT..LIMIT).contains(&value) {
        return Err(evaluation(EvaluationError::IntOverflow));
    }
    Ok(value as i64)
}

fn rounding(x: Number, round: fn(f64) -> f64) -> Result<Number> {
    match x {
        Number::Int(_) => Ok(x),
        Number::Float(value) => float_to_int(round(value)).map(Number::Int),
    }
}

fn unary(name: &str, x: Number) -> Result<Number> {
    let f = x.as_f64();
    let undefined_unless = |ok: bool, value: f64| {
        if ok {
            float(value, &[f])
        } else {
            Err(evaluation(EvaluationError::Undefined))
        }
    };
    match name {
        "-" => match x {
            Number::Int(value) => int(value.checked_neg()),
            Number::Float(value) => Ok(Number::Float(-value)),
        },
        "+" => Ok(x),
        "abs" => match x {
            Number::Int(value) => int(value.checked_abs()),
            Number::Float(value) => Ok(Number::Float(value.abs())),
        },
        "sign" => match x {
            Number::Int(value) => Ok(Number::Int(value.signum())),
            Number::Float(value) if value == 0.0 => Ok(Number::Float(0.0)),
            Number::Float(value) => Ok(Number::Float(value.signum())),
        },
        "sqrt" => undefined_unless(f >= 0.0, f.sqrt()),
        "sin" => float(f.sin(), &[f]),
        "cos" => float(f.cos(), &[f]),
        "tan" => float(f.tan(), &[f]),
        "asin" => undefined_unless((-1.0..=1.0).contains(&f), f.asin()),
        "acos" => undefined_unless((-1.0..=1.0).contains(&f), f.acos()),
        "atan" => float(f.atan(), &[f]),
        "exp" => float(f.exp(), &[f]),
        "log" => undefined_unless(f > 0.0, f.ln()),
        "log2" => undefined_unless(f > 0.0, f.log2()),
        "float" => Ok(Number::Float(f)),
        "integer" => rounding(x, f64::round),
        "float_integer_part" => Ok(Number::Float(f.trunc())),
        "float_fractional_part" => Ok(Number::Float(f.fract())),
        "truncate" => rounding(x, f64::trunc),
        "round" => rounding(x, f64::round),
        "ceiling" => rounding(x, f64::ceil),
        "floor" => rounding(x, f64::floor),
        "\\" => Ok(Number::Int(!x.as_int()?)),
        "msb" => {
            let value = x.as_int()?;
            if value <= 0 {
                return Err(Error::Domain {
                    domain: "not_less_than_one",
                    culprit: x.to_term(),
                });
            }
            Ok(Number::Int(63 - i64::from(value.leading_zeros())))
        }
        "succ" => int(x.as_int()?.checked_add(1)),
        _ => Err(not_evaluable(name, 1)),
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

fn shift_left(value: i64, by: i64) -> Result<Number> {
    if by < 0 {
        return shift_right(value, by.checked_neg().unwrap_or(i64::MAX));
    }
    if value == 0 {
        return Ok(Number::Int(0));
    }
    let by = u32::try_from(by).unwrap_or(u32::MAX);
    match value.checked_shl(by) {
        Some(shifted) if shifted >> by == value => Ok(Number::Int(shifted)),
        _ => Err(evaluation(EvaluationError::IntOverflow)),
    }
}

fn shift_right(value: i64, by: i64) -> Result<Number> {
    if by < 0 {
        return shift_left(value, by.checked_neg().unwrap_or(i64::MAX));
    }
    let by = u32::try_from(by.min(63)).unwrap_or(63);
    Ok(Number::Int(value >> by))
}

fn int_pow(base: i64, exp: i64) -> Result<Number> {
    match (base, exp) {
        (1, _) | (_, 0) => return Ok(Number::Int(1)),
        (-1, _) => return Ok(Number::Int(if exp % 2 == 0 { 1 } else { -1 })),
        (0, _) if exp > 0 => return Ok(Number::Int(0)),
        (0, _) => return Err(evaluation(EvaluationError::ZeroDivisor)),
        (_, _) if exp < 0 => return Err(Error::type_error("float", Term::Integer(base))),
        _ => {}
    }
    // any other base overflows long before the exponent leaves u32
    let exp = u32::try_from(exp).map_err(|_| evaluation(EvaluationError::IntOverflow))?;
    int(base.checked_pow(exp))
}

fn gcd(a: i64, b: i64) -> Result<Number> {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    int(i64::try_from(a).ok())
}

fn binary(name: &str, x: Number, y: Number) -> Result<Number> {
    use Number::{Float, Int};
    let (fx, fy) = (x.as_f64(), y.as_f64());
    let inputs = [fx, fy];
    match (name, x, y) {
        ("+", Int(a), Int(b)) => int(a.checked_add(b)),
        ("-", Int(a), Int(b)) => int(a.checked_sub(b)),
        ("*", Int(a), Int(b)) => int(a.checked_mul(b)),
        ("+", ..) => float(fx + fy, &inputs),
        ("-", ..) => float(fx - fy, &inputs),
        ("*", ..) => float(fx * fy, &inputs),
        ("/", Int(_), Int(0)) | ("//" | "mod" | "rem" | "div", _, Int(0)) => {
            Err(evaluation(EvaluationError::ZeroDivisor))
        }
        ("/", Int(a), Int(b)) => {
            if a.wrapping_rem(b) == 0 {
                int(a.checked_div(b))
            } else {
                float(fx / fy, &inputs)
            }
        }
        ("/", ..) => {
            if fy == 0.0 {
                Err(evaluation(EvaluationError::ZeroDivisor))
            } else {
                float(fx / fy, &inputs)
            }
        }
        ("//", ..) => int(x.as_int()?.checked_div(y.as_int()?)),
        ("rem", ..) => Ok(Int(x.as_int()?.wrapping_rem(y.as_int()?))),
        ("mod", ..) => Ok(Int(floor_mod(x.as_int()?, y.as_int()?))),
        ("div", ..) => {
            let (a, b) = (x.as_int()?, y.as_int()?);
            int(a.checked_sub(floor_mod(a, b)).and_then(|a| a.checked_div(b)))
        }
        ("min", ..) => Ok(if compare_numbers(y, x) == Some(Ordering::Less) { y } else { x }),
        ("max", ..) => Ok(if compare_numbers(y, x) == Some(Ordering::Greater) { y } else { x }),
        ("**" | "^", Int(a), Int(b)) => {
            if name == "**" && b < 0 {
                float(fx.powf(fy), &inputs)
            } else {
                int_pow(a, b)
            }
        }
        ("**" | "^", ..) => {
            if fx == 0.0 && fy < 0.0 {
                Err(evaluation(EvaluationError::ZeroDivisor))
            } else if fx < 0.0 && fy.fract() != 0.0 {
                Err(evaluation(EvaluationError::Undefined))
            } else {
                float(fx.powf(fy), &inputs)
            }
        }
        (">>", ..) => shift_right(x.as_int()?, y.as_int()?),
        ("<<", ..) => shift_left(x.as_int()?, y.as_int()?),
        ("/\\", ..) => Ok(Int(x.as_int()? & y.as_int()?)),
        ("\\/", ..) => Ok(Int(x.as_int()? | y.as_int()?)),
        ("xor", ..) => Ok(Int(x.as_int()? ^ y.as_int()?)),
        ("atan2" | "atan", ..) => {
            if fx == 0.0 && fy == 0.0 {
                Err(evaluation(EvaluationError::Undefined))
            } else {
                float(fx.atan2(fy), &inputs)
            }
        }
        ("gcd", ..) => gcd(x.as_int()?, y.as_int()?),
        ("log", ..) => {
            if fx <= 0.0 || fy <= 0.0 || fx == 1.0 {
                Err(evaluation(EvaluationError::Undefined))
            } else {
                float(fy.ln() / fx.ln(), &inputs)
            }
        }
        ("copysign", ..) => Ok(Float(fx.copysign(fy))),
        _ => Err(not_evaluable(name, 2)),
    }
}

/// Compares two numbers by value; `None` when either is NaN.
pub(crate) fn compare_numbers(x: Number, y: Number) -> Option<Ordering> {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        (Number::Int(a), Number::Float(b)) => compare_int_float(a, b),
        (Number::Float(a), Number::Int(b)) => compare_int_float(b, a).map(Ordering::reverse),
        (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
    }
}

/// Compares an integer with a float exactly, without rounding the integer
/// to the nearest float.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn compare_int_float(int: i64, float: f64) -> Option<Ordering> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return None;
    }
    if float >= LIMIT {
        return Some(Ordering::Less);
    }
    if float < -LIMIT {
        return Some(Ordering::Greater);
    }
    // in range, so the integral part converts exactly
    let whole = float.trunc();
    let order = int.cmp(&(whole as i64));
    if order != Ordering::Equal {
        return Some(order);
    }
    0.0_f64.partial_cmp(&(float - whole))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;
    use crate::store::VarNames;

    fn eval_text(text: &str) -> Result<Number> {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let mut names = VarNames::starting_at(0);
        let term = store.build(&Term::parse(text).unwrap(), &mut atoms, &mut names);
        eval(&store, &atoms, term)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval_text("1 + 2 * 3").unwrap(), Number::Int(7));
        assert_eq!(eval_text("7 // 2").unwrap(), Number::Int(3));
        assert_eq!(eval_text("-7 // 2").unwrap(), Number::Int(-3));
        assert_eq!(eval_text("-7 mod 2").unwrap(), Number::Int(1));
        assert_eq!(eval_text("-7 rem 2").unwrap(), Number::Int(-1));
        assert_eq!(eval_text("-7 div 2").unwrap(), Number::Int(-4));
        assert_eq!(eval_text("2 ** 10").unwrap(), Number::Int(1024));
        assert_eq!(eval_text("2 ^ 3").unwrap(), Number::Int(8));
        assert_eq!(eval_text("1 << 4 \\/ 1").unwrap(), Number::Int(17));
        assert_eq!(eval_text("gcd(12, 18)").unwrap(), Number::Int(6));
        assert_eq!(eval_text("max(1, 2.0)").unwrap(), Number::Float(2.0));
        assert_eq!(eval_text("msb(8)").unwrap(), Number::Int(3));
        assert_eq!(eval_text("[a]").unwrap(), Number::Int(97));
    }

    #[test]
    fn test_division() {
        assert_eq!(eval_text("4 / 2").unwrap(), Number::Int(2));
        assert_eq!(eval_text("7 / 2").unwrap(), Number::Float(3.5));
        assert_eq!(
            eval_text("1 / 0").unwrap_err(),
            Error::Evaluation(EvaluationError::ZeroDivisor)
        );
        assert_eq!(
            eval_text("1 mod 0").unwrap_err(),
            Error::Evaluation(EvaluationError::ZeroDivisor)
        );
    }

    #[test]
    fn test_float_functions() {
        assert_eq!(eval_text("sqrt(16)").unwrap(), Number::Float(4.0));
        assert_eq!(eval_text("float(3)").unwrap(), Number::Float(3.0));
        assert_eq!(eval_text("truncate(3.7)").unwrap(), Number::Int(3));
        assert_eq!(eval_text("round(2.5)").unwrap(), Number::Int(3));
        assert_eq!(eval_text("floor(-0.5)").unwrap(), Number::Int(-1));
        assert_eq!(eval_text("ceiling(0.5)").unwrap(), Number::Int(1));
        assert_eq!(
            eval_text("sqrt(-1)").unwrap_err(),
            Error::Evaluation(EvaluationError::Undefined)
        );
        assert!(matches!(eval_text("pi").unwrap(), Number::Float(value) if value > 3.0));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            eval_text("1 + a").unwrap_err().to_string(),
            "type error: expected evaluable, found a/0"
        );
        assert_eq!(
            eval_text("foo(1)").unwrap_err().to_string(),
            "type error: expected evaluable, found foo/1"
        );
        assert_eq!(eval_text("X + 1").unwrap_err(), Error::Instantiation);
        assert_eq!(
            eval_text("9223372036854775807 + 1").unwrap_err(),
            Error::Evaluation(EvaluationError::IntOverflow)
        );
        assert!(matches!(
            eval_text("1.5 // 2").unwrap_err(),
            Error::Type { expected: "integer", .. }
        ));
    }

    #[test]
    fn test_compare_numbers() {
        assert_eq!(
            compare_numbers(Number::Int(1), Number::Float(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_numbers(Number::Int(2), Number::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_numbers(Number::Float(f64::NAN), Number::Int(1)), None);
    }

    #[test]
    fn test_compare_large_integers_with_floats_exactly() {
        let two_53 = 9_007_199_254_740_992_i64;
        let float = Number::Float(9_007_199_254_740_992.0);
        assert_eq!(compare_numbers(Number::Int(two_53), float), Some(Ordering::Equal));
        assert_eq!(compare_numbers(Number::Int(two_53 + 1), float), Some(Ordering::Greater));
        assert_eq!(compare_numbers(float, Number::Int(two_53 + 1)), Some(Ordering::Less));
        assert_eq!(
            compare_numbers(Number::Int(i64::MAX), Number::Float(9_223_372_036_854_775_808.0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_numbers(Number::Int(i64::MIN), Number::Float(-9_223_372_036_854_775_808.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(compare_numbers(Number::Int(-3), Number::Float(-2.5)), Some(Ordering::Less));
        assert_eq!(compare_numbers(Number::Int(-2), Number::Float(-2.5)), Some(Ordering::Greater));
        assert_eq!(
            compare_numbers(Number::Int(i64::MIN), Number::Float(f64::NEG_INFINITY)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_integer_powers() {
        assert_eq!(eval_text("1 ^ 9223372036854775807").unwrap(), Number::Int(1));
        assert_eq!(eval_text("0 ^ 9223372036854775807").unwrap(), Number::Int(0));
        assert_eq!(eval_text("0 ^ 0").unwrap(), Number::Int(1));
        assert_eq!(eval_text("-1 ^ 9223372036854775807").unwrap(), Number::Int(-1));
        assert_eq!(eval_text("-1 ^ -4").unwrap(), Number::Int(1));
        assert_eq!(eval_text("7 ^ 0").unwrap(), Number::Int(1));
        assert_eq!(eval_text("-2 ^ 63").unwrap(), Number::Int(i64::MIN));
        for text in ["2 ^ 63", "2 ^ 9223372036854775807", "3 ** 100", "-3 ^ 41"] {
            assert_eq!(
                eval_text(text).unwrap_err(),
                Error::Evaluation(EvaluationError::IntOverflow),
                "{text}"
            );
        }
        assert_eq!(
            eval_text("0 ^ -1").unwrap_err(),
            Error::Evaluation(EvaluationError::ZeroDivisor)
        );
        assert!(matches!(
            eval_text("2 ^ -1").unwrap_err(),
            Error::Type { expected: "float", .. }
        ));
    }

    #[test]
    fn test_cyclic_expressions_are_not_evaluable() {
        let mut atoms = AtomTable::new();
        let mut store = Store::new(false);
        let mut names = VarNames::starting_at(0);
        let x = store.build(&Term::var("X"), &mut atoms, &mut names);
        let sum = store.build(&Term::parse("X + 1").unwrap(), &mut atoms, &mut names);
        assert!(store.unify(x, sum));
        assert!(matches!(
            eval(&store, &atoms, x).unwrap_err(),
            Error::Type { expected: "evaluable", .. }
        ));

        let list = store.build(&Term::parse("[L]").unwrap(), &mut atoms, &mut names);
        let l = store.build(&Term::var("L"), &mut atoms, &mut names);
        assert!(store.unify(l, list));
        assert!(matches!(
            eval(&store, &atoms, list).unwrap_err(),
            Error::Type { expected: "evaluable", .. }
        ));

        let shared = store.build(&Term::parse("Y + Y").unwrap(), &mut atoms, &mut names);
        let y = store.build(&Term::var("Y"), &mut atoms, &mut names);
        let inner = store.build(&Term::parse("2 * 3").unwrap(), &mut atoms, &mut names);
        assert!(store.unify(y, inner));
        assert_eq!(eval(&store, &atoms, shared).unwrap(), Number::Int(12));
    }
}
