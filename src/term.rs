//! Owned terms: the term type of the public API, and its canonical writer.

use crate::error::ParseError;
use crate::ops::{self, OpDef};
use crate::parser;
use std::borrow::Cow;
use std::fmt;

/// A Prolog term detached from any machine.
///
/// Lists are normalised: a `'.'/2` chain is always represented as
/// [`Term::List`] with at least one item, and the empty list is the atom
/// `[]`. Use [`Term::compound`] and [`Term::list_with_tail`] to keep that
/// invariant when building terms by hand.
///
/// Equality, dropping and `Display` walk the term with an explicit stack, so
/// very deep terms are safe to compare, print and discard. `Clone` and
/// `Debug` are derived and recurse.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Term {
    /// An atom such as `bob` or `'hello world'`.
    Atom(String),
    /// A 64-bit integer.
    Integer(i64),
    /// A double precision float.
    Float(f64),
    /// A variable, named as in the source or `_G<n>` for engine variables.
    Var(String),
    /// A compound term `name(args...)` with at least one argument.
    Compound(String, Vec<Term>),
    /// A list `[items... | tail]`; the tail is `[]` for proper lists.
    List(Vec<Term>, Box<Term>),
}

/// The kind of a [`Term`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TermType {
    /// See [`Term::Atom`].
    Atom,
    /// See [`Term::Integer`].
    Integer,
    /// See [`Term::Float`].
    Float,
    /// See [`Term::Var`].
    Variable,
    /// See [`Term::Compound`].
    Compound,
    /// See [`Term::List`].
    List,
}

impl Term {
    /// The empty list `[]`.
    #[must_use]
    pub fn nil() -> Self {
        Term::Atom("[]".to_string())
    }

    /// Creates an atom.
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(name.into())
    }

    /// Creates a variable.
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    /// Creates a compound term. A name with no arguments yields an atom and
    /// `'.'(H, T)` yields a list.
    pub fn compound(name: impl Into<String>, mut args: Vec<Term>) -> Self {
        let name = name.into();
        if args.is_empty() {
            return Term::Atom(name);
        }
        if name == "." && args.len() == 2 {
            if let (Some(tail), Some(head)) = (args.pop(), args.pop()) {
                return Term::list_with_tail(vec![head], tail);
            }
        }
        Term::Compound(name, args)
    }

    /// Creates a proper list.
    #[must_use]
    pub fn list(items: Vec<Term>) -> Self {
        Term::list_with_tail(items, Term::nil())
    }

    /// Creates a list `[items... | tail]`, flattening a list tail.
    #[must_use]
    pub fn list_with_tail(mut items: Vec<Term>, mut tail: Term) -> Self {
        if items.is_empty() {
            return tail;
        }
        if let Term::List(rest, rest_tail) = &mut tail {
            items.append(rest);
            let rest_tail = std::mem::replace(&mut **rest_tail, Term::Integer(0));
            return Term::List(items, Box::new(rest_tail));
        }
        Term::List(items, Box::new(tail))
    }

    /// Reads a single term from Prolog text. A terminating `.` is optional.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the text is not exactly one term.
    pub fn parse(text: &str) -> Result<Term, ParseError> {
        parser::read_term(text)
    }

    /// Returns the kind of this term.
    #[must_use]
    pub fn term_type(&self) -> TermType {
        match self {
            Term::Atom(_) => TermType::Atom,
            Term::Integer(_) => TermType::Integer,
            Term::Float(_) => TermType::Float,
            Term::Var(_) => TermType::Variable,
            Term::Compound(..) => TermType::Compound,
            Term::List(..) => TermType::List,
        }
    }

    /// Returns the name of an atom.
    #[must_use]
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the value of an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Term::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value of a float.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Term::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the name of a variable.
    #[must_use]
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Term::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the items of a proper list (`[]` included).
    #[must_use]
    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::Atom(name) if name == "[]" => Some(&[]),
            Term::List(items, tail) if tail.is_nil() => Some(items),
            _ => None,
        }
    }

    /// Returns the name and arguments of a compound term. Lists are not
    /// reported as compounds; use [`Term::as_list`].
    #[must_use]
    pub fn as_compound(&self) -> Option<(&str, &[Term])> {
        match self {
            Term::Compound(name, args) => Some((name, args)),
            _ => None,
        }
    }

    /// Returns the text of a proper list of one-char atoms or character
    /// codes, the way double-quoted strings are read.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        self.as_list()?
            .iter()
            .map(|item| match item {
                Term::Atom(name) => {
                    let mut chars = name.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => None,
                    }
                }
                Term::Integer(code) => u32::try_from(*code).ok().and_then(char::from_u32),
                _ => None,
            })
            .collect()
    }

    /// True for `[]`.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Term::Atom(name) if name == "[]")
    }

    /// True for atoms and compound terms, which may be called as goals.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Term::Atom(_) | Term::Compound(..) | Term::List(..))
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Integer(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Term::Float(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::Atom(value.to_string())
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some(pair) = stack.pop() {
            match pair {
                (Term::Atom(x), Term::Atom(y)) | (Term::Var(x), Term::Var(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Term::Integer(x), Term::Integer(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Term::Float(x), Term::Float(y)) => {
                    if x != y {
                        return false;
                    }
                }
                (Term::Compound(f, xs), Term::Compound(g, ys)) => {
                    if f != g || xs.len() != ys.len() {
                        return false;
                    }
                    stack.extend(xs.iter().zip(ys).rev());
                }
                (Term::List(xs, xt), Term::List(ys, yt)) => {
                    if xs.len() != ys.len() {
                        return false;
                    }
                    stack.push((&**xt, &**yt));
                    stack.extend(xs.iter().zip(ys).rev());
                }
                _ => return false,
            }
        }
        true
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        let mut stack = Vec::new();
        take_children(self, &mut stack);
        while let Some(mut term) = stack.pop() {
            take_children(&mut term, &mut stack);
        }
    }
}

/// Moves the subterms of `term` onto `stack`, leaving it a leaf.
fn take_children(term: &mut Term, stack: &mut Vec<Term>) {
    match term {
        Term::Compound(_, args) => stack.append(args),
        Term::List(items, tail) => {
            stack.append(items);
            stack.push(std::mem::replace(&mut **tail, Term::Integer(0)));
        }
        _ => {}
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut writer = Writer::default();
        writer.write(self, 1200);
        f.write_str(&writer.out)
    }
}

pub(crate) fn is_symbol_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '.' | '?' | '@' | '#'
            | '&' | '$'
    )
}

fn is_plain_atom(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_lowercase() => chars.all(|c| c.is_alphanumeric() || c == '_'),
        Some(c) if is_symbol_char(c) => name != "." && chars.all(is_symbol_char),
        _ => matches!(name, "[]" | "{}" | "!" | ";"),
    }
}

/// Renders an atom, quoting it when it would not read back as itself.
pub(crate) fn quote_atom(name: &str) -> Cow<'_, str> {
    if is_plain_atom(name) {
        return Cow::Borrowed(name);
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('\'');
    for c in name.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    Cow::Owned(out)
}

pub(crate) fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let text = format!("{value:?}");
    match text.find('e') {
        Some(at) if !text[..at].contains('.') => format!("{}.0{}", &text[..at], &text[at..]),
        _ => text,
    }
}

fn as_char_list(items: &[Term], tail: &Term) -> Option<String> {
    if !tail.is_nil() {
        return None;
    }
    items
        .iter()
        .map(|item| match item {
            Term::Atom(name) => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}

fn write_string(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// When a space is owed before the next token the writer emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Gap {
    #[default]
    None,
    /// After a symbolic infix operator.
    Symbolic,
    /// After a symbolic prefix operator.
    Prefix { alnum_name: bool, sign: bool },
}

impl Gap {
    fn wants_space(self, next: char) -> bool {
        match self {
            Gap::None => false,
            Gap::Symbolic => is_symbol_char(next),
            Gap::Prefix { alnum_name, sign } => {
                is_symbol_char(next)
                    || (alnum_name && next.is_alphanumeric())
                    || (sign && next.is_ascii_digit())
            }
        }
    }
}

enum Task<'t> {
    Term(&'t Term, u32),
    Text(&'static str),
    Infix(&'t str),
}

#[derive(Default)]
struct Writer {
    out: String,
    gap: Gap,
}

impl Writer {
    fn text(&mut self, text: &str) {
        if let Some(first) = text.chars().next() {
            if self.gap.wants_space(first) {
                self.out.push(' ');
            }
            self.gap = Gap::None;
            self.out.push_str(text);
        }
    }

    fn write(&mut self, term: &Term, max: u32) {
        let mut tasks = vec![Task::Term(term, max)];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Text(text) => self.text(text),
                Task::Infix(name) => self.infix(name),
                Task::Term(term, max) => self.term(term, max, &mut tasks),
            }
        }
    }

    fn infix(&mut self, name: &str) {
        if name == "," {
            self.text(",");
        } else if name.starts_with(char::is_alphabetic) {
            self.text(" ");
            self.text(name);
            self.text(" ");
        } else {
            if self.out.ends_with(is_symbol_char) {
                self.out.push(' ');
            }
            self.text(&quote_atom(name));
            self.gap = Gap::Symbolic;
        }
    }

    /// Writes the start of `term` now and schedules the rest.
    fn term<'t>(&mut self, term: &'t Term, max: u32, tasks: &mut Vec<Task<'t>>) {
        match term {
            Term::Atom(name) => self.text(&quote_atom(name)),
            Term::Integer(value) => self.text(&value.to_string()),
            Term::Float(value) => self.text(&format_float(*value)),
            Term::Var(name) => self.text(name),
            Term::List(items, tail) => {
                if let Some(text) = as_char_list(items, tail) {
                    let mut quoted = String::new();
                    write_string(&mut quoted, &text);
                    self.text(&quoted);
                    return;
                }
                self.text("[");
                tasks.push(Task::Text("]"));
                if !tail.is_nil() {
                    tasks.push(Task::Term(tail, 999));
                    tasks.push(Task::Text("|"));
                }
                push_args(tasks, items);
            }
            Term::Compound(name, args) => {
                if name == "{}" && args.len() == 1 {
                    self.text("{");
                    tasks.push(Task::Text("}"));
                    tasks.push(Task::Term(&args[0], 1200));
                } else if let (Some(op), [left, right]) = (ops::infix(name), args.as_slice()) {
                    let open = op.priority > max;
                    if open {
                        self.text("(");
                        tasks.push(Task::Text(")"));
                    }
                    tasks.push(Task::Term(right, op.right_max()));
                    tasks.push(Task::Infix(name));
                    tasks.push(Task::Term(left, op.left_max()));
                } else if let (Some(op), [arg]) = (ops::prefix(name), args.as_slice()) {
                    let open = op.priority > max;
                    if open {
                        self.text("(");
                        tasks.push(Task::Text(")"));
                    }
                    self.text(&quote_atom(name));
                    let numeric = matches!(arg, Term::Integer(_) | Term::Float(_));
                    if numeric || name.starts_with(char::is_alphabetic) {
                        self.text(" ");
                    } else {
                        self.gap = Gap::Prefix {
                            alnum_name: name.ends_with(char::is_alphanumeric),
                            sign: matches!(name.as_str(), "-" | "+"),
                        };
                    }
                    tasks.push(Task::Term(arg, op.right_max()));
                } else {
                    self.text(&quote_atom(name));
                    self.text("(");
                    tasks.push(Task::Text(")"));
                    push_args(tasks, args);
                }
            }
        }
    }
}

/// Schedules comma separated arguments in reading order.
fn push_args<'t>(tasks: &mut Vec<Task<'t>>, args: &'t [Term]) {
    for (i, arg) in args.iter().enumerate().rev() {
        tasks.push(Task::Term(arg, 999));
        if i > 0 {
            tasks.push(Task::Text(","));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Term {
        Term::parse(text).unwrap()
    }

    #[test]
    fn test_operators_print_infix() {
        assert_eq!(parse("a:-b,c").to_string(), "a:-b,c");
        assert_eq!(parse("X is 1+2*3").to_string(), "X is 1+2*3");
        assert_eq!(parse("(1+2)*3").to_string(), "(1+2)*3");
        assert_eq!(parse("1-(2-3)").to_string(), "1-(2-3)");
        assert_eq!(parse("1-2-3").to_string(), "1-2-3");
        assert_eq!(parse("(a->b;c)").to_string(), "a->b;c");
        assert_eq!(parse("f((a,b))").to_string(), "f((a,b))");
    }

    #[test]
    fn test_negative_numbers_and_prefix_minus() {
        assert_eq!(parse("1 - -1").to_string(), "1- -1");
        assert_eq!(parse("-1").to_string(), "-1");
        assert_eq!(parse("- 1").to_string(), "- 1");
        assert_eq!(Term::compound("-", vec![Term::Integer(1)]).to_string(), "- 1");
        assert_eq!(parse("-a").to_string(), "-a");
        assert_eq!(parse("\\+ \\+ a").to_string(), "\\+ \\+a");
    }

    #[test]
    fn test_prefix_sign_before_digit_reads_back() {
        let power = Term::compound("^", vec![Term::Integer(1), Term::Integer(2)]);
        let negated = Term::compound("-", vec![power]);
        assert_eq!(negated.to_string(), "- 1^2");
        assert_eq!(parse(&negated.to_string()), negated);

        let sum = Term::compound("+", vec![Term::Integer(3), Term::atom("a")]);
        let plus = Term::compound("+", vec![sum]);
        assert_eq!(plus.to_string(), "+(3+a)");
        assert_eq!(parse(&plus.to_string()), plus);

        let literal = Term::compound("^", vec![Term::Integer(-1), Term::Integer(2)]);
        assert_eq!(literal.to_string(), "-1^2");
        assert_eq!(parse("-1^2"), literal);
    }

    #[test]
    fn test_lists_print_with_brackets() {
        assert_eq!(parse("[1,2,3]").to_string(), "[1,2,3]");
        assert_eq!(parse("[a|T]").to_string(), "[a|T]");
        assert_eq!(parse("[]").to_string(), "[]");
        assert_eq!(parse("\"abc\"").to_string(), "\"abc\"");
        assert_eq!(parse("'.'(1, '.'(2, []))").to_string(), "[1,2]");
    }

    #[test]
    fn test_atoms_are_quoted_when_needed() {
        assert_eq!(Term::atom("bob").to_string(), "bob");
        assert_eq!(Term::atom("hello world").to_string(), "'hello world'");
        assert_eq!(Term::atom("Bob").to_string(), "'Bob'");
        assert_eq!(Term::atom("it's").to_string(), "'it\\'s'");
        assert_eq!(Term::atom("").to_string(), "''");
        assert_eq!(Term::atom("+").to_string(), "+");
        assert_eq!(Term::atom(",").to_string(), "','");
        assert_eq!(Term::atom("[]").to_string(), "[]");
    }

    #[test]
    fn test_floats_always_carry_a_fraction() {
        assert_eq!(Term::Float(1.0).to_string(), "1.0");
        assert_eq!(Term::Float(2.5).to_string(), "2.5");
        assert_eq!(Term::Float(1e21).to_string(), "1.0e21");
    }

    #[test]
    fn test_curly_terms() {
        assert_eq!(parse("{a,b}").to_string(), "{a,b}");
        assert_eq!(parse("{}").to_string(), "{}");
    }

    #[test]
    fn test_as_string() {
        assert_eq!(parse("\"hi\"").as_string().as_deref(), Some("hi"));
        assert_eq!(parse("[104, 105]").as_string().as_deref(), Some("hi"));
        assert_eq!(Term::nil().as_string().as_deref(), Some(""));
        assert_eq!(parse("[ab, c]").as_string(), None);
        assert_eq!(parse("[h|T]").as_string(), None);
        assert_eq!(parse("[-1]").as_string(), None);
    }

    fn nested(depth: usize) -> Term {
        let mut term = Term::atom("z");
        for _ in 0..depth {
            term = Term::compound("s", vec![term]);
        }
        term
    }

    #[test]
    fn test_deep_terms_print_compare_and_drop() {
        let deep = nested(200_000);
        let text = deep.to_string();
        assert_eq!(text.len(), 200_000 * 3 + 1);
        assert!(text.starts_with("s(s(") && text.ends_with("z))"));
        assert!(deep == nested(200_000));
        assert!(deep != nested(199_999));

        let mut list = Term::nil();
        for i in 0..100_000 {
            list = Term::compound("-", vec![Term::Integer(i), list]);
        }
        assert!(list.to_string().starts_with("0-(1-(2-"));
        drop(list);
    }

    #[test]
    fn test_list_normalisation() {
        let t = Term::list_with_tail(vec![Term::Integer(1)], Term::list(vec![Term::Integer(2)]));
        assert_eq!(t, Term::list(vec![Term::Integer(1), Term::Integer(2)]));
        assert_eq!(Term::list(vec![]), Term::nil());
        assert_eq!(t.as_list().map(<[Term]>::len), Some(2));
        assert_eq!(t.term_type(), TermType::List);

        let dotted = Term::compound(".", vec![Term::Integer(1), Term::list(vec![Term::Integer(2)])]);
        assert_eq!(dotted, t);
        let odd = Term::compound(".", vec![Term::atom("a")]);
        assert_eq!(odd.as_compound().map(|(name, args)| (name, args.len())), Some((".", 1)));
        assert_eq!(Term::compound("f", vec![]), Term::atom("f"));
    }
}
