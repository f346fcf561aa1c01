use crate::term::Term;
use std::fmt;
use thiserror::Error;

/// Malformed source text, with a 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at {line}:{column}: {message}")]
pub struct ParseError {
    /// Line of the offending token.
    pub line: usize,
    /// Column of the offending token, counted in characters.
    pub column: usize,
    /// What the reader expected or found.
    pub message: String,
}

impl ParseError {
    pub(crate) fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let before = source.get(..offset).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |at| at + 1);
        let column = before[line_start..].chars().count() + 1;
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// The budget a session ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Term heap and variables.
    Heap,
    /// Goal frames and choice points.
    Stack,
    /// Resolution steps.
    Inferences,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Heap => "heap",
            Resource::Stack => "stack",
            Resource::Inferences => "inferences",
        })
    }
}

/// Arithmetic that has no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationError {
    /// Division or modulo by zero.
    ZeroDivisor,
    /// The function is not defined for its arguments.
    Undefined,
    /// The integer result does not fit in 64 bits.
    IntOverflow,
    /// The float result is infinite.
    FloatOverflow,
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvaluationError::ZeroDivisor => "zero_divisor",
            EvaluationError::Undefined => "undefined",
            EvaluationError::IntOverflow => "int_overflow",
            EvaluationError::FloatOverflow => "float_overflow",
        })
    }
}

/// Everything that can abort a query.
///
/// A goal that merely fails is not an error; it backtracks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Malformed program or query text.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A goal called a predicate with no definition.
    #[error("existence error: unknown procedure {name}/{arity}")]
    Existence {
        /// Predicate name.
        name: String,
        /// Predicate arity.
        arity: usize,
    },

    /// A built-in received an argument of the wrong kind.
    #[error("type error: expected {expected}, found {culprit}")]
    Type {
        /// The expected kind, e.g. `evaluable` or `callable`.
        expected: &'static str,
        /// The offending term.
        culprit: Term,
    },

    /// A built-in received an argument outside its domain.
    #[error("domain error: expected {domain}, found {culprit}")]
    Domain {
        /// The expected domain, e.g. `not_less_than_zero`.
        domain: &'static str,
        /// The offending term.
        culprit: Term,
    },

    /// A built-in needed a bound argument.
    #[error("instantiation error: argument is not sufficiently instantiated")]
    Instantiation,

    /// Arithmetic evaluation failed.
    #[error("evaluation error: {0}")]
    Evaluation(EvaluationError),

    /// A configured budget was exceeded.
    #[error("resource error: {0} exhausted")]
    ResourceExhausted(Resource),

    /// [`crate::QuerySession::next`] was called after the session finished.
    #[error("query session is exhausted")]
    SessionExhausted,

    /// Consult, assert or retract tried to change a built-in predicate, or
    /// assert or retract tried to change a consulted predicate that was not
    /// declared dynamic.
    #[error("permission error: cannot modify static procedure {name}/{arity}")]
    Permission {
        /// Predicate name.
        name: String,
        /// Predicate arity.
        arity: usize,
    },
}

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn existence(name: &str, arity: usize) -> Self {
        Error::Existence {
            name: name.to_string(),
            arity,
        }
    }

    pub(crate) fn type_error(expected: &'static str, culprit: Term) -> Self {
        Error::Type { expected, culprit }
    }

    /// Renders the error as the ISO error term `error(Formal, Context)`.
    #[must_use]
    pub fn to_term(&self) -> Term {
        fn indicator(name: &str, arity: usize) -> Term {
            Term::compound(
                "/",
                vec![
                    Term::atom(name),
                    Term::Integer(i64::try_from(arity).unwrap_or(i64::MAX)),
                ],
            )
        }

        let (formal, context) = match self {
            Error::Parse(error) => (
                Term::compound("syntax_error", vec![Term::atom(error.message.clone())]),
                Term::compound(
                    "position",
                    vec![
                        Term::Integer(i64::try_from(error.line).unwrap_or(i64::MAX)),
                        Term::Integer(i64::try_from(error.column).unwrap_or(i64::MAX)),
                    ],
                ),
            ),
            Error::Existence { name, arity } => (
                Term::compound(
                    "existence_error",
                    vec![Term::atom("procedure"), indicator(name, *arity)],
                ),
                indicator(name, *arity),
            ),
            Error::Type { expected, culprit } => (
                Term::compound("type_error", vec![Term::atom(*expected), culprit.clone()]),
                Term::var("_"),
            ),
            Error::Domain { domain, culprit } => (
                Term::compound("domain_error", vec![Term::atom(*domain), culprit.clone()]),
                Term::var("_"),
            ),
            Error::Instantiation => (Term::atom("instantiation_error"), Term::var("_")),
            Error::Evaluation(error) => (
                Term::compound("evaluation_error", vec![Term::atom(error.to_string())]),
                Term::var("_"),
            ),
            Error::ResourceExhausted(resource) => (
                Term::compound("resource_error", vec![Term::atom(resource.to_string())]),
                Term::var("_"),
            ),
            Error::SessionExhausted => (
                Term::compound(
                    "existence_error",
                    vec![Term::atom("query_session"), Term::atom("exhausted")],
                ),
                Term::var("_"),
            ),
            Error::Permission { name, arity } => (
                Term::compound(
                    "permission_error",
                    vec![
                        Term::atom("modify"),
                        Term::atom("static_procedure"),
                        indicator(name, *arity),
                    ],
                ),
                Term::var("_"),
            ),
        };
        Term::compound("error", vec![formal, context])
    }
}
