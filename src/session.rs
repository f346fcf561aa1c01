//! Iteration over the solutions of one query.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::heap::{TermRef, VarId};
use crate::term::Term;
use indexmap::IndexMap;
use log::debug;

/// One answer to a query.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Solution {
    /// The query succeeded and has no named variables.
    True,
    /// The value of every named query variable, in order of first
    /// appearance. Unbound variables appear as [`Term::Var`].
    Bindings(IndexMap<String, Term>),
}

impl Solution {
    /// True for [`Solution::Bindings`].
    #[must_use]
    pub fn is_bindings(&self) -> bool {
        matches!(self, Solution::Bindings(_))
    }

    /// The bindings in query order; empty for [`Solution::True`].
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &Term)> {
        let bindings = match self {
            Solution::Bindings(bindings) => Some(bindings),
            Solution::True => None,
        };
        bindings
            .into_iter()
            .flatten()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// The value bound to the query variable `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Term> {
        match self {
            Solution::Bindings(bindings) => bindings.get(name),
            Solution::True => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Suspended,
    Finished,
}

/// A query in progress.
///
/// Each call to [`QuerySession::next`] resumes the search where the previous
/// solution left it. The session borrows its [`crate::Machine`], so the
/// machine's program cannot change while solutions are being produced.
#[derive(Debug)]
pub struct QuerySession<'m> {
    engine: Engine<'m>,
    vars: Vec<(String, VarId)>,
    state: State,
}

impl<'m> QuerySession<'m> {
    pub(crate) fn new(engine: Engine<'m>, vars: Vec<(String, VarId)>) -> Self {
        Self {
            engine,
            vars,
            state: State::Ready,
        }
    }

    /// Finds the next solution.
    ///
    /// Returns `Ok(None)` once the search is exhausted. Calling `next` again
    /// after that, or after an error, fails with [`Error::SessionExhausted`].
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Solution>> {
        let found = match self.state {
            State::Finished => return Err(Error::SessionExhausted),
            State::Ready => self.engine.solve(),
            State::Suspended => self.engine.resume(),
        };
        match found {
            Ok(true) => {
                self.state = State::Suspended;
                Ok(Some(self.solution()))
            }
            Ok(false) => {
                self.state = State::Finished;
                debug!(
                    "query exhausted after {} inferences",
                    self.engine.inferences()
                );
                Ok(None)
            }
            Err(error) => {
                self.state = State::Finished;
                debug!("query aborted: {error}");
                Err(error)
            }
        }
    }

    /// Names of the query variables in order of first appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(name, _)| name.as_str())
    }

    fn solution(&self) -> Solution {
        let named: Vec<&(String, VarId)> = self
            .vars
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .collect();
        if named.is_empty() {
            return Solution::True;
        }
        let mut var_name = |var: VarId| {
            self.vars
                .iter()
                .find(|&&(_, id)| id == var)
                .map_or_else(|| format!("_G{var}"), |(name, _)| name.clone())
        };
        let bindings = named
            .into_iter()
            .map(|(name, var)| {
                let value = self.engine.resolve(TermRef::Var(*var), &mut var_name);
                (name.clone(), value)
            })
            .collect();
        Solution::Bindings(bindings)
    }
}

impl Iterator for QuerySession<'_> {
    type Item = Result<Solution>;

    fn next(&mut self) -> Option<Self::Item> {
        match QuerySession::next(self) {
            Ok(Some(solution)) => Some(Ok(solution)),
            Ok(None) | Err(Error::SessionExhausted) => None,
            Err(error) => Some(Err(error)),
        }
    }
}
