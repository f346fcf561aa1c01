//! The machine: configuration, atom table and clause database.

use crate::atom::{Atom, AtomOverlay, AtomTable, Interner};
use crate::builtins::Builtins;
use crate::database::{split_clause, Clause, Database, Module, PredKey};
use crate::engine::{is_control, Engine, Limits};
use crate::error::{Error, ParseError, Result};
use crate::parser;
use crate::session::QuerySession;
use crate::store::{Store, VarNames};
use crate::term::Term;
use bstr::ByteSlice;
use indexmap::IndexSet;
use log::{debug, error, warn};

const PRELUDE: &str = include_str!("prelude.pl");

/// Machine configuration.
///
/// Budgets apply to each query session separately.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct MachineConfig {
    /// Bytes of term heap and variables a session may use.
    pub heap_size: usize,
    /// Bytes of goal frames and choice points a session may use.
    pub stack_size: usize,
    /// Refuse to bind a variable to a term containing it.
    pub occurs_check: bool,
    /// Maximum number of goals a session may resolve.
    pub max_inferences: Option<u64>,
    /// Consult the list and control library into the `system` module.
    pub load_prelude: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            heap_size: 64 * 1024 * 1024,
            stack_size: 16 * 1024 * 1024,
            occurs_check: false,
            max_inferences: None,
            load_prelude: true,
        }
    }
}

impl MachineConfig {
    /// Sets the heap budget in bytes.
    #[must_use]
    pub fn with_heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = bytes;
        self
    }

    /// Sets the stack budget in bytes.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Turns the occurs check on or off.
    #[must_use]
    pub fn with_occurs_check(mut self, enabled: bool) -> Self {
        self.occurs_check = enabled;
        self
    }

    /// Limits the number of goals a session may resolve.
    #[must_use]
    pub fn with_max_inferences(mut self, limit: u64) -> Self {
        self.max_inferences = Some(limit);
        self
    }

    /// Chooses whether the library prelude is loaded.
    #[must_use]
    pub fn with_prelude(mut self, enabled: bool) -> Self {
        self.load_prelude = enabled;
        self
    }

    /// Reads a configuration from JSON; missing fields keep their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// A Prolog machine.
///
/// Programs are consulted into named modules; queries run against the
/// current program through [`Machine::run_query`]. Sessions borrow the
/// machine, so the program cannot change while a query is running, and
/// several sessions may run at once on different threads.
///
/// ```
/// use microprolog::Machine;
///
/// let mut machine = Machine::new(None, None);
/// machine
///     .consult_module_string("user", "likes(sam, pizza). likes(ann, sushi).")
///     .unwrap();
/// let mut session = machine.run_query("likes(Who, sushi)").unwrap();
/// let solution = session.next().unwrap().unwrap();
/// assert_eq!(solution.get("Who").unwrap().to_string(), "ann");
/// assert_eq!(session.next().unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Machine {
    config: MachineConfig,
    atoms: AtomTable,
    db: Database,
    builtins: Builtins,
}

impl Default for Machine {
    fn default() -> Self {
        Self::with_config(MachineConfig::default())
    }
}

impl Machine {
    /// Creates a machine with the given heap and stack budgets in bytes;
    /// `None` keeps the default.
    #[must_use]
    pub fn new(heap_size: Option<usize>, stack_size: Option<usize>) -> Self {
        let defaults = MachineConfig::default();
        Self::with_config(MachineConfig {
            heap_size: heap_size.unwrap_or(defaults.heap_size),
            stack_size: stack_size.unwrap_or(defaults.stack_size),
            ..defaults
        })
    }

    /// Creates a machine from a full configuration.
    #[must_use]
    pub fn with_config(config: MachineConfig) -> Self {
        let mut atoms = AtomTable::new();
        let builtins = Builtins::new(&mut atoms);
        let mut machine = Self {
            config,
            atoms,
            db: Database::new(),
            builtins,
        };
        if machine.config.load_prelude {
            if let Err(err) = machine.consult_module_string("system", PRELUDE) {
                error!("failed to load the prelude: {err}");
            }
        }
        machine
    }

    /// The configuration the machine was created with.
    #[must_use]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Loads program text into `module`, replacing everything the module
    /// held before. On error the machine is left unchanged.
    pub fn consult_module_string(&mut self, module: &str, source: &str) -> Result<(), ParseError> {
        let clauses = parser::read_program(source)?;
        let name = self.atoms.intern(module);
        let mut loaded = Module::default();
        let mut discontiguous: IndexSet<PredKey> = IndexSet::new();
        let mut seen: IndexSet<PredKey> = IndexSet::new();
        let mut last: Option<PredKey> = None;

        for (term, offset) in &clauses {
            let at = |message: String| ParseError::at(source, *offset, message);
            if let Some(directive) = as_directive(term) {
                self.directive(directive, &mut loaded, &mut discontiguous)
                    .map_err(at)?;
                continue;
            }
            let (key, clause) =
                Clause::compile(term, &mut self.atoms).map_err(|err| at(err.to_string()))?;
            self.check_modifiable(key).map_err(|err| at(err.to_string()))?;
            if last != Some(key) && !seen.insert(key) && !discontiguous.contains(&key) {
                warn!(
                    "clauses of {}/{} are not together in module {module}",
                    self.atoms.name(key.0),
                    key.1
                );
            }
            last = Some(key);
            loaded.predicate_mut(key).clauses.push(clause);
        }

        debug!(
            "consulted module {module}: {} clauses, {} predicates",
            clauses.len(),
            loaded.len()
        );
        self.db.replace_module(name, loaded);
        Ok(())
    }

    /// Like [`Machine::consult_module_string`] for raw bytes, which must be
    /// UTF-8.
    pub fn consult_module_bytes(&mut self, module: &str, source: &[u8]) -> Result<(), ParseError> {
        match source.to_str() {
            Ok(text) => self.consult_module_string(module, text),
            Err(err) => {
                let valid = source[..err.valid_up_to()].to_str_lossy();
                Err(ParseError::at(&valid, valid.len(), "invalid UTF-8"))
            }
        }
    }

    fn directive(
        &mut self,
        directive: &Term,
        module: &mut Module,
        discontiguous: &mut IndexSet<PredKey>,
    ) -> Result<(), String> {
        match directive {
            Term::Compound(name, args) if args.len() == 1 && name == "dynamic" => {
                for key in self.indicators(&args[0])? {
                    self.check_modifiable(key).map_err(|err| err.to_string())?;
                    module.predicate_mut(key).dynamic = true;
                }
                Ok(())
            }
            Term::Compound(name, args) if args.len() == 1 && name == "discontiguous" => {
                discontiguous.extend(self.indicators(&args[0])?);
                Ok(())
            }
            Term::Compound(name, _) if matches!(name.as_str(), "module" | "use_module" | "ensure_loaded") => {
                Ok(())
            }
            other => Err(format!("unsupported directive {other}")),
        }
    }

    /// Reads `N/A`, a conjunction of them, or a list of them.
    fn indicators(&mut self, spec: &Term) -> Result<Vec<PredKey>, String> {
        let mut keys = Vec::new();
        let mut stack = vec![spec];
        while let Some(spec) = stack.pop() {
            match spec {
                Term::Compound(name, args) if name == "," && args.len() == 2 => {
                    stack.push(&args[1]);
                    stack.push(&args[0]);
                }
                Term::List(items, tail) if tail.is_nil() => stack.extend(items.iter().rev()),
                Term::Compound(name, args) if name == "/" && args.len() == 2 => {
                    match (&args[0], &args[1]) {
                        (Term::Atom(name), Term::Integer(arity)) if *arity >= 0 => {
                            let arity = u32::try_from(*arity).map_err(|err| err.to_string())?;
                            keys.push((self.atoms.intern(name), arity));
                        }
                        _ => return Err(format!("invalid predicate indicator {spec}")),
                    }
                }
                other => return Err(format!("invalid predicate indicator {other}")),
            }
        }
        Ok(keys)
    }

    fn check_modifiable(&self, key: PredKey) -> Result<()> {
        if is_control(key) || self.builtins.is_builtin(key) {
            return Err(Error::Permission {
                name: self.atoms.name(key.0).to_string(),
                arity: key.1 as usize,
            });
        }
        Ok(())
    }

    /// Consulted predicates change only through reconsult unless declared
    /// dynamic.
    fn check_dynamic(&self, module: Atom, key: PredKey) -> Result<()> {
        match self.db.predicate(module, key) {
            Some(predicate) if !predicate.dynamic => Err(Error::Permission {
                name: self.atoms.name(key.0).to_string(),
                arity: key.1 as usize,
            }),
            _ => Ok(()),
        }
    }

    /// Parses `goal` and starts a session that runs it in module `user`.
    pub fn run_query(&self, goal: &str) -> Result<QuerySession<'_>, ParseError> {
        let term = parser::read_term(goal)?;
        let limits = Limits {
            heap_bytes: self.config.heap_size,
            stack_bytes: self.config.stack_size,
            max_inferences: self.config.max_inferences,
        };
        let mut engine = Engine::new(
            &self.db,
            &self.builtins,
            AtomOverlay::new(&self.atoms),
            limits,
            self.config.occurs_check,
        );
        let mut names = VarNames::starting_at(0);
        let root = engine.store.build(&term, &mut engine.atoms, &mut names);
        engine.push_query(root, Atom::USER);
        let vars = names
            .iter()
            .map(|(name, var)| (name.to_string(), var))
            .collect();
        debug!("starting query {term}");
        Ok(QuerySession::new(engine, vars))
    }

    /// Adds a clause after the existing clauses of its predicate.
    pub fn assertz(&mut self, module: &str, clause: &str) -> Result<()> {
        self.assert(module, clause, false)
    }

    /// Adds a clause before the existing clauses of its predicate.
    pub fn asserta(&mut self, module: &str, clause: &str) -> Result<()> {
        self.assert(module, clause, true)
    }

    fn assert(&mut self, module: &str, text: &str, front: bool) -> Result<()> {
        let term = parser::read_term(text)?;
        let (key, clause) = Clause::compile(&term, &mut self.atoms)?;
        self.check_modifiable(key)?;
        let module_name = self.atoms.intern(module);
        self.check_dynamic(module_name, key)?;
        self.db.assert(module_name, key, clause, front);
        debug!(
            "asserted a clause of {}/{} in {module}",
            self.atoms.name(key.0),
            key.1
        );
        Ok(())
    }

    /// Removes the first clause of `module` that unifies with `clause`.
    /// A pattern without a body only matches facts. Returns whether a clause
    /// was removed.
    pub fn retract(&mut self, module: &str, clause: &str) -> Result<bool> {
        let term = parser::read_term(clause)?;
        let (key, pattern) = Clause::compile(&term, &mut self.atoms)?;
        self.check_modifiable(key)?;
        let module_name = self.atoms.intern(module);
        self.check_dynamic(module_name, key)?;
        let removed = self.db.retract(module_name, key, |stored| {
            let mut store = Store::new(false);
            let ours = store.import(pattern.heap(), pattern.var_count);
            let theirs = store.import(stored.heap(), stored.var_count);
            store.unify(ours.apply(pattern.head), theirs.apply(stored.head))
                && store.unify(ours.apply(pattern.body), theirs.apply(stored.body))
        });
        if removed {
            debug!("retracted {} from {module}", split_clause(&term).0);
        }
        Ok(removed)
    }

    /// True if a goal `name/arity` run from `module` would find clauses or a
    /// dynamic declaration.
    pub fn has_predicate(&self, module: &str, name: &str, arity: usize) -> bool {
        let (Some(module), Some(name), Ok(arity)) = (
            self.atoms.lookup(module),
            self.atoms.lookup(name),
            u32::try_from(arity),
        ) else {
            return false;
        };
        self.db.lookup(module, (name, arity)).is_some()
    }
}

fn as_directive(term: &Term) -> Option<&Term> {
    match term {
        Term::Compound(name, args) if name == ":-" && args.len() == 1 => Some(&args[0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Solution;

    #[test]
    fn test_machine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Machine>();
    }

    #[test]
    fn test_consult_replaces_module() {
        let mut m = Machine::new(None, None);
        m.consult_module_string("user", "a(1). b(1).").unwrap();
        m.consult_module_string("user", "a(2).").unwrap();
        assert!(m.has_predicate("user", "a", 1));
        assert!(!m.has_predicate("user", "b", 1));
    }

    #[test]
    fn test_failed_consult_changes_nothing() {
        let mut m = Machine::new(None, None);
        m.consult_module_string("user", "a(1).").unwrap();
        let error = m
            .consult_module_string("user", "a(2).\nb(1) :- 3.")
            .unwrap_err();
        assert_eq!(error.line, 2);
        assert!(m.has_predicate("user", "a", 1));
        assert!(!m.has_predicate("user", "b", 1));
    }

    #[test]
    fn test_directives() {
        let mut m = Machine::new(None, None);
        m.consult_module_string(
            "lib",
            ":- module(lib, [seen/1]).
             :- dynamic seen/1, count/2.
             :- discontiguous([p/1]).
             p(1). q. p(2).",
        )
        .unwrap();
        assert!(m.has_predicate("lib", "seen", 1));
        assert!(m.has_predicate("lib", "count", 2));
        let error = m
            .consult_module_string("lib", ":- initialization(main).")
            .unwrap_err();
        assert!(error.message.contains("unsupported directive"));
    }

    #[test]
    fn test_builtins_cannot_be_redefined() {
        let mut m = Machine::new(None, None);
        let error = m.consult_module_string("user", "atom(x).").unwrap_err();
        assert!(error.message.contains("permission error"));
        assert!(m.assertz("user", "call(x)").is_err());
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let mut m = Machine::new(None, None);
        let error = m
            .consult_module_bytes("user", b"a(1).\nb(\xff).")
            .unwrap_err();
        assert_eq!((error.line, error.column), (2, 3));
        m.consult_module_bytes("user", "greeting('héllo').".as_bytes())
            .unwrap();
        assert!(m.has_predicate("user", "greeting", 1));
    }

    #[test]
    fn test_assert_and_retract() {
        let mut m = Machine::new(None, None);
        m.assertz("user", "counter(1)").unwrap();
        m.asserta("user", "counter(0)").unwrap();
        m.assertz("user", "double(X, Y) :- Y is X * 2").unwrap();
        let values: Vec<String> = m
            .run_query("counter(X)")
            .unwrap()
            .map(|s| s.unwrap().get("X").unwrap().to_string())
            .collect();
        assert_eq!(values, ["0", "1"]);

        assert!(m.retract("user", "counter(1)").unwrap());
        assert!(!m.retract("user", "counter(5)").unwrap());
        assert!(!m.retract("user", "double(_, _)").unwrap());
        assert!(m.retract("user", "double(_, _) :- _").unwrap());
        let left: Vec<Solution> = m.run_query("counter(X)").unwrap().map(Result::unwrap).collect();
        assert_eq!(left.len(), 1);
        assert!(m.run_query("double(2, Y)").unwrap().next().unwrap().is_none());
    }

    #[test]
    fn test_only_dynamic_predicates_change_after_consult() {
        let mut m = Machine::new(None, None);
        m.consult_module_string(
            "user",
            ":- dynamic(seen/1).
             seen(a).
             colour(red).",
        )
        .unwrap();
        let error = m.retract("user", "colour(red)").unwrap_err();
        assert_eq!(
            error,
            Error::Permission {
                name: "colour".to_string(),
                arity: 1
            }
        );
        assert!(matches!(
            m.assertz("user", "colour(blue)"),
            Err(Error::Permission { .. })
        ));
        assert!(m.retract("system", "append([], L, L)").is_err());
        assert!(m.has_predicate("user", "colour", 1));

        m.assertz("user", "seen(b)").unwrap();
        assert!(m.retract("user", "seen(a)").unwrap());
        m.assertz("user", "colour(green)").unwrap_err();
        m.assertz("other", "colour(green)").unwrap();
        let seen: Vec<Solution> = m.run_query("seen(X)").unwrap().map(Result::unwrap).collect();
        assert_eq!(seen.len(), 1);
        assert!(m.retract("user", "seen(b)").unwrap());
        assert!(m.run_query("seen(_)").unwrap().next().unwrap().is_none());
    }

    #[test]
    fn test_config_without_prelude() {
        let m = Machine::with_config(MachineConfig::default().with_prelude(false));
        assert!(!m.has_predicate("user", "append", 3));
        let m = Machine::default();
        assert!(m.has_predicate("user", "append", 3));
        assert_eq!(m.config(), &MachineConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_json() {
        let config = MachineConfig::from_json(r#"{"heap_size": 1024, "occurs_check": true}"#).unwrap();
        assert_eq!(config.heap_size, 1024);
        assert!(config.occurs_check);
        assert_eq!(config.stack_size, MachineConfig::default().stack_size);
    }
}
