//! SLD resolution over a goal stack and a choice point stack.
//!
//! Goals form a persistent linked list stored in a frame arena, so a choice
//! point saves its continuation as a single index. Everything a choice point
//! has to undo (bindings, heap cells, variables, frames) is released by
//! truncation back to the marks it recorded.

use crate::atom::{Atom, AtomOverlay, Interner};
use crate::builtins::Builtins;
use crate::database::{ArgKey, Database, PredKey, Predicate};
use crate::error::{Error, Resource, Result};
use crate::heap::{HeapMark, TermRef, VarId};
use crate::store::{Detached, Store};
use crate::term::Term;
use log::{trace, warn};
use smallvec::SmallVec;
use std::mem::size_of;

/// Budgets a single resolution may use.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) heap_bytes: usize,
    pub(crate) stack_bytes: usize,
    pub(crate) max_inferences: Option<u64>,
}

/// Where the predicates of a goal are looked up.
///
/// Library clause bodies run in `system`, so their helpers cannot be
/// shadowed. Goals they receive as data run in `caller`, the innermost
/// module outside the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Context {
    module: Atom,
    caller: Atom,
}

impl Context {
    fn of(module: Atom) -> Self {
        Self {
            module,
            caller: module,
        }
    }

    /// The context of a goal passed in as data.
    fn meta(self) -> Self {
        Self::of(self.caller)
    }

    /// The context of a clause body defined in `module`.
    fn enter(self, module: Atom) -> Self {
        if module != Atom::SYSTEM {
            Self::of(module)
        } else if self.module == Atom::SYSTEM {
            self
        } else {
            Self {
                module,
                caller: self.module,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Goal {
    /// Prove `term`. A `!` inside it cuts back to `cut_barrier` choice points.
    Call {
        term: TermRef,
        cut_barrier: usize,
        context: Context,
    },
    /// Drop every choice point above the given height.
    CutTo(usize),
    /// Record a `findall/3` solution in the choice point at `choice`.
    Collect { choice: usize, template: TermRef },
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    goal: Goal,
    next: Option<u32>,
}

#[derive(Debug)]
enum Alternative<'m> {
    /// The remaining clauses of a predicate call.
    Clauses {
        goal: TermRef,
        predicate: &'m Predicate,
        next: usize,
        key: Option<ArgKey>,
        context: Context,
    },
    /// The other branch of a disjunction or if-then-else.
    Goal {
        goal: TermRef,
        cut_barrier: usize,
        context: Context,
    },
    /// Continue as if the goal succeeded, for `\+`.
    Succeed,
    /// All solutions of a `findall/3` goal have been collected.
    Collect { bag: Vec<Detached>, result: TermRef },
}

#[derive(Debug)]
struct ChoicePoint<'m> {
    alternative: Alternative<'m>,
    goals: Option<u32>,
    trail_len: usize,
    heap: HeapMark,
    var_count: VarId,
    frames: usize,
}

/// True for the control constructs the engine runs itself.
pub(crate) fn is_control(key: PredKey) -> bool {
    matches!(
        key,
        (Atom::TRUE | Atom::FAIL | Atom::FALSE | Atom::CUT, 0)
            | (Atom::COMMA | Atom::SEMICOLON | Atom::ARROW | Atom::COLON, 2)
            | (Atom::NOT_PROVABLE | Atom::NOT, 1)
            | (Atom::CALL, 1..=8)
            | (Atom::FINDALL, 3)
    )
}

/// One resolution in progress.
#[derive(Debug)]
pub(crate) struct Engine<'m> {
    db: &'m Database,
    builtins: &'m Builtins,
    pub(crate) atoms: AtomOverlay<'m>,
    pub(crate) store: Store,
    frames: Vec<Frame>,
    goals: Option<u32>,
    choices: Vec<ChoicePoint<'m>>,
    limits: Limits,
    inferences: u64,
    collected: usize,
}

impl<'m> Engine<'m> {
    pub(crate) fn new(
        db: &'m Database,
        builtins: &'m Builtins,
        atoms: AtomOverlay<'m>,
        limits: Limits,
        occurs_check: bool,
    ) -> Self {
        let mut store = Store::new(occurs_check);
        store.trail_floor = 0;
        Self {
            db,
            builtins,
            atoms,
            store,
            frames: Vec::new(),
            goals: None,
            choices: Vec::new(),
            limits,
            inferences: 0,
            collected: 0,
        }
    }

    /// Makes `goal` the query to prove, in context `module`.
    pub(crate) fn push_query(&mut self, goal: TermRef, module: Atom) {
        self.push_goal(Goal::Call {
            term: goal,
            cut_barrier: 0,
            context: Context::of(module),
        });
    }

    pub(crate) fn inferences(&self) -> u64 {
        self.inferences
    }

    /// Runs until the goal list is empty (`Ok(true)`) or no alternative is
    /// left (`Ok(false)`).
    pub(crate) fn solve(&mut self) -> Result<bool> {
        loop {
            self.check_limits()?;
            let Some(goal) = self.pop_goal() else {
                return Ok(true);
            };
            if !self.step(goal)? && !self.backtrack()? {
                return Ok(false);
            }
        }
    }

    /// Looks for the next solution after one was found.
    pub(crate) fn resume(&mut self) -> Result<bool> {
        if !self.backtrack()? {
            return Ok(false);
        }
        self.solve()
    }

    /// Converts a stored term for the caller, naming unbound variables with
    /// `var_name`.
    pub(crate) fn resolve(&self, term: TermRef, var_name: &mut impl FnMut(VarId) -> String) -> Term {
        self.store.resolve(term, &self.atoms, var_name)
    }

    /// Converts a stored term for an error message.
    pub(crate) fn to_term(&self, term: TermRef) -> Term {
        self.resolve(term, &mut |var| format!("_G{var}"))
    }

    fn push_goal(&mut self, goal: Goal) {
        let index = u32::try_from(self.frames.len()).unwrap_or(u32::MAX);
        self.frames.push(Frame {
            goal,
            next: self.goals,
        });
        self.goals = Some(index);
    }

    fn pop_goal(&mut self) -> Option<Goal> {
        let index = self.goals?;
        let frame = self.frames[index as usize];
        self.goals = frame.next;
        // the top frame is garbage once no choice point can return to it
        let protected = self.choices.last().map_or(0, |choice| choice.frames);
        if index as usize + 1 == self.frames.len() && index as usize >= protected {
            self.frames.pop();
        }
        Some(frame.goal)
    }

    fn push_choice(&mut self, alternative: Alternative<'m>) {
        self.choices.push(ChoicePoint {
            alternative,
            goals: self.goals,
            trail_len: self.store.trail_len(),
            heap: self.store.heap.mark(),
            var_count: self.store.var_count(),
            frames: self.frames.len(),
        });
        self.sync_trail_floor();
    }

    fn sync_trail_floor(&mut self) {
        self.store.trail_floor = self.choices.last().map_or(0, |choice| choice.var_count);
    }

    fn cut_to(&mut self, height: usize) {
        if height >= self.choices.len() {
            return;
        }
        for choice in self.choices.drain(height..) {
            if let Alternative::Collect { bag, .. } = choice.alternative {
                self.collected -= bag.iter().map(Detached::size_in_bytes).sum::<usize>();
            }
        }
        self.sync_trail_floor();
    }

    fn check_limits(&self) -> Result<()> {
        let heap = self.store.size_in_bytes() + self.collected + self.atoms.size_in_bytes();
        if heap > self.limits.heap_bytes {
            warn!("heap exhausted: {heap} bytes in use");
            return Err(Error::ResourceExhausted(Resource::Heap));
        }
        let stack = self.frames.len() * size_of::<Frame>()
            + self.choices.len() * size_of::<ChoicePoint<'_>>();
        if stack > self.limits.stack_bytes {
            warn!(
                "stack exhausted: {} frames, {} choice points",
                self.frames.len(),
                self.choices.len()
            );
            return Err(Error::ResourceExhausted(Resource::Stack));
        }
        Ok(())
    }

    /// Resumes the newest choice point. `Ok(false)` when none is left.
    fn backtrack(&mut self) -> Result<bool> {
        loop {
            let Some(choice) = self.choices.pop() else {
                self.sync_trail_floor();
                return Ok(false);
            };
            trace!("backtracking into choice point {}", self.choices.len());
            self.store
                .restore(choice.trail_len, choice.heap, choice.var_count);
            self.frames.truncate(choice.frames);
            self.goals = choice.goals;
            self.sync_trail_floor();
            let resumed = match choice.alternative {
                Alternative::Clauses {
                    goal,
                    predicate,
                    next,
                    key,
                    context,
                } => self.try_clauses(goal, predicate, next, key, context),
                Alternative::Goal {
                    goal,
                    cut_barrier,
                    context,
                } => {
                    self.push_goal(Goal::Call {
                        term: goal,
                        cut_barrier,
                        context,
                    });
                    true
                }
                Alternative::Succeed => true,
                Alternative::Collect { bag, result } => {
                    self.collected -= bag.iter().map(Detached::size_in_bytes).sum::<usize>();
                    let items: Vec<TermRef> =
                        bag.iter().map(|item| self.store.import_detached(item)).collect();
                    let list = self.store.heap.new_list(&items, TermRef::NIL);
                    self.store.unify(list, result)
                }
            };
            if resumed {
                return Ok(true);
            }
        }
    }

    /// Tries the clauses of `predicate` from index `start` against `goal`.
    fn try_clauses(
        &mut self,
        goal: TermRef,
        predicate: &'m Predicate,
        start: usize,
        key: Option<ArgKey>,
        context: Context,
    ) -> bool {
        let clauses = &predicate.clauses;
        let mut candidates = (start..clauses.len()).filter(|&i| clauses[i].may_match(key));
        let Some(index) = candidates.next() else {
            return false;
        };
        let cut_barrier = self.choices.len();
        if let Some(next) = candidates.next() {
            self.push_choice(Alternative::Clauses {
                goal,
                predicate,
                next,
                key,
                context,
            });
        }
        let clause = &clauses[index];
        let relocation = self.store.import(clause.heap(), clause.var_count);
        if !self.store.unify(relocation.apply(clause.head), goal) {
            return false;
        }
        let body = relocation.apply(clause.body);
        if body != TermRef::TRUE {
            self.push_goal(Goal::Call {
                term: body,
                cut_barrier,
                context,
            });
        }
        true
    }

    fn step(&mut self, goal: Goal) -> Result<bool> {
        match goal {
            Goal::Call {
                term,
                cut_barrier,
                context,
            } => {
                // a variable goal is a meta-call: cut inside it is local
                if matches!(term, TermRef::Var(_)) {
                    self.call(term, self.choices.len(), context.meta())
                } else {
                    self.call(term, cut_barrier, context)
                }
            }
            Goal::CutTo(height) => {
                self.cut_to(height);
                Ok(true)
            }
            Goal::Collect { choice, template } => {
                let item = self.store.detach(template);
                let size = item.size_in_bytes();
                if let Some(ChoicePoint {
                    alternative: Alternative::Collect { bag, .. },
                    ..
                }) = self.choices.get_mut(choice)
                {
                    bag.push(item);
                    self.collected += size;
                }
                Ok(false)
            }
        }
    }

    fn call(&mut self, term: TermRef, cut_barrier: usize, context: Context) -> Result<bool> {
        self.inferences += 1;
        if let Some(max) = self.limits.max_inferences {
            if self.inferences > max {
                warn!("inference limit of {max} reached");
                return Err(Error::ResourceExhausted(Resource::Inferences));
            }
        }

        let term = self.store.deref(term);
        let (name, args): (Atom, SmallVec<[TermRef; 8]>) = match term {
            TermRef::Atom(atom) => (atom, SmallVec::new()),
            TermRef::Struct(id) => (
                self.store.heap.functor(id).name,
                SmallVec::from_slice(self.store.heap.args(id)),
            ),
            TermRef::Var(_) => return Err(Error::Instantiation),
            TermRef::Int(_) | TermRef::Float(_) => {
                return Err(Error::type_error("callable", self.to_term(term)));
            }
        };
        let arity = u32::try_from(args.len()).unwrap_or(u32::MAX);

        match (name, args.as_slice()) {
            (Atom::TRUE, []) => Ok(true),
            (Atom::FAIL | Atom::FALSE, []) => Ok(false),
            (Atom::CUT, []) => {
                self.cut_to(cut_barrier);
                Ok(true)
            }
            (Atom::COMMA, &[left, right]) => {
                self.push_goal(Goal::Call {
                    term: right,
                    cut_barrier,
                    context,
                });
                self.push_goal(Goal::Call {
                    term: left,
                    cut_barrier,
                    context,
                });
                Ok(true)
            }
            (Atom::SEMICOLON, &[left, right]) => {
                self.disjunction(left, right, cut_barrier, context);
                Ok(true)
            }
            (Atom::ARROW, &[condition, then]) => {
                let height = self.choices.len();
                self.push_goal(Goal::Call {
                    term: then,
                    cut_barrier,
                    context,
                });
                self.push_goal(Goal::CutTo(height));
                self.push_goal(Goal::Call {
                    term: condition,
                    cut_barrier: height,
                    context,
                });
                Ok(true)
            }
            (Atom::NOT_PROVABLE | Atom::NOT, &[goal]) => {
                let height = self.choices.len();
                self.push_choice(Alternative::Succeed);
                self.push_goal(Goal::Call {
                    term: TermRef::Atom(Atom::FAIL),
                    cut_barrier,
                    context,
                });
                self.push_goal(Goal::CutTo(height));
                self.push_goal(Goal::Call {
                    term: goal,
                    cut_barrier: height + 1,
                    context,
                });
                Ok(true)
            }
            (Atom::CALL, [goal, extra @ ..]) => {
                let goal = self.add_args(*goal, extra)?;
                let cut_barrier = self.choices.len();
                self.push_goal(Goal::Call {
                    term: goal,
                    cut_barrier,
                    context: context.meta(),
                });
                Ok(true)
            }
            (Atom::FINDALL, &[template, goal, result]) => {
                let choice = self.choices.len();
                self.push_choice(Alternative::Collect {
                    bag: Vec::new(),
                    result,
                });
                self.push_goal(Goal::Collect { choice, template });
                self.push_goal(Goal::Call {
                    term: goal,
                    cut_barrier: choice + 1,
                    context,
                });
                Ok(true)
            }
            (Atom::COLON, &[qualifier, goal]) => {
                let module = match self.store.deref(qualifier) {
                    TermRef::Atom(module) => module,
                    TermRef::Var(_) => return Err(Error::Instantiation),
                    other => return Err(Error::type_error("atom", self.to_term(other))),
                };
                self.push_goal(Goal::Call {
                    term: goal,
                    cut_barrier,
                    context: Context::of(module),
                });
                Ok(true)
            }
            _ => {
                if let Some(builtin) = self.builtins.get((name, arity)) {
                    return builtin(self, &args);
                }
                self.call_predicate(term, name, &args, context)
            }
        }
    }

    fn disjunction(&mut self, left: TermRef, right: TermRef, cut_barrier: usize, context: Context) {
        let if_then = match self.store.deref(left) {
            TermRef::Struct(id) => {
                let functor = self.store.heap.functor(id);
                (functor.name == Atom::ARROW && functor.arity == 2)
                    .then(|| (self.store.heap.arg(id, 0), self.store.heap.arg(id, 1)))
            }
            _ => None,
        };
        let height = self.choices.len();
        self.push_choice(Alternative::Goal {
            goal: right,
            cut_barrier,
            context,
        });
        match if_then {
            Some((condition, then)) => {
                self.push_goal(Goal::Call {
                    term: then,
                    cut_barrier,
                    context,
                });
                self.push_goal(Goal::CutTo(height));
                self.push_goal(Goal::Call {
                    term: condition,
                    cut_barrier: height + 1,
                    context,
                });
            }
            None => self.push_goal(Goal::Call {
                term: left,
                cut_barrier,
                context,
            }),
        }
    }

    /// Builds `goal` with `extra` arguments appended, for `call/N`.
    pub(crate) fn add_args(&mut self, goal: TermRef, extra: &[TermRef]) -> Result<TermRef> {
        let goal = self.store.deref(goal);
        if extra.is_empty() {
            return Ok(goal);
        }
        match goal {
            TermRef::Atom(name) => Ok(self.store.heap.new_struct(name, extra)),
            TermRef::Struct(id) => {
                let name = self.store.heap.functor(id).name;
                let mut args: SmallVec<[TermRef; 8]> =
                    SmallVec::from_slice(self.store.heap.args(id));
                args.extend_from_slice(extra);
                Ok(self.store.heap.new_struct(name, &args))
            }
            TermRef::Var(_) => Err(Error::Instantiation),
            other => Err(Error::type_error("callable", self.to_term(other))),
        }
    }

    fn call_predicate(
        &mut self,
        goal: TermRef,
        name: Atom,
        args: &[TermRef],
        context: Context,
    ) -> Result<bool> {
        let arity = u32::try_from(args.len()).unwrap_or(u32::MAX);
        let db = self.db;
        let Some((defining, predicate)) = db.lookup(context.module, (name, arity)) else {
            return Err(Error::existence(self.atoms.name(name), args.len()));
        };
        let key = args
            .first()
            .and_then(|&first| ArgKey::of(self.store.deref(first), &self.store.heap));
        Ok(self.try_clauses(goal, predicate, 0, key, context.enter(defining)))
    }
}
