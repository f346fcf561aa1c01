use indexmap::IndexSet;
use std::mem::size_of;

/// An interned atom name.
///
/// Atoms are dense indices into an [`AtomTable`]. The first entries of every
/// table are the well-known atoms the engine dispatches on, so those have
/// fixed ids across all machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Atom(pub(crate) u32);

macro_rules! well_known_atoms {
    ($($konst:ident = $text:literal),* $(,)?) => {
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[repr(u32)]
        enum WellKnown { $($konst),* }

        #[allow(dead_code)]
        impl Atom {
            $(pub(crate) const $konst: Atom = Atom(WellKnown::$konst as u32);)*
        }

        const WELL_KNOWN: &[&str] = &[$($text),*];
    };
}

well_known_atoms! {
    NIL = "[]",
    DOT = ".",
    COMMA = ",",
    SEMICOLON = ";",
    ARROW = "->",
    COLON = ":",
    TRUE = "true",
    FAIL = "fail",
    FALSE = "false",
    CUT = "!",
    NOT_PROVABLE = "\\+",
    NOT = "not",
    CALL = "call",
    FINDALL = "findall",
    MINUS = "-",
    LESS = "<",
    EQUAL = "=",
    GREATER = ">",
    USER = "user",
    SYSTEM = "system",
    EMPTY = "",
}

/// Interns atom names and resolves ids back to text.
pub(crate) trait Interner {
    fn intern(&mut self, name: &str) -> Atom;
    fn name(&self, atom: Atom) -> &str;
}

/// The machine-owned atom table.
#[derive(Debug, Clone)]
pub(crate) struct AtomTable {
    names: IndexSet<String>,
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomTable {
    #[must_use]
    pub(crate) fn new() -> Self {
        let names = WELL_KNOWN.iter().map(|name| (*name).to_string()).collect();
        Self { names }
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Atom> {
        self.names
            .get_index_of(name)
            .and_then(|index| u32::try_from(index).ok())
            .map(Atom)
    }
}

impl Interner for AtomTable {
    fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.lookup(name) {
            return atom;
        }
        let (index, _) = self.names.insert_full(name.to_string());
        Atom(u32::try_from(index).unwrap_or(u32::MAX))
    }

    fn name(&self, atom: Atom) -> &str {
        self.names
            .get_index(atom.0 as usize)
            .map_or("", String::as_str)
    }
}

/// A session-local extension of a machine's atom table.
///
/// Atoms already known to the machine keep their ids; new names get ids past
/// the end of the base table. The base table cannot change while the overlay
/// borrows it, so ids never collide.
#[derive(Debug, Clone)]
pub(crate) struct AtomOverlay<'m> {
    base: &'m AtomTable,
    local: IndexSet<String>,
    bytes: usize,
}

impl<'m> AtomOverlay<'m> {
    pub(crate) fn new(base: &'m AtomTable) -> Self {
        Self {
            base,
            local: IndexSet::new(),
            bytes: 0,
        }
    }

    /// Memory held by the session's own atoms, counted against the heap.
    pub(crate) fn size_in_bytes(&self) -> usize {
        self.bytes
    }
}

impl Interner for AtomOverlay<'_> {
    fn intern(&mut self, name: &str) -> Atom {
        if let Some(atom) = self.base.lookup(name) {
            return atom;
        }
        let (index, fresh) = self.local.insert_full(name.to_string());
        if fresh {
            self.bytes += name.len() + size_of::<String>() + size_of::<usize>();
        }
        Atom(u32::try_from(self.base.len() + index).unwrap_or(u32::MAX))
    }

    fn name(&self, atom: Atom) -> &str {
        let index = atom.0 as usize;
        if index < self.base.len() {
            self.base.name(atom)
        } else {
            self.local
                .get_index(index - self.base.len())
                .map_or("", String::as_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_atoms_have_fixed_ids() {
        let table = AtomTable::new();
        assert_eq!(table.name(Atom::NIL), "[]");
        assert_eq!(table.name(Atom::COMMA), ",");
        assert_eq!(table.name(Atom::EMPTY), "");
        assert_eq!(table.lookup("true"), Some(Atom::TRUE));
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = AtomTable::new();
        let a = table.intern("parent");
        let b = table.intern("parent");
        assert_eq!(a, b);
        assert_eq!(table.name(a), "parent");
    }

    #[test]
    fn test_overlay_extends_without_touching_base() {
        let mut table = AtomTable::new();
        let known = table.intern("tom");
        let base_len = table.len();

        let mut overlay = AtomOverlay::new(&table);
        assert_eq!(overlay.intern("tom"), known);
        assert_eq!(overlay.size_in_bytes(), 0);
        let fresh = overlay.intern("bob");
        assert_eq!(fresh.0 as usize, base_len);
        let grown = overlay.size_in_bytes();
        assert!(grown > 3);
        overlay.intern("bob");
        assert_eq!(overlay.size_in_bytes(), grown);
        assert_eq!(overlay.name(fresh), "bob");
        assert_eq!(overlay.name(known), "tom");
        assert_eq!(table.len(), base_len);
    }
}
