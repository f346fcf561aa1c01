//! The standard operator table shared by the reader and the writer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Xfx,
    Xfy,
    Yfx,
    Fy,
    Fx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpDef {
    pub(crate) priority: u32,
    pub(crate) kind: OpKind,
}

impl OpDef {
    const fn new(priority: u32, kind: OpKind) -> Self {
        Self { priority, kind }
    }

    /// Maximum priority of the left argument of an infix operator.
    pub(crate) fn left_max(self) -> u32 {
        match self.kind {
            OpKind::Yfx => self.priority,
            _ => self.priority - 1,
        }
    }

    /// Maximum priority of the right (or only) argument.
    pub(crate) fn right_max(self) -> u32 {
        match self.kind {
            OpKind::Xfy | OpKind::Fy => self.priority,
            _ => self.priority - 1,
        }
    }
}

pub(crate) fn infix(name: &str) -> Option<OpDef> {
    use OpKind::{Xfx, Xfy, Yfx};
    let def = match name {
        ":-" | "-->" => OpDef::new(1200, Xfx),
        ";" | "|" => OpDef::new(1100, Xfy),
        "->" | "*->" => OpDef::new(1050, Xfy),
        "," => OpDef::new(1000, Xfy),
        "=" | "\\=" | "==" | "\\==" | "@<" | "@>" | "@=<" | "@>=" | "=.." | "is" | "=:="
        | "=\\=" | "<" | ">" | "=<" | ">=" => OpDef::new(700, Xfx),
        "+" | "-" | "/\\" | "\\/" | "xor" => OpDef::new(500, Yfx),
        "*" | "/" | "//" | "rem" | "mod" | "div" | "<<" | ">>" => OpDef::new(400, Yfx),
        "**" => OpDef::new(200, Xfx),
        "^" | ":" => OpDef::new(200, Xfy),
        _ => return None,
    };
    Some(def)
}

pub(crate) fn prefix(name: &str) -> Option<OpDef> {
    use OpKind::{Fx, Fy};
    let def = match name {
        ":-" | "?-" => OpDef::new(1200, Fx),
        "dynamic" | "discontiguous" | "initialization" => OpDef::new(1150, Fx),
        "\\+" => OpDef::new(900, Fy),
        "-" | "+" | "\\" => OpDef::new(200, Fy),
        _ => return None,
    };
    Some(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_priorities() {
        let comma = infix(",").unwrap();
        assert_eq!((comma.left_max(), comma.right_max()), (999, 1000));
        let minus = infix("-").unwrap();
        assert_eq!((minus.left_max(), minus.right_max()), (500, 499));
        let neg = prefix("-").unwrap();
        assert_eq!(neg.right_max(), 200);
        assert!(infix("foo").is_none());
    }
}
