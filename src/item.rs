//! LR items.

use crate::{
    grammar::{Grammar, ProductionID},
    symbol::{NonterminalID, SymbolID},
    terminal_set::TerminalSet,
};
use std::fmt;

/// A production together with a dot position inside its right-hand side.
///
/// `A ::= B (*) C d` represents a point in a parse where everything before
/// the dot has been recognized and the symbols after it are expected next.
/// Items order by production index first, then by dot position; every map
/// of items in this crate iterates in that order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LrItem {
    pub production: ProductionID,
    pub dot: u16,
}

impl LrItem {
    pub fn new(production: ProductionID, dot: u16) -> Self {
        Self { production, dot }
    }

    /// The item with the dot advanced one position to the right.
    pub fn shifted(self, g: &Grammar) -> Self {
        assert!(
            !self.is_dot_at_end(g),
            "attempt to shift past the end of an item"
        );
        Self {
            production: self.production,
            dot: self.dot + 1,
        }
    }

    pub fn is_dot_at_end(self, g: &Grammar) -> bool {
        self.dot as usize >= g.production(self.production).rhs.len()
    }

    /// The symbol directly after the dot, if any.
    pub fn symbol_after_dot(self, g: &Grammar) -> Option<SymbolID> {
        g.production(self.production)
            .rhs
            .get(self.dot as usize)
            .map(|part| part.symbol)
    }

    /// The nonterminal directly after the dot, if any.
    pub fn nonterminal_after_dot(self, g: &Grammar) -> Option<NonterminalID> {
        match self.symbol_after_dot(g) {
            Some(SymbolID::N(n)) => Some(n),
            _ => None,
        }
    }

    /// The terminals that can appear next once the symbol in front of the
    /// dot has been matched: scan the tail, adding FIRST sets of
    /// nonterminals (continuing over nullable ones) and stopping at the
    /// first terminal. Inherited lookaheads are *not* included; the caller
    /// unions them in when the tail is nullable.
    ///
    /// Must not run before nullability and FIRST sets are computed.
    pub fn lookahead(self, g: &Grammar) -> TerminalSet {
        let mut result = TerminalSet::new();
        for part in &g.production(self.production).rhs[self.dot as usize..] {
            match part.symbol {
                SymbolID::T(t) => {
                    result.insert(t);
                    break;
                }
                SymbolID::N(n) => {
                    let nt = g.nonterminal(n);
                    result.union_with(nt.firsts());
                    if !nt.nullable {
                        break;
                    }
                }
            }
        }
        result
    }

    /// Whether everything from the dot to the end of the right-hand side
    /// can derive the empty string. When true for a shifted item, the
    /// parent item's lookaheads flow into the closure items it spawns.
    pub fn tail_nullable(self, g: &Grammar) -> bool {
        g.production(self.production).rhs[self.dot as usize..]
            .iter()
            .all(|part| match part.symbol {
                SymbolID::T(_) => false,
                SymbolID::N(n) => g.nonterminal(n).nullable,
            })
    }

    pub fn display<'g>(&self, g: &'g Grammar) -> ItemDisplay<'g> {
        ItemDisplay { grammar: g, item: *self }
    }
}

pub struct ItemDisplay<'g> {
    grammar: &'g Grammar,
    item: LrItem,
}

impl fmt::Display for ItemDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.grammar;
        let production = g.production(self.item.production);
        write!(f, "{} ::=", g.nonterminal(production.lhs).name)?;
        for (i, part) in production.rhs.iter().enumerate() {
            if i == self.item.dot as usize {
                f.write_str(" (*)")?;
            }
            write!(f, " {}", g.symbol_name(part.symbol))?;
        }
        if self.item.dot as usize == production.rhs.len() {
            f.write_str(" (*)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar::Grammar, report::Reporter, symbol::TerminalID};

    // E ::= A b ;  A ::= ε | a ;
    fn fixture() -> (Grammar, ProductionID) {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let a = g.add_terminal("a", None);
        let b = g.add_terminal("b", None);
        let e = g.add_nonterminal("E", None);
        let nt_a = g.add_nonterminal("A", None);
        g.set_start_symbol(e);
        let p = g.build_production(
            e,
            vec![
                crate::grammar::ProductionPart::symbol(SymbolID::N(nt_a)),
                crate::grammar::ProductionPart::symbol(SymbolID::T(b)),
            ],
            None,
            &mut reporter,
        );
        g.build_production(nt_a, vec![], None, &mut reporter);
        g.build_production(
            nt_a,
            vec![crate::grammar::ProductionPart::symbol(SymbolID::T(a))],
            None,
            &mut reporter,
        );
        g.compute_nullability();
        g.compute_firsts();
        (g, p)
    }

    #[test]
    fn lookahead_scans_over_nullable_tail() {
        let (g, p) = fixture();
        // [E ::= (*) A b] -- first(A b) = {a, b} since A is nullable
        let item = LrItem::new(p, 0);
        let la = item.lookahead(&g);
        let names: Vec<_> = la.iter().map(|t| g.terminal(t).name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!item.tail_nullable(&g));
    }

    #[test]
    fn dot_positions() {
        let (g, p) = fixture();
        let item = LrItem::new(p, 0);
        assert!(!item.is_dot_at_end(&g));
        let end = item.shifted(&g).shifted(&g);
        assert!(end.is_dot_at_end(&g));
        assert_eq!(end.symbol_after_dot(&g), None);
        assert_eq!(
            item.shifted(&g).symbol_after_dot(&g),
            Some(SymbolID::T(TerminalID::from_raw(3)))
        );
    }
}
