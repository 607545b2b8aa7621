//! The grammar model and its builder API.
//!
//! A `Grammar` collects the terminal and nonterminal registries and the
//! production list, and is populated by the grammar-spec front end through
//! the builder methods below. Embedded actions are factored out into
//! separate empty productions behind fresh nonterminals, EBNF operators
//! expand into backing productions, and the nullability/FIRST fixpoints
//! run here before the LALR machine is constructed.

use crate::{
    item::LrItem,
    report::Reporter,
    symbol::{
        Assoc, EbnfSymbols, Nonterminal, NonterminalID, Precedence, SymbolID, Terminal, TerminalID,
    },
};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ProductionID {
    raw: u16,
}

impl ProductionID {
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn into_raw(self) -> u16 {
        self.raw
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.raw as usize
    }
}

/// A right-hand-side slot: a symbol with an optional label for the
/// semantic action to refer to.
#[derive(Debug, Clone)]
pub struct SymbolPart {
    pub symbol: SymbolID,
    pub label: Option<String>,
}

impl SymbolPart {
    pub fn new(symbol: SymbolID) -> Self {
        Self {
            symbol,
            label: None,
        }
    }

    pub fn labeled(symbol: SymbolID, label: &str) -> Self {
        Self {
            symbol,
            label: Some(label.to_owned()),
        }
    }
}

/// An opaque semantic-action payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPart {
    pub code: String,
}

impl ActionPart {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_owned(),
        }
    }

    fn append(&mut self, more: &str) {
        self.code.push_str(more);
    }
}

/// One element of the part list handed to [`Grammar::build_production`].
#[derive(Debug, Clone)]
pub enum ProductionPart {
    Symbol(SymbolPart),
    Action(ActionPart),
}

impl ProductionPart {
    pub fn symbol(symbol: SymbolID) -> Self {
        Self::Symbol(SymbolPart::new(symbol))
    }

    pub fn labeled_symbol(symbol: SymbolID, label: &str) -> Self {
        Self::Symbol(SymbolPart::labeled(symbol, label))
    }

    pub fn action(code: &str) -> Self {
        Self::Action(ActionPart::new(code))
    }
}

/// Bookkeeping for a production that was split off a mid-rule action:
/// which production it came from and where inside that production's RHS
/// its synthesized nonterminal sits.
#[derive(Debug, Copy, Clone)]
pub struct EmbeddedAction {
    pub base: ProductionID,
    pub position: usize,
}

#[derive(Debug)]
pub struct Production {
    pub index: ProductionID,
    /// Dense id shared by structurally identical productions with the same
    /// action body; `None` for proxy productions, which are optimized away
    /// and never reduced.
    pub action_index: Option<u16>,
    pub lhs: NonterminalID,
    pub rhs: Vec<SymbolPart>,
    pub action: Option<ActionPart>,
    pub precedence: Option<Precedence>,
    /// Position of the previous mid-rule action within the RHS, for the
    /// emitter to recover the intermediate result's stack slot.
    pub prev_action_pos: Option<usize>,
    pub embedded: Option<EmbeddedAction>,
    pub(crate) nullable: Option<bool>,
}

impl Production {
    /// A single-symbol production without an action. Proxies are no-op
    /// reductions and are short-circuited during successor construction.
    pub fn is_proxy(&self) -> bool {
        self.rhs.len() == 1 && self.action.is_none()
    }

    pub fn display<'g>(&'g self, grammar: &'g Grammar) -> ProductionDisplay<'g> {
        ProductionDisplay {
            grammar,
            production: self,
        }
    }
}

pub struct ProductionDisplay<'g> {
    grammar: &'g Grammar,
    production: &'g Production,
}

impl fmt::Display for ProductionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            grammar,
            production,
        } = self;
        write!(f, "{} ::=", grammar.nonterminal(production.lhs).name)?;
        for part in &production.rhs {
            write!(f, " {}", grammar.symbol_name(part.symbol))?;
        }
        Ok(())
    }
}

/// Emitter-facing record for one production.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProductionRecord {
    pub lhs: u16,
    pub rhs_len: u16,
    pub action_index: Option<u16>,
}

/// The context-free grammar for which the parse tables are built.
#[derive(Debug)]
pub struct Grammar {
    terminals: Vec<Terminal>,
    nonterminals: Vec<Nonterminal>,
    productions: Vec<Production>,
    /// Maps each action index to the first production carrying it.
    actions: Vec<ProductionID>,
    start_production: Option<ProductionID>,
    next_prec_level: u16,
    next_anon: u32,
    wildcards_expanded: bool,
    nullability_done: bool,
    firsts_done: bool,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    pub fn new() -> Self {
        let mut grammar = Self {
            terminals: Vec::new(),
            nonterminals: Vec::new(),
            productions: Vec::new(),
            actions: Vec::new(),
            start_production: None,
            next_prec_level: 0,
            next_anon: 0,
            wildcards_expanded: false,
            nullability_done: false,
            firsts_done: false,
        };
        grammar.add_terminal("error", None);
        grammar.add_terminal("EOF", None);
        debug_assert_eq!(grammar.terminals[0].index, TerminalID::ERROR);
        debug_assert_eq!(grammar.terminals[1].index, TerminalID::EOF);
        grammar
    }

    // ---- registry ------------------------------------------------------

    pub fn add_terminal(&mut self, name: &str, stack_type: Option<&str>) -> TerminalID {
        let id = TerminalID::from_raw(self.terminals.len() as u16);
        self.terminals.push(Terminal::new(name, stack_type, id));
        id
    }

    pub fn add_nonterminal(&mut self, name: &str, stack_type: Option<&str>) -> NonterminalID {
        let id = NonterminalID::from_raw(self.nonterminals.len() as u16);
        self.nonterminals
            .push(Nonterminal::new(name, stack_type, id));
        id
    }

    pub fn terminal(&self, id: TerminalID) -> &Terminal {
        &self.terminals[id.index()]
    }

    pub fn nonterminal(&self, id: NonterminalID) -> &Nonterminal {
        &self.nonterminals[id.index()]
    }

    pub fn production(&self, id: ProductionID) -> &Production {
        &self.productions[id.index()]
    }

    /// The first production registered for the given action index.
    pub fn action_production(&self, action_index: u16) -> &Production {
        self.production(self.actions[action_index as usize])
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Terminal> + '_ {
        self.terminals.iter()
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &Nonterminal> + '_ {
        self.nonterminals.iter()
    }

    pub fn productions(&self) -> impl Iterator<Item = &Production> + '_ {
        self.productions.iter()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn nonterminal_count(&self) -> usize {
        self.nonterminals.len()
    }

    pub fn production_count(&self) -> usize {
        self.productions.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn start_production(&self) -> Option<ProductionID> {
        self.start_production
    }

    pub fn symbol_name(&self, symbol: SymbolID) -> &str {
        match symbol {
            SymbolID::T(t) => &self.terminals[t.index()].name,
            SymbolID::N(n) => &self.nonterminals[n.index()].name,
        }
    }

    pub fn symbol_type(&self, symbol: SymbolID) -> Option<&str> {
        match symbol {
            SymbolID::T(t) => self.terminals[t.index()].stack_type.as_deref(),
            SymbolID::N(n) => self.nonterminals[n.index()].stack_type.as_deref(),
        }
    }

    fn increment_use(&mut self, symbol: SymbolID) {
        match symbol {
            SymbolID::T(t) => self.terminals[t.index()].use_count += 1,
            SymbolID::N(n) => self.nonterminals[n.index()].use_count += 1,
        }
    }

    // ---- precedence ----------------------------------------------------

    /// Assign the next precedence level to a group of terminals. Levels
    /// grow in declaration order, so the left-most declaration binds the
    /// weakest.
    pub fn set_precedence_group(&mut self, terminals: &[TerminalID], assoc: Assoc) {
        let level = self.next_prec_level;
        self.next_prec_level += 1;
        for &t in terminals {
            self.terminals[t.index()].precedence = Some(Precedence::new(level, assoc));
        }
    }

    // ---- EBNF operators ------------------------------------------------

    fn ebnf(&self, symbol: SymbolID) -> EbnfSymbols {
        match symbol {
            SymbolID::T(t) => self.terminals[t.index()].ebnf,
            SymbolID::N(n) => self.nonterminals[n.index()].ebnf,
        }
    }

    fn ebnf_mut(&mut self, symbol: SymbolID) -> &mut EbnfSymbols {
        match symbol {
            SymbolID::T(t) => &mut self.terminals[t.index()].ebnf,
            SymbolID::N(n) => &mut self.nonterminals[n.index()].ebnf,
        }
    }

    /// The nonterminal backing `symbol+`. Created on first request.
    pub fn plus_symbol(&mut self, symbol: SymbolID) -> NonterminalID {
        if let Some(plus) = self.ebnf(symbol).plus {
            return plus;
        }
        let name = format!("{}$1_many", self.symbol_name(symbol));
        let ty = self.symbol_type(symbol).map(|t| format!("{}[]", t));
        let plus = self.add_nonterminal(&name, ty.as_deref());
        self.ebnf_mut(symbol).plus = Some(plus);
        plus
    }

    /// The nonterminal backing `symbol*`. `*` is defined via `+`, so the
    /// plus symbol is created alongside it.
    pub fn star_symbol(&mut self, symbol: SymbolID) -> NonterminalID {
        if let Some(star) = self.ebnf(symbol).star {
            return star;
        }
        self.plus_symbol(symbol);
        let name = format!("{}$0_many", self.symbol_name(symbol));
        let ty = self.symbol_type(symbol).map(|t| format!("{}[]", t));
        let star = self.add_nonterminal(&name, ty.as_deref());
        self.ebnf_mut(symbol).star = Some(star);
        star
    }

    /// The nonterminal backing `symbol?`. Created on first request.
    pub fn opt_symbol(&mut self, symbol: SymbolID) -> NonterminalID {
        if let Some(opt) = self.ebnf(symbol).opt {
            return opt;
        }
        let name = format!("{}$0_1", self.symbol_name(symbol));
        let ty = self.symbol_type(symbol).map(str::to_owned);
        let opt = self.add_nonterminal(&name, ty.as_deref());
        self.ebnf_mut(symbol).opt = Some(opt);
        opt
    }

    /// Emit the productions backing every requested EBNF symbol:
    ///
    /// ```text
    /// x$0_1    ::= ε | x
    /// x$0_many ::= ε | x$1_many
    /// x$1_many ::= x | x$1_many x
    /// ```
    ///
    /// Typed base symbols get the synthetic action tags `STAR0`/`STAR1`/
    /// `STAR2` (and `OPT0` for the optional ε case) so the emitter can
    /// collect the matched elements into a list.
    pub fn expand_wildcard_rules(&mut self, reporter: &mut Reporter) {
        if self.wildcards_expanded {
            return;
        }
        self.wildcards_expanded = true;

        let symbols: Vec<SymbolID> = (0..self.terminals.len())
            .map(|i| SymbolID::T(TerminalID::from_raw(i as u16)))
            .chain(
                (0..self.nonterminals.len()).map(|i| SymbolID::N(NonterminalID::from_raw(i as u16))),
            )
            .collect();
        for symbol in symbols {
            self.expand_wildcard_rules_for(symbol, reporter);
        }
    }

    fn expand_wildcard_rules_for(&mut self, symbol: SymbolID, reporter: &mut Reporter) {
        let ebnf = self.ebnf(symbol);
        let typed = self.symbol_type(symbol).is_some();

        if let Some(opt) = ebnf.opt {
            let mut parts = Vec::new();
            if typed {
                parts.push(ProductionPart::action("OPT0"));
            }
            self.build_production(opt, parts, None, reporter);
            self.build_production(opt, vec![ProductionPart::symbol(symbol)], None, reporter);
        }

        if let Some(star) = ebnf.star {
            let plus = ebnf.plus.expect("star symbols are defined via plus");
            let mut parts = Vec::new();
            if typed {
                parts.push(ProductionPart::action("STAR0"));
            }
            self.build_production(star, parts, None, reporter);
            self.build_production(
                star,
                vec![ProductionPart::symbol(SymbolID::N(plus))],
                None,
                reporter,
            );
        }

        if let Some(plus) = ebnf.plus {
            let mut parts = vec![ProductionPart::symbol(symbol)];
            if typed {
                parts.push(ProductionPart::action("STAR1"));
            }
            self.build_production(plus, parts, None, reporter);

            let mut parts = vec![
                ProductionPart::symbol(SymbolID::N(plus)),
                ProductionPart::symbol(symbol),
            ];
            if typed {
                parts.push(ProductionPart::action("STAR2"));
            }
            self.build_production(plus, parts, None, reporter);
        }
    }

    // ---- productions ---------------------------------------------------

    /// Declare the start symbol and synthesize the start production
    /// `$START ::= nt EOF`, which always takes production index 0 and
    /// action index 0.
    pub fn set_start_symbol(&mut self, nt: NonterminalID) {
        assert!(
            self.start_production.is_none(),
            "the start symbol is already set"
        );
        assert!(
            self.productions.is_empty(),
            "the start production must be registered first"
        );

        let ty = self.nonterminals[nt.index()].stack_type.clone();
        let start = self.add_nonterminal("$START", ty.as_deref());
        let rhs = vec![
            SymbolPart::new(SymbolID::N(nt)),
            SymbolPart::new(SymbolID::T(TerminalID::EOF)),
        ];
        for part in &rhs {
            self.increment_use(part.symbol);
        }

        let index = ProductionID::from_raw(0);
        self.productions.push(Production {
            index,
            action_index: Some(0),
            lhs: start,
            rhs,
            action: Some(ActionPart::new("ACCEPT")),
            precedence: None,
            prev_action_pos: None,
            embedded: None,
            nullable: None,
        });
        self.actions.push(index);
        self.nonterminals[start.index()].productions.push(index);
        self.start_production = Some(index);
    }

    /// Create a production from an ordered part list.
    ///
    /// Adjacent embedded actions merge, a trailing action becomes the
    /// production's own action, and every remaining mid-rule action is
    /// factored out behind a fresh nonterminal with an empty production of
    /// its own, so that all actions run as part of a reduce:
    ///
    /// ```text
    /// A ::= B {act} C      becomes      A ::= B NT$0 C
    ///                                   NT$0 ::= {act}
    /// ```
    ///
    /// If no start symbol was declared yet, the LHS of this production
    /// becomes the start symbol.
    pub fn build_production(
        &mut self,
        lhs: NonterminalID,
        parts: Vec<ProductionPart>,
        prec: Option<TerminalID>,
        reporter: &mut Reporter,
    ) -> ProductionID {
        if self.start_production.is_none() {
            self.set_start_symbol(lhs);
        }

        // merge adjacent embedded actions
        let mut merged: Vec<ProductionPart> = Vec::with_capacity(parts.len());
        for part in parts {
            match (merged.last_mut(), part) {
                (Some(ProductionPart::Action(prev)), ProductionPart::Action(next)) => {
                    prev.append(&next.code)
                }
                (_, part) => merged.push(part),
            }
        }

        // strip a trailing action off as the production's own action
        let action = match merged.last() {
            Some(ProductionPart::Action(_)) => match merged.pop() {
                Some(ProductionPart::Action(action)) => Some(action),
                _ => unreachable!(),
            },
            _ => None,
        };

        // factor the remaining mid-rule actions through fresh nonterminals
        let lhs_type = self.nonterminals[lhs.index()].stack_type.clone();
        let mut rhs: Vec<SymbolPart> = Vec::with_capacity(merged.len());
        let mut embedded_actions: Vec<(usize, ActionPart)> = Vec::new();
        let mut last_action_pos = None;
        for (pos, part) in merged.into_iter().enumerate() {
            match part {
                ProductionPart::Symbol(part) => rhs.push(part),
                ProductionPart::Action(code) => {
                    let name = format!("NT${}", self.next_anon);
                    self.next_anon += 1;
                    let anon = self.add_nonterminal(&name, lhs_type.as_deref());
                    rhs.push(SymbolPart::new(SymbolID::N(anon)));
                    embedded_actions.push((pos, code));
                    last_action_pos = Some(pos);
                }
            }
        }

        // an explicit %prec terminal wins; otherwise the rightmost RHS
        // terminal carrying precedence decides
        let precedence = match prec {
            Some(t) => self.terminals[t.index()].precedence,
            None => {
                let mut found: Option<Precedence> = None;
                for part in &rhs {
                    if let SymbolID::T(t) = part.symbol {
                        if let Some(p) = self.terminals[t.index()].precedence {
                            if let Some(prev) = found {
                                if prev.level != p.level {
                                    reporter.error(format!(
                                        "production {} has more than one precedence symbol",
                                        self.production_summary(lhs, &rhs),
                                    ));
                                }
                            }
                            found = Some(p);
                        }
                    }
                }
                found
            }
        };

        // reuse the action index of a production with the same signature
        // and the same action body; proxies take no action slot at all
        let index = ProductionID::from_raw(self.productions.len() as u16);
        let action_index = if rhs.len() == 1 && action.is_none() {
            None
        } else {
            let shared = self.nonterminals[lhs.index()]
                .productions
                .iter()
                .find_map(|&pid| {
                    let cand = &self.productions[pid.index()];
                    let codes_equal = match (&cand.action, &action) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.code == b.code,
                        _ => false,
                    };
                    (codes_equal
                        && cand.rhs.len() == rhs.len()
                        && cand
                            .rhs
                            .iter()
                            .zip(&rhs)
                            .all(|(a, b)| self.parts_match(a, b)))
                    .then_some(cand.action_index)
                    .flatten()
                });
            Some(shared.unwrap_or(self.actions.len() as u16))
        };

        for part in &rhs {
            self.increment_use(part.symbol);
        }

        self.productions.push(Production {
            index,
            action_index,
            lhs,
            rhs,
            action,
            precedence,
            prev_action_pos: last_action_pos,
            embedded: None,
            nullable: None,
        });
        if action_index == Some(self.actions.len() as u16) {
            self.actions.push(index);
        }
        self.nonterminals[lhs.index()].productions.push(index);

        // one empty production per factored-out action; each remembers the
        // position of the action before it
        let mut prev_pos = None;
        for (pos, code) in embedded_actions {
            let anon = match self.productions[index.index()].rhs[pos].symbol {
                SymbolID::N(n) => n,
                SymbolID::T(_) => unreachable!(),
            };
            let action_id = ProductionID::from_raw(self.productions.len() as u16);
            let action_index = self.actions.len() as u16;
            self.productions.push(Production {
                index: action_id,
                action_index: Some(action_index),
                lhs: anon,
                rhs: Vec::new(),
                action: Some(code),
                precedence: None,
                prev_action_pos: prev_pos,
                embedded: Some(EmbeddedAction {
                    base: index,
                    position: pos,
                }),
                nullable: None,
            });
            self.actions.push(action_id);
            self.nonterminals[anon.index()].productions.push(action_id);
            prev_pos = Some(pos);
        }

        index
    }

    /// Positional signature match for action-body deduplication: labels
    /// must agree, and labeled slots must also agree on the symbol's stack
    /// type, since that is all the action body can observe.
    fn parts_match(&self, a: &SymbolPart, b: &SymbolPart) -> bool {
        match (&a.label, &b.label) {
            (None, None) => true,
            (Some(la), Some(lb)) => {
                la == lb && self.symbol_type(a.symbol) == self.symbol_type(b.symbol)
            }
            _ => false,
        }
    }

    fn production_summary(&self, lhs: NonterminalID, rhs: &[SymbolPart]) -> String {
        let mut out = format!("{} ::=", self.nonterminals[lhs.index()].name);
        for part in rhs {
            out.push(' ');
            out.push_str(self.symbol_name(part.symbol));
        }
        out
    }

    pub fn production_records(&self) -> Vec<ProductionRecord> {
        self.productions
            .iter()
            .map(|p| ProductionRecord {
                lhs: p.lhs.into_raw(),
                rhs_len: p.rhs.len() as u16,
                action_index: p.action_index,
            })
            .collect()
    }

    // ---- analysis ------------------------------------------------------

    /// Compute the nullability flag of every nonterminal: a production is
    /// nullable iff every RHS symbol is a nullable nonterminal, and a
    /// nonterminal is nullable iff one of its productions is. Iterates to
    /// the fixpoint; repeated calls are no-ops.
    pub fn compute_nullability(&mut self) {
        if self.nullability_done {
            return;
        }
        loop {
            let mut changed = false;
            for nt in 0..self.nonterminals.len() {
                changed |= self.check_nullable(NonterminalID::from_raw(nt as u16));
            }
            if !changed {
                break;
            }
        }
        self.nullability_done = true;
    }

    fn check_nullable(&mut self, id: NonterminalID) -> bool {
        if self.nonterminals[id.index()].nullable {
            return false;
        }
        let pids = self.nonterminals[id.index()].productions.clone();
        for pid in pids {
            if self.check_production_nullable(pid) {
                self.nonterminals[id.index()].nullable = true;
                return true;
            }
        }
        false
    }

    /// Memoized per-production nullability. A "not yet" answer (some RHS
    /// nonterminal is not known nullable) is deliberately left uncached;
    /// the fixpoint may flip it later.
    fn check_production_nullable(&mut self, pid: ProductionID) -> bool {
        if let Some(known) = self.productions[pid.index()].nullable {
            return known;
        }
        let len = self.productions[pid.index()].rhs.len();
        for pos in 0..len {
            match self.productions[pid.index()].rhs[pos].symbol {
                SymbolID::T(_) => {
                    self.productions[pid.index()].nullable = Some(false);
                    return false;
                }
                SymbolID::N(n) => {
                    if !self.nonterminals[n.index()].nullable {
                        return false;
                    }
                }
            }
        }
        self.productions[pid.index()].nullable = Some(true);
        true
    }

    /// Compute the FIRST set of every nonterminal. Requires nullability;
    /// repeated calls are no-ops.
    pub fn compute_firsts(&mut self) {
        assert!(
            self.nullability_done,
            "nullability must be computed before FIRST sets"
        );
        if self.firsts_done {
            return;
        }
        loop {
            let mut changed = false;
            for nt in 0..self.nonterminals.len() {
                let pids = self.nonterminals[nt].productions.clone();
                for pid in pids {
                    let first = LrItem::new(pid, 0).lookahead(self);
                    changed |= self.nonterminals[nt].firsts.union_with(&first);
                }
            }
            if !changed {
                break;
            }
        }
        self.firsts_done = true;
    }

    pub(crate) fn firsts_computed(&self) -> bool {
        self.firsts_done
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminals:")?;
        for t in &self.terminals {
            write!(f, " {}", t.name)?;
        }
        write!(f, "\nnonterminals:")?;
        for nt in &self.nonterminals {
            write!(f, " {}", nt.name)?;
        }
        writeln!(f)?;
        writeln!(f, "productions:")?;
        for p in &self.productions {
            writeln!(f, "  [{:02}] {}", p.index.into_raw(), p.display(self))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_actions_are_factored_out() {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let b = g.add_terminal("b", None);
        let c = g.add_terminal("c", None);
        let a = g.add_nonterminal("A", Some("Node"));
        g.set_start_symbol(a);

        let p = g.build_production(
            a,
            vec![
                ProductionPart::symbol(SymbolID::T(b)),
                ProductionPart::action("one;"),
                ProductionPart::action("two;"),
                ProductionPart::symbol(SymbolID::T(c)),
                ProductionPart::action("tail;"),
            ],
            None,
            &mut reporter,
        );

        let main = g.production(p);
        assert_eq!(main.rhs.len(), 3);
        assert_eq!(main.action.as_ref().unwrap().code, "tail;");
        assert_eq!(main.prev_action_pos, Some(1));

        // the merged mid-rule action lives in its own empty production
        let anon = match main.rhs[1].symbol {
            SymbolID::N(n) => n,
            _ => panic!("expected the factored nonterminal"),
        };
        let anon_nt = g.nonterminal(anon);
        assert_eq!(anon_nt.name, "NT$0");
        assert_eq!(anon_nt.stack_type.as_deref(), Some("Node"));
        assert_eq!(anon_nt.use_count, 1);
        assert_eq!(anon_nt.productions.len(), 1);

        let action_prod = g.production(anon_nt.productions[0]);
        assert!(action_prod.rhs.is_empty());
        assert_eq!(action_prod.action.as_ref().unwrap().code, "one;two;");
        let embedded = action_prod.embedded.unwrap();
        assert_eq!(embedded.base, p);
        assert_eq!(embedded.position, 1);
    }

    #[test]
    fn proxies_take_no_action_index() {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let x = g.add_terminal("x", None);
        let s = g.add_nonterminal("S", None);
        g.set_start_symbol(s);
        let p = g.build_production(
            s,
            vec![ProductionPart::symbol(SymbolID::T(x))],
            None,
            &mut reporter,
        );
        assert!(g.production(p).is_proxy());
        assert_eq!(g.production(p).action_index, None);
        // only the start production occupies an action slot
        assert_eq!(g.action_count(), 1);
    }

    #[test]
    fn structurally_equal_productions_share_action_index() {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let a = g.add_terminal("a", Some("Tok"));
        let b = g.add_terminal("b", Some("Tok"));
        let s = g.add_nonterminal("S", None);
        g.set_start_symbol(s);
        let p1 = g.build_production(
            s,
            vec![
                ProductionPart::labeled_symbol(SymbolID::T(a), "v"),
                ProductionPart::action("emit(v)"),
            ],
            None,
            &mut reporter,
        );
        let p2 = g.build_production(
            s,
            vec![
                ProductionPart::labeled_symbol(SymbolID::T(b), "v"),
                ProductionPart::action("emit(v)"),
            ],
            None,
            &mut reporter,
        );
        let p3 = g.build_production(
            s,
            vec![
                ProductionPart::labeled_symbol(SymbolID::T(b), "w"),
                ProductionPart::action("emit(v)"),
            ],
            None,
            &mut reporter,
        );
        // the action body only sees labels and types, so p1 and p2 can
        // run the same code
        assert!(g.production(p1).action_index.is_some());
        assert_eq!(
            g.production(p1).action_index,
            g.production(p2).action_index
        );
        assert_ne!(
            g.production(p1).action_index,
            g.production(p3).action_index
        );
    }

    #[test]
    fn precedence_comes_from_the_rightmost_terminal() {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let plus = g.add_terminal("PLUS", None);
        let times = g.add_terminal("TIMES", None);
        let num = g.add_terminal("NUM", None);
        let e = g.add_nonterminal("E", None);
        g.set_precedence_group(&[plus], Assoc::Left);
        g.set_precedence_group(&[times], Assoc::Left);
        g.set_start_symbol(e);

        let p = g.build_production(
            e,
            vec![
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::symbol(SymbolID::T(plus)),
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::action("add"),
            ],
            None,
            &mut reporter,
        );
        assert_eq!(g.production(p).precedence, Some(Precedence::new(0, Assoc::Left)));
        assert_eq!(reporter.error_count(), 0);

        // two different levels inside one production is an error; the
        // rightmost still decides
        let p = g.build_production(
            e,
            vec![
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::symbol(SymbolID::T(plus)),
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::symbol(SymbolID::T(times)),
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::action("mix"),
            ],
            None,
            &mut reporter,
        );
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(g.production(p).precedence, Some(Precedence::new(1, Assoc::Left)));

        // an explicit %prec terminal overrides the scan
        let p = g.build_production(
            e,
            vec![
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::symbol(SymbolID::T(times)),
                ProductionPart::symbol(SymbolID::N(e)),
                ProductionPart::action("mul"),
            ],
            Some(plus),
            &mut reporter,
        );
        assert_eq!(g.production(p).precedence, Some(Precedence::new(0, Assoc::Left)));
        let _ = num;
    }

    #[test]
    fn nullability_and_firsts() {
        // S ::= A B x ; A ::= ε | a ; B ::= A | b
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let ta = g.add_terminal("a", None);
        let tb = g.add_terminal("b", None);
        let tx = g.add_terminal("x", None);
        let s = g.add_nonterminal("S", None);
        let a = g.add_nonterminal("A", None);
        let b = g.add_nonterminal("B", None);
        g.set_start_symbol(s);
        g.build_production(
            s,
            vec![
                ProductionPart::symbol(SymbolID::N(a)),
                ProductionPart::symbol(SymbolID::N(b)),
                ProductionPart::symbol(SymbolID::T(tx)),
            ],
            None,
            &mut reporter,
        );
        g.build_production(a, vec![], None, &mut reporter);
        g.build_production(a, vec![ProductionPart::symbol(SymbolID::T(ta))], None, &mut reporter);
        g.build_production(b, vec![ProductionPart::symbol(SymbolID::N(a))], None, &mut reporter);
        g.build_production(b, vec![ProductionPart::symbol(SymbolID::T(tb))], None, &mut reporter);

        g.compute_nullability();
        assert!(!g.nonterminal(s).nullable);
        assert!(g.nonterminal(a).nullable);
        assert!(g.nonterminal(b).nullable);

        g.compute_firsts();
        let firsts = |nt| {
            g.nonterminal(nt)
                .firsts()
                .iter()
                .map(|t| g.terminal(t).name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(firsts(a), vec!["a"]);
        assert_eq!(firsts(b), vec!["a", "b"]);
        assert_eq!(firsts(s), vec!["a", "b", "x"]);
    }
}
