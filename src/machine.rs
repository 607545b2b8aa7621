//! Construction of the LALR(1) viable-prefix automaton.
//!
//! States are created from kernels (the item set inherited from a
//! predecessor, before closure) and registered under the kernel's item
//! list alone, so two states with the same kernel are the same state no
//! matter what their lookaheads contain. Instead of re-closing states when
//! lookaheads grow, closure and successor construction leave propagation
//! listeners behind ([`crate::lookaheads`]); merging new lookaheads into
//! an existing kernel pushes them through the whole listener graph.

use crate::{
    grammar::Grammar,
    item::LrItem,
    lookaheads::{LookaheadArena, LookaheadID},
    symbol::{SymbolID, TerminalID},
    terminal_set::TerminalSet,
    types::Map,
};
use std::{collections::BTreeMap, fmt};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StateID {
    raw: u16,
}

impl StateID {
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

impl fmt::Debug for StateID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S#{:03}", self.raw)
    }
}

/// One state of the automaton: an ordered item map plus the outgoing
/// transitions, built in symbol order.
#[derive(Debug)]
pub struct State {
    items: BTreeMap<LrItem, LookaheadID>,
    transitions: Vec<(SymbolID, StateID)>,
}

impl State {
    /// The items of this state, in `LrItem` order.
    pub fn items(&self) -> impl Iterator<Item = (LrItem, LookaheadID)> + '_ {
        self.items.iter().map(|(item, la)| (*item, *la))
    }

    pub fn transitions(&self) -> &[(SymbolID, StateID)] {
        &self.transitions
    }

    pub fn transition(&self, symbol: SymbolID) -> Option<StateID> {
        self.transitions
            .iter()
            .find_map(|&(on, to)| (on == symbol).then_some(to))
    }
}

#[derive(Debug)]
pub struct Automaton {
    states: Vec<State>,
    lookaheads: LookaheadArena,
    start: StateID,
}

impl Automaton {
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, id: StateID) -> &State {
        &self.states[id.index()]
    }

    pub fn states(&self) -> impl Iterator<Item = (StateID, &State)> + '_ {
        self.states
            .iter()
            .enumerate()
            .map(|(i, state)| (StateID::from_raw(i as u16), state))
    }

    pub fn start(&self) -> StateID {
        self.start
    }

    pub fn lookahead(&self, id: LookaheadID) -> &TerminalSet {
        self.lookaheads.set(id)
    }

    pub fn display<'g>(&'g self, grammar: &'g Grammar) -> AutomatonDisplay<'g> {
        AutomatonDisplay {
            grammar,
            automaton: self,
        }
    }
}

pub struct AutomatonDisplay<'g> {
    grammar: &'g Grammar,
    automaton: &'g Automaton,
}

impl fmt::Display for AutomatonDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.grammar;
        for (id, state) in self.automaton.states() {
            writeln!(f, "{:?}:", id)?;
            for (item, la) in state.items() {
                write!(f, "  [{}, {{", item.display(g))?;
                for (i, t) in self.automaton.lookahead(la).iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&g.terminal(t).name)?;
                }
                writeln!(f, "}}]")?;
            }
            for &(on, to) in state.transitions() {
                writeln!(f, "  {} => {:?}", g.symbol_name(on), to)?;
            }
        }
        Ok(())
    }
}

/// Build the LALR(1) automaton for the grammar. Nullability and FIRST
/// sets must already be computed, and the start production must exist.
#[tracing::instrument(skip_all)]
pub fn build(grammar: &Grammar) -> Automaton {
    assert!(
        grammar.firsts_computed(),
        "FIRST sets must be computed before the machine is built"
    );
    let start_production = grammar
        .start_production()
        .expect("attempt to build the machine without a start production");

    let mut builder = MachineBuilder {
        grammar,
        states: Vec::new(),
        lookaheads: LookaheadArena::new(),
        kernels: Map::default(),
    };

    // seed: [$START ::= (*) nt EOF, {EOF}]
    let mut kernel = BTreeMap::new();
    let seed: TerminalSet = [TerminalID::EOF].into_iter().collect();
    kernel.insert(LrItem::new(start_production, 0), seed);
    let start = builder.get_or_create_state(kernel);

    // the state vector grows while we sweep over it
    let mut index = 0;
    while index < builder.states.len() {
        let id = StateID::from_raw(index as u16);
        builder.compute_closure(id);
        builder.compute_successors(id);
        index += 1;
    }

    tracing::trace!("built {} LALR states", builder.states.len());

    Automaton {
        states: builder.states,
        lookaheads: builder.lookaheads,
        start,
    }
}

struct MachineBuilder<'g> {
    grammar: &'g Grammar,
    states: Vec<State>,
    lookaheads: LookaheadArena,
    /// State registry keyed by the kernel's item list; lookaheads do not
    /// take part in state identity.
    kernels: Map<Vec<LrItem>, StateID>,
}

impl MachineBuilder<'_> {
    /// Find the state with this kernel, merging the incoming lookaheads
    /// into it (which triggers propagation), or allocate a fresh one.
    fn get_or_create_state(&mut self, kernel: BTreeMap<LrItem, TerminalSet>) -> StateID {
        let key: Vec<LrItem> = kernel.keys().copied().collect();
        if let Some(&existing) = self.kernels.get(&key) {
            for (item, added) in &kernel {
                let la = self.states[existing.index()].items[item];
                self.lookaheads.add(la, added);
            }
            existing
        } else {
            let id = StateID::from_raw(self.states.len() as u16);
            let items = kernel
                .into_iter()
                .map(|(item, set)| (item, self.lookaheads.alloc(set)))
                .collect();
            self.states.push(State {
                items,
                transitions: Vec::new(),
            });
            self.kernels.insert(key, id);
            id
        }
    }

    /// Expand the kernel into the closed item set. For every item
    /// `[L ::= α (*) N γ, l]` each production of `N` contributes an item
    /// `[N ::= (*) β, first(γ)]`; when γ is nullable, `l` flows in as well
    /// and the parent item's lookaheads keep flowing via a listener edge.
    fn compute_closure(&mut self, id: StateID) {
        let g = self.grammar;
        let mut items = std::mem::take(&mut self.states[id.index()].items);
        let mut consider: Vec<LrItem> = items.keys().copied().collect();

        while let Some(item) = consider.pop() {
            let Some(nt) = item.nonterminal_after_dot(g) else {
                continue;
            };
            let shifted = item.shifted(g);
            let mut new_lookaheads = shifted.lookahead(g);
            let propagates = shifted.tail_nullable(g);
            let item_la = items[&item];
            if propagates {
                new_lookaheads.union_with(self.lookaheads.set(item_la));
            }

            for &pid in &g.nonterminal(nt).productions {
                let new_item = LrItem::new(pid, 0);
                let target = match items.get(&new_item) {
                    Some(&existing) => {
                        self.lookaheads.add(existing, &new_lookaheads);
                        existing
                    }
                    None => {
                        let fresh = self.lookaheads.alloc(new_lookaheads.clone());
                        items.insert(new_item, fresh);
                        consider.push(new_item);
                        fresh
                    }
                };
                if propagates {
                    self.lookaheads.add_listener(item_la, target);
                }
            }
        }

        self.states[id.index()].items = items;
    }

    /// Create or merge the successor state for every symbol appearing
    /// after a dot, walking proxy chains on the way: shifting over the RHS
    /// of a proxy production is the same as shifting over its LHS, so the
    /// proxy's no-op reduction never makes it into the tables.
    fn compute_successors(&mut self, id: StateID) {
        let g = self.grammar;
        let items = self.states[id.index()].items.clone();

        let mut outgoing: BTreeMap<SymbolID, Vec<LrItem>> = BTreeMap::new();
        for &item in items.keys() {
            if let Some(symbol) = item.symbol_after_dot(g) {
                outgoing.entry(symbol).or_default().push(item);
            }
        }

        let mut transitions = Vec::new();
        for &on in outgoing.keys() {
            // the dot never moves past EOF; the table builder turns the
            // would-be shift into the accept action instead
            if on == SymbolID::T(TerminalID::EOF) {
                continue;
            }

            let mut chain = vec![on];
            let mut kernel: BTreeMap<LrItem, TerminalSet> = BTreeMap::new();
            let mut i = 0;
            while i < chain.len() {
                for &item in &outgoing[&chain[i]] {
                    let production = g.production(item.production);
                    if production.is_proxy() {
                        let lhs = SymbolID::N(production.lhs);
                        if !chain.contains(&lhs) {
                            chain.push(lhs);
                        }
                    } else {
                        kernel.insert(item.shifted(g), self.lookaheads.set(items[&item]).clone());
                    }
                }
                i += 1;
            }

            let next = self.get_or_create_state(kernel);

            // whatever flows into our items later must reach the successor
            // kernel as well
            for &symbol in &chain {
                for &item in &outgoing[&symbol] {
                    if !g.production(item.production).is_proxy() {
                        let target = self.states[next.index()].items[&item.shifted(g)];
                        self.lookaheads.add_listener(items[&item], target);
                    }
                }
            }

            transitions.push((on, next));
        }

        self.states[id.index()].transitions = transitions;
    }
}
