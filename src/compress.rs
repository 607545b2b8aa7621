//! Packing of the sparse parse tables into flat streams.
//!
//! Both tables use the comb (double-array) technique: each row keeps only
//! the cells that differ from its default, and those cells are placed at
//! `base[row] + column` inside one shared sequence, with bases chosen so
//! that no two rows claim the same slot. Denser rows are placed first;
//! that improves packing but any order would be correct.

use crate::{
    machine::StateID,
    symbol::{NonterminalID, TerminalID},
    table::{ActionTable, GotoTable},
};
use bit_set::BitSet;

struct CombRow {
    index: usize,
    columns: Vec<usize>,
    base: usize,
}

impl CombRow {
    /// Find the smallest base at which every column lands on an unclaimed
    /// slot, then claim those slots.
    fn fit(&mut self, used: &mut BitSet) {
        let mut base = 0;
        'search: loop {
            for &col in &self.columns {
                if used.contains(base + col) {
                    base += 1;
                    continue 'search;
                }
            }
            for &col in &self.columns {
                used.insert(base + col);
            }
            self.base = base;
            return;
        }
    }
}

fn sort_dense_first(mut rows: Vec<CombRow>) -> Vec<CombRow> {
    rows.sort_by(|a, b| {
        b.columns
            .len()
            .cmp(&a.columns.len())
            .then(a.index.cmp(&b.index))
    });
    rows
}

/// The compressed action table.
///
/// `data` holds, per state, its default action in the first `state_count`
/// slots, followed by `(claiming_state, action)` pairs. A lookup probes
/// `base[state] + 2 * terminal`: if the slot names `state`, the next slot
/// is the action; otherwise the state's default applies. Unclaimed pairs
/// carry the never-matching state count as their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedActionTable {
    pub base: Vec<u32>,
    pub data: Vec<u16>,
}

impl CompressedActionTable {
    pub fn action(&self, state: StateID, terminal: TerminalID) -> i32 {
        let probe = self.base[state.index()] as usize + 2 * terminal.index();
        if probe + 1 < self.data.len() && self.data[probe] == state.into_raw() {
            self.data[probe + 1] as i32
        } else {
            self.default_action(state)
        }
    }

    pub fn default_action(&self, state: StateID) -> i32 {
        self.data[state.index()] as i32
    }
}

/// The compressed reduce-goto table: a single stream with per-state bases
/// inline, so `data[data[state] + nonterminal]` is the destination state.
/// Unclaimed slots carry the sentinel `1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedGotoTable {
    pub data: Vec<u16>,
}

impl CompressedGotoTable {
    pub fn goto(&self, state: StateID, nt: NonterminalID) -> Option<u16> {
        let base = *self.data.get(state.index())? as usize;
        self.data.get(base + nt.index()).copied()
    }
}

#[tracing::instrument(skip_all)]
pub fn compress_actions(table: &ActionTable) -> CompressedActionTable {
    let state_count = table.state_count();
    let columns = table.terminal_count() + 1;

    let mut rows = Vec::new();
    for (index, row) in table.rows().iter().enumerate() {
        let default = row[columns - 1];
        let non_default: Vec<usize> = (0..columns - 1).filter(|&c| row[c] != default).collect();
        if !non_default.is_empty() {
            rows.push(CombRow {
                index,
                columns: non_default,
                base: 0,
            });
        }
    }
    let mut rows = sort_dense_first(rows);

    let mut used = BitSet::new();
    let mut comb_size = 0;
    for row in &mut rows {
        row.fit(&mut used);
        comb_size = comb_size.max(row.base + columns);
    }

    let mut base = vec![state_count as u32; state_count];
    let mut data = vec![0u16; state_count + 2 * comb_size];
    for (state, row) in table.rows().iter().enumerate() {
        data[state] = row[columns - 1] as u16;
    }
    for slot in 0..comb_size {
        data[state_count + 2 * slot] = state_count as u16;
        data[state_count + 2 * slot + 1] = 1;
    }
    for row in &rows {
        let start = state_count + 2 * row.base;
        base[row.index] = start as u32;
        for &col in &row.columns {
            data[start + 2 * col] = row.index as u16;
            data[start + 2 * col + 1] = table.rows()[row.index][col] as u16;
        }
    }

    tracing::trace!(
        combined = data.len(),
        dense = state_count * columns,
        "action table compressed"
    );

    CompressedActionTable { base, data }
}

#[tracing::instrument(skip_all)]
pub fn compress_gotos(table: &GotoTable) -> CompressedGotoTable {
    let mut used = BitSet::new();
    let mut rows = Vec::new();
    for (index, row) in table.rows().iter().enumerate() {
        let columns: Vec<usize> = (0..row.len()).filter(|&c| row[c].is_some()).collect();
        if columns.is_empty() {
            continue;
        }
        // the slot holding this state's base must never be claimed as a
        // comb entry
        used.insert(index);
        rows.push(CombRow {
            index,
            columns,
            base: 0,
        });
    }
    let mut rows = sort_dense_first(rows);
    for row in &mut rows {
        row.fit(&mut used);
    }

    let size = used.iter().max().map_or(0, |max| max + 1);
    let mut data = vec![1u16; size];
    for row in &rows {
        data[row.index] = row.base as u16;
        for &col in &row.columns {
            data[row.base + col] = table.rows()[row.index][col]
                .expect("listed columns are occupied")
                .into_raw();
        }
    }

    CompressedGotoTable { data }
}

/// Encode a sequence of non-negative integers into 16-bit units. Values
/// that do not fit in 15 bits become two units with the high bit set on
/// the first.
pub fn encode_wide(values: &[u32]) -> Vec<u16> {
    let mut out = Vec::with_capacity(values.len());
    for &value in values {
        debug_assert!(value < 0x8000_0000, "value out of encodable range");
        if value >= 0x8000 {
            out.push(0x8000 | (value >> 16) as u16);
        }
        out.push(value as u16);
    }
    out
}

/// Inverse of [`encode_wide`].
pub fn decode_wide(units: &[u16]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut iter = units.iter();
    while let Some(&unit) = iter.next() {
        if unit & 0x8000 != 0 {
            let low = *iter.next().expect("truncated wide value");
            out.push((((unit & 0x7fff) as u32) << 16) | low as u32);
        } else {
            out.push(unit as u32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::{Grammar, ProductionPart},
        machine,
        report::Reporter,
        symbol::{Assoc, SymbolID},
        table,
    };

    #[test]
    fn wide_encoding_round_trip() {
        let values = [0u32, 1, 0x7fff, 0x8000, 123_456, 0x7fff_ffff];
        let encoded = encode_wide(&values);
        assert_eq!(decode_wide(&encoded), values);
        // small values stay single units
        assert_eq!(encode_wide(&[5]).len(), 1);
        assert_eq!(encode_wide(&[0x8000]).len(), 2);
    }

    // the expression grammar gives tables with plenty of non-default
    // cells, defaults and gotos
    fn expression_tables() -> (Grammar, machine::Automaton, table::Tables) {
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let plus = g.add_terminal("PLUS", None);
        let times = g.add_terminal("TIMES", None);
        let num = g.add_terminal("NUM", None);
        let e = g.add_nonterminal("E", None);
        g.set_precedence_group(&[plus], Assoc::Left);
        g.set_precedence_group(&[times], Assoc::Left);
        g.set_start_symbol(e);
        for (op, code) in [(plus, "add"), (times, "mul")] {
            g.build_production(
                e,
                vec![
                    ProductionPart::symbol(SymbolID::N(e)),
                    ProductionPart::symbol(SymbolID::T(op)),
                    ProductionPart::symbol(SymbolID::N(e)),
                    ProductionPart::action(code),
                ],
                None,
                &mut reporter,
            );
        }
        g.build_production(
            e,
            vec![ProductionPart::symbol(SymbolID::T(num)), ProductionPart::action("num")],
            None,
            &mut reporter,
        );
        g.compute_nullability();
        g.compute_firsts();
        let automaton = machine::build(&g);
        let tables = table::build(&g, &automaton, true, &mut reporter);
        assert_eq!(tables.conflicts, 0);
        (g, automaton, tables)
    }

    #[test]
    fn action_compression_round_trip() {
        let (g, automaton, tables) = expression_tables();
        let compressed = compress_actions(&tables.actions);
        for (id, _) in automaton.states() {
            assert_eq!(
                compressed.default_action(id),
                tables.actions.default_action(id),
            );
            for t in 0..g.terminal_count() {
                let t = crate::symbol::TerminalID::from_raw(t as u16);
                assert_eq!(
                    compressed.action(id, t),
                    tables.actions.action(id, t),
                    "state {:?}, terminal {}",
                    id,
                    g.terminal(t).name,
                );
            }
        }
    }

    #[test]
    fn goto_compression_round_trip() {
        let (g, automaton, tables) = expression_tables();
        let compressed = compress_gotos(&tables.gotos);
        for (id, _) in automaton.states() {
            for n in 0..g.nonterminal_count() {
                let n = crate::symbol::NonterminalID::from_raw(n as u16);
                if let Some(to) = tables.gotos.goto(id, n) {
                    assert_eq!(compressed.goto(id, n), Some(to.into_raw()));
                }
            }
        }
    }
}
