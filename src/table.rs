//! Parse table construction and conflict resolution.
//!
//! The action table has one row per state and one column per terminal
//! plus a trailing default column; cells are single integer codes. The
//! reduce-goto table has one column per nonterminal and holds destination
//! states. Conflicts are resolved while the rows are filled: shift/reduce
//! through precedence where possible (otherwise the shift wins and the
//! conflict is reported), reduce/reduce in favor of the production that
//! appears first in the grammar.

use crate::{
    grammar::{Grammar, ProductionID},
    machine::{Automaton, State, StateID},
    report::Reporter,
    symbol::{Assoc, NonterminalID, SymbolID, TerminalID},
};
use std::{cmp::Ordering, fmt};

/// The empty/error action.
pub const ERROR: i32 = 0;

/// The action code for a shift to the given state.
pub fn shift_code(to: StateID) -> i32 {
    2 * to.into_raw() as i32 + 1
}

/// The action code for a reduce with the given action index.
pub fn reduce_code(action_index: u16) -> i32 {
    2 * action_index as i32 + 2
}

pub fn is_shift(code: i32) -> bool {
    code & 1 != 0
}

pub fn is_reduce(code: i32) -> bool {
    code != 0 && code & 1 == 0
}

/// The destination state of a shift resp. action index of a reduce.
pub fn code_target(code: i32) -> usize {
    ((code - 1) >> 1) as usize
}

#[derive(Debug)]
pub struct ActionTable {
    rows: Vec<Vec<i32>>,
    terminal_count: usize,
}

impl ActionTable {
    pub fn state_count(&self) -> usize {
        self.rows.len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal_count
    }

    pub fn action(&self, state: StateID, terminal: TerminalID) -> i32 {
        self.rows[state.index()][terminal.index()]
    }

    pub fn default_action(&self, state: StateID) -> i32 {
        self.rows[state.index()][self.terminal_count]
    }

    pub(crate) fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    pub fn display<'g>(&'g self, grammar: &'g Grammar) -> ActionTableDisplay<'g> {
        ActionTableDisplay {
            grammar,
            table: self,
        }
    }
}

pub struct ActionTableDisplay<'g> {
    grammar: &'g Grammar,
    table: &'g ActionTable,
}

impl fmt::Display for ActionTableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |code: i32| -> String {
            if is_shift(code) {
                format!("shift({})", code_target(code))
            } else if is_reduce(code) {
                format!("reduce({})", code_target(code))
            } else {
                "error".to_owned()
            }
        };
        for (row, cells) in self.table.rows.iter().enumerate() {
            let default = cells[self.table.terminal_count];
            writeln!(f, "state {} [default: {}]", row, describe(default))?;
            for t in 0..self.table.terminal_count {
                if cells[t] != default {
                    writeln!(
                        f,
                        "  {} => {}",
                        self.grammar.terminal(TerminalID::from_raw(t as u16)).name,
                        describe(cells[t]),
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct GotoTable {
    rows: Vec<Vec<Option<StateID>>>,
}

impl GotoTable {
    pub fn state_count(&self) -> usize {
        self.rows.len()
    }

    pub fn goto(&self, state: StateID, nt: NonterminalID) -> Option<StateID> {
        self.rows[state.index()][nt.index()]
    }

    pub(crate) fn rows(&self) -> &[Vec<Option<StateID>>] {
        &self.rows
    }
}

#[derive(Debug)]
pub struct Tables {
    pub actions: ActionTable,
    pub gotos: GotoTable,
    /// Reported conflicts: unresolvable shift/reduce plus reduce/reduce.
    pub conflicts: u32,
}

/// Populate both tables from the automaton.
#[tracing::instrument(skip_all)]
pub fn build(
    grammar: &Grammar,
    automaton: &Automaton,
    compact_reduces: bool,
    reporter: &mut Reporter,
) -> Tables {
    let terminal_count = grammar.terminal_count();
    let mut action_rows = vec![vec![ERROR; terminal_count + 1]; automaton.state_count()];
    let mut goto_rows = vec![vec![None; grammar.nonterminal_count()]; automaton.state_count()];
    let mut conflicts = 0;

    for (id, state) in automaton.states() {
        build_row(
            grammar,
            automaton,
            id,
            state,
            compact_reduces,
            &mut action_rows[id.index()],
            &mut goto_rows[id.index()],
            &mut conflicts,
            reporter,
        );
    }

    tracing::trace!(conflicts, "parse tables populated");

    Tables {
        actions: ActionTable {
            rows: action_rows,
            terminal_count,
        },
        gotos: GotoTable { rows: goto_rows },
        conflicts,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_row(
    grammar: &Grammar,
    automaton: &Automaton,
    id: StateID,
    state: &State,
    compact_reduces: bool,
    row: &mut [i32],
    goto_row: &mut [Option<StateID>],
    conflicts: &mut u32,
    reporter: &mut Reporter,
) {
    let terminal_count = grammar.terminal_count();
    let error_col = TerminalID::ERROR.index();
    let mut reduce_prods: Vec<Option<ProductionID>> = vec![None; terminal_count];
    let mut default_lasize = 0usize;
    let mut default_action = ERROR;
    let mut default_empty_rhs = false;

    // reduce entries first, in item order, so the earlier production wins
    // every reduce/reduce conflict
    for (item, la) in state.items() {
        if !item.is_dot_at_end(grammar) {
            continue;
        }
        let production = grammar.production(item.production);
        let action_index = production
            .action_index
            .expect("proxy productions are never reduced");
        let code = reduce_code(action_index);
        let lookahead = automaton.lookahead(la);

        let mut conflict = false;
        let mut lasize = 0usize;
        for t in 0..terminal_count {
            if !lookahead.contains(TerminalID::from_raw(t as u16)) {
                continue;
            }
            lasize += 1;
            if row[t] == ERROR {
                row[t] = code;
                reduce_prods[t] = Some(item.production);
            } else {
                conflict = true;
            }
        }

        if conflict {
            for (earlier, earlier_la) in state.items() {
                if earlier == item {
                    break;
                }
                if earlier.is_dot_at_end(grammar)
                    && automaton.lookahead(earlier_la).intersects(lookahead)
                {
                    let mut message = format!(
                        "reduce/reduce conflict in state {:?}\n  between {}\n  and     {}\n  under symbols: {{",
                        id,
                        earlier.display(grammar),
                        item.display(grammar),
                    );
                    let mut comma = "";
                    for t in automaton.lookahead(earlier_la).iter() {
                        if lookahead.contains(t) {
                            message.push_str(comma);
                            message.push_str(&grammar.terminal(t).name);
                            comma = ", ";
                        }
                    }
                    message.push_str("}\n  resolved in favor of the earlier production");
                    reporter.error(message);
                    *conflicts += 1;
                }
            }
        }

        if compact_reduces && lasize > default_lasize {
            // an empty reduce may only become the default when it covers
            // at least two lookaheads; otherwise it saves nothing and can
            // loop on broken input
            if !production.rhs.is_empty() || lasize > 1 {
                default_empty_rhs = production.rhs.is_empty();
                default_lasize = lasize;
                default_action = code;
            }
        }
    }

    // shift and goto entries
    for &(on, to) in state.transitions() {
        match on {
            SymbolID::T(t) => {
                write_shift(grammar, id, state, t, shift_code(to), row, &reduce_prods, conflicts, reporter);
            }
            SymbolID::N(n) => goto_row[n.index()] = Some(to),
        }
    }

    // the machine never shifts EOF; an item expecting it accepts by
    // reducing its production in the EOF column instead
    for (item, _) in state.items() {
        if item.symbol_after_dot(grammar) == Some(SymbolID::T(TerminalID::EOF)) {
            let action_index = grammar
                .production(item.production)
                .action_index
                .expect("only the start production expects EOF");
            write_shift(
                grammar,
                id,
                state,
                TerminalID::EOF,
                reduce_code(action_index),
                row,
                &reduce_prods,
                conflicts,
                reporter,
            );
        }
    }

    // an action on the error terminal dictates the row default: a reduce
    // there must stay reachable once the row is compacted
    let error_action = row[error_col];
    if error_action != ERROR {
        default_action = if is_reduce(error_action) {
            error_action
        } else {
            ERROR
        };
        default_empty_rhs = false;
    }
    row[terminal_count] = default_action;
    if default_action != ERROR {
        for t in 0..terminal_count {
            // leave the error column alone when the default reduces an
            // empty production; rewriting it can loop forever at runtime
            if row[t] == ERROR && (t != error_col || !default_empty_rhs) {
                row[t] = default_action;
            }
        }
    }
}

/// Write a shift-like action (a real shift, or the accept reduce in the
/// EOF column), resolving a collision with an already-written reduce via
/// precedence. Without usable precedence the shift wins and the conflict
/// is reported.
#[allow(clippy::too_many_arguments)]
fn write_shift(
    grammar: &Grammar,
    id: StateID,
    state: &State,
    terminal: TerminalID,
    code: i32,
    row: &mut [i32],
    reduce_prods: &[Option<ProductionID>],
    conflicts: &mut u32,
    reporter: &mut Reporter,
) {
    let col = terminal.index();
    if row[col] == ERROR {
        row[col] = code;
        return;
    }

    let production = reduce_prods[col].expect("a conflicting cell always holds a reduce");
    if fix_with_precedence(grammar, production, terminal, row, code) {
        return;
    }

    row[col] = code;
    let mut message = format!(
        "shift/reduce conflict in state {:?}\n  between {}\n",
        id,
        grammar.production(production).display(grammar),
    );
    for (item, _) in state.items() {
        if !item.is_dot_at_end(grammar)
            && item.symbol_after_dot(grammar) == Some(SymbolID::T(terminal))
        {
            message.push_str(&format!("  and     {}\n", item.display(grammar)));
        }
    }
    message.push_str(&format!(
        "  under symbol {}\n  resolved in favor of shifting",
        grammar.terminal(terminal).name,
    ));
    reporter.warning(message);
    *conflicts += 1;
}

/// Attempt to settle a shift/reduce collision with declared precedence.
/// Comparable levels decide directly; on a tie the associativity decides:
/// left associativity reduces, right associativity shifts, and a
/// non-associative terminal turns the cell into an error.
fn fix_with_precedence(
    grammar: &Grammar,
    production: ProductionID,
    terminal: TerminalID,
    row: &mut [i32],
    shift: i32,
) -> bool {
    let (Some(prod_prec), Some(term_prec)) = (
        grammar.production(production).precedence,
        grammar.terminal(terminal).precedence,
    ) else {
        return false;
    };

    match term_prec.level.cmp(&prod_prec.level) {
        Ordering::Greater => {
            row[terminal.index()] = shift;
            true
        }
        Ordering::Less => true,
        Ordering::Equal => match term_prec.assoc {
            Assoc::Left => true,
            Assoc::Right => {
                row[terminal.index()] = shift;
                true
            }
            Assoc::Nonassoc => {
                row[terminal.index()] = ERROR;
                true
            }
        },
    }
}

/// Warn about every action index that no reduce cell ever mentions.
pub fn check_reductions(grammar: &Grammar, tables: &Tables, reporter: &mut Reporter) {
    let mut used = vec![false; grammar.action_count()];
    for row in tables.actions.rows() {
        for t in 0..grammar.terminal_count() {
            if is_reduce(row[t]) {
                used[code_target(row[t])] = true;
            }
        }
    }
    for (action_index, used) in used.iter().enumerate() {
        if !used {
            let production = grammar.action_production(action_index as u16);
            reporter.warning(format!(
                "production \"{}\" is never reduced",
                production.display(grammar),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar::ProductionPart, machine, report::Reporter};

    #[test]
    fn action_codes() {
        let shift = shift_code(StateID::from_raw(7));
        assert_eq!(shift, 15);
        assert!(is_shift(shift));
        assert!(!is_reduce(shift));
        assert_eq!(code_target(shift), 7);

        let reduce = reduce_code(3);
        assert_eq!(reduce, 8);
        assert!(is_reduce(reduce));
        assert!(!is_shift(reduce));
        assert_eq!(code_target(reduce), 3);

        assert!(!is_shift(ERROR));
        assert!(!is_reduce(ERROR));
    }

    #[test]
    fn reduce_on_error_terminal_forces_the_default() {
        // T ::= S error x {recover} ; S ::= y {leaf}
        // after shifting y, S reduces under the error terminal, so that
        // reduce must become the row default even without compaction
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let x = g.add_terminal("x", None);
        let y = g.add_terminal("y", None);
        let t = g.add_nonterminal("T", None);
        let s = g.add_nonterminal("S", None);
        g.set_start_symbol(t);
        g.build_production(
            t,
            vec![
                ProductionPart::symbol(SymbolID::N(s)),
                ProductionPart::symbol(SymbolID::T(TerminalID::ERROR)),
                ProductionPart::symbol(SymbolID::T(x)),
                ProductionPart::action("recover"),
            ],
            None,
            &mut reporter,
        );
        let leaf = g.build_production(
            s,
            vec![ProductionPart::symbol(SymbolID::T(y)), ProductionPart::action("leaf")],
            None,
            &mut reporter,
        );
        g.compute_nullability();
        g.compute_firsts();

        let automaton = machine::build(&g);
        let tables = build(&g, &automaton, false, &mut reporter);
        assert_eq!(tables.conflicts, 0);

        let after_y = automaton
            .state(automaton.start())
            .transition(SymbolID::T(y))
            .unwrap();
        let leaf_reduce = reduce_code(g.production(leaf).action_index.unwrap());
        assert_eq!(tables.actions.action(after_y, TerminalID::ERROR), leaf_reduce);
        assert_eq!(tables.actions.default_action(after_y), leaf_reduce);
        // the whole row collapses onto the default
        assert_eq!(tables.actions.action(after_y, x), leaf_reduce);
    }

    #[test]
    fn empty_reduce_with_single_lookahead_is_not_a_default() {
        // S ::= A x {use} ; A ::= {mk} -- the empty reduce covers only x
        let mut g = Grammar::new();
        let mut reporter = Reporter::new();
        let x = g.add_terminal("x", None);
        let s = g.add_nonterminal("S", None);
        let a = g.add_nonterminal("A", None);
        g.set_start_symbol(s);
        g.build_production(
            s,
            vec![
                ProductionPart::symbol(SymbolID::N(a)),
                ProductionPart::symbol(SymbolID::T(x)),
                ProductionPart::action("use"),
            ],
            None,
            &mut reporter,
        );
        let mk = g.build_production(
            a,
            vec![ProductionPart::action("mk")],
            None,
            &mut reporter,
        );
        g.compute_nullability();
        g.compute_firsts();

        let automaton = machine::build(&g);
        let tables = build(&g, &automaton, true, &mut reporter);

        let start = automaton.start();
        let mk_reduce = reduce_code(g.production(mk).action_index.unwrap());
        assert_eq!(tables.actions.action(start, x), mk_reduce);
        assert_eq!(tables.actions.default_action(start), ERROR);
    }
}
