//! An LALR(1) parse table generator.
//!
//! The grammar-spec front end populates a [`grammar::Grammar`] through the
//! builder API (symbols, precedence groups, productions with embedded
//! actions, EBNF operators) and then hands it to [`analyze`], which runs
//! the nullability and FIRST fixpoints, constructs the LALR(1) automaton,
//! fills and compresses the parse tables, and enforces the declared
//! conflict expectation. The compressed tables and per-production records
//! in the returned [`Analysis`] are everything a code emitter needs.

pub mod compress;
pub mod grammar;
pub mod item;
pub mod lookaheads;
pub mod machine;
pub mod report;
pub mod symbol;
pub mod table;
pub mod terminal_set;
mod types;

use crate::{
    compress::{CompressedActionTable, CompressedGotoTable},
    grammar::{Grammar, ProductionRecord},
    machine::Automaton,
    report::Reporter,
    table::Tables,
};

/// Options consumed by the analyzer core. Everything else (output names,
/// target flavor, ...) belongs to the emitter and passes through
/// untouched.
#[derive(Debug, Clone)]
pub struct Options {
    /// Compact action rows by promoting the most common reduce to the
    /// row's default action.
    pub compact_reduces: bool,
    /// The number of conflicts the grammar is declared to have. The run
    /// fails unless exactly this many conflicts are found; `None`
    /// disables the check.
    pub expect_conflicts: Option<u32>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compact_reduces: false,
            expect_conflicts: Some(0),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{found} conflicts detected, but {expected} were declared")]
    UnexpectedConflicts { expected: u32, found: u32 },

    #[error("the grammar declares no productions")]
    MissingStartProduction,
}

/// Everything the analysis produces for the emitter.
#[derive(Debug)]
pub struct Analysis {
    pub automaton: Automaton,
    pub tables: Tables,
    pub action_table: CompressedActionTable,
    pub goto_table: CompressedGotoTable,
    /// `(lhs, rhs length, action index)` keyed by production index.
    pub productions: Vec<ProductionRecord>,
}

/// Run the full pipeline over a finished grammar.
#[tracing::instrument(skip_all)]
pub fn analyze(
    grammar: &mut Grammar,
    options: &Options,
    reporter: &mut Reporter,
) -> Result<Analysis, Error> {
    if grammar.start_production().is_none() {
        return Err(Error::MissingStartProduction);
    }

    grammar.compute_nullability();
    grammar.compute_firsts();

    let automaton = machine::build(grammar);
    let tables = table::build(grammar, &automaton, options.compact_reduces, reporter);

    if let Some(expected) = options.expect_conflicts {
        if tables.conflicts != expected {
            return Err(Error::UnexpectedConflicts {
                expected,
                found: tables.conflicts,
            });
        }
    }

    table::check_reductions(grammar, &tables, reporter);

    let action_table = compress::compress_actions(&tables.actions);
    let goto_table = compress::compress_gotos(&tables.gotos);

    Ok(Analysis {
        automaton,
        tables,
        action_table,
        goto_table,
        productions: grammar.production_records(),
    })
}
