//! Lookahead sets with propagation listeners.
//!
//! Closure and successor construction leave behind a directed graph of
//! "this item's lookaheads flow into that item's lookaheads" edges. The
//! graph contains cycles (left-recursive grammars produce them readily),
//! so every node lives in a single arena and propagation runs an explicit
//! worklist instead of recursing.

use crate::terminal_set::TerminalSet;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct LookaheadID {
    raw: u32,
}

impl LookaheadID {
    #[inline]
    const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    const fn index(self) -> usize {
        self.raw as usize
    }
}

#[derive(Debug)]
struct Node {
    set: TerminalSet,
    listeners: Vec<LookaheadID>,
}

/// Arena owning every lookahead set of the automaton.
#[derive(Debug, Default)]
pub struct LookaheadArena {
    nodes: Vec<Node>,
}

impl LookaheadArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, set: TerminalSet) -> LookaheadID {
        let id = LookaheadID::from_raw(self.nodes.len() as u32);
        self.nodes.push(Node {
            set,
            listeners: Vec::new(),
        });
        id
    }

    pub fn set(&self, id: LookaheadID) -> &TerminalSet {
        &self.nodes[id.index()].set
    }

    /// Register `listener` to receive every terminal later added to `id`.
    pub fn add_listener(&mut self, id: LookaheadID, listener: LookaheadID) {
        self.nodes[id.index()].listeners.push(listener);
    }

    /// Union `added` into `id` and, if that grew the set, push the same
    /// terminals through the listener graph until nothing changes.
    pub fn add(&mut self, id: LookaheadID, added: &TerminalSet) -> bool {
        if !self.nodes[id.index()].set.union_with(added) {
            return false;
        }
        let mut work = self.nodes[id.index()].listeners.clone();
        while let Some(next) = work.pop() {
            if self.nodes[next.index()].set.union_with(added) {
                work.extend_from_slice(&self.nodes[next.index()].listeners);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::TerminalID;

    fn t(raw: u16) -> TerminalID {
        TerminalID::from_raw(raw)
    }

    #[test]
    fn add_reaches_transitive_listeners() {
        let mut arena = LookaheadArena::new();
        let a = arena.alloc(TerminalSet::new());
        let b = arena.alloc(TerminalSet::new());
        let c = arena.alloc(TerminalSet::new());
        arena.add_listener(a, b);
        arena.add_listener(b, c);

        let added: TerminalSet = [t(4)].into_iter().collect();
        assert!(arena.add(a, &added));
        assert!(arena.set(b).contains(t(4)));
        assert!(arena.set(c).contains(t(4)));
    }

    #[test]
    fn propagation_terminates_on_cycles() {
        let mut arena = LookaheadArena::new();
        let a = arena.alloc(TerminalSet::new());
        let b = arena.alloc(TerminalSet::new());
        arena.add_listener(a, b);
        arena.add_listener(b, a);

        let added: TerminalSet = [t(2), t(3)].into_iter().collect();
        assert!(arena.add(b, &added));
        assert!(arena.set(a).contains(t(2)));
        // a second add is a no-op
        assert!(!arena.add(b, &added));
    }
}
