//! Observation automata shared between [`super::fsa`] and [`super::svpa`]:
//! both build the same overlay shapes over the same ordered/negative
//! patterns, just composed with a different base transition system
//! (a flat node-label walk for FSA, an internal/call/return-partitioned
//! walk for SVPA).

use std::collections::{BTreeSet, HashSet};

/// One observation overlay: either a negative singleton group (`obsNo`) or
/// an ordered sequence of groups (`obsYes`, possibly in "crash" mode).
pub enum ObsComponent {
    /// Single accepting state; any symbol in `group` has no transition
    /// (kills every NFA branch it's reached on).
    No { group: HashSet<String> },
    /// `groups.len() + 1` states. State `i < k` always self-loops and
    /// additionally advances to `i+1` on a symbol in `groups[i]`. State `k`
    /// (the tail) is the only accepting state: in `crash` mode it accepts
    /// only `groups[k-1]` and regresses to `k-1` otherwise; outside crash
    /// mode it self-loops on everything once reached, so the vector having
    /// fully matched is a permanent fact, not an automatic acceptance.
    Yes { groups: Vec<HashSet<String>>, crash: bool },
}

impl ObsComponent {
    pub fn no(group: &[String]) -> Self {
        ObsComponent::No {
            group: group.iter().cloned().collect(),
        }
    }

    pub fn yes(groups: &[Vec<String>], crash: bool) -> Self {
        ObsComponent::Yes {
            groups: groups.iter().map(|g| g.iter().cloned().collect()).collect(),
            crash,
        }
    }

    pub fn initial_states(&self) -> BTreeSet<usize> {
        BTreeSet::from([0])
    }

    /// The NFA states from which this overlay is considered satisfied.
    pub fn accepting_states(&self) -> BTreeSet<usize> {
        match self {
            ObsComponent::No { .. } => BTreeSet::from([0]),
            ObsComponent::Yes { groups, .. } => BTreeSet::from([groups.len()]),
        }
    }

    /// Advance every state in `states` on `symbol`, returning the union of
    /// reachable next states (empty if every branch dies).
    pub fn step(&self, states: &BTreeSet<usize>, symbol: &str) -> BTreeSet<usize> {
        match self {
            ObsComponent::No { group } => {
                if group.contains(symbol) {
                    BTreeSet::new()
                } else {
                    BTreeSet::from([0])
                }
            }
            ObsComponent::Yes { groups, crash } => {
                let k = groups.len();
                let mut next = BTreeSet::new();
                for &s in states {
                    if s < k {
                        next.insert(s);
                        if groups[s].contains(symbol) {
                            next.insert(s + 1);
                        }
                    } else if *crash {
                        if k > 0 && groups[k - 1].contains(symbol) {
                            next.insert(k);
                        } else if k > 0 {
                            next.insert(k - 1);
                        }
                    } else {
                        next.insert(k);
                    }
                }
                next
            }
        }
    }

    pub fn is_satisfied(&self, states: &BTreeSet<usize>) -> bool {
        !states.is_disjoint(&self.accepting_states())
    }
}
