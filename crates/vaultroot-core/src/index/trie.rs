//! Arena-allocated prefix trie for autocomplete

use super::tokenizer::fold;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

/// Trie node. Children are indices into the owning [`Trie`]'s arena.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrieNode {
    pub children: BTreeMap<char, usize>,
    pub terminal: bool,
    pub frequency: u64,
    /// Most recent modification (ms since epoch) among documents using the word
    pub last_seen: Option<i64>,
    /// Full word, set on terminal nodes
    pub word: Option<String>,
    /// Highest `(frequency, last_seen)` of any terminal in this subtree
    pub best: Rank,
}

/// Suggestion ordering key, greater ranks first
pub type Rank = (u64, Option<i64>);

/// Frontier entry for the best-first walk. Subtrees are expanded before words of
/// the same rank so that a word is only emitted once nothing unseen can beat it.
#[derive(PartialEq, Eq)]
enum Visit<'a> {
    Subtree(Rank, usize),
    Word(Rank, Reverse<&'a str>),
}

impl Visit<'_> {
    fn rank(&self) -> Rank {
        match self {
            Visit::Subtree(rank, _) | Visit::Word(rank, _) => *rank,
        }
    }
}

impl Ord for Visit<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| match (self, other) {
            (Visit::Subtree(_, a), Visit::Subtree(_, b)) => b.cmp(a),
            (Visit::Subtree(..), Visit::Word(..)) => Ordering::Greater,
            (Visit::Word(..), Visit::Subtree(..)) => Ordering::Less,
            (Visit::Word(_, a), Visit::Word(_, b)) => a.cmp(b),
        })
    }
}

impl PartialOrd for Visit<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Prefix trie over the indexed vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct Trie {
    nodes: Vec<TrieNode>,
    words: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    const ROOT: usize = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            words: 0,
        }
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0
    }

    /// Insert a word, accumulating frequency and keeping the latest timestamp
    pub fn insert(&mut self, word: &str, frequency: u64, last_seen: Option<i64>) {
        if word.is_empty() {
            return;
        }

        let mut path = vec![Self::ROOT];
        let mut node = Self::ROOT;
        for c in word.chars() {
            node = match self.nodes[node].children.get(&c) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(c, child);
                    child
                }
            };
            path.push(node);
        }

        let entry = &mut self.nodes[node];
        if !entry.terminal {
            entry.terminal = true;
            entry.word = Some(word.to_string());
            self.words += 1;
        }
        entry.frequency += frequency;
        entry.last_seen = entry.last_seen.max(last_seen);

        // Both components only grow, so a running max along the path stays exact
        let rank = (entry.frequency, entry.last_seen);
        for idx in path {
            let best = &mut self.nodes[idx].best;
            *best = (*best).max(rank);
        }
    }

    fn find(&self, prefix: &str) -> Option<usize> {
        let mut node = Self::ROOT;
        for c in prefix.chars() {
            node = *self.nodes[node].children.get(&c)?;
        }
        Some(node)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.find(word)
            .map(|n| self.nodes[n].terminal)
            .unwrap_or(false)
    }

    pub fn get(&self, word: &str) -> Option<&TrieNode> {
        self.find(word)
            .map(|n| &self.nodes[n])
            .filter(|node| node.terminal)
    }

    /// Words starting with `prefix`, ranked by frequency desc, then freshness desc,
    /// then lexical order.
    ///
    /// The walk is best-first on each subtree's highest rank, so words come out
    /// already in final order and the walk ends once `limit` are found. `max_scan`
    /// caps the trie nodes expanded; when it is hit, the words returned are still
    /// the top-ranked ones, there are just fewer of them.
    pub fn suggest(&self, prefix: &str, limit: usize, max_scan: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(start) = self.find(&fold(prefix.trim())) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut scanned = 0;
        let mut frontier = BinaryHeap::from([Visit::Subtree(self.nodes[start].best, start)]);
        while let Some(visit) = frontier.pop() {
            match visit {
                Visit::Word(_, Reverse(word)) => {
                    out.push(word.to_string());
                    if out.len() >= limit {
                        break;
                    }
                }
                Visit::Subtree(_, idx) => {
                    if scanned >= max_scan {
                        break;
                    }
                    scanned += 1;
                    let node = &self.nodes[idx];
                    if let (true, Some(word)) = (node.terminal, node.word.as_deref()) {
                        frontier.push(Visit::Word(
                            (node.frequency, node.last_seen),
                            Reverse(word),
                        ));
                    }
                    frontier.extend(
                        node.children
                            .values()
                            .map(|&child| Visit::Subtree(self.nodes[child].best, child)),
                    );
                }
            }
        }
        out
    }
}
