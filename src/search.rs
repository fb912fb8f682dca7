use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::error::GrammarError;
use crate::grammar::Compiled;
use crate::node::NodeRef;
use crate::parse::Parse;
use crate::predicates::Registry;
use crate::rules::Starter;

/// One key of the dominance ordering; fewer is always better.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filter {
  /// Roots that are trash or failed a test.
  Correctness,
  /// Root count; a fully reduced parse has one.
  Completion,
  /// Roots with structural tests still undecided.
  Pending,
  /// Total node count.
  Size,
}

/// The order the engine uses unless told otherwise.
pub const DEFAULT_FILTERS: [Filter; 4] = [
  Filter::Correctness,
  Filter::Completion,
  Filter::Pending,
  Filter::Size,
];

impl Filter {
  pub fn key(self, p: &Parse) -> usize {
    match self {
      Self::Correctness => p.incorrectness_count(),
      Self::Completion => p.length(),
      Self::Pending => p.pending_count(),
      Self::Size => p.size(),
    }
  }
}

impl fmt::Display for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Correctness => write!(f, "correctness"),
      Self::Completion => write!(f, "completion"),
      Self::Pending => write!(f, "pending"),
      Self::Size => write!(f, "size"),
    }
  }
}

impl FromStr for Filter {
  type Err = GrammarError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "correctness" => Ok(Self::Correctness),
      "completion" => Ok(Self::Completion),
      "pending" => Ok(Self::Pending),
      "size" => Ok(Self::Size),
      other => Err(GrammarError::UnknownFilter(other.to_string())),
    }
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Standing {
  Better,
  Worse,
  Tied,
}

/// The bounded bag of best parses. Applies the dominance filter on entry,
/// dedups reduction candidates by their would-be summary, and knows when
/// the search may stop.
pub struct Hopper {
  filters: Vec<Filter>,
  capacity: Option<usize>,
  bin: Vec<Parse>,
  thresholds: Option<Vec<usize>>,
  seen: HashSet<String>,
}

impl Hopper {
  pub fn new(filters: &[Filter], capacity: Option<usize>) -> Self {
    Self {
      filters: filters.to_vec(),
      capacity,
      bin: Vec::new(),
      thresholds: None,
      seen: HashSet::new(),
    }
  }

  fn keys(&self, p: &Parse) -> Vec<usize> {
    self.filters.iter().map(|f| f.key(p)).collect()
  }

  /// Lexicographic comparison in filter order: the first differing key
  /// decides.
  fn standing(keys: &[usize], thresholds: &[usize]) -> Standing {
    for (k, t) in keys.iter().zip(thresholds) {
      if k < t {
        return Standing::Better;
      }
      if k > t {
        return Standing::Worse;
      }
    }
    Standing::Tied
  }

  fn threshold_of(&self, filter: Filter) -> Option<usize> {
    let t = self.thresholds.as_ref()?;
    let ix = self.filters.iter().position(|&f| f == filter)?;
    Some(t[ix])
  }

  /// Gatekeeper for reductions. Evaluates the rule's preconditions over
  /// the prospective children, dedups against every candidate this search
  /// has already built, then asks the parse to extend itself.
  pub fn vet(
    &mut self,
    parse: &Parse,
    i: usize,
    j: usize,
    starter: &Starter,
    registry: &Registry,
    unary_check: bool,
  ) -> Option<Parse> {
    let rule = &starter.rule;
    if !rule.preconditions.is_empty() {
      let children: Vec<NodeRef<'_>> =
        parse.roots()[i..j].iter().map(|&c| parse.get(c)).collect();
      let start = children[0].start();
      let end = children[children.len() - 1].end();
      for name in &rule.preconditions {
        if !(registry.precondition(name))(&rule.name, start, end, parse.text(), &children) {
          trace!(rule = %rule.name, precondition = %name, "reduction vetoed by precondition");
          return None;
        }
      }
    }

    let summary = parse.candidate_summary(i, j, &rule.name);
    if self.seen.contains(&summary) {
      trace!(%summary, "candidate already explored");
      return None;
    }
    let child = parse.add(i, j, rule, registry, unary_check, summary.clone())?;
    self.seen.insert(summary);
    Some(child)
  }

  /// Offer a completed parse. The first comer sets the thresholds; a
  /// strictly better parse resets them and purges the newly dominated; a
  /// tie is admitted while there is room; a strictly worse parse is
  /// dropped.
  pub fn insert(&mut self, parse: Parse) {
    if self.filters.is_empty() {
      self.bin.push(parse);
      return;
    }
    let keys = self.keys(&parse);
    let standing = match &self.thresholds {
      None => Standing::Better,
      Some(t) => Self::standing(&keys, t),
    };
    match standing {
      Standing::Worse => {
        trace!(summary = %parse.summary(), "dominated, dropped");
      }
      Standing::Better => {
        let filters = self.filters.clone();
        self
          .bin
          .retain(|q| {
            let qk: Vec<usize> = filters.iter().map(|f| f.key(q)).collect();
            Self::standing(&qk, &keys) != Standing::Worse
          });
        self.thresholds = Some(keys);
        self.bin.push(parse);
      }
      Standing::Tied => {
        if self.capacity.is_some_and(|n| self.bin.len() >= n) {
          trace!(summary = %parse.summary(), "tied but bin is full");
        } else {
          self.bin.push(parse);
        }
      }
    }
  }

  /// May this parse still improve enough to match the thresholds?
  /// Incorrectness and size only grow along a reduction chain, so either
  /// already past its threshold is hopeless. Size stops mattering once
  /// some fully reduced parse exists.
  pub fn continuable(&self, p: &Parse) -> bool {
    if self.thresholds.is_none() {
      return true;
    }
    if let Some(tc) = self.threshold_of(Filter::Correctness) {
      if p.incorrectness_count() > tc {
        return false;
      }
    }
    let fully_reduced = self.threshold_of(Filter::Completion) == Some(1);
    if !fully_reduced {
      if let Some(ts) = self.threshold_of(Filter::Size) {
        if p.size() > ts {
          return false;
        }
      }
    }
    true
  }

  /// Enough parses, none of them wrong, nothing pending: stop looking.
  pub fn satisfied(&self) -> bool {
    let Some(n) = self.capacity else {
      return false;
    };
    if self.bin.len() < n {
      return false;
    }
    let correct = self.threshold_of(Filter::Correctness).is_none_or(|t| t == 0);
    let quiet = self.threshold_of(Filter::Pending).is_none_or(|t| t == 0);
    correct && quiet
  }

  pub fn len(&self) -> usize {
    self.bin.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bin.is_empty()
  }

  pub fn parses(&self) -> &[Parse] {
    &self.bin
  }

  /// Drain the bin, best first (insertion order breaks ties).
  pub fn into_results(self) -> Vec<Parse> {
    let filters = self.filters;
    let mut bin = self.bin;
    if !filters.is_empty() {
      bin.sort_by(|a, b| {
        let ka: Vec<usize> = filters.iter().map(|f| f.key(a)).collect();
        let kb: Vec<usize> = filters.iter().map(|f| f.key(b)).collect();
        ka.cmp(&kb)
      });
    }
    bin
  }
}

/// Walks one parse's candidate reductions, emitting at most one child
/// parse per call. The cursor runs left to right over the roots, and for
/// each root through the starter table entries for its name, greediest
/// first.
pub struct Reducer {
  parse: Parse,
  root_ix: usize,
  starter_ix: usize,
  produced: bool,
}

impl Reducer {
  pub fn new(parse: Parse) -> Self {
    Self {
      parse,
      root_ix: 0,
      starter_ix: 0,
      produced: false,
    }
  }

  pub fn parse(&self) -> &Parse {
    &self.parse
  }

  pub fn into_parse(self) -> Parse {
    self.parse
  }

  /// Did any call to `next_reduction` ever yield a child?
  pub fn produced_any(&self) -> bool {
    self.produced
  }

  pub fn next_reduction(
    &mut self,
    hopper: &mut Hopper,
    grammar: &Compiled,
    registry: &Registry,
  ) -> Option<Parse> {
    while self.root_ix < self.parse.length() {
      let root = self.parse.get(self.parse.roots()[self.root_ix]);
      if root.is_traversible() && !root.has_failed() {
        if let Some(starters) = grammar.starters.get(root.name()) {
          while self.starter_ix < starters.len() {
            let starter = &starters[self.starter_ix];
            self.starter_ix += 1;
            let Some(j) = starter.match_at(&self.parse, self.root_ix) else {
              continue;
            };
            if j <= self.root_ix {
              continue;
            }
            if let Some(child) = hopper.vet(
              &self.parse,
              self.root_ix,
              j,
              starter,
              registry,
              grammar.unary_branch_check,
            ) {
              self.produced = true;
              return Some(child);
            }
          }
        }
      }
      self.root_ix += 1;
      self.starter_ix = 0;
    }
    None
  }
}

/// The worklist: reducers keyed by `(errors, forest length, arrival)`,
/// least first, so the most promising parse is always advanced next.
#[derive(Default)]
pub struct Picker {
  queue: BTreeMap<(usize, usize, u64), Reducer>,
  seq: u64,
}

impl Picker {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn push(&mut self, reducer: Reducer) {
    let key = (
      reducer.parse().incorrectness_count(),
      reducer.parse().length(),
      self.seq,
    );
    self.seq += 1;
    self.queue.insert(key, reducer);
  }

  pub fn pop(&mut self) -> Option<Reducer> {
    self.queue.pop_first().map(|(_, r)| r)
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::NodeKind;
  use crate::rules::Leaf;
  use std::rc::Rc;

  #[test]
  fn test_filter_from_str() {
    assert_eq!("correctness".parse::<Filter>().unwrap(), Filter::Correctness);
    assert_eq!("completion".parse::<Filter>().unwrap(), Filter::Completion);
    assert_eq!("pending".parse::<Filter>().unwrap(), Filter::Pending);
    assert_eq!("size".parse::<Filter>().unwrap(), Filter::Size);
    assert_eq!(
      "optimism".parse::<Filter>().unwrap_err(),
      GrammarError::UnknownFilter("optimism".to_string())
    );
  }

  fn token_parse(names: &[&str], text: &str) -> Parse {
    let registry = Registry::new();
    let text: Rc<str> = text.into();
    let mut p = Parse::empty(text);
    let mut at = 0;
    for name in names {
      let leaf = Rc::new(Leaf {
        name: name.to_string(),
        pattern: Some(regex::Regex::new(".").unwrap()),
        ignorable: false,
        boundary: false,
        node_tests: vec![],
        ancestor_tests: vec![],
        preconditions: vec![],
        process: None,
      });
      p = p.with_token(&leaf, NodeKind::Leaf, at, at + 1, &registry);
      at += 1;
    }
    p
  }

  #[test]
  fn test_hopper_dominance() {
    let mut hopper = Hopper::new(&DEFAULT_FILTERS, None);
    let longer = token_parse(&["a", "b"], "ab");
    let shorter = token_parse(&["a"], "a");

    hopper.insert(longer.clone());
    assert_eq!(hopper.len(), 1);
    // equal keys are admitted alongside
    hopper.insert(longer.clone());
    assert_eq!(hopper.len(), 2);
    // a shorter (more complete) parse purges the longer ones
    hopper.insert(shorter.clone());
    assert_eq!(hopper.len(), 1);
    assert_eq!(hopper.parses()[0].summary(), "a");
    // and the longer one no longer gets in
    hopper.insert(longer);
    assert_eq!(hopper.len(), 1);
  }

  #[test]
  fn test_hopper_capacity_bounds_ties() {
    let mut hopper = Hopper::new(&DEFAULT_FILTERS, Some(1));
    let a = token_parse(&["a"], "a");
    hopper.insert(a.clone());
    hopper.insert(a.clone());
    assert_eq!(hopper.len(), 1);
    assert!(hopper.satisfied());

    let mut unbounded = Hopper::new(&DEFAULT_FILTERS, None);
    unbounded.insert(a.clone());
    unbounded.insert(a);
    assert_eq!(unbounded.len(), 2);
    assert!(!unbounded.satisfied());
  }

  #[test]
  fn test_hopper_without_filters_admits_everything() {
    let mut hopper = Hopper::new(&[], None);
    hopper.insert(token_parse(&["a", "b"], "ab"));
    hopper.insert(token_parse(&["a"], "a"));
    hopper.insert(token_parse(&["a", "b", "c"], "abc"));
    assert_eq!(hopper.len(), 3);
    assert!(!hopper.satisfied());
  }

  #[test]
  fn test_continuable_tracks_correctness_and_size() {
    let mut hopper = Hopper::new(&DEFAULT_FILTERS, None);
    let two = token_parse(&["a", "b"], "ab");
    hopper.insert(two);
    // same size is fine, larger is not (nothing fully reduced yet)
    assert!(hopper.continuable(&token_parse(&["x", "y"], "xy")));
    assert!(!hopper.continuable(&token_parse(&["x", "y", "z"], "xyz")));

    let mut done = Hopper::new(&DEFAULT_FILTERS, None);
    done.insert(token_parse(&["a"], "a"));
    // a fully reduced parse exists, so size stops pruning
    assert!(done.continuable(&token_parse(&["x", "y", "z"], "xyz")));
  }

  #[test]
  fn test_picker_orders_by_errors_then_length() {
    let mut picker = Picker::new();
    picker.push(Reducer::new(token_parse(&["a", "b", "c"], "abc")));
    picker.push(Reducer::new(token_parse(&["a"], "a")));
    picker.push(Reducer::new(token_parse(&["a", "b"], "ab")));
    assert_eq!(picker.len(), 3);
    assert_eq!(picker.pop().unwrap().parse().length(), 1);
    assert_eq!(picker.pop().unwrap().parse().length(), 2);
    assert_eq!(picker.pop().unwrap().parse().length(), 3);
    assert!(picker.pop().is_none());
  }
}
