use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::grammar::Compiled;
use crate::lexer::lex;
use crate::parse::Parse;
use crate::predicates::Registry;
use crate::search::{Filter, Hopper, Picker, Reducer};
use crate::utils::combinations;

/// One independent search region: every lex variant of one interval
/// between boundary tokens, sharing a hopper. Boundary tokens themselves
/// become trivial, already-finished segments.
struct Segment {
  start: usize,
  end: usize,
  hopper: Hopper,
  picker: Picker,
  /// Indices of segments starting where this one ends.
  continuations: Vec<usize>,
  done: bool,
}

impl Segment {
  fn new(start: usize, end: usize, boundary: bool, bases: Vec<Parse>, filters: &[Filter], n: Option<usize>) -> Self {
    let mut hopper = Hopper::new(filters, n);
    let mut picker = Picker::new();
    if boundary {
      for base in bases {
        hopper.insert(base);
      }
    } else {
      for base in bases {
        picker.push(Reducer::new(base));
      }
    }
    Self {
      start,
      end,
      hopper,
      picker,
      continuations: Vec::new(),
      done: boundary,
    }
  }

  /// The picker/hopper engine loop, one unit of work at a time: advance the
  /// most promising reducer one reduction, spawning a reducer for the child
  /// parse; exhausted or hopeless parses settle into the hopper.
  fn step(&mut self, grammar: &Compiled, registry: &Registry) {
    if self.done {
      return;
    }
    if self.hopper.satisfied() {
      self.done = true;
      return;
    }
    let Some(mut reducer) = self.picker.pop() else {
      self.done = true;
      return;
    };
    if !self.hopper.continuable(reducer.parse()) {
      self.hopper.insert(reducer.into_parse());
      return;
    }
    match reducer.next_reduction(&mut self.hopper, grammar, registry) {
      Some(child) => {
        self.picker.push(Reducer::new(child));
        self.picker.push(reducer);
      }
      None => {
        // exhausted; a parse that never reduced is itself a result
        if !reducer.produced_any() {
          self.hopper.insert(reducer.into_parse());
        }
      }
    }
  }

  /// Scheduling priority: cheap segments with few results first.
  fn weight(&self) -> usize {
    (self.end - self.start) * self.hopper.len()
  }
}

/// `(root_lo, root_hi, is_boundary)` runs of a tokenized variant.
fn split_pieces(variant: &Parse) -> Vec<(usize, usize, bool)> {
  let mut out = Vec::new();
  let mut run_start: Option<usize> = None;
  for (k, &r) in variant.roots().iter().enumerate() {
    if variant.node(r).is_boundary() {
      if let Some(s) = run_start.take() {
        out.push((s, k, false));
      }
      out.push((k, k + 1, true));
    } else if run_start.is_none() {
      run_start = Some(k);
    }
  }
  if let Some(s) = run_start {
    out.push((s, variant.roots().len(), false));
  }
  out
}

/// A parse in progress: the segment searches plus their schedule. The
/// engine drives one unit of work per `step`, so an embedder may
/// interleave parsing with its own work, stop early, or just call `step`
/// in a loop and then `results`.
pub struct Search<'g> {
  grammar: &'g Compiled,
  registry: &'g Registry,
  filters: Vec<Filter>,
  n: Option<usize>,
  text_len: usize,
  segments: Vec<Segment>,
  /// Set when the input was empty and there is nothing to search.
  trivial: Option<Vec<Parse>>,
}

impl<'g> Search<'g> {
  pub(crate) fn new(
    text: &str,
    grammar: &'g Compiled,
    registry: &'g Registry,
    filters: &[Filter],
    n: Option<usize>,
  ) -> Self {
    let text: Rc<str> = text.into();
    let variants = lex(&text, grammar, registry);
    if variants.len() == 1 && variants[0].length() == 0 {
      return Self {
        grammar,
        registry,
        filters: filters.to_vec(),
        n,
        text_len: text.len(),
        segments: Vec::new(),
        trivial: Some(variants),
      };
    }

    // group pieces by interval; all variants of one interval share a segment
    let mut specs: Vec<(usize, usize, bool, Vec<Parse>)> = Vec::new();
    let mut index: HashMap<(usize, usize, bool), usize> = HashMap::new();
    let mut piece_seen: HashSet<(usize, usize, bool, String)> = HashSet::new();
    for variant in &variants {
      for (lo, hi, boundary) in split_pieces(variant) {
        let piece = variant.slice_roots(lo, hi);
        let start = piece.roots().first().map(|&r| piece.node(r).start).expect("empty piece");
        let end = piece.roots().last().map(|&r| piece.node(r).end).expect("empty piece");
        let key = (start, end, boundary);
        let ix = *index.entry(key).or_insert_with(|| {
          specs.push((start, end, boundary, Vec::new()));
          specs.len() - 1
        });
        if piece_seen.insert((start, end, boundary, piece.summary().to_string())) {
          specs[ix].3.push(piece);
        }
      }
    }

    let mut segments: Vec<Segment> = specs
      .into_iter()
      .map(|(start, end, boundary, bases)| Segment::new(start, end, boundary, bases, filters, n))
      .collect();

    // link: a segment continues into every segment starting at its end
    let text_len = text.len();
    for i in 0..segments.len() {
      let end = segments[i].end;
      if end == text_len {
        continue;
      }
      segments[i].continuations = (0..segments.len())
        .filter(|&j| j != i && segments[j].start == end)
        .collect();
    }
    debug!(segments = segments.len(), "segmented");

    Self {
      grammar,
      registry,
      filters: filters.to_vec(),
      n,
      text_len,
      segments,
      trivial: None,
    }
  }

  /// Advance the minimum-weight unfinished segment by one unit of work.
  /// Returns false once there is nothing left worth doing: every segment
  /// is done, or a bounded request is already covered.
  pub fn step(&mut self) -> bool {
    if self.trivial.is_some() {
      return false;
    }
    if let Some(target) = self.n {
      let mut memo = HashMap::new();
      let available: usize = self
        .segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.start == 0)
        .map(|(i, _)| total_parses(&self.segments, i, self.text_len, &mut memo))
        .sum();
      if available >= target {
        trace!(available, "enough parses staged");
        return false;
      }
    }
    let Some(ix) = self
      .segments
      .iter()
      .enumerate()
      .filter(|(_, s)| !s.done)
      .min_by_key(|(i, s)| (s.weight(), *i))
      .map(|(i, _)| i)
    else {
      return false;
    };
    self.segments[ix].step(self.grammar, self.registry);
    true
  }

  /// Compose per-segment winners into whole parses: the cross product of
  /// hopper contents along every boundary-to-boundary path, deduped
  /// structurally, refiltered as whole parses.
  pub fn results(&self) -> Vec<Parse> {
    if let Some(trivial) = &self.trivial {
      return trivial.clone();
    }
    let mut final_hopper = Hopper::new(&self.filters, None);
    let mut seen: HashSet<String> = HashSet::new();
    for start_ix in 0..self.segments.len() {
      if self.segments[start_ix].start != 0 {
        continue;
      }
      for path in paths(&self.segments, start_ix, self.text_len) {
        let choice_sets: Vec<Vec<&Parse>> = path
          .iter()
          .map(|&s| self.segments[s].hopper.parses().iter().collect())
          .collect();
        for combo in combinations(&choice_sets) {
          let merged = Parse::merge(&combo);
          if seen.insert(merged.summary().to_string()) {
            final_hopper.insert(merged);
          }
        }
      }
    }
    final_hopper.into_results()
  }
}

/// Parse `text` to completion in one call.
pub(crate) fn run(
  text: &str,
  grammar: &Compiled,
  registry: &Registry,
  filters: &[Filter],
  n: Option<usize>,
) -> Vec<Parse> {
  let mut search = Search::new(text, grammar, registry, filters, n);
  while search.step() {}
  search.results()
}

/// How many whole parses the staged segment results could compose into.
fn total_parses(
  segments: &[Segment],
  ix: usize,
  text_len: usize,
  memo: &mut HashMap<usize, usize>,
) -> usize {
  if let Some(&v) = memo.get(&ix) {
    return v;
  }
  let s = &segments[ix];
  let v = if s.end == text_len {
    s.hopper.len()
  } else {
    s.hopper.len()
      * s
        .continuations
        .iter()
        .map(|&c| total_parses(segments, c, text_len, memo))
        .sum::<usize>()
  };
  memo.insert(ix, v);
  v
}

/// Every chain of segments from `ix` to the end of the text.
fn paths(segments: &[Segment], ix: usize, text_len: usize) -> Vec<Vec<usize>> {
  if segments[ix].end == text_len {
    return vec![vec![ix]];
  }
  let mut out = Vec::new();
  for &c in &segments[ix].continuations {
    for mut tail in paths(segments, c, text_len) {
      tail.insert(0, ix);
      out.push(tail);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::NodeKind;
  use crate::rules::Leaf;
  use regex::Regex;

  fn leaf(name: &str, pattern: &str, ignorable: bool, boundary: bool) -> Rc<Leaf> {
    Rc::new(Leaf {
      name: name.to_string(),
      pattern: Some(Regex::new(pattern).unwrap()),
      ignorable,
      boundary,
      node_tests: vec![],
      ancestor_tests: vec![],
      preconditions: vec![],
      process: None,
    })
  }

  fn token_grammar(leaves: Vec<Rc<Leaf>>) -> Compiled {
    Compiled {
      rules: HashMap::new(),
      leaves,
      trash: Rc::new(Leaf {
        name: "_trash".to_string(),
        pattern: None,
        ignorable: false,
        boundary: true,
        node_tests: vec![],
        ancestor_tests: vec![],
        preconditions: vec![],
        process: None,
      }),
      starters: HashMap::new(),
      unary_branch_check: false,
    }
  }

  #[test]
  fn test_split_pieces() {
    let registry = Registry::new();
    let w = leaf("w", r"\w+", false, false);
    let stop = leaf("stop", r"\.", false, true);
    let text: Rc<str> = "ab.cd.".into();
    let p = Parse::empty(text)
      .with_token(&w, NodeKind::Leaf, 0, 2, &registry)
      .with_token(&stop, NodeKind::Boundary, 2, 3, &registry)
      .with_token(&w, NodeKind::Leaf, 3, 5, &registry)
      .with_token(&stop, NodeKind::Boundary, 5, 6, &registry);
    assert_eq!(
      split_pieces(&p),
      vec![(0, 1, false), (1, 2, true), (2, 3, false), (3, 4, true)]
    );
  }

  #[test]
  fn test_adjacent_boundaries() {
    let registry = Registry::new();
    let stop = leaf("stop", r"\.", false, true);
    let text: Rc<str> = "..".into();
    let p = Parse::empty(text)
      .with_token(&stop, NodeKind::Boundary, 0, 1, &registry)
      .with_token(&stop, NodeKind::Boundary, 1, 2, &registry);
    assert_eq!(split_pieces(&p), vec![(0, 1, true), (1, 2, true)]);
  }

  #[test]
  fn test_run_without_rules_returns_tokens() {
    let g = token_grammar(vec![leaf("w", r"\w+", false, false), leaf("_ws", r"\s+", true, false)]);
    let registry = Registry::new();
    let results = run("ab cd", &g, &registry, &crate::search::DEFAULT_FILTERS, None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].summary(), "w;_ws;w");
  }

  #[test]
  fn test_run_composes_across_boundaries() {
    let g = token_grammar(vec![
      leaf("w", r"\w+", false, false),
      leaf("_ws", r"\s+", true, false),
      leaf("stop", r"\.", false, true),
    ]);
    let registry = Registry::new();
    let results = run("ab. cd.", &g, &registry, &crate::search::DEFAULT_FILTERS, None);
    assert_eq!(results.len(), 1);
    let p = &results[0];
    assert_eq!(p.summary(), "w;stop;_ws;w;stop");
    // coverage is contiguous across the merged roots
    let roots = p.root_refs();
    assert_eq!(roots[0].start(), 0);
    assert_eq!(roots[roots.len() - 1].end(), 7);
    for pair in roots.windows(2) {
      assert_eq!(pair[0].end(), pair[1].start());
    }
  }

  #[test]
  fn test_run_empty_text() {
    let g = token_grammar(vec![leaf("w", r"\w+", false, false)]);
    let registry = Registry::new();
    let results = run("", &g, &registry, &crate::search::DEFAULT_FILTERS, None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].length(), 0);
  }
}
