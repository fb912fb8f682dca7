use std::fmt;
use std::rc::Rc;

use crate::node::{
  LinkRecord, NodeData, NodeIx, NodeKind, NodeRef, PendingTest, Position, TestRecord,
};
use crate::predicates::{Judgment, Registry};
use crate::rules::{Leaf, Rule, RuleRef};

/// An ordered forest of nodes covering a stretch of the input text.
///
/// Parses are never mutated once handed out: every reduction clones the
/// parse and extends the clone. Nodes live in an arena owned by the parse;
/// cloning copies the arena wholesale, so node indices (and therefore
/// positions) are stable across the clones a search makes.
#[derive(Debug, Clone)]
pub struct Parse {
  text: Rc<str>,
  nodes: Vec<NodeData>,
  roots: Vec<NodeIx>,
  summary: String,
  size: usize,
  incorrectness: usize,
  pending: usize,
}

impl Parse {
  pub fn empty(text: Rc<str>) -> Self {
    Self {
      text,
      nodes: Vec::new(),
      roots: Vec::new(),
      summary: String::new(),
      size: 0,
      incorrectness: 0,
      pending: 0,
    }
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub(crate) fn text_rc(&self) -> &Rc<str> {
    &self.text
  }

  pub(crate) fn node(&self, ix: NodeIx) -> &NodeData {
    &self.nodes[ix.ix()]
  }

  fn node_mut(&mut self, ix: NodeIx) -> &mut NodeData {
    &mut self.nodes[ix.ix()]
  }

  pub(crate) fn roots(&self) -> &[NodeIx] {
    &self.roots
  }

  pub fn get(&self, ix: NodeIx) -> NodeRef<'_> {
    NodeRef::new(self, ix)
  }

  pub fn root_refs(&self) -> Vec<NodeRef<'_>> {
    self.roots.iter().map(|&r| self.get(r)).collect()
  }

  /// Number of roots; reductions shrink it toward 1.
  pub fn length(&self) -> usize {
    self.roots.len()
  }

  /// Total node count across the forest.
  pub fn size(&self) -> usize {
    self.size
  }

  /// Roots that are trash or carry a failed test.
  pub fn incorrectness_count(&self) -> usize {
    self.incorrectness
  }

  /// Roots with structural tests still waiting for an ancestor.
  pub fn pending_count(&self) -> usize {
    self.pending
  }

  /// Canonical string form; injective over structural shape.
  pub fn summary(&self) -> &str {
    &self.summary
  }

  pub fn has_errors(&self) -> bool {
    self.incorrectness > 0
  }

  /// No errors, nothing pending, and every root is a branch, a boundary,
  /// or an ignorable token: nothing significant was left unreduced.
  pub fn is_success(&self) -> bool {
    !self.has_errors()
      && self.pending == 0
      && self.roots.iter().all(|&r| {
        let n = self.node(r);
        n.kind == NodeKind::Branch || n.is_boundary() || n.is_ignorable()
      })
  }

  pub fn is_failure(&self) -> bool {
    !self.is_success()
  }

  /// Every node, document order (roots left to right, each pre-order).
  pub fn nodes(&self) -> Vec<NodeRef<'_>> {
    let mut out = Vec::with_capacity(self.size);
    for root in self.root_refs() {
      out.extend(root.subtree());
    }
    out
  }

  pub fn find(&self, position: Position) -> Option<NodeRef<'_>> {
    self.nodes().into_iter().find(|n| n.position() == position)
  }

  /// End of the last root, or 0 for an empty parse. The tokenizer extends
  /// from here.
  pub(crate) fn end(&self) -> usize {
    self.roots.last().map_or(0, |&r| self.node(r).end)
  }

  /// Clone-and-extend with a token node spanning `[start, end)`. Leaf node
  /// tests, ancestor-test seeding and the leaf's processor all run at
  /// token birth.
  pub(crate) fn with_token(
    &self,
    leaf: &Rc<Leaf>,
    kind: NodeKind,
    start: usize,
    end: usize,
    registry: &Registry,
  ) -> Parse {
    let mut p = self.clone();
    let ix = NodeIx(p.nodes.len() as u32);
    p.nodes.push(NodeData::token(leaf, kind, start, end));
    p.roots.push(ix);
    seed_pending(&mut p, ix);
    run_node_tests(&mut p, ix, registry);
    run_processor(&mut p, ix, registry);
    p.refresh();
    p
  }

  /// The summary this parse would have after `add(i, j, rule)`, computed
  /// without building anything. The search dedups on this before cloning.
  pub(crate) fn candidate_summary(&self, i: usize, j: usize, rule_name: &str) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(self.roots.len() - (j - i) + 1);
    for (k, &r) in self.roots.iter().enumerate() {
      if k == i {
        let inner: Vec<&str> = self.roots[i..j]
          .iter()
          .map(|&c| self.node(c).summary.as_str())
          .collect();
        parts.push(format!("{}[{}]", rule_name, inner.join(",")));
      }
      if k >= i && k < j {
        continue;
      }
      parts.push(self.node(r).summary.clone());
    }
    parts.join(";")
  }

  /// The one way branch nodes come into being: clone this parse, build a
  /// node over roots `[i, j)`, splice it in, and run the predicate
  /// machinery. Returns `None` when the unary-loop check refuses the node.
  ///
  /// `summary` is the precomputed candidate summary for the extended parse.
  pub(crate) fn add(
    &self,
    i: usize,
    j: usize,
    rule: &Rc<Rule>,
    registry: &Registry,
    unary_check: bool,
    summary: String,
  ) -> Option<Parse> {
    if unary_check && self.unary_spine_repeats(i, j, &rule.name) {
      return None;
    }

    let mut p = self.clone();
    let children: Vec<NodeIx> = p.roots[i..j].to_vec();
    let first = p.node(children[0]);
    let last = p.node(*children.last().expect("add of an empty root range"));
    let start = first.start;
    let end = last.end;
    let height = 1 + first.height;
    let size = 1 + children.iter().map(|&c| p.node(c).size).sum::<usize>();
    let inner: Vec<&str> = children.iter().map(|&c| p.node(c).summary.as_str()).collect();
    let node_summary = format!("{}[{}]", rule.name, inner.join(","));

    let ix = NodeIx(p.nodes.len() as u32);
    p.nodes.push(NodeData {
      rule: RuleRef::Rule(rule.clone()),
      kind: NodeKind::Branch,
      start,
      end,
      children: children.clone(),
      parent: None,
      failed_test: false,
      height,
      size,
      summary: node_summary,
      attributes: Default::default(),
      pending: Vec::new(),
    });
    for &c in &children {
      p.node_mut(c).parent = Some(ix);
    }
    p.roots.splice(i..j, [ix]);

    seed_pending(&mut p, ix);
    run_node_tests(&mut p, ix, registry);
    migrate_pending(&mut p, ix, registry);
    run_processor(&mut p, ix, registry);

    p.refresh();
    debug_assert_eq!(p.summary, summary);
    p.summary = summary;
    Some(p)
  }

  /// Would a node named `name` over roots `[i, j)` sit atop a unary spine
  /// already containing `name`?
  fn unary_spine_repeats(&self, i: usize, j: usize, name: &str) -> bool {
    let significant: Vec<NodeIx> = self.roots[i..j]
      .iter()
      .copied()
      .filter(|&c| self.node(c).is_significant())
      .collect();
    if significant.len() != 1 {
      return false;
    }
    let mut cur = significant[0];
    loop {
      let n = self.node(cur);
      if n.name() == name {
        return true;
      }
      let below: Vec<NodeIx> = n
        .children
        .iter()
        .copied()
        .filter(|&c| self.node(c).is_significant())
        .collect();
      if below.len() == 1 {
        cur = below[0];
      } else {
        return false;
      }
    }
  }

  /// Concatenate per-segment parses into one (segment composition). Each
  /// part's arena is appended with its indices shifted.
  pub(crate) fn merge(parts: &[&Parse]) -> Parse {
    let text = parts
      .first()
      .expect("merge of zero parses")
      .text
      .clone();
    let mut p = Parse::empty(text);
    for part in parts {
      let offset = p.nodes.len() as u32;
      for nd in &part.nodes {
        let mut nd = nd.clone();
        nd.children = nd.children.iter().map(|c| NodeIx(c.0 + offset)).collect();
        nd.parent = nd.parent.map(|x| NodeIx(x.0 + offset));
        for pt in &mut nd.pending {
          pt.descendant = NodeIx(pt.descendant.0 + offset);
        }
        p.nodes.push(nd);
      }
      p.roots.extend(part.roots.iter().map(|r| NodeIx(r.0 + offset)));
    }
    p.refresh();
    p
  }

  /// Extract roots `[lo, hi)` of a token parse as a standalone parse
  /// (segment splitting; the roots are all tokens, so no subtrees move).
  pub(crate) fn slice_roots(&self, lo: usize, hi: usize) -> Parse {
    let mut p = Parse::empty(self.text.clone());
    for &r in &self.roots[lo..hi] {
      let mut nd = self.node(r).clone();
      debug_assert!(nd.children.is_empty(), "slice_roots over a reduced parse");
      let ix = NodeIx(p.nodes.len() as u32);
      nd.parent = None;
      for pt in &mut nd.pending {
        pt.descendant = ix;
      }
      p.nodes.push(nd);
      p.roots.push(ix);
    }
    p.refresh();
    p
  }

  fn refresh(&mut self) {
    self.size = self.roots.iter().map(|&r| self.node(r).size).sum();
    self.incorrectness = self
      .roots
      .iter()
      .filter(|&&r| self.node(r).is_failed())
      .count();
    self.pending = self
      .roots
      .iter()
      .filter(|&&r| !self.node(r).pending.is_empty())
      .count();
    let parts: Vec<&str> = self.roots.iter().map(|&r| self.node(r).summary.as_str()).collect();
    self.summary = parts.join(";");
  }
}

impl fmt::Display for Parse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (ix, root) in self.root_refs().into_iter().enumerate() {
      if ix > 0 {
        writeln!(f)?;
      }
      write!(f, "{}", root)?;
    }
    Ok(())
  }
}

fn seed_pending(p: &mut Parse, ix: NodeIx) {
  let tests: Vec<String> = p.node(ix).rule.ancestor_tests().to_vec();
  for test in tests {
    p.node_mut(ix).pending.push(PendingTest {
      test,
      descendant: ix,
    });
  }
}

/// Runs the node's tests in declaration order; the first failure marks the
/// node and short-circuits the rest.
fn run_node_tests(p: &mut Parse, ix: NodeIx, registry: &Registry) {
  let names: Vec<String> = p.node(ix).rule.node_tests().to_vec();
  for name in names {
    let finding = {
      let r = NodeRef::new(&*p, ix);
      (registry.node_test(&name))(r)
    };
    match finding.judgment {
      Judgment::Pass => p.node_mut(ix).attributes.satisfied.push(TestRecord {
        test: name,
        notes: finding.notes,
      }),
      Judgment::Fail => {
        let n = p.node_mut(ix);
        n.failed_test = true;
        n.attributes.failures.push(TestRecord {
          test: name,
          notes: finding.notes,
        });
        break;
      }
      Judgment::Ignore => {}
    }
  }
}

/// Pulls every pending structural test out of the new node's children and
/// tries each against the new node. Undecided tests stay pending on the
/// new node; decided ones are recorded on both ends of the pair.
fn migrate_pending(p: &mut Parse, parent: NodeIx, registry: &Registry) {
  let children: Vec<NodeIx> = p.node(parent).children.clone();
  let mut inherited: Vec<PendingTest> = Vec::new();
  for c in children {
    inherited.extend(std::mem::take(&mut p.node_mut(c).pending));
  }

  let mut still_pending: Vec<PendingTest> = Vec::new();
  for pt in inherited {
    let outcome = {
      let a = NodeRef::new(&*p, parent);
      let d = NodeRef::new(&*p, pt.descendant);
      (registry.ancestor_test(&pt.test))(a, d)
    };
    let Some(finding) = outcome else {
      still_pending.push(pt);
      continue;
    };
    let ancestor_position = p.node(parent).position();
    let descendant_position = p.node(pt.descendant).position();
    match finding.judgment {
      Judgment::Pass => {
        p.node_mut(parent).attributes.satisfied_ancestor.push(LinkRecord {
          test: pt.test.clone(),
          position: descendant_position,
          notes: finding.notes.clone(),
        });
        p.node_mut(pt.descendant)
          .attributes
          .satisfied_descendant
          .push(LinkRecord {
            test: pt.test,
            position: ancestor_position,
            notes: finding.notes,
          });
      }
      Judgment::Fail => {
        let a = p.node_mut(parent);
        a.failed_test = true;
        a.attributes.failed_ancestor.push(LinkRecord {
          test: pt.test.clone(),
          position: descendant_position,
          notes: finding.notes.clone(),
        });
        let d = p.node_mut(pt.descendant);
        d.failed_test = true;
        d.attributes.failed_descendant.push(LinkRecord {
          test: pt.test,
          position: ancestor_position,
          notes: finding.notes,
        });
      }
      Judgment::Ignore => {}
    }
  }
  p.node_mut(parent).pending.extend(still_pending);
}

/// Runs the node's processor, if it has one and every test passed. The
/// stash is lent out for the duration of the call.
fn run_processor(p: &mut Parse, ix: NodeIx, registry: &Registry) {
  if p.node(ix).failed_test {
    return;
  }
  let Some(name) = p.node(ix).rule.process().map(str::to_string) else {
    return;
  };
  let f = registry.processor(&name);
  let mut stash = std::mem::take(&mut p.node_mut(ix).attributes.stash);
  {
    let r = NodeRef::new(&*p, ix);
    f(r, &mut stash);
  }
  p.node_mut(ix).attributes.stash = stash;
}

#[cfg(test)]
mod tests {
  use super::*;
  use regex::Regex;

  fn plain_leaf(name: &str, pattern: &str) -> Rc<Leaf> {
    Rc::new(Leaf {
      name: name.to_string(),
      pattern: Some(Regex::new(pattern).unwrap()),
      ignorable: false,
      boundary: false,
      node_tests: vec![],
      ancestor_tests: vec![],
      preconditions: vec![],
      process: None,
    })
  }

  fn plain_rule(name: &str, atoms: Vec<(&str, u32, Option<u32>)>) -> Rc<Rule> {
    Rc::new(Rule {
      name: name.to_string(),
      body: String::new(),
      subrules: vec![crate::rules::Subrule {
        atoms: atoms
          .into_iter()
          .map(|(s, min, max)| crate::rules::Atom {
            seeking: s.to_string(),
            min,
            max,
            literal: false,
          })
          .collect(),
      }],
      node_tests: vec![],
      ancestor_tests: vec![],
      preconditions: vec![],
      process: None,
    })
  }

  #[test]
  fn test_empty_parse() {
    let p = Parse::empty("".into());
    assert_eq!(p.length(), 0);
    assert_eq!(p.size(), 0);
    assert_eq!(p.summary(), "");
    assert_eq!(p.end(), 0);
  }

  #[test]
  fn test_add_splices_and_memoizes() {
    let registry = Registry::new();
    let a = plain_leaf("a", "a");
    let text: Rc<str> = "aaa".into();
    let mut p = Parse::empty(text);
    for k in 0..3 {
      p = p.with_token(&a, NodeKind::Leaf, k, k + 1, &registry);
    }
    assert_eq!(p.summary(), "a;a;a");
    assert_eq!(p.size(), 3);

    let pair = plain_rule("p", vec![("a", 2, Some(2))]);
    let summary = p.candidate_summary(0, 2, "p");
    assert_eq!(summary, "p[a,a];a");
    let q = p.add(0, 2, &pair, &registry, false, summary).unwrap();

    // the original is untouched
    assert_eq!(p.summary(), "a;a;a");
    assert_eq!(q.summary(), "p[a,a];a");
    assert_eq!(q.length(), 2);
    assert_eq!(q.size(), 4);

    let root = q.root_refs()[0];
    assert_eq!(root.name(), "p");
    assert_eq!(root.height(), 1);
    assert_eq!((root.start(), root.end()), (0, 2));
    assert_eq!(root.children().len(), 2);
    assert!(root.children().iter().all(|c| c.parent() == Some(root)));
  }

  #[test]
  fn test_size_height_position_invariants() {
    let registry = Registry::new();
    let a = plain_leaf("a", "a");
    let text: Rc<str> = "aaaa".into();
    let mut p = Parse::empty(text);
    for k in 0..4 {
      p = p.with_token(&a, NodeKind::Leaf, k, k + 1, &registry);
    }
    let pair = plain_rule("p", vec![("a", 2, Some(2))]);
    let s = p.candidate_summary(0, 2, "p");
    let p = p.add(0, 2, &pair, &registry, false, s).unwrap();
    let s = p.candidate_summary(1, 3, "p");
    let p = p.add(1, 3, &pair, &registry, false, s).unwrap();
    let top = plain_rule("t", vec![("p", 2, Some(2))]);
    let s = p.candidate_summary(0, 2, "t");
    let p = p.add(0, 2, &top, &registry, false, s).unwrap();

    assert_eq!(p.summary(), "t[p[a,a],p[a,a]]");
    for n in p.nodes() {
      if n.is_leaf() {
        assert_eq!(n.size(), 1);
        assert_eq!(n.height(), 0);
      } else {
        let child_sizes: usize = n.children().iter().map(|c| c.size()).sum();
        assert_eq!(n.size(), 1 + child_sizes);
        assert_eq!(n.height(), 1 + n.children()[0].height());
      }
    }
    // positions unique
    let mut seen = std::collections::HashSet::new();
    for n in p.nodes() {
      assert!(seen.insert(n.position()), "duplicate position {:?}", n.position());
    }
    // roots cover the text without gap or overlap
    let roots = p.root_refs();
    assert_eq!(roots[0].start(), 0);
    assert_eq!(roots[roots.len() - 1].end(), 4);
    for w in roots.windows(2) {
      assert_eq!(w[0].end(), w[1].start());
    }
  }

  #[test]
  fn test_unary_loop_refusal() {
    let registry = Registry::new();
    let a = plain_leaf("x", "x");
    let text: Rc<str> = "x".into();
    let p = Parse::empty(text).with_token(&a, NodeKind::Leaf, 0, 1, &registry);
    let wrap = plain_rule("w", vec![("x", 1, Some(1))]);
    let s = p.candidate_summary(0, 1, "w");
    let p = p.add(0, 1, &wrap, &registry, true, s).unwrap();
    // w over w repeats the spine name
    let rewrap = plain_rule("w", vec![("w", 1, Some(1))]);
    let s = p.candidate_summary(0, 1, "w");
    assert!(p.add(0, 1, &rewrap, &registry, true, s).is_none());
    // a differently-named wrapper is fine
    let v = plain_rule("v", vec![("w", 1, Some(1))]);
    let s = p.candidate_summary(0, 1, "v");
    assert!(p.add(0, 1, &v, &registry, true, s).is_some());
  }

  #[test]
  fn test_merge_remaps_indices() {
    let registry = Registry::new();
    let a = plain_leaf("a", "a");
    let b = plain_leaf("b", "b");
    let text: Rc<str> = "ab".into();
    let left = Parse::empty(text.clone()).with_token(&a, NodeKind::Leaf, 0, 1, &registry);
    let right = Parse::empty(text).with_token(&b, NodeKind::Leaf, 1, 2, &registry);
    let merged = Parse::merge(&[&left, &right]);
    assert_eq!(merged.summary(), "a;b");
    assert_eq!(merged.length(), 2);
    assert_eq!(merged.root_refs()[1].text(), "b");
  }
}
