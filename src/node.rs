use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::parse::Parse;
use crate::rules::{Leaf, RuleRef};

/// Index type for a parse's node arena
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeIx(pub u32);

impl NodeIx {
  pub fn ix(self) -> usize {
    self.0 as usize
  }
}

/// `(start, height)`: unique within a parse and stable across the clones
/// that reductions make, so it serves as a node's public identity.
pub type Position = (usize, u32);

/// User-stashed attributes, written by processors.
pub type Stash = HashMap<String, Value>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
  /// A token matched by a leaf pattern.
  Leaf,
  /// A nonterminal with children.
  Branch,
  /// Characters no leaf matched. Erroneous, and a boundary.
  Trash,
  /// A token of a boundary leaf; splits the input into segments.
  Boundary,
}

/// A node test's verdict, recorded on the node it judged.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
  pub test: String,
  pub notes: Vec<Value>,
}

/// A structural test's verdict, recorded on both ends of the pair;
/// `position` names the other node.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
  pub test: String,
  pub position: Position,
  pub notes: Vec<Value>,
}

/// Everything the engine records about a node, plus the user stash.
/// The record groups are reserved; the stash is free for processors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
  pub satisfied: Vec<TestRecord>,
  pub failures: Vec<TestRecord>,
  pub satisfied_ancestor: Vec<LinkRecord>,
  pub failed_ancestor: Vec<LinkRecord>,
  pub satisfied_descendant: Vec<LinkRecord>,
  pub failed_descendant: Vec<LinkRecord>,
  pub stash: Stash,
}

/// A structural test waiting for an ancestor it can decide against. Held
/// by the descendant's current outermost wrapper; migrates upward each
/// time that wrapper becomes someone's child.
#[derive(Debug, Clone)]
pub struct PendingTest {
  pub test: String,
  /// The node the test is about. Arena indices survive parse cloning.
  pub descendant: NodeIx,
}

#[derive(Debug, Clone)]
pub struct NodeData {
  pub rule: RuleRef,
  pub kind: NodeKind,
  pub start: usize,
  pub end: usize,
  pub children: Vec<NodeIx>,
  pub parent: Option<NodeIx>,
  /// A node test failed here, or a structural test failed at this node.
  pub failed_test: bool,
  pub height: u32,
  pub size: usize,
  pub summary: String,
  pub attributes: Attributes,
  pub pending: Vec<PendingTest>,
}

impl NodeData {
  /// A fresh token node. Branch nodes are assembled by `Parse::add`.
  pub fn token(leaf: &Rc<Leaf>, kind: NodeKind, start: usize, end: usize) -> Self {
    Self {
      rule: RuleRef::Leaf(leaf.clone()),
      kind,
      start,
      end,
      children: Vec::new(),
      parent: None,
      failed_test: false,
      height: 0,
      size: 1,
      summary: leaf.name.clone(),
      attributes: Attributes::default(),
      pending: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    self.rule.name()
  }

  pub fn position(&self) -> Position {
    (self.start, self.height)
  }

  /// May this node become a child of another node? Boundaries and trash
  /// may not; they stay roots forever.
  pub fn is_traversible(&self) -> bool {
    !matches!(self.kind, NodeKind::Trash | NodeKind::Boundary)
  }

  pub fn is_ignorable(&self) -> bool {
    match &self.rule {
      RuleRef::Leaf(l) => l.ignorable,
      RuleRef::Rule(_) => false,
    }
  }

  pub fn is_trash(&self) -> bool {
    self.kind == NodeKind::Trash
  }

  /// Trash counts as a boundary: nothing may traverse it.
  pub fn is_boundary(&self) -> bool {
    matches!(self.kind, NodeKind::Trash | NodeKind::Boundary)
  }

  /// Erroneous or predicate-failed; such a root makes its parse incorrect.
  pub fn is_failed(&self) -> bool {
    self.failed_test || self.is_trash()
  }

  pub fn is_significant(&self) -> bool {
    !self.is_ignorable() && self.is_traversible()
  }
}

/// A borrowed view of one node within its parse; the unit all predicates
/// and traversal work with.
#[derive(Copy, Clone)]
pub struct NodeRef<'a> {
  pub(crate) parse: &'a Parse,
  pub(crate) ix: NodeIx,
}

impl<'a> NodeRef<'a> {
  pub(crate) fn new(parse: &'a Parse, ix: NodeIx) -> Self {
    Self { parse, ix }
  }

  fn data(self) -> &'a NodeData {
    self.parse.node(self.ix)
  }

  pub fn name(self) -> &'a str {
    self.data().name()
  }

  pub fn start(self) -> usize {
    self.data().start
  }

  pub fn end(self) -> usize {
    self.data().end
  }

  pub fn height(self) -> u32 {
    self.data().height
  }

  pub fn size(self) -> usize {
    self.data().size
  }

  pub fn position(self) -> Position {
    self.data().position()
  }

  pub fn summary(self) -> &'a str {
    &self.data().summary
  }

  pub fn kind(self) -> NodeKind {
    self.data().kind
  }

  pub fn attributes(self) -> &'a Attributes {
    &self.data().attributes
  }

  /// A user-stashed attribute, if a processor put one there.
  pub fn attribute(self, key: &str) -> Option<&'a Value> {
    self.data().attributes.stash.get(key)
  }

  pub fn text(self) -> &'a str {
    &self.parse.text()[self.start()..self.end()]
  }

  pub fn text_before(self) -> &'a str {
    &self.parse.text()[..self.start()]
  }

  pub fn text_after(self) -> &'a str {
    &self.parse.text()[self.end()..]
  }

  pub fn full_text(self) -> &'a str {
    self.parse.text()
  }

  pub fn children(self) -> Vec<NodeRef<'a>> {
    self
      .data()
      .children
      .iter()
      .map(|&c| NodeRef::new(self.parse, c))
      .collect()
  }

  pub fn parent(self) -> Option<NodeRef<'a>> {
    self.data().parent.map(|p| NodeRef::new(self.parse, p))
  }

  /// The outermost ancestor; self if unattached.
  pub fn root(self) -> NodeRef<'a> {
    let mut node = self;
    while let Some(p) = node.parent() {
      node = p;
    }
    node
  }

  pub fn depth(self) -> usize {
    self.ancestors().len()
  }

  /// Parents up to the root, nearest first.
  pub fn ancestors(self) -> Vec<NodeRef<'a>> {
    let mut out = Vec::new();
    let mut node = self;
    while let Some(p) = node.parent() {
      out.push(p);
      node = p;
    }
    out
  }

  /// The subtree below this node, document order, excluding self.
  pub fn descendants(self) -> Vec<NodeRef<'a>> {
    let mut out = Vec::new();
    for child in self.children() {
      out.push(child);
      out.extend(child.descendants());
    }
    out
  }

  /// Self plus descendants, document order.
  pub fn subtree(self) -> Vec<NodeRef<'a>> {
    let mut out = vec![self];
    out.extend(self.descendants());
    out
  }

  /// The leaf tokens of the subtree, left to right. Trash and boundary
  /// nodes are not leaves.
  pub fn leaves(self) -> Vec<NodeRef<'a>> {
    self.subtree().into_iter().filter(|n| n.is_leaf()).collect()
  }

  /// All nodes of the parse lying entirely before this node.
  pub fn prior(self) -> Vec<NodeRef<'a>> {
    let start = self.start();
    self
      .parse
      .nodes()
      .into_iter()
      .filter(|n| n.end() <= start)
      .collect()
  }

  /// All nodes of the parse lying entirely after this node.
  pub fn later(self) -> Vec<NodeRef<'a>> {
    let end = self.end();
    self
      .parse
      .nodes()
      .into_iter()
      .filter(|n| n.start() >= end)
      .collect()
  }

  /// Co-children of this node's parent (or co-roots), self included.
  fn cohort(self) -> Vec<NodeRef<'a>> {
    match self.parent() {
      Some(p) => p.children(),
      None => self.parse.root_refs(),
    }
  }

  pub fn sibling_index(self) -> usize {
    self
      .cohort()
      .iter()
      .position(|n| n.ix == self.ix)
      .expect("node missing from its own cohort")
  }

  pub fn siblings(self) -> Vec<NodeRef<'a>> {
    self.cohort().into_iter().filter(|n| n.ix != self.ix).collect()
  }

  pub fn prior_siblings(self) -> Vec<NodeRef<'a>> {
    let ix = self.sibling_index();
    self.cohort().into_iter().take(ix).collect()
  }

  pub fn later_siblings(self) -> Vec<NodeRef<'a>> {
    let ix = self.sibling_index();
    self.cohort().into_iter().skip(ix + 1).collect()
  }

  pub fn is_first_child(self) -> bool {
    self.sibling_index() == 0
  }

  pub fn is_last_child(self) -> bool {
    self.sibling_index() + 1 == self.cohort().len()
  }

  pub fn contains(self, offset: usize) -> bool {
    self.start() <= offset && offset < self.end()
  }

  /// Find a node by position within this subtree.
  pub fn find(self, position: Position) -> Option<NodeRef<'a>> {
    self.subtree().into_iter().find(|n| n.position() == position)
  }

  pub fn is_leaf(self) -> bool {
    self.data().kind == NodeKind::Leaf
  }

  pub fn is_branch(self) -> bool {
    self.data().kind == NodeKind::Branch
  }

  pub fn is_ignorable(self) -> bool {
    self.data().is_ignorable()
  }

  pub fn is_trash(self) -> bool {
    self.data().is_trash()
  }

  pub fn is_boundary(self) -> bool {
    self.data().is_boundary()
  }

  pub fn is_traversible(self) -> bool {
    self.data().is_traversible()
  }

  /// Not ignorable and not a boundary: the nodes reductions care about.
  pub fn is_significant(self) -> bool {
    !self.is_ignorable() && self.is_traversible()
  }

  pub fn is_error(self) -> bool {
    self.is_trash()
  }

  pub fn has_failed(self) -> bool {
    self.data().failed_test
  }

  pub fn has_pending_tests(self) -> bool {
    !self.data().pending.is_empty()
  }
}

impl PartialEq for NodeRef<'_> {
  fn eq(&self, other: &Self) -> bool {
    std::ptr::eq(self.parse, other.parse) && self.ix == other.ix
  }
}

impl fmt::Debug for NodeRef<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NodeRef")
      .field("name", &self.name())
      .field("span", &(self.start()..self.end()))
      .field("kind", &self.kind())
      .finish()
  }
}

impl fmt::Display for NodeRef<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // trash and boundary tokens render like leaves: a span with text
    if !self.is_branch() {
      write!(f, "{} {}..{} {:?}", self.name(), self.start(), self.end(), self.text())?;
      if self.has_failed() {
        write!(f, " !")?;
      }
      Ok(())
    } else {
      write!(f, "({} {}..{}", self.name(), self.start(), self.end())?;
      if self.has_failed() {
        write!(f, " !")?;
      }
      for child in self.children() {
        let fmt = format!("{}", child);
        for line in fmt.lines() {
          write!(f, "\n  {}", line)?;
        }
      }
      write!(f, ")")
    }
  }
}
