use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde_json::Value;

use crate::error::GrammarError;
use crate::node::{NodeRef, Stash};

/// What a test decided about a node (or an ancestor/descendant pair).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Judgment {
  Pass,
  Fail,
  /// The test chose not to weigh in; nothing is recorded.
  Ignore,
}

impl FromStr for Judgment {
  type Err = GrammarError;

  /// The bridge for embedders whose predicate results arrive as strings
  /// (a scripting layer, a config file). Anything but `pass`, `fail` or
  /// `ignore` is an `UnexpectedTestResult`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pass" => Ok(Self::Pass),
      "fail" => Ok(Self::Fail),
      "ignore" => Ok(Self::Ignore),
      other => Err(GrammarError::UnexpectedTestResult(other.to_string())),
    }
  }
}

impl fmt::Display for Judgment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Pass => write!(f, "pass"),
      Self::Fail => write!(f, "fail"),
      Self::Ignore => write!(f, "ignore"),
    }
  }
}

/// A judgment plus whatever extra information the test wants recorded
/// alongside it in the node's attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
  pub judgment: Judgment,
  pub notes: Vec<Value>,
}

impl Finding {
  pub fn pass() -> Self {
    Judgment::Pass.into()
  }

  pub fn fail() -> Self {
    Judgment::Fail.into()
  }

  pub fn ignore() -> Self {
    Judgment::Ignore.into()
  }

  pub fn noted(judgment: Judgment, notes: Vec<Value>) -> Self {
    Self { judgment, notes }
  }
}

impl From<Judgment> for Finding {
  fn from(judgment: Judgment) -> Self {
    Self {
      judgment,
      notes: Vec::new(),
    }
  }
}

pub type NodeTestFn = Rc<dyn Fn(NodeRef<'_>) -> Finding>;
/// Returns `None` while the test cannot yet decide; it then stays pending
/// and is retried against each successive ancestor.
pub type AncestorTestFn = Rc<dyn Fn(NodeRef<'_>, NodeRef<'_>) -> Option<Finding>>;
/// `(name, start, end, text, prospective_children) -> accept?`
pub type PreconditionFn = Rc<dyn Fn(&str, usize, usize, &str, &[NodeRef<'_>]) -> bool>;
/// Runs after a node passed all its tests; may stash attributes on it.
pub type ProcessorFn = Rc<dyn Fn(NodeRef<'_>, &mut Stash)>;

#[derive(Clone)]
pub enum Predicate {
  NodeTest(NodeTestFn),
  AncestorTest(AncestorTestFn),
  Precondition(PreconditionFn),
  Processor(ProcessorFn),
}

impl Predicate {
  pub fn role(&self) -> &'static str {
    match self {
      Self::NodeTest(_) => "node test",
      Self::AncestorTest(_) => "structural test",
      Self::Precondition(_) => "precondition",
      Self::Processor(_) => "processor",
    }
  }
}

impl fmt::Debug for Predicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Predicate::{}", self.role())
  }
}

/// Name-keyed store of every predicate the grammar knows. Rules and leaves
/// carry predicate *names*; dispatch goes through here so the compiled
/// grammar stays plain data.
#[derive(Default, Clone)]
pub struct Registry {
  by_name: HashMap<String, Predicate>,
}

impl Registry {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn insert(&mut self, name: &str, predicate: Predicate) -> Result<(), GrammarError> {
    if self.by_name.contains_key(name) {
      return Err(GrammarError::DuplicateDefinition(name.to_string()));
    }
    self.by_name.insert(name.to_string(), predicate);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&Predicate> {
    self.by_name.get(name)
  }

  /// Cloned handle; panics only on registry/commit bugs, since commit
  /// resolved every name before the first parse.
  pub fn node_test(&self, name: &str) -> NodeTestFn {
    match self.by_name.get(name) {
      Some(Predicate::NodeTest(f)) => f.clone(),
      _ => panic!("unresolved node test {:?}", name),
    }
  }

  pub fn ancestor_test(&self, name: &str) -> AncestorTestFn {
    match self.by_name.get(name) {
      Some(Predicate::AncestorTest(f)) => f.clone(),
      _ => panic!("unresolved structural test {:?}", name),
    }
  }

  pub fn precondition(&self, name: &str) -> PreconditionFn {
    match self.by_name.get(name) {
      Some(Predicate::Precondition(f)) => f.clone(),
      _ => panic!("unresolved precondition {:?}", name),
    }
  }

  pub fn processor(&self, name: &str) -> ProcessorFn {
    match self.by_name.get(name) {
      Some(Predicate::Processor(f)) => f.clone(),
      _ => panic!("unresolved processor {:?}", name),
    }
  }
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<_> = self.by_name.keys().collect();
    names.sort();
    f.debug_struct("Registry").field("names", &names).finish()
  }
}

#[test]
fn test_judgment_from_str() {
  assert_eq!("pass".parse::<Judgment>().unwrap(), Judgment::Pass);
  assert_eq!("fail".parse::<Judgment>().unwrap(), Judgment::Fail);
  assert_eq!("ignore".parse::<Judgment>().unwrap(), Judgment::Ignore);
  assert_eq!(
    "maybe".parse::<Judgment>().unwrap_err(),
    GrammarError::UnexpectedTestResult("maybe".to_string())
  );
}
