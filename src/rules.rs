use std::fmt;
use std::rc::Rc;

use regex::Regex;

use crate::parse::Parse;

/// An atom seeking unbounded repetition still has to sort somewhere in the
/// greediness order; this is the consumption it is credited with.
const UNBOUNDED_CREDIT: u32 = 10;

/// One repetition-annotated element of a rule body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
  /// The rule or leaf name this atom consumes.
  pub seeking: String,
  pub min: u32,
  /// `None` means unbounded (`*`, `+`, `{n,}`).
  pub max: Option<u32>,
  /// Quoted in the rule body; induces an auto-leaf of the same name.
  pub literal: bool,
}

impl Atom {
  fn credit(&self) -> u32 {
    self.max.unwrap_or(UNBOUNDED_CREDIT)
  }
}

impl fmt::Display for Atom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.literal {
      write!(f, "\"{}\"", self.seeking)?;
    } else {
      write!(f, "{}", self.seeking)?;
    }
    match (self.min, self.max) {
      (1, Some(1)) => Ok(()),
      (0, Some(1)) => write!(f, "?"),
      (0, None) => write!(f, "*"),
      (1, None) => write!(f, "+"),
      (n, Some(m)) if n == m => write!(f, "{{{}}}", n),
      (n, None) => write!(f, "{{{},}}", n),
      (n, Some(m)) => write!(f, "{{{},{}}}", n, m),
    }
  }
}

/// One alternative of a rule body: an ordered atom sequence. The source
/// model chains atoms through `next` pointers; here the successor is the
/// next index in the vec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrule {
  pub atoms: Vec<Atom>,
}

impl Subrule {
  /// Fewest nodes this alternative can consume.
  pub fn min_consumption(&self) -> u32 {
    self.atoms.iter().map(|a| a.min).sum()
  }

  /// Greedy-ordering key for a match starting at `from`: the summed
  /// consumption credit of that atom and everything after it.
  pub fn max_consumption(&self, from: usize) -> u32 {
    self.atoms[from..].iter().map(Atom::credit).sum()
  }

  /// Indices of the atoms a match may begin with: the first atom and each
  /// successor up to and including the first required one.
  pub fn starter_indices(&self) -> Vec<usize> {
    let mut out = Vec::new();
    for (ix, atom) in self.atoms.iter().enumerate() {
      out.push(ix);
      if atom.min > 0 {
        break;
      }
    }
    out
  }

  /// Attempt to match the atom chain beginning at atom `from` against the
  /// parse's roots beginning at root `offset`. Returns the exclusive end
  /// offset of the match.
  ///
  /// Each atom greedily counts consecutive roots that bear its sought name
  /// (skipping ignorable tokens), bounded by `max`; it fails if it cannot
  /// reach `min`. An atom matching zero nodes neither advances nor fails,
  /// and consumes no leading ignorables.
  pub fn match_from(&self, from: usize, parse: &Parse, offset: usize) -> Option<usize> {
    let roots = parse.roots();
    let mut pos = offset;
    for atom in &self.atoms[from..] {
      let mut count: u32 = 0;
      let mut scan = pos;
      let mut end = pos;
      while scan < roots.len() {
        let node = parse.node(roots[scan]);
        if node.is_ignorable() && !node.failed_test {
          scan += 1;
          continue;
        }
        let wanted = node.name() == atom.seeking && node.is_traversible() && !node.failed_test;
        if wanted && atom.max.map_or(true, |m| count < m) {
          count += 1;
          scan += 1;
          end = scan;
          continue;
        }
        break;
      }
      if count < atom.min {
        return None;
      }
      pos = end;
    }
    Some(pos)
  }
}

impl fmt::Display for Subrule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (ix, atom) in self.atoms.iter().enumerate() {
      if ix > 0 {
        write!(f, " ")?;
      }
      write!(f, "{}", atom)?;
    }
    Ok(())
  }
}

/// A nonterminal production: one or more alternatives sharing a name and a
/// predicate set. Predicates are stored by name and resolved against the
/// grammar's registry at commit.
#[derive(Debug, Clone)]
pub struct Rule {
  pub name: String,
  pub body: String,
  pub subrules: Vec<Subrule>,
  pub node_tests: Vec<String>,
  pub ancestor_tests: Vec<String>,
  pub preconditions: Vec<String>,
  pub process: Option<String>,
}

impl Rule {
  /// `(from_symbol, to_name)` edges for the unary-cycle check: any
  /// alternative that could consume a single node makes this rule a
  /// candidate link from each symbol it seeks.
  pub fn branches(&self) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for sub in &self.subrules {
      if sub.min_consumption() < 2 {
        for atom in &sub.atoms {
          out.push((atom.seeking.clone(), self.name.clone()));
        }
      }
    }
    out
  }

  /// Unique literal atom texts, each of which induces an auto-leaf.
  pub fn literals(&self) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sub in &self.subrules {
      for atom in &sub.atoms {
        if atom.literal && !out.contains(&atom.seeking) {
          out.push(atom.seeking.clone());
        }
      }
    }
    out
  }

  /// Every symbol this rule's atoms consume; drives the completeness check.
  pub fn seeking(&self) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for sub in &self.subrules {
      for atom in &sub.atoms {
        if !out.contains(&atom.seeking.as_str()) {
          out.push(&atom.seeking);
        }
      }
    }
    out
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ->", self.name)?;
    for (ix, sub) in self.subrules.iter().enumerate() {
      if ix > 0 {
        write!(f, " |")?;
      }
      write!(f, " {}", sub)?;
    }
    Ok(())
  }
}

/// A terminal production. `pattern` is `None` only for the internal trash
/// leaf that boxes unmatched characters.
#[derive(Debug, Clone)]
pub struct Leaf {
  pub name: String,
  pub pattern: Option<Regex>,
  pub ignorable: bool,
  pub boundary: bool,
  pub node_tests: Vec<String>,
  pub ancestor_tests: Vec<String>,
  pub preconditions: Vec<String>,
  pub process: Option<String>,
}

impl Leaf {
  pub fn is_trash(&self) -> bool {
    self.pattern.is_none()
  }
}

impl fmt::Display for Leaf {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.pattern {
      Some(p) => write!(f, "{} => /{}/", self.name, p.as_str()),
      None => write!(f, "{} (trash)", self.name),
    }
  }
}

/// What produced a node: a leaf for tokens, a rule for branches.
#[derive(Debug, Clone)]
pub enum RuleRef {
  Rule(Rc<Rule>),
  Leaf(Rc<Leaf>),
}

impl RuleRef {
  pub fn name(&self) -> &str {
    match self {
      Self::Rule(r) => &r.name,
      Self::Leaf(l) => &l.name,
    }
  }

  pub fn ancestor_tests(&self) -> &[String] {
    match self {
      Self::Rule(r) => &r.ancestor_tests,
      Self::Leaf(l) => &l.ancestor_tests,
    }
  }

  pub fn node_tests(&self) -> &[String] {
    match self {
      Self::Rule(r) => &r.node_tests,
      Self::Leaf(l) => &l.node_tests,
    }
  }

  pub fn process(&self) -> Option<&str> {
    match self {
      Self::Rule(r) => r.process.as_deref(),
      Self::Leaf(l) => l.process.as_deref(),
    }
  }
}

/// A starter table entry: a possible first child symbol pointing into the
/// atom chain that may begin consuming there.
#[derive(Debug, Clone)]
pub struct Starter {
  pub rule: Rc<Rule>,
  pub sub: usize,
  pub atom: usize,
  /// `max_consumption` from the starting atom; starters sort descending on
  /// this so the engine prefers atoms that can consume more.
  pub greed: u32,
}

impl Starter {
  pub fn new(rule: &Rc<Rule>, sub: usize, atom: usize) -> Self {
    let greed = rule.subrules[sub].max_consumption(atom);
    Self {
      rule: rule.clone(),
      sub,
      atom,
      greed,
    }
  }

  pub fn match_at(&self, parse: &Parse, offset: usize) -> Option<usize> {
    self.rule.subrules[self.sub].match_from(self.atom, parse, offset)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn atom(seeking: &str, min: u32, max: Option<u32>) -> Atom {
    Atom {
      seeking: seeking.to_string(),
      min,
      max,
      literal: false,
    }
  }

  #[test]
  fn test_starter_indices_stop_at_first_required() {
    let sub = Subrule {
      atoms: vec![
        atom("a", 0, Some(1)),
        atom("b", 0, None),
        atom("c", 1, Some(1)),
        atom("d", 1, Some(1)),
      ],
    };
    assert_eq!(sub.starter_indices(), vec![0, 1, 2]);
  }

  #[test]
  fn test_max_consumption_is_a_suffix_sum() {
    let sub = Subrule {
      atoms: vec![atom("a", 1, Some(2)), atom("b", 0, None), atom("c", 1, Some(1))],
    };
    assert_eq!(sub.max_consumption(0), 2 + 10 + 1);
    assert_eq!(sub.max_consumption(1), 10 + 1);
    assert_eq!(sub.max_consumption(2), 1);
  }

  #[test]
  fn test_display_round_trips_suffixes() {
    let sub = Subrule {
      atoms: vec![
        atom("a", 0, Some(1)),
        atom("b", 0, None),
        atom("c", 1, None),
        atom("d", 2, Some(2)),
        atom("e", 2, None),
        atom("f", 2, Some(3)),
      ],
    };
    assert_eq!(sub.to_string(), "a? b* c+ d{2} e{2,} f{2,3}");
  }
}
