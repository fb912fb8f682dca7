use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use crate::rules::Rule;

/// Could some chain of single-node reductions produce a node whose unary
/// spine repeats a name? Decided once, before the first parse; when true,
/// every `Parse::add` gets the unary-spine check turned on.
///
/// Candidate links come from alternatives that can consume a single node
/// (`Σ min < 2`): each gives edges from the symbols it seeks to the rule's
/// name. Chains of edges are chased, each carrying the set of names it has
/// passed through; reaching a name already in the set proves a cycle.
pub fn has_unary_cycle(rules: &HashMap<String, Rc<Rule>>) -> bool {
  let mut edges: Vec<(String, String)> = Vec::new();
  for rule in rules.values() {
    edges.extend(rule.branches());
  }

  let mut work: Vec<(BTreeSet<String>, String)> = Vec::new();
  let mut seen: HashSet<(String, String)> = HashSet::new();
  for (from, to) in &edges {
    if from == to {
      debug!(rule = %to, "unary cycle (self-loop)");
      return true;
    }
    let mut visited = BTreeSet::new();
    visited.insert(from.clone());
    visited.insert(to.clone());
    if seen.insert((joined(&visited), to.clone())) {
      work.push((visited, to.clone()));
    }
  }

  while let Some((visited, sought)) = work.pop() {
    for (from, to) in &edges {
      if *from != sought {
        continue;
      }
      if visited.contains(to) {
        debug!(rule = %to, "unary cycle");
        return true;
      }
      let mut extended = visited.clone();
      extended.insert(to.clone());
      if seen.insert((joined(&extended), to.clone())) {
        work.push((extended, to.clone()));
      }
    }
  }
  false
}

fn joined(set: &BTreeSet<String>) -> String {
  set.iter().map(String::as_str).collect::<Vec<_>>().join("\u{0}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rules::{Atom, Subrule};

  fn rule(name: &str, atoms: Vec<(&str, u32)>) -> (String, Rc<Rule>) {
    (
      name.to_string(),
      Rc::new(Rule {
        name: name.to_string(),
        body: String::new(),
        subrules: vec![Subrule {
          atoms: atoms
            .into_iter()
            .map(|(s, min)| Atom {
              seeking: s.to_string(),
              min,
              max: Some(1),
              literal: false,
            })
            .collect(),
        }],
        node_tests: vec![],
        ancestor_tests: vec![],
        preconditions: vec![],
        process: None,
      }),
    )
  }

  #[test]
  fn test_mutual_unary_cycle() {
    let rules: HashMap<_, _> = vec![rule("a", vec![("b", 1)]), rule("b", vec![("a", 1)])]
      .into_iter()
      .collect();
    assert!(has_unary_cycle(&rules));
  }

  #[test]
  fn test_self_loop() {
    // a -> a? b? can reduce a lone `a` to another `a`
    let rules: HashMap<_, _> = vec![(
      "a".to_string(),
      Rc::new(Rule {
        name: "a".to_string(),
        body: String::new(),
        subrules: vec![Subrule {
          atoms: vec![
            Atom {
              seeking: "a".to_string(),
              min: 0,
              max: Some(1),
              literal: false,
            },
            Atom {
              seeking: "b".to_string(),
              min: 0,
              max: Some(1),
              literal: false,
            },
          ],
        }],
        node_tests: vec![],
        ancestor_tests: vec![],
        preconditions: vec![],
        process: None,
      }),
    )]
    .into_iter()
    .collect();
    assert!(has_unary_cycle(&rules));
  }

  #[test]
  fn test_no_cycle() {
    // unary but acyclic: a -> b, and a binary rule over a
    let rules: HashMap<_, _> = vec![rule("a", vec![("b", 1)]), rule("s", vec![("a", 1), ("a", 1)])]
      .into_iter()
      .collect();
    assert!(!has_unary_cycle(&rules));
  }

  #[test]
  fn test_three_step_cycle() {
    let rules: HashMap<_, _> = vec![
      rule("a", vec![("b", 1)]),
      rule("b", vec![("c", 1)]),
      rule("c", vec![("a", 1)]),
    ]
    .into_iter()
    .collect();
    assert!(has_unary_cycle(&rules));
  }
}
