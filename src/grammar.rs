use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use regex::Regex;
use tracing::debug;

use crate::error::GrammarError;
use crate::loopcheck::has_unary_cycle;
use crate::node::{NodeRef, Stash};
use crate::parse::Parse;
use crate::parse_body::parse_body;
use crate::predicates::{Finding, Predicate, Registry};
use crate::rules::{Leaf, Rule, Starter, Subrule};
use crate::search::{DEFAULT_FILTERS, Filter};
use crate::segment;

/// Optional parts of a rule or leaf declaration: names of tests (node or
/// structural; they are told apart at commit), preconditions, and at most
/// one processor, all resolved against the grammar's registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOpts {
  pub tests: Vec<String>,
  pub preconditions: Vec<String>,
  pub process: Option<String>,
}

#[derive(Debug, Clone)]
struct RuleDef {
  name: String,
  body: String,
  subrules: Vec<Subrule>,
  opts: RuleOpts,
}

#[derive(Debug, Clone)]
struct LeafDef {
  name: String,
  pattern: String,
  ignorable: bool,
  boundary: bool,
  opts: RuleOpts,
}

/// The read-only form a grammar takes after commit: rules by name, the lex
/// table, the starter index, and the unary-loop flag.
#[derive(Debug)]
pub struct Compiled {
  pub(crate) rules: HashMap<String, Rc<Rule>>,
  pub(crate) leaves: Vec<Rc<Leaf>>,
  pub(crate) trash: Rc<Leaf>,
  pub(crate) starters: HashMap<String, Vec<Starter>>,
  pub(crate) unary_branch_check: bool,
}

/// A grammar under construction, and, once it has parsed anything, a
/// frozen one. Declarations accumulate until the first parse; commit then
/// checks the whole and compiles the tables.
#[derive(Default)]
pub struct Grammar {
  rule_defs: Vec<RuleDef>,
  leaf_defs: Vec<LeafDef>,
  registry: Registry,
  keep_ws: bool,
  compiled: Option<Compiled>,
}

impl Grammar {
  pub fn new() -> Self {
    Default::default()
  }

  fn unfrozen(&self) -> Result<(), GrammarError> {
    if self.compiled.is_some() {
      Err(GrammarError::FrozenAfterParse)
    } else {
      Ok(())
    }
  }

  /// Declare a nonterminal rule. Redeclaring an identical rule is a no-op;
  /// a conflicting redeclaration is an error.
  pub fn rule(&mut self, name: &str, body: &str) -> Result<(), GrammarError> {
    self.rule_with(name, body, RuleOpts::default())
  }

  pub fn rule_with(&mut self, name: &str, body: &str, opts: RuleOpts) -> Result<(), GrammarError> {
    self.unfrozen()?;
    let subrules = parse_body(name, body)?;
    if let Some(existing) = self.rule_defs.iter().find(|d| d.name == name) {
      if existing.body == body && existing.opts == opts {
        return Ok(());
      }
      return Err(GrammarError::DuplicateDefinition(name.to_string()));
    }
    self.rule_defs.push(RuleDef {
      name: name.to_string(),
      body: body.to_string(),
      subrules,
      opts,
    });
    Ok(())
  }

  /// Declare a terminal matched by `pattern`. Several leaves may share a
  /// name (alternative lexings of one symbol), and a leaf may share a
  /// rule's name; that is how self-growing rules like `a -> a a` over a
  /// leaf `a` are written.
  pub fn leaf(&mut self, name: &str, pattern: &str) -> Result<(), GrammarError> {
    self.leaf_with(name, pattern, RuleOpts::default())
  }

  pub fn leaf_with(&mut self, name: &str, pattern: &str, opts: RuleOpts) -> Result<(), GrammarError> {
    self.declare_leaf(name, pattern, false, false, opts)
  }

  /// A leaf atom matching skips over: whitespace, comments.
  pub fn ignore(&mut self, name: &str, pattern: &str) -> Result<(), GrammarError> {
    self.ignore_with(name, pattern, RuleOpts::default())
  }

  pub fn ignore_with(&mut self, name: &str, pattern: &str, opts: RuleOpts) -> Result<(), GrammarError> {
    self.declare_leaf(name, pattern, true, false, opts)
  }

  /// A leaf that may not become a child of anything and splits the input
  /// into independently parsed segments: sentence stops, blank lines.
  pub fn boundary(&mut self, name: &str, pattern: &str) -> Result<(), GrammarError> {
    self.boundary_with(name, pattern, RuleOpts::default())
  }

  pub fn boundary_with(&mut self, name: &str, pattern: &str, opts: RuleOpts) -> Result<(), GrammarError> {
    self.declare_leaf(name, pattern, false, true, opts)
  }

  fn declare_leaf(
    &mut self,
    name: &str,
    pattern: &str,
    ignorable: bool,
    boundary: bool,
    opts: RuleOpts,
  ) -> Result<(), GrammarError> {
    self.unfrozen()?;
    Regex::new(pattern).map_err(|source| GrammarError::BadPattern {
      name: name.to_string(),
      source,
    })?;
    let dup = self.leaf_defs.iter().any(|d| {
      d.name == name
        && d.pattern == pattern
        && d.ignorable == ignorable
        && d.boundary == boundary
        && d.opts == opts
    });
    if dup {
      return Ok(());
    }
    self.leaf_defs.push(LeafDef {
      name: name.to_string(),
      pattern: pattern.to_string(),
      ignorable,
      boundary,
      opts,
    });
    Ok(())
  }

  /// Suppress the automatic ignorable whitespace leaf.
  pub fn keep_whitespace(&mut self) -> Result<(), GrammarError> {
    self.unfrozen()?;
    self.keep_ws = true;
    Ok(())
  }

  pub fn node_test<F>(&mut self, name: &str, f: F) -> Result<(), GrammarError>
  where
    F: Fn(NodeRef<'_>) -> Finding + 'static,
  {
    self.unfrozen()?;
    self.registry.insert(name, Predicate::NodeTest(Rc::new(f)))
  }

  pub fn ancestor_test<F>(&mut self, name: &str, f: F) -> Result<(), GrammarError>
  where
    F: Fn(NodeRef<'_>, NodeRef<'_>) -> Option<Finding> + 'static,
  {
    self.unfrozen()?;
    self.registry.insert(name, Predicate::AncestorTest(Rc::new(f)))
  }

  pub fn precondition<F>(&mut self, name: &str, f: F) -> Result<(), GrammarError>
  where
    F: Fn(&str, usize, usize, &str, &[NodeRef<'_>]) -> bool + 'static,
  {
    self.unfrozen()?;
    self.registry.insert(name, Predicate::Precondition(Rc::new(f)))
  }

  pub fn processor<F>(&mut self, name: &str, f: F) -> Result<(), GrammarError>
  where
    F: Fn(NodeRef<'_>, &mut Stash) + 'static,
  {
    self.unfrozen()?;
    self.registry.insert(name, Predicate::Processor(Rc::new(f)))
  }

  /// Check the whole grammar and build the parse tables. Runs implicitly
  /// on the first parse; idempotent afterwards.
  pub fn commit(&mut self) -> Result<(), GrammarError> {
    if self.compiled.is_some() {
      return Ok(());
    }

    let mut leaves: Vec<Rc<Leaf>> = Vec::new();
    for def in &self.leaf_defs {
      let (node_tests, ancestor_tests, preconditions, process) =
        resolve_opts(&self.registry, &def.opts)?;
      let pattern = Regex::new(&def.pattern).map_err(|source| GrammarError::BadPattern {
        name: def.name.clone(),
        source,
      })?;
      leaves.push(Rc::new(Leaf {
        name: def.name.clone(),
        pattern: Some(pattern),
        ignorable: def.ignorable,
        boundary: def.boundary,
        node_tests,
        ancestor_tests,
        preconditions,
        process,
      }));
    }

    let mut rules: HashMap<String, Rc<Rule>> = HashMap::new();
    for def in &self.rule_defs {
      let (node_tests, ancestor_tests, preconditions, process) =
        resolve_opts(&self.registry, &def.opts)?;
      rules.insert(
        def.name.clone(),
        Rc::new(Rule {
          name: def.name.clone(),
          body: def.body.clone(),
          subrules: def.subrules.clone(),
          node_tests,
          ancestor_tests,
          preconditions,
          process,
        }),
      );
    }

    // quoted atoms induce leaves, unless the symbol is already defined
    for def in &self.rule_defs {
      let rule = &rules[&def.name];
      for literal in rule.literals() {
        if leaves.iter().any(|l| l.name == literal) {
          continue;
        }
        let pattern = Regex::new(&regex::escape(&literal)).map_err(|source| {
          GrammarError::BadPattern {
            name: literal.clone(),
            source,
          }
        })?;
        leaves.push(Rc::new(Leaf {
          name: literal,
          pattern: Some(pattern),
          ignorable: false,
          boundary: false,
          node_tests: Vec::new(),
          ancestor_tests: Vec::new(),
          preconditions: Vec::new(),
          process: None,
        }));
      }
    }

    if leaves.is_empty() {
      return Err(GrammarError::NoLeaves);
    }

    let mut taken: HashSet<String> = rules.keys().cloned().collect();
    taken.extend(leaves.iter().map(|l| l.name.clone()));

    if !self.keep_ws {
      let name = free_name("_ws", &taken);
      taken.insert(name.clone());
      let pattern = Regex::new(r"\s+").map_err(|source| GrammarError::BadPattern {
        name: name.clone(),
        source,
      })?;
      leaves.push(Rc::new(Leaf {
        name,
        pattern: Some(pattern),
        ignorable: true,
        boundary: false,
        node_tests: Vec::new(),
        ancestor_tests: Vec::new(),
        preconditions: Vec::new(),
        process: None,
      }));
    }

    let trash = Rc::new(Leaf {
      name: free_name("_trash", &taken),
      pattern: None,
      ignorable: false,
      boundary: true,
      node_tests: Vec::new(),
      ancestor_tests: Vec::new(),
      preconditions: Vec::new(),
      process: None,
    });

    let defined: HashSet<&str> = taken.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = Vec::new();
    for def in &self.rule_defs {
      for symbol in rules[&def.name].seeking() {
        if !defined.contains(symbol) && !missing.iter().any(|m| m == symbol) {
          missing.push(symbol.to_string());
        }
      }
    }
    if !missing.is_empty() {
      missing.sort();
      return Err(GrammarError::UndefinedSymbols(missing));
    }

    for def in &self.rule_defs {
      for sub in &rules[&def.name].subrules {
        if sub.min_consumption() == 0 {
          return Err(GrammarError::EmptyConsumption(def.name.clone()));
        }
      }
    }

    // the starter index, greediest atom first; built in declaration order
    // so tie order is reproducible
    let mut starters: HashMap<String, Vec<Starter>> = HashMap::new();
    for def in &self.rule_defs {
      let rule = &rules[&def.name];
      for (si, sub) in rule.subrules.iter().enumerate() {
        for ai in sub.starter_indices() {
          let starter = Starter::new(rule, si, ai);
          starters
            .entry(sub.atoms[ai].seeking.clone())
            .or_default()
            .push(starter);
        }
      }
    }
    for entries in starters.values_mut() {
      entries.sort_by(|a, b| b.greed.cmp(&a.greed));
    }

    let unary_branch_check = has_unary_cycle(&rules);
    debug!(
      rules = rules.len(),
      leaves = leaves.len(),
      unary_branch_check,
      "grammar committed"
    );

    self.compiled = Some(Compiled {
      rules,
      leaves,
      trash,
      starters,
      unary_branch_check,
    });
    Ok(())
  }

  /// Parse under the default dominance filters, returning every tied-best
  /// parse.
  pub fn parse(&mut self, text: &str) -> Result<Vec<Parse>, GrammarError> {
    self.parse_with(text, &DEFAULT_FILTERS, None)
  }

  /// Parse with an explicit filter order and an optional cap on the number
  /// of parses sought. An empty filter list disables dominance entirely:
  /// every completed parse comes back. A bounded `n` limits ties within a
  /// segment but the cross product of segments can still exceed it.
  pub fn parse_with(
    &mut self,
    text: &str,
    filters: &[Filter],
    n: Option<usize>,
  ) -> Result<Vec<Parse>, GrammarError> {
    self.commit()?;
    let compiled = self.compiled.as_ref().expect("commit populated the grammar");
    Ok(segment::run(text, compiled, &self.registry, filters, n))
  }

  /// The stepwise form of [`parse_with`](Self::parse_with): the returned
  /// [`Search`](segment::Search) advances one unit of work per `step`
  /// call, so an embedder can interleave parsing with other work or bound
  /// it however it likes.
  pub fn search(
    &mut self,
    text: &str,
    filters: &[Filter],
    n: Option<usize>,
  ) -> Result<segment::Search<'_>, GrammarError> {
    self.commit()?;
    let compiled = self.compiled.as_ref().expect("commit populated the grammar");
    Ok(segment::Search::new(text, compiled, &self.registry, filters, n))
  }

  /// The single best parse.
  pub fn first(&mut self, text: &str) -> Result<Parse, GrammarError> {
    Ok(
      self
        .parse_with(text, &DEFAULT_FILTERS, Some(1))?
        .into_iter()
        .next()
        .expect("a parse always exists"),
    )
  }
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for def in &self.rule_defs {
      writeln!(f, "{} -> {}", def.name, def.body)?;
    }
    for def in &self.leaf_defs {
      let flavor = if def.ignorable {
        "ignore "
      } else if def.boundary {
        "boundary "
      } else {
        ""
      };
      writeln!(f, "{}{} => /{}/", flavor, def.name, def.pattern)?;
    }
    Ok(())
  }
}

type ResolvedOpts = (Vec<String>, Vec<String>, Vec<String>, Option<String>);

/// Looks every predicate name up in the registry, telling node tests from
/// structural tests by what was registered, and complaining about names
/// that are missing or registered as something else.
fn resolve_opts(registry: &Registry, opts: &RuleOpts) -> Result<ResolvedOpts, GrammarError> {
  let mut node_tests = Vec::new();
  let mut ancestor_tests = Vec::new();
  for name in &opts.tests {
    match registry.get(name) {
      None => return Err(GrammarError::UndefinedTest(name.clone())),
      Some(Predicate::NodeTest(_)) => node_tests.push(name.clone()),
      Some(Predicate::AncestorTest(_)) => ancestor_tests.push(name.clone()),
      Some(p) => {
        return Err(GrammarError::BadArity {
          name: name.clone(),
          expected: "test",
          actual: p.role(),
        });
      }
    }
  }
  let mut preconditions = Vec::new();
  for name in &opts.preconditions {
    match registry.get(name) {
      None => return Err(GrammarError::UndefinedPrecondition(name.clone())),
      Some(Predicate::Precondition(_)) => preconditions.push(name.clone()),
      Some(p) => {
        return Err(GrammarError::BadArity {
          name: name.clone(),
          expected: "precondition",
          actual: p.role(),
        });
      }
    }
  }
  let process = match &opts.process {
    None => None,
    Some(name) => match registry.get(name) {
      None => return Err(GrammarError::UndefinedProcessor(name.clone())),
      Some(Predicate::Processor(_)) => Some(name.clone()),
      Some(p) => {
        return Err(GrammarError::BadArity {
          name: name.clone(),
          expected: "processor",
          actual: p.role(),
        });
      }
    },
  };
  Ok((node_tests, ancestor_tests, preconditions, process))
}

/// `base`, or `base1`, `base2`, ...: the first not in `taken`.
fn free_name(base: &str, taken: &HashSet<String>) -> String {
  if !taken.contains(base) {
    return base.to_string();
  }
  let mut k = 1;
  loop {
    let candidate = format!("{}{}", base, k);
    if !taken.contains(&candidate) {
      return candidate;
    }
    k += 1;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_leaves() {
    let mut g = Grammar::new();
    g.rule("s", "a b").unwrap();
    // a and b are undefined, but the leafless grammar is caught first
    assert_eq!(g.commit().unwrap_err(), GrammarError::NoLeaves);
  }

  #[test]
  fn test_undefined_symbols() {
    let mut g = Grammar::new();
    g.rule("s", "a b c").unwrap();
    g.leaf("a", "a").unwrap();
    assert_eq!(
      g.commit().unwrap_err(),
      GrammarError::UndefinedSymbols(vec!["b".to_string(), "c".to_string()])
    );
  }

  #[test]
  fn test_empty_consumption() {
    let mut g = Grammar::new();
    g.rule("s", "a* b?").unwrap();
    g.leaf("a", "a").unwrap();
    g.leaf("b", "b").unwrap();
    assert_eq!(
      g.commit().unwrap_err(),
      GrammarError::EmptyConsumption("s".to_string())
    );
  }

  #[test]
  fn test_frozen_after_parse() {
    let mut g = Grammar::new();
    g.leaf("a", "a").unwrap();
    g.parse("a").unwrap();
    assert_eq!(g.rule("s", "a").unwrap_err(), GrammarError::FrozenAfterParse);
    assert_eq!(g.leaf("b", "b").unwrap_err(), GrammarError::FrozenAfterParse);
    assert_eq!(g.keep_whitespace().unwrap_err(), GrammarError::FrozenAfterParse);
  }

  #[test]
  fn test_duplicate_definitions() {
    let mut g = Grammar::new();
    g.rule("s", "a a").unwrap();
    // identical redeclaration is idempotent
    g.rule("s", "a a").unwrap();
    assert_eq!(
      g.rule("s", "a b").unwrap_err(),
      GrammarError::DuplicateDefinition("s".to_string())
    );
    // identical leaves collapse; a same-named variant pattern is a new leaf
    g.leaf("a", "a").unwrap();
    g.leaf("a", "a").unwrap();
    g.leaf("a", "aa").unwrap();
    assert_eq!(g.leaf_defs.iter().filter(|d| d.name == "a").count(), 2);
    // a rule and a leaf may share a name; that is how `a -> a a` grows
    g.leaf("s", "s").unwrap();
  }

  #[test]
  fn test_unresolved_and_misregistered_predicates() {
    let mut g = Grammar::new();
    g.leaf("a", "a").unwrap();
    g.rule_with(
      "s",
      "a a",
      RuleOpts {
        tests: vec!["nope".to_string()],
        ..Default::default()
      },
    )
    .unwrap();
    assert_eq!(
      g.commit().unwrap_err(),
      GrammarError::UndefinedTest("nope".to_string())
    );

    let mut g = Grammar::new();
    g.leaf("a", "a").unwrap();
    g.precondition("shapely", |_, _, _, _, _| true).unwrap();
    g.rule_with(
      "s",
      "a a",
      RuleOpts {
        tests: vec!["shapely".to_string()],
        ..Default::default()
      },
    )
    .unwrap();
    assert_eq!(
      g.commit().unwrap_err(),
      GrammarError::BadArity {
        name: "shapely".to_string(),
        expected: "test",
        actual: "precondition",
      }
    );
  }

  #[test]
  fn test_bad_pattern_is_caught_at_declaration() {
    let mut g = Grammar::new();
    assert!(matches!(
      g.leaf("a", "("),
      Err(GrammarError::BadPattern { .. })
    ));
  }

  #[test]
  fn test_whitespace_leaf_injection_and_collision() {
    let mut g = Grammar::new();
    g.leaf("a", "a").unwrap();
    g.commit().unwrap();
    let compiled = g.compiled.as_ref().unwrap();
    assert!(compiled.leaves.iter().any(|l| l.name == "_ws" && l.ignorable));

    let mut g = Grammar::new();
    g.leaf("_ws", "~+").unwrap();
    g.commit().unwrap();
    let compiled = g.compiled.as_ref().unwrap();
    assert!(compiled.leaves.iter().any(|l| l.name == "_ws1" && l.ignorable));

    let mut g = Grammar::new();
    g.leaf("a", "a").unwrap();
    g.keep_whitespace().unwrap();
    g.commit().unwrap();
    let compiled = g.compiled.as_ref().unwrap();
    assert!(!compiled.leaves.iter().any(|l| l.name == "_ws"));
  }

  #[test]
  fn test_literal_atoms_induce_leaves() {
    let mut g = Grammar::new();
    g.rule("money", "\"$\" digits").unwrap();
    g.leaf("digits", r"\d+").unwrap();
    g.commit().unwrap();
    let compiled = g.compiled.as_ref().unwrap();
    let dollar = compiled.leaves.iter().find(|l| l.name == "$").unwrap();
    assert_eq!(dollar.pattern.as_ref().unwrap().as_str(), r"\$");
  }

  #[test]
  fn test_starters_sorted_by_greed() {
    let mut g = Grammar::new();
    g.rule("small", "a{2}").unwrap();
    g.rule("big", "a+").unwrap();
    g.leaf("a", "a").unwrap();
    g.commit().unwrap();
    let compiled = g.compiled.as_ref().unwrap();
    let starters = &compiled.starters["a"];
    assert_eq!(starters.len(), 2);
    assert_eq!(starters[0].rule.name, "big");
    assert_eq!(starters[1].rule.name, "small");
    assert!(starters[0].greed > starters[1].greed);
  }

  #[test]
  fn test_unary_cycle_flag() {
    let mut g = Grammar::new();
    g.rule("a", "b").unwrap();
    g.rule("b", "a | x").unwrap();
    g.leaf("x", "x").unwrap();
    g.commit().unwrap();
    assert!(g.compiled.as_ref().unwrap().unary_branch_check);

    let mut g = Grammar::new();
    g.rule("s", "x x").unwrap();
    g.leaf("x", "x").unwrap();
    g.commit().unwrap();
    assert!(!g.compiled.as_ref().unwrap().unary_branch_check);
  }
}
