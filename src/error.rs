use thiserror::Error;

/// Everything that can go wrong while declaring or committing a grammar.
///
/// Configuration errors are fatal for the grammar that produced them; data
/// problems in the input (unlexable characters, failed predicates) are not
/// errors at all, they surface as trash nodes and marked parses.
#[derive(Debug, Clone, Error)]
pub enum GrammarError {
  #[error("grammar defines no leaves")]
  NoLeaves,
  #[error("rules reference undefined symbols: {0:?}")]
  UndefinedSymbols(Vec<String>),
  #[error("grammar is frozen once it has parsed; declare everything first")]
  FrozenAfterParse,
  #[error("no node or structural test named {0:?} is registered")]
  UndefinedTest(String),
  #[error("no precondition named {0:?} is registered")]
  UndefinedPrecondition(String),
  #[error("no processor named {0:?} is registered")]
  UndefinedProcessor(String),
  #[error("{name:?} is registered as a {actual}, not usable as a {expected}")]
  BadArity {
    name: String,
    expected: &'static str,
    actual: &'static str,
  },
  #[error("malformed atom in rule {rule:?} at {at:?}")]
  MalformedAtom { rule: String, at: String },
  #[error("bad repetition suffix {suffix:?} in rule {rule:?}")]
  BadRepetitionSuffix { rule: String, suffix: String },
  #[error("unknown filter {0:?}")]
  UnknownFilter(String),
  #[error("rule {0:?} can match the empty sequence and would never advance a parse")]
  EmptyConsumption(String),
  #[error("unexpected test result {0:?}")]
  UnexpectedTestResult(String),
  #[error("{0:?} is already defined with a different body or predicates")]
  DuplicateDefinition(String),
  #[error("bad leaf pattern for {name:?}: {source}")]
  BadPattern {
    name: String,
    #[source]
    source: regex::Error,
  },
}

impl PartialEq for GrammarError {
  fn eq(&self, other: &Self) -> bool {
    std::mem::discriminant(self) == std::mem::discriminant(other)
      && self.to_string() == other.to_string()
  }
}
