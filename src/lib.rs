#[macro_use]
extern crate lazy_static;

pub mod error;
pub mod grammar;
pub mod lexer;
pub mod loopcheck;
pub mod node;
pub mod parse;
pub mod parse_body;
pub mod predicates;
pub mod rules;
pub mod search;
pub mod segment;
pub mod utils;

pub use crate::error::GrammarError;
pub use crate::grammar::{Grammar, RuleOpts};
pub use crate::node::{Attributes, NodeKind, NodeRef, Position, Stash};
pub use crate::parse::Parse;
pub use crate::predicates::{Finding, Judgment};
pub use crate::search::{DEFAULT_FILTERS, Filter};
pub use crate::segment::Search;

/// Boxed static error type for embedders that do not care to match on
/// [`GrammarError`].
pub type Err = Box<dyn std::error::Error + 'static>;
