use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::grammar::Compiled;
use crate::node::NodeKind;
use crate::parse::Parse;
use crate::predicates::Registry;
use crate::rules::Leaf;

/// Tokenizes `text` into every maximal sequence of leaf spans. Where leaf
/// patterns overlap, the worklist branches, so the result is one parse per
/// lex variant. Characters no leaf matches are boxed into trash nodes
/// reaching to the next place any leaf matches.
pub fn lex(text: &Rc<str>, grammar: &Compiled, registry: &Registry) -> Vec<Parse> {
  if text.is_empty() {
    return vec![Parse::empty(text.clone())];
  }

  let mut done = Vec::new();
  let mut work = VecDeque::new();
  work.push_back(Parse::empty(text.clone()));

  while let Some(p) = work.pop_front() {
    let offset = p.end();
    let mut matched = false;
    for leaf in &grammar.leaves {
      let pattern = leaf.pattern.as_ref().expect("leaf without a pattern in the lex table");
      let Some(m) = pattern.find_at(text, offset) else {
        continue;
      };
      if m.start() != offset || m.end() == offset {
        // not anchored here, or zero-width
        continue;
      }
      if !preconditions_accept(leaf, offset, m.end(), text, registry) {
        trace!(leaf = %leaf.name, offset, "token vetoed by precondition");
        continue;
      }
      let kind = if leaf.boundary {
        NodeKind::Boundary
      } else {
        NodeKind::Leaf
      };
      let q = p.with_token(leaf, kind, offset, m.end(), registry);
      matched = true;
      if m.end() == text.len() {
        done.push(q);
      } else {
        work.push_back(q);
      }
    }
    if !matched {
      let next = next_match_start(grammar, text, offset);
      trace!(offset, next, "boxing trash");
      let q = p.with_token(&grammar.trash, NodeKind::Trash, offset, next, registry);
      if next == text.len() {
        done.push(q);
      } else {
        work.push_back(q);
      }
    }
  }

  debug!(variants = done.len(), "tokenized");
  done
}

/// Where the run of unlexable characters beginning at `offset` ends: the
/// earliest start of any leaf match at or after it. A leaf whose pattern
/// matches at `offset` itself can only have been precondition-vetoed;
/// trash then swallows one character so the scan can move on.
fn next_match_start(grammar: &Compiled, text: &str, offset: usize) -> usize {
  let mut next = text.len();
  for leaf in &grammar.leaves {
    let pattern = leaf.pattern.as_ref().expect("leaf without a pattern in the lex table");
    if let Some(m) = pattern.find_at(text, offset) {
      if m.end() > m.start() {
        next = next.min(m.start());
      }
    }
  }
  if next <= offset {
    let step = text[offset..].chars().next().map_or(1, char::len_utf8);
    next = offset + step;
  }
  next
}

fn preconditions_accept(
  leaf: &Rc<Leaf>,
  start: usize,
  end: usize,
  text: &str,
  registry: &Registry,
) -> bool {
  leaf
    .preconditions
    .iter()
    .all(|name| (registry.precondition(name))(&leaf.name, start, end, text, &[]))
}
