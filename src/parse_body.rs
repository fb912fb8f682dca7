/// Regex-driven scanning of rule-body strings into atom sequences.
use regex::Regex;

use crate::error::GrammarError;
use crate::rules::{Atom, Subrule};

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Parses a rule body into its alternatives. A body is atoms separated by
/// whitespace; `|` at the top level separates alternatives. An atom is an
/// identifier or a quoted literal, optionally suffixed with
/// `?`, `+`, `*`, `{n}`, `{n,}` or `{n,m}`.
pub fn parse_body(rule: &str, body: &str) -> Result<Vec<Subrule>, GrammarError> {
  let mut alternatives = Vec::new();
  let mut atoms: Vec<Atom> = Vec::new();
  let mut rem = body.trim_start();

  while !rem.is_empty() {
    if let Some(rest) = rem.strip_prefix('|') {
      if atoms.is_empty() {
        return Err(malformed(rule, rem));
      }
      alternatives.push(Subrule {
        atoms: std::mem::take(&mut atoms),
      });
      rem = rest.trim_start();
      continue;
    }

    let (atom, rest) = parse_atom(rule, rem)?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('|')) {
      return Err(malformed(rule, rem));
    }
    atoms.push(atom);
    rem = rest.trim_start();
  }

  if atoms.is_empty() {
    // an empty body, or a trailing `|`
    return Err(malformed(rule, body));
  }
  alternatives.push(Subrule { atoms });
  Ok(alternatives)
}

fn malformed(rule: &str, at: &str) -> GrammarError {
  let at = at.split_whitespace().next().unwrap_or(at);
  GrammarError::MalformedAtom {
    rule: rule.to_string(),
    at: at.to_string(),
  }
}

fn parse_atom<'a>(rule: &str, s: &'a str) -> Result<(Atom, &'a str), GrammarError> {
  regex_static!(IDENT, r"^[A-Za-z_](?:\w|\\.)*");
  regex_static!(SINGLE_QUOTED, r"^'([^']+)'");
  regex_static!(DOUBLE_QUOTED, r#"^"([^"]+)""#);

  let (seeking, literal, rest) = if let Some(c) = DOUBLE_QUOTED.captures(s).or_else(|| SINGLE_QUOTED.captures(s)) {
    let whole = c.get(0).unwrap();
    (c[1].to_string(), true, &s[whole.end()..])
  } else if let Some(m) = IDENT.find(s) {
    (unescape(m.as_str()), false, &s[m.end()..])
  } else {
    return Err(malformed(rule, s));
  };

  let (min, max, rest) = parse_suffix(rule, rest)?;
  Ok((
    Atom {
      seeking,
      min,
      max,
      literal,
    },
    rest,
  ))
}

fn parse_suffix<'a>(rule: &str, s: &'a str) -> Result<(u32, Option<u32>, &'a str), GrammarError> {
  regex_static!(REPETITION, r"^\{(\d+)(?:(,)(\d*))?\}");

  match s.chars().next() {
    Some('?') => Ok((0, Some(1), &s[1..])),
    Some('*') => Ok((0, None, &s[1..])),
    Some('+') => Ok((1, None, &s[1..])),
    Some('{') => {
      let bad = || GrammarError::BadRepetitionSuffix {
        rule: rule.to_string(),
        suffix: s.split_whitespace().next().unwrap_or(s).to_string(),
      };
      let caps = REPETITION.captures(s).ok_or_else(bad)?;
      let n: u32 = caps[1].parse().map_err(|_| bad())?;
      let (min, max) = if caps.get(2).is_none() {
        // {n}
        (n, Some(n))
      } else if caps[3].is_empty() {
        // {n,}
        (n, None)
      } else {
        // {n,m}
        let m: u32 = caps[3].parse().map_err(|_| bad())?;
        if m < n {
          return Err(bad());
        }
        (n, Some(m))
      };
      if max == Some(0) {
        return Err(bad());
      }
      Ok((min, max, &s[caps.get(0).unwrap().end()..]))
    }
    _ => Ok((1, Some(1), s)),
  }
}

/// `\x` in an identifier stands for the bare character `x`.
fn unescape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      if let Some(next) = chars.next() {
        out.push(next);
      }
    } else {
      out.push(c);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn body(s: &str) -> Vec<Subrule> {
    parse_body("r", s).unwrap()
  }

  #[test]
  fn test_plain_sequence() {
    let subs = body("NP VP");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].atoms.len(), 2);
    assert_eq!(subs[0].atoms[0].seeking, "NP");
    assert_eq!(subs[0].atoms[1].seeking, "VP");
    assert!(subs[0].atoms.iter().all(|a| a.min == 1 && a.max == Some(1)));
  }

  #[test]
  fn test_alternation_splits_at_top_level() {
    let subs = body("a b | c | d e f");
    assert_eq!(subs.len(), 3);
    assert_eq!(subs[0].atoms.len(), 2);
    assert_eq!(subs[1].atoms.len(), 1);
    assert_eq!(subs[2].atoms.len(), 3);
  }

  #[test]
  fn test_suffixes() {
    let subs = body("a? b* c+ d{2} e{2,} f{2,3}");
    let atoms = &subs[0].atoms;
    assert_eq!((atoms[0].min, atoms[0].max), (0, Some(1)));
    assert_eq!((atoms[1].min, atoms[1].max), (0, None));
    assert_eq!((atoms[2].min, atoms[2].max), (1, None));
    assert_eq!((atoms[3].min, atoms[3].max), (2, Some(2)));
    assert_eq!((atoms[4].min, atoms[4].max), (2, None));
    assert_eq!((atoms[5].min, atoms[5].max), (2, Some(3)));
  }

  #[test]
  fn test_quoted_literals() {
    let subs = body(r#""$" digits '%'?"#);
    let atoms = &subs[0].atoms;
    assert_eq!(atoms[0].seeking, "$");
    assert!(atoms[0].literal);
    assert_eq!(atoms[1].seeking, "digits");
    assert!(!atoms[1].literal);
    assert_eq!(atoms[2].seeking, "%");
    assert!(atoms[2].literal);
    assert_eq!((atoms[2].min, atoms[2].max), (0, Some(1)));
  }

  #[test]
  fn test_escaped_identifier() {
    let subs = body(r"a\.b c");
    assert_eq!(subs[0].atoms[0].seeking, "a.b");
  }

  #[test]
  fn test_malformed_atoms() {
    assert!(matches!(
      parse_body("r", "a )b"),
      Err(GrammarError::MalformedAtom { .. })
    ));
    assert!(matches!(
      parse_body("r", ""),
      Err(GrammarError::MalformedAtom { .. })
    ));
    assert!(matches!(
      parse_body("r", "a |"),
      Err(GrammarError::MalformedAtom { .. })
    ));
    assert!(matches!(
      parse_body("r", "| a"),
      Err(GrammarError::MalformedAtom { .. })
    ));
  }

  #[test]
  fn test_bad_repetition_suffixes() {
    for b in ["a{3,2}", "a{}", "a{0}", "a{1,x}"] {
      assert!(
        matches!(
          parse_body("r", b),
          Err(
            GrammarError::BadRepetitionSuffix { .. } | GrammarError::MalformedAtom { .. }
          )
        ),
        "{}",
        b
      );
    }
  }
}
