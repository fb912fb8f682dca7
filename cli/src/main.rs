use std::env;
use std::fs;
use std::io;
use std::io::Write;
use std::process;

use tracing_subscriber::EnvFilter;

use thicket::{DEFAULT_FILTERS, Err, Filter, Grammar};

fn usage(prog_name: &str) -> String {
  format!(
    r"
Usage: {} FILE [options]

Reads a grammar from FILE, then parses each line of stdin.

Grammar lines:
  name -> body           a rule (atoms, quoted literals, ? + * {{n,m}}, |)
  name = /regex/         a leaf
  ignore name /regex/    an ignorable leaf
  boundary name /regex/  a boundary leaf
  keep-whitespace        suppress the automatic whitespace leaf
  # comment

Options:
  -h, --help     Print this message
  -s, --summary  Print parse summaries instead of trees
  -n COUNT       Number of parses to seek (defaults to all tied-best)
  -f FILTERS     Comma-separated dominance filters, or 'none'
                 (correctness, completion, pending, size)",
    prog_name
  )
}

fn load_grammar(src: &str) -> Result<Grammar, Err> {
  let mut g = Grammar::new();
  for (lineno, raw) in src.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let at_line = |e: thicket::GrammarError| -> Err { format!("line {}: {}", lineno + 1, e).into() };
    if line == "keep-whitespace" {
      g.keep_whitespace().map_err(at_line)?;
    } else if let Some(rest) = line.strip_prefix("ignore ") {
      let (name, pattern) = leaf_parts(rest, lineno)?;
      g.ignore(name, pattern).map_err(at_line)?;
    } else if let Some(rest) = line.strip_prefix("boundary ") {
      let (name, pattern) = leaf_parts(rest, lineno)?;
      g.boundary(name, pattern).map_err(at_line)?;
    } else if let Some((name, body)) = line.split_once("->") {
      g.rule(name.trim(), body.trim()).map_err(at_line)?;
    } else if line.contains('=') {
      let rewritten = line.replacen('=', " ", 1);
      let (name, pattern) = leaf_parts(&rewritten, lineno)?;
      g.leaf(name, pattern).map_err(at_line)?;
    } else {
      return Err(format!("line {}: unrecognized declaration {:?}", lineno + 1, line).into());
    }
  }
  Ok(g)
}

/// `name /regex/` with the slashes stripped
fn leaf_parts(rest: &str, lineno: usize) -> Result<(&str, &str), Err> {
  let bad = || -> Err {
    format!(
      "line {}: expected `name /regex/`, got {:?}",
      lineno + 1,
      rest.trim()
    )
    .into()
  };
  let (name, pattern) = rest.trim().split_once(char::is_whitespace).ok_or_else(bad)?;
  let pattern = pattern.trim();
  let pattern = pattern
    .strip_prefix('/')
    .and_then(|p| p.strip_suffix('/'))
    .ok_or_else(bad)?;
  Ok((name, pattern))
}

fn parse(g: &mut Grammar, line: &str, summaries: bool, filters: &[Filter], n: Option<usize>) -> Result<(), Err> {
  let parses = g.parse_with(line, filters, n)?;

  println!(
    "{} parse{}",
    parses.len(),
    if parses.len() == 1 { "" } else { "s" }
  );

  for p in parses {
    if summaries {
      println!("{}", p.summary());
    } else {
      println!("{}", p);
    }
    if p.has_errors() || p.pending_count() > 0 {
      println!(
        "  ({} bad root{}, {} pending)",
        p.incorrectness_count(),
        if p.incorrectness_count() == 1 { "" } else { "s" },
        p.pending_count()
      );
    }
    println!();
  }

  Ok(())
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let opts: Vec<String> = env::args().collect();
  let prog_name = opts[0].clone();

  if opts.len() < 2 {
    println!("{}", usage(&prog_name));
    process::exit(1);
  }

  let mut opts = opts.into_iter().skip(1);
  let filename = opts.next().unwrap();

  let mut summaries = false;
  let mut n = None;
  let mut filters: Vec<Filter> = DEFAULT_FILTERS.to_vec();
  while let Some(o) = opts.next() {
    if o == "-h" || o == "--help" {
      println!("{}", usage(&prog_name));
      process::exit(0);
    } else if o == "-s" || o == "--summary" {
      summaries = true;
    } else if o == "-n" {
      let count = opts.next().ok_or("-n needs a count")?;
      n = Some(count.parse()?);
    } else if o == "-f" {
      let spec = opts.next().ok_or("-f needs a filter list")?;
      filters = if spec == "none" {
        Vec::new()
      } else {
        spec
          .split(',')
          .map(|f| f.trim().parse())
          .collect::<Result<_, _>>()?
      };
    } else {
      println!("{}", usage(&prog_name));
      process::exit(1);
    }
  }

  let src = fs::read_to_string(&filename)?;
  let mut g = load_grammar(&src)?;

  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    match io::stdin().read_line(&mut input) {
      Ok(_) => {
        if input.is_empty() {
          // ctrl+d
          return Ok(());
        }
        parse(&mut g, input.trim_end_matches('\n'), summaries, &filters, n)?;
        input.clear();
      }
      Err(error) => return Err(error.into()),
    }
  }
}
