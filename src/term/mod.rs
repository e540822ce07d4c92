//! The symbolic reply-term value tree (spec §3 `Term`, §4.1 `TermParser`).
//!
//! Terms are value objects: immutable once parsed, with no sharing
//! invariants beyond plain structural equality. [`parser`] implements the
//! recursive-descent grammar; this module holds the tree type and the two
//! translation helpers ([`flatten_dot_list`], [`translate_bindings`]) that
//! are shared by the solver and generator reply paths.

use std::collections::HashMap;

pub mod parser;

pub use parser::parse_term;
pub use parser::parse_terms;
pub use parser::ParseFailure;

/// A parsed reply term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// An integer or floating-point literal.
    Number(Number),
    /// An uppercase- or `_`-led identifier.
    Variable(String),
    /// A lowercase, quoted, or symbolic-run atom.
    Atom(String),
    /// A functor applied to an ordered argument list.
    Compound(String, Vec<Term>),
    /// A bracketed, comma-separated term list.
    List(Vec<Term>),
}

/// The two numeric shapes a [`Term::Number`] can take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// A signed integer, including non-decimal-base literals (`0b`/`0o`/`0x`).
    Int(i64),
    /// A value with a fractional part or exponent.
    Float(f64),
}

impl Term {
    /// Renders a term back to the textual syntax [`parser::parse_term`]
    /// accepts. Used only by the parser round-trip tests in §8; not part of
    /// the wire protocol (requests are built directly as strings by the
    /// solver/generator handles).
    #[cfg(test)]
    pub(crate) fn render(&self) -> String {
        match self {
            Term::Number(Number::Int(n)) => n.to_string(),
            Term::Number(Number::Float(f)) => format!("{f:?}"),
            Term::Variable(name) => name.clone(),
            Term::Atom(name) => render_atom(name),
            Term::Compound(functor, args) => {
                let rendered_args: Vec<String> = args.iter().map(Term::render).collect();
                format!("{}({})", render_atom(functor), rendered_args.join(","))
            }
            Term::List(items) => {
                let rendered: Vec<String> = items.iter().map(Term::render).collect();
                format!("[{}]", rendered.join(","))
            }
        }
    }
}

#[cfg(test)]
fn render_atom(name: &str) -> String {
    let looks_bare = name
        .chars()
        .next()
        .map(|c| c.is_lowercase() || c.is_ascii_digit())
        .unwrap_or(false)
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if looks_bare {
        name.to_string()
    } else {
        format!("'{name}'")
    }
}

/// Flattens a Prolog dotted list (`'.'(Head, Tail)`, terminating in `[]`) or
/// an already-bracketed [`Term::List`] into a native ordered sequence.
///
/// Per spec §4.1: a term that is neither list-tagged nor a `.`-compound is a
/// translation error.
pub fn flatten_dot_list(term: &Term) -> Result<Vec<Term>, String> {
    match term {
        Term::List(items) => Ok(items.clone()),
        Term::Compound(functor, args) if functor == "." && args.len() == 2 => {
            let mut elems = vec![args[0].clone()];
            elems.extend(flatten_dot_list(&args[1])?);
            Ok(elems)
        }
        Term::Atom(a) if a == "[]" => Ok(Vec::new()),
        other => Err(format!("expected prolog list, got {other:?}")),
    }
}

/// Reads a sequence of `=(Key, Value)` compounds into an identifier-keyed
/// mapping. `Key` must be an [`Term::Atom`] or [`Term::Variable`].
pub fn translate_bindings(bindings_list: &[Term]) -> Result<HashMap<String, Term>, String> {
    let mut bindings = HashMap::new();
    for binding in bindings_list {
        let Term::Compound(functor, args) = binding else {
            return Err(format!("expected binding over =/2, got {binding:?}"));
        };
        if functor != "=" || args.len() != 2 {
            return Err(format!("expected binding over =/2, got {binding:?}"));
        }
        let key = match &args[0] {
            Term::Atom(name) | Term::Variable(name) => name.clone(),
            other => return Err(format!("expected atom or variable as key, got {other:?}")),
        };
        bindings.insert(key, args[1].clone());
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_dot_list_from_compound() {
        let list = Term::Compound(
            ".".to_string(),
            vec![
                Term::Atom("a".to_string()),
                Term::Compound(
                    ".".to_string(),
                    vec![Term::Atom("b".to_string()), Term::Atom("[]".to_string())],
                ),
            ],
        );
        let flattened = flatten_dot_list(&list).unwrap();
        assert_eq!(
            flattened,
            vec![Term::Atom("a".to_string()), Term::Atom("b".to_string())]
        );
    }

    #[test]
    fn flatten_dot_list_from_bracket_list() {
        let list = Term::List(vec![Term::Number(Number::Int(1))]);
        assert_eq!(flatten_dot_list(&list).unwrap(), vec![Term::Number(Number::Int(1))]);
    }

    #[test]
    fn flatten_dot_list_rejects_non_list() {
        assert!(flatten_dot_list(&Term::Atom("foo".to_string())).is_err());
    }

    #[test]
    fn translate_bindings_basic() {
        let bindings = vec![
            Term::Compound(
                "=".to_string(),
                vec![Term::Atom("a".to_string()), Term::Number(Number::Int(1))],
            ),
            Term::Compound(
                "=".to_string(),
                vec![Term::Variable("B".to_string()), Term::Number(Number::Int(2))],
            ),
        ];
        let result = translate_bindings(&bindings).unwrap();
        assert_eq!(result.get("a"), Some(&Term::Number(Number::Int(1))));
        assert_eq!(result.get("B"), Some(&Term::Number(Number::Int(2))));
    }

    #[test]
    fn translate_bindings_rejects_non_equals() {
        let bindings = vec![Term::Atom("nope".to_string())];
        assert!(translate_bindings(&bindings).is_err());
    }
}
