//! Maps parsed [`Term`]s onto [`SolutionValue`]s (spec §4.2).

use super::SolutionValue;
use crate::term::flatten_dot_list;
use crate::term::Number;
use crate::term::Term;

/// Translates a `solution(List)` compound, where `List` (in dotted-list
/// form) holds `binding(Id, Value, PPrint)` triples, into an identifier ->
/// value mapping.
pub fn translate_solution(
    term: &Term,
) -> Result<std::collections::HashMap<String, SolutionValue>, String> {
    let Term::Compound(functor, args) = term else {
        return Err(format!("expected solution/1, got {term:?}"));
    };
    if functor != "solution" || args.len() != 1 {
        return Err(format!("expected solution/1, got {term:?}"));
    }

    let triples = flatten_dot_list(&args[0])?;
    let mut bindings = std::collections::HashMap::with_capacity(triples.len());
    for triple in &triples {
        let Term::Compound(bf, bargs) = triple else {
            return Err(format!("expected binding/3, got {triple:?}"));
        };
        if bf != "binding" || bargs.len() != 3 {
            return Err(format!("expected binding/3, got {triple:?}"));
        }

        let identifier = match &bargs[0] {
            Term::Atom(name) | Term::Variable(name) => name.clone(),
            other => return Err(format!("expected atom or variable identifier, got {other:?}")),
        };
        let pprint = term_text(&bargs[2]);
        let value = translate_binding_value(&bargs[1], &pprint)?;
        bindings.insert(identifier, value);
    }
    Ok(bindings)
}

/// Translates a single binding's value term, honoring the `PPrint == "{}"`
/// empty-set special case (spec §4.2) ahead of the normal functor dispatch.
pub fn translate_binding_value(value: &Term, pprint: &str) -> Result<SolutionValue, String> {
    if pprint == "{}" {
        return Ok(SolutionValue::Set(Vec::new()));
    }
    translate_value(value)
}

/// Translates a value term by dispatching on its outer functor, per the
/// table in spec §4.2.
pub fn translate_value(value: &Term) -> Result<SolutionValue, String> {
    match value {
        Term::Compound(functor, args) if functor == "int" && args.len() == 1 => {
            match &args[0] {
                Term::Number(Number::Int(n)) => Ok(SolutionValue::Int(*n)),
                other => Err(format!("expected int argument, got {other:?}")),
            }
        }
        Term::Compound(functor, args) if functor == "floating" && args.len() == 1 => {
            match &args[0] {
                Term::Number(Number::Float(f)) => Ok(SolutionValue::Float(*f)),
                Term::Number(Number::Int(n)) => Ok(SolutionValue::Float(*n as f64)),
                other => Err(format!("expected floating argument, got {other:?}")),
            }
        }
        Term::Compound(functor, args) if functor == "term" && args.len() == 1 => match &args[0] {
            Term::Compound(inner_functor, inner_args)
                if inner_functor == "floating" && inner_args.len() == 1 =>
            {
                match &inner_args[0] {
                    Term::Number(Number::Float(f)) => Ok(SolutionValue::Float(*f)),
                    Term::Number(Number::Int(n)) => Ok(SolutionValue::Float(*n as f64)),
                    other => Err(format!("expected floating argument, got {other:?}")),
                }
            }
            other => Err(format!("unsupported term/1 payload, got {other:?}")),
        },
        Term::Compound(functor, args) if functor == "string" && args.len() == 1 => {
            Ok(SolutionValue::Str(term_text(&args[0])))
        }
        Term::Compound(functor, args) if functor == "avl_set" && args.len() == 1 => {
            let elements = translate_avl_set(&args[0])?;
            match recognize_sequence(&elements) {
                Some(sequence) => Ok(SolutionValue::Sequence(sequence)),
                None => Ok(SolutionValue::Set(elements)),
            }
        }
        Term::Compound(functor, args) if functor == "global_set" && args.len() == 1 => {
            Ok(SolutionValue::GlobalSet(term_text(&args[0])))
        }
        Term::Compound(functor, args) if functor == "," && args.len() == 2 => {
            let lhs = translate_value(&args[0])?;
            let rhs = translate_value(&args[1])?;
            Ok(SolutionValue::Pair(Box::new(lhs), Box::new(rhs)))
        }
        Term::Atom(name) if name == "contradiction_found" => Ok(SolutionValue::Unbound),
        Term::Number(Number::Int(n)) => Ok(SolutionValue::Int(*n)),
        Term::Number(Number::Float(f)) => Ok(SolutionValue::Float(*f)),
        other => Ok(SolutionValue::Str(term_text(other))),
    }
}

/// Flattens an AVL set (`empty` or `node(Value, _, Balance, Left, Right)`)
/// in pre-order (self, left, right), ignoring the balance/truth slots.
fn translate_avl_set(node: &Term) -> Result<Vec<SolutionValue>, String> {
    match node {
        Term::Atom(name) if name == "empty" => Ok(Vec::new()),
        Term::Compound(functor, args) if functor == "node" && args.len() == 5 => {
            let mut result = vec![translate_value(&args[0])?];
            result.extend(translate_avl_set(&args[3])?);
            result.extend(translate_avl_set(&args[4])?);
            Ok(result)
        }
        other => Err(format!("expected avl node, got {other:?}")),
    }
}

/// Recognizes a set of `Pair(Int, _)` elements whose left-values are
/// exactly `{1, .., |set|}` and, if so, returns the values in index order.
fn recognize_sequence(elements: &[SolutionValue]) -> Option<Vec<SolutionValue>> {
    if elements.is_empty() {
        return None;
    }
    let mut by_index = std::collections::HashMap::with_capacity(elements.len());
    for element in elements {
        let SolutionValue::Pair(left, right) = element else {
            return None;
        };
        let SolutionValue::Int(index) = left.as_ref() else {
            return None;
        };
        by_index.insert(*index, (**right).clone());
    }

    let n = elements.len() as i64;
    let mut sequence = Vec::with_capacity(elements.len());
    for i in 1..=n {
        sequence.push(by_index.remove(&i)?);
    }
    Some(sequence)
}

fn term_text(term: &Term) -> String {
    match term {
        Term::Atom(name) | Term::Variable(name) => name.clone(),
        Term::Number(Number::Int(n)) => n.to_string(),
        Term::Number(Number::Float(f)) => f.to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Number;

    fn int_term(n: i64) -> Term {
        Term::Compound("int".to_string(), vec![Term::Number(Number::Int(n))])
    }

    #[test]
    fn translate_int() {
        let value = translate_value(&int_term(42)).unwrap();
        assert_eq!(value, SolutionValue::Int(42));
    }

    #[test]
    fn translate_string() {
        let value = translate_value(&Term::Compound(
            "string".to_string(),
            vec![Term::Atom("hello world".to_string())],
        ))
        .unwrap();
        assert_eq!(value, SolutionValue::Str("hello world".to_string()));
    }

    #[test]
    fn translate_comma_pair() {
        let term = Term::Compound("," .to_string(), vec![int_term(0), int_term(1)]);
        let value = translate_value(&term).unwrap();
        assert_eq!(
            value,
            SolutionValue::Pair(
                Box::new(SolutionValue::Int(0)),
                Box::new(SolutionValue::Int(1))
            )
        );
    }

    #[test]
    fn translate_empty_set_pprint_override() {
        let value = translate_binding_value(&int_term(5), "{}").unwrap();
        assert_eq!(value, SolutionValue::Set(Vec::new()));
    }

    #[test]
    fn translate_avl_set_basic() {
        // node(int(2), true, 1, empty, node(int(3), true, 0, empty, empty))
        let node = Term::Compound(
            "node".to_string(),
            vec![
                int_term(2),
                Term::Atom("true".to_string()),
                Term::Number(Number::Int(1)),
                Term::Atom("empty".to_string()),
                Term::Compound(
                    "node".to_string(),
                    vec![
                        int_term(3),
                        Term::Atom("true".to_string()),
                        Term::Number(Number::Int(0)),
                        Term::Atom("empty".to_string()),
                        Term::Atom("empty".to_string()),
                    ],
                ),
            ],
        );
        let term = Term::Compound("avl_set".to_string(), vec![node]);
        let value = translate_value(&term).unwrap();
        assert_eq!(
            value,
            SolutionValue::Set(vec![SolutionValue::Int(2), SolutionValue::Int(3)])
        );
    }

    #[test]
    fn translate_avl_set_recognizes_sequence() {
        let pair = |i: i64, c: &str| {
            Term::Compound(
                ",".to_string(),
                vec![int_term(i), Term::Atom(c.to_string())],
            )
        };
        // { (1,a), (2,b), (3,c) } -> Sequence([a, b, c])
        let node = Term::Compound(
            "node".to_string(),
            vec![
                pair(1, "a"),
                Term::Atom("true".to_string()),
                Term::Number(Number::Int(0)),
                Term::Atom("empty".to_string()),
                Term::Compound(
                    "node".to_string(),
                    vec![
                        pair(2, "b"),
                        Term::Atom("true".to_string()),
                        Term::Number(Number::Int(0)),
                        Term::Atom("empty".to_string()),
                        Term::Compound(
                            "node".to_string(),
                            vec![
                                pair(3, "c"),
                                Term::Atom("true".to_string()),
                                Term::Number(Number::Int(0)),
                                Term::Atom("empty".to_string()),
                                Term::Atom("empty".to_string()),
                            ],
                        ),
                    ],
                ),
            ],
        );
        let term = Term::Compound("avl_set".to_string(), vec![node]);
        let value = translate_value(&term).unwrap();
        assert_eq!(
            value,
            SolutionValue::Sequence(vec![
                SolutionValue::Str("a".to_string()),
                SolutionValue::Str("b".to_string()),
                SolutionValue::Str("c".to_string()),
            ])
        );
    }

    #[test]
    fn translate_avl_set_non_sequence_stays_a_set() {
        // { (1,a), (2,b), (4,c) } -> not a sequence (missing index 3)
        let pair = |i: i64, c: &str| {
            Term::Compound(
                ",".to_string(),
                vec![int_term(i), Term::Atom(c.to_string())],
            )
        };
        let node = Term::Compound(
            "node".to_string(),
            vec![
                pair(1, "a"),
                Term::Atom("true".to_string()),
                Term::Number(Number::Int(0)),
                Term::Atom("empty".to_string()),
                Term::Compound(
                    "node".to_string(),
                    vec![
                        pair(2, "b"),
                        Term::Atom("true".to_string()),
                        Term::Number(Number::Int(0)),
                        Term::Atom("empty".to_string()),
                        Term::Compound(
                            "node".to_string(),
                            vec![
                                pair(4, "c"),
                                Term::Atom("true".to_string()),
                                Term::Number(Number::Int(0)),
                                Term::Atom("empty".to_string()),
                                Term::Atom("empty".to_string()),
                            ],
                        ),
                    ],
                ),
            ],
        );
        let term = Term::Compound("avl_set".to_string(), vec![node]);
        match translate_value(&term).unwrap() {
            SolutionValue::Set(_) => {}
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn translate_solution_with_bindings() {
        let binding = |id: &str, value: Term, pprint: &str| {
            Term::Compound(
                "binding".to_string(),
                vec![
                    Term::Atom(id.to_string()),
                    value,
                    Term::Atom(pprint.to_string()),
                ],
            )
        };
        let list = Term::List(vec![binding("x", int_term(1), "1")]);
        let solution = Term::Compound("solution".to_string(), vec![list]);
        let bindings = translate_solution(&solution).unwrap();
        assert_eq!(bindings.get("x"), Some(&SolutionValue::Int(1)));
    }
}
