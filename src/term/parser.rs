//! Recursive-descent parser for the reply-term syntax (spec §4.1).
//!
//! Every `parse_*` helper takes the remaining input and returns `(value,
//! rest)` on success; none of them unwind. A [`ParseFailure`] is fatal to
//! the reply currently being parsed (the containing request is reported as
//! a parse error and the iteration is skipped), never to the process.

use std::fmt;

use super::Number;
use super::Term;

const SYMBOLIC_CHARS: &str = "+-*/\\^<>=~:.?@#$&";
const LEAD_ATOM_CHARS: &str = "+-*/\\^<>=~:.?@#$&!;";
const SINGLE_CHAR_ATOMS: &str = "!;";

/// A fatal parse failure: what was expected, and a prefix of what was found.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    expected: String,
    found_prefix: String,
}

impl std::error::Error for ParseFailure {}

impl ParseFailure {
    fn new(expected: &str, found: &str) -> Self {
        let found_prefix: String = found.chars().take(32).collect();
        ParseFailure {
            expected: expected.to_string(),
            found_prefix,
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, found {:?}",
            self.expected, self.found_prefix
        )
    }
}

type ParseResult<'a, T> = Result<(T, &'a str), ParseFailure>;

/// Parses a single term from the front of `input`, returning it along with
/// the unconsumed remainder.
pub fn parse_term(input: &str) -> ParseResult<'_, Term> {
    let c = first_char(input).ok_or_else(|| ParseFailure::new("term", input))?;

    if c.is_ascii_digit() || c == '.' || c == '+' || c == '-' {
        let (n, rest) = parse_number(input)?;
        Ok((Term::Number(n), rest))
    } else if c.is_uppercase() || c == '_' {
        let (v, rest) = parse_variable(input);
        Ok((Term::Variable(v), rest))
    } else if c.is_lowercase() || c == '\'' || LEAD_ATOM_CHARS.contains(c) {
        let (atom, rest) = parse_atom(input)?;
        if rest.starts_with('(') {
            let rest = consume('(', rest)?;
            let (args, rest) = parse_terms(rest)?;
            let rest = consume(')', rest)?;
            Ok((Term::Compound(atom, args), rest))
        } else {
            Ok((Term::Atom(atom), rest))
        }
    } else if c == '[' {
        let rest = consume('[', input)?;
        if rest.starts_with(']') {
            let rest = consume(']', rest)?;
            Ok((Term::List(Vec::new()), rest))
        } else {
            let (terms, rest) = parse_terms(rest)?;
            let rest = consume(']', rest)?;
            Ok((Term::List(terms), rest))
        }
    } else {
        Err(ParseFailure::new("term", input))
    }
}

/// Parses a comma-separated run of terms, stopping (without error) as soon
/// as the next non-whitespace character is not a comma.
pub fn parse_terms(mut input: &str) -> ParseResult<'_, Vec<Term>> {
    let mut terms = Vec::new();
    loop {
        input = trim_whitespace(input);
        if input.is_empty() {
            break;
        }
        let (term, rest) = parse_term(input)?;
        terms.push(term);
        let rest = trim_whitespace(rest);
        if rest.starts_with(',') {
            input = consume(',', rest)?;
        } else {
            input = rest;
            break;
        }
    }
    Ok((terms, input))
}

fn parse_number(input: &str) -> ParseResult<'_, Number> {
    let (negative, input) = match first_char(input) {
        Some('+') => (false, &input[1..]),
        Some('-') => (true, &input[1..]),
        _ => (false, input),
    };

    if let Some(rest) = input.strip_prefix("0b") {
        let (digits, rest) = parse_int_format(rest, 2)?;
        return Ok((apply_sign(Number::Int(parse_radix(&digits, 2)), negative), rest));
    }
    if let Some(rest) = input.strip_prefix("0o") {
        let (digits, rest) = parse_int_format(rest, 8)?;
        return Ok((apply_sign(Number::Int(parse_radix(&digits, 8)), negative), rest));
    }
    if let Some(rest) = input.strip_prefix("0x") {
        let (digits, rest) = parse_int_format(rest, 16)?;
        return Ok((apply_sign(Number::Int(parse_radix(&digits, 16)), negative), rest));
    }

    if input.starts_with('.') {
        let rest = &input[1..];
        let (digits, rest) = parse_int_format(rest, 10)?;
        let (exp, rest) = parse_optional_exponent(rest)?;
        let text = format!(".{digits}{exp}");
        let value: f64 = text
            .parse()
            .map_err(|_| ParseFailure::new("float literal", input))?;
        return Ok((apply_sign(Number::Float(value), negative), rest));
    }

    let (int_digits, rest) = parse_int_format(input, 10)?;
    let mut text = int_digits;
    let mut is_float = false;

    let rest = if rest.starts_with('.') {
        is_float = true;
        let rest = &rest[1..];
        let (frac_digits, rest) = parse_int_format(rest, 10)?;
        text.push('.');
        text.push_str(&frac_digits);
        rest
    } else {
        rest
    };

    let (exp, rest) = parse_optional_exponent(rest)?;
    if !exp.is_empty() {
        is_float = true;
        text.push_str(&exp);
    }

    let number = if is_float {
        Number::Float(
            text.parse()
                .map_err(|_| ParseFailure::new("float literal", input))?,
        )
    } else {
        Number::Int(
            text.parse()
                .map_err(|_| ParseFailure::new("integer literal", input))?,
        )
    };

    Ok((apply_sign(number, negative), rest))
}

fn apply_sign(number: Number, negative: bool) -> Number {
    if !negative {
        return number;
    }
    match number {
        Number::Int(n) => Number::Int(-n),
        Number::Float(f) => Number::Float(-f),
    }
}

fn parse_radix(digits: &str, radix: u32) -> i64 {
    i64::from_str_radix(digits, radix).unwrap_or(0)
}

/// Parses `e`/`E` followed by a signed decimal integer, returning the
/// fragment (e.g. `"E-3"`) to append to a number string, or `""` if there is
/// no exponent.
fn parse_optional_exponent(input: &str) -> ParseResult<'_, String> {
    match first_char(input) {
        Some('e') | Some('E') => {
            let rest = &input[1..];
            let (sign, rest) = match first_char(rest) {
                Some('+') => ("", &rest[1..]),
                Some('-') => ("-", &rest[1..]),
                _ => ("", rest),
            };
            let (digits, rest) = parse_int_format(rest, 10)?;
            Ok((format!("E{sign}{digits}"), rest))
        }
        _ => Ok((String::new(), input)),
    }
}

/// Consumes the longest prefix of `input` whose characters are valid digits
/// in `base` (case-insensitive), returning that run as a string.
fn parse_int_format(input: &str, base: u32) -> ParseResult<'_, String> {
    let digit_chars = "0123456789abcdef";
    let allowed = &digit_chars[..base as usize];
    let mut end = 0;
    for c in input.chars() {
        if allowed.contains(c.to_ascii_lowercase()) {
            end += c.len_utf8();
        } else {
            break;
        }
    }
    Ok((input[..end].to_string(), &input[end..]))
}

fn parse_variable(input: &str) -> (String, &str) {
    let mut end = 0;
    for c in input.chars() {
        if c.is_alphanumeric() || c == '_' {
            end += c.len_utf8();
        } else {
            break;
        }
    }
    (input[..end].to_string(), &input[end..])
}

fn parse_atom(input: &str) -> ParseResult<'_, String> {
    let c = first_char(input).ok_or_else(|| ParseFailure::new("atom", input))?;

    if c == '\'' {
        let rest = &input[1..];
        let end = rest.find('\'').ok_or_else(|| ParseFailure::new("closing '", rest))?;
        let atom = rest[..end].to_string();
        Ok((atom, &rest[end + 1..]))
    } else if SYMBOLIC_CHARS.contains(c) {
        let mut end = 0;
        for c in input.chars() {
            if SYMBOLIC_CHARS.contains(c) {
                end += c.len_utf8();
            } else {
                break;
            }
        }
        Ok((input[..end].to_string(), &input[end..]))
    } else if SINGLE_CHAR_ATOMS.contains(c) {
        Ok((c.to_string(), &input[c.len_utf8()..]))
    } else {
        let mut end = 0;
        for c in input.chars() {
            if c.is_alphanumeric() || c == '_' {
                end += c.len_utf8();
            } else {
                break;
            }
        }
        Ok((input[..end].to_string(), &input[end..]))
    }
}

fn consume(c: char, input: &str) -> Result<&str, ParseFailure> {
    if input.starts_with(c) {
        Ok(&input[c.len_utf8()..])
    } else {
        Err(ParseFailure::new(&format!("'{c}'"), input))
    }
}

fn trim_whitespace(input: &str) -> &str {
    input.trim_start()
}

fn first_char(input: &str) -> Option<char> {
    input.chars().next()
}
