//! Configuration schema and loader (spec §6), the ambient configuration
//! layer the distilled spec treats as an external collaborator.
//!
//! A YAML mapping is deserialized with `serde`/`serde_yaml`; unknown
//! *optional* keys are ignored by `serde`'s normal field handling, while
//! missing required paths fail fast as [`FuzzError::Configuration`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::FuzzError;

/// Top-level configuration file (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The `fuzzer.*` section.
    pub fuzzer: FuzzerConfig,
    /// The `solvers.<id>.*` section, keyed by solver id.
    pub solvers: HashMap<String, SolverConfig>,
}

/// The `fuzzer.*` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FuzzerConfig {
    /// Path to the generator entry point. Environment variables are
    /// expanded before use.
    pub path: String,
    /// Recognized and pass-through generator options (spec §4.7, §6).
    #[serde(default)]
    pub options: Vec<String>,
    /// When set, attach to an already-running generator on this port
    /// instead of spawning a new one.
    pub port: Option<u16>,
    /// Ids (must exist in `solvers`) of the target solvers.
    pub targets: Vec<String>,
    /// Ids (must exist in `solvers`) of the reference solvers.
    pub references: Vec<String>,
    /// Path to the append-only results CSV.
    #[serde(default = "default_csv_path")]
    pub csv: String,
    /// Path to the append-only contradictions log. Spec §9 leaves the
    /// original fixed name (`bf_contradictions.txt`) as the default but
    /// asks that the path be made configurable; this field does that.
    #[serde(default = "default_contradictions_path")]
    pub contradictions_file: String,
    /// PAR2-style timeout-penalty multiplier (spec §9 open question,
    /// resolved as a configurable field). Default `2.0` (PAR2).
    #[serde(default = "default_penalty_factor")]
    pub penalty_factor: f64,
}

fn default_csv_path() -> String {
    "results.csv".to_string()
}

fn default_contradictions_path() -> String {
    "bf_contradictions.txt".to_string()
}

fn default_penalty_factor() -> f64 {
    2.0
}

/// Recognized members of `fuzzer.options`, parsed out of the raw string
/// list; anything else is kept verbatim and never interpreted by the core
/// (spec §9 open question).
#[derive(Debug, Clone, Default)]
pub struct FuzzerOptions {
    /// `samp_size(N)`: number of samples averaged per `solve` call.
    pub samp_size: u32,
    /// `solutions_only`: suppress iterations whose `yes` answers are not
    /// all solutions or contradictions.
    pub solutions_only: bool,
    /// `min_one_solution`: require both a solution and a contradiction
    /// across the merged results.
    pub min_one_solution: bool,
    /// Anything else, preserved but ignored by the core.
    pub other: Vec<String>,
}

impl FuzzerOptions {
    /// Parses the recognized option forms out of a raw option string list.
    pub fn parse(raw: &[String]) -> Self {
        let mut options = FuzzerOptions {
            samp_size: 1,
            ..Default::default()
        };
        for entry in raw {
            let trimmed = entry.trim();
            if let Some(inner) = trimmed
                .strip_prefix("samp_size(")
                .and_then(|s| s.strip_suffix(')'))
            {
                if let Ok(n) = inner.trim().parse::<u32>() {
                    options.samp_size = n.max(1);
                    continue;
                }
            }
            if trimmed == "solutions_only" {
                options.solutions_only = true;
                continue;
            }
            if trimmed == "min_one_solution" {
                options.min_one_solution = true;
                continue;
            }
            options.other.push(entry.clone());
        }
        options
    }
}

/// One `solvers.<id>.*` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    /// Path to the solver binary (or its containing directory; in that
    /// case `probcli` is appended, mirroring `probandit/solver.py`).
    pub path: String,
    /// The base solver backend.
    #[serde(default)]
    pub base_solver: BaseSolver,
    /// CLI preferences, translated to `-p KEY VALUE` pairs.
    #[serde(default)]
    pub preferences: Vec<Preference>,
    /// The Prolog call template. Placeholders: `$pred`, `$base`, `$options`.
    #[serde(default = "default_prolog_call")]
    pub prolog_call: String,
    /// Extra call options substituted for `$options`, rendered as a
    /// Prolog list (`[a, b, ...]`).
    #[serde(default)]
    pub call_options: Vec<String>,
    /// The variable name in the reply bindings holding the result.
    #[serde(default = "default_result_var")]
    pub call_result_var: String,
    /// The variable name in the reply bindings holding the elapsed time.
    #[serde(default = "default_time_var")]
    pub call_time_var: String,
}

fn default_prolog_call() -> String {
    "cbc_timed_solve_with_opts($base,$options,$pred,_,Res,Msec)".to_string()
}

fn default_result_var() -> String {
    "Res".to_string()
}

fn default_time_var() -> String {
    "Msec".to_string()
}

fn default_timeout_ms() -> u64 {
    2500
}

impl SolverConfig {
    /// The solve-socket receive timeout: the value of a `timeout`/`time_out`
    /// preference when one is present, otherwise 2500 ms, per spec §4.5.
    pub fn timeout_ms(&self) -> u64 {
        self.preferences
            .iter()
            .find_map(Preference::timeout_value)
            .unwrap_or_else(default_timeout_ms)
    }
}

/// `solvers.<id>.base_solver`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BaseSolver {
    /// The default backend.
    #[default]
    Prob,
    Kodkod,
    Z3,
    Z3axm,
    Z3cns,
    Cdclt,
}

impl BaseSolver {
    /// The Prolog atom substituted for `$base`.
    pub fn as_prolog_atom(self) -> &'static str {
        match self {
            BaseSolver::Prob => "'PROB'",
            BaseSolver::Kodkod => "'KODKOD'",
            BaseSolver::Z3 => "'Z3'",
            BaseSolver::Z3axm => "'Z3AXM'",
            BaseSolver::Z3cns => "'Z3CNS'",
            BaseSolver::Cdclt => "'CDCLT'",
        }
    }
}

/// A single CLI preference, either a bare `"key value"` string or a
/// single-key mapping whose value may be a bool (rendered `TRUE`/`FALSE`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Preference {
    /// `"key value"`, split on the first whitespace run.
    Bare(String),
    /// `{ key: value }`.
    KeyValue(HashMap<String, PreferenceValue>),
}

/// A preference value; booleans render as `TRUE`/`FALSE` per spec §6.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Text(String),
    Number(i64),
}

impl PreferenceValue {
    fn render(&self) -> String {
        match self {
            PreferenceValue::Bool(true) => "TRUE".to_string(),
            PreferenceValue::Bool(false) => "FALSE".to_string(),
            PreferenceValue::Text(s) => s.clone(),
            PreferenceValue::Number(n) => n.to_string(),
        }
    }

    fn as_millis(&self) -> Option<u64> {
        match self {
            PreferenceValue::Number(n) => u64::try_from(*n).ok(),
            PreferenceValue::Text(s) => s.parse().ok(),
            PreferenceValue::Bool(_) => None,
        }
    }
}

fn is_timeout_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("timeout") || key.eq_ignore_ascii_case("time_out")
}

impl Preference {
    /// Expands this preference into the `-p KEY VALUE ...` CLI arguments it
    /// contributes.
    pub fn to_cli_args(&self) -> Vec<String> {
        match self {
            Preference::Bare(text) => {
                let mut args = vec!["-p".to_string()];
                args.extend(text.split_whitespace().map(str::to_string));
                args
            }
            Preference::KeyValue(map) => {
                let mut args = Vec::with_capacity(map.len() * 3);
                for (key, value) in map {
                    args.push("-p".to_string());
                    args.push(key.clone());
                    args.push(value.render());
                }
                args
            }
        }
    }

    /// This preference's timeout value in milliseconds, if it sets `timeout`
    /// or `time_out` (spec §4.5).
    fn timeout_value(&self) -> Option<u64> {
        match self {
            Preference::Bare(text) => {
                let mut parts = text.split_whitespace();
                let key = parts.next()?;
                if is_timeout_key(key) {
                    parts.next()?.parse().ok()
                } else {
                    None
                }
            }
            Preference::KeyValue(map) => map
                .iter()
                .find(|(key, _)| is_timeout_key(key))
                .and_then(|(_, value)| value.as_millis()),
        }
    }
}

/// Expands environment variable references (`$VAR`/`${VAR}`) in `path`,
/// mirroring `os.path.expandvars` in `probandit/solver.py`.
pub fn expand_env_vars(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut i = 0;
    while i < path.len() {
        let c = path[i..].chars().next().expect("i is a char boundary");
        if c != '$' {
            result.push(c);
            i += c.len_utf8();
            continue;
        }
        let rest = &path[i + 1..];
        let (name, consumed) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            (&rest[..end], end)
        };
        if name.is_empty() {
            result.push('$');
            i += 1;
            continue;
        }
        if let Ok(value) = std::env::var(name) {
            result.push_str(&value);
        }
        i += 1 + consumed;
    }
    result
}

impl Config {
    /// Loads and validates a configuration file, failing fast on missing
    /// required paths or solver ids referenced by `fuzzer.targets` /
    /// `fuzzer.references` but absent from `solvers` (spec §7).
    pub fn load(path: impl AsRef<Path>) -> Result<Config, FuzzError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FuzzError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&text)
            .map_err(|e| FuzzError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FuzzError> {
        if self.fuzzer.path.trim().is_empty() {
            return Err(FuzzError::Configuration("fuzzer.path is required".to_string()));
        }
        for id in self.fuzzer.targets.iter().chain(&self.fuzzer.references) {
            if !self.solvers.contains_key(id) {
                return Err(FuzzError::Configuration(format!(
                    "unknown solver id referenced: {id}"
                )));
            }
        }
        Ok(())
    }

    /// The parsed, recognized generator options.
    pub fn fuzzer_options(&self) -> FuzzerOptions {
        FuzzerOptions::parse(&self.fuzzer.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_and_passthrough_options() {
        let raw = vec![
            "samp_size(3)".to_string(),
            "solutions_only".to_string(),
            "some_future_flag".to_string(),
        ];
        let options = FuzzerOptions::parse(&raw);
        assert_eq!(options.samp_size, 3);
        assert!(options.solutions_only);
        assert!(!options.min_one_solution);
        assert_eq!(options.other, vec!["some_future_flag".to_string()]);
    }

    #[test]
    fn expands_braced_and_bare_env_vars() {
        std::env::set_var("MUNCHKIN_FUZZ_TEST_VAR", "/opt/solver");
        assert_eq!(
            expand_env_vars("${MUNCHKIN_FUZZ_TEST_VAR}/bin"),
            "/opt/solver/bin"
        );
        assert_eq!(
            expand_env_vars("$MUNCHKIN_FUZZ_TEST_VAR/bin"),
            "/opt/solver/bin"
        );
        std::env::remove_var("MUNCHKIN_FUZZ_TEST_VAR");
    }

    #[test]
    fn rejects_unknown_solver_ids() {
        let yaml = r#"
fuzzer:
  path: /bin/true
  targets: ["a"]
  references: []
solvers: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn preference_bool_renders_true_false() {
        let mut map = HashMap::new();
        map.insert("TIME_OUT".to_string(), PreferenceValue::Bool(true));
        let pref = Preference::KeyValue(map);
        assert_eq!(pref.to_cli_args(), vec!["-p", "TIME_OUT", "TRUE"]);
    }
}
