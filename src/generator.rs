//! Subprocess + socket client for the generation engine (spec §4.4).
//!
//! The generator is single-instance: exactly one [`GeneratorHandle`] is
//! live for the lifetime of a search loop. It owns its subprocess (unless
//! attached to an already-running one via `existing_port`) and its framed
//! socket; `restart` tears both down and recreates them.

use std::io::BufRead;
use std::io::BufReader;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;

use rand::Rng;

use crate::error::FuzzError;
use crate::transport::FramedSocket;
use crate::transport::Terminator;

/// Default time a single generator request is allowed to take before the
/// caller treats it as [`FuzzError::GeneratorTimeout`].
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// A mutation/generation result: the pretty-printed (well-definedness
/// augmented) predicate, its raw AST, and the environment it was generated
/// or mutated in.
#[derive(Debug, Clone)]
pub struct GeneratedPredicate {
    pub wd_pred: String,
    pub raw_ast: String,
    pub env: String,
}

/// Subprocess + socket handle for the generation engine.
pub struct GeneratorHandle {
    path: String,
    existing_port: Option<u16>,
    process: Option<Child>,
    socket: Option<FramedSocket>,
    timeout: Duration,
}

impl GeneratorHandle {
    /// Builds a handle that will spawn its own subprocess on [`Self::connect`].
    pub fn new(path: impl Into<String>) -> Self {
        GeneratorHandle {
            path: path.into(),
            existing_port: None,
            process: None,
            socket: None,
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    /// Builds a handle that attaches to an already-running generator
    /// instead of spawning one, per spec §4.4.
    pub fn attach_existing(path: impl Into<String>, port: u16) -> Self {
        GeneratorHandle {
            path: path.into(),
            existing_port: Some(port),
            process: None,
            socket: None,
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    /// Spawns the subprocess (unless `existing_port` mode) and connects.
    pub fn connect(&mut self) -> Result<(), FuzzError> {
        let port = match self.existing_port {
            Some(port) => port,
            None => {
                let mut child = Command::new(&self.path)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;

                let stdout = child
                    .stdout
                    .take()
                    .expect("stdout was requested as piped");
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                reader.read_line(&mut line)?;
                let line = line.trim_end();

                let port: u16 = line
                    .strip_prefix("Port: ")
                    .and_then(|rest| rest.parse().ok())
                    .ok_or_else(|| {
                        FuzzError::GeneratorProtocolError(format!(
                            "expected 'Port: <n>' banner, got {line:?}"
                        ))
                    })?;

                child.stdout = Some(reader.into_inner());
                self.process = Some(child);
                port
            }
        };

        self.socket = Some(FramedSocket::connect(port, Terminator::Nul, self.timeout)?);
        Ok(())
    }

    fn socket_mut(&mut self) -> Result<&mut FramedSocket, FuzzError> {
        self.socket
            .as_mut()
            .ok_or_else(|| FuzzError::GeneratorProtocolError("not connected".to_string()))
    }

    /// Sends a request; on timeout, restarts the subprocess before
    /// surfacing [`FuzzError::GeneratorTimeout`] (spec §4.4 "Failures").
    fn request(&mut self, message: &str) -> Result<String, FuzzError> {
        match self.socket_mut()?.request(message) {
            Ok(reply) => Ok(reply),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                let timeout_ms = self.timeout.as_millis() as u64;
                let _ = self.restart();
                Err(FuzzError::GeneratorTimeout { timeout_ms })
            }
            Err(e) => Err(FuzzError::Io(e)),
        }
    }

    /// `generate.`: produces a fresh predicate. The `WD:` line is unquoted.
    pub fn generate(&mut self) -> Result<GeneratedPredicate, FuzzError> {
        let answer = self.request("generate.")?;
        parse_triple(&answer, UnquoteField::Wd)
    }

    /// `mutate(Raw,Env,Action).`: mutates an existing predicate under a
    /// named action. Here the `Raw:` line is unquoted instead.
    pub fn mutate(
        &mut self,
        raw_ast: &str,
        env: &str,
        action: &str,
    ) -> Result<GeneratedPredicate, FuzzError> {
        let request = format!("mutate({raw_ast},{env},{action}).");
        let answer = self.request(&request)?;
        parse_triple(&answer, UnquoteField::Raw)
    }

    /// `list_actions(Env).`: the ordered, comma-separated mutation actions
    /// available in `env`.
    pub fn list_actions(&mut self, env: &str) -> Result<Vec<String>, FuzzError> {
        let answer = self.request(&format!("list_actions({env})."))?;
        Ok(answer.trim().split(',').map(str::to_string).collect())
    }

    /// `getrand.`: the generator's current Prolog RNG state.
    pub fn get_random_state(&mut self) -> Result<(i64, i64, i64, i64), FuzzError> {
        let answer = self.request("getrand.")?;
        parse_rand_tuple(&answer)
    }

    /// `setrand(X,Y,Z,B).`: overwrites the generator's Prolog RNG state.
    pub fn set_random_state(&mut self, x: i64, y: i64, z: i64, b: i64) -> Result<(), FuzzError> {
        self.request(&format!("setrand({x},{y},{z},{b})."))?;
        Ok(())
    }

    /// Picks a uniformly random, admissible RNG state and installs it, per
    /// the ranges in spec §4.4.
    pub fn init_random_state(&mut self) -> Result<(i64, i64, i64, i64), FuzzError> {
        let (x, y, z, b) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(1..=30268),
                rng.gen_range(1..=30306),
                rng.gen_range(1..=30322),
                rng.gen_range(1..=1_000_000),
            )
        };
        self.set_random_state(x, y, z, b)?;
        Ok((x, y, z, b))
    }

    /// Closes the socket (sending `halt.` first) and, if owned, terminates
    /// the subprocess.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.as_mut() {
            let _ = socket.send("halt.");
        }
        self.socket = None;
        if let Some(mut child) = self.process.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Destroys and recreates the subprocess and socket, preserving this
    /// handle's identity (spec §4.4, §5 "Cancellation").
    pub fn restart(&mut self) -> Result<(), FuzzError> {
        self.close();
        self.connect()
    }
}

impl Drop for GeneratorHandle {
    fn drop(&mut self) {
        self.close();
    }
}

enum UnquoteField {
    Wd,
    Raw,
}

fn parse_triple(answer: &str, unquote: UnquoteField) -> Result<GeneratedPredicate, FuzzError> {
    let mut lines = answer.lines();
    let raw_line = lines.next().ok_or_else(|| malformed(answer))?;
    let wd_line = lines.next().ok_or_else(|| malformed(answer))?;
    let env_line = lines.next().ok_or_else(|| malformed(answer))?;

    let raw = strip_label(raw_line, "Raw: ")?;
    let wd = strip_label(wd_line, "WD: ")?;
    let env = strip_label(env_line, "Env: ")?;

    let (raw, wd) = match unquote {
        UnquoteField::Wd => (raw.to_string(), deatomify(wd)),
        UnquoteField::Raw => (deatomify(raw), wd.to_string()),
    };

    Ok(GeneratedPredicate {
        wd_pred: wd,
        raw_ast: raw,
        env: env.to_string(),
    })
}

fn strip_label<'a>(line: &'a str, label: &str) -> Result<&'a str, FuzzError> {
    line.strip_prefix(label).ok_or_else(|| {
        FuzzError::GeneratorProtocolError(format!("expected line prefixed {label:?}, got {line:?}"))
    })
}

fn deatomify(text: &str) -> String {
    if text.len() >= 2 {
        let mut chars = text.chars();
        chars.next();
        chars.next_back();
        chars.as_str().to_string()
    } else {
        text.to_string()
    }
}

fn parse_rand_tuple(answer: &str) -> Result<(i64, i64, i64, i64), FuzzError> {
    let parts: Vec<&str> = answer.trim().split(',').collect();
    if parts.len() != 4 {
        return Err(FuzzError::GeneratorProtocolError(format!(
            "expected 4 comma-separated integers, got {answer:?}"
        )));
    }
    let mut values = [0i64; 4];
    for (slot, part) in values.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| FuzzError::GeneratorProtocolError(format!("bad integer {part:?}")))?;
    }
    Ok((values[0], values[1], values[2], values[3]))
}

fn malformed(answer: &str) -> FuzzError {
    FuzzError::GeneratorProtocolError(format!("expected a 3-line reply, got {answer:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deatomify_strips_outer_quotes() {
        assert_eq!(deatomify("'x = 1'"), "x = 1");
    }

    #[test]
    fn parse_triple_generate_unquotes_wd() {
        let answer = "Raw: raw_ast_term\nWD: 'x = 1'\nEnv: env123";
        let predicate = parse_triple(answer, UnquoteField::Wd).unwrap();
        assert_eq!(predicate.raw_ast, "raw_ast_term");
        assert_eq!(predicate.wd_pred, "x = 1");
        assert_eq!(predicate.env, "env123");
    }

    #[test]
    fn parse_triple_mutate_unquotes_raw() {
        let answer = "Raw: 'raw_ast_term'\nWD: x = 1\nEnv: env123";
        let predicate = parse_triple(answer, UnquoteField::Raw).unwrap();
        assert_eq!(predicate.raw_ast, "raw_ast_term");
        assert_eq!(predicate.wd_pred, "x = 1");
    }

    #[test]
    fn parse_rand_tuple_basic() {
        assert_eq!(parse_rand_tuple("1,2,3,4").unwrap(), (1, 2, 3, 4));
    }
}
