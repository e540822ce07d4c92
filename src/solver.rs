//! Solver subprocess + sibling B-parser subprocess (spec §4.5).

use std::collections::VecDeque;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::process::Child;
use std::process::ChildStderr;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::config::expand_env_vars;
use crate::config::SolverConfig;
use crate::error::FuzzError;
use crate::solution::translate_solution;
use crate::solution::Bindings;
use crate::term::flatten_dot_list;
use crate::term::parse_term;
use crate::term::translate_bindings;
use crate::term::Number;
use crate::term::Term;
use crate::transport::FramedSocket;
use crate::transport::Terminator;

/// How `Res` classified, once the main reply's `yes(Bindings)` case is
/// reached (spec §4.5 step 5).
#[derive(Debug, Clone)]
pub enum SolveInfo {
    Solution(Bindings),
    ContradictionFound,
    TimeOut,
    NoSolutionFound(String),
    Error(String),
}

/// The full outcome of one `solve` call.
#[derive(Debug, Clone)]
pub enum SolveOutcome {
    /// `yes(Bindings)`.
    Yes(SolveInfo),
    /// `no`, with a best-effort stderr-derived diagnostic (may be empty).
    No(String),
}

/// `(answer/info, time_ms)`, per spec §3 `SolverReply`.
#[derive(Debug, Clone)]
pub struct SolveReply {
    pub outcome: SolveOutcome,
    pub time_ms: i64,
}

/// Background tail of a subprocess's stderr, so a blocking read on the main
/// socket never races a full stderr pipe. Keeps only the most recent lines;
/// spec §4.5 only ever wants "up to 3" of them.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    const CAPACITY: usize = 16;

    fn spawn(stderr: ChildStderr) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(Self::CAPACITY)));
        let sink = Arc::clone(&lines);
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                let mut buf = sink.lock().expect("stderr tail mutex poisoned");
                if buf.len() == Self::CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });
        StderrTail { lines }
    }

    fn recent(&self, n: usize) -> Vec<String> {
        let buf = self.lines.lock().expect("stderr tail mutex poisoned");
        buf.iter().rev().take(n).rev().cloned().collect()
    }
}

struct BParserHandle {
    process: Child,
    socket: FramedSocket,
}

impl BParserHandle {
    fn spawn(jar_path: &Path, timeout: Duration) -> Result<Self, FuzzError> {
        let mut process = Command::new("java")
            .arg("-jar")
            .arg(jar_path)
            .arg("-prepl")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = process.stdout.take().expect("stdout was requested as piped");
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();

        // Port is reported as "<port>." with no label.
        let port: u16 = line
            .split('.')
            .next()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| {
                FuzzError::SolverStartupError {
                    solver_id: "b-parser".to_string(),
                    detail: format!("expected a port number, got {line:?}"),
                }
            })?;

        process.stdout = Some(reader.into_inner());
        let socket = FramedSocket::connect(port, Terminator::Newline, timeout)?;
        Ok(BParserHandle { process, socket })
    }

    /// Parses a B predicate into its Prolog text form, translating a
    /// `parse_exception(...)` reply into [`FuzzError::PredicateParseError`].
    fn parse_to_prolog(&mut self, predicate: &str) -> Result<String, FuzzError> {
        let request = format!("predicate\n{predicate}\n");
        self.socket.send_raw(request.as_bytes())?;
        let reply = self.socket.receive()?;

        if let Some(rest) = reply.strip_prefix("parse_exception") {
            let full = format!("parse_exception{rest}");
            let (term, _) = parse_term(&full)?;
            let message = match &term {
                Term::Compound(_, args) if args.len() >= 2 => term_text(&args[1]),
                other => format!("{other:?}"),
            };
            return Err(FuzzError::PredicateParseError(message));
        }

        Ok(reply)
    }

    fn close(&mut self) {
        let _ = self.socket.send_raw(b"halt\n");
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl Drop for BParserHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn term_text(term: &Term) -> String {
    match term {
        Term::Atom(name) | Term::Variable(name) => name.clone(),
        Term::Number(Number::Int(n)) => n.to_string(),
        Term::Number(Number::Float(f)) => f.to_string(),
        other => format!("{other:?}"),
    }
}

/// A solver subprocess, its parser sibling, and the interrupt mechanism.
pub struct SolverHandle {
    id: String,
    config: SolverConfig,
    resolved_path: String,
    interrupt_cmd_path: std::path::PathBuf,
    interrupt_id: Option<u64>,
    revision: Option<String>,
    process: Option<Child>,
    socket: Option<FramedSocket>,
    stderr: Option<StderrTail>,
    parser: Option<BParserHandle>,
    timeout: Duration,
}

impl SolverHandle {
    /// Resolves `config.path` (expanding env vars, appending `probcli` if it
    /// names a directory) but does not yet spawn anything.
    pub fn new(id: impl Into<String>, config: SolverConfig) -> Self {
        let id = id.into();
        let expanded = expand_env_vars(&config.path);
        let resolved_path = if Path::new(&expanded).is_dir() {
            Path::new(&expanded).join("probcli").to_string_lossy().into_owned()
        } else {
            expanded
        };
        let interrupt_dir = Path::new(&resolved_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let interrupt_bin_name = if cfg!(windows) {
            "send_user_interrupt.exe"
        } else {
            "send_user_interrupt"
        };
        let interrupt_cmd_path = interrupt_dir.join(interrupt_bin_name);
        let timeout = Duration::from_millis(config.timeout_ms());

        SolverHandle {
            id,
            config,
            resolved_path,
            interrupt_cmd_path,
            interrupt_id: None,
            revision: None,
            process: None,
            socket: None,
            stderr: None,
            parser: None,
            timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Launches the solver subprocess and its B-parser sibling, validating
    /// the six-line startup banner (spec §4.5).
    pub fn start(&mut self) -> Result<(), FuzzError> {
        let mut args: Vec<String> = vec!["-sf".to_string()];
        for pref in &self.config.preferences {
            args.extend(pref.to_cli_args());
        }

        let mut process = Command::new(&self.resolved_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = process.stdout.take().expect("stdout was requested as piped");
        let stderr = process.stderr.take().expect("stderr was requested as piped");
        let mut reader = BufReader::new(stdout);

        let line1 = self.read_banner_line(&mut reader)?;
        if line1 != "Starting Socket Server" {
            return Err(self.startup_error(1, &line1));
        }

        let line2 = self.read_banner_line(&mut reader)?;
        if !line2.starts_with("Application Path:") {
            return Err(self.startup_error(2, &line2));
        }

        let line3 = self.read_banner_line(&mut reader)?;
        let port: u16 = line3
            .strip_prefix("Port:")
            .and_then(|rest| rest.trim().parse().ok())
            .ok_or_else(|| self.startup_error(3, &line3))?;

        let line4 = self.read_banner_line(&mut reader)?;
        let revision = line4
            .strip_prefix("probcli revision:")
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| self.startup_error(4, &line4))?;

        let line5 = self.read_banner_line(&mut reader)?;
        let interrupt_id: u64 = line5
            .strip_prefix("user interrupt reference id")
            .and_then(|rest| rest.trim().parse().ok())
            .ok_or_else(|| self.startup_error(5, &line5))?;

        let line6 = self.read_banner_line(&mut reader)?;
        if line6 != "-- starting command loop --" {
            return Err(self.startup_error(6, &line6));
        }

        process.stdout = Some(reader.into_inner());

        self.revision = Some(revision);
        self.interrupt_id = Some(interrupt_id);
        self.stderr = Some(StderrTail::spawn(stderr));
        self.socket = Some(FramedSocket::connect(port, Terminator::Soh, self.timeout)?);

        let jar_path = Path::new(&self.resolved_path)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("lib")
            .join("probcliparser.jar");
        self.parser = Some(BParserHandle::spawn(&jar_path, self.timeout)?);

        self.process = Some(process);
        Ok(())
    }

    fn read_banner_line(&self, reader: &mut BufReader<std::process::ChildStdout>) -> Result<String, FuzzError> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        Ok(line.trim_end().to_string())
    }

    fn startup_error(&self, line_no: u8, got: &str) -> FuzzError {
        FuzzError::SolverStartupError {
            solver_id: self.id.clone(),
            detail: format!("unexpected output on line {line_no}: {got:?}"),
        }
    }

    /// Sends an OS-level interrupt via the sibling `send_user_interrupt`
    /// binary, if present.
    fn send_interrupt(&self) {
        if let Some(interrupt_id) = self.interrupt_id {
            if self.interrupt_cmd_path.exists() {
                let _ = Command::new(&self.interrupt_cmd_path)
                    .arg(interrupt_id.to_string())
                    .status();
            }
        }
    }

    fn socket_mut(&mut self) -> Result<&mut FramedSocket, FuzzError> {
        self.socket
            .as_mut()
            .ok_or_else(|| FuzzError::Configuration(format!("solver {} is not started", self.id)))
    }

    fn parser_mut(&mut self) -> Result<&mut BParserHandle, FuzzError> {
        self.parser
            .as_mut()
            .ok_or_else(|| FuzzError::Configuration(format!("solver {} is not started", self.id)))
    }

    /// Solves `predicate`, sampling `samp_size` times when configured above
    /// one and reporting the ceiling of the mean elapsed time (spec §4.5).
    pub fn solve(&mut self, predicate: &str, samp_size: u32) -> Result<SolveReply, FuzzError> {
        let samp_size = samp_size.max(1);
        let first = self.solve_once(predicate)?;
        if samp_size == 1 {
            return Ok(first);
        }

        let mut total = first.time_ms;
        for _ in 1..samp_size {
            total += self.solve_once(predicate)?.time_ms;
        }
        let mean = (total as f64) / (samp_size as f64);
        Ok(SolveReply {
            outcome: first.outcome,
            time_ms: mean.ceil() as i64,
        })
    }

    fn solve_once(&mut self, predicate: &str) -> Result<SolveReply, FuzzError> {
        let parsed_pred = self.parser_mut()?.parse_to_prolog(predicate)?;

        let options = render_call_options(&self.config.call_options);
        let query = self
            .config
            .prolog_call
            .replace("$pred", &parsed_pred)
            .replace("$base", self.config.base_solver.as_prolog_atom())
            .replace("$options", &options);

        let reply_text = match self.socket_mut()?.request(&query) {
            Ok(text) => text,
            Err(e) => return self.handle_timeout(e),
        };

        let (term, _) = parse_term(&reply_text)?;
        self.classify_reply(&term)
    }

    fn handle_timeout(&mut self, e: std::io::Error) -> Result<SolveReply, FuzzError> {
        if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
            self.send_interrupt();
            let _ = self.restart();
            Err(FuzzError::SolverTimeout {
                solver_id: self.id.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })
        } else {
            Err(FuzzError::Io(e))
        }
    }

    fn classify_reply(&mut self, term: &Term) -> Result<SolveReply, FuzzError> {
        match term {
            Term::Compound(functor, args) if functor == "yes" && args.len() == 1 => {
                let bindings_list = flatten_dot_list(&args[0]).map_err(FuzzError::Translation)?;
                let bindings = translate_bindings(&bindings_list).map_err(FuzzError::Translation)?;

                let res_term = bindings.get(&self.config.call_result_var);
                let time_ms = match bindings.get(&self.config.call_time_var) {
                    Some(Term::Number(Number::Int(n))) => *n,
                    _ => -1,
                };

                let info = self.classify_result(res_term)?;
                Ok(SolveReply {
                    outcome: SolveOutcome::Yes(info),
                    time_ms,
                })
            }
            Term::Atom(name) if name == "no" => {
                let diagnostic = self
                    .stderr
                    .as_ref()
                    .map(|tail| tail.recent(3).join("\n"))
                    .unwrap_or_default();
                Ok(SolveReply {
                    outcome: SolveOutcome::No(diagnostic),
                    time_ms: -1,
                })
            }
            other => Err(FuzzError::Translation(format!(
                "expected yes/1 or no, got {other:?}"
            ))),
        }
    }

    fn classify_result(&mut self, res_term: Option<&Term>) -> Result<SolveInfo, FuzzError> {
        match res_term {
            Some(Term::Atom(name)) if name == "contradiction_found" => {
                Ok(SolveInfo::ContradictionFound)
            }
            Some(Term::Atom(name)) if name == "time_out" => Ok(SolveInfo::TimeOut),
            Some(Term::Compound(functor, args)) if functor == "no_solution_found" && args.len() == 1 => {
                Ok(SolveInfo::NoSolutionFound(term_text(&args[0])))
            }
            Some(Term::Atom(name)) if name == "error" => {
                let diagnostic = self
                    .stderr
                    .as_ref()
                    .map(|tail| tail.recent(3).join("\n"))
                    .unwrap_or_default();
                Ok(SolveInfo::Error(diagnostic))
            }
            Some(solution_term) => {
                let bindings = translate_solution(solution_term).map_err(FuzzError::Translation)?;
                Ok(SolveInfo::Solution(bindings))
            }
            None => Err(FuzzError::Translation(format!(
                "missing {} in reply bindings",
                self.config.call_result_var
            ))),
        }
    }

    /// Queries `get_version/7`, for diagnostics under verbose logging (spec
    /// §3, supplemented feature).
    pub fn version_info(&mut self) -> Result<Bindings, FuzzError> {
        let reply = self.socket_mut()?.request(
            "get_version(Major,Minor,Service,Qualifier,GitRevision,LastChangedDate,PrologInfo).",
        )?;
        let (term, _) = parse_term(&reply)?;
        let Term::Compound(functor, args) = &term else {
            return Err(FuzzError::Translation(format!(
                "expected get_version reply compound, got {term:?}"
            )));
        };
        if functor != "yes" || args.is_empty() {
            return Err(FuzzError::Translation(format!(
                "expected yes/1 version reply, got {term:?}"
            )));
        }
        let bindings_list = flatten_dot_list(&args[0]).map_err(FuzzError::Translation)?;
        translate_bindings(&bindings_list).map_err(FuzzError::Translation)
    }

    /// The `probcli revision:` banner value, once started.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.as_mut() {
            let _ = socket.send("halt.");
        }
        self.socket = None;
        self.parser = None;
        self.stderr = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }

    /// Closes and relaunches the subprocess, preserving handle identity
    /// (spec §4.5 "restart").
    pub fn restart(&mut self) -> Result<(), FuzzError> {
        self.close();
        self.start()
    }
}

impl Drop for SolverHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn render_call_options(options: &[String]) -> String {
    format!("[{}]", options.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_call_options_wraps_as_prolog_list() {
        assert_eq!(render_call_options(&[]), "[]");
        assert_eq!(
            render_call_options(&["a".to_string(), "b".to_string()]),
            "[a, b]"
        );
    }

    #[test]
    fn classify_reply_recognizes_no_atom() {
        let config = SolverConfig {
            path: "/bin/true".to_string(),
            base_solver: crate::config::BaseSolver::Prob,
            preferences: Vec::new(),
            prolog_call: "$pred".to_string(),
            call_options: Vec::new(),
            call_result_var: "Res".to_string(),
            call_time_var: "Msec".to_string(),
        };
        let mut handle = SolverHandle::new("s1", config);
        let reply = handle.classify_reply(&Term::Atom("no".to_string())).unwrap();
        assert!(matches!(reply.outcome, SolveOutcome::No(_)));
        assert_eq!(reply.time_ms, -1);
    }
}
