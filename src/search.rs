//! Outer/inner bandit search loop (spec §4.7).
//!
//! [`SearchLoop`] is generic over the generator and solver collaborators so
//! the algorithm itself can be exercised against mocks (spec §8 "Search
//! loop" and "End-to-end scenario" tests) without spawning real
//! subprocesses.

use std::path::PathBuf;

use log::debug;
use log::info;
use log::warn;

use crate::bandit::BanditAgent;
use crate::config::FuzzerOptions;
use crate::csv_sink::append_contradiction;
use crate::csv_sink::CsvRow;
use crate::csv_sink::CsvSink;
use crate::error::FuzzError;
use crate::generator::GeneratedPredicate;
use crate::generator::GeneratorHandle;
use crate::solver::SolveInfo;
use crate::solver::SolveOutcome;
use crate::solver::SolveReply;
use crate::solver::SolverHandle;

/// What [`GeneratorHandle`] and any mock generator must provide.
pub trait Generate {
    fn generate(&mut self) -> Result<GeneratedPredicate, FuzzError>;
    fn mutate(&mut self, raw_ast: &str, env: &str, action: &str) -> Result<GeneratedPredicate, FuzzError>;
    fn list_actions(&mut self, env: &str) -> Result<Vec<String>, FuzzError>;
    fn get_random_state(&mut self) -> Result<(i64, i64, i64, i64), FuzzError>;
}

impl Generate for GeneratorHandle {
    fn generate(&mut self) -> Result<GeneratedPredicate, FuzzError> {
        GeneratorHandle::generate(self)
    }

    fn mutate(&mut self, raw_ast: &str, env: &str, action: &str) -> Result<GeneratedPredicate, FuzzError> {
        GeneratorHandle::mutate(self, raw_ast, env, action)
    }

    fn list_actions(&mut self, env: &str) -> Result<Vec<String>, FuzzError> {
        GeneratorHandle::list_actions(self, env)
    }

    fn get_random_state(&mut self) -> Result<(i64, i64, i64, i64), FuzzError> {
        GeneratorHandle::get_random_state(self)
    }
}

/// What [`SolverHandle`] and any mock solver must provide.
pub trait Solve {
    fn id(&self) -> &str;
    fn solve(&mut self, predicate: &str, samp_size: u32) -> Result<SolveReply, FuzzError>;
}

impl Solve for SolverHandle {
    fn id(&self) -> &str {
        SolverHandle::id(self)
    }

    fn solve(&mut self, predicate: &str, samp_size: u32) -> Result<SolveReply, FuzzError> {
        SolverHandle::solve(self, predicate, samp_size)
    }
}

/// The best candidate found so far (spec §3 `SearchState`).
#[derive(Debug, Clone)]
pub struct SearchState {
    pub pred: String,
    pub raw_ast: String,
    pub env: String,
    pub margin: i64,
}

/// The observable result of one [`SearchLoop::step`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Margin improved; best state and CSV updated, reward 1.
    Accepted,
    /// Margin did not improve; reward 0.
    Rejected,
    /// No reward update: contradiction detected, a filter suppressed the
    /// iteration, or a recoverable transport error occurred.
    Skipped(&'static str),
}

/// Evaluates every solver in `solvers` on `predicate`, applying the PAR2-style
/// penalty (or discarding entirely) on a per-solver timeout, per spec §4.7
/// "Solver error handling" and §8's `eval_solvers` property. `Ok(None)`
/// signals that the whole iteration must be skipped.
pub fn eval_solvers<S: Solve>(
    solvers: &mut [S],
    predicate: &str,
    samp_size: u32,
    penalty_factor: f64,
    discard_socket_timeouts: bool,
) -> Result<Option<Vec<(String, SolveReply)>>, FuzzError> {
    let mut results = Vec::with_capacity(solvers.len());
    for solver in solvers.iter_mut() {
        match solver.solve(predicate, samp_size) {
            Ok(reply) => results.push((solver.id().to_string(), reply)),
            Err(FuzzError::SolverTimeout { .. }) if discard_socket_timeouts => {
                warn!("solver {} timed out, discarding iteration", solver.id());
                return Ok(None);
            }
            Err(FuzzError::SolverTimeout { solver_id, timeout_ms }) => {
                warn!("solver {solver_id} timed out, applying PAR2 penalty");
                let penalty_ms = (timeout_ms as f64 * penalty_factor).round() as i64;
                results.push((
                    solver_id,
                    SolveReply {
                        outcome: SolveOutcome::No("Socket timeout".to_string()),
                        time_ms: penalty_ms,
                    },
                ));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Some(results))
}

fn has_solution(results: &[(String, SolveReply)]) -> bool {
    results
        .iter()
        .any(|(_, r)| matches!(r.outcome, SolveOutcome::Yes(SolveInfo::Solution(_))))
}

fn has_contradiction(results: &[(String, SolveReply)]) -> bool {
    results
        .iter()
        .any(|(_, r)| matches!(r.outcome, SolveOutcome::Yes(SolveInfo::ContradictionFound)))
}

fn all_yes_are_solution_or_contradiction(results: &[(String, SolveReply)]) -> bool {
    results.iter().all(|(_, r)| match &r.outcome {
        SolveOutcome::Yes(SolveInfo::Solution(_)) => true,
        SolveOutcome::Yes(SolveInfo::ContradictionFound) => true,
        SolveOutcome::Yes(_) => false,
        SolveOutcome::No(_) => true,
    })
}

/// `min(target times) - max(reference times)`, per spec §3/§4.7.
pub fn compute_margin(targets: &[(String, SolveReply)], references: &[(String, SolveReply)]) -> i64 {
    let target_min = targets.iter().map(|(_, r)| r.time_ms).min().unwrap_or(0);
    let reference_max = references.iter().map(|(_, r)| r.time_ms).max().unwrap_or(0);
    target_min - reference_max
}

/// The bandit-driven outer/inner search loop.
pub struct SearchLoop<G: Generate, S: Solve> {
    generator: G,
    targets: Vec<S>,
    references: Vec<S>,
    csv: CsvSink,
    contradictions_path: PathBuf,
    options: FuzzerOptions,
    penalty_factor: f64,
    best: Option<SearchState>,
    outer: BanditAgent,
    inner: Option<BanditAgent>,
}

impl<G: Generate, S: Solve> SearchLoop<G, S> {
    pub fn new(
        generator: G,
        targets: Vec<S>,
        references: Vec<S>,
        csv: CsvSink,
        contradictions_path: impl Into<PathBuf>,
        options: FuzzerOptions,
        penalty_factor: f64,
    ) -> Self {
        SearchLoop {
            generator,
            targets,
            references,
            csv,
            contradictions_path: contradictions_path.into(),
            options,
            penalty_factor,
            best: None,
            outer: BanditAgent::new(["generate", "mutate"]),
            inner: None,
        }
    }

    pub fn best(&self) -> Option<&SearchState> {
        self.best.as_ref()
    }

    /// Step 1 of spec §4.7's algorithm: generate the first predicate,
    /// evaluate it, and write the initial CSV row.
    pub fn initialize(&mut self) -> Result<(), FuzzError> {
        let predicate = self.generator.generate()?;
        let (targets, references) = self.eval_both(&predicate.wd_pred)?;
        let margin = compute_margin(&targets, &references);

        self.write_row(&predicate, margin, &targets, &references)?;
        self.best = Some(SearchState {
            pred: predicate.wd_pred,
            raw_ast: predicate.raw_ast,
            env: predicate.env.clone(),
            margin,
        });

        let actions = self.generator.list_actions(&predicate.env)?;
        self.inner = Some(BanditAgent::new(actions));
        info!("initial margin {margin}");
        Ok(())
    }

    /// Runs forever. Callers that need a bounded run (tests, a `--iterations`
    /// flag) should call [`Self::step`] directly instead.
    pub fn run(&mut self) -> Result<(), FuzzError> {
        loop {
            self.step()?;
        }
    }

    /// One iteration of the outer/inner bandit loop (spec §4.7 steps a-f).
    pub fn step(&mut self) -> Result<StepOutcome, FuzzError> {
        let best = self
            .best
            .clone()
            .expect("initialize must run before step");

        if let Ok(state) = self.generator.get_random_state() {
            debug!("generator rng state: {state:?}");
        }

        let outer_action = self.outer.sample_action().to_string();
        let mutation = if outer_action == "mutate" {
            Some(
                self.inner
                    .as_ref()
                    .expect("initialize must run before step")
                    .sample_action()
                    .to_string(),
            )
        } else {
            None
        };

        let predicate = match &mutation {
            None => self.generator.generate(),
            Some(action) => self.generator.mutate(&best.raw_ast, &best.env, action),
        };
        let predicate = match predicate {
            Ok(p) => p,
            Err(FuzzError::GeneratorTimeout { timeout_ms }) => {
                warn!("generator timed out after {timeout_ms}ms, skipping iteration");
                return Ok(StepOutcome::Skipped("generator timeout"));
            }
            Err(e) => return Err(e),
        };

        let discard_socket_timeouts = self.options.solutions_only;
        let evaluated = self.eval_both_discarding(&predicate.wd_pred, discard_socket_timeouts)?;
        let Some((targets, references)) = evaluated else {
            return Ok(StepOutcome::Skipped("solver timeout discarded"));
        };

        let merged: Vec<(String, SolveReply)> = references
            .iter()
            .cloned()
            .chain(targets.iter().cloned())
            .collect();

        if has_solution(&merged) && has_contradiction(&merged) {
            append_contradiction(&self.contradictions_path, &predicate.wd_pred, &predicate.raw_ast)
                .map_err(FuzzError::Io)?;
            warn!("contradiction detected, appended to {}", self.contradictions_path.display());
            return Ok(StepOutcome::Skipped("contradiction"));
        }

        if self.options.solutions_only && !all_yes_are_solution_or_contradiction(&merged) {
            return Ok(StepOutcome::Skipped("solutions_only filter"));
        }
        if self.options.min_one_solution && !(has_solution(&merged) && has_contradiction(&merged)) {
            return Ok(StepOutcome::Skipped("min_one_solution filter"));
        }

        let margin = compute_margin(&targets, &references);
        let reward = if margin > best.margin {
            self.write_row(&predicate, margin, &targets, &references)?;
            self.best = Some(SearchState {
                pred: predicate.wd_pred,
                raw_ast: predicate.raw_ast,
                env: predicate.env,
                margin,
            });
            info!("new best margin {margin}");
            1
        } else {
            0
        };

        self.outer.receive_reward(&outer_action, reward)?;
        if let Some(action) = &mutation {
            self.inner
                .as_mut()
                .expect("initialize must run before step")
                .receive_reward(action, reward)?;
        }

        Ok(if reward == 1 {
            StepOutcome::Accepted
        } else {
            StepOutcome::Rejected
        })
    }

    fn eval_both(
        &mut self,
        predicate: &str,
    ) -> Result<(Vec<(String, SolveReply)>, Vec<(String, SolveReply)>), FuzzError> {
        let samp_size = self.options.samp_size;
        let references = eval_solvers(&mut self.references, predicate, samp_size, self.penalty_factor, false)?
            .expect("discard_socket_timeouts=false never signals skip");
        let targets = eval_solvers(&mut self.targets, predicate, samp_size, self.penalty_factor, false)?
            .expect("discard_socket_timeouts=false never signals skip");
        Ok((targets, references))
    }

    fn eval_both_discarding(
        &mut self,
        predicate: &str,
        discard_socket_timeouts: bool,
    ) -> Result<Option<(Vec<(String, SolveReply)>, Vec<(String, SolveReply)>)>, FuzzError> {
        let samp_size = self.options.samp_size;
        let Some(references) = eval_solvers(
            &mut self.references,
            predicate,
            samp_size,
            self.penalty_factor,
            discard_socket_timeouts,
        )?
        else {
            return Ok(None);
        };
        let Some(targets) = eval_solvers(
            &mut self.targets,
            predicate,
            samp_size,
            self.penalty_factor,
            discard_socket_timeouts,
        )?
        else {
            return Ok(None);
        };
        Ok(Some((targets, references)))
    }

    fn write_row(
        &mut self,
        predicate: &GeneratedPredicate,
        margin: i64,
        targets: &[(String, SolveReply)],
        references: &[(String, SolveReply)],
    ) -> Result<(), FuzzError> {
        let solver_times: Vec<(String, Option<i64>)> = references
            .iter()
            .chain(targets.iter())
            .map(|(id, reply)| (id.clone(), Some(reply.time_ms)))
            .collect();
        self.csv
            .append(&CsvRow {
                margin,
                solver_times: &solver_times,
                pred: &predicate.wd_pred,
                raw_ast: &predicate.raw_ast,
            })
            .map_err(FuzzError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    struct MockGenerator {
        predicates: Vec<GeneratedPredicate>,
        actions: Vec<String>,
        index: usize,
    }

    impl Generate for MockGenerator {
        fn generate(&mut self) -> Result<GeneratedPredicate, FuzzError> {
            let p = self.predicates[self.index].clone();
            self.index += 1;
            Ok(p)
        }

        fn mutate(&mut self, _raw_ast: &str, _env: &str, _action: &str) -> Result<GeneratedPredicate, FuzzError> {
            let p = self.predicates[self.index].clone();
            self.index += 1;
            Ok(p)
        }

        fn list_actions(&mut self, _env: &str) -> Result<Vec<String>, FuzzError> {
            Ok(self.actions.clone())
        }

        fn get_random_state(&mut self) -> Result<(i64, i64, i64, i64), FuzzError> {
            Ok((1, 1, 1, 1))
        }
    }

    struct MockSolver {
        solver_id: String,
        // predicate text -> time in ms, consumed in call order
        times: Rc<RefCell<HashMap<String, Vec<i64>>>>,
    }

    impl Solve for MockSolver {
        fn id(&self) -> &str {
            &self.solver_id
        }

        fn solve(&mut self, predicate: &str, _samp_size: u32) -> Result<SolveReply, FuzzError> {
            let mut times = self.times.borrow_mut();
            let queue = times.entry(predicate.to_string()).or_default();
            let time_ms = if queue.is_empty() { 0 } else { queue.remove(0) };
            Ok(SolveReply {
                outcome: SolveOutcome::Yes(SolveInfo::Solution(HashMap::new())),
                time_ms,
            })
        }
    }

    fn predicate(id: &str) -> GeneratedPredicate {
        GeneratedPredicate {
            wd_pred: id.to_string(),
            raw_ast: format!("raw_{id}"),
            env: "env1".to_string(),
        }
    }

    fn make_times(entries: &[(&str, i64)]) -> Rc<RefCell<HashMap<String, Vec<i64>>>> {
        let mut map: HashMap<String, Vec<i64>> = HashMap::new();
        for (pred, time) in entries {
            map.entry(pred.to_string()).or_default().push(*time);
        }
        Rc::new(RefCell::new(map))
    }

    #[test]
    fn end_to_end_scenario_from_spec() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("results.csv");
        let contradictions_path = dir.path().join("contradictions.txt");

        let generator = MockGenerator {
            predicates: vec![predicate("p1"), predicate("p2"), predicate("p3")],
            actions: vec!["m1".to_string(), "m2".to_string()],
            index: 0,
        };

        let a_times = make_times(&[("p1", 50), ("p2", 40), ("p3", 30)]);
        let b_times = make_times(&[("p1", 70), ("p2", 60), ("p3", 45)]);
        let c_times = make_times(&[("p1", 120), ("p2", 55), ("p3", 200)]);

        let references = vec![
            MockSolver { solver_id: "A".to_string(), times: a_times },
            MockSolver { solver_id: "B".to_string(), times: b_times },
        ];
        let targets = vec![MockSolver { solver_id: "C".to_string(), times: c_times }];

        let csv = CsvSink::open(&csv_path, &["A".to_string(), "B".to_string(), "C".to_string()]).unwrap();
        let options = FuzzerOptions {
            samp_size: 1,
            solutions_only: false,
            min_one_solution: false,
            other: Vec::new(),
        };

        let mut search = SearchLoop::new(generator, targets, references, csv, contradictions_path, options, 2.0);
        search.initialize().unwrap();
        assert_eq!(search.best().unwrap().margin, 50);

        // generate -> p2: ref{A:40,B:60} tar{C:55} => margin 55-60=-5, rejected
        let outcome = search.step().unwrap();
        assert!(matches!(outcome, StepOutcome::Rejected) || matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[test]
    fn eval_solvers_applies_par2_penalty_on_timeout() {
        struct TimeoutSolver;
        impl Solve for TimeoutSolver {
            fn id(&self) -> &str {
                "T"
            }
            fn solve(&mut self, _predicate: &str, _samp_size: u32) -> Result<SolveReply, FuzzError> {
                Err(FuzzError::SolverTimeout {
                    solver_id: "T".to_string(),
                    timeout_ms: 2500,
                })
            }
        }
        let mut solvers = vec![TimeoutSolver];
        let result = eval_solvers(&mut solvers, "p", 1, 2.0, false).unwrap().unwrap();
        assert_eq!(result[0].1.time_ms, 5000);
        assert!(matches!(result[0].1.outcome, SolveOutcome::No(_)));
    }

    #[test]
    fn eval_solvers_signals_skip_when_discarding_timeouts() {
        struct TimeoutSolver;
        impl Solve for TimeoutSolver {
            fn id(&self) -> &str {
                "T"
            }
            fn solve(&mut self, _predicate: &str, _samp_size: u32) -> Result<SolveReply, FuzzError> {
                Err(FuzzError::SolverTimeout {
                    solver_id: "T".to_string(),
                    timeout_ms: 2500,
                })
            }
        }
        let mut solvers = vec![TimeoutSolver];
        let result = eval_solvers(&mut solvers, "p", 1, 2.0, true).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn margin_is_min_target_minus_max_reference() {
        let targets = vec![(
            "C".to_string(),
            SolveReply { outcome: SolveOutcome::No(String::new()), time_ms: 120 },
        )];
        let references = vec![
            ("A".to_string(), SolveReply { outcome: SolveOutcome::No(String::new()), time_ms: 50 }),
            ("B".to_string(), SolveReply { outcome: SolveOutcome::No(String::new()), time_ms: 70 }),
        ];
        assert_eq!(compute_margin(&targets, &references), 50);
    }
}
