//! Replays a results CSV against the configured solvers (spec §1, §9),
//! supplemented from `examples/original_source/probandit/replay.py`. Reuses
//! [`crate::search::Solve`] rather than re-evaluating by hand.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use log::info;

use crate::error::FuzzError;
use crate::search::Solve;

/// One row of a previously written results CSV, keyed by header column.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub margin: i64,
    pub pred: String,
    pub raw_ast: String,
}

/// Reads a results CSV written by [`crate::csv_sink::CsvSink`]. Only the
/// leading `margin` column and the trailing `pred`/`raw_ast` columns are
/// kept; per-solver time columns are not needed for replay.
pub fn read_csv(path: impl AsRef<Path>) -> Result<Vec<ResultRow>, FuzzError> {
    let file = File::open(path.as_ref())?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .ok_or_else(|| FuzzError::Configuration("results CSV is empty".to_string()))??;
    let _ = header;

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        rows.push(parse_row(line)?);
    }
    Ok(rows)
}

fn parse_row(line: &str) -> Result<ResultRow, FuzzError> {
    let quote_pos = line.find('"').ok_or_else(|| {
        FuzzError::Configuration(format!("malformed results row, no quoted field: {line:?}"))
    })?;

    // quote_pos - 1 drops the trailing comma before the quoted fields.
    let numeric_part = line.get(..quote_pos.saturating_sub(1)).unwrap_or("");
    let margin: i64 = numeric_part
        .split(',')
        .next()
        .ok_or_else(|| FuzzError::Configuration(format!("malformed results row: {line:?}")))?
        .parse()
        .map_err(|_| FuzzError::Configuration(format!("non-numeric margin in row: {line:?}")))?;

    let quoted = &line[quote_pos + 1..];
    let mut parts = quoted.splitn(2, "\",\"");
    let pred = parts
        .next()
        .ok_or_else(|| FuzzError::Configuration(format!("missing pred field in row: {line:?}")))?
        .to_string();
    let raw_with_trailing_quote = parts
        .next()
        .ok_or_else(|| FuzzError::Configuration(format!("missing raw_ast field in row: {line:?}")))?;
    let raw_ast = raw_with_trailing_quote
        .strip_suffix('"')
        .unwrap_or(raw_with_trailing_quote)
        .to_string();

    Ok(ResultRow { margin, pred, raw_ast })
}

/// Re-solves `row.pred` against every target/reference solver, applying the
/// same per-solver timeout handling as the search loop, and returns the
/// replay margin plus the merged per-solver times.
pub fn replay<S: Solve>(
    row: &ResultRow,
    targets: &mut [S],
    references: &mut [S],
    penalty_factor: f64,
    discard_socket_timeouts: bool,
) -> Result<(i64, HashMap<String, i64>), FuzzError> {
    info!("replaying benchmark {}", row.pred);

    let target_results = crate::search::eval_solvers(
        targets,
        &row.pred,
        1,
        penalty_factor,
        discard_socket_timeouts,
    )?
    .ok_or_else(|| FuzzError::Configuration("target solver timeout discarded during replay".to_string()))?;
    let reference_results = crate::search::eval_solvers(
        references,
        &row.pred,
        1,
        penalty_factor,
        discard_socket_timeouts,
    )?
    .ok_or_else(|| {
        FuzzError::Configuration("reference solver timeout discarded during replay".to_string())
    })?;

    let target_min = target_results
        .iter()
        .map(|(_, reply)| reply.time_ms)
        .min()
        .unwrap_or(0);
    let reference_max = reference_results
        .iter()
        .map(|(_, reply)| reply.time_ms)
        .max()
        .unwrap_or(0);
    let replay_margin = target_min - reference_max;

    let mut merged = HashMap::new();
    for (id, reply) in reference_results.into_iter().chain(target_results) {
        merged.insert(id, reply.time_ms);
    }

    Ok((replay_margin, merged))
}

/// Replays every non-zero-margin row, optionally restarting every solver
/// between rows ("independent" runs) to match `probandit/replay.py`'s
/// `replay_results`. Returns one replay margin per processed row (rows with
/// an original margin of 0 are skipped, not zero-padded).
pub fn replay_results<S: Solve>(
    rows: &[ResultRow],
    targets: &mut [S],
    references: &mut [S],
    independent: bool,
    penalty_factor: f64,
    discard_socket_timeouts: bool,
    restart: &mut dyn FnMut(&mut [S]) -> Result<(), FuzzError>,
) -> Result<Vec<i64>, FuzzError> {
    let mut margins = Vec::new();
    let mut margin_factors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let counter = index + 1;
        if row.margin == 0 {
            info!("skipping benchmark {counter} with margin 0");
            continue;
        }

        let (replay_margin, _) =
            replay(row, targets, references, penalty_factor, discard_socket_timeouts)?;
        margins.push(replay_margin);

        info!("benchmark {counter}: original margin {}, replay margin {replay_margin}", row.margin);
        margin_factors.push(replay_margin as f64 / row.margin as f64);

        if independent {
            debug!("restarting solvers for an independent replay run");
            restart(targets)?;
            restart(references)?;
        }
    }

    if !margin_factors.is_empty() {
        let average = margin_factors.iter().sum::<f64>() / margin_factors.len() as f64;
        info!("average margin factor: {average}");
    }

    Ok(margins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_row() {
        let line = r#"50,10,20,"x = 1","eq(x,1)""#;
        let row = parse_row(line).unwrap();
        assert_eq!(row.margin, 50);
        assert_eq!(row.pred, "x = 1");
        assert_eq!(row.raw_ast, "eq(x,1)");
    }

    #[test]
    fn parses_row_with_missing_solver_column() {
        let line = r#"-5,,99,"y = 2","eq(y,2)""#;
        let row = parse_row(line).unwrap();
        assert_eq!(row.margin, -5);
        assert_eq!(row.pred, "y = 2");
        assert_eq!(row.raw_ast, "eq(y,2)");
    }

    #[test]
    fn round_trips_through_csv_sink() {
        use crate::csv_sink::CsvRow;
        use crate::csv_sink::CsvSink;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let solver_ids = vec!["alpha".to_string(), "zeta".to_string()];
        let mut sink = CsvSink::open(&path, &solver_ids).unwrap();
        sink.append(&CsvRow {
            margin: 42,
            solver_times: &[("alpha".to_string(), Some(1)), ("zeta".to_string(), Some(2))],
            pred: "x = 1",
            raw_ast: "eq(x,1)",
        })
        .unwrap();
        drop(sink);

        let rows = read_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].margin, 42);
        assert_eq!(rows[0].pred, "x = 1");
        assert_eq!(rows[0].raw_ast, "eq(x,1)");
    }
}
