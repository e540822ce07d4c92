//! Append-only CSV result writer (spec §6, §5 "Shared resources").
//!
//! The header is `margin,<sid1>,<sid2>,...,pred,raw_ast` with solver ids
//! sorted lexicographically. Quoting of `pred`/`raw_ast` does not escape
//! embedded quotes, matching the original tool's writer and its reader in
//! `examples/original_source/probandit/replay.py` (spec §9 open question,
//! resolved to preserve bit-for-bit).

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// One row to append: the computed margin, per-solver times (missing
/// entries left blank), the predicate, and its raw AST.
pub struct CsvRow<'a> {
    /// `min(target times) - max(reference times)`, in ms.
    pub margin: i64,
    /// Per-solver time in ms, looked up by solver id for each header
    /// column; `None` when that solver produced no result this iteration.
    pub solver_times: &'a [(String, Option<i64>)],
    /// The predicate's pretty-printed source text.
    pub pred: &'a str,
    /// The predicate's raw (generator-internal) AST text.
    pub raw_ast: &'a str,
}

/// A coordinator-owned append-only CSV file handle. Every write is flushed
/// immediately so partial runs are recoverable (spec §5).
pub struct CsvSink {
    file: File,
    solver_ids: Vec<String>,
}

impl CsvSink {
    /// Opens (creating if absent) `path` and, if the file is new, writes
    /// the header row built from `solver_ids` sorted lexicographically.
    pub fn open(path: impl AsRef<Path>, solver_ids: &[String]) -> std::io::Result<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();

        let mut solver_ids: Vec<String> = solver_ids.to_vec();
        solver_ids.sort();

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if is_new {
            let mut header = String::from("margin");
            for id in &solver_ids {
                header.push(',');
                header.push_str(id);
            }
            header.push_str(",pred,raw_ast\n");
            file.write_all(header.as_bytes())?;
            file.flush()?;
        }

        Ok(CsvSink { file, solver_ids })
    }

    /// Appends one row and flushes.
    pub fn append(&mut self, row: &CsvRow<'_>) -> std::io::Result<()> {
        let mut line = row.margin.to_string();
        for id in &self.solver_ids {
            line.push(',');
            if let Some((_, Some(time))) = row.solver_times.iter().find(|(sid, _)| sid == id) {
                line.push_str(&time.to_string());
            }
        }
        line.push_str(&format!(",\"{}\",\"{}\"\n", row.pred, row.raw_ast));
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

/// Appends one line to the contradictions log (spec §4.7 step c, §9).
pub fn append_contradiction(path: impl AsRef<Path>, pred: &str, raw_ast: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "\"{pred}\",\"{raw_ast}\"")?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_sorted_header_once_and_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let solver_ids = vec!["zeta".to_string(), "alpha".to_string()];
        let mut sink = CsvSink::open(&path, &solver_ids).unwrap();
        sink.append(&CsvRow {
            margin: 50,
            solver_times: &[("alpha".to_string(), Some(10)), ("zeta".to_string(), Some(20))],
            pred: "x = 1",
            raw_ast: "eq(x,1)",
        })
        .unwrap();

        // Reopening an existing file must not duplicate the header.
        drop(sink);
        let mut sink = CsvSink::open(&path, &solver_ids).unwrap();
        sink.append(&CsvRow {
            margin: -5,
            solver_times: &[("alpha".to_string(), None), ("zeta".to_string(), Some(99))],
            pred: "y = 2",
            raw_ast: "eq(y,2)",
        })
        .unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("margin,alpha,zeta,pred,raw_ast"));
        assert_eq!(lines.next(), Some("50,10,20,\"x = 1\",\"eq(x,1)\""));
        assert_eq!(lines.next(), Some("-5,,99,\"y = 2\",\"eq(y,2)\""));
    }

    #[test]
    fn embedded_quotes_are_not_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut sink = CsvSink::open(&path, &[]).unwrap();
        sink.append(&CsvRow {
            margin: 1,
            solver_times: &[],
            pred: "x = \"quoted\"",
            raw_ast: "raw",
        })
        .unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("\"x = \"quoted\"\",\"raw\""));
    }
}
