//! The two per-network report files of a sweep.
//!
//! `res_<n>.txt` collects one result block per configuration; `times_<n>.txt`
//! collects the matching timing block. Both are flushed after every
//! configuration so partial sweeps leave readable files behind.

use crate::robustness::RobustnessOutcome;
use sigma_core::{Result, SigmaError, SolveOutcome};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug)]
pub struct ReportFiles {
    res: File,
    times: File,
}

impl ReportFiles {
    /// Create `res_<n>.txt` and `times_<n>.txt` in `dir`. Both files must
    /// not already exist.
    pub fn create(dir: &Path, count: usize) -> Result<Self> {
        let open = |name: String| -> Result<File> {
            let path = dir.join(&name);
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| SigmaError::io(format!("creating report file {}", path.display()), e))
        };
        Ok(Self {
            res: open(format!("res_{}.txt", count))?,
            times: open(format!("times_{}.txt", count))?,
        })
    }

    /// Append one configuration's blocks and flush both files.
    pub fn append(&mut self, count: usize, delta: f64, run: &RobustnessOutcome) -> Result<()> {
        self.res
            .write_all(results_block(count, delta, run).as_bytes())
            .and_then(|_| self.res.flush())
            .map_err(|e| SigmaError::io("writing results file".to_string(), e))?;
        self.times
            .write_all(times_block(count, delta, run).as_bytes())
            .and_then(|_| self.times.flush())
            .map_err(|e| SigmaError::io("writing times file".to_string(), e))?;
        Ok(())
    }
}

/// One block of the results file.
pub fn results_block(count: usize, delta: f64, run: &RobustnessOutcome) -> String {
    let stats = &run.stats;
    let mut block = String::new();
    block.push_str(&format!("== Net with {} sigmoids and delta: {}\n", count, delta));
    block.push_str(&format!("number splits: {}\n", stats.num_splits));
    block.push_str(&format!(
        "number active: {} / {}\n",
        stats.num_active_pl_constraints, stats.num_pl_constraints
    ));
    block.push_str(&format!(
        "number equations: {}\n",
        stats.num_abstracted_equations
    ));
    block.push_str("result is: \n");

    match &run.outcome {
        SolveOutcome::Unsat => block.push_str("UNSAT\n"),
        SolveOutcome::Sat(assignment) => {
            block.push_str("SAT\n");
            for (i, &var) in run.input_vars.iter().enumerate() {
                let value = assignment.get(var).unwrap_or(0.0);
                block.push_str(&format!("input {} = {}\n", i, value));
            }
            for (i, &var) in run.output_vars.iter().enumerate() {
                let value = assignment.get(var).unwrap_or(0.0);
                block.push_str(&format!("output {} = {}\n", i, value));
            }
        }
    }
    block
}

/// One block of the times file.
pub fn times_block(count: usize, delta: f64, run: &RobustnessOutcome) -> String {
    format!(
        "sigmoids={}\ndelta={}\nresult: {}\ntime={}\n",
        count,
        delta,
        if run.outcome.is_sat() { "sat" } else { "unsat" },
        run.stats.total_time.as_secs_f64()
    )
}
