// ============================================================
// Layer 6 — Metrics Reporter
// ============================================================
// Keeps the epoch history of a run and appends one line per
// epoch to a tab-separated log:
//
//   <epoch>\t<training_loss>\t<validation_loss>
//
// The log has no header and is opened in append mode for every
// record, so a second run adds its lines after the first one's.
// Each line is flushed before record() returns.
//
// finalize() renders the whole history as a PNG loss curve.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::{
    epoch_record::EpochRecord,
    error::{FinetuneError, FinetuneResult},
};
use crate::infra::plot::render_loss_curve;

pub struct MetricsReporter {
    log_path:  PathBuf,
    plot_path: Option<PathBuf>,
    history:   Vec<EpochRecord>,
}

impl MetricsReporter {
    /// Parent directories of both paths are created up front so a
    /// bad location fails before any training happens.
    pub fn new(log_path: impl Into<PathBuf>, plot_path: Option<PathBuf>) -> FinetuneResult<Self> {
        let log_path = log_path.into();
        ensure_parent(&log_path)?;
        if let Some(plot) = &plot_path {
            ensure_parent(plot)?;
        }
        Ok(Self { log_path, plot_path, history: Vec::new() })
    }

    /// Append one epoch to the history and the log file.
    pub fn record(&mut self, epoch: usize, training_loss: f64, validation_loss: f64) -> FinetuneResult<()> {
        let record = EpochRecord::new(epoch, training_loss, validation_loss);

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| FinetuneError::io(&self.log_path, e))?;
        writeln!(f, "{}\t{}\t{}", record.epoch, record.training_loss, record.validation_loss)
            .and_then(|_| f.flush())
            .map_err(|e| FinetuneError::io(&self.log_path, e))?;

        tracing::debug!(
            "Logged epoch {}: training={:.4}, validation={:.4}",
            epoch, training_loss, validation_loss,
        );
        self.history.push(record);
        Ok(())
    }

    /// Render the loss curve, if a plot path was configured.
    pub fn finalize(&self) -> FinetuneResult<()> {
        let Some(plot) = &self.plot_path else { return Ok(()) };
        render_loss_curve(&self.history, plot)?;
        tracing::info!("Loss curve written to '{}'", plot.display());
        Ok(())
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }
}

fn ensure_parent(path: &Path) -> FinetuneResult<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| FinetuneError::io(dir, e))
        }
        _ => Ok(()),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_record_appends_tab_separated_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("loss.tsv");
        let mut m = MetricsReporter::new(&log, None).unwrap();

        m.record(0, 2.5, 3.25).unwrap();
        assert_eq!(lines(&log), vec!["0\t2.5\t3.25"]);
        assert_eq!(m.history(), &[EpochRecord::new(0, 2.5, 3.25)]);
    }

    #[test]
    fn test_second_run_appends_after_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("loss.tsv");

        let mut first = MetricsReporter::new(&log, None).unwrap();
        first.record(0, 4.0, 4.5).unwrap();
        first.record(1, 3.0, 3.5).unwrap();
        let before = lines(&log);

        let mut second = MetricsReporter::new(&log, None).unwrap();
        for epoch in 0..3 {
            second.record(epoch, 1.0, 1.0).unwrap();
        }

        let after = lines(&log);
        assert_eq!(after.len(), 5);
        assert_eq!(&after[..2], &before[..]);
        // history is per reporter, the log is shared
        assert_eq!(second.history().len(), 3);
    }

    #[test]
    fn test_unwritable_log_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the log file should be
        let log = dir.path().join("taken");
        fs::create_dir(&log).unwrap();

        let mut m = MetricsReporter::new(&log, None).unwrap();
        assert!(matches!(m.record(0, 1.0, 1.0), Err(FinetuneError::Io { .. })));
        assert!(m.history().is_empty());
    }

    #[test]
    fn test_finalize_without_plot_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = MetricsReporter::new(dir.path().join("loss.tsv"), None).unwrap();
        m.record(0, 1.0, 2.0).unwrap();
        m.finalize().unwrap();
    }
}
