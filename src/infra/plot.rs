// ============================================================
// Layer 6 — Loss Curve Plot
// ============================================================
// Training and validation loss per epoch as a PNG, drawn with
// plotters' bitmap backend.
//
// Text (caption, axis descriptions, legend) needs a system
// font. When none can be loaded the labelled render fails with
// a font error, and the curve is drawn again without any text.
// Any other failure is final: I/O problems with the output file
// are Io errors, the rest Plot errors.

use std::error::Error;
use std::fs::File;
use std::io;
use std::path::Path;

use plotters_backend::DrawingErrorKind;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;

use crate::domain::{
    epoch_record::EpochRecord,
    error::{FinetuneError, FinetuneResult},
};

const SIZE: (u32, u32) = (800, 600);

/// Why one render attempt failed.
#[derive(Debug)]
enum DrawFailure {
    Font(String),
    Io(io::Error),
    Other(String),
}

impl<E: Error + Send + Sync + 'static> From<DrawingAreaErrorKind<E>> for DrawFailure {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        match err {
            DrawingAreaErrorKind::BackendError(DrawingErrorKind::FontError(e)) => Self::Font(e.to_string()),
            DrawingAreaErrorKind::BackendError(DrawingErrorKind::DrawingError(e)) => {
                let mut source: Option<&(dyn Error + 'static)> = Some(&e);
                while let Some(cause) = source {
                    if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                        return Self::Io(io::Error::new(io_err.kind(), io_err.to_string()));
                    }
                    source = cause.source();
                }
                Self::Other(e.to_string())
            }
            other => Self::Other(other.to_string()),
        }
    }
}

impl DrawFailure {
    fn into_error(self, path: &Path) -> FinetuneError {
        match self {
            Self::Io(e)                        => FinetuneError::io(path, e),
            Self::Font(msg) | Self::Other(msg) => FinetuneError::Plot(msg),
        }
    }
}

type DrawResult = Result<(), DrawFailure>;

pub fn render_loss_curve(history: &[EpochRecord], path: &Path) -> FinetuneResult<()> {
    // the bitmap backend only touches the file in present(),
    // so check it can be created before drawing anything
    File::create(path).map_err(|e| FinetuneError::io(path, e))?;

    match draw(history, path, true) {
        Ok(()) => Ok(()),
        Err(DrawFailure::Font(msg)) => {
            tracing::warn!("Labelled loss plot failed ({msg}); drawing without text");
            draw(history, path, false).map_err(|e| e.into_error(path))
        }
        Err(e) => Err(e.into_error(path)),
    }
}

fn draw(history: &[EpochRecord], path: &Path, labelled: bool) -> DrawResult {
    let training:   Vec<(f64, f64)> = history.iter().map(|r| (r.epoch as f64, r.training_loss)).collect();
    let validation: Vec<(f64, f64)> = history.iter().map(|r| (r.epoch as f64, r.validation_loss)).collect();
    let (x_range, y_range) = ranges(history);

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if labelled {
        builder
            .caption("Loss per epoch", ("sans-serif", 24))
            .x_label_area_size(40)
            .y_label_area_size(60);
    }
    let mut chart = builder.build_cartesian_2d(x_range, y_range)?;

    if labelled {
        chart.configure_mesh().x_desc("epoch").y_desc("loss").draw()?;
    }

    let train_series = chart.draw_series(LineSeries::new(training, &BLUE))?;
    if labelled {
        train_series
            .label("training")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    }
    let valid_series = chart.draw_series(LineSeries::new(validation, &RED))?;
    if labelled {
        valid_series
            .label("validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Axis ranges covering every finite point, never empty.
fn ranges(history: &[EpochRecord]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let last_epoch = history.iter().map(|r| r.epoch).max().unwrap_or(0) as f64;
    let x = 0.0..last_epoch.max(1.0);

    let values = history
        .iter()
        .flat_map(|r| [r.training_loss, r.validation_loss])
        .filter(|v| v.is_finite());
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let y = if lo.is_finite() && hi > lo {
        let pad = (hi - lo) * 0.05;
        (lo - pad)..(hi + pad)
    } else if lo.is_finite() {
        (lo - 1.0)..(lo + 1.0)
    } else {
        0.0..1.0
    };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_cover_all_points() {
        let history = vec![EpochRecord::new(0, 5.0, 6.0), EpochRecord::new(1, 2.0, 3.0)];
        let (x, y) = ranges(&history);
        assert_eq!(x, 0.0..1.0);
        assert!(y.start < 2.0 && y.end > 6.0);
    }

    #[test]
    fn test_ranges_ignore_non_finite_and_empty() {
        assert_eq!(ranges(&[]).1, 0.0..1.0);
        let history = vec![EpochRecord::new(0, f64::NAN, 2.0)];
        assert_eq!(ranges(&history).1, 1.0..3.0);
    }

    #[test]
    fn test_render_writes_png() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.png");
        let history = vec![EpochRecord::new(0, 3.0, 3.5), EpochRecord::new(1, 2.0, 2.75)];
        render_loss_curve(&history, &path).unwrap();
        assert!(fs_len(&path) > 0);
    }

    #[test]
    fn test_unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = vec![EpochRecord::new(0, 3.0, 3.5)];

        // a directory cannot be opened as the PNG file
        let err = render_loss_curve(&history, dir.path()).unwrap_err();
        assert!(matches!(err, FinetuneError::Io { ref path, .. } if path == dir.path()));

        let missing = dir.path().join("no_such_dir").join("loss.png");
        let err = render_loss_curve(&history, &missing).unwrap_err();
        assert!(matches!(err, FinetuneError::Io { .. }));
    }

    fn fs_len(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}
