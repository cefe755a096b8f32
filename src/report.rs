//! Training progress reporting.
//!
//! The training loop does not log on its own: it emits one [`EpochReport`]
//! per epoch to an injected [`Reporter`]. Library users decide where the
//! reports go; [`LogReporter`] forwards them to the `log` facade and
//! [`NullReporter`] discards them.

/// Summary of one completed training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// Epoch number, starting at 1.
    pub epoch: usize,
    /// Mean cross-entropy loss over the epoch's training batches.
    pub train_loss: f32,
    /// Accuracy on the held-out validation split, in [0, 1].
    pub val_acc: f32,
    /// Best validation accuracy seen so far in this run.
    pub best_acc: f32,
}

/// Receives per-epoch training summaries.
pub trait Reporter {
    fn on_epoch(&mut self, report: &EpochReport);
}

/// Forwards epoch reports to the `log` facade at info level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn on_epoch(&mut self, report: &EpochReport) {
        log::info!(
            "epoch {}: loss {:.4}, val acc {:.2}% (best {:.2}%)",
            report.epoch,
            report.train_loss,
            report.val_acc * 100.0,
            report.best_acc * 100.0
        );
    }
}

/// Discards all reports. Useful in tests and batch jobs.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn on_epoch(&mut self, _report: &EpochReport) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<EpochReport>);

    impl Reporter for Recorder {
        fn on_epoch(&mut self, report: &EpochReport) {
            self.0.push(*report);
        }
    }

    #[test]
    fn test_custom_reporter_receives_reports() {
        let mut recorder = Recorder(Vec::new());
        let report = EpochReport {
            epoch: 1,
            train_loss: 0.5,
            val_acc: 0.9,
            best_acc: 0.9,
        };
        recorder.on_epoch(&report);
        assert_eq!(recorder.0, vec![report]);
    }
}
