/// Optional side-channel for debugging artifacts (screenshots, page dumps).
/// The detection pipeline calls it at checkpoints but never depends on it for
/// correctness; implementations must swallow their own failures.
pub trait DiagnosticSink {
    fn capture(&self, label: &str);
}

/// Default sink: captures nothing.
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn capture(&self, _label: &str) {}
}
