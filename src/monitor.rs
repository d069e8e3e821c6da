//! Training observation hooks.
//!
//! The estimator reports scalars and kernel snapshots through a
//! [`Monitor`] so callers choose where diagnostics go without the
//! training loop knowing about terminals or files.

/// Sink for training diagnostics.
pub trait Monitor {
    /// Report a named scalar for an iteration.
    fn scalar(&mut self, name: &str, value: f32, iteration: u64);

    /// Report a named 2D map (e.g. the current kernel) for an
    /// iteration, row-major.
    fn image(&mut self, name: &str, data: &[f32], height: usize, width: usize, iteration: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn scalar(&mut self, _name: &str, _value: f32, _iteration: u64) {}

    fn image(&mut self, _name: &str, _data: &[f32], _h: usize, _w: usize, _iteration: u64) {}
}

/// Prints scalars to stdout, one line per report. Image reports are
/// summarized by their extrema rather than dumped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleMonitor;

impl Monitor for ConsoleMonitor {
    fn scalar(&mut self, name: &str, value: f32, iteration: u64) {
        println!("iter {iteration:>5}  {name} = {value:.6}");
    }

    fn image(&mut self, name: &str, data: &[f32], height: usize, width: usize, iteration: u64) {
        let min = data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        println!("iter {iteration:>5}  {name} [{height}x{width}] min={min:.4} max={max:.4}");
    }
}

/// Records every report in memory. Used in tests to assert on the
/// monitoring cadence.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    pub scalars: Vec<(String, f32, u64)>,
    pub images: Vec<(String, usize, usize, u64)>,
}

impl Monitor for RecordingMonitor {
    fn scalar(&mut self, name: &str, value: f32, iteration: u64) {
        self.scalars.push((name.to_string(), value, iteration));
    }

    fn image(&mut self, name: &str, _data: &[f32], height: usize, width: usize, iteration: u64) {
        self.images.push((name.to_string(), height, width, iteration));
    }
}
