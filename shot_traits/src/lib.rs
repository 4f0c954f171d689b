pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Downstream consumer of published items (graphing, history, calibration store).
///
/// Sinks only observe; they never reach back into the producer's state.
pub trait Sink<T> {
    fn publish(&mut self, item: &T) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
