//! Point database shared by every session.

use crate::config::PointsConfig;
use dnpwire_protocol::InternalIndicators;
use parking_lot::RwLock;

/// Point types held by the outstation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    BinaryInput,
    BinaryOutput,
    Counter,
    AnalogInput,
}

#[derive(Debug, Clone)]
struct Points {
    binary_inputs: Vec<bool>,
    binary_outputs: Vec<bool>,
    counters: Vec<u32>,
    analog_inputs: Vec<i32>,
    indicators: InternalIndicators,
}

impl Points {
    fn boot(initial: &PointsConfig) -> Self {
        Self {
            binary_inputs: initial.binary_inputs.clone(),
            binary_outputs: initial.binary_outputs.clone(),
            counters: initial.counters.clone(),
            analog_inputs: initial.analog_inputs.clone(),
            indicators: InternalIndicators::new().with(InternalIndicators::RESTART),
        }
    }
}

fn range<T: Copy>(values: &[T], start: u16, stop: u16) -> Option<Vec<T>> {
    values
        .get(usize::from(start)..=usize::from(stop))
        .map(<[T]>::to_vec)
}

/// Current point values and internal indications.
///
/// The restart indication is set at boot and after a cold or warm restart
/// until a master clears it.
#[derive(Debug)]
pub struct Database {
    initial: PointsConfig,
    points: RwLock<Points>,
}

impl Database {
    pub fn new(initial: &PointsConfig) -> Self {
        Self {
            initial: initial.clone(),
            points: RwLock::new(Points::boot(initial)),
        }
    }

    /// Number of points of `kind`.
    pub fn len(&self, kind: PointKind) -> usize {
        let points = self.points.read();
        match kind {
            PointKind::BinaryInput => points.binary_inputs.len(),
            PointKind::BinaryOutput => points.binary_outputs.len(),
            PointKind::Counter => points.counters.len(),
            PointKind::AnalogInput => points.analog_inputs.len(),
        }
    }

    /// States `start..=stop` of binary inputs or outputs.
    pub fn binary(&self, kind: PointKind, start: u16, stop: u16) -> Option<Vec<bool>> {
        let points = self.points.read();
        match kind {
            PointKind::BinaryInput => range(&points.binary_inputs, start, stop),
            PointKind::BinaryOutput => range(&points.binary_outputs, start, stop),
            PointKind::Counter | PointKind::AnalogInput => None,
        }
    }

    pub fn counters(&self, start: u16, stop: u16) -> Option<Vec<u32>> {
        range(&self.points.read().counters, start, stop)
    }

    pub fn analogs(&self, start: u16, stop: u16) -> Option<Vec<i32>> {
        range(&self.points.read().analog_inputs, start, stop)
    }

    /// Returns false when `index` does not exist.
    pub fn set_binary_input(&self, index: u16, state: bool) -> bool {
        match self.points.write().binary_inputs.get_mut(usize::from(index)) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Returns false when `index` does not exist.
    pub fn set_binary_output(&self, index: u16, state: bool) -> bool {
        match self.points.write().binary_outputs.get_mut(usize::from(index)) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    /// Adds one to a counter, wrapping at `u32::MAX`. Returns the new value.
    pub fn increment_counter(&self, index: u16) -> Option<u32> {
        let mut points = self.points.write();
        let slot = points.counters.get_mut(usize::from(index))?;
        *slot = slot.wrapping_add(1);
        Some(*slot)
    }

    pub fn set_analog(&self, index: u16, value: i32) -> bool {
        match self.points.write().analog_inputs.get_mut(usize::from(index)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn indicators(&self) -> InternalIndicators {
        self.points.read().indicators
    }

    pub fn set_indicator(&self, flag: u16, on: bool) {
        self.points.write().indicators.set(flag, on);
    }

    /// Reloads the initial point values and raises the restart indication.
    pub fn cold_restart(&self) {
        *self.points.write() = Points::boot(&self.initial);
    }

    /// Raises the restart indication, keeping point values.
    pub fn warm_restart(&self) {
        self.set_indicator(InternalIndicators::RESTART, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::new(&PointsConfig {
            binary_inputs: vec![true, false, true],
            binary_outputs: vec![false; 2],
            counters: vec![10, u32::MAX],
            analog_inputs: vec![-5, 7],
        })
    }

    #[test]
    fn test_boot_sets_restart() {
        let db = db();
        assert!(db.indicators().contains(InternalIndicators::RESTART));
        db.set_indicator(InternalIndicators::RESTART, false);
        assert!(db.indicators().is_empty());
    }

    #[test]
    fn test_ranges() {
        let db = db();
        assert_eq!(db.len(PointKind::BinaryInput), 3);
        assert_eq!(
            db.binary(PointKind::BinaryInput, 1, 2),
            Some(vec![false, true])
        );
        assert_eq!(db.binary(PointKind::BinaryInput, 2, 3), None);
        assert_eq!(db.binary(PointKind::Counter, 0, 0), None);
        assert_eq!(db.analogs(0, 1), Some(vec![-5, 7]));
    }

    #[test]
    fn test_updates() {
        let db = db();
        assert!(db.set_binary_output(1, true));
        assert!(!db.set_binary_output(2, true));
        assert_eq!(db.binary(PointKind::BinaryOutput, 0, 1), Some(vec![false, true]));

        assert_eq!(db.increment_counter(0), Some(11));
        assert_eq!(db.increment_counter(1), Some(0));
        assert_eq!(db.increment_counter(9), None);

        assert!(db.set_analog(0, 42));
        assert!(db.set_binary_input(0, false));
        assert_eq!(db.analogs(0, 0), Some(vec![42]));
    }

    #[test]
    fn test_restarts() {
        let db = db();
        db.set_indicator(InternalIndicators::RESTART, false);
        db.set_binary_output(0, true);

        db.warm_restart();
        assert!(db.indicators().contains(InternalIndicators::RESTART));
        assert_eq!(db.binary(PointKind::BinaryOutput, 0, 0), Some(vec![true]));

        db.set_indicator(InternalIndicators::RESTART, false);
        db.cold_restart();
        assert!(db.indicators().contains(InternalIndicators::RESTART));
        assert_eq!(db.binary(PointKind::BinaryOutput, 0, 0), Some(vec![false]));
    }
}
