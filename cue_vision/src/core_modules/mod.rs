// The analysis layers, leaves first: shared geometry and frame types, the
// detectors, the physics and decision layers, and the calibrator that feeds
// parameters back into all of them.

pub mod geometry;
pub mod frame;
pub mod ball;
pub mod region_detector;
pub mod object_locator;
pub mod trajectory;
pub mod shot_evaluator;
pub mod calibrator;

#[cfg(test)]
pub(crate) mod test_support;
