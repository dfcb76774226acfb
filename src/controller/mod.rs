//! Input device side of the bridge
//!
//! 1. [`device`] - non-blocking reads of raw `js_event` records
//! 2. [`classifier`] - button/axis classification and log descriptions
//!
//! ```text
//! /dev/input/jsN ──► EventSource ──► classify() ──► ClassifiedEvent
//!                    (RawEvent)
//! ```

pub mod classifier;
pub mod device;

pub use classifier::{classify, describe, ClassifiedEvent, ClassifyError, ControlKind};
pub use device::{DeviceError, EventReader, EventSource, JoystickDevice, RawEvent, ReadOutcome};
