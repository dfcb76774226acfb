use crate::controller::device::{RawEvent, JS_EVENT_AXIS, JS_EVENT_BUTTON};
use std::fmt;

// Semantic category of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Button,
    Axis,
}

// Typed event ready for encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub index: u8,
    pub value: i16,
    pub timestamp_ms: u64,
    pub is_axis: bool,
}

impl ClassifiedEvent {
    pub fn kind(&self) -> ControlKind {
        if self.is_axis {
            ControlKind::Axis
        } else {
            ControlKind::Button
        }
    }
}

impl fmt::Display for ClassifiedEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&describe(self))
    }
}

// Classification errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    /// Neither or both of the button/axis bits are set.
    #[error("Unknown event type bits {bits:#04x} on control {number}")]
    UnknownEventType { bits: u8, number: u8 },
}

/// Maps a raw record onto exactly one category.
///
/// The initial-state flag is ignored here: startup snapshots classify the
/// same way as live changes.
pub fn classify(raw: &RawEvent) -> Result<ClassifiedEvent, ClassifyError> {
    let is_button = raw.kind_bits & JS_EVENT_BUTTON != 0;
    let is_axis = raw.kind_bits & JS_EVENT_AXIS != 0;

    if is_button == is_axis {
        return Err(ClassifyError::UnknownEventType {
            bits: raw.kind_bits,
            number: raw.number,
        });
    }

    Ok(ClassifiedEvent {
        index: raw.number,
        value: raw.value,
        timestamp_ms: u64::from(raw.time),
        is_axis,
    })
}

/// Human-readable line for logs. Buttons are reported as up/down.
pub fn describe(event: &ClassifiedEvent) -> String {
    match event.kind() {
        ControlKind::Button => format!(
            "Button {} is {}",
            event.index,
            if event.value == 0 { "up" } else { "down" }
        ),
        ControlKind::Axis => format!("Axis {} is at position {}", event.index, event.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::device::JS_EVENT_INIT;
    use proptest::prelude::*;

    fn raw(number: u8, value: i16, time: u32, kind_bits: u8) -> RawEvent {
        RawEvent {
            time,
            value,
            kind_bits,
            number,
        }
    }

    #[test]
    fn button_event() {
        let event = classify(&raw(3, 1, 1000, JS_EVENT_BUTTON)).unwrap();
        assert_eq!(
            event,
            ClassifiedEvent {
                index: 3,
                value: 1,
                timestamp_ms: 1000,
                is_axis: false
            }
        );
        assert_eq!(event.kind(), ControlKind::Button);
    }

    #[test]
    fn axis_event() {
        let event = classify(&raw(0, -32768, 2000, JS_EVENT_AXIS)).unwrap();
        assert_eq!(
            event,
            ClassifiedEvent {
                index: 0,
                value: -32768,
                timestamp_ms: 2000,
                is_axis: true
            }
        );
    }

    #[test]
    fn initial_state_events_classify_like_live_ones() {
        let live = classify(&raw(5, 1, 10, JS_EVENT_BUTTON)).unwrap();
        let init = classify(&raw(5, 1, 10, JS_EVENT_BUTTON | JS_EVENT_INIT)).unwrap();
        assert_eq!(live, init);
    }

    #[test]
    fn both_or_neither_bit_is_rejected() {
        assert_eq!(
            classify(&raw(1, 0, 0, 0)),
            Err(ClassifyError::UnknownEventType { bits: 0, number: 1 })
        );
        assert!(classify(&raw(1, 0, 0, JS_EVENT_BUTTON | JS_EVENT_AXIS)).is_err());
        assert!(classify(&raw(1, 0, 0, JS_EVENT_INIT)).is_err());
    }

    #[test]
    fn button_description_keeps_value_untouched() {
        let event = classify(&raw(7, 42, 0, JS_EVENT_BUTTON)).unwrap();
        assert_eq!(describe(&event), "Button 7 is down");
        assert_eq!(event.value, 42);

        let released = classify(&raw(7, 0, 0, JS_EVENT_BUTTON)).unwrap();
        assert_eq!(released.to_string(), "Button 7 is up");
    }

    #[test]
    fn axis_description() {
        let event = classify(&raw(2, -300, 0, JS_EVENT_AXIS)).unwrap();
        assert_eq!(describe(&event), "Axis 2 is at position -300");
    }

    proptest! {
        #[test]
        fn exactly_one_bit_classifies(
            number in any::<u8>(),
            value in any::<i16>(),
            time in any::<u32>(),
            axis in any::<bool>(),
            extra in prop_oneof![Just(0u8), Just(JS_EVENT_INIT)],
        ) {
            let bit = if axis { JS_EVENT_AXIS } else { JS_EVENT_BUTTON };
            let event = classify(&raw(number, value, time, bit | extra)).unwrap();
            prop_assert_eq!(event.is_axis, axis);
            prop_assert_eq!(event.index, number);
            prop_assert_eq!(event.value, value);
            prop_assert_eq!(event.timestamp_ms, u64::from(time));
        }

        #[test]
        fn zero_or_two_bits_fail(
            number in any::<u8>(),
            value in any::<i16>(),
            both in any::<bool>(),
            extra in prop_oneof![Just(0u8), Just(JS_EVENT_INIT)],
        ) {
            let bits = if both { JS_EVENT_BUTTON | JS_EVENT_AXIS } else { 0 };
            prop_assert!(classify(&raw(number, value, 0, bits | extra)).is_err());
        }
    }
}
