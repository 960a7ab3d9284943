#![no_main]
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use trajscan_core::path::{define_constant_velocity_path, define_oscillation_path};

#[derive(Debug, Arbitrary)]
struct Input {
    start: f64,
    end: f64,
    duration: f64,
    accel: f64,
    elements: u16,
    oscillate: Option<u16>,
}

fuzz_target!(|input: Input| {
    let elements = usize::from(input.elements);
    let result = match input.oscillate {
        Some(total) => define_oscillation_path(
            input.start,
            input.end,
            input.duration,
            usize::from(total),
            input.accel,
            elements,
        ),
        None => define_constant_velocity_path(
            input.start,
            input.end,
            input.duration,
            elements,
            input.accel,
        ),
    };
    if let Ok(t) = result {
        assert!(t.pulse_start_element >= 1);
        assert!(t.pulse_start_element <= t.pulse_stop_element);
        assert!(t.pulse_stop_element <= t.total_element_count());
    }
});
