//! Local timer calibration against PIT channel 2.

use bringup::TimerCalibration;
use x86_64::instructions::port::Port;

use super::apic::{LocalApic, TIMER_DIVIDE_16};

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const CHANNEL2_DATA: u16 = 0x42;
const COMMAND: u16 = 0x43;
const SPEAKER_CONTROL: u16 = 0x61;

/// Channel 2, lobyte/hibyte access, mode 0, binary.
const CHANNEL2_ONE_SHOT: u8 = 0b1011_0000;
const GATE: u8 = 1 << 0;
const SPEAKER: u8 = 1 << 1;
const OUTPUT: u8 = 1 << 5;

/// Length of the measurement window.
pub const CALIBRATION_MS: u32 = 10;
const POLL_LIMIT: usize = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CalibrationError {
    #[error("PIT channel 2 never reached terminal count")]
    Timeout,
    #[error("local timer did not count during the window")]
    Stalled,
}

/// Measures how fast `lapic`'s timer counts at divide-by-16. Interrupts must be off.
pub fn calibrate(lapic: &LocalApic) -> Result<TimerCalibration, CalibrationError> {
    let reload = (PIT_FREQUENCY_HZ * CALIBRATION_MS / 1000) as u16;

    let mut control = Port::<u8>::new(SPEAKER_CONTROL);
    let mut command = Port::<u8>::new(COMMAND);
    let mut data = Port::<u8>::new(CHANNEL2_DATA);

    // SAFETY: channel 2 and the speaker gate are only driven from here, by the primary,
    // with interrupts disabled.
    let elapsed = unsafe {
        // Gate low while programming, speaker off.
        let value = control.read();
        control.write(value & !(GATE | SPEAKER));

        command.write(CHANNEL2_ONE_SHOT);
        data.write(reload as u8);
        data.write((reload >> 8) as u8);

        lapic.start_countdown(TIMER_DIVIDE_16);

        // Gate high starts the countdown.
        let value = control.read();
        control.write((value | GATE) & !SPEAKER);

        let mut expired = false;
        for _ in 0..POLL_LIMIT {
            if control.read() & OUTPUT != 0 {
                expired = true;
                break;
            }
            core::hint::spin_loop();
        }

        let current = lapic.current_count();
        lapic.stop_timer();

        let value = control.read();
        control.write(value & !GATE);

        if !expired {
            return Err(CalibrationError::Timeout);
        }
        u32::MAX - current
    };

    let ticks_per_ms = elapsed / CALIBRATION_MS;
    if ticks_per_ms == 0 {
        return Err(CalibrationError::Stalled);
    }

    Ok(TimerCalibration {
        ticks_per_ms,
        divider: TIMER_DIVIDE_16,
    })
}
