//! Driver loop connecting the virtual machine to host devices.
use log::{debug, trace};

use crate::{
    clock::Clock,
    constants::*,
    devices::{Control, Devices, Keypad},
    error::Chip8Result,
    vm::{Chip8Conf, Chip8Vm, Flow},
};

/// Upper bound of instructions executed between two input polls.
///
/// Only reached when the CPU clock is unthrottled, or when the host
/// stalled and the clock is catching up.
const MAX_STEPS_PER_FRAME: usize = 256;

/// Runs a [`Chip8Vm`] in real time.
///
/// The CPU and the delay timers run on separate clocks. Instructions are
/// executed at the configured clock frequency, while the timers always count
/// down at 60Hz, regardless of how many instructions were executed.
pub struct Driver {
    cpu_clock: Clock,
    timer: Clock,
    keypad: Keypad,
}

impl Driver {
    pub fn new(conf: &Chip8Conf) -> Self {
        Self {
            cpu_clock: Clock::new(conf.clock_frequency.unwrap_or_default().into()),
            timer: Clock::from_frequency(DELAY_FREQUENCY),
            keypad: Keypad::new(),
        }
    }

    /// Clear internal state in preparation for a fresh startup.
    pub fn reset(&mut self) {
        self.cpu_clock.reset();
        self.timer.reset();
        self.keypad.clear();
    }

    /// Run the machine until the host asks to quit.
    pub fn run<D: Devices>(&mut self, vm: &mut Chip8Vm, devices: &mut D) -> Chip8Result<()> {
        self.reset();

        while self.run_frame(vm, devices)? == Control::Continue {
            self.cpu_clock.wait();
        }

        debug!("driver stopped at pc 0x{:03X}", vm.cpu().pc());
        devices.buzz(false);

        Ok(())
    }

    /// A single iteration of the driver loop.
    ///
    /// Polls input, executes the instructions that are due, counts down the
    /// timers for every elapsed 60Hz cycle, and presents the display if it
    /// changed.
    pub fn run_frame<D: Devices>(
        &mut self,
        vm: &mut Chip8Vm,
        devices: &mut D,
    ) -> Chip8Result<Control> {
        if devices.poll_input(&mut self.keypad)? == Control::Quit {
            return Ok(Control::Quit);
        }
        vm.set_keys(self.keypad);

        let mut steps = 0;
        while steps < MAX_STEPS_PER_FRAME && self.cpu_clock.tick() {
            steps += 1;

            let flow = vm.step();
            self.forward(flow, devices);

            if flow == Flow::KeyWait {
                // No progress is possible until the next input poll.
                break;
            }
        }

        while self.timer.tick() {
            let flow = vm.tick_timers();
            self.forward(flow, devices);
        }

        if vm.take_redraw() {
            devices.draw(vm.display_buffer())?;
        }

        Ok(Control::Continue)
    }

    /// Pass signals of the VM on to the devices.
    #[inline]
    fn forward<D: Devices>(&self, flow: Flow, devices: &mut D) {
        match flow {
            Flow::Sound => devices.buzz(true),
            Flow::SoundStop => devices.buzz(false),
            Flow::KeyWait => trace!("waiting for key"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{devices::KeyCode, Chip8DisplayBuffer, Hz};

    /// Scripted host that quits after a number of frames.
    #[derive(Default)]
    struct MockDevices {
        frames: usize,
        quit_after: usize,
        press_at: Option<(usize, KeyCode)>,
        draws: usize,
        last_frame: Vec<bool>,
        buzzes: Vec<bool>,
    }

    impl Devices for MockDevices {
        fn poll_input(&mut self, keypad: &mut Keypad) -> Chip8Result<Control> {
            if self.frames >= self.quit_after {
                return Ok(Control::Quit);
            }
            if let Some((frame, key)) = self.press_at {
                if frame == self.frames {
                    keypad.press(key);
                }
            }
            self.frames += 1;
            Ok(Control::Continue)
        }

        fn draw(&mut self, display: Chip8DisplayBuffer) -> Chip8Result<()> {
            self.draws += 1;
            self.last_frame = display.to_vec();
            Ok(())
        }

        fn buzz(&mut self, state: bool) {
            self.buzzes.push(state);
        }
    }

    fn unthrottled(program: &[u8]) -> (Chip8Vm, Driver) {
        let conf = Chip8Conf {
            clock_frequency: Some(Hz(0)),
            rng_seed: Some(1),
        };
        let mut vm = Chip8Vm::new(conf.clone());
        vm.load_bytecode(program).unwrap();
        (vm, Driver::new(&conf))
    }

    #[test]
    fn test_quit_before_any_step() {
        let (mut vm, mut driver) = unthrottled(&[0x12, 0x00]);
        let mut devices = MockDevices::default();

        driver.run(&mut vm, &mut devices).unwrap();
        assert_eq!(vm.cpu().pc(), MEM_START);
        assert_eq!(devices.draws, 0);
        assert_eq!(devices.buzzes, vec![false]);
    }

    #[test]
    fn test_initial_frame_is_drawn() {
        // JP 0x200
        let (mut vm, mut driver) = unthrottled(&[0x12, 0x00]);
        let mut devices = MockDevices {
            quit_after: 3,
            ..Default::default()
        };

        driver.run(&mut vm, &mut devices).unwrap();
        assert_eq!(devices.frames, 3);
        assert_eq!(devices.draws, 1, "only the initial blank frame changed");
        assert!(devices.last_frame.iter().all(|px| !px));
    }

    #[test]
    #[rustfmt::skip]
    fn test_draw_is_presented() {
        let (mut vm, mut driver) = unthrottled(&[
            0xD0, 0x11, // DRW v0, v0, 1  ; I = 0, glyph "0" top row
            0x12, 0x02, // JP 0x202
        ]);
        let mut devices = MockDevices {
            quit_after: 2,
            ..Default::default()
        };

        driver.run(&mut vm, &mut devices).unwrap();
        assert_eq!(devices.draws, 1);
        assert!(devices.last_frame[0..4].iter().all(|px| *px));
    }

    #[test]
    #[rustfmt::skip]
    fn test_key_wait_resumes_on_input() {
        let (mut vm, mut driver) = unthrottled(&[
            0xF0, 0x0A, // LD v0, K
            0x12, 0x02, // JP 0x202
        ]);
        let mut devices = MockDevices {
            quit_after: 4,
            press_at: Some((2, KeyCode::Key7)),
            ..Default::default()
        };

        driver.reset();
        assert_eq!(driver.run_frame(&mut vm, &mut devices).unwrap(), Control::Continue);
        assert_eq!(driver.run_frame(&mut vm, &mut devices).unwrap(), Control::Continue);
        assert!(vm.cpu().is_waiting_for_key());
        assert_eq!(vm.cpu().pc(), MEM_START);

        assert_eq!(driver.run_frame(&mut vm, &mut devices).unwrap(), Control::Continue);
        assert!(!vm.cpu().is_waiting_for_key());
        assert_eq!(vm.cpu().registers()[0], 7);
        assert_eq!(vm.cpu().pc(), MEM_START + 2);
    }

    #[test]
    #[rustfmt::skip]
    fn test_sound_is_forwarded() {
        let (mut vm, mut driver) = unthrottled(&[
            0x60, 0x20, // LD v0, 32
            0xF0, 0x18, // LD ST, v0
            0x12, 0x04, // JP 0x204
        ]);
        let mut devices = MockDevices {
            quit_after: 1,
            ..Default::default()
        };

        driver.run(&mut vm, &mut devices).unwrap();
        assert_eq!(devices.buzzes.first(), Some(&true));
        assert_eq!(devices.buzzes.last(), Some(&false), "buzzer is silenced on exit");
    }
}
