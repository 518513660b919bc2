//! Virtual machine.
use std::{
    fmt::{self, Write},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    constants::*,
    cpu::Chip8Cpu,
    devices::{KeyCode, Keypad},
    error::{Chip8Error, Chip8Result},
    ops::Op,
    Chip8DisplayBuffer,
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    rng: StdRng,
    conf: Chip8Conf,
}

impl Chip8Vm {
    /// Creates a powered-on machine.
    ///
    /// Memory is zeroed with the builtin font loaded, the program counter
    /// points at the start of program memory and an initial blank frame
    /// is requested. The random number generator is seeded from the
    /// configuration, or from the wall clock if no seed is given.
    pub fn new(conf: Chip8Conf) -> Self {
        let seed = conf.rng_seed.unwrap_or_else(clock_seed);

        Chip8Vm {
            cpu: Chip8Cpu::new(),
            rng: StdRng::seed_from_u64(seed),
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    /// Read-only view of the machine state.
    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    /// Load a program image into memory at [`MEM_START`].
    ///
    /// The machine is put back into its power-on state first, so nothing
    /// of a previous program leaks into the new one. Images larger than
    /// [`MAX_PROGRAM_SIZE`] are rejected before memory is touched.
    pub fn load_bytecode(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        if !check_program_size(bytecode) {
            return Err(Chip8Error::LargeProgram {
                size: bytecode.len(),
            });
        }

        // Start with clean memory to avoid leaking previous program.
        self.cpu.reset();

        // Load program into virtual RAM
        self.cpu.ram[MEM_START..MEM_START + bytecode.len()].copy_from_slice(bytecode);

        debug!(
            "loaded {} byte program at 0x{MEM_START:03X}",
            bytecode.len()
        );

        Ok(())
    }

    pub fn display_buffer(&self) -> Chip8DisplayBuffer {
        &self.cpu.display
    }

    /// Whether the display changed since the last frame was taken.
    pub fn redraw_requested(&self) -> bool {
        self.cpu.redraw
    }

    /// Mark the current frame as consumed by the renderer.
    pub fn clear_redraw(&mut self) {
        self.cpu.redraw = false;
    }

    /// Returns whether a redraw was requested, and clears the request.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::replace(&mut self.cpu.redraw, false)
    }
}

/// Checks whether the program will fit in VM memory.
#[inline]
pub fn check_program_size(bytecode: &[u8]) -> bool {
    bytecode.len() <= MAX_PROGRAM_SIZE
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

/// Outcome of a single interpreter step or timer tick.
///
/// None of these are errors. They are signals for the driver loop, which
/// decides how to react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is useful for the caller to avoid being
    /// blocked on infinite or long running loops.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    /// - Bnnn (`JP V0, addr`)
    Jump,
    /// The display buffer was changed.
    Draw,
    /// The sound timer was started, the buzzer should be turned on.
    Sound,
    /// The sound timer ran out or was cleared, the buzzer should be turned off.
    SoundStop,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    KeyWait,
    /// The word is not an instruction this interpreter supports.
    /// It was skipped.
    Unsupported(u16),
    /// A call was made with a full call stack. The call was skipped.
    StackOverflow,
    /// A return was made with an empty call stack. The return was skipped.
    StackUnderflow,
}

/// VM Configuration Parameters.
#[derive(Debug, Default, Clone)]
pub struct Chip8Conf {
    /// Number of instructions executed per second by the driver.
    pub clock_frequency: Option<Hz>,
    /// Fixed seed for the random number generator, for reproducible runs.
    pub rng_seed: Option<u64>,
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hz(pub u64);

impl Default for Hz {
    fn default() -> Self {
        Hz(DEFAULT_CLOCK_FREQUENCY)
    }
}

impl From<Hz> for Duration {
    fn from(freq: Hz) -> Self {
        if freq.0 == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(NANOS_IN_SECOND / freq.0)
        }
    }
}

/// Interpreter
impl Chip8Vm {
    /// Sets the keyboard key input state.
    ///
    /// If the VM is waiting for keyboard input, a key press clears the
    /// `key_wait` flag so it can be resumed.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        self.cpu.keys.set(key, pressed);
        if pressed {
            self.cpu.key_wait = false;
        }
    }

    /// Replace the whole input latch.
    pub fn set_keys(&mut self, keys: Keypad) {
        self.cpu.keys = keys;
        if keys.any() {
            self.cpu.key_wait = false;
        }
    }

    /// Clear the keyboard input state, setting all keys to up.
    pub fn clear_keys(&mut self) {
        self.cpu.keys.clear()
    }

    /// Count down the delay and sound timers.
    ///
    /// Must be called at 60Hz, independent of how many instructions
    /// are executed in between.
    pub fn tick_timers(&mut self) -> Flow {
        self.cpu.tick_delay();

        // Buzzer should be on while sound timer counts down,
        // then turned off when the timer reaches zero.
        if self.cpu.tick_sound() {
            self.cpu.buzzer_state = false;
            Flow::SoundStop
        } else {
            Flow::Ok
        }
    }

    /// Execute up to `step_count` instructions.
    ///
    /// Stops early when the machine is waiting for a key, since
    /// no progress can be made until the input state changes.
    pub fn run_steps(&mut self, step_count: usize) -> Flow {
        let mut control_flow = Flow::Ok;

        for _ in 0..step_count {
            control_flow = self.step();
            if control_flow == Flow::KeyWait {
                break;
            }
        }

        control_flow
    }

    /// Fetch, decode and execute exactly one instruction.
    pub fn step(&mut self) -> Flow {
        let addr = self.cpu.pc & MEM_MASK;
        let op = Op::decode(self.cpu.word());

        op_trace(addr, &op);

        // Each instruction is two bytes. Instructions that move the
        // program counter themselves overwrite this.
        self.cpu.pc = addr + 2;

        self.exec(addr, op)
    }

    fn exec(&mut self, addr: usize, op: Op) -> Flow {
        let mut control_flow = Flow::Ok;

        match op {
            // 00E0 (CLS)
            //
            // Clear display
            Op::ClearScreen => {
                self.cpu.clear_display();
                control_flow = Flow::Draw;
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // The stack holds the address of the call, so execution
            // resumes at the instruction following it.
            Op::Return => {
                if self.cpu.sp == 0 {
                    warn!("call stack underflow at 0x{addr:03X}, RET ignored");
                    return Flow::StackUnderflow;
                }

                self.cpu.sp -= 1;
                self.cpu.pc = self.cpu.stack[self.cpu.sp] as usize + 2;
                control_flow = Flow::Jump;
            }
            // 1nnn (JP addr)
            //
            // Jump to address.
            Op::Jump { address } => {
                self.cpu.pc = address as usize;
                control_flow = Flow::Jump;
            }
            // 2nnn (CALL addr)
            //
            // Call subroutine at NNN.
            Op::Call { address } => {
                if self.cpu.sp >= STACK_SIZE {
                    warn!("call stack overflow at 0x{addr:03X}, CALL 0x{address:03X} ignored");
                    return Flow::StackOverflow;
                }

                self.cpu.stack[self.cpu.sp] = addr as Address;
                self.cpu.sp += 1;
                self.cpu.pc = address as usize;
                control_flow = Flow::Jump;
            }
            // 3xnn (SE Vx, byte)
            Op::Skip_Eq_Byte { vx, nn } => {
                self.skip_if(self.cpu.registers[vx as usize] == nn);
            }
            // 4xnn (SNE Vx, byte)
            Op::Skip_NotEq_Byte { vx, nn } => {
                self.skip_if(self.cpu.registers[vx as usize] != nn);
            }
            // 5xy0 (SE Vx, Vy)
            Op::Skip_Eq { vx, vy } => {
                let x = self.cpu.registers[vx as usize];
                let y = self.cpu.registers[vy as usize];
                self.skip_if(x == y);
            }
            // 6xnn (LD Vx, byte)
            Op::Load_Byte { vx, nn } => {
                self.cpu.registers[vx as usize] = nn;
            }
            // 7xnn (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            Op::Add_Byte { vx, nn } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[vx as usize] = x.wrapping_add(nn);
            }
            // 8xy0 (LD Vx, Vy)
            Op::Load_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] = self.cpu.registers[vy as usize];
            }
            // 8xy1 (OR Vx, Vy)
            Op::Or_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] |= self.cpu.registers[vy as usize];
            }
            // 8xy2 (AND Vx, Vy)
            Op::And_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] &= self.cpu.registers[vy as usize];
            }
            // 8xy3 (XOR Vx, Vy)
            Op::Xor_Vx_Vy { vx, vy } => {
                self.cpu.registers[vx as usize] ^= self.cpu.registers[vy as usize];
            }
            // 8xy4 (ADD Vx, Vy)
            //
            // The flag is written first, so when VF is the target
            // register it ends up holding the sum.
            Op::Add_Vx_Vy { vx, vy } => {
                let (x, y) = (
                    self.cpu.registers[vx as usize],
                    self.cpu.registers[vy as usize],
                );
                let (result, carry) = x.overflowing_add(y);
                self.cpu.registers[FLAG_REGISTER] = carry as u8;
                self.cpu.registers[vx as usize] = result;
            }
            // 8xy5 (SUB Vx, Vy)
            //
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            Op::Sub_Vx_Vy { vx, vy } => {
                let (x, y) = (
                    self.cpu.registers[vx as usize],
                    self.cpu.registers[vy as usize],
                );
                self.cpu.registers[FLAG_REGISTER] = (x >= y) as u8;
                self.cpu.registers[vx as usize] = x.wrapping_sub(y);
            }
            // 8xy6 (SHR Vx)
            Op::ShiftRight { vx, .. } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[FLAG_REGISTER] = x & 1;
                self.cpu.registers[vx as usize] = x >> 1;
            }
            // 8xy7 (SUBN Vx, Vy)
            //
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            Op::SubReverse_Vx_Vy { vx, vy } => {
                let (x, y) = (
                    self.cpu.registers[vx as usize],
                    self.cpu.registers[vy as usize],
                );
                self.cpu.registers[FLAG_REGISTER] = (y >= x) as u8;
                self.cpu.registers[vx as usize] = y.wrapping_sub(x);
            }
            // 8xyE (SHL Vx)
            Op::ShiftLeft { vx, .. } => {
                let x = self.cpu.registers[vx as usize];
                self.cpu.registers[FLAG_REGISTER] = x >> 7;
                self.cpu.registers[vx as usize] = x << 1;
            }
            // 9xy0 (SNE Vx, Vy)
            Op::Skip_NotEq { vx, vy } => {
                let x = self.cpu.registers[vx as usize];
                let y = self.cpu.registers[vy as usize];
                self.skip_if(x != y);
            }
            // Annn (LD I, addr)
            Op::Load_Address { address } => {
                self.cpu.address = address;
            }
            // Bnnn (JP V0, addr)
            Op::Jump_V0 { address } => {
                self.cpu.pc = address as usize + self.cpu.registers[0] as usize;
                control_flow = Flow::Jump;
            }
            // Cxnn (RND Vx, byte)
            Op::Random { vx, nn } => {
                self.cpu.registers[vx as usize] = nn & self.rng.gen::<u8>();
            }
            // Dxyn (DRW Vx, Vy, nibble)
            Op::Draw { vx, vy, n } => {
                self.draw_sprite(vx, vy, n);
                control_flow = Flow::Draw;
            }
            // Ex9E (SKP Vx)
            Op::Skip_Key { vx } => {
                let key_id = self.cpu.registers[vx as usize];
                self.skip_if(self.cpu.keys.is_pressed(key_id));
            }
            // ExA1 (SKNP Vx)
            Op::Skip_NotKey { vx } => {
                let key_id = self.cpu.registers[vx as usize];
                self.skip_if(!self.cpu.keys.is_pressed(key_id));
            }
            // Fx07 (LD Vx, DT)
            Op::Load_Vx_Delay { vx } => {
                self.cpu.registers[vx as usize] = self.cpu.delay_timer;
            }
            // Fx0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            // The instruction is re-executed on every step until a key is pressed.
            Op::Wait_Key { vx } => match self.cpu.keys.last_pressed() {
                Some(k) => {
                    self.cpu.registers[vx as usize] = k;
                    self.cpu.key_wait = false;
                }
                None => {
                    // rewind the program counter to stall the machine
                    self.cpu.pc = addr;
                    self.cpu.key_wait = true;
                    control_flow = Flow::KeyWait;
                }
            },
            // Fx15 (LD DT, Vx)
            Op::Load_Delay_Vx { vx } => {
                self.cpu.delay_timer = self.cpu.registers[vx as usize];
            }
            // Fx18 (LD ST, Vx)
            Op::Load_Sound_Vx { vx } => {
                self.cpu.sound_timer = self.cpu.registers[vx as usize];

                let sounding = self.cpu.sound_timer > 0;
                if sounding != self.cpu.buzzer_state {
                    self.cpu.buzzer_state = sounding;
                    control_flow = if sounding { Flow::Sound } else { Flow::SoundStop };
                }
            }
            // Fx1E (ADD I, Vx)
            Op::Add_Address { vx } => {
                let x = self.cpu.registers[vx as usize] as Address;
                self.cpu.address = self.cpu.address.wrapping_add(x);
            }
            // Fx29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            Op::Load_Glyph { vx } => {
                let digit = (self.cpu.registers[vx as usize] & 0xF) as usize;
                self.cpu.address = (FONTSET_START + digit * FONTSET_HEIGHT) as Address;
            }
            // Fx33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            Op::Store_Bcd { vx } => {
                let addr = self.cpu.address as usize;
                let x = self.cpu.registers[vx as usize];
                self.cpu.ram[addr & MEM_MASK]       = x / 100 % 10;
                self.cpu.ram[(addr + 1) & MEM_MASK] = x / 10  % 10;
                self.cpu.ram[(addr + 2) & MEM_MASK] = x       % 10;
            }
            // Fx55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            Op::Store_Registers { vx } => {
                let addr = self.cpu.address as usize;
                for v in 0..=vx as usize {
                    self.cpu.ram[(addr + v) & MEM_MASK] = self.cpu.registers[v];
                }
            }
            // Fx65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            Op::Load_Registers { vx } => {
                let addr = self.cpu.address as usize;
                for v in 0..=vx as usize {
                    self.cpu.registers[v] = self.cpu.ram[(addr + v) & MEM_MASK];
                }
            }
            // ----------------------------------------------------------------
            // Unsupported operation.
            //
            // Skipped so that the machine doesn't hang on data
            // or instructions of other Chip-8 dialects.
            Op::Sys { address } => {
                warn!("unsupported opcode 0x{address:04X} (SYS) at 0x{addr:03X}");
                control_flow = Flow::Unsupported(address);
            }
            Op::Unknown(word) => {
                warn!("unsupported opcode 0x{word:04X} at 0x{addr:03X}");
                control_flow = Flow::Unsupported(word);
            }
        }

        control_flow
    }

    /// Skip the next instruction when the condition holds.
    #[inline(always)]
    fn skip_if(&mut self, condition: bool) {
        if condition {
            self.cpu.pc += 2;
        }
    }

    /// Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
    ///
    /// Sprite is encoded as 8 pixels wide, N pixels high, stored in bits located in
    /// memory pointed to by address register I.
    ///
    /// Coordinates are not wrapped. Pixels past the right edge continue on the next
    /// row, and pixels past the end of the display buffer are dropped.
    ///
    /// If the drawing operation erases existing pixels in the display buffer, register VF is set to
    /// 1, and set to 0 if no display bits are unset. This is used for collision detection.
    fn draw_sprite(&mut self, vx: u8, vy: u8, n: u8) {
        let (x, y) = (
            self.cpu.registers[vx as usize] as usize,
            self.cpu.registers[vy as usize] as usize,
        );
        let base = self.cpu.address as usize;
        let mut is_erased = false;

        for r in 0..n as usize {
            // Each row is 8 bits representing the 8 pixels of the sprite.
            let row = self.cpu.ram[(base + r) & MEM_MASK];

            for c in 0..8 {
                if (row >> (7 - c)) & 1 == 0 {
                    continue;
                }

                let d = (y + r) * DISPLAY_WIDTH + x + c;
                if let Some(px) = self.cpu.display.get_mut(d) {
                    // XOR erases a pixel when both the old and new values are both 1.
                    is_erased |= *px;
                    *px = !*px;
                }
            }
        }

        // If a pixel was erased, then a collision occurred.
        self.cpu.registers[FLAG_REGISTER] = is_erased as u8;
        self.cpu.redraw = true;
    }
}

/// Troubleshooting
impl Chip8Vm {
    /// Returns the program memory as a human readable list of instruction words.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let iter = self
            .cpu
            .ram
            .iter()
            .enumerate()
            .skip(MEM_START)
            .take(count)
            .step_by(2);
        let mut buf = String::new();

        for (i, op) in iter {
            writeln!(buf, "{:04X}: {:02X}{:02X}", i, op, self.cpu.ram[(i + 1) & MEM_MASK])?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.keys.any() {
            write!(buf, "keys:")?;
            for i in 0..KEY_COUNT {
                if self.cpu.keys.is_pressed(i) {
                    write!(buf, " k{i:x}")?;
                }
            }
        }

        Ok(buf)
    }
}

#[cfg(feature = "op_trace")]
#[inline]
fn op_trace(addr: usize, op: &Op) {
    log::trace!("{addr:04X}: {op}");
}

#[cfg(not(feature = "op_trace"))]
#[inline]
fn op_trace(_: usize, _: &Op) {}
