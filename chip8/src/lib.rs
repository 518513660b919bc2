mod clock;
pub mod constants;
mod cpu;
mod devices;
mod disasm;
mod driver;
mod error;
mod ops;
mod vm;

pub use self::{
    clock::Clock,
    devices::{Control, Devices, InvalidKeyCode, KeyCode, Keypad},
    driver::Driver,
    error::{Chip8Error, Chip8Result},
    ops::Op,
    vm::{check_program_size, Flow, Hz},
};

/// Version of this implementation, reported by front-ends.
pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Row-major view of the 64x32 display, one `bool` per pixel.
pub type Chip8DisplayBuffer<'a> = &'a [bool; constants::DISPLAY_BUFFER_SIZE];

pub mod prelude {
    pub use super::{
        cpu::Chip8Cpu,
        devices::{Control, Devices, KeyCode, Keypad},
        disasm::Disassembler,
        driver::Driver,
        error::{Chip8Error, Chip8Result},
        vm::{Chip8Conf, Chip8Vm, Flow, Hz},
        Chip8DisplayBuffer,
    };
}
