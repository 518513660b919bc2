//! Disassembler.
use std::fmt::{self, Write as FmtWrite};

use crate::{constants::MEM_START, ops::Op};

/// Prints a program image as a listing of instructions.
///
/// Code and data are not told apart. Every aligned pair of bytes is
/// decoded as if it were an instruction.
pub struct Disassembler<'a> {
    bytecode: &'a [u8],
    cursor: usize,
}

impl<'a> Disassembler<'a> {
    pub fn new(bytecode: &'a [u8]) -> Self {
        Self {
            bytecode,
            cursor: 0,
        }
    }

    pub fn print_bytecode(&mut self) -> fmt::Result {
        let mut s = String::new();
        self.disassemble_all(&mut s)?;
        print!("{}", s);
        Ok(())
    }

    /// Write the whole program to the given writer, one line per instruction.
    pub fn disassemble_all<W: FmtWrite>(&mut self, w: &mut W) -> fmt::Result {
        self.cursor = 0;
        while self.cursor < self.bytecode.len() {
            self.disassemble(w)?;
            self.cursor += 2;
        }
        self.cursor = 0;
        Ok(())
    }

    /// Write a single instruction to the given writer.
    pub fn disassemble<W: FmtWrite>(&self, w: &mut W) -> fmt::Result {
        let addr = MEM_START + self.cursor;

        match self.bytecode.get(self.cursor..self.cursor + 2) {
            Some(&[a, b]) => {
                let op = Op::from_bytes([a, b]);
                writeln!(w, "{addr:04X}: {a:02X}{b:02X}  {op}")
            }
            // Odd trailing byte
            _ => match self.bytecode.get(self.cursor) {
                Some(a) => writeln!(w, "{addr:04X}: {a:02X}    DB 0x{a:02X}"),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[rustfmt::skip]
    fn test_disassemble_listing() {
        let rom = [
            0x00, 0xE0, // CLS
            0xA2, 0x2A, // LD I, 0x22A
            0x60, 0x0C, // LD v0, 12
            0xD0, 0x15, // DRW v0, v1, 5
            0x12, 0x00, // JP 0x200
            0xFF,
        ];

        let mut buf = String::new();
        Disassembler::new(&rom).disassemble_all(&mut buf).unwrap();

        let lines: Vec<&str> = buf.lines().collect();
        assert_eq!(lines, vec![
            "0200: 00E0  CLS",
            "0202: A22A  LD I, 0x22A",
            "0204: 600C  LD v0, 0x0C",
            "0206: D015  DRW v0, v1, 5",
            "0208: 1200  JP 0x200",
            "020A: FF    DB 0xFF",
        ]);
    }
}
