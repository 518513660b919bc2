//! IO device interface
use crate::{constants::*, error::Chip8Result, Chip8DisplayBuffer};

/// Hooks to provide IO devices to the virtual machine.
///
/// The VM never talks to the host directly. A [`crate::Driver`] shuttles
/// input, frames and sound edges between the VM and an implementation of
/// this trait.
pub trait Devices {
    /// Update the keypad with the latest host input.
    ///
    /// Called once per driver frame, before any instructions are executed.
    fn poll_input(&mut self, keypad: &mut Keypad) -> Chip8Result<Control>;

    /// Blit the display buffer to screen output.
    fn draw(&mut self, display: Chip8DisplayBuffer) -> Chip8Result<()>;

    /// Turn the sound buzzer on or off.
    fn buzz(&mut self, state: bool);
}

/// Decision by the host whether the driver loop should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl From<KeyCode> for u8 {
    fn from(keycode: KeyCode) -> Self {
        keycode.as_u8()
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = InvalidKeyCode;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        match key_id {
            0 => Ok(Self::Key0),
            1 => Ok(Self::Key1),
            2 => Ok(Self::Key2),
            3 => Ok(Self::Key3),
            4 => Ok(Self::Key4),
            5 => Ok(Self::Key5),
            6 => Ok(Self::Key6),
            7 => Ok(Self::Key7),
            8 => Ok(Self::Key8),
            9 => Ok(Self::Key9),
            10 => Ok(Self::KeyA),
            11 => Ok(Self::KeyB),
            12 => Ok(Self::KeyC),
            13 => Ok(Self::KeyD),
            14 => Ok(Self::KeyE),
            15 => Ok(Self::KeyF),
            _ => Err(InvalidKeyCode),
        }
    }
}

#[derive(Debug)]
pub struct InvalidKeyCode;

impl std::error::Error for InvalidKeyCode {}

impl std::fmt::Display for InvalidKeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "keycode must be in range 0 <= keycode < 16")
    }
}

/// Input latch of the 16 key hexadecimal keyboard.
///
/// Pressed is a 1 bit, released is a 0 bit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Keypad(u16);

impl Keypad {
    pub fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub fn press(&mut self, key: KeyCode) {
        self.0 |= 1 << key.as_u8();
    }

    #[inline]
    pub fn release(&mut self, key: KeyCode) {
        self.0 &= !(1 << key.as_u8());
    }

    #[inline]
    pub fn set(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.press(key)
        } else {
            self.release(key)
        }
    }

    /// Checks whether the key with the given id is held down.
    ///
    /// Ids outside the keyboard are never pressed.
    #[inline]
    pub fn is_pressed(&self, key_id: u8) -> bool {
        key_id < KEY_COUNT && self.0 & (1 << key_id) != 0
    }

    /// Check whether any key is pressed down.
    #[inline(always)]
    pub fn any(&self) -> bool {
        self.0 != 0
    }

    /// Retrieve the value of the highest key that is pressed down.
    #[inline]
    pub fn last_pressed(&self) -> Option<u8> {
        if self.any() {
            Some(15 - self.0.leading_zeros() as u8)
        } else {
            None
        }
    }

    /// Set all keys to up.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn to_array(&self) -> [bool; KEY_COUNT as usize] {
        let mut keys = [false; KEY_COUNT as usize];
        for (k, key) in keys.iter_mut().enumerate() {
            *key = self.is_pressed(k as u8);
        }
        keys
    }
}

impl From<[bool; KEY_COUNT as usize]> for Keypad {
    fn from(keys: [bool; KEY_COUNT as usize]) -> Self {
        let bits = keys
            .iter()
            .enumerate()
            .filter(|(_, pressed)| **pressed)
            .fold(0u16, |acc, (k, _)| acc | (1 << k));
        Self(bits)
    }
}

#[cfg(feature = "serde")]
mod de {
    use std::fmt::Display;

    use serde::de::{Deserialize, Error, Expected, Unexpected};

    use super::*;

    impl Expected for InvalidKeyCode {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            <Self as Display>::fmt(self, f)
        }
    }

    impl<'de> Deserialize<'de> for KeyCode {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            // YAML integer type
            let key_id = i64::deserialize(deserializer)?;
            u8::try_from(key_id)
                .ok()
                .and_then(|k| KeyCode::try_from(k).ok())
                .ok_or_else(|| D::Error::invalid_value(Unexpected::Signed(key_id), &InvalidKeyCode))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_state() {
        let mut keypad = Keypad::default();

        keypad.press(KeyCode::Key0);
        assert_eq!(keypad.bits(), 0b00000000_00000001);
        assert!(keypad.is_pressed(0));
        assert!(!keypad.is_pressed(1));
        assert!(!keypad.is_pressed(7));

        keypad.press(KeyCode::Key7);
        assert_eq!(keypad.bits(), 0b00000000_10000001);
        assert!(keypad.is_pressed(0));
        assert!(keypad.is_pressed(7));

        keypad.release(KeyCode::Key0);
        assert_eq!(keypad.bits(), 0b00000000_10000000);
        assert!(!keypad.is_pressed(0));
        assert!(keypad.is_pressed(7));

        keypad.set(KeyCode::KeyF, true);
        assert_eq!(keypad.bits(), 0b10000000_10000000);
        assert!(keypad.is_pressed(15));

        // Out of range ids are never pressed, and must not overflow the shift.
        assert!(!keypad.is_pressed(16));
        assert!(!keypad.is_pressed(0xFF));
    }

    #[test]
    fn test_last_pressed() {
        let mut keypad = Keypad::new();
        assert_eq!(keypad.last_pressed(), None);

        keypad.press(KeyCode::Key0);
        assert_eq!(keypad.last_pressed(), Some(0));

        keypad.press(KeyCode::KeyC);
        keypad.press(KeyCode::Key5);
        assert_eq!(keypad.last_pressed(), Some(0xC));

        keypad.press(KeyCode::KeyF);
        assert_eq!(keypad.last_pressed(), Some(0xF));

        keypad.clear();
        assert!(!keypad.any());
    }

    #[test]
    fn test_keypad_from_array() {
        let mut keys = [false; 16];
        keys[0x2] = true;
        keys[0xE] = true;

        let keypad = Keypad::from(keys);
        assert!(keypad.is_pressed(0x2));
        assert!(keypad.is_pressed(0xE));
        assert!(!keypad.is_pressed(0x3));
        assert_eq!(keypad.to_array(), keys);
    }

    #[test]
    fn test_keycode_conversion() {
        assert_eq!(KeyCode::try_from(0xA).unwrap(), KeyCode::KeyA);
        assert!(KeyCode::try_from(16).is_err());
        assert_eq!(u8::from(KeyCode::KeyF), 15);
        assert_eq!(KeyCode::KeyB.to_string(), "kb");
    }
}
