//! Terminal front-end.
use std::{
    io::{self, Stdout, Write},
    time::{Duration, Instant},
};

use chip8::{constants::*, prelude::*};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode as HostKey, KeyEvent, KeyModifiers},
    execute, queue,
    style::Print,
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, trace, LevelFilter};

use crate::inputmap::{InputKind, InputMap};

/// Terminals only report key presses. A key is considered held for this
/// long after its last press or auto-repeat event.
const KEY_HOLD: Duration = Duration::from_millis(150);

/// Devices backed by an ANSI terminal.
///
/// Two rows of pixels are packed into one line of text using half block
/// glyphs, so the 64x32 display takes 64x16 cells.
///
/// The terminal is put in raw mode and switched to the alternate screen for
/// as long as this value lives. Logging is capped at errors for the same
/// span, since log lines would be written over the display.
pub struct Terminal {
    out: Stdout,
    input_map: InputMap,
    held: [Option<Instant>; KEY_COUNT as usize],
    line: String,
    _quiet: QuietLog,
}

impl Terminal {
    pub fn new(input_map: InputMap) -> io::Result<Self> {
        let mut term = Self {
            out: io::stdout(),
            input_map,
            held: [None; KEY_COUNT as usize],
            line: String::with_capacity(DISPLAY_WIDTH * 3),
            _quiet: QuietLog::new(LevelFilter::Error),
        };

        // On failure `term` is dropped, which undoes whatever part of the
        // setup succeeded.
        terminal::enable_raw_mode()?;
        execute!(term.out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;

        Ok(term)
    }

    /// Release keys that have not been repeated recently.
    fn expire_keys(&mut self, keypad: &mut Keypad, now: Instant) {
        for (key_id, held) in self.held.iter_mut().enumerate() {
            if let Some(pressed_at) = held {
                if now.duration_since(*pressed_at) >= KEY_HOLD {
                    *held = None;
                    if let Ok(keycode) = KeyCode::try_from(key_id as u8) {
                        keypad.release(keycode);
                    }
                }
            }
        }
    }

    fn handle_key(&mut self, event: KeyEvent, keypad: &mut Keypad, now: Instant) -> Control {
        match event.code {
            HostKey::Esc => Control::Quit,
            HostKey::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => Control::Quit,
            HostKey::Char(c) => match self.input_map.map_key(c) {
                Some(InputKind::Chip8(keycode)) => {
                    keypad.press(keycode);
                    self.held[keycode.as_u8() as usize] = Some(now);
                    Control::Continue
                }
                Some(InputKind::Action(name)) if name == "quit" => Control::Quit,
                Some(InputKind::Action(name)) => {
                    debug!("unhandled action: {name}");
                    Control::Continue
                }
                None => {
                    trace!("no input mapping for {c:?}");
                    Control::Continue
                }
            },
            _ => Control::Continue,
        }
    }
}

impl Devices for Terminal {
    fn poll_input(&mut self, keypad: &mut Keypad) -> Chip8Result<Control> {
        let now = Instant::now();
        self.expire_keys(keypad, now);

        while event::poll(Duration::ZERO)? {
            if let Event::Key(key_event) = event::read()? {
                if self.handle_key(key_event, keypad, now) == Control::Quit {
                    return Ok(Control::Quit);
                }
            }
        }

        Ok(Control::Continue)
    }

    fn draw(&mut self, display: Chip8DisplayBuffer) -> Chip8Result<()> {
        for y in (0..DISPLAY_HEIGHT).step_by(2) {
            self.line.clear();
            self.line.extend((0..DISPLAY_WIDTH).map(|x| {
                let top = display[y * DISPLAY_WIDTH + x];
                let bottom = display[(y + 1) * DISPLAY_WIDTH + x];
                half_block(top, bottom)
            }));
            let (out, line) = (&mut self.out, &self.line);
            queue!(out, MoveTo(0, (y / 2) as u16), Print(line))?;
        }
        self.out.flush()?;

        Ok(())
    }

    fn buzz(&mut self, state: bool) {
        debug!("buzzer {}", if state { "on" } else { "off" });

        if state {
            // Terminal bell
            if let Err(err) = execute!(self.out, Print('\x07')) {
                debug!("failed to ring bell: {err}");
            }
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

/// Caps the global log level while alive, and restores it when dropped.
struct QuietLog {
    saved: LevelFilter,
}

impl QuietLog {
    fn new(cap: LevelFilter) -> Self {
        let saved = log::max_level();
        log::set_max_level(saved.min(cap));
        Self { saved }
    }
}

impl Drop for QuietLog {
    fn drop(&mut self) {
        log::set_max_level(self.saved);
    }
}

/// Glyph for a cell holding a top and a bottom pixel.
#[inline]
fn half_block(top: bool, bottom: bool) -> char {
    match (top, bottom) {
        (true, true) => '█',
        (true, false) => '▀',
        (false, true) => '▄',
        (false, false) => ' ',
    }
}
