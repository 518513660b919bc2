use std::path::Path;

use chip8::KeyCode;
use serde::Deserialize;

use crate::error::{AppError, ErrorKind};

/// Layout used when no keymap file is given.
static DEFAULT_KEYMAP: &str = include_str!("../keymap.yaml");

/// Input mapper
///
/// Maps host keyboard characters to either Chip8 keycodes (suitable to be
/// used in the VM), or application specific named actions.
///
/// Characters are matched case-insensitively, so holding shift or caps lock
/// does not change the layout.
#[derive(Debug)]
pub struct InputMap {
    actions: Box<[InputInfo]>,
    /// Mapping of host keyboard keys to application actions, by index.
    keys: Box<[(char, usize)]>,
}

#[derive(Debug)]
struct InputInfo {
    chip8: Option<KeyCode>,
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InputDef {
    chip8: Option<KeyCode>,
    action: Option<String>,
    keyboard_keys: Option<Vec<char>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Action(String),
    Chip8(KeyCode),
}

impl InputMap {
    pub fn from_file(filepath: impl AsRef<Path>) -> Result<Self, AppError> {
        let source = std::fs::read_to_string(filepath)?;
        Self::from_yaml(&source)
    }

    /// The builtin QWERTY layout, with `p` bound to `quit`.
    pub fn default_layout() -> Result<Self, AppError> {
        Self::from_yaml(DEFAULT_KEYMAP)
    }

    pub fn from_yaml(source: &str) -> Result<Self, AppError> {
        let defs: Vec<InputDef> = serde_yaml::from_str(source)?;
        log::debug!("loaded input definitions: {:#?}", defs);

        for (index, def) in defs.iter().enumerate() {
            if def.chip8.is_some() == def.action.is_some() {
                return Err(AppError {
                    kind: ErrorKind::InvalidKeymap(format!(
                        "entry {index} must name exactly one of 'chip8' or 'action'"
                    )),
                });
            }
        }

        let keys = Self::build_keys(&defs);
        let actions = defs
            .into_iter()
            .map(|def| InputInfo {
                chip8: def.chip8,
                action: def.action,
            })
            .collect();

        Ok(InputMap { actions, keys })
    }

    /// Build a mapping of keyboard characters to indices into the given action definitions.
    fn build_keys(defs: &[InputDef]) -> Box<[(char, usize)]> {
        defs.iter()
            .enumerate()
            .filter_map(|(index, def)| def.keyboard_keys.as_ref().map(|keys| (index, keys)))
            .flat_map(|(index, keys)| {
                keys.iter()
                    .map(move |c| (c.to_ascii_lowercase(), index))
            })
            .collect::<Vec<(char, usize)>>()
            .into_boxed_slice()
    }

    /// Given a typed character, map it to either a Chip8 key, or a named action.
    ///
    /// When a character is bound more than once, the first definition wins.
    pub fn map_key(&self, key: char) -> Option<InputKind> {
        let key = key.to_ascii_lowercase();
        self.keys
            .iter()
            .find(|(c, _)| *c == key)
            .and_then(|(_, index)| self.actions.get(*index))
            .and_then(|info| match (info.chip8, &info.action) {
                (Some(keycode), _) => Some(InputKind::Chip8(keycode)),
                (None, Some(name)) => Some(InputKind::Action(name.clone())),
                (None, None) => None,
            })
    }

    pub fn is_action(&self, key: char, action: &str) -> bool {
        matches!(self.map_key(key), Some(InputKind::Action(name)) if name == action)
    }
}
