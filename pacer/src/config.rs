//! Session configuration.
//!
//! The browser front end passes this in as a JavaScript object, so
//! field names are camelCase when deserialised.
use serde::Deserialize;
use tracing::{event, Level};

use super::budget::DEFAULT_INITIAL_OPCODES;

pub const DEFAULT_MOUSE_SENSITIVITY: f64 = 4.0;

/// A program to run at startup, optionally with an argument string.
/// Deserialises from either `"PROG.EXE"` or `["PROG.EXE", "ARG"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Program(String),
    WithArgument(String, String),
}

impl Command {
    pub fn program(&self) -> &str {
        match self {
            Command::Program(p) | Command::WithArgument(p, _) => p,
        }
    }

    pub fn argument(&self) -> &str {
        match self {
            Command::Program(_) => "",
            Command::WithArgument(_, arg) => arg,
        }
    }
}

/// A program to look for when no commands are configured.  When
/// `extension` is set and no explicit argument was given, the first
/// file with that extension becomes the argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefaultProgram {
    pub name: String,
    #[serde(default)]
    pub extension: Option<String>,
}

fn default_programs() -> Vec<DefaultProgram> {
    vec![
        DefaultProgram {
            name: "zzt.exe".to_string(),
            extension: Some(".zzt".to_string()),
        },
        DefaultProgram {
            name: "superz.exe".to_string(),
            extension: None,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub mouse_sensitivity: f64,
    pub commands: Vec<Command>,
    pub arg: Option<String>,
    pub initial_opcodes: u32,
    pub default_programs: Vec<DefaultProgram>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mouse_sensitivity: DEFAULT_MOUSE_SENSITIVITY,
            commands: Vec::new(),
            arg: None,
            initial_opcodes: DEFAULT_INITIAL_OPCODES,
            default_programs: default_programs(),
        }
    }
}

impl Config {
    /// The mouse sensitivity to use.  Values which are not positive
    /// numbers are replaced by the default.
    pub fn effective_mouse_sensitivity(&self) -> f64 {
        let s = self.mouse_sensitivity;
        if s.is_finite() && s > 0.0 {
            s
        } else {
            event!(
                Level::WARN,
                "mouse sensitivity {s} is not a positive number, using {DEFAULT_MOUSE_SENSITIVITY}"
            );
            DEFAULT_MOUSE_SENSITIVITY
        }
    }

    /// The explicitly configured startup argument, if any.  An empty
    /// string counts as not configured.
    pub fn explicit_argument(&self) -> Option<&str> {
        self.arg.as_deref().filter(|arg| !arg.is_empty())
    }
}

#[test]
fn empty_object_gives_defaults() {
    let config: Config = serde_json::from_str("{}").expect("valid config");
    assert_eq!(config, Config::default());
}

#[test]
fn commands_accept_both_forms() {
    let config: Config = serde_json::from_str(
        r#"{"mouseSensitivity": 2.5, "commands": ["SETUP.EXE", ["GAME.EXE", "/fast"]]}"#,
    )
    .expect("valid config");
    assert_eq!(config.mouse_sensitivity, 2.5);
    assert_eq!(
        config.commands,
        vec![
            Command::Program("SETUP.EXE".to_string()),
            Command::WithArgument("GAME.EXE".to_string(), "/fast".to_string()),
        ]
    );
    assert_eq!(config.commands[0].argument(), "");
    assert_eq!(config.commands[1].program(), "GAME.EXE");
}

#[test]
fn bad_sensitivity_falls_back_to_default() {
    for s in [0.0, -1.0, f64::NAN] {
        let config = Config {
            mouse_sensitivity: s,
            ..Config::default()
        };
        assert_eq!(config.effective_mouse_sensitivity(), DEFAULT_MOUSE_SENSITIVITY);
    }
}

#[test]
fn empty_argument_is_not_explicit() {
    let config = Config {
        arg: Some(String::new()),
        ..Config::default()
    };
    assert_eq!(config.explicit_argument(), None);
}
