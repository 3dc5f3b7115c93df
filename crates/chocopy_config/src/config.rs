//! chocopy.toml parsing.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Default name looked up next to the input file.
pub const CONFIG_FILE_NAME: &str = "chocopy.toml";

/// Number of callee-saved registers available to temporaries (`s1..s11`).
pub const MAX_POOL_SIZE: usize = 11;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub codegen: CodegenConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// How the translator names temporaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterMode {
    /// Hand out pool registers directly while translating.
    #[default]
    Physical,
    /// Emit virtual registers and run the register allocator.
    Virtual,
}

impl std::str::FromStr for RegisterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(RegisterMode::Physical),
            "virtual" => Ok(RegisterMode::Virtual),
            other => Err(format!(
                "unknown register mode '{}' (expected physical or virtual)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenConfig {
    #[serde(default)]
    pub registers: RegisterMode,
    /// Attach explanatory comments to emitted instructions.
    #[serde(default = "default_comments")]
    pub comments: bool,
    /// How many of `s1..s11` temporaries may use.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            registers: RegisterMode::default(),
            comments: default_comments(),
            pool_size: default_pool_size(),
        }
    }
}

impl CodegenConfig {
    /// Pool size clamped to the registers that exist.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.min(MAX_POOL_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Instruction budget for the reference machine.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

fn default_comments() -> bool {
    true
}

fn default_pool_size() -> usize {
    MAX_POOL_SIZE
}

fn default_max_steps() -> u64 {
    10_000_000
}

pub fn load_config(path: &Path) -> io::Result<Config> {
    let s = std::fs::read_to_string(path)?;
    parse_config(&s)
}

pub fn parse_config(s: &str) -> io::Result<Config> {
    toml::from_str(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Text written by `chococ init`.
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse_config("").expect("parse");
        assert_eq!(c, Config::default());
        assert_eq!(c.codegen.registers, RegisterMode::Physical);
        assert_eq!(c.codegen.pool_size, MAX_POOL_SIZE);
    }

    #[test]
    fn virtual_mode_and_small_pool() {
        let c = parse_config(
            r#"
[codegen]
registers = "virtual"
pool_size = 2

[run]
max_steps = 500
"#,
        )
        .expect("parse");
        assert_eq!(c.codegen.registers, RegisterMode::Virtual);
        assert_eq!(c.codegen.effective_pool_size(), 2);
        assert!(c.codegen.comments);
        assert_eq!(c.run.max_steps, 500);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(parse_config("[codegen]\nregisters = \"magic\"\n").is_err());
        assert!("magic".parse::<RegisterMode>().is_err());
    }

    #[test]
    fn default_text_round_trips() {
        let text = default_config_toml();
        assert_eq!(parse_config(&text).expect("parse"), Config::default());
    }
}
