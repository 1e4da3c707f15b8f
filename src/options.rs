use std::str::FromStr;

use crate::target::Target;

pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";
pub const TARGET_VAR: &str = "LOWIR_TARGET";
pub const VERIFY_VAR: &str = "LOWIR_VERIFY";

#[derive(Clone, Debug)]
pub struct LowerOptions {
    pub target: Target,
    pub log_level: log::LevelFilter,
    /// Run the structural chunk verifier after every successful build.
    pub verify: bool,
}

impl Default for LowerOptions {
    fn default() -> LowerOptions {
        LowerOptions {
            target: Target::default(),
            log_level: log::LevelFilter::Info,
            verify: cfg!(debug_assertions),
        }
    }
}

impl LowerOptions {
    pub fn new(target: Target) -> LowerOptions {
        LowerOptions {
            target,
            ..LowerOptions::default()
        }
    }

    /// Reads overrides from the environment. Unparseable values are logged and
    /// ignored.
    pub fn from_env() -> LowerOptions {
        LowerOptions::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> LowerOptions
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = LowerOptions::default();
        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            match log::LevelFilter::from_str(&level) {
                Ok(level) => options.log_level = level,
                Err(_) => log::warn!("ignoring invalid {}: {}", LOG_LEVEL_VAR, level),
            }
        }

        if let Some(target) = lookup(TARGET_VAR) {
            match Target::from_str(&target) {
                Ok(target) => options.target = target,
                Err(msg) => log::warn!("ignoring {}: {}", TARGET_VAR, msg),
            }
        }

        if let Some(verify) = lookup(VERIFY_VAR) {
            options.verify = matches!(verify.as_str(), "1" | "true" | "yes");
        }

        options
    }

    /// Installs the stderr logger at `log_level`.
    pub fn init_logging(&self) -> Result<(), log::SetLoggerError> {
        crate::logger::init(self)
    }
}

#[cfg(test)]
mod options_test {
    use super::LowerOptions;
    use crate::target::Target;

    #[test]
    fn test_from_lookup() {
        let options = LowerOptions::from_lookup(|key| match key {
            "LOG_LEVEL" => Some(str!("debug")),
            "LOWIR_TARGET" => Some(str!("ia32")),
            "LOWIR_VERIFY" => Some(str!("0")),
            _ => None,
        });
        assert_eq!(options.log_level, log::LevelFilter::Debug);
        assert_eq!(options.target, Target::Ia32);
        assert!(!options.verify);
    }

    #[test]
    fn test_init_logging_installs_once() {
        let options = LowerOptions::from_lookup(|key| match key {
            "LOG_LEVEL" => Some(str!("warn")),
            _ => None,
        });
        assert!(options.init_logging().is_ok());
        assert_eq!(log::max_level(), log::LevelFilter::Warn);
        assert!(options.init_logging().is_err());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let options = LowerOptions::from_lookup(|key| match key {
            "LOWIR_TARGET" => Some(str!("sparc")),
            "LOG_LEVEL" => Some(str!("loud")),
            _ => None,
        });
        assert_eq!(options.target, Target::X64);
        assert_eq!(options.log_level, log::LevelFilter::Info);
    }
}
