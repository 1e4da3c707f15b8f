use colored::{Color, Colorize};
use log::{Level, LevelFilter};

use crate::options::LowerOptions;

const CRATE: &str = env!("CARGO_PKG_NAME");

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Blue,
        Level::Debug => Color::Magenta,
        Level::Trace => Color::Green,
    }
}

/// Records from this crate pass at `level`. Everything else is capped at
/// warnings so an embedder's dependencies stay quiet.
pub fn base(level: LevelFilter) -> fern::Dispatch {
    fern::Dispatch::new()
        .level(level.min(LevelFilter::Warn))
        .level_for(CRATE, level)
}

pub fn stderr(base: fern::Dispatch) -> fern::Dispatch {
    base.format(|out, message, record| {
        let level = record.level();
        let tag = format!("{}:", level.to_string().to_lowercase()).color(level_color(level));
        let module = record
            .target()
            .strip_prefix(CRATE)
            .map(|m| m.trim_start_matches("::"))
            .unwrap_or_else(|| record.target());
        if module.is_empty() {
            out.finish(format_args!("{} {}", tag, message))
        } else {
            out.finish(format_args!("{} [{}] {}", tag, module, message))
        }
    })
    .chain(std::io::stderr())
}

/// Installs the stderr logger at the level carried by `options`. Fails if a
/// global logger is already set.
pub fn init(options: &LowerOptions) -> Result<(), log::SetLoggerError> {
    stderr(base(options.log_level)).apply()
}
