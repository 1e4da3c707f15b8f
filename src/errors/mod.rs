use colored::*;
use std::fmt;

use crate::hir::{BlockId, ValueId};

pub type LowerResult<T = ()> = Result<T, LowerError>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LowerErrorKind {
    /// The graph uses a construct this backend cannot lower yet.
    Unsupported,
    /// The graph is shaped in a way the lowering does not accept.
    Malformed,
}

impl fmt::Display for LowerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LowerErrorKind::Unsupported => "unsupported",
                LowerErrorKind::Malformed => "malformed graph",
            }
        )
    }
}

/// A recoverable lowering failure. The caller is expected to fall back to a
/// simpler compilation strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LowerError {
    pub msg: String,
    pub kind: LowerErrorKind,
    pub block: Option<BlockId>,
    pub value: Option<ValueId>,
    pub position: Option<u32>,
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)?;
        if let Some(block) = self.block {
            write!(f, " (in B{}", block)?;
            if let Some(value) = self.value {
                write!(f, " at {}", value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for LowerError {}

impl LowerError {
    pub fn new<S: Into<String>>(kind: LowerErrorKind, msg: S) -> LowerError {
        LowerError {
            msg: msg.into(),
            kind,
            block: None,
            value: None,
            position: None,
        }
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> LowerError {
        LowerError::new(LowerErrorKind::Unsupported, msg)
    }

    pub fn malformed<S: Into<String>>(msg: S) -> LowerError {
        LowerError::new(LowerErrorKind::Malformed, msg)
    }

    pub fn at(mut self, block: Option<BlockId>, value: Option<ValueId>) -> LowerError {
        self.block = self.block.or(block);
        self.value = self.value.or(value);
        self
    }

    pub fn with_position(mut self, position: Option<u32>) -> LowerError {
        self.position = self.position.or(position);
        self
    }

    pub fn emit(self) {
        let kind = format!("{}:", self.kind);
        eprintln!("{} {}", kind.bold().red(), self.msg.bold());

        let arrow = "-->".bold();
        match (self.block, self.value) {
            (Some(block), Some(value)) => eprintln!(" {} B{} at {}", arrow, block, value),
            (Some(block), None) => eprintln!(" {} B{}", arrow, block),
            (None, Some(value)) => eprintln!(" {} {}", arrow, value),
            (None, None) => {}
        }

        if let Some(pos) = self.position {
            eprintln!(" {} source position {}", "|".bold(), pos);
        }
        eprintln!()
    }
}

#[cfg(test)]
mod errors_test {
    use super::{LowerError, LowerErrorKind};
    use crate::hir::ValueId;

    #[test]
    fn test_display_with_context() {
        let err = LowerError::unsupported("unsupported node: throw").at(Some(2), Some(ValueId(7)));
        assert_eq!(err.kind, LowerErrorKind::Unsupported);
        assert_eq!(
            err.to_string(),
            "unsupported: unsupported node: throw (in B2 at v7)"
        );
    }

    #[test]
    fn test_context_keeps_innermost() {
        let err = LowerError::malformed("bad")
            .at(Some(1), None)
            .at(Some(5), Some(ValueId(3)));
        assert_eq!(err.block, Some(1));
        assert_eq!(err.value, Some(ValueId(3)));
    }
}
