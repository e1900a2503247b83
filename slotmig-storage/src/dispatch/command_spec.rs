use super::data_command::DataCommand;
use slotmig_core::command::CommandFrame;

/// Parser turning a validated frame into its tagged command variant.
pub type CommandParser = fn(&CommandFrame) -> Result<DataCommand, String>;

/// Arity constraints for a command (arguments after the name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandArity {
    /// Command must have exactly this many arguments.
    Exact(usize),
    /// Command must have at least this many arguments.
    AtLeast(usize),
    /// At least `min` arguments and `min + k * step` in total.
    Paired {
        /// Minimum argument count.
        min: usize,
        /// Size of each repeated group after the first.
        step: usize,
    },
}

impl CommandArity {
    /// Whether `count` arguments satisfy this constraint.
    #[must_use]
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(expected) => count == expected,
            Self::AtLeast(minimum) => count >= minimum,
            Self::Paired { min, step } => count >= min && (count - min) % step.max(1) == 0,
        }
    }
}

/// Metadata and parser for one command table entry.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Canonical uppercase command name.
    pub name: &'static str,
    /// Arity constraint checked before parsing.
    pub arity: CommandArity,
    /// Parser producing the command variant.
    pub parse: CommandParser,
}
