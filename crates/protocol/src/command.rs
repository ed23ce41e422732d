//! Ordered, validated batches of executable commands.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_COMMANDS_PER_SET;

/// Missing sequences listed in [`CommandSet::missing_summary`].
const MISSING_PREVIEW: usize = 8;

/// How a command's text is interpreted on the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    #[serde(rename = "CONSOLE")]
    Console,
    #[serde(rename = "POWERSHELL")]
    PowerShell,
    #[serde(rename = "SQL")]
    Sql,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandType::Console => "CONSOLE",
            CommandType::PowerShell => "POWERSHELL",
            CommandType::Sql => "SQL",
        })
    }
}

/// Execution outcome of a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    #[default]
    NotExecuted,
    Success,
    Failed,
}

/// Reasons a command is refused by [`CommandSet::add_command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandSetError {
    #[error("command belongs to set {found}, expected {expected}")]
    WrongSet { expected: i32, found: i32 },

    #[error("sequence {sequence} outside 1..={target}")]
    SequenceOutOfRange { sequence: u32, target: u32 },

    #[error("sequence {0} already present")]
    DuplicateSequence(u32),

    #[error("target count {target} exceeds {max}")]
    TooManyCommands { target: u32, max: u32 },
}

/// A single instruction inside a [`CommandSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    command_set_id: i32,
    sequence: u32,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub text: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    status: CommandStatus,
    #[serde(default)]
    output: Vec<String>,
}

impl Command {
    pub fn new(
        command_set_id: i32,
        sequence: u32,
        command_type: CommandType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            command_set_id,
            sequence,
            command_type,
            text: text.into(),
            parameters: BTreeMap::new(),
            status: CommandStatus::NotExecuted,
            output: Vec::new(),
        }
    }

    /// Adds a named parameter, replacing any previous value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn command_set_id(&self) -> i32 {
        self.command_set_id
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn is_executed(&self) -> bool {
        self.status != CommandStatus::NotExecuted
    }

    /// Appends lines to the output. Output is never cleared.
    pub fn append_output<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output.extend(lines.into_iter().map(Into::into));
    }

    /// Moves a not-yet-executed command to `status`.
    ///
    /// Returns `false` (and changes nothing) if the command already has a
    /// final status or `status` is [`CommandStatus::NotExecuted`].
    pub fn finish(&mut self, status: CommandStatus) -> bool {
        if self.is_executed() || status == CommandStatus::NotExecuted {
            return false;
        }
        self.status = status;
        true
    }

    pub fn mark_success(&mut self) -> bool {
        self.finish(CommandStatus::Success)
    }

    pub fn mark_failed(&mut self) -> bool {
        self.finish(CommandStatus::Failed)
    }
}

/// A sized batch of commands kept in ascending sequence order.
///
/// Sequences run from 1 to `target_count`; the set is complete once every
/// slot is filled. Decoding revalidates every command, so a set received
/// from a peer holds the same invariants as one built locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCommandSet")]
pub struct CommandSet {
    id: i32,
    target_count: u32,
    commands: Vec<Command>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommandSet {
    id: i32,
    target_count: u32,
    #[serde(default)]
    commands: Vec<Command>,
}

impl TryFrom<RawCommandSet> for CommandSet {
    type Error = CommandSetError;

    fn try_from(raw: RawCommandSet) -> Result<Self, Self::Error> {
        if raw.target_count > MAX_COMMANDS_PER_SET {
            return Err(CommandSetError::TooManyCommands {
                target: raw.target_count,
                max: MAX_COMMANDS_PER_SET,
            });
        }
        let mut set = CommandSet::new(raw.id, raw.target_count);
        for command in raw.commands {
            set.add_command(command)?;
        }
        Ok(set)
    }
}

impl CommandSet {
    pub fn new(id: i32, target_count: u32) -> Self {
        Self {
            id,
            target_count,
            commands: Vec::with_capacity(target_count.min(64) as usize),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns `true` when every sequence in `1..=target_count` is present.
    pub fn is_complete(&self) -> bool {
        self.commands.len() == self.target_count as usize
    }

    /// Inserts a command at its sequence position.
    ///
    /// The set is left untouched when the command is rejected.
    pub fn add_command(&mut self, command: Command) -> Result<(), CommandSetError> {
        if command.command_set_id != self.id {
            return Err(CommandSetError::WrongSet {
                expected: self.id,
                found: command.command_set_id,
            });
        }
        if command.sequence == 0 || command.sequence > self.target_count {
            return Err(CommandSetError::SequenceOutOfRange {
                sequence: command.sequence,
                target: self.target_count,
            });
        }
        match self
            .commands
            .binary_search_by_key(&command.sequence, Command::sequence)
        {
            Ok(_) => Err(CommandSetError::DuplicateSequence(command.sequence)),
            Err(pos) => {
                self.commands.insert(pos, command);
                Ok(())
            }
        }
    }

    /// Removes and returns the command with the given sequence.
    pub fn remove_command(&mut self, sequence: u32) -> Option<Command> {
        let pos = self
            .commands
            .binary_search_by_key(&sequence, Command::sequence)
            .ok()?;
        Some(self.commands.remove(pos))
    }

    pub fn get(&self, sequence: u32) -> Option<&Command> {
        self.commands
            .binary_search_by_key(&sequence, Command::sequence)
            .ok()
            .map(|pos| &self.commands[pos])
    }

    /// Commands in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Mutable access in ascending sequence order, used while executing.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Command> {
        self.commands.iter_mut()
    }

    /// Number of sequences still missing.
    pub fn missing_count(&self) -> u32 {
        self.target_count.saturating_sub(self.commands.len() as u32)
    }

    /// Sequences still missing from the set, in ascending order.
    ///
    /// Lazy, so callers can take a prefix of a sparse set without walking
    /// the whole range.
    pub fn pending_sequences(&self) -> impl Iterator<Item = u32> + '_ {
        let mut present = self.commands.iter().map(Command::sequence).peekable();
        (1..=self.target_count).filter(move |seq| {
            if present.peek() == Some(seq) {
                present.next();
                false
            } else {
                true
            }
        })
    }

    /// One line describing what is missing, listing at most a few sequences.
    pub fn missing_summary(&self) -> String {
        let missing = self.missing_count();
        let shown: Vec<String> = self
            .pending_sequences()
            .take(MISSING_PREVIEW)
            .map(|seq| seq.to_string())
            .collect();
        let more = if missing as usize > shown.len() { ", ..." } else { "" };
        format!(
            "command set {} incomplete, {missing} of {} missing [{}{more}]",
            self.id,
            self.target_count,
            shown.join(", ")
        )
    }

    /// Returns `true` when the set is complete and every command succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.is_complete()
            && self
                .commands
                .iter()
                .all(|c| c.status == CommandStatus::Success)
    }
}
