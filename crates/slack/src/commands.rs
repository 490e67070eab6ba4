use taskbot_core::{PipelineError, Urgency};
use thiserror::Error;

use crate::blocks::usage_text;

pub const TASK_COMMAND: &str = "/업무추가";
const FIELD_DELIMITER: char = '|';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_id: String,
}

/// `/업무추가 title | assignee | deadline | urgency`; everything after the title
/// is optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualTaskCommand {
    pub title: String,
    pub assignee: Option<String>,
    pub deadline: Option<String>,
    pub urgency: Urgency,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("task title is required")]
    MissingTitle,
}

impl From<CommandParseError> for PipelineError {
    fn from(error: CommandParseError) -> Self {
        match error {
            CommandParseError::MissingTitle => PipelineError::Validation(usage_text()),
        }
    }
}

pub fn is_task_command(command: &str) -> bool {
    command.trim() == TASK_COMMAND
}

pub fn parse_task_command(text: &str) -> Result<ManualTaskCommand, CommandParseError> {
    let mut fields = text.split(FIELD_DELIMITER).map(str::trim);

    let title = fields.next().unwrap_or_default();
    if title.is_empty() {
        return Err(CommandParseError::MissingTitle);
    }
    let assignee = fields.next().filter(|value| !value.is_empty()).map(str::to_owned);
    let deadline = fields.next().filter(|value| !value.is_empty()).map(str::to_owned);
    let urgency = fields.next().and_then(Urgency::from_label).unwrap_or_default();

    Ok(ManualTaskCommand { title: title.to_owned(), assignee, deadline, urgency })
}
