use std::sync::Mutex;

use crate::errors::DomainError;

/// Round-robin assignee allocation over a fixed roster.
///
/// The cursor lives behind a mutex so concurrent handlers each get a distinct
/// slot; N calls from any number of tasks leave the cursor where N sequential
/// calls would. The cursor is not persisted and starts at the first name.
#[derive(Debug)]
pub struct AssignmentRotator {
    roster: Vec<String>,
    cursor: Mutex<usize>,
}

impl AssignmentRotator {
    pub fn new<I, S>(roster: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roster = roster
            .into_iter()
            .map(Into::into)
            .map(|name: String| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        if roster.is_empty() {
            return Err(DomainError::EmptyRoster);
        }

        Ok(Self { roster, cursor: Mutex::new(0) })
    }

    pub fn next(&self) -> String {
        let mut cursor = match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let name = self.roster[*cursor].clone();
        *cursor = (*cursor + 1) % self.roster.len();
        name
    }

    /// Name the next call to [`next`](Self::next) will return, without advancing.
    pub fn peek(&self) -> &str {
        let cursor = match self.cursor.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        &self.roster[cursor]
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }
}
