//! Scheduled announcements and the schedule table.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An announcement that plays once when the wall clock reaches `hour:minute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAnnouncement {
    pub hour: u8,
    pub minute: u8,
    pub announcement_id: String,
    /// Set once the entry has fired; cleared by [`Schedule::reset`].
    #[serde(default)]
    pub triggered: bool,
}

impl ScheduledAnnouncement {
    pub fn new(hour: u8, minute: u8, announcement_id: impl Into<String>) -> Result<Self> {
        let entry = Self {
            hour,
            minute,
            announcement_id: announcement_id.into(),
            triggered: false,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 {
            return Err(Error::InvalidArgument(format!(
                "invalid time {:02}:{:02}",
                self.hour, self.minute
            )));
        }
        if self.announcement_id.is_empty() {
            return Err(Error::InvalidArgument(
                "scheduled announcement needs an id".into(),
            ));
        }
        Ok(())
    }

    /// Whether the entry's time equals the given clock time (to the minute).
    pub fn matches<T: Timelike>(&self, now: &T) -> bool {
        u32::from(self.hour) == now.hour() && u32::from(self.minute) == now.minute()
    }

    /// Whether the entry should fire at `now`.
    pub fn is_due<T: Timelike>(&self, now: &T) -> bool {
        !self.triggered && self.matches(now)
    }

    /// Format as HH:MM.
    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Ordered table of scheduled announcements.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Schedule {
    entries: Vec<ScheduledAnnouncement>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ScheduledAnnouncement] {
        &self.entries
    }

    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, returning its index.
    pub fn add(&mut self, entry: ScheduledAnnouncement) -> Result<usize> {
        entry.validate()?;
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Replace the time and announcement of an entry. Its triggered flag is cleared.
    pub fn update(
        &mut self,
        index: usize,
        hour: u8,
        minute: u8,
        announcement_id: impl Into<String>,
    ) -> Result<()> {
        let replacement = ScheduledAnnouncement::new(hour, minute, announcement_id)?;
        let entry = self.entries.get_mut(index).ok_or_else(|| {
            Error::not_found("scheduled announcement", index.to_string())
        })?;
        *entry = replacement;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<ScheduledAnnouncement> {
        if index >= self.entries.len() {
            return Err(Error::not_found("scheduled announcement", index.to_string()));
        }
        Ok(self.entries.remove(index))
    }

    /// Clear every triggered flag.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.triggered = false;
        }
    }

    /// Index of the first entry due at `now`.
    pub fn next_due<T: Timelike>(&self, now: &T) -> Option<usize> {
        self.entries.iter().position(|e| e.is_due(now))
    }

    pub fn mark_triggered(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.triggered = true;
        }
    }

    pub fn get(&self, index: usize) -> Option<&ScheduledAnnouncement> {
        self.entries.get(index)
    }
}
