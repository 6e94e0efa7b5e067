//! Student and experiment metadata attached to a report.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Header information printed on the report's title block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportMetadata {
    pub experiment_name: String,
    pub supervisor: String,
    pub name: String,
    pub student_id: String,
    pub class_num: String,
    pub group_num: String,
    pub seat_num: String,
    /// Experiment date as `YYYY-MM-DD` or `YYYY/MM/DD`.
    pub date: String,
    pub room: String,
    /// Whether the experiment was a make-up session.
    pub is_makeup: bool,
    /// Free-text instructions for the content, passed to the model only.
    pub additional_requirements: String,
}

impl ReportMetadata {
    /// Splits the experiment date into (year, month, day).
    ///
    /// Falls back to `today` when the date is empty or not three parts.
    pub fn date_parts(&self, today: NaiveDate) -> (String, String, String) {
        let parts: Vec<&str> = self
            .date
            .split(['-', '/'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() == 3 {
            (
                parts[0].to_string(),
                parts[1].to_string(),
                parts[2].to_string(),
            )
        } else {
            (
                today.year().to_string(),
                today.month().to_string(),
                today.day().to_string(),
            )
        }
    }

    /// Short plain-text description used in prompts.
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        let fields = [
            ("Experiment", &self.experiment_name),
            ("Supervisor", &self.supervisor),
            ("Student", &self.name),
            ("Student ID", &self.student_id),
            ("Room", &self.room),
            ("Date", &self.date),
        ];
        for (label, value) in fields {
            if !value.trim().is_empty() {
                lines.push(format!("{}: {}", label, value.trim()));
            }
        }
        if !self.additional_requirements.trim().is_empty() {
            lines.push(format!(
                "Additional requirements: {}",
                self.additional_requirements.trim()
            ));
        }
        if lines.is_empty() {
            "(no metadata provided)".to_string()
        } else {
            lines.join("\n")
        }
    }
}
