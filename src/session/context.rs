use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Situation snapshot taken at connect time
///
/// Used once, to build the system directive sent in the setup message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub location: String,
    /// Alert summaries, most important first
    #[serde(default)]
    pub active_alerts: Vec<String>,
    #[serde(default)]
    pub household_size: Option<u32>,
    #[serde(default)]
    pub has_elderly: Option<bool>,
    #[serde(default)]
    pub has_pets: Option<bool>,
    #[serde(default)]
    pub mobility_notes: Option<String>,
    #[serde(default)]
    pub known_hazards: Vec<String>,
}

impl ConversationContext {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.active_alerts.push(alert.into());
        self
    }

    pub fn with_household_size(mut self, size: u32) -> Self {
        self.household_size = Some(size);
        self
    }

    pub fn with_hazard(mut self, hazard: impl Into<String>) -> Self {
        self.known_hazards.push(hazard.into());
        self
    }

    /// Instructions for the remote model describing who it is talking to
    pub fn system_directive(&self) -> String {
        let mut directive = String::from(
            "You are Guardian, a calm and concise emergency-preparedness assistant. \
             Speak in short, clear sentences and give the most urgent safety action first. \
             If life is at risk, tell the user to contact local emergency services.\n",
        );

        let location = if self.location.trim().is_empty() {
            "an unknown location"
        } else {
            self.location.trim()
        };
        let _ = writeln!(directive, "The user is in {location}.");

        if self.active_alerts.is_empty() {
            directive.push_str("There are no active weather alerts.\n");
        } else {
            directive.push_str("Active alerts:\n");
            for alert in &self.active_alerts {
                let _ = writeln!(directive, "- {alert}");
            }
        }

        let mut household = Vec::new();
        if let Some(size) = self.household_size {
            household.push(format!("{size} people"));
        }
        if self.has_elderly == Some(true) {
            household.push("elderly members".to_string());
        }
        if self.has_pets == Some(true) {
            household.push("pets".to_string());
        }
        if !household.is_empty() {
            let _ = writeln!(directive, "Household: {}.", household.join(", "));
        }

        if let Some(notes) = self.mobility_notes.as_deref().filter(|n| !n.trim().is_empty()) {
            let _ = writeln!(directive, "Mobility needs: {}.", notes.trim());
        }

        if !self.known_hazards.is_empty() {
            let _ = writeln!(
                directive,
                "Known hazards at home: {}.",
                self.known_hazards.join(", ")
            );
        }

        directive
    }
}
