//! Keyword routing for free-text voice commands.
//!
//! Routes are tried top to bottom and the first matching predicate handles the
//! command. Matching is on whole words, so "condition" does not count as "on".

use crate::services::ingest::FarmService;
use crate::store::Deadline;
use log::{error, info};

pub const HELP: &str = "I can help you with pump control, soil moisture checks, and crop problem detection.";

/// Lowercased words of a spoken command.
pub struct Words(Vec<String>);

impl Words {
    pub fn parse(command: &str) -> Self {
        Words(
            command
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase)
                .collect(),
        )
    }

    pub fn has(&self, word: &str) -> bool {
        self.0.iter().any(|w| w == word)
    }

    pub fn has_any(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.has(w))
    }
}

struct Route {
    name: &'static str,
    matches: fn(&Words) -> bool,
    handle: fn(&FarmService, &Deadline) -> String,
}

const ROUTES: &[Route] = &[
    Route {
        name: "pump-on",
        matches: |w| w.has("pump") && w.has("on"),
        handle: |svc, deadline| switch_pump(svc, true, deadline),
    },
    Route {
        name: "pump-off",
        matches: |w| w.has("pump") && w.has("off"),
        handle: |svc, deadline| switch_pump(svc, false, deadline),
    },
    Route {
        name: "moisture",
        matches: |w| w.has("soil") && w.has("moisture"),
        handle: soil_moisture,
    },
    Route {
        name: "problems",
        matches: |w| w.has_any(&["problem", "problems", "issue", "issues"]),
        handle: problems,
    },
];

/// Answer a spoken command. `deadline` bounds any command the route enqueues.
pub fn respond(service: &FarmService, command: &str, deadline: &Deadline) -> String {
    let words = Words::parse(command);
    match ROUTES.iter().find(|r| (r.matches)(&words)) {
        Some(route) => {
            info!("Voice: {:?} routed to {}", command, route.name);
            (route.handle)(service, deadline)
        }
        None => HELP.to_string(),
    }
}

fn switch_pump(service: &FarmService, on: bool, deadline: &Deadline) -> String {
    let state = if on { "ON" } else { "OFF" };
    match service.set_pump(None, on, deadline) {
        Ok(_) => format!("Turning water pump {}", state),
        Err(e) => {
            error!("Voice pump {} failed: {}", state, e);
            "Could not reach the water pump, please try again".to_string()
        }
    }
}

fn soil_moisture(service: &FarmService, _: &Deadline) -> String {
    match service.current_status(None) {
        Ok(Some(status)) => format!("Current soil moisture is {}%", status.sensor_data.soil_moisture),
        Ok(None) => "Soil moisture data not available".to_string(),
        Err(e) => {
            error!("Voice moisture query failed: {}", e);
            "Soil moisture data not available".to_string()
        }
    }
}

fn problems(service: &FarmService, _: &Deadline) -> String {
    let found = match service.current_status(None) {
        Ok(status) => status.map(|s| s.detected_problems).unwrap_or_default(),
        Err(e) => {
            error!("Voice problem query failed: {}", e);
            return "Crop status is unavailable right now".to_string();
        }
    };
    match found.first() {
        Some(first) => format!("Detected {} problems. {} - {}", found.len(), first.problem, first.solution),
        None => "No major problems detected. Your crops are healthy!".to_string(),
    }
}
