//! Happenings and tracked states
//!
//! A [`Happening`] is a free-text event log record. A [`StateRecord`] is a
//! named score that receives delta events ([`StateEvent`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A free-text event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Happening {
    #[serde(default)]
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
}

impl Happening {
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            content: content.into(),
            create_time: now,
            update_time: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HappeningPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}

impl HappeningPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            create_time: None,
        }
    }

    /// Applies the patch and bumps `update_time`
    pub fn apply(&self, happening: &mut Happening, now: DateTime<Utc>) {
        if let Some(content) = &self.content {
            happening.content = content.clone();
        }
        if let Some(create_time) = self.create_time {
            happening.create_time = create_time;
        }
        happening.update_time = now.max(happening.update_time);
    }
}

/// Options for `HappeningService::list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HappeningListOptions {
    pub filter: String,
    pub limit: usize,
    pub offset: usize,
}

impl Default for HappeningListOptions {
    fn default() -> Self {
        Self {
            filter: String::new(),
            limit: 20,
            offset: 0,
        }
    }
}

/// A named score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub update_time: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            score: 0.0,
            scope: String::new(),
            create_time: now,
            update_time: now,
        }
    }
}

/// A delta applied to a [`StateRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    #[serde(default)]
    pub id: i64,
    pub state_id: i64,
    pub delta_score: f64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub create_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn happening_patch_updates_content() {
        let mut h = Happening::new("woke up");
        let later = h.update_time + Duration::seconds(1);
        HappeningPatch::content("woke up early").apply(&mut h, later);
        assert_eq!(h.content, "woke up early");
        assert_eq!(h.update_time, later);
    }

    #[test]
    fn list_options_default_limit() {
        assert_eq!(HappeningListOptions::default().limit, 20);
    }
}
