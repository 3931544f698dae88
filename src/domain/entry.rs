//! Entry and note records
//!
//! An [`Entry`] is a persistent task. Entries form a forest through
//! `parent_id` (0 = root). A [`Note`] is a text annotation owned by
//! exactly one entry.

use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A persistent to-do record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: i64,

    pub text: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub done_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub create_time: DateTime<Utc>,

    #[serde(default)]
    pub update_time: DateTime<Utc>,

    /// Milliseconds; overrides `create_time` for ordering when non-zero
    #[serde(default)]
    pub adjusted_top_time: i64,

    /// 0 (none) to 5
    #[serde(default)]
    pub highlight_level: i32,

    /// 0 means the entry is a root
    #[serde(default)]
    pub parent_id: i64,
}

impl Entry {
    /// Creates a new root entry stamped with the current time
    pub fn new(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            text: text.into(),
            done: false,
            done_time: None,
            create_time: now,
            update_time: now,
            adjusted_top_time: 0,
            highlight_level: 0,
            parent_id: 0,
        }
    }

    /// Creates a new entry under `parent_id`
    pub fn child_of(parent_id: i64, text: impl Into<String>) -> Self {
        Self {
            parent_id,
            ..Self::new(text)
        }
    }

    /// Fills unset timestamps with `now` and enforces done ⇒ done_time
    pub fn stamp_defaults(&mut self, now: DateTime<Utc>) {
        if is_unset(&self.create_time) {
            self.create_time = now;
        }
        if is_unset(&self.update_time) {
            self.update_time = now;
        }
        if self.update_time < self.create_time {
            self.update_time = self.create_time;
        }
        if self.done && self.done_time.is_none() {
            self.done_time = Some(now);
        }
    }

    /// Returns true if this entry is done before `cutoff` and hidden without history
    pub fn is_history(&self, cutoff: DateTime<Utc>) -> bool {
        self.done && self.done_time.is_some_and(|t| t < cutoff)
    }

    /// Case-insensitive substring match against the text
    pub fn matches_filter(&self, filter: &str) -> bool {
        filter.is_empty() || self.text.to_lowercase().contains(&filter.to_lowercase())
    }
}

/// Returns true for the zero (epoch) timestamp that marks "not provided"
fn is_unset(t: &DateTime<Utc>) -> bool {
    t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0
}

/// Ordering key: `adjusted_top_time` when set, else `create_time` in milliseconds
pub fn effective_time_ms(entry: &Entry) -> i64 {
    if entry.adjusted_top_time != 0 {
        entry.adjusted_top_time
    } else {
        entry.create_time.timestamp_millis()
    }
}

/// Start of the current local day, in UTC
pub fn history_cutoff() -> DateTime<Utc> {
    let today = Local::now().date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&today).earliest() {
        Some(t) => t.with_timezone(&Utc),
        None => Utc::now(),
    }
}

/// Optional field overrides applied by `update`
///
/// `done_time` distinguishes "absent" (`None`) from "set to null"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub done_time: Option<Option<DateTime<Utc>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_top_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_level: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
}

impl EntryPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Marks done (stamping `done_time`) or undone (clearing it)
    pub fn done(done: bool, now: DateTime<Utc>) -> Self {
        Self {
            done: Some(done),
            done_time: Some(done.then_some(now)),
            ..Self::default()
        }
    }

    pub fn adjusted_top_time(ms: i64) -> Self {
        Self {
            adjusted_top_time: Some(ms),
            ..Self::default()
        }
    }

    pub fn highlight_level(level: i32) -> Self {
        Self {
            highlight_level: Some(level),
            ..Self::default()
        }
    }

    /// Returns true if applying this patch can change sibling order or parent
    pub fn affects_order(&self) -> bool {
        self.adjusted_top_time.is_some() || self.parent_id.is_some() || self.create_time.is_some()
    }

    /// Applies the patch; a missing `update_time` means `now`
    pub fn apply(&self, entry: &mut Entry, now: DateTime<Utc>) {
        if let Some(text) = &self.text {
            entry.text = text.clone();
        }
        if let Some(done) = self.done {
            entry.done = done;
        }
        if let Some(done_time) = self.done_time {
            entry.done_time = done_time;
        }
        if let Some(create_time) = self.create_time {
            entry.create_time = create_time;
        }
        if let Some(level) = self.highlight_level {
            entry.highlight_level = level;
        }
        if let Some(ms) = self.adjusted_top_time {
            entry.adjusted_top_time = ms;
        }
        if let Some(parent_id) = self.parent_id {
            entry.parent_id = parent_id;
        }
        let update_time = self.update_time.unwrap_or(now);
        entry.update_time = update_time.max(entry.update_time);
        if entry.done && entry.done_time.is_none() {
            entry.done_time = Some(now);
        }
    }
}

/// A text annotation owned by one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub entry_id: i64,

    pub text: String,

    #[serde(default)]
    pub create_time: DateTime<Utc>,

    #[serde(default)]
    pub update_time: DateTime<Utc>,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            entry_id: 0,
            text: text.into(),
            create_time: now,
            update_time: now,
        }
    }

    pub fn stamp_defaults(&mut self, now: DateTime<Utc>) {
        if is_unset(&self.create_time) {
            self.create_time = now;
        }
        if is_unset(&self.update_time) {
            self.update_time = now;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl NotePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            update_time: None,
        }
    }

    pub fn apply(&self, note: &mut Note, now: DateTime<Utc>) {
        if let Some(text) = &self.text {
            note.text = text.clone();
        }
        note.update_time = self.update_time.unwrap_or(now).max(note.update_time);
    }
}

/// Sort keys for entry listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Id,
    Text,
    Done,
    CreateTime,
    UpdateTime,
}

impl SortBy {
    /// Compares two entries by this key; `CreateTime` honors `adjusted_top_time`
    pub fn compare(self, a: &Entry, b: &Entry) -> Ordering {
        let primary = match self {
            SortBy::Id => a.id.cmp(&b.id),
            SortBy::Text => a.text.cmp(&b.text),
            SortBy::Done => a.done.cmp(&b.done),
            SortBy::CreateTime => effective_time_ms(a).cmp(&effective_time_ms(b)),
            SortBy::UpdateTime => a.update_time.cmp(&b.update_time),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Sort keys for note listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoteSortBy {
    #[default]
    Id,
    Text,
    CreateTime,
    UpdateTime,
}

impl NoteSortBy {
    pub fn compare(self, a: &Note, b: &Note) -> Ordering {
        let primary = match self {
            NoteSortBy::Id => a.id.cmp(&b.id),
            NoteSortBy::Text => a.text.cmp(&b.text),
            NoteSortBy::CreateTime => a.create_time.cmp(&b.create_time),
            NoteSortBy::UpdateTime => a.update_time.cmp(&b.update_time),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Options for `EntryService::list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryListOptions {
    /// Case-insensitive substring filter on text
    pub filter: String,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// 0 means unlimited
    pub limit: usize,
    pub offset: usize,
    /// When false, entries done before the start of today are excluded
    pub include_history: bool,
}

impl EntryListOptions {
    /// Lists everything, optionally including history
    pub fn all(include_history: bool) -> Self {
        Self {
            include_history,
            ..Self::default()
        }
    }
}

/// Options for `NoteService::list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteListOptions {
    pub filter: String,
    pub sort_by: NoteSortBy,
    pub sort_order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

/// Serde adapter distinguishing a missing field from an explicit `null`
mod double_option {
    use super::*;

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn new_entry_is_root_and_undone() {
        let entry = Entry::new("buy milk");
        assert_eq!(entry.parent_id, 0);
        assert!(!entry.done);
        assert!(entry.update_time >= entry.create_time);
    }

    #[test]
    fn stamp_defaults_fills_zero_times() {
        let mut entry: Entry = serde_json::from_str(r#"{"text":"x","done":true}"#).unwrap();
        let now = at(1_000_000);
        entry.stamp_defaults(now);
        assert_eq!(entry.create_time, now);
        assert_eq!(entry.update_time, now);
        assert_eq!(entry.done_time, Some(now));
    }

    #[test]
    fn patch_overrides_only_given_fields() {
        let mut entry = Entry::new("old");
        entry.highlight_level = 2;
        let before = entry.update_time;

        EntryPatch::text("new").apply(&mut entry, before + Duration::seconds(5));

        assert_eq!(entry.text, "new");
        assert_eq!(entry.highlight_level, 2);
        assert!(entry.update_time > before);
    }

    #[test]
    fn patch_never_moves_update_time_backwards() {
        let mut entry = Entry::new("x");
        let before = entry.update_time;
        let patch = EntryPatch {
            update_time: Some(before - Duration::days(1)),
            ..EntryPatch::default()
        };
        patch.apply(&mut entry, before);
        assert_eq!(entry.update_time, before);
    }

    #[test]
    fn done_patch_sets_and_clears_done_time() {
        let mut entry = Entry::new("x");
        let now = Utc::now();
        EntryPatch::done(true, now).apply(&mut entry, now);
        assert!(entry.done);
        assert_eq!(entry.done_time, Some(now));

        EntryPatch::done(false, now).apply(&mut entry, now);
        assert!(!entry.done);
        assert_eq!(entry.done_time, None);
    }

    #[test]
    fn done_time_null_is_distinct_from_absent() {
        let absent: EntryPatch = serde_json::from_str(r#"{"text":"a"}"#).unwrap();
        assert_eq!(absent.done_time, None);

        let null: EntryPatch = serde_json::from_str(r#"{"done_time":null}"#).unwrap();
        assert_eq!(null.done_time, Some(None));

        let json = serde_json::to_string(&null).unwrap();
        assert_eq!(json, r#"{"done_time":null}"#);
    }

    #[test]
    fn history_only_for_done_before_cutoff() {
        let cutoff = at(10_000);
        let mut entry = Entry::new("x");
        assert!(!entry.is_history(cutoff));

        entry.done = true;
        entry.done_time = Some(at(9_000));
        assert!(entry.is_history(cutoff));

        entry.done_time = Some(at(11_000));
        assert!(!entry.is_history(cutoff));
    }

    #[test]
    fn create_time_sort_uses_adjusted_top_time() {
        let mut a = Entry::new("a");
        a.id = 1;
        a.create_time = at(100);
        let mut b = Entry::new("b");
        b.id = 2;
        b.create_time = at(200);

        assert_eq!(SortBy::CreateTime.compare(&a, &b), Ordering::Less);

        a.adjusted_top_time = at(300).timestamp_millis();
        assert_eq!(SortBy::CreateTime.compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn sort_order_reverses() {
        assert_eq!(SortOrder::Desc.apply(Ordering::Less), Ordering::Greater);
        assert_eq!(SortOrder::Asc.apply(Ordering::Less), Ordering::Less);
    }

    #[test]
    fn history_cutoff_is_not_in_future() {
        assert!(history_cutoff() <= Utc::now());
    }

    #[test]
    fn list_options_deserialize_with_defaults() {
        let opts: EntryListOptions =
            serde_json::from_str(r#"{"sort_by":"create_time","sort_order":"desc"}"#).unwrap();
        assert_eq!(opts.sort_by, SortBy::CreateTime);
        assert_eq!(opts.sort_order, SortOrder::Desc);
        assert!(!opts.include_history);
        assert_eq!(opts.limit, 0);
    }
}
