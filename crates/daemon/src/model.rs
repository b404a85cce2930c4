//! Domain records the engine reads and mutates.
//!
//! Broadcasters and events are owned by the surrounding application; the
//! engine only reads them and appends media assets to events.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use deunicode::deunicode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A remotely piloted encoder bound to a physical location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Broadcaster {
    pub id: u64,
    pub name: String,
    pub slug: String,
    /// Key selecting the piloting backend (e.g. "Wowza"). Unset means not pilotable.
    #[serde(default)]
    pub piloting_implementation: Option<String>,
    /// Flat JSON document with the backend's connection parameters.
    #[serde(default)]
    pub piloting_conf: Option<String>,
    /// True while the broadcaster is sending a stream.
    #[serde(default)]
    pub status: bool,
}

impl Broadcaster {
    /// Create a broadcaster whose slug is derived from its name.
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            slug: slugify(name),
            piloting_implementation: None,
            piloting_conf: None,
            status: false,
        }
    }

    pub fn with_piloting(mut self, implementation: &str, conf: &str) -> Self {
        self.piloting_implementation = Some(implementation.to_string());
        self.piloting_conf = Some(conf.to_string());
        self
    }
}

/// A permanent artifact produced from one finished recording segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaAsset {
    pub id: Uuid,
    pub title: String,
    /// Login of the owning user.
    pub owner: String,
    /// Location of the file inside the permanent media store.
    pub path: PathBuf,
    pub is_draft: bool,
    /// Content type inherited from the event.
    pub kind: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A scheduled time window during which a broadcaster should record.
///
/// Date and times are local wall-clock values and are never combined into an
/// instant: an event is current when its date is today and the time of day
/// lies in `[start_time, end_time]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: u64,
    pub slug: String,
    pub title: String,
    /// Login of the owning user.
    pub owner: String,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub broadcaster_id: u64,
    #[serde(default)]
    pub is_auto_start: bool,
    #[serde(default = "default_true")]
    pub is_draft: bool,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub assets: Vec<MediaAsset>,
}

fn default_true() -> bool {
    true
}

impl Event {
    /// Create a draft event that is not auto-started.
    pub fn new(
        id: u64,
        title: &str,
        owner: &str,
        start_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        broadcaster_id: u64,
    ) -> Self {
        Self {
            id,
            slug: event_slug(id, title),
            title: title.to_string(),
            owner: owner.to_string(),
            start_date,
            start_time,
            end_time,
            broadcaster_id,
            is_auto_start: false,
            is_draft: true,
            is_restricted: false,
            kind: None,
            assets: Vec::new(),
        }
    }

    pub fn auto_start(mut self) -> Self {
        self.is_auto_start = true;
        self
    }

    pub fn is_current(&self, now: NaiveDateTime) -> bool {
        self.start_date == now.date()
            && self.start_time <= now.time()
            && now.time() <= self.end_time
    }

    pub fn is_past(&self, now: NaiveDateTime) -> bool {
        self.start_date < now.date()
            || (self.start_date == now.date() && self.end_time < now.time())
    }

    pub fn is_coming(&self, now: NaiveDateTime) -> bool {
        self.start_date > now.date()
            || (self.start_date == now.date() && now.time() < self.start_time)
    }

    /// True when the event is dated `now`'s day and ended in `[now - grace, now)`.
    ///
    /// An event ending exactly at `now` is still current and is excluded.
    pub fn ended_within(&self, now: NaiveDateTime, grace: Duration) -> bool {
        if self.start_date != now.date() {
            return false;
        }
        let end = self.start_date.and_time(self.end_time);
        end < now && end >= now - grace
    }

    /// Same broadcaster, same date, intersecting time windows.
    pub fn overlaps(&self, other: &Event) -> bool {
        self.broadcaster_id == other.broadcaster_id
            && self.start_date == other.start_date
            && self.start_time <= other.end_time
            && other.start_time <= self.end_time
    }
}

/// Lower-case ASCII slug: letters are transliterated to ASCII first, then
/// alphanumerics are kept and every other run collapsed to `-`.
pub fn slugify(value: &str) -> String {
    let ascii = deunicode(value);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Event slugs are the zero-padded id followed by the slugified title.
pub fn event_slug(id: u64, title: &str) -> String {
    format!("{:04}-{}", id, slugify(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn event(start: (u32, u32), end: (u32, u32)) -> Event {
        Event::new(
            7,
            "Cours de physique",
            "alice",
            NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            1,
        )
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Amphi A - Bâtiment 2"), "amphi-a-batiment-2");
        assert_eq!(slugify("Amphi Bâtiment Élysée"), "amphi-batiment-elysee");
        assert_eq!(slugify("  Studio  "), "studio");
        assert_eq!(slugify("room_42"), "room_42");
        assert_eq!(Broadcaster::new(1, "Salle Élysée").slug, "salle-elysee");
    }

    #[test]
    fn test_event_slug_is_padded() {
        assert_eq!(event_slug(7, "Cours de physique"), "0007-cours-de-physique");
        assert_eq!(event_slug(12345, "X"), "12345-x");
    }

    #[test]
    fn test_new_event_defaults() {
        let e = event((10, 0), (11, 0));
        assert!(e.is_draft);
        assert!(!e.is_auto_start);
        assert!(!e.is_restricted);
        assert!(e.assets.is_empty());
    }

    #[test]
    fn test_current_past_coming() {
        let e = event((10, 0), (11, 0));
        assert!(e.is_coming(at(9, 59)));
        assert!(e.is_current(at(10, 0)));
        assert!(e.is_current(at(11, 0)));
        assert!(e.is_past(at(11, 1)));
        assert!(!e.is_current(at(11, 1)));
    }

    #[test]
    fn test_other_day_is_never_current() {
        let e = event((0, 0), (23, 59));
        let tomorrow = at(12, 0) + Duration::days(1);
        assert!(!e.is_current(tomorrow));
        assert!(e.is_past(tomorrow));
    }

    #[test]
    fn test_ended_within_grace_boundary() {
        let e = event((10, 0), (11, 0));
        let grace = Duration::minutes(5);
        assert!(e.ended_within(at(11, 4), grace));
        assert!(e.ended_within(at(11, 5), grace));
        assert!(!e.ended_within(at(11, 6), grace));
        assert!(!e.ended_within(at(11, 0), grace));
        assert!(!e.ended_within(at(10, 30), grace));
    }

    #[test]
    fn test_overlaps() {
        let a = event((10, 0), (11, 0));
        let b = event((10, 30), (12, 0));
        let c = event((11, 30), (12, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        let mut elsewhere = b.clone();
        elsewhere.broadcaster_id = 2;
        assert!(!a.overlaps(&elsewhere));
    }

    proptest! {
        #[test]
        fn prop_exactly_one_of_past_current_coming(
            start in 0u32..1380,
            len in 1u32..60,
            now in 0u32..1440,
        ) {
            let e = event((start / 60, start % 60), ((start + len) / 60, (start + len) % 60));
            let now = at(now / 60, now % 60);
            let flags = [e.is_past(now), e.is_current(now), e.is_coming(now)];
            prop_assert_eq!(flags.iter().filter(|f| **f).count(), 1);
        }

        #[test]
        fn prop_slug_is_url_safe(name in "\\PC{0,40}") {
            let slug = slugify(&name);
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
        }
    }
}
