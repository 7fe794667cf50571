use std::path::Path;

use anyhow::{Context, Result};
use icalendar::{Calendar, Component, Event, EventLike};

use crate::CalendarEntry;

/// Renders `entries` as an iCalendar document, with one VEVENT per entry.
pub fn render_calendar(entries: &[CalendarEntry]) -> String {
    let mut calendar = Calendar::new();
    for entry in entries {
        calendar.push(
            Event::new()
                .uid(&entry.id)
                .summary(&entry.summary)
                .description(&entry.description)
                .add_property("LOCATION", &*entry.location)
                .add_property("URL", &*entry.url)
                .starts(entry.start_time)
                .ends(entry.end_time)
                .done(),
        );
    }
    calendar.done().to_string()
}

/// Writes `entries` to `path` as an iCalendar file, replacing anything that's already there.
pub fn write_calendar(path: &Path, entries: &[CalendarEntry]) -> Result<()> {
    std::fs::write(path, render_calendar(entries))
        .with_context(|| format!("writing calendar to {}", path.display()))
}
