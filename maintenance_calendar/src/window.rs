use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WindowParseError {
    #[error("maintenance window {0:?} isn't of the form `wkd:HH:MM-wkd:HH:MM`")]
    Malformed(Box<str>),
    #[error("unknown weekday {0:?}; expected one of sun, mon, tue, wed, thu, fri or sat")]
    UnknownWeekday(Box<str>),
    #[error("invalid time of day {0:?}")]
    InvalidTime(Box<str>),
    #[error("maintenance window {0:?} ends before it starts")]
    EndsBeforeStart(Box<str>),
    #[error("maintenance window {0:?} spans more than a day, which can't be resolved to a date")]
    TooLong(Box<str>),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{0} doesn't exist in the reference timezone")]
    NonexistentLocalTime(NaiveDateTime),
    #[error("{0} is ambiguous in the reference timezone")]
    AmbiguousLocalTime(NaiveDateTime),
    #[error("next maintenance window falls outside of the representable date range")]
    OutOfRange,
}

/// How to decide whether a window that starts on the reference time's weekday has already passed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SameDayRule {
    /// The window has passed if its start (hour, minute) is strictly before the reference's.
    #[default]
    Exact,
    /// The window has passed only if *both* its start hour and start minute are strictly before
    /// the reference's. Calendars exported by older versions of this tool were built this way, so
    /// this exists to keep UIDs and times stable for anyone diffing against those.
    Legacy,
}

impl SameDayRule {
    fn window_already_started(self, window_start: NaiveTime, reference: NaiveTime) -> bool {
        let window = (window_start.hour(), window_start.minute());
        let reference = (reference.hour(), reference.minute());
        match self {
            Self::Exact => window < reference,
            Self::Legacy => window.0 < reference.0 && window.1 < reference.1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowPoint {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl WindowPoint {
    fn minute_of_week(&self) -> u32 {
        self.weekday.num_days_from_sunday() * 24 * 60 + self.time.hour() * 60 + self.time.minute()
    }
}

impl fmt::Display for WindowPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}",
            weekday_short_name(self.weekday),
            self.time.hour(),
            self.time.minute()
        )
    }
}

/// A weekly recurring maintenance window, e.g., `sat:23:30-sun:01:00`.
///
/// Only windows which end at most a day after they start are representable; anything else is
/// rejected when parsing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: WindowPoint,
    pub end: WindowPoint,
}

/// A concrete instance of a `MaintenanceWindow`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedOccurrence<Tz: TimeZone> {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

fn weekday_short_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "sun",
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
    }
}

fn parse_weekday(name: &str) -> Result<Weekday, WindowParseError> {
    Ok(match name {
        "sun" => Weekday::Sun,
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        _ => return Err(WindowParseError::UnknownWeekday(name.into())),
    })
}

fn parse_time_component(s: &str, max: u32) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = s.parse::<u32>().ok()?;
    (n <= max).then_some(n)
}

fn parse_window_point(s: &str, whole: &str) -> Result<WindowPoint, WindowParseError> {
    let mut pieces = s.split(':');
    let (Some(weekday), Some(hour), Some(minute), None) =
        (pieces.next(), pieces.next(), pieces.next(), pieces.next())
    else {
        return Err(WindowParseError::Malformed(whole.into()));
    };

    let weekday = parse_weekday(weekday)?;
    let time = parse_time_component(hour, 23)
        .zip(parse_time_component(minute, 59))
        .and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
        .ok_or_else(|| WindowParseError::InvalidTime(format!("{hour}:{minute}").into()))?;
    Ok(WindowPoint { weekday, time })
}

impl FromStr for MaintenanceWindow {
    type Err = WindowParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((start, end)) = s.split_once('-') else {
            return Err(WindowParseError::Malformed(s.into()));
        };
        let start = parse_window_point(start, s)?;
        let end = parse_window_point(end, s)?;

        const MINUTES_PER_DAY: u32 = 24 * 60;
        const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;
        if start.weekday == end.weekday {
            if end.time < start.time {
                return Err(WindowParseError::EndsBeforeStart(s.into()));
            }
        } else {
            // Resolution only ever moves the end a single day past the start.
            let span = (end.minute_of_week() + MINUTES_PER_WEEK - start.minute_of_week())
                % MINUTES_PER_WEEK;
            if end.weekday != start.weekday.succ() || span > MINUTES_PER_DAY {
                return Err(WindowParseError::TooLong(s.into()));
            }
        }

        Ok(Self { start, end })
    }
}

impl fmt::Display for MaintenanceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn localize<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Result<DateTime<Tz>, ResolveError> {
    match tz.from_local_datetime(&local) {
        chrono::LocalResult::Single(dt) => Ok(dt),
        chrono::LocalResult::Ambiguous(_, _) => Err(ResolveError::AmbiguousLocalTime(local)),
        chrono::LocalResult::None => Err(ResolveError::NonexistentLocalTime(local)),
    }
}

impl MaintenanceWindow {
    /// Finds the occurrence of this window in the week starting at `reference`'s date. If the
    /// window starts on `reference`'s weekday but has already started (per `rule`), the
    /// occurrence a week later is returned instead.
    ///
    /// All wall-clock math happens in `reference`'s timezone.
    pub fn next_occurrence<Tz: TimeZone>(
        &self,
        reference: &DateTime<Tz>,
        rule: SameDayRule,
    ) -> Result<ResolvedOccurrence<Tz>, ResolveError> {
        let start_day = self.start.weekday.num_days_from_sunday();
        let reference_day = reference.weekday().num_days_from_sunday();
        let mut days_ahead = (start_day + 7 - reference_day) % 7;
        if days_ahead == 0 && rule.window_already_started(self.start.time, reference.time()) {
            days_ahead = 7;
        }

        let start_date = reference
            .date_naive()
            .checked_add_days(Days::new(days_ahead.into()))
            .ok_or(ResolveError::OutOfRange)?;
        let end_date = if self.end.weekday == self.start.weekday {
            start_date
        } else {
            start_date.succ_opt().ok_or(ResolveError::OutOfRange)?
        };

        let tz = reference.timezone();
        Ok(ResolvedOccurrence {
            start: localize(&tz, start_date.and_time(self.start.time))?,
            end: localize(&tz, end_date.and_time(self.end.time))?,
        })
    }
}
