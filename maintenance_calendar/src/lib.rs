mod cache_id;
mod ics;
mod pipeline;
mod window;

pub use cache_id::{CacheIdError, CacheMemberId};
pub use ics::{render_calendar, write_calendar};
pub use pipeline::{
    BuildOptions, HealthSource, ResourceInventory, build_calendar_entries, fetch_health_events,
};
pub use window::{
    MaintenanceWindow, ResolveError, ResolvedOccurrence, SameDayRule, WindowParseError,
    WindowPoint,
};

pub type UtcTime = chrono::DateTime<chrono::Utc>;

pub const DEFAULT_DASHBOARD_URL: &str =
    "https://phd.aws.amazon.com/phd/home?region=us-east-1#/dashboard/scheduled-changes";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Service {
    Compute,
    Database,
    Cache,
    Other(Box<str>),
}

impl Service {
    /// Maps the Health API's service code (`EC2`, `RDS`, ...) to a `Service`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "EC2" => Self::Compute,
            "RDS" => Self::Database,
            "ELASTICACHE" => Self::Cache,
            _ => Self::Other(code.into()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Compute => "EC2",
            Self::Database => "RDS",
            Self::Cache => "ELASTICACHE",
            Self::Other(x) => x,
        }
    }
}

/// An event as returned by a listing of open/upcoming scheduled changes.
#[derive(Clone, Debug, Default)]
pub struct EventSummary {
    pub id: Box<str>,
    pub region: Box<str>,
}

/// The bits of an event's details that calendar entries are built from.
#[derive(Clone, Debug)]
pub struct EventDetail {
    pub event_type_code: Box<str>,
    pub service: Service,
    pub start_time: Option<UtcTime>,
    pub end_time: Option<UtcTime>,
    pub description: Box<str>,
}

#[derive(Clone, Debug)]
pub struct HealthEvent {
    pub id: Box<str>,
    pub service: Service,
    pub region: Box<str>,
    pub event_type_code: Box<str>,
    pub start_time: UtcTime,
    pub end_time: Option<UtcTime>,
    pub description: Box<str>,
    pub affected_resources: Vec<Box<str>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarEntry {
    /// `${event_id}_${resource_id}`.
    pub id: Box<str>,
    pub summary: Box<str>,
    pub description: Box<str>,
    pub location: Box<str>,
    pub url: Box<str>,
    pub start_time: UtcTime,
    pub end_time: UtcTime,
}

/// Short label for an event type. Codes without a label are returned as-is.
pub fn event_type_label(code: &str) -> &str {
    match code {
        "AWS_EC2_INSTANCE_REBOOT_MAINTENANCE_SCHEDULED"
        | "AWS_EC2_INSTANCE_POWER_MAINTENANCE_SCHEDULED"
        | "AWS_EC2_SYSTEM_REBOOT_MAINTENANCE_SCHEDULED" => "REBOOT",
        "AWS_EC2_INSTANCE_RETIREMENT_SCHEDULED" => "RETIREMENT",
        "AWS_EC2_INSTANCE_NETWORK_MAINTENANCE_SCHEDULED" => "NET MAINT",
        "AWS_RDS_MAINTENANCE_SCHEDULED" => "MAINT SCHEDULED",
        _ => code,
    }
}
