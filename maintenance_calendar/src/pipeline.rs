use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{debug, info, warn};

use crate::{
    CacheMemberId, CalendarEntry, DEFAULT_DASHBOARD_URL, EventDetail, EventSummary, HealthEvent,
    MaintenanceWindow, ResolvedOccurrence, SameDayRule, Service, event_type_label,
};

/// Read-only access to scheduled-change health events.
#[allow(async_fn_in_trait)]
pub trait HealthSource {
    /// Lists every open or upcoming scheduled-change event.
    async fn list_scheduled_events(&self) -> Result<Vec<EventSummary>>;

    async fn affected_resources(&self, event_id: &str) -> Result<Vec<Box<str>>>;

    /// Returns `None` if the API had no details for the event.
    async fn event_detail(&self, event_id: &str) -> Result<Option<EventDetail>>;
}

/// Lookups of per-resource metadata. Each returns `Ok(None)` if the resource has no value for
/// what's being asked for.
#[allow(async_fn_in_trait)]
pub trait ResourceInventory {
    /// The value of the instance's `Name` tag.
    async fn instance_name(&mut self, region: &str, instance_id: &str) -> Result<Option<String>>;

    async fn database_maintenance_window(
        &mut self,
        region: &str,
        resource_id: &str,
    ) -> Result<Option<String>>;

    async fn cache_maintenance_window(
        &mut self,
        region: &str,
        member: &CacheMemberId,
    ) -> Result<Option<String>>;
}

#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub same_day_rule: SameDayRule,
    /// Link attached to every calendar entry.
    pub dashboard_url: Box<str>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            same_day_rule: SameDayRule::default(),
            dashboard_url: DEFAULT_DASHBOARD_URL.into(),
        }
    }
}

async fn fetch_health_event<S: HealthSource>(
    source: &S,
    summary: EventSummary,
) -> Result<Option<HealthEvent>> {
    let affected_resources = source
        .affected_resources(&summary.id)
        .await
        .context("fetching affected resources")?;
    let Some(detail) = source
        .event_detail(&summary.id)
        .await
        .context("fetching event details")?
    else {
        warn!("No details were returned for event {}; skipping it", summary.id);
        return Ok(None);
    };
    let Some(start_time) = detail.start_time else {
        warn!("Event {} has no start time; skipping it", summary.id);
        return Ok(None);
    };

    Ok(Some(HealthEvent {
        id: summary.id,
        service: detail.service,
        region: summary.region,
        event_type_code: detail.event_type_code,
        start_time,
        end_time: detail.end_time,
        description: detail.description,
        affected_resources,
    }))
}

/// Fetches all scheduled-change events along with their details and affected resources.
///
/// Failing to list events is an error. Events whose details can't be fetched are logged and
/// skipped.
pub async fn fetch_health_events<S: HealthSource>(source: &S) -> Result<Vec<HealthEvent>> {
    let summaries = source
        .list_scheduled_events()
        .await
        .context("listing scheduled-change events")?;
    info!("Found {} scheduled-change events", summaries.len());

    let mut events = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let id = summary.id.clone();
        match fetch_health_event(source, summary).await {
            Ok(Some(event)) => {
                debug!(
                    "Event {id} ({}) affects {} resource(s)",
                    event.event_type_code,
                    event.affected_resources.len()
                );
                events.push(event);
            }
            Ok(None) => {}
            Err(x) => warn!("Skipping event {id}: {x:#}"),
        }
    }
    Ok(events)
}

async fn lookup_maintenance_window<I: ResourceInventory>(
    inventory: &mut I,
    event: &HealthEvent,
    resource: &str,
) -> Result<MaintenanceWindow> {
    let window = match &event.service {
        Service::Database => inventory
            .database_maintenance_window(&event.region, resource)
            .await
            .context("looking up database maintenance window")?,
        Service::Cache => {
            let member = resource.parse::<CacheMemberId>()?;
            inventory
                .cache_maintenance_window(&event.region, &member)
                .await
                .with_context(|| format!("looking up maintenance window of {member}"))?
        }
        other => bail!("{} resources don't have maintenance windows", other.code()),
    };

    let Some(window) = window else {
        bail!("no maintenance window is configured");
    };
    Ok(window.parse::<MaintenanceWindow>()?)
}

async fn resolve_maintenance_time<I: ResourceInventory>(
    inventory: &mut I,
    event: &HealthEvent,
    resource: &str,
    rule: SameDayRule,
) -> Result<ResolvedOccurrence<Utc>> {
    let window = lookup_maintenance_window(inventory, event, resource).await?;
    let occurrence = window.next_occurrence(&event.start_time, rule)?;
    debug!(
        "Maintenance window {window} of {resource} next runs {} through {}",
        occurrence.start, occurrence.end
    );
    Ok(occurrence)
}

async fn build_entry<I: ResourceInventory>(
    inventory: &mut I,
    event: &HealthEvent,
    resource: &str,
    options: &BuildOptions,
) -> CalendarEntry {
    let label = event_type_label(&event.event_type_code);
    let summary = match &event.service {
        Service::Compute => {
            let name = match inventory.instance_name(&event.region, resource).await {
                Ok(x) => x.unwrap_or_default(),
                Err(x) => {
                    warn!("Failed looking up the name of instance {resource}: {x:#}");
                    String::new()
                }
            };
            if name.is_empty() {
                format!("{label} {resource}")
            } else {
                format!("{label} {name} {resource}")
            }
        }
        service => format!("{} {resource} {label}", service.code()),
    };

    let mut description = event.description.to_string();
    let mut start_time = event.start_time;
    let mut end_time = event.end_time.unwrap_or(event.start_time);
    // The event's times only say "sometime after this"; the resource's own window says when.
    if matches!(event.service, Service::Database | Service::Cache) {
        match resolve_maintenance_time(inventory, event, resource, options.same_day_rule).await {
            Ok(occurrence) => {
                start_time = occurrence.start;
                end_time = occurrence.end;
            }
            Err(x) => {
                warn!("Using event times for {resource}; its maintenance window failed: {x:#}");
                description.push_str(&format!(
                    "\n\nNOTE: the maintenance window of {resource} couldn't be resolved ({x:#}). \
                     The times shown are the ones reported by the event."
                ));
            }
        }
    }

    CalendarEntry {
        id: format!("{}_{resource}", event.id).into(),
        summary: summary.into(),
        description: description.into(),
        location: event.region.clone(),
        url: options.dashboard_url.clone(),
        start_time,
        end_time,
    }
}

/// Builds one calendar entry per (event, affected resource) pair.
///
/// Lookup failures don't fail the build. They're logged, and the entry makes do with the data
/// that's available.
pub async fn build_calendar_entries<I: ResourceInventory>(
    events: &[HealthEvent],
    inventory: &mut I,
    options: &BuildOptions,
) -> Vec<CalendarEntry> {
    let mut entries = Vec::new();
    for event in events {
        if event.affected_resources.is_empty() {
            debug!("Event {} has no affected resources", event.id);
        }
        for resource in &event.affected_resources {
            entries.push(build_entry(inventory, event, resource, options).await);
        }
    }
    info!(
        "Built {} calendar entries from {} events",
        entries.len(),
        events.len()
    );
    entries
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;

    use chrono::{DateTime, NaiveDate};

    use crate::UtcTime;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> UtcTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
            .and_utc()
    }

    fn summary(id: &str) -> EventSummary {
        EventSummary {
            id: id.into(),
            region: "us-east-1".into(),
        }
    }

    fn detail(service: &str, code: &str, start_time: Option<UtcTime>) -> EventDetail {
        EventDetail {
            event_type_code: code.into(),
            service: Service::from_code(service),
            start_time,
            end_time: start_time.map(|x| x + chrono::Duration::hours(2)),
            description: "Scheduled maintenance".into(),
        }
    }

    fn event(
        id: &str,
        service: &str,
        code: &str,
        start_time: UtcTime,
        end_time: Option<UtcTime>,
        resources: &[&str],
    ) -> HealthEvent {
        HealthEvent {
            id: id.into(),
            service: Service::from_code(service),
            region: "eu-west-1".into(),
            event_type_code: code.into(),
            start_time,
            end_time,
            description: "Scheduled maintenance".into(),
            affected_resources: resources.iter().map(|&x| x.into()).collect(),
        }
    }

    #[derive(Default)]
    struct FakeHealth {
        fail_listing: bool,
        events: Vec<(EventSummary, Vec<Box<str>>, Option<EventDetail>)>,
        broken_details: Vec<&'static str>,
    }

    impl FakeHealth {
        fn find(&self, id: &str) -> Result<&(EventSummary, Vec<Box<str>>, Option<EventDetail>)> {
            self.events
                .iter()
                .find(|(s, _, _)| &*s.id == id)
                .context("no such event")
        }
    }

    impl HealthSource for FakeHealth {
        async fn list_scheduled_events(&self) -> Result<Vec<EventSummary>> {
            if self.fail_listing {
                bail!("throttled");
            }
            Ok(self.events.iter().map(|(s, _, _)| s.clone()).collect())
        }

        async fn affected_resources(&self, event_id: &str) -> Result<Vec<Box<str>>> {
            Ok(self.find(event_id)?.1.clone())
        }

        async fn event_detail(&self, event_id: &str) -> Result<Option<EventDetail>> {
            if self.broken_details.iter().any(|x| *x == event_id) {
                bail!("internal failure");
            }
            Ok(self.find(event_id)?.2.clone())
        }
    }

    #[derive(Default)]
    struct FakeInventory {
        names: HashMap<&'static str, &'static str>,
        /// Keyed on resource ID for databases, and `${group}#${member_index}` for caches.
        windows: HashMap<&'static str, &'static str>,
        lookups: Vec<String>,
    }

    impl ResourceInventory for FakeInventory {
        async fn instance_name(
            &mut self,
            region: &str,
            instance_id: &str,
        ) -> Result<Option<String>> {
            self.lookups.push(format!("ec2 {region} {instance_id}"));
            if instance_id == "i-broken" {
                bail!("access denied");
            }
            Ok(self.names.get(instance_id).map(|x| x.to_string()))
        }

        async fn database_maintenance_window(
            &mut self,
            region: &str,
            resource_id: &str,
        ) -> Result<Option<String>> {
            self.lookups.push(format!("rds {region} {resource_id}"));
            Ok(self.windows.get(resource_id).map(|x| x.to_string()))
        }

        async fn cache_maintenance_window(
            &mut self,
            region: &str,
            member: &CacheMemberId,
        ) -> Result<Option<String>> {
            let key = format!("{}#{}", member.replication_group, member.member_index);
            self.lookups.push(format!("elasticache {region} {key}"));
            Ok(self.windows.get(key.as_str()).map(|x| x.to_string()))
        }
    }

    #[tokio::test]
    async fn test_fetching_skips_events_without_usable_details() {
        let start = utc(2024, 1, 3, 10, 0);
        let source = FakeHealth {
            events: vec![
                (
                    summary("arn:good"),
                    vec!["i-1".into(), "i-2".into()],
                    Some(detail("EC2", "AWS_EC2_INSTANCE_RETIREMENT_SCHEDULED", Some(start))),
                ),
                (
                    summary("arn:broken"),
                    vec!["i-3".into()],
                    Some(detail("EC2", "AWS_EC2_INSTANCE_RETIREMENT_SCHEDULED", Some(start))),
                ),
                (summary("arn:no-details"), vec!["i-4".into()], None),
                (
                    summary("arn:no-start"),
                    vec!["i-5".into()],
                    Some(detail("EC2", "AWS_EC2_INSTANCE_RETIREMENT_SCHEDULED", None)),
                ),
            ],
            broken_details: vec!["arn:broken"],
            ..Default::default()
        };

        let events = fetch_health_events(&source).await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(&*event.id, "arn:good");
        assert_eq!(event.service, Service::Compute);
        assert_eq!(&*event.region, "us-east-1");
        assert_eq!(event.start_time, start);
        assert_eq!(event.end_time, Some(utc(2024, 1, 3, 12, 0)));
        let expected_resources: Vec<Box<str>> = vec!["i-1".into(), "i-2".into()];
        assert_eq!(event.affected_resources, expected_resources);
    }

    #[tokio::test]
    async fn test_fetching_fails_if_listing_fails() {
        let source = FakeHealth {
            fail_listing: true,
            ..Default::default()
        };
        assert!(fetch_health_events(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_compute_events_yield_one_named_entry_per_instance() {
        let start = utc(2024, 1, 3, 10, 0);
        let end = utc(2024, 1, 3, 12, 0);
        let events = [event(
            "arn:e1",
            "EC2",
            "AWS_EC2_INSTANCE_RETIREMENT_SCHEDULED",
            start,
            Some(end),
            &["i-1", "i-2", "i-broken"],
        )];
        let mut inventory = FakeInventory {
            names: HashMap::from([("i-1", "web-1")]),
            ..Default::default()
        };

        let entries =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        let ids = entries.iter().map(|x| &*x.id).collect::<Vec<_>>();
        assert_eq!(ids, ["arn:e1_i-1", "arn:e1_i-2", "arn:e1_i-broken"]);
        let summaries = entries.iter().map(|x| &*x.summary).collect::<Vec<_>>();
        assert_eq!(
            summaries,
            ["RETIREMENT web-1 i-1", "RETIREMENT i-2", "RETIREMENT i-broken"]
        );
        for entry in &entries {
            assert_eq!(entry.start_time, start);
            assert_eq!(entry.end_time, end);
            assert_eq!(&*entry.location, "eu-west-1");
            assert_eq!(&*entry.url, DEFAULT_DASHBOARD_URL);
            assert_eq!(&*entry.description, "Scheduled maintenance");
        }
        assert_eq!(
            inventory.lookups,
            [
                "ec2 eu-west-1 i-1",
                "ec2 eu-west-1 i-2",
                "ec2 eu-west-1 i-broken"
            ]
        );
    }

    #[tokio::test]
    async fn test_database_entries_resolve_each_window_from_the_event_start() {
        // A Wednesday.
        let start = utc(2024, 1, 3, 10, 0);
        let events = [event(
            "arn:rds",
            "RDS",
            "AWS_RDS_MAINTENANCE_SCHEDULED",
            start,
            Some(utc(2024, 1, 31, 0, 0)),
            &["db-a", "db-b"],
        )];
        let mut inventory = FakeInventory {
            windows: HashMap::from([
                ("db-a", "tue:02:00-tue:03:00"),
                ("db-b", "mon:02:00-mon:04:00"),
            ]),
            ..Default::default()
        };

        let entries =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(&*entries[0].summary, "RDS db-a MAINT SCHEDULED");
        assert_eq!(entries[0].start_time, utc(2024, 1, 9, 2, 0));
        assert_eq!(entries[0].end_time, utc(2024, 1, 9, 3, 0));
        // Resolving relative to db-a's window would land this on the 15th.
        assert_eq!(&*entries[1].summary, "RDS db-b MAINT SCHEDULED");
        assert_eq!(entries[1].start_time, utc(2024, 1, 8, 2, 0));
        assert_eq!(entries[1].end_time, utc(2024, 1, 8, 4, 0));
    }

    #[tokio::test]
    async fn test_cache_entries_resolve_the_member_clusters_window() {
        let events = [event(
            "arn:cache",
            "ELASTICACHE",
            "AWS_ELASTICACHE_MAINTENANCE_SCHEDULED",
            utc(2024, 1, 3, 10, 0),
            None,
            &["orders-cache/0001/orders-cache-0001-002"],
        )];
        let mut inventory = FakeInventory {
            windows: HashMap::from([("orders-cache#2", "sat:23:30-sun:01:00")]),
            ..Default::default()
        };

        let entries =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(
            &*entry.id,
            "arn:cache_orders-cache/0001/orders-cache-0001-002"
        );
        assert_eq!(
            &*entry.summary,
            concat!(
                "ELASTICACHE orders-cache/0001/orders-cache-0001-002 ",
                "AWS_ELASTICACHE_MAINTENANCE_SCHEDULED"
            )
        );
        assert_eq!(entry.start_time, utc(2024, 1, 6, 23, 30));
        assert_eq!(entry.end_time, utc(2024, 1, 7, 1, 0));
        assert_eq!(inventory.lookups, ["elasticache eu-west-1 orders-cache#2"]);
    }

    #[tokio::test]
    async fn test_unresolvable_windows_fall_back_to_event_times() {
        let start = utc(2024, 1, 3, 10, 0);
        let end = utc(2024, 1, 3, 11, 0);
        let events = [
            event(
                "arn:rds",
                "RDS",
                "AWS_RDS_MAINTENANCE_SCHEDULED",
                start,
                Some(end),
                &["db-missing", "db-bogus"],
            ),
            event(
                "arn:cache",
                "ELASTICACHE",
                "AWS_ELASTICACHE_MAINTENANCE_SCHEDULED",
                start,
                Some(end),
                &["not-a-cache-id"],
            ),
        ];
        let mut inventory = FakeInventory {
            windows: HashMap::from([("db-bogus", "whenever")]),
            ..Default::default()
        };

        let entries =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.start_time, start, "{}", entry.id);
            assert_eq!(entry.end_time, end, "{}", entry.id);
            assert!(
                entry.description.starts_with("Scheduled maintenance\n\nNOTE: "),
                "{:?}",
                entry.description
            );
            assert!(entry.description.contains("couldn't be resolved"));
        }
        // Malformed cache ids are rejected before any lookups happen.
        assert_eq!(
            inventory.lookups,
            ["rds eu-west-1 db-missing", "rds eu-west-1 db-bogus"]
        );
    }

    #[tokio::test]
    async fn test_other_services_use_event_times() {
        let start = utc(2024, 1, 3, 10, 0);
        let events = [event(
            "arn:lambda",
            "LAMBDA",
            "AWS_LAMBDA_RUNTIME_DEPRECATION_SCHEDULED",
            start,
            None,
            &["fn-1"],
        )];
        let mut inventory = FakeInventory::default();

        let entries =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            &*entries[0].summary,
            "LAMBDA fn-1 AWS_LAMBDA_RUNTIME_DEPRECATION_SCHEDULED"
        );
        assert_eq!(entries[0].start_time, start);
        assert_eq!(entries[0].end_time, start);
        assert!(inventory.lookups.is_empty());
    }

    #[tokio::test]
    async fn test_same_day_rule_is_honored() {
        // Monday, 50 minutes into the window.
        let start: DateTime<Utc> = utc(2024, 1, 1, 3, 10);
        let events = [event(
            "arn:rds",
            "RDS",
            "AWS_RDS_MAINTENANCE_SCHEDULED",
            start,
            None,
            &["db-a"],
        )];
        let mut inventory = FakeInventory {
            windows: HashMap::from([("db-a", "mon:02:20-mon:04:00")]),
            ..Default::default()
        };

        let exact =
            build_calendar_entries(&events, &mut inventory, &BuildOptions::default()).await;
        assert_eq!(exact[0].start_time, utc(2024, 1, 8, 2, 20));

        let legacy_options = BuildOptions {
            same_day_rule: SameDayRule::Legacy,
            ..Default::default()
        };
        let legacy = build_calendar_entries(&events, &mut inventory, &legacy_options).await;
        assert_eq!(legacy[0].start_time, utc(2024, 1, 1, 2, 20));
        assert_eq!(legacy[0].end_time, utc(2024, 1, 1, 4, 0));
    }
}
