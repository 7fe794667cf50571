use anyhow::{Context, Result};
use aws_sdk_health::types::{EntityFilter, EventFilter, EventStatusCode, EventTypeCategory};
use log::{debug, warn};
use maintenance_calendar::{EventDetail, EventSummary, HealthSource, Service, UtcTime};

// The most either listing API hands back per call.
const PAGE_SIZE: i32 = 100;

fn to_utc_time(time: &aws_sdk_health::primitives::DateTime) -> Option<UtcTime> {
    let result = chrono::DateTime::from_timestamp(time.secs(), time.subsec_nanos());
    if result.is_none() {
        warn!("Health API returned a timestamp out of range: {time:?}; ignoring it");
    }
    result
}

pub(crate) struct AwsHealthSource {
    client: aws_sdk_health::Client,
}

impl AwsHealthSource {
    pub(crate) fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_health::Client::new(sdk_config),
        }
    }
}

impl HealthSource for AwsHealthSource {
    async fn list_scheduled_events(&self) -> Result<Vec<EventSummary>> {
        let filter = EventFilter::builder()
            .event_type_categories(EventTypeCategory::ScheduledChange)
            .event_status_codes(EventStatusCode::Open)
            .event_status_codes(EventStatusCode::Upcoming)
            .build();

        let mut results = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .describe_events()
                .filter(filter.clone())
                .max_results(PAGE_SIZE)
                .set_next_token(next_token)
                .send()
                .await
                .context("describing health events")?;

            for event in response.events() {
                let Some(arn) = event.arn() else {
                    warn!("Dropping health event with no ARN: {event:?}");
                    continue;
                };
                results.push(EventSummary {
                    id: arn.into(),
                    region: event.region().unwrap_or_default().into(),
                });
            }

            next_token = response.next_token().map(str::to_owned);
            if next_token.is_none() {
                break;
            }
            debug!("Fetched {} health events so far; paging...", results.len());
        }
        Ok(results)
    }

    async fn affected_resources(&self, event_id: &str) -> Result<Vec<Box<str>>> {
        let filter = EntityFilter::builder()
            .event_arns(event_id)
            .build()
            .context("building entity filter")?;

        let mut results = Vec::<Box<str>>::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .describe_affected_entities()
                .filter(filter.clone())
                .max_results(PAGE_SIZE)
                .set_next_token(next_token)
                .send()
                .await
                .context("describing affected entities")?;

            results.extend(
                response
                    .entities()
                    .iter()
                    .filter_map(|x| x.entity_value())
                    .map(Box::<str>::from),
            );

            next_token = response.next_token().map(str::to_owned);
            if next_token.is_none() {
                break;
            }
        }
        Ok(results)
    }

    async fn event_detail(&self, event_id: &str) -> Result<Option<EventDetail>> {
        let response = self
            .client
            .describe_event_details()
            .event_arns(event_id)
            .send()
            .await
            .context("describing event details")?;

        for failure in response.failed_set() {
            warn!(
                "Health API couldn't describe {}: {} ({})",
                failure.event_arn().unwrap_or(event_id),
                failure.error_message().unwrap_or("no message"),
                failure.error_name().unwrap_or("unknown error"),
            );
        }

        // There should only be one of these. If there are more, the last one wins.
        let mut result = None;
        for details in response.successful_set() {
            let Some(event) = details.event() else {
                continue;
            };
            result = Some(EventDetail {
                event_type_code: event.event_type_code().unwrap_or_default().into(),
                service: Service::from_code(event.service().unwrap_or_default()),
                start_time: event.start_time().and_then(to_utc_time),
                end_time: event.end_time().and_then(to_utc_time),
                description: details
                    .event_description()
                    .and_then(|x| x.latest_description())
                    .unwrap_or_default()
                    .into(),
            });
        }
        Ok(result)
    }
}
