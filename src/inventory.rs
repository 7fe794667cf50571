use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use aws_config::{Region, SdkConfig};
use aws_sdk_ec2::types::{Filter, Reservation};
use aws_sdk_rds::error::SdkError;
use aws_sdk_rds::operation::describe_db_clusters::{
    DescribeDBClustersError, DescribeDbClustersOutput,
};
use log::debug;
use maintenance_calendar::{CacheMemberId, ResourceInventory};

/// Lazily-built per-region service clients. Resources can live in any region, regardless of
/// where the Health API is queried from.
pub(crate) struct ClientRegistry {
    sdk_config: SdkConfig,
    ec2: HashMap<Box<str>, aws_sdk_ec2::Client>,
    rds: HashMap<Box<str>, aws_sdk_rds::Client>,
    elasticache: HashMap<Box<str>, aws_sdk_elasticache::Client>,
}

impl ClientRegistry {
    pub(crate) fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            ec2: HashMap::new(),
            rds: HashMap::new(),
            elasticache: HashMap::new(),
        }
    }

    fn ec2(&mut self, region: &str) -> &aws_sdk_ec2::Client {
        let sdk_config = &self.sdk_config;
        self.ec2.entry(region.into()).or_insert_with(|| {
            debug!("Creating EC2 client for {region}");
            let config = aws_sdk_ec2::config::Builder::from(sdk_config)
                .region(Region::new(region.to_owned()))
                .build();
            aws_sdk_ec2::Client::from_conf(config)
        })
    }

    fn rds(&mut self, region: &str) -> &aws_sdk_rds::Client {
        let sdk_config = &self.sdk_config;
        self.rds.entry(region.into()).or_insert_with(|| {
            debug!("Creating RDS client for {region}");
            let config = aws_sdk_rds::config::Builder::from(sdk_config)
                .region(Region::new(region.to_owned()))
                .build();
            aws_sdk_rds::Client::from_conf(config)
        })
    }

    fn elasticache(&mut self, region: &str) -> &aws_sdk_elasticache::Client {
        let sdk_config = &self.sdk_config;
        self.elasticache.entry(region.into()).or_insert_with(|| {
            debug!("Creating ElastiCache client for {region}");
            let config = aws_sdk_elasticache::config::Builder::from(sdk_config)
                .region(Region::new(region.to_owned()))
                .build();
            aws_sdk_elasticache::Client::from_conf(config)
        })
    }
}

pub(crate) struct AwsInventory {
    clients: ClientRegistry,
}

impl AwsInventory {
    pub(crate) fn new(clients: ClientRegistry) -> Self {
        Self { clients }
    }
}

/// Picks the last non-empty maintenance window out of `windows`.
fn last_configured_window<'a>(
    windows: impl IntoIterator<Item = Option<&'a str>>,
) -> Option<String> {
    windows
        .into_iter()
        .flatten()
        .filter(|x| !x.is_empty())
        .last()
        .map(str::to_owned)
}

/// The value of the last `Name` tag across all instances in `reservations`.
fn last_name_tag(reservations: &[Reservation]) -> Option<String> {
    let mut name = None;
    for reservation in reservations {
        for instance in reservation.instances() {
            for tag in instance.tags() {
                if tag.key() == Some("Name") {
                    if let Some(value) = tag.value() {
                        name = Some(value.to_owned());
                    }
                }
            }
        }
    }
    name
}

/// Interprets the result of looking `resource_id` up as an RDS cluster. Only a missing cluster
/// means "try the instance instead"; any other failure is returned.
fn cluster_window<R>(
    resource_id: &str,
    result: Result<DescribeDbClustersOutput, SdkError<DescribeDBClustersError, R>>,
) -> Result<Option<String>>
where
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match result {
        Ok(response) => Ok(last_configured_window(
            response
                .db_clusters()
                .iter()
                .map(|x| x.preferred_maintenance_window()),
        )),
        Err(x)
            if x
                .as_service_error()
                .is_some_and(|e| e.is_db_cluster_not_found_fault()) =>
        {
            debug!("No RDS cluster named {resource_id}; trying instances");
            Ok(None)
        }
        Err(x) => Err(x).context("describing RDS cluster"),
    }
}

/// Maps a 1-based member of a replication group to its cache cluster id.
fn pick_member_cluster<'a>(members: &'a [String], member: &CacheMemberId) -> Result<&'a str> {
    match members.get(member.member_offset()) {
        Some(id) => Ok(id),
        None => bail!(
            "replication group {} has {} member(s); there's no member #{}",
            member.replication_group,
            members.len(),
            member.member_index
        ),
    }
}

impl ResourceInventory for AwsInventory {
    async fn instance_name(&mut self, region: &str, instance_id: &str) -> Result<Option<String>> {
        let response = self
            .clients
            .ec2(region)
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-id")
                    .values(instance_id)
                    .build(),
            )
            .send()
            .await
            .context("describing EC2 instance")?;
        Ok(last_name_tag(response.reservations()))
    }

    async fn database_maintenance_window(
        &mut self,
        region: &str,
        resource_id: &str,
    ) -> Result<Option<String>> {
        let rds = self.clients.rds(region);

        // Aurora windows live on the cluster; everything else has them on the instance.
        let clusters = rds
            .describe_db_clusters()
            .db_cluster_identifier(resource_id)
            .send()
            .await;
        if let Some(window) = cluster_window(resource_id, clusters)? {
            return Ok(Some(window));
        }

        let response = rds
            .describe_db_instances()
            .db_instance_identifier(resource_id)
            .send()
            .await
            .context("describing RDS instance")?;
        Ok(last_configured_window(
            response
                .db_instances()
                .iter()
                .map(|x| x.preferred_maintenance_window()),
        ))
    }

    async fn cache_maintenance_window(
        &mut self,
        region: &str,
        member: &CacheMemberId,
    ) -> Result<Option<String>> {
        let elasticache = self.clients.elasticache(region);

        let groups = elasticache
            .describe_replication_groups()
            .replication_group_id(&*member.replication_group)
            .send()
            .await
            .context("describing ElastiCache replication group")?;
        let mut cluster_id = None;
        for group in groups.replication_groups() {
            cluster_id = Some(pick_member_cluster(group.member_clusters(), member)?.to_owned());
        }
        let Some(cluster_id) = cluster_id else {
            return Ok(None);
        };
        debug!("{member} is cache cluster {cluster_id}");

        let clusters = elasticache
            .describe_cache_clusters()
            .cache_cluster_id(&cluster_id)
            .send()
            .await
            .context("describing ElastiCache cluster")?;
        Ok(last_configured_window(
            clusters
                .cache_clusters()
                .iter()
                .map(|x| x.preferred_maintenance_window()),
        ))
    }
}
