//! ARN construction for fleet resources.

use crate::config::DeliveryConfig;

/// Builds ARNs in one partition, region and account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnBuilder {
    partition: String,
    region: String,
    account_id: String,
}

impl ArnBuilder {
    pub fn new(
        partition: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            config.aws_partition.clone(),
            config.aws_region.clone(),
            config.aws_account_id.clone(),
        )
    }

    pub fn thing(&self, thing_name: &str) -> String {
        self.resource(&format!("thing/{thing_name}"))
    }

    pub fn thing_group(&self, group_name: &str) -> String {
        self.resource(&format!("thinggroup/{group_name}"))
    }

    fn resource(&self, resource: &str) -> String {
        format!(
            "arn:{}:iot:{}:{}:{}",
            self.partition, self.region, self.account_id, resource
        )
    }
}
