// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures and related facilities for representing resources in the
//! public API of the control plane.

mod error;

pub use error::Error;
pub use error::LookupType;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Result of a create operation for the specified type.
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type.
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns a Vec.
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type.
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type.
pub type UpdateResult<T> = Result<T, Error>;

/// Identifies a type of API resource.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ResourceType {
    Tenant,
    ProvisioningJob,
    Server,
    PortAssignment,
    ResourceQuota,
    UsageSample,
    QuotaAlert,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Tenant => "tenant",
                ResourceType::ProvisioningJob => "provisioning job",
                ResourceType::Server => "server",
                ResourceType::PortAssignment => "port assignment",
                ResourceType::ResourceQuota => "resource quota",
                ResourceType::UsageSample => "usage sample",
                ResourceType::QuotaAlert => "quota alert",
            }
        )
    }
}

/// A name used in the API.
///
/// Names are DNS-label-like: 1-63 characters, lowercase ASCII letters, digits,
/// and hyphens, beginning with a letter and not ending with a hyphen.  The
/// format is enforced at deserialization time so that a `Name` in hand is
/// always valid.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(try_from = "String")]
pub struct Name(String);

impl TryFrom<String> for Name {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err("name requires at least one character".to_string());
        }
        if value.len() > 63 {
            return Err("name may contain at most 63 characters".to_string());
        }
        let mut chars = value.chars();
        let first = chars.next().unwrap();
        if !first.is_ascii_lowercase() {
            return Err("name must begin with an ASCII lowercase character"
                .to_string());
        }
        for c in value.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(format!(
                    "name contains invalid character: \"{}\" (allowed \
                     characters are lowercase ASCII, digits, and \"-\")",
                    c
                ));
            }
        }
        if value.ends_with('-') {
            return Err("name cannot end with \"-\"".to_string());
        }
        Ok(Name(value))
    }
}

impl FromStr for Name {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Name::try_from(String::from(value))
    }
}

impl From<Name> for String {
    fn from(name: Name) -> String {
        name.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Name {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl JsonSchema for Name {
    fn schema_name() -> String {
        "Name".to_string()
    }

    fn json_schema(
        _: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        name_schema(
            "A name used in the API",
            "^[a-z]([a-z0-9-]*[a-z0-9])?$",
            63,
        )
    }
}

/// The DNS name under which a tenant's storefront is served.
///
/// At least two labels, each of which follows the same restrictions as
/// [`Name`] except that labels may begin with a digit.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(try_from = "String")]
pub struct DomainName(String);

impl TryFrom<String> for DomainName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() > 253 {
            return Err(
                "domain may contain at most 253 characters".to_string()
            );
        }
        let labels: Vec<&str> = value.split('.').collect();
        if labels.len() < 2 {
            return Err(
                "domain requires at least two dot-separated labels"
                    .to_string(),
            );
        }
        for label in labels {
            if label.is_empty() || label.len() > 63 {
                return Err(format!(
                    "domain label \"{}\" must contain between 1 and 63 \
                     characters",
                    label
                ));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(format!(
                    "domain label \"{}\" cannot begin or end with \"-\"",
                    label
                ));
            }
            for c in label.chars() {
                if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                    return Err(format!(
                        "domain contains invalid character: \"{}\"",
                        c
                    ));
                }
            }
        }
        Ok(DomainName(value))
    }
}

impl FromStr for DomainName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DomainName::try_from(String::from(value))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainName {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl JsonSchema for DomainName {
    fn schema_name() -> String {
        "DomainName".to_string()
    }

    fn json_schema(
        _: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        name_schema(
            "The DNS name under which a tenant's storefront is served",
            "^([a-z0-9]([a-z0-9-]*[a-z0-9])?\\.)+[a-z0-9]([a-z0-9-]*[a-z0-9])?$",
            253,
        )
    }
}

fn name_schema(
    description: &str,
    pattern: &str,
    max_length: u32,
) -> schemars::schema::Schema {
    schemars::schema::SchemaObject {
        metadata: Some(Box::new(schemars::schema::Metadata {
            description: Some(description.to_string()),
            ..Default::default()
        })),
        instance_type: Some(schemars::schema::InstanceType::String.into()),
        string: Some(Box::new(schemars::schema::StringValidation {
            max_length: Some(max_length),
            min_length: Some(1),
            pattern: Some(pattern.to_string()),
        })),
        ..Default::default()
    }
    .into()
}

/// The closed set of storefront platforms a tenant environment can run.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorePlatform {
    Woocommerce,
    Prestashop,
    Medusa,
}

impl fmt::Display for StorePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorePlatform::Woocommerce => "woocommerce",
            StorePlatform::Prestashop => "prestashop",
            StorePlatform::Medusa => "medusa",
        })
    }
}

/// Billing plan tiers.  The tier determines every per-tenant resource ceiling.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Standard,
    Premium,
}

/// Resource ceilings derived from a [`PlanTier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanLimits {
    /// workspace disk ceiling, in bytes
    pub disk_bytes: u64,
    /// bandwidth ceiling per billing period, in bytes
    pub bandwidth_bytes: u64,
    /// container memory ceiling, in mebibytes
    pub memory_mib: u64,
    /// container CPU ceiling, in thousandths of a core
    pub cpu_millis: u64,
}

impl PlanTier {
    pub fn limits(&self) -> PlanLimits {
        const GIB: u64 = 1 << 30;
        match self {
            PlanTier::Starter => PlanLimits {
                disk_bytes: 10 * GIB,
                bandwidth_bytes: 50 * GIB,
                memory_mib: 1024,
                cpu_millis: 1000,
            },
            PlanTier::Standard => PlanLimits {
                disk_bytes: 25 * GIB,
                bandwidth_bytes: 200 * GIB,
                memory_mib: 2048,
                cpu_millis: 2000,
            },
            PlanTier::Premium => PlanLimits {
                disk_bytes: 100 * GIB,
                bandwidth_bytes: 1024 * GIB,
                memory_mib: 4096,
                cpu_millis: 4000,
            },
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanTier::Starter => "starter",
            PlanTier::Standard => "standard",
            PlanTier::Premium => "premium",
        })
    }
}

/// Lifecycle state of a tenant environment.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Pending,
    Provisioning,
    Active,
    Suspended,
    Failed,
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TenantState::Pending => "pending",
            TenantState::Provisioning => "provisioning",
            TenantState::Active => "active",
            TenantState::Suspended => "suspended",
            TenantState::Failed => "failed",
        })
    }
}

/// Per-attempt state of a provisioning job.  `Succeeded` and `Failed` are
/// terminal and append-only: a finished job is history, never mutated.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// What a queued job asks the worker to do.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// run the provisioning pipeline
    Provision,
    /// tear down every backing resource, then delete the tenant record
    Teardown,
}

/// Operator-declared status of a worker host.  Routing additionally requires
/// a fresh heartbeat; declared status alone never makes a server eligible.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Active,
    Maintenance,
    Offline,
}

/// Which measured resource an alert concerns.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Disk,
    Bandwidth,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertKind::Disk => "disk",
            AlertKind::Bandwidth => "bandwidth",
        })
    }
}

/// How close a tenant is to a quota ceiling.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        })
    }
}

#[cfg(test)]
mod test {
    use super::DomainName;
    use super::Name;
    use super::PlanTier;

    #[test]
    fn test_name_parse() {
        for ok in ["a", "abc", "my-shop-7", "a1"] {
            assert!(ok.parse::<Name>().is_ok(), "{:?} should parse", ok);
        }
        let too_long = "a".repeat(64);
        for bad in
            ["", "7start", "-dash", "enddash-", "Upper", "dot.ted", &too_long]
        {
            assert!(bad.parse::<Name>().is_err(), "{:?} should fail", bad);
        }
    }

    #[test]
    fn test_domain_parse() {
        for ok in ["shop.example.com", "a.b", "7seas.example.io"] {
            assert!(ok.parse::<DomainName>().is_ok(), "{:?} should parse", ok);
        }
        for bad in ["", "nodots", "-bad.example.com", "Shop.example.com", "a..b"]
        {
            assert!(
                bad.parse::<DomainName>().is_err(),
                "{:?} should fail",
                bad
            );
        }
    }

    #[test]
    fn test_plan_limits_ordering() {
        let starter = PlanTier::Starter.limits();
        let standard = PlanTier::Standard.limits();
        let premium = PlanTier::Premium.limits();
        assert!(starter.disk_bytes < standard.disk_bytes);
        assert!(standard.disk_bytes < premium.disk_bytes);
        assert!(starter.bandwidth_bytes < standard.bandwidth_bytes);
        assert!(standard.memory_mib < premium.memory_mib);
    }
}
