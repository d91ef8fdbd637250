// Cluster Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Cluster name (unique, immutable once created)
pub type ClusterName = String;

/// Lowest port a cluster may bind
const MIN_PORT: u16 = 1024;

/// Cluster provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    K3d,
    Kind,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "k3d" => Some(Provider::K3d),
            "kind" => Some(Provider::Kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::K3d => write!(f, "k3d"),
            Provider::Kind => write!(f, "kind"),
        }
    }
}

/// Declared desired state of a cluster
///
/// Deletion is declarative: a cluster declared absent keeps its row until
/// teardown is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Present,
    Absent,
}

impl DesiredState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(DesiredState::Present),
            "absent" => Some(DesiredState::Absent),
            _ => None,
        }
    }
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesiredState::Present => write!(f, "present"),
            DesiredState::Absent => write!(f, "absent"),
        }
    }
}

/// Cluster creation request: the declared configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: ClusterName,
    pub provider: Provider,
    #[serde(default = "default_node_port")]
    pub node_port: u16,
    #[serde(default)]
    pub pf_port: Option<u16>,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub https_port: Option<u16>,
    #[serde(default)]
    pub subnet: Option<String>,
}

fn default_node_port() -> u16 {
    30080
}

impl ClusterSpec {
    /// Validate the declared configuration
    ///
    /// Rejects names outside the DNS-label pattern, ports below 1024 and
    /// malformed subnets before any row or task is created.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        for port in [Some(self.node_port), self.pf_port, self.http_port, self.https_port]
            .into_iter()
            .flatten()
        {
            if port < MIN_PORT {
                return Err(DomainError::ValidationError(format!(
                    "port {} is below the allowed minimum {}",
                    port, MIN_PORT
                )));
            }
        }

        if let Some(subnet) = &self.subnet {
            validate_subnet(subnet)?;
        }

        Ok(())
    }
}

/// Cluster Entity
///
/// Declared configuration plus last-observed state. The row outlives a
/// declared-absent cluster until the reconciler confirms teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: ClusterName,
    pub provider: Provider,
    pub node_port: u16,
    pub pf_port: Option<u16>,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub subnet: Option<String>,

    pub desired_state: DesiredState,
    /// Last-observed actual state (free-form: running/stopped/error/unknown)
    pub actual_state: String,
    /// Last reconciliation error, cleared when a new action is declared
    pub reconcile_error: Option<String>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
}

impl Cluster {
    /// Build the row for a freshly declared cluster
    pub fn declared(spec: ClusterSpec, now_millis: i64) -> Self {
        Self {
            name: spec.name,
            provider: spec.provider,
            node_port: spec.node_port,
            pf_port: spec.pf_port,
            http_port: spec.http_port,
            https_port: spec.https_port,
            subnet: spec.subnet,
            desired_state: DesiredState::Present,
            actual_state: "unknown".to_string(),
            reconcile_error: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }
}

/// Partial update set for a cluster row
///
/// Identity and creation timestamp are immutable and not representable here.
/// `reconcile_error` uses a nested Option so `Some(None)` clears the column.
#[derive(Debug, Clone, Default)]
pub struct ClusterUpdate {
    pub provider: Option<Provider>,
    pub node_port: Option<u16>,
    pub pf_port: Option<u16>,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub subnet: Option<String>,
    pub desired_state: Option<DesiredState>,
    pub actual_state: Option<String>,
    pub reconcile_error: Option<Option<String>>,
}

impl ClusterUpdate {
    /// True when no recognized field is supplied
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.node_port.is_none()
            && self.pf_port.is_none()
            && self.http_port.is_none()
            && self.https_port.is_none()
            && self.subnet.is_none()
            && self.desired_state.is_none()
            && self.actual_state.is_none()
            && self.reconcile_error.is_none()
    }
}

/// Validate a cluster name against the restricted identifier pattern
///
/// Pattern: `^[a-z0-9]([a-z0-9-]*[a-z0-9])?$`, at most 63 characters.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if ok {
        Ok(())
    } else {
        Err(DomainError::ValidationError(format!(
            "invalid cluster name {:?}: must match [a-z0-9]([a-z0-9-]*[a-z0-9])? and be at most 63 characters",
            name
        )))
    }
}

/// Validate a subnet in `a.b.c.d/len` form
fn validate_subnet(subnet: &str) -> Result<()> {
    let invalid = || {
        DomainError::ValidationError(format!(
            "invalid cluster subnet {:?}: expected a.b.c.d/len",
            subnet
        ))
    };

    let (addr, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 {
        return Err(invalid());
    }
    for octet in octets {
        octet.parse::<u8>().map_err(|_| invalid())?;
    }
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ClusterSpec {
        ClusterSpec {
            name: name.to_string(),
            provider: Provider::K3d,
            node_port: 30080,
            pf_port: None,
            http_port: None,
            https_port: None,
            subnet: None,
        }
    }

    #[test]
    fn test_valid_names() {
        for name in ["demo", "a", "cluster-1", "0abc", "a1-b2-c3"] {
            assert!(validate_name(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "a".repeat(64);
        for name in ["", "Demo", "-demo", "demo-", "de_mo", "de.mo", too_long.as_str()] {
            assert!(validate_name(name).is_err(), "{:?} should be invalid", name);
        }
    }

    #[test]
    fn test_spec_rejects_privileged_port() {
        let mut s = spec("demo");
        s.node_port = 80;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_subnet_validation() {
        let mut s = spec("demo");
        s.subnet = Some("172.28.0.0/16".to_string());
        assert!(s.validate().is_ok());

        s.subnet = Some("172.28.0/16".to_string());
        assert!(s.validate().is_err());

        s.subnet = Some("172.28.0.0".to_string());
        assert!(s.validate().is_err());

        s.subnet = Some("172.28.0.0/64".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_declared_row_defaults() {
        let cluster = Cluster::declared(spec("demo"), 5000);
        assert_eq!(cluster.desired_state, DesiredState::Present);
        assert_eq!(cluster.actual_state, "unknown");
        assert!(cluster.reconcile_error.is_none());
        assert_eq!(cluster.created_at, 5000);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(ClusterUpdate::default().is_empty());

        let update = ClusterUpdate {
            actual_state: Some("running".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());

        // Clearing reconcile_error counts as a recognized field
        let update = ClusterUpdate {
            reconcile_error: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
