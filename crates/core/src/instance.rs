//! Instance identity as reported by the Director.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One addressable host of a deployment.
///
/// Instances sort by `(group, index)`, which is the order every
/// deterministic phase (locking, reporting) walks them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceIdentity {
    /// Instance group name, e.g. `redis`.
    pub group: String,
    /// Position of the instance within its group.
    pub index: u32,
    /// Opaque Director-assigned id.
    pub id: String,
    /// Network address used to open a remote session.
    pub address: String,
}

impl InstanceIdentity {
    pub fn new(
        group: impl Into<String>,
        index: u32,
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            index,
            id: id.into(),
            address: address.into(),
        }
    }

    /// `group/index`, used in log lines and error reports.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.group, self.index)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_group_and_index() {
        let instance = InstanceIdentity::new("redis", 2, "abc-123", "10.0.0.5");
        assert_eq!(instance.to_string(), "redis/2");
        assert_eq!(instance.display_name(), "redis/2");
    }

    #[test]
    fn ordering_is_group_then_index() {
        let mut instances = vec![
            InstanceIdentity::new("web", 0, "c", "10.0.0.3"),
            InstanceIdentity::new("db", 1, "b", "10.0.0.2"),
            InstanceIdentity::new("db", 0, "a", "10.0.0.1"),
        ];
        instances.sort();
        let names: Vec<String> = instances.iter().map(|i| i.to_string()).collect();
        assert_eq!(names, vec!["db/0", "db/1", "web/0"]);
    }
}
