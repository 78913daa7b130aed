//! Static cluster membership and topic ownership
//!
//! Ownership is decided by rendezvous hashing: every node scores
//! `xxh64(node + "|" + topic)` and the highest score wins. All nodes run the
//! same pure function over the same membership, so no coordination is needed,
//! and a membership change only reshuffles the topics the lost node owned.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Error building a cluster from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The node list was empty or contained no usable names
    EmptyNodes,
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterError::EmptyNodes => write!(f, "empty cluster node list"),
        }
    }
}

impl std::error::Error for ClusterError {}

/// Static cluster with rendezvous-hash owner selection
#[derive(Debug)]
pub struct Cluster {
    nodes: Vec<String>,
    node_set: HashSet<String>,
    self_name: String,
    draining: Mutex<HashMap<String, bool>>,
}

/// Snapshot for the admin `/cluster` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub members: Vec<String>,
    #[serde(rename = "self")]
    pub self_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub draining: Vec<String>,
}

impl Cluster {
    /// Build a cluster from a comma-separated node list and a self name.
    ///
    /// Node names should be hostnames reachable by every member (the proxy
    /// dials `owner:port` directly). The self name may be absent from the
    /// list; an empty self name defaults to the first listed node.
    pub fn from_csv(node_list: &str, self_name: &str) -> Result<Self, ClusterError> {
        let nodes: Vec<String> = node_list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if nodes.is_empty() {
            return Err(ClusterError::EmptyNodes);
        }

        let node_set: HashSet<String> = nodes.iter().cloned().collect();
        let self_name = if self_name.is_empty() {
            nodes[0].clone()
        } else {
            self_name.to_string()
        };

        Ok(Self {
            nodes,
            node_set,
            self_name,
            draining: Mutex::new(HashMap::new()),
        })
    }

    /// Configured nodes in stable iteration order
    pub fn members(&self) -> &[String] {
        &self.nodes
    }

    /// This node's identity
    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    /// Whether the given name is this node
    pub fn is_self(&self, node: &str) -> bool {
        node == self.self_name
    }

    /// The node owning a topic, or `None` if every member is draining.
    ///
    /// Pure in (topic, non-draining member set): identical on every node.
    /// Score ties break toward the lexicographically smaller name.
    pub fn owner(&self, topic: &str) -> Option<String> {
        let draining = self.draining.lock().expect("cluster lock poisoned");
        let mut best: Option<(&str, u64)> = None;
        for node in &self.nodes {
            if draining.get(node.as_str()).copied().unwrap_or(false) {
                continue;
            }
            let key = format!("{}|{}", node, topic);
            let score = xxh64(key.as_bytes(), 0);
            best = match best {
                None => Some((node.as_str(), score)),
                Some((bn, bs)) if score > bs || (score == bs && node.as_str() < bn) => {
                    Some((node.as_str(), score))
                }
                keep => keep,
            };
        }
        best.map(|(node, _)| node.to_string())
    }

    /// Mark a known node as draining; unknown names are ignored.
    ///
    /// Returns whether the node was known. Draining only affects new
    /// ownership decisions; established sessions are never migrated.
    pub fn set_draining(&self, node: &str, draining: bool) -> bool {
        if !self.node_set.contains(node) {
            return false;
        }
        let mut map = self.draining.lock().expect("cluster lock poisoned");
        map.insert(node.to_string(), draining);
        true
    }

    /// Whether a node is currently draining
    pub fn is_draining(&self, node: &str) -> bool {
        self.draining
            .lock()
            .expect("cluster lock poisoned")
            .get(node)
            .copied()
            .unwrap_or(false)
    }

    /// Snapshot for the admin surface
    pub fn status(&self) -> ClusterStatus {
        let draining = self.draining.lock().expect("cluster lock poisoned");
        let mut draining: Vec<String> = draining
            .iter()
            .filter(|(_, &d)| d)
            .map(|(n, _)| n.clone())
            .collect();
        draining.sort();

        ClusterStatus {
            members: self.nodes.clone(),
            self_name: self.self_name.clone(),
            draining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_csv_trims_and_orders() {
        let c = Cluster::from_csv(" a , b ,c,, ", "a").unwrap();
        assert_eq!(c.members(), &["a", "b", "c"]);
        assert_eq!(c.self_name(), "a");
        assert!(c.is_self("a"));
        assert!(!c.is_self("b"));
    }

    #[test]
    fn test_empty_list_rejected() {
        assert_eq!(Cluster::from_csv("", "a").unwrap_err(), ClusterError::EmptyNodes);
        assert_eq!(Cluster::from_csv(" , ,", "a").unwrap_err(), ClusterError::EmptyNodes);
    }

    #[test]
    fn test_self_defaults_to_first_node() {
        let c = Cluster::from_csv("n1,n2", "").unwrap();
        assert_eq!(c.self_name(), "n1");
    }

    #[test]
    fn test_self_may_be_absent_from_list() {
        let c = Cluster::from_csv("n1,n2", "edge9").unwrap();
        assert_eq!(c.self_name(), "edge9");
        assert!(!c.members().contains(&"edge9".to_string()));
    }

    #[test]
    fn test_owner_deterministic() {
        let c = Cluster::from_csv("a,b,c", "a").unwrap();
        let o1 = c.owner("mytopic").unwrap();
        let o2 = c.owner("mytopic").unwrap();
        assert_eq!(o1, o2);
        assert!(c.members().contains(&o1));
    }

    #[test]
    fn test_owner_same_on_every_node() {
        // the same membership must give the same answer regardless of self
        let c1 = Cluster::from_csv("a,b,c", "a").unwrap();
        let c2 = Cluster::from_csv("a,b,c", "b").unwrap();
        for topic in ["alpha", "beta", "cam-7", "x"] {
            assert_eq!(c1.owner(topic), c2.owner(topic));
        }
    }

    #[test]
    fn test_draining_moves_and_restores_owner() {
        let c = Cluster::from_csv("n1,n2,n3", "n1").unwrap();
        let original = c.owner("topicX").unwrap();

        assert!(c.set_draining(&original, true));
        let moved = c.owner("topicX").unwrap();
        assert_ne!(moved, original);

        assert!(c.set_draining(&original, false));
        assert_eq!(c.owner("topicX").unwrap(), original);
    }

    #[test]
    fn test_all_draining_yields_none() {
        let c = Cluster::from_csv("a,b", "a").unwrap();
        c.set_draining("a", true);
        c.set_draining("b", true);
        assert!(c.owner("t").is_none());
    }

    #[test]
    fn test_unknown_node_ignored() {
        let c = Cluster::from_csv("a,b", "a").unwrap();
        assert!(!c.set_draining("ghost", true));
        assert!(c.owner("t").is_some());
    }

    #[test]
    fn test_status_snapshot() {
        let c = Cluster::from_csv("a,b,c", "b").unwrap();
        c.set_draining("c", true);

        let status = c.status();
        assert_eq!(status.members, vec!["a", "b", "c"]);
        assert_eq!(status.self_name, "b");
        assert_eq!(status.draining, vec!["c"]);
    }
}
