use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use common::{Address, Edge, NodeSnapshot, NodeStatus, RouteEntry, TrafficStats};

/// How long a reporting node stays `Active` without being heard from.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Liveness and route state for one address
#[derive(Debug, Clone)]
pub struct NodeState {
    pub address: Address,
    pub last_seen: Instant,

    /// Set once the address has sent a route table; never cleared.
    pub reporting: bool,

    /// Latest route table reported by this address, replaced wholesale.
    pub routes: Vec<RouteEntry>,
}

impl NodeState {
    fn new(address: Address, now: Instant) -> Self {
        NodeState {
            address,
            last_seen: now,
            reporting: false,
            routes: Vec::new(),
        }
    }
}

/// Owns every known address and derives classifications and edges from the
/// current route tables. Not synchronized; see [`crate::state::Observer`].
pub struct TopologyManager {
    nodes: HashMap<Address, NodeState>,
    timeout: Duration,
}

impl Default for TopologyManager {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl TopologyManager {
    pub fn new(timeout: Duration) -> Self {
        TopologyManager {
            nodes: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, addr: Address) -> Option<&NodeState> {
        self.nodes.get(&addr)
    }

    pub fn on_data(&mut self, src: Address, now: Instant) {
        self.touch(src, now);
    }

    /// Stores `entries` as the latest table of `src` and refreshes every
    /// address it names, so relays only seen through reports are not evicted.
    pub fn on_route_table(&mut self, src: Address, entries: Vec<RouteEntry>, now: Instant) {
        for entry in &entries {
            self.touch(entry.address, now);
        }
        let node = self.touch(src, now);
        node.reporting = true;
        node.routes = entries;
    }

    /// Returns `(status, should_evict)`, or `None` for an unknown address.
    pub fn classify(&self, addr: Address, now: Instant) -> Option<(NodeStatus, bool)> {
        let node = self.nodes.get(&addr)?;
        Some(self.classify_node(node, self.is_referenced(addr), now))
    }

    /// Removes every address whose classification asks for eviction and
    /// returns them in ascending order. Classification is computed against
    /// the state as it was before any removal.
    pub fn sweep(&mut self, now: Instant) -> Vec<Address> {
        let advertised = self.advertised();
        let mut evicted: Vec<Address> = self
            .nodes
            .values()
            .filter(|node| {
                let (_, evict) =
                    self.classify_node(node, advertised.contains_key(&node.address), now);
                evict
            })
            .map(|node| node.address)
            .collect();
        evicted.sort_unstable();

        for addr in &evicted {
            self.nodes.remove(addr);
        }
        evicted
    }

    /// Classifies every known address and derives the edge set. Traffic
    /// counters are left at their defaults for the caller to fill in.
    pub fn snapshot(&self, now: Instant) -> (BTreeMap<Address, NodeSnapshot>, BTreeSet<Edge>) {
        let advertised = self.advertised();
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let roles = advertised.get(&node.address).copied();
                let (status, _) = self.classify_node(node, roles.is_some(), now);
                let snapshot = NodeSnapshot {
                    status,
                    last_seen_age_ms: now.saturating_duration_since(node.last_seen).as_millis()
                        as u64,
                    reporting: node.reporting,
                    route_count: node.routes.len(),
                    roles: roles.unwrap_or_default(),
                    traffic: TrafficStats::default(),
                };
                (node.address, snapshot)
            })
            .collect();
        (nodes, self.edges())
    }

    /// Direct entries link the reporter to the destination, relayed entries
    /// link the relay to the destination.
    pub fn edges(&self) -> BTreeSet<Edge> {
        let mut edges = BTreeSet::new();
        for node in self.nodes.values().filter(|n| n.reporting) {
            for entry in &node.routes {
                let (from, to) = if entry.is_direct() {
                    (node.address, entry.address)
                } else {
                    (entry.via, entry.address)
                };
                if from == to || from == 0 || to == 0 {
                    continue;
                }
                edges.insert(Edge::new(from, to));
            }
        }
        edges
    }

    fn touch(&mut self, addr: Address, now: Instant) -> &mut NodeState {
        let node = self
            .nodes
            .entry(addr)
            .or_insert_with(|| NodeState::new(addr, now));
        node.last_seen = now;
        node
    }

    fn classify_node(
        &self,
        node: &NodeState,
        referenced: bool,
        now: Instant,
    ) -> (NodeStatus, bool) {
        if node.reporting {
            if now.saturating_duration_since(node.last_seen) <= self.timeout {
                (NodeStatus::Active, false)
            } else {
                (NodeStatus::Stale, !referenced)
            }
        } else if referenced {
            (NodeStatus::Relay, false)
        } else {
            (NodeStatus::Stale, true)
        }
    }

    fn is_referenced(&self, addr: Address) -> bool {
        self.nodes.values().any(|n| {
            n.reporting && n.address != addr && n.routes.iter().any(|e| e.address == addr)
        })
    }

    /// Addresses named in some other reporting node's current table, with
    /// the union of the role bits advertised for each.
    fn advertised(&self) -> HashMap<Address, u8> {
        let mut advertised = HashMap::new();
        for node in self.nodes.values().filter(|n| n.reporting) {
            for entry in node.routes.iter().filter(|e| e.address != node.address) {
                *advertised.entry(entry.address).or_insert(0) |= entry.role;
            }
        }
        advertised
    }
}
