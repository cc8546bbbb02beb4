//! An in-memory network double used by the integration suite in place of
//! real sockets, so tests can drive many replicas' event loops inside one
//! process and control exactly which links are partitioned.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use rusty_raft_kv::message::{is_broadcast, Message, ReplicaId};
use rusty_raft_kv::{Config, RaftError, Replica, Transport};

#[derive(Default)]
struct NetworkInner {
    inboxes: HashMap<ReplicaId, VecDeque<Message>>,
    /// Replicas currently cut off from the rest of the cluster: messages
    /// to or from a partitioned id are silently dropped, modeling §8's
    /// "exactly-majority partition" boundary behavior.
    partitioned: std::collections::HashSet<ReplicaId>,
}

#[derive(Clone)]
pub struct MockNetwork {
    inner: Rc<RefCell<NetworkInner>>,
}

impl MockNetwork {
    pub fn new(ids: &[ReplicaId]) -> Self {
        let mut inboxes = HashMap::new();
        for id in ids {
            inboxes.insert(id.clone(), VecDeque::new());
        }
        MockNetwork {
            inner: Rc::new(RefCell::new(NetworkInner {
                inboxes,
                partitioned: std::collections::HashSet::new(),
            })),
        }
    }

    pub fn partition(&self, id: &str) {
        self.inner.borrow_mut().partitioned.insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.inner.borrow_mut().partitioned.remove(id);
    }

    fn deliverable(&self, a: &str, b: &str) -> bool {
        let inner = self.inner.borrow();
        !inner.partitioned.contains(a) && !inner.partitioned.contains(b)
    }

    /// Replica inboxes are pre-registered by `new`, but client ids (and any
    /// dst a replica's reply is addressed to) show up here lazily the first
    /// time something is delivered to them.
    fn deliver(&self, from: &str, to: &str, msg: Message) {
        if !self.deliverable(from, to) {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        inner.inboxes.entry(to.to_string()).or_default().push_back(msg);
    }

    pub fn client_send(&self, to: &str, msg: Message) {
        let mut inner = self.inner.borrow_mut();
        inner.inboxes.entry(to.to_string()).or_default().push_back(msg);
    }

    /// Pops every message currently queued for `client_id` (used by tests
    /// to assert on replies addressed to a synthetic client id).
    pub fn drain_client_inbox(&self, client_id: &str) -> Vec<Message> {
        let mut inner = self.inner.borrow_mut();
        inner
            .inboxes
            .get_mut(client_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

pub struct MockTransport {
    id: ReplicaId,
    all_ids: Vec<ReplicaId>,
    network: MockNetwork,
}

impl MockTransport {
    pub fn new(id: ReplicaId, all_ids: Vec<ReplicaId>, network: MockNetwork) -> Self {
        MockTransport {
            id,
            all_ids,
            network,
        }
    }
}

impl Transport for MockTransport {
    fn send(&mut self, dst: &ReplicaId, msg: &Message) -> Result<(), RaftError> {
        if is_broadcast(dst) {
            return self.broadcast(msg);
        }
        self.network.deliver(&self.id, dst, msg.clone());
        Ok(())
    }

    fn broadcast(&mut self, msg: &Message) -> Result<(), RaftError> {
        for id in &self.all_ids {
            if id != &self.id {
                self.network.deliver(&self.id, id, msg.clone());
            }
        }
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Message>, RaftError> {
        {
            let mut inner = self.network.inner.borrow_mut();
            if let Some(msg) = inner.inboxes.get_mut(&self.id).and_then(|q| q.pop_front()) {
                return Ok(Some(msg));
            }
        }
        // The real `UdpTransport` blocks for `timeout` when nothing is
        // pending; mirror that here (capped, defensively, well above the
        // compressed test timing constants) so deadlines computed from
        // `Instant::now()` advance the same way they would in production
        // instead of spinning the event loop thousands of times per
        // millisecond of wall clock.
        std::thread::sleep(timeout.min(Duration::from_millis(200)));
        let mut inner = self.network.inner.borrow_mut();
        Ok(inner.inboxes.get_mut(&self.id).and_then(|q| q.pop_front()))
    }
}

/// A small cluster of replicas sharing one `MockNetwork`, with compressed
/// timing constants so tests converge in milliseconds of wall clock time
/// instead of the production defaults.
pub struct Cluster {
    pub network: MockNetwork,
    pub replicas: Vec<Replica<MockTransport>>,
    killed: std::collections::HashSet<ReplicaId>,
}

impl Cluster {
    pub fn new(ids: &[&str]) -> Self {
        let ids: Vec<ReplicaId> = ids.iter().map(|s| s.to_string()).collect();
        let network = MockNetwork::new(&ids);
        let replicas = ids
            .iter()
            .map(|id| {
                let peers: Vec<ReplicaId> =
                    ids.iter().filter(|p| *p != id).cloned().collect();
                let mut config = Config::new(id.clone(), peers);
                config.election_timeout_min = Duration::from_millis(15);
                config.election_timeout_max = Duration::from_millis(30);
                config.heartbeat_interval = Duration::from_millis(5);
                config.batch_flush_interval = Duration::from_millis(2);
                config.quorum_window = Duration::from_millis(40);
                let transport = MockTransport::new(id.clone(), ids.clone(), network.clone());
                Replica::new(config, transport)
            })
            .collect();
        Cluster {
            network,
            replicas,
            killed: std::collections::HashSet::new(),
        }
    }

    /// Stops ticking this replica, modeling a process crash (S2): its
    /// inbox keeps accepting datagrams but nothing ever drains it.
    pub fn kill(&mut self, id: &str) {
        self.killed.insert(id.to_string());
    }

    /// Advances every live replica by one tick, round-robin. Mirrors an
    /// interleaving of independent single-threaded event loops; no
    /// ordering guarantee is assumed across replicas (§5).
    pub fn step(&mut self) {
        for r in &mut self.replicas {
            if self.killed.contains(&r.state.id) {
                continue;
            }
            let _ = r.tick();
        }
    }

    pub fn run_for(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.step();
        }
    }

    pub fn leader(&self) -> Option<&Replica<MockTransport>> {
        self.replicas
            .iter()
            .find(|r| !self.killed.contains(&r.state.id) && r.state.role.is_leader())
    }

    pub fn replica(&mut self, id: &str) -> &mut Replica<MockTransport> {
        self.replicas
            .iter_mut()
            .find(|r| r.state.id == id)
            .expect("no such replica")
    }

    /// Runs ticks until a live `leader()` appears, or panics after
    /// `max_rounds` -- keeps test failures legible instead of hanging.
    pub fn run_until_leader(&mut self, max_rounds: usize) -> ReplicaId {
        for _ in 0..max_rounds {
            self.step();
            if let Some(l) = self.leader() {
                return l.state.id.clone();
            }
        }
        panic!("no leader elected within {} rounds", max_rounds);
    }
}
