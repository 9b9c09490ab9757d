//! リング構成に関係する構造体等。
use serde_yaml;
use siphasher::sip::SipHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::path::Path;

use crate::{ErrorKind, PolicyId, Result, StoragePolicy};

const MAX_PARTITION_POWER: u8 = 20;

/// ストレージノード(のデバイス)。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node {
    /// ノードID。
    pub id: String,

    /// ノードのRPCアドレス。
    pub addr: SocketAddr,

    /// フラグメントを保持するデバイスの名前。
    pub device: String,
}
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}@{}", self.id, self.device, self.addr)
    }
}

/// A node holding the fragment with the given index of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentSlot {
    /// フラグメントのインデックス。
    pub index: usize,

    /// 担当ノード。
    pub node: Node,
}
impl fmt::Display for FragmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.node.device, self.index)
    }
}

/// Identifies the unit of reconstruction work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    /// パーティションが属するポリシー。
    pub policy: PolicyId,

    /// パーティション番号。
    pub number: u32,
}
impl PartitionId {
    /// Makes a new `PartitionId`.
    pub fn new(policy: PolicyId, number: u32) -> Self {
        PartitionId { policy, number }
    }
}
impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.policy, self.number)
    }
}

/// The ring of a single storage policy.
///
/// Partition `p` is assigned to `fragments` consecutive devices starting at
/// `p % devices.len()`; the `i`-th of them holds fragment index `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    /// 対象ポリシー。
    pub policy: StoragePolicy,

    /// パーティション数の2の対数。
    pub partition_power: u8,

    /// リングに参加しているデバイス群。
    pub devices: Vec<Node>,
}
impl Ring {
    /// Makes a new `Ring` after validating it.
    pub fn new(policy: StoragePolicy, partition_power: u8, devices: Vec<Node>) -> Result<Self> {
        let ring = Ring {
            policy,
            partition_power,
            devices,
        };
        track!(ring.validate())?;
        Ok(ring)
    }

    /// Checks that every partition of the ring can be resolved.
    pub fn validate(&self) -> Result<()> {
        track!(self.policy.validate())?;
        track_assert!(
            self.partition_power <= MAX_PARTITION_POWER,
            ErrorKind::InvalidInput,
            "Too large partition power: {} (max={})",
            self.partition_power,
            MAX_PARTITION_POWER
        );
        track_assert!(
            self.devices.len() >= self.policy.fragments(),
            ErrorKind::InvalidInput,
            "policy {} needs {} devices but the ring has {}",
            self.policy.id,
            self.policy.fragments(),
            self.devices.len()
        );
        let mut seen = BTreeSet::new();
        for d in &self.devices {
            track_assert!(
                seen.insert((&d.id, &d.device)),
                ErrorKind::InvalidInput,
                "Duplicate device: {}",
                d
            );
        }
        Ok(())
    }

    /// パーティションの総数を返す。
    pub fn partition_count(&self) -> u32 {
        1 << self.partition_power
    }

    /// Returns the partition to which the given object belongs.
    pub fn partition_of(&self, object_key: &str) -> PartitionId {
        let mut hasher = SipHasher::new();
        object_key.hash(&mut hasher);
        let number = if self.partition_power == 0 {
            0
        } else {
            (hasher.finish() >> (64 - u32::from(self.partition_power))) as u32
        };
        PartitionId::new(self.policy.id, number)
    }

    /// Returns the ordered fragment slots of the given partition.
    pub fn slots(&self, number: u32) -> Result<Vec<FragmentSlot>> {
        track_assert!(
            number < self.partition_count(),
            ErrorKind::Unresolvable,
            "No such partition: policy={}, number={}",
            self.policy.id,
            number
        );
        let start = number as usize % self.devices.len();
        let slots = Assignees::new(&self.devices, start)
            .take(self.policy.fragments())
            .enumerate()
            .map(|(index, node)| FragmentSlot {
                index,
                node: node.clone(),
            })
            .collect();
        Ok(slots)
    }

    /// Returns the partitions in which the node owns at least one fragment slot.
    pub fn partitions_of_node(&self, node_id: &str) -> Vec<PartitionId> {
        let len = self.devices.len();
        let fragments = self.policy.fragments();

        // デバイス位置`d`はパーティション`p`の担当 <=> `(d - p) mod len < fragments`
        let positions = self
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.id == node_id)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        (0..self.partition_count())
            .filter(|&p| {
                let start = p as usize % len;
                positions
                    .iter()
                    .any(|&d| (d + len - start) % len < fragments)
            })
            .map(|p| PartitionId::new(self.policy.id, p))
            .collect()
    }
}

#[derive(Debug)]
struct Assignees<'a> {
    devices: &'a [Node],
    current: usize,
    end: usize,
}
impl<'a> Assignees<'a> {
    fn new(devices: &'a [Node], start: usize) -> Self {
        Assignees {
            devices,
            current: start,
            end: start + devices.len(),
        }
    }
}
impl<'a> Iterator for Assignees<'a> {
    type Item = &'a Node;
    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.end {
            None
        } else {
            let i = self.current % self.devices.len();
            self.current += 1;
            Some(&self.devices[i])
        }
    }
}

/// The contract of the ring resolution service.
///
/// The answers must stay stable for the duration of one reconstruction cycle.
pub trait RingResolver: Send + Sync + 'static {
    /// Returns the storage policy identified by `policy`.
    fn policy(&self, policy: PolicyId) -> Result<StoragePolicy>;

    /// Returns the ordered fragment slots of `partition`.
    fn slots(&self, partition: PartitionId) -> Result<Vec<FragmentSlot>>;

    /// Returns the partition of an object and its `N` ordered slots.
    fn nodes_for(
        &self,
        policy: PolicyId,
        object_key: &str,
    ) -> Result<(PartitionId, Vec<FragmentSlot>)>;

    /// Returns every partition in which `node_id` holds a fragment slot.
    fn local_partitions(&self, node_id: &str) -> Vec<PartitionId>;
}

/// A static set of rings, one per storage policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSet {
    /// ポリシー毎のリング。
    pub rings: Vec<Ring>,
}
impl RingSet {
    /// Makes a new `RingSet` after validating every ring.
    pub fn new(rings: Vec<Ring>) -> Result<Self> {
        let set = RingSet { rings };
        track!(set.validate())?;
        Ok(set)
    }

    /// Reads a YAML encoded `RingSet` from the given file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = track!(File::open(path.as_ref()).map_err(crate::Error::from))?;
        let set: RingSet = track!(serde_yaml::from_reader(file).map_err(crate::Error::from))?;
        track!(set.validate())?;
        Ok(set)
    }

    /// Checks every ring and the uniqueness of their policies.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for ring in &self.rings {
            track!(ring.validate())?;
            track_assert!(
                seen.insert(ring.policy.id),
                ErrorKind::InvalidInput,
                "Duplicate policy: {}",
                ring.policy.id
            );
        }
        Ok(())
    }

    /// Returns the ring of the given policy.
    pub fn ring(&self, policy: PolicyId) -> Result<&Ring> {
        let ring = self.rings.iter().find(|r| r.policy.id == policy);
        let ring = track_assert_some!(ring, ErrorKind::Unresolvable, "No such policy: {}", policy);
        Ok(ring)
    }
}
impl RingResolver for RingSet {
    fn policy(&self, policy: PolicyId) -> Result<StoragePolicy> {
        track!(self.ring(policy)).map(|r| r.policy.clone())
    }
    fn slots(&self, partition: PartitionId) -> Result<Vec<FragmentSlot>> {
        let ring = track!(self.ring(partition.policy))?;
        track!(ring.slots(partition.number))
    }
    fn nodes_for(
        &self,
        policy: PolicyId,
        object_key: &str,
    ) -> Result<(PartitionId, Vec<FragmentSlot>)> {
        let ring = track!(self.ring(policy))?;
        let partition = ring.partition_of(object_key);
        let slots = track!(ring.slots(partition.number))?;
        Ok((partition, slots))
    }
    fn local_partitions(&self, node_id: &str) -> Vec<PartitionId> {
        self.rings
            .iter()
            .flat_map(|r| r.partitions_of_node(node_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackable::result::TestResult;

    fn node(i: usize) -> Node {
        Node {
            id: format!("node{}", i),
            addr: ([127, 0, 0, 1], 14000 + i as u16).into(),
            device: format!("dev{}", i),
        }
    }

    fn ring(devices: usize) -> Result<Ring> {
        let policy = track!(StoragePolicy::new(PolicyId(1), "ec4+2", 4, 2))?;
        Ring::new(policy, 3, (0..devices).map(node).collect())
    }

    #[test]
    fn slots_are_ordered_by_fragment_index() -> TestResult {
        let ring = track!(ring(8))?;
        let slots = track!(ring.slots(3))?;
        assert_eq!(slots.len(), 6);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.index, i);
            assert_eq!(slot.node, node((3 + i) % 8));
        }

        let slots = track!(ring.slots(6))?;
        let ids = slots.iter().map(|s| s.node.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["node6", "node7", "node0", "node1", "node2", "node3"]);
        Ok(())
    }

    #[test]
    fn unknown_partition_is_unresolvable() -> TestResult {
        let ring = track!(ring(6))?;
        let e = ring.slots(8).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::Unresolvable);
        Ok(())
    }

    #[test]
    fn too_few_devices_are_rejected() {
        let e = ring(5).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn object_placement_is_deterministic() -> TestResult {
        let set = track!(RingSet::new(vec![track!(ring(8))?]))?;
        let (p0, s0) = track!(set.nodes_for(PolicyId(1), "a/c/o"))?;
        let (p1, s1) = track!(set.nodes_for(PolicyId(1), "a/c/o"))?;
        assert_eq!(p0, p1);
        assert_eq!(s0, s1);
        assert!(p0.number < 8);
        assert!(set.nodes_for(PolicyId(2), "a/c/o").is_err());
        Ok(())
    }

    #[test]
    fn local_partitions_match_slots() -> TestResult {
        let ring = track!(ring(8))?;
        let set = track!(RingSet::new(vec![ring.clone()]))?;
        let local = set.local_partitions("node2");
        for p in 0..ring.partition_count() {
            let holds = track!(ring.slots(p))?.iter().any(|s| s.node.id == "node2");
            assert_eq!(holds, local.contains(&PartitionId::new(PolicyId(1), p)));
        }
        Ok(())
    }

    #[test]
    fn ring_set_is_loaded_from_yaml() -> TestResult {
        let yaml = r#"---
rings:
  - policy:
      id: 7
      name: ec2+1
      data_fragments: 2
      parity_fragments: 1
    partition_power: 2
    devices:
      - { id: a, addr: "127.0.0.1:14278", device: d0 }
      - { id: b, addr: "127.0.0.1:14279", device: d0 }
      - { id: c, addr: "127.0.0.1:14280", device: d0 }
"#;
        let set: RingSet = track_any_err!(serde_yaml::from_str(yaml))?;
        track!(set.validate())?;
        let policy = track!(set.policy(PolicyId(7)))?;
        assert_eq!(policy.decode_minimum(), 2);
        assert_eq!(set.local_partitions("a").len(), 4);
        Ok(())
    }
}
