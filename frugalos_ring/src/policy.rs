use std::fmt;

use crate::{ErrorKind, Result};

/// ストレージポリシーの識別子。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub u32);
impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Erasure coding parameters of a storage policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// ポリシーID。
    pub id: PolicyId,

    /// 人間向けの名前。
    pub name: String,

    /// データフラグメントの数。
    ///
    /// 復元に必要な最小フラグメント数でもある。
    pub data_fragments: u8,

    /// パリティフラグメントの数 (障害耐性数)。
    pub parity_fragments: u8,
}
impl StoragePolicy {
    /// Makes a new `StoragePolicy` after validating its parameters.
    pub fn new(id: PolicyId, name: &str, data_fragments: u8, parity_fragments: u8) -> Result<Self> {
        let policy = StoragePolicy {
            id,
            name: name.to_owned(),
            data_fragments,
            parity_fragments,
        };
        track!(policy.validate())?;
        Ok(policy)
    }

    /// Checks that the policy can actually be used for erasure coding.
    pub fn validate(&self) -> Result<()> {
        track_assert!(
            self.data_fragments > 0,
            ErrorKind::InvalidInput,
            "policy {}: data_fragments must be positive",
            self.id
        );
        track_assert!(
            self.parity_fragments > 0,
            ErrorKind::InvalidInput,
            "policy {}: parity_fragments must be positive",
            self.id
        );
        Ok(())
    }

    /// The total number of fragment indices (data + parity).
    pub fn fragments(&self) -> usize {
        self.data_fragments as usize + self.parity_fragments as usize
    }

    /// The smallest number of distinct fragments needed to decode an object.
    pub fn decode_minimum(&self) -> usize {
        self.data_fragments as usize
    }

    /// The number of fragments that can be lost without losing data.
    pub fn tolerable_faults(&self) -> usize {
        self.parity_fragments as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackable::result::TestResult;

    #[test]
    fn policy_parameters_work() -> TestResult {
        let policy = track!(StoragePolicy::new(PolicyId(1), "ec4+2", 4, 2))?;
        assert_eq!(policy.fragments(), 6);
        assert_eq!(policy.decode_minimum(), 4);
        assert_eq!(policy.tolerable_faults(), 2);
        Ok(())
    }

    #[test]
    fn zero_parity_is_rejected() {
        let e = StoragePolicy::new(PolicyId(1), "broken", 4, 0).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InvalidInput);
        assert!(StoragePolicy::new(PolicyId(1), "broken", 0, 2).is_err());
    }
}
