//! Fragment metadata and observed fragment states.
use adler32::RollingAdler32;
use byteorder::{BigEndian, ByteOrder};
use siphasher::sip::SipHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ErrorKind, Result};

const CHECKSUM_TRAILER_SIZE: usize = 5;

/// Microseconds since the UNIX epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);
impl Timestamp {
    /// Returns the current time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(elapsed.as_secs() * 1_000_000 + u64::from(elapsed.subsec_micros()))
    }
}
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

/// The identity of one written version of an object.
///
/// The ordering (timestamp first, then etag) is the deterministic
/// tie-break shared by every reconstructor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// 書き込み時刻。
    pub timestamp: Timestamp,

    /// 元データのハッシュ値。
    pub etag: String,
}
impl fmt::Display for ObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.etag)
    }
}

/// Metadata of a fragment as reported by a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentMeta {
    /// オブジェクトのキー。
    pub object: String,

    /// このフラグメントのインデックス。
    pub fragment_index: usize,

    /// データの書き込み時刻。
    pub timestamp: Timestamp,

    /// 元データのハッシュ値。
    pub etag: String,

    /// ユーザメタデータ。
    pub metadata: BTreeMap<String, String>,

    /// メタデータの最終更新時刻。
    pub metadata_version: Timestamp,

    /// 永続化済みかどうか。
    pub durable: bool,

    /// 元データのバイト数。
    pub content_length: u64,
}
impl FragmentMeta {
    /// Returns the version this fragment belongs to.
    pub fn version(&self) -> ObjectVersion {
        ObjectVersion {
            timestamp: self.timestamp,
            etag: self.etag.clone(),
        }
    }

    /// Returns `true` if the fragment belongs to `version`.
    pub fn is_version(&self, version: &ObjectVersion) -> bool {
        self.timestamp == version.timestamp && self.etag == version.etag
    }

    /// Returns a copy describing the same object under another fragment index.
    pub fn for_index(&self, fragment_index: usize, durable: bool) -> Self {
        FragmentMeta {
            fragment_index,
            durable,
            ..self.clone()
        }
    }
}

/// A fragment with its payload.
///
/// The payload carries an adler32 trailer (see `append_checksum`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// メタデータ。
    pub meta: FragmentMeta,

    /// チェックサム付きのペイロード。
    pub payload: Vec<u8>,
}

/// The observed state of one fragment slot for one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentState {
    /// The node answered and holds no fragment.
    Absent,

    /// The node holds a fragment.
    Present(FragmentMeta),

    /// The node could not be probed.
    Unreachable,
}
impl FragmentState {
    /// Returns the metadata if the fragment is present.
    pub fn meta(&self) -> Option<&FragmentMeta> {
        if let FragmentState::Present(ref m) = *self {
            Some(m)
        } else {
            None
        }
    }

    /// Returns `true` if a durable fragment is present.
    pub fn is_durable(&self) -> bool {
        self.meta().map_or(false, |m| m.durable)
    }
}

/// Computes the etag of the given content.
pub fn etag_of(content: &[u8]) -> String {
    let mut hasher = SipHasher::new();
    hasher.write(content);
    format!("{:016x}", hasher.finish())
}

pub(crate) fn append_checksum(bytes: &mut Vec<u8>) {
    let checksum = RollingAdler32::from_buffer(&bytes[..]).hash();
    let mut trailer = [0; CHECKSUM_TRAILER_SIZE];
    BigEndian::write_u32(&mut trailer[..], checksum);
    bytes.extend_from_slice(&trailer[..]);
}

pub(crate) fn verify_and_remove_checksum(bytes: &mut Vec<u8>) -> Result<()> {
    track_assert!(
        bytes.len() >= CHECKSUM_TRAILER_SIZE,
        ErrorKind::CorruptSource,
        "Too short payload: {} bytes",
        bytes.len()
    );
    let split_pos = bytes.len() - CHECKSUM_TRAILER_SIZE;

    let checksum = RollingAdler32::from_buffer(&bytes[..split_pos]).hash();
    let expected = BigEndian::read_u32(&bytes[split_pos..]);
    track_assert_eq!(checksum, expected, ErrorKind::CorruptSource);

    bytes.truncate(split_pos);
    Ok(())
}
