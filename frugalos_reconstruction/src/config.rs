//! Reconstructor settings.
use std::time::Duration;

/// `frugalos_reconstruction` の設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructorConfig {
    /// ノード毎のフラグメント一覧取得のタイムアウト時間。
    #[serde(
        rename = "inspect_timeout_millis",
        default = "default_inspect_timeout",
        with = "crate::serde_ext::duration_millis"
    )]
    pub inspect_timeout: Duration,

    /// ソースフラグメント取得のタイムアウト時間。
    #[serde(
        rename = "fetch_timeout_millis",
        default = "default_fetch_timeout",
        with = "crate::serde_ext::duration_millis"
    )]
    pub fetch_timeout: Duration,

    /// 書き込みおよび永続化確定のタイムアウト時間。
    #[serde(
        rename = "commit_timeout_millis",
        default = "default_commit_timeout",
        with = "crate::serde_ext::duration_millis"
    )]
    pub commit_timeout: Duration,

    /// 同時に処理するパーティションの最大数。
    #[serde(default = "default_partition_concurrency")]
    pub partition_concurrency: usize,

    /// 連続実行時のサイクル間隔。
    #[serde(
        rename = "cycle_interval_millis",
        default = "default_cycle_interval",
        with = "crate::serde_ext::duration_millis"
    )]
    pub cycle_interval: Duration,

    /// 非永続フラグメントの永続化確定を行うために必要な、
    /// 勝者バージョンの永続フラグメント数。
    #[serde(default = "default_durable_quorum")]
    pub durable_quorum: usize,

    /// 永続フラグメントが一つも存在しない場合に、
    /// 暫定勝者を確定させるために必要な非永続フラグメント数。
    ///
    /// 省略時は「復元に必要な最小数 + 1」(フラグメント総数が上限)。
    #[serde(default)]
    pub provisional_quorum: Option<usize>,

    /// 前回から変化のないパーティションの計画を省略するかどうか。
    #[serde(default = "default_skip_unchanged_partitions")]
    pub skip_unchanged_partitions: bool,

    /// `run_cycles`で実行するサイクル数の上限。
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
}
impl ReconstructorConfig {
    /// Returns the provisional quorum for the given policy parameters.
    pub fn provisional_quorum(&self, decode_minimum: usize, fragments: usize) -> usize {
        self.provisional_quorum
            .unwrap_or(decode_minimum + 1)
            .min(fragments)
            .max(1)
    }
}
impl Default for ReconstructorConfig {
    fn default() -> Self {
        ReconstructorConfig {
            inspect_timeout: default_inspect_timeout(),
            fetch_timeout: default_fetch_timeout(),
            commit_timeout: default_commit_timeout(),
            partition_concurrency: default_partition_concurrency(),
            cycle_interval: default_cycle_interval(),
            durable_quorum: default_durable_quorum(),
            provisional_quorum: None,
            skip_unchanged_partitions: default_skip_unchanged_partitions(),
            max_cycles: default_max_cycles(),
        }
    }
}

fn default_inspect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_partition_concurrency() -> usize {
    4
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_durable_quorum() -> usize {
    1
}

fn default_skip_unchanged_partitions() -> bool {
    true
}

fn default_max_cycles() -> usize {
    3
}
