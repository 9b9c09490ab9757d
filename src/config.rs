//! 再構築デーモンの設定。
use frugalos_reconstruction::config::ReconstructorConfig;
use frugalos_reconstruction::{ErasureCodec, PooledCodec};
use frugalos_ring::RingSet;
use num_cpus;
use serde_yaml;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind, Result};

/// 入力を複製するだけのコーデックの名前 (検証用)。
pub const REPLICA_CODEC: &str = "replica";

/// `liberasurecode`を用いるコーデックの名前。
pub const LIBERASURECODE_CODEC: &str = "liberasurecode";

/// 再構築デーモンの設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// ローカルノードの識別子。
    ///
    /// 省略時はホスト名が使われる。
    #[serde(default)]
    pub node: Option<String>,

    /// リング集合を記述した YAML ファイルのパス。
    ///
    /// 相対パスは設定ファイルのあるディレクトリからの相対として解釈される。
    pub rings: PathBuf,

    /// 使用するイレイジャーコーデックの名前。
    #[serde(default = "default_codec")]
    pub codec: String,

    /// 制御用 RPC サーバのアドレス。
    #[serde(default = "default_rpc_server_bind_addr")]
    pub rpc_server_bind_addr: SocketAddr,

    /// `/metrics` を公開する HTTP サーバのアドレス。
    #[serde(default)]
    pub http_server_bind_addr: Option<SocketAddr>,

    /// 実行スレッド数。
    #[serde(default = "default_executor_threads")]
    pub executor_threads: usize,

    /// 再構築処理の設定。
    #[serde(default)]
    pub reconstructor: ReconstructorConfig,
}
impl DaemonConfig {
    /// Makes a `DaemonConfig` with default values.
    pub fn new<P: AsRef<Path>>(rings: P) -> Self {
        DaemonConfig {
            node: None,
            rings: rings.as_ref().to_path_buf(),
            codec: default_codec(),
            rpc_server_bind_addr: default_rpc_server_bind_addr(),
            http_server_bind_addr: None,
            executor_threads: default_executor_threads(),
            reconstructor: ReconstructorConfig::default(),
        }
    }

    /// Reads a YAML encoded `DaemonConfig` from the given file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = track!(File::open(path).map_err(Error::from), "path={:?}", path)?;
        let mut config: DaemonConfig = track!(serde_yaml::from_reader(file).map_err(Error::from))?;
        if config.rings.is_relative() {
            if let Some(dir) = path.parent() {
                config.rings = dir.join(&config.rings);
            }
        }
        track!(config.validate())?;
        Ok(config)
    }

    /// Checks the values that can be checked without touching other files.
    pub fn validate(&self) -> Result<()> {
        track_assert!(
            self.executor_threads > 0,
            ErrorKind::InvalidInput,
            "`executor_threads` must be positive"
        );
        track_assert!(
            self.reconstructor.partition_concurrency > 0,
            ErrorKind::InvalidInput,
            "`reconstructor.partition_concurrency` must be positive"
        );
        track!(codec_by_name(&self.codec))?;
        Ok(())
    }

    /// Loads the ring set.
    pub fn load_rings(&self) -> Result<RingSet> {
        track!(RingSet::load(&self.rings).map_err(Error::from), "path={:?}", self.rings)
    }

    /// Returns the codec named by `codec`.
    pub fn build_codec(&self) -> Result<Arc<dyn ErasureCodec>> {
        track!(codec_by_name(&self.codec))
    }
}

fn codec_by_name(name: &str) -> Result<Arc<dyn ErasureCodec>> {
    match name {
        REPLICA_CODEC => Ok(Arc::new(PooledCodec::replica())),
        #[cfg(unix)]
        LIBERASURECODE_CODEC => Ok(Arc::new(PooledCodec::liberasurecode())),
        _ => Err(track!(Error::from(
            ErrorKind::InvalidInput.cause(format!("Codec unavailable: {:?}", name))
        ))),
    }
}

fn default_codec() -> String {
    REPLICA_CODEC.to_owned()
}

fn default_rpc_server_bind_addr() -> SocketAddr {
    ([127, 0, 0, 1], 14300).into()
}

fn default_executor_threads() -> usize {
    num_cpus::get()
}
