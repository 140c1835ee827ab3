use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] crate::store::Error),

    #[error("server: {0}")]
    Server(#[from] crate::server::Error),

    #[error("unknown sharding type `{0}`")]
    UnknownType(String),

    #[error("shard mapping ({0}) does not exist")]
    MappingNotFound(u32),

    #[error("table `{0}` is not sharded")]
    TableNotSharded(String),

    #[error("table `{0}` is already sharded")]
    TableAlreadySharded(String),

    #[error("mapping ({0}) already has an anchor table")]
    AnchorExists(u32),

    #[error("shard ({0}) does not exist")]
    ShardNotFound(u32),

    #[error("shard ({0}) is disabled")]
    ShardDisabled(u32),

    #[error("mapping ({0}) has no shards")]
    NoShards(u32),

    #[error("key `{key}` is not a valid {kind} sharding key")]
    BadKey { key: String, kind: &'static str },

    #[error("lower bounds must be strictly increasing; `{0}` is out of order")]
    BoundsNotIncreasing(String),

    #[error("no shard covers key `{0}`")]
    NoCoveringShard(String),

    #[error("malformed `{0}` value in row")]
    MalformedRow(&'static str),

    #[error("split point `{0}` is outside the shard's key range")]
    SplitPointOutOfRange(String),

    #[error("backup tooling failed: {0}")]
    Backup(String),

    #[error("group ({0}) has no primary to run shard maintenance on")]
    NoPrimary(String),
}
