//! State-store DDL. Executed in order by [`super::StateStore::setup`].

pub const CREATE_SERVERS: &str = "CREATE TABLE IF NOT EXISTS servers (
    server_uuid VARCHAR(40) NOT NULL,
    group_id VARCHAR(64) NULL,
    address VARCHAR(128) NOT NULL,
    user VARCHAR(64) NOT NULL,
    password VARCHAR(128) NOT NULL,
    mode VARCHAR(16) NOT NULL,
    status VARCHAR(16) NOT NULL,
    weight DOUBLE NOT NULL DEFAULT 1.0,
    CONSTRAINT pk_servers PRIMARY KEY (server_uuid),
    INDEX idx_servers_group (group_id)
)";

pub const CREATE_GROUPS: &str = "CREATE TABLE IF NOT EXISTS groups (
    group_id VARCHAR(64) NOT NULL,
    description VARCHAR(256) NULL,
    master_uuid VARCHAR(40) NULL,
    active TINYINT NOT NULL DEFAULT 0,
    CONSTRAINT pk_groups PRIMARY KEY (group_id)
)";

pub const CREATE_CHECKPOINTS: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
    proc_uuid VARCHAR(40) NOT NULL,
    job_uuid VARCHAR(40) NOT NULL,
    sequence INTEGER NOT NULL,
    action_fqn TEXT NOT NULL,
    param_args BLOB NULL,
    param_kwargs BLOB NULL,
    lockables BLOB NULL,
    started DOUBLE(16, 6) NULL,
    finished DOUBLE(16, 6) NULL,
    CONSTRAINT pk_checkpoints PRIMARY KEY (proc_uuid, job_uuid)
)";

pub const CREATE_ERROR_LOG: &str = "CREATE TABLE IF NOT EXISTS error_log (
    server_uuid VARCHAR(40) NOT NULL,
    reporter VARCHAR(64) NOT NULL,
    reported DOUBLE(16, 6) NOT NULL,
    error TEXT NULL,
    INDEX idx_error_log_server (server_uuid, reported)
)";

pub const CREATE_SHARD_MAPS_DEFN: &str = "CREATE TABLE IF NOT EXISTS shard_maps_defn (
    shard_mapping_id INT NOT NULL AUTO_INCREMENT,
    type_name VARCHAR(16) NOT NULL,
    global_group_id VARCHAR(64) NOT NULL,
    CONSTRAINT pk_shard_maps_defn PRIMARY KEY (shard_mapping_id)
)";

pub const CREATE_SHARD_TABLES: &str = "CREATE TABLE IF NOT EXISTS shard_tables (
    shard_mapping_id INT NOT NULL,
    table_name VARCHAR(128) NOT NULL,
    column_name VARCHAR(64) NOT NULL,
    is_anchor TINYINT NOT NULL DEFAULT 0,
    CONSTRAINT pk_shard_tables PRIMARY KEY (table_name),
    INDEX idx_shard_tables_mapping (shard_mapping_id)
)";

pub const CREATE_SHARDS: &str = "CREATE TABLE IF NOT EXISTS shards (
    shard_id INT NOT NULL AUTO_INCREMENT,
    group_id VARCHAR(64) NOT NULL,
    state VARCHAR(16) NOT NULL,
    CONSTRAINT pk_shards PRIMARY KEY (shard_id)
)";

pub const CREATE_SHARD_RANGES: &str = "CREATE TABLE IF NOT EXISTS shard_ranges (
    shard_mapping_id INT NOT NULL,
    lower_bound VARCHAR(64) NOT NULL,
    shard_id INT NOT NULL,
    CONSTRAINT pk_shard_ranges PRIMARY KEY (shard_mapping_id, lower_bound)
)";

pub const CREATE_SHARD_HASHES: &str = "CREATE TABLE IF NOT EXISTS shard_hashes (
    shard_mapping_id INT NOT NULL,
    lower_bound VARCHAR(32) NOT NULL,
    shard_id INT NOT NULL,
    CONSTRAINT pk_shard_hashes PRIMARY KEY (shard_mapping_id, lower_bound)
)";

/// All tables, creation order.
pub const TABLES: &[&str] = &[
    CREATE_SERVERS,
    CREATE_GROUPS,
    CREATE_CHECKPOINTS,
    CREATE_ERROR_LOG,
    CREATE_SHARD_MAPS_DEFN,
    CREATE_SHARD_TABLES,
    CREATE_SHARDS,
    CREATE_SHARD_RANGES,
    CREATE_SHARD_HASHES,
];
