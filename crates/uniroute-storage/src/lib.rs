pub mod db;
pub mod entities;
pub mod seaorm;
pub mod snapshot;
pub mod storage;

pub use seaorm::SeaOrmStorage;
pub use snapshot::{StorageSnapshot, TunnelTokenRow};
pub use storage::{
    NewApiKey, NewDomain, NewProviderKey, NewRequestLogEntry, NewTunnel, NewTunnelToken,
    RequestLogFilter, RequestLogRow, Storage, StorageError, StorageResult, TunnelActivity,
    UsageAggregate, UsageFilter,
};
