//! Resources shared by the Sluice ingestion client and service.
//!
//! - Identifiers: [`ClientName`], [`DatabaseName`], [`SchemaName`], [`PipeName`], [`ChannelName`].
//! - Data: [`Row`] values validated against a [`PipeSchema`], tagged with an [`OffsetToken`].
//! - Connection settings: [`Profile`].
pub mod name;
pub mod offset;
pub mod profile;
pub mod row;
pub mod schema;

pub use self::name::{
    ChannelName, ClientName, DatabaseName, PipeName, ResourceError, ResourceResult, SchemaName,
};
pub use self::offset::{OffsetToken, OffsetTokenError};
pub use self::profile::{Profile, ProfileError};
pub use self::row::Row;
pub use self::schema::{ColumnSchema, ColumnType, PipeSchema, RowError};
