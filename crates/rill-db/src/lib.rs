mod bucket;
mod chain;
mod collection;
mod cursor;
mod database;
mod emitter;
mod error;
mod reactor;
mod tree;
mod view;

pub use bucket::ActiveBucket;
pub use chain::{ChainPacket, ChainReceiver, ChainSender};
pub use collection::{Collection, Diff, TransformConfig, TransformHook};
pub use cursor::Cursor;
pub use database::{Database, ViewInfo};
pub use emitter::{CollectionEvent, Emitter, ListenerId, ViewEvent};
pub use error::DbError;
pub use reactor::{ReactorIo, TransformFn};
pub use tree::{MultiLevelTree, TreeInsertResult};
pub use view::{TransformSettings, View};
