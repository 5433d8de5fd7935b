pub mod config;
pub mod db_path;
pub mod disk_path;
pub mod error;
pub mod ident;
pub mod naming;
pub mod node;
pub mod store;
pub mod sub_level;
pub mod tree;

pub use config::{ConfigRegistry, DecisionConfig, HierarchyConfig, StorageConfig};
pub use db_path::{DbPath, Resolution};
pub use error::{Result, TreeError};
pub use ident::NodeId;
pub use node::{NodeKind, NodeRecord};
pub use store::NodeStore;
pub use sub_level::{ClassifiedFiles, FlattenEntry, SequentialFiles, SubLevel, SubTree};
pub use tree::{current_platform, current_user, NewNode, Tree};
