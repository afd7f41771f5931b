//! Capability plugins.
//!
//! | Plugin | Context field | Contributes |
//! |---|---|---|
//! | [`SqlPlugin`] | `sql` | `__sql_*` |
//! | [`StoragePlugin`] | `storage` | `__storage_*` |
//! | [`CollectionsPlugin`] | `collections` | `__collection_*` |
//! | [`AuthPlugin`] | `auth` | `auth.whoami`, [`RequireAuth`], connect hook |
//! | [`LocalityPlugin`] | `locality` | `locality.info` |

pub mod auth;
pub mod collections;
pub mod filter;
pub mod locality;
pub mod sql;
pub mod storage;

pub use auth::{AuthGate, AuthPlugin, Principal, RequireAuth, StaticTokens, TokenVerifier};
pub use collections::{Collection, Collections, CollectionsPlugin, FindOptions, SortField};
pub use locality::{Locality, LocalityPlugin};
pub use sql::{SqlHandle, SqlPlugin};
pub use storage::{StorageHandle, StoragePlugin};
