//! Workspace facade crate.
//!
//! Re-exports the member crates so host shells can depend on a single
//! `authsync-workspace` package. The `auth` feature (enabled by default) pulls
//! in the popup/redirect coordination layer from `core-auth`; hosts that only
//! need persistence or the worker sync channel can disable it.

pub use bridge_traits as bridge;
pub use core_channel as channel;
pub use core_persistence as persistence;
pub use core_runtime as runtime;

#[cfg(feature = "auth")]
pub use core_auth as auth;
