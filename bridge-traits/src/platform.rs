//! Thread-safety bound that follows the target.
//!
//! Storage handles, popup windows and message ports are single-threaded
//! browser objects on `wasm32`, so the bridge traits only demand
//! `Send + Sync` on native targets.

#[cfg(not(target_arch = "wasm32"))]
pub trait PlatformSendSync: Send + Sync {}

#[cfg(not(target_arch = "wasm32"))]
impl<T> PlatformSendSync for T where T: Send + Sync {}

#[cfg(target_arch = "wasm32")]
pub trait PlatformSendSync {}

#[cfg(target_arch = "wasm32")]
impl<T> PlatformSendSync for T {}
