//! Popup Window Abstraction

use crate::platform::PlatformSendSync;

/// Handle to a sign-in popup opened by the host.
///
/// Mirrors the two things the core needs from a `Window` reference: whether the
/// user closed it, and a way to close it programmatically.
pub trait PopupWindow: PlatformSendSync {
    /// `true` once the popup's `closed` flag is set.
    fn is_closed(&self) -> bool;

    /// Close the popup. Closing an already closed popup is a no-op.
    fn close(&self);
}
