//! Client call flow
//!
//! One actor owns the call session; [`CallClient`] starts it and
//! [`CallHandle`] talks to it.

pub mod client;
pub mod controller;
pub mod notice;
pub mod session;

pub use client::{CallClient, CallHandle, CallParts, Mailbox};
pub use controller::{AppVisibility, CallSettings};
pub use notice::{CallNotice, NoticeBroadcaster};
pub use session::{CallSnapshot, PendingOp};
