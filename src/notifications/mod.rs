//! # Notifications: the observability surface of a machine.
//!
//! - [`Notification`] / [`NotificationKind`]: one record per lifecycle transition.
//! - `Hub` (internal): ingestion queue + broadcast pump feeding interceptors and subscribers.

mod hub;
mod notification;

pub(crate) use hub::Hub;
pub use notification::{Notification, NotificationKind, SideJobRef};
