//! Notification backends implementing [`Channel`](crate::report::Channel).

pub mod beep;
pub mod email;
pub mod icinga;

pub use beep::BeepChannel;
pub use email::EmailChannel;
pub use icinga::IcingaChannel;
