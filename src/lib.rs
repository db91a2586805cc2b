//! Client-side notification reconciliation.
//!
//! `notiflow` keeps a local projection of a user's notifications consistent
//! with the server. Live events arrive over a push channel and are applied
//! by the [`reconciler`]; while that channel is down the [`poller`] refreshes
//! the first page on an interval; user actions go through the optimistic
//! [`gateway`], which rolls back when the server does not confirm. The
//! [`session`] module wires these around a [`source::NotificationSource`] and
//! a [`push::PushChannel`], and [`client`] drives a session from the command
//! line.

pub mod client;
pub mod gateway;
pub mod models;
pub mod poller;
pub mod projection;
pub mod push;
pub mod reconciler;
pub mod session;
pub mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;
