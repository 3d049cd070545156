//! Event dispatch and protocol handlers.

mod advertisement;
mod attach;
mod auth;
mod data;
mod dispatch;
mod link;
mod network_data;
mod routing;
mod timeout;

pub(in crate::node) use data::CommandDest;
