//! Live data layer.
//!
//! The [`Backend`] owns the store and a [`ChangeFeed`]. Writes go through
//! the backend and publish to the feed; [`LiveConversations`] and
//! [`MessageStream`] hold push subscriptions and keep local copies that the
//! views render from.

mod backend;
mod conversations;
mod feed;
mod messages;

pub use backend::*;
pub use conversations::*;
pub use feed::*;
pub use messages::*;
