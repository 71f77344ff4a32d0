//! Service Command Dispatcher.
//!
//! Services live as directories under the service account's `services/`
//! tree on the control node. Each exposes `<command>.py` scripts for the
//! commands in [`Command`], reads its input from `data/data.json`, and may
//! use auxiliary files from `files/`. The dispatcher stages inputs through
//! randomized `/tmp` names, runs the script as the service account, and
//! pulls the JSON reply out of whatever the script printed.

mod command;
mod dispatcher;
mod error;
mod reply;

pub use command::Command;
pub use dispatcher::ServiceDispatcher;
pub use error::Result;
pub use error::ServiceError;
pub use reply::ServiceReply;
pub use reply::parse_reply;
