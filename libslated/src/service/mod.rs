//! Application services
//!
//! The seams the binaries (and any future HTTP surface) call into: item
//! scheduling on one side, the account connect flow on the other.

pub mod connect;
pub mod items;

pub use connect::ConnectService;
pub use items::ItemService;
