//! Repository implementations for database access.
//!
//! Each repository borrows a [`Database`](crate::db::Database) and serves both backends.
//! Entities with a CRUD surface implement [`Repository`]; counters, rejection events and
//! call history expose the narrower operations they need.
//!
//! ```ignore
//! use relayctl::db::handlers::{Flows, Repository};
//!
//! let flow = Flows::new(&db).get_by_id(flow_id).await?;
//! ```

pub mod call_history;
pub mod conversations;
pub mod flows;
pub mod prompts;
pub mod rate_limits;
pub mod repository;

pub use call_history::CallHistory;
pub use conversations::Conversations;
pub use flows::Flows;
pub use prompts::Prompts;
pub use rate_limits::{Counters, RateLimitEvents};
pub use repository::Repository;
