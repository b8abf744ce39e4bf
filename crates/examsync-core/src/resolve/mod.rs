//! Read-time choice of which dataset snapshot to serve.
//!
//! The order is always remote, then valid cache, then the bundled
//! baseline. A remote or cache failure never surfaces as an error; the
//! worst case is stale data, reported through [`DataOrigin`].

pub mod live;
pub mod resolver;

pub use live::{LiveData, SessionGuard};
pub use resolver::{DataOrigin, DataResolver, QuestionSet, Resolution};
