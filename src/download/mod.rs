//! The download pipeline: filename sanitizing, name allocation and the
//! session driver that ties transport, parser and stores together.

pub mod allocator;
pub mod sanitize;
pub mod session;

pub use allocator::{Allocation, NameAllocator};
pub use session::{run, MessageOutcome, PartOutcome, RunSummary, Session, SessionOptions};
