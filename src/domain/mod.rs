pub mod entry;
pub mod feed;
pub mod query;

pub use entry::{Enclosure, Entry, Record};
pub use feed::Feed;
pub use query::{Query, QueryInput, QueryRequest, MAX_REDIRECTS};
