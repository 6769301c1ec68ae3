mod fetcher;
mod parser;
mod retry;

pub use fetcher::{FeedFetcher, FeedSource};
pub use parser::parse_entries;
pub use retry::RetryPolicy;
