mod decision;
mod entry;

pub use decision::{Action, Decision};
pub use entry::Entry;
