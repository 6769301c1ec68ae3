use super::Entry;

/// What to do with a fetched entry. Skipped entries produce no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No row with this link exists yet.
    Insert,
    /// A row with this link exists with an older publish time.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub entry: Entry,
    pub action: Action,
}

impl Decision {
    pub fn new(entry: Entry, action: Action) -> Self {
        Self { entry, action }
    }
}
