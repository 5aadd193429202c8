use std::collections::HashSet;

/// A named chat room, lazily created on first JOIN and destroyed the
/// moment its membership drops to empty (spec §3).
#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub members: HashSet<u64>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }
}
