use std::collections::HashSet;

/// Fixed set of author IDs whose messages are retained. Loaded once at
/// startup and shared read-only between live ingestion and recovery, so the
/// two paths can never disagree about who is kept.
#[derive(Clone, Debug)]
pub struct Whitelist {
    users: HashSet<String>,
}

impl Whitelist {
    /// An empty whitelist would retain nothing, which makes the bot useless
    /// and the daily digest silently empty. Refuse to start that way.
    pub fn new(users: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let users: HashSet<String> = users.into_iter().collect();
        if users.is_empty() {
            anyhow::bail!("whitelist is empty; configure at least one user id");
        }
        Ok(Self { users })
    }

    pub fn is_allowed(&self, author_id: &str) -> bool {
        self.users.contains(author_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
