//! Channel and user directories.
//!
//! Each directory is an immutable snapshot behind an atomically swapped
//! pointer. A rebuild fetches the full listing, builds a fresh table and
//! swaps it in; readers holding the previous snapshot are unaffected. A
//! failed fetch leaves the previous snapshot in place.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use slackhive_core::{ApiResult, ChannelInfo, UserInfo, WebApi};

/// Display name used for direct-message channels (`D…`).
pub const DIRECT_MESSAGE_LABEL: &str = "Direct Message";

/// Display name used for group-message channels (`G…`).
pub const GROUP_MESSAGE_LABEL: &str = "Group Message";

// =============================================================================
// Snapshot table
// =============================================================================

/// An id-keyed table replaced wholesale on every rebuild.
#[derive(Debug)]
pub struct Directory<T> {
    table: RwLock<Arc<HashMap<String, T>>>,
}

impl<T> Default for Directory<T> {
    fn default() -> Self {
        Self {
            table: RwLock::new(Arc::new(HashMap::new())),
        }
    }
}

impl<T> Directory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current table. Never observed half-built.
    pub fn snapshot(&self) -> Arc<HashMap<String, T>> {
        Arc::clone(&self.table.read())
    }

    /// Swaps in a new table.
    pub fn replace(&self, table: HashMap<String, T>) {
        *self.table.write() = Arc::new(table);
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.read().contains_key(id)
    }
}

// =============================================================================
// Channel criteria
// =============================================================================

/// Decides which channels the bot subscribes to.
#[derive(Clone)]
pub enum ChannelCriterion {
    /// Exact channel name.
    Name(String),
    /// Channel names matching a regular expression.
    Pattern(Regex),
    /// Arbitrary predicate over the channel.
    Predicate(Arc<dyn Fn(&ChannelInfo) -> bool + Send + Sync>),
}

impl ChannelCriterion {
    /// Parses a config string: `/regex/` is a pattern, anything else an
    /// exact name (a leading `#` is ignored).
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
            return Ok(Self::Pattern(Regex::new(&raw[1..raw.len() - 1])?));
        }
        Ok(Self::Name(raw.trim_start_matches('#').to_string()))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ChannelInfo) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn matches(&self, channel: &ChannelInfo) -> bool {
        match self {
            Self::Name(name) => channel.name == *name,
            Self::Pattern(regex) => regex.is_match(&channel.name),
            Self::Predicate(f) => f(channel),
        }
    }
}

impl std::fmt::Debug for ChannelCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(n) => f.debug_tuple("Name").field(n).finish(),
            Self::Pattern(r) => f.debug_tuple("Pattern").field(&r.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// =============================================================================
// Directories
// =============================================================================

/// The channel and user directories used to enrich events.
#[derive(Debug, Default)]
pub struct Directories {
    channels: Directory<ChannelInfo>,
    users: Directory<UserInfo>,
    criteria: RwLock<Vec<ChannelCriterion>>,
}

impl Directories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the subscription criteria. Takes effect on the next channel
    /// rebuild.
    pub fn set_criteria(&self, criteria: Vec<ChannelCriterion>) {
        *self.criteria.write() = criteria;
    }

    /// Whether any subscription criteria are configured.
    pub fn has_criteria(&self) -> bool {
        !self.criteria.read().is_empty()
    }

    fn subscribed(&self, channel: &ChannelInfo) -> bool {
        let criteria = self.criteria.read();
        criteria.is_empty() || criteria.iter().any(|c| c.matches(channel))
    }

    /// Rebuilds the channel table from a full listing.
    pub async fn refresh_channels(&self, api: &dyn WebApi) -> ApiResult<usize> {
        let listing = api.list_channels().await?;
        let table: HashMap<_, _> = listing
            .into_iter()
            .filter(|c| self.subscribed(c))
            .map(|c| (c.id.clone(), c))
            .collect();
        let count = table.len();
        self.channels.replace(table);
        debug!(count, "Channel directory rebuilt");
        Ok(count)
    }

    /// Rebuilds the user table from a full listing.
    pub async fn refresh_users(&self, api: &dyn WebApi) -> ApiResult<usize> {
        let listing = api.list_users().await?;
        let table: HashMap<_, _> = listing.into_iter().map(|u| (u.id.clone(), u)).collect();
        let count = table.len();
        self.users.replace(table);
        debug!(count, "User directory rebuilt");
        Ok(count)
    }

    /// Rebuilds channels, keeping the previous table on failure.
    pub async fn refresh_channels_or_keep(&self, api: &dyn WebApi) {
        if let Err(e) = self.refresh_channels(api).await {
            warn!(error = %e, "Channel directory refresh failed, keeping previous table");
        }
    }

    /// Rebuilds users, keeping the previous table on failure.
    pub async fn refresh_users_or_keep(&self, api: &dyn WebApi) {
        if let Err(e) = self.refresh_users(api).await {
            warn!(error = %e, "User directory refresh failed, keeping previous table");
        }
    }

    /// Display name for a channel id.
    ///
    /// Known channels resolve to their name; unknown `D…` and `G…` ids to a
    /// direct/group message label; anything else to the raw id.
    pub fn resolve_channel(&self, id: &str) -> String {
        if let Some(channel) = self.channels.snapshot().get(id) {
            return channel.name.clone();
        }
        match id.chars().next() {
            Some('D') => DIRECT_MESSAGE_LABEL.to_string(),
            Some('G') => GROUP_MESSAGE_LABEL.to_string(),
            _ => id.to_string(),
        }
    }

    /// Display name for a user id, falling back to the raw id.
    pub fn resolve_user(&self, id: &str) -> String {
        self.users
            .snapshot()
            .get(id)
            .map_or_else(|| id.to_string(), |u| u.name.clone())
    }

    /// Channel id for a channel name, if subscribed.
    pub fn find_channel(&self, name: &str) -> Option<String> {
        let name = name.trim_start_matches('#');
        self.channels
            .snapshot()
            .values()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
    }

    /// Whether an event from `channel_id` may be dispatched.
    ///
    /// Direct and group channels always pass. Public channels pass when no
    /// criteria are configured or the channel is subscribed.
    pub fn admits(&self, channel_id: &str) -> bool {
        if channel_id.starts_with('D') || channel_id.starts_with('G') {
            return true;
        }
        !self.has_criteria() || self.channels.contains(channel_id)
    }

    /// Names of subscribed channels, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .channels
            .snapshot()
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of known users, sorted.
    pub fn user_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .users
            .snapshot()
            .values()
            .map(|u| u.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn channels(&self) -> &Directory<ChannelInfo> {
        &self.channels
    }

    pub fn users(&self) -> &Directory<UserInfo> {
        &self.users
    }
}
