//! Event bus topic definitions

/// Event topics published by the deployment pipeline
pub struct Topics;

impl Topics {
    /// One output line of a running deployment
    pub const DEPLOY_LOG: &'static str = "deploy:log";

    /// Status transition of a deployment
    pub const DEPLOY_STATUS: &'static str = "deploy:status";

    /// Terminal outcome of a deployment
    pub const DEPLOY_COMPLETE: &'static str = "deploy:complete";

    /// All topics, in no particular order
    pub const ALL: [&'static str; 3] = [
        Self::DEPLOY_LOG,
        Self::DEPLOY_STATUS,
        Self::DEPLOY_COMPLETE,
    ];

    /// Match a topic against a filter; `deploy:*` matches every deploy topic
    pub fn matches(filter: &str, topic: &str) -> bool {
        match filter.strip_suffix('*') {
            Some(prefix) => topic.starts_with(prefix),
            None => filter == topic,
        }
    }

    /// Check if a string names a known topic
    pub fn is_known(topic: &str) -> bool {
        Self::ALL.contains(&topic)
    }

    /// A filter is valid when it names a known topic or ends in `*`
    pub fn is_valid_filter(filter: &str) -> bool {
        filter.ends_with('*') || Self::is_known(filter)
    }
}
