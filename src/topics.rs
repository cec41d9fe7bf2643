//! Topic derivation.
//!
//! An event's identifying fields form a path `name`, `resourceType`,
//! `resourceId` (absent fields are skipped). Every prefix of that path is a
//! topic, shortest first. A filter suffix derived from resource state is
//! appended to each prefix as an additional topic:
//!
//! ```text
//! resource.change
//! resource.change.running
//! resource.change.container
//! resource.change.container.running
//! resource.change.container.1i42
//! resource.change.container.1i42.running
//! ```

use crate::types::ChangeEvent;

/// Joins topic segments.
pub const SEPARATOR: char = '.';

/// The only topic a keepalive is published on.
pub const PING_TOPIC: &str = "ping";

/// Reserved topic for frames that failed to decode.
pub const ERROR_TOPIC: &str = "error";

/// Filter suffix used while a resource is transitioning.
pub const TRANSITIONING_FILTER: &str = "transitioning";

/// Topic prefixes and filter suffixes derived from one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<String>,
    filters: Vec<String>,
}

impl TopicSet {
    /// Derive topics and filters from a non-ping event.
    pub fn derive(event: &ChangeEvent) -> Self {
        let mut topics = Vec::with_capacity(3);
        let mut current = event.name.clone();
        topics.push(current.clone());

        // resourceId only extends the path when resourceType is present too.
        if let Some(resource_type) = &event.resource_type {
            current = join(&current, resource_type);
            topics.push(current.clone());

            if let Some(resource_id) = &event.resource_id {
                current = join(&current, resource_id);
                topics.push(current);
            }
        }

        let filters = if event.is_transitioning() {
            vec![TRANSITIONING_FILTER.to_string()]
        } else if let Some(state) = event.state() {
            vec![state.to_string()]
        } else {
            Vec::new()
        };

        Self { topics, filters }
    }

    /// Topic prefixes, shortest first.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Filter suffixes (zero or one).
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Every topic name to dispatch on, in dispatch order.
    ///
    /// For each prefix: the prefix itself, then the prefix with each filter.
    pub fn expand(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.dispatch_count());
        for topic in &self.topics {
            out.push(topic.clone());
            for filter in &self.filters {
                out.push(join(topic, filter));
            }
        }
        out
    }

    /// Number of dispatches per listener set: `topics x (1 + filters)`.
    pub fn dispatch_count(&self) -> usize {
        self.topics.len() * (1 + self.filters.len())
    }
}

/// The ordered topic names an event is published on.
///
/// Pings bypass derivation and go to [`PING_TOPIC`] only.
pub fn emission_topics(event: &ChangeEvent) -> Vec<String> {
    if event.is_ping() {
        vec![PING_TOPIC.to_string()]
    } else {
        TopicSet::derive(event).expand()
    }
}

fn join(prefix: &str, segment: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1 + segment.len());
    out.push_str(prefix);
    out.push(SEPARATOR);
    out.push_str(segment);
    out
}
