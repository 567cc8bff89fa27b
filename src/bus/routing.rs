//! Topic to routing-key translation.
//!
//! Publications are routed with `<prefix>.<topic>[.<channel>][.<subtopic>]`.
//! Subscriptions bind either the exact key or, for hierarchical bindings, the
//! key followed by the `#` wildcard so every descendant topic matches too.

use crate::message::Message;

use super::{BusError, Result};

/// Default namespace prefix for all routing keys.
pub const DEFAULT_PREFIX: &str = "channels";

/// Word separator in topics and routing keys.
const SEPARATOR: char = '.';

/// Matches exactly one word.
const SINGLE_WILDCARD: &str = "*";

/// Matches zero or more words.
const MULTI_WILDCARD: &str = "#";

/// NATS-style alias for `#`, accepted in subscription topics.
const MULTI_WILDCARD_ALIAS: &str = ">";

/// How a subscription's queue is bound to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// Only the topic itself.
    Exact,
    /// The topic and all of its descendants.
    Hierarchical,
}

impl BindingMode {
    /// Topics naming a sub-topic bind exactly; bare topics bind hierarchically.
    pub fn for_topic(topic: &str) -> Self {
        if normalise(topic).contains(SEPARATOR) {
            BindingMode::Exact
        } else {
            BindingMode::Hierarchical
        }
    }
}

/// Routing-key builder for a namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    prefix: String,
}

impl Default for Routing {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Routing {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: normalise(prefix.as_ref()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Routing key for publishing `message` under `topic`.
    ///
    /// Empty segments are omitted, so an empty topic publishes at the root of
    /// the prefix.
    pub fn routing_key(&self, topic: &str, message: &Message) -> Result<String> {
        let key = join([
            self.prefix.clone(),
            normalise(topic),
            normalise(&message.channel),
            normalise(&message.subtopic),
        ]);

        if key.is_empty() {
            return Err(BusError::EmptyTopic);
        }
        Ok(key)
    }

    /// Binding pattern for a subscription on `topic`.
    pub fn binding_pattern(&self, topic: &str, mode: BindingMode) -> String {
        let pattern = join([self.prefix.clone(), canonical_topic(topic)]);

        match mode {
            BindingMode::Exact => pattern,
            BindingMode::Hierarchical if pattern.is_empty() => MULTI_WILDCARD.to_string(),
            BindingMode::Hierarchical
                if pattern.rsplit(SEPARATOR).next() == Some(MULTI_WILDCARD) =>
            {
                pattern
            }
            BindingMode::Hierarchical => format!("{}.{}", pattern, MULTI_WILDCARD),
        }
    }
}

/// Check a routing key against a binding pattern using topic-exchange rules.
///
/// - `*` matches exactly one word
/// - `#` matches zero or more words
/// - any other word matches itself
///
/// Runs in O(pattern words x key words) regardless of how many wildcards the
/// pattern holds.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let mut pattern: Vec<&str> = pattern.split(SEPARATOR).collect();
    pattern.dedup_by(|a, b| *a == MULTI_WILDCARD && *b == MULTI_WILDCARD);

    let key: Vec<&str> = if key.is_empty() {
        Vec::new()
    } else {
        key.split(SEPARATOR).collect()
    };

    // reachable[j]: the pattern words seen so far match key[..j]
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;

    for word in pattern {
        let mut next = vec![false; key.len() + 1];
        match word {
            MULTI_WILDCARD => {
                let mut seen = false;
                for (slot, &prev) in next.iter_mut().zip(&reachable) {
                    seen |= prev;
                    *slot = seen;
                }
            }
            SINGLE_WILDCARD => {
                for (slot, &prev) in next[1..].iter_mut().zip(&reachable) {
                    *slot = prev;
                }
            }
            literal => {
                for ((slot, &prev), &actual) in next[1..].iter_mut().zip(&reachable).zip(&key) {
                    *slot = prev && actual == literal;
                }
            }
        }

        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    reachable[key.len()]
}

/// Canonical form of a subscription topic.
///
/// `/` separators become dots, empty words are dropped and `>` becomes `#`,
/// so every spelling of the same binding maps to one string.
pub fn canonical_topic(topic: &str) -> String {
    normalise(topic)
        .split(SEPARATOR)
        .map(|word| {
            if word == MULTI_WILDCARD_ALIAS {
                MULTI_WILDCARD
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Collapse `/` separators (MQTT/HTTP style) into dots and drop empty words.
fn normalise(topic: &str) -> String {
    topic
        .split(|c: char| c == SEPARATOR || c == '/')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

fn join<const N: usize>(segments: [String; N]) -> String {
    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: &str, subtopic: &str) -> Message {
        Message {
            channel: channel.to_string(),
            subtopic: subtopic.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_routing_key_topic_only() {
        let routing = Routing::default();
        let key = routing.routing_key("orders", &message("", "")).unwrap();
        assert_eq!(key, "channels.orders");
    }

    #[test]
    fn test_routing_key_with_channel_and_subtopic() {
        let routing = Routing::default();
        let key = routing
            .routing_key("orders", &message("eu", "returns"))
            .unwrap();
        assert_eq!(key, "channels.orders.eu.returns");
    }

    #[test]
    fn test_routing_key_omits_empty_segments() {
        let routing = Routing::default();
        assert_eq!(
            routing.routing_key("orders", &message("", "returns")).unwrap(),
            "channels.orders.returns"
        );
        assert_eq!(
            routing.routing_key("", &message("", "")).unwrap(),
            "channels"
        );
    }

    #[test]
    fn test_routing_key_normalises_slashes() {
        let routing = Routing::default();
        let key = routing
            .routing_key("orders", &message("", "/returns/late/"))
            .unwrap();
        assert_eq!(key, "channels.orders.returns.late");
    }

    #[test]
    fn test_routing_key_everything_empty() {
        let routing = Routing::new("");
        let result = routing.routing_key("", &message("", ""));
        assert!(matches!(result, Err(BusError::EmptyTopic)));
    }

    #[test]
    fn test_binding_mode_for_topic() {
        assert_eq!(BindingMode::for_topic("orders"), BindingMode::Hierarchical);
        assert_eq!(BindingMode::for_topic("orders.returns"), BindingMode::Exact);
        assert_eq!(BindingMode::for_topic("orders/returns"), BindingMode::Exact);
    }

    #[test]
    fn test_binding_pattern() {
        let routing = Routing::default();
        assert_eq!(
            routing.binding_pattern("orders", BindingMode::Hierarchical),
            "channels.orders.#"
        );
        assert_eq!(
            routing.binding_pattern("orders.returns", BindingMode::Exact),
            "channels.orders.returns"
        );
    }

    #[test]
    fn test_binding_pattern_wildcards() {
        let routing = Routing::default();
        assert_eq!(
            routing.binding_pattern(">", BindingMode::Hierarchical),
            "channels.#"
        );
        assert_eq!(
            routing.binding_pattern("orders.>", BindingMode::Exact),
            "channels.orders.#"
        );
        assert_eq!(
            routing.binding_pattern("orders.*", BindingMode::Exact),
            "channels.orders.*"
        );
        assert_eq!(Routing::new("").binding_pattern("", BindingMode::Hierarchical), "#");
    }

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("channels.orders", "channels.orders"));
        assert!(!topic_matches("channels.orders", "channels.orders.returns"));
        assert!(!topic_matches("channels.orders", "channels.inventory"));
    }

    #[test]
    fn test_topic_matches_multi_wildcard() {
        assert!(topic_matches("channels.orders.#", "channels.orders"));
        assert!(topic_matches("channels.orders.#", "channels.orders.returns"));
        assert!(topic_matches("channels.orders.#", "channels.orders.returns.late"));
        assert!(!topic_matches("channels.orders.#", "channels.ordersextra"));
        assert!(!topic_matches("channels.orders.#", "channels.inventory.orders"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("channels.#.late", "channels.orders.returns.late"));
    }

    #[test]
    fn test_topic_matches_single_wildcard() {
        assert!(topic_matches("channels.*.returns", "channels.orders.returns"));
        assert!(!topic_matches("channels.*.returns", "channels.returns"));
        assert!(!topic_matches("channels.*", "channels.orders.returns"));
    }

    #[test]
    fn test_topic_matches_many_wildcards() {
        let pattern = format!("channels.{}z", "#.".repeat(40));
        let miss = format!("channels.{}", vec!["w"; 200].join("."));
        let hit = format!("{}.z", miss);

        let start = std::time::Instant::now();
        assert!(!topic_matches(&pattern, &miss));
        assert!(topic_matches(&pattern, &hit));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_topic_matches_mixed_wildcards() {
        assert!(topic_matches("channels.#.*.late", "channels.orders.late"));
        assert!(!topic_matches("channels.#.*.late", "channels.late"));
        assert!(topic_matches("channels.#.#", "channels"));
        assert!(!topic_matches("channels.orders", ""));
    }

    #[test]
    fn test_canonical_topic() {
        assert_eq!(canonical_topic("orders/returns"), "orders.returns");
        assert_eq!(canonical_topic("/orders//returns/"), "orders.returns");
        assert_eq!(canonical_topic("orders.>"), "orders.#");
        assert_eq!(canonical_topic("///"), "");
    }
}
