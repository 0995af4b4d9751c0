/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Record of event ids that have already been delivered.

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::SkipSet;
use std::collections::HashSet;

/// Delivered event ids per topic.
///
/// Used to suppress re-delivery of events that are returned by consecutive
/// overlapping polls.
#[derive(Default)]
pub struct EventIdCache {
    delivered: SkipMap<String, SkipSet<String>>,
}

impl EventIdCache {
    /// Return a new empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event_id` as delivered on `topic`.
    pub fn add(&self, topic: &str, event_id: &str) {
        self.delivered
            .get_or_insert_with(topic.to_owned(), SkipSet::new)
            .value()
            .insert(event_id.to_owned());
    }

    /// Return `true` if `event_id` was delivered on `topic`.
    pub fn contains(&self, topic: &str, event_id: &str) -> bool {
        self.delivered
            .get(topic)
            .is_some_and(|entry| entry.value().contains(event_id))
    }

    /// Forget `event_id` on `topic`.
    pub fn remove(&self, topic: &str, event_id: &str) {
        if let Some(entry) = self.delivered.get(topic) {
            entry.value().remove(event_id);
        }
    }

    /// Delivered event ids of `topic`.
    pub fn get(&self, topic: &str) -> Vec<String> {
        self.delivered
            .get(topic)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|event_id| event_id.value().to_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of delivered event ids of `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.delivered
            .get(topic)
            .map_or(0, |entry| entry.value().len())
    }

    /// Prune the ids of `topic` to those in `event_ids`.
    ///
    /// An empty `event_ids` clears the topic. When none of `event_ids` are
    /// known, the topic is left as is.
    pub fn keep(&self, topic: &str, event_ids: &[String]) {
        let Some(entry) = self.delivered.get(topic) else {
            return;
        };
        let delivered = entry.value();
        if event_ids.is_empty() {
            delivered.clear();
            return;
        }
        let keep = event_ids.iter().map(String::as_str).collect::<HashSet<_>>();
        if !delivered
            .iter()
            .any(|event_id| keep.contains(event_id.value().as_str()))
        {
            return;
        }
        for event_id in delivered.iter() {
            if !keep.contains(event_id.value().as_str()) {
                event_id.remove();
            }
        }
    }

    /// Drop all topics for which `predicate` returns `false`.
    pub fn retain_topics<F: Fn(&str) -> bool>(&self, predicate: F) {
        for entry in self.delivered.iter() {
            if !predicate(entry.key()) {
                entry.remove();
            }
        }
    }

    /// Topics with recorded event ids.
    pub fn topics(&self) -> Vec<String> {
        self.delivered
            .iter()
            .map(|entry| entry.key().to_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(event_ids: &[&str]) -> Vec<String> {
        event_ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_and_contains() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t1", "e2");
        cache.add("t2", "e3");
        assert!(cache.contains("t1", "e1"));
        assert!(cache.contains("t1", "e2"));
        assert!(!cache.contains("t1", "e3"));
        assert!(cache.contains("t2", "e3"));
        assert!(!cache.contains("t3", "e1"));
    }

    #[test]
    fn test_add_twice() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t1", "e2");
        cache.add("t1", "e2");
        assert_eq!(cache.len("t1"), 2);
        assert_eq!(cache.get("t1").len(), 2);
    }

    #[test]
    fn test_remove() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t1", "e2");
        cache.add("t1", "e3");
        cache.remove("t1", "e1");
        assert_eq!(cache.len("t1"), 2);
        assert!(cache.contains("t1", "e2"));
        assert!(cache.contains("t1", "e3"));
        cache.remove("t1", "e3");
        assert_eq!(cache.get("t1"), ids(&["e2"]));
        cache.remove("t9", "e3");
    }

    #[test]
    fn test_keep() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t1", "e2");
        cache.add("t2", "e3");
        cache.add("t2", "e4");
        cache.add("t2", "e5");
        cache.keep("t1", &ids(&["e2"]));
        cache.keep("t2", &ids(&["e3", "e5"]));
        assert_eq!(cache.len("t1"), 1);
        assert_eq!(cache.len("t2"), 2);
        assert!(!cache.contains("t1", "e1"));
        assert!(cache.contains("t1", "e2"));
        assert!(cache.contains("t2", "e3"));
        assert!(!cache.contains("t2", "e4"));
        assert!(cache.contains("t2", "e5"));
    }

    #[test]
    fn test_keep_edge_cases() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t1", "e2");
        cache.add("t1", "e3");
        // Unknown ids are ignored
        cache.keep("t1", &ids(&["e0"]));
        assert_eq!(cache.len("t1"), 3);
        // Duplicates are harmless
        cache.keep("t1", &ids(&["e2", "e2"]));
        assert_eq!(cache.len("t1"), 1);
        // Nothing to keep
        cache.keep("t1", &[]);
        assert_eq!(cache.len("t1"), 0);
    }

    #[test]
    fn test_retain_topics() {
        let cache = EventIdCache::new();
        cache.add("t1", "e1");
        cache.add("t2", "e2");
        cache.retain_topics(|topic| topic == "t2");
        assert_eq!(cache.topics(), ids(&["t2"]));
        assert!(!cache.contains("t1", "e1"));
    }
}
