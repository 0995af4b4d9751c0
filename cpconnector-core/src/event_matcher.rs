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

//! Matching of events against subscription filters.

use cpconnector_client::model::EventSubscription;
use cpconnector_client::model::KeptnEvent;

/// Decides if an event satisfies a subscription.
///
/// The event type must equal the subscription's event type and for each of
/// project, stage and service the filter must be empty or contain the
/// event's value.
pub struct EventMatcher<'a> {
    subscription: &'a EventSubscription,
}

impl<'a> EventMatcher<'a> {
    /// Return a new instance for `subscription`.
    pub fn new(subscription: &'a EventSubscription) -> Self {
        Self { subscription }
    }

    /// Return `true` if `event` matches the subscription.
    pub fn matches(&self, event: &KeptnEvent) -> bool {
        if event.event_type() != self.subscription.event {
            return false;
        }
        let event_data = event.event_data();
        let filter = &self.subscription.filter;
        Self::allows(&filter.projects, &event_data.project)
            && Self::allows(&filter.stages, &event_data.stage)
            && Self::allows(&filter.services, &event_data.service)
    }

    /// Empty filters allow every value.
    fn allows(allowed: &[String], value: &str) -> bool {
        allowed.is_empty() || allowed.iter().any(|allowed| allowed == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpconnector_client::model::EventSubscriptionFilter;
    use serde_json::json;

    fn subscription(projects: &[&str], stages: &[&str], services: &[&str]) -> EventSubscription {
        let to_vec = |values: &[&str]| values.iter().map(|s| s.to_string()).collect();
        EventSubscription {
            id: "sub-1".to_owned(),
            event: "sh.keptn.event.echo.triggered".to_owned(),
            filter: EventSubscriptionFilter {
                projects: to_vec(projects),
                stages: to_vec(stages),
                services: to_vec(services),
            },
        }
    }

    fn event(event_type: &str, project: &str, stage: &str, service: &str) -> KeptnEvent {
        KeptnEvent::new(
            event_type,
            json!({"project": project, "stage": stage, "service": service}),
        )
    }

    #[test]
    fn test_empty_filter_matches_any_event_of_type() {
        let subscription = subscription(&[], &[], &[]);
        let matcher = EventMatcher::new(&subscription);
        for (project, stage, service) in [("p1", "dev", "s1"), ("", "", ""), ("x", "y", "z")] {
            assert!(matcher.matches(&event(
                "sh.keptn.event.echo.triggered",
                project,
                stage,
                service
            )));
        }
        // Events without any data still match
        assert!(matcher.matches(&KeptnEvent::new(
            "sh.keptn.event.echo.triggered",
            serde_json::Value::Null
        )));
    }

    #[test]
    fn test_other_event_type_never_matches() {
        let subscription = subscription(&[], &[], &[]);
        let matcher = EventMatcher::new(&subscription);
        assert!(!matcher.matches(&event("sh.keptn.event.echo.started", "p", "s", "svc")));
    }

    #[test]
    fn test_project_outside_filter_never_matches() {
        let subscription = subscription(&["p1", "p2"], &[], &[]);
        let matcher = EventMatcher::new(&subscription);
        for (stage, service) in [("dev", "s1"), ("prod", "s2"), ("", "")] {
            assert!(!matcher.matches(&event(
                "sh.keptn.event.echo.triggered",
                "p3",
                stage,
                service
            )));
        }
        assert!(matcher.matches(&event("sh.keptn.event.echo.triggered", "p2", "dev", "s1")));
    }

    #[test]
    fn test_all_dimensions_must_match() {
        let subscription = subscription(&["p1"], &["dev"], &["s1"]);
        let matcher = EventMatcher::new(&subscription);
        assert!(matcher.matches(&event("sh.keptn.event.echo.triggered", "p1", "dev", "s1")));
        assert!(!matcher.matches(&event("sh.keptn.event.echo.triggered", "p1", "prod", "s1")));
        assert!(!matcher.matches(&event("sh.keptn.event.echo.triggered", "p1", "dev", "s2")));
    }
}
