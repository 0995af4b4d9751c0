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

//! Time related utility functions.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;

/// Format a timestamp as RFC 3339 UTC with millisecond precision, e.g.
/// `2022-03-01T10:11:12.345Z`.
pub fn format_rfc3339_millis(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time formatted with [format_rfc3339_millis].
pub fn now_rfc3339_millis() -> String {
    format_rfc3339_millis(&Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_rfc3339_millis() {
        let timestamp = Utc.with_ymd_and_hms(2022, 3, 1, 10, 11, 12).unwrap()
            + chrono::Duration::milliseconds(345);
        assert_eq!(format_rfc3339_millis(&timestamp), "2022-03-01T10:11:12.345Z");
        assert!(now_rfc3339_millis().ends_with('Z'));
    }
}
