use crate::types::{Channel, Event};

/// Severity that escalates a notification to SMS.
pub const HIGH_SEVERITY: &str = "high";

/// Pick the delivery channel for an event.
///
/// `"high"` severity goes out as SMS; every other value, including empty or
/// unrecognized ones, falls back to email. Matching is exact.
pub fn determine_channel(event: &Event) -> Channel {
    channel_for_severity(&event.severity)
}

pub(crate) fn channel_for_severity(severity: &str) -> Channel {
    if severity == HIGH_SEVERITY {
        Channel::Sms
    } else {
        Channel::Email
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(severity: &str) -> Event {
        Event::new("u1", "alert", "msg", "someone").with_severity(severity)
    }

    #[test]
    fn high_severity_routes_to_sms() {
        assert_eq!(determine_channel(&event_with("high")), Channel::Sms);
    }

    #[test]
    fn everything_else_routes_to_email() {
        for severity in ["low", "medium", "", "HIGH", "High", " high", "critical"] {
            assert_eq!(
                determine_channel(&event_with(severity)),
                Channel::Email,
                "severity {severity:?}"
            );
        }
    }

    #[test]
    fn routing_is_deterministic() {
        let event = event_with("high");
        let first = determine_channel(&event);
        for _ in 0..10 {
            assert_eq!(determine_channel(&event), first);
        }
    }
}
