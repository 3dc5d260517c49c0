//! Colon-delimited wire grammar shared by all traffic on the notification
//! channel, parsed into a tagged variant at the boundary.
//!
//! ```text
//! ping
//! overlimit:<hr|month>:<organizationId>
//! <organizationId>:<projectId>:<stackId>:<isHidden>:<isFixed>:<isNotFound>
//! ```
//!
//! Anything that fails to parse into one of the variants is dropped by the
//! listener.

/// Which quota a limit breach refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Hourly,
    Monthly,
}

/// One message on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// Liveness probe consumed by the subscription loop itself.
    Ping,
    /// An organization went over its hourly or monthly quota.
    OverLimit {
        scope: LimitScope,
        organization_id: String,
    },
    /// A new or updated error occurrence on a stack.
    StackEvent {
        organization_id: String,
        project_id: String,
        stack_id: String,
        is_hidden: bool,
        is_fixed: bool,
        is_not_found: bool,
    },
}

fn parse_flag(token: &str) -> bool {
    token.eq_ignore_ascii_case("true")
}

impl BusMessage {
    /// Parse a raw channel message. Returns `None` for anything malformed
    /// (wrong token count, unknown limit scope).
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split(':').collect();

        match parts.as_slice() {
            ["ping"] => Some(Self::Ping),
            ["overlimit", scope, organization_id] => {
                let scope = match *scope {
                    "hr" => LimitScope::Hourly,
                    "month" => LimitScope::Monthly,
                    _ => return None,
                };
                Some(Self::OverLimit {
                    scope,
                    organization_id: (*organization_id).to_string(),
                })
            }
            [organization_id, project_id, stack_id, hidden, fixed, not_found] => {
                Some(Self::StackEvent {
                    organization_id: (*organization_id).to_string(),
                    project_id: (*project_id).to_string(),
                    stack_id: (*stack_id).to_string(),
                    is_hidden: parse_flag(hidden),
                    is_fixed: parse_flag(fixed),
                    is_not_found: parse_flag(not_found),
                })
            }
            _ => None,
        }
    }

    /// Encode back to the wire grammar.
    pub fn encode(&self) -> String {
        match self {
            Self::Ping => "ping".to_string(),
            Self::OverLimit {
                scope,
                organization_id,
            } => {
                let scope = match scope {
                    LimitScope::Hourly => "hr",
                    LimitScope::Monthly => "month",
                };
                format!("overlimit:{scope}:{organization_id}")
            }
            Self::StackEvent {
                organization_id,
                project_id,
                stack_id,
                is_hidden,
                is_fixed,
                is_not_found,
            } => format!(
                "{organization_id}:{project_id}:{stack_id}:{is_hidden}:{is_fixed}:{is_not_found}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trip() {
        assert_eq!(BusMessage::parse("ping"), Some(BusMessage::Ping));
        assert_eq!(BusMessage::Ping.encode(), "ping");
    }

    #[test]
    fn overlimit_scopes() {
        assert_eq!(
            BusMessage::parse("overlimit:hr:org1"),
            Some(BusMessage::OverLimit {
                scope: LimitScope::Hourly,
                organization_id: "org1".to_string()
            })
        );
        assert_eq!(
            BusMessage::parse("overlimit:month:org1"),
            Some(BusMessage::OverLimit {
                scope: LimitScope::Monthly,
                organization_id: "org1".to_string()
            })
        );
        assert_eq!(BusMessage::parse("overlimit:weekly:org1"), None);
        assert_eq!(BusMessage::parse("overlimit:hr"), None);
    }

    #[test]
    fn stack_event_round_trip() {
        let msg = BusMessage::StackEvent {
            organization_id: "o1".to_string(),
            project_id: "p1".to_string(),
            stack_id: "s1".to_string(),
            is_hidden: false,
            is_fixed: true,
            is_not_found: false,
        };
        assert_eq!(BusMessage::parse(&msg.encode()), Some(msg));
    }

    #[test]
    fn malformed_token_counts_are_dropped() {
        assert_eq!(BusMessage::parse(""), None);
        assert_eq!(BusMessage::parse("o1:p1:s1"), None);
        assert_eq!(BusMessage::parse("o1:p1:s1:true:false:true:extra"), None);
    }

    #[test]
    fn unparsable_flags_default_to_false() {
        let msg = BusMessage::parse("o1:p1:s1:TRUE:nope:1").unwrap();
        match msg {
            BusMessage::StackEvent {
                is_hidden,
                is_fixed,
                is_not_found,
                ..
            } => {
                assert!(is_hidden);
                assert!(!is_fixed);
                assert!(!is_not_found);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
