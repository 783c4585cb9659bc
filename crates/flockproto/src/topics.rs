//! Topic naming scheme.
//!
//! Three topic families exist on the mesh: the shared `heartbeats` topic,
//! and per-function `<fn>_requests` / `<fn>_responses` pairs.

/// Shared fleet-wide heartbeat topic.
pub const HEARTBEATS: &str = "heartbeats";

const REQUESTS_SUFFIX: &str = "_requests";
const RESPONSES_SUFFIX: &str = "_responses";

/// Topic carrying invocation requests for `function`.
pub fn requests(function: &str) -> String {
    format!("{function}{REQUESTS_SUFFIX}")
}

/// Topic carrying invocation replies for `function`.
pub fn responses(function: &str) -> String {
    format!("{function}{RESPONSES_SUFFIX}")
}

/// Classification of an incoming topic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Heartbeats,
    Requests(&'a str),
    Responses(&'a str),
    Other(&'a str),
}

/// Classify a topic name back into its family.
pub fn classify(topic: &str) -> TopicKind<'_> {
    if topic == HEARTBEATS {
        TopicKind::Heartbeats
    } else if let Some(function) = topic.strip_suffix(REQUESTS_SUFFIX) {
        TopicKind::Requests(function)
    } else if let Some(function) = topic.strip_suffix(RESPONSES_SUFFIX) {
        TopicKind::Responses(function)
    } else {
        TopicKind::Other(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_topic_pair() {
        assert_eq!(requests("echo"), "echo_requests");
        assert_eq!(responses("echo"), "echo_responses");
    }

    #[test]
    fn classify_roundtrip() {
        assert_eq!(classify("heartbeats"), TopicKind::Heartbeats);
        assert_eq!(classify(&requests("sum")), TopicKind::Requests("sum"));
        assert_eq!(classify(&responses("sum")), TopicKind::Responses("sum"));
        assert_eq!(classify("control"), TopicKind::Other("control"));
    }
}
