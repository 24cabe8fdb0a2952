use crate::utils::Error;

/// Longest topic or subscription the broker accepts, in bytes.
pub const MAX_TOPIC_LEN: usize = 250;

/// Checks a topic used as a publish destination.
pub fn validate_topic(topic: &str) -> Result<(), Error> {
    if topic.is_empty() {
        return Err(Error::InvalidArgument("topic must not be empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidArgument(format!(
            "topic is {} bytes long, the limit is {MAX_TOPIC_LEN}",
            topic.len()
        )));
    }
    Ok(())
}

/// Checks a topic subscription attached to a durable endpoint.
///
/// A `>` level is only allowed as the last level.
pub fn validate_subscription(subscription: &str) -> Result<(), Error> {
    validate_topic(subscription)?;
    let levels: Vec<&str> = subscription.split('/').collect();
    if let Some(position) = levels.iter().position(|level| *level == ">") {
        if position + 1 != levels.len() {
            return Err(Error::InvalidArgument(format!(
                "'>' must be the last level of subscription \"{subscription}\""
            )));
        }
    }
    Ok(())
}

/// Returns true when `topic` is attracted by `subscription`.
///
/// Levels are separated by `/`. A level of `*` matches exactly one level, a
/// level ending in `*` matches any level starting with the preceding prefix,
/// and a trailing `>` matches one or more remaining levels.
pub fn matches(subscription: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    let mut patterns = subscription.split('/').peekable();

    while let Some(pattern) = patterns.next() {
        if pattern == ">" && patterns.peek().is_none() {
            return topic_levels.next().is_some();
        }
        match topic_levels.next() {
            Some(level) if level_matches(pattern, level) => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

fn level_matches(pattern: &str, level: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => level.starts_with(prefix),
        None => pattern == level,
    }
}
