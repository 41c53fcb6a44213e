use serde::{Deserialize, Serialize};
use url::Url;

/// Parsed form of a content URL such as `https://t.me/<channel>/<message>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocator {
    pub url: String,
    pub channel: String,
    /// `None` addresses the most recent post of the channel.
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// Private `c/` links cannot be resolved by a member-less session.
    Restricted(String),
    Malformed(String),
}

impl ContentLocator {
    /// # Errors
    /// Returns `Restricted` for private-channel links and `Malformed` when no
    /// channel can be extracted.
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let trimmed = raw.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| LocatorError::Malformed(format!("{trimmed}: {e}")))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|parts| parts.filter(|part| !part.is_empty()).collect())
            .unwrap_or_default();

        // `t.me/s/<channel>` is the web preview of the same channel.
        let skip = usize::from(segments.len() > 1 && segments.first() == Some(&"s"));
        let segments = &segments[skip..];

        if segments.first() == Some(&"c") {
            return Err(LocatorError::Restricted(trimmed.to_string()));
        }

        match segments {
            [channel] => Ok(Self {
                url: trimmed.to_string(),
                channel: (*channel).to_string(),
                message_id: None,
            }),
            [.., channel, message] => message
                .parse::<i64>()
                .map(|id| Self {
                    url: trimmed.to_string(),
                    channel: (*channel).to_string(),
                    message_id: Some(id),
                })
                .map_err(|_| {
                    LocatorError::Malformed(format!("{trimmed}: '{message}' is not a message id"))
                }),
            [] => Err(LocatorError::Malformed(format!(
                "{trimmed}: no channel in path"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentLocator, LocatorError};

    #[test]
    fn given_post_url_when_parsed_then_channel_and_message_are_extracted() {
        let locator = ContentLocator::parse("https://t.me/durov/142").unwrap_or_else(|e| {
            unreachable!("parse failed: {e:?}");
        });
        assert_eq!(locator.channel, "durov");
        assert_eq!(locator.message_id, Some(142));
    }

    #[test]
    fn given_url_without_scheme_when_parsed_then_https_is_assumed() {
        let locator = ContentLocator::parse("t.me/news/7");
        assert!(matches!(locator, Ok(ContentLocator { message_id: Some(7), .. })));
    }

    #[test]
    fn given_private_link_when_parsed_then_it_is_restricted() {
        assert!(matches!(
            ContentLocator::parse("https://t.me/c/1234567/89"),
            Err(LocatorError::Restricted(_))
        ));
    }

    #[test]
    fn given_channel_only_url_when_parsed_then_latest_post_is_addressed() {
        let locator = ContentLocator::parse("https://t.me/s/news");
        assert!(matches!(
            locator,
            Ok(ContentLocator { ref channel, message_id: None, .. }) if channel == "news"
        ));
    }

    #[test]
    fn given_non_numeric_message_when_parsed_then_it_is_malformed() {
        assert!(matches!(
            ContentLocator::parse("https://t.me/news/latest"),
            Err(LocatorError::Malformed(_))
        ));
        assert!(matches!(
            ContentLocator::parse("https://t.me/"),
            Err(LocatorError::Malformed(_))
        ));
    }
}
