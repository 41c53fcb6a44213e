#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Serialized shape of a successful work item.

use crate::gateway::{Content, Reply};
use crate::types::{ReactionCount, ReactionTally};
use serde_json::{json, Value};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const POSITIVE_REACTIONS: [&str; 8] = ["👍", "❤️", "🔥", "🎉", "🤩", "😁", "🥰", "👏"];
pub const NEGATIVE_REACTIONS: [&str; 8] = ["👎", "😱", "😢", "💩", "🤮", "🤯", "🤔", "🤬"];

/// Emoji arrive with and without the U+FE0F presentation selector.
fn same_emoji(left: &str, right: &str) -> bool {
    left.chars()
        .filter(|c| *c != '\u{fe0f}')
        .eq(right.chars().filter(|c| *c != '\u{fe0f}'))
}

#[must_use]
pub fn tally_reactions(counts: &[ReactionCount]) -> ReactionTally {
    let sum_matching = |bucket: &[&str]| -> u64 {
        counts
            .iter()
            .filter(|reaction| bucket.iter().any(|emoji| same_emoji(emoji, &reaction.emoji)))
            .map(|reaction| reaction.count)
            .sum()
    };

    ReactionTally {
        counts: counts.to_vec(),
        positive: sum_matching(&POSITIVE_REACTIONS),
        negative: sum_matching(&NEGATIVE_REACTIONS),
    }
}

#[must_use]
pub fn reply_to_json(reply: &Reply) -> Value {
    json!({
        "type": "comment",
        "id": reply.id,
        "user": {
            "tg_id": reply.author.tg_id,
            "name": reply.author.name,
            "first_name": reply.author.first_name,
            "last_name": reply.author.last_name.clone().unwrap_or_default(),
            "phone": reply.author.phone.clone().unwrap_or_default(),
        },
        "date": reply.date.format(DATE_FORMAT).to_string(),
        "text": reply.text,
        "reactions": reply.reactions,
    })
}

/// The post followed by its replies in retrieval order.
#[must_use]
pub fn content_to_json(content: &Content, replies: &[Reply]) -> Value {
    json!({
        "post": {
            "id": content.id,
            "channel": content.channel,
            "date": content.date.format(DATE_FORMAT).to_string(),
            "text": content.text,
            "views": content.views,
            "reactions": content.reactions,
        },
        "comments": replies.iter().map(reply_to_json).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::{content_to_json, tally_reactions};
    use crate::gateway::{Content, Reply, ReplyAuthor};
    use crate::types::ReactionCount;
    use chrono::{TimeZone, Utc};

    fn reaction(emoji: &str, count: u64) -> ReactionCount {
        ReactionCount {
            emoji: emoji.to_string(),
            count,
        }
    }

    #[test]
    fn reactions_are_bucketed_into_positive_and_negative_sums() {
        let tally = tally_reactions(&[
            reaction("👍", 10),
            reaction("❤", 3),
            reaction("🤬", 2),
            reaction("🐳", 50),
        ]);
        assert_eq!(tally.positive, 13);
        assert_eq!(tally.negative, 2);
        assert_eq!(tally.counts.len(), 4);
    }

    #[test]
    fn no_reactions_gives_zero_tally() {
        let tally = tally_reactions(&[]);
        assert_eq!((tally.positive, tally.negative), (0, 0));
    }

    #[test]
    fn comments_use_flat_date_format_and_empty_strings_for_missing_names() {
        let date = Utc
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .single()
            .unwrap_or_default();
        let content = Content {
            id: 42,
            channel: "news".to_string(),
            date,
            text: "post".to_string(),
            views: None,
            reactions: Vec::new(),
        };
        let reply = Reply {
            id: 1,
            author: ReplyAuthor {
                tg_id: Some(9),
                ..ReplyAuthor::default()
            },
            date,
            text: "first".to_string(),
            reactions: Vec::new(),
        };

        let value = content_to_json(&content, &[reply]);

        assert_eq!(value["post"]["id"], 42);
        assert_eq!(value["comments"][0]["type"], "comment");
        assert_eq!(value["comments"][0]["date"], "2024-05-06 07:08:09");
        assert_eq!(value["comments"][0]["user"]["last_name"], "");
        assert_eq!(value["comments"][0]["user"]["tg_id"], 9);
    }
}
