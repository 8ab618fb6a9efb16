/// Extraction of shouts from the poll markup
use crate::error::{RelayError, Result};
use crate::shout::client::SHOUT_ID_PREFIX;
use scraper::{Html, Selector};

/// A shout as found in the markup, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawShout {
    /// Element id, normally `shoutid-<n>`
    pub id: String,
    pub nickname: String,
    pub message: String,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| RelayError::Extraction(format!("Bad selector {}: {:?}", css, e)))
}

/// Pull `(id, nickname, message)` triples out of a shout fragment, in document order.
///
/// The message body is the element's own text; text inside child elements
/// (nickname, timestamps, buttons) is not part of it.
pub fn extract_shouts(html: &str) -> Result<Vec<RawShout>> {
    let fragment = Html::parse_fragment(html);
    let shout_sel = selector(".shout-msg")?;
    let nick_sel = selector("strong")?;

    let shouts = fragment
        .select(&shout_sel)
        .map(|el| {
            let id = el.value().attr("id").unwrap_or_default().to_string();
            let nickname = el
                .select(&nick_sel)
                .flat_map(|n| n.text())
                .collect::<String>()
                .trim()
                .to_string();
            let message = el
                .children()
                .filter_map(|node| node.value().as_text())
                .map(|text| &*text.text)
                .collect::<String>()
                .trim()
                .to_string();

            RawShout { id, nickname, message }
        })
        .collect();

    Ok(shouts)
}

/// Numeric part of a `shoutid-<n>` identifier
pub fn parse_shout_id(id: &str) -> Option<u64> {
    id.strip_prefix(SHOUT_ID_PREFIX).unwrap_or(id).parse().ok()
}

/// Nicknames like `(system)` mark shoutbox annotations, not people
pub fn is_annotation(nickname: &str) -> bool {
    nickname
        .strip_prefix('(')
        .is_some_and(|rest| rest.contains(')'))
}
