use serde::{Deserialize, Serialize};

/// Marker preceding every gift record in a model reply.
pub const BLOCK_DELIMITER: &str = "GIFT ";

pub const NAME_LABEL: &str = "NAME:";
pub const PRICE_LABEL: &str = "PRICE:";
pub const DESCRIPTION_LABEL: &str = "DESCRIPTION:";
pub const OCCASION_LABEL: &str = "OCCASION:";
pub const CATEGORY_LABEL: &str = "CATEGORY:";

/// All field labels; any of them terminates the value of another.
pub const LABELS: [&str; 5] = [
    NAME_LABEL,
    PRICE_LABEL,
    DESCRIPTION_LABEL,
    OCCASION_LABEL,
    CATEGORY_LABEL,
];

const DEFAULT_PRICE: &str = "Price varies";
const DEFAULT_OCCASION: &str = "Any occasion";
const DEFAULT_CATEGORY: &str = "General";

/// A single gift idea extracted from a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftSuggestion {
    pub name: String,
    pub price: String,
    pub description: String,
    pub occasion: String,
    pub category: String,
}

/// Split a raw model reply into gift suggestions, in the order the model
/// emitted them. Blocks that lack a name or a description are skipped.
pub fn parse_suggestions(response: &str) -> Vec<GiftSuggestion> {
    response
        .split(BLOCK_DELIMITER)
        .filter(|block| !block.trim().is_empty())
        .filter_map(parse_block)
        .collect()
}

/// Parse one block into a suggestion, or `None` if it is unusable.
pub fn parse_block(block: &str) -> Option<GiftSuggestion> {
    let name = non_empty(extract_field(block, NAME_LABEL))?;
    let description = non_empty(extract_field(block, DESCRIPTION_LABEL))?;

    Some(GiftSuggestion {
        name,
        price: non_empty(extract_field(block, PRICE_LABEL))
            .unwrap_or_else(|| DEFAULT_PRICE.to_string()),
        description,
        occasion: non_empty(extract_field(block, OCCASION_LABEL))
            .unwrap_or_else(|| DEFAULT_OCCASION.to_string()),
        category: non_empty(extract_field(block, CATEGORY_LABEL))
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
    })
}

/// Value of `label` within `block`: everything after its first occurrence up
/// to the nearest line break or label, whichever comes first.
pub fn extract_field(block: &str, label: &str) -> String {
    let Some(pos) = block.find(label) else {
        return String::new();
    };
    let rest = &block[pos + label.len()..];

    let end = std::iter::once(rest.find('\n'))
        .chain(LABELS.iter().map(|l| rest.find(l)))
        .flatten()
        .min()
        .unwrap_or(rest.len());

    // Emphasis markers are stripped before trimming so that "**NAME:** x"
    // does not leave a leading space behind.
    rest[..end].replace('*', "").trim().to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
