//! Translation between [`SessionRecord`] and stored items.
//!
//! A record is stored as
//!
//! ```text
//! { "id": {"S": "<session_id>"},
//!   "campaigns": {"M": { "<campaign_id>": {"N": "<count>"}, ... }} }
//! ```

use crate::{Error, MAX_COUNT, Result, SessionRecord};
use std::collections::BTreeMap;
use store::{AttributeValue, FieldPath, Item, KEY_ATTRIBUTE};

/// Attribute holding the campaign map.
pub const CAMPAIGNS_ATTRIBUTE: &str = "campaigns";

/// Path to one campaign's counter.
pub fn campaign_path(campaign_id: &str) -> Result<FieldPath> {
    FieldPath::new([CAMPAIGNS_ATTRIBUTE, campaign_id])
        .ok_or_else(|| Error::InvalidArgument(format!("campaign id {campaign_id:?}")))
}

pub fn encode(record: &SessionRecord) -> Item {
    let mut item = Item::new();
    item.insert(
        KEY_ATTRIBUTE.to_string(),
        AttributeValue::string(&record.session_id),
    );
    item.insert(
        CAMPAIGNS_ATTRIBUTE.to_string(),
        encode_campaigns(&record.campaigns),
    );
    item
}

/// Encode only the campaign map.
pub fn encode_campaigns(campaigns: &BTreeMap<String, u64>) -> AttributeValue {
    AttributeValue::M(
        campaigns
            .iter()
            .map(|(id, count)| (id.clone(), AttributeValue::N(count.to_string())))
            .collect(),
    )
}

/// Decode a stored item. A missing campaign map decodes as empty.
pub fn decode(item: &Item) -> Result<SessionRecord> {
    let session_id = item
        .get(KEY_ATTRIBUTE)
        .and_then(AttributeValue::as_str)
        .ok_or_else(|| {
            Error::CorruptRecord(format!("missing string attribute {KEY_ATTRIBUTE:?}"))
        })?;

    let campaigns = match item.get(CAMPAIGNS_ATTRIBUTE) {
        None => BTreeMap::new(),
        Some(value) => decode_campaigns(session_id, value)?,
    };

    Ok(SessionRecord {
        session_id: session_id.to_string(),
        campaigns,
    })
}

fn decode_campaigns(session_id: &str, value: &AttributeValue) -> Result<BTreeMap<String, u64>> {
    let map = value.as_map().ok_or_else(|| {
        Error::CorruptRecord(format!(
            "session {session_id:?}: {CAMPAIGNS_ATTRIBUTE:?} is {} rather than a map",
            value.type_name()
        ))
    })?;

    map.iter()
        .map(|(campaign_id, count)| {
            let decoded = count
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .filter(|n| *n <= MAX_COUNT);
            match decoded {
                Some(n) => Ok((campaign_id.clone(), n)),
                None => Err(Error::CorruptRecord(format!(
                    "session {session_id:?}: campaign {campaign_id:?} holds {count:?}, \
                     not a non-negative integer"
                ))),
            }
        })
        .collect()
}
