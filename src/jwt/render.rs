/// Human-readable rendering of a token for `?decode=true`
use crate::jwt::{codec, JwtError};
use chrono::{TimeZone, Utc};
use serde_json::Value;

const TIME_FIELDS: [&str; 3] = ["iat", "exp", "nbf"];

/// Render a Unix timestamp as `YYYY-MM-DD HH:MM:SS UTC`; 0 renders empty
pub fn unix_to_date(secs: i64) -> String {
    if secs == 0 {
        return String::new();
    }
    match Utc.timestamp_opt(secs, 0).single() {
        Some(when) => when.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => secs.to_string(),
    }
}

/// Expand `raw` into pretty-printed header and claims
///
/// Timestamps are rendered as dates and embedded activation tokens are
/// expanded in place. Activations that fail to decode are left as-is.
pub fn expand(raw: &str) -> Result<String, JwtError> {
    let token = codec::decode::<Value>(raw)?;

    let header = serde_json::to_value(&token.header)?;
    let mut claims = serde_json::to_value(&token.claims)?;
    readable_claims(&mut claims);

    Ok(format!(
        "{}\n{}\n",
        serde_json::to_string_pretty(&header)?,
        serde_json::to_string_pretty(&claims)?
    ))
}

fn readable_claims(claims: &mut Value) {
    let Some(obj) = claims.as_object_mut() else {
        return;
    };

    if obj.get("nats").is_some_and(Value::is_null) {
        obj.remove("nats");
    }

    for field in TIME_FIELDS {
        if let Some(secs) = obj.get(field).and_then(Value::as_i64) {
            obj.insert(field.to_string(), Value::String(unix_to_date(secs)));
        }
    }

    let imports = obj
        .get_mut("nats")
        .and_then(|nats| nats.get_mut("imports"))
        .and_then(Value::as_array_mut);

    for import in imports.into_iter().flatten() {
        let Some(token) = import.get("token").and_then(Value::as_str) else {
            continue;
        };
        if let Ok(activation) = codec::decode::<Value>(token) {
            if let Ok(mut expanded) = serde_json::to_value(&activation.claims) {
                readable_claims(&mut expanded);
                import["token"] = expanded;
            }
        }
    }
}
