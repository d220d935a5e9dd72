//! Queue message body → [`Job`] translation.
//!
//! Producers send the job as SQS-style message attributes serialized into
//! the body: a JSON array of objects, each mapping a field name to a
//! `{"StringValue": "..."}` wrapper. A bare top-level object of the same
//! shape is accepted too.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ParseError;
use crate::job::{InteractionRef, Job};
use crate::types::Seed;

/// Attribute wrapper key carrying the field value.
const STRING_VALUE_KEY: &str = "StringValue";

pub const FIELD_APPLICATION_ID: &str = "applicationId";
pub const FIELD_INTERACTION_TOKEN: &str = "interactionToken";
pub const FIELD_PROMPT: &str = "prompt";
pub const FIELD_NEGATIVE_PROMPT: &str = "negative_prompt";
/// Camel-case spelling some producers use for the negative prompt.
pub const FIELD_NEGATIVE_PROMPT_ALT: &str = "negativePrompt";
pub const FIELD_SEED: &str = "seed";
pub const FIELD_STEPS: &str = "steps";
pub const FIELD_SAMPLER: &str = "sampler";

/// Parse a raw message body into a [`Job`].
pub fn parse_job(raw_body: &str) -> Result<Job, ParseError> {
    let fields = flatten_attributes(raw_body)?;
    job_from_fields(fields)
}

/// Flatten the attribute bag into a plain `field -> string` map.
///
/// Later entries win when the same field appears twice.
pub fn flatten_attributes(raw_body: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let value: Value = serde_json::from_str(raw_body)?;

    let objects = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(ParseError::Shape(format!(
                "expected an array of attribute objects, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (index, item) in objects.into_iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(ParseError::Shape(format!(
                "element {index} is {}, expected an object",
                json_kind(&item)
            )));
        };
        for (name, wrapper) in map {
            let value = wrapper
                .get(STRING_VALUE_KEY)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ParseError::Shape(format!(
                        "field '{name}' is not a {{\"{STRING_VALUE_KEY}\": string}} wrapper"
                    ))
                })?;
            fields.insert(name, value.to_string());
        }
    }
    Ok(fields)
}

fn job_from_fields(mut fields: BTreeMap<String, String>) -> Result<Job, ParseError> {
    let prompt = fields
        .remove(FIELD_PROMPT)
        .ok_or(ParseError::MissingField(FIELD_PROMPT))?;
    let interaction = match (
        fields.remove(FIELD_APPLICATION_ID),
        fields.remove(FIELD_INTERACTION_TOKEN),
    ) {
        (Some(application_id), Some(interaction_token)) => Some(InteractionRef {
            application_id,
            interaction_token,
        }),
        (None, None) => None,
        (Some(_), None) => return Err(ParseError::MissingField(FIELD_INTERACTION_TOKEN)),
        (None, Some(_)) => return Err(ParseError::MissingField(FIELD_APPLICATION_ID)),
    };

    let negative_prompt = fields
        .remove(FIELD_NEGATIVE_PROMPT)
        .or_else(|| fields.remove(FIELD_NEGATIVE_PROMPT_ALT));

    let seed = fields
        .remove(FIELD_SEED)
        .map(|raw| parse_number::<Seed>(FIELD_SEED, raw))
        .transpose()?;
    let steps = fields
        .remove(FIELD_STEPS)
        .map(|raw| parse_number::<u32>(FIELD_STEPS, raw))
        .transpose()?;

    Ok(Job {
        interaction,
        prompt,
        negative_prompt,
        seed,
        steps,
        sampler: fields.remove(FIELD_SAMPLER),
    })
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: String) -> Result<T, ParseError> {
    raw.trim()
        .parse()
        .map_err(|_| ParseError::InvalidValue { field, value: raw })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
