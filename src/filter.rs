//! Per-channel delivery filters.

use crate::core::{DeliveryFilter, FilterOperator, Message, MessagePriority};
use serde_json::Value;

fn field_value(message: &Message, field: &str) -> Option<String> {
    match field {
        "priority" => Some(message.priority.as_str().to_string()),
        "type" => Some(message.message_type.clone()),
        "title" => Some(message.title.clone()),
        "content" => Some(message.content.clone()),
        _ => {
            let key = field.strip_prefix("data.")?;
            message.data.get(key).map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
    }
}

impl DeliveryFilter {
    /// Whether `message` satisfies this filter. A missing field only
    /// satisfies `ne` and `not_in`.
    pub fn accepts(&self, message: &Message) -> bool {
        let Some(actual) = field_value(message, &self.field) else {
            return matches!(self.operator, FilterOperator::Ne | FilterOperator::NotIn);
        };
        let first = self.values.first().map(String::as_str).unwrap_or_default();
        match self.operator {
            FilterOperator::Eq => actual == first,
            FilterOperator::Ne => actual != first,
            FilterOperator::Contains => actual.contains(first),
            FilterOperator::In => self.values.iter().any(|v| *v == actual),
            FilterOperator::NotIn => !self.values.iter().any(|v| *v == actual),
            FilterOperator::AtLeast => match first.parse::<MessagePriority>() {
                Ok(threshold) => message.priority.severity() >= threshold.severity(),
                Err(_) => false,
            },
        }
    }
}

/// Returns the first filter `message` fails, if any.
pub fn rejecting_filter<'a>(filters: &'a [DeliveryFilter], message: &Message) -> Option<&'a DeliveryFilter> {
    filters.iter().find(|filter| !filter.accepts(message))
}
