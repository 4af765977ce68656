//! Metric Property Wildcards
//!
//! Abstracts device-specific UUID segments out of metric property paths.
//! Each template collects the concrete values it stands for; across repeated
//! discovery runs of the same resource the value sets only grow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Template standing for a system UUID segment
pub const SYSTEM_TEMPLATE: &str = "SystemID";

/// Template standing for a chassis UUID segment
pub const CHASSIS_TEMPLATE: &str = "ChassisID";

/// One named template and the concrete values seen for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Wildcard {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Wildcard {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }

    fn record(&mut self, value: &str) {
        if !self.values.iter().any(|v| v == value) {
            self.values.push(value.to_string());
        }
    }
}

/// Replace the UUID segment following `/<collection>/` with `{template}`.
///
/// Only that segment is rewritten. Returns the rewritten property and the
/// UUID, ignoring any `#` fragment.
pub fn template_property(property: &str, collection: &str, template: &str) -> Option<(String, String)> {
    let marker = format!("/{}/", collection);
    let start = property.find(&marker)? + marker.len();
    let end = property[start..]
        .find(|c: char| c == '/' || c == '#')
        .map_or(property.len(), |offset| start + offset);
    let uuid = &property[start..end];
    if uuid.is_empty() {
        return None;
    }
    let rewritten = format!("{}{{{}}}{}", &property[..start], template, &property[end..]);
    Some((rewritten, uuid.to_string()))
}

/// Templates and properties carried over from a previously stored document
fn prior_state(prior: Option<&Value>) -> (Vec<Wildcard>, Vec<String>) {
    let mut templates = vec![Wildcard::empty(SYSTEM_TEMPLATE), Wildcard::empty(CHASSIS_TEMPLATE)];
    let mut properties = Vec::new();
    let Some(prior) = prior else {
        return (templates, properties);
    };

    let stored: Vec<Wildcard> = prior
        .get("Wildcards")
        .cloned()
        .and_then(|w| serde_json::from_value(w).ok())
        .unwrap_or_default();
    for wildcard in stored {
        if let Some(template) = templates.iter_mut().find(|t| t.name == wildcard.name) {
            for value in &wildcard.values {
                template.record(value);
            }
        }
    }
    properties.extend(string_array(prior, "MetricProperties"));
    (templates, properties)
}

fn string_array(document: &Value, field: &str) -> Vec<String> {
    document
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Rewrite a metric document's properties through the wildcard templates.
///
/// `prior` is the previously stored version of the same resource. The
/// templates and merged property list are written back only when at least
/// one template holds a value; returns whether they were.
pub fn apply_wildcards(document: &mut Value, prior: Option<&Value>) -> bool {
    let (mut templates, mut recorded) = prior_state(prior);

    for property in string_array(document, "MetricProperties") {
        let mut property = property;
        if property.contains("/Systems/") {
            if let Some((rewritten, uuid)) = template_property(&property, "Systems", SYSTEM_TEMPLATE) {
                templates[0].record(&uuid);
                property = rewritten;
            }
        } else if property.contains("/Chassis/") {
            if let Some((rewritten, uuid)) = template_property(&property, "Chassis", CHASSIS_TEMPLATE) {
                templates[1].record(&uuid);
                property = rewritten;
            }
        }
        if !recorded.contains(&property) {
            recorded.push(property);
        }
    }

    let populated: Vec<Wildcard> = templates.into_iter().filter(|t| !t.values.is_empty()).collect();
    if populated.is_empty() {
        return false;
    }
    if let Value::Object(map) = document {
        map.insert(
            "Wildcards".to_string(),
            serde_json::to_value(&populated).unwrap_or(Value::Null),
        );
        map.insert("MetricProperties".to_string(), Value::from(recorded));
    }
    true
}
