//! Activity parsing
//!
//! Turns an inbound JSON body into a typed [`Activity`]. Actor and object
//! may be given either as IRIs or as embedded objects with an `id`.

use serde_json::Value;

use crate::error::AppError;

/// Public addressing collection
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// IRI of a value given either as a string or as an object with `id`
pub fn iri_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .or_else(|| value.get("id").and_then(Value::as_str))
        .filter(|iri| !iri.is_empty())
        .map(str::to_string)
}

/// Values of an addressing field given as a string or an array
fn addresses(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(iri_of).collect(),
        Some(other) => iri_of(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn is_public_address(address: &str) -> bool {
    matches!(address, PUBLIC_COLLECTION | "as:Public" | "Public")
}

/// Target of a Delete or Block
///
/// Tombstones may carry the deleted IRI in `id` or in a nested `object`.
fn extract_delete_target(activity: &Value) -> Option<String> {
    let object = activity.get("object")?;

    if let Some(uri) = object.as_str() {
        return Some(uri.to_string());
    }

    let is_tombstone = object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|value| value.eq_ignore_ascii_case("Tombstone"));

    if is_tombstone {
        return object
            .get("object")
            .and_then(Value::as_str)
            .or_else(|| object.get("id").and_then(Value::as_str))
            .map(str::to_string);
    }

    object
        .get("id")
        .and_then(Value::as_str)
        .or_else(|| object.get("object").and_then(Value::as_str))
        .map(str::to_string)
}

/// Object embedded in a Create or Update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub object_type: String,
    /// Raw remote HTML, not yet sanitized
    pub content: String,
    pub in_reply_to: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

impl RemoteObject {
    fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }

        Some(Self {
            id: value
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            object_type: value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: value
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            in_reply_to: value.get("inReplyTo").and_then(iri_of),
            to: addresses(value.get("to")),
            cc: addresses(value.get("cc")),
        })
    }

    /// Notes and articles can become comments
    pub fn is_comment_type(&self) -> bool {
        matches!(self.object_type.as_str(), "Note" | "Article")
    }

    /// Addressed to the public collection in `to` or `cc`
    pub fn is_public(&self) -> bool {
        self.to
            .iter()
            .chain(self.cc.iter())
            .any(|address| is_public_address(address))
    }
}

/// Closed set of inbound intents
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Follow,
    /// Undo of an embedded activity; `None` when only an IRI was given
    Undo(Option<Box<Activity>>),
    Create(Option<RemoteObject>),
    Update(Option<RemoteObject>),
    Delete { target: Option<String> },
    Block { target: Option<String> },
    Announce { target: Option<String> },
    Like { target: Option<String> },
    /// Any other type; accepted without effect
    Unsupported(String),
}

impl Intent {
    /// ActivityStreams type name
    pub fn kind(&self) -> &str {
        match self {
            Intent::Follow => "Follow",
            Intent::Undo(_) => "Undo",
            Intent::Create(_) => "Create",
            Intent::Update(_) => "Update",
            Intent::Delete { .. } => "Delete",
            Intent::Block { .. } => "Block",
            Intent::Announce { .. } => "Announce",
            Intent::Like { .. } => "Like",
            Intent::Unsupported(kind) => kind,
        }
    }
}

/// Parsed inbound activity
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: Option<String>,
    /// Declared actor IRI
    pub actor: String,
    pub intent: Intent,
    /// Original document, echoed back in replies such as Accept
    pub raw: Value,
}

impl Activity {
    /// Parse an activity document
    ///
    /// # Errors
    /// `Validation` when the body is not an object or lacks `type` or `actor`
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        if !value.is_object() {
            return Err(AppError::Validation(
                "Activity must be a JSON object".to_string(),
            ));
        }

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Missing activity type".to_string()))?
            .to_string();

        let actor = value
            .get("actor")
            .and_then(iri_of)
            .ok_or_else(|| AppError::Validation("Missing activity actor".to_string()))?;

        let object = value.get("object");
        let object_iri = || object.and_then(iri_of);
        let embedded = || object.and_then(RemoteObject::from_value);

        let intent = match kind.as_str() {
            "Follow" => Intent::Follow,
            "Undo" => Intent::Undo(
                object
                    .filter(|o| o.is_object())
                    .and_then(|o| Activity::from_value(o.clone()).ok())
                    .map(Box::new),
            ),
            "Create" => Intent::Create(embedded()),
            "Update" => Intent::Update(embedded()),
            "Delete" => Intent::Delete {
                target: extract_delete_target(&value),
            },
            "Block" => Intent::Block {
                target: object_iri(),
            },
            "Announce" => Intent::Announce {
                target: object_iri(),
            },
            "Like" => Intent::Like {
                target: object_iri(),
            },
            _ => Intent::Unsupported(kind.clone()),
        };

        Ok(Self {
            id: value.get("id").and_then(iri_of),
            actor,
            intent,
            raw: value,
        })
    }
}
