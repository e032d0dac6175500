use serde::Serialize;

/// Everything that can stop an item from opening.
///
/// None of these escape [`crate::Portal::render`]; each one becomes a single
/// error panel with the text from [`OpenError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    #[error("missing or malformed `id` query parameter")]
    MissingIdentifier,
    #[error("no configuration for type {0:?}")]
    UnknownType(String),
    #[error("type {0:?} has no usable base URL")]
    NoBaseUrl(String),
    #[error("item {0:?} has no destination URL")]
    ItemNotOpenable(String),
    #[error("destination URL is not an http(s) URL")]
    InvalidFinalUrl,
    #[error("variant {0:?} is not offered by this item")]
    VariantNotAllowed(String),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl OpenError {
    /// Stable machine-readable code, used by the JSON API.
    pub fn code(&self) -> &'static str {
        match self {
            OpenError::MissingIdentifier => "missing_identifier",
            OpenError::UnknownType(_) => "unknown_type",
            OpenError::NoBaseUrl(_) => "no_base_url",
            OpenError::ItemNotOpenable(_) => "item_not_openable",
            OpenError::InvalidFinalUrl => "invalid_final_url",
            OpenError::VariantNotAllowed(_) => "variant_not_allowed",
            OpenError::Unexpected(_) => "unexpected",
        }
    }

    /// Text shown to the visitor.
    pub fn user_message(&self) -> String {
        match self {
            OpenError::MissingIdentifier => {
                "No item was specified. Check that the link includes a valid `id`.".to_string()
            }
            OpenError::UnknownType(kind) => {
                format!("The link type \"{kind}\" is not configured on this page.")
            }
            OpenError::NoBaseUrl(kind) => {
                format!("The link type \"{kind}\" has no destination configured.")
            }
            OpenError::ItemNotOpenable(id) => {
                format!("\"{id}\" cannot be opened yet: no destination has been published for it.")
            }
            OpenError::InvalidFinalUrl => {
                "The destination for this item is not a valid web address.".to_string()
            }
            OpenError::VariantNotAllowed(variant) => {
                format!("The variant \"{variant}\" is not available for this item.")
            }
            OpenError::Unexpected(detail) => format!("Something went wrong: {detail}"),
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(not(feature = "web"), allow(dead_code))]
pub(crate) struct ErrorBody {
    pub code: &'static str,
    pub error: String,
}

impl From<&OpenError> for ErrorBody {
    fn from(value: &OpenError) -> Self {
        Self {
            code: value.code(),
            error: value.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identifier_and_not_openable_read_differently() {
        let missing = OpenError::MissingIdentifier.user_message();
        let not_openable = OpenError::ItemNotOpenable("py22a".into()).user_message();
        assert_ne!(missing, not_openable);
        assert!(not_openable.contains("py22a"));
    }

    #[test]
    fn codes_are_unique() {
        let errors = [
            OpenError::MissingIdentifier,
            OpenError::UnknownType("t".into()),
            OpenError::NoBaseUrl("t".into()),
            OpenError::ItemNotOpenable("i".into()),
            OpenError::InvalidFinalUrl,
            OpenError::VariantNotAllowed("v".into()),
            OpenError::Unexpected("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(OpenError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn error_body_carries_code_and_message() {
        let body = ErrorBody::from(&OpenError::InvalidFinalUrl);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "invalid_final_url");
        assert!(json["error"].as_str().unwrap().contains("web address"));
    }
}
