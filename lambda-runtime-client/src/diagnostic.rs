use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// Diagnostic information about an error, serialized as the JSON body of
/// `/invocation/<id>/error` and `/init/error` requests.
///
/// `error_type` defaults to the type name of the original error with
/// [`std::any::type_name`] as a fallback. Implement `From` for your own error
/// type to control what the control plane records.
#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// The kind of exception or error the function experienced.
    pub error_type: String,
    /// A string expression of the error, usually its `Display` output.
    pub error_message: String,
}

impl Diagnostic {
    /// Create a diagnostic from an explicit type and message.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Diagnostic {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

fn type_name_of_val<T>(_: &T) -> String {
    std::any::type_name::<T>().to_string()
}

impl From<BoxError> for Diagnostic {
    fn from(value: BoxError) -> Self {
        Diagnostic {
            error_type: type_name_of_val(&value),
            error_message: value.to_string(),
        }
    }
}

impl From<String> for Diagnostic {
    fn from(value: String) -> Self {
        Diagnostic {
            error_type: type_name_of_val(&value),
            error_message: value,
        }
    }
}

impl From<&str> for Diagnostic {
    fn from(value: &str) -> Self {
        Diagnostic {
            error_type: type_name_of_val(&value),
            error_message: value.to_string(),
        }
    }
}

impl From<std::io::Error> for Diagnostic {
    fn from(value: std::io::Error) -> Self {
        Diagnostic {
            error_type: type_name_of_val(&value),
            error_message: value.to_string(),
        }
    }
}

impl From<std::convert::Infallible> for Diagnostic {
    fn from(value: std::convert::Infallible) -> Self {
        match value {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_diagnostic() {
        use serde_json::{json, Value};
        let expected = json!({
            "errorType": "InvalidEventDataError",
            "errorMessage": "Error parsing event data.",
        });

        let actual = Diagnostic::new("InvalidEventDataError", "Error parsing event data.");
        let actual: Value = serde_json::to_value(actual).expect("failed to serialize diagnostic");
        assert_eq!(expected, actual);
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let diagnostic = Diagnostic::new("e", "a\\b\"c");
        let body = serde_json::to_string(&diagnostic).unwrap();
        assert_eq!(body, r#"{"errorType":"e","errorMessage":"a\\b\"c"}"#);
    }

    #[test]
    fn escapes_control_characters_and_keeps_utf8() {
        let diagnostic = Diagnostic::new("e", "line\nbreak \u{1F98A} héllo");
        let body = serde_json::to_string(&diagnostic).unwrap();
        assert!(body.contains(r"line\nbreak"));
        assert!(body.contains("\u{1F98A} héllo"));
    }

    #[test]
    fn does_not_escape_slashes() {
        let diagnostic = Diagnostic::new("e", "a/b");
        let body = serde_json::to_string(&diagnostic).unwrap();
        assert!(body.contains(r#""errorMessage":"a/b""#));
    }
}
