use serde::{Deserialize, Serialize};
use std::fmt;

/// Rejected identifier, carrying the kind of id and the offending text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} `{value}`: {problem}")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
    pub problem: &'static str,
}

fn check_id(kind: &'static str, value: &str) -> Result<(), InvalidId> {
    let problem = if value.is_empty() {
        "must not be empty"
    } else if !value
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
    {
        "only ASCII letters, digits, '_' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(InvalidId {
        kind,
        value: value.to_string(),
        problem,
    })
}

// Step ids, field keys and endpoint ids share one shape but must not be mixed up.
macro_rules! wizard_id {
    ($(#[$meta:meta])* $name:ident => $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub fn parse(raw: &str) -> Result<Self, InvalidId> {
                check_id(Self::KIND, raw)?;
                Ok(Self(raw.to_string()))
            }

            /// For literals baked into flow definitions.
            pub(crate) fn from_static(raw: &'static str) -> Self {
                debug_assert!(check_id(Self::KIND, raw).is_ok(), "{raw}");
                Self(raw.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                check_id(Self::KIND, &value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

wizard_id!(
    /// Names one step of a flow.
    StepId => "step id"
);
wizard_id!(
    /// Names one slot in the shared wizard state.
    FieldKey => "field key"
);
wizard_id!(
    /// Names a backend route; settings map it to a URL path.
    EndpointId => "endpoint id"
);
