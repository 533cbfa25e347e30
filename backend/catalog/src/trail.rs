use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DIFFICULTY_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

/// A hiking route as stored by the Trails API.
///
/// The API speaks camelCase JSON but older deployments emit PascalCase
/// (`GPXUrl`, `ImageUrl`), so both spellings are accepted on decode.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Trail {
    #[serde(default, alias = "Id")]
    pub id: String,

    #[serde(default, alias = "Name")]
    pub name: String,

    #[serde(default, alias = "Description")]
    pub description: String,

    #[serde(default, alias = "Difficulty")]
    pub difficulty: String,

    #[serde(
        default,
        alias = "GPXUrl",
        alias = "GpxUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub gpx_url: Option<String>,

    #[serde(default, alias = "ImageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl Trail {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Checks the fields a browser can submit. An empty result means valid.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("Name", "The Name field is required."));
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError::new(
                "Name",
                format!("Name must be at most {MAX_NAME_LEN} characters."),
            ));
        }

        let difficulty = self.difficulty.trim();
        if difficulty.is_empty() {
            errors.push(FieldError::new(
                "Difficulty",
                "The Difficulty field is required.",
            ));
        } else if difficulty.chars().count() > MAX_DIFFICULTY_LEN {
            errors.push(FieldError::new(
                "Difficulty",
                format!("Difficulty must be at most {MAX_DIFFICULTY_LEN} characters."),
            ));
        }

        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(FieldError::new(
                "Description",
                format!("Description must be at most {MAX_DESCRIPTION_LEN} characters."),
            ));
        }

        errors
    }
}
