use axum::{body::Bytes, extract::Multipart};
use catalog::{
    FieldError, Trail,
    storage::{IMAGE_EXTENSIONS, content_type_for, is_gpx, is_image},
};
use serde::Deserialize;

use crate::{csrf::TOKEN_FIELD, error::AppError};

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Upload {
    /// Browsers submit an empty part for a file input left blank.
    pub fn from_part(
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Option<Self> {
        let file_name = file_name.map(str::trim).filter(|n| !n.is_empty())?;
        if bytes.is_empty() {
            return None;
        }

        let content_type = match content_type {
            Some(ct) if ct != "application/octet-stream" => ct.to_string(),
            _ => content_type_for(file_name).to_string(),
        };

        Some(Self {
            file_name: file_name.to_string(),
            content_type,
            bytes,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A create or edit submission.
#[derive(Debug, Clone, Default)]
pub struct TrailForm {
    pub trail: Trail,
    pub gpx: Option<Upload>,
    pub image: Option<Upload>,
    pub token: String,
}

impl TrailForm {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = TrailForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match name.as_str() {
                "GPXFile" | "ImageFile" => {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    let upload =
                        Upload::from_part(file_name.as_deref(), content_type.as_deref(), bytes);

                    if name == "GPXFile" {
                        form.gpx = upload;
                    } else {
                        form.image = upload;
                    }
                }
                _ => {
                    let value = field.text().await?;
                    form.set_text(&name, value);
                }
            }
        }

        Ok(form)
    }

    /// Applies one text field. Unknown names are ignored, like model binding does.
    pub fn set_text(&mut self, name: &str, value: String) {
        match name {
            "Id" => self.trail.id = value.trim().to_string(),
            "Name" => self.trail.name = value.trim().to_string(),
            "Description" => self.trail.description = value,
            "Difficulty" => self.trail.difficulty = value.trim().to_string(),
            "GPXUrl" => self.trail.gpx_url = non_empty(value),
            "ImageUrl" => self.trail.image_url = non_empty(value),
            TOKEN_FIELD => self.token = value,
            _ => {}
        }
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = self.trail.validate();

        if let Some(gpx) = &self.gpx {
            if !is_gpx(&gpx.file_name) {
                errors.push(FieldError {
                    field: "GPXFile",
                    message: "The GPX track must be a .gpx file.".to_string(),
                });
            }
        }

        if let Some(image) = &self.image {
            if !is_image(&image.file_name) {
                errors.push(FieldError {
                    field: "ImageFile",
                    message: format!("The image must be one of: {}.", IMAGE_EXTENSIONS.join(", ")),
                });
            }
        }

        errors
    }
}

/// Body of the delete confirmation form. Blob URLs come from the stored trail, not from here.
#[derive(Deserialize, Debug, Default)]
pub struct DeleteForm {
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "__RequestVerificationToken", default)]
    pub token: String,
}

impl DeleteForm {
    pub fn id(&self) -> Option<&str> {
        Some(self.id.trim()).filter(|id| !id.is_empty())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct IdQuery {
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_file_inputs_are_no_upload() {
        assert!(Upload::from_part(Some(""), None, Bytes::from_static(b"x")).is_none());
        assert!(Upload::from_part(Some("a.gpx"), None, Bytes::new()).is_none());
        assert!(Upload::from_part(None, None, Bytes::from_static(b"x")).is_none());
    }

    #[test]
    fn content_type_is_guessed_when_generic() {
        let gpx = Upload::from_part(
            Some("loop.GPX"),
            Some("application/octet-stream"),
            Bytes::from_static(b"<gpx/>"),
        )
        .unwrap();
        assert_eq!(gpx.content_type, "application/gpx+xml");

        let png = Upload::from_part(Some("a.png"), Some("image/x-custom"), Bytes::from_static(b"1"))
            .unwrap();
        assert_eq!(png.content_type, "image/x-custom");
    }

    #[test]
    fn text_fields_bind_to_the_trail() {
        let mut form = TrailForm::default();
        form.set_text("Id", " t-1 ".to_string());
        form.set_text("Name", "  Windy Hill ".to_string());
        form.set_text("Difficulty", "Moderate".to_string());
        form.set_text("GPXUrl", "".to_string());
        form.set_text("ImageUrl", "https://x/images/a.png".to_string());
        form.set_text(TOKEN_FIELD, "tok".to_string());
        form.set_text("Unrelated", "ignored".to_string());

        assert_eq!(form.trail.id, "t-1");
        assert_eq!(form.trail.name, "Windy Hill");
        assert_eq!(form.trail.gpx_url, None);
        assert_eq!(form.trail.image_url.as_deref(), Some("https://x/images/a.png"));
        assert_eq!(form.token, "tok");
    }

    #[test]
    fn wrong_file_types_are_rejected() {
        let mut form = TrailForm::default();
        form.set_text("Name", "Loop".to_string());
        form.set_text("Difficulty", "Easy".to_string());
        form.gpx = Upload::from_part(Some("track.kml"), None, Bytes::from_static(b"k"));
        form.image = Upload::from_part(Some("photo.exe"), None, Bytes::from_static(b"e"));

        let fields: Vec<_> = form.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, ["GPXFile", "ImageFile"]);

        form.gpx = Upload::from_part(Some("track.gpx"), None, Bytes::from_static(b"g"));
        form.image = Upload::from_part(Some("photo.JPG"), None, Bytes::from_static(b"j"));
        assert!(form.validate().is_empty());
    }

    #[test]
    fn delete_form_treats_blank_id_as_absent() {
        let blank = DeleteForm {
            id: " ".to_string(),
            ..DeleteForm::default()
        };
        let padded = DeleteForm {
            id: " a ".to_string(),
            ..DeleteForm::default()
        };

        assert_eq!(blank.id(), None);
        assert_eq!(padded.id(), Some("a"));
    }
}
