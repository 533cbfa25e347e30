//! Server rendered HTML. Everything that came from a user or the API goes through [`escape`].
use std::{fmt::Write, sync::LazyLock};

use axum::response::Html;
use catalog::{FieldError, Trail};
use reqwest::Url;

use crate::csrf::TOKEN_FIELD;

pub const SERVER_ERROR: &str = "Server error. Please contact administrator.";
pub const UPLOAD_FAILED: &str = "File upload failed.";

const DIFFICULTIES: [&str; 4] = ["Easy", "Moderate", "Hard", "Expert"];

pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

static ORIGIN: LazyLock<Url> = LazyLock::new(|| Url::parse("http://localhost/").unwrap());

/// Site-relative path to a trail action, with the id as one escaped segment.
pub fn trail_path(action: &str, id: &str) -> String {
    let mut url = ORIGIN.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().extend(["Trails", action, id]);
    }
    url.path().to_string()
}

fn layout(title: &str, body: &str) -> Html<String> {
    let title = escape(title);

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} - Trails</title>
<link rel="stylesheet" href="/static/site.css">
</head>
<body>
<header><nav><a href="/Trails">Trails</a> | <a href="/Trails/Create">Create New</a></nav></header>
<main>
<h1>{title}</h1>
{body}
</main>
</body>
</html>"#
    ))
}

fn summary(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let items: String = errors
        .iter()
        .map(|e| format!("<li>{}</li>", escape(e)))
        .collect();
    format!(r#"<div class="validation-summary-errors"><ul>{items}</ul></div>"#)
}

fn link(action: &str, id: &str, label: &str) -> String {
    format!(r#"<a href="{}">{label}</a>"#, trail_path(action, id))
}

pub fn index(trails: &[Trail], errors: &[String]) -> Html<String> {
    let mut rows = String::new();
    for trail in trails {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{} | {} | {}</td></tr>",
            escape(&trail.name),
            escape(&trail.difficulty),
            escape(&trail.description),
            link("Edit", &trail.id, "Edit"),
            link("Details", &trail.id, "Details"),
            link("Delete", &trail.id, "Delete"),
        );
    }

    let body = format!(
        r#"{}<p><a href="/Trails/Create">Create New</a></p>
<table class="table">
<thead><tr><th>Name</th><th>Difficulty</th><th>Description</th><th></th></tr></thead>
<tbody>{rows}</tbody>
</table>"#,
        summary(errors)
    );

    layout("Trails", &body)
}

fn trail_fields(trail: &Trail) -> String {
    let mut out = format!(
        "<dl><dt>Name</dt><dd>{}</dd><dt>Difficulty</dt><dd>{}</dd><dt>Description</dt><dd>{}</dd>",
        escape(&trail.name),
        escape(&trail.difficulty),
        escape(&trail.description),
    );

    if let Some(url) = &trail.gpx_url {
        let _ = write!(
            out,
            r#"<dt>GPX</dt><dd><a href="{}">Download track</a></dd>"#,
            escape(url)
        );
    }
    if let Some(url) = &trail.image_url {
        let _ = write!(
            out,
            r#"<dt>Image</dt><dd><img src="{}" alt="{}"></dd>"#,
            escape(url),
            escape(&trail.name)
        );
    }

    out.push_str("</dl>");
    out
}

pub fn details(trail: &Trail) -> Html<String> {
    let body = format!(
        r#"{}<p>{} | <a href="/Trails">Back to List</a></p>"#,
        trail_fields(trail),
        link("Edit", &trail.id, "Edit"),
    );

    layout("Details", &body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Create,
    Edit,
}

impl FormKind {
    fn title(self) -> &'static str {
        match self {
            FormKind::Create => "Create",
            FormKind::Edit => "Edit",
        }
    }

    fn action(self) -> &'static str {
        match self {
            FormKind::Create => "/Trails/Create",
            FormKind::Edit => "/Trails/Edit",
        }
    }
}

fn field_error(errors: &[FieldError], field: &str) -> String {
    errors
        .iter()
        .filter(|e| e.field == field)
        .map(|e| format!(r#"<span class="field-validation-error">{}</span>"#, escape(&e.message)))
        .collect()
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        r#"<input type="hidden" name="{name}" value="{}">"#,
        escape(value)
    )
}

pub fn trail_form(
    kind: FormKind,
    trail: &Trail,
    field_errors: &[FieldError],
    errors: &[String],
    token: &str,
) -> Html<String> {
    let options: String = DIFFICULTIES
        .iter()
        .map(|d| format!(r#"<option value="{d}"></option>"#))
        .collect();

    let mut hidden_fields = hidden(TOKEN_FIELD, token);
    if kind == FormKind::Edit {
        hidden_fields.push_str(&hidden("Id", &trail.id));
        hidden_fields.push_str(&hidden("GPXUrl", trail.gpx_url.as_deref().unwrap_or("")));
        hidden_fields.push_str(&hidden("ImageUrl", trail.image_url.as_deref().unwrap_or("")));
    }

    let body = format!(
        r#"{summary}<form method="post" action="{action}" enctype="multipart/form-data">
{hidden_fields}
<div><label for="Name">Name</label><input id="Name" name="Name" value="{name}" maxlength="100">{name_error}</div>
<div><label for="Description">Description</label><textarea id="Description" name="Description">{description}</textarea>{description_error}</div>
<div><label for="Difficulty">Difficulty</label><input id="Difficulty" name="Difficulty" list="difficulties" value="{difficulty}"><datalist id="difficulties">{options}</datalist>{difficulty_error}</div>
<div><label for="GPXFile">GPX track</label><input type="file" id="GPXFile" name="GPXFile" accept=".gpx">{gpx_error}</div>
<div><label for="ImageFile">Image</label><input type="file" id="ImageFile" name="ImageFile" accept="image/*">{image_error}</div>
<div><input type="submit" value="{submit}"></div>
</form>
<p><a href="/Trails">Back to List</a></p>"#,
        summary = summary(errors),
        action = kind.action(),
        name = escape(&trail.name),
        description = escape(&trail.description),
        difficulty = escape(&trail.difficulty),
        name_error = field_error(field_errors, "Name"),
        description_error = field_error(field_errors, "Description"),
        difficulty_error = field_error(field_errors, "Difficulty"),
        gpx_error = field_error(field_errors, "GPXFile"),
        image_error = field_error(field_errors, "ImageFile"),
        submit = if kind == FormKind::Create { "Create" } else { "Save" },
    );

    layout(kind.title(), &body)
}

pub fn delete(trail: &Trail, errors: &[String], token: &str) -> Html<String> {
    let body = format!(
        r#"{}<h3>Are you sure you want to delete this?</h3>
{}
<form method="post" action="/Trails/Delete">
{}{}
<input type="submit" value="Delete"> | <a href="/Trails">Back to List</a>
</form>"#,
        summary(errors),
        trail_fields(trail),
        hidden(TOKEN_FIELD, token),
        hidden("Id", &trail.id),
    );

    layout("Delete", &body)
}

pub fn error_page(message: &str) -> Html<String> {
    let body = format!(
        r#"<h2 class="text-danger">An error occurred while processing your request.</h2><p>{}</p>"#,
        escape(message)
    );

    layout("Error", &body)
}

pub fn not_found() -> Html<String> {
    layout(
        "Not Found",
        r#"<p>The trail you are looking for does not exist.</p><p><a href="/Trails">Back to List</a></p>"#,
    )
}
