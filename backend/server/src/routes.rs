use std::sync::Arc;

use axum::{
    Form,
    extract::{Multipart, Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use catalog::{
    BlobStorage, CatalogError, Trail,
    storage::{
        GPX_CONTAINER, IMAGE_CONTAINER, THUMBNAIL_CONTAINER, belongs_to, blob_name,
        blob_name_from_url,
    },
};
use tracing::{error, info, warn};

use crate::{
    error::AppError,
    form::{DeleteForm, IdQuery, TrailForm, Upload},
    state::AppState,
    views::{self, FormKind, SERVER_ERROR, UPLOAD_FAILED},
};

type AppResult = Result<Response, AppError>;

const INDEX: &str = "/Trails";

fn log_upstream(action: &str, e: &CatalogError) {
    match e {
        CatalogError::Status { status, body } => {
            error!("{action}: Web Api Error : Status Code {status}. Response Content: {body}")
        }
        _ => error!("{action}: {e}"),
    }
}

fn present(id: Option<String>) -> Option<String> {
    id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
}

async fn render_index(state: &AppState) -> Html<String> {
    info!("Index() - Getting all Trails");

    match state.trails.list().await {
        Ok(trails) => views::index(&trails, &[]),
        Err(e) => {
            log_upstream("Index()", &e);
            views::index(&[], &[SERVER_ERROR.to_string()])
        }
    }
}

pub async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    render_index(&state).await
}

async fn show_details(state: &AppState, id: Option<String>) -> AppResult {
    let Some(id) = present(id) else {
        info!("id is null in Details()");
        return Err(AppError::NotFound);
    };

    match state.trails.get(&id).await {
        Ok(Some(trail)) => Ok(views::details(&trail).into_response()),
        Ok(None) => Err(AppError::NotFound),
        Err(e) => {
            log_upstream("Details()", &e);
            Ok(render_index(state).await.into_response())
        }
    }
}

pub async fn details_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult {
    show_details(&state, Some(id)).await
}

pub async fn details_query_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> AppResult {
    show_details(&state, query.id).await
}

pub async fn create_form_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    views::trail_form(
        FormKind::Create,
        &Trail::default(),
        &[],
        &[],
        &state.csrf.issue(),
    )
}

async fn upload_one(
    storage: &dyn BlobStorage,
    container: &str,
    trail_id: &str,
    upload: Option<Upload>,
) -> Result<Option<String>, CatalogError> {
    let Some(upload) = upload else {
        return Ok(None);
    };

    let name = blob_name(trail_id, &upload.file_name);
    let url = storage
        .upload(container, &name, &upload.content_type, upload.bytes.to_vec())
        .await?;
    info!("Uploaded {} to {url}", upload.file_name);

    Ok(Some(url))
}

/// Uploads the GPX track and the image concurrently and records their URLs on the trail.
async fn attach_uploads(
    state: &AppState,
    trail: &mut Trail,
    gpx: Option<Upload>,
    image: Option<Upload>,
) -> Result<(), CatalogError> {
    if gpx.is_none() && image.is_none() {
        return Ok(());
    }

    let Some(storage) = state.storage.as_deref() else {
        warn!("Blob storage not configured, ignoring uploaded files");
        return Ok(());
    };

    let (gpx_url, image_url) = tokio::try_join!(
        upload_one(storage, GPX_CONTAINER, &trail.id, gpx),
        upload_one(storage, IMAGE_CONTAINER, &trail.id, image),
    )?;

    if gpx_url.is_some() {
        trail.gpx_url = gpx_url;
    }
    if image_url.is_some() {
        trail.image_url = image_url;
    }

    Ok(())
}

fn form_with_errors(
    state: &AppState,
    kind: FormKind,
    trail: &Trail,
    field_errors: &[catalog::FieldError],
    errors: &[String],
) -> Response {
    views::trail_form(kind, trail, field_errors, errors, &state.csrf.issue()).into_response()
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> AppResult {
    let form = TrailForm::from_multipart(multipart).await?;
    if !state.csrf.verify(&form.token) {
        return Err(AppError::InvalidToken);
    }

    let field_errors = form.validate();
    if !field_errors.is_empty() {
        return Ok(form_with_errors(&state, FormKind::Create, &form.trail, &field_errors, &[]));
    }

    let mut trail = form.trail;
    trail.id = Trail::new_id();
    trail.gpx_url = None;
    trail.image_url = None;

    if let Err(e) = attach_uploads(&state, &mut trail, form.gpx, form.image).await {
        error!("Create(): upload failed: {e}");
        return Ok(form_with_errors(
            &state,
            FormKind::Create,
            &trail,
            &[],
            &[UPLOAD_FAILED.to_string()],
        ));
    }

    match state.trails.create(&trail).await {
        Ok(()) => info!("Created trail {}", trail.id),
        Err(e) => log_upstream("Create()", &e),
    }

    Ok(Redirect::to(INDEX).into_response())
}

async fn show_edit(state: &AppState, id: Option<String>) -> AppResult {
    let Some(id) = present(id) else {
        return Err(AppError::NotFound);
    };

    match state.trails.get(&id).await {
        Ok(Some(trail)) => Ok(form_with_errors(state, FormKind::Edit, &trail, &[], &[])),
        Ok(None) => Err(AppError::NotFound),
        Err(e) => {
            log_upstream("Edit()", &e);
            Err(AppError::NotFound)
        }
    }
}

pub async fn edit_form_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult {
    show_edit(&state, Some(id)).await
}

pub async fn edit_form_query_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> AppResult {
    show_edit(&state, query.id).await
}

pub async fn edit_handler(State(state): State<Arc<AppState>>, multipart: Multipart) -> AppResult {
    let form = TrailForm::from_multipart(multipart).await?;
    if !state.csrf.verify(&form.token) {
        return Err(AppError::InvalidToken);
    }
    if form.trail.id.is_empty() {
        return Err(AppError::NotFound);
    }

    let field_errors = form.validate();
    if !field_errors.is_empty() {
        return Ok(form_with_errors(&state, FormKind::Edit, &form.trail, &field_errors, &[]));
    }

    let mut trail = form.trail;
    if let Err(e) = attach_uploads(&state, &mut trail, form.gpx, form.image).await {
        error!("Edit(): upload failed: {e}");
        return Ok(form_with_errors(
            &state,
            FormKind::Edit,
            &trail,
            &[],
            &[UPLOAD_FAILED.to_string()],
        ));
    }

    match state.trails.update(&trail).await {
        Ok(()) => {
            info!("Updated trail {}", trail.id);
            Ok(views::details(&trail).into_response())
        }
        Err(e) => {
            log_upstream("Edit()", &e);
            Ok(Redirect::to(INDEX).into_response())
        }
    }
}

async fn show_delete(state: &AppState, id: Option<String>) -> AppResult {
    let Some(id) = present(id) else {
        return Err(AppError::NotFound);
    };

    let token = state.csrf.issue();
    match state.trails.get(&id).await {
        Ok(Some(trail)) => Ok(views::delete(&trail, &[], &token).into_response()),
        Ok(None) => Err(AppError::NotFound),
        Err(e) => {
            log_upstream("Delete()", &e);
            let errors = [SERVER_ERROR.to_string()];
            Ok(views::delete(&Trail::default(), &errors, &token).into_response())
        }
    }
}

pub async fn delete_form_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult {
    show_delete(&state, Some(id)).await
}

pub async fn delete_form_query_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> AppResult {
    show_delete(&state, query.id).await
}

/// Blob name behind `url`, if it is one of this trail's blobs in `container`.
fn owned_blob(trail_id: &str, container: &str, url: Option<&str>) -> Option<String> {
    let url = url?;
    match blob_name_from_url(container, url) {
        Some(name) if belongs_to(trail_id, &name) => Some(name),
        _ => {
            warn!("{url} is not a blob of trail {trail_id} in {container}, leaving it");
            None
        }
    }
}

async fn delete_blob(storage: &dyn BlobStorage, container: &str, name: Option<String>) {
    let Some(name) = name else {
        return;
    };

    match storage.delete_if_exists(container, &name).await {
        Ok(()) => info!("Deleted {container}/{name}"),
        Err(e) => warn!("Failed to delete {container}/{name}: {e}"),
    }
}

/// Removes the trail's GPX track, image and the image's thumbnail. Failures are only logged.
async fn remove_blobs(state: &AppState, id: &str, trail: &Trail) {
    let Some(storage) = state.storage.as_deref() else {
        return;
    };

    let gpx = owned_blob(id, GPX_CONTAINER, trail.gpx_url.as_deref());
    let image = owned_blob(id, IMAGE_CONTAINER, trail.image_url.as_deref());

    tokio::join!(
        delete_blob(storage, GPX_CONTAINER, gpx),
        delete_blob(storage, IMAGE_CONTAINER, image.clone()),
        delete_blob(storage, THUMBNAIL_CONTAINER, image),
    );
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DeleteForm>,
) -> AppResult {
    if !state.csrf.verify(&form.token) {
        return Err(AppError::InvalidToken);
    }
    let Some(id) = form.id() else {
        return Err(AppError::NotFound);
    };

    // Blob URLs come from the stored trail, never from the post.
    let trail = match state.trails.get(id).await {
        Ok(Some(trail)) => trail,
        Ok(None) => return Err(AppError::NotFound),
        Err(e) => {
            log_upstream("Delete()", &e);
            return Ok(render_index(&state).await.into_response());
        }
    };

    match state.trails.delete(id).await {
        Ok(()) => {
            info!("Deleted trail {id}");
            remove_blobs(&state, id, &trail).await;
        }
        Err(e) => log_upstream("Delete()", &e),
    }

    Ok(render_index(&state).await.into_response())
}

pub async fn error_handler() -> Html<String> {
    views::error_page(SERVER_ERROR)
}
