use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use catalog::{
    ApiTrailRepository, BlobStorage, CatalogError, MemoryBlobStorage, MemoryTrailRepository, Trail,
    TrailRepository,
};
use reqwest::{
    Client,
    multipart::{Form, Part},
    redirect::Policy,
};
use server::{
    build_router,
    config::Config,
    csrf::Csrf,
    state::AppState,
    views::{SERVER_ERROR, UPLOAD_FAILED},
};
use tokio::net::TcpListener;

type Api = Arc<MemoryTrailRepository>;

async fn api_list(State(api): State<Api>) -> Json<Vec<Trail>> {
    Json(api.list().await.expect("list"))
}

async fn api_get(State(api): State<Api>, Path(id): Path<String>) -> Json<Option<Trail>> {
    Json(api.get(&id).await.expect("get"))
}

async fn api_create(State(api): State<Api>, Json(trail): Json<Trail>) -> StatusCode {
    api.create(&trail).await.expect("create");
    StatusCode::CREATED
}

async fn api_update(
    State(api): State<Api>,
    Path(id): Path<String>,
    Json(trail): Json<Trail>,
) -> StatusCode {
    if id != trail.id {
        return StatusCode::BAD_REQUEST;
    }
    match api.update(&trail).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn api_delete(State(api): State<Api>, Path(id): Path<String>) -> StatusCode {
    match api.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });

    format!("http://{addr}")
}

/// Blob storage whose account rejects every write.
struct RejectingStorage;

#[async_trait]
impl BlobStorage for RejectingStorage {
    async fn upload(
        &self,
        _container: &str,
        _blob_name: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> catalog::error::Result<String> {
        Err(CatalogError::Status {
            status: StatusCode::FORBIDDEN,
            body: "AuthorizationFailure".to_string(),
        })
    }

    async fn delete_if_exists(
        &self,
        _container: &str,
        _blob_name: &str,
    ) -> catalog::error::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Storage {
    Memory,
    Rejecting,
    Disabled,
}

struct Harness {
    base: String,
    client: Client,
    api: Api,
    blobs: Arc<MemoryBlobStorage>,
}

async fn harness_with(
    api_router: Router,
    api: Api,
    storage: Storage,
    env: &[(&str, &str)],
) -> Harness {
    let api_url = serve(api_router).await;
    let trails: Arc<dyn TrailRepository> = Arc::new(
        ApiTrailRepository::new(&format!("{api_url}/api"), Duration::from_secs(5))
            .expect("repository"),
    );

    let blobs = Arc::new(MemoryBlobStorage::default());
    let storage: Option<Arc<dyn BlobStorage>> = match storage {
        Storage::Memory => Some(blobs.clone() as Arc<dyn BlobStorage>),
        Storage::Rejecting => Some(Arc::new(RejectingStorage) as Arc<dyn BlobStorage>),
        Storage::Disabled => None,
    };

    let config = Config::from_lookup(|key| {
        env.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .expect("config");
    let state = AppState::from_parts(
        config,
        trails,
        storage,
        Csrf::new("test-key", Duration::from_secs(600)),
    );
    let base = serve(build_router(state)).await;

    let client = Client::builder()
        .redirect(Policy::none())
        .build()
        .expect("client");

    Harness {
        base,
        client,
        api,
        blobs,
    }
}

fn fake_api(api: Api) -> Router {
    Router::new()
        .route("/api/Trails", get(api_list).post(api_create))
        .route(
            "/api/Trails/{id}",
            get(api_get).put(api_update).delete(api_delete),
        )
        .with_state(api)
}

async fn harness(seed: Vec<Trail>) -> Harness {
    harness_using(seed, Storage::Memory).await
}

async fn harness_using(seed: Vec<Trail>, storage: Storage) -> Harness {
    let api: Api = Arc::new(MemoryTrailRepository::new(seed));

    harness_with(fake_api(api.clone()), api, storage, &[]).await
}

async fn broken_harness() -> Harness {
    let router = Router::new().fallback(|| async {
        (StatusCode::INTERNAL_SERVER_ERROR, "database offline")
    });

    harness_with(router, Api::default(), Storage::Memory, &[]).await
}

/// A Trails API that reads fine but refuses every update.
async fn read_only_harness(seed: Vec<Trail>) -> Harness {
    let api: Api = Arc::new(MemoryTrailRepository::new(seed));
    let router = Router::new()
        .route("/api/Trails", get(api_list))
        .route(
            "/api/Trails/{id}",
            get(api_get).put(|| async { (StatusCode::SERVICE_UNAVAILABLE, "read only") }),
        )
        .with_state(api.clone());

    harness_with(router, api, Storage::Memory, &[]).await
}

fn gpx_part(file_name: &str) -> Part {
    Part::bytes(b"<gpx></gpx>".to_vec())
        .file_name(file_name.to_string())
        .mime_str("application/gpx+xml")
        .expect("mime")
}

fn trail(id: &str, name: &str) -> Trail {
    Trail {
        id: id.to_string(),
        name: name.to_string(),
        description: "A walk".to_string(),
        difficulty: "Easy".to_string(),
        gpx_url: None,
        image_url: None,
    }
}

fn token_from(page: &str) -> String {
    let marker = r#"name="__RequestVerificationToken" value=""#;
    let start = page.find(marker).expect("token field") + marker.len();
    let end = page[start..].find('"').expect("token end");

    page[start..start + end].to_string()
}

impl Harness {
    async fn get(&self, path: &str) -> (StatusCode, String) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("request");
        let status = response.status();

        (status, response.text().await.expect("body"))
    }

    async fn token(&self) -> String {
        let (_, page) = self.get("/Trails/Create").await;
        token_from(&page)
    }
}

#[tokio::test]
async fn index_lists_trails_and_sets_hsts() {
    let h = harness(vec![trail("a", "Alpha Loop"), trail("b", "Bravo Ridge")]).await;

    for path in ["/", "/Trails", "/Trails/Index", "/trails"] {
        let response = h
            .client
            .get(format!("{}{path}", h.base))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert!(response.headers().contains_key("strict-transport-security"));

        let page = response.text().await.expect("body");
        assert!(page.contains("Alpha Loop"));
        assert!(page.contains("Bravo Ridge"));
        assert!(!page.contains(SERVER_ERROR));
    }
}

#[tokio::test]
async fn details_by_path_and_query() {
    let h = harness(vec![trail("a", "Alpha Loop")]).await;

    let (status, page) = h.get("/Trails/Details/a").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Alpha Loop"));

    let (status, _) = h.get("/trails/Details?id=a").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.get("/Trails/Details").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.get("/Trails/Details/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_uploads_files_and_redirects() {
    let h = harness(vec![]).await;
    let token = h.token().await;

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Name", "Windy Hill")
        .text("Description", "Grassy ridge")
        .text("Difficulty", "Moderate")
        .part(
            "GPXFile",
            Part::bytes(b"<gpx></gpx>".to_vec())
                .file_name("Windy Hill.gpx")
                .mime_str("application/gpx+xml")
                .expect("mime"),
        )
        .part("ImageFile", Part::bytes(Vec::new()).file_name(""));

    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()["location"], "/Trails");

    let trails = h.api.list().await.expect("list");
    assert_eq!(trails.len(), 1);
    let created = &trails[0];
    assert_eq!(created.name, "Windy Hill");
    assert!(!created.id.is_empty());
    assert_eq!(created.image_url, None);

    let blob = format!("{}-windy-hill.gpx", created.id);
    assert_eq!(
        created.gpx_url.as_deref(),
        Some(format!("memory:///trails/{blob}").as_str())
    );
    let stored = h.blobs.get("trails", &blob).expect("gpx blob");
    assert_eq!(stored.content_type, "application/gpx+xml");
    assert_eq!(stored.bytes, b"<gpx></gpx>");
}

#[tokio::test]
async fn create_rejects_missing_token() {
    let h = harness(vec![]).await;

    let form = Form::new()
        .text("Name", "Sneaky")
        .text("Difficulty", "Easy");
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.api.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn create_rerenders_invalid_form() {
    let h = harness(vec![]).await;
    let token = h.token().await;

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Name", "")
        .text("Difficulty", "Easy")
        .part(
            "GPXFile",
            Part::bytes(b"kml".to_vec()).file_name("track.kml"),
        );
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::OK);
    let page = response.text().await.expect("body");
    assert!(page.contains("The Name field is required."));
    assert!(page.contains("The GPX track must be a .gpx file."));
    assert!(h.api.list().await.expect("list").is_empty());
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn edit_updates_trail_and_shows_details() {
    let mut existing = trail("a", "Alpha Loop");
    existing.gpx_url = Some("memory:///trails/a-alpha.gpx".to_string());
    let h = harness(vec![existing]).await;

    let (status, page) = h.get("/Trails/Edit/a").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(r#"name="GPXUrl" value="memory:///trails/a-alpha.gpx""#));
    let token = token_from(&page);

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Id", "a")
        .text("Name", "Alpha Loop Extended")
        .text("Description", "Longer now")
        .text("Difficulty", "Hard")
        .text("GPXUrl", "memory:///trails/a-alpha.gpx")
        .text("ImageUrl", "")
        .part(
            "ImageFile",
            Part::bytes(vec![0x89, b'P', b'N', b'G'])
                .file_name("Summit View.PNG")
                .mime_str("image/png")
                .expect("mime"),
        );
    let response = h
        .client
        .post(format!("{}/Trails/Edit", h.base))
        .multipart(form)
        .send()
        .await
        .expect("edit");

    assert_eq!(response.status(), StatusCode::OK);
    let page = response.text().await.expect("body");
    assert!(page.contains("Alpha Loop Extended"));

    let updated = h.api.get("a").await.expect("get").expect("present");
    assert_eq!(updated.difficulty, "Hard");
    assert_eq!(updated.gpx_url.as_deref(), Some("memory:///trails/a-alpha.gpx"));
    assert_eq!(
        updated.image_url.as_deref(),
        Some("memory:///images/a-summit-view.png")
    );
    assert!(h.blobs.get("images", "a-summit-view.png").is_some());
}

#[tokio::test]
async fn edit_of_unknown_trail_is_not_found() {
    let h = harness(vec![]).await;

    let (status, _) = h.get("/Trails/Edit/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = h.get("/Trails/Edit").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_trail_and_blobs() {
    let h = harness(vec![]).await;
    let gpx_url = h
        .blobs
        .upload("trails", "a-alpha.gpx", "application/gpx+xml", b"g".to_vec())
        .await
        .expect("gpx");
    let image_url = h
        .blobs
        .upload("images", "a-alpha.png", "image/png", b"i".to_vec())
        .await
        .expect("image");
    h.blobs
        .upload("thumbnails", "a-alpha.png", "image/png", b"t".to_vec())
        .await
        .expect("thumbnail");

    let mut existing = trail("a", "Alpha Loop");
    existing.gpx_url = Some(gpx_url.clone());
    existing.image_url = Some(image_url.clone());
    h.api.create(&existing).await.expect("seed");

    let (status, page) = h.get("/Trails/Delete/a").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Are you sure you want to delete this?"));
    let token = token_from(&page);

    let response = h
        .client
        .post(format!("{}/Trails/Delete", h.base))
        .form(&[
            ("__RequestVerificationToken", token.as_str()),
            ("Id", "a"),
            ("GPXUrl", gpx_url.as_str()),
            ("ImageUrl", image_url.as_str()),
        ])
        .send()
        .await
        .expect("delete");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.text().await.expect("body").contains("Alpha Loop"));
    assert_eq!(h.api.get("a").await.expect("get"), None);
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn delete_without_id_or_token_is_refused() {
    let h = harness(vec![trail("a", "Alpha Loop")]).await;
    let token = h.token().await;

    let response = h
        .client
        .post(format!("{}/Trails/Delete", h.base))
        .form(&[("__RequestVerificationToken", token.as_str())])
        .send()
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .client
        .post(format!("{}/Trails/Delete", h.base))
        .form(&[("Id", "a")])
        .send()
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(h.api.get("a").await.expect("get").is_some());
}

#[tokio::test]
async fn upstream_failures_degrade_gracefully() {
    let h = broken_harness().await;

    let (status, page) = h.get("/Trails").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(SERVER_ERROR));

    // Details falls back to the index page.
    let (status, page) = h.get("/Trails/Details/a").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(SERVER_ERROR));

    let (status, page) = h.get("/Trails/Delete/a").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(SERVER_ERROR));

    let (status, _) = h.get("/Trails/Edit/a").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let token = h.token().await;
    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Name", "Lost")
        .text("Difficulty", "Easy");
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn error_page_renders() {
    let h = harness(vec![]).await;

    let (status, page) = h.get("/Trails/Error").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("An error occurred while processing your request."));
}

#[tokio::test]
async fn delete_keeps_blobs_of_other_trails() {
    let h = harness(vec![]).await;
    let own_gpx = h
        .blobs
        .upload("trails", "a-alpha.gpx", "application/gpx+xml", b"a".to_vec())
        .await
        .expect("own gpx");
    let other_gpx = h
        .blobs
        .upload("trails", "b-bravo.gpx", "application/gpx+xml", b"b".to_vec())
        .await
        .expect("other gpx");
    let other_image = h
        .blobs
        .upload("images", "b-bravo.png", "image/png", b"b".to_vec())
        .await
        .expect("other image");

    let mut alpha = trail("a", "Alpha Loop");
    alpha.gpx_url = Some(own_gpx);
    // An edit can point a trail at any URL, so the stored one is not trusted either.
    alpha.image_url = Some(other_image);
    let mut bravo = trail("b", "Bravo Ridge");
    bravo.gpx_url = Some(other_gpx.clone());
    h.api.create(&alpha).await.expect("seed a");
    h.api.create(&bravo).await.expect("seed b");

    let token = h.token().await;
    let response = h
        .client
        .post(format!("{}/Trails/Delete", h.base))
        .form(&[
            ("__RequestVerificationToken", token.as_str()),
            ("Id", "a"),
            ("GPXUrl", other_gpx.as_str()),
        ])
        .send()
        .await
        .expect("delete");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.api.get("a").await.expect("get"), None);
    assert!(h.blobs.get("trails", "a-alpha.gpx").is_none());
    assert!(h.blobs.get("trails", "b-bravo.gpx").is_some());
    assert!(h.blobs.get("images", "b-bravo.png").is_some());
    assert_eq!(
        h.api.get("b").await.expect("get").and_then(|t| t.gpx_url),
        Some(other_gpx)
    );
}

#[tokio::test]
async fn delete_of_unknown_trail_is_not_found() {
    let h = harness(vec![]).await;
    let token = h.token().await;

    let response = h
        .client
        .post(format!("{}/Trails/Delete", h.base))
        .form(&[("__RequestVerificationToken", token.as_str()), ("Id", "ghost")])
        .send()
        .await
        .expect("delete");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_failure_rerenders_form_and_sends_nothing_upstream() {
    let h = harness_using(vec![trail("a", "Alpha Loop")], Storage::Rejecting).await;
    let token = h.token().await;

    let form = Form::new()
        .text("__RequestVerificationToken", token.clone())
        .text("Name", "Windy Hill")
        .text("Difficulty", "Moderate")
        .part("GPXFile", gpx_part("windy.gpx"));
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::OK);
    let page = response.text().await.expect("body");
    assert!(page.contains(UPLOAD_FAILED));
    assert!(page.contains(r#"value="Windy Hill""#));
    assert_eq!(h.api.list().await.expect("list").len(), 1);

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Id", "a")
        .text("Name", "Renamed")
        .text("Difficulty", "Easy")
        .part("GPXFile", gpx_part("alpha.gpx"));
    let response = h
        .client
        .post(format!("{}/Trails/Edit", h.base))
        .multipart(form)
        .send()
        .await
        .expect("edit");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await.expect("body").contains(UPLOAD_FAILED));
    let unchanged = h.api.get("a").await.expect("get").expect("present");
    assert_eq!(unchanged.name, "Alpha Loop");
}

#[tokio::test]
async fn failed_update_redirects_to_index() {
    let h = read_only_harness(vec![trail("a", "Alpha Loop")]).await;
    let (_, page) = h.get("/Trails/Edit/a").await;
    let token = token_from(&page);

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Id", "a")
        .text("Name", "Renamed")
        .text("Difficulty", "Easy");
    let response = h
        .client
        .post(format!("{}/Trails/Edit", h.base))
        .multipart(form)
        .send()
        .await
        .expect("edit");

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()["location"], "/Trails");
    assert_eq!(h.api.get("a").await.expect("get").expect("present").name, "Alpha Loop");
}

#[tokio::test]
async fn files_are_ignored_without_blob_storage() {
    let h = harness_using(vec![], Storage::Disabled).await;
    let token = h.token().await;

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Name", "Windy Hill")
        .text("Difficulty", "Moderate")
        .part("GPXFile", gpx_part("windy.gpx"));
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let trails = h.api.list().await.expect("list");
    assert_eq!(trails.len(), 1);
    assert_eq!(trails[0].name, "Windy Hill");
    assert_eq!(trails[0].gpx_url, None);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let api: Api = Arc::new(MemoryTrailRepository::default());
    let h = harness_with(
        fake_api(api.clone()),
        api,
        Storage::Memory,
        &[("MAX_UPLOAD_BYTES", "1024")],
    )
    .await;
    let token = h.token().await;

    let form = Form::new()
        .text("__RequestVerificationToken", token)
        .text("Name", "Heavy")
        .text("Difficulty", "Easy")
        .part(
            "GPXFile",
            Part::bytes(vec![b'x'; 4 * 1024]).file_name("heavy.gpx"),
        );
    let response = h
        .client
        .post(format!("{}/Trails/Create", h.base))
        .multipart(form)
        .send()
        .await
        .expect("create");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.api.list().await.expect("list").is_empty());
    assert!(h.blobs.is_empty());
}
