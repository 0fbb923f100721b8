use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use super::{NoteStore, SEARCH_LIMIT};
use crate::core::note::{Note, NoteWrite};
use crate::core::tag::{NoteTag, Tag};
use crate::error::StoreError;

const NOTE_SELECT: &str = "*,note_tags(tags(name))";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

static COLUMN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'(\w+)' column|column "?(?:\w+\.)?(\w+)"?"#).unwrap());

/// Signed-in session returned by the auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
}

/// PostgREST / Postgres error body.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "msg", alias = "error_description")]
    detail: Option<String>,
}

/// Supabase REST (PostgREST) and auth (GoTrue) client.
///
/// Constructed once at startup and passed to whatever needs the store.
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    http: Client,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, StoreError> {
        let http = Client::builder()
            .build()
            .map_err(|e| StoreError::Request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
            http,
        })
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(Some(token.into()));
        self
    }

    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    /// Create an anonymous user and adopt its session.
    pub async fn sign_in_anonymously(&self) -> Result<AuthSession, StoreError> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let session: AuthSession = check(resp).await?.json().await?;
        log::info!("Signed in anonymously as {}", session.user.id);
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    /// Exchange a refresh token for a fresh session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<AuthSession, StoreError> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let session: AuthSession = check(resp).await?.json().await?;
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    /// Revoke the current session. Without one there is nothing to revoke.
    pub async fn sign_out(&self) -> Result<(), StoreError> {
        let Some(token) = self.access_token() else {
            return Ok(());
        };
        let resp = self
            .http
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;
        check(resp).await?;
        self.set_access_token(None);
        log::info!("Signed out");
        Ok(())
    }

    // --- Private helpers ---

    fn rest(&self, method: Method, table: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
    }

    async fn select_notes(&self, filters: &[(&str, String)]) -> Result<Vec<Note>, StoreError> {
        let mut query: Vec<(&str, String)> = vec![("select", NOTE_SELECT.to_string())];
        query.extend(filters.iter().cloned());
        let resp = self.rest(Method::GET, "notes").query(&query).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn patch_note(&self, id: Uuid, body: serde_json::Value) -> Result<(), StoreError> {
        let resp = self
            .rest(Method::PATCH, "notes")
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

impl NoteStore for SupabaseClient {
    async fn current_user(&self) -> Result<Uuid, StoreError> {
        let Some(token) = self.access_token() else {
            return Err(StoreError::Unauthenticated);
        };
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await?;
        let user: AuthUser = check(resp).await?.json().await?;
        Ok(user.id)
    }

    async fn upsert_note(&self, write: &NoteWrite) -> Result<Note, StoreError> {
        log::debug!(
            "Upserting note ({})",
            write.id.map_or_else(|| "insert".to_string(), |id| id.to_string())
        );
        let resp = self
            .rest(Method::POST, "notes")
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(write)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn insert_note(&self, write: &NoteWrite) -> Result<Note, StoreError> {
        let resp = self
            .rest(Method::POST, "notes")
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(write)
            .send()
            .await?;
        let note: Note = check(resp).await?.json().await?;
        log::info!("Inserted note {}", note.id);
        Ok(note)
    }

    async fn get_note(&self, id: Uuid) -> Result<Note, StoreError> {
        let resp = self
            .rest(Method::GET, "notes")
            .query(&[("select", NOTE_SELECT.to_string()), ("id", format!("eq.{}", id))])
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_ACCEPTABLE {
            return Err(StoreError::NotFound(id));
        }
        Ok(check(resp).await?.json().await?)
    }

    async fn list_feed(&self) -> Result<Vec<Note>, StoreError> {
        self.select_notes(&[
            ("is_archived", "eq.false".to_string()),
            ("order", "is_pinned.desc,created_at.desc".to_string()),
        ])
        .await
    }

    async fn list_pinned(&self) -> Result<Vec<Note>, StoreError> {
        self.select_notes(&[
            ("is_pinned", "eq.true".to_string()),
            ("is_archived", "eq.false".to_string()),
            ("order", "updated_at.desc".to_string()),
        ])
        .await
    }

    async fn search(&self, query: &str) -> Result<Vec<Note>, StoreError> {
        let q = search_term(query);
        if q.is_empty() {
            return Ok(Vec::new());
        }
        self.select_notes(&[
            ("or", format!("(content.ilike.*{q}*,title.ilike.*{q}*)")),
            ("is_archived", "eq.false".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", SEARCH_LIMIT.to_string()),
        ])
        .await
    }

    async fn set_pinned(&self, id: Uuid, pinned: bool) -> Result<(), StoreError> {
        self.patch_note(id, serde_json::json!({ "is_pinned": pinned })).await
    }

    async fn archive(&self, id: Uuid) -> Result<(), StoreError> {
        self.patch_note(id, serde_json::json!({ "is_archived": true })).await
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), StoreError> {
        let resp = self
            .rest(Method::DELETE, "notes")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete_notes(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let list = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        let resp = self
            .rest(Method::DELETE, "notes")
            .query(&[("id", format!("in.({})", list))])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>, StoreError> {
        let resp = self
            .rest(Method::GET, "tags")
            .query(&[
                ("select", "id,name".to_string()),
                ("name", format!("eq.{}", name)),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;
        let tags: Vec<Tag> = check(resp).await?.json().await?;
        Ok(tags.into_iter().next())
    }

    async fn insert_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let resp = self
            .rest(Method::POST, "tags")
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn upsert_note_tag(&self, link: NoteTag) -> Result<(), StoreError> {
        let resp = self
            .rest(Method::POST, "note_tags")
            .query(&[("on_conflict", "note_id,tag_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&link)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// Pass successful responses through; turn failures into a [`StoreError`].
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(classify_error(status, &text))
}

fn classify_error(status: StatusCode, body: &str) -> StoreError {
    let api: ApiError = serde_json::from_str(body).unwrap_or_default();
    let message = api
        .message
        .or(api.detail)
        .unwrap_or_else(|| body.to_string());

    if matches!(api.code.as_deref(), Some("PGRST204") | Some("42703")) {
        if let Some(column) = missing_column(&message) {
            return StoreError::MissingColumn(column);
        }
    }

    if status == StatusCode::UNAUTHORIZED {
        return StoreError::Unauthenticated;
    }

    StoreError::Http {
        status: status.as_u16(),
        message,
    }
}

/// Pull the column name out of a schema-cache or undefined-column message.
fn missing_column(message: &str) -> Option<String> {
    let caps = COLUMN_RE.captures(message)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Characters with meaning inside a PostgREST `or=(...)` filter are dropped.
fn search_term(query: &str) -> String {
    query
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '%' | '"' | '\\' | ':'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::note::NoteMetadata;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn note_row(id: Uuid, content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": null,
            "content": content,
            "user_id": Uuid::nil(),
            "created_at": "2026-02-01T10:00:00Z",
            "updated_at": "2026-02-01T10:00:00Z",
            "is_pinned": false,
            "is_archived": false
        })
    }

    #[test]
    fn schema_cache_message_names_the_column() {
        let body = r#"{"code":"PGRST204","details":null,"hint":null,"message":"Could not find the 'mood' column of 'notes' in the schema cache"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            StoreError::MissingColumn("mood".into())
        );
    }

    #[test]
    fn undefined_column_message_names_the_column() {
        let body = r#"{"code":"42703","message":"column \"locked_until\" of relation \"notes\" does not exist"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            StoreError::MissingColumn("locked_until".into())
        );
    }

    #[test]
    fn qualified_column_message_names_the_column() {
        let body = r#"{"code":"42703","message":"column notes.locked_until does not exist"}"#;
        assert_eq!(
            classify_error(StatusCode::BAD_REQUEST, body),
            StoreError::MissingColumn("locked_until".into())
        );
    }

    #[test]
    fn other_errors_keep_status_and_message() {
        let err = classify_error(StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert_eq!(
            err,
            StoreError::Http {
                status: 503,
                message: "upstream down".into()
            }
        );
        assert_eq!(
            classify_error(StatusCode::UNAUTHORIZED, r#"{"message":"JWT expired"}"#),
            StoreError::Unauthenticated
        );
    }

    #[test]
    fn search_term_drops_filter_syntax() {
        assert_eq!(search_term(" milk,(eggs)* "), "milkeggs");
    }

    #[tokio::test]
    async fn search_is_capped_and_skips_archived() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/notes"))
            .and(query_param("or", "(content.ilike.*milk*,title.ilike.*milk*)"))
            .and(query_param("is_archived", "eq.false"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                note_row(Uuid::new_v4(), "<p>milk</p>")
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon").unwrap();
        assert_eq!(client.search("milk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn current_user_without_token_is_unauthenticated() {
        let client = SupabaseClient::new("http://localhost:1", "anon").unwrap();
        assert_eq!(client.current_user().await, Err(StoreError::Unauthenticated));
    }

    #[tokio::test]
    async fn upsert_posts_merge_duplicates_and_decodes_row() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/rest/v1/notes"))
            .and(query_param("on_conflict", "id"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(serde_json::json!({ "content": "<p>Buy milk</p>" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(note_row(id, "<p>Buy milk</p>")))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon")
            .unwrap()
            .with_access_token("tok");
        let write = NoteWrite::full(
            None,
            Uuid::nil(),
            "<p>Buy milk</p>",
            None,
            None,
            &NoteMetadata::default(),
        );
        let note = client.upsert_note(&write).await.unwrap();
        assert_eq!(note.id, id);
    }

    #[tokio::test]
    async fn upsert_reports_missing_column() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notes"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "PGRST204",
                "message": "Could not find the 'expires_at' column of 'notes' in the schema cache"
            })))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon")
            .unwrap()
            .with_access_token("tok");
        let write = NoteWrite::full(None, Uuid::nil(), "x", None, None, &NoteMetadata::default());
        assert_eq!(
            client.upsert_note(&write).await,
            Err(StoreError::MissingColumn("expires_at".into()))
        );
    }

    #[tokio::test]
    async fn find_tag_returns_first_match() {
        let server = MockServer::start().await;
        let tag_id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/tags"))
            .and(query_param("name", "eq.groceries"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "id": tag_id, "name": "groceries" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tags"))
            .and(query_param("name", "eq.nothing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon").unwrap();
        let tag = client.find_tag("groceries").await.unwrap().unwrap();
        assert_eq!(tag.id, tag_id);
        assert_eq!(client.find_tag("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_note_maps_empty_singular_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/notes"))
            .respond_with(ResponseTemplate::new(406).set_body_json(serde_json::json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned"
            })))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon").unwrap();
        let id = Uuid::new_v4();
        assert_eq!(client.get_note(id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn anonymous_sign_in_adopts_token() {
        let server = MockServer::start().await;
        let user_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "refresh_token": "r",
                "user": { "id": user_id }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": user_id })),
            )
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon").unwrap();
        client.sign_in_anonymously().await.unwrap();
        assert_eq!(client.current_user().await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn sign_out_revokes_and_forgets_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "anon")
            .unwrap()
            .with_access_token("tok");
        client.sign_out().await.unwrap();
        assert_eq!(client.current_user().await, Err(StoreError::Unauthenticated));
        // Already signed out: no second request.
        client.sign_out().await.unwrap();
    }
}
