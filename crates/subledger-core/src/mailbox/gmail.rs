//! Gmail REST implementation of [`MailboxProvider`].

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use subledger_oauth::provider::GMAIL_READONLY_SCOPE;
use subledger_oauth::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
use tracing::{debug, warn};
use url::Url;

use super::{
    AccessToken, CandidateStream, MailMessage, MailboxError, MailboxProvider, TokenGrant,
    candidate_query, classify_oauth_error,
};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const PAGE_SIZE: u32 = 100;

/// Gmail API client.
#[derive(Debug, Clone)]
pub struct GmailClient {
    oauth: OAuthClient,
    http: Client,
    api_base: String,
    lookback: Duration,
}

impl GmailClient {
    /// Create a client using the given `OAuth2` registration.
    #[must_use]
    pub fn new(oauth: OAuthClient) -> Self {
        let http = Client::new();
        Self {
            oauth: oauth.with_http_client(http.clone()),
            http,
            api_base: GMAIL_API_BASE.to_string(),
            lookback: Duration::days(180),
        }
    }

    /// Override the API base URL (used against mock servers).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set how far back the first scan reaches.
    #[must_use]
    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = Duration::days(days);
        self
    }

    async fn list_page(
        &self,
        access_token: &AccessToken,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<ListResponse, MailboxError> {
        let mut request = self
            .http
            .get(format!("{}/messages", self.api_base))
            .bearer_auth(access_token.secret())
            .query(&[("q", query), ("maxResults", &PAGE_SIZE.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(transport_error)?;
        read_json(response, "list").await
    }
}

#[async_trait]
impl MailboxProvider for GmailClient {
    fn authorization_url(&self, state: &str, pkce: &PkceChallenge) -> Result<Url, MailboxError> {
        if self.oauth.client_id.is_empty() {
            return Err(subledger_oauth::Error::InvalidConfig("OAuth client id is not set".into()).into());
        }
        Ok(AuthorizationCodeFlow::new(&self.oauth).authorization_url(None, state, Some(pkce))?)
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenGrant, MailboxError> {
        let token = self
            .oauth
            .exchange_code(code, None, Some(pkce_verifier))
            .await
            .map_err(classify_oauth_error)?;
        if !token.grants(GMAIL_READONLY_SCOPE) {
            return Err(subledger_oauth::Error::oauth_error(
                "insufficient_scope",
                "read access to Gmail was not granted",
            )
            .into());
        }
        Ok(TokenGrant::from(token))
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, MailboxError> {
        self.oauth
            .refresh(refresh_token)
            .await
            .map(TokenGrant::from)
            .map_err(classify_oauth_error)
    }

    async fn revoke_token(&self, token: &str) -> Result<(), MailboxError> {
        self.oauth.revoke(token).await.map_err(classify_oauth_error)
    }

    fn list_candidates<'a>(
        &'a self,
        access_token: &'a AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> CandidateStream<'a> {
        let since = since.unwrap_or_else(|| Utc::now() - self.lookback);
        let query = candidate_query(since);
        debug!(%query, "Listing candidate messages");

        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let query = query.clone();
            async move {
                let page_token = match cursor {
                    Cursor::Start => None,
                    Cursor::Next(token) => Some(token),
                    Cursor::Done => return Ok::<_, MailboxError>(None),
                };
                let page = self
                    .list_page(access_token, &query, page_token.as_deref())
                    .await?;
                let next = page.next_page_token.map_or(Cursor::Done, Cursor::Next);
                let ids: Vec<_> = page.messages.into_iter().map(|m| m.id).collect();
                Ok(Some((ids, next)))
            }
        });

        pages
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn fetch_message(
        &self,
        access_token: &AccessToken,
        id: &str,
    ) -> Result<MailMessage, MailboxError> {
        let response = self
            .http
            .get(format!("{}/messages/{id}", self.api_base))
            .bearer_auth(access_token.secret())
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MailboxError::NotFound(id.to_string()));
        }

        let message: GmailMessage = read_json(response, "get").await?;
        message.into_mail_message()
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: String,
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// First decoded part with the given MIME type, depth first.
    fn find_text(&self, mime_type: &str) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case(mime_type)
            && let Some(data) = self.body.as_ref().and_then(|b| b.data.as_deref())
        {
            return decode_body(data);
        }
        self.parts.iter().find_map(|p| p.find_text(mime_type))
    }
}

impl GmailMessage {
    fn into_mail_message(self) -> Result<MailMessage, MailboxError> {
        let payload = self.payload.unwrap_or_default();

        let received_at = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .or_else(|| {
                payload
                    .header("Date")
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|d| d.with_timezone(&Utc))
            })
            .ok_or_else(|| MailboxError::Malformed(format!("message {} has no date", self.id)))?;

        let body = payload
            .find_text("text/plain")
            .filter(|t| !t.trim().is_empty())
            .or_else(|| payload.find_text("text/html").map(|html| html_to_text(&html)))
            .unwrap_or_default();

        Ok(MailMessage {
            sender: payload.header("From").unwrap_or_default().to_string(),
            subject: payload.header("Subject").unwrap_or_default().to_string(),
            received_at,
            body,
            snippet: decode_entities(&self.snippet),
            id: self.id,
        })
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn html_to_text(html: &str) -> String {
    htmd::convert(html).unwrap_or_else(|e| {
        warn!("HTML conversion failed: {e}");
        html.to_string()
    })
}

fn decode_entities(text: &str) -> String {
    text.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn transport_error(err: reqwest::Error) -> MailboxError {
    MailboxError::Unavailable(err.to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
    operation: &str,
) -> Result<T, MailboxError> {
    let status = response.status();
    if !status.is_success() {
        let detail = format!("{operation} returned {status}");
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MailboxError::Unauthorized(detail),
            StatusCode::NOT_FOUND => MailboxError::NotFound(detail),
            s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                MailboxError::Unavailable(detail)
            }
            _ => MailboxError::Malformed(detail),
        });
    }
    let body = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&body).map_err(|e| MailboxError::Malformed(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use subledger_oauth::Provider;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GmailClient {
        let provider = Provider::google_readonly().unwrap();
        GmailClient::new(OAuthClient::new("client", provider)).with_api_base(server.uri())
    }

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[tokio::test]
    async fn test_list_candidates_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("pageToken", "p2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "messages": [{"id": "m3", "threadId": "t3"}]
                })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
                    "nextPageToken": "p2"
                })),
            )
            .mount(&server)
            .await;

        let gmail = client(&server);
        let token = AccessToken::new("tok");
        let ids: Vec<String> = gmail
            .list_candidates(&token, Some(Utc::now()))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_list_candidates_reads_every_page() {
        const PAGES: usize = 25;
        let server = MockServer::start().await;
        let page = |n: usize| {
            let ids: Vec<_> = (0..PAGE_SIZE as usize)
                .map(|i| serde_json::json!({"id": format!("m{}", n * PAGE_SIZE as usize + i)}))
                .collect();
            let mut body = serde_json::json!({ "messages": ids });
            if n + 1 < PAGES {
                body["nextPageToken"] = serde_json::json!(format!("p{}", n + 1));
            }
            ResponseTemplate::new(200).set_body_json(body)
        };
        for n in 1..PAGES {
            Mock::given(method("GET"))
                .and(path("/messages"))
                .and(query_param("pageToken", format!("p{n}")))
                .respond_with(page(n))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/messages"))
            .respond_with(page(0))
            .mount(&server)
            .await;

        let gmail = client(&server);
        let token = AccessToken::new("tok");
        let ids: Vec<String> = gmail
            .list_candidates(&token, None)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids.len(), PAGES * PAGE_SIZE as usize);
        assert_eq!(ids.last().map(String::as_str), Some("m2499"));
    }

    #[tokio::test]
    async fn test_list_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let gmail = client(&server);
        let token = AccessToken::new("stale");
        let result: Result<Vec<String>, _> =
            gmail.list_candidates(&token, None).try_collect().await;
        assert!(matches!(result, Err(MailboxError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_fetch_prefers_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "snippet": "Your receipt from Netflix &amp; more",
                "internalDate": "1767225600000",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [
                        {"name": "From", "value": "Netflix <info@account.netflix.com>"},
                        {"name": "Subject", "value": "Your Netflix receipt"}
                    ],
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": encode("<p>html</p>")}},
                        {"mimeType": "text/plain", "body": {"data": encode("Total: $15.49")}}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let gmail = client(&server);
        let msg = gmail
            .fetch_message(&AccessToken::new("tok"), "m1")
            .await
            .unwrap();
        assert_eq!(msg.sender, "Netflix <info@account.netflix.com>");
        assert_eq!(msg.subject, "Your Netflix receipt");
        assert_eq!(msg.body, "Total: $15.49");
        assert_eq!(msg.snippet, "Your receipt from Netflix & more");
        assert_eq!(msg.received_at.timestamp(), 1_767_225_600);
    }

    #[tokio::test]
    async fn test_fetch_html_only_is_converted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/m2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m2",
                "internalDate": "1767225600000",
                "payload": {
                    "mimeType": "text/html",
                    "headers": [{"name": "Subject", "value": "Receipt"}],
                    "body": {"data": encode("<p>Amount <b>$9.99</b></p>")}
                }
            })))
            .mount(&server)
            .await;

        let msg = client(&server)
            .fetch_message(&AccessToken::new("tok"), "m2")
            .await
            .unwrap();
        assert!(msg.body.contains("$9.99"));
        assert!(!msg.body.contains("<p>"));
    }

    #[tokio::test]
    async fn test_fetch_missing_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_message(&AccessToken::new("tok"), "gone")
            .await;
        assert!(matches!(result, Err(MailboxError::NotFound(id)) if id == "gone"));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/m1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_message(&AccessToken::new("tok"), "m1")
            .await;
        assert!(matches!(result, Err(MailboxError::Unavailable(_))));
    }

    #[test]
    fn test_missing_client_id_is_configuration_error() {
        let gmail = GmailClient::new(OAuthClient::new("", Provider::google_readonly().unwrap()));
        let err = gmail
            .authorization_url("state", &PkceChallenge::generate())
            .unwrap_err();
        assert!(matches!(
            err.into_error(crate::UserId::new(1)),
            crate::Error::Configuration(_)
        ));
    }

    async fn token_server(scope: &str) -> (MockServer, GmailClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access",
                "expires_in": 3600,
                "refresh_token": "refresh",
                "scope": scope
            })))
            .mount(&server)
            .await;
        let provider = Provider::new(
            "Test",
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
        )
        .unwrap();
        let gmail = GmailClient::new(OAuthClient::new("client", provider));
        (server, gmail)
    }

    #[tokio::test]
    async fn test_exchange_requires_read_scope() {
        let (_server, gmail) = token_server("email").await;
        let err = gmail.exchange_code("code", "verifier").await.unwrap_err();
        assert!(matches!(err, MailboxError::OAuth(_)));

        let (_server, gmail) = token_server(&format!("email {GMAIL_READONLY_SCOPE}")).await;
        let grant = gmail.exchange_code("code", "verifier").await.unwrap();
        assert_eq!(grant.refresh_token.as_deref(), Some("refresh"));
    }
}
