use crate::{
    error::ConnectorError,
    http::layout::{ResponseLayout, parse_page},
};
use async_trait::async_trait;
use engine_core::{
    connectors::{
        secrets::SecretStore,
        source::{AdSource, Page, PageRequest},
    },
    error::SourceError,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::debug;

const MAX_ERROR_BODY: usize = 512;

/// Authenticated JSON endpoint of an ad platform, one instance per entity.
#[derive(Clone)]
pub struct HttpAdSource {
    client: Client,
    url: String,
    identifier: Option<String>,
    credential: String,
    secrets: Arc<dyn SecretStore>,
    layout: ResponseLayout,
}

impl HttpAdSource {
    pub fn builder(base_url: &str, path: &str) -> HttpAdSourceBuilder {
        HttpAdSourceBuilder::new(base_url, path)
    }

    fn query(&self, request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(4);
        if let Some(watermark) = &request.watermark {
            query.push(("start_date", watermark.to_query_param()));
        }
        query.push(("end_date", request.until.format("%Y-%m-%d").to_string()));
        if let Some(identifier) = &self.identifier {
            query.push(("identifier", identifier.clone()));
        }
        if let Some(cursor) = &request.cursor {
            query.push(("cursor", cursor.clone()));
        }
        query
    }
}

#[async_trait]
impl AdSource for HttpAdSource {
    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        let token = self.secrets.get_credential(&self.credential).await?;

        let response = self
            .client
            .get(&self.url)
            .bearer_auth(token.expose())
            .header(header::ACCEPT, "application/json")
            .query(&self.query(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(url = %self.url, %status, cursor = ?request.cursor, "Received page response");

        if !status.is_success() {
            let retry_after = retry_after(response.headers(), Utc::now());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body));
        }

        // a body that stalls or is cut off is a transport failure, only a
        // complete body that is not JSON is a decode failure
        let bytes = response.bytes().await.map_err(transport_error)?;
        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
        parse_page(&self.layout, &body)
    }
}

fn transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else {
        // without_url keeps query parameters out of the message
        SourceError::Network(err.without_url().to_string())
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> SourceError {
    let code = status.as_u16();
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::Throttled { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth { status: code },
        StatusCode::GONE => SourceError::UnsupportedVersion(truncate(body)),
        StatusCode::REQUEST_TIMEOUT => SourceError::Timeout,
        s if s.is_server_error() => SourceError::Server { status: code },
        _ => SourceError::BadRequest {
            status: code,
            body: truncate(body),
        },
    }
}

/// `Retry-After` as delay-seconds or as an HTTP-date. A date in the past
/// means retry now.
fn retry_after(headers: &header::HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Builder for [`HttpAdSource`].
pub struct HttpAdSourceBuilder {
    url: String,
    identifier: Option<String>,
    credential: Option<String>,
    timeout: Duration,
    layout: ResponseLayout,
}

impl HttpAdSourceBuilder {
    fn new(base_url: &str, path: &str) -> Self {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Self {
            url,
            identifier: None,
            credential: None,
            timeout: Duration::from_secs(30),
            layout: ResponseLayout::Nested,
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Name of the secret holding the bearer token.
    pub fn credential(mut self, name: impl Into<String>) -> Self {
        self.credential = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn layout(mut self, layout: ResponseLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn build(self, secrets: Arc<dyn SecretStore>) -> Result<HttpAdSource, ConnectorError> {
        reqwest::Url::parse(&self.url).map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
        let credential = self
            .credential
            .ok_or_else(|| ConnectorError::MissingCredential(self.url.clone()))?;
        let client = Client::builder().timeout(self.timeout).build()?;

        Ok(HttpAdSource {
            client,
            url: self.url,
            identifier: self.identifier,
            credential,
            secrets,
            layout: self.layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::EnvSecretStore;
    use chrono::NaiveDate;
    use model::core::watermark::Watermark;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn secrets() -> Arc<dyn SecretStore> {
        Arc::new(EnvSecretStore::from_map(HashMap::from([(
            "ADS_TOKEN".to_string(),
            "tok-123".to_string(),
        )])))
    }

    fn source(server: &MockServer) -> HttpAdSource {
        HttpAdSource::builder(&server.uri(), "/v1/report")
            .identifier("acct-9")
            .credential("ADS_TOKEN")
            .timeout(Duration::from_secs(2))
            .build(secrets())
            .unwrap()
    }

    fn request(cursor: Option<&str>) -> PageRequest {
        PageRequest {
            watermark: Some("2024-03-01".parse::<Watermark>().unwrap()),
            until: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            cursor: cursor.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn sends_authenticated_request_and_parses_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/report"))
            .and(header_eq("authorization", "Bearer tok-123"))
            .and(header_eq("accept", "application/json"))
            .and(query_param("start_date", "2024-03-01"))
            .and(query_param("end_date", "2024-03-10"))
            .and(query_param("identifier", "acct-9"))
            .and(query_param("cursor", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "hasNextPage": true,
                "nextCursor": "p3",
                "data": {"campaigns": [{"name": "c", "ads": [{"name": "a", "metrics": [{"date": "2024-03-02"}]}]}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server).fetch_page(&request(Some("p2"))).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("p3"));
    }

    #[tokio::test]
    async fn throttling_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(&request(None)).await.unwrap_err();
        assert_eq!(
            err,
            SourceError::Throttled {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let headers = |value: &str| {
            let mut map = header::HeaderMap::new();
            map.insert(header::RETRY_AFTER, value.parse().unwrap());
            map
        };

        assert_eq!(
            retry_after(&headers("120"), now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            retry_after(&headers("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            retry_after(&headers("Wed, 21 Oct 2015 07:00:00 GMT"), now),
            Some(Duration::ZERO)
        );
        assert_eq!(retry_after(&headers("soon"), now), None);
        assert_eq!(retry_after(&header::HeaderMap::new(), now), None);
    }

    #[tokio::test]
    async fn throttling_carries_http_date_retry_after() {
        let server = MockServer::start().await;
        let at = (Utc::now() + chrono::Duration::seconds(90)).to_rfc2822();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", at.as_str()))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(&request(None)).await.unwrap_err();
        let SourceError::Throttled {
            retry_after: Some(wait),
        } = &err
        else {
            panic!("expected a throttle with a hint, got {err:?}");
        };
        assert!(*wait > Duration::from_secs(80) && *wait <= Duration::from_secs(90));
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let cases = [
            (503, SourceError::Server { status: 503 }),
            (401, SourceError::Auth { status: 401 }),
            (
                422,
                SourceError::BadRequest {
                    status: 422,
                    body: "bad field".into(),
                },
            ),
        ];
        for (code, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(code).set_body_string("bad field"))
                .mount(&server)
                .await;
            let err = source(&server).fetch_page(&request(None)).await.unwrap_err();
            assert_eq!(err, expected);
        }
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "SUCCESS"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(&request(None)).await.unwrap_err();
        assert_eq!(err, SourceError::Timeout);
    }

    /// Serves a 200 whose headers promise more body than is ever sent, then
    /// either stalls or hangs up.
    async fn truncated_body_server(hang_up: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                      content-length: 200\r\n\r\n{\"status\": \"SUC",
                )
                .await
                .unwrap();
            socket.flush().await.unwrap();
            if !hang_up {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        });
        format!("http://{addr}")
    }

    fn raw_source(base_url: &str) -> HttpAdSource {
        HttpAdSource::builder(base_url, "/v1/report")
            .credential("ADS_TOKEN")
            .timeout(Duration::from_secs(1))
            .build(secrets())
            .unwrap()
    }

    #[tokio::test]
    async fn stalled_body_is_a_timeout() {
        let base = truncated_body_server(false).await;
        let err = raw_source(&base).fetch_page(&request(None)).await.unwrap_err();
        assert_eq!(err, SourceError::Timeout);
    }

    #[tokio::test]
    async fn cut_off_body_is_a_network_error() {
        let base = truncated_body_server(true).await;
        let err = raw_source(&base).fetch_page(&request(None)).await.unwrap_err();
        assert!(matches!(err, SourceError::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(&request(None)).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_credential_fails_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let src = HttpAdSource::builder(&server.uri(), "report")
            .credential("OTHER")
            .build(secrets())
            .unwrap();
        let err = src.fetch_page(&request(None)).await.unwrap_err();
        assert!(matches!(err, SourceError::Credential(_)));
    }
}
