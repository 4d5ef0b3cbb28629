//! HTTP access to deployed applications
//!
//! Applications are reached through their route on the shared apps domain.

use std::time::Duration;

use crate::common::{Config, Error, Result};

#[derive(Debug, Clone)]
pub struct AppClient {
    http: reqwest::Client,
    protocol: &'static str,
    apps_domain: String,
}

impl AppClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.http_request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(config.platform.skip_ssl_validation)
            .build()?;

        Ok(Self {
            http,
            protocol: config.protocol(),
            apps_domain: config.platform.apps_domain.clone(),
        })
    }

    /// URL of `path` on the application's route
    pub fn app_url(&self, app: &str, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        format!(
            "{}{}.{}{}",
            self.protocol,
            app.to_lowercase(),
            self.apps_domain,
            path
        )
    }

    /// GET `path` on the application and return the body
    ///
    /// The body is returned whatever the status code, like curl would; only
    /// transport failures are errors.
    pub async fn curl(&self, app: &str, path: &str) -> Result<String> {
        self.get(&self.app_url(app, path)).await
    }

    /// GET an absolute URL and return the body
    pub async fn get(&self, url: &str) -> Result<String> {
        tracing::trace!(%url, "curling app");
        let response = self.http.get(url).send().await.map_err(|e| {
            Error::Internal(format!("GET {} failed: {}", url, describe_transport_error(&e)))
        })?;
        let status = response.status();
        let body = response.text().await?;
        tracing::trace!(%url, %status, "app responded");
        Ok(body)
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("connection refused or unreachable ({})", e)
    } else if e.is_timeout() {
        format!("request timed out ({})", e)
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client_for(domain: &str) -> AppClient {
        let mut config = Config::default();
        config.platform.use_http = true;
        config.platform.apps_domain = domain.to_string();
        config.timeouts.http_request_secs = 2;
        AppClient::new(&config).unwrap()
    }

    #[test]
    fn test_app_url() {
        let client = client_for("apps.example.com");
        assert_eq!(
            client.app_url("CATS-APP-1", "/"),
            "http://cats-app-1.apps.example.com/"
        );
        assert_eq!(
            client.app_url("dora", "health"),
            "http://dora.apps.example.com/health"
        );
    }

    #[tokio::test]
    async fn test_curl_returns_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "Hi, I'm Dora!";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let client = client_for("apps.example.com");
        let body = client
            .get(&format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap();
        assert_eq!(body, "Hi, I'm Dora!");
    }

    #[tokio::test]
    async fn test_curl_unreachable_reports_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for("apps.example.com");
        let err = client
            .get(&format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
