//! HTTP transport for chart repositories
//!
//! Wraps a `reqwest::Client` configured from a repository entry's TLS and
//! credential settings. Redirects are followed manually so basic-auth
//! credentials are never forwarded to another origin unless the entry opts
//! in with `pass_credentials_all`.

use base64::Engine;
use std::time::Duration;
use url::Url;

use crate::config::RepositoryEntry;
use crate::error::{RepoError, Result};

const MAX_REDIRECTS: u32 = 10;

/// Transport options for a repository client
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Accept any server certificate
    pub insecure_skip_tls_verify: bool,

    /// Whole-request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// HTTP client scoped to one repository
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    client: reqwest::Client,
    auth_header: Option<String>,
    pass_credentials_all: bool,
}

impl RepositoryClient {
    /// Build a client for a repository entry
    ///
    /// `options.insecure_skip_tls_verify` disables verification in addition
    /// to the entry's own flag; neither can re-enable what the other disabled.
    pub fn for_entry(entry: &RepositoryEntry, options: &HttpOptions) -> Result<Self> {
        let insecure = entry.insecure_skip_tls_verify || options.insecure_skip_tls_verify;

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(insecure);

        if insecure {
            tracing::warn!(repository = %entry.name, url = %entry.url, "TLS verification disabled for repository");
        }

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(ca_file) = &entry.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| RepoError::Tls {
                message: format!("cannot read CA file {}: {}", ca_file.display(), e),
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| RepoError::Tls {
                message: format!("invalid CA file {}: {}", ca_file.display(), e),
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        match (&entry.cert_file, &entry.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let mut pem = std::fs::read(cert_file).map_err(|e| RepoError::Tls {
                    message: format!("cannot read certificate {}: {}", cert_file.display(), e),
                })?;
                let key = std::fs::read(key_file).map_err(|e| RepoError::Tls {
                    message: format!("cannot read key {}: {}", key_file.display(), e),
                })?;
                pem.push(b'\n');
                pem.extend_from_slice(&key);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::Tls {
                    message: format!("invalid client certificate: {}", e),
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(RepoError::Tls {
                    message: "certFile and keyFile must be set together".to_string(),
                });
            }
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;

        let auth_header = entry.has_credentials().then(|| {
            let raw = format!("{}:{}", entry.username, entry.password);
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
            )
        });

        Ok(Self {
            client,
            auth_header,
            pass_credentials_all: entry.pass_credentials_all,
        })
    }

    /// Client without credentials or custom TLS settings
    pub fn public(options: &HttpOptions) -> Result<Self> {
        Self::for_entry(&RepositoryEntry::default(), options)
    }

    /// Fetch a URL with secure redirect handling
    ///
    /// Credentials are only attached to requests whose origin matches
    /// `credential_origin`, the repository's own URL.
    pub async fn get(&self, url: &str, credential_origin: &str) -> Result<reqwest::Response> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(&current_url);

            if let Some(auth) = &self.auth_header {
                if self.pass_credentials_all || same_origin(credential_origin, &current_url) {
                    request = request.header(reqwest::header::AUTHORIZATION, auth);
                } else {
                    tracing::warn!(
                        "Request to {} leaves the origin of {} - credentials not forwarded",
                        current_url,
                        credential_origin
                    );
                }
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                current_url = Url::parse(&current_url)?.join(location)?.to_string();
                continue;
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                return Err(RepoError::RateLimited { retry_after });
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(RepoError::AuthRequired { url: current_url });
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(RepoError::AuthFailed {
                    message: format!("Access denied to {}", current_url),
                });
            }

            if !status.is_success() {
                return Err(RepoError::HttpError {
                    status: status.as_u16(),
                    message: format!("Request to {} failed", current_url),
                });
            }

            return Ok(response);
        }
    }

    /// Fetch the body of a URL
    pub async fn get_bytes(&self, url: &str, credential_origin: &str) -> Result<Vec<u8>> {
        let response = self.get(url, credential_origin).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Whether two URLs share scheme, host and port
pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host() == b.host()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

/// Resolve a chart URL from an index against the repository base URL
///
/// Index entries may carry absolute URLs or paths relative to the
/// repository root.
pub fn resolve_reference_url(base: &str, reference: &str) -> Result<String> {
    if let Ok(absolute) = Url::parse(reference) {
        return Ok(absolute.to_string());
    }

    let mut base = Url::parse(base).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(reference)?.to_string())
}

/// URL of a repository's `index.yaml`
pub fn index_url(repository_url: &str) -> Result<String> {
    let mut url = Url::parse(repository_url).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: repository_url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RepoError::InvalidRepositoryUrl {
            url: repository_url.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    let path = format!("{}/index.yaml", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}
