//! Authenticated network session acquisition.
//!
//! Providers that require authentication use the OAuth2
//! client-credentials flow: exchange a client id/secret for a bearer
//! token, then attach the token to every subsequent request. The
//! resulting [`Session`] is passed through the core unopened; only
//! loaders look inside.

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;

/// Errors that occur while acquiring an authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint could not be reached or returned an error status.
    #[error("token exchange request failed: {0}")]
    TokenRequest(#[source] reqwest::Error),

    /// The token endpoint's response body was not the expected shape.
    #[error("malformed token response: {0}")]
    TokenResponse(#[source] reqwest::Error),

    /// The bearer token contains bytes that are not valid in a header.
    #[error("access token is not a valid header value")]
    InvalidToken(#[source] header::InvalidHeaderValue),

    /// Building the HTTP client failed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// An authenticated (or anonymous) HTTP session.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
}

impl Session {
    /// An unauthenticated session, for providers with open downloads.
    pub fn anonymous() -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(AuthError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Performs the OAuth2 client-credentials exchange against
    /// `token_url` and returns a session that sends the bearer token on
    /// every request.
    #[tracing::instrument(skip(client_secret), err)]
    pub async fn authenticate(
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<Self, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let token: TokenResponse = reqwest::Client::new()
            .post(token_url)
            .form(&form)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(AuthError::TokenRequest)?
            .json()
            .await
            .map_err(AuthError::TokenResponse)?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.access_token))
            .map_err(AuthError::InvalidToken)?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(AuthError::ClientBuild)?;

        Ok(Self { client })
    }

    /// The HTTP client carrying this session's credentials.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
