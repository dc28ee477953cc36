use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::Settings;
use crate::state::AppState;

/// Only access tokens authorize API calls.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by a herd access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Claims {
	pub user_id: i64,
	pub username: String,
	pub token_type: String,
	pub iss: String,
	pub exp: u64,
	pub iat: u64,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
	pub user_id: i64,
	pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("Authentication credentials were not provided.")]
	MissingCredentials,
	#[error("Authorization header must be of the form 'Bearer <token>'")]
	MalformedHeader,
	#[error("Given token not valid for any token type: {0}")]
	InvalidToken(#[from] jsonwebtoken::errors::Error),
	#[error("Token has wrong type '{0}'")]
	WrongTokenType(String),
	#[error("failed to sign token: {0}")]
	Signing(jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
	fn into_response(self) -> Response {
		if let AuthError::Signing(_) = self {
			return (
				StatusCode::INTERNAL_SERVER_ERROR,
				Json(json!({ "detail": self.to_string() })),
			)
				.into_response();
		}
		let mut res = (
			StatusCode::UNAUTHORIZED,
			Json(json!({ "detail": self.to_string() })),
		)
			.into_response();
		res.headers_mut()
			.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer realm=\"api\""));
		res
	}
}

/// Signs and verifies HS256 access tokens for a single issuer.
pub struct TokenAuthority {
	encoding: EncodingKey,
	decoding: DecodingKey,
	issuer: String,
	lifetime_secs: u64,
}

impl TokenAuthority {
	pub fn new(secret: &str, issuer: impl Into<String>, lifetime_secs: u64) -> Self {
		Self {
			encoding: EncodingKey::from_secret(secret.as_bytes()),
			decoding: DecodingKey::from_secret(secret.as_bytes()),
			issuer: issuer.into(),
			lifetime_secs,
		}
	}

	pub fn from_settings(settings: &Settings) -> Self {
		Self::new(
			&settings.jwt_secret,
			settings.jwt_issuer.clone(),
			settings.token_lifetime_secs,
		)
	}

	/// Mint an access token for `user_id` valid for the configured lifetime.
	pub fn issue(&self, user_id: i64, username: &str) -> Result<String, AuthError> {
		let now = Utc::now().timestamp().max(0) as u64;
		self.sign(&Claims {
			user_id,
			username: username.to_string(),
			token_type: ACCESS_TOKEN_TYPE.to_string(),
			iss: self.issuer.clone(),
			exp: now + self.lifetime_secs,
			iat: now,
		})
	}

	pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
		encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(AuthError::Signing)
	}

	/// Check signature, issuer, expiry and token type.
	pub fn validate(&self, token: &str) -> Result<Caller, AuthError> {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.set_issuer(&[&self.issuer]);
		validation.leeway = 0;

		let data = decode::<Claims>(token, &self.decoding, &validation)?;
		if data.claims.token_type != ACCESS_TOKEN_TYPE {
			return Err(AuthError::WrongTokenType(data.claims.token_type));
		}
		debug!("token validated for user {}", data.claims.user_id);
		Ok(Caller {
			user_id: data.claims.user_id,
			username: data.claims.username,
		})
	}

	/// Pull the bearer token out of an `Authorization` header value.
	pub fn bearer(header: Option<&HeaderValue>) -> Result<&str, AuthError> {
		let value = header
			.ok_or(AuthError::MissingCredentials)?
			.to_str()
			.map_err(|_| AuthError::MalformedHeader)?;
		let mut parts = value.split_whitespace();
		match (parts.next(), parts.next(), parts.next()) {
			(Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
			_ => Err(AuthError::MalformedHeader),
		}
	}
}

impl FromRequestParts<AppState> for Caller {
	type Rejection = AuthError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let result = TokenAuthority::bearer(parts.headers.get(AUTHORIZATION))
			.and_then(|token| state.auth.validate(token));
		if let Err(e) = &result {
			state.metrics.auth_failures_total.inc();
			warn!("rejected request to {}: {}", parts.uri.path(), e);
		}
		result
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	fn authority() -> TokenAuthority {
		TokenAuthority::new("test-secret", "highlander-herd", 3600)
	}

	#[test]
	fn issued_token_validates() {
		let auth = authority();
		let token = auth.issue(7, "ailsa").unwrap();
		let caller = auth.validate(&token).unwrap();
		assert_eq!(
			caller,
			Caller {
				user_id: 7,
				username: "ailsa".to_string()
			}
		);
	}

	#[test]
	fn expired_token_is_rejected() {
		let auth = authority();
		let now = Utc::now().timestamp() as u64;
		let token = auth
			.sign(&Claims {
				user_id: 7,
				username: "ailsa".to_string(),
				token_type: ACCESS_TOKEN_TYPE.to_string(),
				iss: "highlander-herd".to_string(),
				exp: now - 10,
				iat: now - 3610,
			})
			.unwrap();
		assert!(matches!(
			auth.validate(&token),
			Err(AuthError::InvalidToken(_))
		));
	}

	#[test]
	fn foreign_secret_or_issuer_is_rejected() {
		let token = TokenAuthority::new("other-secret", "highlander-herd", 3600)
			.issue(1, "x")
			.unwrap();
		assert!(authority().validate(&token).is_err());

		let token = TokenAuthority::new("test-secret", "someone-else", 3600)
			.issue(1, "x")
			.unwrap();
		assert!(authority().validate(&token).is_err());
	}

	#[test]
	fn refresh_tokens_do_not_authorize() {
		let auth = authority();
		let now = Utc::now().timestamp() as u64;
		let token = auth
			.sign(&Claims {
				user_id: 7,
				username: "ailsa".to_string(),
				token_type: "refresh".to_string(),
				iss: "highlander-herd".to_string(),
				exp: now + 60,
				iat: now,
			})
			.unwrap();
		assert!(matches!(
			auth.validate(&token),
			Err(AuthError::WrongTokenType(_))
		));
	}

	#[test]
	fn bearer_header_parsing() {
		let ok = HeaderValue::from_static("Bearer abc.def.ghi");
		assert_eq!(TokenAuthority::bearer(Some(&ok)).unwrap(), "abc.def.ghi");
		assert!(matches!(
			TokenAuthority::bearer(None),
			Err(AuthError::MissingCredentials)
		));
		let basic = HeaderValue::from_static("Basic Zm9vOmJhcg==");
		assert!(matches!(
			TokenAuthority::bearer(Some(&basic)),
			Err(AuthError::MalformedHeader)
		));
	}
}
