// Firebase ID token verification and the AuthenticatedUser extractor for buyer-only routes

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{config::Settings, error::AppError, AppState};

const GOOGLE_PUBLIC_KEYS_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";
const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const DEFAULT_KEY_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub aud: String, // Firebase Project ID
    pub iss: String,
    pub sub: String, // Firebase user ID
    pub exp: usize,
    pub iat: usize,
    pub email: Option<String>,
}

// Google's signing keys, refreshed once Cache-Control max-age has passed
struct CachedKeys {
    keys: Arc<HashMap<String, DecodingKey>>,
    fetched_at: std::time::Instant,
    max_age: Duration,
}

static PUBLIC_KEYS: Lazy<tokio::sync::RwLock<Option<CachedKeys>>> =
    Lazy::new(|| tokio::sync::RwLock::new(None));

// Reads max-age out of a Cache-Control header value
fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|part| {
        part.trim()
            .strip_prefix("max-age=")
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

async fn google_keys(http_client: &Client) -> Result<Arc<HashMap<String, DecodingKey>>, AppError> {
    {
        let cache = PUBLIC_KEYS.read().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.fetched_at.elapsed() < c.max_age) {
            return Ok(cached.keys.clone());
        }
    }

    info!("Fetching Google public keys from {}", GOOGLE_PUBLIC_KEYS_URL);
    let response = http_client
        .get(GOOGLE_PUBLIC_KEYS_URL)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| AppError::InternalServerError(anyhow::Error::new(e).context("Network error fetching Google keys")))?;

    let max_age = response
        .headers()
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_max_age)
        .unwrap_or(DEFAULT_KEY_MAX_AGE);

    let key_map: HashMap<String, String> = response
        .json()
        .await
        .map_err(|e| AppError::InternalServerError(anyhow::Error::new(e).context("Error parsing Google keys JSON")))?;

    let keys: HashMap<String, DecodingKey> = key_map
        .into_iter()
        .filter_map(|(kid, pem)| match DecodingKey::from_rsa_pem(pem.as_bytes()) {
            Ok(key) => Some((kid, key)),
            Err(e) => {
                error!("Failed to decode public key PEM for kid {}: {}", kid, e);
                None
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(AppError::InternalServerError(anyhow::anyhow!(
            "Failed to load any valid Google public keys"
        )));
    }

    let keys = Arc::new(keys);
    *PUBLIC_KEYS.write().await = Some(CachedKeys {
        keys: keys.clone(),
        fetched_at: std::time::Instant::now(),
        max_age,
    });
    info!("Cached {} Google public keys for {:?}", keys.len(), max_age);
    Ok(keys)
}

/// Verifies a Firebase ID token against the configured project.
pub async fn verify_token(token: &str, settings: &Settings, http_client: &Client) -> Result<Claims, AppError> {
    let header = decode_header(token).map_err(|e| {
        warn!("Invalid JWT header: {}", e);
        AppError::Unauthorized("Invalid token format".into())
    })?;
    let kid = header
        .kid
        .ok_or_else(|| AppError::Unauthorized("Token missing key identifier".into()))?;

    let project_id = settings.project_id().map_err(AppError::InternalServerError)?;

    let keys = google_keys(http_client).await?;
    let decoding_key = keys.get(&kid).ok_or_else(|| {
        warn!("Unknown 'kid' {} found in token header", kid);
        AppError::Unauthorized("Unknown key identifier".into())
    })?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[project_id]);
    validation.set_issuer(&[format!("{}{}", FIREBASE_ISSUER_PREFIX, project_id)]);

    let decoded = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
        warn!("Token validation failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired".into()),
            jsonwebtoken::errors::ErrorKind::InvalidAudience => AppError::Unauthorized("Invalid token audience".into()),
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => AppError::Unauthorized("Invalid token issuer".into()),
            _ => AppError::Unauthorized("Invalid token".into()),
        }
    })?;

    Ok(decoded.claims)
}

/// The signed-in buyer, extracted from `Authorization: Bearer <Firebase ID token>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|e| {
                warn!("Failed to extract Authorization header: {}", e);
                AppError::Unauthorized("Missing or invalid Authorization header".into())
            })?;

        let app_state = AppState::from_ref(state);
        let claims = verify_token(bearer.token(), &app_state.settings, &app_state.http_client).await?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}
