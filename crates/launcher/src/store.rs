//! Client for the metadata/listing service
//!
//! Only the two endpoints the launcher needs are covered: the game catalogue
//! and the signed download authorization that yields a pre-signed archive
//! URL.

use crate::config::LauncherConfig;
use crate::game::GameId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Failures talking to the metadata service
#[derive(Error, Debug)]
pub enum StoreError {
    /// The signature did not recover to the claimed address
    #[error("download not authorized: {0}")]
    Unauthorized(String),

    #[error("game not found: {0}")]
    NotFound(String),

    #[error("store responded with {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid store response: {0}")]
    InvalidResponse(String),
}

/// One game of the catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
}

impl GameRecord {
    /// Parsed id, `None` for catalogue entries with a malformed id
    pub fn game_id(&self) -> Option<GameId> {
        GameId::parse(&self.id).ok()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest<'a> {
    game_id: String,
    user_address: &'a str,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResponse {
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Message the wallet signs to authorize a download of `game_id`
pub fn download_message(game_id: &GameId) -> String {
    format!("Download Game #{}", game_id)
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    client: Client,
    base_url: Url,
}

impl StoreClient {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn from_config(config: &LauncherConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.store_url)
            .map_err(|e| StoreError::InvalidResponse(format!("store url '{}' is invalid: {}", config.store_url, e)))?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self::new(client, base_url))
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|e| StoreError::InvalidResponse(format!("cannot build url for {}: {}", path, e)))
    }

    /// `GET /api/games`
    pub async fn list_games(&self) -> Result<Vec<GameRecord>, StoreError> {
        let response = self.client.get(self.endpoint("/api/games")?).send().await?;
        let response = check_status(response, "catalogue").await?;
        let games: Vec<GameRecord> = response.json().await?;
        debug!("Store lists {} games", games.len());
        Ok(games)
    }

    /// `POST /api/download`: exchange a signed message for a pre-signed archive URL
    pub async fn authorize_download(
        &self,
        game_id: &GameId,
        user_address: &str,
        signature: &str,
    ) -> Result<Url, StoreError> {
        let body = DownloadRequest {
            game_id: game_id.to_string(),
            user_address,
            signature,
        };
        let response = self
            .client
            .post(self.endpoint("/api/download")?)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, &game_id.to_string()).await?;

        let parsed: DownloadResponse = response.json().await?;
        Url::parse(&parsed.download_url)
            .map_err(|e| StoreError::InvalidResponse(format!("download url is invalid: {}", e)))
    }
}

async fn check_status(response: reqwest::Response, subject: &str) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(subject.to_string()),
        status => StoreError::Status { status, message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{GAME_ID, WALLET};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    fn client(server: &MockServer) -> StoreClient {
        StoreClient::new(Client::new(), Url::parse(&server.uri()).unwrap())
    }

    #[test]
    fn message_template() {
        let id = GameId::parse(GAME_ID).unwrap();
        assert_eq!(download_message(&id), format!("Download Game #{}", GAME_ID));
    }

    #[tokio::test]
    async fn lists_games() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/games"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": GAME_ID,
                    "name": "Pixel Quest",
                    "description": "Retro platformer",
                    "image": "/images/pixel.png",
                    "category": "Action",
                    "external_url": "http://localhost:5173"
                },
                { "id": "legacy-7", "name": "Old Entry" }
            ])))
            .mount(&server)
            .await;

        let games = client(&server).list_games().await.unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].game_id(), Some(GameId::parse(GAME_ID).unwrap()));
        assert_eq!(games[0].category.as_deref(), Some("Action"));
        assert_eq!(games[1].game_id(), None);
        assert_eq!(games[1].description, None);
    }

    #[tokio::test]
    async fn authorizes_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/download"))
            .and(body_json(json!({
                "gameId": GAME_ID,
                "userAddress": WALLET,
                "signature": "0xsigned"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "downloadUrl": "https://bucket.example.com/game.zip?X-Amz-Expires=300"
            })))
            .mount(&server)
            .await;

        let id = GameId::parse(GAME_ID).unwrap();
        let url = client(&server).authorize_download(&id, WALLET, "0xsigned").await.unwrap();
        assert_eq!(url.host_str(), Some("bucket.example.com"));
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/download"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "signature mismatch" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/download"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "Not found" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/download"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let id = GameId::parse(GAME_ID).unwrap();
        let store = client(&server);

        match store.authorize_download(&id, WALLET, "0xbad").await {
            Err(StoreError::Unauthorized(message)) => assert_eq!(message, "signature mismatch"),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }
        assert!(matches!(
            store.authorize_download(&id, WALLET, "0xbad").await,
            Err(StoreError::NotFound(_))
        ));
        match store.authorize_download(&id, WALLET, "0xbad").await {
            Err(StoreError::Status { status, message }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "boom");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }
}
