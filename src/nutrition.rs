use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Nutrition document as returned by FoodData Central, passed through untouched.
pub type NutritionRecord = serde_json::Value;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no food items found for {0:?}")]
    NotFound(String),
    #[error("nutrition service request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("nutrition service returned {0}")]
    Status(StatusCode),
    #[error("nutrition service returned an unreadable body: {0}")]
    Decode(#[source] reqwest::Error),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LookupError::Decode(err)
        } else if let Some(status) = err.status() {
            LookupError::Status(status)
        } else {
            LookupError::Transport(err)
        }
    }
}

#[async_trait]
pub trait NutritionLookup: Send + Sync {
    async fn lookup(&self, food_name: &str) -> Result<NutritionRecord, LookupError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    foods: Option<Vec<FoodHit>>,
}

#[derive(Debug, Deserialize)]
struct FoodHit {
    #[serde(rename = "fdcId")]
    fdc_id: u64,
}

/// Client for the USDA FoodData Central API.
#[derive(Debug, Clone)]
pub struct FdcClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FdcClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(FdcClient {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Returns the FDC identifier of the best match for `query`.
    pub async fn search(&self, query: &str) -> Result<u64, LookupError> {
        let response: SearchResponse = self
            .client
            .get(format!("{}/foods/search", self.base_url))
            .query(&[("query", query), ("api_key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .foods
            .and_then(|foods| foods.into_iter().next())
            .map(|hit| hit.fdc_id)
            .ok_or_else(|| LookupError::NotFound(query.to_string()))
    }

    pub async fn details(&self, fdc_id: u64) -> Result<NutritionRecord, LookupError> {
        let record: NutritionRecord = self
            .client
            .get(format!("{}/food/{}", self.base_url, fdc_id))
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl NutritionLookup for FdcClient {
    async fn lookup(&self, food_name: &str) -> Result<NutritionRecord, LookupError> {
        let fdc_id = match self.search(food_name).await {
            Ok(id) => id,
            Err(err) => {
                warn!(food = food_name, error = %err, "food search failed");
                return Err(err);
            }
        };
        debug!(food = food_name, fdc_id, "matched food item");

        self.details(fdc_id).await.map_err(|err| {
            warn!(fdc_id, error = %err, "nutrition detail request failed");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    async fn client_for(server: &MockServer) -> FdcClient {
        FdcClient::new(server.uri(), "test-key", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn search_then_fetch_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .and(query_param("query", "apple_pie"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "foods": [{"fdcId": 167782, "description": "Apple pie"}, {"fdcId": 1}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let details = json!({"fdcId": 167782, "foodNutrients": [{"amount": 237.0}]});
        Mock::given(method("GET"))
            .and(path("/food/167782"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(details.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server).await.lookup("apple_pie").await.unwrap();

        assert_eq!(record, details);
    }

    #[tokio::test]
    async fn empty_or_missing_results_are_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .and(query_param("query", "nothing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"foods": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .and(query_param("query", "absent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalHits": 0})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;

        assert!(matches!(
            client.lookup("nothing").await,
            Err(LookupError::NotFound(_))
        ));
        assert!(matches!(
            client.lookup("absent").await,
            Err(LookupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"foods": [{"fdcId": 7}]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/food/7"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client_for(&server).await.lookup("sushi").await.unwrap_err();

        assert!(matches!(err, LookupError::Status(status) if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.lookup("ramen").await.unwrap_err();

        assert!(matches!(err, LookupError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foods/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"foods": []}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = FdcClient::new(server.uri(), "k", Duration::from_millis(200)).unwrap();
        let err = client.lookup("pho").await.unwrap_err();

        assert!(matches!(err, LookupError::Transport(_)));
    }
}
