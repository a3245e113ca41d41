// Functions for interacting with Google Cloud Firestore over its REST API

use anyhow::{anyhow, Context, Result};
use axum::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, env, sync::Arc};
use tokio::time::{sleep, Duration};
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use crate::config::Settings;
use crate::error::FetchError;
use crate::fetcher::CarFetcher;
use crate::models::{Car, CarPage, ChatSession, Condition, FilterClause, FilterValue, Pagination};

const FIRESTORE_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/datastore", // Firestore scope
    "https://www.googleapis.com/auth/cloud-platform", // General cloud scope
];

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 300;
// Upper bound on documents scanned when free search text has to be matched locally
const SEARCH_SCAN_LIMIT: u32 = 500;

// Gets an authenticated reqwest client using service account credentials
// Reads credentials path from GOOGLE_APPLICATION_CREDENTIALS env var
pub async fn get_authenticated_client() -> Result<Client> {
    let creds_path = env::var("GOOGLE_APPLICATION_CREDENTIALS")
        .context("GOOGLE_APPLICATION_CREDENTIALS environment variable not set")?;

    let sa_key: ServiceAccountKey = yup_oauth2::read_service_account_key(&creds_path)
        .await
        .context("Failed to read service account key file")?;

    let auth = ServiceAccountAuthenticator::builder(sa_key)
        .build()
        .await
        .context("Failed to create service account authenticator")?;

    let token = auth.token(&FIRESTORE_SCOPES)
        .await
        .context("Failed to get OAuth2 token")?;

    let mut headers = HeaderMap::new();
    let auth_value = format!("Bearer {}", token.token().ok_or_else(|| anyhow!("Token string is empty"))?);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth_value).context("Failed to create Authorization header")?,
    );

    let client = Client::builder()
        .default_headers(headers)
        .build()
        .context("Failed to build authenticated reqwest client")?;

    Ok(client)
}

// --- Firestore Response Structures ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct FirestoreValue {
    string_value: Option<String>,
    integer_value: Option<String>, // Firestore integers arrive as strings
    double_value: Option<f64>,
    boolean_value: Option<bool>,
    timestamp_value: Option<String>,
    array_value: Option<FirestoreArrayValue>,
    map_value: Option<FirestoreMapValue>,
}

#[derive(Deserialize, Debug, Default)]
struct FirestoreArrayValue {
    #[serde(default)]
    values: Vec<FirestoreValue>,
}

#[derive(Deserialize, Debug, Default)]
struct FirestoreMapValue {
    #[serde(default)]
    fields: HashMap<String, FirestoreValue>,
}

#[derive(Deserialize, Debug)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: HashMap<String, FirestoreValue>,
}

// One element of a runQuery response stream; entries without a document only carry a readTime
#[derive(Deserialize, Debug)]
struct RunQueryItem {
    document: Option<FirestoreDocument>,
}

impl FirestoreValue {
    // Flattens a typed Firestore value into plain JSON
    fn into_json(self) -> Value {
        if let Some(s) = self.string_value {
            return Value::String(s);
        }
        if let Some(i) = self.integer_value {
            return i.parse::<i64>().map(Value::from).unwrap_or(Value::String(i));
        }
        if let Some(d) = self.double_value {
            return json!(d);
        }
        if let Some(b) = self.boolean_value {
            return Value::Bool(b);
        }
        if let Some(t) = self.timestamp_value {
            return Value::String(t);
        }
        if let Some(array) = self.array_value {
            return Value::Array(array.values.into_iter().map(FirestoreValue::into_json).collect());
        }
        if let Some(map) = self.map_value {
            return fields_to_json(map.fields);
        }
        Value::Null
    }
}

fn fields_to_json(fields: HashMap<String, FirestoreValue>) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key, value.into_json()))
            .collect::<Map<String, Value>>(),
    )
}

impl FirestoreDocument {
    // Plain JSON object of the document fields, with `id` taken from the document path when absent
    fn into_json(self) -> Value {
        let id = extract_doc_id(&self.name);
        let mut object = fields_to_json(self.fields);
        if let (Value::Object(map), Some(id)) = (&mut object, id) {
            map.entry("id").or_insert(Value::String(id));
        }
        object
    }
}

// Helper to extract document ID from the full name path
fn extract_doc_id(name: &str) -> Option<String> {
    name.rsplit('/').next().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

// --- Query Encoding ---

fn encode_value(value: &FilterValue) -> Value {
    match value {
        FilterValue::Number(n) => json!({ "integerValue": n.to_string() }),
        FilterValue::Text(s) => json!({ "stringValue": s }),
        FilterValue::List(items) => {
            let values: Vec<Value> = items.iter().map(|s| json!({ "stringValue": s })).collect();
            json!({ "arrayValue": { "values": values } })
        }
    }
}

fn operator(condition: Condition) -> &'static str {
    match condition {
        Condition::Eq => "EQUAL",
        Condition::Gte => "GREATER_THAN_OR_EQUAL",
        Condition::Lte => "LESS_THAN_OR_EQUAL",
        Condition::In => "IN",
    }
}

fn field_filter(clause: &FilterClause) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": clause.field },
            "op": operator(clause.condition),
            "value": encode_value(&clause.value),
        }
    })
}

// Builds a runQuery structuredQuery ANDing every clause
fn structured_query(collection: &str, filters: &[FilterClause], offset: u32, limit: u32) -> Value {
    let mut query = json!({
        "from": [{ "collectionId": collection }],
        "limit": limit,
    });
    if offset > 0 {
        query["offset"] = json!(offset);
    }
    match filters {
        [] => {}
        [single] => query["where"] = field_filter(single),
        many => {
            let filters: Vec<Value> = many.iter().map(field_filter).collect();
            query["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } });
        }
    }
    json!({ "structuredQuery": query })
}

// Commit body adding or removing one id in a user's `likedCars` array.
// The empty update mask upserts the user document without touching other fields.
fn liked_cars_commit(user_doc: &str, car_id: &str, like: bool) -> Value {
    let operation = if like { "appendMissingElements" } else { "removeAllFromArray" };
    let mut transform = Map::new();
    transform.insert("fieldPath".into(), json!("likedCars"));
    transform.insert(operation.into(), json!({ "values": [{ "stringValue": car_id }] }));
    json!({
        "writes": [{
            "update": { "name": user_doc, "fields": {} },
            "updateMask": { "fieldPaths": [] },
            "updateTransforms": [Value::Object(transform)],
        }]
    })
}

fn decode_cars(documents: Vec<FirestoreDocument>) -> Vec<Car> {
    documents
        .into_iter()
        .filter_map(|doc| {
            let name = doc.name.clone();
            match serde_json::from_value::<Car>(doc.into_json()) {
                Ok(car) => Some(car),
                Err(e) => {
                    tracing::warn!("Skipping car document {} that failed to decode: {}", name, e);
                    None
                }
            }
        })
        .collect()
}

// Cuts page `page` (1-based) out of `items`, reporting whether anything follows it
fn page_window<T>(items: Vec<T>, page: u32, page_size: u32) -> (Vec<T>, bool) {
    let start = (page.saturating_sub(1) as usize) * page_size as usize;
    let mut window: Vec<T> = items.into_iter().skip(start).take(page_size as usize + 1).collect();
    let has_more = window.len() > page_size as usize;
    window.truncate(page_size as usize);
    (window, has_more)
}

// One offset/limit page of raw documents. `hasMore` and the window are decided on
// raw documents, matching the Firestore offset, so a document that fails to
// decode is dropped without pulling the lookahead document into this page.
fn decode_page(documents: Vec<FirestoreDocument>, page_size: u32) -> (Vec<Car>, bool) {
    let (window, has_more) = page_window(documents, 1, page_size);
    (decode_cars(window), has_more)
}

// --- Firestore Store ---

pub struct FirestoreStore {
    settings: Arc<Settings>,
}

impl FirestoreStore {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    // Resource name prefix of every document, as used inside write requests
    fn documents_path(&self) -> Result<String> {
        let project_id = self.settings.project_id()?;
        Ok(format!("projects/{}/databases/(default)/documents", project_id))
    }

    fn documents_url(&self) -> Result<String> {
        Ok(format!("https://firestore.googleapis.com/v1/{}", self.documents_path()?))
    }

    // POSTs a JSON body, retrying connection failures and 5xx answers with exponential backoff
    async fn post_with_retry(&self, client: &Client, url: &str, body: &Value) -> Result<reqwest::Response, FetchError> {
        let mut retry_delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);
        let mut attempt = 1;
        loop {
            match client.post(url).json(body).send().await {
                Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(attempt, status = %response.status(), "Firestore server error. Retrying...");
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < MAX_ATTEMPTS && (e.is_connect() || e.is_timeout()) => {
                    tracing::warn!(attempt, error = %e, "Network error talking to Firestore. Retrying...");
                }
                Err(e) => return Err(FetchError::Network(e)),
            }
            sleep(retry_delay).await;
            retry_delay *= 2;
            attempt += 1;
        }
    }

    async fn run_query(&self, client: &Client, query: &Value) -> Result<Vec<FirestoreDocument>, FetchError> {
        let url = format!("{}:runQuery", self.documents_url()?);
        tracing::debug!(query = %query, "Running Firestore query");

        let response = self.post_with_retry(client, &url, query).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "[Failed to read response body]".to_string());
            tracing::debug!(status = %status, response_body = %body, "Firestore query error details");
            return Err(FetchError::Backend { status: status.as_u16() });
        }

        let bytes = response.bytes().await?;
        let items: Vec<RunQueryItem> = serde_json::from_slice(&bytes).map_err(FetchError::Decode)?;
        Ok(items.into_iter().filter_map(|item| item.document).collect())
    }

    /// One page of cars matching the clauses and the free search text.
    ///
    /// Firestore has no text search, so with search text the filtered set (up
    /// to a fixed scan limit) is fetched once, matched locally and paged here.
    pub async fn fetch_filtered_cars(
        &self,
        filters: &[FilterClause],
        search_text: &str,
        page: u32,
    ) -> Result<CarPage, FetchError> {
        let client = get_authenticated_client().await?;
        let page_size = self.settings.page_size.max(1);
        let collection = &self.settings.cars_collection;
        let search_text = search_text.trim();

        let (cars, has_more) = if search_text.is_empty() {
            let offset = page.saturating_sub(1) * page_size;
            let query = structured_query(collection, filters, offset, page_size + 1);
            decode_page(self.run_query(&client, &query).await?, page_size)
        } else {
            let query = structured_query(collection, filters, 0, SEARCH_SCAN_LIMIT);
            let matching: Vec<Car> = decode_cars(self.run_query(&client, &query).await?)
                .into_iter()
                .filter(|car| car.matches_search(search_text))
                .collect();
            page_window(matching, page, page_size)
        };

        tracing::info!(page, returned = cars.len(), has_more, search = search_text, "Fetched car page from Firestore");
        Ok(CarPage { cars, pagination: Pagination { has_more } })
    }

    // Reads the user's liked car ids; a missing user document means none
    pub async fn liked_cars(&self, client: &Client, user_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/{}/{}", self.documents_url()?, self.settings.users_collection, user_id);

        let response = client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let doc: FirestoreDocument = response.error_for_status()?.json().await
            .context("Failed to parse user document response from Firestore")?;

        let liked = match doc.into_json().get("likedCars") {
            Some(Value::Array(ids)) => ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        };
        Ok(liked)
    }

    /// Likes or unlikes a car for a user. Returns whether the car is liked afterwards.
    ///
    /// The write is an array transform, so concurrent toggles of different
    /// cars cannot overwrite each other's entries.
    pub async fn toggle_liked_car(&self, user_id: &str, car_id: &str) -> Result<bool> {
        let client = get_authenticated_client().await?;
        let liked = self.liked_cars(&client, user_id).await?;
        let now_liked = !liked.iter().any(|id| id == car_id);

        let user_doc = format!("{}/{}/{}", self.documents_path()?, self.settings.users_collection, user_id);
        let url = format!("{}:commit", self.documents_url()?);
        let body = liked_cars_commit(&user_doc, car_id, now_liked);

        self.post_with_retry(&client, &url, &body)
            .await?
            .error_for_status()
            .context("Failed to update likedCars on user document")?;

        tracing::info!(user_id, car_id, now_liked, "Updated liked cars");
        Ok(now_liked)
    }

    async fn get_car(&self, client: &Client, car_id: &str) -> Result<Option<Car>> {
        let url = format!("{}/{}/{}", self.documents_url()?, self.settings.cars_collection, car_id);
        let response = client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: FirestoreDocument = response.error_for_status()?.json().await
            .context("Failed to parse car document response from Firestore")?;
        Ok(Some(serde_json::from_value(doc.into_json()).context("Car document has an unexpected shape")?))
    }

    /// Returns the buyer's existing chat about a car, creating one if needed.
    /// `None` when the car does not exist.
    pub async fn start_chat(&self, car_id: &str, buyer_id: &str) -> Result<Option<ChatSession>> {
        let client = get_authenticated_client().await?;

        let existing_query = structured_query(
            &self.settings.chats_collection,
            &[
                FilterClause::new("carId", Condition::Eq, car_id),
                FilterClause::new("buyerId", Condition::Eq, buyer_id),
            ],
            0,
            1,
        );
        let existing = self.run_query(&client, &existing_query).await
            .map_err(|e| anyhow!("Failed to look up existing chat: {}", e))?;
        if let Some(doc) = existing.into_iter().next() {
            let chat: ChatSession = serde_json::from_value(doc.into_json())
                .context("Chat document has an unexpected shape")?;
            tracing::info!(chat_id = %chat.id, "Reusing existing chat");
            return Ok(Some(chat));
        }

        let Some(car) = self.get_car(&client, car_id).await? else {
            return Ok(None);
        };

        let created_at = chrono::Utc::now();
        let mut fields = Map::new();
        fields.insert("carId".into(), json!({ "stringValue": car_id }));
        fields.insert("buyerId".into(), json!({ "stringValue": buyer_id }));
        fields.insert(
            "sellerId".into(),
            match &car.posted_by {
                Some(seller) => json!({ "stringValue": seller }),
                None => json!({ "nullValue": null }),
            },
        );
        fields.insert("createdAt".into(), json!({ "timestampValue": created_at.to_rfc3339() }));

        let url = format!("{}/{}", self.documents_url()?, self.settings.chats_collection);
        let response = client.post(&url)
            .json(&json!({ "fields": fields }))
            .send()
            .await?
            .error_for_status()?;
        let created: FirestoreDocument = response.json().await
            .context("Failed to parse response after creating chat document")?;
        let id = extract_doc_id(&created.name)
            .ok_or_else(|| anyhow!("Could not extract document ID from created chat response"))?;

        tracing::info!(chat_id = %id, car_id, buyer_id, "Created chat");
        Ok(Some(ChatSession {
            id,
            car_id: car_id.to_string(),
            buyer_id: buyer_id.to_string(),
            seller_id: car.posted_by,
            created_at,
        }))
    }
}

#[async_trait]
impl CarFetcher for FirestoreStore {
    async fn fetch(&self, filters: &[FilterClause], search_text: &str, page: u32) -> Result<CarPage, FetchError> {
        self.fetch_filtered_cars(filters, search_text, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterOption, ToggleSet};
    use crate::models::default_filters;

    #[test]
    fn single_clause_is_a_bare_field_filter() {
        let query = structured_query("cars", &default_filters(), 0, 11);
        let sq = &query["structuredQuery"];
        assert_eq!(sq["from"][0]["collectionId"], "cars");
        assert_eq!(sq["limit"], 11);
        assert!(sq.get("offset").is_none());
        assert_eq!(sq["where"]["fieldFilter"]["field"]["fieldPath"], "carStatus");
        assert_eq!(sq["where"]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(sq["where"]["fieldFilter"]["value"]["stringValue"], "approved");
    }

    #[test]
    fn toggles_become_an_and_composite() {
        let mut toggles = ToggleSet::default();
        toggles.set(FilterOption::Price1To3L, true);
        toggles.set(FilterOption::Petrol, true);
        toggles.set(FilterOption::Cng, true);
        let mut filters = default_filters();
        filters.extend(toggles.to_clauses());

        let query = structured_query("cars", &filters, 20, 11);
        let sq = &query["structuredQuery"];
        assert_eq!(sq["offset"], 20);
        assert_eq!(sq["where"]["compositeFilter"]["op"], "AND");
        let parts = sq["where"]["compositeFilter"]["filters"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1]["fieldFilter"]["op"], "GREATER_THAN_OR_EQUAL");
        assert_eq!(parts[1]["fieldFilter"]["value"]["integerValue"], "100000");
        assert_eq!(parts[2]["fieldFilter"]["op"], "LESS_THAN_OR_EQUAL");
        assert_eq!(parts[3]["fieldFilter"]["op"], "IN");
        assert_eq!(
            parts[3]["fieldFilter"]["value"]["arrayValue"]["values"],
            json!([{ "stringValue": "Petrol" }, { "stringValue": "CNG" }])
        );
    }

    #[test]
    fn document_decodes_into_car() {
        let doc: FirestoreDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/cars/car42",
            "fields": {
                "carBrand": { "stringValue": "Hyundai" },
                "carModel": { "stringValue": "Creta" },
                "exceptedPrice": { "integerValue": "950000" },
                "km": { "integerValue": "42000" },
                "images": { "arrayValue": { "values": [{ "stringValue": "https://img/1.jpg" }] } },
                "modelYear": { "stringValue": "2021" },
                "postedDate": { "timestampValue": "2024-03-01T10:00:00Z" }
            }
        }))
        .unwrap();

        let cars = decode_cars(vec![doc]);
        assert_eq!(cars.len(), 1);
        let car = &cars[0];
        assert_eq!(car.id, "car42");
        assert_eq!(car.excepted_price, Some(950000));
        assert_eq!(car.km, Some(42000));
        assert_eq!(car.images, vec!["https://img/1.jpg".to_string()]);
        assert_eq!(car.posted_date.as_deref(), Some("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn run_query_items_without_document_are_ignored() {
        let items: Vec<RunQueryItem> = serde_json::from_value(json!([
            { "readTime": "2024-03-01T10:00:00Z" }
        ]))
        .unwrap();
        assert!(items.into_iter().all(|item| item.document.is_none()));
    }

    #[test]
    fn page_window_reports_more() {
        let items: Vec<u32> = (0..25).collect();

        let (first, more) = page_window(items.clone(), 1, 10);
        assert_eq!(first, (0..10).collect::<Vec<u32>>());
        assert!(more);

        let (last, more) = page_window(items.clone(), 3, 10);
        assert_eq!(last, (20..25).collect::<Vec<u32>>());
        assert!(!more);

        let (beyond, more) = page_window(items, 4, 10);
        assert!(beyond.is_empty());
        assert!(!more);
    }

    fn raw_car(id: &str, extra: Value) -> FirestoreDocument {
        let mut fields = json!({ "carBrand": { "stringValue": "Tata" } });
        if let (Value::Object(fields), Value::Object(extra)) = (&mut fields, extra) {
            fields.extend(extra);
        }
        serde_json::from_value(json!({
            "name": format!("projects/p/databases/(default)/documents/cars/{id}"),
            "fields": fields,
        }))
        .unwrap()
    }

    #[test]
    fn bad_document_does_not_pull_in_the_lookahead() {
        // page_size 2 asks Firestore for 3 documents; "b" cannot be decoded
        let documents = vec![
            raw_car("a", json!({})),
            raw_car("b", json!({ "images": { "stringValue": "not-a-list" } })),
            raw_car("c", json!({})),
        ];
        let (cars, has_more) = decode_page(documents, 2);
        let ids: Vec<&str> = cars.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(has_more, "the third raw document means a next page exists");
    }

    #[test]
    fn bad_lookahead_document_still_reports_more() {
        let documents = vec![
            raw_car("a", json!({})),
            raw_car("b", json!({})),
            raw_car("c", json!({ "images": { "stringValue": "not-a-list" } })),
        ];
        let (cars, has_more) = decode_page(documents, 2);
        assert_eq!(cars.len(), 2);
        assert!(has_more);
    }

    #[test]
    fn string_price_decodes_instead_of_being_skipped() {
        let documents = vec![raw_car("a", json!({ "exceptedPrice": { "stringValue": "350000" } }))];
        let (cars, has_more) = decode_page(documents, 2);
        assert_eq!(cars[0].excepted_price, Some(350000));
        assert!(!has_more);
    }

    #[test]
    fn like_and_unlike_are_array_transforms() {
        let doc = "projects/p/databases/(default)/documents/users/u1";

        let like = liked_cars_commit(doc, "car42", true);
        let write = &like["writes"][0];
        assert_eq!(write["update"]["name"], doc);
        assert_eq!(write["updateMask"]["fieldPaths"], json!([]));
        let transform = &write["updateTransforms"][0];
        assert_eq!(transform["fieldPath"], "likedCars");
        assert_eq!(transform["appendMissingElements"]["values"], json!([{ "stringValue": "car42" }]));

        let unlike = liked_cars_commit(doc, "car42", false);
        let transform = &unlike["writes"][0]["updateTransforms"][0];
        assert!(transform.get("appendMissingElements").is_none());
        assert_eq!(transform["removeAllFromArray"]["values"], json!([{ "stringValue": "car42" }]));
    }

    #[test]
    fn doc_id_is_last_path_segment() {
        assert_eq!(extract_doc_id("projects/p/databases/(default)/documents/chats/xyz"), Some("xyz".into()));
        assert_eq!(extract_doc_id(""), None);
    }
}
