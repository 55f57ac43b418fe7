use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::models::ChainInfo;
use super::models::GetAbiResult;
use super::models::TableRowsParams;
use super::models::TableRowsResult;
use crate::abi::AbiDef;
use crate::errors::ChainApiError;

#[derive(Debug, Clone)]
pub struct ChainApi {
    url: String,
    client: reqwest::Client,
}

impl ChainApi {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Get current chain info (trimmed down version).
    pub async fn info(&self) -> Result<ChainInfo, ChainApiError> {
        self.post("/v1/chain/get_info", &json!({})).await
    }

    /// Get the currently deployed ABI of `account`, if any.
    pub async fn abi(&self, account: &str) -> Result<Option<AbiDef>, ChainApiError> {
        let result: GetAbiResult = self
            .post("/v1/chain/get_abi", &json!({"account_name": account}))
            .await?;
        match result.abi {
            Some(value) => {
                let abi =
                    serde_json::from_value(value).map_err(|_| ChainApiError::Deserialization)?;
                Ok(Some(abi))
            }
            None => Ok(None),
        }
    }

    /// Fetch all rows of a contract table, following pagination.
    pub async fn table_rows(
        &self,
        mut params: TableRowsParams,
    ) -> Result<Vec<serde_json::Value>, ChainApiError> {
        let mut rows = Vec::new();
        loop {
            let body =
                serde_json::to_value(&params).map_err(|_| ChainApiError::Deserialization)?;
            let result: TableRowsResult = self.post("/v1/chain/get_table_rows", &body).await?;
            rows.extend(result.rows);
            if !result.more {
                return Ok(rows);
            }
            params.lower_bound = result.next_key;
        }
    }

    /// Send a POST request.
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChainApiError> {
        let url = format!("{}{}", self.url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|_| ChainApiError::Unreachable)?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|_| ChainApiError::Deserialization),
            StatusCode::BAD_REQUEST => Err(ChainApiError::BadRequest(url)),
            StatusCode::NOT_FOUND => Err(ChainApiError::NotFound(url)),
            _ => Err(ChainApiError::Api(url)),
        }
    }
}
