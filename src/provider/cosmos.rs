use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{ChainDataProvider, ProviderError};
use crate::models::{BlockTag, RawBlock, RawTx, TxReceipt};

/// Cosmos SDK REST (LCD) provider.
///
/// Fees are the first coin of each transaction's `auth_info.fee.amount`,
/// in the denom's base unit. There is no base fee and no receipt endpoint.
#[derive(Clone)]
pub struct CosmosProvider {
    base_url: Url,
    client: reqwest::Client,
}

struct Header {
    height: u64,
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    block: WireBlock,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    header: WireHeader,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    height: String,
    time: String,
}

#[derive(Debug, Default, Deserialize)]
struct TxSearch {
    #[serde(default)]
    txs: Vec<WireTx>,
    #[serde(default)]
    tx_responses: Vec<TxResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTx {
    #[serde(default)]
    auth_info: AuthInfo,
}

#[derive(Debug, Default, Deserialize)]
struct AuthInfo {
    #[serde(default)]
    fee: Fee,
}

#[derive(Debug, Default, Deserialize)]
struct Fee {
    #[serde(default)]
    amount: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
struct Coin {
    amount: String,
}

#[derive(Debug, Default, Deserialize)]
struct TxResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    gas_used: String,
}

impl CosmosProvider {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let invalid = |reason: String| ProviderError::InvalidEndpoint {
            endpoint: api_url.to_string(),
            reason,
        };
        let base_url = Url::parse(api_url).map_err(|e| invalid(e.to_string()))?;
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self { base_url, client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<T, ProviderError> {
        let url = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            path_and_query
        );
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("{} returned {}", url, status)));
        }
        res.json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn header(&self, tag: BlockTag) -> Result<Header, ProviderError> {
        let body: BlockResponse = self
            .get_json(&format!("/cosmos/base/tendermint/v1beta1/blocks/{}", tag))
            .await?;
        parse_header(body)
    }
}

#[async_trait]
impl ChainDataProvider for CosmosProvider {
    fn id(&self) -> &str {
        self.base_url.as_str()
    }

    async fn get_height(&self) -> Result<u64, ProviderError> {
        Ok(self.header(BlockTag::Latest).await?.height)
    }

    async fn get_block(&self, tag: BlockTag) -> Result<Option<RawBlock>, ProviderError> {
        let header = self.header(tag).await?;
        let search: TxSearch = self
            .get_json(&format!(
                "/cosmos/tx/v1beta1/txs?events=tx.height={}",
                header.height
            ))
            .await?;
        Ok(Some(parse_block(header, search)))
    }

    async fn get_base_fee(&self, _tag: BlockTag) -> Result<Option<f64>, ProviderError> {
        Ok(None)
    }

    async fn get_tx_receipt(&self, _hash: &str) -> Result<TxReceipt, ProviderError> {
        Err(ProviderError::Unsupported("transaction receipts"))
    }
}

fn parse_header(body: BlockResponse) -> Result<Header, ProviderError> {
    let header = body.block.header;
    let height = header
        .height
        .parse()
        .map_err(|_| ProviderError::Decode(format!("bad block height `{}`", header.height)))?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&header.time)
        .map(|t| t.timestamp().max(0) as u64)
        .map_err(|e| ProviderError::Decode(format!("block {} time: {}", height, e)))?;
    Ok(Header { height, timestamp })
}

fn parse_block(header: Header, search: TxSearch) -> RawBlock {
    let gas_used = search
        .tx_responses
        .iter()
        .filter_map(|r| r.gas_used.parse::<u128>().ok())
        .sum();

    let mut responses = search.tx_responses.into_iter();
    let transactions = search
        .txs
        .into_iter()
        .map(|tx| RawTx {
            hash: responses.next().map(|r| r.txhash).unwrap_or_default(),
            fee: tx.auth_info.fee.amount.into_iter().next().map(|coin| coin.amount),
        })
        .collect();

    RawBlock {
        number: header.height,
        timestamp: header.timestamp,
        gas_used,
        transactions,
        base_fee: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn decode<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
        serde_json::from_value(body)
    }

    #[test]
    fn parses_header_height_and_time() {
        let body = json!({
            "block": { "header": { "height": "13932103", "time": "2023-01-10T08:00:05.123Z" } }
        });
        let header = parse_header(decode(body).unwrap()).unwrap();
        assert_eq!(header.height, 13_932_103);
        assert_eq!(header.timestamp, 1_673_337_605);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(decode::<BlockResponse>(json!({ "block": {} })).is_err());

        let body = json!({ "block": { "header": { "height": "x1", "time": "2023-01-10T08:00:05Z" } } });
        let err = parse_header(decode(body).unwrap()).err().unwrap();
        assert!(matches!(err, ProviderError::Decode(_)));

        let body = json!({ "block": { "header": { "height": "12", "time": "yesterday" } } });
        let err = parse_header(decode(body).unwrap()).err().unwrap();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn fees_come_from_the_first_fee_coin() {
        let body = json!({
            "txs": [
                { "auth_info": { "fee": { "amount": [{ "denom": "uatom", "amount": "2500" }] } } },
                { "auth_info": { "fee": { "amount": [] } } },
                { "body": {} }
            ],
            "tx_responses": [
                { "txhash": "AA", "gas_used": "80000" },
                { "txhash": "BB", "gas_used": "60000" },
                { "txhash": "CC", "gas_used": "oops" }
            ]
        });
        let block = parse_block(Header { height: 7, timestamp: 99 }, decode(body).unwrap());
        assert_eq!(block.number, 7);
        assert_eq!(block.gas_used, 140_000);
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(block.transactions[0].fee.as_deref(), Some("2500"));
        assert_eq!(block.transactions[0].hash, "AA");
        assert_eq!(block.transactions[1].fee, None);
        assert_eq!(block.transactions[2].fee, None);
    }

    #[test]
    fn block_without_txs_is_empty_not_an_error() {
        let block = parse_block(Header { height: 8, timestamp: 1 }, decode(json!({})).unwrap());
        assert!(block.transactions.is_empty());
        assert_eq!(block.gas_used, 0);
    }
}
