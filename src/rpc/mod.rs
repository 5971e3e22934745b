//! JSON-RPC 2.0 transport for [`RemoteLedger`].
//!
//! Methods: `getAccount [address]`, `scanAccounts [kind]` and
//! `sendTransaction [base64(json(signed tx))]`. A program rejection travels
//! as a typed [`RemoteError`] in `error.data`; anything else in the error
//! object is kept as an opaque code and message.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    address::Address,
    ledger::{AccountKind, LedgerAccount, RemoteError, RemoteLedger, SignedTransaction, TxSignature},
};

const JSONRPC_VERSION: &str = "2.0";
const PARSE_ERROR: i64 = -32700;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScannedAccount {
    address: Address,
    account: LedgerAccount,
}

pub struct HttpLedger {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpLedger {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RemoteError> {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(method, id = request.id, url = %self.url, "rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            warn!(method, %status, "rpc endpoint returned an error status");
            return Err(RemoteError::Unavailable(format!("http status {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        decode_response(parse_envelope(&bytes)?)
    }
}

/// A body that is not a JSON-RPC envelope came from something other than the
/// ledger (a proxy page, a truncated stream), so it counts as unreachable.
fn parse_envelope(body: &[u8]) -> Result<RpcResponse, RemoteError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "rpc endpoint returned a malformed envelope");
        RemoteError::Unavailable(format!("malformed rpc response: {e}"))
    })
}

fn decode_response<T: DeserializeOwned>(body: RpcResponse) -> Result<T, RemoteError> {
    if let Some(error) = body.error {
        if let Some(typed) = error
            .data
            .and_then(|data| serde_json::from_value::<RemoteError>(data).ok())
        {
            return Err(typed);
        }
        return Err(RemoteError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    serde_json::from_value(body.result.unwrap_or(Value::Null)).map_err(|e| RemoteError::Rpc {
        code: PARSE_ERROR,
        message: e.to_string(),
    })
}

pub fn encode_transaction(tx: &SignedTransaction) -> Result<String, RemoteError> {
    let bytes = serde_json::to_vec(tx).map_err(|e| RemoteError::Rpc {
        code: PARSE_ERROR,
        message: e.to_string(),
    })?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

pub fn decode_transaction(encoded: &str) -> Result<SignedTransaction, RemoteError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| RemoteError::Rpc {
            code: PARSE_ERROR,
            message: e.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Rpc {
        code: PARSE_ERROR,
        message: e.to_string(),
    })
}

#[async_trait]
impl RemoteLedger for HttpLedger {
    async fn get_account(&self, address: &Address) -> Result<Option<LedgerAccount>, RemoteError> {
        self.call("getAccount", json!([address])).await
    }

    async fn scan_accounts(
        &self,
        kind: AccountKind,
    ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
        let scanned: Vec<ScannedAccount> = self.call("scanAccounts", json!([kind])).await?;
        Ok(scanned.into_iter().map(|s| (s.address, s.account)).collect())
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxSignature, RemoteError> {
        let encoded = encode_transaction(tx)?;
        self.call("sendTransaction", json!([encoded])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        address::Identity,
        error::ClientError,
        ledger::{LedgerInstruction, ProgramError, Transaction},
    };

    fn response(value: Value) -> RpcResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn request_envelope_shape() {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: 7,
            method: "getAccount",
            params: json!([Address([0xab; 32])]),
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["id"], 7);
        assert_eq!(encoded["method"], "getAccount");
        assert_eq!(encoded["params"][0], "ab".repeat(32));
    }

    #[test]
    fn typed_error_data_is_recovered() {
        let data =
            serde_json::to_value(RemoteError::Program(ProgramError::InsufficientFund)).unwrap();
        let body = response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32002, "message": "program failed", "data": data }
        }));
        let err = decode_response::<TxSignature>(body).unwrap_err();
        assert_eq!(err, RemoteError::Program(ProgramError::InsufficientFund));
    }

    #[test]
    fn untyped_error_keeps_code_and_message() {
        let body = response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "method not found" }
        }));
        let err = decode_response::<Value>(body).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rpc {
                code: -32601,
                message: "method not found".into()
            }
        );
    }

    #[test]
    fn null_result_is_an_absent_account() {
        let body = response(json!({ "jsonrpc": "2.0", "id": 1, "result": null }));
        let account = decode_response::<Option<LedgerAccount>>(body).unwrap();
        assert_eq!(account, None);
    }

    #[test]
    fn signed_transaction_survives_base64() {
        let tx = SignedTransaction {
            transaction: Transaction::new(
                Identity([3; 32]),
                LedgerInstruction::DeleteCampaign {
                    campaign: Address([4; 32]),
                    cid: 9,
                },
            ),
            signature: vec![1, 2, 3],
        };
        let encoded = encode_transaction(&tx).unwrap();
        assert_eq!(decode_transaction(&encoded).unwrap(), tx);
        assert!(decode_transaction("not base64!").is_err());
    }

    #[test]
    fn malformed_envelope_is_unavailable() {
        let bodies: [&[u8]; 3] = [b"<html>502 bad gateway</html>", b"", b"{\"result\": "];
        for body in bodies {
            let err = parse_envelope(body).unwrap_err();
            assert!(matches!(err, RemoteError::Unavailable(_)), "{err:?}");
            assert!(matches!(
                ClientError::from(err),
                ClientError::RemoteUnavailable(_)
            ));
        }
        let body = parse_envelope(br#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(decode_response::<Option<LedgerAccount>>(body).unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let ledger = HttpLedger::new("http://127.0.0.1:1");
        let err = ledger.get_account(&Address([0; 32])).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
    }
}
