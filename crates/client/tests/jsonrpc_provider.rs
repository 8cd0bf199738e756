// Path: crates/client/tests/jsonrpc_provider.rs

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use auditchain_api::provider::ChainProvider;
use auditchain_client::abi;
use auditchain_client::JsonRpcChainProvider;
use auditchain_types::config::ProviderConfig;
use auditchain_types::error::ProviderError;
use auditchain_types::ledger::{LedgerCall, TxHandle};
use auditchain_types::network::{AllowedNetwork, ContractAddress, NetworkId, GANACHE_ID};
use auditchain_types::report::ContentFingerprint;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;

const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
const TX: &str = "0x9f1c5a6e4b0d2c8e7f3a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6a";

struct Node {
    chain: u64,
    known: HashSet<u64>,
    reject_signing: bool,
    revert_receipt: bool,
    pending_polls: u32,
    sent: Vec<Value>,
    methods: Vec<String>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            chain: 1,
            known: [1u64, 5777].into_iter().collect(),
            reject_signing: false,
            revert_receipt: false,
            pending_polls: 0,
            sent: Vec::new(),
            methods: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<Node>>;

fn ok(id: &Value, result: Value) -> Json<Value> {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

fn err(id: &Value, code: i64, message: &str) -> Json<Value> {
    Json(json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } }))
}

fn chain_param(req: &Value) -> u64 {
    let hex = req["params"][0]["chainId"].as_str().unwrap_or("0x0");
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap()
}

async fn rpc(State(node): State<Shared>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default().to_string();
    let mut node = node.lock().unwrap();
    node.methods.push(method.clone());
    match method.as_str() {
        "eth_chainId" => ok(&id, json!(format!("0x{:x}", node.chain))),
        "eth_requestAccounts" => {
            if node.reject_signing {
                err(&id, 4001, "User rejected the request.")
            } else {
                ok(&id, json!(["0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1"]))
            }
        }
        "wallet_switchEthereumChain" => {
            let target = chain_param(&req);
            if node.known.contains(&target) {
                node.chain = target;
                ok(&id, Value::Null)
            } else {
                err(&id, 4902, "Unrecognized chain ID")
            }
        }
        "wallet_addEthereumChain" => {
            let target = chain_param(&req);
            node.known.insert(target);
            ok(&id, Value::Null)
        }
        "eth_sendTransaction" => {
            if node.reject_signing {
                return err(&id, 4001, "User denied transaction signature.");
            }
            node.sent.push(req["params"][0].clone());
            ok(&id, json!(TX))
        }
        "eth_getTransactionReceipt" => {
            if node.pending_polls > 0 {
                node.pending_polls -= 1;
                return ok(&id, Value::Null);
            }
            let status = if node.revert_receipt { "0x0" } else { "0x1" };
            ok(
                &id,
                json!({
                    "transactionHash": TX,
                    "blockNumber": "0x2a",
                    "blockHash": "0xb10c",
                    "status": status
                }),
            )
        }
        "eth_getTransactionByHash" => {
            let hash = req["params"][0].as_str().unwrap_or_default();
            match node.sent.first() {
                Some(sent) if hash == TX => ok(
                    &id,
                    json!({ "hash": TX, "to": sent["to"], "input": sent["data"] }),
                ),
                _ => ok(&id, Value::Null),
            }
        }
        "eth_getCode" => ok(&id, json!("0x6080604052")),
        "eth_call" => ok(
            &id,
            json!(format!("0x{}", "0".repeat(63) + "3")),
        ),
        _ => err(&id, -32601, "Method not found"),
    }
}

async fn spawn_node(node: Node) -> (JsonRpcChainProvider, Shared) {
    let shared: Shared = Arc::new(Mutex::new(node));
    let app = Router::new().route("/", post(rpc)).with_state(shared.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let provider = JsonRpcChainProvider::new(&ProviderConfig {
        rpc_url: format!("http://{}/", addr),
        receipt_poll_ms: 10,
        ..ProviderConfig::default()
    })
    .unwrap();
    (provider, shared)
}

fn certify_call() -> LedgerCall {
    LedgerCall::CertifyReport {
        timestamp_or_id: "2025-01-02T10:00:00".into(),
        fingerprint: ContentFingerprint::new("0xabc"),
    }
}

#[tokio::test]
async fn reads_and_publishes_active_network() {
    let (provider, _node) = spawn_node(Node::default()).await;
    let mut changes = provider.subscribe_network_changes();
    assert_eq!(provider.active_network().await.unwrap(), Some(NetworkId(1)));
    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), Some(NetworkId(1)));
}

#[tokio::test]
async fn unknown_chain_is_reported_then_registered() {
    let (provider, node) = spawn_node(Node::default()).await;
    let target = NetworkId(1337);
    assert_eq!(
        provider.switch_network(target).await,
        Err(ProviderError::UnknownNetwork(target))
    );
    provider
        .register_network(&AllowedNetwork::ganache(target).descriptor())
        .await
        .unwrap();
    provider.switch_network(target).await.unwrap();
    assert_eq!(node.lock().unwrap().chain, 1337);
    assert_eq!(*provider.subscribe_network_changes().borrow(), Some(target));
}

#[tokio::test]
async fn switch_to_known_chain_succeeds() {
    let (provider, node) = spawn_node(Node::default()).await;
    provider.switch_network(GANACHE_ID).await.unwrap();
    assert_eq!(node.lock().unwrap().chain, 5777);
}

#[tokio::test]
async fn submits_encoded_certification_and_waits_for_receipt() {
    let (provider, node) = spawn_node(Node {
        pending_polls: 2,
        ..Node::default()
    })
    .await;
    let contract = ContractAddress::parse(CONTRACT).unwrap();
    let from = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";
    let tx = provider
        .submit_transaction(from, &contract, &certify_call())
        .await
        .unwrap();
    assert_eq!(tx, TxHandle(TX.into()));

    let receipt = provider.await_confirmation(&tx).await.unwrap();
    assert_eq!(receipt.block_number, 42);
    assert!(receipt.succeeded);

    let node = node.lock().unwrap();
    let sent = &node.sent[0];
    assert_eq!(sent["to"], json!(CONTRACT));
    assert_eq!(sent["from"], json!(from));
    let data = sent["data"].as_str().unwrap();
    assert_eq!(data, abi::to_hex(&abi::encode_call(&certify_call())));
    assert!(data.starts_with("0x8a4f839e"));
    let polls = node
        .methods
        .iter()
        .filter(|m| *m == "eth_getTransactionReceipt")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn looks_up_sent_transaction_target_and_call() {
    let (provider, _node) = spawn_node(Node::default()).await;
    let tx = TxHandle(TX.into());
    assert_eq!(provider.transaction(&tx).await.unwrap(), None);

    let contract = ContractAddress::parse(CONTRACT).unwrap();
    provider
        .submit_transaction(
            "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1",
            &contract,
            &certify_call(),
        )
        .await
        .unwrap();
    let details = provider.transaction(&tx).await.unwrap().unwrap();
    assert_eq!(details.to, Some(contract.clone()));
    assert_eq!(details.call, Some(certify_call()));
    assert!(details.matches(&contract, &certify_call()));
    assert!(!details.matches(&contract, &LedgerCall::ReportCount));
}

#[tokio::test]
async fn pending_transaction_has_no_status() {
    let (provider, _node) = spawn_node(Node {
        pending_polls: 1,
        ..Node::default()
    })
    .await;
    let tx = TxHandle(TX.into());
    assert_eq!(provider.transaction_status(&tx).await.unwrap(), None);
    assert!(provider.transaction_status(&tx).await.unwrap().is_some());
}

#[tokio::test]
async fn reverted_receipt_is_not_successful() {
    let (provider, _node) = spawn_node(Node {
        revert_receipt: true,
        ..Node::default()
    })
    .await;
    let receipt = provider
        .await_confirmation(&TxHandle(TX.into()))
        .await
        .unwrap();
    assert!(!receipt.succeeded);
}

#[tokio::test]
async fn signer_rejection_maps_to_user_rejected() {
    let (provider, _node) = spawn_node(Node {
        reject_signing: true,
        ..Node::default()
    })
    .await;
    assert_eq!(
        provider.request_accounts().await,
        Err(ProviderError::UserRejected)
    );
    let contract = ContractAddress::parse(CONTRACT).unwrap();
    assert_eq!(
        provider
            .submit_transaction("0x00", &contract, &certify_call())
            .await,
        Err(ProviderError::UserRejected)
    );
}

#[tokio::test]
async fn reads_contract_state() {
    let (provider, _node) = spawn_node(Node::default()).await;
    let contract = ContractAddress::parse(CONTRACT).unwrap();
    assert!(provider.has_code(&contract).await.unwrap());
    let raw = provider.read(&contract, &LedgerCall::ReportCount).await.unwrap();
    assert_eq!(abi::decode_u64(&raw).unwrap(), 3);
}

#[tokio::test]
async fn poller_publishes_out_of_band_changes() {
    let (provider, node) = spawn_node(Node::default()).await;
    let provider = Arc::new(provider);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut changes = provider.subscribe_network_changes();
    let poller = provider.spawn_network_poller(Duration::from_millis(10), shutdown_rx);

    tokio::time::timeout(Duration::from_secs(2), changes.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*changes.borrow_and_update(), Some(NetworkId(1)));

    node.lock().unwrap().chain = 5777;
    tokio::time::timeout(Duration::from_secs(2), changes.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*changes.borrow_and_update(), Some(GANACHE_ID));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), poller)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    let provider = JsonRpcChainProvider::new(&ProviderConfig {
        rpc_url: "http://127.0.0.1:9/".into(),
        request_timeout_ms: 500,
        ..ProviderConfig::default()
    })
    .unwrap();
    assert!(matches!(
        provider.active_network().await,
        Err(ProviderError::Transport(_))
    ));
}
