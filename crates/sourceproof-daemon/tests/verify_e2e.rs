//! Black-box verification flows against an in-process server: stub
//! compiler, stub chain, a real repository in a temp directory.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use sourceproof_daemon::assembler::PendingAssembler;
use sourceproof_daemon::chain::{ChainClient, ChainEntry, ChainRegistry, TransactionInfo};
use sourceproof_daemon::compiler::CompilerDriver;
use sourceproof_daemon::error::VerifyError;
use sourceproof_daemon::fetcher::{FetcherRegistry, GatewayFetcher};
use sourceproof_daemon::repository::MatchStore;
use sourceproof_daemon::server::{self, AppState};
use sourceproof_daemon::session::{SessionConfig, SessionStore};
use sourceproof_daemon::verification::VerificationCoordinator;
use sourceproof_core::standard_json::{StandardJsonInput, StandardJsonOutput};
use sourceproof_core::{Address, HashOrigin};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TARGET_FILE: &str = "contracts/1_Storage.sol";
const TARGET_NAME: &str = "Storage";
const SOURCE: &str = "contract Storage { uint256 public number; }";
const CONTRACT_ADDRESS: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

const BODY_HEX: &str = "6080604052348015600f57600080fd5b50";
const TRAILER_A: &str = "a26469706673582212204ac0ce5f82b26331fa3e9ae959291a55624ffaf90fcd509deafcc21a5f1da21e64736f6c63430008120033";
const TRAILER_B: &str = "a2646970667358221220dd712ec4cb31d63cd32d3152e52e890b087769e9e4d6746844608039b5015d6a64736f6c63430008120033";
const CREATION_PREFIX_HEX: &str = "600a600c600039600a6000f3";
const CONSTRUCTOR_ARGS_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000003039";

fn runtime_a() -> String {
    format!("{BODY_HEX}{TRAILER_A}")
}

fn runtime_b() -> String {
    format!("{BODY_HEX}{TRAILER_B}")
}

fn creation_hex() -> String {
    format!("{CREATION_PREFIX_HEX}{BODY_HEX}{TRAILER_A}")
}

fn keccak_hex(data: &[u8]) -> String {
    hex::encode(Keccak256::digest(data))
}

fn metadata_bytes(source_urls: Vec<String>, embed_content: bool) -> Vec<u8> {
    let mut source_entry = json!({ "keccak256": format!("0x{}", keccak_hex(SOURCE.as_bytes())) });
    if !source_urls.is_empty() {
        source_entry["urls"] = json!(source_urls);
    }
    if embed_content {
        source_entry["content"] = json!(SOURCE);
    }
    serde_json::to_vec(&json!({
        "compiler": { "version": "0.8.18+commit.87f61d96" },
        "language": "Solidity",
        "output": {
            "abi": [{
                "inputs": [{ "internalType": "uint256", "name": "num", "type": "uint256" }],
                "stateMutability": "nonpayable",
                "type": "constructor"
            }]
        },
        "settings": {
            "compilationTarget": { TARGET_FILE: TARGET_NAME },
            "evmVersion": "paris",
            "optimizer": { "enabled": false, "runs": 200 }
        },
        "sources": { TARGET_FILE: source_entry },
        "version": 1
    }))
    .expect("serialize metadata")
}

/// Compiler stub: per-call runtime bytecode decided by a closure over the
/// input, fixed creation bytecode, optional artificial latency.
struct StubCompiler {
    runtime_for: Box<dyn Fn(&StandardJsonInput) -> String + Send + Sync>,
    immutable_references: Value,
    emit_metadata: Option<String>,
    delay: Option<Duration>,
}

impl StubCompiler {
    fn fixed(runtime_hex: String) -> Self {
        Self {
            runtime_for: Box::new(move |_| runtime_hex.clone()),
            immutable_references: json!({}),
            emit_metadata: None,
            delay: None,
        }
    }
}

#[async_trait]
impl CompilerDriver for StubCompiler {
    async fn compile(
        &self,
        _version: &str,
        input: &StandardJsonInput,
    ) -> Result<StandardJsonOutput, VerifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let runtime = (self.runtime_for)(input);
        let mut artifact = json!({
            "abi": [],
            "evm": {
                "bytecode": { "object": creation_hex() },
                "deployedBytecode": {
                    "object": runtime,
                    "immutableReferences": self.immutable_references
                }
            }
        });
        if let Some(metadata) = &self.emit_metadata {
            artifact["metadata"] = json!(metadata);
        }
        let output = json!({ "contracts": { TARGET_FILE: { TARGET_NAME: artifact } } });
        serde_json::from_value(output)
            .map_err(|err| VerifyError::Internal(format!("stub output: {err}")))
    }
}

struct StubChain {
    code: Mutex<HashMap<Address, Vec<u8>>>,
    transactions: HashMap<String, TransactionInfo>,
}

impl StubChain {
    fn with_code(address: Address, code: Vec<u8>) -> Self {
        let mut map = HashMap::new();
        map.insert(address, code);
        Self {
            code: Mutex::new(map),
            transactions: HashMap::new(),
        }
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, VerifyError> {
        Ok(self.code.lock().get(address).cloned().unwrap_or_default())
    }

    async fn get_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionInfo>, VerifyError> {
        Ok(self.transactions.get(tx_hash).cloned())
    }
}

struct TestServer {
    base: String,
    _repo: TempDir,
    repo_path: std::path::PathBuf,
    client: reqwest::Client,
}

async fn start_server(
    compiler: StubCompiler,
    chain: StubChain,
    fetchers: FetcherRegistry,
) -> TestServer {
    let repo = TempDir::new().expect("tempdir");
    let repo_path = repo.path().to_path_buf();

    let mut chains = ChainRegistry::new();
    chains.insert(ChainEntry {
        chain_id: 1,
        name: "Ethereum Mainnet".to_string(),
        client: Arc::new(chain),
        explorer: None,
    });
    let chains = Arc::new(chains);

    let state = AppState::new(
        Arc::new(SessionStore::new(SessionConfig::default())),
        Arc::new(VerificationCoordinator::new(
            Arc::clone(&chains),
            Arc::new(compiler),
        )),
        Arc::new(MatchStore::open(&repo_path).expect("repository")),
        Arc::new(PendingAssembler::new(Arc::new(fetchers))),
        chains,
        None,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        server::serve(listener, state, 10 * 1024 * 1024).await.expect("serve");
    });

    TestServer {
        base: format!("http://{addr}"),
        _repo: repo,
        repo_path,
        client: reqwest::Client::new(),
    }
}

fn address() -> Address {
    CONTRACT_ADDRESS.parse().expect("address")
}

fn verify_body(files: Value) -> Value {
    json!({ "address": CONTRACT_ADDRESS, "chain": 1, "files": files })
}

#[tokio::test]
async fn upload_verifies_to_a_perfect_match_and_is_archived() {
    let onchain = hex::decode(runtime_a()).expect("hex");
    let mut chain = StubChain::with_code(address(), onchain);
    let mut tx_input = hex::decode(creation_hex()).expect("hex");
    tx_input.extend_from_slice(&hex::decode(CONSTRUCTOR_ARGS_HEX).expect("hex"));
    chain.transactions.insert(
        "0xc0ffee".to_string(),
        TransactionInfo { input: tx_input, to: None },
    );

    let server = start_server(
        StubCompiler::fixed(runtime_a()),
        chain,
        FetcherRegistry::new(),
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(Vec::new(), false)).expect("utf8");
    let mut body = verify_body(json!({ "metadata.json": metadata, "Storage.sol": SOURCE }));
    body["creatorTxHash"] = json!("0xc0ffee");

    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    let reply: Value = response.json().await.expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
    assert!(reply["result"][0]["storageTimestamp"].is_u64());

    let stored = server
        .repo_path
        .join("contracts/full_match/1")
        .join(address().checksummed());
    assert!(stored.join("metadata.json").is_file());
    assert!(stored.join(format!("sources/{TARGET_FILE}")).is_file());
    assert_eq!(
        std::fs::read_to_string(stored.join("constructor-args.txt")).expect("args"),
        format!("0x{CONSTRUCTOR_ARGS_HEX}")
    );
    assert_eq!(
        std::fs::read_to_string(stored.join("creator-tx-hash.txt")).expect("tx"),
        "0xc0ffee"
    );
    assert!(server.repo_path.join("manifest.json").is_file());

    // The stored contract is readable back through the file-tree route.
    let tree: Value = server
        .client
        .get(format!(
            "{}/files/tree/full/1/{CONTRACT_ADDRESS}",
            server.base
        ))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let files = tree["files"].as_array().expect("files");
    assert!(files.iter().any(|f| f.as_str().map(|s| s.ends_with("metadata.json")).unwrap_or(false)));
}

#[tokio::test]
async fn metadata_only_upload_assembles_sources_from_the_gateway() {
    let gateway_app = axum::Router::new().route(
        "/ipfs/:cid",
        axum::routing::get(|| async { SOURCE }),
    );
    let gateway_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let gateway_addr = gateway_listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(gateway_listener, gateway_app).await.expect("serve");
    });

    let mut fetchers = FetcherRegistry::new();
    fetchers.insert(Arc::new(GatewayFetcher::new(
        HashOrigin::Ipfs,
        vec![format!("http://{gateway_addr}/ipfs")],
        Duration::from_secs(2),
        8,
    )));

    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        StubCompiler::fixed(runtime_a()),
        StubChain::with_code(address(), onchain),
        fetchers,
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(
        vec!["dweb:/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG".to_string()],
        false,
    ))
    .expect("utf8");

    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&verify_body(json!({ "metadata.json": metadata })))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    let reply: Value = response.json().await.expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
}

#[tokio::test]
async fn metadata_hash_alone_drives_the_whole_assembly() {
    const SOURCE_CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const METADATA_CID: &str = "QmMetaMetaMetaMetaMetaMetaMetaMetaMetaMeta1";

    let metadata = metadata_bytes(vec![format!("dweb:/ipfs/{SOURCE_CID}")], false);
    let gateway_app = axum::Router::new().route(
        "/ipfs/:cid",
        axum::routing::get(move |axum::extract::Path(cid): axum::extract::Path<String>| {
            let metadata = metadata.clone();
            async move {
                if cid == METADATA_CID {
                    metadata
                } else {
                    SOURCE.as_bytes().to_vec()
                }
            }
        }),
    );
    let gateway_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let gateway_addr = gateway_listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(gateway_listener, gateway_app).await.expect("serve");
    });

    let mut fetchers = FetcherRegistry::new();
    fetchers.insert(Arc::new(GatewayFetcher::new(
        HashOrigin::Ipfs,
        vec![format!("http://{gateway_addr}/ipfs")],
        Duration::from_secs(2),
        8,
    )));

    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        StubCompiler::fixed(runtime_a()),
        StubChain::with_code(address(), onchain),
        fetchers,
    )
    .await;

    let reply: Value = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&json!({
            "address": CONTRACT_ADDRESS,
            "chain": 1,
            "metadataHash": format!("ipfs://{METADATA_CID}")
        }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
}

#[tokio::test]
async fn trailer_mismatch_is_partial_and_promotion_relocates_the_directory() {
    let compiled = Arc::new(Mutex::new(runtime_b()));
    let compiled_handle = Arc::clone(&compiled);
    let compiler = StubCompiler {
        runtime_for: Box::new(move |_| compiled_handle.lock().clone()),
        immutable_references: json!({}),
        emit_metadata: None,
        delay: None,
    };

    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        compiler,
        StubChain::with_code(address(), onchain),
        FetcherRegistry::new(),
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(Vec::new(), true)).expect("utf8");
    let body = verify_body(json!({ "metadata.json": metadata }));

    let reply: Value = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "partial");
    let partial_dir = server
        .repo_path
        .join("contracts/partial_match/1")
        .join(address().checksummed());
    assert!(partial_dir.join("metadata.json").is_file());

    // Corrected compilation now reproduces the deployed trailer exactly.
    *compiled.lock() = runtime_a();
    let reply: Value = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
    assert!(!partial_dir.exists(), "partial directory must be removed on promotion");
    assert!(server
        .repo_path
        .join("contracts/full_match/1")
        .join(address().checksummed())
        .join("metadata.json")
        .is_file());
}

#[tokio::test]
async fn concurrent_duplicate_verifications_collide_on_the_single_flight_gate() {
    let mut compiler = StubCompiler::fixed(runtime_a());
    compiler.delay = Some(Duration::from_millis(400));
    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        compiler,
        StubChain::with_code(address(), onchain),
        FetcherRegistry::new(),
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(Vec::new(), true)).expect("utf8");
    let body = verify_body(json!({ "metadata.json": metadata }));

    let first = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send();
    let second = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send();
    let (first, second) = tokio::join!(first, second);
    let mut statuses = vec![
        first.expect("first").status().as_u16(),
        second.expect("second").status().as_u16(),
    ];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 429]);

    // The gate must not leak: a later verification goes through.
    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send()
        .await
        .expect("third");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn omitted_source_file_recovers_through_the_sentinel() {
    // Without the extra file the stub compiles to a strict extension of
    // the deployed code; with it, to the exact bytes.
    let compiler = StubCompiler {
        runtime_for: Box::new(|input| {
            if input.sources.contains_key("Extra.sol") {
                runtime_a()
            } else {
                format!("{}fefefe", runtime_a())
            }
        }),
        immutable_references: json!({}),
        emit_metadata: None,
        delay: None,
    };
    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        compiler,
        StubChain::with_code(address(), onchain),
        FetcherRegistry::new(),
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(Vec::new(), true)).expect("utf8");
    let body = verify_body(json!({
        "metadata.json": metadata,
        "Extra.sol": "library Extra {}"
    }));
    let reply: Value = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&body)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
}

#[tokio::test]
async fn immutable_slots_are_masked_and_their_values_archived() {
    // Span inside the code body; the chain holds a deployment-time value
    // where the recompilation has zeros.
    let compiled_runtime = format!("60806040{}{TRAILER_A}", "00000000");
    let onchain_runtime = format!("60806040{}{TRAILER_A}", "deadbeef");
    let compiler = StubCompiler {
        runtime_for: Box::new(move |_| compiled_runtime.clone()),
        immutable_references: json!({ "7": [ { "start": 4, "length": 4 } ] }),
        emit_metadata: None,
        delay: None,
    };
    let server = start_server(
        compiler,
        StubChain::with_code(address(), hex::decode(&onchain_runtime).expect("hex")),
        FetcherRegistry::new(),
    )
    .await;

    let metadata = String::from_utf8(metadata_bytes(Vec::new(), true)).expect("utf8");
    let reply: Value = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&verify_body(json!({ "metadata.json": metadata })))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");

    let stored = server
        .repo_path
        .join("contracts/full_match/1")
        .join(address().checksummed());
    let immutables: Value = serde_json::from_slice(
        &std::fs::read(stored.join("immutable-references.json")).expect("file"),
    )
    .expect("json");
    assert_eq!(immutables["7"], "0xdeadbeef");
}

#[tokio::test]
async fn bad_requests_map_to_the_documented_statuses() {
    let onchain = hex::decode(runtime_a()).expect("hex");
    let server = start_server(
        StubCompiler::fixed(runtime_a()),
        StubChain::with_code(address(), onchain),
        FetcherRegistry::new(),
    )
    .await;
    let metadata = String::from_utf8(metadata_bytes(Vec::new(), true)).expect("utf8");

    // No files at all.
    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&json!({ "address": CONTRACT_ADDRESS, "chain": 1, "files": {} }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);

    // Unknown chain.
    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&json!({
            "address": CONTRACT_ADDRESS,
            "chain": 424242,
            "files": { "metadata.json": metadata }
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);
    let reply: Value = response.json().await.expect("json");
    assert_eq!(reply["error"], "unsupported-chain");

    // Source bytes that contradict their declared digest: the path is
    // claimed by name, recorded invalid, and the contract cannot verify.
    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&verify_body(json!({
            "metadata.json": String::from_utf8(metadata_bytes(Vec::new(), false)).expect("utf8"),
            "1_Storage.sol": "contract Tampered {}"
        })))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);
    let reply: Value = response.json().await.expect("json");
    let message = reply["message"].as_str().expect("message");
    assert!(message.contains("invalid"), "{message}");

    // Address with no code.
    let response = server
        .client
        .post(format!("{}/verify", server.base))
        .json(&json!({
            "address": "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359",
            "chain": 1,
            "files": { "metadata.json": metadata }
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let reply: Value = response.json().await.expect("json");
    assert_eq!(reply["error"], "not-deployed");
}

#[tokio::test]
async fn explorer_import_compiles_and_verifies() {
    // Stub explorer API: a single-file verified contract.
    let explorer_app = axum::Router::new().route(
        "/api",
        axum::routing::get(
            |axum::extract::Query(params): axum::extract::Query<
                std::collections::HashMap<String, String>,
            >| async move {
                assert_eq!(params.get("module").map(String::as_str), Some("contract"));
                axum::Json(json!({
                    "status": "1",
                    "result": [{
                        "SourceCode": SOURCE,
                        "ContractName": TARGET_NAME,
                        "CompilerVersion": "v0.8.18+commit.87f61d96",
                        "OptimizationUsed": "0",
                        "Runs": "200",
                        "EVMVersion": "Default"
                    }]
                }))
            },
        ),
    );
    let explorer_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let explorer_addr = explorer_listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(explorer_listener, explorer_app).await.expect("serve");
    });

    // The stub compiler emits the metadata document, as solc would; the
    // checker then pairs it with the explorer's source by digest.
    let mut compiler = StubCompiler::fixed(runtime_a());
    compiler.emit_metadata = Some(
        String::from_utf8(metadata_bytes(Vec::new(), false)).expect("utf8"),
    );

    let repo = TempDir::new().expect("tempdir");
    let mut chains = ChainRegistry::new();
    let explorer = Arc::new(sourceproof_daemon::explorer::ExplorerClient::new(
        format!("http://{explorer_addr}/api"),
        None,
    ));
    chains.insert(ChainEntry {
        chain_id: 1,
        name: "Ethereum Mainnet".to_string(),
        client: Arc::new(StubChain::with_code(
            address(),
            hex::decode(runtime_a()).expect("hex"),
        )),
        explorer: Some(explorer),
    });
    let chains = Arc::new(chains);
    let state = AppState::new(
        Arc::new(SessionStore::new(SessionConfig::default())),
        Arc::new(VerificationCoordinator::new(
            Arc::clone(&chains),
            Arc::new(compiler),
        )),
        Arc::new(MatchStore::open(repo.path()).expect("repository")),
        Arc::new(PendingAssembler::new(Arc::new(FetcherRegistry::new()))),
        chains,
        None,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        server::serve(listener, state, 10 * 1024 * 1024).await.expect("serve");
    });

    let client = reqwest::Client::new();
    let reply: Value = client
        .post(format!("http://{addr}/verify/etherscan"))
        .json(&json!({ "address": CONTRACT_ADDRESS, "chain": 1 }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(reply["result"][0]["status"], "perfect");
}

#[tokio::test]
async fn health_and_chains_are_served() {
    let server = start_server(
        StubCompiler::fixed(runtime_a()),
        StubChain::with_code(address(), Vec::new()),
        FetcherRegistry::new(),
    )
    .await;

    let health: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "ok");

    let chains: Value = server
        .client
        .get(format!("{}/chains", server.base))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(chains[0]["chainId"], 1);
}
