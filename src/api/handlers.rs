use actix_web::{web, HttpResponse, Responder};
use log::{debug, error, warn};

use crate::api::schema::{
    AddClientForm, AddClientResponse, BalanceResponse, BlockSignalForm, CreateTransactionForm,
    TransactionSignalForm,
};
use crate::blockchain::{Address, Admission, ChainAdoption, Node, NodeError, PeerStatus, SignedTransaction};
use crate::config::NodeConfig;

/// Shared node handle
pub type NodeData = web::Data<Node>;

/// Maps a node error to a JSON error response
fn error_response(err: &NodeError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });
    match err {
        NodeError::PeerUnreachable(_) => HttpResponse::BadGateway().json(body),
        NodeError::ProtocolViolation(_) | NodeError::NegativeBalance(_) => {
            HttpResponse::Conflict().json(body)
        }
        NodeError::SignatureInvalid
        | NodeError::InsufficientFunds { .. }
        | NodeError::MalformedInput(_) => HttpResponse::BadRequest().json(body),
    }
}

/// Full chain dump
///
/// Element 0 is the genesis address, the rest are blocks
#[utoipa::path(
    get,
    path = "/blocks",
    responses(
        (status = 200, description = "JSON array: genesis address followed by blocks")
    )
)]
pub async fn get_blocks(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.chain_dump())
}

/// Gossiped transaction
///
/// Invalid or unaffordable transactions are dropped without notice
#[utoipa::path(
    post,
    path = "/new_transaction",
    request_body(content = TransactionSignalForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 202, description = "Transaction received"),
        (status = 400, description = "Transaction could not be decoded")
    )
)]
pub async fn new_transaction(node: NodeData, form: web::Form<TransactionSignalForm>) -> impl Responder {
    match node.transaction_signal(&form.transaction) {
        Ok(admission) => {
            if let Admission::Rejected(reason) = admission {
                debug!("Gossiped transaction dropped: {}", reason);
            }
            HttpResponse::Accepted().json(serde_json::json!({ "status": "received" }))
        }
        Err(err) => error_response(&err),
    }
}

/// Gossiped block
///
/// Accepted only if it extends the current head
#[utoipa::path(
    post,
    path = "/new_block",
    request_body(content = BlockSignalForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 202, description = "Block applied"),
        (status = 400, description = "Block could not be decoded"),
        (status = 409, description = "Block rejected, this node and the sender have diverged")
    )
)]
pub async fn new_block(node: NodeData, form: web::Form<BlockSignalForm>) -> impl Responder {
    match node.block_signal(&form.block) {
        Ok(()) => HttpResponse::Accepted().json(serde_json::json!({ "head": node.head() })),
        Err(err) => {
            if err.is_fatal() {
                error!("Rejected gossiped block: {}", err);
            } else {
                warn!("Rejected gossiped block: {}", err);
            }
            error_response(&err)
        }
    }
}

/// Create a transaction from this node
///
/// Signs with the node's identity, pools it locally and gossips it to every peer
#[utoipa::path(
    post,
    path = "/create_transaction",
    request_body(content = CreateTransactionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 201, description = "Transaction created", body = SignedTransaction),
        (status = 400, description = "Invalid receiver or insufficient funds")
    )
)]
pub async fn create_transaction(
    node: NodeData,
    config: web::Data<NodeConfig>,
    form: web::Form<CreateTransactionForm>,
) -> impl Responder {
    let receiver: Address = match form.receiver.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid receiver: {}", err)
            }));
        }
    };
    let fee = form.fee.unwrap_or(config.default_fee);

    match node.create_transaction(receiver, form.amount, fee).await {
        Ok(signed) => HttpResponse::Created().json(signed),
        Err(err) => error_response(&err),
    }
}

/// Add a peer
///
/// Registers the peer and adopts its chain if strictly longer and fully valid
#[utoipa::path(
    post,
    path = "/add_client",
    request_body(content = AddClientForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Peer added", body = AddClientResponse),
        (status = 409, description = "Peer chain failed validation"),
        (status = 502, description = "Peer unreachable")
    )
)]
pub async fn add_client(node: NodeData, form: web::Form<AddClientForm>) -> impl Responder {
    match node.add_client(&form.client).await {
        Ok(outcome) => {
            let adopted = matches!(outcome, ChainAdoption::Adopted { .. });
            HttpResponse::Ok().json(AddClientResponse {
                client: form.client.clone(),
                adopted,
                length: node.chain_len(),
            })
        }
        Err(err) => {
            if err.is_fatal() {
                error!("Rejected chain from {}: {}", form.client, err);
            } else {
                warn!("Could not add {}: {}", form.client, err);
            }
            error_response(&err)
        }
    }
}

/// This node's balance
#[utoipa::path(
    get,
    path = "/balance",
    responses(
        (status = 200, description = "Balance of this node's address", body = BalanceResponse)
    )
)]
pub async fn get_balance(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(BalanceResponse {
        address: node.address().to_string(),
        balance: Some(node.balance()),
    })
}

/// Balance of any address
#[utoipa::path(
    get,
    path = "/balance/{address}",
    params(("address" = String, Path, description = "Base58 address")),
    responses(
        (status = 200, description = "Balance, null if the address is unknown", body = BalanceResponse)
    )
)]
pub async fn get_balance_of(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = node.balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Pending transactions
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Transactions waiting to be mined", body = Vec<SignedTransaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.pending_transactions())
}

/// Known peers
#[utoipa::path(
    get,
    path = "/peers",
    responses(
        (status = 200, description = "Statically known peers", body = Vec<PeerStatus>)
    )
)]
pub async fn get_peers(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.peers().statuses())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::block::tests::mine;
    use crate::blockchain::peers::testing::RecordingPeers;
    use crate::blockchain::{Block, PeerClient, Transaction, Wallet};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn node_data(wallet: Wallet, peers: &Arc<RecordingPeers>) -> NodeData {
        let client: Arc<dyn PeerClient> = peers.clone();
        web::Data::new(Node::new(wallet, 1, true, client).unwrap())
    }

    macro_rules! app {
        ($node:expr) => {
            test::init_service(
                App::new()
                    .app_data($node.clone())
                    .app_data(web::Data::new(NodeConfig::default()))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_get_blocks_starts_with_genesis() {
        let peers = Arc::new(RecordingPeers::default());
        let wallet = Wallet::new();
        let node = node_data(wallet.clone(), &peers);
        let app = app!(node);

        let req = test::TestRequest::get().uri("/blocks").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, serde_json::json!([wallet.address().0]));
    }

    #[actix_web::test]
    async fn test_create_transaction_then_gossip_block() {
        let peers = Arc::new(RecordingPeers::default());
        let wallet = Wallet::new();
        let bob = Wallet::new();
        let node = node_data(wallet.clone(), &peers);
        let app = app!(node);

        let req = test::TestRequest::post()
            .uri("/create_transaction")
            .set_form([("receiver", bob.address().0.clone()), ("amount", "30".to_string())])
            .to_request();
        let signed: SignedTransaction = test::call_and_read_body_json(&app, req).await;
        assert_eq!(signed.transaction.fee, 0.1);
        assert_eq!(node.pending_transactions().len(), 1);

        let mut block = Block::new(vec![signed], node.head(), bob.address().clone());
        mine(&mut block, 1, 21);
        let req = test::TestRequest::post()
            .uri("/new_block")
            .set_form([("block", serde_json::to_string(&block).unwrap())])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(node.head(), block.hash);

        // Replaying the same block no longer extends the head.
        let req = test::TestRequest::post()
            .uri("/new_block")
            .set_form([("block", serde_json::to_string(&block).unwrap())])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/balance/{}", bob.address()))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, Some(30.1));
    }

    #[actix_web::test]
    async fn test_gossiped_transaction_outcomes() {
        let peers = Arc::new(RecordingPeers::default());
        let wallet = Wallet::new();
        let node = node_data(wallet.clone(), &peers);
        let app = app!(node);

        let unaffordable = Transaction::new(wallet.address().clone(), wallet.address().clone(), 500.0, 0.0)
            .sign(&wallet)
            .unwrap();
        let req = test::TestRequest::post()
            .uri("/new_transaction")
            .set_form([("transaction", serde_json::to_string(&unaffordable).unwrap())])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(node.pending_transactions().is_empty());

        let req = test::TestRequest::post()
            .uri("/new_transaction")
            .set_form([("transaction", "{broken")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_create_transaction_rejects_bad_receiver() {
        let peers = Arc::new(RecordingPeers::default());
        let node = node_data(Wallet::new(), &peers);
        let app = app!(node);

        let req = test::TestRequest::post()
            .uri("/create_transaction")
            .set_form([("receiver", "nobody"), ("amount", "1")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_add_unreachable_client_is_bad_gateway() {
        let peers = Arc::new(RecordingPeers::default());
        peers.take_down("http://gone:5000");
        let node = node_data(Wallet::new(), &peers);
        let app = app!(node);

        let req = test::TestRequest::post()
            .uri("/add_client")
            .set_form([("client", "http://gone:5000")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let req = test::TestRequest::get().uri("/peers").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["url"], "http://gone:5000");
        assert_eq!(body[0]["failures"], 1);
    }
}
