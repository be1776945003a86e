use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Form posted by peers to `/new_transaction`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionSignalForm {
    /// JSON encoded signed transaction
    pub transaction: String,
}

/// Form posted by peers to `/new_block`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockSignalForm {
    /// JSON encoded block, including its hash
    pub block: String,
}

/// Form for `/create_transaction`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTransactionForm {
    /// Receiver address
    pub receiver: String,

    /// Amount to transfer
    pub amount: f64,

    /// Fee paid to the miner; the node's default when omitted
    #[serde(default)]
    pub fee: Option<f64>,
}

/// Form for `/add_client`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddClientForm {
    /// Base URL of the peer, e.g. `http://localhost:5001`
    pub client: String,
}

/// Balance of an address
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Absent when the address has no ledger entry
    pub balance: Option<f64>,
}

/// Result of pulling a peer's chain
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddClientResponse {
    pub client: String,

    /// Whether the peer chain replaced the local one
    pub adopted: bool,

    /// Local chain length afterwards, genesis included
    pub length: usize,
}
