use actix_web::web;

use super::handlers;

/// Configures the node's HTTP routes.
///
/// Gossip endpoints live at the root because peers address them as
/// `{peer}/blocks`, `{peer}/new_block` and `{peer}/new_transaction`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/blocks", web::get().to(handlers::get_blocks))
        .route("/new_transaction", web::post().to(handlers::new_transaction))
        .route("/new_block", web::post().to(handlers::new_block))
        .route("/create_transaction", web::post().to(handlers::create_transaction))
        .route("/add_client", web::post().to(handlers::add_client))
        .route("/balance", web::get().to(handlers::get_balance))
        .route("/balance/{address}", web::get().to(handlers::get_balance_of))
        .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
        .route("/peers", web::get().to(handlers::get_peers));
}
