//! Helpers for tests that need a stand-in HTTP backend.

use crate::vault::VaultEndpoint;

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Vault endpoint pointing at a stub started with [`serve`].
pub(crate) fn vault_endpoint(base: &str) -> VaultEndpoint {
    let (host, port) = base.trim_start_matches("http://").split_once(':').unwrap();
    VaultEndpoint {
        addr: host.to_string(),
        port: port.parse().unwrap(),
        tls: false,
    }
}
