use reqwest::Client;
use std::sync::Once;
use std::time::Duration;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring crypto provider for rustls once per process.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means another provider is already in place, which is fine
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build an outbound client with a whole-request timeout.
pub fn client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
    install_crypto_provider();
    Client::builder().timeout(timeout).build()
}
