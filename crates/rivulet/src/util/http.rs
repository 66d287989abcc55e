use std::{ops::Deref, sync::Arc, time::Duration};

use reqwest::{Client, ClientBuilder, IntoUrl, Proxy};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

/// HTTP session shared by every stage of a stream: one `reqwest` client plus
/// a cookie jar that survives redirects and key fetches.
///
/// Proxy and timeout defaults are set at construction; per-segment timeouts
/// are applied per request on top of this.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder
            .cookie_provider(cookies_store.clone())
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            cookies_store,
        }
    }

    /// Session with an upstream proxy and an overall request timeout.
    pub fn with_proxy_and_timeout(proxy: Option<Proxy>, timeout: Option<Duration>) -> Self {
        let mut builder = Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self::new(builder)
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) {
        let url = url.into_url().expect("invalid cookie URL");
        let mut lock = self.cookies_store.lock().unwrap();
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Client::builder())
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
