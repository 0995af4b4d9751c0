/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Control plane API token cache.

use crossbeam_skiplist::SkipMap;
use crossbeam_skiplist::map::Entry;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::Duration;
use tokio::time::sleep;

/// API token cache used to populate the `x-token` header in HTTP requests.
///
/// A token configured up front is used as is. Otherwise the token is loaded
/// from `/var/run/secrets/cpconnector/api-token`, which can be changed by
/// setting the environment variable `API_TOKEN_FILENAME`, and reloaded
/// every minute.
pub struct ApiTokenCache {
    token_file: Option<String>,
    api_token: SkipMap<(), Arc<String>>,
}

impl ApiTokenCache {
    /// HTTP header carrying the API token.
    pub const HEADER_NAME: &str = "x-token";

    const ENV: &str = "API_TOKEN_FILENAME";
    const DEFAULT: &str = "/var/run/secrets/cpconnector/api-token";

    /// Return a new instance.
    ///
    /// A non-empty `static_token` disables loading the token from file.
    pub async fn new(static_token: Option<&str>) -> Arc<Self> {
        if let Some(static_token) = static_token.filter(|token| !token.trim().is_empty()) {
            let api_token = SkipMap::default();
            api_token.insert((), Arc::new(static_token.trim().to_owned()));
            return Arc::new(Self {
                token_file: None,
                api_token,
            });
        }
        let token_file = std::env::var(Self::ENV)
            .map_err(|e| log::debug!("Unable to parse environment variable '{}': {e}", Self::ENV))
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                log::debug!(
                    "Using default value '{}' for environment variable '{}'.",
                    Self::DEFAULT,
                    Self::ENV,
                );
                Self::DEFAULT.to_string()
            });
        Arc::new(Self {
            token_file: Some(token_file),
            api_token: SkipMap::default(),
        })
        .init()
        .await
    }

    /// Start background task for reloading the token file.
    async fn init(self: Arc<Self>) -> Arc<Self> {
        let ret = Arc::clone(&self);
        self.reload_api_token().await;
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(60)).await;
                self.reload_api_token().await;
            }
        });
        ret
    }

    /// Return the current token if one is known.
    pub fn current(&self) -> Option<Arc<String>> {
        self.api_token
            .get(&())
            .as_ref()
            .map(Entry::value)
            .map(Arc::clone)
    }

    /// Perform background reload of the cached token.
    async fn reload_api_token(&self) -> bool {
        let Some(token_file) = &self.token_file else {
            return false;
        };
        Self::read_file_text(token_file)
            .await
            .map_err(|e| log::debug!("Unable to load API token from '{token_file}': {e}"))
            .ok()
            .map(|api_token| api_token.trim().to_owned())
            .filter(|api_token| !api_token.is_empty())
            .map(|api_token| {
                if self
                    .api_token
                    .get(&())
                    .is_none_or(|entry| !entry.value().as_ref().eq(&api_token))
                {
                    log::debug!("API token changed.");
                }
                self.api_token.insert((), Arc::new(api_token));
            })
            .is_some()
    }

    /// Read full content of a file into a String.
    async fn read_file_text(filename: &str) -> Result<String, Box<dyn core::error::Error>> {
        let mut file = File::open(filename).await?;
        let mut contents = vec![];
        file.read_to_end(&mut contents).await?;
        Ok(std::str::from_utf8(&contents)?.to_string())
    }
}
