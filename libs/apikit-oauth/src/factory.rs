use std::collections::BTreeMap;
use std::sync::Arc;

use apikit::Transport;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use figment::Figment;
use serde::Deserialize;

use crate::cache::TokenCache;
use crate::config::CredentialsOptions;
use crate::error::TokenError;
use crate::provider::TokenProvider;
use crate::types::TokenKey;

/// One credentials section, or several distinguished by alias.
#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialsSection {
    One(CredentialsOptions),
    Many(Vec<CredentialsOptions>),
}

/// Registry of token providers by API name and alias.
///
/// All providers share one transport and one [`TokenCache`].
pub struct TokenProviderFactory {
    transport: Arc<dyn Transport>,
    cache: Arc<TokenCache>,
    providers: DashMap<TokenKey, Arc<TokenProvider>>,
}

impl std::fmt::Debug for TokenProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProviderFactory")
            .field("providers", &self.providers.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TokenProviderFactory {
    /// Factory with its own cache.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_cache(transport, Arc::new(TokenCache::new()))
    }

    /// Factory storing tokens in `cache`.
    #[must_use]
    pub fn with_cache(transport: Arc<dyn Transport>, cache: Arc<TokenCache>) -> Self {
        Self {
            transport,
            cache,
            providers: DashMap::new(),
        }
    }

    /// Cache shared by every provider of this factory.
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Register credentials for `api`, under `options.alias` if set.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if the options are invalid or the
    /// key is already registered.
    pub fn register(
        &self,
        api: &str,
        options: CredentialsOptions,
    ) -> Result<Arc<TokenProvider>, TokenError> {
        let key = TokenKey::new(api, options.alias.as_deref());
        match self.providers.entry(key.clone()) {
            Entry::Occupied(_) => Err(TokenError::ConfigError(format!(
                "credentials for '{key}' registered twice"
            ))),
            Entry::Vacant(slot) => {
                let provider = Arc::new(TokenProvider::new(
                    key.clone(),
                    options,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.cache),
                )?);
                slot.insert(Arc::clone(&provider));
                tracing::debug!(key = %key, "token provider registered");
                Ok(provider)
            }
        }
    }

    /// Register every API found under `key`.
    ///
    /// The section maps API names to one credentials object or a list of
    /// them with distinct aliases:
    ///
    /// ```yaml
    /// oauth:
    ///   billing:
    ///     endpoint: https://login.example.com/token
    ///     client_id: billing
    ///     client_secret: ${BILLING_SECRET}
    ///   crm:
    ///     - { endpoint: ..., client_id: crm, client_secret: ... }
    ///     - { endpoint: ..., client_id: crm-admin, client_secret: ..., alias: admin }
    /// ```
    ///
    /// Returns the number of providers registered.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if the section is malformed or any
    /// entry fails [`register`](Self::register).
    pub fn register_from_figment(&self, figment: &Figment, key: &str) -> Result<usize, TokenError> {
        let sections: BTreeMap<String, CredentialsSection> = figment
            .extract_inner(key)
            .map_err(|e| TokenError::ConfigError(e.to_string()))?;

        let mut registered = 0;
        for (api, section) in sections {
            let entries = match section {
                CredentialsSection::One(options) => vec![options],
                CredentialsSection::Many(list) => list,
            };
            for options in entries {
                self.register(&api, options)?;
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Provider registered for `api` and `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if nothing is registered for the
    /// key.
    pub fn create(&self, api: &str, alias: Option<&str>) -> Result<Arc<TokenProvider>, TokenError> {
        let key = TokenKey::new(api, alias);
        self.providers
            .get(&key)
            .map(|provider| Arc::clone(provider.value()))
            .ok_or_else(|| TokenError::ConfigError(format!("no credentials registered for '{key}'")))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apikit::{HyperTransport, TransportConfig};
    use figment::providers::Serialized;
    use serde_json::json;
    use url::Url;

    fn factory() -> TokenProviderFactory {
        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        TokenProviderFactory::new(Arc::new(transport))
    }

    fn options(alias: Option<&str>) -> CredentialsOptions {
        CredentialsOptions {
            alias: alias.map(str::to_owned),
            ..CredentialsOptions::client_credentials(
                Url::parse("https://login.example.com/token").unwrap(),
                "client",
                "secret",
            )
        }
    }

    #[test]
    fn create_resolves_by_api_and_alias() {
        let factory = factory();
        factory.register("billing", options(None)).unwrap();
        factory.register("billing", options(Some("admin"))).unwrap();

        let plain = factory.create("billing", None).unwrap();
        let admin = factory.create("billing", Some("admin")).unwrap();
        assert_eq!(plain.key().to_string(), "billing");
        assert_eq!(admin.key().to_string(), "billing#admin");
        assert!(Arc::ptr_eq(&plain, &factory.create("billing", None).unwrap()));
    }

    #[test]
    fn factory_exposes_the_shared_cache() {
        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let cache = Arc::new(TokenCache::new());
        let factory = TokenProviderFactory::with_cache(Arc::new(transport), Arc::clone(&cache));
        assert!(Arc::ptr_eq(factory.cache(), &cache));
    }

    #[test]
    fn unknown_and_duplicate_keys_are_config_errors() {
        let factory = factory();
        factory.register("billing", options(None)).unwrap();

        let err = factory.create("billing", Some("ops")).unwrap_err();
        assert!(matches!(err, TokenError::ConfigError(msg) if msg.contains("billing#ops")));

        let err = factory.register("billing", options(None)).unwrap_err();
        assert!(matches!(err, TokenError::ConfigError(msg) if msg.contains("twice")));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let factory = factory();
        let err = factory
            .register("billing", CredentialsOptions::default())
            .unwrap_err();
        assert!(matches!(err, TokenError::ConfigError(_)));
        assert!(factory.create("billing", None).is_err());
    }

    #[test]
    fn registers_from_figment() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "oauth": {
                "billing": {
                    "endpoint": "https://login.example.com/token",
                    "client_id": "billing",
                    "client_secret": "s1"
                },
                "crm": [
                    {
                        "endpoint": "https://login.example.com/token",
                        "client_id": "crm",
                        "client_secret": "s2"
                    },
                    {
                        "endpoint": "https://login.example.com/token",
                        "client_id": "crm-admin",
                        "client_secret": "s3",
                        "alias": "admin"
                    }
                ]
            }
        })));

        let factory = factory();
        assert_eq!(factory.register_from_figment(&figment, "oauth").unwrap(), 3);
        assert_eq!(
            factory.create("crm", Some("admin")).unwrap().options().client_id,
            "crm-admin"
        );
    }
}
