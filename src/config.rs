use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::coordinator::Coordinator;
use crate::identity::{ensure_admin_exists, Identity, PasswordIdentityProvider};
use crate::store::{memory::MemoryStore, mongo::MongoStore, Stores};
use crate::verification::{AcceptingGate, Gate, HttpGate, Method, VerificationGate};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    verification_ttl: u32,
    verification_timeout_ms: u64,
    #[serde(default)]
    verification_url: Option<String>,
    #[serde(default = "default_required_methods")]
    required_methods: BTreeSet<Method>,
    admin_email: String,
    // secrets
    jwt_secret: String,
    admin_password: String,
}

fn default_required_methods() -> BTreeSet<Method> {
    BTreeSet::from([Method::Face, Method::Biometric])
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// How long a verification proof stays usable after its first method passes.
    pub fn verification_ttl(&self) -> Duration {
        Duration::seconds(self.verification_ttl.into())
    }

    /// How long to wait for the verification service before giving up.
    pub fn verification_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.verification_timeout_ms)
    }

    /// Base URL of the verification service. Without one every check passes.
    pub fn verification_url(&self) -> Option<&str> {
        self.verification_url.as_deref()
    }

    /// Methods a voter must pass before casting a vote.
    pub fn required_methods(&self) -> BTreeSet<Method> {
        self.required_methods.clone()
    }

    /// Email of the bootstrap admin.
    pub fn admin_email(&self) -> &str {
        &self.admin_email
    }

    /// Password of the bootstrap admin.
    pub fn admin_password(&self) -> &str {
        &self.admin_password
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which storage backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreKind {
    Memory,
    Mongodb,
}

/// Configuration for the storage backend.
#[derive(Deserialize)]
struct StoreConfig {
    store: StoreKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
}

fn default_db_name() -> String {
    "evote".to_string()
}

/// A fairing that loads the store config, connects to the chosen backend,
/// makes sure the bootstrap admin exists, and places the [`Stores`], the
/// [`Identity`] provider and the [`Coordinator`] into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let store_config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let Some(config) = rocket.state::<Config>().cloned() else {
            error!("Store fairing attached before the config fairing");
            return Err(rocket);
        };

        // Construct the backend.
        let stores = match store_config.store {
            StoreKind::Memory => {
                warn!("Using the in-memory store; nothing will survive a restart");
                Stores::from_shared(Arc::new(MemoryStore::new()))
            }
            StoreKind::Mongodb => {
                let Some(db_uri) = store_config.db_uri else {
                    error!("`db_uri` is required when `store = \"mongodb\"`");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&db_uri, &store_config.db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Stores::from_shared(Arc::new(store))
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };

        // Ensure there is at least one admin user.
        let identity = Identity::new(PasswordIdentityProvider::new(
            stores.accounts.clone(),
            &config,
        ));
        if let Err(e) = ensure_admin_exists(&identity, stores.voters.as_ref(), &config).await {
            error!("Failed to create the admin account: {e}");
            return Err(rocket);
        }
        let coordinator = Coordinator::new(&stores, config.required_methods());

        // Manage the state.
        rocket = rocket.manage(stores).manage(identity).manage(coordinator);
        Ok(rocket)
    }
}

/// A fairing that builds the verification gate from the application config
/// and places it into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct GateFairing;

#[rocket::async_trait]
impl Fairing for GateFairing {
    fn info(&self) -> Info {
        Info {
            name: "Verification gate",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Gate fairing attached before the config fairing");
            return Err(rocket);
        };

        let inner: Arc<dyn VerificationGate> = match config.verification_url() {
            Some(url) => {
                info!("Verifying identities against {url}");
                Arc::new(HttpGate::new(url))
            }
            None => {
                warn!("No `verification_url` configured; every identity check will pass");
                Arc::new(AcceptingGate)
            }
        };
        let gate = Gate::new(inner, config.verification_timeout());

        // Manage the state.
        rocket = rocket.manage(gate);
        Ok(rocket)
    }
}


#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    #[test]
    fn required_methods_default_to_both() {
        let figment = Figment::new().merge(Serialized::defaults(
            rocket::serde::json::serde_json::json!({
                "auth_ttl": 60,
                "verification_ttl": 60,
                "verification_timeout_ms": 500,
                "admin_email": "admin@example.com",
                "jwt_secret": "secret",
                "admin_password": "password123",
            }),
        ));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.required_methods(), default_required_methods());
        assert_eq!(config.verification_url(), None);
        assert_eq!(config.verification_timeout(), StdDuration::from_millis(500));
    }

    #[test]
    fn store_config_defaults_database_name() {
        let figment = Figment::new().merge(Serialized::defaults(
            rocket::serde::json::serde_json::json!({ "store": "memory" }),
        ));
        let config: StoreConfig = figment.extract().unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.db_name, "evote");
        assert!(config.db_uri.is_none());
    }
}
