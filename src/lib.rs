#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod store;
pub mod verification;

pub use config::Config;

use config::{ConfigFairing, GateFairing, StoreFairing};
use logging::LoggerFairing;

/// Assemble the server. Configuration, storage and the verification gate are
/// loaded from the Rocket figment when the server ignites.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(GateFairing)
        .attach(LoggerFairing)
}

#[cfg(test)]
pub(crate) use test_backend::{rocket_for_backend, TestBackend};

#[cfg(test)]
mod test_backend {
    use std::sync::Arc;

    use rocket::{Build, Rocket};

    use crate::{
        api,
        coordinator::Coordinator,
        identity::{ensure_admin_exists, Identity, PasswordIdentityProvider},
        logging::LoggerFairing,
        store::{memory::MemoryStore, Stores},
        verification::{Gate, ScriptedGate},
        Config,
    };

    /// Everything a test may want to poke at behind the server's back.
    #[derive(Clone)]
    pub struct TestBackend {
        pub store: Arc<MemoryStore>,
        pub stores: Stores,
        pub gate: Arc<ScriptedGate>,
    }

    impl TestBackend {
        pub fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let stores = Stores::from_shared(store.clone());
            Self {
                store,
                stores,
                gate: Arc::new(ScriptedGate::accepting()),
            }
        }
    }

    /// Build a server over the in-memory backend, bypassing the fairings.
    pub async fn rocket_for_backend(backend: &TestBackend) -> Rocket<Build> {
        let config = Config::example();
        let identity = Identity::new(PasswordIdentityProvider::new(
            backend.stores.accounts.clone(),
            &config,
        ));
        ensure_admin_exists(&identity, backend.stores.voters.as_ref(), &config)
            .await
            .unwrap();
        let coordinator = Coordinator::new(&backend.stores, config.required_methods());
        let gate = Gate::new(backend.gate.clone(), config.verification_timeout());

        rocket::build()
            .mount("/", api::routes())
            .manage(config)
            .manage(backend.stores.clone())
            .manage(identity)
            .manage(coordinator)
            .manage(gate)
            .attach(LoggerFairing)
    }
}
