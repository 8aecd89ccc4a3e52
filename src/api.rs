//! Service façade
//!
//! [`CustodyService`] bundles a token driver with the configuration and
//! secrets built at process start and exposes the custody operations.
//! [`open`] wires it to the PKCS#11 module named in the configuration.

use bitcoin::secp256k1::{All, Secp256k1};
use tracing::{error, info};

use crate::adapters::Pkcs11Driver;
use crate::config::{CustodyConfig, Secrets};
use crate::error::CustodyResult;
use crate::ports::TokenDriver;
use crate::use_cases::{
    bootstrap as bootstrap_use_case, get_address as get_address_use_case,
    sign_bitcoin as sign_bitcoin_use_case, sign_bitcoin_raw as sign_bitcoin_raw_use_case,
    sign_ethereum as sign_ethereum_use_case, BootstrapReport,
};

pub use crate::model::*;

pub struct CustodyService<D: TokenDriver> {
    driver: D,
    config: CustodyConfig,
    secrets: Secrets,
    secp: Secp256k1<All>,
}

impl<D: TokenDriver> CustodyService<D> {
    /// Validate the configuration and build the service without touching the token
    pub fn new(driver: D, config: CustodyConfig, secrets: Secrets) -> CustodyResult<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            config,
            secrets,
            secp: Secp256k1::new(),
        })
    }

    /// Build the service and run a best-effort bootstrap
    ///
    /// A failed bootstrap is logged and the service is still returned, so
    /// later calls report their own cause.
    pub fn start(driver: D, config: CustodyConfig, secrets: Secrets) -> CustodyResult<Self> {
        let service = Self::new(driver, config, secrets)?;
        if let Err(e) = service.bootstrap() {
            error!("Bootstrap failed: {}", e);
        }
        Ok(service)
    }

    pub fn bootstrap(&self) -> CustodyResult<BootstrapReport> {
        bootstrap_use_case(&self.driver, &self.config, &self.secrets)
    }

    pub fn sign_bitcoin(&self, request: &BitcoinTransferRequest) -> CustodyResult<String> {
        sign_bitcoin_use_case(
            &self.driver,
            &self.config,
            self.secrets.user_pin(),
            &self.secp,
            request,
        )
    }

    pub fn sign_bitcoin_raw(&self, request: &BitcoinRawSignRequest) -> CustodyResult<String> {
        sign_bitcoin_raw_use_case(
            &self.driver,
            &self.config,
            self.secrets.user_pin(),
            &self.secp,
            request,
        )
    }

    pub fn sign_ethereum(&self, request: &EthereumSignRequest) -> CustodyResult<String> {
        sign_ethereum_use_case(&self.driver, &self.config, self.secrets.user_pin(), request)
    }

    pub fn get_address(&self, request: &AddressRequest) -> CustodyResult<String> {
        get_address_use_case(
            &self.driver,
            &self.config,
            self.secrets.user_pin(),
            &self.secp,
            request,
        )
    }

    /// Sign a JSON encoded [`BitcoinTransferRequest`]
    pub fn sign_bitcoin_json(&self, json: &str) -> CustodyResult<String> {
        self.sign_bitcoin(&parse_request(json)?)
    }

    /// Sign a JSON encoded [`BitcoinRawSignRequest`]
    pub fn sign_bitcoin_raw_json(&self, json: &str) -> CustodyResult<String> {
        self.sign_bitcoin_raw(&parse_request(json)?)
    }

    /// Sign a JSON encoded [`EthereumSignRequest`]
    pub fn sign_ethereum_json(&self, json: &str) -> CustodyResult<String> {
        self.sign_ethereum(&parse_request(json)?)
    }

    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

/// Load the configured PKCS#11 module without bootstrapping
pub fn connect(config: CustodyConfig, secrets: Secrets) -> CustodyResult<CustodyService<Pkcs11Driver>> {
    config.validate()?;
    let driver = Pkcs11Driver::new(config.library_path()?)?;
    CustodyService::new(driver, config, secrets)
}

/// Load the configured PKCS#11 module and bootstrap the token
pub fn open(config: CustodyConfig, secrets: Secrets) -> CustodyResult<CustodyService<Pkcs11Driver>> {
    config.validate()?;
    let driver = Pkcs11Driver::new(config.library_path()?)?;
    info!("Starting custody service for token {:?}", config.application_name);
    CustodyService::start(driver, config, secrets)
}
