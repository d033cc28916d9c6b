// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Node configuration.
//!
//! Every tunable parameter may come from three sources: an operator override
//! (environment or an explicit map), the on-chain registry and a built-in
//! default. Each parameter declares in which order the sources are tried.
//! After startup the registry is polled again and its values replace the
//! cached ones, unless the parameter ranks the registry below the source the
//! cached value came from.

use super::task::Task;
use crate::{
    base::RwLock,
    chain::Registry,
    consensus::TurnConfig,
    crypto::{Address, Hash},
    Error, ErrorKind, Result,
};
use async_trait::async_trait;
use std::{collections::HashMap, convert::TryFrom, str::FromStr, sync::Arc, time::Duration};

/// Prefix of the registry paths of the node parameters.
pub const REGISTRY_PREFIX: &str = "MOC_ORACLE\\1\\";

/// Node parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    OracleManagerAddr,
    MessageVersion,
    PriceFetchRate,
    BlockchainInfoInterval,
    CoinPairLoopTaskInterval,
    MainLoopTaskInterval,
    ConfigurationTaskInterval,
    GatherSignatureTimeout,
    PriceRejectDeltaPct,
    PriceFallbackDeltaPct,
    PricePublishBlocks,
    PriceFallbackBlocks,
    StakeLimitMultiplicator,
    RpcTimeout,
    PriceDigits,
    QueueLen,
}

impl ConfigKey {
    /// Name used by overrides and registry paths.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::OracleManagerAddr => "ORACLE_MANAGER_ADDR",
            ConfigKey::MessageVersion => "MESSAGE_VERSION",
            ConfigKey::PriceFetchRate => "ORACLE_PRICE_FETCH_RATE",
            ConfigKey::BlockchainInfoInterval => "ORACLE_BLOCKCHAIN_INFO_INTERVAL",
            ConfigKey::CoinPairLoopTaskInterval => "ORACLE_COIN_PAIR_LOOP_TASK_INTERVAL",
            ConfigKey::MainLoopTaskInterval => "ORACLE_MAIN_LOOP_TASK_INTERVAL",
            ConfigKey::ConfigurationTaskInterval => "ORACLE_CONFIGURATION_TASK_INTERVAL",
            ConfigKey::GatherSignatureTimeout => "ORACLE_GATHER_SIGNATURE_TIMEOUT",
            ConfigKey::PriceRejectDeltaPct => "ORACLE_PRICE_REJECT_DELTA_PCT",
            ConfigKey::PriceFallbackDeltaPct => "ORACLE_PRICE_FALLBACK_DELTA_PCT",
            ConfigKey::PricePublishBlocks => "ORACLE_PRICE_PUBLISH_BLOCKS",
            ConfigKey::PriceFallbackBlocks => "ORACLE_PRICE_FALLBACK_BLOCKS",
            ConfigKey::StakeLimitMultiplicator => "ORACLE_STAKE_LIMIT_MULTIPLICATOR",
            ConfigKey::RpcTimeout => "ORACLE_RPC_TIMEOUT",
            ConfigKey::PriceDigits => "ORACLE_PRICE_DIGITS",
            ConfigKey::QueueLen => "ORACLE_QUEUE_LEN",
        }
    }

    /// Registry key, keccak256 of the parameter path.
    pub fn registry_key(&self) -> Hash {
        Hash::from_data(format!("{}{}", REGISTRY_PREFIX, self.name()).as_bytes())
    }
}

/// Where a parameter value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Override,
    Registry,
    Default,
}

/// Order in which the sources of a parameter are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOrder {
    OverrideRegistryDefault,
    RegistryOverrideDefault,
    OverrideDefaultRegistry,
}

impl ResolutionOrder {
    pub fn sources(&self) -> [Source; 3] {
        match self {
            ResolutionOrder::OverrideRegistryDefault => {
                [Source::Override, Source::Registry, Source::Default]
            }
            ResolutionOrder::RegistryOverrideDefault => {
                [Source::Registry, Source::Override, Source::Default]
            }
            ResolutionOrder::OverrideDefaultRegistry => {
                [Source::Override, Source::Default, Source::Registry]
            }
        }
    }

    /// Position of `source`, lower is preferred.
    pub fn rank(&self, source: Source) -> usize {
        self.sources()
            .iter()
            .position(|s| *s == source)
            .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Uint,
    Duration,
    Decimal,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigValue {
    Uint(u128),
    Duration(Duration),
    Decimal(f64),
    Address(Address),
}

/// Declaration of a parameter.
#[derive(Debug)]
pub struct Parameter {
    pub key: ConfigKey,
    pub kind: ValueKind,
    pub order: ResolutionOrder,
    pub default: Option<ConfigValue>,
}

const fn param(
    key: ConfigKey,
    kind: ValueKind,
    order: ResolutionOrder,
    default: Option<ConfigValue>,
) -> Parameter {
    Parameter {
        key,
        kind,
        order,
        default,
    }
}

const fn secs(secs: u64) -> Option<ConfigValue> {
    Some(ConfigValue::Duration(Duration::from_secs(secs)))
}

use ResolutionOrder::*;

/// Every parameter known to the node.
pub const PARAMETERS: &[Parameter] = &[
    param(ConfigKey::OracleManagerAddr, ValueKind::Address, RegistryOverrideDefault, None),
    param(
        ConfigKey::MessageVersion,
        ValueKind::Uint,
        RegistryOverrideDefault,
        Some(ConfigValue::Uint(3)),
    ),
    param(ConfigKey::PriceFetchRate, ValueKind::Duration, OverrideRegistryDefault, secs(5)),
    param(ConfigKey::BlockchainInfoInterval, ValueKind::Duration, OverrideRegistryDefault, secs(3)),
    param(ConfigKey::CoinPairLoopTaskInterval, ValueKind::Duration, OverrideRegistryDefault, secs(5)),
    param(ConfigKey::MainLoopTaskInterval, ValueKind::Duration, OverrideRegistryDefault, secs(120)),
    param(ConfigKey::ConfigurationTaskInterval, ValueKind::Duration, OverrideRegistryDefault, secs(240)),
    param(ConfigKey::GatherSignatureTimeout, ValueKind::Duration, OverrideRegistryDefault, secs(2)),
    param(
        ConfigKey::PriceRejectDeltaPct,
        ValueKind::Decimal,
        OverrideRegistryDefault,
        Some(ConfigValue::Decimal(50.0)),
    ),
    param(
        ConfigKey::PriceFallbackDeltaPct,
        ValueKind::Decimal,
        OverrideRegistryDefault,
        Some(ConfigValue::Decimal(0.05)),
    ),
    param(
        ConfigKey::PricePublishBlocks,
        ValueKind::Uint,
        OverrideRegistryDefault,
        Some(ConfigValue::Uint(1)),
    ),
    param(
        ConfigKey::PriceFallbackBlocks,
        ValueKind::Uint,
        OverrideRegistryDefault,
        Some(ConfigValue::Uint(3)),
    ),
    param(
        ConfigKey::StakeLimitMultiplicator,
        ValueKind::Uint,
        OverrideRegistryDefault,
        Some(ConfigValue::Uint(2)),
    ),
    param(ConfigKey::RpcTimeout, ValueKind::Duration, OverrideDefaultRegistry, secs(10)),
    param(
        ConfigKey::PriceDigits,
        ValueKind::Uint,
        OverrideDefaultRegistry,
        Some(ConfigValue::Uint(18)),
    ),
    param(
        ConfigKey::QueueLen,
        ValueKind::Uint,
        OverrideDefaultRegistry,
        Some(ConfigValue::Uint(30)),
    ),
];

/// Operator overrides, looked up by parameter name.
pub trait OverrideSource: Send + Sync + 'static {
    fn get(&self, name: &str) -> Option<String>;
}

/// Overrides read from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvOverrides;

impl OverrideSource for EnvOverrides {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl OverrideSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Parses a duration like `"5"`, `"5s"`, `"5 secs"`, `"2 mins"`, `"1 hour"`
/// or `"250ms"`. A bare number is in seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let malformed = || Error::new_ext(ErrorKind::MalformedData, format!("invalid duration '{}'", raw));
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().map_err(|_| malformed())?;
    let millis_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" | "msec" | "msecs" | "millis" => 1.0,
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hour" | "hours" => 3_600_000.0,
        _ => return Err(malformed()),
    };
    let micros = (value * millis_per_unit * 1_000.0).round();
    if !micros.is_finite() || micros >= u64::MAX as f64 {
        return Err(malformed());
    }
    Ok(Duration::from_micros(micros as u64))
}

fn parse_override(kind: ValueKind, raw: &str) -> Result<ConfigValue> {
    let malformed = || Error::new_ext(ErrorKind::MalformedData, format!("invalid value '{}'", raw));
    let trimmed = raw.trim();
    match kind {
        ValueKind::Uint => trimmed
            .parse::<u128>()
            .map(ConfigValue::Uint)
            .map_err(|_| malformed()),
        ValueKind::Decimal => match trimmed.parse::<f64>() {
            Ok(val) if val.is_finite() => Ok(ConfigValue::Decimal(val)),
            _ => Err(malformed()),
        },
        ValueKind::Address => Address::from_str(trimmed)
            .map(ConfigValue::Address)
            .map_err(|_| malformed()),
        ValueKind::Duration => parse_duration(trimmed).map(ConfigValue::Duration),
    }
}

/// A cached value and the source it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub value: ConfigValue,
    pub source: Source,
}

/// Layered node configuration.
pub struct OracleConfig {
    registry: Arc<dyn Registry>,
    overrides: Box<dyn OverrideSource>,
    values: RwLock<HashMap<ConfigKey, Resolved>>,
}

impl OracleConfig {
    /// Empty configuration, `initialize` must be called before use.
    pub fn new<O: OverrideSource>(registry: Arc<dyn Registry>, overrides: O) -> Self {
        OracleConfig {
            registry,
            overrides: Box::new(overrides),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Registry value of a parameter, `None` when unset.
    async fn read_registry(&self, param: &Parameter) -> Result<Option<ConfigValue>> {
        let key = param.key.registry_key();
        let value = match param.kind {
            ValueKind::Uint => {
                let val = self.registry.get_uint(&key).await?;
                (val != 0).then(|| ConfigValue::Uint(val))
            }
            ValueKind::Duration => {
                let val = self.registry.get_uint(&key).await?;
                if val == 0 {
                    None
                } else {
                    let secs = u64::try_from(val).map_err(|_| {
                        Error::new_ext(ErrorKind::MalformedData, "duration out of range")
                    })?;
                    Some(ConfigValue::Duration(Duration::from_secs(secs)))
                }
            }
            ValueKind::Decimal => {
                let (base, exp) = self.registry.get_decimal(&key).await?;
                (base != 0).then(|| ConfigValue::Decimal(base as f64 * 10f64.powi(exp)))
            }
            ValueKind::Address => {
                let val = self.registry.get_address(&key).await?;
                (!val.is_zero()).then(|| ConfigValue::Address(val))
            }
        };
        Ok(value)
    }

    async fn resolve(&self, param: &Parameter) -> Result<Resolved> {
        let name = param.key.name();
        for source in param.order.sources() {
            let value = match source {
                Source::Override => match self.overrides.get(name) {
                    Some(raw) => Some(parse_override(param.kind, &raw).map_err(|err| {
                        Error::new_ext(
                            ErrorKind::MalformedData,
                            format!("{} override: {}", name, err.to_string_full()),
                        )
                    })?),
                    None => None,
                },
                Source::Registry => match self.read_registry(param).await {
                    Ok(value) => value,
                    Err(err) => {
                        warn!("{} registry read failed: {}", name, err.to_string_full());
                        None
                    }
                },
                Source::Default => param.default,
            };
            if let Some(value) = value {
                debug!("{} = {:?} ({:?})", name, value, source);
                return Ok(Resolved { value, source });
            }
        }
        Err(Error::new_ext(
            ErrorKind::ConfigurationMissing,
            format!("no value for {}", name),
        ))
    }

    /// Resolves every parameter. Fails if one of them has no value.
    pub async fn initialize(&self) -> Result<()> {
        let mut values = HashMap::new();
        for param in PARAMETERS {
            let resolved = self.resolve(param).await?;
            values.insert(param.key, resolved);
        }
        *self.values.write() = values;
        Ok(())
    }

    fn apply_registry_value(&self, param: &Parameter, value: ConfigValue) -> bool {
        let mut values = self.values.write();
        let current = match values.get_mut(&param.key) {
            Some(current) => current,
            None => return false,
        };
        if param.order.rank(Source::Registry) > param.order.rank(current.source) {
            return false;
        }
        if current.value == value {
            return false;
        }
        info!(
            "{} changed {:?} -> {:?}",
            param.key.name(),
            current.value,
            value
        );
        *current = Resolved {
            value,
            source: Source::Registry,
        };
        true
    }

    /// Polls the registry again. Returns the number of changed parameters.
    pub async fn refresh(&self) -> Result<usize> {
        let initialized = !self.values.read().is_empty();
        if !initialized {
            return Err(Error::new_ext(
                ErrorKind::ConfigurationMissing,
                "configuration not initialized",
            ));
        }
        let mut changed = 0;
        for param in PARAMETERS {
            let value = match self.read_registry(param).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(err) => {
                    warn!("{} registry read failed: {}", param.key.name(), err.to_string_full());
                    continue;
                }
            };
            if self.apply_registry_value(param, value) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn resolved(&self, key: ConfigKey) -> Option<Resolved> {
        self.values.read().get(&key).copied()
    }

    pub fn get(&self, key: ConfigKey) -> Result<ConfigValue> {
        self.resolved(key).map(|r| r.value).ok_or_else(|| {
            Error::new_ext(ErrorKind::ConfigurationMissing, format!("no value for {}", key.name()))
        })
    }

    pub fn uint(&self, key: ConfigKey) -> Result<u128> {
        match self.get(key)? {
            ConfigValue::Uint(val) => Ok(val),
            other => Err(wrong_kind(key, other)),
        }
    }

    pub fn u64(&self, key: ConfigKey) -> Result<u64> {
        u64::try_from(self.uint(key)?).map_err(|_| {
            Error::new_ext(ErrorKind::MalformedData, format!("{} out of range", key.name()))
        })
    }

    pub fn duration(&self, key: ConfigKey) -> Result<Duration> {
        match self.get(key)? {
            ConfigValue::Duration(val) => Ok(val),
            other => Err(wrong_kind(key, other)),
        }
    }

    pub fn decimal(&self, key: ConfigKey) -> Result<f64> {
        match self.get(key)? {
            ConfigValue::Decimal(val) => Ok(val),
            other => Err(wrong_kind(key, other)),
        }
    }

    pub fn address(&self, key: ConfigKey) -> Result<Address> {
        match self.get(key)? {
            ConfigValue::Address(val) => Ok(val),
            other => Err(wrong_kind(key, other)),
        }
    }

    /// Turn decision parameters as currently configured.
    pub fn turn_config(&self) -> Result<TurnConfig> {
        Ok(TurnConfig {
            stake_limit_multiplicator: self.uint(ConfigKey::StakeLimitMultiplicator)?,
            price_fallback_delta_pct: self.decimal(ConfigKey::PriceFallbackDeltaPct)?,
            price_fallback_blocks: self.u64(ConfigKey::PriceFallbackBlocks)?,
            price_publish_blocks: self.u64(ConfigKey::PricePublishBlocks)?,
        })
    }
}

fn wrong_kind(key: ConfigKey, value: ConfigValue) -> Error {
    Error::new_ext(
        ErrorKind::MalformedData,
        format!("unexpected {} value {:?}", key.name(), value),
    )
}

#[async_trait]
impl Task for OracleConfig {
    fn name(&self) -> String {
        "configuration".to_string()
    }

    async fn tick(&self) -> Result<Duration> {
        self.refresh().await?;
        self.duration(ConfigKey::ConfigurationTaskInterval)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{base::Mutex, chain::MockRegistry};
    use async_std::task::block_on;

    pub const TEST_MANAGER_ADDR: &str = "0x2222222222222222222222222222222222222222";

    #[derive(Default)]
    pub struct RegistryState {
        pub uints: HashMap<Hash, u128>,
        pub decimals: HashMap<Hash, (i128, i32)>,
        pub addresses: HashMap<Hash, Address>,
        pub broken: bool,
    }

    pub fn create_test_registry(state: Arc<Mutex<RegistryState>>) -> MockRegistry {
        let mut registry = MockRegistry::new();
        let uints = state.clone();
        registry.expect_get_uint().returning(move |key| {
            let state = uints.lock();
            match state.broken {
                true => Err(Error::new(ErrorKind::BadNetwork)),
                false => Ok(state.uints.get(key).copied().unwrap_or_default()),
            }
        });
        let decimals = state.clone();
        registry.expect_get_decimal().returning(move |key| {
            let state = decimals.lock();
            match state.broken {
                true => Err(Error::new(ErrorKind::BadNetwork)),
                false => Ok(state.decimals.get(key).copied().unwrap_or_default()),
            }
        });
        registry.expect_get_address().returning(move |key| {
            let state = state.lock();
            match state.broken {
                true => Err(Error::new(ErrorKind::BadNetwork)),
                false => Ok(state.addresses.get(key).copied().unwrap_or_default()),
            }
        });
        registry
    }

    fn overrides(values: &[(&str, &str)]) -> HashMap<String, String> {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Initialized configuration with an empty registry.
    pub fn create_test_config(values: &[(&str, &str)]) -> Arc<OracleConfig> {
        let mut values = values.to_vec();
        values.push(("ORACLE_MANAGER_ADDR", TEST_MANAGER_ADDR));
        let registry = create_test_registry(Arc::new(Mutex::new(RegistryState::default())));
        let config = OracleConfig::new(Arc::new(registry), overrides(&values));
        block_on(config.initialize()).unwrap();
        Arc::new(config)
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[test]
    fn registry_key_path() {
        assert_eq!(
            ConfigKey::MessageVersion.registry_key().to_hex(),
            "eafac1a2b4d4fdcc942cbdce334a88ec83387087978d039f1320d3639a0b59df"
        );
    }

    #[test]
    fn missing_manager_address_is_fatal() {
        let registry = create_test_registry(Arc::new(Mutex::new(RegistryState::default())));
        let config = OracleConfig::new(Arc::new(registry), HashMap::new());

        let err = block_on(config.initialize()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
        assert!(err.to_string_full().contains("ORACLE_MANAGER_ADDR"));
    }

    #[test]
    fn defaults() {
        let config = create_test_config(&[]);

        assert_eq!(config.uint(ConfigKey::MessageVersion).unwrap(), 3);
        assert_eq!(
            config.duration(ConfigKey::MainLoopTaskInterval).unwrap(),
            Duration::from_secs(120)
        );
        assert_eq!(config.decimal(ConfigKey::PriceRejectDeltaPct).unwrap(), 50.0);
        assert_eq!(
            config.resolved(ConfigKey::QueueLen).unwrap().source,
            Source::Default
        );
        assert_eq!(
            config.address(ConfigKey::OracleManagerAddr).unwrap(),
            Address::from_str(TEST_MANAGER_ADDR).unwrap()
        );
        assert_eq!(
            config.turn_config().unwrap(),
            TurnConfig {
                stake_limit_multiplicator: 2,
                price_fallback_delta_pct: 0.05,
                price_fallback_blocks: 3,
                price_publish_blocks: 1,
            }
        );
    }

    #[test]
    fn resolution_orders() {
        let state = Arc::new(Mutex::new(RegistryState::default()));
        {
            let mut state = state.lock();
            state
                .addresses
                .insert(ConfigKey::OracleManagerAddr.registry_key(), addr(0x11));
            state.uints.insert(ConfigKey::PriceFetchRate.registry_key(), 9);
            state.uints.insert(ConfigKey::RpcTimeout.registry_key(), 30);
            state
                .decimals
                .insert(ConfigKey::PriceRejectDeltaPct.registry_key(), (5, -1));
        }
        let registry = create_test_registry(state);
        let config = OracleConfig::new(
            Arc::new(registry),
            overrides(&[
                ("ORACLE_MANAGER_ADDR", TEST_MANAGER_ADDR),
                ("ORACLE_PRICE_FETCH_RATE", "7s"),
            ]),
        );

        block_on(config.initialize()).unwrap();

        let manager = config.resolved(ConfigKey::OracleManagerAddr).unwrap();
        assert_eq!(manager.value, ConfigValue::Address(addr(0x11)));
        assert_eq!(manager.source, Source::Registry);
        let fetch_rate = config.resolved(ConfigKey::PriceFetchRate).unwrap();
        assert_eq!(fetch_rate.value, ConfigValue::Duration(Duration::from_secs(7)));
        assert_eq!(fetch_rate.source, Source::Override);
        let rpc_timeout = config.resolved(ConfigKey::RpcTimeout).unwrap();
        assert_eq!(rpc_timeout.value, ConfigValue::Duration(Duration::from_secs(10)));
        assert_eq!(rpc_timeout.source, Source::Default);
        assert_eq!(config.decimal(ConfigKey::PriceRejectDeltaPct).unwrap(), 0.5);
    }

    #[test]
    fn registry_failure_reads_as_unset() {
        let state = Arc::new(Mutex::new(RegistryState {
            broken: true,
            ..Default::default()
        }));
        let registry = create_test_registry(state);
        let config = OracleConfig::new(
            Arc::new(registry),
            overrides(&[("ORACLE_MANAGER_ADDR", TEST_MANAGER_ADDR)]),
        );

        block_on(config.initialize()).unwrap();

        assert_eq!(
            config.resolved(ConfigKey::PriceFetchRate).unwrap().source,
            Source::Default
        );
        assert_eq!(
            config.resolved(ConfigKey::OracleManagerAddr).unwrap().source,
            Source::Override
        );
    }

    #[test]
    fn malformed_override() {
        let registry = create_test_registry(Arc::new(Mutex::new(RegistryState::default())));
        let config = OracleConfig::new(
            Arc::new(registry),
            overrides(&[
                ("ORACLE_MANAGER_ADDR", TEST_MANAGER_ADDR),
                ("ORACLE_QUEUE_LEN", "many"),
            ]),
        );

        let err = block_on(config.initialize()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn refresh_respects_resolution_order() {
        let state = Arc::new(Mutex::new(RegistryState::default()));
        state
            .lock()
            .addresses
            .insert(ConfigKey::OracleManagerAddr.registry_key(), addr(0x11));
        let registry = create_test_registry(state.clone());
        let config = OracleConfig::new(
            Arc::new(registry),
            overrides(&[("ORACLE_GATHER_SIGNATURE_TIMEOUT", "1")]),
        );
        block_on(config.initialize()).unwrap();

        {
            let mut state = state.lock();
            state
                .addresses
                .insert(ConfigKey::OracleManagerAddr.registry_key(), addr(0x33));
            state.uints.insert(ConfigKey::PriceFetchRate.registry_key(), 9);
            state.uints.insert(ConfigKey::GatherSignatureTimeout.registry_key(), 4);
            state.uints.insert(ConfigKey::RpcTimeout.registry_key(), 30);
        }
        let changed = block_on(config.refresh()).unwrap();

        assert_eq!(changed, 2);
        assert_eq!(
            config.address(ConfigKey::OracleManagerAddr).unwrap(),
            addr(0x33)
        );
        let fetch_rate = config.resolved(ConfigKey::PriceFetchRate).unwrap();
        assert_eq!(fetch_rate.value, ConfigValue::Duration(Duration::from_secs(9)));
        assert_eq!(fetch_rate.source, Source::Registry);
        assert_eq!(
            config.duration(ConfigKey::GatherSignatureTimeout).unwrap(),
            Duration::from_secs(1)
        );
        assert_eq!(
            config.duration(ConfigKey::RpcTimeout).unwrap(),
            Duration::from_secs(10)
        );

        assert_eq!(block_on(config.refresh()).unwrap(), 0);
    }

    #[test]
    fn refresh_requires_initialize() {
        let registry = create_test_registry(Arc::new(Mutex::new(RegistryState::default())));
        let config = OracleConfig::new(Arc::new(registry), HashMap::new());

        let err = block_on(config.refresh()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
    }

    #[test]
    fn duration_formats() {
        let cases = [
            ("5", Duration::from_secs(5)),
            ("5s", Duration::from_secs(5)),
            ("5 secs", Duration::from_secs(5)),
            ("2 mins", Duration::from_secs(120)),
            ("1 hour", Duration::from_secs(3600)),
            ("250ms", Duration::from_millis(250)),
            ("1.5s", Duration::from_millis(1500)),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_duration(raw).unwrap(), expected, "{}", raw);
        }
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5 fortnights").is_err());
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("TRINCI_ORACLE_TEST_OVERRIDE", "42");

        assert_eq!(
            EnvOverrides.get("TRINCI_ORACLE_TEST_OVERRIDE"),
            Some("42".to_string())
        );
        assert_eq!(EnvOverrides.get("TRINCI_ORACLE_TEST_UNSET"), None);
    }
}
