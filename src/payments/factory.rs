use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{
    AirtelMoneyGateway, FlutterwaveGateway, MpesaGateway, MtnMomoGateway, OrangeMoneyGateway,
    PaypalGateway, PaystackGateway, RazorpayGateway, SandboxGateway, StripeGateway, WaveGateway,
};
use crate::payments::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GatewayRegistryConfig {
    pub enabled_gateways: Vec<GatewayName>,
}

impl GatewayRegistryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw =
            std::env::var("ENABLED_GATEWAYS").unwrap_or_else(|_| "sandbox".to_string());
        Self::parse(&enabled_raw)
    }

    pub fn parse(enabled_raw: &str) -> PaymentResult<Self> {
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let name = GatewayName::from_str(value)?;
            if !enabled_gateways.contains(&name) {
                enabled_gateways.push(name);
            }
        }

        if enabled_gateways.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "at least one gateway must be enabled".to_string(),
                field: Some("ENABLED_GATEWAYS".to_string()),
            });
        }

        Ok(Self { enabled_gateways })
    }
}

/// Fixed table of enabled rails. Built once at startup; lookups never touch
/// strings, the API edge parses `GatewayName` first.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn from_env() -> PaymentResult<Self> {
        Self::with_config(&GatewayRegistryConfig::from_env()?)
    }

    pub fn with_config(config: &GatewayRegistryConfig) -> PaymentResult<Self> {
        let mut builder = Self::builder();
        for name in &config.enabled_gateways {
            builder = builder.register(Self::build(*name)?);
            info!(gateway = %name, "payment gateway enabled");
        }
        Ok(builder.build())
    }

    pub fn builder() -> GatewayRegistryBuilder {
        GatewayRegistryBuilder::default()
    }

    fn build(name: GatewayName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        Ok(match name {
            GatewayName::Stripe => Arc::new(StripeGateway::from_env()?),
            GatewayName::Paypal => Arc::new(PaypalGateway::from_env()?),
            GatewayName::Paystack => Arc::new(PaystackGateway::from_env()?),
            GatewayName::Flutterwave => Arc::new(FlutterwaveGateway::from_env()?),
            GatewayName::Razorpay => Arc::new(RazorpayGateway::from_env()?),
            GatewayName::Wave => Arc::new(WaveGateway::from_env()?),
            GatewayName::Mpesa => Arc::new(MpesaGateway::from_env()?),
            GatewayName::MtnMomo => Arc::new(MtnMomoGateway::from_env()?),
            GatewayName::AirtelMoney => Arc::new(AirtelMoneyGateway::from_env()?),
            GatewayName::OrangeMoney => Arc::new(OrangeMoneyGateway::from_env()?),
            GatewayName::Sandbox => Arc::new(SandboxGateway::from_env()?),
        })
    }

    pub fn get(&self, name: GatewayName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("gateway {} is disabled", name),
                field: Some("gateway".to_string()),
            })
    }

    pub fn list_available(&self) -> Vec<GatewayName> {
        GatewayName::ALL
            .into_iter()
            .filter(|name| self.gateways.contains_key(name))
            .collect()
    }

    /// Enabled rails whose country policy admits `country_code`.
    pub fn available_for_country(&self, country_code: &str) -> Vec<GatewayName> {
        self.list_available()
            .into_iter()
            .filter(|name| {
                self.gateways
                    .get(name)
                    .map(|g| g.country_policy().permits(country_code))
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct GatewayRegistryBuilder {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistryBuilder {
    /// Registers a gateway under its own name, replacing any earlier one.
    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.name(), gateway);
        self
    }

    pub fn build(self) -> GatewayRegistry {
        GatewayRegistry {
            gateways: self.gateways,
        }
    }
}
