use config::{ModelPrice, PricingConfig};

/// Per-model token prices used to cost a completed call.
#[derive(Debug, Clone)]
pub struct Pricing {
    config: PricingConfig,
}

impl Pricing {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.config.price_for(model)
    }

    /// USD cost of a call. Models without their own entry use the default
    /// price.
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let price = self.price_for(model);
        (prompt_tokens as f64 / 1000.0) * price.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * price.completion_per_1k
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
